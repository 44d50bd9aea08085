use crate::{
    cli::telemetry,
    socket::{self, Bootstrapped, ShutdownEvent, ShutdownSignals, SignalSource, SocketConfig},
    webapp,
};
use anyhow::{Context, Result};
use std::{net::IpAddr, sync::Arc};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub socket: SocketConfig,
    pub bind_ip: IpAddr,
}

/// Execute the server action.
/// # Errors
/// Returns an error if signal handlers cannot be installed, the bootstrap fails, or
/// the server stops accepting connections.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let signals = Arc::new(ShutdownSignals::new());
    let _signal_task = socket::listen_for_signals(Arc::clone(&signals))
        .context("Failed to install signal handlers")?;

    let started = socket::bootstrap(
        args.socket,
        socket::TokioTransport::new(args.bind_ip),
        signals.clone(),
    )
    .context("Server startup failed")?;

    info!(marker = %started.marker, target = %started.target, "Startup complete");

    // Subscribed after the socket cleanup so the file goes first.
    for event in ShutdownEvent::ALL.into_iter().filter(|e| e.signal().is_some()) {
        signals.subscribe(event, Arc::new(|_: ShutdownEvent| telemetry::shutdown_tracer()));
    }

    let app = webapp::router(&started.target);
    let Bootstrapped {
        listener, cleanup, ..
    } = started;

    if let Some(cleanup) = &cleanup {
        info!(path = %cleanup.path().display(), "Socket file will be removed on shutdown");
    }

    let result = webapp::serve(listener, app).await;

    signals.emit(ShutdownEvent::Exit);
    drop(cleanup);
    telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    let socket = &args.socket;
    let listen_addr = match socket.unix_socket_path.as_deref().filter(|p| !p.is_empty()) {
        Some(path) => format!("unix:{path}"),
        None => format!("tcp:[{}]:{}", args.bind_ip, socket.port),
    };
    let entries = [
        ("listen", listen_addr),
        (
            "socket_group",
            socket
                .unix_socket_group
                .clone()
                .filter(|g| !g.is_empty())
                .unwrap_or_else(|| "default".to_string()),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", webapp_banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn webapp_banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    WEBAPP_BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

const WEBAPP_BANNER: &str = r"
   .-----.
  ( ) ( ) )   W E B A P P {VERSION}
   '-----'";
