use crate::{
    cli::actions::{server::Args, Action},
    socket::SocketConfig,
};
use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv6Addr};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let bind_ip = matches
        .get_one::<IpAddr>("bind-ip")
        .copied()
        .unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED));

    let socket = SocketConfig {
        port,
        unix_socket_path: matches.get_one::<String>("unix-socket-path").cloned(),
        unix_socket_group: matches.get_one::<String>("unix-socket-group").cloned(),
    };

    // Surface a bad UNIX_SOCKET_PATH before anything is started.
    socket.resolve().context("invalid UNIX_SOCKET_PATH")?;

    Ok(Action::Server(Args { socket, bind_ip }))
}
