//! Socket file removal on process termination.
//!
//! Termination events are delivered through a [`SignalSource`] instead of
//! process-global handlers, so each bootstrap owns its subscriptions and drops
//! them with the [`SocketCleanup`] guard. [`ShutdownSignals`] is the in-process
//! source; [`listen_for_signals`] bridges SIGINT, SIGHUP and SIGTERM into it and
//! then lets the signal terminate the process as usual.

use crate::socket::{error::CleanupError, stale::remove_existing_socket_file};
use nix::sys::signal::{self as nix_signal, SigHandler, Signal};
use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tokio::{
    signal::unix::{signal, SignalKind},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownEvent {
    Exit,
    Interrupt,
    Hangup,
    Terminate,
}

impl ShutdownEvent {
    pub const ALL: [Self; 4] = [Self::Exit, Self::Interrupt, Self::Hangup, Self::Terminate];

    /// The OS signal behind this event; `None` for a normal exit.
    #[must_use]
    pub const fn signal(self) -> Option<Signal> {
        match self {
            Self::Exit => None,
            Self::Interrupt => Some(Signal::SIGINT),
            Self::Hangup => Some(Signal::SIGHUP),
            Self::Terminate => Some(Signal::SIGTERM),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exit => "exit",
            Self::Interrupt => "SIGINT",
            Self::Hangup => "SIGHUP",
            Self::Terminate => "SIGTERM",
        }
    }
}

impl fmt::Display for ShutdownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Handler = Arc<dyn Fn(ShutdownEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Something that delivers termination events to subscribed handlers.
pub trait SignalSource: Send + Sync {
    fn subscribe(&self, event: ShutdownEvent, handler: Handler) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

struct Subscriber {
    id: SubscriptionId,
    event: ShutdownEvent,
    handler: Handler,
}

#[derive(Default)]
pub struct ShutdownSignals {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl ShutdownSignals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every handler subscribed to `event` and return how many ran.
    pub fn emit(&self, event: ShutdownEvent) -> usize {
        // Handlers run outside the lock so they may unsubscribe.
        let handlers: Vec<Handler> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.event == event)
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in &handlers {
            handler(event);
        }

        handlers.len()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl SignalSource for ShutdownSignals {
    fn subscribe(&self, event: ShutdownEvent, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { id, event, handler });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| s.id != id);
    }
}

impl fmt::Debug for ShutdownSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownSignals")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Forward SIGINT, SIGHUP and SIGTERM to `signals`.
///
/// After the subscribers ran, the signal's default disposition is restored and
/// the signal raised again, so the process still dies the way it would have
/// without this listener.
///
/// # Errors
/// Returns an error if a signal handler cannot be registered.
pub fn listen_for_signals(signals: Arc<ShutdownSignals>) -> io::Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        let event = tokio::select! {
            _ = interrupt.recv() => ShutdownEvent::Interrupt,
            _ = hangup.recv() => ShutdownEvent::Hangup,
            _ = terminate.recv() => ShutdownEvent::Terminate,
        };

        info!(signal = %event, "Received termination signal");

        let notified = signals.emit(event);
        debug!(notified, "Shutdown handlers finished");

        if let Some(sig) = event.signal() {
            reraise(sig);
        }
    }))
}

fn reraise(sig: Signal) -> ! {
    // SAFETY: SIG_DFL runs no code in this process, so no handler can observe
    // partially updated state.
    let restored = unsafe { nix_signal::signal(sig, SigHandler::SigDfl) };

    if let Err(e) = restored.and_then(|_| nix_signal::raise(sig)) {
        error!("Failed to re-raise {sig}: {e}");
    }

    // Reached only when the default action did not end the process.
    std::process::exit(128 + sig as i32)
}

struct CleanupState {
    path: PathBuf,
    active: AtomicBool,
}

impl CleanupState {
    fn run(&self, event: ShutdownEvent) {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        match remove_existing_socket_file(&self.path) {
            Ok(()) => debug!(
                path = %self.path.display(),
                event = %event,
                "Socket file cleanup done"
            ),
            Err(source) => {
                // Leave the subscription armed so a later event can retry.
                self.active.store(true, Ordering::Release);
                let err = CleanupError {
                    path: self.path.clone(),
                    source,
                };
                warn!(event = %event, "{err}");
            }
        }
    }
}

/// Removes the socket file on the first termination event that reaches it.
///
/// Dropping the guard unsubscribes its handlers and runs the exit cleanup.
pub struct SocketCleanup {
    state: Arc<CleanupState>,
    source: Arc<dyn SignalSource>,
    subscriptions: Vec<SubscriptionId>,
}

impl SocketCleanup {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.state.path
    }

    /// `false` once the socket file has been removed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
    }

    /// Run the cleanup as if `event` had been delivered.
    pub fn fire(&self, event: ShutdownEvent) {
        self.state.run(event);
    }
}

impl Drop for SocketCleanup {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.source.unsubscribe(id);
        }
        self.state.run(ShutdownEvent::Exit);
    }
}

impl fmt::Debug for SocketCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketCleanup")
            .field("path", &self.state.path.display().to_string())
            .field("active", &self.is_active())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

/// Subscribe socket file removal to exit, SIGINT, SIGHUP and SIGTERM.
#[must_use]
pub fn register_socket_file_cleanup(
    path: impl Into<PathBuf>,
    source: Arc<dyn SignalSource>,
) -> SocketCleanup {
    let state = Arc::new(CleanupState {
        path: path.into(),
        active: AtomicBool::new(true),
    });

    let subscriptions = ShutdownEvent::ALL
        .iter()
        .map(|&event| {
            let state = Arc::clone(&state);
            source.subscribe(event, Arc::new(move |event: ShutdownEvent| state.run(event)))
        })
        .collect();

    debug!(path = %state.path.display(), "Registered socket file cleanup");

    SocketCleanup {
        state,
        source,
        subscriptions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, os::unix::net::UnixListener, sync::atomic::AtomicUsize};
    use tempfile::TempDir;

    fn stale_socket(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("webapp.sock");
        drop(UnixListener::bind(&path).unwrap());
        path
    }

    #[test]
    fn emit_only_reaches_matching_subscribers() {
        let signals = ShutdownSignals::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        signals.subscribe(
            ShutdownEvent::Hangup,
            Arc::new(move |_: ShutdownEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(signals.emit(ShutdownEvent::Terminate), 0);
        assert_eq!(signals.emit(ShutdownEvent::Hangup), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let signals = ShutdownSignals::new();
        let id = signals.subscribe(ShutdownEvent::Exit, Arc::new(|_: ShutdownEvent| {}));
        assert_eq!(signals.subscriber_count(), 1);

        signals.unsubscribe(id);
        assert_eq!(signals.subscriber_count(), 0);
        assert_eq!(signals.emit(ShutdownEvent::Exit), 0);
    }

    #[test]
    fn each_event_removes_socket_file() {
        for event in ShutdownEvent::ALL {
            let dir = TempDir::new().unwrap();
            let path = stale_socket(&dir);
            let signals = Arc::new(ShutdownSignals::new());
            let cleanup = register_socket_file_cleanup(&path, signals.clone());

            assert!(path.exists());
            assert_eq!(signals.emit(event), 1, "{event}");
            assert!(!path.exists(), "{event} left the socket file behind");
            assert!(!cleanup.is_active());
        }
    }

    #[test]
    fn repeated_events_are_noops() {
        let dir = TempDir::new().unwrap();
        let path = stale_socket(&dir);
        let signals = Arc::new(ShutdownSignals::new());
        let cleanup = register_socket_file_cleanup(&path, signals.clone());

        signals.emit(ShutdownEvent::Exit);
        assert!(!path.exists());

        // A new file at the same path must survive later events.
        drop(UnixListener::bind(&path).unwrap());
        signals.emit(ShutdownEvent::Terminate);
        signals.emit(ShutdownEvent::Terminate);
        cleanup.fire(ShutdownEvent::Interrupt);
        assert!(path.exists());
    }

    #[test]
    fn failed_cleanup_is_swallowed_and_retried() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("webapp.sock");
        fs::write(&path, "").unwrap();
        let signals = Arc::new(ShutdownSignals::new());
        let cleanup = register_socket_file_cleanup(&path, signals.clone());

        signals.emit(ShutdownEvent::Interrupt);
        assert!(path.exists());
        assert!(cleanup.is_active());

        fs::remove_file(&path).unwrap();
        drop(UnixListener::bind(&path).unwrap());
        signals.emit(ShutdownEvent::Hangup);
        assert!(!path.exists());
        assert!(!cleanup.is_active());
    }

    #[test]
    fn drop_unsubscribes_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let path = stale_socket(&dir);
        let signals = Arc::new(ShutdownSignals::new());

        let cleanup = register_socket_file_cleanup(&path, signals.clone());
        assert_eq!(cleanup.path(), path.as_path());
        assert_eq!(signals.subscriber_count(), ShutdownEvent::ALL.len());

        drop(cleanup);
        assert_eq!(signals.subscriber_count(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn event_names() {
        let names: Vec<_> = ShutdownEvent::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["exit", "SIGINT", "SIGHUP", "SIGTERM"]);
        assert_eq!(ShutdownEvent::Exit.signal(), None);
        assert_eq!(ShutdownEvent::Terminate.signal(), Some(Signal::SIGTERM));
    }
}
