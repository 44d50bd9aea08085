use crate::socket::{
    cleanup::{register_socket_file_cleanup, SignalSource, SocketCleanup},
    config::{BindTarget, SocketConfig},
    error::{Error, Result},
    ownership::{apply_ownership, OwnershipSpec},
    stale::remove_existing_socket_file,
};
use nix::unistd::Gid;
use std::{
    fmt, io,
    net::{IpAddr, Ipv6Addr, SocketAddr},
    path::Path,
    sync::Arc,
};
use tokio::net::{TcpListener, UnixListener};
use tracing::info;

/// Binds and listens on a [`BindTarget`].
pub trait Transport {
    type Listener;

    /// # Errors
    /// Returns the underlying I/O error if the bind or listen call fails.
    fn listen(&self, target: &BindTarget) -> io::Result<Self::Listener>;
}

#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// Tokio listeners; TCP binds to `bind_ip`. Must be used inside a runtime.
#[derive(Debug, Clone, Copy)]
pub struct TokioTransport {
    bind_ip: IpAddr,
}

impl TokioTransport {
    #[must_use]
    pub fn new(bind_ip: IpAddr) -> Self {
        Self { bind_ip }
    }
}

impl Default for TokioTransport {
    fn default() -> Self {
        Self::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED))
    }
}

impl Transport for TokioTransport {
    type Listener = Listener;

    fn listen(&self, target: &BindTarget) -> io::Result<Listener> {
        match target {
            BindTarget::TcpPort(port) => {
                let listener = std::net::TcpListener::bind(SocketAddr::new(self.bind_ip, *port))?;
                listener.set_nonblocking(true)?;
                Ok(Listener::Tcp(TcpListener::from_std(listener)?))
            }
            BindTarget::UnixSocketPath(path) => Ok(Listener::Unix(UnixListener::bind(path)?)),
        }
    }
}

/// Returned once the server is listening for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMarker {
    Daemon,
}

impl StartupMarker {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daemon => "DAEMON",
        }
    }
}

impl fmt::Display for StartupMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A listening server together with the guard that removes its socket file.
pub struct Bootstrapped<L> {
    pub marker: StartupMarker,
    pub target: BindTarget,
    pub listener: L,
    /// Group applied to the socket file, if one was configured.
    pub gid: Option<Gid>,
    pub cleanup: Option<SocketCleanup>,
}

impl<L> fmt::Debug for Bootstrapped<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrapped")
            .field("marker", &self.marker)
            .field("target", &self.target)
            .field("gid", &self.gid.map(Gid::as_raw))
            .field("cleanup", &self.cleanup)
            .finish_non_exhaustive()
    }
}

/// Runs the startup sequence once: resolve, prepare, bind, register, chown.
pub struct ServerBootstrap<T> {
    config: SocketConfig,
    transport: T,
    signals: Arc<dyn SignalSource>,
}

impl<T: Transport> ServerBootstrap<T> {
    #[must_use]
    pub fn new(config: SocketConfig, transport: T, signals: Arc<dyn SignalSource>) -> Self {
        Self {
            config,
            transport,
            signals,
        }
    }

    /// # Errors
    /// Returns the first failing step's error; nothing is retried.
    pub fn start(self) -> Result<Bootstrapped<T::Listener>> {
        let (target, ownership) = self.resolve_target()?;

        let Some(path) = target.socket_path().map(Path::to_path_buf) else {
            let listener = self.bind_and_listen(&target)?;
            info!(target = %target, "Server listening");
            return Ok(Bootstrapped {
                marker: StartupMarker::Daemon,
                target,
                listener,
                gid: None,
                cleanup: None,
            });
        };

        Self::prepare_socket_file(&path)?;
        let listener = self.bind_and_listen(&target)?;

        // Armed before the group change so a signal arriving meanwhile still
        // removes the file.
        let cleanup = self.register_cleanup(&path);

        let gid = match Self::apply_ownership_if_configured(&path, ownership.as_ref()) {
            Ok(gid) => gid,
            Err(e) => {
                drop(listener);
                // Dropping the guard removes the socket file bound above.
                drop(cleanup);
                return Err(e);
            }
        };

        info!(target = %target, "Server listening");

        Ok(Bootstrapped {
            marker: StartupMarker::Daemon,
            target,
            listener,
            gid,
            cleanup: Some(cleanup),
        })
    }

    fn resolve_target(&self) -> Result<(BindTarget, Option<OwnershipSpec>)> {
        self.config.resolve()
    }

    fn prepare_socket_file(path: &Path) -> Result<()> {
        remove_existing_socket_file(path)
    }

    fn bind_and_listen(&self, target: &BindTarget) -> Result<T::Listener> {
        self.transport.listen(target).map_err(|source| Error::Bind {
            target: target.clone(),
            source,
        })
    }

    fn apply_ownership_if_configured(
        path: &Path,
        ownership: Option<&OwnershipSpec>,
    ) -> Result<Option<Gid>> {
        ownership
            .map(|spec| apply_ownership(path, spec))
            .transpose()
            .map_err(Error::from)
    }

    fn register_cleanup(&self, path: &Path) -> SocketCleanup {
        register_socket_file_cleanup(path, Arc::clone(&self.signals))
    }
}

/// Bootstrap a server from `config`, returning the listener once it is ready.
///
/// # Errors
/// Returns an error if the socket path is occupied by something other than a
/// socket, the bind fails, or the configured group cannot be applied.
pub fn bootstrap<T: Transport>(
    config: SocketConfig,
    transport: T,
    signals: Arc<dyn SignalSource>,
) -> Result<Bootstrapped<T::Listener>> {
    ServerBootstrap::new(config, transport, signals).start()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{
        cleanup::{Handler, ShutdownEvent, ShutdownSignals, SubscriptionId},
        error::OwnershipError,
        stale::{socket_file_state, SocketFileState},
    };
    use std::{
        fs,
        os::unix::fs::MetadataExt,
        path::PathBuf,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };
    use tempfile::TempDir;

    /// Records bind targets and creates a plain std listener.
    #[derive(Default)]
    struct RecordingTransport {
        targets: Mutex<Vec<BindTarget>>,
    }

    impl Transport for &RecordingTransport {
        type Listener = std::os::unix::net::UnixListener;

        fn listen(&self, target: &BindTarget) -> io::Result<Self::Listener> {
            self.targets.lock().unwrap().push(target.clone());
            match target {
                BindTarget::UnixSocketPath(path) => std::os::unix::net::UnixListener::bind(path),
                BindTarget::TcpPort(_) => Err(io::Error::other("tcp not supported here")),
            }
        }
    }

    struct FailingTransport;

    impl Transport for FailingTransport {
        type Listener = ();

        fn listen(&self, _target: &BindTarget) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::AddrInUse))
        }
    }

    /// Counts every subscription it ever saw.
    #[derive(Default)]
    struct CountingSource {
        inner: ShutdownSignals,
        subscribed: AtomicUsize,
    }

    impl SignalSource for CountingSource {
        fn subscribe(&self, event: ShutdownEvent, handler: Handler) -> SubscriptionId {
            self.subscribed.fetch_add(1, Ordering::SeqCst);
            self.inner.subscribe(event, handler)
        }

        fn unsubscribe(&self, id: SubscriptionId) {
            self.inner.unsubscribe(id);
        }
    }

    fn socket_path(dir: &TempDir) -> PathBuf {
        dir.path().join("webapp.sock")
    }

    #[test]
    fn unix_socket_bootstrap_reports_daemon() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        let transport = RecordingTransport::default();
        let signals = Arc::new(ShutdownSignals::new());

        let started = bootstrap(
            SocketConfig::unix(path.to_string_lossy()),
            &transport,
            signals.clone(),
        )
        .unwrap();

        assert_eq!(started.marker, StartupMarker::Daemon);
        assert_eq!(started.marker.to_string(), "DAEMON");
        assert_eq!(started.target, BindTarget::UnixSocketPath(path.clone()));
        assert_eq!(started.gid, None);
        assert_eq!(socket_file_state(&path).unwrap(), SocketFileState::Socket);
        assert_eq!(
            fs::metadata(&path).unwrap().gid(),
            Gid::effective().as_raw()
        );
        assert_eq!(signals.subscriber_count(), ShutdownEvent::ALL.len());

        drop(started);
        assert!(!path.exists());
        assert_eq!(signals.subscriber_count(), 0);
    }

    #[test]
    fn stale_socket_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        let transport = RecordingTransport::default();

        let started = bootstrap(
            SocketConfig::unix(path.to_string_lossy()),
            &transport,
            Arc::new(ShutdownSignals::new()),
        )
        .unwrap();

        assert_eq!(started.marker, StartupMarker::Daemon);
        assert_eq!(transport.targets.lock().unwrap().len(), 1);
    }

    #[test]
    fn conflicting_file_aborts_before_bind() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        fs::write(&path, "keep me").unwrap();
        let transport = RecordingTransport::default();

        let err = bootstrap(
            SocketConfig::unix(path.to_string_lossy()),
            &transport,
            Arc::new(ShutdownSignals::new()),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Conflict { .. }));
        assert!(transport.targets.lock().unwrap().is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep me");
    }

    #[test]
    fn bind_failure_is_reported() {
        let signals = Arc::new(ShutdownSignals::new());
        let err = bootstrap(SocketConfig::tcp(8080), FailingTransport, signals.clone()).unwrap_err();

        assert!(matches!(
            err,
            Error::Bind {
                target: BindTarget::TcpPort(8080),
                ..
            }
        ));
        assert!(err.to_string().contains("tcp:8080"));
        assert_eq!(signals.subscriber_count(), 0);
    }

    #[test]
    fn unknown_group_removes_fresh_socket() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        let transport = RecordingTransport::default();
        let signals = Arc::new(ShutdownSignals::new());
        let group = format!("no-such-group-{}", ulid::Ulid::new());

        let err = bootstrap(
            SocketConfig::unix(path.to_string_lossy()).with_group(group),
            &transport,
            signals.clone(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            Error::Ownership(OwnershipError::UnknownGroup(_))
        ));
        assert!(!path.exists());
        assert_eq!(signals.subscriber_count(), 0);
    }

    #[test]
    fn cleanup_is_armed_while_group_is_applied() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        let transport = RecordingTransport::default();
        let source = Arc::new(CountingSource::default());
        let group = format!("no-such-group-{}", ulid::Ulid::new());

        let err = bootstrap(
            SocketConfig::unix(path.to_string_lossy()).with_group(group),
            &transport,
            source.clone(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Ownership(_)));
        assert_eq!(
            source.subscribed.load(Ordering::SeqCst),
            ShutdownEvent::ALL.len()
        );
        assert_eq!(source.inner.subscriber_count(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn own_group_is_applied() {
        let dir = TempDir::new().unwrap();
        let path = socket_path(&dir);
        let transport = RecordingTransport::default();
        let own_gid = Gid::effective();

        let started = bootstrap(
            SocketConfig::unix(path.to_string_lossy()).with_group(own_gid.to_string()),
            &transport,
            Arc::new(ShutdownSignals::new()),
        )
        .unwrap();

        assert_eq!(started.gid, Some(own_gid));
        assert_eq!(fs::metadata(&path).unwrap().gid(), own_gid.as_raw());
    }
}
