//! Listener bootstrap for TCP ports and Unix domain sockets.
//!
//! The startup sequence for a socket path is:
//!
//! 1. resolve the [`BindTarget`] from [`SocketConfig`]
//! 2. remove a stale socket file, refusing anything that is not a socket
//! 3. bind through a [`Transport`]
//! 4. register removal of the socket file on exit, SIGINT, SIGHUP and SIGTERM
//! 5. change the socket file's group if `UNIX_SOCKET_GROUP` is set
//!
//! A TCP target only goes through steps 1 and 3.

pub mod bootstrap;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod ownership;
pub mod stale;

pub use self::bootstrap::{
    bootstrap, Bootstrapped, Listener, ServerBootstrap, StartupMarker, TokioTransport, Transport,
};
pub use self::cleanup::{
    listen_for_signals, register_socket_file_cleanup, Handler, ShutdownEvent, ShutdownSignals,
    SignalSource, SocketCleanup, SubscriptionId,
};
pub use self::config::{BindTarget, SocketConfig, DEFAULT_PORT};
pub use self::error::{CleanupError, Error, OwnershipError, Result};
pub use self::ownership::{apply_ownership, resolve_group, GroupIdentifier, OwnershipSpec};
pub use self::stale::{remove_existing_socket_file, socket_file_state, EntryKind, SocketFileState};
