//! # webapp
//!
//! HTTP server that listens either on a TCP port or on a Unix domain socket.
//!
//! Setting `UNIX_SOCKET_PATH` switches the listener from `PORT` to a socket
//! file. A socket left behind by a previous process is removed before bind;
//! any other kind of file at that path aborts startup instead of being
//! overwritten. When `UNIX_SOCKET_GROUP` is set, the socket file is handed to
//! that group right after bind so a reverse proxy running under it can connect.
//! The socket file is removed again on normal exit and on SIGINT, SIGHUP and
//! SIGTERM.
//!
//! See [`socket`] for the bootstrap sequence and [`cli`] for configuration.

pub mod cli;
pub mod socket;
pub mod webapp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
