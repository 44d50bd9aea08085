use crate::socket::{BindTarget, EntryKind};
use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Startup failures. Every variant aborts the bootstrap.
#[derive(Debug, Error)]
pub enum Error {
    #[error("an existing file was found at {}, refusing to delete ({kind})", path.display())]
    Conflict { path: PathBuf, kind: EntryKind },
    #[error("failed to stat {}: {source}", path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove stale socket {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unix socket path must be absolute: {}", .0.display())]
    RelativeSocketPath(PathBuf),
    #[error("failed to listen on {target}: {source}")]
    Bind {
        target: BindTarget,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Ownership(#[from] OwnershipError),
}

#[derive(Debug, Error)]
pub enum OwnershipError {
    #[error("unknown group: {0}")]
    UnknownGroup(String),
    #[error("gid {0} cannot be applied, chown would leave the group unchanged")]
    InvalidGid(u32),
    #[error("failed to look up group {group}: {source}")]
    Lookup {
        group: String,
        #[source]
        source: nix::Error,
    },
    #[error("cannot change ownership of {}: no socket file exists", path.display())]
    MissingSocket { path: PathBuf },
    #[error("failed to change group of {} to {gid}: {source}", path.display())]
    Chown {
        path: PathBuf,
        gid: u32,
        #[source]
        source: nix::Error,
    },
}

/// Raised while removing the socket file during shutdown. Only ever logged.
#[derive(Debug, Error)]
#[error("failed to clean up socket file {}: {source}", path.display())]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: Error,
}
