use crate::socket::error::{Error, Result};
use std::{
    fmt, fs, io,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Kind of a filesystem entry that is not a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Fifo,
    BlockDevice,
    CharDevice,
    Unknown,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::File => "regular file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::Fifo => "fifo",
            Self::BlockDevice => "block device",
            Self::CharDevice => "character device",
            Self::Unknown => "unknown entry",
        };
        f.write_str(name)
    }
}

/// What currently occupies a socket path, as seen by `lstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketFileState {
    Absent,
    Socket,
    Other(EntryKind),
}

/// Stat `path` without following symlinks.
///
/// # Errors
/// Returns `Error::Inspect` if the path exists but cannot be stat-ed.
pub fn socket_file_state(path: &Path) -> Result<SocketFileState> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SocketFileState::Absent),
        Err(source) => {
            return Err(Error::Inspect {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let file_type = metadata.file_type();
    let state = if file_type.is_socket() {
        SocketFileState::Socket
    } else if file_type.is_symlink() {
        SocketFileState::Other(EntryKind::Symlink)
    } else if file_type.is_dir() {
        SocketFileState::Other(EntryKind::Directory)
    } else if file_type.is_file() {
        SocketFileState::Other(EntryKind::File)
    } else if file_type.is_fifo() {
        SocketFileState::Other(EntryKind::Fifo)
    } else if file_type.is_block_device() {
        SocketFileState::Other(EntryKind::BlockDevice)
    } else if file_type.is_char_device() {
        SocketFileState::Other(EntryKind::CharDevice)
    } else {
        SocketFileState::Other(EntryKind::Unknown)
    };

    Ok(state)
}

/// Remove a socket file left behind by a previous process.
///
/// Nothing at `path` is a no-op. Anything other than a socket is left in
/// place and reported as `Error::Conflict`.
///
/// # Errors
/// Returns an error if a non-socket entry occupies `path`, or if stat/unlink fails.
pub fn remove_existing_socket_file(path: &Path) -> Result<()> {
    match socket_file_state(path)? {
        SocketFileState::Absent => {
            debug!(path = %path.display(), "No socket file to remove");
            Ok(())
        }
        SocketFileState::Other(kind) => Err(Error::Conflict {
            path: path.to_path_buf(),
            kind,
        }),
        SocketFileState::Socket => match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed stale socket file");
                Ok(())
            }
            // Someone else got there between the stat and the unlink.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Remove {
                path: PathBuf::from(path),
                source,
            }),
        },
    }
}
