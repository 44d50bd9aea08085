use crate::socket::error::OwnershipError;
use nix::unistd::{chown, Gid, Group, Uid};
use std::{convert::Infallible, fmt, fs, path::Path, str::FromStr};
use tracing::info;

/// Group named by `UNIX_SOCKET_GROUP`, either by name or by numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupIdentifier {
    Name(String),
    Id(u32),
}

impl From<&str> for GroupIdentifier {
    fn from(s: &str) -> Self {
        let trimmed = s.trim();
        trimmed
            .parse::<u32>()
            .map_or_else(|_| Self::Name(trimmed.to_string()), Self::Id)
    }
}

impl FromStr for GroupIdentifier {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for GroupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Id(gid) => write!(f, "{gid}"),
        }
    }
}

/// Group ownership to apply to the socket file once it exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipSpec {
    pub group: GroupIdentifier,
}

impl OwnershipSpec {
    #[must_use]
    pub fn new(group: GroupIdentifier) -> Self {
        Self { group }
    }
}

const UNCHANGED_GID: u32 = u32::MAX;

/// Resolve a group identifier to a numeric gid.
///
/// # Errors
/// Returns an error if the group name is unknown, the group database cannot be
/// read, or the gid is `u32::MAX`.
pub fn resolve_group(group: &GroupIdentifier) -> Result<Gid, OwnershipError> {
    let gid = match group {
        GroupIdentifier::Id(gid) => Gid::from_raw(*gid),
        GroupIdentifier::Name(name) => Group::from_name(name)
            .map_err(|source| OwnershipError::Lookup {
                group: name.clone(),
                source,
            })?
            .map(|group| group.gid)
            .ok_or_else(|| OwnershipError::UnknownGroup(name.clone()))?,
    };

    // chown(2) reads (gid_t)-1 as "leave the group unchanged".
    if gid.as_raw() == UNCHANGED_GID {
        return Err(OwnershipError::InvalidGid(gid.as_raw()));
    }

    Ok(gid)
}

/// Change the group of the socket file at `path`, keeping the process's
/// effective uid as owner.
///
/// # Errors
/// Returns an error if nothing exists at `path`, the group cannot be resolved,
/// or the process is not allowed to change the group.
pub fn apply_ownership(path: &Path, spec: &OwnershipSpec) -> Result<Gid, OwnershipError> {
    if fs::symlink_metadata(path).is_err() {
        return Err(OwnershipError::MissingSocket {
            path: path.to_path_buf(),
        });
    }

    let gid = resolve_group(&spec.group)?;
    let uid = Uid::effective();

    chown(path, Some(uid), Some(gid)).map_err(|source| OwnershipError::Chown {
        path: path.to_path_buf(),
        gid: gid.as_raw(),
        source,
    })?;

    info!(
        path = %path.display(),
        group = %spec.group,
        gid = gid.as_raw(),
        uid = uid.as_raw(),
        "Applied socket file ownership"
    );

    Ok(gid)
}
