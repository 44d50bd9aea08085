use crate::socket::{
    error::{Error, Result},
    GroupIdentifier, OwnershipSpec,
};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use tracing::warn;

pub const DEFAULT_PORT: u16 = 8080;

/// Where the server listens. Chosen once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindTarget {
    TcpPort(u16),
    UnixSocketPath(PathBuf),
}

impl BindTarget {
    #[must_use]
    pub fn socket_path(&self) -> Option<&Path> {
        match self {
            Self::TcpPort(_) => None,
            Self::UnixSocketPath(path) => Some(path),
        }
    }
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TcpPort(port) => write!(f, "tcp:{port}"),
            Self::UnixSocketPath(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Raw listen configuration, as read from `UNIX_SOCKET_PATH`,
/// `UNIX_SOCKET_GROUP` and `PORT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    pub port: u16,
    pub unix_socket_path: Option<String>,
    pub unix_socket_group: Option<String>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            unix_socket_path: None,
            unix_socket_group: None,
        }
    }
}

impl SocketConfig {
    #[must_use]
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            unix_socket_path: Some(path.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.unix_socket_group = Some(group.into());
        self
    }

    /// Pick the bind target and the ownership to apply after bind.
    ///
    /// Empty values count as unset. A group is only meaningful for a socket path.
    ///
    /// # Errors
    /// Returns `Error::RelativeSocketPath` if the socket path is not absolute.
    pub fn resolve(&self) -> Result<(BindTarget, Option<OwnershipSpec>)> {
        let group = non_empty(self.unix_socket_group.as_deref())
            .map(|g| OwnershipSpec::new(GroupIdentifier::from(g)));

        let Some(path) = non_empty(self.unix_socket_path.as_deref()) else {
            if let Some(spec) = group {
                warn!(
                    group = %spec.group,
                    "UNIX_SOCKET_GROUP ignored: no UNIX_SOCKET_PATH configured"
                );
            }
            return Ok((BindTarget::TcpPort(self.port), None));
        };

        let path = PathBuf::from(path);
        if !path.is_absolute() {
            return Err(Error::RelativeSocketPath(path));
        }

        Ok((BindTarget::UnixSocketPath(path), group))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_tcp() {
        let (target, ownership) = SocketConfig::default().resolve().unwrap();
        assert_eq!(target, BindTarget::TcpPort(DEFAULT_PORT));
        assert_eq!(ownership, None);
    }

    #[test]
    fn empty_path_selects_tcp() {
        let config = SocketConfig {
            port: 3000,
            unix_socket_path: Some(String::new()),
            unix_socket_group: Some(String::new()),
        };
        let (target, ownership) = config.resolve().unwrap();
        assert_eq!(target, BindTarget::TcpPort(3000));
        assert_eq!(ownership, None);
    }

    #[test]
    fn path_selects_unix_socket() {
        let (target, ownership) = SocketConfig::unix("/run/webapp.sock").resolve().unwrap();
        assert_eq!(
            target,
            BindTarget::UnixSocketPath(PathBuf::from("/run/webapp.sock"))
        );
        assert_eq!(target.to_string(), "unix:/run/webapp.sock");
        assert_eq!(ownership, None);
    }

    #[test]
    fn group_is_parsed() {
        let (_, ownership) = SocketConfig::unix("/run/webapp.sock")
            .with_group("www-data")
            .resolve()
            .unwrap();
        assert_eq!(
            ownership,
            Some(OwnershipSpec::new(GroupIdentifier::Name("www-data".to_string())))
        );

        let (_, ownership) = SocketConfig::unix("/run/webapp.sock")
            .with_group("33")
            .resolve()
            .unwrap();
        assert_eq!(ownership, Some(OwnershipSpec::new(GroupIdentifier::Id(33))));
    }

    #[test]
    fn group_without_path_is_ignored() {
        let (target, ownership) = SocketConfig::tcp(9000).with_group("root").resolve().unwrap();
        assert_eq!(target, BindTarget::TcpPort(9000));
        assert_eq!(ownership, None);
    }

    #[test]
    fn relative_path_is_rejected() {
        let err = SocketConfig::unix("webapp.sock").resolve().unwrap_err();
        assert!(matches!(err, Error::RelativeSocketPath(_)));
    }
}
