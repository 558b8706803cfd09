//! Backend port lookup.
//!
//! The process that deploys an application writes the port its backend
//! listens on to `port-{app}_{service}_{version}.txt`. The file is read on
//! every lookup because a redeploy may move the backend at any time.

use crate::error::ResolutionError;
use std::path::PathBuf;
use tracing::debug;

pub const DEFAULT_PORT_DIR: &str = "/etc/appscale";
pub const DEFAULT_SERVICE: &str = "default";
pub const DEFAULT_VERSION: &str = "default";
pub const VERSION_PATH_SEPARATOR: &str = "_";

/// `{app}_{service}_{version}` for the default service and version.
pub fn version_key(application_id: &str) -> String {
    [application_id, DEFAULT_SERVICE, DEFAULT_VERSION].join(VERSION_PATH_SEPARATOR)
}

#[derive(Debug, Clone)]
pub struct PortResolver {
    dir: PathBuf,
}

impl Default for PortResolver {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_DIR)
    }
}

impl PortResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn port_file(&self, application_id: &str) -> PathBuf {
        self.dir.join(format!("port-{}.txt", version_key(application_id)))
    }

    /// Read the current backend port for `application_id`.
    pub async fn resolve(&self, application_id: &str) -> Result<u16, ResolutionError> {
        let path = self.port_file(application_id);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ResolutionError::Unreadable {
                path: path.clone(),
                source,
            })?;

        let port = match contents.trim().parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => return Err(ResolutionError::Invalid { path, contents }),
        };
        debug!(application_id, port, path = %path.display(), "Resolved backend port");
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_port(dir: &Path, app: &str, contents: &str) {
        std::fs::write(dir.join(format!("port-{}_default_default.txt", app)), contents)
            .expect("write port file");
    }

    #[test]
    fn test_version_key() {
        assert_eq!(version_key("guestbook"), "guestbook_default_default");
    }

    #[test]
    fn test_port_file_path() {
        let resolver = PortResolver::default();
        assert_eq!(
            resolver.port_file("guestbook"),
            PathBuf::from("/etc/appscale/port-guestbook_default_default.txt")
        );
    }

    #[tokio::test]
    async fn test_resolve_trims_whitespace() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_port(dir.path(), "guestbook", "  8080\n");
        let resolver = PortResolver::new(dir.path());
        assert_eq!(resolver.resolve("guestbook").await.unwrap(), 8080);
    }

    #[tokio::test]
    async fn test_resolve_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = PortResolver::new(dir.path());
        let err = resolver.resolve("guestbook").await.unwrap_err();
        assert!(matches!(err, ResolutionError::Unreadable { .. }));
        assert!(err.to_string().contains("port-guestbook_default_default.txt"));
    }

    #[tokio::test]
    async fn test_resolve_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = PortResolver::new(dir.path());

        for contents in ["", "http", "80a", "-1", "70000", "0", "80 81"] {
            write_port(dir.path(), "guestbook", contents);
            let err = resolver.resolve("guestbook").await.unwrap_err();
            assert!(
                matches!(err, ResolutionError::Invalid { .. }),
                "expected Invalid for {:?}, got {:?}",
                contents,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_resolve_is_stable_and_never_cached() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_port(dir.path(), "guestbook", "8080");
        let resolver = PortResolver::new(dir.path());

        for _ in 0..3 {
            assert_eq!(resolver.resolve("guestbook").await.unwrap(), 8080);
        }

        // Redeploy moved the backend: the very next lookup must see it.
        write_port(dir.path(), "guestbook", "8081\n");
        assert_eq!(resolver.resolve("guestbook").await.unwrap(), 8081);
    }

    #[tokio::test]
    async fn test_resolve_is_per_application() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_port(dir.path(), "one", "9001");
        write_port(dir.path(), "two", "9002");
        let resolver = PortResolver::new(dir.path());
        assert_eq!(resolver.resolve("one").await.unwrap(), 9001);
        assert_eq!(resolver.resolve("two").await.unwrap(), 9002);
    }
}
