/// Hidden-service identity directory
///
/// Tor keeps the service key and the derived `hostname` file here. As long as
/// the key survives, the onion address is stable across restarts.

use darkmsg_common::config::tor::HOSTNAME_FILE;
use darkmsg_common::{DarkMsgError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenServiceDir {
    path: PathBuf,
}

impl HiddenServiceDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hostname_path(&self) -> PathBuf {
        self.path.join(HOSTNAME_FILE)
    }

    /// Create the directory. Tor refuses service directories that other
    /// users can read, so it is restricted to the owner on Unix.
    pub async fn ensure(&self) -> Result<bool> {
        let created = !self.path.is_dir();
        tokio::fs::create_dir_all(&self.path).await.map_err(|e| {
            DarkMsgError::hidden_service(format!(
                "failed to create {}: {}",
                self.path.display(),
                e
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o700))
                .await
                .map_err(|e| {
                    DarkMsgError::hidden_service(format!(
                        "failed to set permissions on {}: {}",
                        self.path.display(),
                        e
                    ))
                })?;
        }

        Ok(created)
    }

    /// The trimmed contents of `hostname`, or `None` while Tor has not
    /// generated it yet
    pub async fn read_hostname(&self) -> Result<Option<String>> {
        let path = self.hostname_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let hostname = contents.trim();
                Ok((!hostname.is_empty()).then(|| hostname.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DarkMsgError::hidden_service(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_hostname_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let hs = HiddenServiceDir::new(dir.path().join("hidden_service"));
        assert!(hs.ensure().await.unwrap());
        assert_eq!(hs.read_hostname().await.unwrap(), None);
        assert!(!hs.ensure().await.unwrap());
    }

    #[tokio::test]
    async fn test_hostname_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let hs = HiddenServiceDir::new(dir.path());
        std::fs::write(hs.hostname_path(), "abcdefghijklmnop.onion\n").unwrap();
        assert_eq!(
            hs.read_hostname().await.unwrap().as_deref(),
            Some("abcdefghijklmnop.onion")
        );

        std::fs::write(hs.hostname_path(), "  \n").unwrap();
        assert_eq!(hs.read_hostname().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let hs = HiddenServiceDir::new(dir.path().join("hs"));
        hs.ensure().await.unwrap();
        let mode = std::fs::metadata(hs.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
