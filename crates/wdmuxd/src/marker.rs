//! The active marker: a directory whose presence tells external tooling
//! that the watchdog is being serviced on behalf of at least one client.
//!
//! Marker I/O is best effort. Failures are logged and the daemon keeps
//! running; the only consequence is a stale external signal.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// Filesystem-backed armed/disarmed flag.
#[derive(Debug, Clone)]
pub struct ActiveMarker {
    path: PathBuf,
}

impl ActiveMarker {
    /// Creates a marker handle; touches nothing on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the marker path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the marker directory exists (symlinks never count).
    pub fn is_present(&self) -> bool {
        fs::symlink_metadata(&self.path)
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    /// Makes sure the marker is present.
    ///
    /// Returns true if it had to be created.
    pub fn assert(&self) -> bool {
        if self.is_present() {
            return false;
        }

        if let Err(e) = self.clear_foreign_entry() {
            warn!(
                path = %self.path.display(),
                error = %e,
                "Could not clear the way for the active marker"
            );
            return false;
        }

        match fs::create_dir_all(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Active marker created");
                true
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not create the active marker"
                );
                false
            }
        }
    }

    /// Makes sure the marker is absent.
    ///
    /// Returns true if something had to be removed.
    pub fn retract(&self) -> bool {
        let meta = match fs::symlink_metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return false,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not examine the active marker"
                );
                return false;
            }
        };

        let result = if meta.is_dir() {
            fs::remove_dir(&self.path)
        } else {
            fs::remove_file(&self.path)
        };

        match result {
            Ok(()) => {
                info!(path = %self.path.display(), "Removed the active marker");
                true
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not remove the active marker"
                );
                false
            }
        }
    }

    /// Removes a file or symlink sitting where the marker directory belongs.
    fn clear_foreign_entry(&self) -> io::Result<()> {
        match fs::symlink_metadata(&self.path) {
            Ok(meta) if !meta.is_dir() => {
                debug!(
                    path = %self.path.display(),
                    "Removing a non-directory entry in place of the active marker"
                );
                fs::remove_file(&self.path)
            }
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_and_retract() {
        let temp = tempfile::tempdir().unwrap();
        let marker = ActiveMarker::new(temp.path().join("active"));

        assert!(!marker.is_present());
        assert!(marker.assert());
        assert!(marker.is_present());
        assert!(marker.path().is_dir());

        assert!(marker.retract());
        assert!(!marker.is_present());
        assert!(!marker.path().exists());
    }

    #[test]
    fn test_operations_are_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let marker = ActiveMarker::new(temp.path().join("active"));

        assert!(!marker.retract());
        assert!(marker.assert());
        assert!(!marker.assert());
        assert!(marker.is_present());
        assert!(marker.retract());
        assert!(!marker.retract());
    }

    #[test]
    fn test_assert_creates_missing_parents() {
        let temp = tempfile::tempdir().unwrap();
        let marker = ActiveMarker::new(temp.path().join("run/wdmux/active"));

        assert!(marker.assert());
        assert!(marker.path().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_is_replaced_not_followed() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("elsewhere");
        fs::create_dir(&target).unwrap();
        let path = temp.path().join("active");
        std::os::unix::fs::symlink(&target, &path).unwrap();

        let marker = ActiveMarker::new(&path);
        assert!(!marker.is_present());
        assert!(marker.assert());

        let meta = fs::symlink_metadata(&path).unwrap();
        assert!(meta.is_dir());
        assert!(!meta.file_type().is_symlink());
        assert!(target.is_dir());
    }

    #[test]
    fn test_retract_removes_stray_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("active");
        fs::write(&path, b"stale").unwrap();

        let marker = ActiveMarker::new(&path);
        assert!(marker.retract());
        assert!(!path.exists());
    }

    #[test]
    fn test_failure_is_not_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        // A regular file where a parent directory should be.
        let marker = ActiveMarker::new(blocker.join("active"));
        assert!(!marker.assert());
        assert!(!marker.is_present());
    }
}
