//! Scoped access to sandboxed filesystem locations.
//!
//! Hosts that gate directories behind persisted grants implement
//! [`ResourceAccess`]; everything that touches such a location wraps the work
//! in a [`ScopedAccess`] so the grant is released on every exit path.

use std::path::{Path, PathBuf};

pub trait ResourceAccess: Send + Sync {
    /// Try to open access to `path`. Returns `false` when the host refused.
    fn start_accessing(&self, path: &Path) -> bool;

    /// Release access previously granted by `start_accessing`.
    fn stop_accessing(&self, path: &Path);
}

/// Access model for hosts without a sandbox: every request is granted.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnrestrictedAccess;

impl ResourceAccess for UnrestrictedAccess {
    fn start_accessing(&self, _path: &Path) -> bool {
        true
    }

    fn stop_accessing(&self, _path: &Path) {}
}

/// Guard holding access to one path until dropped.
pub struct ScopedAccess<'a> {
    access: &'a dyn ResourceAccess,
    path: PathBuf,
    granted: bool,
}

impl<'a> ScopedAccess<'a> {
    pub fn acquire(access: &'a dyn ResourceAccess, path: &Path) -> Self {
        let granted = access.start_accessing(path);
        if !granted {
            log::debug!("Access not granted for {}", path.display());
        }
        Self {
            access,
            path: path.to_path_buf(),
            granted,
        }
    }

    pub fn is_granted(&self) -> bool {
        self.granted
    }
}

impl Drop for ScopedAccess<'_> {
    fn drop(&mut self) {
        if self.granted {
            self.access.stop_accessing(&self.path);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingAccess;
    use super::*;

    #[test]
    fn test_guard_releases_on_drop() {
        let access = RecordingAccess::default();
        {
            let guard = ScopedAccess::acquire(&access, Path::new("/photos"));
            assert!(guard.is_granted());
            assert_eq!(access.stopped.lock().unwrap().len(), 0);
        }
        assert_eq!(access.stopped.lock().unwrap().as_slice(), [PathBuf::from("/photos")]);
        assert!(access.is_balanced());
    }

    #[test]
    fn test_guard_releases_on_early_return() {
        fn touch(access: &dyn ResourceAccess) -> Result<(), ()> {
            let _guard = ScopedAccess::acquire(access, Path::new("/photos"));
            Err(())
        }

        let access = RecordingAccess::default();
        assert!(touch(&access).is_err());
        assert!(access.is_balanced());
    }

    #[test]
    fn test_denied_access_is_not_released() {
        let access = RecordingAccess::denying(Path::new("/private"));
        {
            let guard = ScopedAccess::acquire(&access, Path::new("/private"));
            assert!(!guard.is_granted());
        }
        assert!(access.stopped.lock().unwrap().is_empty());
    }
}
