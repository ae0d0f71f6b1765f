use crate::core::access::{ResourceAccess, ScopedAccess};
use crate::core::record::ImageRecord;
use crate::services::credentials::{CredentialResolver, CredentialStore, SELECTED_FOLDER_KEY};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RevealError {
    #[error("No folder access has been granted")]
    NoCredential,

    #[error("Stored folder access could not be resolved: {reason}")]
    CredentialUnresolved { reason: String },

    #[error("Access to {path} was denied")]
    AccessDenied { path: PathBuf },

    #[error("File not found: {path}")]
    FileMissing { path: PathBuf },

    #[error("Could not reveal {path}: {reason}")]
    ActionFailed { path: PathBuf, reason: String },
}

/// Shows a file to the user in the platform file browser.
pub trait FileRevealer: Send + Sync {
    fn reveal(&self, path: &Path) -> Result<(), String>;
}

/// Finder on macOS, Explorer on Windows, the default folder handler
/// elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFileBrowser;

impl FileRevealer for SystemFileBrowser {
    #[cfg(target_os = "windows")]
    fn reveal(&self, path: &Path) -> Result<(), String> {
        use std::os::windows::process::CommandExt;

        // Explorer parses its own command line, so the quoted path must reach
        // it unescaped. Its exit code is 1 even after a successful select.
        std::process::Command::new("explorer.exe")
            .raw_arg(explorer_select_arg(path))
            .spawn()
            .map(|_| ())
            .map_err(|err| format!("Explorer could not be started: {err}"))
    }

    #[cfg(target_os = "macos")]
    fn reveal(&self, path: &Path) -> Result<(), String> {
        let status = std::process::Command::new("open")
            .arg("-R")
            .arg(path)
            .status()
            .map_err(|err| format!("Finder could not be started: {err}"))?;
        if !status.success() {
            return Err(format!("Finder returned {status} for {}", path.display()));
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    fn reveal(&self, path: &Path) -> Result<(), String> {
        let folder = path
            .parent()
            .ok_or_else(|| format!("{} has no containing folder", path.display()))?;
        open::that(folder).map_err(|err| format!("Opening {} failed: {err}", folder.display()))
    }
}

/// Explorer's `/select,"<path>"` switch, exactly as it must appear on the
/// command line.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn explorer_select_arg(path: &Path) -> String {
    format!("/select,\"{}\"", path.display())
}

/// Reveal `record` in the file browser under the stored folder credential.
///
/// Nothing is deleted and no scan state is touched. Every failure maps to one
/// `RevealError` and happens before the revealer runs, except `ActionFailed`.
pub fn reveal_image(
    record: &ImageRecord,
    store: &dyn CredentialStore,
    resolver: &dyn CredentialResolver,
    access: &dyn ResourceAccess,
    revealer: &dyn FileRevealer,
) -> Result<(), RevealError> {
    reveal_path(record.source_path(), store, resolver, access, revealer)
}

pub fn reveal_path(
    path: &Path,
    store: &dyn CredentialStore,
    resolver: &dyn CredentialResolver,
    access: &dyn ResourceAccess,
    revealer: &dyn FileRevealer,
) -> Result<(), RevealError> {
    let credential = store
        .load(SELECTED_FOLDER_KEY)
        .map_err(|e| RevealError::CredentialUnresolved {
            reason: e.to_string(),
        })?
        .ok_or(RevealError::NoCredential)?;

    let resolved = resolver
        .resolve(&credential)
        .map_err(|e| RevealError::CredentialUnresolved {
            reason: e.to_string(),
        })?;
    if resolved.is_stale {
        return Err(RevealError::CredentialUnresolved {
            reason: format!("{} no longer exists", resolved.directory.display()),
        });
    }

    let scope = ScopedAccess::acquire(access, &resolved.directory);
    if !scope.is_granted() {
        return Err(RevealError::AccessDenied {
            path: resolved.directory,
        });
    }

    if !path.exists() {
        return Err(RevealError::FileMissing {
            path: path.to_path_buf(),
        });
    }

    revealer.reveal(path).map_err(|reason| {
        log::warn!("Reveal failed for {}: {}", path.display(), reason);
        RevealError::ActionFailed {
            path: path.to_path_buf(),
            reason,
        }
    })?;
    log::info!("Revealed {}", path.display());
    Ok(())
}
