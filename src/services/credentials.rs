use crate::config::APP_DIR_NAME;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Key the selected scan folder's credential is stored under.
pub const SELECTED_FOLDER_KEY: &str = "selected-folder";

const CREDENTIALS_FILE_NAME: &str = "credentials.json";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to read credential store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write credential store {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Credential store {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid credential: {reason}")]
    Invalid { reason: String },

    #[error("No user config directory on this system")]
    NoConfigDir,
}

impl CredentialError {
    fn invalid(reason: impl ToString) -> Self {
        CredentialError::Invalid {
            reason: reason.to_string(),
        }
    }
}

/// Opaque directory-access credential. Only a `CredentialResolver`
/// interprets the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessCredential(Vec<u8>);

impl AccessCredential {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Persists credentials by key.
pub trait CredentialStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<AccessCredential>, CredentialError>;
    fn save(&self, key: &str, credential: &AccessCredential) -> Result<(), CredentialError>;
}

/// Credentials kept as a JSON map in a single file.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store under the user config directory.
    pub fn default_location() -> Result<Self, CredentialError> {
        let dir = dirs::config_dir().ok_or(CredentialError::NoConfigDir)?;
        Ok(Self::new(dir.join(APP_DIR_NAME).join(CREDENTIALS_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, AccessCredential>, CredentialError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(source) => {
                return Err(CredentialError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_slice(&raw).map_err(|source| {
            log::warn!("Credential store {} is unreadable", self.path.display());
            CredentialError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })
    }

    fn write_all(
        &self,
        entries: &HashMap<String, AccessCredential>,
    ) -> Result<(), CredentialError> {
        let write_error = |source| CredentialError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let json = serde_json::to_vec_pretty(entries).map_err(|source| CredentialError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, json).map_err(write_error)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, key: &str) -> Result<Option<AccessCredential>, CredentialError> {
        Ok(self.read_all()?.remove(key))
    }

    fn save(&self, key: &str, credential: &AccessCredential) -> Result<(), CredentialError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), credential.clone());
        self.write_all(&entries)
    }
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, AccessCredential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, key: &str) -> Result<Option<AccessCredential>, CredentialError> {
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, credential: &AccessCredential) -> Result<(), CredentialError> {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(key.to_string(), credential.clone());
        Ok(())
    }
}

/// A credential turned back into the directory it grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub directory: PathBuf,
    /// The directory no longer exists where the credential says it is.
    pub is_stale: bool,
}

pub trait CredentialResolver: Send + Sync {
    fn issue(&self, directory: &Path) -> Result<AccessCredential, CredentialError>;
    fn resolve(&self, credential: &AccessCredential) -> Result<ResolvedCredential, CredentialError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PathBlob {
    path: PathBuf,
    digest: String,
}

fn path_digest(path: &Path) -> String {
    blake3::hash(path.to_string_lossy().as_bytes()).to_hex().to_string()
}

/// Credentials that carry the canonical directory path plus a blake3 digest
/// of it, for hosts without platform bookmarks.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathCredentialResolver;

impl CredentialResolver for PathCredentialResolver {
    fn issue(&self, directory: &Path) -> Result<AccessCredential, CredentialError> {
        let path = fs::canonicalize(directory)
            .map_err(|e| CredentialError::invalid(format!("{}: {}", directory.display(), e)))?;
        if !path.is_dir() {
            return Err(CredentialError::invalid(format!("{} is not a directory", path.display())));
        }

        let blob = PathBlob {
            digest: path_digest(&path),
            path,
        };
        let bytes = serde_json::to_vec(&blob).map_err(CredentialError::invalid)?;
        Ok(AccessCredential::from_bytes(bytes))
    }

    fn resolve(
        &self,
        credential: &AccessCredential,
    ) -> Result<ResolvedCredential, CredentialError> {
        let blob: PathBlob =
            serde_json::from_slice(credential.as_bytes()).map_err(CredentialError::invalid)?;
        if blob.digest != path_digest(&blob.path) {
            return Err(CredentialError::invalid("digest mismatch"));
        }

        let is_stale = !blob.path.is_dir();
        Ok(ResolvedCredential {
            directory: blob.path,
            is_stale,
        })
    }
}

/// Issue a credential for `directory` and persist it as the selected folder.
pub fn remember_selected_folder(
    store: &dyn CredentialStore,
    resolver: &dyn CredentialResolver,
    directory: &Path,
) -> Result<AccessCredential, CredentialError> {
    let credential = resolver.issue(directory)?;
    store.save(SELECTED_FOLDER_KEY, &credential)?;
    log::info!("Stored access credential for {}", directory.display());
    Ok(credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.load(SELECTED_FOLDER_KEY).unwrap(), None);

        let credential = AccessCredential::from_bytes(vec![1, 2, 3]);
        store.save(SELECTED_FOLDER_KEY, &credential).unwrap();
        assert_eq!(store.load(SELECTED_FOLDER_KEY).unwrap(), Some(credential));
        assert_eq!(store.load("other").unwrap(), None);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("credentials.json");

        let first = AccessCredential::from_bytes(b"first".to_vec());
        let second = AccessCredential::from_bytes(b"second".to_vec());
        let store = FileCredentialStore::new(&path);
        assert_eq!(store.load(SELECTED_FOLDER_KEY).unwrap(), None);
        store.save(SELECTED_FOLDER_KEY, &first).unwrap();
        store.save("backup", &second).unwrap();

        let reopened = FileCredentialStore::new(&path);
        assert_eq!(reopened.load(SELECTED_FOLDER_KEY).unwrap(), Some(first));
        assert_eq!(reopened.load("backup").unwrap(), Some(second));
    }

    #[test]
    fn test_file_store_reports_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.json");
        fs::write(&path, "not json").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(matches!(store.load(SELECTED_FOLDER_KEY), Err(CredentialError::Corrupt { .. })));
    }

    #[test]
    fn test_path_resolver_issue_and_resolve() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = PathCredentialResolver;

        let credential = resolver.issue(temp_dir.path()).unwrap();
        let resolved = resolver.resolve(&credential).unwrap();
        assert_eq!(resolved.directory, fs::canonicalize(temp_dir.path()).unwrap());
        assert!(!resolved.is_stale);
    }

    #[test]
    fn test_path_resolver_reports_stale_directory() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("photos");
        fs::create_dir(&folder).unwrap();

        let credential = PathCredentialResolver.issue(&folder).unwrap();
        fs::remove_dir(&folder).unwrap();

        let resolved = PathCredentialResolver.resolve(&credential).unwrap();
        assert!(resolved.is_stale);
    }

    #[test]
    fn test_path_resolver_rejects_bad_credentials() {
        let resolver = PathCredentialResolver;
        let garbage = AccessCredential::from_bytes(b"\x00garbage".to_vec());
        assert!(matches!(resolver.resolve(&garbage), Err(CredentialError::Invalid { .. })));

        let tampered = serde_json::to_vec(&PathBlob {
            path: PathBuf::from("/somewhere/else"),
            digest: path_digest(Path::new("/original")),
        })
        .unwrap();
        let tampered = AccessCredential::from_bytes(tampered);
        assert!(matches!(resolver.resolve(&tampered), Err(CredentialError::Invalid { .. })));

        let temp_dir = TempDir::new().unwrap();
        assert!(resolver.issue(&temp_dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_remember_selected_folder() {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryCredentialStore::new();

        let credential =
            remember_selected_folder(&store, &PathCredentialResolver, temp_dir.path()).unwrap();
        assert_eq!(store.load(SELECTED_FOLDER_KEY).unwrap(), Some(credential));
    }
}
