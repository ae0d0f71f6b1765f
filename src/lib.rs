//! Finds visually similar images in a folder.
//!
//! A scan loads every supported image directly inside one directory, turns
//! each into a feature vector, and reports every pair whose cosine similarity
//! reaches the configured threshold. Scans run on a background worker; callers
//! only read published [`ScanState`] snapshots.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod services;

pub use crate::config::{ConfigError, HashAlgorithm, ScanConfig};
pub use crate::core::access::{ResourceAccess, ScopedAccess, UnrestrictedAccess};
pub use crate::core::catalog::CatalogLoader;
pub use crate::core::features::{
    ExtractionError, FeatureExtractor, FeatureVector, MemoizedExtractor, PerceptualHashExtractor,
};
pub use crate::core::record::{ImageId, ImageRecord};
pub use crate::core::similarity::{SimilarPair, SimilarityEngine};
pub use crate::error::ScanError;
pub use crate::services::aggregator::ScanState;
pub use crate::services::credentials::{
    AccessCredential, CredentialError, CredentialResolver, CredentialStore, FileCredentialStore,
    MemoryCredentialStore, PathCredentialResolver, SELECTED_FOLDER_KEY,
};
pub use crate::services::reveal::{reveal_image, FileRevealer, RevealError, SystemFileBrowser};
pub use crate::services::scanner::{ScanHandle, Scanner};
