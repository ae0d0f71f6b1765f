use chrono::{DateTime, Local};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const UNKNOWN: &str = "unknown";

/// Identity of one catalog entry. Two records of the same file loaded by two
/// scans get different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(Uuid);

impl ImageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "img_{}", self.0.simple())
    }
}

/// A decoded image in the catalog.
///
/// Only the thumbnail is kept in memory; the full decode is dropped once the
/// thumbnail has been rendered. File size and creation time are read from the
/// filesystem on every call and come back `None` when that fails.
#[derive(Clone, Serialize)]
pub struct ImageRecord {
    id: ImageId,
    source_path: PathBuf,
    dimensions: (u32, u32),
    #[serde(skip)]
    thumbnail: RgbaImage,
}

impl ImageRecord {
    pub fn new(
        source_path: impl Into<PathBuf>,
        dimensions: (u32, u32),
        thumbnail: RgbaImage,
    ) -> Self {
        Self {
            id: ImageId::new(),
            source_path: source_path.into(),
            dimensions,
            thumbnail,
        }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn thumbnail(&self) -> &RgbaImage {
        &self.thumbnail
    }

    /// Pixel dimensions of the original image, captured at decode time.
    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.to_string_lossy().into_owned())
    }

    pub fn file_size(&self) -> Option<u64> {
        fs::metadata(&self.source_path).ok().map(|m| m.len())
    }

    pub fn creation_time(&self) -> Option<DateTime<Local>> {
        let metadata = fs::metadata(&self.source_path).ok()?;
        let created = metadata.created().or_else(|_| metadata.modified()).ok()?;
        Some(DateTime::<Local>::from(created))
    }

    pub fn describe_dimensions(&self) -> String {
        let (width, height) = self.dimensions;
        format!("width: {width}, height: {height}")
    }

    pub fn describe_file_size(&self) -> String {
        self.file_size()
            .map(format_file_size)
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    pub fn describe_creation_time(&self) -> String {
        self.creation_time()
            .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }
}

impl PartialEq for ImageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ImageRecord {}

impl Hash for ImageRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ImageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRecord")
            .field("id", &self.id)
            .field("source_path", &self.source_path)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

/// Human readable byte count, decimal units like a file browser shows them.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    if bytes < 1000 {
        return format!("{bytes} bytes");
    }
    let mut value = bytes as f64 / 1000.0;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
