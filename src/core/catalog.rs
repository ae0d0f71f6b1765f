use crate::config::ScanConfig;
use crate::core::access::{ResourceAccess, ScopedAccess};
use crate::core::record::ImageRecord;
use crate::core::thumbnail::{ThumbnailError, ThumbnailRenderer};
use crate::error::ScanError;
use image::{GenericImageView, ImageReader};
use std::collections::HashSet;
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "heic", "tiff", "gif", "bmp"];

#[derive(Debug, Error)]
enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Thumbnail error: {0}")]
    Thumbnail(#[from] ThumbnailError),
}

/// Load-phase progress, reported after every candidate file whether or not
/// it decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgress {
    pub processed: usize,
    pub total: usize,
}

impl LoadProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }
}

/// Reads one directory (no recursion) into catalog records.
#[derive(Debug, Clone)]
pub struct CatalogLoader {
    supported_formats: HashSet<String>,
    thumbnails: ThumbnailRenderer,
}

impl CatalogLoader {
    pub fn new(supported_formats: &[String], thumbnails: ThumbnailRenderer) -> Self {
        Self {
            supported_formats: supported_formats.iter().map(|ext| ext.to_lowercase()).collect(),
            thumbnails,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self, ThumbnailError> {
        Ok(Self::new(
            &config.supported_extensions,
            ThumbnailRenderer::new(config.thumbnail_size)?,
        ))
    }

    pub fn is_supported_format(&self, file_path: &Path) -> bool {
        file_path
            .extension()
            .map(|ext| self.supported_formats.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    }

    /// Candidate files directly inside `dir`, in file-name order.
    pub fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
        let metadata = fs::metadata(dir).map_err(|e| ScanError::directory_access(dir, e))?;
        if !metadata.is_dir() {
            return Err(ScanError::directory_access(dir, "not a directory"));
        }
        fs::read_dir(dir).map_err(|e| ScanError::directory_access(dir, e))?;

        let mut discovered_files = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                // The directory itself could not be listed
                Err(e) if e.depth() == 0 => return Err(ScanError::directory_access(dir, e)),
                Err(e) => {
                    log::debug!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };

            let path = entry.path();
            if path.is_file() && self.is_supported_format(path) {
                discovered_files.push(path.to_path_buf());
            }
        }

        Ok(discovered_files)
    }

    /// Build the catalog for `dir`.
    ///
    /// Files that fail to decode are skipped and only logged. Failing to list
    /// the directory aborts with `ScanError::DirectoryAccess`. Returning
    /// `Break` from `on_progress` aborts with `ScanError::Superseded`.
    pub fn load<F>(
        &self,
        dir: &Path,
        access: &dyn ResourceAccess,
        mut on_progress: F,
    ) -> Result<Vec<Arc<ImageRecord>>, ScanError>
    where
        F: FnMut(LoadProgress) -> ControlFlow<()>,
    {
        let _directory_access = ScopedAccess::acquire(access, dir);
        let files = self.discover(dir)?;
        let total = files.len();
        log::info!("Found {} candidate images in {}", total, dir.display());

        let mut catalog = Vec::with_capacity(total);
        for (index, path) in files.iter().enumerate() {
            match self.load_single_file(path, access) {
                Ok(record) => catalog.push(Arc::new(record)),
                Err(e) => log::debug!("Skipping {}: {}", path.display(), e),
            }

            let progress = LoadProgress {
                processed: index + 1,
                total,
            };
            if on_progress(progress).is_break() {
                return Err(ScanError::Superseded);
            }
        }

        log::info!("Loaded {} of {} images", catalog.len(), total);
        Ok(catalog)
    }

    fn load_single_file(
        &self,
        path: &Path,
        access: &dyn ResourceAccess,
    ) -> Result<ImageRecord, LoadError> {
        let _file_access = ScopedAccess::acquire(access, path);
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        let thumbnail = self.thumbnails.render(&img)?;
        Ok(ImageRecord::new(path, img.dimensions(), thumbnail))
    }
}

impl Default for CatalogLoader {
    fn default() -> Self {
        let formats: Vec<String> = SUPPORTED_EXTENSIONS.iter().map(|ext| ext.to_string()).collect();
        Self::new(&formats, ThumbnailRenderer::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::access::testing::RecordingAccess;
    use crate::core::access::UnrestrictedAccess;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn create_test_image(
        path: &Path,
        width: u32,
        height: u32,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x + y) % 256) as u8;
            Rgb([intensity, intensity, intensity])
        });

        img.save(path)?;
        Ok(())
    }

    fn load_all(
        loader: &CatalogLoader,
        dir: &Path,
    ) -> (Result<Vec<Arc<ImageRecord>>, ScanError>, Vec<LoadProgress>) {
        let mut seen = Vec::new();
        let result = loader.load(dir, &UnrestrictedAccess, |p| {
            seen.push(p);
            ControlFlow::Continue(())
        });
        (result, seen)
    }

    #[test]
    fn test_supported_format_detection() {
        let loader = CatalogLoader::default();

        assert!(loader.is_supported_format(Path::new("test.jpg")));
        assert!(loader.is_supported_format(Path::new("test.JPEG")));
        assert!(loader.is_supported_format(Path::new("test.png")));
        assert!(loader.is_supported_format(Path::new("test.HeIc")));
        assert!(loader.is_supported_format(Path::new("test.tiff")));
        assert!(!loader.is_supported_format(Path::new("test.tif")));
        assert!(!loader.is_supported_format(Path::new("test.webp")));
        assert!(!loader.is_supported_format(Path::new("test.txt")));
        assert!(!loader.is_supported_format(Path::new("test")));
    }

    #[test]
    fn test_file_type_filtering_and_order() {
        let temp_dir = TempDir::new().unwrap();
        create_test_image(&temp_dir.path().join("b.png"), 40, 30).unwrap();
        create_test_image(&temp_dir.path().join("a.jpg"), 30, 40).unwrap();
        create_test_image(&temp_dir.path().join("c.BMP"), 10, 10).unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"text content").unwrap();

        let (result, seen) = load_all(&CatalogLoader::default(), temp_dir.path());
        let catalog = result.unwrap();

        let names: Vec<String> = catalog.iter().map(|r| r.file_name()).collect();
        assert_eq!(names, ["a.jpg", "b.png", "c.BMP"]);
        assert_eq!(catalog[0].dimensions(), (30, 40));
        assert_eq!(catalog[0].thumbnail().dimensions(), (200, 200));
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_undecodable_files_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        create_test_image(&temp_dir.path().join("good.png"), 20, 20).unwrap();
        fs::write(temp_dir.path().join("broken.jpg"), b"definitely not a jpeg").unwrap();
        fs::write(temp_dir.path().join("photo.heic"), b"\0\0\0\x18ftypheic").unwrap();

        let (result, seen) = load_all(&CatalogLoader::default(), temp_dir.path());
        let catalog = result.unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].file_name(), "good.png");
        // Progress still counts every candidate
        assert_eq!(seen.last(), Some(&LoadProgress { processed: 3, total: 3 }));
    }

    #[test]
    fn test_does_not_recurse() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        create_test_image(&nested.join("deep.png"), 10, 10).unwrap();
        create_test_image(&temp_dir.path().join("top.png"), 10, 10).unwrap();

        let (result, _) = load_all(&CatalogLoader::default(), temp_dir.path());
        let names: Vec<String> = result.unwrap().iter().map(|r| r.file_name()).collect();
        assert_eq!(names, ["top.png"]);
    }

    #[test]
    fn test_progress_strictly_increases() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..5 {
            create_test_image(&temp_dir.path().join(format!("test_{i}.png")), 16, 16).unwrap();
        }

        let (_, seen) = load_all(&CatalogLoader::default(), temp_dir.path());
        let fractions: Vec<f64> = seen.iter().map(LoadProgress::fraction).collect();
        assert_eq!(fractions.len(), 5);
        assert!(fractions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(fractions.last(), Some(&1.0));
    }

    #[test]
    fn test_scan_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let (result, seen) = load_all(&CatalogLoader::default(), temp_dir.path());
        assert!(result.unwrap().is_empty());
        assert!(seen.is_empty());
    }

    #[test]
    fn test_missing_directory_is_access_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let (result, _) = load_all(&CatalogLoader::default(), &missing);
        assert!(matches!(result, Err(ScanError::DirectoryAccess { path, .. }) if path == missing));

        let file = temp_dir.path().join("file.png");
        create_test_image(&file, 4, 4).unwrap();
        let (result, _) = load_all(&CatalogLoader::default(), &file);
        assert!(matches!(result, Err(ScanError::DirectoryAccess { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_access_error() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let locked = temp_dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        create_test_image(&locked.join("inside.png"), 4, 4).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can read the directory anyway
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let (result, _) = load_all(&CatalogLoader::default(), &locked);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(matches!(result, Err(ScanError::DirectoryAccess { .. })));
    }

    #[test]
    fn test_access_is_released_for_every_file() {
        let temp_dir = TempDir::new().unwrap();
        create_test_image(&temp_dir.path().join("a.png"), 8, 8).unwrap();
        fs::write(temp_dir.path().join("b.png"), b"garbage").unwrap();

        let access = RecordingAccess::default();
        let catalog = CatalogLoader::default()
            .load(temp_dir.path(), &access, |_| ControlFlow::Continue(()))
            .unwrap();

        assert_eq!(catalog.len(), 1);
        // Directory plus two files
        assert_eq!(access.started.lock().unwrap().len(), 3);
        assert!(access.is_balanced());
    }

    #[test]
    fn test_break_stops_loading() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..3 {
            create_test_image(&temp_dir.path().join(format!("{i}.png")), 8, 8).unwrap();
        }

        let access = RecordingAccess::default();
        let result =
            CatalogLoader::default().load(temp_dir.path(), &access, |_| ControlFlow::Break(()));
        assert_eq!(result.unwrap_err(), ScanError::Superseded);
        assert!(access.is_balanced());
    }
}
