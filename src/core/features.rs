use crate::config::HashAlgorithm;
use crate::core::record::{ImageId, ImageRecord};
use crate::error::ScanError;
use image::DynamicImage;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use rayon::prelude::*;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("Feature extraction unavailable: {reason}")]
    Unavailable { reason: String },
}

impl ExtractionError {
    pub fn unavailable(reason: impl ToString) -> Self {
        ExtractionError::Unavailable {
            reason: reason.to_string(),
        }
    }
}

/// Fixed-length numeric summary of an image's visual content.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Vectors of the images whose extraction succeeded, keyed by record id.
pub type FeatureMap = HashMap<ImageId, FeatureVector>;

/// Turns a decoded catalog image into a feature vector.
///
/// Implementations must be deterministic within a process and must report
/// failure through `ExtractionError` instead of panicking. Plain closures
/// work too, which is how hosts plug in their own embedding models.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, image: &ImageRecord) -> Result<FeatureVector, ExtractionError>;
}

impl<F> FeatureExtractor for F
where
    F: Fn(&ImageRecord) -> Result<FeatureVector, ExtractionError> + Send + Sync,
{
    fn extract(&self, image: &ImageRecord) -> Result<FeatureVector, ExtractionError> {
        self(image)
    }
}

/// Default extractor: a perceptual hash of the thumbnail, one `+1.0`/`-1.0`
/// component per hash bit. The cosine of two such vectors is
/// `1 - 2 * hamming / bits`.
pub struct PerceptualHashExtractor {
    hasher: Hasher,
}

impl PerceptualHashExtractor {
    pub fn new(algorithm: HashAlgorithm, hash_size: u32) -> Self {
        let hasher = HasherConfig::new()
            .hash_size(hash_size, hash_size)
            .hash_alg(hash_alg(algorithm))
            .to_hasher();
        Self { hasher }
    }
}

impl FeatureExtractor for PerceptualHashExtractor {
    fn extract(&self, image: &ImageRecord) -> Result<FeatureVector, ExtractionError> {
        let thumbnail = image.thumbnail();
        if thumbnail.width() == 0 || thumbnail.height() == 0 {
            return Err(ExtractionError::unavailable("thumbnail has no pixels"));
        }

        let hash = self
            .hasher
            .hash_image(&DynamicImage::ImageRgba8(thumbnail.clone()));
        let values = hash
            .as_bytes()
            .iter()
            .flat_map(|byte| (0..8).map(move |bit| if (byte >> bit) & 1 == 1 { 1.0 } else { -1.0 }))
            .collect::<Vec<f32>>();

        if values.is_empty() {
            return Err(ExtractionError::unavailable("hasher produced an empty hash"));
        }
        Ok(FeatureVector(values))
    }
}

fn hash_alg(algorithm: HashAlgorithm) -> HashAlg {
    match algorithm {
        HashAlgorithm::Mean => HashAlg::Mean,
        HashAlgorithm::Gradient => HashAlg::Gradient,
        HashAlgorithm::DoubleGradient => HashAlg::DoubleGradient,
        HashAlgorithm::Blockhash => HashAlg::Blockhash,
    }
}

/// Per-scan memo in front of an extractor: each image id reaches the wrapped
/// extractor at most once, failures included. Create a fresh one per scan.
pub struct MemoizedExtractor {
    inner: Arc<dyn FeatureExtractor>,
    cache: Mutex<HashMap<ImageId, Option<FeatureVector>>>,
}

impl MemoizedExtractor {
    pub fn new(inner: Arc<dyn FeatureExtractor>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, image: &ImageRecord) -> Option<FeatureVector> {
        if let Some(cached) = self.lock_cache().get(&image.id()) {
            return cached.clone();
        }

        let result = match self.inner.extract(image) {
            Ok(vector) => Some(vector),
            Err(e) => {
                log::debug!("Skipping {} from comparison: {}", image.source_path().display(), e);
                None
            }
        };

        self.lock_cache()
            .entry(image.id())
            .or_insert(result)
            .clone()
    }

    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<ImageId, Option<FeatureVector>>> {
        // A panic inside an extractor must not poison the memo for the rest of the scan.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Extract vectors for the whole catalog in parallel. Images whose extraction
/// fails are absent from the returned map.
///
/// `keep_going` runs before each image. Once it returns `Break`, no further
/// image reaches the extractor and the call fails with
/// `ScanError::Superseded`.
pub fn extract_features<F>(
    catalog: &[Arc<ImageRecord>],
    extractor: &MemoizedExtractor,
    keep_going: F,
) -> Result<FeatureMap, ScanError>
where
    F: Fn() -> ControlFlow<()> + Sync,
{
    let vectors: Option<Vec<(ImageId, Option<FeatureVector>)>> = catalog
        .par_iter()
        .map(|record| {
            keep_going()
                .is_continue()
                .then(|| (record.id(), extractor.get(record)))
        })
        .collect();
    let vectors = vectors.ok_or(ScanError::Superseded)?;

    let map: FeatureMap = vectors
        .into_iter()
        .filter_map(|(id, vector)| vector.map(|v| (id, v)))
        .collect();

    log::info!(
        "Extracted features for {} of {} images",
        map.len(),
        catalog.len()
    );
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::similarity::cosine_similarity;
    use crate::core::thumbnail::ThumbnailRenderer;
    use image::{ImageBuffer, Rgb, RgbaImage};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn virtual_catalog(names: &[&str]) -> Vec<Arc<ImageRecord>> {
        names
            .iter()
            .map(|name| {
                let path = format!("/virtual/{name}");
                Arc::new(ImageRecord::new(path, (1, 1), RgbaImage::new(1, 1)))
            })
            .collect()
    }

    fn record_from(img: DynamicImage) -> ImageRecord {
        let dims = (img.width(), img.height());
        let thumb = ThumbnailRenderer::default().render(&img).unwrap();
        ImageRecord::new("/virtual/image.png", dims, thumb)
    }

    fn gradient(width: u32, height: u32, invert: bool) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, _| {
            let v = (x * 255 / width.max(1)) as u8;
            let v = if invert { 255 - v } else { v };
            Rgb([v, v, v])
        }))
    }

    #[test]
    fn test_perceptual_extractor_is_deterministic() {
        let extractor = PerceptualHashExtractor::new(HashAlgorithm::Mean, 16);
        let record = record_from(gradient(300, 200, false));

        let first = extractor.extract(&record).unwrap();
        let second = extractor.extract(&record).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 256);
        assert!(first.as_slice().iter().all(|v| *v == 1.0 || *v == -1.0));
    }

    #[test]
    fn test_perceptual_extractor_separates_content() {
        let extractor = PerceptualHashExtractor::new(HashAlgorithm::Gradient, 8);
        let a = extractor.extract(&record_from(gradient(300, 200, false))).unwrap();
        let resized = extractor.extract(&record_from(gradient(600, 400, false))).unwrap();
        let inverted = extractor.extract(&record_from(gradient(300, 200, true))).unwrap();

        assert!(cosine_similarity(a.as_slice(), resized.as_slice()) > 0.9);
        assert!(cosine_similarity(a.as_slice(), inverted.as_slice()) < 0.5);
    }

    #[test]
    fn test_empty_thumbnail_is_unavailable() {
        let extractor = PerceptualHashExtractor::new(HashAlgorithm::Mean, 8);
        let record = ImageRecord::new("/virtual/empty.png", (0, 0), RgbaImage::new(0, 0));
        assert!(matches!(
            extractor.extract(&record),
            Err(ExtractionError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_memo_calls_extractor_once_per_image() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let extractor: Arc<dyn FeatureExtractor> = Arc::new(
            move |_: &ImageRecord| -> Result<FeatureVector, ExtractionError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(FeatureVector::new(vec![1.0, 0.0]))
            },
        );
        let memo = MemoizedExtractor::new(extractor);
        let record = ImageRecord::new("/virtual/a.png", (1, 1), RgbaImage::new(1, 1));

        assert!(memo.get(&record).is_some());
        assert!(memo.get(&record).is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(memo.cached_len(), 1);
    }

    #[test]
    fn test_failures_are_memoized_and_excluded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let extractor: Arc<dyn FeatureExtractor> = Arc::new(
            move |record: &ImageRecord| -> Result<FeatureVector, ExtractionError> {
                counter.fetch_add(1, Ordering::SeqCst);
                if record.file_name() == "c.png" {
                    Err(ExtractionError::unavailable("engine error"))
                } else {
                    Ok(FeatureVector::new(vec![1.0, 0.0]))
                }
            },
        );
        let memo = MemoizedExtractor::new(extractor);
        let catalog = virtual_catalog(&["a.png", "b.png", "c.png"]);

        let map = extract_features(&catalog, &memo, || ControlFlow::Continue(())).unwrap();
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key(&catalog[2].id()));

        assert!(memo.get(&catalog[2]).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_extraction_stops_once_superseded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let (counter, stop) = (calls.clone(), stopped.clone());
        // The first extraction supersedes the scan
        let extractor: Arc<dyn FeatureExtractor> = Arc::new(
            move |_: &ImageRecord| -> Result<FeatureVector, ExtractionError> {
                counter.fetch_add(1, Ordering::SeqCst);
                stop.store(true, Ordering::SeqCst);
                Ok(FeatureVector::new(vec![1.0]))
            },
        );
        let memo = MemoizedExtractor::new(extractor);
        let names: Vec<String> = (0..32).map(|i| format!("{i}.png")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let catalog = virtual_catalog(&names);

        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let result = pool.install(|| {
            extract_features(&catalog, &memo, || {
                if stopped.load(Ordering::SeqCst) {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
        });

        assert_eq!(result.unwrap_err(), ScanError::Superseded);
        // At most one in-flight image per worker thread
        assert!(calls.load(Ordering::SeqCst) <= 2);
    }
}
