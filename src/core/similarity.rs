// Pairwise near-duplicate detection.
//
// Every unordered pair of images that has a feature vector is compared once
// (i < j in catalog order) with cosine similarity. Quadratic in the number of
// images, exact, no index structures.

use crate::core::features::FeatureMap;
use crate::core::record::ImageRecord;
use crate::error::ScanError;
use serde::Serialize;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_THRESHOLD: f64 = 0.85;

/// Cosine similarity of two vectors, clamped to `[0, 1]`.
///
/// A zero-norm vector or a length mismatch yields 0. Negative cosines are
/// reported as 0: anything pointing away counts as "not similar".
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        log::debug!("Vector length mismatch ({} vs {})", a.len(), b.len());
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    clamp_similarity(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Force a raw cosine value into `[0, 1]`; NaN maps to 0.
pub fn clamp_similarity(raw: f64) -> f64 {
    if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) }
}

/// Number of unordered pairs among `n` images.
pub fn candidate_pair_count(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PairId(Uuid);

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pair_{}", self.0.simple())
    }
}

/// Two images whose similarity reached the threshold. `image_a` always comes
/// before `image_b` in catalog order.
#[derive(Debug, Clone)]
pub struct SimilarPair {
    id: PairId,
    image_a: Arc<ImageRecord>,
    image_b: Arc<ImageRecord>,
    similarity: f64,
}

impl SimilarPair {
    fn new(image_a: Arc<ImageRecord>, image_b: Arc<ImageRecord>, similarity: f64) -> Self {
        Self {
            id: PairId(Uuid::new_v4()),
            image_a,
            image_b,
            similarity,
        }
    }

    pub fn id(&self) -> PairId {
        self.id
    }

    pub fn image_a(&self) -> &Arc<ImageRecord> {
        &self.image_a
    }

    pub fn image_b(&self) -> &Arc<ImageRecord> {
        &self.image_b
    }

    pub fn similarity(&self) -> f64 {
        self.similarity
    }

    /// Similarity as a percentage with one decimal, e.g. `97.3%`.
    pub fn percentage(&self) -> String {
        format!("{:.1}%", self.similarity * 100.0)
    }

    pub fn contains(&self, image: &ImageRecord) -> bool {
        self.image_a.id() == image.id() || self.image_b.id() == image.id()
    }
}

impl PartialEq for SimilarPair {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for SimilarPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <-> {} ({})",
            self.image_a.file_name(),
            self.image_b.file_name(),
            self.percentage()
        )
    }
}

/// Progress of the comparison pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareProgress {
    pub done: usize,
    pub total: usize,
}

impl CompareProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.done as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    threshold: f64,
}

impl SimilarityEngine {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Inclusive threshold check.
    pub fn passes(&self, similarity: f64) -> bool {
        similarity >= self.threshold
    }

    /// Compare every unordered pair of images that have a vector and return
    /// the pairs at or above the threshold, most similar first.
    ///
    /// Equal similarities keep discovery order. `on_progress` runs after
    /// every comparison; returning `Break` abandons the pass with
    /// `ScanError::Superseded`.
    pub fn find_similar_pairs<F>(
        &self,
        catalog: &[Arc<ImageRecord>],
        vectors: &FeatureMap,
        mut on_progress: F,
    ) -> Result<Vec<SimilarPair>, ScanError>
    where
        F: FnMut(CompareProgress) -> ControlFlow<()>,
    {
        let comparable: Vec<(&Arc<ImageRecord>, &[f32])> = catalog
            .iter()
            .filter_map(|record| vectors.get(&record.id()).map(|v| (record, v.as_slice())))
            .collect();

        let total = candidate_pair_count(comparable.len());
        let mut done = 0;
        let mut pairs = Vec::new();

        for (i, (record_a, vector_a)) in comparable.iter().enumerate() {
            for (record_b, vector_b) in &comparable[i + 1..] {
                let similarity = cosine_similarity(vector_a, vector_b);
                if self.passes(similarity) {
                    pairs.push(SimilarPair::new(
                        Arc::clone(record_a),
                        Arc::clone(record_b),
                        similarity,
                    ));
                }

                done += 1;
                if on_progress(CompareProgress { done, total }).is_break() {
                    return Err(ScanError::Superseded);
                }
            }
        }

        // `sort_by` is stable, so ties stay in discovery order
        pairs.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        log::info!(
            "Compared {} pairs among {} images, {} at or above {:.2}",
            total,
            comparable.len(),
            pairs.len(),
            self.threshold
        );
        Ok(pairs)
    }
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}
