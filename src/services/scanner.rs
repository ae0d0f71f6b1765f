use crate::config::{ConfigError, ScanConfig};
use crate::core::access::{ResourceAccess, UnrestrictedAccess};
use crate::core::catalog::{CatalogLoader, LoadProgress};
use crate::core::features::{
    extract_features, FeatureExtractor, MemoizedExtractor, PerceptualHashExtractor,
};
use crate::core::similarity::{CompareProgress, SimilarPair, SimilarityEngine};
use crate::error::ScanError;
use crate::services::aggregator::{Aggregator, ScanEvent, ScanState, COMPLETE};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, watch};

/// Share of overall progress reserved for loading the catalog.
pub const LOAD_PHASE_END: f64 = 0.5;

/// Smallest compare-phase advance forwarded to the aggregator.
const PROGRESS_STEP: f64 = 0.001;

/// Overall progress after `progress` of the load phase.
pub fn load_phase_progress(progress: LoadProgress) -> f64 {
    progress.fraction() * LOAD_PHASE_END
}

/// Overall progress after `progress` of the compare phase.
pub fn compare_phase_progress(progress: CompareProgress) -> f64 {
    LOAD_PHASE_END + progress.fraction() * (COMPLETE - LOAD_PHASE_END)
}

/// Runs scans on a background worker and exposes their state as snapshots.
///
/// One scan is active at a time. Starting a scan supersedes the previous one:
/// its worker stops at the next file, image or comparison, and anything it
/// still sends is discarded by generation.
pub struct Scanner {
    config: ScanConfig,
    extractor: Arc<dyn FeatureExtractor>,
    access: Arc<dyn ResourceAccess>,
    generation: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<ScanEvent>,
    state: watch::Receiver<Arc<ScanState>>,
}

impl Scanner {
    /// Scanner with the perceptual-hash extractor described by `config`.
    pub fn new(config: ScanConfig) -> Result<Self, ConfigError> {
        let extractor = Arc::new(PerceptualHashExtractor::new(
            config.hash_alg,
            config.hash_size,
        ));
        Self::with_extractor(config, extractor)
    }

    pub fn with_extractor(
        config: ScanConfig,
        extractor: Arc<dyn FeatureExtractor>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (aggregator, state) = Aggregator::new();
        let (events, receiver) = mpsc::unbounded_channel();
        thread::spawn(move || aggregator.run(receiver));

        Ok(Self {
            config,
            extractor,
            access: Arc::new(UnrestrictedAccess),
            generation: Arc::new(AtomicU64::new(0)),
            events,
            state,
        })
    }

    pub fn with_access(mut self, access: Arc<dyn ResourceAccess>) -> Self {
        self.access = access;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Begin scanning `dir`, superseding any scan in flight.
    pub fn start(&self, dir: impl Into<PathBuf>) -> ScanHandle {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let dir = dir.into();
        log::info!("Scan {} started for {}", generation, dir.display());

        // Published before the worker exists so the reset always lands first
        let _ = self.events.send(ScanEvent::Started { generation });

        let job = ScanJob {
            generation,
            current: Arc::clone(&self.generation),
            dir,
            config: self.config.clone(),
            extractor: Arc::clone(&self.extractor),
            access: Arc::clone(&self.access),
            events: self.events.clone(),
        };
        let worker = thread::spawn(move || job.run());

        ScanHandle {
            generation,
            state: self.state.clone(),
            worker: Some(worker),
        }
    }

    /// Stop the running scan, if any, and publish an idle state.
    pub fn cancel(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("Scan cancelled (generation {})", generation);
        let _ = self.events.send(ScanEvent::Cancelled { generation });
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Arc<ScanState> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ScanState>> {
        self.state.clone()
    }
}

/// Handle to one scan generation.
pub struct ScanHandle {
    generation: u64,
    state: watch::Receiver<Arc<ScanState>>,
    worker: Option<JoinHandle<()>>,
}

impl ScanHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait until this scan has published its final state, or until a newer
    /// generation replaced it, and return that snapshot.
    pub async fn finished(mut self) -> Arc<ScanState> {
        let generation = self.generation;
        let settled = self
            .state
            .wait_for(|state| {
                state.generation > generation
                    || (state.generation == generation && state.is_finished())
            })
            .await
            .map(|state| state.clone());

        if let Some(worker) = self.worker.take() {
            // The worker may still be inside an extractor call
            match tokio::task::spawn_blocking(move || worker.join()).await {
                Ok(Ok(())) => {}
                _ => log::error!("Scan {} worker panicked", generation),
            }
        }

        match settled {
            Ok(state) => state,
            Err(_) => self.state.borrow().clone(),
        }
    }
}

/// Everything the background worker needs for one scan.
struct ScanJob {
    generation: u64,
    current: Arc<AtomicU64>,
    dir: PathBuf,
    config: ScanConfig,
    extractor: Arc<dyn FeatureExtractor>,
    access: Arc<dyn ResourceAccess>,
    events: mpsc::UnboundedSender<ScanEvent>,
}

impl ScanJob {
    fn run(self) {
        match self.pipeline() {
            Ok(()) => log::info!("Scan {} complete", self.generation),
            Err(ScanError::Superseded) => log::info!("Scan {} superseded", self.generation),
            Err(error) => {
                let generation = self.generation;
                let _ = self.publish(ScanEvent::Failed { generation, error });
            }
        }
    }

    fn pipeline(&self) -> Result<(), ScanError> {
        let generation = self.generation;

        let loader = CatalogLoader::from_config(&self.config)
            .map_err(|e| ScanError::directory_access(&self.dir, e))?;
        let catalog = loader.load(&self.dir, self.access.as_ref(), |progress| {
            // The end of loading is reported as the start of comparing
            if progress.processed < progress.total {
                let progress = load_phase_progress(progress);
                self.forward(ScanEvent::Progress {
                    generation,
                    progress,
                })
            } else {
                self.still_current()
            }
        })?;
        self.publish(ScanEvent::CatalogLoaded {
            generation,
            catalog: catalog.clone(),
        })?;

        // Fewer than two images means no pairs: go straight to 1.0
        if catalog.len() < 2 {
            return self.complete(Vec::new());
        }
        self.publish(ScanEvent::Progress {
            generation,
            progress: LOAD_PHASE_END,
        })?;

        let memo = MemoizedExtractor::new(Arc::clone(&self.extractor));
        let vectors = extract_features(&catalog, &memo, || self.still_current())?;
        if vectors.len() < 2 {
            return self.complete(Vec::new());
        }

        let engine = SimilarityEngine::new(self.config.threshold);
        let mut last_sent = LOAD_PHASE_END;
        let results = engine.find_similar_pairs(&catalog, &vectors, |progress| {
            let value = compare_phase_progress(progress);
            if value - last_sent >= PROGRESS_STEP || progress.done == progress.total {
                last_sent = value;
                self.forward(ScanEvent::Progress {
                    generation,
                    progress: value,
                })
            } else {
                self.still_current()
            }
        })?;

        self.complete(results)
    }

    fn complete(&self, results: Vec<SimilarPair>) -> Result<(), ScanError> {
        self.publish(ScanEvent::Completed {
            generation: self.generation,
            results,
        })
    }

    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    fn still_current(&self) -> ControlFlow<()> {
        if self.is_current() {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    }

    /// Send `event` unless this scan has been superseded.
    fn publish(&self, event: ScanEvent) -> Result<(), ScanError> {
        if !self.is_current() {
            return Err(ScanError::Superseded);
        }
        self.events.send(event).map_err(|_| ScanError::Superseded)
    }

    fn forward(&self, event: ScanEvent) -> ControlFlow<()> {
        match self.publish(event) {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    }
}
