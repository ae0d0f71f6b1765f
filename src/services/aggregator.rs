use crate::core::record::ImageRecord;
use crate::core::similarity::SimilarPair;
use crate::error::ScanError;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Progress value published when a scan ends, whatever the outcome.
pub const COMPLETE: f64 = 1.0;

/// Everything an observer needs to render one moment of a scan.
///
/// Snapshots are immutable and replaced wholesale; `results` is either empty
/// or the full sorted list of a finished scan.
#[derive(Debug, Clone)]
pub struct ScanState {
    pub generation: u64,
    pub is_processing: bool,
    pub progress: f64,
    pub catalog: Vec<Arc<ImageRecord>>,
    pub results: Vec<SimilarPair>,
    pub error: Option<ScanError>,
}

impl ScanState {
    fn idle(generation: u64) -> Self {
        Self {
            generation,
            is_processing: false,
            progress: 0.0,
            catalog: Vec::new(),
            results: Vec::new(),
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        !self.is_processing
    }
}

impl Default for ScanState {
    fn default() -> Self {
        Self::idle(0)
    }
}

/// Messages from the background worker (and scan control) to the aggregator.
#[derive(Debug)]
pub enum ScanEvent {
    Started { generation: u64 },
    Progress { generation: u64, progress: f64 },
    CatalogLoaded { generation: u64, catalog: Vec<Arc<ImageRecord>> },
    Completed { generation: u64, results: Vec<SimilarPair> },
    Failed { generation: u64, error: ScanError },
    Cancelled { generation: u64 },
}

impl ScanEvent {
    pub fn generation(&self) -> u64 {
        match self {
            ScanEvent::Started { generation }
            | ScanEvent::Progress { generation, .. }
            | ScanEvent::CatalogLoaded { generation, .. }
            | ScanEvent::Completed { generation, .. }
            | ScanEvent::Failed { generation, .. }
            | ScanEvent::Cancelled { generation } => *generation,
        }
    }
}

/// Single writer of `ScanState`.
///
/// Applies worker events in arrival order and publishes a fresh snapshot
/// after each accepted one. Events from any generation other than the
/// current one are dropped, so a superseded scan can never overwrite a newer
/// scan's state.
pub struct Aggregator {
    state: ScanState,
    publisher: watch::Sender<Arc<ScanState>>,
}

impl Aggregator {
    pub fn new() -> (Self, watch::Receiver<Arc<ScanState>>) {
        let state = ScanState::default();
        let (publisher, receiver) = watch::channel(Arc::new(state.clone()));
        (Self { state, publisher }, receiver)
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// Apply one event. Returns whether a new snapshot was published.
    pub fn apply(&mut self, event: ScanEvent) -> bool {
        let generation = event.generation();
        let current = self.state.generation;

        let accepted = match event {
            ScanEvent::Started { .. } | ScanEvent::Cancelled { .. } if generation <= current => {
                false
            }
            ScanEvent::Started { .. } => {
                self.state = ScanState {
                    is_processing: true,
                    ..ScanState::idle(generation)
                };
                true
            }
            ScanEvent::Cancelled { .. } => {
                self.state = ScanState {
                    progress: COMPLETE,
                    ..ScanState::idle(generation)
                };
                true
            }
            _ if generation != current || !self.state.is_processing => false,
            ScanEvent::Progress { progress, .. } => {
                let progress = progress.clamp(0.0, COMPLETE);
                if progress > self.state.progress {
                    self.state.progress = progress;
                    true
                } else {
                    false
                }
            }
            ScanEvent::CatalogLoaded { catalog, .. } => {
                self.state.catalog = catalog;
                true
            }
            ScanEvent::Completed { results, .. } => {
                self.state.results = results;
                self.state.progress = COMPLETE;
                self.state.is_processing = false;
                true
            }
            ScanEvent::Failed { error, .. } => {
                log::warn!("Scan {} failed: {}", generation, error);
                self.state = ScanState {
                    progress: COMPLETE,
                    error: Some(error),
                    ..ScanState::idle(generation)
                };
                true
            }
        };

        if accepted {
            self.publisher.send_replace(Arc::new(self.state.clone()));
        } else {
            log::trace!("Dropped event for scan {} (current {})", generation, current);
        }
        accepted
    }

    /// Consume events until every sender is gone. Blocking; run it on its own
    /// thread.
    pub fn run(mut self, mut events: mpsc::UnboundedReceiver<ScanEvent>) {
        while let Some(event) = events.blocking_recv() {
            self.apply(event);
        }
        log::debug!("Aggregator stopped");
    }
}
