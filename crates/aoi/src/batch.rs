//! Parallel per-image detection followed by the single-pass geospatial stages.

use std::{
    collections::HashSet,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    algorithms::HistogramReference,
    bearing::{resolve_headings, BearingReport, BearingStrategy},
    config::DetectionConfig,
    coverage::{coverage_extent, CoverageExtent},
    error::{AoiError, Result},
    georef::{GeoreferenceSummary, Georeferencer},
    pipeline::{builder::PipelineBuilder, ImageDetections, Pipeline},
    traits::{CeilingConfirmation, FrameSource, ProgressSink},
    types::ImageRecord,
};

/// Shared flag polled by every long-running stage
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancellation, progress and confirmation hooks handed to every stage
#[derive(Clone, Default)]
pub struct RunContext {
    pub cancel: CancellationToken,
    progress: Option<Arc<dyn ProgressSink>>,
    ceiling_confirmation: Option<Arc<dyn CeilingConfirmation>>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .field("ceiling_confirmation", &self.ceiling_confirmation.is_some())
            .finish()
    }
}

impl RunContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Default::default()
        }
    }

    pub fn with_progress<P: ProgressSink + 'static>(mut self, progress: P) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn with_ceiling_confirmation<C: CeilingConfirmation + 'static>(mut self, confirmation: C) -> Self {
        self.ceiling_confirmation = Some(Arc::new(confirmation));
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn report(&self, completed: usize, total: usize, message: &str) {
        if let Some(progress) = &self.progress {
            progress.report(completed, total, message);
        }
    }

    /// Without a confirmation hook the batch continues after a warning
    pub fn confirm_ceiling(&self, total_aois: usize, ceiling: usize) -> bool {
        match &self.ceiling_confirmation {
            Some(confirmation) => confirmation.confirm(total_aois, ceiling),
            None => {
                warn!("{} AOIs exceed the ceiling of {}, continuing", total_aois, ceiling);
                true
            }
        }
    }
}

/// Detections for one image, alongside the metadata they were produced from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    pub record: ImageRecord,
    pub detections: ImageDetections,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFailure {
    pub image_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// In completion order
    pub results: Vec<ImageResult>,
    pub failures: Vec<ImageFailure>,
    /// Images never started, in input order, for a later resume
    pub pending: Vec<String>,
    pub cancelled: bool,
    /// Set when the AOI ceiling was exceeded and continuing was declined
    pub ceiling_declined: bool,
    pub total_aois: usize,
}

impl BatchResult {
    pub fn records(&self) -> Vec<ImageRecord> {
        self.results.iter().map(|r| r.record.clone()).collect()
    }

    pub fn find(&self, image_id: &str) -> Option<&ImageResult> {
        self.results.iter().find(|r| r.record.id == image_id)
    }
}

enum WorkerMessage {
    Done(usize, Result<ImageDetections>),
    NotStarted(usize),
}

/// Runs the detection pipeline over many images on a bounded worker pool
pub struct BatchOrchestrator {
    pipeline: Arc<Pipeline>,
    source: Arc<dyn FrameSource>,
    workers: usize,
    aoi_ceiling: Option<usize>,
}

impl BatchOrchestrator {
    pub fn new(pipeline: Pipeline, source: Arc<dyn FrameSource>, workers: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            source,
            workers: workers.clamp(1, crate::config::MAX_WORKERS),
            aoi_ceiling: None,
        }
    }

    pub fn with_aoi_ceiling(mut self, ceiling: Option<usize>) -> Self {
        self.aoi_ceiling = ceiling;
        self
    }

    /// Validates the config and loads the histogram reference before any
    /// worker starts
    pub fn from_config(config: &DetectionConfig, source: Arc<dyn FrameSource>) -> Result<Self> {
        let reference = config
            .histogram_reference
            .as_ref()
            .map(|path| HistogramReference::load(path).map(Arc::new))
            .transpose()?;
        let pipeline = PipelineBuilder::from_config(config, reference)?;
        Ok(Self::new(pipeline, source, config.worker_count()).with_aoi_ceiling(config.aoi_ceiling))
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn run(&self, records: Vec<ImageRecord>, ctx: &RunContext) -> Result<BatchResult> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("aoi-worker-{i}"))
            .build()
            .map_err(|e| AoiError::WorkerPool(e.to_string()))?;

        let total = records.len();
        let records = Arc::new(records);
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        info!("Dispatching {} images to {} workers", total, self.workers);

        for index in 0..total {
            let tx = tx.clone();
            let records = Arc::clone(&records);
            let pipeline = Arc::clone(&self.pipeline);
            let source = Arc::clone(&self.source);
            let stop = Arc::clone(&stop);
            let cancel = ctx.cancel.clone();
            pool.spawn(move || {
                let message = if cancel.is_cancelled() || stop.load(Ordering::SeqCst) {
                    WorkerMessage::NotStarted(index)
                } else {
                    let record = &records[index];
                    let detections = source.load(record).and_then(|frame| pipeline.process(&frame));
                    WorkerMessage::Done(index, detections)
                };
                // the receiver only hangs up once every message is in
                let _ = tx.send(message);
            });
        }
        drop(tx);

        let mut batch = BatchResult::default();
        let mut not_started = Vec::new();
        let mut asked = false;

        for (received, message) in rx.iter().enumerate() {
            match message {
                WorkerMessage::Done(index, Ok(detections)) => {
                    let record = records[index].clone();
                    debug!("{}: {} AOIs", record.id, detections.aois.len());
                    batch.total_aois += detections.aois.len();
                    batch.results.push(ImageResult { record, detections });
                }
                WorkerMessage::Done(index, Err(e)) => {
                    warn!("{} failed: {}", records[index].id, e);
                    batch.failures.push(ImageFailure {
                        image_id: records[index].id.clone(),
                        message: e.to_string(),
                    });
                }
                WorkerMessage::NotStarted(index) => not_started.push(index),
            }

            if let Some(ceiling) = self.aoi_ceiling {
                if !asked && batch.total_aois > ceiling {
                    asked = true;
                    if !ctx.confirm_ceiling(batch.total_aois, ceiling) {
                        warn!("AOI ceiling {} exceeded, stopping dispatch", ceiling);
                        stop.store(true, Ordering::SeqCst);
                        batch.ceiling_declined = true;
                    }
                }
            }
            ctx.report(received + 1, total, "Detecting AOIs");
        }

        not_started.sort_unstable();
        batch.pending = not_started.into_iter().map(|i| records[i].id.clone()).collect();
        batch.cancelled = ctx.is_cancelled();
        info!(
            "Batch finished: {} processed, {} failed, {} pending, {} AOIs",
            batch.results.len(),
            batch.failures.len(),
            batch.pending.len(),
            batch.total_aois
        );
        Ok(batch)
    }

    /// Process only the images a previous run left pending
    pub fn resume(&self, records: &[ImageRecord], previous: &BatchResult, ctx: &RunContext) -> Result<BatchResult> {
        let pending: HashSet<&str> = previous.pending.iter().map(String::as_str).collect();
        let remaining = records
            .iter()
            .filter(|r| pending.contains(r.id.as_str()))
            .cloned()
            .collect();
        self.run(remaining, ctx)
    }
}

/// Output of a complete survey run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyReport {
    pub batch: BatchResult,
    pub bearings: BearingReport,
    pub georeference: GeoreferenceSummary,
    pub coverage: CoverageExtent,
}

/// Detection, then bearing recovery, georeferencing and coverage over the
/// images that completed
pub fn process_survey(
    orchestrator: &BatchOrchestrator,
    records: Vec<ImageRecord>,
    strategy: Option<&BearingStrategy>,
    georeferencer: &Georeferencer,
    ctx: &RunContext,
) -> Result<SurveyReport> {
    // Step 1: per-image detection
    let mut batch = orchestrator.run(records, ctx)?;
    // Capture order keeps later stages deterministic
    batch.results.sort_by(|a, b| a.record.timestamp.cmp(&b.record.timestamp).then_with(|| a.record.id.cmp(&b.record.id)));
    let completed = batch.records();

    // Step 2: headings
    let bearings = resolve_headings(&completed, strategy, ctx);

    // Step 3: AOI ground locations
    let georeference = georeferencer.georeference_all(&mut batch.results, &bearings.headings, ctx);

    // Step 4: surveyed area
    let coverage = coverage_extent(&completed, &bearings.headings, ctx);

    Ok(SurveyReport {
        batch,
        bearings,
        georeference,
        coverage,
    })
}
