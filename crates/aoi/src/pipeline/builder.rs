use std::sync::Arc;

use tracing::info;

use crate::{
    algorithms::{HistogramMatchPreprocessor, HistogramReference},
    config::DetectionConfig,
    consolidate::{ConsolidationConfig, Consolidator},
    error::{AoiError, Result},
    pipeline::Pipeline,
    segments::grid_shape,
    traits::{Detector, ImagePreprocessor},
};

/// Fluent construction of a detection pipeline
pub struct PipelineBuilder {
    preprocessors: Vec<Box<dyn ImagePreprocessor>>,
    detectors: Vec<Box<dyn Detector>>,
    segments: u32,
    consolidation: ConsolidationConfig,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            preprocessors: Vec::new(),
            detectors: Vec::new(),
            segments: 1,
            consolidation: ConsolidationConfig::default(),
        }
    }

    pub fn add_preprocessor<P>(mut self, preprocessor: P) -> Self
    where
        P: ImagePreprocessor + 'static,
    {
        self.preprocessors.push(Box::new(preprocessor));
        self
    }

    pub fn add_detector<D>(mut self, detector: D) -> Self
    where
        D: Detector + 'static,
    {
        self.detectors.push(Box::new(detector));
        self
    }

    pub fn add_boxed_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Histogram-match every image to a shared reference before detection
    pub fn with_histogram_reference(self, reference: Arc<HistogramReference>) -> Self {
        self.add_preprocessor(HistogramMatchPreprocessor::new(reference))
    }

    pub fn with_segments(mut self, segments: u32) -> Self {
        self.segments = segments;
        self
    }

    pub fn with_consolidation(mut self, consolidation: ConsolidationConfig) -> Self {
        self.consolidation = consolidation;
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        grid_shape(self.segments)?;
        if self.detectors.is_empty() {
            return Err(AoiError::InvalidConfig("Pipeline needs at least one detector".into()));
        }
        Ok(Pipeline::new(
            self.preprocessors,
            self.detectors,
            self.segments,
            Consolidator::new(self.consolidation),
        ))
    }

    /// Pipeline for a survey configuration. The histogram reference is
    /// passed in already loaded so it can be shared between runs.
    pub fn from_config(config: &DetectionConfig, reference: Option<Arc<HistogramReference>>) -> Result<Pipeline> {
        config.validate()?;
        let mut builder = Self::new()
            .with_segments(config.segments)
            .with_consolidation(config.consolidation());
        if let Some(reference) = reference {
            builder = builder.with_histogram_reference(reference);
        }
        for detector in config.build_detectors()? {
            builder = builder.add_boxed_detector(detector);
        }
        let pipeline = builder.build()?;
        info!("{}", pipeline.info());
        Ok(pipeline)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
