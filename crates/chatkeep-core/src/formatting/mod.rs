pub mod cache;
pub mod config;
pub mod error_corrector;
pub mod format_corrector;
pub mod math_fix;
pub mod preprocessor;
pub mod rules;

use std::sync::Arc;

pub use cache::{CorrectionCache, MetricsSnapshot, PerformanceMetrics};
pub use config::{CorrectionConfig, CorrectionIntensity};
pub use error_corrector::ErrorCorrector;
pub use format_corrector::FormatCorrector;
pub use preprocessor::{DeltaContext, RealtimePreprocessor};
pub use rules::{CorrectionError, CorrectionResult};

/// The three correction stages wired to one config, cache and metrics record.
///
/// Whoever builds the pipeline owns its cache; nothing here is global.
pub struct FormatPipeline {
    config: Arc<CorrectionConfig>,
    cache: Arc<CorrectionCache>,
    metrics: Arc<PerformanceMetrics>,
    preprocessor: RealtimePreprocessor,
    format: Arc<FormatCorrector>,
    error: ErrorCorrector,
}

impl FormatPipeline {
    pub fn new(config: CorrectionConfig) -> Self {
        let config = Arc::new(config);
        let cache = Arc::new(CorrectionCache::new(config.max_cache_size));
        let metrics = Arc::new(PerformanceMetrics::new());
        let format = Arc::new(FormatCorrector::new(
            config.clone(),
            cache.clone(),
            metrics.clone(),
        ));
        let error = ErrorCorrector::new(config.clone(), cache.clone(), metrics.clone());
        let preprocessor = RealtimePreprocessor::new(config.clone(), format.clone());
        Self {
            config,
            cache,
            metrics,
            preprocessor,
            format,
            error,
        }
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    /// Stage A on one streamed delta; `context` belongs to the stream.
    pub fn preprocess_delta(&self, delta: &str, context: &mut DeltaContext) -> String {
        self.preprocessor.process(delta, context)
    }

    /// Stages B then C on a finalized text.
    pub fn finalize_text(&self, text: &str) -> String {
        let formatted = self.format.correct(text);
        self.error.correct(&formatted)
    }

    /// Display view of a still-streaming text with an open fence closed.
    /// None when the raw text can be shown as is.
    pub fn progressive_view(&self, text: &str, context: &DeltaContext) -> Option<String> {
        if !self.config.enable_progressive_correction || !context.inside_fence() {
            return None;
        }
        let separator = if text.ends_with('\n') { "" } else { "\n" };
        Some(format!("{text}{separator}```"))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl Default for FormatPipeline {
    fn default() -> Self {
        Self::new(CorrectionConfig::default())
    }
}
