use serde::{Deserialize, Serialize};

/// How much the realtime preprocessor is allowed to touch incoming deltas
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionIntensity {
    /// Whitespace cleanup only
    Light,
    /// Quick punctuation fixes plus fence/markdown spacing
    #[default]
    Moderate,
    /// Moderate plus the line-local subset of the format corrector
    Aggressive,
}

/// Shared configuration for every stage of the correction pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub enable_code_block_correction: bool,
    pub enable_markdown_correction: bool,
    pub enable_list_correction: bool,
    pub enable_link_correction: bool,
    pub enable_table_correction: bool,
    pub enable_quote_correction: bool,
    pub enable_text_style_correction: bool,
    pub enable_paragraph_correction: bool,
    pub enable_json_correction: bool,
    pub enable_xml_html_correction: bool,
    pub enable_math_correction: bool,
    pub enable_programming_syntax_correction: bool,
    pub enable_realtime_preprocessing: bool,
    pub enable_performance_optimization: bool,
    pub enable_caching: bool,
    pub enable_async_processing: bool,
    pub enable_progressive_correction: bool,
    pub correction_intensity: CorrectionIntensity,
    /// Inputs longer than this (in chars) are corrected chunk-wise
    pub chunk_size_threshold: usize,
    /// Calls slower than this are logged, never aborted
    pub max_processing_time_ms: u64,
    pub max_cache_size: usize,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            enable_code_block_correction: true,
            enable_markdown_correction: true,
            enable_list_correction: true,
            enable_link_correction: true,
            enable_table_correction: true,
            enable_quote_correction: true,
            enable_text_style_correction: true,
            enable_paragraph_correction: true,
            enable_json_correction: true,
            enable_xml_html_correction: true,
            enable_math_correction: true,
            enable_programming_syntax_correction: true,
            enable_realtime_preprocessing: true,
            enable_performance_optimization: true,
            enable_caching: true,
            enable_async_processing: true,
            enable_progressive_correction: true,
            correction_intensity: CorrectionIntensity::Moderate,
            chunk_size_threshold: 4000,
            max_processing_time_ms: 50,
            max_cache_size: 128,
        }
    }
}

impl CorrectionConfig {
    pub fn light() -> Self {
        Self {
            correction_intensity: CorrectionIntensity::Light,
            enable_text_style_correction: false,
            enable_paragraph_correction: false,
            enable_programming_syntax_correction: false,
            ..Self::default()
        }
    }

    pub fn aggressive() -> Self {
        Self {
            correction_intensity: CorrectionIntensity::Aggressive,
            ..Self::default()
        }
    }

    /// Every rule off; the pipeline becomes the identity.
    pub fn disabled() -> Self {
        Self {
            enable_code_block_correction: false,
            enable_markdown_correction: false,
            enable_list_correction: false,
            enable_link_correction: false,
            enable_table_correction: false,
            enable_quote_correction: false,
            enable_text_style_correction: false,
            enable_paragraph_correction: false,
            enable_json_correction: false,
            enable_xml_html_correction: false,
            enable_math_correction: false,
            enable_programming_syntax_correction: false,
            enable_realtime_preprocessing: false,
            enable_progressive_correction: false,
            ..Self::default()
        }
    }
}
