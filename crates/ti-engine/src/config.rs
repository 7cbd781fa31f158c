//! Engine configuration.

use serde::{Deserialize, Serialize};

use ti_tensor::preview::{DEFAULT_MAX_COLS, DEFAULT_MAX_ROWS};

use crate::error::{EngineError, Result};

/// Bounds and switches shared by every engine operation.
///
/// Every field has a default, so a partial JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows kept by previews
    pub preview_rows: usize,

    /// Columns kept by previews
    pub preview_cols: usize,

    /// Value matches reported per tensor before the truncation marker
    pub max_search_matches: usize,

    /// Absolute tolerance for float value search
    pub float_tolerance: f64,

    /// Points per line/bar/scatter/histogram series
    pub max_plot_points: usize,

    /// Side of heatmap and image matrices
    pub max_plot_side: usize,

    /// Hold an advisory lock around edits
    pub lock_edits: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preview_rows: DEFAULT_MAX_ROWS,
            preview_cols: DEFAULT_MAX_COLS,
            max_search_matches: 100,
            float_tolerance: 1e-6,
            max_plot_points: 10_000,
            max_plot_side: 100,
            lock_edits: false,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let bounds = [
            ("preview_rows", self.preview_rows),
            ("preview_cols", self.preview_cols),
            ("max_search_matches", self.max_search_matches),
            ("max_plot_points", self.max_plot_points),
            ("max_plot_side", self.max_plot_side),
        ];
        if let Some((name, _)) = bounds.iter().find(|(_, v)| *v == 0) {
            return Err(EngineError::InvalidArgument(format!("{} must be positive", name)));
        }
        if self.float_tolerance.is_nan() || self.float_tolerance < 0.0 {
            return Err(EngineError::InvalidArgument(format!(
                "float_tolerance must be a non-negative number, got {}",
                self.float_tolerance
            )));
        }
        Ok(())
    }
}
