use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use ti_tensor::{Element, Nested, TensorDescriptor};

use crate::error::EngineError;

/// One tensor of a loaded container: its descriptor plus a bounded preview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorItem {
    #[serde(flatten)]
    pub descriptor: TensorDescriptor,
    pub preview: Nested,
}

/// Result of `load` and `filter`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub file: String,
    /// Lowercased file extension, e.g. `npz` or `pth`.
    pub file_type: String,
    pub tensors: Vec<TensorItem>,
    /// Sum of `byteSize` over every tensor of the file.
    pub total_size: usize,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchMatch {
    /// The query matched the tensor's key.
    Key,
    /// An element equal to the numeric query.
    Value { position: Vec<usize>, value: Element },
    /// Value matches beyond the per-tensor cap.
    Truncated { remaining: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub key: String,
    pub matches: Vec<SearchMatch>,
    /// Key match plus every value match, including the truncated ones.
    pub total_matches: usize,
}

/// Predicates for `filter`; `None` means no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorFilter {
    pub key: Option<String>,
    pub shape: Option<Vec<usize>>,
    pub dtype: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotType {
    Line,
    Bar,
    Scatter,
    Histogram,
    Heatmap,
    Image,
}

impl PlotType {
    /// Heatmap and image plots carry a `z` matrix instead of x/y series.
    pub fn is_matrix(&self) -> bool {
        matches!(self, PlotType::Heatmap | PlotType::Image)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlotType::Line => "line",
            PlotType::Bar => "bar",
            PlotType::Scatter => "scatter",
            PlotType::Histogram => "histogram",
            PlotType::Heatmap => "heatmap",
            PlotType::Image => "image",
        }
    }
}

impl fmt::Display for PlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlotType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "line" => Ok(PlotType::Line),
            "bar" => Ok(PlotType::Bar),
            "scatter" => Ok(PlotType::Scatter),
            "histogram" => Ok(PlotType::Histogram),
            "heatmap" => Ok(PlotType::Heatmap),
            "image" => Ok(PlotType::Image),
            other => Err(EngineError::InvalidArgument(format!(
                "unknown plot type '{}'",
                other
            ))),
        }
    }
}

/// Caller overrides for a plot. Bounds can only be lowered below the
/// configured limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlotOptions {
    pub max_points: Option<usize>,
    pub max_side: Option<usize>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PlotSeries {
    Xy {
        name: String,
        x: Vec<usize>,
        y: Vec<f64>,
    },
    Matrix {
        name: String,
        z: Vec<Vec<f64>>,
    },
}

impl PlotSeries {
    pub fn name(&self) -> &str {
        match self {
            PlotSeries::Xy { name, .. } | PlotSeries::Matrix { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotData {
    #[serde(rename = "type")]
    pub plot_type: PlotType,
    pub title: String,
    pub series: Vec<PlotSeries>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma-separated rows.
    Csv,
    /// Nested JSON arrays.
    Json,
    /// Single-tensor `.npy` file.
    Npy,
    /// One element per line, flattened.
    Txt,
    /// Rendered image; produced by an external plotting collaborator.
    Png,
}

impl FromStr for ExportFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "npy" => Ok(ExportFormat::Npy),
            "txt" => Ok(ExportFormat::Txt),
            "png" => Ok(ExportFormat::Png),
            other => Err(EngineError::InvalidArgument(format!(
                "unknown export format '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub success: bool,
    pub output_path: String,
}

/// Replace the element at `(row, col)` with the literal `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRequest {
    pub row: usize,
    pub col: usize,
    pub value: String,
}

impl EditRequest {
    pub fn new(row: usize, col: usize, value: impl Into<String>) -> Self {
        Self {
            row,
            col,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResult {
    pub success: bool,
    pub applied_count: usize,
    pub message: String,
}
