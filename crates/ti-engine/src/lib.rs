//! `ti-engine` - Boundary operations of tensor-inspector.
//!
//! [`Engine`] opens `.npy`, `.npz` and PyTorch checkpoint files through
//! `ti-format` and answers `load`, `info`, `search`, `filter`, `slice`,
//! `plot_data`, `export` and `save` requests with serializable results.
//! Every failure maps to a stable [`ErrorKind`] tag via
//! [`EngineError::to_failure`].

mod config;
mod editor;
mod error;
mod export;
mod filter;
mod plot;
mod search;
mod types;

#[cfg(test)]
mod fixtures;

pub use config::EngineConfig;
pub use editor::{apply_edits, resolve_index};
pub use error::{EditFailure, EngineError, ErrorKind, Failure, Result};
pub use export::export_tensor;
pub use search::{value_matches, Query};
pub use types::*;

use std::path::Path;

use ti_format::{detect, extension, Container, EditLock, FormatError};
use ti_tensor::{describe, preview, Nested, SliceSpec, Tensor, TensorDescriptor};

/// Stateless request handler. Every call opens the file afresh; nothing is
/// cached between calls.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn item(&self, tensor: &Tensor, key: &str) -> TensorItem {
        TensorItem {
            descriptor: describe(tensor, key),
            preview: preview(tensor, self.config.preview_rows, self.config.preview_cols),
        }
    }

    fn load_result<'a>(
        &self,
        path: &Path,
        container: &Container,
        keys: impl Iterator<Item = &'a str>,
    ) -> Result<LoadResult> {
        let mut tensors = Vec::new();
        for key in keys {
            let tensor = container.read_tensor(key)?;
            tensors.push(self.item(&tensor, key));
        }
        Ok(LoadResult {
            file: path.display().to_string(),
            file_type: extension(path),
            tensors,
            total_size: container.total_size(),
        })
    }

    /// Describe every tensor of the file, with stats and a bounded preview.
    ///
    /// Tensors are materialized one at a time.
    pub fn load(&self, path: &Path) -> Result<LoadResult> {
        let container = Container::open(path)?;
        self.load_result(path, &container, container.keys())
    }

    /// Descriptors from headers alone. No tensor data is read, so `stats`
    /// is always absent.
    pub fn info(&self, path: &Path) -> Result<Vec<TensorDescriptor>> {
        let container = Container::open(path)?;
        Ok(container.entries().iter().map(|e| e.descriptor()).collect())
    }

    /// Find tensors whose key matches `query`, and elements equal to it when
    /// it is a number.
    ///
    /// Float elements match within `float_tolerance` (absolute, whatever the
    /// magnitude). Integer elements match the query truncated toward zero.
    pub fn search(
        &self,
        path: &Path,
        query: &str,
        use_regex: bool,
        case_sensitive: bool,
    ) -> Result<Vec<SearchResult>> {
        let query = Query::new(query, use_regex, case_sensitive)?;
        let container = Container::open(path)?;
        search::search_container(&container, &query, &self.config)
    }

    /// `load`, restricted to the tensors passing `filter`. Stored order is
    /// kept and `totalSize` still covers the whole file.
    pub fn filter(&self, path: &Path, filter: &TensorFilter) -> Result<LoadResult> {
        let container = Container::open(path)?;
        let keys = container
            .entries()
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| e.key.as_str());
        self.load_result(path, &container, keys)
    }

    /// Select a sub-region of a tensor with a slice expression such as
    /// `0,1,:5`.
    pub fn slice(&self, path: &Path, key: &str, spec: &str) -> Result<Nested> {
        let spec = SliceSpec::parse(spec)?;
        let container = Container::open(path)?;
        let tensor = container.read_tensor(key)?;
        Ok(spec.apply(&tensor)?.to_nested())
    }

    /// Bounded series for plotting the tensors named by `keys`.
    ///
    /// Unknown keys are skipped with a warning.
    pub fn plot_data(
        &self,
        path: &Path,
        plot_type: PlotType,
        keys: &[&str],
        options: &PlotOptions,
    ) -> Result<PlotData> {
        let bound = |requested: Option<usize>, limit: usize, name: &str| match requested {
            Some(0) => Err(EngineError::InvalidArgument(format!("{} must be positive", name))),
            Some(n) => Ok(n.min(limit)),
            None => Ok(limit),
        };
        let max_points = bound(options.max_points, self.config.max_plot_points, "maxPoints")?;
        let max_side = bound(options.max_side, self.config.max_plot_side, "maxSide")?;

        let container = Container::open(path)?;
        let mut series = Vec::with_capacity(keys.len());
        for key in keys {
            let tensor = match container.read_tensor(key) {
                Ok(t) => t,
                Err(FormatError::KeyNotFound(_)) => {
                    tracing::warn!("plot: no tensor named {} in {}", key, path.display());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            series.push(plot::build_series(
                &tensor, key, plot_type, max_points, max_side,
            )?);
        }

        Ok(PlotData {
            plot_type,
            title: options
                .title
                .clone()
                .unwrap_or_else(|| plot::default_title(plot_type, keys)),
            series,
        })
    }

    /// Write one tensor to `output` as CSV, JSON, `.npy` or plain text.
    pub fn export(
        &self,
        path: &Path,
        key: &str,
        format: ExportFormat,
        output: &Path,
    ) -> Result<ExportResult> {
        if format == ExportFormat::Png {
            return Err(EngineError::ExternalExport("png".to_string()));
        }
        let container = Container::open(path)?;
        let tensor = container.read_tensor(key)?;
        export_tensor(&tensor, format, output)?;
        tracing::info!("exported {} from {} to {}", key, path.display(), output.display());
        Ok(ExportResult {
            success: true,
            output_path: output.display().to_string(),
        })
    }

    /// Apply `edits` to the tensor `key` and write the file back.
    ///
    /// The batch is all-or-nothing: the first edit that fails to convert or
    /// to resolve aborts it and the file is left untouched. The new file is
    /// written to a temporary sibling and renamed over the original.
    ///
    /// Concurrent saves to the same path race and the last writer wins,
    /// unless every writer enables `lock_edits`, which serializes the
    /// read-modify-write under an advisory lock.
    ///
    /// # Errors
    /// `UnsupportedWrite` for PyTorch checkpoints, before any value is
    /// converted.
    pub fn save(&self, path: &Path, key: &str, edits: &[EditRequest]) -> Result<SaveResult> {
        let format = detect(path)?;
        if !format.is_writable() {
            return Err(FormatError::UnsupportedWrite(format.to_string()).into());
        }

        let _lock = if self.config.lock_edits {
            Some(EditLock::acquire(path)?)
        } else {
            None
        };

        let container = Container::open(path)?;
        let entry_key = container.resolve(key)?.key.clone();
        let tensor = container.read_tensor(&entry_key)?;
        let edited = apply_edits(&tensor, edits)?;
        if !edits.is_empty() {
            container.save(&[(entry_key.as_str(), &edited)])?;
        }

        Ok(SaveResult {
            success: true,
            applied_count: edits.len(),
            message: format!("saved {} edit(s) to {}", edits.len(), entry_key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, tensor};
    use approx::assert_relative_eq;
    use rand::Rng;
    use ti_tensor::{CpuStorage, DType, Element, Shape};

    fn engine() -> Engine {
        Engine::default()
    }

    #[test]
    fn test_load_npz_descriptors_and_previews() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::mixed_npz_path(dir.path());
        let result = engine().load(&path).unwrap();

        assert_eq!(result.file_type, "npz");
        let keys: Vec<_> = result.tensors.iter().map(|t| t.descriptor.key.as_str()).collect();
        assert_eq!(keys, vec!["weight", "counts", "bias64", "scale", "flags"]);
        assert_eq!(result.total_size, 48 + 24 + 32 + 4 + 3);

        let weight = &result.tensors[0];
        assert_eq!(weight.descriptor.shape, vec![3, 4]);
        assert_eq!(weight.descriptor.dtype, "float32");
        let stats = weight.descriptor.stats.unwrap();
        assert_relative_eq!(stats.min, 0.0);
        assert_relative_eq!(stats.max, 11.0);
        assert_relative_eq!(stats.mean, 5.5);
        assert_eq!(weight.preview.dims(), vec![3, 4]);

        // bools are not numeric
        assert!(result.tensors[4].descriptor.stats.is_none());
    }

    #[test]
    fn test_load_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::cube_npy(dir.path());
        let json = serde_json::to_value(engine().load(&path).unwrap()).unwrap();
        let t = &json["tensors"][0];
        assert_eq!(t["key"], "data");
        assert_eq!(t["elementCount"], 120);
        assert_eq!(t["byteSize"], 960);
        assert_eq!(t["preview"][0][0], 0);
        assert_eq!(t["preview"].as_array().unwrap().len(), 12);
        assert_eq!(t["preview"][0].as_array().unwrap().len(), 10);
        assert_eq!(json["fileType"], "npy");
    }

    #[test]
    fn test_info_is_metadata_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::mixed_npz_path(dir.path());
        let info = engine().info(&path).unwrap();
        assert_eq!(info.len(), 5);
        assert!(info.iter().all(|d| d.stats.is_none()));
        assert_eq!(info[2].dtype, "float64");
        assert_eq!(info[2].byte_size, 32);
    }

    #[test]
    fn test_describe_is_idempotent_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::mixed_npz_path(dir.path());
        assert_eq!(engine().load(&path).unwrap(), engine().load(&path).unwrap());
    }

    #[test]
    fn test_search_integer_positions_and_key_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::mixed_npz_path(dir.path());
        let results = engine().search(&path, "5", false, false).unwrap();

        let counts = results.iter().find(|r| r.key == "counts").unwrap();
        assert_eq!(counts.total_matches, 3);
        let positions: Vec<_> = counts
            .matches
            .iter()
            .filter_map(|m| match m {
                SearchMatch::Value { position, .. } => Some(position.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(positions, vec![vec![0], vec![2], vec![5]]);

        // floats within tolerance, bools never searched by value
        let keys: Vec<_> = results.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["weight", "counts", "bias64", "scale"]);

        let by_key = engine().search(&path, "BIAS", false, false).unwrap();
        assert_eq!(by_key.len(), 1);
        assert_eq!(by_key[0].matches, vec![SearchMatch::Key]);
        assert!(engine().search(&path, "BIAS", false, true).unwrap().is_empty());
    }

    #[test]
    fn test_search_truncation_marker() {
        let dir = tempfile::tempdir().unwrap();
        let t = tensor(CpuStorage::I16(vec![3; 250]), &[250], DType::I16);
        let path = fixtures::npy(dir.path(), "threes.npy", &t);
        let results = engine().search(&path, "3", false, false).unwrap();
        assert_eq!(results[0].total_matches, 250);
        assert_eq!(results[0].matches.len(), 101);
        assert_eq!(
            results[0].matches.last(),
            Some(&SearchMatch::Truncated { remaining: 150 })
        );
    }

    #[test]
    fn test_filter_float32_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::mixed_npz_path(dir.path());
        let filter = TensorFilter {
            dtype: Some("float32".into()),
            ..Default::default()
        };
        let result = engine().filter(&path, &filter).unwrap();
        let keys: Vec<_> = result.tensors.iter().map(|t| t.descriptor.key.as_str()).collect();
        assert_eq!(keys, vec!["weight", "scale"]);
        assert!(result.tensors.iter().all(|t| t.descriptor.dtype == "float32"));

        let all = engine().filter(&path, &TensorFilter::default()).unwrap();
        assert_eq!(all.tensors.len(), 5);
    }

    #[test]
    fn test_slice_cube() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::cube_npy(dir.path());
        let out = engine().slice(&path, "data", "0,1,:5").unwrap();
        assert_eq!(out.dims(), vec![5]);
        let values: Vec<_> = out.leaves().into_iter().cloned().collect();
        assert_eq!(values, (10..15).map(Element::Int).collect::<Vec<_>>());
    }

    #[test]
    fn test_slice_range_error_names_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let t = tensor(CpuStorage::F64(vec![1.0, 2.0, 3.0]), &[3], DType::F64);
        let path = fixtures::npy(dir.path(), "v.npy", &t);
        let err = engine().slice(&path, "data", "10").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SliceRangeError);
        assert!(err.to_string().contains('3'));

        let err = engine().slice(&path, "data", "0;1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SliceSyntaxError);
        assert!(err.to_string().contains("0,1,:5"));
    }

    #[test]
    fn test_plot_skips_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::mixed_npz_path(dir.path());
        let data = engine()
            .plot_data(
                &path,
                PlotType::Heatmap,
                &["weight", "nope", "counts"],
                &PlotOptions::default(),
            )
            .unwrap();
        assert_eq!(data.title, "Heatmap - weight, nope, counts");
        let names: Vec<_> = data.series.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["weight", "counts"]);

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["type"], "heatmap");
        assert_eq!(json["series"][1]["z"][0].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_plot_options_only_lower_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let t = tensor(CpuStorage::F32(vec![0.0; 20_000]), &[20_000], DType::F32);
        let path = fixtures::npy(dir.path(), "long.npy", &t);
        let line = |max_points| {
            let options = PlotOptions {
                max_points,
                ..Default::default()
            };
            match &engine().plot_data(&path, PlotType::Line, &["data"], &options).unwrap().series[0] {
                PlotSeries::Xy { y, .. } => y.len(),
                other => panic!("unexpected {:?}", other),
            }
        };
        assert_eq!(line(None), 10_000);
        assert_eq!(line(Some(50)), 50);
        assert_eq!(line(Some(1_000_000)), 10_000);
    }

    #[test]
    fn test_export_csv_and_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::mixed_npz_path(dir.path());
        let out = dir.path().join("counts.csv");
        let result = engine().export(&path, "counts", ExportFormat::Csv, &out).unwrap();
        assert!(result.success);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "5\n1\n5\n2\n3\n5\n");

        let err = engine()
            .export(&path, "counts", ExportFormat::Png, &dir.path().join("c.png"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }

    #[test]
    fn test_save_npz_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::mixed_npz_path(dir.path());
        let before = engine().load(&path).unwrap();

        let result = engine()
            .save(&path, "weight", &[EditRequest::new(1, 2, "-7.25")])
            .unwrap();
        assert_eq!(result.applied_count, 1);

        let after = engine().load(&path).unwrap();
        for (a, b) in before.tensors.iter().zip(&after.tensors) {
            assert_eq!(a.descriptor.shape, b.descriptor.shape);
            assert_eq!(a.descriptor.dtype, b.descriptor.dtype);
            if a.descriptor.key != "weight" {
                assert_eq!(a, b);
            }
        }
        let w = engine().slice(&path, "weight", "1,2").unwrap();
        assert_eq!(w, Nested::Scalar(Element::Float(-7.25)));
    }

    #[test]
    fn test_save_decimal_into_int32_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let t = tensor(CpuStorage::I32(vec![1, 2, 3]), &[3], DType::I32);
        let path = fixtures::npy(dir.path(), "ints.npy", &t);
        let before = std::fs::read(&path).unwrap();

        let err = engine()
            .save(&path, "data", &[EditRequest::new(0, 0, "3.14")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueConversionError);
        assert!(err.to_string().contains("decimal point"));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_save_batch_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::mixed_npz_path(dir.path());
        let before = std::fs::read(&path).unwrap();

        let err = engine()
            .save(
                &path,
                "counts",
                &[EditRequest::new(0, 0, "9"), EditRequest::new(1, 0, "x")],
            )
            .unwrap_err();
        match err {
            EngineError::Edit { index, row, .. } => assert_eq!((index, row), (2, 1)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_save_checkpoint_is_unsupported_before_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.pt");
        std::fs::write(&path, b"not even a zip").unwrap();
        let err = engine()
            .save(&path, "w", &[EditRequest::new(0, 0, "not a number")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedWrite);
        assert_eq!(std::fs::read(&path).unwrap(), b"not even a zip");
    }

    #[test]
    fn test_save_with_lock_releases_it() {
        let dir = tempfile::tempdir().unwrap();
        let t = tensor(CpuStorage::U16(vec![0; 4]), &[2, 2], DType::U16);
        let path = fixtures::npy(dir.path(), "u.npy", &t);
        let engine = Engine::new(EngineConfig {
            lock_edits: true,
            ..Default::default()
        })
        .unwrap();
        engine.save(&path, "data", &[EditRequest::new(1, 1, "65535")]).unwrap();
        assert!(!EditLock::is_held(&path).unwrap());
        assert_eq!(
            engine.slice(&path, "data", "1,1").unwrap(),
            Nested::Scalar(Element::UInt(65535))
        );
    }

    #[test]
    fn test_random_npy_edit_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = rand::thread_rng();
        let values: Vec<i64> = (0..24).map(|_| rng.gen_range(-1000..1000)).collect();
        let t = tensor(CpuStorage::I64(values.clone()), &[2, 3, 4], DType::I64);
        let path = fixtures::npy(dir.path(), "r.npy", &t);

        let row = rng.gen_range(0..6);
        let col = rng.gen_range(0..4);
        let new_value: i64 = rng.gen_range(-1000..1000);
        engine()
            .save(&path, "data", &[EditRequest::new(row, col, new_value.to_string())])
            .unwrap();

        let mut expected = values;
        expected[row * 4 + col] = new_value;
        let container = Container::open(&path).unwrap();
        let back = container.read_tensor("data").unwrap();
        assert_eq!(back.shape(), &Shape::new(vec![2, 3, 4]));
        assert_eq!(back.storage(), &CpuStorage::I64(expected));
    }

    #[test]
    fn test_unsupported_extension_kind() {
        let err = engine().load(Path::new("weights.safetensors")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
        let err = engine().load(Path::new("/nonexistent/dir/x.npy")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
    }
}
