use std::io::{BufWriter, Write};
use std::path::Path;

use ti_format::{write_atomic, write_bytes_atomic, write_npy};
use ti_tensor::{Element, Tensor};

use crate::error::{EngineError, Result};
use crate::types::ExportFormat;

fn csv_field(e: &Element) -> String {
    let text = e.to_string();
    if text.contains([',', '"', '\n']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text
    }
}

/// Write `tensor` to `output` in `format`, atomically.
///
/// # Errors
/// `ExternalExport` for `png`: images are rendered by a plotting
/// collaborator, not by the engine.
pub fn export_tensor(tensor: &Tensor, format: ExportFormat, output: &Path) -> Result<()> {
    match format {
        ExportFormat::Csv => {
            // a vector is one column; rank > 2 folds into (shape[0], rest)
            let (rows, cols) = tensor.shape().fold_first();
            write_atomic(output, |f| {
                let mut w = BufWriter::new(f);
                for r in 0..rows {
                    let line: Vec<String> = (0..cols)
                        .filter_map(|c| tensor.element(r * cols + c))
                        .map(|e| csv_field(&e))
                        .collect();
                    writeln!(w, "{}", line.join(","))?;
                }
                w.flush()?;
                Ok(())
            })?;
        }
        ExportFormat::Txt => {
            write_atomic(output, |f| {
                let mut w = BufWriter::new(f);
                for i in 0..tensor.numel() {
                    if let Some(e) = tensor.element(i) {
                        writeln!(w, "{}", e)?;
                    }
                }
                w.flush()?;
                Ok(())
            })?;
        }
        ExportFormat::Json => {
            let bytes = serde_json::to_vec(&tensor.to_nested())?;
            write_bytes_atomic(output, &bytes)?;
        }
        ExportFormat::Npy => write_npy(output, tensor)?,
        ExportFormat::Png => return Err(EngineError::ExternalExport("png".to_string())),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::tensor;
    use ti_format::NpyFile;
    use ti_tensor::{CpuStorage, DType};

    #[test]
    fn test_csv_layouts() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("m.csv");

        let m = tensor(CpuStorage::I32((0..6).collect()), &[2, 3], DType::I32);
        export_tensor(&m, ExportFormat::Csv, &out).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "0,1,2\n3,4,5\n");

        let v = tensor(CpuStorage::F64(vec![0.5, -1.0]), &[2], DType::F64);
        export_tensor(&v, ExportFormat::Csv, &out).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "0.5\n-1.0\n");

        let cube = tensor(CpuStorage::U8((0..8).collect()), &[2, 2, 2], DType::U8);
        export_tensor(&cube, ExportFormat::Csv, &out).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "0,1,2,3\n4,5,6,7\n");
    }

    #[test]
    fn test_json_and_txt() {
        let dir = tempfile::tempdir().unwrap();
        let m = tensor(CpuStorage::Bool(vec![true, false, false, true]), &[2, 2], DType::Bool);

        let json = dir.path().join("m.json");
        export_tensor(&m, ExportFormat::Json, &json).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&json).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!([[true, false], [false, true]]));

        let txt = dir.path().join("m.txt");
        export_tensor(&m, ExportFormat::Txt, &txt).unwrap();
        assert_eq!(std::fs::read_to_string(&txt).unwrap(), "True\nFalse\nFalse\nTrue\n");
    }

    #[test]
    fn test_npy_reexport() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("copy.npy");
        let t = tensor(CpuStorage::F32(vec![1.0, 2.0, 3.0]), &[3], DType::F32);
        export_tensor(&t, ExportFormat::Npy, &out).unwrap();
        assert_eq!(NpyFile::open(&out).unwrap().read_tensor().unwrap(), t);
    }

    #[test]
    fn test_png_is_external() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("m.png");
        let t = tensor(CpuStorage::F32(vec![1.0]), &[1], DType::F32);
        let err = export_tensor(&t, ExportFormat::Png, &out).unwrap_err();
        assert!(matches!(err, EngineError::ExternalExport(_)));
        assert!(!out.exists());
    }
}
