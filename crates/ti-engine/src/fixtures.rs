//! On-disk fixtures for tests, written with the crate's own writers.

use std::fs::File;
use std::path::{Path, PathBuf};

use ti_format::{npz, write_npy, Container};
use ti_tensor::{CpuStorage, DType, Shape, Tensor};

pub(crate) fn tensor(storage: CpuStorage, dims: &[usize], dtype: DType) -> Tensor {
    Tensor::new(storage, Shape::from_slice(dims), dtype).unwrap()
}

/// `weight f32[3,4]`, `counts i32[6]`, `bias64 f64[4]`, `scale f32[1]`,
/// `flags bool[3]`, in that order.
pub(crate) fn mixed_npz_path(dir: &Path) -> PathBuf {
    let path = dir.join("mixed.npz");
    let weight = tensor(
        CpuStorage::F32((0..12).map(|i| i as f32).collect()),
        &[3, 4],
        DType::F32,
    );
    let counts = tensor(CpuStorage::I32(vec![5, 1, 5, 2, 3, 5]), &[6], DType::I32);
    let bias = tensor(CpuStorage::F64(vec![0.5, -1.0, 5.0, 2.0]), &[4], DType::F64);
    let scale = tensor(CpuStorage::F32(vec![5.0]), &[1], DType::F32);
    let flags = tensor(CpuStorage::Bool(vec![true, false, true]), &[3], DType::Bool);
    npz::write_archive(
        File::create(&path).unwrap(),
        &[
            ("weight", &weight),
            ("counts", &counts),
            ("bias64", &bias),
            ("scale", &scale),
            ("flags", &flags),
        ],
        true,
    )
    .unwrap();
    path
}

pub(crate) fn mixed_npz(dir: &Path) -> Container {
    Container::open(&mixed_npz_path(dir)).unwrap()
}

pub(crate) fn npy(dir: &Path, name: &str, t: &Tensor) -> PathBuf {
    let path = dir.join(name);
    write_npy(&path, t).unwrap();
    path
}

/// `arange(120)` as int64 of shape (3, 4, 10).
pub(crate) fn cube_npy(dir: &Path) -> PathBuf {
    let t = tensor(CpuStorage::I64((0..120).collect()), &[3, 4, 10], DType::I64);
    npy(dir, "cube.npy", &t)
}
