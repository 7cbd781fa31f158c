use crate::dtype::{ByteOrder, DType};
use crate::element::{Element, Nested};
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::storage::CpuStorage;

/// A materialized tensor: contiguous, row-major storage with its shape and
/// dtype.
///
/// Shape and dtype are fixed at construction; only element values can change,
/// through [`Tensor::set`].
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    storage: CpuStorage,
    shape: Shape,
    dtype: DType,
}

impl Tensor {
    /// Wrap existing storage.
    ///
    /// # Errors
    /// Fails if the storage variant does not match `dtype` or its length is not
    /// `shape.numel()`.
    pub fn new(storage: CpuStorage, shape: Shape, dtype: DType) -> Result<Self> {
        if !storage.fits(dtype) {
            return Err(TensorError::DTypeMismatch {
                expected: dtype.to_string(),
                got: storage.variant_name().to_string(),
            });
        }
        if storage.len() != shape.numel() {
            return Err(TensorError::StorageLength {
                shape: shape.dims().to_vec(),
                expected: shape.numel(),
                got: storage.len(),
            });
        }
        Ok(Tensor {
            storage,
            shape,
            dtype,
        })
    }

    /// Decode a contiguous row-major buffer.
    pub fn from_bytes(dtype: DType, shape: Shape, bytes: &[u8], order: ByteOrder) -> Result<Self> {
        let storage = CpuStorage::from_bytes(dtype, bytes, shape.numel(), order)?;
        Tensor::new(storage, shape, dtype)
    }

    /// Build a tensor as a strided view over `storage`, copying the viewed
    /// elements into contiguous row-major order.
    ///
    /// `offset` and `strides` are in elements. This covers column-major numpy
    /// arrays and non-contiguous PyTorch views.
    pub fn from_strided(
        storage: CpuStorage,
        dtype: DType,
        shape: Shape,
        offset: usize,
        strides: &[usize],
    ) -> Result<Self> {
        if strides.len() != shape.ndim() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: strides.to_vec(),
            });
        }
        if offset == 0 && storage.len() == shape.numel() && shape.is_contiguous(strides) {
            return Tensor::new(storage, shape, dtype);
        }
        let indices = cartesian_offsets(shape.dims(), |_, p| p, strides, offset)?;
        let selected = storage.select(&indices)?;
        Tensor::new(selected, shape, dtype)
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// `numel * dtype width`.
    pub fn byte_size(&self) -> usize {
        self.numel().saturating_mul(self.dtype.size_in_bytes())
    }

    /// Returns the underlying storage reference.
    pub fn storage(&self) -> &CpuStorage {
        &self.storage
    }

    /// Element at row-major position `index`.
    pub fn element(&self, index: usize) -> Option<Element> {
        self.storage.element(index)
    }

    /// Overwrite the element at row-major position `index`.
    pub fn set(&mut self, index: usize, value: &Element) -> Result<()> {
        self.storage.set(index, value)
    }

    /// Multi-axis coordinates of row-major position `index`.
    pub fn unravel(&self, index: usize) -> Vec<usize> {
        let mut rest = index;
        let mut coords = vec![0; self.shape.ndim()];
        for (axis, &d) in self.shape.dims().iter().enumerate().rev() {
            if d > 0 {
                coords[axis] = rest % d;
                rest /= d;
            }
        }
        coords
    }

    /// Reshape the tensor, returning a new tensor with the same data but
    /// a different shape.
    ///
    /// The total number of elements must remain the same.
    pub fn reshape(&self, new_shape: Shape) -> Result<Tensor> {
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: new_shape,
            dtype: self.dtype,
        })
    }

    /// Copy the elements at the given row-major positions into a new tensor
    /// of `shape`.
    pub fn select(&self, indices: &[usize], shape: Shape) -> Result<Tensor> {
        let storage = self.storage.select(indices)?;
        Tensor::new(storage, shape, self.dtype)
    }

    /// Render the whole tensor as nested lists.
    pub fn to_nested(&self) -> Nested {
        let values = (0..self.numel()).filter_map(|i| self.element(i)).collect();
        Nested::from_flat(values, self.shape.dims())
    }

    /// Serialize the elements little-endian, row-major.
    pub fn to_le_bytes(&self) -> Result<Vec<u8>> {
        self.storage.to_le_bytes(self.dtype)
    }
}

/// Row-major enumeration of `offset + sum(coord(k, i_k) * strides[k])` over
/// every position `i` of an index space with per-axis lengths `lens`.
///
/// Fails with `OutOfMemory` when the position count cannot be allocated and
/// with `Other` when an offset overflows.
pub(crate) fn cartesian_offsets(
    lens: &[usize],
    coord: impl Fn(usize, usize) -> usize,
    strides: &[usize],
    offset: usize,
) -> Result<Vec<usize>> {
    let oom = |elements| TensorError::OutOfMemory {
        dtype: "index".to_string(),
        elements,
    };
    let total = lens
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .ok_or_else(|| oom(usize::MAX))?;
    let mut out = Vec::new();
    out.try_reserve_exact(total).map_err(|_| oom(total))?;
    if total == 0 {
        return Ok(out);
    }
    let mut pos = vec![0usize; lens.len()];
    loop {
        let mut off = offset;
        for (axis, &p) in pos.iter().enumerate() {
            off = coord(axis, p)
                .checked_mul(strides[axis])
                .and_then(|step| off.checked_add(step))
                .ok_or_else(|| TensorError::Other("strided offset overflows".to_string()))?;
        }
        out.push(off);

        let mut axis = lens.len();
        loop {
            if axis == 0 {
                return Ok(out);
            }
            axis -= 1;
            pos[axis] += 1;
            if pos[axis] < lens[axis] {
                break;
            }
            pos[axis] = 0;
        }
    }
}
