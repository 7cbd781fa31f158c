use std::fmt;

/// Dimensions of a tensor, outermost first. Rank 0 is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    pub fn from_slice(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Element count; 1 for a scalar, 0 when any axis is empty. Saturates at
    /// `usize::MAX`.
    pub fn numel(&self) -> usize {
        self.dims.iter().fold(1usize, |acc, &d| acc.saturating_mul(d))
    }

    /// Element count, or `None` when it does not fit in `usize`.
    pub fn checked_numel(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn last_dim(&self) -> Option<usize> {
        self.dims.last().copied()
    }

    /// Row-major strides in elements.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1usize; self.dims.len()];
        for axis in (0..self.dims.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * self.dims[axis + 1];
        }
        strides
    }

    /// Column-major strides in elements, as stored by Fortran-ordered arrays.
    pub fn fortran_strides(&self) -> Vec<usize> {
        self.dims
            .iter()
            .scan(1usize, |acc, &d| {
                let stride = *acc;
                *acc *= d;
                Some(stride)
            })
            .collect()
    }

    /// Whether `strides` walk this shape in row-major order. Unit axes may
    /// carry any stride.
    pub fn is_contiguous(&self, strides: &[usize]) -> bool {
        strides.len() == self.dims.len()
            && self
                .dims
                .iter()
                .zip(strides)
                .zip(self.strides())
                .all(|((&d, &s), e)| d <= 1 || s == e)
    }

    /// `(prod(leading dims), last dim)`: the 2-D view previews use.
    /// Scalars are `(1, 1)` and vectors a single row.
    pub fn fold_last(&self) -> (usize, usize) {
        match self.dims.split_last() {
            None => (1, 1),
            Some((&last, leading)) => (leading.iter().product(), last),
        }
    }

    /// `(shape[0], prod(rest))`: the 2-D view tables and heatmaps use.
    /// Scalars are `(1, 1)` and vectors a single column.
    pub fn fold_first(&self) -> (usize, usize) {
        match self.dims.split_first() {
            None => (1, 1),
            Some((&first, rest)) => (first, rest.iter().product()),
        }
    }

    /// `3 × 4 × 10`, or `scalar` for rank 0. Used in user-facing messages.
    pub fn display_dims(&self) -> String {
        if self.dims.is_empty() {
            return "scalar".to_string();
        }
        let parts: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        parts.join(" × ")
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strides_both_orders() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.numel(), 24);
        assert_eq!(s.strides(), vec![12, 4, 1]);
        assert_eq!(s.fortran_strides(), vec![1, 2, 6]);
        assert!(Shape::new(vec![]).strides().is_empty());
    }

    #[test]
    fn test_contiguity_ignores_unit_axes() {
        let s = Shape::new(vec![2, 3, 4]);
        assert!(s.is_contiguous(&[12, 4, 1]));
        assert!(!s.is_contiguous(&[12, 1, 4]));
        assert!(!s.is_contiguous(&[4, 1]));
        assert!(Shape::new(vec![1, 4]).is_contiguous(&[7, 1]));
    }

    #[test]
    fn test_folds() {
        let cube = Shape::new(vec![3, 4, 10]);
        assert_eq!(cube.fold_last(), (12, 10));
        assert_eq!(cube.fold_first(), (3, 40));
        assert_eq!(Shape::new(vec![5]).fold_last(), (1, 5));
        assert_eq!(Shape::new(vec![5]).fold_first(), (5, 1));
        assert_eq!(Shape::new(vec![]).fold_first(), (1, 1));
        assert_eq!(Shape::new(vec![0, 7]).fold_first(), (0, 7));
    }

    #[test]
    fn test_scalar_and_empty() {
        let s = Shape::new(vec![]);
        assert_eq!(s.numel(), 1);
        assert_eq!(s.last_dim(), None);
        assert_eq!(s.display_dims(), "scalar");
        assert_eq!(Shape::new(vec![3, 0, 5]).numel(), 0);
    }

    #[test]
    fn test_numel_overflow() {
        let huge = Shape::new(vec![usize::MAX, 2]);
        assert_eq!(huge.numel(), usize::MAX);
        assert_eq!(huge.checked_numel(), None);
        assert_eq!(Shape::new(vec![usize::MAX, 2, 0]).numel(), 0);
        assert_eq!(Shape::new(vec![2, 3]).checked_numel(), Some(6));
    }

    #[test]
    fn test_display() {
        let s = Shape::new(vec![3, 4, 10]);
        assert_eq!(s.to_string(), "[3, 4, 10]");
        assert_eq!(s.display_dims(), "3 × 4 × 10");
    }
}
