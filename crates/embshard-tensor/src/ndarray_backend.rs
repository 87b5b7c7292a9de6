//! ndarray-based tensor backend implementation.
//!
//! This module provides [`NdArrayTensor`], a tensor implementation backed by
//! the `ndarray` crate. Besides the [`Tensor`] trait it carries the row-level
//! layout operations used on pooled embeddings: narrowing, reshaping, splitting
//! into equal row blocks and concatenating them back.

use ndarray::{ArrayD, Axis, IxDyn, Slice};

use crate::tensor::Tensor;
use crate::{TensorError, TensorResult};

/// A tensor backed by ndarray's ArrayD.
///
/// # Examples
///
/// ```
/// use embshard_tensor::{Tensor, NdArrayTensor};
///
/// let t = NdArrayTensor::zeros(&[2, 3, 4]);
/// assert_eq!(t.shape(), &[2, 3, 4]);
/// assert_eq!(t.numel(), 24);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct NdArrayTensor {
    data: ArrayD<f32>,
}

impl NdArrayTensor {
    /// Creates a new NdArrayTensor from an ndarray ArrayD.
    pub fn from_ndarray(data: ArrayD<f32>) -> Self {
        Self { data }
    }

    /// Creates a tensor taking ownership of `data`, checking it against `shape`.
    ///
    /// # Examples
    ///
    /// ```
    /// use embshard_tensor::{Tensor, NdArrayTensor};
    ///
    /// let t = NdArrayTensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
    /// assert_eq!(t.rows(), 2);
    /// assert!(NdArrayTensor::from_vec(vec![1.0], &[2, 2]).is_err());
    /// ```
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> TensorResult<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(TensorError::InvalidShape(format!(
                "{} elements cannot fill shape {:?}",
                data.len(),
                shape
            )));
        }
        let data = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| TensorError::InvalidShape(e.to_string()))?;
        Ok(Self { data })
    }

    /// Returns a reference to the underlying ndarray.
    pub fn as_ndarray(&self) -> &ArrayD<f32> {
        &self.data
    }

    /// Returns the size of the leading dimension (0 for scalars).
    pub fn rows(&self) -> usize {
        self.data.shape().first().copied().unwrap_or(0)
    }

    /// Returns the number of elements per leading-dimension row.
    pub fn row_width(&self) -> usize {
        self.data.shape().iter().skip(1).product()
    }

    /// Returns a new tensor holding `len` entries of `axis` starting at `start`.
    ///
    /// # Examples
    ///
    /// ```
    /// use embshard_tensor::{Tensor, NdArrayTensor};
    ///
    /// let t = NdArrayTensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]).unwrap();
    /// let head = t.narrow(0, 0, 2).unwrap();
    /// assert_eq!(head.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    /// ```
    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> TensorResult<Self> {
        let shape = self.data.shape();
        let Some(&size) = shape.get(axis) else {
            return Err(TensorError::InvalidShape(format!(
                "axis {axis} out of range for shape {shape:?}"
            )));
        };
        if start + len > size {
            return Err(TensorError::InvalidShape(format!(
                "narrow [{start}, {}) exceeds dimension {axis} of size {size}",
                start + len
            )));
        }
        let view = self
            .data
            .slice_axis(Axis(axis), Slice::from(start..start + len));
        Ok(Self {
            data: view.to_owned(),
        })
    }

    /// Reshapes the tensor to `new_shape`, preserving row-major element order.
    pub fn reshape(&self, new_shape: &[usize]) -> TensorResult<Self> {
        let new_numel: usize = new_shape.iter().product();
        if new_numel != self.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.data.shape().to_vec(),
                got: new_shape.to_vec(),
            });
        }
        let data = self
            .data
            .as_standard_layout()
            .into_owned()
            .into_shape(IxDyn(new_shape))
            .map_err(|e| TensorError::InvalidShape(e.to_string()))?;
        Ok(Self { data })
    }

    /// Views the tensor as a 2-D `[rows, -1]` matrix.
    ///
    /// # Examples
    ///
    /// ```
    /// use embshard_tensor::{Tensor, NdArrayTensor};
    ///
    /// let t = NdArrayTensor::zeros(&[2, 3, 4]);
    /// assert_eq!(t.view_rows(6).unwrap().shape(), &[6, 4]);
    /// ```
    pub fn view_rows(&self, rows: usize) -> TensorResult<Self> {
        let numel = self.numel();
        if rows == 0 {
            return if numel == 0 {
                self.reshape(&[0, 0])
            } else {
                Err(TensorError::InvalidShape(format!(
                    "cannot view {numel} elements as zero rows"
                )))
            };
        }
        if numel % rows != 0 {
            return Err(TensorError::InvalidShape(format!(
                "cannot view {numel} elements as {rows} rows"
            )));
        }
        self.reshape(&[rows, numel / rows])
    }

    /// Adds `other` into `self` element-wise. Shapes must match exactly.
    pub fn add_assign(&mut self, other: &Self) -> TensorResult<()> {
        if self.data.shape() != other.data.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: self.data.shape().to_vec(),
                got: other.data.shape().to_vec(),
            });
        }
        self.data += &other.data;
        Ok(())
    }

    /// Splits the leading dimension into `parts` equally sized blocks.
    pub fn split_rows(&self, parts: usize) -> TensorResult<Vec<Self>> {
        let rows = self.rows();
        if parts == 0 || rows % parts != 0 {
            return Err(TensorError::InvalidShape(format!(
                "{rows} rows cannot be split into {parts} equal blocks"
            )));
        }
        let chunk = rows / parts;
        (0..parts)
            .map(|p| self.narrow(0, p * chunk, chunk))
            .collect()
    }

    /// Returns row `i` of a 2-D tensor.
    pub fn row(&self, i: usize) -> TensorResult<Vec<f32>> {
        if i >= self.rows() {
            return Err(TensorError::InvalidShape(format!(
                "row {i} out of range for {} rows",
                self.rows()
            )));
        }
        Ok(self.data.index_axis(Axis(0), i).iter().copied().collect())
    }

    /// Returns the sum of all elements in the tensor.
    pub fn sum(&self) -> f32 {
        self.data.sum()
    }
}

impl Tensor for NdArrayTensor {
    fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    fn filled(shape: &[usize], value: f32) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(shape), value),
        }
    }

    fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: usize, cols: usize) -> NdArrayTensor {
        let data: Vec<f32> = (0..rows * cols).map(|v| v as f32).collect();
        NdArrayTensor::from_vec(data, &[rows, cols]).unwrap()
    }

    #[test]
    fn test_narrow_rows() {
        let t = matrix(4, 2);
        let mid = t.narrow(0, 1, 2).unwrap();
        assert_eq!(mid.shape(), &[2, 2]);
        assert_eq!(mid.to_vec(), vec![2.0, 3.0, 4.0, 5.0]);
        assert!(t.narrow(0, 3, 2).is_err());
        assert!(t.narrow(2, 0, 1).is_err());
    }

    #[test]
    fn test_narrow_columns() {
        let t = matrix(2, 3);
        let col = t.narrow(1, 2, 1).unwrap();
        assert_eq!(col.to_vec(), vec![2.0, 5.0]);
    }

    #[test]
    fn test_reshape_and_view_rows() {
        let t = matrix(2, 6);
        assert_eq!(t.reshape(&[3, 4]).unwrap().shape(), &[3, 4]);
        assert!(t.reshape(&[5, 2]).is_err());
        assert_eq!(t.view_rows(4).unwrap().shape(), &[4, 3]);
        assert!(t.view_rows(5).is_err());
    }

    #[test]
    fn test_view_rows_of_narrowed_columns_keeps_order() {
        let t = matrix(2, 4).narrow(1, 1, 2).unwrap();
        assert_eq!(t.view_rows(4).unwrap().to_vec(), vec![1.0, 2.0, 5.0, 6.0]);
    }

    #[test]
    fn test_add_assign() {
        let mut a = matrix(2, 2);
        a.add_assign(&NdArrayTensor::filled(&[2, 2], 1.0)).unwrap();
        assert_eq!(a.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(a.add_assign(&NdArrayTensor::filled(&[2, 3], 1.0)).is_err());
    }

    #[test]
    fn test_split_rows() {
        let t = matrix(6, 2);
        let parts = t.split_rows(3).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].to_vec(), vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(parts[2].shape(), &[2, 2]);
        assert!(t.split_rows(4).is_err());
    }

    #[test]
    fn test_row_access() {
        let t = matrix(3, 2);
        assert_eq!(t.row(2).unwrap(), vec![4.0, 5.0]);
        assert!(t.row(3).is_err());
        assert_eq!(t.rows(), 3);
        assert_eq!(t.row_width(), 2);
    }

    #[test]
    fn test_sum() {
        assert_eq!(matrix(2, 2).sum(), 6.0);
    }
}
