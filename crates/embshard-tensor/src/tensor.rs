//! The dense tensor interface pooled embeddings are carried in.

use std::fmt;

/// A row-major `f32` tensor.
///
/// Dimension 0 is the row (example) axis everywhere in the pipeline.
///
/// # Examples
///
/// ```
/// use embshard_tensor::{NdArrayTensor, Tensor};
///
/// let t = NdArrayTensor::filled(&[3, 4], 0.5);
/// assert_eq!(t.numel(), 12);
/// assert_eq!(t.to_vec()[11], 0.5);
/// ```
pub trait Tensor: Clone + fmt::Debug + Send + Sync + 'static {
    /// Returns the extent of every dimension.
    fn shape(&self) -> &[usize];

    /// A tensor of `shape` holding `value` everywhere.
    fn filled(shape: &[usize], value: f32) -> Self;

    /// A zero tensor of `shape`.
    fn zeros(shape: &[usize]) -> Self {
        Self::filled(shape, 0.0)
    }

    /// Copies the values out in row-major order.
    fn to_vec(&self) -> Vec<f32>;

    /// Returns the number of values.
    fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    /// Returns the number of dimensions.
    fn ndim(&self) -> usize {
        self.shape().len()
    }
}
