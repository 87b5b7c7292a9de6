//! Dense tensors for sharded embedding outputs.
//!
//! This crate provides the [`Tensor`] trait, its ndarray-backed implementation
//! [`NdArrayTensor`], and [`pack_segments`], which lays ragged per-rank row
//! segments out as a rectangular zero-padded buffer suitable for a
//! reduce-scatter.
//!
//! # Example
//!
//! ```rust
//! use embshard_tensor::{pack_segments, NdArrayTensor, Tensor};
//!
//! // Rank 0 contributes 2 rows, rank 1 contributes 3 rows.
//! let local = NdArrayTensor::filled(&[5, 4], 1.0);
//! let packed = pack_segments(&local, &[2, 3], 3).unwrap();
//! let flat = packed.view_rows(6).unwrap();
//! assert_eq!(flat.shape(), &[6, 4]);
//! assert_eq!(flat.row(2).unwrap(), vec![0.0; 4]);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod ndarray_backend;
pub mod pack;
pub mod tensor;

pub use ndarray_backend::NdArrayTensor;
pub use pack::pack_segments;
pub use tensor::Tensor;

/// Failures of shape-changing tensor operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TensorError {
    /// Two shapes that must agree do not.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Shape the operation required.
        expected: Vec<usize>,
        /// Shape it was given.
        got: Vec<usize>,
    },

    /// A shape, index, or range is unusable for the operation.
    #[error("invalid shape: {0}")]
    InvalidShape(String),
}

/// Shorthand for results of tensor operations.
pub type TensorResult<T> = Result<T, TensorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_then_narrow_recovers_segment() {
        let local = NdArrayTensor::filled(&[4, 2], 3.0);
        let packed = pack_segments(&local, &[1, 3], 3).unwrap();
        let flat = packed.view_rows(6).unwrap();
        let second = flat.narrow(0, 3, 3).unwrap();
        assert_eq!(second.to_vec(), vec![3.0; 6]);
        assert_eq!(second.ndim(), 2);
    }

    #[test]
    fn test_error_messages() {
        let err = TensorError::ShapeMismatch {
            expected: vec![2, 3],
            got: vec![3, 2],
        };
        assert_eq!(err.to_string(), "shape mismatch: expected [2, 3], got [3, 2]");
        let err = TensorError::InvalidShape("bad".to_string());
        assert_eq!(err.to_string(), "invalid shape: bad");
    }
}
