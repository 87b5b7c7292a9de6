//! Packing of ragged row segments into a dense padded tensor.
//!
//! A `[sum(lengths), ...]` tensor holding consecutive variable-length segments
//! is laid out as `[lengths.len(), max_length, ...]`: segment `s` occupies
//! rows `0..lengths[s]` of slot `s` and the remaining rows are zero.

use ndarray::{ArrayD, Axis, IxDyn, Slice};

use crate::ndarray_backend::NdArrayTensor;
use crate::tensor::Tensor;
use crate::{TensorError, TensorResult};

/// Packs consecutive segments of `data` into a zero-padded tensor.
///
/// # Errors
///
/// Fails if a segment is longer than `max_length`, or if `lengths` asks for
/// more rows than `data` holds.
///
/// # Examples
///
/// ```
/// use embshard_tensor::{pack_segments, NdArrayTensor, Tensor};
///
/// let data = NdArrayTensor::from_vec(vec![1.0, 2.0, 3.0], &[3, 1]).unwrap();
/// let packed = pack_segments(&data, &[1, 2], 2).unwrap();
/// assert_eq!(packed.shape(), &[2, 2, 1]);
/// assert_eq!(packed.to_vec(), vec![1.0, 0.0, 2.0, 3.0]);
/// ```
pub fn pack_segments(
    data: &NdArrayTensor,
    lengths: &[usize],
    max_length: usize,
) -> TensorResult<NdArrayTensor> {
    if data.ndim() == 0 {
        return Err(TensorError::InvalidShape(
            "cannot pack segments of a scalar".to_string(),
        ));
    }
    let available = data.rows();
    let requested: usize = lengths.iter().sum();
    if requested > available {
        return Err(TensorError::InvalidShape(format!(
            "segment lengths request {requested} rows, source has {available}"
        )));
    }
    if let Some(&too_long) = lengths.iter().find(|&&l| l > max_length) {
        return Err(TensorError::InvalidShape(format!(
            "segment of length {too_long} exceeds max_length {max_length}"
        )));
    }

    let mut shape = vec![lengths.len(), max_length];
    shape.extend_from_slice(&data.shape()[1..]);
    let mut packed = ArrayD::<f32>::zeros(IxDyn(&shape));

    let source = data.as_ndarray();
    let mut offset = 0usize;
    for (s, &len) in lengths.iter().enumerate() {
        if len > 0 {
            let rows = source.slice_axis(Axis(0), Slice::from(offset..offset + len));
            packed
                .index_axis_mut(Axis(0), s)
                .slice_axis_mut(Axis(0), Slice::from(0..len))
                .assign(&rows);
        }
        offset += len;
    }

    Ok(NdArrayTensor::from_ndarray(packed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_pads_with_zeros() {
        // Segments of 3, 5 and 2 rows, width 2.
        let rows = 10;
        let data: Vec<f32> = (1..=rows * 2).map(|v| v as f32).collect();
        let t = NdArrayTensor::from_vec(data, &[rows, 2]).unwrap();
        let packed = pack_segments(&t, &[3, 5, 2], 5).unwrap();
        assert_eq!(packed.shape(), &[3, 5, 2]);

        let flat = packed.view_rows(15).unwrap();
        // Segment 0: rows 0..3 copied, rows 3 and 4 zero.
        assert_eq!(flat.row(0).unwrap(), vec![1.0, 2.0]);
        assert_eq!(flat.row(2).unwrap(), vec![5.0, 6.0]);
        assert_eq!(flat.row(3).unwrap(), vec![0.0, 0.0]);
        assert_eq!(flat.row(4).unwrap(), vec![0.0, 0.0]);
        // Segment 1 starts with source row 3.
        assert_eq!(flat.row(5).unwrap(), vec![7.0, 8.0]);
        assert_eq!(flat.row(9).unwrap(), vec![15.0, 16.0]);
        // Segment 2: two rows then padding.
        assert_eq!(flat.row(10).unwrap(), vec![17.0, 18.0]);
        assert_eq!(flat.row(12).unwrap(), vec![0.0, 0.0]);
        assert_eq!(flat.sum(), (1..=20).sum::<i32>() as f32);
    }

    #[test]
    fn test_pack_rejects_overlong_segment() {
        let t = NdArrayTensor::zeros(&[4, 2]);
        let err = pack_segments(&t, &[3, 1], 2).unwrap_err();
        assert!(err.to_string().contains("exceeds max_length"));
    }

    #[test]
    fn test_pack_rejects_missing_rows() {
        let t = NdArrayTensor::zeros(&[4, 2]);
        let err = pack_segments(&t, &[3, 3], 3).unwrap_err();
        assert!(err.to_string().contains("source has 4"));
    }

    #[test]
    fn test_pack_empty_segments() {
        let t = NdArrayTensor::zeros(&[0, 3]);
        let packed = pack_segments(&t, &[0, 0], 0).unwrap();
        assert_eq!(packed.shape(), &[2, 0, 3]);
    }
}
