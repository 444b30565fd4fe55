//! # Bilinear Resize
//!
//! `HRNet` moves features between resolutions with bilinear resizing
//! using *align-corners* semantics: the four corner pixels of the input
//! and output grids map exactly onto each other.
//!
//! ``burn``'s [`InterpolateMode::Bilinear`] samples with this convention.

use burn::prelude::{Backend, Tensor};
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

/// Resize a ``[batch, channels, height, width]`` tensor to `size`.
///
/// A no-op when the tensor is already at `size`.
///
/// # Arguments
///
/// - `input`: ``[batch, channels, in_height, in_width]``.
/// - `size`: ``[out_height, out_width]``.
///
/// # Returns
///
/// ``[batch, channels, out_height, out_width]``
pub fn resize_bilinear<B: Backend>(
    input: Tensor<B, 4>,
    size: [usize; 2],
) -> Tensor<B, 4> {
    let [_, _, in_height, in_width] = input.dims();
    if [in_height, in_width] == size {
        return input;
    }

    interpolate(
        input,
        size,
        InterpolateOptions::new(InterpolateMode::Bilinear),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Tolerance;

    type B = NdArray<f32>;

    #[test]
    fn test_resize_identity() {
        let device = Default::default();
        let input: Tensor<B, 4> = Tensor::from_data([[[[1.0, 2.0], [3.0, 4.0]]]], &device);

        let output = resize_bilinear(input.clone(), [2, 2]);
        output.to_data().assert_eq(&input.to_data(), true);
    }

    #[test]
    fn test_resize_align_corners() {
        let device = Default::default();
        let input: Tensor<B, 4> = Tensor::from_data([[[[0.0, 2.0], [4.0, 6.0]]]], &device);

        let output = resize_bilinear(input, [3, 3]);
        assert_eq!(output.dims(), [1, 1, 3, 3]);

        // Corners map exactly; centers interpolate halfway.
        let expected: Tensor<B, 4> = Tensor::from_data(
            [[[[0.0, 1.0, 2.0], [2.0, 3.0, 4.0], [4.0, 5.0, 6.0]]]],
            &device,
        );
        output
            .to_data()
            .assert_approx_eq::<f32>(&expected.to_data(), Tolerance::default());
    }

    #[test]
    fn test_resize_upsample_keeps_endpoints() {
        let device = Default::default();
        let input: Tensor<B, 4> = Tensor::from_data([[[[0.0, 3.0]]]], &device);

        // Half-pixel sampling would give [0, 0.75, 2.25, 3].
        let output = resize_bilinear(input, [1, 4]);
        let expected: Tensor<B, 4> = Tensor::from_data([[[[0.0, 1.0, 2.0, 3.0]]]], &device);
        output
            .to_data()
            .assert_approx_eq::<f32>(&expected.to_data(), Tolerance::default());
    }
}
