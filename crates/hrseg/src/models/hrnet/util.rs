//! # `HRNet` Utilities
use burn::nn::{Initializer, PaddingConfig2d};

/// He-normal initialization; for convolutions feeding a `ReLU`.
///
/// ``std = sqrt(2 / fan_in)``
pub static HE_NORMAL_INITIALIZER: Initializer = Initializer::KaimingNormal {
    gain: core::f64::consts::SQRT_2,
    fan_out_only: false,
};

/// Broadcast a scalar to a `[T; D]` array.
#[inline(always)]
pub fn scalar_to_array<const D: usize, T: Copy>(v: T) -> [T; D] {
    [v; D]
}

/// "Same" padding for an odd square kernel.
///
/// With this padding, a stride `s` convolution maps `n` to `ceil(n / s)`.
///
/// # Panics
///
/// If the kernel size is even.
pub fn same_padding(kernel_size: usize) -> PaddingConfig2d {
    assert!(
        kernel_size % 2 == 1,
        "same padding requires an odd kernel: {kernel_size}"
    );
    let pad = kernel_size / 2;
    PaddingConfig2d::Explicit(pad, pad)
}

/// Get the output resolution of a "same"-padded convolution.
///
/// # Arguments
///
/// - `input_resolution`: ``[in_height, in_width]``.
/// - `stride`: the convolution stride; must be > 0.
///
/// # Returns
///
/// ``[ceil(in_height / stride), ceil(in_width / stride)]``
#[inline(always)]
pub fn strided_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    assert!(stride > 0, "stride must be > 0");
    input_resolution.map(|size| size.div_ceil(stride))
}
