//! # Residual plumbing
//!
//! Shared by [`super::basic_block`] and [`super::bottleneck`]: the meta API
//! every residual block reports, and the shortcut path joined into the last
//! conv/norm/act layer of the block.
//!
//! The shortcut is the block input itself when the block keeps both width
//! and resolution. Otherwise it is a [`ProjectionShortcut`]: a strided 1x1
//! convolution followed by normalization.

use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::ConvBlockMeta;
use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig};
use crate::models::hrnet::util::{HE_NORMAL_INITIALIZER, scalar_to_array, strided_resolution};
use burn::nn::Initializer;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Config, Module, Tensor};

/// Common meta API of residual blocks and their configs.
pub trait ResidualBlockMeta {
    /// Input planes.
    fn in_planes(&self) -> usize;

    /// Output planes.
    fn out_planes(&self) -> usize;

    /// Spatial stride of the block.
    fn stride(&self) -> usize;

    /// ``[ceil(h / stride), ceil(w / stride)]``.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        strided_resolution(input_resolution, self.stride())
    }
}

/// Does a block with this geometry need a [`ProjectionShortcut`]?
pub fn needs_projection(
    in_planes: usize,
    out_planes: usize,
    stride: usize,
    force: bool,
) -> bool {
    force || stride != 1 || in_planes != out_planes
}

/// [`ProjectionShortcut`] Config.
#[derive(Config, Debug)]
pub struct ProjectionShortcutConfig {
    /// Input channels.
    pub in_channels: usize,

    /// Output channels.
    pub out_channels: usize,

    /// Projection stride.
    #[config(default = 1)]
    pub stride: usize,

    /// Normalization after the projection.
    #[config(default = "NormalizationConfig::default()")]
    pub norm: NormalizationConfig,

    /// The conv initializer.
    #[config(default = "HE_NORMAL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl ProjectionShortcutConfig {
    /// Initialize a [`ProjectionShortcut`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ProjectionShortcut<B> {
        let conv = Conv2dConfig::new([self.in_channels, self.out_channels], [1, 1])
            .with_stride(scalar_to_array(self.stride))
            .with_initializer(self.initializer)
            .with_bias(false);

        ProjectionShortcut {
            conv_norm: ConvNorm2dConfig::new(conv)
                .with_norm(self.norm)
                .init(device),
        }
    }
}

/// 1x1 conv/norm projection onto the residual's shape.
#[derive(Module, Debug)]
pub struct ProjectionShortcut<B: Backend> {
    /// Projection.
    pub conv_norm: ConvNorm2d<B>,
}

impl<B: Backend> ConvBlockMeta for ProjectionShortcut<B> {
    fn in_channels(&self) -> usize {
        self.conv_norm.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv_norm.out_channels()
    }

    fn stride(&self) -> [usize; 2] {
        self.conv_norm.stride()
    }
}

impl<B: Backend> ProjectionShortcut<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.conv_norm.forward(input)
    }
}

/// The shortcut value for `input`: projected when a projection exists,
/// otherwise `input` unchanged.
pub fn shortcut_path<B: Backend>(
    projection: Option<&ProjectionShortcut<B>>,
    input: &Tensor<B, 4>,
) -> Tensor<B, 4> {
    match projection {
        Some(projection) => projection.forward(input.clone()),
        None => input.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_needs_projection() {
        assert!(!needs_projection(32, 32, 1, false));
        assert!(needs_projection(32, 32, 1, true));
        assert!(needs_projection(32, 32, 2, false));
        assert!(needs_projection(32, 64, 1, false));
    }

    #[test]
    fn test_projection_geometry() {
        let device = Default::default();
        let projection: ProjectionShortcut<B> = ProjectionShortcutConfig::new(2, 4)
            .with_stride(2)
            .init(&device);
        assert_eq!(projection.in_channels(), 2);
        assert_eq!(projection.out_channels(), 4);
        assert_eq!(projection.stride(), [2, 2]);

        let output = projection.forward(Tensor::ones([3, 2, 7, 8], &device));
        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &output,
            &[("batch", 3), ("channels", 4), ("height", 4), ("width", 4)]
        );
    }

    #[test]
    fn test_identity_path_is_input() {
        let device = Default::default();
        let input: Tensor<B, 4> =
            Tensor::random([1, 3, 4, 4], burn::tensor::Distribution::Default, &device);

        shortcut_path(None, &input)
            .into_data()
            .assert_eq(&input.into_data(), true);
    }
}
