//! # Bottleneck Residual Block
//!
//! The stem's residual unit. Work happens at a reduced width,
//! ``pinch = out_planes / expansion``:
//!
//! ```text
//! x -> 1x1 CNA (-> pinch) -> 3x3 CNA (stride) -> 1x1 conv/norm (-> out)
//!   -> (+ shortcut(x)) -> act
//! ```

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::error::{HrSegError, HrSegResult};
use crate::layers::blocks::ConvBlockMeta;
use crate::layers::blocks::cna::{CNA2d, CnaPolicy};
use crate::models::hrnet::residual::{
    ProjectionShortcut, ProjectionShortcutConfig, ResidualBlockMeta, needs_projection,
    shortcut_path,
};
use crate::models::hrnet::util::{HE_NORMAL_INITIALIZER, same_padding, scalar_to_array};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::Initializer;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Config, Module, Tensor};

/// Default ratio of `out_planes` to the pinch width.
pub const BOTTLENECK_EXPANSION: usize = 4;

/// [`BottleneckBlock`] Config.
#[derive(Config, Debug)]
pub struct BottleneckBlockConfig {
    /// Input planes.
    pub in_planes: usize,

    /// Output planes; a multiple of `expansion`.
    pub out_planes: usize,

    /// Ratio of `out_planes` to the pinch width.
    #[config(default = "BOTTLENECK_EXPANSION")]
    pub expansion: usize,

    /// Stride of the 3x3 conv, and of the projection.
    #[config(default = 1)]
    pub stride: usize,

    /// Project the shortcut even when the shapes already agree.
    #[config(default = false)]
    pub conv_shortcut: bool,

    /// Normalization, resized per layer.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// Hidden activation.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,

    /// The conv initializer.
    #[config(default = "HE_NORMAL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl ResidualBlockMeta for BottleneckBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        self.out_planes
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl BottleneckBlockConfig {
    /// Internal width.
    pub fn pinch_planes(&self) -> usize {
        self.out_planes / self.expansion.max(1)
    }

    /// Will [`BottleneckBlockConfig::init`] build a projection shortcut?
    pub fn needs_projection(&self) -> bool {
        needs_projection(
            self.in_planes,
            self.out_planes,
            self.stride,
            self.conv_shortcut,
        )
    }

    /// Check that `expansion` divides `out_planes`.
    pub fn try_validate(&self) -> HrSegResult<()> {
        if self.expansion == 0 || self.out_planes % self.expansion != 0 {
            return Err(HrSegError::InvalidConfig(format!(
                "bottleneck out_planes ({}) must be a positive multiple of the expansion ({})",
                self.out_planes, self.expansion
            )));
        }
        Ok(())
    }

    fn conv(
        &self,
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
    ) -> Conv2dConfig {
        Conv2dConfig::new(channels, scalar_to_array(kernel))
            .with_stride(scalar_to_array(stride))
            .with_padding(same_padding(kernel))
            .with_initializer(self.initializer.clone())
            .with_bias(false)
    }

    /// Initialize a [`BottleneckBlock`].
    ///
    /// # Panics
    ///
    /// If [`BottleneckBlockConfig::try_validate`] fails.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> BottleneckBlock<B> {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }
        let pinch = self.pinch_planes();

        let shortcut = self.needs_projection().then(|| {
            ProjectionShortcutConfig::new(self.in_planes, self.out_planes)
                .with_stride(self.stride)
                .with_norm(self.normalization.clone())
                .with_initializer(self.initializer.clone())
                .init(device)
        });

        let policy = CnaPolicy::new()
            .with_norm(self.normalization.clone())
            .with_act(self.activation.clone());

        BottleneckBlock {
            shortcut,
            cna1: policy
                .wrap(self.conv([self.in_planes, pinch], 1, 1))
                .init(device),
            cna2: policy
                .wrap(self.conv([pinch, pinch], 3, self.stride))
                .init(device),
            cna3: policy
                .wrap(self.conv([pinch, self.out_planes], 1, 1))
                .init(device),
        }
    }
}

/// Three-layer bottleneck residual block.
#[derive(Module, Debug)]
pub struct BottleneckBlock<B: Backend> {
    /// Projection; the shortcut is the raw input when absent.
    pub shortcut: Option<ProjectionShortcut<B>>,

    /// 1x1 reduction.
    pub cna1: CNA2d<B>,

    /// Strided 3x3 at pinch width.
    pub cna2: CNA2d<B>,

    /// 1x1 expansion; the shortcut is added before its activation.
    pub cna3: CNA2d<B>,
}

impl<B: Backend> ResidualBlockMeta for BottleneckBlock<B> {
    fn in_planes(&self) -> usize {
        self.cna1.in_channels()
    }

    fn out_planes(&self) -> usize {
        self.cna3.out_channels()
    }

    fn stride(&self) -> usize {
        self.cna2.stride()[0]
    }
}

impl<B: Backend> BottleneckBlock<B> {
    /// Internal width.
    pub fn pinch_planes(&self) -> usize {
        self.cna1.out_channels()
    }

    /// Forward Pass.
    ///
    /// ``[b, in_planes, h, w]`` to ``[b, out_planes, ceil(h/s), ceil(w/s)]``.
    /// The shortcut reads this block's own input.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "planes", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("planes", self.in_planes())],
        );
        let [out_height, out_width] = self.output_resolution([height, width]);

        let residual = shortcut_path(self.shortcut.as_ref(), &input);

        let x = self.cna1.forward(input);
        assert_shape_contract_periodically!(
            ["batch", "pinch", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("pinch", self.pinch_planes()),
                ("height", height),
                ("width", width),
            ]
        );

        let x = self.cna2.forward(x);
        let x = self.cna3.hook_forward(x, |x| x + residual);

        assert_shape_contract_periodically!(
            ["batch", "planes", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("planes", self.out_planes()),
                ("height", out_height),
                ("width", out_width),
            ]
        );
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};

    type B = NdArray<f32>;

    #[test]
    fn test_stem_shaped_config() {
        let config = BottleneckBlockConfig::new(64, 256);
        assert_eq!(config.pinch_planes(), 64);
        assert!(config.needs_projection());
        assert!(config.try_validate().is_ok());
        assert!(!BottleneckBlockConfig::new(256, 256).needs_projection());

        let config = config.with_expansion(2);
        assert_eq!(config.pinch_planes(), 128);
    }

    #[test]
    fn test_indivisible_planes() {
        assert_eq!(
            BottleneckBlockConfig::new(16, 30).try_validate(),
            Err(HrSegError::InvalidConfig(
                "bottleneck out_planes (30) must be a positive multiple of the expansion (4)"
                    .to_string()
            ))
        );
        assert!(
            BottleneckBlockConfig::new(16, 16)
                .with_expansion(0)
                .try_validate()
                .is_err()
        );
    }

    #[test]
    #[should_panic(expected = "must be a positive multiple of the expansion")]
    fn test_init_rejects_indivisible_planes() {
        let _block: BottleneckBlock<B> =
            BottleneckBlockConfig::new(16, 30).init(&Default::default());
    }

    #[test]
    fn test_projected_block_autodiff() {
        type AB = Autodiff<B>;
        let device = Default::default();

        let block: BottleneckBlock<AB> = BottleneckBlockConfig::new(4, 16)
            .with_conv_shortcut(true)
            .init(&device);
        assert!(block.shortcut.is_some());
        assert_eq!(block.pinch_planes(), 4);

        let output = block.forward(Tensor::ones([2, 4, 6, 6], &device));
        assert_shape_contract!(
            ["batch", "planes", "height", "width"],
            &output,
            &[("batch", 2), ("planes", 16), ("height", 6), ("width", 6)],
        );
    }

    #[test]
    fn test_strided_block() {
        let device = Default::default();
        let block: BottleneckBlock<B> = BottleneckBlockConfig::new(8, 8)
            .with_stride(2)
            .init(&device);
        assert_eq!(block.stride(), 2);
        assert_eq!(block.output_resolution([7, 10]), [4, 5]);

        let output = block.forward(Tensor::ones([1, 8, 7, 10], &device));
        assert_eq!(output.dims(), [1, 8, 4, 5]);
    }
}
