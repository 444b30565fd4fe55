//! # `HRNet` Stem
//!
//! Two stride-2 3x3 conv/norm layers (the first without an activation)
//! bring the input to 1/4 resolution; a stack of [`BottleneckBlock`]s
//! then widens it to ``out_channels``.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::ConvBlockMeta;
use crate::layers::blocks::cna::{CNA2d, CnaPolicy};
use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig};
use crate::models::hrnet::bottleneck::{BottleneckBlock, BottleneckBlockConfig};
use crate::models::hrnet::residual::ResidualBlockMeta;
use crate::models::hrnet::util::{
    HE_NORMAL_INITIALIZER, same_padding, scalar_to_array, strided_resolution,
};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::Initializer;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`HrNetStem`] Meta trait.
pub trait HrNetStemMeta {
    /// Input image channels.
    fn in_channels(&self) -> usize;

    /// Output feature channels.
    fn out_channels(&self) -> usize;

    /// Output resolution for an input resolution.
    ///
    /// The stem downsamples by 4.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        strided_resolution(strided_resolution(input_resolution, 2), 2)
    }
}

/// [`HrNetStem`] Config.
#[derive(Config, Debug)]
pub struct HrNetStemConfig {
    /// Input image channels.
    pub in_channels: usize,

    /// Width of the two strided convolutions.
    #[config(default = 64)]
    pub stem_channels: usize,

    /// Output width of the bottleneck stack.
    #[config(default = 256)]
    pub out_channels: usize,

    /// Number of bottleneck blocks.
    #[config(default = 4)]
    pub num_blocks: usize,

    /// Normalization config.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// The conv initializer.
    #[config(default = "HE_NORMAL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl HrNetStemMeta for HrNetStemConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }
}

impl HrNetStemConfig {
    /// The bottleneck block configs, in order.
    ///
    /// The first block projects ``stem_channels -> out_channels``.
    pub fn block_configs(&self) -> Vec<BottleneckBlockConfig> {
        (0..self.num_blocks)
            .map(|idx| {
                let in_planes = if idx == 0 {
                    self.stem_channels
                } else {
                    self.out_channels
                };
                BottleneckBlockConfig::new(in_planes, self.out_channels)
                    .with_conv_shortcut(idx == 0)
                    .with_normalization(self.normalization.clone())
                    .with_initializer(self.initializer.clone())
            })
            .collect()
    }

    /// Initialize a [`HrNetStem`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> HrNetStem<B> {
        assert!(self.num_blocks > 0, "stem requires at least one bottleneck block");

        let conv1 = ConvNorm2dConfig::new(
            Conv2dConfig::new([self.in_channels, self.stem_channels], scalar_to_array(3))
                .with_stride(scalar_to_array(2))
                .with_padding(same_padding(3))
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        )
        .with_norm(self.normalization.clone());

        let conv2 = CnaPolicy {
            norm: self.normalization.clone(),
            act: ActivationConfig::Relu,
        }
        .wrap(
            Conv2dConfig::new([self.stem_channels, self.stem_channels], scalar_to_array(3))
                .with_stride(scalar_to_array(2))
                .with_padding(same_padding(3))
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        );

        HrNetStem {
            conv1: conv1.init(device),
            conv2: conv2.init(device),
            blocks: self
                .block_configs()
                .into_iter()
                .map(|cfg| cfg.init(device))
                .collect(),
        }
    }
}

/// `HRNet` stem: ``[batch, in_channels, h, w] -> [batch, out_channels, h/4, w/4]``.
#[derive(Module, Debug)]
pub struct HrNetStem<B: Backend> {
    /// First stride-2 conv/norm; no activation.
    pub conv1: ConvNorm2d<B>,

    /// Second stride-2 conv/norm/act.
    pub conv2: CNA2d<B>,

    /// Bottleneck stack.
    pub blocks: Vec<BottleneckBlock<B>>,
}

impl<B: Backend> HrNetStemMeta for HrNetStem<B> {
    fn in_channels(&self) -> usize {
        self.conv1.in_channels()
    }

    fn out_channels(&self) -> usize {
        match self.blocks.last() {
            Some(block) => block.out_planes(),
            None => self.conv2.out_channels(),
        }
    }
}

impl<B: Backend> HrNetStem<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, ceil(ceil(height/2)/2), ceil(ceil(width/2)/2)]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("in_channels", self.in_channels())],
        );
        let [out_height, out_width] = self.output_resolution([height, width]);

        let x = self.conv1.forward(input);
        let x = self.conv2.forward(x);
        let x = self
            .blocks
            .iter()
            .fold(x, |x, block| block.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width),
            ]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    #[test]
    fn test_stem_config() {
        let config = HrNetStemConfig::new(3);
        assert_eq!(config.in_channels(), 3);
        assert_eq!(config.out_channels(), 256);
        assert_eq!(config.output_resolution([512, 512]), [128, 128]);
        assert_eq!(config.output_resolution([30, 18]), [8, 5]);

        let blocks = config.block_configs();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].in_planes, 64);
        assert!(blocks[0].conv_shortcut);
        assert!(blocks[1..].iter().all(|b| b.in_planes == 256 && !b.needs_projection()));
    }

    #[test]
    fn test_stem_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let stem: HrNetStem<B> = HrNetStemConfig::new(3)
            .with_stem_channels(8)
            .with_out_channels(16)
            .with_num_blocks(2)
            .init(&device);
        assert_eq!(stem.in_channels(), 3);
        assert_eq!(stem.out_channels(), 16);
        assert_eq!(stem.blocks.len(), 2);

        let output = stem.forward(Tensor::ones([2, 3, 17, 12], &device));
        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &output,
            &[("batch", 2), ("channels", 16), ("height", 5), ("width", 3)]
        );
    }

    #[test]
    fn test_first_block_projects_equal_widths() {
        type B = NdArray<f32>;
        let device = Default::default();

        let stem: HrNetStem<B> = HrNetStemConfig::new(3)
            .with_stem_channels(8)
            .with_out_channels(8)
            .with_num_blocks(2)
            .init(&device);
        assert!(stem.blocks[0].shortcut.is_some());
        assert!(stem.blocks[1].shortcut.is_none());
    }
}
