//! # `ConvNorm2d`
//!
//! Convolution followed by normalization, with the activation left to the
//! caller. Residual shortcuts and the cross-resolution fuse paths sum
//! several of these before a single activation.

use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use crate::layers::blocks::ConvBlockMeta;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};

/// [`ConvNorm2d`] Config.
#[derive(Config, Debug)]
pub struct ConvNorm2dConfig {
    /// The convolution.
    pub conv: Conv2dConfig,

    /// The normalization; resized to ``conv.channels[1]`` at init.
    #[config(default = "NormalizationConfig::default()")]
    pub norm: NormalizationConfig,
}

impl From<Conv2dConfig> for ConvNorm2dConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self::new(conv)
    }
}

impl ConvBlockMeta for ConvNorm2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }
}

impl ConvNorm2dConfig {
    /// Initialize a [`ConvNorm2d`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ConvNorm2d<B> {
        let features = self.out_channels();
        ConvNorm2d {
            conv: self.conv.init(device),
            norm: self.norm.with_num_features(features).init(device),
        }
    }
}

/// Convolution then normalization.
#[derive(Module, Debug)]
pub struct ConvNorm2d<B: Backend> {
    /// Convolution.
    pub conv: Conv2d<B>,

    /// Normalization over the conv output channels.
    pub norm: Normalization<B>,
}

impl<B: Backend> ConvBlockMeta for ConvNorm2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv.out_channels()
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }
}

impl<B: Backend> ConvNorm2d<B> {
    /// Forward Pass.
    ///
    /// Maps ``[batch, in_channels, h, w]`` to ``[batch, out_channels, h', w']``,
    /// where ``h', w'`` follow the conv padding and stride.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch"],
            &[("channels", self.in_channels())]
        );

        let x = self.norm.forward(self.conv.forward(input));

        assert_shape_contract_periodically!(
            ["batch", "channels", "height", "width"],
            &x,
            &[("batch", batch), ("channels", self.out_channels())]
        );
        x
    }
}
