//! Convolution blocks shared by the backbone and the heads.
//!
//! Every block here is a [`Conv2d`] with extras stacked on its output, so
//! they all report their geometry through [`ConvBlockMeta`].
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::Backend;

pub mod cna;
pub mod conv_norm;

/// Channel and stride geometry of a convolution block.
pub trait ConvBlockMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// The ``[row, col]`` stride.
    fn stride(&self) -> [usize; 2];
}

impl ConvBlockMeta for Conv2dConfig {
    fn in_channels(&self) -> usize {
        self.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.channels[1]
    }

    fn stride(&self) -> [usize; 2] {
        self.stride
    }
}

impl<B: Backend> ConvBlockMeta for Conv2d<B> {
    fn in_channels(&self) -> usize {
        // weight: [out, in / groups, kh, kw]
        self.weight.shape().dims[1] * self.groups
    }

    fn out_channels(&self) -> usize {
        self.weight.shape().dims[0]
    }

    fn stride(&self) -> [usize; 2] {
        self.stride
    }
}
