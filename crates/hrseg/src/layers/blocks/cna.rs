//! # `CNA2d`
//!
//! [`ConvNorm2d`] with an activation on top: the conv/norm/act unit that
//! makes up almost every layer of the network.
//!
//! [`CNA2d::hook_forward`] exposes the point between normalization and
//! activation, where residual blocks add their shortcut.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::ConvBlockMeta;
use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Tensor};

/// The norm/act pair shared by a family of [`CNA2d`] layers.
///
/// Wrapping a [`Conv2dConfig`] yields a [`CNA2dConfig`] whose norm is sized
/// to that convolution.
#[derive(Config, Debug)]
pub struct CnaPolicy {
    /// Normalization; its feature count is ignored.
    #[config(default = "NormalizationConfig::default()")]
    pub norm: NormalizationConfig,

    /// Activation.
    #[config(default = "ActivationConfig::Relu")]
    pub act: ActivationConfig,
}

impl Default for CnaPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl CnaPolicy {
    /// Pair this policy with a convolution.
    pub fn wrap(
        &self,
        conv: Conv2dConfig,
    ) -> CNA2dConfig {
        let features = conv.out_channels();
        CNA2dConfig {
            conv,
            norm: self.norm.clone().with_num_features(features),
            act: self.act.clone(),
        }
    }
}

/// [`CNA2d`] Config.
#[derive(Config, Debug)]
pub struct CNA2dConfig {
    /// The convolution.
    pub conv: Conv2dConfig,

    /// The normalization; resized to ``conv.channels[1]`` at init.
    pub norm: NormalizationConfig,

    /// The activation.
    #[config(default = "ActivationConfig::Relu")]
    pub act: ActivationConfig,
}

impl ConvBlockMeta for CNA2dConfig {
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

impl CNA2dConfig {
    /// Initialize a [`CNA2d`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> CNA2d<B> {
        CNA2d {
            conv_norm: ConvNorm2dConfig::new(self.conv)
                .with_norm(self.norm)
                .init(device),
            act: self.act.init(device),
        }
    }
}

/// Conv, norm, then activation.
#[derive(Module, Debug)]
pub struct CNA2d<B: Backend> {
    /// Convolution and normalization.
    pub conv_norm: ConvNorm2d<B>,

    /// Activation.
    pub act: Activation<B>,
}

impl<B: Backend> ConvBlockMeta for CNA2d<B> {
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

impl<B: Backend> CNA2d<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.act.forward(self.conv_norm.forward(input))
    }

    /// Forward pass with `hook` applied to the normalized features,
    /// before the activation.
    ///
    /// The hook must keep the shape.
    pub fn hook_forward<F>(
        &self,
        input: Tensor<B, 4>,
        hook: F,
    ) -> Tensor<B, 4>
    where
        F: FnOnce(Tensor<B, 4>) -> Tensor<B, 4>,
    {
        let x = self.conv_norm.forward(input);
        let dims = x.dims();

        let x = hook(x);
        assert_eq!(x.dims(), dims, "hook changed the feature shape");

        self.act.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::normalization_wrapper::Normalization;
    use burn::backend::NdArray;
    use burn::nn::PaddingConfig2d;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    #[test]
    fn test_policy_sizes_norm() {
        let config = CnaPolicy::new().wrap(
            Conv2dConfig::new([2, 12], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1)),
        );
        assert_eq!(config.norm.num_features(), 12);
        assert_eq!(config.stride(), [2, 2]);
        assert!(matches!(config.act, ActivationConfig::Relu));

        let layer: CNA2d<B> = config.init(&Default::default());
        assert!(matches!(layer.conv_norm.norm, Normalization::Batch(_)));
        assert_eq!((layer.in_channels(), layer.out_channels()), (2, 12));
    }

    #[test]
    fn test_forward_is_non_negative() {
        let device = Default::default();
        let layer: CNA2d<B> = CnaPolicy::new()
            .wrap(Conv2dConfig::new([3, 5], [1, 1]))
            .init(&device);

        let input = Tensor::random([2, 3, 7, 6], Distribution::Normal(0.0, 2.0), &device);
        let output = layer.forward(input.clone());
        assert_eq!(output.dims(), [2, 5, 7, 6]);

        let pre_act = layer.conv_norm.forward(input);
        output
            .to_data()
            .assert_eq(&pre_act.clamp_min(0.0).to_data(), true);
    }

    #[test]
    fn test_hook_runs_before_activation() {
        let device = Default::default();
        let layer: CNA2d<B> = CnaPolicy::new()
            .with_act(ActivationConfig::Sigmoid)
            .wrap(Conv2dConfig::new([2, 2], [1, 1]))
            .init(&device);

        let input = Tensor::random([1, 2, 4, 4], Distribution::Default, &device);

        // A large negative offset drives the sigmoid to zero.
        let output = layer.hook_forward(input, |x| x - 100.0);
        let max = output.max().into_scalar();
        assert!(max < 1e-6, "{max}");
    }

    #[test]
    #[should_panic(expected = "hook changed the feature shape")]
    fn test_hook_must_keep_shape() {
        let device = Default::default();
        let layer: CNA2d<B> = CnaPolicy::new()
            .wrap(Conv2dConfig::new([2, 4], [1, 1]))
            .init(&device);
        layer.hook_forward(Tensor::zeros([1, 2, 4, 4], &device), |x| {
            x.narrow(1, 0, 2)
        });
    }
}
