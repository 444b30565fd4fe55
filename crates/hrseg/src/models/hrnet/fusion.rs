//! # Multi-Resolution Fusion
//!
//! [`FuseLayer`] exchanges information between every pair of branches.
//! For target branch `i` and source branch `j`:
//!
//! * ``j == i``: the source passes through unchanged.
//! * ``j > i``: the lower-resolution source is projected with a 1x1
//!   conv/norm to ``w_i`` channels, then bilinearly resized to branch `i`.
//! * ``j < i``: the higher-resolution source passes through ``i - j``
//!   stride-2 3x3 conv/norm steps; only the last step changes the width
//!   to ``w_i``.
//!
//! The contributions are summed and activated. Arity, channels, and
//! resolutions are preserved.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::ConvBlockMeta;
use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig};
use crate::layers::resize::resize_bilinear;
use crate::models::hrnet::feature_map::{BranchSet, FeatureMap};
use crate::models::hrnet::util::{HE_NORMAL_INITIALIZER, same_padding, scalar_to_array};
use burn::nn::Initializer;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`FuseLayer`] Config.
#[derive(Config, Debug)]
pub struct FuseLayerConfig {
    /// Channels of each branch, highest resolution first.
    pub channels: Vec<usize>,

    /// Normalization config.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// Activation applied to each fused sum.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,

    /// The conv initializer.
    #[config(default = "HE_NORMAL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl FuseLayerConfig {
    fn conv_norm(
        &self,
        channels: [usize; 2],
        kernel_size: usize,
        stride: usize,
    ) -> ConvNorm2dConfig {
        ConvNorm2dConfig::new(
            Conv2dConfig::new(channels, scalar_to_array(kernel_size))
                .with_stride(scalar_to_array(stride))
                .with_padding(same_padding(kernel_size))
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        )
        .with_norm(self.normalization.clone())
    }

    /// Initialize a [`FuseLayer`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> FuseLayer<B> {
        let arity = self.channels.len();
        assert!(arity > 0, "fusion requires at least one branch");

        let paths = (0..arity)
            .map(|i| {
                (0..arity)
                    .map(|j| {
                        let (w_i, w_j) = (self.channels[i], self.channels[j]);
                        if j > i {
                            Some(FusePath::Upsample(
                                self.conv_norm([w_j, w_i], 1, 1).init(device),
                            ))
                        } else if j < i {
                            let steps = i - j;
                            Some(FusePath::Downsample(
                                (0..steps)
                                    .map(|k| {
                                        let out = if k + 1 == steps { w_i } else { w_j };
                                        self.conv_norm([w_j, out], 3, 2).init(device)
                                    })
                                    .collect(),
                            ))
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .collect();

        FuseLayer {
            channels: self.channels,
            paths,
            activation: self.activation.init(device),
        }
    }
}

/// The path carrying one source branch to one target branch.
#[derive(Module, Debug)]
pub enum FusePath<B: Backend> {
    /// 1x1 projection of a lower-resolution source, then resize up.
    Upsample(ConvNorm2d<B>),

    /// Stride-2 3x3 steps from a higher-resolution source.
    Downsample(Vec<ConvNorm2d<B>>),
}

impl<B: Backend> FusePath<B> {
    /// Carry `input` to a target branch of spatial size `target`.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
        target: [usize; 2],
    ) -> Tensor<B, 4> {
        match self {
            Self::Upsample(conv) => resize_bilinear(conv.forward(input), target),
            Self::Downsample(steps) => steps.iter().fold(input, |x, step| step.forward(x)),
        }
    }

    /// Output channels of the path.
    pub fn out_channels(&self) -> usize {
        match self {
            Self::Upsample(conv) => conv.out_channels(),
            Self::Downsample(steps) => steps.last().map_or(0, |step| step.out_channels()),
        }
    }
}

/// Pairwise cross-resolution fusion.
#[derive(Module, Debug)]
pub struct FuseLayer<B: Backend> {
    /// Channels of each branch.
    pub channels: Vec<usize>,

    /// ``paths[i][j]`` carries branch `j` to branch `i`; `None` on the diagonal.
    pub paths: Vec<Vec<Option<FusePath<B>>>>,

    /// Activation of each fused sum.
    pub activation: Activation<B>,
}

impl<B: Backend> FuseLayer<B> {
    /// Number of branches.
    pub fn arity(&self) -> usize {
        self.channels.len()
    }

    /// Forward Pass.
    ///
    /// # Panics
    ///
    /// If the branch count or channels differ from the config,
    /// or a downsampled source does not land on its target's resolution.
    pub fn forward(
        &self,
        input: BranchSet<B>,
    ) -> BranchSet<B> {
        assert_eq!(
            input.arity(),
            self.arity(),
            "fusion expects {} branches",
            self.arity()
        );
        let batch = input.batch().unwrap_or_default();
        let resolutions: Vec<[usize; 2]> = input
            .shapes()
            .iter()
            .map(|shape| shape.resolution())
            .collect();
        let sources: Vec<Tensor<B, 4>> = input
            .into_tensors()
            .into_iter()
            .zip(&self.channels)
            .map(|(x, &channels)| FeatureMap::expect(x, batch, channels).into_tensor())
            .collect();

        let mut out = BranchSet::default();
        for (i, row) in self.paths.iter().enumerate() {
            let target = resolutions[i];
            let fused = row
                .iter()
                .zip(&sources)
                .map(|(path, source)| match path {
                    Some(path) => path.forward(source.clone(), target),
                    None => source.clone(),
                })
                .reduce(|acc, x| acc + x)
                .unwrap_or_else(|| sources[i].clone());

            let fused = self.activation.forward(fused);
            let map = FeatureMap::expect(fused, batch, self.channels[i]);
            assert_eq!(
                map.shape().resolution(),
                target,
                "fused branch {i} resolution drifted"
            );
            out.push(map);
        }
        out
    }
}
