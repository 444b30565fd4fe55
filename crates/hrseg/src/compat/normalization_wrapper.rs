//! # Feature-Map Normalization
//!
//! `HRNet` normalizes every convolution with [`BatchNorm`]. [`GroupNorm`]
//! is offered for fine-tuning at batch sizes too small for batch statistics.
//!
//! Configs are written without a feature count; layer builders call
//! [`NormalizationConfig::with_num_features`] with their conv output width.

use burn::nn::{BatchNorm, BatchNormConfig, GroupNorm, GroupNormConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Normalization`] Config.
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum NormalizationConfig {
    /// Per-channel batch statistics.
    Batch(BatchNormConfig),

    /// Per-sample statistics over channel groups.
    Group(GroupNormConfig),
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self::Batch(BatchNormConfig::new(0))
    }
}

impl From<BatchNormConfig> for NormalizationConfig {
    fn from(config: BatchNormConfig) -> Self {
        Self::Batch(config)
    }
}

impl From<GroupNormConfig> for NormalizationConfig {
    fn from(config: GroupNormConfig) -> Self {
        Self::Group(config)
    }
}

impl NormalizationConfig {
    /// The configured feature count.
    pub fn num_features(&self) -> usize {
        match self {
            Self::Batch(config) => config.num_features,
            Self::Group(config) => config.num_channels,
        }
    }

    /// Resize to `num_features` channels, keeping every other setting.
    pub fn with_num_features(
        self,
        num_features: usize,
    ) -> Self {
        match self {
            Self::Batch(mut config) => {
                config.num_features = num_features;
                Self::Batch(config)
            }
            Self::Group(mut config) => {
                config.num_channels = num_features;
                Self::Group(config)
            }
        }
    }

    /// Build the layer.
    ///
    /// # Panics
    ///
    /// For group norm, if the feature count is not a multiple of the groups.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Normalization<B> {
        match self {
            Self::Batch(config) => Normalization::Batch(config.init(device)),
            Self::Group(config) => Normalization::Group(config.init(device)),
        }
    }
}

/// Normalization over ``[batch, channels, height, width]`` maps.
#[derive(Module, Debug)]
#[non_exhaustive]
pub enum Normalization<B: Backend> {
    /// See [`NormalizationConfig::Batch`].
    Batch(BatchNorm<B, 2>),

    /// See [`NormalizationConfig::Group`].
    Group(GroupNorm<B>),
}

impl<B: Backend> Normalization<B> {
    /// Number of normalized channels.
    pub fn num_features(&self) -> usize {
        match self {
            Self::Batch(norm) => norm.gamma.dims()[0],
            Self::Group(norm) => norm.num_channels,
        }
    }

    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Self::Batch(norm) => norm.forward(input),
            Self::Group(norm) => norm.forward(input),
        }
    }
}
