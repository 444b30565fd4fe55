//! # Hidden-Layer Activations
//!
//! Config-selectable activation for the conv/norm/act layers.
//! The default, and what every published `HRNet` checkpoint uses, is [`Relu`].

use burn::nn::{Gelu, LeakyRelu, LeakyReluConfig, PRelu, PReluConfig, Relu, Sigmoid};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Activation`] Config.
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum ActivationConfig {
    /// Rectified linear unit.
    Relu,

    /// ReLU with a fixed negative slope.
    LeakyRelu(LeakyReluConfig),

    /// ReLU with a learned negative slope.
    PRelu(PReluConfig),

    /// Gaussian error linear unit.
    Gelu,

    /// Logistic sigmoid.
    Sigmoid,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self::Relu
    }
}

impl From<LeakyReluConfig> for ActivationConfig {
    fn from(config: LeakyReluConfig) -> Self {
        Self::LeakyRelu(config)
    }
}

impl From<PReluConfig> for ActivationConfig {
    fn from(config: PReluConfig) -> Self {
        Self::PRelu(config)
    }
}

impl ActivationConfig {
    /// Build the layer; only [`PRelu`] allocates parameters on `device`.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Activation<B> {
        match self {
            Self::Relu => Activation::Relu(Relu),
            Self::LeakyRelu(config) => Activation::LeakyRelu(config.init()),
            Self::PRelu(config) => Activation::PRelu(config.init(device)),
            Self::Gelu => Activation::Gelu(Gelu),
            Self::Sigmoid => Activation::Sigmoid(Sigmoid),
        }
    }
}

/// Hidden-layer activation.
#[derive(Module, Debug)]
#[non_exhaustive]
pub enum Activation<B: Backend> {
    /// See [`ActivationConfig::Relu`].
    Relu(Relu),

    /// See [`ActivationConfig::LeakyRelu`].
    LeakyRelu(LeakyRelu),

    /// See [`ActivationConfig::PRelu`].
    PRelu(PRelu<B>),

    /// See [`ActivationConfig::Gelu`].
    Gelu(Gelu),

    /// See [`ActivationConfig::Sigmoid`].
    Sigmoid(Sigmoid),
}

impl<B: Backend> Activation<B> {
    /// Apply elementwise.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Self::Relu(layer) => layer.forward(input),
            Self::LeakyRelu(layer) => layer.forward(input),
            Self::PRelu(layer) => layer.forward(input),
            Self::Gelu(layer) => layer.forward(input),
            Self::Sigmoid(layer) => layer.forward(input),
        }
    }
}
