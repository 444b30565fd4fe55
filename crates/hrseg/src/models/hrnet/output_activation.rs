//! # Output Activation
//!
//! The non-linearity applied to the class logits of a segmentation head.

use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::{sigmoid, softmax};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Output non-linearity of a segmentation head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputActivation {
    /// Softmax over the class channel; for multi-class segmentation.
    #[default]
    Softmax,

    /// Element-wise sigmoid; for binary and multi-label segmentation.
    Sigmoid,

    /// Raw logits.
    Identity,
}

impl FromStr for OutputActivation {
    type Err = core::convert::Infallible;

    /// Parse an activation name.
    ///
    /// ``"softmax"`` and ``"sigmoid"`` select those activations;
    /// any other name yields [`OutputActivation::Identity`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "softmax" => Self::Softmax,
            "sigmoid" => Self::Sigmoid,
            _ => Self::Identity,
        })
    }
}

impl OutputActivation {
    /// Apply to ``[batch, classes, height, width]`` logits.
    pub fn forward<B: Backend>(
        self,
        logits: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Self::Softmax => softmax(logits, 1),
            Self::Sigmoid => sigmoid(logits),
            Self::Identity => logits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tolerance};

    type B = NdArray<f32>;

    #[test]
    fn test_parse() {
        assert_eq!("softmax".parse(), Ok(OutputActivation::Softmax));
        assert_eq!("sigmoid".parse(), Ok(OutputActivation::Sigmoid));
        assert_eq!("linear".parse(), Ok(OutputActivation::Identity));
        assert_eq!("".parse(), Ok(OutputActivation::Identity));
    }

    #[test]
    fn test_softmax_sums_to_one_over_classes() {
        let device = Default::default();
        let logits: Tensor<B, 4> = Tensor::random([2, 5, 3, 4], Distribution::Default, &device);

        let probs = OutputActivation::Softmax.forward(logits);
        let sums = probs.sum_dim(1);

        sums.to_data().assert_approx_eq::<f32>(
            &Tensor::<B, 4>::ones([2, 1, 3, 4], &device).to_data(),
            Tolerance::default(),
        );
    }

    #[test]
    fn test_identity_and_sigmoid() {
        let device = Default::default();
        let logits: Tensor<B, 4> = Tensor::from_data([[[[0.0, 2.0]]]], &device);

        OutputActivation::Identity
            .forward(logits.clone())
            .to_data()
            .assert_eq(&logits.to_data(), true);

        let expected: Tensor<B, 4> = Tensor::from_data([[[[0.5, 0.880_797]]]], &device);
        OutputActivation::Sigmoid
            .forward(logits)
            .to_data()
            .assert_approx_eq::<f32>(&expected.to_data(), Tolerance::default());
    }
}
