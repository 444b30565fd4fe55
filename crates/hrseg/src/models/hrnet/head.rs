//! # Segmentation Head
//!
//! [`SegmentationHead`] turns the four-branch backbone output into class
//! logits: every branch is resized to branch 0, the branches are
//! concatenated, resized to the input resolution, mixed with a 1x1
//! conv/norm/act layer and classified with a biased 1x1 convolution.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::ConvBlockMeta;
use crate::layers::blocks::cna::{CNA2d, CnaPolicy};
use crate::layers::resize::resize_bilinear;
use crate::models::hrnet::feature_map::BranchSet;
use crate::models::hrnet::util::HE_NORMAL_INITIALIZER;
use bimm_contracts::assert_shape_contract_periodically;
use burn::nn::Initializer;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Resize every branch to branch 0's resolution and concatenate on channels.
///
/// # Panics
///
/// If the branch set is empty.
pub fn upsample_concat<B: Backend>(branches: BranchSet<B>) -> Tensor<B, 4> {
    let Some(first) = branches.get(0) else {
        panic!("cannot concatenate an empty branch set");
    };
    let target = first.shape().resolution();

    let tensors = branches
        .into_tensors()
        .into_iter()
        .map(|x| resize_bilinear(x, target))
        .collect();
    Tensor::cat(tensors, 1)
}

/// [`SegmentationHead`] Config.
#[derive(Config, Debug)]
pub struct SegmentationHeadConfig {
    /// Concatenated backbone channels.
    pub in_channels: usize,

    /// Number of classes.
    pub classes: usize,

    /// Normalization config.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// The conv initializer.
    #[config(default = "HE_NORMAL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl SegmentationHeadConfig {
    /// Initialize a [`SegmentationHead`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> SegmentationHead<B> {
        let mix = CnaPolicy {
            norm: self.normalization.clone(),
            act: ActivationConfig::Relu,
        }
        .wrap(
            Conv2dConfig::new([self.in_channels, self.in_channels], [1, 1])
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        );

        let classifier = Conv2dConfig::new([self.in_channels, self.classes], [1, 1])
            .with_initializer(self.initializer)
            .with_bias(true);

        SegmentationHead {
            mix: mix.init(device),
            classifier: classifier.init(device),
        }
    }
}

/// Concat-and-classify segmentation head.
#[derive(Module, Debug)]
pub struct SegmentationHead<B: Backend> {
    /// 1x1 conv/norm/act over the concatenated branches.
    pub mix: CNA2d<B>,

    /// 1x1 classifier.
    pub classifier: Conv2d<B>,
}

impl<B: Backend> SegmentationHead<B> {
    /// Number of output classes.
    pub fn classes(&self) -> usize {
        self.classifier.weight.shape().dims[0]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `branches`: the backbone branches.
    /// - `output_size`: ``[height, width]`` of the logits.
    ///
    /// # Returns
    ///
    /// ``[batch, classes, height, width]`` logits.
    pub fn forward(
        &self,
        branches: BranchSet<B>,
        output_size: [usize; 2],
    ) -> Tensor<B, 4> {
        let batch = branches.batch().unwrap_or_default();
        let channels = self.mix.in_channels();

        let x = upsample_concat(branches);
        let x = resize_bilinear(x, output_size);

        assert_shape_contract_periodically!(
            ["batch", "channels", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("channels", channels),
                ("height", output_size[0]),
                ("width", output_size[1]),
            ]
        );

        let x = self.mix.forward(x);
        self.classifier.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_upsample_concat() {
        let device = Default::default();
        let branches: BranchSet<B> = [
            Tensor::ones([2, 2, 8, 6], &device),
            Tensor::ones([2, 4, 4, 3], &device),
            Tensor::ones([2, 8, 2, 2], &device),
        ]
        .into_iter()
        .collect();

        let x = upsample_concat(branches);
        assert_eq!(x.dims(), [2, 14, 8, 6]);

        // Constant inputs stay constant under bilinear resizing.
        x.to_data()
            .assert_approx_eq::<f32>(
                &Tensor::<B, 4>::ones([2, 14, 8, 6], &device).to_data(),
                burn::tensor::Tolerance::default(),
            );
    }

    #[test]
    fn test_head_forward() {
        let device = Default::default();
        let head: SegmentationHead<B> = SegmentationHeadConfig::new(6, 5).init(&device);
        assert_eq!(head.classes(), 5);

        let branches: BranchSet<B> = [
            Tensor::ones([1, 2, 4, 4], &device),
            Tensor::ones([1, 4, 2, 2], &device),
        ]
        .into_iter()
        .collect();

        let logits = head.forward(branches, [16, 15]);
        assert_shape_contract!(
            ["batch", "classes", "height", "width"],
            &logits,
            &[("batch", 1), ("classes", 5), ("height", 16), ("width", 15)]
        );
    }
}
