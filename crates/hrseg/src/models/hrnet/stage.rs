//! # `HRNet` Stage
//!
//! A stage is a [`StageTransition`] that opens one more branch, followed by
//! `num_modules` repetitions of [`HighResolutionModule`]
//! (parallel branches, then fusion).

use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::models::hrnet::branches::{ParallelBranches, ParallelBranchesConfig};
use crate::models::hrnet::feature_map::BranchSet;
use crate::models::hrnet::fusion::{FuseLayer, FuseLayerConfig};
use crate::models::hrnet::transition::{StageTransition, StageTransitionConfig};
use crate::models::hrnet::util::HE_NORMAL_INITIALIZER;
use burn::nn::Initializer;
use burn::prelude::{Backend, Config, Module};

/// [`HighResolutionModule`] Config.
#[derive(Config, Debug)]
pub struct HighResolutionModuleConfig {
    /// Channels of each branch.
    pub channels: Vec<usize>,

    /// Basic blocks per branch.
    #[config(default = 4)]
    pub num_blocks: usize,

    /// Normalization config.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// The conv initializer.
    #[config(default = "HE_NORMAL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl HighResolutionModuleConfig {
    /// Initialize a [`HighResolutionModule`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> HighResolutionModule<B> {
        HighResolutionModule {
            branches: ParallelBranchesConfig::new(self.channels.clone())
                .with_num_blocks(self.num_blocks)
                .with_normalization(self.normalization.clone())
                .with_initializer(self.initializer.clone())
                .init(device),
            fuse: FuseLayerConfig::new(self.channels)
                .with_normalization(self.normalization)
                .with_initializer(self.initializer)
                .init(device),
        }
    }
}

/// Parallel branch processing followed by fusion.
#[derive(Module, Debug)]
pub struct HighResolutionModule<B: Backend> {
    /// Per-branch residual blocks.
    pub branches: ParallelBranches<B>,

    /// Cross-resolution fusion.
    pub fuse: FuseLayer<B>,
}

impl<B: Backend> HighResolutionModule<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: BranchSet<B>,
    ) -> BranchSet<B> {
        self.fuse.forward(self.branches.forward(input))
    }
}

/// [`HrNetStage`] Config.
#[derive(Config, Debug)]
pub struct HrNetStageConfig {
    /// Channels of the incoming branches.
    pub in_channels: Vec<usize>,

    /// Channels of the stage's branches; one longer than `in_channels`.
    pub channels: Vec<usize>,

    /// Number of [`HighResolutionModule`] repetitions.
    #[config(default = 1)]
    pub num_modules: usize,

    /// Basic blocks per branch, per module.
    #[config(default = 4)]
    pub num_blocks: usize,

    /// Normalization config.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// The conv initializer.
    #[config(default = "HE_NORMAL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl HrNetStageConfig {
    /// Initialize a [`HrNetStage`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> HrNetStage<B> {
        assert!(self.num_modules > 0, "stage requires at least one module");

        let transition = StageTransitionConfig::new(self.in_channels.clone(), self.channels.clone())
            .with_normalization(self.normalization.clone())
            .with_initializer(self.initializer.clone())
            .init(device);

        let modules = (0..self.num_modules)
            .map(|_| {
                HighResolutionModuleConfig::new(self.channels.clone())
                    .with_num_blocks(self.num_blocks)
                    .with_normalization(self.normalization.clone())
                    .with_initializer(self.initializer.clone())
                    .init(device)
            })
            .collect();

        HrNetStage {
            transition,
            modules,
        }
    }
}

/// One `HRNet` stage.
#[derive(Module, Debug)]
pub struct HrNetStage<B: Backend> {
    /// Adds the stage's new branch.
    pub transition: StageTransition<B>,

    /// Repeated branch/fusion modules.
    pub modules: Vec<HighResolutionModule<B>>,
}

impl<B: Backend> HrNetStage<B> {
    /// Number of output branches.
    pub fn arity(&self) -> usize {
        self.transition.out_arity()
    }

    /// Forward Pass.
    pub fn forward(
        &self,
        input: BranchSet<B>,
    ) -> BranchSet<B> {
        let x = self.transition.forward(input);
        self.modules.iter().fold(x, |x, module| module.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::hrnet::feature_map::FeatureMapShape;
    use burn::backend::NdArray;
    use burn::prelude::Tensor;

    type B = NdArray<f32>;

    #[test]
    fn test_stage_grows_arity() {
        let device = Default::default();
        let stage: HrNetStage<B> = HrNetStageConfig::new(vec![4, 8], vec![4, 8, 16])
            .with_num_modules(2)
            .with_num_blocks(1)
            .init(&device);
        assert_eq!(stage.arity(), 3);
        assert_eq!(stage.modules.len(), 2);

        let input: BranchSet<B> = [
            Tensor::ones([1, 4, 10, 7], &device),
            Tensor::ones([1, 8, 5, 4], &device),
        ]
        .into_iter()
        .collect();

        let out = stage.forward(input);
        assert_eq!(
            out.shapes(),
            vec![
                FeatureMapShape::new(1, 4, 10, 7),
                FeatureMapShape::new(1, 8, 5, 4),
                FeatureMapShape::new(1, 16, 3, 2),
            ]
        );
    }
}
