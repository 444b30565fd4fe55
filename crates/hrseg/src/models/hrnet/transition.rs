//! # Stage Transition
//!
//! Opens an `HRNet` stage by adding one lower-resolution branch.
//!
//! Existing branches are re-projected with a 3x3 conv/norm/act layer when
//! their width changes, and passed through otherwise. The new branch is a
//! stride-2 3x3 conv/norm/act layer over the lowest-resolution branch.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::ConvBlockMeta;
use crate::layers::blocks::cna::{CNA2d, CNA2dConfig, CnaPolicy};
use crate::models::hrnet::feature_map::{BranchSet, FeatureMap};
use crate::models::hrnet::util::{HE_NORMAL_INITIALIZER, same_padding, scalar_to_array};
use crate::models::hrnet::variant::MAX_BRANCHES;
use burn::nn::Initializer;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Config, Module};

/// [`StageTransition`] Config.
#[derive(Config, Debug)]
pub struct StageTransitionConfig {
    /// Channels of the incoming branches, highest resolution first.
    pub in_channels: Vec<usize>,

    /// Channels of the outgoing branches; one longer than `in_channels`.
    pub out_channels: Vec<usize>,

    /// Normalization config.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// The conv initializer.
    #[config(default = "HE_NORMAL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl StageTransitionConfig {
    fn cna_config(
        &self,
        channels: [usize; 2],
        stride: usize,
    ) -> CNA2dConfig {
        CnaPolicy {
            norm: self.normalization.clone(),
            act: ActivationConfig::Relu,
        }
        .wrap(
            Conv2dConfig::new(channels, scalar_to_array(3))
                .with_stride(scalar_to_array(stride))
                .with_padding(same_padding(3))
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        )
    }

    /// Initialize a [`StageTransition`].
    ///
    /// # Panics
    ///
    /// If `out_channels` is not exactly one branch longer than `in_channels`,
    /// or the result would exceed [`MAX_BRANCHES`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> StageTransition<B> {
        let arity = self.in_channels.len();
        assert!(arity > 0, "transition requires at least one input branch");
        assert_eq!(
            self.out_channels.len(),
            arity + 1,
            "transition must add exactly one branch"
        );
        assert!(
            arity < MAX_BRANCHES,
            "transition would exceed {MAX_BRANCHES} branches"
        );

        let reprojections = self
            .in_channels
            .iter()
            .zip(&self.out_channels)
            .map(|(&c_in, &c_out)| {
                (c_in != c_out).then(|| self.cna_config([c_in, c_out], 1).init(device))
            })
            .collect();

        let new_branch = self
            .cna_config([self.in_channels[arity - 1], self.out_channels[arity]], 2)
            .init(device);

        StageTransition {
            reprojections,
            new_branch,
        }
    }
}

/// Grows a [`BranchSet`] by one lower-resolution branch.
#[derive(Module, Debug)]
pub struct StageTransition<B: Backend> {
    /// Per-branch re-projection; `None` passes the branch through.
    pub reprojections: Vec<Option<CNA2d<B>>>,

    /// Stride-2 layer producing the new branch.
    pub new_branch: CNA2d<B>,
}

impl<B: Backend> StageTransition<B> {
    /// Number of input branches.
    pub fn in_arity(&self) -> usize {
        self.reprojections.len()
    }

    /// Number of output branches.
    pub fn out_arity(&self) -> usize {
        self.in_arity() + 1
    }

    /// Forward Pass.
    ///
    /// # Panics
    ///
    /// If the branch count differs from [`StageTransition::in_arity`].
    pub fn forward(
        &self,
        branches: BranchSet<B>,
    ) -> BranchSet<B> {
        assert_eq!(
            branches.arity(),
            self.in_arity(),
            "transition expects {} branches",
            self.in_arity()
        );
        let batch = branches.batch().unwrap_or_default();
        let tensors = branches.into_tensors();

        let new_branch = self
            .new_branch
            .forward(tensors[tensors.len() - 1].clone());

        let mut out: BranchSet<B> = tensors
            .into_iter()
            .zip(&self.reprojections)
            .map(|(x, reprojection)| match reprojection {
                Some(layer) => layer.forward(x),
                None => x,
            })
            .collect();

        out.push(FeatureMap::expect(
            new_branch,
            batch,
            self.new_branch.out_channels(),
        ));

        out
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
    fn test_transition_from_stem() {
        let device = Default::default();
        let transition: StageTransition<B> =
            StageTransitionConfig::new(vec![16], vec![4, 8]).init(&device);
        assert_eq!(transition.in_arity(), 1);
        assert_eq!(transition.out_arity(), 2);
        assert!(transition.reprojections[0].is_some());

        let out = transition.forward(BranchSet::single(Tensor::ones([2, 16, 9, 8], &device)));
        assert_eq!(
            out.shapes(),
            vec![
                FeatureMapShape::new(2, 4, 9, 8),
                FeatureMapShape::new(2, 8, 5, 4),
            ]
        );
    }

    #[test]
    fn test_transition_identity_branches() {
        let device = Default::default();
        let transition: StageTransition<B> =
            StageTransitionConfig::new(vec![4, 8], vec![4, 8, 16]).init(&device);
        assert!(transition.reprojections.iter().all(Option::is_none));

        let input: BranchSet<B> = [
            Tensor::random([1, 4, 8, 8], burn::tensor::Distribution::Default, &device),
            Tensor::random([1, 8, 4, 4], burn::tensor::Distribution::Default, &device),
        ]
        .into_iter()
        .collect();
        let expected = input.get(1).unwrap().tensor().clone();

        let out = transition.forward(input);
        assert_eq!(out.arity(), 3);
        assert_eq!(out.get(2).unwrap().shape(), FeatureMapShape::new(1, 16, 2, 2));
        out.get(1)
            .unwrap()
            .tensor()
            .to_data()
            .assert_eq(&expected.to_data(), true);
    }

    #[test]
    #[should_panic(expected = "transition must add exactly one branch")]
    fn test_transition_bad_schedule() {
        let device = Default::default();
        let _t: StageTransition<B> =
            StageTransitionConfig::new(vec![4], vec![4, 8, 16]).init(&device);
    }

    #[test]
    #[should_panic(expected = "transition expects 2 branches")]
    fn test_transition_wrong_arity() {
        let device = Default::default();
        let transition: StageTransition<B> =
            StageTransitionConfig::new(vec![4, 8], vec![4, 8, 16]).init(&device);
        transition.forward(BranchSet::single(Tensor::ones([1, 4, 8, 8], &device)));
    }
}
