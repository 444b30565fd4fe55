//! # Parallel Branches
//!
//! Runs an independent stack of [`BasicBlock`]s on every branch of a
//! [`BranchSet`]. Arity, channels, and resolutions are preserved.

use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::models::hrnet::basic_block::{BasicBlock, BasicBlockConfig};
use crate::models::hrnet::feature_map::{BranchSet, FeatureMap};
use crate::models::hrnet::util::HE_NORMAL_INITIALIZER;
use burn::nn::Initializer;
use burn::prelude::{Backend, Config, Module};

/// [`ParallelBranches`] Config.
#[derive(Config, Debug)]
pub struct ParallelBranchesConfig {
    /// Channels of each branch, highest resolution first.
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

impl ParallelBranchesConfig {
    /// Initialize a [`ParallelBranches`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ParallelBranches<B> {
        let branches = self
            .channels
            .iter()
            .map(|&planes| {
                (0..self.num_blocks)
                    .map(|_| {
                        BasicBlockConfig::new(planes, planes)
                            .with_normalization(self.normalization.clone())
                            .with_initializer(self.initializer.clone())
                            .init(device)
                    })
                    .collect()
            })
            .collect();

        ParallelBranches {
            channels: self.channels,
            branches,
        }
    }
}

/// Per-branch residual processing.
#[derive(Module, Debug)]
pub struct ParallelBranches<B: Backend> {
    /// Channels of each branch.
    pub channels: Vec<usize>,

    /// Block stacks, one per branch.
    pub branches: Vec<Vec<BasicBlock<B>>>,
}

impl<B: Backend> ParallelBranches<B> {
    /// Number of branches.
    pub fn arity(&self) -> usize {
        self.channels.len()
    }

    /// Forward Pass.
    ///
    /// # Panics
    ///
    /// If the branch count or any branch's channels differ from the config.
    pub fn forward(
        &self,
        input: BranchSet<B>,
    ) -> BranchSet<B> {
        assert_eq!(
            input.arity(),
            self.arity(),
            "parallel branches expect {} branches",
            self.arity()
        );
        let batch = input.batch().unwrap_or_default();

        let mut out = BranchSet::default();
        let tensors = input.into_tensors();
        for ((x, blocks), &channels) in tensors.into_iter().zip(&self.branches).zip(&self.channels) {
            let x = FeatureMap::expect(x, batch, channels).into_tensor();
            let x = blocks.iter().fold(x, |x, block| block.forward(x));
            out.push(FeatureMap::expect(x, batch, channels));
        }
        out
    }
}
