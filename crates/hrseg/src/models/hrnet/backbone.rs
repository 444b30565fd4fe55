//! # `HRNet` Backbone
//!
//! [`HrNetStem`] followed by three [`HrNetStage`]s, growing the branch set
//! from one branch at 1/4 resolution to four branches at 1/4, 1/8, 1/16
//! and 1/32 resolution.

use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::error::{HrSegError, HrSegResult};
use crate::models::hrnet::feature_map::{BranchSet, FeatureMapShape};
use crate::models::hrnet::stage::{HrNetStage, HrNetStageConfig};
use crate::models::hrnet::stem::{HrNetStem, HrNetStemConfig, HrNetStemMeta};
use crate::models::hrnet::util::{HE_NORMAL_INITIALIZER, strided_resolution};
use crate::models::hrnet::variant::{HrNetVariant, MAX_BRANCHES, WidthSchedule};
use burn::nn::Initializer;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`HrNetBackbone`] Config.
#[derive(Config, Debug)]
pub struct HrNetBackboneConfig {
    /// Input image channels.
    pub in_channels: usize,

    /// Branch widths, highest resolution first.
    pub widths: WidthSchedule,

    /// Width of the stem's strided convolutions.
    #[config(default = 64)]
    pub stem_channels: usize,

    /// Output width of the stem.
    #[config(default = 256)]
    pub stem_out_channels: usize,

    /// Bottleneck blocks in the stem.
    #[config(default = 4)]
    pub stem_blocks: usize,

    /// Module repetitions for each of the three stages.
    #[config(default = "vec![1, 4, 3]")]
    pub stage_modules: Vec<usize>,

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

impl HrNetBackboneConfig {
    /// A backbone config for a named variant.
    pub fn from_variant(
        in_channels: usize,
        variant: HrNetVariant,
    ) -> Self {
        Self::new(in_channels, variant.widths())
    }

    /// Check the stage schedule and the stem's bottleneck blocks.
    pub fn try_validate(&self) -> HrSegResult<()> {
        if self.stage_modules.len() != MAX_BRANCHES - 1 {
            return Err(HrSegError::InvalidConfig(format!(
                "expected {} stage module counts, got {:?}",
                MAX_BRANCHES - 1,
                self.stage_modules
            )));
        }
        if self.stage_modules.contains(&0) {
            return Err(HrSegError::InvalidConfig(format!(
                "stage module counts must be positive: {:?}",
                self.stage_modules
            )));
        }
        if self.widths.contains(&0) || self.num_blocks == 0 || self.stem_blocks == 0 {
            return Err(HrSegError::InvalidConfig(
                "widths and block counts must be positive".to_string(),
            ));
        }
        for block in self.stem_config().block_configs() {
            block.try_validate()?;
        }
        Ok(())
    }

    fn stem_config(&self) -> HrNetStemConfig {
        HrNetStemConfig::new(self.in_channels)
            .with_stem_channels(self.stem_channels)
            .with_out_channels(self.stem_out_channels)
            .with_num_blocks(self.stem_blocks)
            .with_normalization(self.normalization.clone())
            .with_initializer(self.initializer.clone())
    }

    /// Total channels of the four branches.
    pub fn out_channels(&self) -> usize {
        self.widths.iter().sum()
    }

    /// The branch shapes produced for an input of ``[batch, in_channels, height, width]``.
    pub fn output_shapes(
        &self,
        batch: usize,
        resolution: [usize; 2],
    ) -> Vec<FeatureMapShape> {
        let mut res = self.stem_config().output_resolution(resolution);
        let mut shapes = Vec::with_capacity(MAX_BRANCHES);
        for (idx, &channels) in self.widths.iter().enumerate() {
            if idx > 0 {
                res = strided_resolution(res, 2);
            }
            shapes.push(FeatureMapShape::new(batch, channels, res[0], res[1]));
        }
        shapes
    }

    /// Initialize a [`HrNetBackbone`].
    ///
    /// # Panics
    ///
    /// If [`HrNetBackboneConfig::try_validate`] fails.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> HrNetBackbone<B> {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }

        let stem = self.stem_config().init(device);

        let mut in_channels = vec![self.stem_out_channels];
        let stages = self
            .stage_modules
            .iter()
            .enumerate()
            .map(|(idx, &num_modules)| {
                let channels = self.widths[..idx + 2].to_vec();
                let stage = HrNetStageConfig::new(in_channels.clone(), channels.clone())
                    .with_num_modules(num_modules)
                    .with_num_blocks(self.num_blocks)
                    .with_normalization(self.normalization.clone())
                    .with_initializer(self.initializer.clone())
                    .init(device);
                tracing::debug!(
                    stage = idx + 1,
                    branches = channels.len(),
                    ?channels,
                    num_modules,
                    "built hrnet stage"
                );
                in_channels = channels;
                stage
            })
            .collect();

        HrNetBackbone { stem, stages }
    }
}

/// The `HRNet` multi-resolution backbone.
#[derive(Module, Debug)]
pub struct HrNetBackbone<B: Backend> {
    /// Input stem.
    pub stem: HrNetStem<B>,

    /// Stages 1 through 3.
    pub stages: Vec<HrNetStage<B>>,
}

impl<B: Backend> HrNetBackbone<B> {
    /// Input image channels.
    pub fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// A four-branch [`BranchSet`], highest resolution first.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> BranchSet<B> {
        let x = BranchSet::single(self.stem.forward(input));
        self.stages.iter().fold(x, |x, stage| stage.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn tiny_config() -> HrNetBackboneConfig {
        HrNetBackboneConfig::new(3, [2, 4, 8, 16])
            .with_stem_channels(4)
            .with_stem_out_channels(8)
            .with_stem_blocks(1)
            .with_stage_modules(vec![1, 1, 1])
            .with_num_blocks(1)
    }

    #[test]
    fn test_backbone_config() {
        let config = HrNetBackboneConfig::from_variant(3, HrNetVariant::W48);
        assert_eq!(config.widths, [48, 96, 192, 384]);
        assert_eq!(config.stage_modules, vec![1, 4, 3]);
        assert_eq!(config.out_channels(), 720);
        assert!(config.try_validate().is_ok());

        assert_eq!(
            config.output_shapes(2, [512, 512]),
            vec![
                FeatureMapShape::new(2, 48, 128, 128),
                FeatureMapShape::new(2, 96, 64, 64),
                FeatureMapShape::new(2, 192, 32, 32),
                FeatureMapShape::new(2, 384, 16, 16),
            ]
        );
    }

    #[test]
    fn test_backbone_validation() {
        let config = tiny_config().with_stage_modules(vec![1, 1]);
        assert_eq!(
            config.try_validate(),
            Err(HrSegError::InvalidConfig(
                "expected 3 stage module counts, got [1, 1]".to_string()
            ))
        );
        assert!(
            tiny_config()
                .with_stage_modules(vec![1, 0, 1])
                .try_validate()
                .is_err()
        );
    }

    #[test]
    fn test_stem_blocks_validated() {
        let config = tiny_config().with_stem_out_channels(66);
        assert_eq!(
            config.try_validate(),
            Err(HrSegError::InvalidConfig(
                "bottleneck out_planes (66) must be a positive multiple of the expansion (4)"
                    .to_string()
            ))
        );
    }

    #[test]
    #[should_panic(expected = "bottleneck out_planes (66)")]
    fn test_init_rejects_stem_blocks() {
        let device = Default::default();
        let _backbone: HrNetBackbone<B> = tiny_config().with_stem_out_channels(66).init(&device);
    }

    #[test]
    fn test_backbone_forward() {
        let device = Default::default();
        let config = tiny_config();
        let expected = config.output_shapes(2, [33, 20]);

        let backbone: HrNetBackbone<B> = config.init(&device);
        assert_eq!(backbone.in_channels(), 3);
        assert_eq!(backbone.stages.len(), 3);
        assert_eq!(
            backbone.stages.iter().map(|s| s.arity()).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );

        let branches = backbone.forward(Tensor::ones([2, 3, 33, 20], &device));
        assert_eq!(branches.arity(), 4);
        assert_eq!(branches.shapes(), expected);
    }
}
