//! # `HRNet` Segmentation Models
//!
//! [`HrNetSeg`] is the backbone with the plain [`SegmentationHead`];
//! [`HrNetOcr`] is the backbone with the [`OcrHead`].
//!
//! Both are fixed to the ``[batch_size, channel, height, width]`` input
//! they were configured for, and produce ``classes`` channels at that
//! same resolution.
//!
//! The [`seg_hrnet`] and [`seg_hrnet_ocr`] builders construct models from
//! variant and activation names.

use crate::error::{HrSegError, HrSegResult};
use crate::models::hrnet::backbone::{HrNetBackbone, HrNetBackboneConfig};
use crate::models::hrnet::feature_map::FeatureMapShape;
use crate::models::hrnet::head::{SegmentationHead, SegmentationHeadConfig};
use crate::models::hrnet::ocr::{OcrHead, OcrHeadConfig};
use crate::models::hrnet::output_activation::OutputActivation;
use crate::models::hrnet::variant::HrNetVariant;
use bimm_contracts::assert_shape_contract;
use burn::module::Ignored;
use burn::prelude::{Backend, Config, Module, Tensor};

fn check_positive(
    name: &str,
    value: usize,
) -> HrSegResult<()> {
    if value == 0 {
        return Err(HrSegError::InvalidConfig(format!("{name} must be positive")));
    }
    Ok(())
}

fn parse_names(
    activation: &str,
    hrnet_type: &str,
) -> HrSegResult<(OutputActivation, HrNetVariant)> {
    let variant: HrNetVariant = hrnet_type.parse()?;
    let activation = match activation.parse::<OutputActivation>() {
        Ok(activation) => activation,
        Err(never) => match never {},
    };
    Ok((activation, variant))
}

/// [`HrNetSeg`] Config.
#[derive(Config, Debug)]
pub struct HrNetSegConfig {
    /// Fixed batch size.
    pub batch_size: usize,

    /// Input height.
    pub height: usize,

    /// Input width.
    pub width: usize,

    /// Number of classes.
    pub classes: usize,

    /// Backbone config; its `in_channels` is the input channel count.
    pub backbone: HrNetBackboneConfig,

    /// Output activation.
    #[config(default = "OutputActivation::Softmax")]
    pub activation: OutputActivation,
}

impl HrNetSegConfig {
    /// Build a config from names.
    ///
    /// # Errors
    ///
    /// [`HrSegError::UnsupportedVariant`] for an unknown `hrnet_type`.
    /// Unknown `activation` names yield raw logits.
    pub fn from_names(
        batch_size: usize,
        height: usize,
        width: usize,
        channel: usize,
        classes: usize,
        activation: &str,
        hrnet_type: &str,
    ) -> HrSegResult<Self> {
        let (activation, variant) = parse_names(activation, hrnet_type)?;
        Ok(Self::new(
            batch_size,
            height,
            width,
            classes,
            HrNetBackboneConfig::from_variant(channel, variant),
        )
        .with_activation(activation))
    }

    /// Input channels.
    pub fn channel(&self) -> usize {
        self.backbone.in_channels
    }

    /// The expected ``[batch, channel, height, width]`` input shape.
    pub fn input_shape(&self) -> [usize; 4] {
        [self.batch_size, self.channel(), self.height, self.width]
    }

    /// The ``[batch, classes, height, width]`` output shape.
    pub fn output_shape(&self) -> [usize; 4] {
        [self.batch_size, self.classes, self.height, self.width]
    }

    /// The backbone branch shapes for the configured input.
    pub fn branch_shapes(&self) -> Vec<FeatureMapShape> {
        self.backbone
            .output_shapes(self.batch_size, [self.height, self.width])
    }

    /// Check the config.
    pub fn try_validate(&self) -> HrSegResult<()> {
        check_positive("batch_size", self.batch_size)?;
        check_positive("height", self.height)?;
        check_positive("width", self.width)?;
        check_positive("channel", self.channel())?;
        check_positive("classes", self.classes)?;
        self.backbone.try_validate()
    }

    /// Initialize a [`HrNetSeg`].
    ///
    /// # Panics
    ///
    /// If [`HrNetSegConfig::try_validate`] fails.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> HrNetSeg<B> {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }

        let head = SegmentationHeadConfig::new(self.backbone.out_channels(), self.classes)
            .with_normalization(self.backbone.normalization.clone())
            .with_initializer(self.backbone.initializer.clone());

        let model = HrNetSeg {
            batch_size: self.batch_size,
            height: self.height,
            width: self.width,
            backbone: self.backbone.init(device),
            head: head.init(device),
            activation: Ignored(self.activation),
        };
        tracing::debug!(
            input_shape = ?model.input_shape(),
            classes = self.classes,
            activation = ?self.activation,
            num_params = model.num_params(),
            "built hrnet"
        );
        model
    }
}

/// `HRNet` with the plain segmentation head.
#[derive(Module, Debug)]
pub struct HrNetSeg<B: Backend> {
    /// Fixed batch size.
    pub batch_size: usize,

    /// Input height.
    pub height: usize,

    /// Input width.
    pub width: usize,

    /// Multi-resolution backbone.
    pub backbone: HrNetBackbone<B>,

    /// Concat-and-classify head.
    pub head: SegmentationHead<B>,

    /// Output activation.
    pub activation: Ignored<OutputActivation>,
}

impl<B: Backend> HrNetSeg<B> {
    /// The expected ``[batch, channel, height, width]`` input shape.
    pub fn input_shape(&self) -> [usize; 4] {
        [
            self.batch_size,
            self.backbone.in_channels(),
            self.height,
            self.width,
        ]
    }

    /// The ``[batch, classes, height, width]`` output shape.
    pub fn output_shape(&self) -> [usize; 4] {
        [self.batch_size, self.head.classes(), self.height, self.width]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch_size, channel, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch_size, classes, height, width]`` activated class scores.
    #[tracing::instrument(skip_all)]
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, channel, height, width] = self.input_shape();
        assert_shape_contract!(
            ["batch", "channel", "height", "width"],
            &input,
            &[
                ("batch", batch),
                ("channel", channel),
                ("height", height),
                ("width", width)
            ]
        );

        let branches = self.backbone.forward(input);
        let logits = self.head.forward(branches, [height, width]);
        self.activation.0.forward(logits)
    }
}

/// [`HrNetOcr`] Config.
#[derive(Config, Debug)]
pub struct HrNetOcrConfig {
    /// Fixed batch size.
    pub batch_size: usize,

    /// Input height.
    pub height: usize,

    /// Input width.
    pub width: usize,

    /// Number of classes.
    pub classes: usize,

    /// Backbone config; its `in_channels` is the input channel count.
    pub backbone: HrNetBackboneConfig,

    /// Output activation, applied to both outputs.
    #[config(default = "OutputActivation::Softmax")]
    pub activation: OutputActivation,

    /// Width of the OCR pixel feature projection.
    #[config(default = 512)]
    pub mid_channels: usize,

    /// OCR attention key channels.
    #[config(default = 256)]
    pub key_channels: usize,

    /// OCR block output channels.
    #[config(default = 512)]
    pub out_channels: usize,

    /// OCR dropout probability.
    #[config(default = 0.05)]
    pub dropout: f64,

    /// Spatial gather softmax temperature.
    #[config(default = 1.0)]
    pub gather_scale: f64,

    /// OCR query-side pooling factor.
    #[config(default = 1)]
    pub pooling_scale: usize,
}

impl HrNetOcrConfig {
    /// Build a config from names.
    ///
    /// # Errors
    ///
    /// [`HrSegError::UnsupportedVariant`] for an unknown `hrnet_type`.
    /// Unknown `activation` names yield raw logits.
    pub fn from_names(
        batch_size: usize,
        height: usize,
        width: usize,
        channel: usize,
        classes: usize,
        activation: &str,
        hrnet_type: &str,
    ) -> HrSegResult<Self> {
        let (activation, variant) = parse_names(activation, hrnet_type)?;
        Ok(Self::new(
            batch_size,
            height,
            width,
            classes,
            HrNetBackboneConfig::from_variant(channel, variant),
        )
        .with_activation(activation))
    }

    /// Input channels.
    pub fn channel(&self) -> usize {
        self.backbone.in_channels
    }

    /// The expected ``[batch, channel, height, width]`` input shape.
    pub fn input_shape(&self) -> [usize; 4] {
        [self.batch_size, self.channel(), self.height, self.width]
    }

    /// The ``[batch, classes, height, width]`` shape of both outputs.
    pub fn output_shape(&self) -> [usize; 4] {
        [self.batch_size, self.classes, self.height, self.width]
    }

    /// The backbone branch shapes for the configured input.
    pub fn branch_shapes(&self) -> Vec<FeatureMapShape> {
        self.backbone
            .output_shapes(self.batch_size, [self.height, self.width])
    }

    /// The OCR head config.
    pub fn head_config(&self) -> OcrHeadConfig {
        OcrHeadConfig::new(self.backbone.out_channels(), self.classes)
            .with_mid_channels(self.mid_channels)
            .with_key_channels(self.key_channels)
            .with_out_channels(self.out_channels)
            .with_dropout(self.dropout)
            .with_gather_scale(self.gather_scale)
            .with_pooling_scale(self.pooling_scale)
            .with_normalization(self.backbone.normalization.clone())
            .with_initializer(self.backbone.initializer.clone())
    }

    /// Check the config.
    pub fn try_validate(&self) -> HrSegResult<()> {
        check_positive("batch_size", self.batch_size)?;
        check_positive("height", self.height)?;
        check_positive("width", self.width)?;
        check_positive("channel", self.channel())?;
        check_positive("classes", self.classes)?;
        self.backbone.try_validate()?;
        self.head_config().try_validate()
    }

    /// Initialize a [`HrNetOcr`].
    ///
    /// # Panics
    ///
    /// If [`HrNetOcrConfig::try_validate`] fails.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> HrNetOcr<B> {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }

        let head = self.head_config();
        let model = HrNetOcr {
            batch_size: self.batch_size,
            height: self.height,
            width: self.width,
            backbone: self.backbone.init(device),
            head: head.init(device),
            activation: Ignored(self.activation),
        };
        tracing::debug!(
            input_shape = ?model.input_shape(),
            classes = self.classes,
            activation = ?self.activation,
            num_params = model.num_params(),
            "built hrnet-ocr"
        );
        model
    }
}

/// The two outputs of [`HrNetOcr`].
#[derive(Debug, Clone)]
pub struct HrNetOcrOutput<B: Backend> {
    /// Primary (OCR-refined) scores, ``[batch, classes, height, width]``.
    pub primary: Tensor<B, 4>,

    /// Auxiliary scores, ``[batch, classes, height, width]``.
    pub auxiliary: Tensor<B, 4>,
}

/// `HRNet` with the OCR head.
#[derive(Module, Debug)]
pub struct HrNetOcr<B: Backend> {
    /// Fixed batch size.
    pub batch_size: usize,

    /// Input height.
    pub height: usize,

    /// Input width.
    pub width: usize,

    /// Multi-resolution backbone.
    pub backbone: HrNetBackbone<B>,

    /// OCR head.
    pub head: OcrHead<B>,

    /// Output activation.
    pub activation: Ignored<OutputActivation>,
}

impl<B: Backend> HrNetOcr<B> {
    /// The expected ``[batch, channel, height, width]`` input shape.
    pub fn input_shape(&self) -> [usize; 4] {
        [
            self.batch_size,
            self.backbone.in_channels(),
            self.height,
            self.width,
        ]
    }

    /// The ``[batch, classes, height, width]`` shape of both outputs.
    pub fn output_shape(&self) -> [usize; 4] {
        [self.batch_size, self.head.classes(), self.height, self.width]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch_size, channel, height, width]``.
    ///
    /// # Returns
    ///
    /// Activated primary and auxiliary scores.
    #[tracing::instrument(skip_all)]
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> HrNetOcrOutput<B> {
        let [batch, channel, height, width] = self.input_shape();
        assert_shape_contract!(
            ["batch", "channel", "height", "width"],
            &input,
            &[
                ("batch", batch),
                ("channel", channel),
                ("height", height),
                ("width", width)
            ]
        );

        let branches = self.backbone.forward(input);
        let (primary, auxiliary) = self.head.forward(branches, [height, width]);
        let activation = self.activation.0;

        HrNetOcrOutput {
            primary: activation.forward(primary),
            auxiliary: activation.forward(auxiliary),
        }
    }
}

/// Build an `HRNet` with the plain segmentation head.
///
/// # Arguments
///
/// - `hrnet_type`: one of ``hrnet_w18``, ``hrnet_w32``, ``hrnet_w48``.
/// - `activation`: ``softmax`` or ``sigmoid``; anything else yields raw logits.
///
/// # Errors
///
/// [`HrSegError::UnsupportedVariant`] for an unknown `hrnet_type`;
/// [`HrSegError::InvalidConfig`] for zero sizes.
#[allow(clippy::too_many_arguments)]
pub fn seg_hrnet<B: Backend>(
    batch_size: usize,
    height: usize,
    width: usize,
    channel: usize,
    classes: usize,
    activation: &str,
    hrnet_type: &str,
    device: &B::Device,
) -> HrSegResult<HrNetSeg<B>> {
    let config = HrNetSegConfig::from_names(
        batch_size, height, width, channel, classes, activation, hrnet_type,
    )?;
    config.try_validate()?;
    Ok(config.init(device))
}

/// Build an `HRNet` with the OCR head.
///
/// Arguments and errors as for [`seg_hrnet`].
#[allow(clippy::too_many_arguments)]
pub fn seg_hrnet_ocr<B: Backend>(
    batch_size: usize,
    height: usize,
    width: usize,
    channel: usize,
    classes: usize,
    activation: &str,
    hrnet_type: &str,
    device: &B::Device,
) -> HrSegResult<HrNetOcr<B>> {
    let config = HrNetOcrConfig::from_names(
        batch_size, height, width, channel, classes, activation, hrnet_type,
    )?;
    config.try_validate()?;
    Ok(config.init(device))
}
