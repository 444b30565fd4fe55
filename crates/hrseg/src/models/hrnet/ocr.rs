//! # Object-Contextual Representations
//!
//! The `HRNet-OCR` head refines pixel features with per-class context:
//!
//! 1. [`SpatialGather`] pools pixel features into one context vector per
//!    class, weighted by a softmax over the auxiliary class logits.
//! 2. [`SpatialOcr`] attends from every pixel to the class contexts and
//!    fuses the attended context back into the pixel features.
//!
//! [`OcrHead`] wires these together with the auxiliary classifier.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::error::{HrSegError, HrSegResult};
use crate::layers::blocks::ConvBlockMeta;
use crate::layers::blocks::cna::{CNA2d, CNA2dConfig, CnaPolicy};
use crate::layers::resize::resize_bilinear;
use crate::models::hrnet::feature_map::BranchSet;
use crate::models::hrnet::head::upsample_concat;
use crate::models::hrnet::util::{HE_NORMAL_INITIALIZER, same_padding, scalar_to_array};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Initializer};
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::tensor::activation::softmax;

/// Class-weighted pooling of pixel features.
///
/// Maps features ``[batch, channels, height, width]`` and class logits
/// ``[batch, classes, height, width]`` to contexts
/// ``[batch, channels, classes, 1]``.
#[derive(Module, Clone, Debug)]
pub struct SpatialGather {
    /// Logit temperature applied before the spatial softmax.
    pub scale: f64,
}

impl Default for SpatialGather {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl SpatialGather {
    /// Forward Pass.
    pub fn forward<B: Backend>(
        &self,
        feats: Tensor<B, 4>,
        probs: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, channels, height, width] = feats.dims();
        let [classes] = unpack_shape_contract!(
            ["batch", "classes", "height", "width"],
            &probs,
            &["classes"],
            &[("batch", batch), ("height", height), ("width", width)]
        );
        let pixels = height * width;

        // [batch, classes, pixels]
        let weights = softmax(probs.reshape([batch, classes, pixels]) * self.scale, 2);
        // [batch, pixels, channels]
        let feats = feats.reshape([batch, channels, pixels]).swap_dims(1, 2);

        weights
            .matmul(feats)
            .swap_dims(1, 2)
            .reshape([batch, channels, classes, 1])
    }
}

/// [`SpatialOcr`] Config.
#[derive(Config, Debug)]
pub struct SpatialOcrConfig {
    /// Pixel feature channels.
    pub in_channels: usize,

    /// Attention key/value channels.
    #[config(default = 256)]
    pub key_channels: usize,

    /// Output channels.
    #[config(default = 512)]
    pub out_channels: usize,

    /// Dropout probability on the output.
    #[config(default = 0.05)]
    pub dropout: f64,

    /// Query-side max-pooling factor; 1 disables pooling.
    #[config(default = 1)]
    pub pooling_scale: usize,

    /// Normalization config.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// The conv initializer.
    #[config(default = "HE_NORMAL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl SpatialOcrConfig {
    fn pointwise(
        &self,
        channels: [usize; 2],
    ) -> CNA2dConfig {
        CnaPolicy {
            norm: self.normalization.clone(),
            act: ActivationConfig::Relu,
        }
        .wrap(
            Conv2dConfig::new(channels, [1, 1])
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        )
    }

    /// Initialize a [`SpatialOcr`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> SpatialOcr<B> {
        assert!(self.pooling_scale > 0, "pooling scale must be positive");
        let (c, k) = (self.in_channels, self.key_channels);

        let pool = (self.pooling_scale > 1).then(|| {
            MaxPool2dConfig::new(scalar_to_array(self.pooling_scale))
                .with_strides(scalar_to_array(self.pooling_scale))
                .init()
        });

        SpatialOcr {
            pool,
            query: vec![
                self.pointwise([c, k]).init(device),
                self.pointwise([k, k]).init(device),
            ],
            key: vec![
                self.pointwise([c, k]).init(device),
                self.pointwise([k, k]).init(device),
            ],
            value: self.pointwise([c, k]).init(device),
            f_up: self.pointwise([k, k]).init(device),
            out: self.pointwise([k + c, self.out_channels]).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Pixel-to-class-context attention.
#[derive(Module, Debug)]
pub struct SpatialOcr<B: Backend> {
    /// Optional query-side max pooling.
    pub pool: Option<MaxPool2d>,

    /// Query projection of pixel features.
    pub query: Vec<CNA2d<B>>,

    /// Key projection of class contexts.
    pub key: Vec<CNA2d<B>>,

    /// Value projection of class contexts.
    pub value: CNA2d<B>,

    /// Projection of the attended context.
    pub f_up: CNA2d<B>,

    /// Fuses the attended context with the pixel features.
    pub out: CNA2d<B>,

    /// Output dropout.
    pub dropout: Dropout,
}

impl<B: Backend> SpatialOcr<B> {
    /// Pixel feature channels.
    pub fn in_channels(&self) -> usize {
        self.value.in_channels()
    }

    /// Attention key channels.
    pub fn key_channels(&self) -> usize {
        self.value.out_channels()
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        self.out.out_channels()
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `feats`: ``[batch, in_channels, height, width]`` pixel features.
    /// - `context`: ``[batch, in_channels, classes, 1]`` class contexts.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, height, width]``
    pub fn forward(
        &self,
        feats: Tensor<B, 4>,
        context: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &feats,
            &["batch", "height", "width"],
            &[("channels", self.in_channels())]
        );
        let [classes] = unpack_shape_contract!(
            ["batch", "channels", "classes", "one"],
            &context,
            &["classes"],
            &[
                ("batch", batch),
                ("channels", self.in_channels()),
                ("one", 1)
            ]
        );
        let key_channels = self.key_channels();

        let pooled = match &self.pool {
            Some(pool) => pool.forward(feats.clone()),
            None => feats.clone(),
        };
        let [_, _, q_height, q_width] = pooled.dims();

        let query = self.query.iter().fold(pooled, |x, layer| layer.forward(x));
        // [batch, pixels, key_channels]
        let query = query
            .reshape([batch, key_channels, q_height * q_width])
            .swap_dims(1, 2);

        let key = self
            .key
            .iter()
            .fold(context.clone(), |x, layer| layer.forward(x));
        // [batch, key_channels, classes]
        let key = key.reshape([batch, key_channels, classes]);

        // [batch, classes, key_channels]
        let value = self
            .value
            .forward(context)
            .reshape([batch, key_channels, classes])
            .swap_dims(1, 2);

        let sim = query.matmul(key) * (key_channels as f64).powf(-0.5);
        let sim = softmax(sim, 2);

        let attended = sim
            .matmul(value)
            .swap_dims(1, 2)
            .reshape([batch, key_channels, q_height, q_width]);
        let attended = self.f_up.forward(attended);
        let attended = resize_bilinear(attended, [height, width]);

        let x = Tensor::cat(vec![attended, feats], 1);
        let x = self.out.forward(x);
        let x = self.dropout.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("height", height),
                ("width", width)
            ]
        );

        x
    }
}

/// [`OcrHead`] Config.
#[derive(Config, Debug)]
pub struct OcrHeadConfig {
    /// Concatenated backbone channels.
    pub in_channels: usize,

    /// Number of classes.
    pub classes: usize,

    /// Width of the 3x3 pixel feature projection.
    #[config(default = 512)]
    pub mid_channels: usize,

    /// Attention key/value channels.
    #[config(default = 256)]
    pub key_channels: usize,

    /// Output channels of the OCR block.
    #[config(default = 512)]
    pub out_channels: usize,

    /// Dropout probability in the OCR block.
    #[config(default = 0.05)]
    pub dropout: f64,

    /// Temperature of the spatial gather softmax.
    #[config(default = 1.0)]
    pub gather_scale: f64,

    /// Query-side max-pooling factor; 1 disables pooling.
    #[config(default = 1)]
    pub pooling_scale: usize,

    /// Normalization config.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// The conv initializer.
    #[config(default = "HE_NORMAL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl OcrHeadConfig {
    /// Check the channel counts and probabilities.
    pub fn try_validate(&self) -> HrSegResult<()> {
        if [self.mid_channels, self.key_channels, self.out_channels, self.pooling_scale]
            .contains(&0)
        {
            return Err(HrSegError::InvalidConfig(
                "ocr channel counts and pooling scale must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.dropout) {
            return Err(HrSegError::InvalidConfig(format!(
                "ocr dropout must be in [0, 1]: {}",
                self.dropout
            )));
        }
        if !self.gather_scale.is_finite() {
            return Err(HrSegError::InvalidConfig(format!(
                "ocr gather scale must be finite: {}",
                self.gather_scale
            )));
        }
        Ok(())
    }

    /// Initialize an [`OcrHead`].
    ///
    /// # Panics
    ///
    /// If [`OcrHeadConfig::try_validate`] fails.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> OcrHead<B> {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }
        let c = self.in_channels;
        let policy = CnaPolicy {
            norm: self.normalization.clone(),
            act: ActivationConfig::Relu,
        };

        let aux_mix = policy.wrap(
            Conv2dConfig::new([c, c], [1, 1])
                .with_initializer(self.initializer.clone())
                .with_bias(true),
        );
        let aux_classifier = Conv2dConfig::new([c, self.classes], [1, 1])
            .with_initializer(self.initializer.clone())
            .with_bias(true);

        let mid = policy.wrap(
            Conv2dConfig::new([c, self.mid_channels], scalar_to_array(3))
                .with_padding(same_padding(3))
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        );

        let ocr = SpatialOcrConfig::new(self.mid_channels)
            .with_key_channels(self.key_channels)
            .with_out_channels(self.out_channels)
            .with_dropout(self.dropout)
            .with_pooling_scale(self.pooling_scale)
            .with_normalization(self.normalization.clone())
            .with_initializer(self.initializer.clone());

        let classifier = Conv2dConfig::new([self.out_channels, self.classes], [1, 1])
            .with_initializer(self.initializer)
            .with_bias(true);

        OcrHead {
            aux_mix: aux_mix.init(device),
            aux_classifier: aux_classifier.init(device),
            mid: mid.init(device),
            gather: SpatialGather {
                scale: self.gather_scale,
            },
            ocr: ocr.init(device),
            classifier: classifier.init(device),
        }
    }
}

/// `HRNet-OCR` segmentation head.
#[derive(Module, Debug)]
pub struct OcrHead<B: Backend> {
    /// 1x1 conv/norm/act of the auxiliary branch.
    pub aux_mix: CNA2d<B>,

    /// Auxiliary 1x1 classifier.
    pub aux_classifier: Conv2d<B>,

    /// 3x3 pixel feature projection.
    pub mid: CNA2d<B>,

    /// Class context pooling.
    pub gather: SpatialGather,

    /// Pixel-to-context attention.
    pub ocr: SpatialOcr<B>,

    /// Primary 1x1 classifier.
    pub classifier: Conv2d<B>,
}

impl<B: Backend> OcrHead<B> {
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
    /// ``(primary, auxiliary)`` logits, each ``[batch, classes, height, width]``.
    pub fn forward(
        &self,
        branches: BranchSet<B>,
        output_size: [usize; 2],
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let feats = upsample_concat(branches);

        let aux = self.aux_mix.forward(feats.clone());
        let aux = self.aux_classifier.forward(aux);

        let feats = self.mid.forward(feats);
        let context = self.gather.forward(feats.clone(), aux.clone());
        let feats = self.ocr.forward(feats, context);
        let primary = self.classifier.forward(feats);

        (
            resize_bilinear(primary, output_size),
            resize_bilinear(aux, output_size),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tolerance};

    type B = NdArray<f32>;

    #[test]
    fn test_spatial_gather_uniform_logits_average() {
        let device = Default::default();
        let feats: Tensor<B, 4> = Tensor::from_data(
            [[[[1.0, 2.0], [3.0, 4.0]], [[0.0, 0.0], [4.0, 8.0]]]],
            &device,
        );
        let probs: Tensor<B, 4> = Tensor::zeros([1, 3, 2, 2], &device);

        let context = SpatialGather::default().forward(feats, probs);
        assert_eq!(context.dims(), [1, 2, 3, 1]);

        let expected: Tensor<B, 4> =
            Tensor::from_data([[[[2.5], [2.5], [2.5]], [[3.0], [3.0], [3.0]]]], &device);
        context
            .to_data()
            .assert_approx_eq::<f32>(&expected.to_data(), Tolerance::default());
    }

    #[test]
    fn test_spatial_gather_peaked_logits_select_pixel() {
        let device = Default::default();
        let feats: Tensor<B, 4> = Tensor::from_data([[[[1.0, 2.0, 3.0]]]], &device);
        let probs: Tensor<B, 4> = Tensor::from_data([[[[0.0, 0.0, 50.0]]]], &device);

        let context = SpatialGather { scale: 1.0 }.forward(feats, probs);
        let value: f32 = context.into_scalar();
        assert!((value - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_spatial_ocr_shapes() {
        let device = Default::default();

        for pooling_scale in [1, 2] {
            let ocr: SpatialOcr<B> = SpatialOcrConfig::new(6)
                .with_key_channels(4)
                .with_out_channels(5)
                .with_pooling_scale(pooling_scale)
                .init(&device);
            assert_eq!(ocr.pool.is_some(), pooling_scale > 1);
            assert_eq!(ocr.in_channels(), 6);
            assert_eq!(ocr.key_channels(), 4);

            let feats = Tensor::random([2, 6, 8, 6], Distribution::Default, &device);
            let context = Tensor::random([2, 6, 3, 1], Distribution::Default, &device);

            let out = ocr.forward(feats, context);
            assert_shape_contract!(
                ["batch", "channels", "height", "width"],
                &out,
                &[("batch", 2), ("channels", 5), ("height", 8), ("width", 6)]
            );
        }
    }

    #[test]
    fn test_ocr_head_config_validation() {
        let config = OcrHeadConfig::new(10, 3);
        assert_eq!(config.mid_channels, 512);
        assert_eq!(config.key_channels, 256);
        assert_eq!(config.out_channels, 512);
        assert_eq!(config.dropout, 0.05);
        assert!(config.try_validate().is_ok());

        assert!(config.clone().with_dropout(1.5).try_validate().is_err());
        assert!(config.with_key_channels(0).try_validate().is_err());
    }

    #[test]
    fn test_ocr_head_forward() {
        let device = Default::default();
        let head: OcrHead<B> = OcrHeadConfig::new(6, 3)
            .with_mid_channels(8)
            .with_key_channels(4)
            .with_out_channels(8)
            .init(&device);
        assert_eq!(head.classes(), 3);

        let branches: BranchSet<B> = [
            Tensor::random([2, 2, 4, 4], Distribution::Default, &device),
            Tensor::random([2, 4, 2, 2], Distribution::Default, &device),
        ]
        .into_iter()
        .collect();

        let (primary, aux) = head.forward(branches, [16, 16]);
        assert_eq!(primary.dims(), [2, 3, 16, 16]);
        assert_eq!(aux.dims(), [2, 3, 16, 16]);
    }
}
