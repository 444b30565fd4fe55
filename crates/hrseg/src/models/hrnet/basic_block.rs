//! # Basic Residual Block
//!
//! The unit stacked inside every parallel branch:
//!
//! ```text
//! x -> 3x3 CNA (stride) -> 3x3 conv/norm -> (+ shortcut(x)) -> act
//! ```

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::ConvBlockMeta;
use crate::layers::blocks::cna::{CNA2d, CnaPolicy};
use crate::models::hrnet::residual::{
    ProjectionShortcut, ProjectionShortcutConfig, ResidualBlockMeta, needs_projection,
    shortcut_path,
};
use crate::models::hrnet::util::{HE_NORMAL_INITIALIZER, same_padding, scalar_to_array};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::Initializer;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`BasicBlock`] Config.
#[derive(Config, Debug)]
pub struct BasicBlockConfig {
    /// Input planes.
    pub in_planes: usize,

    /// Output planes.
    pub out_planes: usize,

    /// Stride of the first 3x3 conv, and of the projection.
    #[config(default = 1)]
    pub stride: usize,

    /// Project the shortcut even when the shapes already agree.
    #[config(default = false)]
    pub conv_shortcut: bool,

    /// Normalization, resized per layer.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,

    /// Hidden activation.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,

    /// The conv initializer.
    #[config(default = "HE_NORMAL_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl ResidualBlockMeta for BasicBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        self.out_planes
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl BasicBlockConfig {
    /// Will [`BasicBlockConfig::init`] build a projection shortcut?
    pub fn needs_projection(&self) -> bool {
        needs_projection(
            self.in_planes,
            self.out_planes,
            self.stride,
            self.conv_shortcut,
        )
    }

    fn conv3x3(
        &self,
        channels: [usize; 2],
        stride: usize,
    ) -> Conv2dConfig {
        Conv2dConfig::new(channels, [3, 3])
            .with_stride(scalar_to_array(stride))
            .with_padding(same_padding(3))
            .with_initializer(self.initializer.clone())
            .with_bias(false)
    }

    /// Initialize a [`BasicBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> BasicBlock<B> {
        let shortcut = self.needs_projection().then(|| {
            ProjectionShortcutConfig::new(self.in_planes, self.out_planes)
                .with_stride(self.stride)
                .with_norm(self.normalization.clone())
                .with_initializer(self.initializer.clone())
                .init(device)
        });

        let policy = CnaPolicy::new()
            .with_norm(self.normalization.clone())
            .with_act(self.activation.clone());

        let entry = policy.wrap(self.conv3x3([self.in_planes, self.out_planes], self.stride));
        let exit = policy.wrap(self.conv3x3([self.out_planes, self.out_planes], 1));

        BasicBlock {
            shortcut,
            cna1: entry.init(device),
            cna2: exit.init(device),
        }
    }
}

/// Two-layer residual block.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    /// Projection; the shortcut is the raw input when absent.
    pub shortcut: Option<ProjectionShortcut<B>>,

    /// Strided 3x3 layer.
    pub cna1: CNA2d<B>,

    /// Second 3x3 layer; the shortcut is added before its activation.
    pub cna2: CNA2d<B>,
}

impl<B: Backend> ResidualBlockMeta for BasicBlock<B> {
    fn in_planes(&self) -> usize {
        self.cna1.in_channels()
    }

    fn out_planes(&self) -> usize {
        self.cna2.out_channels()
    }

    fn stride(&self) -> usize {
        self.cna1.stride()[0]
    }
}

impl<B: Backend> BasicBlock<B> {
    /// Forward Pass.
    ///
    /// ``[b, in_planes, h, w]`` to ``[b, out_planes, ceil(h/s), ceil(w/s)]``.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "planes", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("planes", self.in_planes())],
        );
        let [out_height, out_width] = self.output_resolution([height, width]);

        let residual = shortcut_path(self.shortcut.as_ref(), &input);
        let x = self.cna1.forward(input);
        let x = self.cna2.hook_forward(x, |x| x + residual);

        assert_shape_contract_periodically!(
            ["batch", "planes", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("planes", self.out_planes()),
                ("height", out_height),
                ("width", out_width),
            ]
        );
        x
    }
}
