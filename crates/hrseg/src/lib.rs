#![warn(missing_docs)]
#![recursion_limit = "256"]
//! # hrseg - High Resolution Segmentation
//!
//! ## Notable Components
//!
//! * [`compat`] - activation and normalization layer wrappers.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks::cna`] - ``Conv2d + Norm + Activation`` block.
//!   * [`layers::blocks::conv_norm`] - ``Conv2d + Norm`` block, for sums activated later.
//!   * [`layers::resize`] - align-corners bilinear resizing.
//! * [`models`] - complete model families.
//!   * [`models::hrnet`] - `HRNet` and `HRNet-OCR` segmentation networks.
//! * [`augment`] - per-example image augmentations.
//!   * [`augment::grid_mask`] - `GridMask` structured occlusion.
//!   * [`augment::random_erasing`] - Random Erasing.
//! * [`error`] - configuration errors.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod augment;
pub mod compat;
pub mod error;
pub mod layers;
pub mod models;

pub use error::HrSegError;
pub use models::hrnet::{
    HrNetOcr, HrNetOcrConfig, HrNetOcrOutput, HrNetSeg, HrNetSegConfig, HrNetVariant,
    OutputActivation, seg_hrnet, seg_hrnet_ocr,
};
