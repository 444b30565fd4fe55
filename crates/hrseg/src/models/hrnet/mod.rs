//! # `HRNet` / `HRNet-OCR` Semantic Segmentation
//!
//! High-Resolution Networks keep a full-resolution branch alive through the
//! whole network, adding one lower-resolution branch per stage and
//! repeatedly fusing information across all branches.
//!
//! ```text
//! input [b, c, h, w]
//!   -> stem                      1 branch  (1/4)
//!   -> stage 1: transition, 1x   2 branches (1/4, 1/8)
//!   -> stage 2: transition, 4x   3 branches (.., 1/16)
//!   -> stage 3: transition, 3x   4 branches (.., 1/32)
//!   -> head (plain or OCR)       [b, classes, h, w]
//! ```
//!
//! Each stage repetition is a [`stage::HighResolutionModule`]:
//! [`branches::ParallelBranches`] followed by [`fusion::FuseLayer`].
//!
//! Entry points are [`HrNetSegConfig`] / [`HrNetOcrConfig`], or the
//! [`seg_hrnet`] / [`seg_hrnet_ocr`] builders.

pub mod backbone;
pub mod basic_block;
pub mod bottleneck;
pub mod branches;
pub mod feature_map;
pub mod fusion;
pub mod head;
pub mod model;
pub mod ocr;
pub mod output_activation;
pub mod residual;
pub mod stage;
pub mod stem;
pub mod transition;
pub mod util;
pub mod variant;

pub use feature_map::{BranchSet, FeatureMap, FeatureMapShape};
pub use model::{
    HrNetOcr, HrNetOcrConfig, HrNetOcrOutput, HrNetSeg, HrNetSegConfig, seg_hrnet, seg_hrnet_ocr,
};
pub use output_activation::OutputActivation;
pub use variant::{HrNetVariant, MAX_BRANCHES, WidthSchedule};
