//! # Image Augmentations
//!
//! Per-example transforms over ``[height, width, channels]`` image tensors.
//! Every draw comes from a caller-provided [`rand::Rng`], so a seeded
//! generator reproduces the same augmentation.

pub mod grid_mask;
pub mod random_erasing;

pub use grid_mask::{GridMask, GridMaskConfig, GridMaskParams};
pub use random_erasing::{ErasedRegion, ErasingMethod, RandomErasing, RandomErasingConfig};
