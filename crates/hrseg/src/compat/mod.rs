//! # Layer Wrappers
//!
//! Config-selectable wrappers over the `burn::nn` activation and
//! normalization layers.

pub mod activation_wrapper;
pub mod normalization_wrapper;
