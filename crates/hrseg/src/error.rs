//! # Error Types

use thiserror::Error;

/// Errors raised while configuring models and augmentations.
///
/// Tensor shape violations are not reported here; they panic through the
/// shape contracts in the forward passes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HrSegError {
    /// The requested HRNet variant name is not one of the known width schedules.
    #[error("unsupported hrnet type: {0:?} (expected one of hrnet_w18, hrnet_w32, hrnet_w48)")]
    UnsupportedVariant(String),

    /// The requested erasing fill method is unknown.
    #[error("unsupported erasing method: {0:?} (expected one of random, white, black)")]
    InvalidErasingMethod(String),

    /// A configuration value is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result alias for [`HrSegError`].
pub type HrSegResult<T> = Result<T, HrSegError>;
