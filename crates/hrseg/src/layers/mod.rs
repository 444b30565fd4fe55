//! Layer building blocks below the model level.
pub mod blocks;
pub mod resize;
