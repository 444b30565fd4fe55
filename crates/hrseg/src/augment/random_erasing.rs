//! # Random Erasing
//!
//! With some probability, overwrite one random axis-aligned rectangle of a
//! ``[height, width, channels]`` image. The rectangle's area fraction is
//! drawn from ``[sl, sh)`` and its aspect ratio from ``[r1, 1/r1)``.

use crate::error::{HrSegError, HrSegResult};
use burn::prelude::{Backend, Config, Tensor};
use burn::tensor::TensorData;
use core::fmt;
use core::str::FromStr;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How an erased rectangle is filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErasingMethod {
    /// Uniform ``[0, 1)`` noise per element.
    #[default]
    Random,

    /// Ones.
    White,

    /// Zeros.
    Black,
}

impl ErasingMethod {
    /// The name accepted by [`ErasingMethod::from_str`].
    pub fn name(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::White => "white",
            Self::Black => "black",
        }
    }
}

impl fmt::Display for ErasingMethod {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ErasingMethod {
    type Err = HrSegError;

    fn from_str(s: &str) -> HrSegResult<Self> {
        match s {
            "random" => Ok(Self::Random),
            "white" => Ok(Self::White),
            "black" => Ok(Self::Black),
            _ => Err(HrSegError::InvalidErasingMethod(s.to_string())),
        }
    }
}

/// [`RandomErasing`] Config.
#[derive(Config, Debug)]
pub struct RandomErasingConfig {
    /// Probability of erasing.
    #[config(default = 0.5)]
    pub probability: f64,

    /// Lower bound of the erased area fraction.
    #[config(default = 0.02)]
    pub sl: f64,

    /// Upper bound of the erased area fraction.
    #[config(default = 0.4)]
    pub sh: f64,

    /// Lower bound of the aspect ratio; the upper bound is ``1 / r1``.
    #[config(default = 0.3)]
    pub r1: f64,

    /// Fill method.
    #[config(default = "ErasingMethod::Random")]
    pub method: ErasingMethod,

    /// Rectangle draws before giving up.
    #[config(default = 100)]
    pub max_attempts: usize,
}

impl RandomErasingConfig {
    /// Check the parameter ranges.
    pub fn try_validate(&self) -> HrSegResult<()> {
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(HrSegError::InvalidConfig(format!(
                "erasing probability must be in [0, 1]: {}",
                self.probability
            )));
        }
        if !(self.sl > 0.0 && self.sl <= self.sh && self.sh <= 1.0) {
            return Err(HrSegError::InvalidConfig(format!(
                "erasing area bounds require 0 < sl <= sh <= 1: sl={}, sh={}",
                self.sl, self.sh
            )));
        }
        if !(self.r1 > 0.0 && self.r1 <= 1.0) {
            return Err(HrSegError::InvalidConfig(format!(
                "erasing aspect bound must be in (0, 1]: {}",
                self.r1
            )));
        }
        if self.max_attempts == 0 {
            return Err(HrSegError::InvalidConfig(
                "erasing max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Build a [`RandomErasing`].
    ///
    /// # Errors
    ///
    /// [`HrSegError::InvalidConfig`] if [`RandomErasingConfig::try_validate`] fails.
    pub fn init(self) -> HrSegResult<RandomErasing> {
        self.try_validate()?;
        Ok(RandomErasing { config: self })
    }
}

/// An erased rectangle, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErasedRegion {
    /// First row.
    pub top: usize,

    /// First column.
    pub left: usize,

    /// Row count.
    pub height: usize,

    /// Column count.
    pub width: usize,
}

/// Uniform draw from ``[low, high)``; `low` when the range is empty.
fn uniform<R: Rng + ?Sized>(
    rng: &mut R,
    low: f64,
    high: f64,
) -> f64 {
    if low < high {
        rng.random_range(low..high)
    } else {
        low
    }
}

/// Random Erasing augmentation.
#[derive(Debug, Clone)]
pub struct RandomErasing {
    config: RandomErasingConfig,
}

impl RandomErasing {
    /// The config.
    pub fn config(&self) -> &RandomErasingConfig {
        &self.config
    }

    /// Draw the rectangle to erase from a ``[height, width]`` image.
    ///
    /// `None` when the probability draw declines, or no rectangle fits
    /// within `max_attempts` draws.
    pub fn sample_region<R: Rng + ?Sized>(
        &self,
        resolution: [usize; 2],
        rng: &mut R,
    ) -> Option<ErasedRegion> {
        let cfg = &self.config;
        let u: f64 = rng.random();
        if u >= cfg.probability {
            tracing::trace!(u, probability = cfg.probability, "erasing skipped");
            return None;
        }

        let [img_height, img_width] = resolution;
        let area = (img_height * img_width) as f64;

        for attempt in 0..cfg.max_attempts {
            let target_area = uniform(rng, cfg.sl, cfg.sh) * area;
            let aspect = uniform(rng, cfg.r1, 1.0 / cfg.r1);
            let height = (target_area * aspect).sqrt().round_ties_even() as usize;
            let width = (target_area / aspect).sqrt().round_ties_even() as usize;

            if height == 0 || width == 0 || height > img_height || width > img_width {
                continue;
            }

            let top = if height == img_height {
                0
            } else {
                rng.random_range(0..img_height - height)
            };
            let left = if width == img_width {
                0
            } else {
                rng.random_range(0..img_width - width)
            };

            let region = ErasedRegion {
                top,
                left,
                height,
                width,
            };
            tracing::trace!(?region, attempt, "erasing region");
            return Some(region);
        }

        tracing::trace!(max_attempts = cfg.max_attempts, "erasing found no fit");
        None
    }

    /// Erase a rectangle of a ``[height, width, channels]`` image; the label passes through.
    pub fn apply<B: Backend, L, R: Rng + ?Sized>(
        &self,
        image: Tensor<B, 3>,
        label: L,
        rng: &mut R,
    ) -> (Tensor<B, 3>, L) {
        let [height, width, channels] = image.dims();
        let Some(region) = self.sample_region([height, width], rng) else {
            return (image, label);
        };

        let device = image.device();
        let shape = [region.height, region.width, channels];
        let fill: Tensor<B, 3> = match self.config.method {
            ErasingMethod::Black => Tensor::zeros(shape, &device),
            ErasingMethod::White => Tensor::ones(shape, &device),
            ErasingMethod::Random => {
                let values: Vec<f32> = (0..shape.iter().product::<usize>())
                    .map(|_| rng.random::<f32>())
                    .collect();
                Tensor::from_data(TensorData::new(values, shape), &device)
            }
        };

        let image = image.slice_assign(
            [
                region.top..region.top + region.height,
                region.left..region.left + region.width,
                0..channels,
            ],
            fill,
        );
        (image, label)
    }
}
