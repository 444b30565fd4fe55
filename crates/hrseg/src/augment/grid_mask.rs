//! # `GridMask`
//!
//! Structured occlusion: a rotated grid of square holes is cut out of the
//! image. Holes have side ``l = round(d * ratio)`` and repeat every `d`
//! pixels along both axes, for a period `d` drawn from ``[d1, d2)``.
//!
//! The grid is drawn on a square canvas large enough to cover the image at
//! any rotation, rotated about its center by ``rotate * N(0, 1)`` degrees
//! (nearest-neighbour, uncovered corners are masked), and center-cropped
//! to the image.

use crate::error::{HrSegError, HrSegResult};
use burn::prelude::{Backend, Config, Tensor};
use burn::tensor::TensorData;
use rand::Rng;
use rand_distr::StandardNormal;

/// [`GridMask`] Config.
#[derive(Config, Debug)]
pub struct GridMaskConfig {
    /// Inclusive lower bound of the grid period.
    #[config(default = 80)]
    pub d1: usize,

    /// Exclusive upper bound of the grid period.
    #[config(default = 130)]
    pub d2: usize,

    /// Scale, in degrees, of the normally distributed rotation angle.
    #[config(default = 20.0)]
    pub rotate: f64,

    /// Hole side as a fraction of the period.
    #[config(default = 0.4)]
    pub ratio: f64,
}

impl GridMaskConfig {
    /// Check the parameter ranges.
    pub fn try_validate(&self) -> HrSegResult<()> {
        if self.d1 == 0 || self.d1 >= self.d2 {
            return Err(HrSegError::InvalidConfig(format!(
                "gridmask requires 1 <= d1 < d2: d1={}, d2={}",
                self.d1, self.d2
            )));
        }
        if !(0.0..=1.0).contains(&self.ratio) {
            return Err(HrSegError::InvalidConfig(format!(
                "gridmask ratio must be in [0, 1]: {}",
                self.ratio
            )));
        }
        if !self.rotate.is_finite() {
            return Err(HrSegError::InvalidConfig(format!(
                "gridmask rotate must be finite: {}",
                self.rotate
            )));
        }
        Ok(())
    }

    /// Build a [`GridMask`].
    ///
    /// # Errors
    ///
    /// [`HrSegError::InvalidConfig`] if [`GridMaskConfig::try_validate`] fails.
    pub fn init(self) -> HrSegResult<GridMask> {
        self.try_validate()?;
        Ok(GridMask { config: self })
    }
}

/// One draw of the grid parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridMaskParams {
    /// Grid period.
    pub d: usize,

    /// Hole side.
    pub l: usize,

    /// Row offset of the first band, in ``[0, d)``.
    pub st_h: usize,

    /// Column offset of the first band, in ``[0, d)``.
    pub st_w: usize,

    /// Rotation, in degrees.
    pub angle: f64,
}

impl GridMaskParams {
    fn in_band(
        &self,
        pos: i64,
        start: usize,
    ) -> bool {
        (pos - start as i64).rem_euclid(self.d as i64) < self.l as i64
    }

    /// Is the unrotated canvas pixel at ``(row, col)`` inside a hole?
    pub fn occluded(
        &self,
        row: i64,
        col: i64,
    ) -> bool {
        self.in_band(row, self.st_h) && self.in_band(col, self.st_w)
    }

    /// Render the ``height * width`` row-major keep-mask.
    ///
    /// Values are 1.0 where the image is kept, 0.0 where it is masked.
    pub fn render(
        &self,
        height: usize,
        width: usize,
    ) -> Vec<f32> {
        let side = canvas_side(height, width) as i64;
        let half = side / 2;
        let top = (side - height as i64) / 2;
        let left = (side - width as i64) / 2;

        let radians = self.angle.to_radians();
        let (sin, cos) = radians.sin_cos();
        let rotated = self.angle != 0.0;

        let mut values = Vec::with_capacity(height * width);
        for row in 0..height as i64 {
            for col in 0..width as i64 {
                let (y, x) = (row + top, col + left);
                let (src_y, src_x) = if rotated {
                    let (nx, ny) = ((x - half) as f64, (y - half) as f64);
                    (
                        (-sin * nx + cos * ny).round_ties_even() as i64 + half,
                        (cos * nx + sin * ny).round_ties_even() as i64 + half,
                    )
                } else {
                    (y, x)
                };

                let inside = (0..side).contains(&src_y) && (0..side).contains(&src_x);
                let keep = inside && !self.occluded(src_y, src_x);
                values.push(if keep { 1.0 } else { 0.0 });
            }
        }
        values
    }
}

/// Side of the square canvas covering an image at any rotation.
///
/// ``ceil(sqrt(height^2 + width^2))``, rounded up to even.
pub fn canvas_side(
    height: usize,
    width: usize,
) -> usize {
    let diagonal = ((height * height + width * width) as f64).sqrt().ceil() as usize;
    diagonal + diagonal % 2
}

/// `GridMask` augmentation.
#[derive(Debug, Clone)]
pub struct GridMask {
    config: GridMaskConfig,
}

impl GridMask {
    /// The config.
    pub fn config(&self) -> &GridMaskConfig {
        &self.config
    }

    /// Draw grid parameters.
    pub fn sample_params<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> GridMaskParams {
        let d = rng.random_range(self.config.d1..self.config.d2);
        let l = (d as f64 * self.config.ratio + 0.5) as usize;
        let st_h = rng.random_range(0..d);
        let st_w = rng.random_range(0..d);
        let angle = if self.config.rotate == 0.0 {
            0.0
        } else {
            let z: f64 = rng.sample(StandardNormal);
            self.config.rotate * z
        };

        let params = GridMaskParams {
            d,
            l,
            st_h,
            st_w,
            angle,
        };
        tracing::trace!(?params, "gridmask draw");
        params
    }

    /// Draw a ``[height, width, 1]`` keep-mask.
    pub fn mask<B: Backend, R: Rng + ?Sized>(
        &self,
        resolution: [usize; 2],
        rng: &mut R,
        device: &B::Device,
    ) -> Tensor<B, 3> {
        let [height, width] = resolution;
        let values = self.sample_params(rng).render(height, width);
        Tensor::from_data(TensorData::new(values, [height, width, 1]), device)
    }

    /// Mask a ``[height, width, channels]`` image; the label passes through.
    pub fn apply<B: Backend, L, R: Rng + ?Sized>(
        &self,
        image: Tensor<B, 3>,
        label: L,
        rng: &mut R,
    ) -> (Tensor<B, 3>, L) {
        let [height, width, channels] = image.dims();
        let mask = self
            .mask::<B, R>([height, width], rng, &image.device())
            .repeat_dim(2, channels);
        (image * mask, label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    type B = NdArray<f32>;

    #[test]
    fn test_config_validation() {
        let config = GridMaskConfig::new();
        assert_eq!((config.d1, config.d2), (80, 130));
        assert_eq!(config.rotate, 20.0);
        assert_eq!(config.ratio, 0.4);
        assert!(config.try_validate().is_ok());

        assert!(GridMaskConfig::new().with_d1(0).try_validate().is_err());
        assert!(
            GridMaskConfig::new()
                .with_d1(10)
                .with_d2(10)
                .init()
                .is_err()
        );
        assert_eq!(
            GridMaskConfig::new().with_ratio(1.5).try_validate(),
            Err(HrSegError::InvalidConfig(
                "gridmask ratio must be in [0, 1]: 1.5".to_string()
            ))
        );
        assert!(
            GridMaskConfig::new()
                .with_rotate(f64::NAN)
                .try_validate()
                .is_err()
        );
    }

    #[test]
    fn test_canvas_side() {
        assert_eq!(canvas_side(3, 4), 6);
        assert_eq!(canvas_side(512, 512), 726);
        assert_eq!(canvas_side(1, 1), 2);
    }

    #[test]
    fn test_sample_params_ranges() {
        let grid = GridMaskConfig::new().init().unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let params = grid.sample_params(&mut rng);
            assert!((80..130).contains(&params.d));
            assert_eq!(params.l, (params.d as f64 * 0.4).round() as usize);
            assert!(params.st_h < params.d);
            assert!(params.st_w < params.d);
            assert!(params.angle.is_finite());
        }
    }

    #[test]
    fn test_unrotated_pattern_is_periodic() {
        let params = GridMaskParams {
            d: 4,
            l: 2,
            st_h: 1,
            st_w: 3,
            angle: 0.0,
        };
        let (height, width) = (10, 12);
        let values = params.render(height, width);

        let side = canvas_side(height, width) as i64;
        let (top, left) = ((side - height as i64) / 2, (side - width as i64) / 2);
        for row in 0..height {
            for col in 0..width {
                let y = row as i64 + top;
                let x = col as i64 + left;
                let row_band = (y - 1).rem_euclid(4) < 2;
                let col_band = (x - 3).rem_euclid(4) < 2;
                let expected = if row_band && col_band { 0.0 } else { 1.0 };
                assert_eq!(values[row * width + col], expected, "pixel ({row}, {col})");
            }
        }
    }

    #[test]
    fn test_zero_ratio_keeps_everything() {
        let params = GridMaskParams {
            d: 5,
            l: 0,
            st_h: 2,
            st_w: 1,
            angle: 0.0,
        };
        assert!(params.render(7, 9).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_rotated_mask_is_binary() {
        let params = GridMaskParams {
            d: 6,
            l: 3,
            st_h: 0,
            st_w: 0,
            angle: 33.0,
        };
        let values = params.render(16, 20);
        assert_eq!(values.len(), 16 * 20);
        assert!(values.iter().all(|&v| v == 0.0 || v == 1.0));
        assert!(values.contains(&0.0));
        assert!(values.contains(&1.0));
    }

    #[test]
    fn test_mask_is_reproducible() {
        let device = Default::default();
        let grid = GridMaskConfig::new().with_d1(4).with_d2(9).init().unwrap();

        let a: Tensor<B, 3> = grid.mask([24, 18], &mut StdRng::seed_from_u64(3), &device);
        let b: Tensor<B, 3> = grid.mask([24, 18], &mut StdRng::seed_from_u64(3), &device);
        assert_eq!(a.dims(), [24, 18, 1]);
        a.to_data().assert_eq(&b.to_data(), true);
    }

    #[test]
    fn test_apply_masks_every_channel() {
        let device = Default::default();
        let grid = GridMaskConfig::new()
            .with_d1(4)
            .with_d2(6)
            .with_rotate(0.0)
            .with_ratio(0.5)
            .init()
            .unwrap();

        let image: Tensor<B, 3> = Tensor::ones([12, 10, 3], &device);
        let label = vec![1u8, 2, 3];

        let mut rng = StdRng::seed_from_u64(11);
        let params = grid.sample_params(&mut rng.clone());
        let (masked, label_out) = grid.apply(image, label.clone(), &mut rng);
        assert_eq!(label_out, label);
        assert_eq!(masked.dims(), [12, 10, 3]);

        let expected = params.render(12, 10);
        let data = masked.to_data().to_vec::<f32>().unwrap();
        for (idx, &keep) in expected.iter().enumerate() {
            for ch in 0..3 {
                assert_eq!(data[idx * 3 + ch], keep);
            }
        }
    }
}
