//! # Feature Maps and Branch Sets
//!
//! [`FeatureMap`] pairs a ``[batch, channels, height, width]`` tensor with its
//! shape, validated when the map is built.
//!
//! [`BranchSet`] holds the parallel resolution branches flowing between
//! `HRNet` stages, as a fixed array of [`MAX_BRANCHES`] optional slots.
//! Slots fill from the highest resolution (index 0) down; every branch
//! shares the same batch size.

use crate::models::hrnet::variant::MAX_BRANCHES;
use bimm_contracts::unpack_shape_contract;
use burn::prelude::{Backend, Tensor};

/// The shape of a [`FeatureMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureMapShape {
    /// Batch size.
    pub batch: usize,

    /// Channel count.
    pub channels: usize,

    /// Height in pixels.
    pub height: usize,

    /// Width in pixels.
    pub width: usize,
}

impl FeatureMapShape {
    /// Construct a shape.
    pub fn new(
        batch: usize,
        channels: usize,
        height: usize,
        width: usize,
    ) -> Self {
        Self {
            batch,
            channels,
            height,
            width,
        }
    }

    /// The spatial ``[height, width]``.
    pub fn resolution(&self) -> [usize; 2] {
        [self.height, self.width]
    }

    /// The ``[batch, channels, height, width]`` dims.
    pub fn dims(&self) -> [usize; 4] {
        [self.batch, self.channels, self.height, self.width]
    }
}

impl From<[usize; 4]> for FeatureMapShape {
    fn from(dims: [usize; 4]) -> Self {
        let [batch, channels, height, width] = dims;
        Self::new(batch, channels, height, width)
    }
}

/// A shape-checked ``[batch, channels, height, width]`` feature map.
#[derive(Debug, Clone)]
pub struct FeatureMap<B: Backend> {
    shape: FeatureMapShape,
    tensor: Tensor<B, 4>,
}

impl<B: Backend> FeatureMap<B> {
    /// Wrap a tensor, recording its shape.
    pub fn new(tensor: Tensor<B, 4>) -> Self {
        Self {
            shape: tensor.dims().into(),
            tensor,
        }
    }

    /// Wrap a tensor, checking its batch and channel counts.
    ///
    /// # Panics
    ///
    /// If the tensor's batch or channel count differ from the expected values.
    pub fn expect(
        tensor: Tensor<B, 4>,
        batch: usize,
        channels: usize,
    ) -> Self {
        let [height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &tensor,
            &["height", "width"],
            &[("batch", batch), ("channels", channels)]
        );
        Self {
            shape: FeatureMapShape::new(batch, channels, height, width),
            tensor,
        }
    }

    /// The shape of the map.
    pub fn shape(&self) -> FeatureMapShape {
        self.shape
    }

    /// Borrow the tensor.
    pub fn tensor(&self) -> &Tensor<B, 4> {
        &self.tensor
    }

    /// Unwrap the tensor.
    pub fn into_tensor(self) -> Tensor<B, 4> {
        self.tensor
    }
}

/// The parallel resolution branches of an `HRNet` stage.
#[derive(Debug, Clone)]
pub struct BranchSet<B: Backend> {
    slots: [Option<FeatureMap<B>>; MAX_BRANCHES],
}

impl<B: Backend> Default for BranchSet<B> {
    fn default() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }
}

impl<B: Backend> FromIterator<Tensor<B, 4>> for BranchSet<B> {
    fn from_iter<I: IntoIterator<Item = Tensor<B, 4>>>(iter: I) -> Self {
        let mut branches = Self::default();
        for tensor in iter {
            branches.push(FeatureMap::new(tensor));
        }
        branches
    }
}

impl<B: Backend> BranchSet<B> {
    /// A branch set holding a single branch.
    pub fn single(tensor: Tensor<B, 4>) -> Self {
        Self::from_iter([tensor])
    }

    /// The number of occupied branches.
    pub fn arity(&self) -> usize {
        self.slots.iter().take_while(|slot| slot.is_some()).count()
    }

    /// The shared batch size; `None` for an empty set.
    pub fn batch(&self) -> Option<usize> {
        self.slots[0].as_ref().map(|map| map.shape().batch)
    }

    /// Append a lower-resolution branch.
    ///
    /// # Panics
    ///
    /// If all slots are full, or the batch size differs from the existing branches.
    pub fn push(
        &mut self,
        map: FeatureMap<B>,
    ) {
        let arity = self.arity();
        assert!(
            arity < MAX_BRANCHES,
            "branch set is full ({MAX_BRANCHES} branches)"
        );
        if let Some(batch) = self.batch() {
            assert_eq!(
                map.shape().batch,
                batch,
                "branch {arity} batch size differs from branch 0"
            );
        }
        self.slots[arity] = Some(map);
    }

    /// Get branch `index`, if present.
    pub fn get(
        &self,
        index: usize,
    ) -> Option<&FeatureMap<B>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// The shapes of the occupied branches.
    pub fn shapes(&self) -> Vec<FeatureMapShape> {
        self.iter().map(FeatureMap::shape).collect()
    }

    /// Iterate the occupied branches, from highest resolution.
    pub fn iter(&self) -> impl Iterator<Item = &FeatureMap<B>> {
        self.slots.iter().map_while(Option::as_ref)
    }

    /// Unwrap the branch tensors, from highest resolution.
    pub fn into_tensors(self) -> Vec<Tensor<B, 4>> {
        self.slots
            .into_iter()
            .map_while(|slot| slot.map(FeatureMap::into_tensor))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_feature_map_shape() {
        let device = Default::default();
        let map: FeatureMap<B> = FeatureMap::new(Tensor::zeros([2, 3, 8, 6], &device));

        assert_eq!(map.shape(), FeatureMapShape::new(2, 3, 8, 6));
        assert_eq!(map.shape().resolution(), [8, 6]);
        assert_eq!(map.shape().dims(), [2, 3, 8, 6]);

        let map: FeatureMap<B> = FeatureMap::expect(map.into_tensor(), 2, 3);
        assert_eq!(map.tensor().dims(), [2, 3, 8, 6]);
    }

    #[test]
    #[should_panic]
    fn test_feature_map_expect_channels() {
        let device = Default::default();
        FeatureMap::<B>::expect(Tensor::zeros([2, 3, 8, 6], &device), 2, 4);
    }

    #[test]
    fn test_branch_set_growth() {
        let device = Default::default();
        let mut branches: BranchSet<B> = BranchSet::default();
        assert_eq!(branches.arity(), 0);
        assert_eq!(branches.batch(), None);

        for (idx, size) in [16, 8, 4, 2].into_iter().enumerate() {
            branches.push(FeatureMap::new(Tensor::zeros([2, 4 << idx, size, size], &device)));
            assert_eq!(branches.arity(), idx + 1);
        }

        assert_eq!(branches.batch(), Some(2));
        assert_eq!(branches.get(3).unwrap().shape().resolution(), [2, 2]);
        assert!(branches.get(4).is_none());
        assert_eq!(
            branches.shapes(),
            vec![
                FeatureMapShape::new(2, 4, 16, 16),
                FeatureMapShape::new(2, 8, 8, 8),
                FeatureMapShape::new(2, 16, 4, 4),
                FeatureMapShape::new(2, 32, 2, 2),
            ]
        );
        assert_eq!(branches.into_tensors().len(), 4);
    }

    #[test]
    #[should_panic(expected = "branch set is full")]
    fn test_branch_set_overflow() {
        let device = Default::default();
        let branches: BranchSet<B> =
            (0..5).map(|_| Tensor::zeros([1, 1, 1, 1], &device)).collect();
        assert_eq!(branches.arity(), 5);
    }

    #[test]
    #[should_panic(expected = "batch size differs")]
    fn test_branch_set_batch_mismatch() {
        let device = Default::default();
        let mut branches: BranchSet<B> = BranchSet::single(Tensor::zeros([2, 1, 4, 4], &device));
        branches.push(FeatureMap::new(Tensor::zeros([3, 1, 2, 2], &device)));
    }
}
