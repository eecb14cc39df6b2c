//! Flat parameter-vector layout for a [`LayerStack`](crate::stack::LayerStack).
//!
//! Every tensor owned by the stack is described by one segment. Segments are
//! emitted in a fixed order (block 0 weights, visible bias, hidden bias, block 1 …,
//! head weights, head bias) and tile `0..len()` without gaps, so flatten and
//! unflatten always agree on where each value lives.

use ndarray::Array1;
use serde::Serialize;

pub type ParameterVector = Array1<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParamSlot {
    BlockWeights(usize),
    BlockVisibleBias(usize),
    BlockHiddenBias(usize),
    HeadWeights,
    HeadBias,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamSegment {
    pub slot: ParamSlot,
    pub offset: usize,
    pub len: usize,
}

impl ParamSegment {
    pub fn range(&self) -> std::ops::Range<usize> { self.offset..self.offset + self.len }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParamLayout {
    segments: Vec<ParamSegment>,
    total: usize,
}

impl ParamLayout {
    pub(crate) fn push(&mut self, slot: ParamSlot, len: usize) {
        self.segments.push(ParamSegment { slot, offset: self.total, len });
        self.total += len;
    }

    pub fn segments(&self) -> &[ParamSegment] { &self.segments }

    /// Θ, the length of the flattened vector.
    pub fn len(&self) -> usize { self.total }

    pub fn is_empty(&self) -> bool { self.total == 0 }

    pub fn find(&self, slot: ParamSlot) -> Option<&ParamSegment> { self.segments.iter().find(|s| s.slot == slot) }
}
