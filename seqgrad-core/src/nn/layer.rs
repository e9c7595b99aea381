use crate::autofunc::{RResultRef, RVector, ResultRef, Variable};
use std::fmt::Debug;

/// A differentiable operator with learnable parameters.
///
/// Both forward entry points build a fresh graph node per call. The node
/// shares the layer's parameter buffers, so it is only meaningful until the
/// parameters are next modified.
pub trait Layer: Debug {
    /// Forward pass for reverse-mode differentiation.
    fn apply(&self, input: ResultRef) -> ResultRef;

    /// Forward pass that also propagates the directional derivative along `v`.
    fn apply_r(&self, v: &RVector, input: RResultRef) -> RResultRef;

    /// Every learnable variable of the layer.
    fn parameters(&self) -> Vec<Variable>;
}
