use crate::autofunc::gradient::{Gradient, RGradient};
use std::borrow::Cow;
use std::rc::Rc;

/// A node of the computation graph, evaluated for one forward pass.
///
/// `upstream` arguments are optional: `None` stands for an all-zero upstream
/// vector of the node's output length, and every implementation must behave
/// exactly as if it had been given those zeros.
pub trait ResultNode {
    /// The forward value.
    fn output(&self) -> &[f64];

    /// True iff no variable tracked by `g` can influence this node.
    fn constant(&self, g: &Gradient) -> bool;

    /// Accumulates `upstream`'s contribution into `g` for every reachable
    /// tracked variable.
    fn propagate_gradient(&self, upstream: Option<&[f64]>, g: &mut Gradient);
}

/// A graph node that also carries the directional derivative of its output.
pub trait RResultNode {
    fn output(&self) -> &[f64];

    /// Derivative of [`output`](RResultNode::output) along the direction the
    /// graph was built with.
    fn r_output(&self) -> &[f64];

    /// True iff no variable tracked by `rg` or `g` can influence this node.
    fn constant(&self, rg: &RGradient, g: &Gradient) -> bool;

    /// Dual backward pass. `upstream` and `upstream_r` each independently
    /// follow the `None`-means-zero rule.
    fn propagate_r_gradient(
        &self,
        upstream: Option<&[f64]>,
        upstream_r: Option<&[f64]>,
        rg: &mut RGradient,
        g: &mut Gradient,
    );
}

pub type ResultRef = Rc<dyn ResultNode>;
pub type RResultRef = Rc<dyn RResultNode>;

/// Resolves an optional upstream vector into a concrete one of length `len`.
///
/// # Panics
/// Panics if a provided upstream has the wrong length.
pub fn upstream_or_zeros(upstream: Option<&[f64]>, len: usize) -> Cow<'_, [f64]> {
    match upstream {
        Some(u) => {
            assert_eq!(u.len(), len, "upstream length must match output length");
            Cow::Borrowed(u)
        }
        None => Cow::Owned(vec![0.0; len]),
    }
}
