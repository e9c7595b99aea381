//! Leaf and plumbing nodes: variable leaves, gradient pools and concatenation.

use crate::autofunc::gradient::{Gradient, RGradient};
use crate::autofunc::result::{upstream_or_zeros, RResultNode, RResultRef, ResultNode, ResultRef};
use crate::autofunc::variable::VarId;
use crate::ops;
use std::cell::RefCell;

/// Leaf holding a snapshot of a [`Variable`](crate::autofunc::Variable).
#[derive(Debug)]
pub struct VarNode {
    id: VarId,
    value: Vec<f64>,
}

impl VarNode {
    pub fn new(id: VarId, value: Vec<f64>) -> Self {
        VarNode { id, value }
    }
}

impl ResultNode for VarNode {
    fn output(&self) -> &[f64] {
        &self.value
    }

    fn constant(&self, g: &Gradient) -> bool {
        !g.contains(self.id)
    }

    fn propagate_gradient(&self, upstream: Option<&[f64]>, g: &mut Gradient) {
        let upstream = upstream_or_zeros(upstream, self.value.len());
        g.accumulate(self.id, &upstream);
    }
}

/// R leaf for a variable; its derivative is the variable's direction.
#[derive(Debug)]
pub struct RVarNode {
    id: VarId,
    value: Vec<f64>,
    r_value: Vec<f64>,
}

impl RVarNode {
    pub fn new(id: VarId, value: Vec<f64>, r_value: Vec<f64>) -> Self {
        assert_eq!(value.len(), r_value.len(), "R value length must match value length");
        RVarNode { id, value, r_value }
    }
}

impl RResultNode for RVarNode {
    fn output(&self) -> &[f64] {
        &self.value
    }

    fn r_output(&self) -> &[f64] {
        &self.r_value
    }

    fn constant(&self, rg: &RGradient, g: &Gradient) -> bool {
        !g.contains(self.id) && !rg.contains(self.id)
    }

    fn propagate_r_gradient(
        &self,
        upstream: Option<&[f64]>,
        upstream_r: Option<&[f64]>,
        rg: &mut RGradient,
        g: &mut Gradient,
    ) {
        let n = self.value.len();
        g.accumulate(self.id, &upstream_or_zeros(upstream, n));
        rg.accumulate(self.id, &upstream_or_zeros(upstream_r, n));
    }
}

/// Leaf that collects the gradient flowing into it instead of writing to a
/// [`Gradient`]. Blocks use pools to recover gradients with respect to their
/// incoming state. A pool is never constant.
#[derive(Debug)]
pub struct Pool {
    value: Vec<f64>,
    grad: RefCell<Vec<f64>>,
}

impl Pool {
    pub fn new(value: Vec<f64>) -> Self {
        let grad = RefCell::new(vec![0.0; value.len()]);
        Pool { value, grad }
    }

    /// Returns the gradient collected so far and resets the pool.
    pub fn take_gradient(&self) -> Vec<f64> {
        let zeros = vec![0.0; self.value.len()];
        self.grad.replace(zeros)
    }
}

impl ResultNode for Pool {
    fn output(&self) -> &[f64] {
        &self.value
    }

    fn constant(&self, _g: &Gradient) -> bool {
        false
    }

    fn propagate_gradient(&self, upstream: Option<&[f64]>, _g: &mut Gradient) {
        let upstream = upstream_or_zeros(upstream, self.value.len());
        ops::axpy(self.grad.borrow_mut().as_mut_slice(), 1.0, &upstream[..]);
    }
}

/// Dual counterpart of [`Pool`].
#[derive(Debug)]
pub struct RPool {
    value: Vec<f64>,
    r_value: Vec<f64>,
    grad: RefCell<Vec<f64>>,
    r_grad: RefCell<Vec<f64>>,
}

impl RPool {
    pub fn new(value: Vec<f64>, r_value: Vec<f64>) -> Self {
        assert_eq!(value.len(), r_value.len(), "R value length must match value length");
        let n = value.len();
        RPool {
            value,
            r_value,
            grad: RefCell::new(vec![0.0; n]),
            r_grad: RefCell::new(vec![0.0; n]),
        }
    }

    /// Returns `(gradient, r_gradient)` collected so far and resets the pool.
    pub fn take_gradients(&self) -> (Vec<f64>, Vec<f64>) {
        let n = self.value.len();
        (
            self.grad.replace(vec![0.0; n]),
            self.r_grad.replace(vec![0.0; n]),
        )
    }
}

impl RResultNode for RPool {
    fn output(&self) -> &[f64] {
        &self.value
    }

    fn r_output(&self) -> &[f64] {
        &self.r_value
    }

    fn constant(&self, _rg: &RGradient, _g: &Gradient) -> bool {
        false
    }

    fn propagate_r_gradient(
        &self,
        upstream: Option<&[f64]>,
        upstream_r: Option<&[f64]>,
        _rg: &mut RGradient,
        _g: &mut Gradient,
    ) {
        let n = self.value.len();
        ops::axpy(self.grad.borrow_mut().as_mut_slice(), 1.0, &upstream_or_zeros(upstream, n)[..]);
        ops::axpy(self.r_grad.borrow_mut().as_mut_slice(), 1.0, &upstream_or_zeros(upstream_r, n)[..]);
    }
}

/// Joins the outputs of several nodes end to end.
pub struct Concat {
    parts: Vec<ResultRef>,
    output: Vec<f64>,
}

impl Concat {
    pub fn new(parts: Vec<ResultRef>) -> Self {
        let output = parts
            .iter()
            .flat_map(|p| p.output().iter().copied())
            .collect();
        Concat { parts, output }
    }
}

impl ResultNode for Concat {
    fn output(&self) -> &[f64] {
        &self.output
    }

    fn constant(&self, g: &Gradient) -> bool {
        self.parts.iter().all(|p| p.constant(g))
    }

    fn propagate_gradient(&self, upstream: Option<&[f64]>, g: &mut Gradient) {
        let upstream = upstream_or_zeros(upstream, self.output.len());
        let mut offset = 0;
        for part in &self.parts {
            let n = part.output().len();
            if !part.constant(g) {
                part.propagate_gradient(Some(&upstream[offset..offset + n]), g);
            }
            offset += n;
        }
    }
}

/// Dual counterpart of [`Concat`].
pub struct RConcat {
    parts: Vec<RResultRef>,
    output: Vec<f64>,
    r_output: Vec<f64>,
}

impl RConcat {
    pub fn new(parts: Vec<RResultRef>) -> Self {
        let output = parts
            .iter()
            .flat_map(|p| p.output().iter().copied())
            .collect();
        let r_output = parts
            .iter()
            .flat_map(|p| p.r_output().iter().copied())
            .collect();
        RConcat {
            parts,
            output,
            r_output,
        }
    }
}

impl RResultNode for RConcat {
    fn output(&self) -> &[f64] {
        &self.output
    }

    fn r_output(&self) -> &[f64] {
        &self.r_output
    }

    fn constant(&self, rg: &RGradient, g: &Gradient) -> bool {
        self.parts.iter().all(|p| p.constant(rg, g))
    }

    fn propagate_r_gradient(
        &self,
        upstream: Option<&[f64]>,
        upstream_r: Option<&[f64]>,
        rg: &mut RGradient,
        g: &mut Gradient,
    ) {
        let upstream = upstream_or_zeros(upstream, self.output.len());
        let upstream_r = upstream_or_zeros(upstream_r, self.output.len());
        let mut offset = 0;
        for part in &self.parts {
            let n = part.output().len();
            if !part.constant(rg, g) {
                part.propagate_r_gradient(
                    Some(&upstream[offset..offset + n]),
                    Some(&upstream_r[offset..offset + n]),
                    rg,
                    g,
                );
            }
            offset += n;
        }
    }
}

#[cfg(test)]
#[path = "nodes_test.rs"]
mod tests;
