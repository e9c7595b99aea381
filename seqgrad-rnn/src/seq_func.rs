//! Runs a [`Block`] over whole sequences and back-propagates through time.

use crate::block::{Block, BlockRStep, BlockStep};
use log::trace;
use seqgrad_core::autofunc::{Gradient, RGradient, RResultRef, RVector, ResultRef};

/// Upstream for one sequence: one optional gradient per time step.
pub type SeqUpstream = Vec<Option<Vec<f64>>>;

/// Applies a block to a batch of sequences of possibly different lengths.
/// A sequence leaves the batch once its inputs run out.
#[derive(Debug)]
pub struct SeqFunc<'a, B: Block> {
    block: &'a B,
}

// Derived Clone/Copy would require `B: Clone`.
impl<'a, B: Block> Clone for SeqFunc<'a, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, B: Block> Copy for SeqFunc<'a, B> {}

struct TimeStep<S> {
    /// Indices of the sequences still running at this step.
    active: Vec<usize>,
    step: S,
}

fn active_at<T>(inputs: &[Vec<T>], t: usize) -> Vec<usize> {
    (0..inputs.len()).filter(|&i| inputs[i].len() > t).collect()
}

fn max_len<T>(inputs: &[Vec<T>]) -> usize {
    inputs.iter().map(Vec::len).max().unwrap_or(0)
}

/// Gathers the upstream of the active sequences at step `t`. Returns `None`
/// when none of them has one.
fn step_upstream(
    upstream: &[SeqUpstream],
    outputs: &[Vec<Vec<f64>>],
    active: &[usize],
    t: usize,
) -> Option<Vec<Vec<f64>>> {
    if active.iter().all(|&i| upstream[i][t].is_none()) {
        return None;
    }
    Some(
        active
            .iter()
            .map(|&i| match &upstream[i][t] {
                Some(u) => u.clone(),
                None => vec![0.0; outputs[i][t].len()],
            })
            .collect(),
    )
}

fn check_upstream_shape(upstream: &[SeqUpstream], outputs: &[Vec<Vec<f64>>]) {
    assert_eq!(upstream.len(), outputs.len(), "one upstream per sequence required");
    for (up, out) in upstream.iter().zip(outputs) {
        assert_eq!(up.len(), out.len(), "one upstream entry per time step required");
    }
}

fn take_active<G>(grads: &mut [Option<G>], active: &[usize]) -> Option<Vec<Option<G>>> {
    let taken: Vec<Option<G>> = active.iter().map(|&i| grads[i].take()).collect();
    if taken.iter().all(Option::is_none) {
        None
    } else {
        Some(taken)
    }
}

impl<'a, B: Block> SeqFunc<'a, B> {
    pub fn new(block: &'a B) -> Self {
        SeqFunc { block }
    }

    pub fn block(&self) -> &'a B {
        self.block
    }

    pub fn apply(&self, inputs: &[Vec<ResultRef>]) -> SeqResult<'a, B> {
        let n = inputs.len();
        let mut states: Vec<B::State> = (0..n).map(|_| self.block.start_state()).collect();
        let mut outputs: Vec<Vec<Vec<f64>>> =
            inputs.iter().map(|s| Vec::with_capacity(s.len())).collect();
        let mut steps = Vec::new();

        for t in 0..max_len(inputs) {
            let active = active_at(inputs, t);
            let step_states: Vec<B::State> = active.iter().map(|&i| states[i].clone()).collect();
            let step_inputs: Vec<ResultRef> =
                active.iter().map(|&i| inputs[i][t].clone()).collect();
            let step = self.block.apply_block(&step_states, &step_inputs);
            for (k, &i) in active.iter().enumerate() {
                outputs[i].push(step.outputs()[k].clone());
                states[i] = step.states()[k].clone();
            }
            steps.push(TimeStep { active, step });
        }
        trace!("SeqFunc: {} sequences over {} steps", n, steps.len());

        SeqResult {
            block: self.block,
            steps,
            outputs,
        }
    }

    pub fn apply_r(&self, v: &RVector, inputs: &[Vec<RResultRef>]) -> SeqRResult<'a, B> {
        let n = inputs.len();
        let mut states: Vec<B::RState> = (0..n).map(|_| self.block.start_r_state(v)).collect();
        let mut outputs: Vec<Vec<Vec<f64>>> =
            inputs.iter().map(|s| Vec::with_capacity(s.len())).collect();
        let mut r_outputs = outputs.clone();
        let mut steps = Vec::new();

        for t in 0..max_len(inputs) {
            let active = active_at(inputs, t);
            let step_states: Vec<B::RState> =
                active.iter().map(|&i| states[i].clone()).collect();
            let step_inputs: Vec<RResultRef> =
                active.iter().map(|&i| inputs[i][t].clone()).collect();
            let step = self.block.apply_block_r(v, &step_states, &step_inputs);
            for (k, &i) in active.iter().enumerate() {
                outputs[i].push(step.outputs()[k].clone());
                r_outputs[i].push(step.r_outputs()[k].clone());
                states[i] = step.r_states()[k].clone();
            }
            steps.push(TimeStep { active, step });
        }
        trace!("SeqFunc: {} sequences over {} R steps", n, steps.len());

        SeqRResult {
            block: self.block,
            steps,
            outputs,
            r_outputs,
        }
    }
}

/// Outputs of [`SeqFunc::apply`] together with every step's backward state.
pub struct SeqResult<'a, B: Block> {
    block: &'a B,
    steps: Vec<TimeStep<B::Step>>,
    outputs: Vec<Vec<Vec<f64>>>,
}

impl<'a, B: Block> SeqResult<'a, B> {
    /// `outputs()[seq][t]` is the block output for sequence `seq` at step `t`.
    pub fn outputs(&self) -> &[Vec<Vec<f64>>] {
        &self.outputs
    }

    /// Back-propagates through time. `upstream[seq][t]` is the gradient of
    /// the objective with respect to `outputs()[seq][t]`; `None` means zero.
    ///
    /// # Panics
    /// Panics if `upstream` is not shaped like [`outputs`](SeqResult::outputs).
    pub fn propagate_gradient(&self, upstream: &[SeqUpstream], g: &mut Gradient) {
        check_upstream_shape(upstream, &self.outputs);
        let mut state_grads: Vec<Option<B::StateGrad>> =
            (0..self.outputs.len()).map(|_| None).collect();

        for (t, ts) in self.steps.iter().enumerate().rev() {
            let up = step_upstream(upstream, &self.outputs, &ts.active, t);
            let state_up = take_active(&mut state_grads, &ts.active);
            let down = ts
                .step
                .propagate_gradient(up.as_deref(), state_up.as_deref(), g);
            for (grad, &i) in down.into_iter().zip(&ts.active) {
                state_grads[i] = Some(grad);
            }
        }

        let start: Vec<B::StateGrad> = state_grads.into_iter().flatten().collect();
        self.block.propagate_start(&start, g);
    }
}

/// Outputs of [`SeqFunc::apply_r`] together with every step's backward state.
pub struct SeqRResult<'a, B: Block> {
    block: &'a B,
    steps: Vec<TimeStep<B::RStep>>,
    outputs: Vec<Vec<Vec<f64>>>,
    r_outputs: Vec<Vec<Vec<f64>>>,
}

impl<'a, B: Block> SeqRResult<'a, B> {
    pub fn outputs(&self) -> &[Vec<Vec<f64>>] {
        &self.outputs
    }

    pub fn r_outputs(&self) -> &[Vec<Vec<f64>>] {
        &self.r_outputs
    }

    /// Dual counterpart of [`SeqResult::propagate_gradient`]; `upstream` and
    /// `upstream_r` follow the same shape and `None` rules independently.
    pub fn propagate_r_gradient(
        &self,
        upstream: &[SeqUpstream],
        upstream_r: &[SeqUpstream],
        rg: &mut RGradient,
        g: &mut Gradient,
    ) {
        check_upstream_shape(upstream, &self.outputs);
        check_upstream_shape(upstream_r, &self.outputs);
        let mut state_grads: Vec<Option<B::RStateGrad>> =
            (0..self.outputs.len()).map(|_| None).collect();

        for (t, ts) in self.steps.iter().enumerate().rev() {
            let up = step_upstream(upstream, &self.outputs, &ts.active, t);
            let up_r = step_upstream(upstream_r, &self.outputs, &ts.active, t);
            let state_up = take_active(&mut state_grads, &ts.active);
            let down = ts.step.propagate_r_gradient(
                up.as_deref(),
                up_r.as_deref(),
                state_up.as_deref(),
                rg,
                g,
            );
            for (grad, &i) in down.into_iter().zip(&ts.active) {
                state_grads[i] = Some(grad);
            }
        }

        let start: Vec<B::RStateGrad> = state_grads.into_iter().flatten().collect();
        self.block.propagate_start_r(&start, rg, g);
    }
}

#[cfg(test)]
#[path = "seq_func_test.rs"]
mod tests;
