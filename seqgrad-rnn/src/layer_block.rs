use crate::block::{Block, BlockRStep, BlockStep, VecRState, VecRStateGrad};
use log::trace;
use seqgrad_core::autofunc::{
    Concat, Gradient, Pool, RConcat, RGradient, RPool, RResultRef, RVector, ResultRef, Variable,
};
use seqgrad_core::nn::Layer;
use std::rc::Rc;

/// A block that runs `concat(state, input)` through a layer and splits the
/// layer's output into `[new_state | output]`. The start state is a learnable
/// variable.
#[derive(Debug)]
pub struct LayerBlock<L: Layer> {
    layer: L,
    state_size: usize,
    start: Variable,
}

impl<L: Layer> LayerBlock<L> {
    /// Creates a block whose start state is all zeros.
    pub fn new(layer: L, state_size: usize) -> Self {
        Self::with_start(layer, Variable::zeros(state_size))
    }

    pub fn with_start(layer: L, start: Variable) -> Self {
        let state_size = start.len();
        LayerBlock {
            layer,
            state_size,
            start,
        }
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }

    pub fn state_size(&self) -> usize {
        self.state_size
    }

    pub fn start(&self) -> &Variable {
        &self.start
    }

    /// The start state followed by the layer's parameters.
    pub fn parameters(&self) -> Vec<Variable> {
        let mut params = vec![self.start.clone()];
        params.extend(self.layer.parameters());
        params
    }

    fn split(&self, out: &[f64]) -> (Vec<f64>, Vec<f64>) {
        assert!(
            out.len() >= self.state_size,
            "layer output ({}) is shorter than the state ({})",
            out.len(),
            self.state_size
        );
        let (state, output) = out.split_at(self.state_size);
        (state.to_vec(), output.to_vec())
    }
}

impl<L: Layer> Block for LayerBlock<L> {
    type State = Vec<f64>;
    type StateGrad = Vec<f64>;
    type RState = VecRState;
    type RStateGrad = VecRStateGrad;
    type Step = LayerBlockStep;
    type RStep = LayerBlockRStep;

    fn start_state(&self) -> Vec<f64> {
        self.start.to_vec()
    }

    fn start_r_state(&self, v: &RVector) -> VecRState {
        let r_state = match v.get(self.start.id()) {
            Some(dir) => dir.to_vec(),
            None => vec![0.0; self.state_size],
        };
        VecRState {
            state: self.start.to_vec(),
            r_state,
        }
    }

    fn propagate_start(&self, upstream: &[Vec<f64>], g: &mut Gradient) {
        for grad in upstream {
            g.accumulate(self.start.id(), grad);
        }
    }

    fn propagate_start_r(&self, upstream: &[VecRStateGrad], rg: &mut RGradient, g: &mut Gradient) {
        for grad in upstream {
            g.accumulate(self.start.id(), &grad.grad);
            rg.accumulate(self.start.id(), &grad.r_grad);
        }
    }

    fn apply_block(&self, states: &[Vec<f64>], inputs: &[ResultRef]) -> LayerBlockStep {
        assert_eq!(states.len(), inputs.len(), "one state per input required");
        let mut step = LayerBlockStep {
            pools: Vec::with_capacity(inputs.len()),
            results: Vec::with_capacity(inputs.len()),
            states: Vec::with_capacity(inputs.len()),
            outputs: Vec::with_capacity(inputs.len()),
            state_size: self.state_size,
        };
        for (state, input) in states.iter().zip(inputs) {
            assert_eq!(state.len(), self.state_size, "state has wrong length");
            let pool = Rc::new(Pool::new(state.clone()));
            let joined = Rc::new(Concat::new(vec![pool.clone() as ResultRef, input.clone()]));
            let result = self.layer.apply(joined);
            let (new_state, output) = self.split(result.output());
            step.pools.push(pool);
            step.results.push(result);
            step.states.push(new_state);
            step.outputs.push(output);
        }
        trace!("LayerBlock: stepped {} elements", inputs.len());
        step
    }

    fn apply_block_r(
        &self,
        v: &RVector,
        states: &[VecRState],
        inputs: &[RResultRef],
    ) -> LayerBlockRStep {
        assert_eq!(states.len(), inputs.len(), "one state per input required");
        let mut step = LayerBlockRStep {
            pools: Vec::with_capacity(inputs.len()),
            results: Vec::with_capacity(inputs.len()),
            states: Vec::with_capacity(inputs.len()),
            outputs: Vec::with_capacity(inputs.len()),
            r_outputs: Vec::with_capacity(inputs.len()),
            state_size: self.state_size,
        };
        for (state, input) in states.iter().zip(inputs) {
            assert_eq!(state.state.len(), self.state_size, "state has wrong length");
            let pool = Rc::new(RPool::new(state.state.clone(), state.r_state.clone()));
            let joined = Rc::new(RConcat::new(vec![pool.clone() as RResultRef, input.clone()]));
            let result = self.layer.apply_r(v, joined);
            let (new_state, output) = self.split(result.output());
            let (new_r_state, r_output) = self.split(result.r_output());
            step.pools.push(pool);
            step.results.push(result);
            step.states.push(VecRState {
                state: new_state,
                r_state: new_r_state,
            });
            step.outputs.push(output);
            step.r_outputs.push(r_output);
        }
        trace!("LayerBlock: R-stepped {} elements", inputs.len());
        step
    }
}

/// Joins an optional state gradient and an optional output gradient into an
/// upstream for the whole layer output. Both absent stays absent.
fn joined_upstream(
    state_size: usize,
    output_size: usize,
    state: Option<&[f64]>,
    output: Option<&[f64]>,
) -> Option<Vec<f64>> {
    if state.is_none() && output.is_none() {
        return None;
    }
    let mut joined = vec![0.0; state_size + output_size];
    if let Some(state) = state {
        assert_eq!(state.len(), state_size, "state gradient has wrong length");
        joined[..state_size].copy_from_slice(state);
    }
    if let Some(output) = output {
        assert_eq!(output.len(), output_size, "output gradient has wrong length");
        joined[state_size..].copy_from_slice(output);
    }
    Some(joined)
}

fn check_batch<T>(what: &str, list: Option<&[T]>, n: usize) {
    if let Some(list) = list {
        assert_eq!(list.len(), n, "{} must have one entry per batch element", what);
    }
}

/// Backward state for one [`LayerBlock::apply_block`] call.
pub struct LayerBlockStep {
    pools: Vec<Rc<Pool>>,
    results: Vec<ResultRef>,
    states: Vec<Vec<f64>>,
    outputs: Vec<Vec<f64>>,
    state_size: usize,
}

impl BlockStep for LayerBlockStep {
    type State = Vec<f64>;
    type StateGrad = Vec<f64>;

    fn outputs(&self) -> &[Vec<f64>] {
        &self.outputs
    }

    fn states(&self) -> &[Vec<f64>] {
        &self.states
    }

    fn propagate_gradient(
        &self,
        upstream: Option<&[Vec<f64>]>,
        upstream_states: Option<&[Option<Vec<f64>>]>,
        g: &mut Gradient,
    ) -> Vec<Vec<f64>> {
        let n = self.results.len();
        check_batch("upstream", upstream, n);
        check_batch("upstream_states", upstream_states, n);

        let mut downstream = Vec::with_capacity(n);
        for (i, (pool, result)) in self.pools.iter().zip(&self.results).enumerate() {
            let out_up = upstream.map(|u| u[i].as_slice());
            let state_up = upstream_states.and_then(|s| s[i].as_deref());
            let joined = joined_upstream(self.state_size, self.outputs[i].len(), state_up, out_up);
            result.propagate_gradient(joined.as_deref(), g);
            downstream.push(pool.take_gradient());
        }
        downstream
    }
}

/// Backward state for one [`LayerBlock::apply_block_r`] call.
pub struct LayerBlockRStep {
    pools: Vec<Rc<RPool>>,
    results: Vec<RResultRef>,
    states: Vec<VecRState>,
    outputs: Vec<Vec<f64>>,
    r_outputs: Vec<Vec<f64>>,
    state_size: usize,
}

impl BlockRStep for LayerBlockRStep {
    type RState = VecRState;
    type RStateGrad = VecRStateGrad;

    fn outputs(&self) -> &[Vec<f64>] {
        &self.outputs
    }

    fn r_outputs(&self) -> &[Vec<f64>] {
        &self.r_outputs
    }

    fn r_states(&self) -> &[VecRState] {
        &self.states
    }

    fn propagate_r_gradient(
        &self,
        upstream: Option<&[Vec<f64>]>,
        upstream_r: Option<&[Vec<f64>]>,
        upstream_states: Option<&[Option<VecRStateGrad>]>,
        rg: &mut RGradient,
        g: &mut Gradient,
    ) -> Vec<VecRStateGrad> {
        let n = self.results.len();
        check_batch("upstream", upstream, n);
        check_batch("upstream_r", upstream_r, n);
        check_batch("upstream_states", upstream_states, n);

        let mut downstream = Vec::with_capacity(n);
        for (i, (pool, result)) in self.pools.iter().zip(&self.results).enumerate() {
            let output_size = self.outputs[i].len();
            let state_up = upstream_states.and_then(|s| s[i].as_ref());
            let joined = joined_upstream(
                self.state_size,
                output_size,
                state_up.map(|s| s.grad.as_slice()),
                upstream.map(|u| u[i].as_slice()),
            );
            let joined_r = joined_upstream(
                self.state_size,
                output_size,
                state_up.map(|s| s.r_grad.as_slice()),
                upstream_r.map(|u| u[i].as_slice()),
            );
            result.propagate_r_gradient(joined.as_deref(), joined_r.as_deref(), rg, g);
            let (grad, r_grad) = pool.take_gradients();
            downstream.push(VecRStateGrad { grad, r_grad });
        }
        downstream
    }
}

#[cfg(test)]
#[path = "layer_block_test.rs"]
mod tests;
