//! The Block protocol: a stateful unit advanced one time step at a time over
//! a batch of sequences.

use seqgrad_core::autofunc::{Gradient, RGradient, RResultRef, RVector, ResultRef};

/// A recurrent unit. Every batch element carries its own state; one call to
/// [`apply_block`](Block::apply_block) advances all of them in lockstep.
pub trait Block {
    type State: Clone;
    type StateGrad;
    type RState: Clone;
    type RStateGrad;
    type Step: BlockStep<State = Self::State, StateGrad = Self::StateGrad>;
    type RStep: BlockRStep<RState = Self::RState, RStateGrad = Self::RStateGrad>;

    /// State every sequence starts from.
    fn start_state(&self) -> Self::State;

    /// Start state paired with its derivative along `v`.
    fn start_r_state(&self, v: &RVector) -> Self::RState;

    /// Routes the gradients that reached the start of each sequence into the
    /// block's own parameters.
    fn propagate_start(&self, upstream: &[Self::StateGrad], g: &mut Gradient);

    fn propagate_start_r(
        &self,
        upstream: &[Self::RStateGrad],
        rg: &mut RGradient,
        g: &mut Gradient,
    );

    /// Advances one step.
    ///
    /// # Panics
    /// Panics if `states` and `inputs` differ in length.
    fn apply_block(&self, states: &[Self::State], inputs: &[ResultRef]) -> Self::Step;

    fn apply_block_r(
        &self,
        v: &RVector,
        states: &[Self::RState],
        inputs: &[RResultRef],
    ) -> Self::RStep;
}

/// The result of one [`Block::apply_block`] call, kept for the backward pass.
pub trait BlockStep {
    type State;
    type StateGrad;

    /// One output vector per batch element.
    fn outputs(&self) -> &[Vec<f64>];

    /// One new state per batch element.
    fn states(&self) -> &[Self::State];

    /// Back-propagates through the step and returns the gradient with respect
    /// to each element's incoming state.
    ///
    /// `upstream` holds one output gradient per element and `upstream_states`
    /// one optional state gradient per element. Passing `None` for either is
    /// the same as passing all zeros (respectively all `None`).
    fn propagate_gradient(
        &self,
        upstream: Option<&[Vec<f64>]>,
        upstream_states: Option<&[Option<Self::StateGrad>]>,
        g: &mut Gradient,
    ) -> Vec<Self::StateGrad>;
}

/// The dual counterpart of [`BlockStep`].
pub trait BlockRStep {
    type RState;
    type RStateGrad;

    fn outputs(&self) -> &[Vec<f64>];
    fn r_outputs(&self) -> &[Vec<f64>];
    fn r_states(&self) -> &[Self::RState];

    fn propagate_r_gradient(
        &self,
        upstream: Option<&[Vec<f64>]>,
        upstream_r: Option<&[Vec<f64>]>,
        upstream_states: Option<&[Option<Self::RStateGrad>]>,
        rg: &mut RGradient,
        g: &mut Gradient,
    ) -> Vec<Self::RStateGrad>;
}

/// A vector state and its directional derivative.
#[derive(Debug, Clone, PartialEq)]
pub struct VecRState {
    pub state: Vec<f64>,
    pub r_state: Vec<f64>,
}

/// Gradient (and R-gradient) with respect to a [`VecRState`].
#[derive(Debug, Clone, PartialEq)]
pub struct VecRStateGrad {
    pub grad: Vec<f64>,
    pub r_grad: Vec<f64>,
}
