//! Whole-sequence gradient checking by central finite differences.

use crate::block::Block;
use crate::seq_func::{SeqFunc, SeqUpstream};
use approx::abs_diff_eq;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seqgrad_core::autofunc::{Gradient, RGradient, RResultRef, RVector, ResultRef, VarId, Variable};
use seqgrad_core::ops;
use std::collections::HashSet;
use thiserror::Error;

/// Step used for finite differences when none is configured.
pub const DEFAULT_DELTA: f64 = 1e-5;
/// Comparison tolerance used when none is configured.
pub const DEFAULT_PREC: f64 = 1e-5;

const OBJECTIVE_SEED: u64 = 0x5eed;

/// A discrepancy found by a checker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradCheckError {
    #[error("{check}: variable {variable}, element {element}: expected gradient {expected:?}, got {actual:?}")]
    GradientMismatch {
        check: &'static str,
        variable: usize,
        element: usize,
        expected: f64,
        actual: f64,
    },

    #[error("{check}: variable {variable}, element {element}: expected R-gradient {expected:?}, got {actual:?}")]
    RGradientMismatch {
        check: &'static str,
        variable: usize,
        element: usize,
        expected: f64,
        actual: f64,
    },

    #[error("{check}: sequence {sequence}, step {step}, element {element}: expected output {expected:?}, got {actual:?}")]
    OutputMismatch {
        check: &'static str,
        sequence: usize,
        step: usize,
        element: usize,
        expected: f64,
        actual: f64,
    },

    #[error("{check}: sequence {sequence}, step {step}, element {element}: expected R-output {expected:?}, got {actual:?}")]
    ROutputMismatch {
        check: &'static str,
        sequence: usize,
        step: usize,
        element: usize,
        expected: f64,
        actual: f64,
    },

    #[error("{check}: variable {variable}, element {element}: nil upstream gave {actual:?}, zero upstream gave {expected:?}")]
    NilUpstreamMismatch {
        check: &'static str,
        variable: usize,
        element: usize,
        expected: f64,
        actual: f64,
    },

    #[error("{check}: gradient key set changed from {before} to {after} entries")]
    KeySetChanged {
        check: &'static str,
        before: usize,
        after: usize,
    },

    #[error("Direction has an entry for {id:?}, which is neither tracked nor an input")]
    UnknownDirection { id: VarId },

    #[error("{check}: needs at least one non-empty input sequence")]
    EmptyInput { check: &'static str },
}

/// True when `|a - b| <= prec`. Two NaNs are equal; NaN never equals a
/// number.
pub fn values_equal(a: f64, b: f64, prec: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    abs_diff_eq!(a, b, epsilon = prec)
}

/// Element-wise [`values_equal`]; vectors of different lengths differ.
pub fn vecs_equal(a: &[f64], b: &[f64], prec: f64) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| values_equal(x, y, prec))
}

/// Index of the first element where `a` and `b` differ, with both values.
/// A missing element reads as NaN.
pub(crate) fn first_difference(a: &[f64], b: &[f64], prec: f64) -> Option<(usize, f64, f64)> {
    (0..a.len().max(b.len())).find_map(|i| {
        let x = a.get(i).copied().unwrap_or(f64::NAN);
        let y = b.get(i).copied().unwrap_or(f64::NAN);
        let same = i < a.len() && i < b.len() && values_equal(x, y, prec);
        (!same).then_some((i, x, y))
    })
}

/// Checks the gradients of a [`SeqFunc`] over fixed input sequences.
///
/// The scalar objective is `Σ w·output` over every sequence and step, with
/// weights drawn from a fixed seed. With a direction configured the R-operator
/// results are checked as well; without one an empty direction is used.
pub struct SeqChecker<'a, B: Block> {
    func: SeqFunc<'a, B>,
    input: &'a [Vec<Variable>],
    vars: &'a [Variable],
    rv: RVector,
    delta: f64,
    prec: f64,
}

impl<'a, B: Block> SeqChecker<'a, B> {
    pub fn new(func: SeqFunc<'a, B>, input: &'a [Vec<Variable>], vars: &'a [Variable]) -> Self {
        SeqChecker {
            func,
            input,
            vars,
            rv: RVector::new(),
            delta: DEFAULT_DELTA,
            prec: DEFAULT_PREC,
        }
    }

    pub fn with_direction(mut self, rv: RVector) -> Self {
        self.rv = rv;
        self
    }

    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = delta;
        self
    }

    pub fn with_prec(mut self, prec: f64) -> Self {
        self.prec = prec;
        self
    }

    pub fn full_check(&self) -> Result<(), GradCheckError> {
        let perturbed = self.direction_variables()?;
        let weights = self.objective_weights();
        debug!(
            "SeqChecker: {} sequences, {} tracked variables, delta {}, prec {}",
            self.input.len(),
            self.vars.len(),
            self.delta,
            self.prec
        );

        self.check_dual_outputs()?;
        self.check_gradient(&weights)?;
        self.check_r_outputs(&perturbed)?;
        self.check_r_gradient(&weights, &perturbed)?;
        Ok(())
    }

    /// Variables the direction moves, checked against the tracked and input
    /// variables.
    fn direction_variables(&self) -> Result<Vec<Variable>, GradCheckError> {
        let mut known = HashSet::new();
        let mut perturbed = Vec::new();
        for var in self.vars.iter().chain(self.input.iter().flatten()) {
            if known.insert(var.id()) && self.rv.contains(var.id()) {
                perturbed.push(var.clone());
            }
        }
        if let Some((id, _)) = self.rv.iter().find(|(id, _)| !known.contains(id)) {
            return Err(GradCheckError::UnknownDirection { id });
        }
        Ok(perturbed)
    }

    fn input_nodes(&self) -> Vec<Vec<ResultRef>> {
        self.input
            .iter()
            .map(|seq| seq.iter().map(Variable::node).collect())
            .collect()
    }

    fn r_input_nodes(&self) -> Vec<Vec<RResultRef>> {
        self.input
            .iter()
            .map(|seq| seq.iter().map(|v| v.r_node(&self.rv)).collect())
            .collect()
    }

    fn outputs(&self) -> Vec<Vec<Vec<f64>>> {
        self.func.apply(&self.input_nodes()).outputs().to_vec()
    }

    fn objective_weights(&self) -> Vec<Vec<Vec<f64>>> {
        let mut rng = StdRng::seed_from_u64(OBJECTIVE_SEED);
        self.outputs()
            .iter()
            .map(|seq| {
                seq.iter()
                    .map(|out| out.iter().map(|_| rng.gen_range(-1.0..1.0)).collect())
                    .collect()
            })
            .collect()
    }

    fn objective(&self, weights: &[Vec<Vec<f64>>]) -> f64 {
        self.outputs()
            .iter()
            .flatten()
            .zip(weights.iter().flatten())
            .map(|(out, w)| ops::dot(out, w))
            .sum()
    }

    fn gradient(&self, weights: &[Vec<Vec<f64>>]) -> Gradient {
        let mut g = Gradient::new(self.vars);
        self.func
            .apply(&self.input_nodes())
            .propagate_gradient(&as_upstream(weights), &mut g);
        g
    }

    /// Moves every perturbed variable by `scale` times its direction.
    fn step(&self, perturbed: &[Variable], scale: f64) {
        for var in perturbed {
            if let Some(dir) = self.rv.get(var.id()) {
                ops::axpy(var.value_mut().as_mut_slice(), scale, dir);
            }
        }
    }

    /// Evaluates `f` at `θ + δv` and `θ - δv`, restoring `θ` afterwards.
    fn along_direction<T, F: Fn() -> T>(&self, perturbed: &[Variable], f: F) -> (T, T) {
        self.step(perturbed, self.delta);
        let plus = f();
        self.step(perturbed, -2.0 * self.delta);
        let minus = f();
        self.step(perturbed, self.delta);
        (plus, minus)
    }

    fn check_dual_outputs(&self) -> Result<(), GradCheckError> {
        let expected = self.outputs();
        let r_result = self.func.apply_r(&self.rv, &self.r_input_nodes());
        compare_outputs("dual outputs", &expected, r_result.outputs(), self.prec, false)
    }

    fn check_gradient(&self, weights: &[Vec<Vec<f64>>]) -> Result<(), GradCheckError> {
        let g = self.gradient(weights);
        for (vi, var) in self.vars.iter().enumerate() {
            let actual = g.get(var.id()).unwrap_or(&[]).to_vec();
            for (i, &actual) in actual.iter().enumerate() {
                let orig = var.value()[i];
                var.value_mut()[i] = orig + self.delta;
                let plus = self.objective(weights);
                var.value_mut()[i] = orig - self.delta;
                let minus = self.objective(weights);
                var.value_mut()[i] = orig;

                let expected = (plus - minus) / (2.0 * self.delta);
                if !values_equal(expected, actual, self.prec) {
                    return Err(GradCheckError::GradientMismatch {
                        check: "gradient",
                        variable: vi,
                        element: i,
                        expected,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_r_outputs(&self, perturbed: &[Variable]) -> Result<(), GradCheckError> {
        let r_result = self.func.apply_r(&self.rv, &self.r_input_nodes());
        let (plus, minus) = self.along_direction(perturbed, || self.outputs());
        let expected: Vec<Vec<Vec<f64>>> = plus
            .iter()
            .zip(&minus)
            .map(|(p_seq, m_seq)| {
                p_seq
                    .iter()
                    .zip(m_seq)
                    .map(|(p, m)| finite_difference(p, m, self.delta))
                    .collect()
            })
            .collect();
        compare_outputs("R outputs", &expected, r_result.r_outputs(), self.prec, true)
    }

    fn check_r_gradient(
        &self,
        weights: &[Vec<Vec<f64>>],
        perturbed: &[Variable],
    ) -> Result<(), GradCheckError> {
        let plain = self.gradient(weights);
        let mut g = Gradient::new(self.vars);
        let mut rg = RGradient::new(self.vars);
        let upstream = as_upstream(weights);
        let upstream_r: Vec<SeqUpstream> =
            weights.iter().map(|seq| vec![None; seq.len()]).collect();
        self.func
            .apply_r(&self.rv, &self.r_input_nodes())
            .propagate_r_gradient(&upstream, &upstream_r, &mut rg, &mut g);

        let (g_plus, g_minus) = self.along_direction(perturbed, || self.gradient(weights));

        for (vi, var) in self.vars.iter().enumerate() {
            let id = var.id();
            let expected = plain.get(id).unwrap_or(&[]);
            let actual = g.get(id).unwrap_or(&[]);
            if let Some((i, expected, actual)) = first_difference(expected, actual, self.prec) {
                return Err(GradCheckError::GradientMismatch {
                    check: "R pass gradient",
                    variable: vi,
                    element: i,
                    expected,
                    actual,
                });
            }

            let expected = finite_difference(
                g_plus.get(id).unwrap_or(&[]),
                g_minus.get(id).unwrap_or(&[]),
                self.delta,
            );
            let actual = rg.get(id).unwrap_or(&[]);
            if let Some((i, expected, actual)) = first_difference(&expected, actual, self.prec) {
                return Err(GradCheckError::RGradientMismatch {
                    check: "R-gradient",
                    variable: vi,
                    element: i,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

fn as_upstream(weights: &[Vec<Vec<f64>>]) -> Vec<SeqUpstream> {
    weights
        .iter()
        .map(|seq| seq.iter().cloned().map(Some).collect())
        .collect()
}

fn finite_difference(plus: &[f64], minus: &[f64], delta: f64) -> Vec<f64> {
    plus.iter()
        .zip(minus)
        .map(|(p, m)| (p - m) / (2.0 * delta))
        .collect()
}

fn compare_outputs(
    check: &'static str,
    expected: &[Vec<Vec<f64>>],
    actual: &[Vec<Vec<f64>>],
    prec: f64,
    r_outputs: bool,
) -> Result<(), GradCheckError> {
    assert_eq!(expected.len(), actual.len(), "sequence count changed");
    for (seq, (exp_seq, act_seq)) in expected.iter().zip(actual).enumerate() {
        assert_eq!(exp_seq.len(), act_seq.len(), "sequence length changed");
        for (step, (exp, act)) in exp_seq.iter().zip(act_seq).enumerate() {
            if let Some((element, expected, actual)) = first_difference(exp, act, prec) {
                return Err(if r_outputs {
                    GradCheckError::ROutputMismatch {
                        check,
                        sequence: seq,
                        step,
                        element,
                        expected,
                        actual,
                    }
                } else {
                    GradCheckError::OutputMismatch {
                        check,
                        sequence: seq,
                        step,
                        element,
                        expected,
                        actual,
                    }
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "grad_check_test.rs"]
mod tests;
