use crate::block::{Block, BlockRStep, BlockStep};
use crate::grad_check::{first_difference, GradCheckError, SeqChecker, DEFAULT_DELTA, DEFAULT_PREC};
use crate::seq_func::SeqFunc;
use log::debug;
use seqgrad_core::autofunc::{Gradient, RGradient, RVector, Variable};

/// Gradient checking plus edge-case checks for a [`Block`].
pub struct BlockChecker<'a, B: Block> {
    block: &'a B,
    input: Vec<Vec<Variable>>,
    vars: Vec<Variable>,
    rv: Option<RVector>,
    delta: f64,
    prec: f64,
}

impl<'a, B: Block> BlockChecker<'a, B> {
    /// `input` holds the input sequences; `vars` the variables whose
    /// gradients are checked.
    pub fn new(block: &'a B, input: Vec<Vec<Variable>>, vars: Vec<Variable>) -> Self {
        BlockChecker {
            block,
            input,
            vars,
            rv: None,
            delta: DEFAULT_DELTA,
            prec: DEFAULT_PREC,
        }
    }

    /// Direction for the R-operator checks.
    pub fn with_direction(mut self, rv: RVector) -> Self {
        self.rv = Some(rv);
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

    /// Runs the whole-sequence gradient checks, then the nil-upstream checks.
    pub fn full_check(&self) -> Result<(), GradCheckError> {
        let mut seq_checker = SeqChecker::new(SeqFunc::new(self.block), &self.input, &self.vars)
            .with_delta(self.delta)
            .with_prec(self.prec);
        if let Some(rv) = &self.rv {
            seq_checker = seq_checker.with_direction(rv.clone());
        }
        seq_checker.full_check()?;
        self.check_nil_upstream()?;
        self.check_nil_upstream_r()
    }

    fn first_input(&self, check: &'static str) -> Result<&Variable, GradCheckError> {
        self.input
            .iter()
            .find_map(|seq| seq.first())
            .ok_or(GradCheckError::EmptyInput { check })
    }

    /// One step from the start state: all-`None` upstream must accumulate
    /// the same gradient as zero outputs and absent state gradients. Runs on
    /// the first input of the first non-empty sequence.
    pub fn check_nil_upstream(&self) -> Result<(), GradCheckError> {
        debug!("BlockChecker: nil upstream");
        let input = self.first_input("nil upstream")?;
        let step = self
            .block
            .apply_block(&[self.block.start_state()], &[input.node()]);

        let mut g1 = Gradient::new(&self.vars);
        let before = g1.len();
        step.propagate_gradient(None, None, &mut g1);

        let mut g2 = Gradient::new(&self.vars);
        let zeros = zero_upstream(step.outputs());
        let absent: Vec<Option<B::StateGrad>> = step.states().iter().map(|_| None).collect();
        step.propagate_gradient(Some(zeros.as_slice()), Some(absent.as_slice()), &mut g2);

        check_key_set("nil upstream", before, g1.len())?;
        check_key_set("zero upstream", before, g2.len())?;
        self.compare("nil upstream gradient", &g1, &g2)
    }

    /// Dual version of [`check_nil_upstream`](BlockChecker::check_nil_upstream).
    pub fn check_nil_upstream_r(&self) -> Result<(), GradCheckError> {
        debug!("BlockChecker: nil upstream R");
        let input = self.first_input("nil upstream R")?;
        let rv = self.rv.clone().unwrap_or_default();
        let step = self.block.apply_block_r(
            &rv,
            &[self.block.start_r_state(&rv)],
            &[input.r_node(&rv)],
        );

        let mut g1 = Gradient::new(&self.vars);
        let mut rg1 = RGradient::new(&self.vars);
        let before = g1.len();
        step.propagate_r_gradient(None, None, None, &mut rg1, &mut g1);

        let mut g2 = Gradient::new(&self.vars);
        let mut rg2 = RGradient::new(&self.vars);
        let zeros = zero_upstream(step.outputs());
        let absent: Vec<Option<B::RStateGrad>> = step.r_states().iter().map(|_| None).collect();
        step.propagate_r_gradient(
            Some(zeros.as_slice()),
            Some(zeros.as_slice()),
            Some(absent.as_slice()),
            &mut rg2,
            &mut g2,
        );

        check_key_set("nil upstream R", before, g1.len())?;
        check_key_set("nil upstream R", before, rg1.len())?;
        check_key_set("zero upstream R", before, g2.len())?;
        check_key_set("zero upstream R", before, rg2.len())?;
        self.compare("nil upstream R gradient", &g1, &g2)?;
        self.compare("nil upstream R-gradient", &rg1, &rg2)
    }

    fn compare(
        &self,
        check: &'static str,
        nil: &Gradient,
        zero: &Gradient,
    ) -> Result<(), GradCheckError> {
        for (vi, var) in self.vars.iter().enumerate() {
            let actual = nil.get(var.id()).unwrap_or(&[]);
            let expected = zero.get(var.id()).unwrap_or(&[]);
            if let Some((element, expected, actual)) = first_difference(expected, actual, self.prec)
            {
                return Err(GradCheckError::NilUpstreamMismatch {
                    check,
                    variable: vi,
                    element,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

fn zero_upstream(outputs: &[Vec<f64>]) -> Vec<Vec<f64>> {
    outputs.iter().map(|out| vec![0.0; out.len()]).collect()
}

fn check_key_set(check: &'static str, before: usize, after: usize) -> Result<(), GradCheckError> {
    if before == after {
        Ok(())
    } else {
        Err(GradCheckError::KeySetChanged {
            check,
            before,
            after,
        })
    }
}
