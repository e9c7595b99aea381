use seqgrad_core::autofunc::{
    upstream_or_zeros, Gradient, RGradient, RResultNode, RResultRef, RVector, ResultNode,
    ResultRef, Variable,
};
use seqgrad_core::nn::{Conv, ConvConfig, Layer};
use seqgrad_rnn::{BlockChecker, GradCheckError, LayerBlock, SeqFunc};
use std::rc::Rc;

mod common;
use common::{dense_block, random_direction, random_sequences, seeded_rng};

#[test]
fn test_dense_block_full_check() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rng = seeded_rng(1);
    let block = dense_block(&mut rng, 3, 2, 2);
    let input = random_sequences(&mut rng, &[4, 2, 3], 2);
    let mut vars = block.parameters();
    vars.extend(input[1].iter().cloned());
    let rv = random_direction(&mut rng, vars.iter().chain(&input[0]));

    BlockChecker::new(&block, input, vars)
        .with_direction(rv)
        .full_check()
        .unwrap();
}

#[test]
fn test_spatial_conv_block_full_check() {
    let mut rng = seeded_rng(2);
    // A 1-D convolution over [state(2) | input(4)]: width 6, filter 3 gives
    // 4 values, the first 2 of which become the next state.
    let mut conv = Conv::new(ConvConfig {
        filter_count: 1,
        filter_width: 3,
        filter_height: 1,
        stride: 1,
        input_width: 6,
        input_height: 1,
        input_depth: 1,
    })
    .unwrap();
    conv.randomize_with(&mut rng);
    let block = LayerBlock::new(conv, 2);
    let input = random_sequences(&mut rng, &[3, 3], 4);
    let vars = block.parameters();
    let rv = random_direction(&mut rng, &vars);

    BlockChecker::new(&block, input, vars)
        .with_direction(rv)
        .full_check()
        .unwrap();
}

#[test]
fn test_full_check_without_direction() {
    let mut rng = seeded_rng(3);
    let block = dense_block(&mut rng, 2, 1, 1);
    let input = random_sequences(&mut rng, &[3], 1);
    let vars = block.parameters();
    BlockChecker::new(&block, input, vars)
        .with_delta(1e-6)
        .with_prec(1e-4)
        .full_check()
        .unwrap();
}

#[test]
fn test_nil_upstream_at_early_steps() {
    let mut rng = seeded_rng(4);
    let block = dense_block(&mut rng, 2, 2, 3);
    let input = random_sequences(&mut rng, &[4], 2);
    let mut vars = block.parameters();
    vars.extend(input[0].iter().cloned());
    let nodes: Vec<Vec<ResultRef>> = vec![input[0].iter().map(Variable::node).collect()];
    let result = SeqFunc::new(&block).apply(&nodes);
    let last = vec![1.0, -2.0, 0.5];

    let mut nil_g = Gradient::new(&vars);
    result.propagate_gradient(&[vec![None, None, None, Some(last.clone())]], &mut nil_g);

    let zeros = Some(vec![0.0; 3]);
    let mut zero_g = Gradient::new(&vars);
    result.propagate_gradient(
        &[vec![zeros.clone(), zeros.clone(), zeros, Some(last)]],
        &mut zero_g,
    );

    assert_eq!(nil_g.len(), vars.len());
    assert_eq!(zero_g.len(), vars.len());
    for var in &vars {
        let nil = nil_g.get(var.id()).unwrap();
        let zero = zero_g.get(var.id()).unwrap();
        assert!(seqgrad_rnn::vecs_equal(nil, zero, 1e-12), "{:?} vs {:?}", nil, zero);
    }
    // Early inputs still receive gradient through the state.
    assert!(nil_g.get(input[0][0].id()).unwrap().iter().any(|&x| x != 0.0));
}

/// Elementwise `scale * input`, with a deliberately wrong gradient for
/// `scale`.
#[derive(Debug)]
struct MisscaledLayer {
    scale: Variable,
}

struct MisscaledResult {
    output: Vec<f64>,
    input: ResultRef,
    scale: Variable,
}

impl ResultNode for MisscaledResult {
    fn output(&self) -> &[f64] {
        &self.output
    }

    fn constant(&self, g: &Gradient) -> bool {
        self.input.constant(g) && self.scale.constant(g)
    }

    fn propagate_gradient(&self, upstream: Option<&[f64]>, g: &mut Gradient) {
        let upstream = upstream_or_zeros(upstream, self.output.len());
        let s = self.scale.value()[0];
        let input = self.input.output();
        // Correct would be Σ upstream·input.
        let wrong: f64 = upstream.iter().zip(input).map(|(u, x)| 2.0 * u * x).sum();
        g.accumulate(self.scale.id(), &[wrong]);
        if !self.input.constant(g) {
            let down: Vec<f64> = upstream.iter().map(|u| u * s).collect();
            self.input.propagate_gradient(Some(&down[..]), g);
        }
    }
}

struct MisscaledRResult {
    output: Vec<f64>,
    r_output: Vec<f64>,
    input: RResultRef,
    scale: Variable,
}

impl RResultNode for MisscaledRResult {
    fn output(&self) -> &[f64] {
        &self.output
    }

    fn r_output(&self) -> &[f64] {
        &self.r_output
    }

    fn constant(&self, rg: &RGradient, g: &Gradient) -> bool {
        self.input.constant(rg, g) && self.scale.constant(g) && self.scale.constant(rg)
    }

    fn propagate_r_gradient(
        &self,
        upstream: Option<&[f64]>,
        upstream_r: Option<&[f64]>,
        rg: &mut RGradient,
        g: &mut Gradient,
    ) {
        let n = self.output.len();
        let upstream = upstream_or_zeros(upstream, n);
        let upstream_r = upstream_or_zeros(upstream_r, n);
        let s = self.scale.value()[0];
        let down: Vec<f64> = upstream.iter().map(|u| u * s).collect();
        let down_r: Vec<f64> = upstream_r.iter().map(|u| u * s).collect();
        self.input.propagate_r_gradient(Some(&down[..]), Some(&down_r[..]), rg, g);
    }
}

impl Layer for MisscaledLayer {
    fn apply(&self, input: ResultRef) -> ResultRef {
        let s = self.scale.value()[0];
        let output = input.output().iter().map(|x| s * x).collect();
        Rc::new(MisscaledResult {
            output,
            input,
            scale: self.scale.clone(),
        })
    }

    fn apply_r(&self, _v: &RVector, input: RResultRef) -> RResultRef {
        let s = self.scale.value()[0];
        let output = input.output().iter().map(|x| s * x).collect();
        let r_output = input.r_output().iter().map(|x| s * x).collect();
        Rc::new(MisscaledRResult {
            output,
            r_output,
            input,
            scale: self.scale.clone(),
        })
    }

    fn parameters(&self) -> Vec<Variable> {
        vec![self.scale.clone()]
    }
}

#[test]
fn test_wrong_gradient_is_caught() {
    let mut rng = seeded_rng(5);
    let block = LayerBlock::new(
        MisscaledLayer {
            scale: Variable::new(vec![0.7]),
        },
        1,
    );
    let input = random_sequences(&mut rng, &[3], 2);
    let vars = block.layer().parameters();

    let err = BlockChecker::new(&block, input, vars).full_check().unwrap_err();
    match err {
        GradCheckError::GradientMismatch {
            check,
            variable,
            element,
            expected,
            actual,
        } => {
            assert_eq!((check, variable, element), ("gradient", 0, 0));
            assert!((actual - 2.0 * expected).abs() < 1e-3 * actual.abs().max(1.0));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_nil_upstream_without_input_is_an_error() {
    let mut rng = seeded_rng(7);
    let block = dense_block(&mut rng, 3, 2, 2);
    let checker = BlockChecker::new(&block, vec![Vec::new(), Vec::new()], block.parameters());

    assert_eq!(
        checker.check_nil_upstream(),
        Err(GradCheckError::EmptyInput {
            check: "nil upstream"
        })
    );
    assert_eq!(
        checker.check_nil_upstream_r(),
        Err(GradCheckError::EmptyInput {
            check: "nil upstream R"
        })
    );
}
