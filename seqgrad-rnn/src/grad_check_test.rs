use super::*;
use crate::layer_block::LayerBlock;
use seqgrad_core::nn::{Conv, ConvConfig};

fn random_block(seed: u64) -> LayerBlock<Conv> {
    let mut conv = Conv::new(ConvConfig {
        filter_count: 4,
        filter_width: 1,
        filter_height: 1,
        stride: 1,
        input_width: 1,
        input_height: 1,
        input_depth: 4,
    })
    .unwrap();
    conv.randomize_with(&mut StdRng::seed_from_u64(seed));
    LayerBlock::with_start(conv, Variable::new(vec![0.25, -0.5]))
}

fn random_inputs(rng: &mut StdRng, lens: &[usize]) -> Vec<Vec<Variable>> {
    lens.iter()
        .map(|&n| {
            (0..n)
                .map(|_| Variable::new(vec![rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)]))
                .collect()
        })
        .collect()
}

#[test]
fn test_values_equal_nan_rules() {
    assert!(values_equal(f64::NAN, f64::NAN, 1e-5));
    assert!(!values_equal(f64::NAN, 1.0, 1e-5));
    assert!(!values_equal(0.0, f64::NAN, 1e-5));
    assert!(values_equal(1.0, 1.0 + 1e-7, 1e-5));
    assert!(!values_equal(1e6, 1e6 + 1.0, 1e-5));
    assert!(values_equal(1e6, 1e6 + 1e-6, 1e-5));
    assert!(!values_equal(1.0, 1.1, 1e-5));
}

#[test]
fn test_vecs_equal() {
    assert!(vecs_equal(&[1.0, f64::NAN], &[1.0, f64::NAN], 1e-5));
    assert!(!vecs_equal(&[1.0], &[1.0, 2.0], 1e-5));
    assert!(!vecs_equal(&[1.0, 2.0], &[1.0, 2.5], 1e-5));
    assert!(vecs_equal(&[], &[], 1e-5));
}

#[test]
fn test_first_difference_reports_position() {
    assert_eq!(first_difference(&[1.0, 2.0], &[1.0, 2.0], 1e-5), None);
    assert_eq!(
        first_difference(&[1.0, 2.0, 3.0], &[1.0, 2.5, 4.0], 1e-5),
        Some((1, 2.0, 2.5))
    );
    let (i, x, y) = first_difference(&[1.0], &[1.0, 2.0], 1e-5).unwrap();
    assert_eq!(i, 1);
    assert!(x.is_nan());
    assert_eq!(y, 2.0);
}

#[test]
fn test_layer_block_passes_seq_check() {
    let _ = env_logger::builder().is_test(true).try_init();
    let block = random_block(1);
    let mut rng = StdRng::seed_from_u64(2);
    let inputs = random_inputs(&mut rng, &[3, 1, 2]);
    let mut vars = block.parameters();
    vars.push(inputs[0][1].clone());

    let mut rv = RVector::new();
    for var in vars.iter().chain(inputs[2].iter()) {
        rv.insert(var, (0..var.len()).map(|_| rng.gen_range(-1.0..1.0)).collect());
    }

    SeqChecker::new(SeqFunc::new(&block), &inputs, &vars)
        .with_direction(rv)
        .full_check()
        .unwrap();
}

#[test]
fn test_unknown_direction_rejected() {
    let block = random_block(3);
    let inputs = random_inputs(&mut StdRng::seed_from_u64(4), &[2]);
    let vars = block.parameters();
    let stray = Variable::new(vec![1.0]);
    let mut rv = RVector::new();
    rv.insert(&stray, vec![1.0]);

    let err = SeqChecker::new(SeqFunc::new(&block), &inputs, &vars)
        .with_direction(rv)
        .full_check()
        .unwrap_err();
    assert_eq!(err, GradCheckError::UnknownDirection { id: stray.id() });
}

#[test]
fn test_tolerance_too_tight_is_reported() {
    let block = random_block(5);
    let inputs = random_inputs(&mut StdRng::seed_from_u64(6), &[5]);
    let vars = block.parameters();
    // A huge finite-difference step makes the numeric estimate of a
    // non-linear objective visibly wrong.
    let err = SeqChecker::new(SeqFunc::new(&block), &inputs, &vars)
        .with_delta(10.0)
        .with_prec(1e-12)
        .full_check()
        .unwrap_err();
    assert!(matches!(err, GradCheckError::GradientMismatch { check: "gradient", .. }));
}
