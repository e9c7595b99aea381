use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seqgrad_core::autofunc::{RVector, Variable};
use seqgrad_core::nn::{Conv, ConvConfig};
use seqgrad_rnn::LayerBlock;

#[allow(dead_code)]
pub(crate) fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

#[allow(dead_code)]
pub(crate) fn random_values(rng: &mut StdRng, len: usize) -> Vec<f64> {
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// Sequences of random input vectors with the given lengths.
#[allow(dead_code)]
pub(crate) fn random_sequences(rng: &mut StdRng, lens: &[usize], size: usize) -> Vec<Vec<Variable>> {
    lens.iter()
        .map(|&n| (0..n).map(|_| Variable::new(random_values(rng, size))).collect())
        .collect()
}

#[allow(dead_code)]
pub(crate) fn random_direction<'a, I>(rng: &mut StdRng, vars: I) -> RVector
where
    I: IntoIterator<Item = &'a Variable>,
{
    let mut rv = RVector::new();
    for var in vars {
        rv.insert(var, random_values(rng, var.len()));
    }
    rv
}

/// A recurrent block whose layer is a dense map (a 1x1 convolution over the
/// channels of `[state, input]`).
#[allow(dead_code)]
pub(crate) fn dense_block(
    rng: &mut StdRng,
    state_size: usize,
    input_size: usize,
    output_size: usize,
) -> LayerBlock<Conv> {
    let mut conv = Conv::new(ConvConfig {
        filter_count: state_size + output_size,
        filter_width: 1,
        filter_height: 1,
        stride: 1,
        input_width: 1,
        input_height: 1,
        input_depth: state_size + input_size,
    })
    .unwrap();
    conv.randomize_with(rng);
    LayerBlock::with_start(conv, Variable::new(random_values(rng, state_size)))
}
