use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seqgrad_core::Variable;

// Shared by several test crates; not every helper is used by each.
#[allow(dead_code)]
pub(crate) fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

#[allow(dead_code)]
pub(crate) fn random_variable(rng: &mut StdRng, len: usize) -> Variable {
    Variable::new((0..len).map(|_| rng.gen_range(-1.0..1.0)).collect())
}

/// Central difference of `f` with respect to `var[index]`.
#[allow(dead_code)]
pub(crate) fn central_difference<F>(var: &Variable, index: usize, delta: f64, mut f: F) -> f64
where
    F: FnMut() -> f64,
{
    let orig = var.value()[index];
    var.value_mut()[index] = orig + delta;
    let plus = f();
    var.value_mut()[index] = orig - delta;
    let minus = f();
    var.value_mut()[index] = orig;
    (plus - minus) / (2.0 * delta)
}
