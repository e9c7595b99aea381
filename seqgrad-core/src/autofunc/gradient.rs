//! Identity-keyed accumulators (`Gradient`, `RGradient`) and the
//! perturbation direction (`RVector`) used by R-operator passes.

use crate::autofunc::variable::{VarId, Variable};
use crate::ops;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

/// Gradient accumulators for a fixed set of tracked variables.
///
/// The key set is decided at construction and never changes: accumulating
/// into a variable that was not tracked is a silent no-op, so operators can
/// offer gradients for every parameter without asking first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gradient {
    entries: HashMap<VarId, Vec<f64>>,
}

impl Gradient {
    /// Allocates a zero accumulator for each tracked variable.
    pub fn new<'a, I>(tracked: I) -> Self
    where
        I: IntoIterator<Item = &'a Variable>,
    {
        let entries = tracked
            .into_iter()
            .map(|var| (var.id(), vec![0.0; var.len()]))
            .collect();
        Gradient { entries }
    }

    pub fn contains(&self, id: VarId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: VarId) -> Option<&[f64]> {
        self.entries.get(&id).map(|v| v.as_slice())
    }

    /// Number of tracked variables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds `delta` into the accumulator for `id`, if tracked.
    ///
    /// # Panics
    /// Panics if `delta` does not match the accumulator's length.
    pub fn accumulate(&mut self, id: VarId, delta: &[f64]) {
        self.accumulate_scaled(id, 1.0, delta);
    }

    /// Adds `scale * delta` into the accumulator for `id`, if tracked.
    pub fn accumulate_scaled(&mut self, id: VarId, scale: f64, delta: &[f64]) {
        if let Some(acc) = self.entries.get_mut(&id) {
            ops::axpy(acc, scale, delta);
        }
    }

    /// Resets every accumulator to zero, keeping the key set.
    pub fn zero(&mut self) {
        for acc in self.entries.values_mut() {
            acc.fill(0.0);
        }
    }
}

/// Accumulators for the directional derivative of the gradient.
///
/// Behaves exactly like [`Gradient`]; the separate type keeps the two
/// streams from being swapped by accident.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RGradient(Gradient);

impl RGradient {
    pub fn new<'a, I>(tracked: I) -> Self
    where
        I: IntoIterator<Item = &'a Variable>,
    {
        RGradient(Gradient::new(tracked))
    }
}

impl Deref for RGradient {
    type Target = Gradient;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for RGradient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// A perturbation direction in parameter space. Variables without an entry
/// have a zero direction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RVector {
    entries: HashMap<VarId, Vec<f64>>,
}

impl RVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the direction for `var`.
    ///
    /// # Panics
    /// Panics if `direction` does not match the variable's length.
    pub fn insert(&mut self, var: &Variable, direction: Vec<f64>) {
        assert_eq!(
            direction.len(),
            var.len(),
            "direction length must match variable length"
        );
        self.entries.insert(var.id(), direction);
    }

    pub fn get(&self, id: VarId) -> Option<&[f64]> {
        self.entries.get(&id).map(|v| v.as_slice())
    }

    pub fn contains(&self, id: VarId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, &[f64])> + '_ {
        self.entries.iter().map(|(id, v)| (*id, v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracks_only_given_variables() {
        let a = Variable::new(vec![1.0, 2.0]);
        let b = Variable::new(vec![3.0]);
        let g = Gradient::new([&a]);
        assert_eq!(g.len(), 1);
        assert_eq!(g.get(a.id()), Some(&[0.0, 0.0][..]));
        assert!(!g.contains(b.id()));
    }

    #[test]
    fn test_accumulate_untracked_is_noop() {
        let a = Variable::new(vec![1.0]);
        let b = Variable::new(vec![1.0, 1.0]);
        let mut g = Gradient::new([&a]);
        g.accumulate(b.id(), &[5.0, 5.0]);
        assert_eq!(g.len(), 1);
        assert!(g.get(b.id()).is_none());
        assert_eq!(g.get(a.id()), Some(&[0.0][..]));
    }

    #[test]
    fn test_accumulation_is_additive() {
        let a = Variable::new(vec![0.0, 0.0]);
        let mut g = Gradient::new([&a]);
        g.accumulate(a.id(), &[1.0, 2.0]);
        g.accumulate_scaled(a.id(), -2.0, &[0.5, 0.5]);
        assert_eq!(g.get(a.id()), Some(&[0.0, 1.0][..]));
        g.zero();
        assert_eq!(g.get(a.id()), Some(&[0.0, 0.0][..]));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_rgradient_derefs_to_gradient() {
        let a = Variable::new(vec![0.0]);
        let mut rg = RGradient::new([&a]);
        rg.accumulate(a.id(), &[2.5]);
        assert_eq!(rg.get(a.id()), Some(&[2.5][..]));
    }

    #[test]
    #[should_panic(expected = "direction length")]
    fn test_rvector_length_checked() {
        let a = Variable::new(vec![0.0, 0.0]);
        let mut v = RVector::new();
        v.insert(&a, vec![1.0]);
    }
}
