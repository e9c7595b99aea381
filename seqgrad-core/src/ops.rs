//! Dense-vector primitives shared by every operator.

use num_traits::Float;

/// Dot product of two equal-length vectors.
///
/// # Panics
/// Panics if the lengths differ.
pub fn dot<T: Float>(a: &[T], b: &[T]) -> T {
    assert_eq!(a.len(), b.len(), "dot: vector lengths differ");
    a.iter()
        .zip(b.iter())
        .fold(T::zero(), |acc, (&x, &y)| acc + x * y)
}

/// Computes `dest += scale * src`.
///
/// # Panics
/// Panics if the lengths differ.
pub fn axpy<T: Float>(dest: &mut [T], scale: T, src: &[T]) {
    assert_eq!(dest.len(), src.len(), "axpy: vector lengths differ");
    for (d, &s) in dest.iter_mut().zip(src.iter()) {
        *d = *d + scale * s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_dot() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, -5.0, 0.5];
        assert_relative_eq!(dot(&a, &b), 4.0 - 10.0 + 1.5, epsilon = 1e-12);
        assert_eq!(dot::<f64>(&[], &[]), 0.0);
    }

    #[test]
    fn test_axpy() {
        let mut dest = vec![1.0, 1.0];
        axpy(&mut dest, 2.0, &[3.0, -1.0]);
        assert_eq!(dest, vec![7.0, -1.0]);
    }

    #[test]
    #[should_panic(expected = "vector lengths differ")]
    fn test_axpy_length_mismatch() {
        let mut dest = vec![0.0; 2];
        axpy(&mut dest, 1.0, &[1.0, 2.0, 3.0]);
    }
}
