//! Core of seqgrad: dense vector helpers, 3-D tensors, reverse-mode and
//! R-operator automatic differentiation, and the convolution layer.

pub mod autofunc;
pub mod error;
pub mod nn;
pub mod ops;
pub mod tensor3;

pub use autofunc::{Gradient, RGradient, RVector, VarId, Variable};
pub use error::SeqGradError;
pub use tensor3::Tensor3;
