//! Parameterized layers built on top of `autofunc`.

pub mod conv;
pub mod layer;

pub use conv::{Conv, ConvConfig};
pub use layer::Layer;
