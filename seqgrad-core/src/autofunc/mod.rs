//! # Automatic differentiation (`autofunc`)
//!
//! Graphs are built eagerly: every forward evaluation returns a fresh node
//! ([`ResultNode`] or, for forward-mode passes, [`RResultNode`]) that owns its
//! output and holds `Rc`s to its inputs. Backward passes walk from a node to
//! the leaves, adding into a [`Gradient`] (and [`RGradient`]) whose key set
//! names the tracked [`Variable`]s.
//!
//! Absent upstream vectors (`None`) are treated as zero vectors everywhere.

pub mod gradient;
pub mod nodes;
pub mod result;
pub mod variable;

pub use gradient::{Gradient, RGradient, RVector};
pub use nodes::{Concat, Pool, RConcat, RPool, RVarNode, VarNode};
pub use result::{upstream_or_zeros, RResultNode, RResultRef, ResultNode, ResultRef};
pub use variable::{VarId, Variable};
