use crate::autofunc::gradient::{Gradient, RVector};
use crate::autofunc::nodes::{RVarNode, VarNode};
use crate::autofunc::result::{RResultRef, ResultRef};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque identity of a [`Variable`], issued once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u64);

/// A learnable (or perturbable) vector acting as a leaf of the graph.
///
/// Cloning a `Variable` yields another handle to the same buffer with the same
/// [`VarId`]; two variables created separately are always distinct, even when
/// their contents are equal.
#[derive(Clone)]
pub struct Variable {
    id: VarId,
    data: Rc<RefCell<Vec<f64>>>,
}

impl Variable {
    pub fn new(values: Vec<f64>) -> Self {
        Variable {
            id: VarId(NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed)),
            data: Rc::new(RefCell::new(values)),
        }
    }

    pub fn zeros(len: usize) -> Self {
        Variable::new(vec![0.0; len])
    }

    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows the current values.
    pub fn value(&self) -> Ref<'_, Vec<f64>> {
        self.data.borrow()
    }

    /// Mutably borrows the values. Only the owner of the parameter (or a
    /// gradient checker perturbing it) should write through this.
    pub fn value_mut(&self) -> RefMut<'_, Vec<f64>> {
        self.data.borrow_mut()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.data.borrow().clone()
    }

    /// A variable is constant unless the gradient tracks it.
    pub fn constant(&self, g: &Gradient) -> bool {
        !g.contains(self.id)
    }

    /// Snapshots the variable into a graph leaf.
    pub fn node(&self) -> ResultRef {
        Rc::new(VarNode::new(self.id, self.to_vec()))
    }

    /// Snapshots the variable into an R leaf whose derivative is the
    /// variable's entry in `v`, or zero when it has none.
    pub fn r_node(&self, v: &RVector) -> RResultRef {
        let value = self.to_vec();
        let r_value = match v.get(self.id) {
            Some(dir) => dir.to_vec(),
            None => vec![0.0; value.len()],
        };
        Rc::new(RVarNode::new(self.id, value, r_value))
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Variable {}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variable({:?}, {:?})", self.id, self.data.borrow())
    }
}
