//! Recurrent blocks over sequences, back-propagation through time, and the
//! gradient checkers used to validate them.

pub mod block;
pub mod block_checker;
pub mod grad_check;
pub mod layer_block;
pub mod seq_func;

pub use block::{Block, BlockRStep, BlockStep, VecRState, VecRStateGrad};
pub use block_checker::BlockChecker;
pub use grad_check::{values_equal, vecs_equal, GradCheckError, SeqChecker, DEFAULT_DELTA, DEFAULT_PREC};
pub use layer_block::LayerBlock;
pub use seq_func::{SeqFunc, SeqRResult, SeqResult, SeqUpstream};
