//! Data-parallel evaluation of element-wise expressions.
//!
//! [`local`] runs kernels over views of engines on this context. [`remote`]
//! and [`reduction`] split multi-patch operands with [`intersector`], move
//! remote views to the context chosen by [`gather_contexts`] and finish on
//! the local evaluator.

pub mod gather_contexts;
pub mod intersector;
pub mod local;
pub mod reduction;
pub mod remote;

pub use gather_contexts::GatherContexts;
pub use intersector::{Intersection, intersect_patches};
pub use local::{
    AssignOp, Kernel, OpAddAssign, OpAssign, OpMultiplyAssign, OpSubtractAssign, evaluate_local,
    reduce_local,
};
pub use reduction::{reduce_remote_multi_patch, reduce_remote_single_patch};
pub use remote::{evaluate_remote_multi_patch, evaluate_remote_single_patch};
