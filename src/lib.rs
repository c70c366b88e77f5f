//! # multipatch
//!
//! multipatch stores logically contiguous N-dimensional arrays as a set of
//! patches spread over cooperating contexts (threads in one process, or MPI
//! ranks). It keeps guard layers around each patch consistent, lets 1-d
//! arrays grow and shrink through dynamic events, and evaluates element-wise
//! expressions and reductions wherever the data lives.
//!
//! ## Layers
//! - [`runtime`]: context identity, configuration and the cooperative
//!   scheduler that runs data-parallel work and message transfers.
//! - [`tulip`]: the messaging layer. Point-to-point view transfers plus the
//!   collectives (reduce, collect, remote proxies, patch size sync).
//! - [`domain`]: intervals, strided ranges, grids and index sets.
//! - [`layout`]: how a global domain is cut into patches and who owns them.
//! - [`engine`]: local storage, remote patches and the multi-patch engine.
//! - [`evaluator`]: local, remote and reducing evaluation.
//!
//! ## Usage
//!
//! ```
//! use multipatch::prelude::*;
//!
//! let sums = RuntimeContext::run_local(2, RuntimeConfig::default(), |ctx| {
//!     let me = ctx.my_context() as i64;
//!     ReduceOverContexts::<i64, OpAdd>::new(&ctx, me + 1, 0, true)
//!         .and_then(|r| r.broadcast())
//!         .unwrap()
//! });
//! assert_eq!(sums, vec![3, 3]);
//! ```
//!
//! Every collective must be entered by all contexts in the same order; with
//! one context every collective is the identity.

// Re-export our major subsystems:
pub mod debug_invariants;
pub mod domain;
pub mod engine;
pub mod evaluator;
pub mod layout;
pub mod patch_error;
pub mod runtime;
pub mod tulip;

pub use debug_invariants::DebugInvariants;
pub use patch_error::PatchError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::domain::{Grid1, IndexSet, Interval, Range1};
    pub use crate::engine::{
        Brick, DeleteMethod, DynamicBrick, Element, GuardLayers, LocalEngine, MultiPatchEngine,
        Patch, RemoteDynamicEngine, RemoteEngine,
    };
    pub use crate::evaluator::{
        AssignOp, OpAddAssign, OpAssign, OpMultiplyAssign, OpSubtractAssign,
        evaluate_remote_multi_patch, evaluate_remote_single_patch, reduce_remote_multi_patch,
        reduce_remote_single_patch,
    };
    pub use crate::layout::{Distribution, DynamicLayout, GridLayout, Layout};
    pub use crate::patch_error::PatchError;
    pub use crate::runtime::{RuntimeConfig, RuntimeContext};
    #[cfg(feature = "mpi-support")]
    pub use crate::tulip::communicator::MpiComm;
    pub use crate::tulip::{
        CollectFromContexts, Communicator, OpAdd, OpMax, OpMin, PatchSizeSyncer,
        ReduceOverContexts, RemoteProxy,
    };
}
