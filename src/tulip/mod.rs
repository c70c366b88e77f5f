//! Messaging layer.
//!
//! Point-to-point transfers of engine views ([`transport`]) run inside the
//! scheduler; collectives ([`remote_proxy`], [`reduce`], [`collect`],
//! [`patch_size_syncer`]) run on the calling thread and keep the scheduler
//! moving while they wait. Every collective must be entered by all contexts in
//! the same order. With a single context every collective is the identity.

pub mod collect;
pub mod communicator;
pub mod patch_size_syncer;
pub mod reduce;
pub mod remote_proxy;
pub mod tags;
pub mod transport;
pub mod wire;

pub use collect::{CollectFromContexts, CollectionValue};
pub use communicator::{Communicator, LocalComm, LocalUniverse, NoComm};
pub use patch_size_syncer::PatchSizeSyncer;
pub use reduce::{
    OpAdd, OpAnd, OpBitAnd, OpBitOr, OpMax, OpMin, OpMultiply, OpOr, ReduceOverContexts,
    ReductionOp, ReductionValue,
};
pub use remote_proxy::RemoteProxy;
pub use tags::{CommTag, TagGenerator, TagSpace};
pub use transport::{ViewPacket, receive, receive_with, send};
