//! Storage engines.
//!
//! * [`LocalEngine`]: single-patch storage on this context ([`Brick`],
//!   [`DynamicBrick`]).
//! * [`Patch`]: what a [`MultiPatchEngine`] stores per layout node: a local
//!   engine, or a [`RemoteEngine`]/[`RemoteDynamicEngine`] that materializes
//!   its local engine only on the owning context.

pub mod brick;
pub mod dynamic_brick;
pub mod dynamic_events;
pub mod guards;
pub mod multipatch;
pub mod remote;
pub mod remote_dynamic;

pub use brick::Brick;
pub use dynamic_brick::DynamicBrick;
pub use dynamic_events::{DeleteMethod, DynamicEvent, DynamicId, DynamicOp};
pub use guards::{DirtyFaces, GuardLayers};
pub use multipatch::MultiPatchEngine;
pub use remote::RemoteEngine;
pub use remote_dynamic::RemoteDynamicEngine;

use crate::domain::{IndexSet, Interval};
use crate::evaluator::local::AssignOp;
use crate::layout::Node;
use crate::patch_error::PatchError;
use crate::runtime::{DataObject, RuntimeContext};
use crate::tulip::transport::{Payload, ViewPacket};
use crate::tulip::wire::WireCodec;
use std::fmt::Debug;

/// Anything that can be stored in an engine and shipped between contexts.
pub trait Element: WireCodec + Copy + Default + PartialEq + Debug + Send + Sync + 'static {}

impl<T> Element for T where T: WireCodec + Copy + Default + PartialEq + Debug + Send + Sync + 'static {}

/// Single-patch storage addressable on this context.
///
/// Clones are shallow: they share storage until [`make_own_copy`] is called.
///
/// [`make_own_copy`]: LocalEngine::make_own_copy
pub trait LocalEngine<const D: usize>: Clone + Send + Sync + 'static {
    type Element: Element;

    /// Fresh default-filled storage over `domain`, used for temporaries.
    fn allocate(domain: Interval<D>) -> Self;

    fn domain(&self) -> Interval<D>;

    /// Scheduler identity of the underlying storage.
    fn data_object(&self) -> DataObject;

    fn read(&self, p: &[i64; D]) -> Self::Element;

    fn write(&self, p: &[i64; D], value: Self::Element);

    /// Values of `view` in storage order.
    fn read_view(&self, view: &Interval<D>) -> Vec<Self::Element>;

    /// Combine `values` (storage order of `view`) into `view` with `op`.
    fn assign_view<A: AssignOp<Self::Element>>(&self, view: &Interval<D>, values: &[Self::Element], op: A);

    /// Set every element of `view` to `value`.
    fn fill_view(&self, view: &Interval<D>, value: Self::Element);

    /// Deep-copy the storage if it is shared with another handle.
    fn make_own_copy(&mut self);

    /// `true` if another handle shares this storage.
    fn is_shared(&self) -> bool;

    fn compressed(&self) -> bool {
        false
    }

    /// Try to compress; returns whether the engine is compressed afterwards.
    fn compress(&self) -> bool {
        false
    }

    fn uncompress(&self) {}

    fn elements_compressed(&self) -> usize {
        if self.compressed() { self.domain().size() } else { 0 }
    }

    /// `[domain][compressed][payload]` form of `view`.
    fn pack(&self, view: &Interval<D>) -> ViewPacket<D, Self::Element> {
        let payload = if self.compressed() && self.domain().contains(view) && !view.is_empty() {
            Payload::Compressed(self.read(&view.firsts()))
        } else {
            Payload::Dense(self.read_view(view))
        };
        ViewPacket {
            domain: *view,
            payload,
        }
    }
}

/// One patch of a multi-patch engine.
pub trait Patch<const D: usize>: Clone + Send + Sync + 'static {
    type Element: Element;
    type Local: LocalEngine<D, Element = Self::Element>;

    /// Allocate the patch described by `node` (allocated domain, owner).
    fn from_node(ctx: &RuntimeContext, node: &Node<D>) -> Self;

    fn domain(&self) -> Interval<D>;

    /// `None` when the patch is present on every context.
    fn owning_context(&self) -> Option<usize>;

    /// Local storage, present only where the patch is owned.
    fn local_engine(&self) -> Option<&Self::Local>;

    fn make_own_copy(&mut self);

    /// Append `n` default elements.
    fn create(&mut self, _n: usize) -> Result<(), PatchError> {
        Err(PatchError::UnsupportedOperation("create on a fixed-size patch"))
    }

    /// Remove `kill` (absolute indices unless `offset`, then relative to the
    /// patch's first index).
    fn destroy(&mut self, _kill: &IndexSet, _method: DeleteMethod, _offset: bool) -> Result<(), PatchError> {
        Err(PatchError::UnsupportedOperation("destroy on a fixed-size patch"))
    }

    /// Append copies of the elements at `from`.
    fn copy(&mut self, _from: &IndexSet, _offset: bool) -> Result<(), PatchError> {
        Err(PatchError::UnsupportedOperation("copy on a fixed-size patch"))
    }

    /// Append `values` taken from another patch; `count` lets non-owners
    /// track the new length without the data.
    fn append(&mut self, _values: &[Self::Element], _count: usize) -> Result<(), PatchError> {
        Err(PatchError::UnsupportedOperation("append on a fixed-size patch"))
    }

    /// Relabel the domain without touching data.
    fn sync(&mut self, _domain: Interval<D>) -> Result<(), PatchError> {
        Err(PatchError::UnsupportedOperation("sync on a fixed-size patch"))
    }

    fn is_local(&self) -> bool {
        self.local_engine().is_some()
    }
}
