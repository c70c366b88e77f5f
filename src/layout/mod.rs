//! Layouts: how a global domain is cut into patches and who owns them.

pub mod dynamic_layout;
pub mod grid_layout;
pub mod node;
pub mod observer;

pub use dynamic_layout::DynamicLayout;
pub use grid_layout::{Distribution, GridLayout};
pub use node::{FillEntry, Node};
pub use observer::{LayoutEvent, LayoutObserver, ObserverId, ObserverList};

use crate::domain::Interval;
use crate::engine::GuardLayers;
use std::sync::Weak;

/// What a multi-patch engine needs from a layout.
///
/// Node lists are returned as snapshots so callers never hold a layout lock.
pub trait Layout<const D: usize>: Send + Sync + 'static {
    fn domain(&self) -> Interval<D>;

    /// Every node, in global id order.
    fn nodes(&self) -> Vec<Node<D>>;

    /// Nodes stored on this context, in local id order.
    fn local_nodes(&self) -> Vec<Node<D>> {
        self.nodes().into_iter().filter(Node::is_local).collect()
    }

    fn size_global(&self) -> usize {
        self.nodes().len()
    }

    fn size_local(&self) -> usize {
        self.local_nodes().len()
    }

    /// Guard layers between neighbouring patches.
    fn internal_guards(&self) -> GuardLayers<D>;

    /// Guard exchanges needed to refresh every internal guard cell.
    fn fill_list(&self) -> Vec<FillEntry<D>>;

    /// `true` when nodes have owning contexts. Every context gives the same
    /// answer, so it may decide whether to enter a collective.
    fn is_distributed(&self) -> bool {
        self.nodes().first().is_some_and(|n| n.context.is_some())
    }

    fn observers(&self) -> &ObserverList<D>;

    fn attach(&self, observer: Weak<dyn LayoutObserver<D>>) -> ObserverId {
        self.observers().attach(observer)
    }

    fn detach(&self, id: ObserverId) {
        self.observers().detach(id);
    }
}

/// Owning context of node `global_id` out of `nodes` spread over `contexts`
/// in contiguous runs.
pub(crate) fn block_owner(global_id: usize, nodes: usize, contexts: usize) -> usize {
    global_id * contexts / nodes.max(1)
}
