//! Brick: dense, compressible N-d storage.
//!
//! A brick either holds one value for its whole domain (compressed) or a
//! dense `Vec` in storage order (dimension 0 fastest). Writes that break
//! uniformity uncompress transparently; [`Brick::compress`] re-compresses when
//! every element is equal again.

use crate::domain::Interval;
use crate::engine::{Element, LocalEngine, Patch};
use crate::evaluator::local::AssignOp;
use crate::layout::Node;
use crate::runtime::{DataObject, RuntimeContext};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Storage<T> {
    Compressed(T),
    Dense(Vec<T>),
}

#[derive(Debug)]
struct BrickData<T> {
    object: DataObject,
    storage: Storage<T>,
}

/// Dense, compressible storage over an [`Interval`].
#[derive(Clone, Debug)]
pub struct Brick<const D: usize, T> {
    domain: Interval<D>,
    data: Arc<RwLock<BrickData<T>>>,
}

impl<const D: usize, T: Element> Brick<D, T> {
    /// Compressed brick holding `T::default()`.
    pub fn new(domain: Interval<D>) -> Self {
        Self::with_value(domain, T::default())
    }

    pub fn with_value(domain: Interval<D>, value: T) -> Self {
        Self {
            domain,
            data: Arc::new(RwLock::new(BrickData {
                object: DataObject::new(),
                storage: Storage::Compressed(value),
            })),
        }
    }

    /// # Panics
    /// If `values.len() != domain.size()`.
    pub fn from_values(domain: Interval<D>, values: Vec<T>) -> Self {
        assert_eq!(
            values.len(),
            domain.size(),
            "brick over {domain} needs {} values",
            domain.size()
        );
        Self {
            domain,
            data: Arc::new(RwLock::new(BrickData {
                object: DataObject::new(),
                storage: Storage::Dense(values),
            })),
        }
    }

    pub fn domain(&self) -> Interval<D> {
        self.domain
    }

    /// Deep-copy the storage if another handle shares it.
    pub fn make_own_copy(&mut self) {
        if !self.is_shared() {
            return;
        }
        let storage = self.data.read().storage.clone();
        self.data = Arc::new(RwLock::new(BrickData {
            object: DataObject::new(),
            storage,
        }));
    }

    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    /// All values in storage order.
    pub fn values(&self) -> Vec<T> {
        self.read_view(&self.domain)
    }

    fn check(&self, p: &[i64; D]) {
        assert!(
            self.domain.contains_point(p),
            "index {p:?} outside brick domain {}",
            self.domain
        );
    }

    fn check_view(&self, view: &Interval<D>) {
        assert!(
            self.domain.contains(view),
            "view {view} outside brick domain {}",
            self.domain
        );
    }

    fn dense(storage: &mut Storage<T>, n: usize) -> &mut Vec<T> {
        if let Storage::Compressed(v) = *storage {
            *storage = Storage::Dense(vec![v; n]);
        }
        match storage {
            Storage::Dense(values) => values,
            Storage::Compressed(_) => unreachable!("storage was just expanded"),
        }
    }
}

impl<const D: usize, T: Element> LocalEngine<D> for Brick<D, T> {
    type Element = T;

    fn allocate(domain: Interval<D>) -> Self {
        Brick::new(domain)
    }

    fn domain(&self) -> Interval<D> {
        self.domain
    }

    fn data_object(&self) -> DataObject {
        self.data.read().object
    }

    fn read(&self, p: &[i64; D]) -> T {
        self.check(p);
        match &self.data.read().storage {
            Storage::Compressed(v) => *v,
            Storage::Dense(values) => values[self.domain.offset_of(p)],
        }
    }

    fn write(&self, p: &[i64; D], value: T) {
        self.check(p);
        let mut data = self.data.write();
        if let Storage::Compressed(v) = data.storage {
            if v == value {
                return;
            }
        }
        let off = self.domain.offset_of(p);
        Self::dense(&mut data.storage, self.domain.size())[off] = value;
    }

    fn read_view(&self, view: &Interval<D>) -> Vec<T> {
        self.check_view(view);
        match &self.data.read().storage {
            Storage::Compressed(v) => vec![*v; view.size()],
            Storage::Dense(values) => view
                .points()
                .map(|p| values[self.domain.offset_of(&p)])
                .collect(),
        }
    }

    fn assign_view<A: AssignOp<T>>(&self, view: &Interval<D>, values: &[T], op: A) {
        self.check_view(view);
        assert_eq!(values.len(), view.size(), "value count does not match view {view}");
        if values.is_empty() {
            return;
        }
        let mut data = self.data.write();
        if op.overwrites() && *view == self.domain && values.iter().all(|v| *v == values[0]) {
            data.storage = Storage::Compressed(values[0]);
            return;
        }
        let n = self.domain.size();
        let dense = Self::dense(&mut data.storage, n);
        for (p, v) in view.points().zip(values) {
            op.apply(&mut dense[self.domain.offset_of(&p)], *v);
        }
    }

    fn fill_view(&self, view: &Interval<D>, value: T) {
        self.check_view(view);
        let mut data = self.data.write();
        if self.domain.contains(view) && view.size() == self.domain.size() {
            data.storage = Storage::Compressed(value);
            return;
        }
        if let Storage::Compressed(v) = data.storage {
            if v == value {
                return;
            }
        }
        let dense = Self::dense(&mut data.storage, self.domain.size());
        for p in view.points() {
            dense[self.domain.offset_of(&p)] = value;
        }
    }

    fn make_own_copy(&mut self) {
        Brick::make_own_copy(self);
    }

    fn is_shared(&self) -> bool {
        Brick::is_shared(self)
    }

    fn compressed(&self) -> bool {
        matches!(self.data.read().storage, Storage::Compressed(_))
    }

    fn compress(&self) -> bool {
        let mut data = self.data.write();
        let uniform = match &data.storage {
            Storage::Compressed(_) => return true,
            Storage::Dense(values) => match values.first() {
                Some(first) if values.iter().all(|v| v == first) => Some(*first),
                _ => None,
            },
        };
        match uniform {
            Some(v) => {
                data.storage = Storage::Compressed(v);
                true
            }
            None => false,
        }
    }

    fn uncompress(&self) {
        let mut data = self.data.write();
        Self::dense(&mut data.storage, self.domain.size());
    }
}

impl<const D: usize, T: Element> Patch<D> for Brick<D, T> {
    type Element = T;
    type Local = Self;

    fn from_node(_ctx: &RuntimeContext, node: &Node<D>) -> Self {
        Brick::new(node.allocated)
    }

    fn domain(&self) -> Interval<D> {
        self.domain
    }

    fn owning_context(&self) -> Option<usize> {
        None
    }

    fn local_engine(&self) -> Option<&Self> {
        Some(self)
    }

    fn make_own_copy(&mut self) {
        Brick::make_own_copy(self);
    }
}
