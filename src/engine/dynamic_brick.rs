//! Resizable 1-d storage.

use crate::domain::{IndexSet, Interval};
use crate::engine::dynamic_events::{DeleteMethod, delete_with, validate_copy_list, validate_kill_list};
use crate::engine::{Element, LocalEngine, Patch};
use crate::evaluator::local::AssignOp;
use crate::layout::Node;
use crate::patch_error::PatchError;
use crate::runtime::{DataObject, RuntimeContext};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug)]
struct DynData<T> {
    object: DataObject,
    first: i64,
    values: Vec<T>,
}

impl<T> DynData<T> {
    fn domain(&self) -> Interval<1> {
        Interval::sized([self.first], [self.values.len()])
    }
}

/// Contiguous 1-d storage whose length changes with create, destroy and copy.
///
/// The domain lives with the shared storage, so every shallow copy sees a
/// resize.
#[derive(Clone, Debug)]
pub struct DynamicBrick<T> {
    data: Arc<RwLock<DynData<T>>>,
}

impl<T: Element> DynamicBrick<T> {
    /// Default-filled storage over `domain`.
    pub fn new(domain: Interval<1>) -> Self {
        Self::from_values(domain.first(0), vec![T::default(); domain.size()])
    }

    pub fn from_values(first: i64, values: Vec<T>) -> Self {
        Self {
            data: Arc::new(RwLock::new(DynData {
                object: DataObject::new(),
                first,
                values,
            })),
        }
    }

    pub fn domain(&self) -> Interval<1> {
        self.data.read().domain()
    }

    pub fn len(&self) -> usize {
        self.data.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<T> {
        self.data.read().values.clone()
    }

    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    pub fn make_own_copy(&mut self) {
        if !self.is_shared() {
            return;
        }
        let (first, values) = {
            let d = self.data.read();
            (d.first, d.values.clone())
        };
        *self = Self::from_values(first, values);
    }

    /// Append `n` default elements.
    pub fn create(&self, n: usize) {
        let mut d = self.data.write();
        let len = d.values.len();
        d.values.resize(len + n, T::default());
    }

    /// Remove the elements of `kill`. Indices are absolute unless `offset`,
    /// in which case they count from the first element.
    pub fn destroy(&self, kill: &IndexSet, method: DeleteMethod, offset: bool) -> Result<(), PatchError> {
        let mut d = self.data.write();
        let rel = relative(kill, d.first, offset);
        validate_kill_list(&rel, d.values.len())?;
        delete_with(&mut d.values, &rel, method);
        Ok(())
    }

    /// Append copies of the elements at `from`, in the order given.
    pub fn copy(&self, from: &IndexSet, offset: bool) -> Result<(), PatchError> {
        let mut d = self.data.write();
        let rel = relative(from, d.first, offset);
        validate_copy_list(&rel, d.values.len())?;
        let copies: Vec<T> = rel.iter().map(|&i| d.values[i as usize]).collect();
        d.values.extend(copies);
        Ok(())
    }

    pub fn append(&self, values: &[T]) {
        self.data.write().values.extend_from_slice(values);
    }

    /// Relabel to `domain`, which must have the current length.
    pub fn sync(&self, domain: Interval<1>) -> Result<(), PatchError> {
        let mut d = self.data.write();
        if domain.size() != d.values.len() {
            return Err(PatchError::DomainMismatch {
                expected: d.values.len(),
                actual: domain.size(),
            });
        }
        d.first = domain.first(0);
        Ok(())
    }

    fn index(d: &DynData<T>, p: &[i64; 1]) -> usize {
        assert!(
            d.domain().contains_point(p),
            "index {} outside dynamic domain {}",
            p[0],
            d.domain()
        );
        (p[0] - d.first) as usize
    }
}

fn relative(set: &IndexSet, first: i64, offset: bool) -> Vec<i64> {
    let pts = set.to_points();
    if offset {
        pts
    } else {
        pts.into_iter().map(|p| p - first).collect()
    }
}

impl<T: Element> LocalEngine<1> for DynamicBrick<T> {
    type Element = T;

    fn allocate(domain: Interval<1>) -> Self {
        DynamicBrick::new(domain)
    }

    fn domain(&self) -> Interval<1> {
        DynamicBrick::domain(self)
    }

    fn data_object(&self) -> DataObject {
        self.data.read().object
    }

    fn read(&self, p: &[i64; 1]) -> T {
        let d = self.data.read();
        d.values[Self::index(&d, p)]
    }

    fn write(&self, p: &[i64; 1], value: T) {
        let mut d = self.data.write();
        let i = Self::index(&d, p);
        d.values[i] = value;
    }

    fn read_view(&self, view: &Interval<1>) -> Vec<T> {
        let d = self.data.read();
        assert!(d.domain().contains(view), "view {view} outside dynamic domain {}", d.domain());
        view.points().map(|p| d.values[(p[0] - d.first) as usize]).collect()
    }

    fn assign_view<A: AssignOp<T>>(&self, view: &Interval<1>, values: &[T], op: A) {
        assert_eq!(values.len(), view.size(), "value count does not match view {view}");
        let mut d = self.data.write();
        assert!(d.domain().contains(view), "view {view} outside dynamic domain {}", d.domain());
        let first = d.first;
        for (p, v) in view.points().zip(values) {
            op.apply(&mut d.values[(p[0] - first) as usize], *v);
        }
    }

    fn fill_view(&self, view: &Interval<1>, value: T) {
        let mut d = self.data.write();
        assert!(d.domain().contains(view), "view {view} outside dynamic domain {}", d.domain());
        let first = d.first;
        for p in view.points() {
            d.values[(p[0] - first) as usize] = value;
        }
    }

    fn make_own_copy(&mut self) {
        DynamicBrick::make_own_copy(self);
    }

    fn is_shared(&self) -> bool {
        DynamicBrick::is_shared(self)
    }
}

impl<T: Element> Patch<1> for DynamicBrick<T> {
    type Element = T;
    type Local = Self;

    fn from_node(_ctx: &RuntimeContext, node: &Node<1>) -> Self {
        DynamicBrick::new(node.allocated)
    }

    fn domain(&self) -> Interval<1> {
        DynamicBrick::domain(self)
    }

    fn owning_context(&self) -> Option<usize> {
        None
    }

    fn local_engine(&self) -> Option<&Self> {
        Some(self)
    }

    fn make_own_copy(&mut self) {
        DynamicBrick::make_own_copy(self);
    }

    fn create(&mut self, n: usize) -> Result<(), PatchError> {
        DynamicBrick::create(self, n);
        Ok(())
    }

    fn destroy(&mut self, kill: &IndexSet, method: DeleteMethod, offset: bool) -> Result<(), PatchError> {
        DynamicBrick::destroy(self, kill, method, offset)
    }

    fn copy(&mut self, from: &IndexSet, offset: bool) -> Result<(), PatchError> {
        DynamicBrick::copy(self, from, offset)
    }

    fn append(&mut self, values: &[T], _count: usize) -> Result<(), PatchError> {
        DynamicBrick::append(self, values);
        Ok(())
    }

    fn sync(&mut self, domain: Interval<1>) -> Result<(), PatchError> {
        DynamicBrick::sync(self, domain)
    }
}
