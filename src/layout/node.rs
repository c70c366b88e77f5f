use crate::domain::Interval;

/// One patch of a layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Node<const D: usize> {
    /// Cells this patch owns.
    pub domain: Interval<D>,
    /// Owned cells plus guard layers; what the patch allocates.
    pub allocated: Interval<D>,
    /// Owning context, `None` when the patch exists on every context.
    pub context: Option<usize>,
    pub global_id: usize,
    /// Position among this context's patches, `None` if not local.
    pub local_id: Option<usize>,
}

impl<const D: usize> Node<D> {
    pub fn is_local(&self) -> bool {
        self.local_id.is_some()
    }
}

/// One unit of guard exchange: copy `domain` from the owned cells of
/// `owned_patch` into the guard cells of `guard_patch` on `face`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FillEntry<const D: usize> {
    pub owned_patch: usize,
    pub guard_patch: usize,
    /// `2 * d` for the lower side of dimension `d`, `2 * d + 1` for the upper.
    pub face: usize,
    pub domain: Interval<D>,
}
