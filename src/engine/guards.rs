//! Guard-layer widths and the shared dirty-face mask.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Guard cells per dimension and side.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GuardLayers<const D: usize> {
    pub lower: [usize; D],
    pub upper: [usize; D],
}

impl<const D: usize> Default for GuardLayers<D> {
    fn default() -> Self {
        Self::uniform(0)
    }
}

impl<const D: usize> GuardLayers<D> {
    pub fn new(lower: [usize; D], upper: [usize; D]) -> Self {
        Self { lower, upper }
    }

    /// `width` cells on every side.
    pub fn uniform(width: usize) -> Self {
        Self {
            lower: [width; D],
            upper: [width; D],
        }
    }

    /// Width on `face`; face `2d` is the lower side of dimension `d`, `2d + 1`
    /// the upper side.
    pub fn face_width(&self, face: usize) -> usize {
        let d = face / 2;
        if face % 2 == 0 { self.lower[d] } else { self.upper[d] }
    }

    pub fn is_zero(&self) -> bool {
        self.lower.iter().chain(self.upper.iter()).all(|&w| w == 0)
    }

    /// Faces with a non-zero width, as a mask.
    pub fn face_mask(&self) -> u32 {
        (0..2 * D)
            .filter(|&f| self.face_width(f) > 0)
            .fold(0, |m, f| m | (1 << f))
    }
}

/// Which of the `2 * D` guard faces are stale. Clones share the mask.
#[derive(Clone, Debug)]
pub struct DirtyFaces {
    bits: Arc<AtomicU32>,
    all: u32,
}

impl DirtyFaces {
    /// A mask over `faces` faces, initially all dirty.
    pub fn new(faces: usize) -> Self {
        assert!(faces <= 32, "at most 32 guard faces are tracked");
        let all = if faces == 32 { u32::MAX } else { (1u32 << faces) - 1 };
        Self {
            bits: Arc::new(AtomicU32::new(all)),
            all,
        }
    }

    pub fn mask(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.mask() != 0
    }

    pub fn is_face_dirty(&self, face: usize) -> bool {
        self.mask() & (1 << face) != 0
    }

    pub fn set_all(&self) {
        self.bits.store(self.all, Ordering::Release);
    }

    /// Clear exactly the faces in `mask`.
    pub fn clear(&self, mask: u32) {
        self.bits.fetch_and(!mask, Ordering::AcqRel);
    }

    /// Detach from other clones, keeping the current bits.
    pub fn make_own_copy(&mut self) {
        self.bits = Arc::new(AtomicU32::new(self.mask()));
    }

    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.bits) > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faces_map_to_sides() {
        let g = GuardLayers::<2>::new([1, 0], [2, 3]);
        assert_eq!(g.face_width(0), 1);
        assert_eq!(g.face_width(1), 2);
        assert_eq!(g.face_width(2), 0);
        assert_eq!(g.face_width(3), 3);
        assert_eq!(g.face_mask(), 0b1011);
        assert!(GuardLayers::<3>::default().is_zero());
    }

    #[test]
    fn dirty_mask_shared_until_own_copy() {
        let a = DirtyFaces::new(4);
        let mut b = a.clone();
        assert_eq!(a.mask(), 0b1111);
        b.clear(0b0101);
        assert_eq!(a.mask(), 0b1010);
        assert!(a.is_face_dirty(1));
        assert!(!a.is_face_dirty(2));
        b.make_own_copy();
        b.set_all();
        assert_eq!(a.mask(), 0b1010);
        assert_eq!(b.mask(), 0b1111);
    }
}
