//! Message tags.
//!
//! A [`CommTag`] packs a tag space, a phase and a sequence number into 32
//! bits. Point-to-point transfers draw their sequence numbers from the
//! [`TagGenerator`]; every collective kind owns its own space and counts its
//! instances with a [`CollectiveSequencer`], so concurrent reductions, gathers
//! and proxies never cross-match.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};

const SEQ_BITS: u32 = 24;
const SEQ_MASK: u32 = (1 << SEQ_BITS) - 1;

/// Largest tag every MPI implementation must accept.
pub const MIN_TAG_UB: u32 = 32767;

// space (2 bits) and phase (4 bits) in the low bits of a bounded tag
const BOUNDED_LOW_BITS: u32 = 6;

/// Independent tag namespaces.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TagSpace {
    PointToPoint = 0,
    Collection = 1,
    Reduction = 2,
    RemoteProxy = 3,
}

impl TagSpace {
    const ALL: [TagSpace; 4] = [
        TagSpace::PointToPoint,
        TagSpace::Collection,
        TagSpace::Reduction,
        TagSpace::RemoteProxy,
    ];

    fn from_bits(bits: u32) -> Option<Self> {
        Self::ALL.get(bits as usize).copied()
    }
}

/// Typed message tag: `[space:4][phase:4][seq:24]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(pub u32);

impl CommTag {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn compose(space: TagSpace, phase: u8, seq: u32) -> Self {
        debug_assert!(phase < 16, "tag phase must fit in 4 bits");
        Self(((space as u32) << 28) | (u32::from(phase & 0xF) << SEQ_BITS) | (seq & SEQ_MASK))
    }

    pub fn point_to_point(seq: u32) -> Self {
        Self::compose(TagSpace::PointToPoint, 0, seq)
    }

    pub fn space(self) -> Option<TagSpace> {
        TagSpace::from_bits(self.0 >> 28)
    }

    pub fn phase(self) -> u8 {
        ((self.0 >> SEQ_BITS) & 0xF) as u8
    }

    pub fn seq(self) -> u32 {
        self.0 & SEQ_MASK
    }

    /// Same space and sequence, different phase.
    pub fn with_phase(self, phase: u8) -> Self {
        Self((self.0 & !(0xF << SEQ_BITS)) | (u32::from(phase & 0xF) << SEQ_BITS))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Fold into `0..=tag_ub` for transports with a bounded tag range. Space
    /// and phase stay exact in the low bits and the sequence number wraps, so
    /// two tags of one space and phase only collide when their sequence
    /// numbers differ by a multiple of `(tag_ub + 1) / 64`.
    ///
    /// # Panics
    /// If `tag_ub` is below [`MIN_TAG_UB`].
    pub fn bounded(self, tag_ub: u32) -> u32 {
        assert!(tag_ub >= MIN_TAG_UB, "tag bound {tag_ub} below the MPI minimum {MIN_TAG_UB}");
        let slots = (u64::from(tag_ub) + 1) >> BOUNDED_LOW_BITS;
        let low = ((self.0 >> 28) & 0x3) << 4 | u32::from(self.phase());
        let high = u64::from(self.seq()) % slots;
        ((high << BOUNDED_LOW_BITS) as u32) | low
    }
}

/// Per-context point-to-point tag allocator.
///
/// For an ordered pair of contexts `(a, b)`, the n-th tag returned by
/// `send(b)` on `a` equals the n-th tag returned by `receive(a)` on `b`,
/// provided both sides issue their transfers in the same program order.
#[derive(Debug, Default)]
pub struct TagGenerator {
    send: DashMap<usize, u32>,
    receive: DashMap<usize, u32>,
}

impl TagGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(map: &DashMap<usize, u32>, ctx: usize) -> u32 {
        let mut slot = map.entry(ctx).or_insert(0);
        let tag = *slot;
        *slot = slot.wrapping_add(1) & SEQ_MASK;
        tag
    }

    /// Next tag for a message to `ctx`.
    pub fn send(&self, ctx: usize) -> CommTag {
        CommTag::point_to_point(Self::bump(&self.send, ctx))
    }

    /// Next tag for a message from `ctx`.
    pub fn receive(&self, ctx: usize) -> CommTag {
        CommTag::point_to_point(Self::bump(&self.receive, ctx))
    }
}

/// Counts collective instances per tag space. All contexts enter collectives
/// in the same order, so the n-th reduction gets the same tag everywhere.
#[derive(Debug, Default)]
pub struct CollectiveSequencer {
    counters: [AtomicU32; 4],
}

impl CollectiveSequencer {
    pub fn next(&self, space: TagSpace) -> CommTag {
        let seq = self.counters[space as usize].fetch_add(1, Ordering::Relaxed);
        CommTag::compose(space, 0, seq)
    }
}
