//! Gather one optional value per context onto a root context.

use crate::patch_error::PatchError;
use crate::runtime::RuntimeContext;
use crate::tulip::tags::TagSpace;
use crate::tulip::wire::{WireCodec, from_message, kind, to_message};
use bytes::{Bytes, BytesMut};
use std::ops::Index;

/// A context's contribution. `value` is `None` for contexts that do not
/// participate; such entries carry no payload on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionValue<T> {
    pub context: usize,
    pub value: Option<T>,
}

impl<T> CollectionValue<T> {
    pub fn valid(&self) -> bool {
        self.value.is_some()
    }
}

impl<T: WireCodec> WireCodec for CollectionValue<T> {
    fn encode(&self, out: &mut BytesMut) {
        self.context.encode(out);
        self.value.encode(out);
    }
    fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
        Ok(Self {
            context: usize::decode(input)?,
            value: Option::<T>::decode(input)?,
        })
    }
}

/// Values of every context, indexable on the root.
#[derive(Debug)]
pub struct CollectFromContexts<T> {
    me: usize,
    to_context: usize,
    slots: Vec<CollectionValue<T>>,
    default: T,
}

impl<T> CollectFromContexts<T>
where
    T: WireCodec + Clone + Default + Send,
{
    /// Collective: every context must call it, in the same order relative to
    /// other collections.
    ///
    /// # Panics
    /// If `to_context` is not a context.
    pub fn new(ctx: &RuntimeContext, value: T, to_context: usize, valid: bool) -> Result<Self, PatchError> {
        let n = ctx.num_contexts();
        assert!(to_context < n, "collection root {to_context} outside {n} contexts");
        let me = ctx.my_context();
        let tag = ctx.next_collective_tag(TagSpace::Collection);
        let mine = CollectionValue {
            context: me,
            value: valid.then_some(value),
        };

        let mut slots = Vec::new();
        if me != to_context {
            ctx.post(to_context, tag, to_message(kind::COLLECTION, &mine));
        } else {
            slots.reserve(n);
            for c in 0..n {
                if c == me {
                    slots.push(mine.clone());
                    continue;
                }
                let msg = ctx.wait_for_message(c, tag)?;
                let cv: CollectionValue<T> =
                    from_message(kind::COLLECTION, msg).map_err(|e| PatchError::Comm {
                        neighbor: c,
                        detail: e.to_string(),
                    })?;
                if cv.context != c {
                    return Err(PatchError::Comm {
                        neighbor: c,
                        detail: format!("collection entry labelled context {}", cv.context),
                    });
                }
                slots.push(cv);
            }
            log::debug!(
                "context {me}: collection {} gathered {} of {n} values",
                tag.seq(),
                slots.iter().filter(|s| s.valid()).count()
            );
        }
        Ok(Self {
            me,
            to_context,
            slots,
            default: T::default(),
        })
    }

    fn check_root(&self) {
        assert_eq!(
            self.me, self.to_context,
            "collected values are only available on context {}",
            self.to_context
        );
    }

    /// Value contributed by context `i`, `None` if it did not participate.
    ///
    /// # Panics
    /// Off the root context.
    pub fn get(&self, i: usize) -> Option<&T> {
        self.check_root();
        self.slots.get(i).and_then(|s| s.value.as_ref())
    }

    pub fn is_valid(&self, i: usize) -> bool {
        self.get(i).is_some()
    }

    /// Every entry in context order (root only).
    pub fn entries(&self) -> &[CollectionValue<T>] {
        self.check_root();
        &self.slots
    }

    /// Number of contexts represented (root only).
    pub fn len(&self) -> usize {
        self.check_root();
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_root(&self) -> bool {
        self.me == self.to_context
    }
}

impl<T> Index<usize> for CollectFromContexts<T>
where
    T: WireCodec + Clone + Default + Send,
{
    type Output = T;

    /// Invalid contributions read as `T::default()`.
    fn index(&self, i: usize) -> &T {
        self.check_root();
        assert!(i < self.slots.len(), "context {i} outside collection of {}", self.slots.len());
        self.slots[i].value.as_ref().unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeConfig;

    fn cfg() -> RuntimeConfig {
        RuntimeConfig::default().with_workers(1)
    }

    #[test]
    fn serial_collection_holds_own_value() {
        let ctx = RuntimeContext::serial(cfg()).unwrap();
        let c = CollectFromContexts::new(&ctx, "solo".to_string(), 0, true).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0], "solo");
    }

    #[test]
    fn invalid_slots_default_on_root() {
        let got = RuntimeContext::run_local(3, cfg(), |ctx| {
            let me = ctx.my_context();
            let c = CollectFromContexts::new(&ctx, (me as i64 + 1) * 100, 0, me != 1).unwrap();
            c.is_root().then(|| (c[0], c[1], c[2], c.is_valid(1)))
        });
        assert_eq!(got[0], Some((100, 0, 300, false)));
        assert_eq!(got[1], None);
        assert_eq!(got[2], None);
    }

    #[test]
    fn collections_are_sequenced() {
        let got = RuntimeContext::run_local(2, cfg(), |ctx| {
            let me = ctx.my_context() as u32;
            let a = CollectFromContexts::new(&ctx, me, 1, true).unwrap();
            let b = CollectFromContexts::new(&ctx, me + 10, 1, true).unwrap();
            a.is_root().then(|| (a[0], a[1], b[0], b[1]))
        });
        assert_eq!(got[1], Some((0, 1, 10, 11)));
    }

    #[test]
    #[should_panic(expected = "only available on context 0")]
    fn indexing_off_root_panics() {
        RuntimeContext::run_local(2, cfg(), |ctx| {
            let c = CollectFromContexts::new(&ctx, 1u8, 0, true).unwrap();
            if ctx.my_context() == 1 {
                let _ = c[0];
            }
        });
    }
}
