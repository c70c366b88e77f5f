//! Reference-like access to a value that lives on one context.
//!
//! Constructing a [`RemoteProxy`] is collective: the owning context pushes a
//! copy of the value to every other context, which wait for it. Afterwards
//! every context reads the owner's value. Writes go through to the live
//! storage on the owner; elsewhere they only touch the local shadow.

use crate::patch_error::PatchError;
use crate::runtime::RuntimeContext;
use crate::tulip::tags::TagSpace;
use crate::tulip::wire::{WireCodec, from_message, kind, to_message};
use std::ops::Deref;

type Sink<'a, T> = Box<dyn FnMut(&T) + Send + 'a>;

pub struct RemoteProxy<'a, T> {
    value: T,
    owner: usize,
    sink: Option<Sink<'a, T>>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for RemoteProxy<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("value", &self.value)
            .field("owner", &self.owner)
            .field("live", &self.sink.is_some())
            .finish()
    }
}

impl<'a, T> RemoteProxy<'a, T>
where
    T: WireCodec + Clone + Send + 'a,
{
    /// Bind to `value`, whose authoritative copy lives on `owner`. The
    /// contents of `value` on other contexts are ignored.
    pub fn new(ctx: &RuntimeContext, value: &'a mut T, owner: usize) -> Result<Self, PatchError> {
        let current = value.clone();
        Self::with_sink(ctx, current, owner, move |v: &T| *value = v.clone())
    }

    /// Proxy whose owner-side writes are forwarded to `sink`.
    pub(crate) fn with_sink<F>(ctx: &RuntimeContext, value: T, owner: usize, sink: F) -> Result<Self, PatchError>
    where
        F: FnMut(&T) + Send + 'a,
    {
        let value = Self::broadcast(ctx, value, owner)?;
        let sink: Option<Sink<'a, T>> = if ctx.my_context() == owner {
            Some(Box::new(sink))
        } else {
            None
        };
        Ok(Self { value, owner, sink })
    }

    /// Live proxy for a value every context holds; no messages are sent.
    pub(crate) fn replicated<F>(ctx: &RuntimeContext, value: T, sink: F) -> Self
    where
        F: FnMut(&T) + Send + 'a,
    {
        Self {
            value,
            owner: ctx.my_context(),
            sink: Some(Box::new(sink)),
        }
    }

    /// Distribute `value` from `owner` to every context and return it. The
    /// argument is only read on `owner`.
    ///
    /// # Panics
    /// If `owner` is not a context.
    pub fn broadcast(ctx: &RuntimeContext, value: T, owner: usize) -> Result<T, PatchError> {
        let n = ctx.num_contexts();
        assert!(owner < n, "proxy owner {owner} outside {n} contexts");
        let me = ctx.my_context();
        let tag = ctx.next_collective_tag(TagSpace::RemoteProxy);
        if me == owner {
            if n > 1 {
                let msg = to_message(kind::PROXY, &value);
                for c in (0..n).filter(|&c| c != me) {
                    ctx.post(c, tag, msg.clone());
                }
            }
            Ok(value)
        } else {
            let msg = ctx.wait_for_message(owner, tag)?;
            log::trace!("context {me}: proxy {} resolved from {owner}", tag.seq());
            from_message(kind::PROXY, msg).map_err(|e| PatchError::Comm {
                neighbor: owner,
                detail: e.to_string(),
            })
        }
    }

    /// Copy of the owner's value.
    pub fn get(&self) -> T {
        self.value.clone()
    }

    pub fn owner(&self) -> usize {
        self.owner
    }

    /// `true` on the owning context, where writes reach the real storage.
    pub fn is_live(&self) -> bool {
        self.sink.is_some()
    }

    /// Write `v`. On the owner this updates the underlying storage; on other
    /// contexts only the shadow changes.
    pub fn set(&mut self, v: T) {
        if let Some(sink) = self.sink.as_mut() {
            sink(&v);
        }
        self.value = v;
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for RemoteProxy<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}
