//! Point-to-point transfer of engine views between two contexts.
//!
//! Both directions are scheduler iterates. A send holds a read lock on the
//! source storage while it packs and posts the view; a receive holds a write
//! lock on the target from the moment it is granted until the matching
//! message has been unpacked into the target view. Tags come from the
//! context's [`TagGenerator`](crate::tulip::tags::TagGenerator), so the n-th
//! send from `a` to `b` matches the n-th receive on `b` from `a`.

use crate::domain::Interval;
use crate::engine::{Element, LocalEngine};
use crate::evaluator::local::{AssignOp, OpAssign};
use crate::patch_error::PatchError;
use crate::runtime::{Iterate, IterateOutcome, PendingMessage, RuntimeContext};
use crate::tulip::wire::{WireCodec, from_message, kind, to_message};
use bytes::{Bytes, BytesMut};

/// Values of a view: one value standing for every element, or all of them.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload<T> {
    Compressed(T),
    Dense(Vec<T>),
}

/// Packed form of an engine view: `[domain][compressed][value | values]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewPacket<const D: usize, T> {
    pub domain: Interval<D>,
    pub payload: Payload<T>,
}

impl<const D: usize, T: Element> ViewPacket<D, T> {
    pub fn is_compressed(&self) -> bool {
        matches!(self.payload, Payload::Compressed(_))
    }

    /// Number of elements described.
    pub fn size(&self) -> usize {
        self.domain.size()
    }

    /// Expanded values in storage order.
    pub fn values(&self) -> Vec<T> {
        match &self.payload {
            Payload::Compressed(v) => vec![*v; self.domain.size()],
            Payload::Dense(values) => values.clone(),
        }
    }

    /// Combine the packet into `view` of `engine` with `op`. Only the size of
    /// `view` has to match the packed domain, not its indices.
    pub fn unpack_into<E, A>(&self, engine: &E, view: &Interval<D>, op: A) -> Result<(), PatchError>
    where
        E: LocalEngine<D, Element = T>,
        A: AssignOp<T>,
    {
        if view.size() != self.size() {
            return Err(PatchError::DomainMismatch {
                expected: view.size(),
                actual: self.size(),
            });
        }
        match &self.payload {
            Payload::Compressed(v) if op.overwrites() => engine.fill_view(view, *v),
            Payload::Compressed(_) => engine.assign_view(view, &self.values(), op),
            Payload::Dense(values) => engine.assign_view(view, values, op),
        }
        Ok(())
    }
}

impl<const D: usize, T: Element> WireCodec for ViewPacket<D, T> {
    fn encode(&self, out: &mut BytesMut) {
        self.domain.encode(out);
        match &self.payload {
            Payload::Compressed(v) => {
                true.encode(out);
                v.encode(out);
            }
            Payload::Dense(values) => {
                false.encode(out);
                values.encode(out);
            }
        }
    }

    fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
        let domain = Interval::<D>::decode(input)?;
        let payload = if bool::decode(input)? {
            Payload::Compressed(T::decode(input)?)
        } else {
            let values = Vec::<T>::decode(input)?;
            if values.len() != domain.size() {
                return Err(PatchError::Wire(format!(
                    "view {domain} carries {} values",
                    values.len()
                )));
            }
            Payload::Dense(values)
        };
        Ok(Self { domain, payload })
    }
}

fn check_peer(ctx: &RuntimeContext, peer: usize, what: &str) {
    assert!(
        peer < ctx.num_contexts(),
        "{what}: context {peer} does not exist ({} contexts)",
        ctx.num_contexts()
    );
    assert_ne!(
        peer,
        ctx.my_context(),
        "{what}: context {peer} cannot message itself"
    );
}

/// Schedule a transfer of `engine`'s `view` to context `to`.
///
/// # Panics
/// If `to` is out of range or is this context.
pub fn send<const D: usize, E>(ctx: &RuntimeContext, engine: &E, view: Interval<D>, to: usize)
where
    E: LocalEngine<D>,
{
    check_peer(ctx, to, "send");
    let tag = ctx.tags().send(to);
    log::debug!(
        "context {}: send {view} to {to} (tag {})",
        ctx.my_context(),
        tag.seq()
    );
    let object = engine.data_object();
    let engine = engine.clone();
    let rt = ctx.clone();
    ctx.spawn(
        Iterate::new("send", move || {
            let packet = engine.pack(&view);
            rt.post(to, tag, to_message(kind::ENGINE_VIEW, &packet));
            Ok(IterateOutcome::Complete)
        })
        .reads(object),
    );
}

/// Schedule a receive from context `from` that overwrites `view`.
///
/// # Panics
/// If `from` is out of range or is this context.
pub fn receive<const D: usize, E>(ctx: &RuntimeContext, engine: &E, view: Interval<D>, from: usize)
where
    E: LocalEngine<D>,
{
    receive_with(ctx, engine, view, from, OpAssign);
}

/// Like [`receive`], combining the incoming values into `view` with `op`.
pub fn receive_with<const D: usize, E, A>(
    ctx: &RuntimeContext,
    engine: &E,
    view: Interval<D>,
    from: usize,
    op: A,
) where
    E: LocalEngine<D>,
    A: AssignOp<E::Element>,
{
    check_peer(ctx, from, "receive");
    let tag = ctx.tags().receive(from);
    log::debug!(
        "context {}: receive {view} from {from} (tag {})",
        ctx.my_context(),
        tag.seq()
    );
    ctx.expect_message();
    let object = engine.data_object();
    let engine = engine.clone();
    let rt = ctx.clone();
    ctx.spawn(
        Iterate::new("receive", move || {
            Ok(IterateOutcome::AwaitMessage(PendingMessage {
                from,
                tag,
                on_arrival: Box::new(move |msg| {
                    let res = from_message::<ViewPacket<D, E::Element>>(kind::ENGINE_VIEW, msg)
                        .map_err(|e| PatchError::Comm {
                            neighbor: from,
                            detail: e.to_string(),
                        })
                        .and_then(|packet| packet.unpack_into(&engine, &view, op));
                    rt.message_arrived();
                    res
                }),
            }))
        })
        .writes(object),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Brick;
    use crate::evaluator::local::OpAddAssign;
    use crate::runtime::RuntimeConfig;

    fn cfg() -> RuntimeConfig {
        RuntimeConfig::default().with_workers(1)
    }

    #[test]
    fn packet_wire_roundtrip_keeps_compression() {
        let packet = ViewPacket {
            domain: Interval::<2>::new([0, 0], [1, 4]),
            payload: Payload::Compressed(2.5f64),
        };
        let back: ViewPacket<2, f64> =
            from_message(kind::ENGINE_VIEW, to_message(kind::ENGINE_VIEW, &packet)).unwrap();
        assert_eq!(back, packet);
        assert_eq!(back.values().len(), 10);
    }

    #[test]
    fn dense_packet_with_wrong_count_is_rejected() {
        let packet = ViewPacket {
            domain: Interval::<1>::range(0, 3),
            payload: Payload::Dense(vec![1i32, 2]),
        };
        let msg = to_message(kind::ENGINE_VIEW, &packet);
        assert!(from_message::<ViewPacket<1, i32>>(kind::ENGINE_VIEW, msg).is_err());
    }

    #[test]
    fn unpack_matches_size_not_indices() {
        let packet = ViewPacket {
            domain: Interval::<1>::range(100, 102),
            payload: Payload::Dense(vec![1, 2, 3]),
        };
        let target = Brick::<1, i32>::new(Interval::range(0, 4));
        packet
            .unpack_into(&target, &Interval::range(2, 4), OpAssign)
            .unwrap();
        assert_eq!(target.values(), vec![0, 0, 1, 2, 3]);
        assert_eq!(
            packet.unpack_into(&target, &Interval::range(0, 1), OpAssign),
            Err(PatchError::DomainMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn view_moves_between_contexts() {
        let got = RuntimeContext::run_local(2, cfg(), |ctx| {
            let brick = if ctx.my_context() == 0 {
                Brick::<1, i32>::from_values(Interval::range(0, 5), vec![0, 1, 2, 3, 4, 5])
            } else {
                Brick::<1, i32>::new(Interval::range(0, 5))
            };
            if ctx.my_context() == 0 {
                send(&ctx, &brick, Interval::range(1, 3), 1);
            } else {
                receive(&ctx, &brick, Interval::range(3, 5), 0);
            }
            ctx.block_and_evaluate().unwrap();
            assert_eq!(ctx.expected_messages(), 0);
            brick.values()
        });
        assert_eq!(got[1], vec![0, 0, 0, 1, 2, 3]);
    }

    #[test]
    fn receive_with_accumulates() {
        let got = RuntimeContext::run_local(2, cfg(), |ctx| {
            let brick = Brick::<1, i32>::with_value(Interval::range(0, 2), 10);
            if ctx.my_context() == 0 {
                send(&ctx, &brick, Interval::range(0, 2), 1);
                send(&ctx, &brick, Interval::range(0, 2), 1);
            } else {
                receive_with(&ctx, &brick, Interval::range(0, 2), 0, OpAddAssign);
                receive_with(&ctx, &brick, Interval::range(0, 2), 0, OpAddAssign);
            }
            ctx.block_and_evaluate().unwrap();
            brick.values()
        });
        assert_eq!(got[0], vec![10, 10, 10]);
        assert_eq!(got[1], vec![30, 30, 30]);
    }

    #[test]
    #[should_panic(expected = "cannot message itself")]
    fn send_to_self_panics() {
        let ctx = RuntimeContext::serial(cfg()).unwrap();
        let brick = Brick::<1, i32>::new(Interval::range(0, 1));
        send(&ctx, &brick, Interval::range(0, 1), 0);
    }
}
