//! Fixed, versioned, little-endian wire encoding for messaging paths.
//!
//! Every message starts with a [`WireHdr`] so a receiver can reject payloads
//! produced by an incompatible build. Values are encoded through
//! [`WireCodec`]: fixed-width integers and floats, `bool` as one byte,
//! sequences as `[count:u32][items]`, strings as `[len:u32][utf8 bytes]`.

use crate::patch_error::PatchError;
use bytemuck::{Pod, Zeroable};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::mem::size_of;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Message kinds carried in [`WireHdr::kind`].
pub mod kind {
    pub const ENGINE_VIEW: u16 = 1;
    pub const COLLECTION: u16 = 2;
    pub const REDUCTION: u16 = 3;
    pub const PROXY: u16 = 4;
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub reserved_le: u32,
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

const _: () = assert!(size_of::<WireHdr>() == 8);

/// Types that can travel between contexts.
pub trait WireCodec: Sized {
    /// Append the encoded form of `self` to `out`.
    fn encode(&self, out: &mut BytesMut);
    /// Consume one value from the front of `input`.
    fn decode(input: &mut Bytes) -> Result<Self, PatchError>;
}

fn need(input: &Bytes, n: usize, what: &str) -> Result<(), PatchError> {
    if input.remaining() < n {
        Err(PatchError::Wire(format!(
            "truncated {what}: need {n} bytes, have {}",
            input.remaining()
        )))
    } else {
        Ok(())
    }
}

macro_rules! impl_wire_num {
    ($($t:ty => $put:ident, $get:ident);* $(;)?) => {
        $(
            impl WireCodec for $t {
                #[inline]
                fn encode(&self, out: &mut BytesMut) {
                    out.$put(*self);
                }
                #[inline]
                fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
                    need(input, size_of::<$t>(), stringify!($t))?;
                    Ok(input.$get())
                }
            }
        )*
    };
}

impl_wire_num! {
    u8 => put_u8, get_u8;
    i8 => put_i8, get_i8;
    u16 => put_u16_le, get_u16_le;
    i16 => put_i16_le, get_i16_le;
    u32 => put_u32_le, get_u32_le;
    i32 => put_i32_le, get_i32_le;
    u64 => put_u64_le, get_u64_le;
    i64 => put_i64_le, get_i64_le;
    f32 => put_f32_le, get_f32_le;
    f64 => put_f64_le, get_f64_le;
}

// usize never goes on the wire natively.
impl WireCodec for usize {
    #[inline]
    fn encode(&self, out: &mut BytesMut) {
        out.put_u64_le(*self as u64);
    }
    #[inline]
    fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
        let v = u64::decode(input)?;
        usize::try_from(v).map_err(|_| PatchError::Wire(format!("usize overflow: {v}")))
    }
}

impl WireCodec for bool {
    #[inline]
    fn encode(&self, out: &mut BytesMut) {
        out.put_u8(u8::from(*self));
    }
    fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
        match u8::decode(input)? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(PatchError::Wire(format!("invalid bool byte {b}"))),
        }
    }
}

impl WireCodec for String {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(self.len() as u32);
        out.put_slice(self.as_bytes());
    }
    fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
        let len = u32::decode(input)? as usize;
        need(input, len, "string body")?;
        let raw = input.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|e| PatchError::Wire(e.to_string()))
    }
}

impl<T: WireCodec> WireCodec for Vec<T> {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(self.len() as u32);
        for item in self {
            item.encode(out);
        }
    }
    fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
        let n = u32::decode(input)? as usize;
        let mut v = Vec::with_capacity(n.min(input.remaining()));
        for _ in 0..n {
            v.push(T::decode(input)?);
        }
        Ok(v)
    }
}

impl<T: WireCodec> WireCodec for Option<T> {
    fn encode(&self, out: &mut BytesMut) {
        match self {
            Some(v) => {
                out.put_u8(1);
                v.encode(out);
            }
            None => out.put_u8(0),
        }
    }
    fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
        if bool::decode(input)? {
            Ok(Some(T::decode(input)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: WireCodec, const N: usize> WireCodec for [T; N] {
    fn encode(&self, out: &mut BytesMut) {
        for item in self {
            item.encode(out);
        }
    }
    fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
        let mut v = Vec::with_capacity(N);
        for _ in 0..N {
            v.push(T::decode(input)?);
        }
        v.try_into()
            .map_err(|_| PatchError::Wire(format!("expected array of {N}")))
    }
}

impl<A: WireCodec, B: WireCodec> WireCodec for (A, B) {
    fn encode(&self, out: &mut BytesMut) {
        self.0.encode(out);
        self.1.encode(out);
    }
    fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
        Ok((A::decode(input)?, B::decode(input)?))
    }
}

impl<A: WireCodec, B: WireCodec, C: WireCodec> WireCodec for (A, B, C) {
    fn encode(&self, out: &mut BytesMut) {
        self.0.encode(out);
        self.1.encode(out);
        self.2.encode(out);
    }
    fn decode(input: &mut Bytes) -> Result<Self, PatchError> {
        Ok((A::decode(input)?, B::decode(input)?, C::decode(input)?))
    }
}

/// Encode `value` behind a header of the given `kind`.
pub fn to_message<T: WireCodec>(kind: u16, value: &T) -> Bytes {
    let mut out = BytesMut::with_capacity(64);
    out.put_slice(bytemuck::bytes_of(&WireHdr::new(kind)));
    value.encode(&mut out);
    out.freeze()
}

/// Decode a message produced by [`to_message`], checking version, kind and
/// that the whole payload was consumed.
pub fn from_message<T: WireCodec>(kind: u16, mut msg: Bytes) -> Result<T, PatchError> {
    need(&msg, size_of::<WireHdr>(), "header")?;
    let raw = msg.split_to(size_of::<WireHdr>());
    let hdr: WireHdr = bytemuck::pod_read_unaligned(&raw);
    if hdr.version() != WIRE_VERSION {
        return Err(PatchError::Wire(format!(
            "wire version {} (expected {WIRE_VERSION})",
            hdr.version()
        )));
    }
    if hdr.kind() != kind {
        return Err(PatchError::Wire(format!(
            "message kind {} (expected {kind})",
            hdr.kind()
        )));
    }
    let v = T::decode(&mut msg)?;
    if msg.has_remaining() {
        return Err(PatchError::Wire(format!(
            "{} trailing bytes after payload",
            msg.remaining()
        )));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_guards_kind_and_version() {
        let msg = to_message(kind::REDUCTION, &42i32);
        assert_eq!(from_message::<i32>(kind::REDUCTION, msg.clone()).unwrap(), 42);
        assert!(matches!(
            from_message::<i32>(kind::COLLECTION, msg),
            Err(PatchError::Wire(_))
        ));
    }

    #[test]
    fn nested_values() {
        let v: (Vec<Option<i64>>, String, [u32; 3]) =
            (vec![Some(-3), None, Some(7)], "halo".to_string(), [1, 2, 3]);
        let msg = to_message(kind::COLLECTION, &v);
        let back: (Vec<Option<i64>>, String, [u32; 3]) =
            from_message(kind::COLLECTION, msg).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn truncated_payload_errors() {
        let msg = to_message(kind::PROXY, &7u64);
        let cut = msg.slice(..msg.len() - 2);
        assert!(from_message::<u64>(kind::PROXY, cut).is_err());
    }

    #[test]
    fn trailing_bytes_error() {
        let msg = to_message(kind::PROXY, &(1u32, 2u32));
        assert!(from_message::<u32>(kind::PROXY, msg).is_err());
    }

    #[test]
    fn bad_bool_byte() {
        let mut b = Bytes::from_static(&[2u8]);
        assert!(bool::decode(&mut b).is_err());
    }
}
