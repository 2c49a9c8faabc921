//! Deterministic binary encoding for internal on-disk structures.
//!
//! This is a hand-rolled `Encode`/`Decode` trait pair rather than
//! `bincode` or `serde`: on-disk formats must stay stable across
//! dependency upgrades, and a derive-macro-driven format is one
//! dependency bump away from silently changing its own wire layout.
//!
//! Wire format:
//!
//! | Type | Encoding |
//! |---|---|
//! | `u8` | 1 byte |
//! | `u16`/`u32`/`u64` | little-endian, 2/4/8 bytes |
//! | `i64` | little-endian, 8 bytes |
//! | `bool` | 1 byte, `0x00`/`0x01` |
//! | `Vec<u8>` | `[u32 len][bytes]` |
//! | `String` | `[u32 len][utf8 bytes]` |
//! | `Option<T>` | `[u8 tag][T if Some]` |
//! | `Vec<T>` (`T != u8`) | `[u32 count][T1][T2]...` via [`encode_vec`]/[`decode_vec`] |
//!
//! Every decode path enforces [`MAX_BYTE_LEN`] and [`MAX_VEC_ELEMENTS`]
//! so a corrupted or adversarial length prefix cannot trigger an
//! allocation bomb. No function in this module panics.

use thiserror::Error;

/// Largest permitted length for a single length-prefixed byte blob.
pub const MAX_BYTE_LEN: usize = 256 * 1024 * 1024;

/// Largest permitted element count for a length-prefixed vector.
pub const MAX_VEC_ELEMENTS: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("unexpected end of buffer: needed {needed} bytes, {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    #[error("invalid tag {tag} for {type_name}")]
    InvalidTag { tag: u32, type_name: &'static str },

    #[error("invalid bool byte: {0}")]
    InvalidBool(u8),

    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("length overflow: {0}")]
    LengthOverflow(String),

    #[error("{0}")]
    Custom(String),
}

pub trait Encode {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

pub trait Decode: Sized {
    /// Decodes `Self` from the front of `buf`, returning the value and
    /// the number of bytes consumed so the caller can advance a cursor.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<T, EncodingError> {
    let (value, _) = T::decode_from(buf)?;
    Ok(value)
}

fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

fn len_to_u32(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len).map_err(|_| EncodingError::LengthOverflow(format!("{len} exceeds u32")))
}

impl Encode for u8 {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(*self);
        Ok(())
    }
}

impl Decode for u8 {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 1)?;
        Ok((buf[0], 1))
    }
}

macro_rules! impl_le_int {
    ($t:ty, $n:expr) => {
        impl Encode for $t {
            fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
                buf.extend_from_slice(&self.to_le_bytes());
                Ok(())
            }
        }

        impl Decode for $t {
            fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
                require(buf, $n)?;
                let mut raw = [0u8; $n];
                raw.copy_from_slice(&buf[..$n]);
                Ok((<$t>::from_le_bytes(raw), $n))
            }
        }
    };
}

impl_le_int!(u16, 2);
impl_le_int!(u32, 4);
impl_le_int!(u64, 8);
impl_le_int!(i64, 8);

impl Encode for bool {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(if *self { 0x01 } else { 0x00 });
        Ok(())
    }
}

impl Decode for bool {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 1)?;
        match buf[0] {
            0x00 => Ok((false, 1)),
            0x01 => Ok((true, 1)),
            other => Err(EncodingError::InvalidBool(other)),
        }
    }
}

impl Encode for Vec<u8> {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        len_to_u32(self.len())?.encode_to(buf)?;
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl Decode for Vec<u8> {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (len, consumed) = u32::decode_from(buf)?;
        let len = len as usize;
        if len > MAX_BYTE_LEN {
            return Err(EncodingError::LengthOverflow(format!(
                "byte blob of {len} exceeds MAX_BYTE_LEN"
            )));
        }
        require(&buf[consumed..], len)?;
        let bytes = buf[consumed..consumed + len].to_vec();
        Ok((bytes, consumed + len))
    }
}

impl Encode for String {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.as_bytes().to_vec().encode_to(buf)
    }
}

impl Decode for String {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (bytes, consumed) = Vec::<u8>::decode_from(buf)?;
        let s = String::from_utf8(bytes)?;
        Ok((s, consumed))
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            None => 0u8.encode_to(buf),
            Some(v) => {
                1u8.encode_to(buf)?;
                v.encode_to(buf)
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut consumed) = u8::decode_from(buf)?;
        match tag {
            0 => Ok((None, consumed)),
            1 => {
                let (v, n) = T::decode_from(&buf[consumed..])?;
                consumed += n;
                Ok((Some(v), consumed))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other as u32,
                type_name: "Option<T>",
            }),
        }
    }
}

/// Encodes a `Vec<T>` as `[u32 count][T1][T2]...`.
///
/// A free function rather than a blanket `impl<T> Encode for Vec<T>`
/// because `Vec<u8>` already has its own specialized impl above and
/// Rust's coherence rules forbid the overlap.
pub fn encode_vec<T: Encode>(items: &[T], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    len_to_u32(items.len())?.encode_to(buf)?;
    for item in items {
        item.encode_to(buf)?;
    }
    Ok(())
}

pub fn decode_vec<T: Decode>(buf: &[u8]) -> Result<(Vec<T>, usize), EncodingError> {
    let (count, mut consumed) = u32::decode_from(buf)?;
    let count = count as usize;
    if count > MAX_VEC_ELEMENTS {
        return Err(EncodingError::LengthOverflow(format!(
            "vector of {count} elements exceeds MAX_VEC_ELEMENTS"
        )));
    }
    let mut items = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let (item, n) = T::decode_from(&buf[consumed..])?;
        consumed += n;
        items.push(item);
    }
    Ok((items, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let mut buf = Vec::new();
        42u32.encode_to(&mut buf).unwrap();
        true.encode_to(&mut buf).unwrap();
        "hello".to_string().encode_to(&mut buf).unwrap();

        let (n, c1) = u32::decode_from(&buf).unwrap();
        let (b, c2) = bool::decode_from(&buf[c1..]).unwrap();
        let (s, _) = String::decode_from(&buf[c1 + c2..]).unwrap();

        assert_eq!(n, 42);
        assert!(b);
        assert_eq!(s, "hello");
    }

    #[test]
    fn rejects_truncated_buffer() {
        let buf = [0u8; 2];
        assert!(u64::decode_from(&buf).is_err());
    }

    #[test]
    fn option_round_trips() {
        let mut buf = Vec::new();
        let value: Option<u32> = Some(7);
        value.encode_to(&mut buf).unwrap();
        let (decoded, _) = Option::<u32>::decode_from(&buf).unwrap();
        assert_eq!(decoded, Some(7));
    }

    #[test]
    fn vec_round_trips() {
        let items = vec![1u32, 2, 3, 4];
        let mut buf = Vec::new();
        encode_vec(&items, &mut buf).unwrap();
        let (decoded, _): (Vec<u32>, usize) = decode_vec(&buf).unwrap();
        assert_eq!(decoded, items);
    }

    #[test]
    fn rejects_oversized_byte_len() {
        let mut buf = Vec::new();
        ((MAX_BYTE_LEN as u32) + 1).encode_to(&mut buf).unwrap();
        assert!(Vec::<u8>::decode_from(&buf).is_err());
    }
}
