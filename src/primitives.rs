//! Low level wire primitives shared by every section codec.
//!
//! Everything in a save is little-endian. The odd one out is the vsval, a
//! variable-size integer the engine uses for most array counts inside change
//! forms: the low two bits of the first byte pick the width (0/1/2 for 1/2/3
//! bytes) and the rest of the word, shifted down by two, is the value.

use std::borrow::Cow;
use std::fmt;

use nom::bytes::complete::take;
use nom::number::complete::{le_u16, le_u8};

use crate::error::{Error, PResult, Result};

/// Largest value a vsval can carry: 22 payload bits in the 3-byte class.
pub const VSVAL_MAX: u32 = 0x3F_FFFF;

pub fn vsval(input: &[u8]) -> PResult<u32> {
    let (input, first) = le_u8(input)?;
    match first & 0x3 {
        0 => Ok((input, u32::from(first >> 2))),
        1 => {
            let (input, second) = le_u8(input)?;
            Ok((input, (u32::from(first) | u32::from(second) << 8) >> 2))
        }
        2 => {
            let (input, second) = le_u8(input)?;
            let (input, third) = le_u8(input)?;
            let word = u32::from(first) | u32::from(second) << 8 | u32::from(third) << 16;
            Ok((input, word >> 2))
        }
        _ => Err(Error::format(format!(
            "invalid vsval size class in byte {first:#04x}"
        ))
        .fail()),
    }
}

/// Writes `value` as a vsval in the smallest class that holds it.
pub fn put_vsval(out: &mut Vec<u8>, value: u32) -> Result<()> {
    if value > VSVAL_MAX {
        return Err(Error::format(format!(
            "value {value:#x} does not fit in a vsval"
        )));
    }
    if value < 0x40 {
        out.push((value << 2) as u8);
    } else if value < 0x4000 {
        let word = (value << 2 | 1) as u16;
        out.extend_from_slice(&word.to_le_bytes());
    } else {
        let word = value << 2 | 2;
        out.extend_from_slice(&word.to_le_bytes()[..3]);
    }
    Ok(())
}

/// How many bytes `put_vsval` will emit for `value`.
pub fn vsval_size(value: u32) -> usize {
    if value < 0x40 {
        1
    } else if value < 0x4000 {
        2
    } else {
        3
    }
}

/// A string stored with a 16-bit length prefix.
///
/// Save files are not UTF-8; player and plugin names come out of the game in
/// whatever codepage the machine ran. We keep the raw bytes so files round
/// trip and only decode lossily for display.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WString(pub Vec<u8>);

impl WString {
    pub fn new(raw: impl Into<Vec<u8>>) -> WString {
        WString(raw.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_display(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.0)
    }

    /// On-disk size including the length prefix.
    pub fn size(&self) -> usize {
        2 + self.0.len()
    }
}

impl fmt::Display for WString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_display())
    }
}

impl fmt::Debug for WString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.to_display())
    }
}

impl From<&str> for WString {
    fn from(s: &str) -> WString {
        WString(s.as_bytes().to_vec())
    }
}

pub fn wstring(input: &[u8]) -> PResult<WString> {
    let (input, len) = le_u16(input)?;
    let (input, raw) = take(usize::from(len))(input)?;
    Ok((input, WString(raw.to_vec())))
}

pub fn put_wstring(out: &mut Vec<u8>, value: &WString) -> Result<()> {
    let len = u16::try_from(value.0.len())
        .map_err(|_| Error::format(format!("string of {} bytes is too long", value.0.len())))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&value.0);
    Ok(())
}

/// Zero-terminated string. Rare in saves, but a couple of global data blocks
/// use them.
pub fn zstring(input: &[u8]) -> PResult<Vec<u8>> {
    let (input, raw) = nom::bytes::complete::take_till(|b| b == 0)(input)?;
    let (input, _) = take(1usize)(input)?;
    Ok((input, raw.to_vec()))
}

pub fn put_zstring(out: &mut Vec<u8>, value: &[u8]) {
    out.extend_from_slice(value);
    out.push(0);
}

pub fn put_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put_i8(out: &mut Vec<u8>, value: i8) {
    out.push(value as u8);
}

pub fn put_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put_f32(out: &mut Vec<u8>, value: f32) {
    out.extend_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: u32) -> u32 {
        let mut out = Vec::new();
        put_vsval(&mut out, value).unwrap();
        let (rest, decoded) = vsval(&out).unwrap();
        assert!(rest.is_empty(), "vsval for {value:#x} left bytes over");
        decoded
    }

    #[test]
    fn vsval_roundtrips_across_all_classes() {
        for value in [0, 1, 0x3F, 0x40, 0x1234, 0x3FFF, 0x4000, VSVAL_MAX] {
            assert_eq!(roundtrip(value), value);
        }
    }

    #[test]
    fn vsval_uses_the_smallest_class() {
        let sizes = [
            (0x00, 1),
            (0x3F, 1),
            (0x40, 2),
            (0x3FFF, 2),
            (0x4000, 3),
            (VSVAL_MAX, 3),
        ];
        for (value, expected) in sizes {
            let mut out = Vec::new();
            put_vsval(&mut out, value).unwrap();
            assert_eq!(out.len(), expected, "width of {value:#x}");
            assert_eq!(vsval_size(value), expected);
        }
    }

    #[test]
    fn vsval_rejects_values_past_the_cap() {
        let mut out = Vec::new();
        assert!(put_vsval(&mut out, VSVAL_MAX + 1).is_err());
        assert!(put_vsval(&mut out, 0x4000_0001).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn vsval_rejects_the_reserved_size_class() {
        assert!(vsval(&[0x03]).is_err());
    }

    #[test]
    fn wstring_keeps_raw_bytes() {
        let mut out = Vec::new();
        put_wstring(&mut out, &WString::new(vec![0xE4, 0xF6, 0x41])).unwrap();
        assert_eq!(out, vec![3, 0, 0xE4, 0xF6, 0x41]);
        let (rest, decoded) = wstring(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded.as_bytes(), &[0xE4, 0xF6, 0x41]);
    }

    #[test]
    fn wstring_rejects_lengths_past_the_prefix() {
        let mut out = Vec::new();
        let long = WString::new(vec![0x20; 0x1_0000]);
        assert!(put_wstring(&mut out, &long).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn zstring_stops_at_the_terminator() {
        let (rest, decoded) = zstring(b"abc\0def").unwrap();
        assert_eq!(decoded, b"abc");
        assert_eq!(rest, b"def");
    }
}
