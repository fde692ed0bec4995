//! The embedded form-flags element many change-form bodies start with.
//!
//! Bit 0 of a record's change flags means "the form's own flag word changed";
//! when set, the body leads with the new word plus a u16 the engine stores
//! alongside it.

use nom::number::complete::le_u16;

use crate::error::PResult;
use crate::flags::{flags32, put_flags32, Flags32};
use crate::primitives::put_u16;

/// Change-flag bit 0, shared by every record kind.
pub const CHANGE_FORM_FLAGS: u32 = 0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FormFlags {
    pub flags: Flags32,
    pub unknown: u16,
}

impl FormFlags {
    pub const SIZE: usize = 6;
}

pub fn form_flags(input: &[u8]) -> PResult<FormFlags> {
    let (input, flags) = flags32(input)?;
    let (input, unknown) = le_u16(input)?;
    Ok((input, FormFlags { flags, unknown }))
}

pub fn put_form_flags(out: &mut Vec<u8>, value: FormFlags) {
    put_flags32(out, value.flags);
    put_u16(out, value.unknown);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let value = FormFlags {
            flags: Flags32(0x8000_0001),
            unknown: 0x1234,
        };
        let mut out = Vec::new();
        put_form_flags(&mut out, value);
        assert_eq!(out.len(), FormFlags::SIZE);
        let (rest, decoded) = form_flags(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, value);
    }
}
