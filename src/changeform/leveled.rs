//! LVLN / LVLI (leveled actor and item list) change forms.

use bitflags::bitflags;

use nom::number::complete::{le_i8, le_u16, le_u8};

use crate::error::{Error, PResult, Result};
use crate::flags::Flags32;
use crate::primitives::{put_i8, put_u16, put_u8};
use crate::refid::{put_refid, refid, RefId};

use super::flags::{form_flags, put_form_flags, FormFlags};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LeveledFlags: u32 {
        const FORM_FLAGS = 1 << 0;
        const ENTRIES = 1 << 31;

        const _ = !0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LeveledEntry {
    pub form: RefId,
    pub level: i8,
    pub count: u16,
    pub chance_none: i8,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LeveledListData {
    pub form_flags: Option<FormFlags>,
    pub entries: Option<Vec<LeveledEntry>>,
}

impl LeveledListData {
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        if let Some(flags) = self.form_flags {
            put_form_flags(out, flags);
        }
        if let Some(ref entries) = self.entries {
            // The count is a single byte; longer lists cannot exist on disk.
            if entries.len() > 255 {
                return Err(Error::format(format!(
                    "leveled list with {} entries cannot be stored",
                    entries.len()
                )));
            }
            put_u8(out, entries.len() as u8);
            for entry in entries {
                put_refid(out, entry.form);
                put_i8(out, entry.level);
                put_u16(out, entry.count);
                put_i8(out, entry.chance_none);
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for LeveledListData {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.entries {
            Some(ref entries) => write!(f, "leveled list, {} entries", entries.len()),
            None => write!(f, "leveled list, entries unchanged"),
        }
    }
}

pub fn leveled_list(input: &[u8], change_flags: Flags32) -> PResult<LeveledListData> {
    let flags = LeveledFlags::from_bits_retain(change_flags.0);

    let (input, form_flags) = if flags.contains(LeveledFlags::FORM_FLAGS) {
        let (input, value) = form_flags(input)?;
        (input, Some(value))
    } else {
        (input, None)
    };

    let (input, entries) = if flags.contains(LeveledFlags::ENTRIES) {
        let (mut input, count) = le_u8(input)?;
        let mut entries = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let (rest, form) = refid(input)?;
            let (rest, level) = le_i8(rest)?;
            let (rest, count_field) = le_u16(rest)?;
            let (rest, chance_none) = le_i8(rest)?;
            entries.push(LeveledEntry {
                form,
                level,
                count: count_field,
                chance_none,
            });
            input = rest;
        }
        (input, Some(entries))
    } else {
        (input, None)
    };

    Ok((input, LeveledListData { form_flags, entries }))
}
