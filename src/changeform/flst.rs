//! FLST (form list) change forms.
//!
//! Form lists are where stale entries from removed mods pile up as null
//! refs, so this is the body the cleanse operation cares about.

use bitflags::bitflags;

use nom::number::complete::le_u32;

use crate::error::{Error, PResult, Result};
use crate::flags::Flags32;
use crate::primitives::put_u32;
use crate::refid::{put_refid, refid, RefId};

use super::flags::{form_flags, put_form_flags, FormFlags};

/// The format refuses form lists longer than this.
pub const MAX_FORM_LIST_ENTRIES: u32 = 0x3FFF;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FlstFlags: u32 {
        const FORM_FLAGS = 1 << 0;
        const ENTRIES = 1 << 31;

        // Other bits exist but don't affect the payload layout.
        const _ = !0;
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormListData {
    pub form_flags: Option<FormFlags>,
    pub entries: Option<Vec<RefId>>,
}

impl FormListData {
    /// Drops null entries. Returns how many were removed.
    pub fn cleanse(&mut self) -> usize {
        match self.entries {
            Some(ref mut entries) => {
                let before = entries.len();
                entries.retain(|id| !id.is_zero());
                before - entries.len()
            }
            None => 0,
        }
    }

    pub fn contains_null_refs(&self) -> bool {
        self.entries
            .as_ref()
            .is_some_and(|entries| entries.iter().any(|id| id.is_zero()))
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        if let Some(flags) = self.form_flags {
            put_form_flags(out, flags);
        }
        if let Some(ref entries) = self.entries {
            if entries.len() as u32 > MAX_FORM_LIST_ENTRIES {
                return Err(Error::format(format!(
                    "form list with {} entries is over the cap",
                    entries.len()
                )));
            }
            put_u32(out, entries.len() as u32);
            for &id in entries {
                put_refid(out, id);
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for FormListData {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.entries {
            Some(ref entries) => {
                write!(f, "form list, {} entries", entries.len())?;
                if self.contains_null_refs() {
                    write!(f, " (contains null refs)")?;
                }
                Ok(())
            }
            None => write!(f, "form list, entries unchanged"),
        }
    }
}

pub fn form_list(input: &[u8], change_flags: Flags32) -> PResult<FormListData> {
    let flags = FlstFlags::from_bits_retain(change_flags.0);

    let (input, form_flags) = if flags.contains(FlstFlags::FORM_FLAGS) {
        let (input, value) = form_flags(input)?;
        (input, Some(value))
    } else {
        (input, None)
    };

    let (input, entries) = if flags.contains(FlstFlags::ENTRIES) {
        let (mut input, count) = le_u32(input)?;
        if count > MAX_FORM_LIST_ENTRIES {
            return Err(Error::format(format!(
                "form list claims {count} entries, the cap is {MAX_FORM_LIST_ENTRIES}"
            ))
            .fail());
        }
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (rest, id) = refid(input)?;
            entries.push(id);
            input = rest;
        }
        (input, Some(entries))
    } else {
        (input, None)
    };

    Ok((input, FormListData { form_flags, entries }))
}
