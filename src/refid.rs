//! The 3-byte packed record identifier used all over change forms.
//!
//! The top two bits of the 24-bit word say how to interpret the remaining 22:
//! an index into the file's form-id array, a form id local to the first
//! plugin, a runtime-created form, or nothing at all. See
//! https://en.uesp.net/wiki/Skyrim_Mod:Save_File_Format#RefID for the gory
//! details.

use std::fmt;

use nom::number::complete::be_u24;

use crate::error::PResult;
use crate::plugin::{Plugin, PluginInfo};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefIdKind {
    /// The 22-bit value is a 1-based index into the form-id array.
    FormIdx,
    /// The value is a form id inside the first full plugin.
    Default,
    /// A form created at runtime; lives in the save, not in any plugin.
    Created,
    Invalid,
}

/// A packed 24-bit record identifier.
///
/// Plain value semantics: two `RefId`s are the same record exactly when their
/// packed words are equal, so `==` doubles as identity.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefId(u32);

impl RefId {
    pub const ZERO: RefId = RefId(0);

    /// Builds a ref-id from a packed word. The word must fit in 24 bits.
    pub fn from_raw(raw: u32) -> Option<RefId> {
        if raw <= 0xFF_FFFF {
            Some(RefId(raw))
        } else {
            None
        }
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn kind(self) -> RefIdKind {
        match self.0 >> 22 & 0x3 {
            0 => RefIdKind::FormIdx,
            1 => RefIdKind::Default,
            2 => RefIdKind::Created,
            _ => RefIdKind::Invalid,
        }
    }

    /// The 22-bit payload under the kind tag.
    pub fn value(self) -> u32 {
        self.0 & 0x3F_FFFF
    }

    /// A zero ref-id is the engine's null; form lists accumulate these when
    /// mods are removed.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// The global form id this ref-id stands for, if it can be determined
    /// from the save's form-id array alone.
    pub fn form_id(self, form_ids: &[u32]) -> Option<u32> {
        match self.kind() {
            RefIdKind::FormIdx => {
                let index = self.value().checked_sub(1)?;
                form_ids.get(index as usize).copied()
            }
            RefIdKind::Default => Some(self.value()),
            RefIdKind::Created => Some(0xFF00_0000 | self.value()),
            RefIdKind::Invalid => None,
        }
    }

    /// Resolves to the owning plugin and the form id local to it.
    pub fn resolve<'a>(
        self,
        plugins: &'a PluginInfo,
        form_ids: &[u32],
    ) -> Option<(&'a Plugin, u32)> {
        match self.kind() {
            RefIdKind::Default => plugins.full().first().map(|p| (p, self.value())),
            RefIdKind::Created => Some((plugins.created(), 0xFF00_0000 | self.value())),
            RefIdKind::FormIdx => {
                let form_id = self.form_id(form_ids)?;
                plugins.split_form_id(form_id)
            }
            RefIdKind::Invalid => None,
        }
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

impl fmt::Debug for RefId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RefId({:06X}, {:?})", self.0, self.kind())
    }
}

/// Ref-ids are the one big-endian field in the format: three bytes, most
/// significant first.
pub fn refid(input: &[u8]) -> PResult<RefId> {
    let (input, raw) = be_u24(input)?;
    Ok((input, RefId(raw)))
}

pub fn put_refid(out: &mut Vec<u8>, id: RefId) {
    out.extend_from_slice(&id.raw().to_be_bytes()[1..]);
}
