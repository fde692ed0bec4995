//! REFR / ACHR (placed object and placed actor) change forms.
//!
//! The hairiest body in the format. What the record opens with depends on
//! where its ref-id came from as much as on the change flags: created
//! references carry their own spawn data, promoted ones carry the cell they
//! got promoted into, moved ones just carry coordinates. After the initial
//! block comes a run of flag-gated fields, and whatever is left over is kept
//! as unparsed bytes so the record can still be re-emitted.

use bitflags::bitflags;

use nom::bytes::complete::take;
use nom::number::complete::{le_f32, le_i32, le_u16, le_u32, le_u8};

use crate::error::{Error, PResult, Result};
use crate::flags::Flags32;
use crate::primitives::{put_f32, put_i32, put_u16, put_u32, put_u8, put_vsval, vsval};
use crate::refid::{put_refid, refid, RefId, RefIdKind};

use super::extra::{extra_data_list, ExtraDataList};
use super::flags::{form_flags, put_form_flags, FormFlags};
use super::MAX_FIXED_ARRAY;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RefrFlags: u32 {
        const FORM_FLAGS = 1 << 0;
        const MOVE = 1 << 1;
        const HAVOK_MOVE = 1 << 2;
        const CELL_CHANGED = 1 << 3;
        const SCALE = 1 << 4;
        const INVENTORY = 1 << 5;
        const EXTRA_OWNERSHIP = 1 << 6;
        const BASE_OBJECT = 1 << 7;
        const PROMOTED = 1 << 25;
        const EXTRA_ACTIVATING_CHILDREN = 1 << 26;
        const LEVELED_INVENTORY = 1 << 27;
        const ANIMATION = 1 << 28;
        const EXTRA_ENCOUNTER_ZONE = 1 << 29;
        const EXTRA_CREATED_ONLY = 1 << 30;
        const EXTRA_GAME_ONLY = 1 << 31;

        const _ = !0;
    }
}

impl RefrFlags {
    /// Any of the bits that mean "an extra-data stream follows".
    pub fn has_extra_data(self) -> bool {
        self.intersects(
            RefrFlags::EXTRA_OWNERSHIP
                | RefrFlags::EXTRA_ACTIVATING_CHILDREN
                | RefrFlags::EXTRA_ENCOUNTER_ZONE
                | RefrFlags::EXTRA_CREATED_ONLY
                | RefrFlags::EXTRA_GAME_ONLY,
        )
    }
}

/// The layout selector for the leading block. Types 1..=3 exist in the
/// format but are never produced by the selection rule below; they only
/// appear when other tooling wrote the record.
pub fn initial_type(origin: RefIdKind, flags: RefrFlags) -> u8 {
    if origin == RefIdKind::Created {
        5
    } else if flags.intersects(RefrFlags::PROMOTED | RefrFlags::CELL_CHANGED) {
        6
    } else if flags.intersects(RefrFlags::HAVOK_MOVE | RefrFlags::MOVE) {
        4
    } else {
        0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InitialData {
    /// Type 0: nothing.
    None,
    /// Type 1.
    Unknown1 { a: u16, b: u8, c: u8, d: u32 },
    /// Type 2.
    Unknown2 { a: u16, b: u16, c: u16, d: u32 },
    /// Type 3.
    Unknown3 { a: u32 },
    /// Type 4: the reference moved.
    Moved {
        cell: RefId,
        pos: [f32; 3],
        rot: [f32; 3],
    },
    /// Type 5: the reference was created at runtime.
    Created {
        cell: RefId,
        pos: [f32; 3],
        rot: [f32; 3],
        flag: u8,
        base: RefId,
    },
    /// Type 6: the reference was promoted or dragged across cells.
    Promoted {
        cell: RefId,
        pos: [f32; 3],
        rot: [f32; 3],
        starting_cell: RefId,
        unknown1: u16,
        unknown2: u16,
    },
}

impl InitialData {
    pub fn type_code(&self) -> u8 {
        match self {
            InitialData::None => 0,
            InitialData::Unknown1 { .. } => 1,
            InitialData::Unknown2 { .. } => 2,
            InitialData::Unknown3 { .. } => 3,
            InitialData::Moved { .. } => 4,
            InitialData::Created { .. } => 5,
            InitialData::Promoted { .. } => 6,
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        match *self {
            InitialData::None => {}
            InitialData::Unknown1 { a, b, c, d } => {
                put_u16(out, a);
                put_u8(out, b);
                put_u8(out, c);
                put_u32(out, d);
            }
            InitialData::Unknown2 { a, b, c, d } => {
                put_u16(out, a);
                put_u16(out, b);
                put_u16(out, c);
                put_u32(out, d);
            }
            InitialData::Unknown3 { a } => put_u32(out, a),
            InitialData::Moved { cell, pos, rot } => {
                put_refid(out, cell);
                put_triplet(out, pos);
                put_triplet(out, rot);
            }
            InitialData::Created {
                cell,
                pos,
                rot,
                flag,
                base,
            } => {
                put_refid(out, cell);
                put_triplet(out, pos);
                put_triplet(out, rot);
                put_u8(out, flag);
                put_refid(out, base);
            }
            InitialData::Promoted {
                cell,
                pos,
                rot,
                starting_cell,
                unknown1,
                unknown2,
            } => {
                put_refid(out, cell);
                put_triplet(out, pos);
                put_triplet(out, rot);
                put_refid(out, starting_cell);
                put_u16(out, unknown1);
                put_u16(out, unknown2);
            }
        }
    }
}

fn put_triplet(out: &mut Vec<u8>, values: [f32; 3]) {
    for value in values {
        put_f32(out, value);
    }
}

fn triplet(input: &[u8]) -> PResult<[f32; 3]> {
    let (input, a) = le_f32(input)?;
    let (input, b) = le_f32(input)?;
    let (input, c) = le_f32(input)?;
    Ok((input, [a, b, c]))
}

pub fn initial_data(input: &[u8], type_code: u8) -> PResult<InitialData> {
    match type_code {
        0 => Ok((input, InitialData::None)),
        1 => {
            let (input, a) = le_u16(input)?;
            let (input, b) = le_u8(input)?;
            let (input, c) = le_u8(input)?;
            let (input, d) = le_u32(input)?;
            Ok((input, InitialData::Unknown1 { a, b, c, d }))
        }
        2 => {
            let (input, a) = le_u16(input)?;
            let (input, b) = le_u16(input)?;
            let (input, c) = le_u16(input)?;
            let (input, d) = le_u32(input)?;
            Ok((input, InitialData::Unknown2 { a, b, c, d }))
        }
        3 => {
            let (input, a) = le_u32(input)?;
            Ok((input, InitialData::Unknown3 { a }))
        }
        4 => {
            let (input, cell) = refid(input)?;
            let (input, pos) = triplet(input)?;
            let (input, rot) = triplet(input)?;
            Ok((input, InitialData::Moved { cell, pos, rot }))
        }
        5 => {
            let (input, cell) = refid(input)?;
            let (input, pos) = triplet(input)?;
            let (input, rot) = triplet(input)?;
            let (input, flag) = le_u8(input)?;
            let (input, base) = refid(input)?;
            Ok((
                input,
                InitialData::Created {
                    cell,
                    pos,
                    rot,
                    flag,
                    base,
                },
            ))
        }
        6 => {
            let (input, cell) = refid(input)?;
            let (input, pos) = triplet(input)?;
            let (input, rot) = triplet(input)?;
            let (input, starting_cell) = refid(input)?;
            let (input, unknown1) = le_u16(input)?;
            let (input, unknown2) = le_u16(input)?;
            Ok((
                input,
                InitialData::Promoted {
                    cell,
                    pos,
                    rot,
                    starting_cell,
                    unknown1,
                    unknown2,
                },
            ))
        }
        other => Err(Error::format(format!("invalid initial data type {other}")).fail()),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InventoryItem {
    pub item: RefId,
    pub count: i32,
    pub extra: ExtraDataList,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RefrData {
    pub initial: Option<InitialData>,
    pub havok: Option<Vec<u8>>,
    /// Only placed actors carry this one.
    pub actor_unknown: Option<(u32, [u8; 4])>,
    pub form_flags: Option<FormFlags>,
    pub base_object: Option<RefId>,
    pub scale: Option<f32>,
    pub extra: Option<ExtraDataList>,
    pub inventory: Option<Vec<InventoryItem>>,
    /// REFR only.
    pub promoted_refs: Option<Vec<RefId>>,
    pub animations: Option<Vec<u8>>,
    /// Whatever came after the last field we understand. Kept verbatim; a
    /// record with leftovers must not be edited structurally.
    pub unparsed: Vec<u8>,
}

impl Default for InitialData {
    fn default() -> InitialData {
        InitialData::None
    }
}

impl RefrData {
    pub fn has_unparsed(&self) -> bool {
        !self.unparsed.is_empty()
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        if let Some(ref initial) = self.initial {
            initial.write(out);
        }
        if let Some(ref havok) = self.havok {
            put_vsval(out, havok.len() as u32)?;
            out.extend_from_slice(havok);
        }
        if let Some((value, bytes)) = self.actor_unknown {
            put_u32(out, value);
            out.extend_from_slice(&bytes);
        }
        if let Some(flags) = self.form_flags {
            put_form_flags(out, flags);
        }
        if let Some(base) = self.base_object {
            put_refid(out, base);
        }
        if let Some(scale) = self.scale {
            put_f32(out, scale);
        }
        if let Some(ref extra) = self.extra {
            extra.write(out)?;
        }
        if let Some(ref inventory) = self.inventory {
            put_vsval(out, inventory.len() as u32)?;
            for entry in inventory {
                put_refid(out, entry.item);
                put_i32(out, entry.count);
                entry.extra.write(out)?;
            }
        }
        if let Some(ref refs) = self.promoted_refs {
            put_u32(out, refs.len() as u32);
            for &form in refs {
                put_refid(out, form);
            }
        }
        if let Some(ref animations) = self.animations {
            put_vsval(out, animations.len() as u32)?;
            out.extend_from_slice(animations);
        }
        out.extend_from_slice(&self.unparsed);
        Ok(())
    }
}

impl std::fmt::Display for RefrData {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "placed reference")?;
        if let Some(ref initial) = self.initial {
            write!(f, ", initial type {}", initial.type_code())?;
        }
        if let Some(ref havok) = self.havok {
            write!(f, ", {} havok bytes", havok.len())?;
        }
        if let Some(base) = self.base_object {
            write!(f, ", base {base}")?;
        }
        if let Some(scale) = self.scale {
            write!(f, ", scale {scale}")?;
        }
        if let Some(ref extra) = self.extra {
            write!(f, ", {} extra data", extra.entries.len())?;
        }
        if let Some(ref inventory) = self.inventory {
            write!(f, ", {} inventory items", inventory.len())?;
        }
        if let Some(ref refs) = self.promoted_refs {
            write!(f, ", {} promoted refs", refs.len())?;
        }
        if let Some(ref animations) = self.animations {
            write!(f, ", {} animation bytes", animations.len())?;
        }
        if self.has_unparsed() {
            write!(f, ", {} unparsed bytes", self.unparsed.len())?;
        }
        Ok(())
    }
}

/// Decodes a REFR or ACHR body. `is_actor` switches on the ACHR-only fields
/// and off the REFR-only ones.
pub fn refr_data(
    input: &[u8],
    change_flags: Flags32,
    origin: RefIdKind,
    is_actor: bool,
) -> PResult<RefrData> {
    let flags = RefrFlags::from_bits_retain(change_flags.0);

    let (input, initial) = initial_data(input, initial_type(origin, flags))?;

    let (input, havok) = if flags.contains(RefrFlags::HAVOK_MOVE) {
        let (input, len) = vsval(input)?;
        let (input, data) = take(len as usize)(input)?;
        (input, Some(data.to_vec()))
    } else {
        (input, None)
    };

    let (input, actor_unknown) = if is_actor && flags.contains(RefrFlags::EXTRA_ACTIVATING_CHILDREN)
    {
        let (input, value) = le_u32(input)?;
        let (input, bytes) = take(4usize)(input)?;
        (input, Some((value, <[u8; 4]>::try_from(bytes).unwrap())))
    } else {
        (input, None)
    };

    let (input, form_flags) = if flags.contains(RefrFlags::FORM_FLAGS) {
        let (input, value) = form_flags(input)?;
        (input, Some(value))
    } else {
        (input, None)
    };

    let (input, base_object) = if flags.contains(RefrFlags::BASE_OBJECT) {
        let (input, base) = refid(input)?;
        (input, Some(base))
    } else {
        (input, None)
    };

    let (input, scale) = if flags.contains(RefrFlags::SCALE) {
        let (input, scale) = le_f32(input)?;
        (input, Some(scale))
    } else {
        (input, None)
    };

    let (input, extra) = if flags.has_extra_data() {
        let (input, extra) = extra_data_list(input)?;
        (input, Some(extra))
    } else {
        (input, None)
    };

    let (input, inventory) =
        if flags.intersects(RefrFlags::INVENTORY | RefrFlags::LEVELED_INVENTORY) {
            let (mut input, count) = vsval(input)?;
            let mut inventory = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (rest, item) = refid(input)?;
                let (rest, item_count) = le_i32(rest)?;
                let (rest, extra) = extra_data_list(rest)?;
                inventory.push(InventoryItem {
                    item,
                    count: item_count,
                    extra,
                });
                input = rest;
            }
            (input, Some(inventory))
        } else {
            (input, None)
        };

    let (input, promoted_refs) = if !is_actor && flags.contains(RefrFlags::PROMOTED) {
        let (mut input, count) = le_u32(input)?;
        if count as usize > MAX_FIXED_ARRAY {
            return Err(Error::format(format!(
                "promoted ref count {count} is over the cap of {MAX_FIXED_ARRAY}"
            ))
            .fail());
        }
        let mut refs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (rest, form) = refid(input)?;
            refs.push(form);
            input = rest;
        }
        (input, Some(refs))
    } else {
        (input, None)
    };

    let (input, animations) = if flags.contains(RefrFlags::ANIMATION) {
        let (input, len) = vsval(input)?;
        let (input, data) = take(len as usize)(input)?;
        (input, Some(data.to_vec()))
    } else {
        (input, None)
    };

    // An explosion sub-block can follow for some base objects, but telling
    // those apart needs mod analysis data we don't have. Keep the remainder.
    let unparsed = input.to_vec();
    let input = &input[input.len()..];

    Ok((
        input,
        RefrData {
            initial: Some(initial),
            havok,
            actor_unknown,
            form_flags,
            base_object,
            scale,
            extra,
            inventory,
            promoted_refs,
            animations,
            unparsed,
        },
    ))
}
