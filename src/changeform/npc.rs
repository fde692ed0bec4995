//! NPC_ (actor base) change forms.
//!
//! The body is a run of fixed-size stat blocks and ref lists, each gated by
//! its own change-flag bit. The decoder also runs in an "inline" mode for
//! the copy embedded in leveled-creature extra data; inline bodies stop
//! after the last flagged field instead of soaking up trailing bytes.

use bitflags::bitflags;

use nom::bytes::complete::take;
use nom::number::complete::{le_f32, le_u32, le_u8};

use crate::error::{Error, PResult, Result};
use crate::flags::Flags32;
use crate::primitives::{
    put_f32, put_u32, put_u8, put_vsval, put_wstring, vsval, wstring, WString,
};
use crate::refid::{put_refid, refid, RefId};

use super::flags::{form_flags, put_form_flags, FormFlags};
use super::MAX_FIXED_ARRAY;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NpcFlags: u32 {
        const FORM_FLAGS = 1 << 0;
        const BASE_DATA = 1 << 1;
        const AI_DATA = 1 << 3;
        const SPELL_LIST = 1 << 4;
        const FULL_NAME = 1 << 5;
        const FACTIONS = 1 << 6;
        const SKILLS = 1 << 9;
        const CLASS = 1 << 10;
        const FACE = 1 << 11;
        const DEFAULT_OUTFIT = 1 << 12;
        const SLEEP_OUTFIT = 1 << 13;
        const GENDER = 1 << 24;
        const RACE = 1 << 25;

        const _ = !0;
    }
}

pub const BASE_DATA_SIZE: usize = 24;
pub const AI_DATA_SIZE: usize = 20;
pub const SKILLS_SIZE: usize = 52;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FactionRank {
    pub faction: RefId,
    pub rank: u8,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpellLists {
    pub spells: Vec<RefId>,
    pub leveled_spells: Vec<RefId>,
    pub shouts: Vec<RefId>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaceChange {
    pub new_race: RefId,
    pub old_race: RefId,
}

/// Sculpted face geometry: morph weights and preset indices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaceShape {
    pub morphs: Vec<f32>,
    pub presets: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FaceDetails {
    pub hair_color: RefId,
    pub skin_tone: u32,
    pub skin: RefId,
    pub head_parts: Vec<RefId>,
    pub shape: Option<FaceShape>,
}

/// The whole face block. The engine writes a presence byte first, so a
/// change form can record "face changed to nothing".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaceData {
    pub details: Option<FaceDetails>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NpcData {
    pub form_flags: Option<FormFlags>,
    pub base_data: Option<[u8; BASE_DATA_SIZE]>,
    pub factions: Option<Vec<FactionRank>>,
    pub spell_lists: Option<SpellLists>,
    pub ai_data: Option<[u8; AI_DATA_SIZE]>,
    pub full_name: Option<WString>,
    pub skills: Option<[u8; SKILLS_SIZE]>,
    pub class: Option<RefId>,
    pub race: Option<RaceChange>,
    pub face: Option<FaceData>,
    pub gender: Option<u8>,
    pub default_outfit: Option<RefId>,
    pub sleep_outfit: Option<RefId>,
    /// Bytes after the last flagged field. Always empty for inline bodies.
    pub unparsed: Vec<u8>,
}

impl NpcData {
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        if let Some(flags) = self.form_flags {
            put_form_flags(out, flags);
        }
        if let Some(ref base) = self.base_data {
            out.extend_from_slice(base);
        }
        if let Some(ref factions) = self.factions {
            put_vsval(out, factions.len() as u32)?;
            for faction in factions {
                put_refid(out, faction.faction);
                put_u8(out, faction.rank);
            }
        }
        if let Some(ref lists) = self.spell_lists {
            for list in [&lists.spells, &lists.leveled_spells, &lists.shouts] {
                put_vsval(out, list.len() as u32)?;
                for &form in list {
                    put_refid(out, form);
                }
            }
        }
        if let Some(ref ai) = self.ai_data {
            out.extend_from_slice(ai);
        }
        if let Some(ref name) = self.full_name {
            put_wstring(out, name)?;
        }
        if let Some(ref skills) = self.skills {
            out.extend_from_slice(skills);
        }
        if let Some(class) = self.class {
            put_refid(out, class);
        }
        if let Some(race) = self.race {
            put_refid(out, race.new_race);
            put_refid(out, race.old_race);
        }
        if let Some(ref face) = self.face {
            write_face(out, face)?;
        }
        if let Some(gender) = self.gender {
            put_u8(out, gender);
        }
        if let Some(outfit) = self.default_outfit {
            put_refid(out, outfit);
        }
        if let Some(outfit) = self.sleep_outfit {
            put_refid(out, outfit);
        }
        out.extend_from_slice(&self.unparsed);
        Ok(())
    }
}

fn write_face(out: &mut Vec<u8>, face: &FaceData) -> Result<()> {
    match face.details {
        None => put_u8(out, 0),
        Some(ref details) => {
            put_u8(out, 1);
            put_refid(out, details.hair_color);
            put_u32(out, details.skin_tone);
            put_refid(out, details.skin);
            put_vsval(out, details.head_parts.len() as u32)?;
            for &part in &details.head_parts {
                put_refid(out, part);
            }
            match details.shape {
                None => put_u8(out, 0),
                Some(ref shape) => {
                    put_u8(out, 1);
                    put_u32(out, shape.morphs.len() as u32);
                    for &morph in &shape.morphs {
                        put_f32(out, morph);
                    }
                    put_u32(out, shape.presets.len() as u32);
                    for &preset in &shape.presets {
                        put_u32(out, preset);
                    }
                }
            }
        }
    }
    Ok(())
}

impl std::fmt::Display for NpcData {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "npc")?;
        if let Some(ref name) = self.full_name {
            write!(f, " \"{name}\"")?;
        }
        let mut changed = Vec::new();
        if self.base_data.is_some() {
            changed.push("base data");
        }
        if let Some(ref factions) = self.factions {
            if !factions.is_empty() {
                changed.push("factions");
            }
        }
        if self.spell_lists.is_some() {
            changed.push("spells");
        }
        if self.ai_data.is_some() {
            changed.push("ai");
        }
        if self.skills.is_some() {
            changed.push("skills");
        }
        if self.class.is_some() {
            changed.push("class");
        }
        if self.race.is_some() {
            changed.push("race");
        }
        if self.face.is_some() {
            changed.push("face");
        }
        if self.gender.is_some() {
            changed.push("gender");
        }
        if self.default_outfit.is_some() || self.sleep_outfit.is_some() {
            changed.push("outfits");
        }
        if !changed.is_empty() {
            write!(f, ", changed: {}", changed.join(", "))?;
        }
        if !self.unparsed.is_empty() {
            write!(f, ", {} unparsed bytes", self.unparsed.len())?;
        }
        Ok(())
    }
}

fn refid_vsval_array(input: &[u8]) -> PResult<Vec<RefId>> {
    let (mut input, count) = vsval(input)?;
    let mut forms = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (rest, form) = refid(input)?;
        forms.push(form);
        input = rest;
    }
    Ok((input, forms))
}

fn fixed_u32_count<'a>(input: &'a [u8], what: &str) -> PResult<'a, u32> {
    let (input, count) = le_u32(input)?;
    if count as usize > MAX_FIXED_ARRAY {
        return Err(Error::format(format!(
            "{what} count {count} is over the cap of {MAX_FIXED_ARRAY}"
        ))
        .fail());
    }
    Ok((input, count))
}

fn face_data(input: &[u8]) -> PResult<FaceData> {
    let (input, present) = le_u8(input)?;
    if present == 0 {
        return Ok((input, FaceData { details: None }));
    }
    let (input, hair_color) = refid(input)?;
    let (input, skin_tone) = le_u32(input)?;
    let (input, skin) = refid(input)?;
    let (input, head_parts) = refid_vsval_array(input)?;
    let (input, shape_present) = le_u8(input)?;
    let (input, shape) = if shape_present == 0 {
        (input, None)
    } else {
        let (mut input, morph_count) = fixed_u32_count(input, "face morph")?;
        let mut morphs = Vec::with_capacity(morph_count as usize);
        for _ in 0..morph_count {
            let (rest, morph) = le_f32(input)?;
            morphs.push(morph);
            input = rest;
        }
        let (mut input, preset_count) = fixed_u32_count(input, "face preset")?;
        let mut presets = Vec::with_capacity(preset_count as usize);
        for _ in 0..preset_count {
            let (rest, preset) = le_u32(input)?;
            presets.push(preset);
            input = rest;
        }
        (input, Some(FaceShape { morphs, presets }))
    };
    Ok((
        input,
        FaceData {
            details: Some(FaceDetails {
                hair_color,
                skin_tone,
                skin,
                head_parts,
                shape,
            }),
        },
    ))
}

/// Decodes an NPC_ body. `inline` bodies (embedded in extra data) must leave
/// whatever follows them untouched; top-level bodies own their buffer and
/// keep the remainder as unparsed bytes.
pub fn npc_data(input: &[u8], change_flags: Flags32, inline: bool) -> PResult<NpcData> {
    let flags = NpcFlags::from_bits_retain(change_flags.0);

    let (input, form_flags) = if flags.contains(NpcFlags::FORM_FLAGS) {
        let (input, value) = form_flags(input)?;
        (input, Some(value))
    } else {
        (input, None)
    };

    let (input, base_data) = if flags.contains(NpcFlags::BASE_DATA) {
        let (input, raw) = take(BASE_DATA_SIZE)(input)?;
        (input, Some(<[u8; BASE_DATA_SIZE]>::try_from(raw).unwrap()))
    } else {
        (input, None)
    };

    let (input, factions) = if flags.contains(NpcFlags::FACTIONS) {
        let (mut input, count) = vsval(input)?;
        let mut factions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (rest, faction) = refid(input)?;
            let (rest, rank) = le_u8(rest)?;
            factions.push(FactionRank { faction, rank });
            input = rest;
        }
        (input, Some(factions))
    } else {
        (input, None)
    };

    let (input, spell_lists) = if flags.contains(NpcFlags::SPELL_LIST) {
        let (input, spells) = refid_vsval_array(input)?;
        let (input, leveled_spells) = refid_vsval_array(input)?;
        let (input, shouts) = refid_vsval_array(input)?;
        (
            input,
            Some(SpellLists {
                spells,
                leveled_spells,
                shouts,
            }),
        )
    } else {
        (input, None)
    };

    let (input, ai_data) = if flags.contains(NpcFlags::AI_DATA) {
        let (input, raw) = take(AI_DATA_SIZE)(input)?;
        (input, Some(<[u8; AI_DATA_SIZE]>::try_from(raw).unwrap()))
    } else {
        (input, None)
    };

    let (input, full_name) = if flags.contains(NpcFlags::FULL_NAME) {
        let (input, name) = wstring(input)?;
        (input, Some(name))
    } else {
        (input, None)
    };

    let (input, skills) = if flags.contains(NpcFlags::SKILLS) {
        let (input, raw) = take(SKILLS_SIZE)(input)?;
        (input, Some(<[u8; SKILLS_SIZE]>::try_from(raw).unwrap()))
    } else {
        (input, None)
    };

    let (input, class) = if flags.contains(NpcFlags::CLASS) {
        let (input, class) = refid(input)?;
        (input, Some(class))
    } else {
        (input, None)
    };

    let (input, race) = if flags.contains(NpcFlags::RACE) {
        let (input, new_race) = refid(input)?;
        let (input, old_race) = refid(input)?;
        (input, Some(RaceChange { new_race, old_race }))
    } else {
        (input, None)
    };

    let (input, face) = if flags.contains(NpcFlags::FACE) {
        let (input, face) = face_data(input)?;
        (input, Some(face))
    } else {
        (input, None)
    };

    let (input, gender) = if flags.contains(NpcFlags::GENDER) {
        let (input, gender) = le_u8(input)?;
        (input, Some(gender))
    } else {
        (input, None)
    };

    let (input, default_outfit) = if flags.contains(NpcFlags::DEFAULT_OUTFIT) {
        let (input, outfit) = refid(input)?;
        (input, Some(outfit))
    } else {
        (input, None)
    };

    let (input, sleep_outfit) = if flags.contains(NpcFlags::SLEEP_OUTFIT) {
        let (input, outfit) = refid(input)?;
        (input, Some(outfit))
    } else {
        (input, None)
    };

    let (input, unparsed) = if inline {
        (input, Vec::new())
    } else {
        (&input[input.len()..], input.to_vec())
    };

    Ok((
        input,
        NpcData {
            form_flags,
            base_data,
            factions,
            spell_lists,
            ai_data,
            full_name,
            skills,
            class,
            race,
            face,
            gender,
            default_outfit,
            sleep_outfit,
            unparsed,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(raw: u32) -> RefId {
        RefId::from_raw(raw).unwrap()
    }

    fn sample() -> (Flags32, NpcData) {
        let change_flags = Flags32(0)
            .with(1)
            .with(4)
            .with(5)
            .with(6)
            .with(10)
            .with(11)
            .with(24)
            .with(25);
        let data = NpcData {
            form_flags: None,
            base_data: Some([7; BASE_DATA_SIZE]),
            factions: Some(vec![FactionRank {
                faction: rid(0x40_0013),
                rank: 2,
            }]),
            spell_lists: Some(SpellLists {
                spells: vec![rid(0x00_0001), rid(0x00_0002)],
                leveled_spells: Vec::new(),
                shouts: vec![rid(0x40_0100)],
            }),
            ai_data: None,
            full_name: Some(WString::from("Lydia")),
            skills: None,
            class: Some(rid(0x40_0200)),
            race: Some(RaceChange {
                new_race: rid(0x40_0300),
                old_race: rid(0x40_0301),
            }),
            face: Some(FaceData {
                details: Some(FaceDetails {
                    hair_color: rid(0x40_0400),
                    skin_tone: 0x00C0_FFEE,
                    skin: RefId::ZERO,
                    head_parts: vec![rid(0x40_0500)],
                    shape: Some(FaceShape {
                        morphs: vec![0.25, -1.0],
                        presets: vec![3, 1, 4],
                    }),
                }),
            }),
            gender: Some(1),
            default_outfit: None,
            sleep_outfit: None,
            unparsed: Vec::new(),
        };
        (change_flags, data)
    }

    #[test]
    fn roundtrips() {
        let (change_flags, data) = sample();
        let mut out = Vec::new();
        data.write(&mut out).unwrap();
        let (rest, decoded) = npc_data(&out, change_flags, false).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, data);
    }

    #[test]
    fn top_level_bodies_keep_trailing_bytes() {
        let (change_flags, data) = sample();
        let mut out = Vec::new();
        data.write(&mut out).unwrap();
        out.extend_from_slice(&[0xAA, 0xBB]);

        let (rest, decoded) = npc_data(&out, change_flags, false).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded.unparsed, vec![0xAA, 0xBB]);
    }

    #[test]
    fn inline_bodies_leave_trailing_bytes_alone() {
        let (change_flags, data) = sample();
        let mut out = Vec::new();
        data.write(&mut out).unwrap();
        out.extend_from_slice(&[0xAA, 0xBB]);

        let (rest, decoded) = npc_data(&out, change_flags, true).unwrap();
        assert_eq!(rest, &[0xAA, 0xBB]);
        assert!(decoded.unparsed.is_empty());
    }

    #[test]
    fn face_block_with_presence_byte_zero() {
        let change_flags = Flags32(0).with(11);
        let data = NpcData {
            face: Some(FaceData { details: None }),
            ..NpcData::default()
        };
        let mut out = Vec::new();
        data.write(&mut out).unwrap();
        assert_eq!(out, vec![0]);
        let (_, decoded) = npc_data(&out, change_flags, false).unwrap();
        assert_eq!(decoded.face, Some(FaceData { details: None }));
    }

    #[test]
    fn oversized_morph_counts_are_rejected() {
        let change_flags = Flags32(0).with(11);
        let mut out = Vec::new();
        put_u8(&mut out, 1); // face present
        put_refid(&mut out, rid(1));
        put_u32(&mut out, 0);
        put_refid(&mut out, rid(2));
        put_vsval(&mut out, 0).unwrap();
        put_u8(&mut out, 1); // shape present
        put_u32(&mut out, 10_000); // absurd morph count
        assert!(npc_data(&out, change_flags, false).is_err());
    }
}
