//! Global data blocks: the typed sub-sections around the change forms.
//!
//! Three tables of `(type, size, bytes)` blocks, each table owning a numeric
//! type range. Most types are opaque to this crate; the ones an editor
//! actually wants to touch (global variables, the animation list) get real
//! codecs, and the papyrus block gets handed to its own boundary module.

use nom::bytes::complete::take;
use nom::number::complete::{le_f32, le_u32, le_u8};

use crate::error::{Error, PResult, Result};
use crate::papyrus::PapyrusBlock;
use crate::primitives::{put_f32, put_u32, put_u8, put_vsval, vsval, vsval_size};
use crate::refid::{put_refid, refid, RefId};

pub const TYPE_GLOBAL_VARIABLES: u32 = 3;
pub const TYPE_PAPYRUS: u32 = 1001;
pub const TYPE_ANIMATIONS: u32 = 1002;

/// Which of the three tables a block was found in. Each table owns a type
/// range and a block outside its table's range is malformed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlobalDataGroup {
    One,
    Two,
    Three,
}

impl GlobalDataGroup {
    pub fn contains(self, type_id: u32) -> bool {
        match self {
            GlobalDataGroup::One => type_id <= 100,
            GlobalDataGroup::Two => (100..=1000).contains(&type_id),
            GlobalDataGroup::Three => (1000..=1100).contains(&type_id),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GlobalData {
    pub type_id: u32,
    pub body: GlobalDataBody,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GlobalDataBody {
    /// Type 3: the global variable table.
    GlobalVariables(GlobalVariableTable),
    /// Type 1001: scripting-VM state, framed but not interpreted here.
    Papyrus(PapyrusBlock),
    /// Type 1002: actor animation list.
    Animations(AnimationList),
    /// Everything else, kept as-is.
    Opaque(Vec<u8>),
}

impl GlobalData {
    pub fn body_size(&self) -> usize {
        match self.body {
            GlobalDataBody::GlobalVariables(ref table) => table.size(),
            GlobalDataBody::Papyrus(ref block) => block.size() as usize,
            GlobalDataBody::Animations(ref list) => list.size(),
            GlobalDataBody::Opaque(ref raw) => raw.len(),
        }
    }

    /// On-disk size including the type and size words.
    pub fn size(&self) -> usize {
        8 + self.body_size()
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        put_u32(out, self.type_id);
        put_u32(out, self.body_size() as u32);
        match self.body {
            GlobalDataBody::GlobalVariables(ref table) => table.write(out)?,
            GlobalDataBody::Papyrus(ref block) => block.write(out),
            GlobalDataBody::Animations(ref list) => list.write(out),
            GlobalDataBody::Opaque(ref raw) => out.extend_from_slice(raw),
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GlobalVariableTable {
    pub variables: Vec<(RefId, f32)>,
}

impl GlobalVariableTable {
    pub fn size(&self) -> usize {
        vsval_size(self.variables.len() as u32) + self.variables.len() * 7
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        put_vsval(out, self.variables.len() as u32)?;
        for &(id, value) in &self.variables {
            put_refid(out, id);
            put_f32(out, value);
        }
        Ok(())
    }
}

fn global_variables(input: &[u8]) -> PResult<GlobalVariableTable> {
    let (mut input, count) = vsval(input)?;
    let mut variables = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (rest, id) = refid(input)?;
        let (rest, value) = le_f32(rest)?;
        variables.push((id, value));
        input = rest;
    }
    Ok((input, GlobalVariableTable { variables }))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnimationList {
    pub entries: Vec<Animation>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Animation {
    pub actor: RefId,
    pub animation: RefId,
    pub flag: u8,
}

impl AnimationList {
    pub fn size(&self) -> usize {
        4 + self.entries.len() * 7
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        put_u32(out, self.entries.len() as u32);
        for entry in &self.entries {
            put_refid(out, entry.actor);
            put_refid(out, entry.animation);
            put_u8(out, entry.flag);
        }
    }
}

fn animation_list(input: &[u8]) -> PResult<AnimationList> {
    let (mut input, count) = le_u32(input)?;
    let mut entries = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let (rest, actor) = refid(input)?;
        let (rest, animation) = refid(rest)?;
        let (rest, flag) = le_u8(rest)?;
        entries.push(Animation {
            actor,
            animation,
            flag,
        });
        input = rest;
    }
    Ok((input, AnimationList { entries }))
}

pub fn global_data(input: &[u8], group: GlobalDataGroup) -> PResult<GlobalData> {
    let (input, type_id) = le_u32(input)?;
    if !group.contains(type_id) {
        return Err(Error::format(format!(
            "global data type {type_id} does not belong in {group:?}"
        ))
        .fail());
    }
    let (input, block_size) = le_u32(input)?;
    let (input, block) = take(block_size as usize)(input)?;

    let body = match type_id {
        TYPE_GLOBAL_VARIABLES => {
            let (rest, table) = global_variables(block)?;
            if !rest.is_empty() {
                return Err(Error::position_mismatch(
                    u64::from(block_size),
                    (block.len() - rest.len()) as u64,
                )
                .fail());
            }
            GlobalDataBody::GlobalVariables(table)
        }
        TYPE_PAPYRUS => GlobalDataBody::Papyrus(PapyrusBlock::new(block.to_vec())),
        TYPE_ANIMATIONS => {
            let (rest, list) = animation_list(block)?;
            if !rest.is_empty() {
                return Err(Error::position_mismatch(
                    u64::from(block_size),
                    (block.len() - rest.len()) as u64,
                )
                .fail());
            }
            GlobalDataBody::Animations(list)
        }
        _ => GlobalDataBody::Opaque(block.to_vec()),
    };

    Ok((input, GlobalData { type_id, body }))
}
