//! QUST (quest) change forms.
//!
//! The run-data sub-record is the deepest structure outside the papyrus
//! block; its third item list is tag-discriminated and the catalogue of tags
//! is not closed, so unknown ones surface as errors carrying whatever was
//! decoded up to that point.

use bitflags::bitflags;

use nom::number::complete::{le_f32, le_i16, le_u32, le_u8};

use crate::error::{Error, Partial, PResult, Result};
use crate::flags::{flags8, put_flags8, Flags16, Flags32, Flags8};
use crate::primitives::{
    put_f32, put_i16, put_u16, put_u32, put_u8, put_vsval, vsval,
};
use crate::refid::{put_refid, refid, RefId};

use super::flags::{form_flags, put_form_flags, FormFlags};
use super::MAX_FIXED_ARRAY;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct QustFlags: u32 {
        const FORM_FLAGS = 1 << 0;
        const QUEST_FLAGS = 1 << 1;
        const SCRIPT_DELAY = 1 << 2;
        const ALREADY_RUN = 1 << 28;
        const RUN_DATA = 1 << 29;
        const OBJECTIVES = 1 << 30;
        const STAGES = 1 << 31;

        const _ = !0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuestStage {
    pub stage: i16,
    pub status: Flags8,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuestObjective {
    pub id: u32,
    pub state: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunDataItem1 {
    pub key: u32,
    pub flags: Flags8,
    /// One ref when `flags` is clear, five otherwise.
    pub refs: Vec<RefId>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunDataItem2 {
    pub key: u32,
    pub form: RefId,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RunDataItem3Entry {
    /// Tags 1, 2 and 4 all wrap a single ref; the tag is preserved.
    Form { tag: u32, form: RefId },
    /// Tag 3.
    Value(u32),
}

impl RunDataItem3Entry {
    pub fn tag(self) -> u32 {
        match self {
            RunDataItem3Entry::Form { tag, .. } => tag,
            RunDataItem3Entry::Value(_) => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunDataItem3 {
    pub unknown1: u32,
    pub unknown2: f32,
    pub entries: Vec<RunDataItem3Entry>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QuestRunData {
    pub unknown: u8,
    pub items1: Vec<RunDataItem1>,
    pub items2: Vec<RunDataItem2>,
    pub flag: Flags8,
    /// Present exactly when `flag` has any bit set.
    pub item3: Option<RunDataItem3>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuestData {
    pub form_flags: Option<FormFlags>,
    pub quest_flags: Option<Flags16>,
    pub script_delay: Option<f32>,
    pub stages: Option<Vec<QuestStage>>,
    pub objectives: Option<Vec<QuestObjective>>,
    pub run_data: Option<QuestRunData>,
    pub already_run: Option<u8>,
}

impl QuestData {
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        if let Some(flags) = self.form_flags {
            put_form_flags(out, flags);
        }
        if let Some(flags) = self.quest_flags {
            put_u16(out, flags.0);
        }
        if let Some(delay) = self.script_delay {
            put_f32(out, delay);
        }
        if let Some(ref stages) = self.stages {
            put_vsval(out, stages.len() as u32)?;
            for stage in stages {
                put_i16(out, stage.stage);
                put_flags8(out, stage.status);
            }
        }
        if let Some(ref objectives) = self.objectives {
            put_vsval(out, objectives.len() as u32)?;
            for objective in objectives {
                put_u32(out, objective.id);
                put_u32(out, objective.state);
            }
        }
        if let Some(ref run_data) = self.run_data {
            write_run_data(out, run_data)?;
        }
        if let Some(already_run) = self.already_run {
            put_u8(out, already_run);
        }
        Ok(())
    }
}

fn write_run_data(out: &mut Vec<u8>, run_data: &QuestRunData) -> Result<()> {
    put_u8(out, run_data.unknown);
    put_u32(out, run_data.items1.len() as u32);
    for item in &run_data.items1 {
        put_u32(out, item.key);
        put_flags8(out, item.flags);
        let expected = if item.flags.all_zero() { 1 } else { 5 };
        if item.refs.len() != expected {
            return Err(Error::format(format!(
                "run data item carries {} refs, its flags say {expected}",
                item.refs.len()
            )));
        }
        for &form in &item.refs {
            put_refid(out, form);
        }
    }
    put_u32(out, run_data.items2.len() as u32);
    for item in &run_data.items2 {
        put_u32(out, item.key);
        put_refid(out, item.form);
    }
    put_flags8(out, run_data.flag);
    match (run_data.flag.all_zero(), &run_data.item3) {
        (false, Some(item3)) => {
            put_u32(out, item3.unknown1);
            put_f32(out, item3.unknown2);
            put_u32(out, item3.entries.len() as u32);
            for &entry in &item3.entries {
                put_u32(out, entry.tag());
                match entry {
                    RunDataItem3Entry::Form { form, .. } => put_refid(out, form),
                    RunDataItem3Entry::Value(value) => put_u32(out, value),
                }
            }
            Ok(())
        }
        (true, None) => Ok(()),
        _ => Err(Error::format(
            "run data flag byte disagrees with the presence of item 3",
        )),
    }
}

impl std::fmt::Display for QuestData {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "quest")?;
        if let Some(flags) = self.quest_flags {
            write!(f, ", flags {flags}")?;
        }
        if let Some(delay) = self.script_delay {
            write!(f, ", script delay {delay}")?;
        }
        if let Some(ref stages) = self.stages {
            write!(f, ", {} stages", stages.len())?;
        }
        if let Some(ref objectives) = self.objectives {
            write!(f, ", {} objectives", objectives.len())?;
        }
        if self.run_data.is_some() {
            write!(f, ", run data")?;
        }
        if self.already_run == Some(1) {
            write!(f, ", already run")?;
        }
        Ok(())
    }
}

fn checked_count(count: u32, what: &str) -> Result<u32> {
    if count as usize > MAX_FIXED_ARRAY {
        Err(Error::format(format!(
            "{what} count {count} is over the cap of {MAX_FIXED_ARRAY}"
        )))
    } else {
        Ok(count)
    }
}

fn run_data(input: &[u8]) -> PResult<QuestRunData> {
    let (input, unknown) = le_u8(input)?;

    let (mut input, count1) = le_u32(input)?;
    checked_count(count1, "quest run data item 1").map_err(Error::fail)?;
    let mut items1 = Vec::with_capacity(count1 as usize);
    for _ in 0..count1 {
        let (rest, key) = le_u32(input)?;
        let (rest, flags) = flags8(rest)?;
        let ref_count = if flags.all_zero() { 1 } else { 5 };
        let mut refs = Vec::with_capacity(ref_count);
        let mut rest = rest;
        for _ in 0..ref_count {
            let (next, form) = refid(rest)?;
            refs.push(form);
            rest = next;
        }
        items1.push(RunDataItem1 { key, flags, refs });
        input = rest;
    }

    let (mut input, count2) = le_u32(input)?;
    checked_count(count2, "quest run data item 2").map_err(Error::fail)?;
    let mut items2 = Vec::with_capacity(count2 as usize);
    for _ in 0..count2 {
        let (rest, key) = le_u32(input)?;
        let (rest, form) = refid(rest)?;
        items2.push(RunDataItem2 { key, form });
        input = rest;
    }

    let (input, flag) = flags8(input)?;
    let (input, item3) = if flag.all_zero() {
        (input, None)
    } else {
        let (input, unknown1) = le_u32(input)?;
        let (input, unknown2) = le_f32(input)?;
        let (mut input, count) = le_u32(input)?;
        checked_count(count, "quest run data item 3").map_err(Error::fail)?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (rest, tag) = le_u32(input)?;
            let (rest, entry) = match tag {
                1 | 2 | 4 => {
                    let (rest, form) = refid(rest)?;
                    (rest, RunDataItem3Entry::Form { tag, form })
                }
                3 => {
                    let (rest, value) = le_u32(rest)?;
                    (rest, RunDataItem3Entry::Value(value))
                }
                other => {
                    return Err(Error::unknown_variant("quest run data entry", other)
                        .with_partial(Partial::QuestRunItems(entries))
                        .fail())
                }
            };
            entries.push(entry);
            input = rest;
        }
        (
            input,
            Some(RunDataItem3 {
                unknown1,
                unknown2,
                entries,
            }),
        )
    };

    Ok((
        input,
        QuestRunData {
            unknown,
            items1,
            items2,
            flag,
            item3,
        },
    ))
}

pub fn quest_data(input: &[u8], change_flags: Flags32) -> PResult<QuestData> {
    let flags = QustFlags::from_bits_retain(change_flags.0);

    let (input, form_flags) = if flags.contains(QustFlags::FORM_FLAGS) {
        let (input, value) = form_flags(input)?;
        (input, Some(value))
    } else {
        (input, None)
    };

    let (input, quest_flags) = if flags.contains(QustFlags::QUEST_FLAGS) {
        let (input, raw) = nom::number::complete::le_u16(input)?;
        (input, Some(Flags16(raw)))
    } else {
        (input, None)
    };

    let (input, script_delay) = if flags.contains(QustFlags::SCRIPT_DELAY) {
        let (input, delay) = le_f32(input)?;
        (input, Some(delay))
    } else {
        (input, None)
    };

    let (input, stages) = if flags.contains(QustFlags::STAGES) {
        let (mut input, count) = vsval(input)?;
        let mut stages = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (rest, stage) = le_i16(input)?;
            let (rest, status) = flags8(rest)?;
            stages.push(QuestStage { stage, status });
            input = rest;
        }
        (input, Some(stages))
    } else {
        (input, None)
    };

    let (input, objectives) = if flags.contains(QustFlags::OBJECTIVES) {
        let (mut input, count) = vsval(input)?;
        let mut objectives = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (rest, id) = le_u32(input)?;
            let (rest, state) = le_u32(rest)?;
            objectives.push(QuestObjective { id, state });
            input = rest;
        }
        (input, Some(objectives))
    } else {
        (input, None)
    };

    let (input, run) = if flags.contains(QustFlags::RUN_DATA) {
        let (input, run) = run_data(input)?;
        (input, Some(run))
    } else {
        (input, None)
    };

    let (input, already_run) = if flags.contains(QustFlags::ALREADY_RUN) {
        let (input, value) = le_u8(input)?;
        (input, Some(value))
    } else {
        (input, None)
    };

    Ok((
        input,
        QuestData {
            form_flags,
            quest_flags,
            script_delay,
            stages,
            objectives,
            run_data: run,
            already_run,
        },
    ))
}
