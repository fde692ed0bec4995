//! RELA (relationship) change forms.
//!
//! Runtime-created relationships carry the two actors and the association
//! type; ones that exist in a plugin only store the changed rank.

use bitflags::bitflags;

use nom::number::complete::le_u32;

use crate::error::{PResult, Result};
use crate::flags::Flags32;
use crate::primitives::put_u32;
use crate::refid::{put_refid, refid, RefId, RefIdKind};

use super::flags::{form_flags, put_form_flags, FormFlags};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RelaFlags: u32 {
        const FORM_FLAGS = 1 << 0;
        const RANK = 1 << 1;

        const _ = !0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelaPeople {
    pub person1: RefId,
    pub person2: RefId,
    pub association: RefId,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelaData {
    pub form_flags: Option<FormFlags>,
    /// Only present when the relationship itself was created at runtime.
    pub people: Option<RelaPeople>,
    pub rank: Option<u32>,
}

impl RelaData {
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        if let Some(flags) = self.form_flags {
            put_form_flags(out, flags);
        }
        if let Some(people) = self.people {
            put_refid(out, people.person1);
            put_refid(out, people.person2);
            put_refid(out, people.association);
        }
        if let Some(rank) = self.rank {
            put_u32(out, rank);
        }
        Ok(())
    }
}

impl std::fmt::Display for RelaData {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "relationship")?;
        if let Some(people) = self.people {
            write!(
                f,
                " between {} and {} ({})",
                people.person1, people.person2, people.association
            )?;
        }
        if let Some(rank) = self.rank {
            write!(f, ", rank {rank}")?;
        }
        Ok(())
    }
}

pub fn rela_data(input: &[u8], change_flags: Flags32, origin: RefIdKind) -> PResult<RelaData> {
    let flags = RelaFlags::from_bits_retain(change_flags.0);

    let (input, form_flags) = if flags.contains(RelaFlags::FORM_FLAGS) {
        let (input, value) = form_flags(input)?;
        (input, Some(value))
    } else {
        (input, None)
    };

    let (input, people) = if origin == RefIdKind::Created {
        let (input, person1) = refid(input)?;
        let (input, person2) = refid(input)?;
        let (input, association) = refid(input)?;
        (
            input,
            Some(RelaPeople {
                person1,
                person2,
                association,
            }),
        )
    } else {
        (input, None)
    };

    let (input, rank) = if flags.contains(RelaFlags::RANK) {
        let (input, rank) = le_u32(input)?;
        (input, Some(rank))
    } else {
        (input, None)
    };

    Ok((input, RelaData { form_flags, people, rank }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_relationships_carry_the_people() {
        let data = RelaData {
            form_flags: None,
            people: Some(RelaPeople {
                person1: RefId::from_raw(0x00_0001).unwrap(),
                person2: RefId::from_raw(0x00_0002).unwrap(),
                association: RefId::from_raw(0x40_0100).unwrap(),
            }),
            rank: Some(3),
        };
        let mut out = Vec::new();
        data.write(&mut out).unwrap();
        let (rest, decoded) = rela_data(&out, Flags32(0).with(1), RefIdKind::Created).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, data);
    }

    #[test]
    fn plugin_relationships_only_store_the_rank() {
        let data = RelaData {
            form_flags: None,
            people: None,
            rank: Some(1),
        };
        let mut out = Vec::new();
        data.write(&mut out).unwrap();
        let (rest, decoded) = rela_data(&out, Flags32(0).with(1), RefIdKind::FormIdx).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, data);
    }
}
