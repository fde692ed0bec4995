//! Change forms: the per-record deltas that make up the bulk of a save.
//!
//! Every record is framed the same way — ref-id, change-flags word, a type
//! byte that also encodes the width of the two length fields, a version, the
//! lengths, then the payload, which is individually zlib-compressed when the
//! second length is non-zero. The payload layout depends on the record kind
//! and the change flags; kinds we don't have a decoder for stay raw.

pub mod extra;
pub mod flags;
pub mod flst;
pub mod leveled;
pub mod npc;
pub mod qust;
pub mod refr;
pub mod rela;

use std::borrow::Cow;
use std::fmt;

use nom::bytes::complete::take;
use nom::number::complete::{le_u16, le_u32, le_u8};

use crate::compress::{zlib_deflate, zlib_inflate};
use crate::error::{Error, Partial, PResult, Result};
use crate::flags::{flags32, put_flags32, Flags32};
use crate::header::Game;
use crate::primitives::{put_u16, put_u32, put_u8};
use crate::refid::{put_refid, refid, RefId};

use flst::FormListData;
use leveled::LeveledListData;
use npc::NpcData;
use qust::QuestData;
use refr::RefrData;
use rela::RelaData;

/// Cap for u32-counted arrays inside change-form bodies. Real records never
/// get near it; hitting it means the flags sent a decoder down the wrong
/// path.
pub const MAX_FIXED_ARRAY: usize = 256;

/// Record kinds a change form can describe. The on-disk code differs per
/// game; see `from_code` / `code`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKind {
    Refr,
    Achr,
    Pmis,
    Pgre,
    Pbea,
    Pfla,
    Cell,
    Info,
    Qust,
    Npc,
    Acti,
    Tact,
    Armo,
    Book,
    Cont,
    Door,
    Ingr,
    Ligh,
    Misc,
    Appa,
    Stat,
    Mstt,
    Furn,
    Weap,
    Ammo,
    Keym,
    Alch,
    Idlm,
    Note,
    Eczn,
    Clas,
    Fact,
    Pack,
    Navm,
    Woop,
    Mgef,
    Smqn,
    Scen,
    Lctn,
    Rela,
    Phzd,
    Pbar,
    Pcon,
    Flst,
    Lvln,
    Lvli,
    Lvsp,
    Parw,
    Ench,
    // Fallout 4 additions.
    Dial,
    Omod,
    Dobj,
}

impl RecordKind {
    /// The four-character record tag, as seen in plugin files and listings.
    pub fn tag(self) -> &'static str {
        use RecordKind::*;
        match self {
            Refr => "REFR",
            Achr => "ACHR",
            Pmis => "PMIS",
            Pgre => "PGRE",
            Pbea => "PBEA",
            Pfla => "PFLA",
            Cell => "CELL",
            Info => "INFO",
            Qust => "QUST",
            Npc => "NPC_",
            Acti => "ACTI",
            Tact => "TACT",
            Armo => "ARMO",
            Book => "BOOK",
            Cont => "CONT",
            Door => "DOOR",
            Ingr => "INGR",
            Ligh => "LIGH",
            Misc => "MISC",
            Appa => "APPA",
            Stat => "STAT",
            Mstt => "MSTT",
            Furn => "FURN",
            Weap => "WEAP",
            Ammo => "AMMO",
            Keym => "KEYM",
            Alch => "ALCH",
            Idlm => "IDLM",
            Note => "NOTE",
            Eczn => "ECZN",
            Clas => "CLAS",
            Fact => "FACT",
            Pack => "PACK",
            Navm => "NAVM",
            Woop => "WOOP",
            Mgef => "MGEF",
            Smqn => "SMQN",
            Scen => "SCEN",
            Lctn => "LCTN",
            Rela => "RELA",
            Phzd => "PHZD",
            Pbar => "PBAR",
            Pcon => "PCON",
            Flst => "FLST",
            Lvln => "LVLN",
            Lvli => "LVLI",
            Lvsp => "LVSP",
            Parw => "PARW",
            Ench => "ENCH",
            Dial => "DIAL",
            Omod => "OMOD",
            Dobj => "DOBJ",
        }
    }

    /// Maps an on-disk type code (the low six bits of the type byte) to a
    /// kind. The Skyrim table is documented on UESP; Fallout 4 extends it.
    pub fn from_code(game: Game, code: u8) -> Option<RecordKind> {
        use RecordKind::*;
        let common = match code {
            0 => Some(Refr),
            1 => Some(Achr),
            2 => Some(Pmis),
            3 => Some(Pgre),
            4 => Some(Pbea),
            5 => Some(Pfla),
            6 => Some(Cell),
            7 => Some(Info),
            8 => Some(Qust),
            9 => Some(Npc),
            10 => Some(Acti),
            11 => Some(Tact),
            12 => Some(Armo),
            13 => Some(Book),
            14 => Some(Cont),
            15 => Some(Door),
            16 => Some(Ingr),
            17 => Some(Ligh),
            18 => Some(Misc),
            19 => Some(Appa),
            20 => Some(Stat),
            21 => Some(Mstt),
            22 => Some(Furn),
            23 => Some(Weap),
            24 => Some(Ammo),
            25 => Some(Keym),
            26 => Some(Alch),
            27 => Some(Idlm),
            28 => Some(Note),
            29 => Some(Eczn),
            30 => Some(Clas),
            31 => Some(Fact),
            32 => Some(Pack),
            33 => Some(Navm),
            34 => Some(Woop),
            35 => Some(Mgef),
            36 => Some(Smqn),
            37 => Some(Scen),
            38 => Some(Lctn),
            39 => Some(Rela),
            40 => Some(Phzd),
            41 => Some(Pbar),
            42 => Some(Pcon),
            43 => Some(Flst),
            44 => Some(Lvln),
            45 => Some(Lvli),
            46 => Some(Lvsp),
            47 => Some(Parw),
            48 => Some(Ench),
            _ => None,
        };
        match game {
            Game::Fallout4 => common.or(match code {
                49 => Some(Dial),
                50 => Some(Omod),
                51 => Some(Dobj),
                _ => None,
            }),
            _ => common,
        }
    }

    /// Inverse of `from_code`. `None` when the kind does not exist in the
    /// given game's table.
    pub fn code(self, game: Game) -> Option<u8> {
        use RecordKind::*;
        let common = match self {
            Refr => Some(0),
            Achr => Some(1),
            Pmis => Some(2),
            Pgre => Some(3),
            Pbea => Some(4),
            Pfla => Some(5),
            Cell => Some(6),
            Info => Some(7),
            Qust => Some(8),
            Npc => Some(9),
            Acti => Some(10),
            Tact => Some(11),
            Armo => Some(12),
            Book => Some(13),
            Cont => Some(14),
            Door => Some(15),
            Ingr => Some(16),
            Ligh => Some(17),
            Misc => Some(18),
            Appa => Some(19),
            Stat => Some(20),
            Mstt => Some(21),
            Furn => Some(22),
            Weap => Some(23),
            Ammo => Some(24),
            Keym => Some(25),
            Alch => Some(26),
            Idlm => Some(27),
            Note => Some(28),
            Eczn => Some(29),
            Clas => Some(30),
            Fact => Some(31),
            Pack => Some(32),
            Navm => Some(33),
            Woop => Some(34),
            Mgef => Some(35),
            Smqn => Some(36),
            Scen => Some(37),
            Lctn => Some(38),
            Rela => Some(39),
            Phzd => Some(40),
            Pbar => Some(41),
            Pcon => Some(42),
            Flst => Some(43),
            Lvln => Some(44),
            Lvli => Some(45),
            Lvsp => Some(46),
            Parw => Some(47),
            Ench => Some(48),
            Dial | Omod | Dobj => None,
        };
        match (game, self) {
            (Game::Fallout4, Dial) => Some(49),
            (Game::Fallout4, Omod) => Some(50),
            (Game::Fallout4, Dobj) => Some(51),
            _ => common,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Width of the two length fields, encoded in the top two bits of the type
/// byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LengthClass {
    U8,
    U16,
    U32,
}

impl LengthClass {
    fn from_bits(bits: u8) -> Option<LengthClass> {
        match bits {
            0 => Some(LengthClass::U8),
            1 => Some(LengthClass::U16),
            2 => Some(LengthClass::U32),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            LengthClass::U8 => 0,
            LengthClass::U16 => 1,
            LengthClass::U32 => 2,
        }
    }

    fn max_len(self) -> u32 {
        match self {
            LengthClass::U8 => 0xFF,
            LengthClass::U16 => 0xFFFF,
            LengthClass::U32 => 0xFFFF_FFFF,
        }
    }

    fn field_size(self) -> usize {
        match self {
            LengthClass::U8 => 1,
            LengthClass::U16 => 2,
            LengthClass::U32 => 4,
        }
    }

    /// Smallest class whose fields can hold `len`.
    fn for_len(len: u32) -> LengthClass {
        if len <= 0xFF {
            LengthClass::U8
        } else if len <= 0xFFFF {
            LengthClass::U16
        } else {
            LengthClass::U32
        }
    }

    fn read(self, input: &[u8]) -> PResult<u32> {
        match self {
            LengthClass::U8 => {
                let (input, value) = le_u8(input)?;
                Ok((input, u32::from(value)))
            }
            LengthClass::U16 => {
                let (input, value) = le_u16(input)?;
                Ok((input, u32::from(value)))
            }
            LengthClass::U32 => le_u32(input),
        }
    }

    fn put(self, out: &mut Vec<u8>, value: u32) {
        match self {
            LengthClass::U8 => put_u8(out, value as u8),
            LengthClass::U16 => put_u16(out, value as u16),
            LengthClass::U32 => put_u32(out, value),
        }
    }
}

/// The decoded payload of a change form. `Default` is both the fallback for
/// kinds without a decoder and the best-effort answer for bodies that failed
/// to parse.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeFormData {
    FormList(FormListData),
    LeveledList(LeveledListData),
    Reference(RefrData),
    Npc(Box<NpcData>),
    Quest(QuestData),
    Relationship(RelaData),
    Default(Vec<u8>),
}

impl ChangeFormData {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match *self {
            ChangeFormData::FormList(ref data) => data.write(&mut out)?,
            ChangeFormData::LeveledList(ref data) => data.write(&mut out)?,
            ChangeFormData::Reference(ref data) => data.write(&mut out)?,
            ChangeFormData::Npc(ref data) => data.write(&mut out)?,
            ChangeFormData::Quest(ref data) => data.write(&mut out)?,
            ChangeFormData::Relationship(ref data) => data.write(&mut out)?,
            ChangeFormData::Default(ref raw) => out.extend_from_slice(raw),
        }
        Ok(out)
    }
}

impl fmt::Display for ChangeFormData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ChangeFormData::FormList(ref data) => data.fmt(f),
            ChangeFormData::LeveledList(ref data) => data.fmt(f),
            ChangeFormData::Reference(ref data) => data.fmt(f),
            ChangeFormData::Npc(ref data) => data.fmt(f),
            ChangeFormData::Quest(ref data) => data.fmt(f),
            ChangeFormData::Relationship(ref data) => data.fmt(f),
            ChangeFormData::Default(ref raw) => write!(f, "raw body, {} bytes", raw.len()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChangeForm {
    pub refid: RefId,
    pub change_flags: Flags32,
    pub kind: RecordKind,
    pub version: u8,
    length_class: LengthClass,
    /// Stored payload, still compressed when `uncompressed_len > 0`.
    raw: Vec<u8>,
    /// The second length field; non-zero means the payload is a zlib stream
    /// inflating to this many bytes.
    uncompressed_len: u32,
    /// Cache for the decoded body; dropped and refilled by `update_raw`.
    parsed: Option<ChangeFormData>,
}

impl ChangeForm {
    pub fn new(refid: RefId, change_flags: Flags32, kind: RecordKind, version: u8) -> ChangeForm {
        ChangeForm {
            refid,
            change_flags,
            kind,
            version,
            length_class: LengthClass::U8,
            raw: Vec::new(),
            uncompressed_len: 0,
            parsed: None,
        }
    }

    pub fn compressed(&self) -> bool {
        self.uncompressed_len > 0
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Frame size plus stored payload, as it will go to disk.
    pub fn size(&self) -> usize {
        3 + 4 + 1 + 1 + 2 * self.length_class.field_size() + self.raw.len()
    }

    /// The payload with any per-record compression undone.
    pub fn body_bytes(&self) -> Result<Cow<[u8]>> {
        if self.compressed() {
            Ok(Cow::Owned(zlib_inflate(
                &self.raw,
                self.uncompressed_len as usize,
            )?))
        } else {
            Ok(Cow::Borrowed(&self.raw))
        }
    }

    /// Decodes the body without touching the cache. With `best_effort` the
    /// result degrades to `Default` carrying the plain bytes instead of
    /// failing.
    pub fn parse_body(&self, best_effort: bool) -> Result<ChangeFormData> {
        let bytes = self.body_bytes()?;
        match decode_body(&bytes, self.kind, self.change_flags, self.refid) {
            Ok(data) => Ok(data),
            Err(_) if best_effort => Ok(ChangeFormData::Default(bytes.into_owned())),
            // Strict callers still get the raw bytes to display.
            Err(err) => Err(err.with_partial(Partial::ChangeForm(Box::new(
                ChangeFormData::Default(bytes.into_owned()),
            )))),
        }
    }

    /// Decodes the body once and caches it. The cache lives until
    /// `update_raw` replaces it.
    pub fn data(&mut self, best_effort: bool) -> Result<&ChangeFormData> {
        if self.parsed.is_none() {
            self.parsed = Some(self.parse_body(best_effort)?);
        }
        Ok(self.parsed.as_ref().unwrap())
    }

    /// Re-encodes `body` into the stored payload, recompressing if the
    /// record was compressed on disk. Soft-fails with `false`, leaving the
    /// record untouched, so a batch edit can keep going.
    pub fn update_raw(&mut self, body: &ChangeFormData, new_flags: Option<Flags32>) -> bool {
        let encoded = match body.encode() {
            Ok(encoded) => encoded,
            Err(_) => return false,
        };
        let (raw, uncompressed_len) = if self.compressed() {
            match zlib_deflate(&encoded) {
                Ok(deflated) => {
                    let uncompressed_len = match u32::try_from(encoded.len()) {
                        Ok(len) => len,
                        Err(_) => return false,
                    };
                    (deflated, uncompressed_len)
                }
                Err(_) => return false,
            }
        } else {
            (encoded, 0)
        };
        if u32::try_from(raw.len()).is_err() {
            return false;
        }

        self.length_class = self
            .length_class
            .max_class(LengthClass::for_len((raw.len() as u32).max(uncompressed_len)));
        self.raw = raw;
        self.uncompressed_len = uncompressed_len;
        if let Some(flags) = new_flags {
            self.change_flags = flags;
        }
        self.parsed = Some(body.clone());
        true
    }

    pub fn write(&self, out: &mut Vec<u8>, game: Game) -> Result<()> {
        let code = self.kind.code(game).ok_or_else(|| {
            Error::format(format!("{} does not exist in {game:?}", self.kind))
        })?;
        let length1 = self.raw.len() as u32;
        if length1 > self.length_class.max_len() || self.uncompressed_len > self.length_class.max_len() {
            return Err(Error::format(format!(
                "change form payload of {length1} bytes does not fit its length class"
            )));
        }
        put_refid(out, self.refid);
        put_flags32(out, self.change_flags);
        put_u8(out, code | self.length_class.bits() << 6);
        put_u8(out, self.version);
        self.length_class.put(out, length1);
        self.length_class.put(out, self.uncompressed_len);
        out.extend_from_slice(&self.raw);
        Ok(())
    }
}

impl LengthClass {
    fn max_class(self, other: LengthClass) -> LengthClass {
        if other > self {
            other
        } else {
            self
        }
    }
}

fn decode_body(
    bytes: &[u8],
    kind: RecordKind,
    change_flags: Flags32,
    refid: RefId,
) -> Result<ChangeFormData> {
    let total = bytes.len();
    let ensure_empty = |rest: &[u8]| -> Result<()> {
        if rest.is_empty() {
            Ok(())
        } else {
            Err(Error::position_mismatch(
                total as u64,
                (total - rest.len()) as u64,
            ))
        }
    };

    match kind {
        RecordKind::Flst => {
            let (rest, data) = flst::form_list(bytes, change_flags)?;
            ensure_empty(rest)?;
            Ok(ChangeFormData::FormList(data))
        }
        RecordKind::Lvln | RecordKind::Lvli => {
            let (rest, data) = leveled::leveled_list(bytes, change_flags)?;
            ensure_empty(rest)?;
            Ok(ChangeFormData::LeveledList(data))
        }
        RecordKind::Refr | RecordKind::Achr => {
            let is_actor = kind == RecordKind::Achr;
            let (rest, data) = refr::refr_data(bytes, change_flags, refid.kind(), is_actor)?;
            // The reference decoder soaks up leftovers itself.
            ensure_empty(rest)?;
            Ok(ChangeFormData::Reference(data))
        }
        RecordKind::Npc => {
            let (rest, data) = npc::npc_data(bytes, change_flags, false)?;
            ensure_empty(rest)?;
            Ok(ChangeFormData::Npc(Box::new(data)))
        }
        RecordKind::Qust => {
            let (rest, data) = qust::quest_data(bytes, change_flags)?;
            ensure_empty(rest)?;
            Ok(ChangeFormData::Quest(data))
        }
        RecordKind::Rela => {
            let (rest, data) = rela::rela_data(bytes, change_flags, refid.kind())?;
            ensure_empty(rest)?;
            Ok(ChangeFormData::Relationship(data))
        }
        _ => Ok(ChangeFormData::Default(bytes.to_vec())),
    }
}

pub fn change_form(input: &[u8], game: Game) -> PResult<ChangeForm> {
    let (input, refid) = refid(input)?;
    let (input, change_flags) = flags32(input)?;
    let (input, type_field) = le_u8(input)?;
    let (input, version) = le_u8(input)?;

    let length_class = LengthClass::from_bits(type_field >> 6).ok_or_else(|| {
        Error::format(format!(
            "invalid change form length class in type byte {type_field:#04x}"
        ))
        .fail()
    })?;
    let code = type_field & 0x3F;
    let kind = RecordKind::from_code(game, code).ok_or_else(|| {
        Error::format(format!("unknown change form type code {code} for {game:?}")).fail()
    })?;

    let (input, length1) = length_class.read(input)?;
    let (input, length2) = length_class.read(input)?;
    let (input, raw) = take(length1 as usize)(input)?;

    Ok((
        input,
        ChangeForm {
            refid,
            change_flags,
            kind,
            version,
            length_class,
            raw: raw.to_vec(),
            uncompressed_len: length2,
            parsed: None,
        },
    ))
}
