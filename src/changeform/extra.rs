//! The extra-data stream hanging off placed references and inventory items.
//!
//! A vsval count followed by tagged records. The tag byte selects one of the
//! engine's extra-data kinds; the save only ever contains the subset below,
//! but the enum in the executable is longer and grows with patches, so an
//! unknown tag is reported with everything decoded up to it instead of being
//! skipped. There is no length prefix on an entry — if we cannot decode one,
//! we cannot resynchronise, which is why the partial matters.

use nom::number::complete::{le_f32, le_i32, le_i8, le_u16, le_u32, le_u8};

use crate::error::{Error, Partial, PResult, Result};
use crate::flags::{flags32, flags8, put_flags32, put_flags8, Flags32, Flags8};
use crate::primitives::{
    put_f32, put_i32, put_i8, put_u16, put_u32, put_u8, put_vsval, put_wstring, vsval, wstring,
    WString,
};
use crate::refid::{put_refid, refid, RefId};

use super::npc::{npc_data, NpcData};

/// Hard cap on entries in one stream; anything larger is corruption.
pub const MAX_EXTRA_DATA: u32 = 1024;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtraDataList {
    pub entries: Vec<ExtraData>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunOncePack {
    pub package: RefId,
    pub flag: u8,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Crime {
    pub value: u32,
    pub criminal: RefId,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActivateParent {
    pub reference: RefId,
    pub delay: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FactionChange {
    pub faction: RefId,
    pub rank: i8,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AliasInstance {
    pub quest: RefId,
    pub alias: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExtraData {
    Havok { data: Vec<u8> },                                              // 1
    Cell3D { value: u32 },                                                // 2
    CellWaterType { water: RefId },                                       // 3
    RegionList { regions: Vec<RefId> },                                   // 4
    SeenData { data: Vec<u8> },                                           // 5
    EditorId { id: WString },                                             // 6
    CellMusicType { music: RefId },                                       // 7
    CellSkyRegion { region: RefId },                                      // 8
    ProcessMiddleLow { value: u32 },                                      // 9
    DetachTime { time: u32 },                                             // 10
    PersistentCell { cell: RefId },                                       // 11
    Action { action: u32 },                                               // 13
    StartingPosition { pos: [f32; 3], rot: [f32; 3], cell: RefId },       // 14
    AnimGraphManager { data: Vec<u8> },                                   // 16
    UsedMarkers { data: Vec<u8> },                                        // 18
    RagdollData { data: Vec<u8> },                                        // 20
    ContainerChanges { container: RefId },                                // 21
    Worn,                                                                 // 22
    WornLeft,                                                             // 23
    PackageStartLocation { package: RefId, pos: [f32; 3], unknown: f32 }, // 24
    Package { package: RefId, unknown1: u32, unknown2: u32 },             // 25
    TrespassPackage { package: RefId },                                   // 26
    RunOncePacks { packs: Vec<RunOncePack> },                             // 27
    ReferenceHandle { reference: RefId },                                 // 28
    Follower { leader: RefId },                                           // 29
    LevCreaModifier { modifier: u32 },                                    // 30
    Ghost { flag: u8 },                                                   // 31
    OriginalReference { reference: RefId },                               // 32
    Ownership { owner: RefId },                                           // 33
    Global { global: RefId },                                             // 34
    Rank { rank: i32 },                                                   // 35
    Count { count: u16 },                                                 // 36
    Health { health: f32 },                                               // 37
    TimeLeft { time: u32 },                                               // 39
    Charge { charge: f32 },                                               // 40
    Light { light: RefId },                                               // 41
    Lock { level: i8, key: RefId, flags: Flags8 },                        // 42
    Teleport { pos: [f32; 3], rot: [f32; 3], flag: u8, destination: RefId }, // 43
    MapMarker { flag: u8 },                                               // 44
    LeveledCreature { reference: RefId, base: RefId, flags: Flags32, npc: Box<NpcData> }, // 45
    LeveledItem { item: RefId, unknown: u32 },                            // 46
    Scale { scale: f32 },                                                 // 47
    Seed { seed: u32 },                                                   // 48
    MagicCaster { data: Vec<u8> },                                        // 49
    MagicTarget { data: Vec<u8> },                                        // 50
    PlayerCrimeList { crimes: Vec<Crime> },                               // 52
    ItemDropper { dropper: RefId },                                       // 54
    ActivateRef { parents: Vec<ActivateParent>, flag: u8 },               // 56
    ActivateRefChildren { children: Vec<RefId> },                         // 57
    CanTalkToPlayer { flag: u8 },                                         // 58
    ObjectHealth { health: f32 },                                         // 59
    CellImageSpace { space: RefId },                                      // 61
    NavMeshPortal { from: u32, to: u32 },                                 // 62
    Radius { radius: f32 },                                               // 64
    FactionChanges { changes: Vec<FactionChange> },                       // 66
    DismemberedLimbs { data: Vec<u8> },                                   // 67
    ActorCause { cause: u32 },                                            // 68
    MultiBound { bound: RefId },                                          // 70
    MultiBoundRef { reference: RefId },                                   // 72
    ReflectedRefs { refs: Vec<RefId> },                                   // 74
    ReflectorRefs { refs: Vec<RefId> },                                   // 75
    EmittanceSource { source: RefId },                                    // 76
    CombatStyle { style: RefId },                                         // 78
    OpenCloseActivateRef { reference: RefId },                            // 81
    Ammo { ammo: RefId, count: u32 },                                     // 83
    SayTopicInfoOnceADay { topic: RefId, unknown1: u32, unknown2: u32 },  // 88
    EncounterZone { zone: RefId },                                        // 89
    CreatureAwakeSound { sound: RefId },                                  // 93
    Horse { horse: RefId },                                               // 95
    IgnoredBySandbox,                                                     // 96
    CellAcousticSpace { space: RefId },                                   // 99
    AliasInstanceArray { aliases: Vec<AliasInstance> },                   // 102
    Location { location: RefId },                                         // 103
    LocationRefType { kind: RefId },                                      // 106
    PromotedRef { refs: Vec<RefId> },                                     // 107
    AshPileRef { reference: RefId },                                      // 108
    FollowerSwimBreadcrumbs { unknown: u32, reference: RefId, pos: [f32; 3] }, // 111
    Flags { flags: Flags32 },                                             // 133
}

impl ExtraData {
    pub fn tag(&self) -> u8 {
        use ExtraData::*;
        match *self {
            Havok { .. } => 1,
            Cell3D { .. } => 2,
            CellWaterType { .. } => 3,
            RegionList { .. } => 4,
            SeenData { .. } => 5,
            EditorId { .. } => 6,
            CellMusicType { .. } => 7,
            CellSkyRegion { .. } => 8,
            ProcessMiddleLow { .. } => 9,
            DetachTime { .. } => 10,
            PersistentCell { .. } => 11,
            Action { .. } => 13,
            StartingPosition { .. } => 14,
            AnimGraphManager { .. } => 16,
            UsedMarkers { .. } => 18,
            RagdollData { .. } => 20,
            ContainerChanges { .. } => 21,
            Worn => 22,
            WornLeft => 23,
            PackageStartLocation { .. } => 24,
            Package { .. } => 25,
            TrespassPackage { .. } => 26,
            RunOncePacks { .. } => 27,
            ReferenceHandle { .. } => 28,
            Follower { .. } => 29,
            LevCreaModifier { .. } => 30,
            Ghost { .. } => 31,
            OriginalReference { .. } => 32,
            Ownership { .. } => 33,
            Global { .. } => 34,
            Rank { .. } => 35,
            Count { .. } => 36,
            Health { .. } => 37,
            TimeLeft { .. } => 39,
            Charge { .. } => 40,
            Light { .. } => 41,
            Lock { .. } => 42,
            Teleport { .. } => 43,
            MapMarker { .. } => 44,
            LeveledCreature { .. } => 45,
            LeveledItem { .. } => 46,
            Scale { .. } => 47,
            Seed { .. } => 48,
            MagicCaster { .. } => 49,
            MagicTarget { .. } => 50,
            PlayerCrimeList { .. } => 52,
            ItemDropper { .. } => 54,
            ActivateRef { .. } => 56,
            ActivateRefChildren { .. } => 57,
            CanTalkToPlayer { .. } => 58,
            ObjectHealth { .. } => 59,
            CellImageSpace { .. } => 61,
            NavMeshPortal { .. } => 62,
            Radius { .. } => 64,
            FactionChanges { .. } => 66,
            DismemberedLimbs { .. } => 67,
            ActorCause { .. } => 68,
            MultiBound { .. } => 70,
            MultiBoundRef { .. } => 72,
            ReflectedRefs { .. } => 74,
            ReflectorRefs { .. } => 75,
            EmittanceSource { .. } => 76,
            CombatStyle { .. } => 78,
            OpenCloseActivateRef { .. } => 81,
            Ammo { .. } => 83,
            SayTopicInfoOnceADay { .. } => 88,
            EncounterZone { .. } => 89,
            CreatureAwakeSound { .. } => 93,
            Horse { .. } => 95,
            IgnoredBySandbox => 96,
            CellAcousticSpace { .. } => 99,
            AliasInstanceArray { .. } => 102,
            Location { .. } => 103,
            LocationRefType { .. } => 106,
            PromotedRef { .. } => 107,
            AshPileRef { .. } => 108,
            FollowerSwimBreadcrumbs { .. } => 111,
            Flags { .. } => 133,
        }
    }

    pub fn name(&self) -> &'static str {
        use ExtraData::*;
        match *self {
            Havok { .. } => "Havok",
            Cell3D { .. } => "Cell3D",
            CellWaterType { .. } => "CellWaterType",
            RegionList { .. } => "RegionList",
            SeenData { .. } => "SeenData",
            EditorId { .. } => "EditorId",
            CellMusicType { .. } => "CellMusicType",
            CellSkyRegion { .. } => "CellSkyRegion",
            ProcessMiddleLow { .. } => "ProcessMiddleLow",
            DetachTime { .. } => "DetachTime",
            PersistentCell { .. } => "PersistentCell",
            Action { .. } => "Action",
            StartingPosition { .. } => "StartingPosition",
            AnimGraphManager { .. } => "AnimGraphManager",
            UsedMarkers { .. } => "UsedMarkers",
            RagdollData { .. } => "RagdollData",
            ContainerChanges { .. } => "ContainerChanges",
            Worn => "Worn",
            WornLeft => "WornLeft",
            PackageStartLocation { .. } => "PackageStartLocation",
            Package { .. } => "Package",
            TrespassPackage { .. } => "TrespassPackage",
            RunOncePacks { .. } => "RunOncePacks",
            ReferenceHandle { .. } => "ReferenceHandle",
            Follower { .. } => "Follower",
            LevCreaModifier { .. } => "LevCreaModifier",
            Ghost { .. } => "Ghost",
            OriginalReference { .. } => "OriginalReference",
            Ownership { .. } => "Ownership",
            Global { .. } => "Global",
            Rank { .. } => "Rank",
            Count { .. } => "Count",
            Health { .. } => "Health",
            TimeLeft { .. } => "TimeLeft",
            Charge { .. } => "Charge",
            Light { .. } => "Light",
            Lock { .. } => "Lock",
            Teleport { .. } => "Teleport",
            MapMarker { .. } => "MapMarker",
            LeveledCreature { .. } => "LeveledCreature",
            LeveledItem { .. } => "LeveledItem",
            Scale { .. } => "Scale",
            Seed { .. } => "Seed",
            MagicCaster { .. } => "MagicCaster",
            MagicTarget { .. } => "MagicTarget",
            PlayerCrimeList { .. } => "PlayerCrimeList",
            ItemDropper { .. } => "ItemDropper",
            ActivateRef { .. } => "ActivateRef",
            ActivateRefChildren { .. } => "ActivateRefChildren",
            CanTalkToPlayer { .. } => "CanTalkToPlayer",
            ObjectHealth { .. } => "ObjectHealth",
            CellImageSpace { .. } => "CellImageSpace",
            NavMeshPortal { .. } => "NavMeshPortal",
            Radius { .. } => "Radius",
            FactionChanges { .. } => "FactionChanges",
            DismemberedLimbs { .. } => "DismemberedLimbs",
            ActorCause { .. } => "ActorCause",
            MultiBound { .. } => "MultiBound",
            MultiBoundRef { .. } => "MultiBoundRef",
            ReflectedRefs { .. } => "ReflectedRefs",
            ReflectorRefs { .. } => "ReflectorRefs",
            EmittanceSource { .. } => "EmittanceSource",
            CombatStyle { .. } => "CombatStyle",
            OpenCloseActivateRef { .. } => "OpenCloseActivateRef",
            Ammo { .. } => "Ammo",
            SayTopicInfoOnceADay { .. } => "SayTopicInfoOnceADay",
            EncounterZone { .. } => "EncounterZone",
            CreatureAwakeSound { .. } => "CreatureAwakeSound",
            Horse { .. } => "Horse",
            IgnoredBySandbox => "IgnoredBySandbox",
            CellAcousticSpace { .. } => "CellAcousticSpace",
            AliasInstanceArray { .. } => "AliasInstanceArray",
            Location { .. } => "Location",
            LocationRefType { .. } => "LocationRefType",
            PromotedRef { .. } => "PromotedRef",
            AshPileRef { .. } => "AshPileRef",
            FollowerSwimBreadcrumbs { .. } => "FollowerSwimBreadcrumbs",
            Flags { .. } => "Flags",
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        use ExtraData::*;
        put_u8(out, self.tag());
        match *self {
            Havok { ref data }
            | SeenData { ref data }
            | AnimGraphManager { ref data }
            | UsedMarkers { ref data }
            | RagdollData { ref data }
            | MagicCaster { ref data }
            | MagicTarget { ref data }
            | DismemberedLimbs { ref data } => {
                put_vsval(out, data.len() as u32)?;
                out.extend_from_slice(data);
            }
            Cell3D { value } | ProcessMiddleLow { value } => put_u32(out, value),
            CellWaterType { water: form }
            | CellMusicType { music: form }
            | CellSkyRegion { region: form }
            | PersistentCell { cell: form }
            | ContainerChanges { container: form }
            | TrespassPackage { package: form }
            | ReferenceHandle { reference: form }
            | Follower { leader: form }
            | OriginalReference { reference: form }
            | Ownership { owner: form }
            | Global { global: form }
            | Light { light: form }
            | ItemDropper { dropper: form }
            | CellImageSpace { space: form }
            | MultiBound { bound: form }
            | MultiBoundRef { reference: form }
            | EmittanceSource { source: form }
            | CombatStyle { style: form }
            | OpenCloseActivateRef { reference: form }
            | EncounterZone { zone: form }
            | CreatureAwakeSound { sound: form }
            | Horse { horse: form }
            | CellAcousticSpace { space: form }
            | Location { location: form }
            | LocationRefType { kind: form }
            | AshPileRef { reference: form } => put_refid(out, form),
            RegionList { ref regions } => put_refid_vsval_array(out, regions)?,
            EditorId { ref id } => put_wstring(out, id)?,
            DetachTime { time } | TimeLeft { time } => put_u32(out, time),
            Action { action } => put_u32(out, action),
            StartingPosition { pos, rot, cell } => {
                put_f32_triplet(out, pos);
                put_f32_triplet(out, rot);
                put_refid(out, cell);
            }
            Worn | WornLeft | IgnoredBySandbox => {}
            PackageStartLocation { package, pos, unknown } => {
                put_refid(out, package);
                put_f32_triplet(out, pos);
                put_f32(out, unknown);
            }
            Package {
                package,
                unknown1,
                unknown2,
            } => {
                put_refid(out, package);
                put_u32(out, unknown1);
                put_u32(out, unknown2);
            }
            RunOncePacks { ref packs } => {
                put_vsval(out, packs.len() as u32)?;
                for pack in packs {
                    put_refid(out, pack.package);
                    put_u8(out, pack.flag);
                }
            }
            LevCreaModifier { modifier } => put_u32(out, modifier),
            Ghost { flag } | MapMarker { flag } | CanTalkToPlayer { flag } => put_u8(out, flag),
            Rank { rank } => put_i32(out, rank),
            Count { count } => put_u16(out, count),
            Health { health } | ObjectHealth { health } => put_f32(out, health),
            Charge { charge } => put_f32(out, charge),
            Lock { level, key, flags } => {
                put_i8(out, level);
                put_refid(out, key);
                put_flags8(out, flags);
            }
            Teleport {
                pos,
                rot,
                flag,
                destination,
            } => {
                put_f32_triplet(out, pos);
                put_f32_triplet(out, rot);
                put_u8(out, flag);
                put_refid(out, destination);
            }
            LeveledCreature {
                reference,
                base,
                flags,
                ref npc,
            } => {
                put_refid(out, reference);
                put_refid(out, base);
                put_flags32(out, flags);
                npc.write(out)?;
            }
            LeveledItem { item, unknown } => {
                put_refid(out, item);
                put_u32(out, unknown);
            }
            Scale { scale } => put_f32(out, scale),
            Seed { seed } => put_u32(out, seed),
            PlayerCrimeList { ref crimes } => {
                put_vsval(out, crimes.len() as u32)?;
                for crime in crimes {
                    put_u32(out, crime.value);
                    put_refid(out, crime.criminal);
                }
            }
            ActivateRef { ref parents, flag } => {
                put_vsval(out, parents.len() as u32)?;
                for parent in parents {
                    put_refid(out, parent.reference);
                    put_f32(out, parent.delay);
                }
                put_u8(out, flag);
            }
            ActivateRefChildren { ref children } => put_refid_vsval_array(out, children)?,
            NavMeshPortal { from, to } => {
                put_u32(out, from);
                put_u32(out, to);
            }
            Radius { radius } => put_f32(out, radius),
            FactionChanges { ref changes } => {
                put_vsval(out, changes.len() as u32)?;
                for change in changes {
                    put_refid(out, change.faction);
                    put_i8(out, change.rank);
                }
            }
            ActorCause { cause } => put_u32(out, cause),
            ReflectedRefs { ref refs } | ReflectorRefs { ref refs } | PromotedRef { ref refs } => {
                put_refid_vsval_array(out, refs)?
            }
            Ammo { ammo, count } => {
                put_refid(out, ammo);
                put_u32(out, count);
            }
            SayTopicInfoOnceADay {
                topic,
                unknown1,
                unknown2,
            } => {
                put_refid(out, topic);
                put_u32(out, unknown1);
                put_u32(out, unknown2);
            }
            AliasInstanceArray { ref aliases } => {
                put_vsval(out, aliases.len() as u32)?;
                for alias in aliases {
                    put_refid(out, alias.quest);
                    put_u32(out, alias.alias);
                }
            }
            FollowerSwimBreadcrumbs {
                unknown,
                reference,
                pos,
            } => {
                put_u32(out, unknown);
                put_refid(out, reference);
                put_f32_triplet(out, pos);
            }
            Flags { flags } => put_flags32(out, flags),
        }
        Ok(())
    }
}

impl std::fmt::Display for ExtraData {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} (type {})", self.name(), self.tag())
    }
}

fn put_f32_triplet(out: &mut Vec<u8>, values: [f32; 3]) {
    for value in values {
        put_f32(out, value);
    }
}

fn put_refid_vsval_array(out: &mut Vec<u8>, forms: &[RefId]) -> Result<()> {
    put_vsval(out, forms.len() as u32)?;
    for &form in forms {
        put_refid(out, form);
    }
    Ok(())
}

fn f32_triplet(input: &[u8]) -> PResult<[f32; 3]> {
    let (input, a) = le_f32(input)?;
    let (input, b) = le_f32(input)?;
    let (input, c) = le_f32(input)?;
    Ok((input, [a, b, c]))
}

fn vsval_blob(input: &[u8]) -> PResult<Vec<u8>> {
    let (input, len) = vsval(input)?;
    let (input, data) = nom::bytes::complete::take(len as usize)(input)?;
    Ok((input, data.to_vec()))
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

pub fn extra_data(input: &[u8]) -> PResult<ExtraData> {
    let (input, tag) = le_u8(input)?;
    match tag {
        1 => map_blob(input, |data| ExtraData::Havok { data }),
        2 => {
            let (input, value) = le_u32(input)?;
            Ok((input, ExtraData::Cell3D { value }))
        }
        3 => map_refid(input, |water| ExtraData::CellWaterType { water }),
        4 => {
            let (input, regions) = refid_vsval_array(input)?;
            Ok((input, ExtraData::RegionList { regions }))
        }
        5 => map_blob(input, |data| ExtraData::SeenData { data }),
        6 => {
            let (input, id) = wstring(input)?;
            Ok((input, ExtraData::EditorId { id }))
        }
        7 => map_refid(input, |music| ExtraData::CellMusicType { music }),
        8 => map_refid(input, |region| ExtraData::CellSkyRegion { region }),
        9 => {
            let (input, value) = le_u32(input)?;
            Ok((input, ExtraData::ProcessMiddleLow { value }))
        }
        10 => {
            let (input, time) = le_u32(input)?;
            Ok((input, ExtraData::DetachTime { time }))
        }
        11 => map_refid(input, |cell| ExtraData::PersistentCell { cell }),
        13 => {
            let (input, action) = le_u32(input)?;
            Ok((input, ExtraData::Action { action }))
        }
        14 => {
            let (input, pos) = f32_triplet(input)?;
            let (input, rot) = f32_triplet(input)?;
            let (input, cell) = refid(input)?;
            Ok((input, ExtraData::StartingPosition { pos, rot, cell }))
        }
        16 => map_blob(input, |data| ExtraData::AnimGraphManager { data }),
        18 => map_blob(input, |data| ExtraData::UsedMarkers { data }),
        20 => map_blob(input, |data| ExtraData::RagdollData { data }),
        21 => map_refid(input, |container| ExtraData::ContainerChanges { container }),
        22 => Ok((input, ExtraData::Worn)),
        23 => Ok((input, ExtraData::WornLeft)),
        24 => {
            let (input, package) = refid(input)?;
            let (input, pos) = f32_triplet(input)?;
            let (input, unknown) = le_f32(input)?;
            Ok((
                input,
                ExtraData::PackageStartLocation { package, pos, unknown },
            ))
        }
        25 => {
            let (input, package) = refid(input)?;
            let (input, unknown1) = le_u32(input)?;
            let (input, unknown2) = le_u32(input)?;
            Ok((
                input,
                ExtraData::Package {
                    package,
                    unknown1,
                    unknown2,
                },
            ))
        }
        26 => map_refid(input, |package| ExtraData::TrespassPackage { package }),
        27 => {
            let (mut input, count) = vsval(input)?;
            let mut packs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (rest, package) = refid(input)?;
                let (rest, flag) = le_u8(rest)?;
                packs.push(RunOncePack { package, flag });
                input = rest;
            }
            Ok((input, ExtraData::RunOncePacks { packs }))
        }
        28 => map_refid(input, |reference| ExtraData::ReferenceHandle { reference }),
        29 => map_refid(input, |leader| ExtraData::Follower { leader }),
        30 => {
            let (input, modifier) = le_u32(input)?;
            Ok((input, ExtraData::LevCreaModifier { modifier }))
        }
        31 => {
            let (input, flag) = le_u8(input)?;
            Ok((input, ExtraData::Ghost { flag }))
        }
        32 => map_refid(input, |reference| ExtraData::OriginalReference { reference }),
        33 => map_refid(input, |owner| ExtraData::Ownership { owner }),
        34 => map_refid(input, |global| ExtraData::Global { global }),
        35 => {
            let (input, rank) = le_i32(input)?;
            Ok((input, ExtraData::Rank { rank }))
        }
        36 => {
            let (input, count) = le_u16(input)?;
            Ok((input, ExtraData::Count { count }))
        }
        37 => {
            let (input, health) = le_f32(input)?;
            Ok((input, ExtraData::Health { health }))
        }
        39 => {
            let (input, time) = le_u32(input)?;
            Ok((input, ExtraData::TimeLeft { time }))
        }
        40 => {
            let (input, charge) = le_f32(input)?;
            Ok((input, ExtraData::Charge { charge }))
        }
        41 => map_refid(input, |light| ExtraData::Light { light }),
        42 => {
            let (input, level) = le_i8(input)?;
            let (input, key) = refid(input)?;
            let (input, flags) = flags8(input)?;
            Ok((input, ExtraData::Lock { level, key, flags }))
        }
        43 => {
            let (input, pos) = f32_triplet(input)?;
            let (input, rot) = f32_triplet(input)?;
            let (input, flag) = le_u8(input)?;
            let (input, destination) = refid(input)?;
            Ok((
                input,
                ExtraData::Teleport {
                    pos,
                    rot,
                    flag,
                    destination,
                },
            ))
        }
        44 => {
            let (input, flag) = le_u8(input)?;
            Ok((input, ExtraData::MapMarker { flag }))
        }
        45 => {
            let (input, reference) = refid(input)?;
            let (input, base) = refid(input)?;
            let (input, flags) = flags32(input)?;
            // The embedded actor uses the flag word we just read and must
            // not eat whatever extra data follows it.
            let (input, npc) = npc_data(input, flags, true)?;
            Ok((
                input,
                ExtraData::LeveledCreature {
                    reference,
                    base,
                    flags,
                    npc: Box::new(npc),
                },
            ))
        }
        46 => {
            let (input, item) = refid(input)?;
            let (input, unknown) = le_u32(input)?;
            Ok((input, ExtraData::LeveledItem { item, unknown }))
        }
        47 => {
            let (input, scale) = le_f32(input)?;
            Ok((input, ExtraData::Scale { scale }))
        }
        48 => {
            let (input, seed) = le_u32(input)?;
            Ok((input, ExtraData::Seed { seed }))
        }
        49 => map_blob(input, |data| ExtraData::MagicCaster { data }),
        50 => map_blob(input, |data| ExtraData::MagicTarget { data }),
        52 => {
            let (mut input, count) = vsval(input)?;
            let mut crimes = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (rest, value) = le_u32(input)?;
                let (rest, criminal) = refid(rest)?;
                crimes.push(Crime { value, criminal });
                input = rest;
            }
            Ok((input, ExtraData::PlayerCrimeList { crimes }))
        }
        54 => map_refid(input, |dropper| ExtraData::ItemDropper { dropper }),
        56 => {
            let (mut input, count) = vsval(input)?;
            let mut parents = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (rest, reference) = refid(input)?;
                let (rest, delay) = le_f32(rest)?;
                parents.push(ActivateParent { reference, delay });
                input = rest;
            }
            let (input, flag) = le_u8(input)?;
            Ok((input, ExtraData::ActivateRef { parents, flag }))
        }
        57 => {
            let (input, children) = refid_vsval_array(input)?;
            Ok((input, ExtraData::ActivateRefChildren { children }))
        }
        58 => {
            let (input, flag) = le_u8(input)?;
            Ok((input, ExtraData::CanTalkToPlayer { flag }))
        }
        59 => {
            let (input, health) = le_f32(input)?;
            Ok((input, ExtraData::ObjectHealth { health }))
        }
        61 => map_refid(input, |space| ExtraData::CellImageSpace { space }),
        62 => {
            let (input, from) = le_u32(input)?;
            let (input, to) = le_u32(input)?;
            Ok((input, ExtraData::NavMeshPortal { from, to }))
        }
        64 => {
            let (input, radius) = le_f32(input)?;
            Ok((input, ExtraData::Radius { radius }))
        }
        66 => {
            let (mut input, count) = vsval(input)?;
            let mut changes = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (rest, faction) = refid(input)?;
                let (rest, rank) = le_i8(rest)?;
                changes.push(FactionChange { faction, rank });
                input = rest;
            }
            Ok((input, ExtraData::FactionChanges { changes }))
        }
        67 => map_blob(input, |data| ExtraData::DismemberedLimbs { data }),
        68 => {
            let (input, cause) = le_u32(input)?;
            Ok((input, ExtraData::ActorCause { cause }))
        }
        70 => map_refid(input, |bound| ExtraData::MultiBound { bound }),
        72 => map_refid(input, |reference| ExtraData::MultiBoundRef { reference }),
        74 => {
            let (input, refs) = refid_vsval_array(input)?;
            Ok((input, ExtraData::ReflectedRefs { refs }))
        }
        75 => {
            let (input, refs) = refid_vsval_array(input)?;
            Ok((input, ExtraData::ReflectorRefs { refs }))
        }
        76 => map_refid(input, |source| ExtraData::EmittanceSource { source }),
        78 => map_refid(input, |style| ExtraData::CombatStyle { style }),
        81 => map_refid(input, |reference| ExtraData::OpenCloseActivateRef { reference }),
        83 => {
            let (input, ammo) = refid(input)?;
            let (input, count) = le_u32(input)?;
            Ok((input, ExtraData::Ammo { ammo, count }))
        }
        88 => {
            let (input, topic) = refid(input)?;
            let (input, unknown1) = le_u32(input)?;
            let (input, unknown2) = le_u32(input)?;
            Ok((
                input,
                ExtraData::SayTopicInfoOnceADay {
                    topic,
                    unknown1,
                    unknown2,
                },
            ))
        }
        89 => map_refid(input, |zone| ExtraData::EncounterZone { zone }),
        93 => map_refid(input, |sound| ExtraData::CreatureAwakeSound { sound }),
        95 => map_refid(input, |horse| ExtraData::Horse { horse }),
        96 => Ok((input, ExtraData::IgnoredBySandbox)),
        99 => map_refid(input, |space| ExtraData::CellAcousticSpace { space }),
        102 => {
            let (mut input, count) = vsval(input)?;
            let mut aliases = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (rest, quest) = refid(input)?;
                let (rest, alias) = le_u32(rest)?;
                aliases.push(AliasInstance { quest, alias });
                input = rest;
            }
            Ok((input, ExtraData::AliasInstanceArray { aliases }))
        }
        103 => map_refid(input, |location| ExtraData::Location { location }),
        106 => map_refid(input, |kind| ExtraData::LocationRefType { kind }),
        107 => {
            let (input, refs) = refid_vsval_array(input)?;
            Ok((input, ExtraData::PromotedRef { refs }))
        }
        108 => map_refid(input, |reference| ExtraData::AshPileRef { reference }),
        111 => {
            let (input, unknown) = le_u32(input)?;
            let (input, reference) = refid(input)?;
            let (input, pos) = f32_triplet(input)?;
            Ok((
                input,
                ExtraData::FollowerSwimBreadcrumbs {
                    unknown,
                    reference,
                    pos,
                },
            ))
        }
        133 => {
            let (input, flags) = flags32(input)?;
            Ok((input, ExtraData::Flags { flags }))
        }
        unknown => Err(Error::unknown_variant("ExtraData", u32::from(unknown)).fail()),
    }
}

fn map_blob(input: &[u8], build: impl FnOnce(Vec<u8>) -> ExtraData) -> PResult<ExtraData> {
    let (input, data) = vsval_blob(input)?;
    Ok((input, build(data)))
}

fn map_refid(input: &[u8], build: impl FnOnce(RefId) -> ExtraData) -> PResult<ExtraData> {
    let (input, form) = refid(input)?;
    Ok((input, build(form)))
}

impl ExtraDataList {
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        put_vsval(out, self.entries.len() as u32)?;
        for entry in &self.entries {
            entry.write(out)?;
        }
        Ok(())
    }
}

pub fn extra_data_list(input: &[u8]) -> PResult<ExtraDataList> {
    let (mut input, count) = vsval(input)?;
    if count > MAX_EXTRA_DATA {
        return Err(Error::format(format!(
            "extra data stream claims {count} entries, the cap is {MAX_EXTRA_DATA}"
        ))
        .fail());
    }
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match extra_data(input) {
            Ok((rest, entry)) => {
                entries.push(entry);
                input = rest;
            }
            Err(err) => {
                // Entries have no length prefix, so one bad record ends the
                // stream. Hand back what decoded cleanly.
                return Err(err.map(|e| e.with_partial(Partial::ExtraData(entries))));
            }
        }
    }
    Ok((input, ExtraDataList { entries }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn rid(raw: u32) -> RefId {
        RefId::from_raw(raw).unwrap()
    }

    fn roundtrip(entry: ExtraData) {
        let mut out = Vec::new();
        entry.write(&mut out).unwrap();
        let (rest, decoded) = extra_data(&out).unwrap();
        assert!(rest.is_empty(), "{} left bytes over", entry.name());
        assert_eq!(decoded, entry);
    }

    #[test]
    fn representative_entries_roundtrip() {
        roundtrip(ExtraData::Worn);
        roundtrip(ExtraData::Havok {
            data: vec![1, 2, 3, 4],
        });
        roundtrip(ExtraData::EditorId {
            id: WString::from("MyMarker"),
        });
        roundtrip(ExtraData::Ownership {
            owner: rid(0x40_1234),
        });
        roundtrip(ExtraData::Count { count: 12 });
        roundtrip(ExtraData::Lock {
            level: -1,
            key: rid(0x00_0002),
            flags: Flags8(2),
        });
        roundtrip(ExtraData::Teleport {
            pos: [1.0, 2.0, 3.0],
            rot: [0.0, 0.5, 1.5],
            flag: 1,
            destination: rid(0x00_0009),
        });
        roundtrip(ExtraData::RunOncePacks {
            packs: vec![RunOncePack {
                package: rid(0x40_0001),
                flag: 1,
            }],
        });
        roundtrip(ExtraData::AliasInstanceArray {
            aliases: vec![AliasInstance {
                quest: rid(0x40_0002),
                alias: 7,
            }],
        });
        roundtrip(ExtraData::FollowerSwimBreadcrumbs {
            unknown: 3,
            reference: rid(0x00_0004),
            pos: [9.0, 8.0, 7.0],
        });
    }

    #[test]
    fn the_whole_catalogue_roundtrips() {
        let entries = vec![
            ExtraData::Havok { data: vec![1] },
            ExtraData::Cell3D { value: 2 },
            ExtraData::CellWaterType { water: rid(3) },
            ExtraData::RegionList {
                regions: vec![rid(4), rid(5)],
            },
            ExtraData::SeenData { data: vec![6; 6] },
            ExtraData::EditorId {
                id: WString::from("Ed"),
            },
            ExtraData::CellMusicType { music: rid(7) },
            ExtraData::CellSkyRegion { region: rid(8) },
            ExtraData::ProcessMiddleLow { value: 9 },
            ExtraData::DetachTime { time: 10 },
            ExtraData::PersistentCell { cell: rid(11) },
            ExtraData::Action { action: 13 },
            ExtraData::StartingPosition {
                pos: [1.0, 2.0, 3.0],
                rot: [4.0, 5.0, 6.0],
                cell: rid(14),
            },
            ExtraData::AnimGraphManager { data: vec![16] },
            ExtraData::UsedMarkers { data: vec![18] },
            ExtraData::RagdollData { data: vec![20; 3] },
            ExtraData::ContainerChanges { container: rid(21) },
            ExtraData::Worn,
            ExtraData::WornLeft,
            ExtraData::PackageStartLocation {
                package: rid(24),
                pos: [0.0; 3],
                unknown: 0.5,
            },
            ExtraData::Package {
                package: rid(25),
                unknown1: 1,
                unknown2: 2,
            },
            ExtraData::TrespassPackage { package: rid(26) },
            ExtraData::RunOncePacks {
                packs: vec![RunOncePack {
                    package: rid(27),
                    flag: 1,
                }],
            },
            ExtraData::ReferenceHandle { reference: rid(28) },
            ExtraData::Follower { leader: rid(29) },
            ExtraData::LevCreaModifier { modifier: 30 },
            ExtraData::Ghost { flag: 1 },
            ExtraData::OriginalReference { reference: rid(32) },
            ExtraData::Ownership { owner: rid(33) },
            ExtraData::Global { global: rid(34) },
            ExtraData::Rank { rank: -35 },
            ExtraData::Count { count: 36 },
            ExtraData::Health { health: 37.0 },
            ExtraData::TimeLeft { time: 39 },
            ExtraData::Charge { charge: 40.0 },
            ExtraData::Light { light: rid(41) },
            ExtraData::Lock {
                level: 42,
                key: rid(42),
                flags: Flags8(1),
            },
            ExtraData::MapMarker { flag: 1 },
            ExtraData::LeveledItem {
                item: rid(46),
                unknown: 46,
            },
            ExtraData::Scale { scale: 47.0 },
            ExtraData::Seed { seed: 48 },
            ExtraData::MagicCaster { data: vec![49] },
            ExtraData::MagicTarget { data: vec![50] },
            ExtraData::PlayerCrimeList {
                crimes: vec![Crime {
                    value: 52,
                    criminal: rid(52),
                }],
            },
            ExtraData::ItemDropper { dropper: rid(54) },
            ExtraData::ActivateRefChildren {
                children: vec![rid(57)],
            },
            ExtraData::CanTalkToPlayer { flag: 0 },
            ExtraData::ObjectHealth { health: 59.0 },
            ExtraData::CellImageSpace { space: rid(61) },
            ExtraData::NavMeshPortal { from: 62, to: 63 },
            ExtraData::Radius { radius: 64.0 },
            ExtraData::FactionChanges {
                changes: vec![FactionChange {
                    faction: rid(66),
                    rank: -1,
                }],
            },
            ExtraData::DismemberedLimbs { data: vec![67] },
            ExtraData::ActorCause { cause: 68 },
            ExtraData::MultiBound { bound: rid(70) },
            ExtraData::MultiBoundRef { reference: rid(72) },
            ExtraData::ReflectedRefs { refs: vec![rid(74)] },
            ExtraData::ReflectorRefs { refs: vec![rid(75)] },
            ExtraData::EmittanceSource { source: rid(76) },
            ExtraData::CombatStyle { style: rid(78) },
            ExtraData::OpenCloseActivateRef { reference: rid(81) },
            ExtraData::Ammo {
                ammo: rid(83),
                count: 12,
            },
            ExtraData::SayTopicInfoOnceADay {
                topic: rid(88),
                unknown1: 1,
                unknown2: 2,
            },
            ExtraData::EncounterZone { zone: rid(89) },
            ExtraData::CreatureAwakeSound { sound: rid(93) },
            ExtraData::Horse { horse: rid(95) },
            ExtraData::IgnoredBySandbox,
            ExtraData::CellAcousticSpace { space: rid(99) },
            ExtraData::Location { location: rid(103) },
            ExtraData::LocationRefType { kind: rid(106) },
            ExtraData::PromotedRef { refs: vec![rid(107)] },
            ExtraData::AshPileRef { reference: rid(108) },
            ExtraData::Flags {
                flags: Flags32(0x8000_0001),
            },
        ];
        for entry in &entries {
            roundtrip(entry.clone());
        }
        // Tags must be unique and in their catalogue slots.
        let mut tags: Vec<u8> = entries.iter().map(ExtraData::tag).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), entries.len());
    }

    #[test]
    fn leveled_creature_embeds_an_inline_npc() {
        let flags = Flags32(0).with(24); // gender only
        let entry = ExtraData::LeveledCreature {
            reference: rid(0x00_0005),
            base: rid(0x40_0006),
            flags,
            npc: Box::new(crate::changeform::npc::NpcData {
                gender: Some(1),
                ..Default::default()
            }),
        };
        let mut out = Vec::new();
        entry.write(&mut out).unwrap();
        // A trailing sibling entry must survive the embedded decode.
        ExtraData::Worn.write(&mut out).unwrap();

        let (rest, decoded) = extra_data(&out).unwrap();
        assert_eq!(decoded, entry);
        let (rest, sibling) = extra_data(rest).unwrap();
        assert!(rest.is_empty());
        assert_eq!(sibling, ExtraData::Worn);
    }

    #[test]
    fn unknown_tag_reports_a_partial_with_the_good_prefix() {
        let list = ExtraDataList {
            entries: vec![
                ExtraData::Worn,
                ExtraData::Scale { scale: 1.5 },
            ],
        };
        let mut out = Vec::new();
        // Count claims three entries; the third has a bogus tag.
        put_vsval(&mut out, 3).unwrap();
        for entry in &list.entries {
            entry.write(&mut out).unwrap();
        }
        out.push(200);

        let err = match extra_data_list(&out) {
            Err(nom::Err::Failure(err)) => err,
            other => panic!("expected failure, got {other:?}"),
        };
        match err.kind() {
            ErrorKind::UnknownVariant { what, tag: 200 } => assert_eq!(*what, "ExtraData"),
            other => panic!("expected unknown variant, got {other:?}"),
        }
        match err.partial() {
            Some(Partial::ExtraData(entries)) => assert_eq!(entries, &list.entries),
            other => panic!("expected extra data partial, got {other:?}"),
        }
        assert_eq!(err.to_string(), "unknown ExtraData: type=200");
    }

    #[test]
    fn oversized_streams_are_rejected() {
        let mut out = Vec::new();
        put_vsval(&mut out, MAX_EXTRA_DATA + 1).unwrap();
        assert!(extra_data_list(&out).is_err());
    }

    #[test]
    fn list_roundtrips() {
        let list = ExtraDataList {
            entries: vec![
                ExtraData::Ghost { flag: 1 },
                ExtraData::Charge { charge: 50.0 },
                ExtraData::ActivateRef {
                    parents: vec![ActivateParent {
                        reference: rid(0x00_0001),
                        delay: 0.25,
                    }],
                    flag: 0,
                },
            ],
        };
        let mut out = Vec::new();
        list.write(&mut out).unwrap();
        let (rest, decoded) = extra_data_list(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, list);
    }
}
