//! A save with something in every section, pushed through the whole
//! pipeline: write, reread, re-encode every body, write again. This is the
//! closest the suite gets to a real file without shipping one.

use pretty_assertions::assert_eq;

use skyrim_save_editor::changeform::extra::{ExtraData, ExtraDataList};
use skyrim_save_editor::changeform::flst::FormListData;
use skyrim_save_editor::changeform::leveled::{LeveledEntry, LeveledListData};
use skyrim_save_editor::changeform::npc::NpcData;
use skyrim_save_editor::changeform::qust::{QuestData, QuestObjective, QuestStage};
use skyrim_save_editor::changeform::refr::{InitialData, InventoryItem, RefrData};
use skyrim_save_editor::changeform::rela::{RelaData, RelaPeople};
use skyrim_save_editor::changeform::{ChangeForm, ChangeFormData, RecordKind};
use skyrim_save_editor::flags::{Flags16, Flags32, Flags8};
use skyrim_save_editor::globals::{
    Animation, AnimationList, GlobalData, GlobalDataBody, GlobalVariableTable,
    TYPE_ANIMATIONS, TYPE_GLOBAL_VARIABLES, TYPE_PAPYRUS,
};
use skyrim_save_editor::header::{CompressionType, Game};
use skyrim_save_editor::papyrus::PapyrusBlock;
use skyrim_save_editor::primitives::WString;
use skyrim_save_editor::refid::RefId;
use skyrim_save_editor::save::SaveFile;

mod common;

fn rid(raw: u32) -> RefId {
    RefId::from_raw(raw).unwrap()
}

fn form(refid: u32, flags: Flags32, kind: RecordKind, body: ChangeFormData) -> ChangeForm {
    let mut form = ChangeForm::new(rid(refid), flags, kind, 74);
    assert!(form.update_raw(&body, None));
    form
}

fn populated_save(game: Game, compression: CompressionType) -> SaveFile {
    // Form version 68 puts Fallout 4 past the light-plugin cutoff, so that
    // variant gets a light table too.
    let lite: Option<&[&str]> = if game == Game::Fallout4 {
        Some(&["ccBGSFO4001.esl"])
    } else {
        None
    };
    let mut save = SaveFile::new(
        common::header(game, compression),
        if game == Game::Fallout4 { 68 } else { 74 },
        common::plugins(&["Skyrim.esm", "Update.esm", "Dawnguard.esm"], lite),
    );
    if game == Game::Fallout4 {
        save.version_string = Some(WString::from("1.10.163"));
    }

    save.table1.push(GlobalData {
        type_id: TYPE_GLOBAL_VARIABLES,
        body: GlobalDataBody::GlobalVariables(GlobalVariableTable {
            variables: vec![
                (rid(0x40_0D65), 1.0),
                (rid(0x40_0D66), 250.25),
            ],
        }),
    });
    save.table1.push(GlobalData {
        type_id: 0,
        body: GlobalDataBody::Opaque(vec![0x11; 24]),
    });
    save.table2.push(GlobalData {
        type_id: 104,
        body: GlobalDataBody::Opaque(vec![0x22; 100]),
    });
    save.table3.push(GlobalData {
        type_id: TYPE_PAPYRUS,
        body: GlobalDataBody::Papyrus(PapyrusBlock::new(vec![0x33; 512])),
    });
    save.table3.push(GlobalData {
        type_id: TYPE_ANIMATIONS,
        body: GlobalDataBody::Animations(AnimationList {
            entries: vec![Animation {
                actor: rid(0x00_0001),
                animation: rid(0x40_1111),
                flag: 0,
            }],
        }),
    });

    save.change_forms.push(form(
        0x00_0001,
        Flags32(0).with(31),
        RecordKind::Flst,
        ChangeFormData::FormList(FormListData {
            form_flags: None,
            entries: Some(vec![rid(0x40_0005), RefId::ZERO]),
        }),
    ));
    save.change_forms.push(form(
        0x00_0002,
        Flags32(0).with(0).with(31),
        RecordKind::Lvln,
        ChangeFormData::LeveledList(LeveledListData {
            form_flags: Some(Default::default()),
            entries: Some(vec![LeveledEntry {
                form: rid(0x40_2222),
                level: 5,
                count: 1,
                chance_none: 0,
            }]),
        }),
    ));
    save.change_forms.push(form(
        0x80_0042,
        Flags32(0).with(2).with(5).with(6),
        RecordKind::Refr,
        ChangeFormData::Reference(RefrData {
            initial: Some(InitialData::Created {
                cell: rid(0x00_0003),
                pos: [100.0, 200.0, 300.0],
                rot: [0.0, 0.0, 1.57],
                flag: 0,
                base: rid(0x40_3333),
            }),
            havok: Some(vec![0xAA; 16]),
            extra: Some(ExtraDataList {
                entries: vec![
                    ExtraData::Ownership { owner: rid(0x40_0013) },
                    ExtraData::Scale { scale: 1.1 },
                ],
            }),
            inventory: Some(vec![
                InventoryItem {
                    item: rid(0x40_4444),
                    count: 3,
                    extra: ExtraDataList::default(),
                },
                InventoryItem {
                    item: rid(0x40_4445),
                    count: 1,
                    extra: ExtraDataList {
                        entries: vec![ExtraData::Worn],
                    },
                },
            ]),
            ..Default::default()
        }),
    ));
    save.change_forms.push(form(
        0x00_0004,
        Flags32(0).with(1).with(5).with(24),
        RecordKind::Npc,
        ChangeFormData::Npc(Box::new(NpcData {
            base_data: Some([0x44; 24]),
            full_name: Some(WString::from("Sofie")),
            gender: Some(1),
            ..Default::default()
        })),
    ));
    save.change_forms.push(form(
        0x00_0005,
        Flags32(0).with(1).with(2).with(28).with(30).with(31),
        RecordKind::Qust,
        ChangeFormData::Quest(QuestData {
            quest_flags: Some(Flags16(0x41)),
            script_delay: Some(0.0),
            stages: Some(vec![
                QuestStage {
                    stage: 10,
                    status: Flags8(1),
                },
                QuestStage {
                    stage: 200,
                    status: Flags8(2),
                },
            ]),
            objectives: Some(vec![QuestObjective { id: 10, state: 1 }]),
            already_run: Some(1),
            ..Default::default()
        }),
    ));
    save.change_forms.push(form(
        0x80_0050,
        Flags32(0).with(1),
        RecordKind::Rela,
        ChangeFormData::Relationship(RelaData {
            form_flags: None,
            people: Some(RelaPeople {
                person1: rid(0x00_0001),
                person2: rid(0x00_0004),
                association: rid(0x40_5555),
            }),
            rank: Some(2),
        }),
    ));
    save.change_forms.push(form(
        0x40_6666,
        Flags32(0x0000_0003),
        RecordKind::Weap,
        ChangeFormData::Default(vec![0x55; 40]),
    ));

    save.form_ids = (1..=40).map(|i| 0x0200_0000 + i).collect();
    save.visited_worldspaces = vec![0x3C, 0x1A26F];
    save.trailing = vec![0; 12];
    save
}

#[test]
fn populated_skyrim_save_roundtrips_byte_identical() {
    let save = populated_save(Game::SkyrimLe, CompressionType::Uncompressed);
    let bytes = save.write().unwrap();

    let mut reread = SaveFile::read(&bytes, None).unwrap();
    assert!(!reread.broken());
    assert_eq!(save.calculate_size(), bytes.len());
    assert_eq!(reread.write().unwrap(), bytes);

    // Every body decodes back to what was put in.
    for (form, original) in reread
        .change_forms
        .iter_mut()
        .zip(save.change_forms.iter())
    {
        assert_eq!(form.data(false).unwrap(), &original.parse_body(false).unwrap());
    }
}

#[test]
fn reencoding_every_body_is_a_fixed_point() {
    let bytes = populated_save(Game::SkyrimLe, CompressionType::Uncompressed)
        .write()
        .unwrap();
    let mut reread = SaveFile::read(&bytes, None).unwrap();

    let (reencoded, kept) = reread.reencode_change_forms();
    assert_eq!(reencoded, 7);
    assert_eq!(kept, 0);
    assert_eq!(reread.write().unwrap(), bytes);
}

#[test]
fn populated_compressed_save_survives_both_codecs() {
    for compression in [CompressionType::Zlib, CompressionType::Lz4] {
        let save = populated_save(Game::SkyrimSe, compression);
        let first = save.write().unwrap();
        let reread = SaveFile::read(&first, None).unwrap();
        assert!(!reread.broken(), "{compression:?}");

        let second = reread.write().unwrap();
        let reread2 = SaveFile::read(&second, None).unwrap();
        assert_eq!(reread2.digest(), reread.digest(), "{compression:?}");
        assert_eq!(reread2.change_forms.len(), 7);
    }
}

#[test]
fn populated_fallout4_save_roundtrips() {
    let save = populated_save(Game::Fallout4, CompressionType::Uncompressed);
    let bytes = save.write().unwrap();
    let reread = SaveFile::read(&bytes, Some("exit.fos")).unwrap();
    assert!(!reread.broken());
    assert_eq!(reread.version_string.as_ref().unwrap().to_display(), "1.10.163");
    assert_eq!(reread.write().unwrap(), bytes);
}

#[test]
fn change_form_counts_match_what_went_in() {
    let bytes = populated_save(Game::SkyrimLe, CompressionType::Uncompressed)
        .write()
        .unwrap();
    let reread = SaveFile::read(&bytes, None).unwrap();
    let counts = reread.change_form_counts();
    assert_eq!(counts[&RecordKind::Flst], 1);
    assert_eq!(counts[&RecordKind::Refr], 1);
    assert_eq!(counts[&RecordKind::Weap], 1);
    assert_eq!(counts.values().sum::<usize>(), 7);
}

#[test]
fn cleanse_and_havok_reset_compose_on_a_full_save() {
    let bytes = populated_save(Game::SkyrimLe, CompressionType::Uncompressed)
        .write()
        .unwrap();
    let mut save = SaveFile::read(&bytes, None).unwrap();

    let (entries_removed, forms_touched) = save.cleanse_form_lists();
    assert_eq!((entries_removed, forms_touched), (1, 1));

    let (successes, failures) = save.reset_havok();
    assert_eq!((successes, failures), (1, 0));

    // The edited save is smaller (one form list entry gone) but valid.
    let edited = save.write().unwrap();
    assert!(edited.len() < bytes.len());
    let reread = SaveFile::read(&edited, None).unwrap();
    assert!(!reread.broken());
    assert_eq!(reread.write().unwrap(), edited);
}

#[test]
fn body_printers_summarise_without_panicking() {
    let save = populated_save(Game::SkyrimLe, CompressionType::Uncompressed);
    let summaries: Vec<String> = save
        .change_forms
        .iter()
        .map(|form| form.parse_body(true).unwrap().to_string())
        .collect();
    assert!(summaries[0].starts_with("form list, 2 entries"));
    assert!(summaries[0].contains("null refs"));
    assert!(summaries[2].contains("initial type 5"));
    assert!(summaries[3].contains("\"Sofie\""));
    assert!(summaries[4].contains("2 stages"));
    assert!(summaries[6].contains("40 bytes"));
}
