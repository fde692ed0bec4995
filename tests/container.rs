use pretty_assertions::assert_eq;

use skyrim_save_editor::globals::{GlobalData, GlobalDataBody};
use skyrim_save_editor::header::{CompressionType, Game};
use skyrim_save_editor::papyrus::PapyrusBlock;
use skyrim_save_editor::save::{Progress, SaveFile};

mod common;

#[test]
fn minimal_uncompressed_save_roundtrips_byte_identical() {
    let save = common::minimal_skyrim_le();
    let bytes = save.write().unwrap();

    let reread = SaveFile::read(&bytes, None).unwrap();
    assert!(!reread.broken());
    assert_eq!(reread.game(), Game::SkyrimLe);
    assert_eq!(reread.form_version, 73);
    assert_eq!(reread.plugins.full().len(), 1);
    assert!(reread.plugins.lite().is_none());

    let rewritten = reread.write().unwrap();
    assert_eq!(rewritten, bytes);
}

#[test]
fn calculate_size_matches_the_bytes_written() {
    let mut save = common::minimal_skyrim_le();
    save.form_ids = vec![0x0001_2345, 0x00FF_0001];
    save.visited_worldspaces = vec![0x0000_003C];
    save.trailing = vec![0, 0, 0, 0, 0, 0, 0, 0]; // opaque tail block
    let bytes = save.write().unwrap();
    assert_eq!(save.calculate_size(), bytes.len());
}

#[test]
fn location_table_offsets_are_prefix_sums_of_the_sections() {
    let mut save = common::minimal_skyrim_le();
    save.table1.push(GlobalData {
        type_id: 0,
        body: GlobalDataBody::Opaque(vec![1; 10]),
    });
    save.table1.push(GlobalData {
        type_id: 1,
        body: GlobalDataBody::Opaque(vec![2; 6]),
    });
    save.table2.push(GlobalData {
        type_id: 104,
        body: GlobalDataBody::Opaque(vec![3; 20]),
    });
    save.table3.push(GlobalData {
        type_id: 1001,
        body: GlobalDataBody::Papyrus(PapyrusBlock::new(vec![4; 32])),
    });
    save.form_ids = vec![7; 5];
    save.visited_worldspaces = vec![9; 2];

    let location = save.rebuild_location();
    assert_eq!(
        location.global_data_table_2_offset - location.global_data_table_1_offset,
        8 + 10 + 8 + 6
    );
    assert_eq!(
        location.change_forms_offset - location.global_data_table_2_offset,
        8 + 20
    );
    assert_eq!(
        location.global_data_table_3_offset,
        location.change_forms_offset
    );
    assert_eq!(
        location.form_id_array_count_offset - location.global_data_table_3_offset,
        8 + 32
    );
    assert_eq!(
        location.unknown_table3_offset,
        location.form_id_array_count_offset + 4 + 4 * 5 + 4 + 4 * 2
    );
    assert_eq!(location.global_data_table_1_count, 2);
    assert_eq!(location.global_data_table_2_count, 1);
    assert_eq!(location.global_data_table_3_count, 1);

    // The round trip must agree with the rebuild.
    let bytes = save.write().unwrap();
    let reread = SaveFile::read(&bytes, None).unwrap();
    assert!(!reread.broken());
    assert_eq!(reread.location, location);
    assert_eq!(reread.write().unwrap(), bytes);
}

#[test]
fn zlib_compressed_save_roundtrips_through_decompression() {
    let mut save = SaveFile::new(
        common::header(Game::SkyrimSe, CompressionType::Zlib),
        78,
        common::plugins(&["Skyrim.esm", "Update.esm"], Some(&["tiny.esl"])),
    );
    save.form_ids = (0..100).map(|i| 0x0100_0000 + i).collect();
    let first = save.write().unwrap();

    let reread = SaveFile::read(&first, None).unwrap();
    assert!(!reread.broken());
    assert_eq!(reread.plugins.lite().unwrap().len(), 1);
    assert_eq!(reread.form_ids.len(), 100);

    // The compressed representation may legally differ; the decompressed
    // bodies may not. The digest covers header + decompressed body.
    let second = reread.write().unwrap();
    let reread2 = SaveFile::read(&second, None).unwrap();
    assert_eq!(reread2.digest(), reread.digest());
}

#[test]
fn lz4_compressed_save_roundtrips_through_decompression() {
    let mut save = SaveFile::new(
        common::header(Game::SkyrimSe, CompressionType::Lz4),
        80,
        common::plugins(&["Skyrim.esm"], Some(&[])),
    );
    save.visited_worldspaces = vec![0x3C; 16];
    let first = save.write().unwrap();

    let reread = SaveFile::read(&first, None).unwrap();
    assert!(!reread.broken());
    assert_eq!(reread.visited_worldspaces, save.visited_worldspaces);
    let second = reread.write().unwrap();
    let reread2 = SaveFile::read(&second, None).unwrap();
    assert_eq!(reread2.digest(), reread.digest());
}

#[test]
fn fallout4_carries_a_version_string_and_plain_table3_count() {
    let mut save = SaveFile::new(
        common::header(Game::Fallout4, CompressionType::Uncompressed),
        68,
        common::plugins(&["Fallout4.esm"], Some(&["dlc.esl"])),
    );
    save.version_string = Some(skyrim_save_editor::primitives::WString::from("1.10.163"));
    let bytes = save.write().unwrap();

    let reread = SaveFile::read(&bytes, Some("quicksave.fos")).unwrap();
    assert!(!reread.broken());
    assert_eq!(
        reread.version_string.as_ref().unwrap().to_display(),
        "1.10.163"
    );
    assert_eq!(reread.write().unwrap(), bytes);
}

#[test]
fn truncated_tail_marks_the_save_broken_and_write_refuses() {
    let mut save = common::minimal_skyrim_le();
    save.form_ids = vec![1, 2, 3];
    let mut bytes = save.write().unwrap();
    bytes.truncate(bytes.len() - 2);

    let reread = SaveFile::read(&bytes, None).unwrap();
    assert!(reread.broken());
    assert!(reread.write().is_err());
}

#[test]
fn digest_identity_tracks_the_content() {
    let save = common::minimal_skyrim_le();
    let bytes = save.write().unwrap();
    let a = SaveFile::read(&bytes, None).unwrap();
    let b = SaveFile::read(&bytes, None).unwrap();
    assert_eq!(a.digest(), b.digest());

    let mut tampered = bytes.clone();
    // Offset 17 is the low byte of the save version inside the header; a
    // version of 8 still parses as the same game, so only the digest moves.
    tampered[17] ^= 1;
    let c = SaveFile::read(&tampered, None).unwrap();
    assert!(!c.broken());
    assert_ne!(c.digest(), a.digest());
}

#[test]
fn progress_sink_sees_every_section() {
    struct Counter(u64);
    impl Progress for Counter {
        fn advance(&mut self, bytes: u64) {
            self.0 += bytes;
        }
    }

    let mut save = common::minimal_skyrim_le();
    save.form_ids = vec![5; 10];
    let bytes = save.write().unwrap();

    let mut counter = Counter(0);
    let reread = SaveFile::read_with(&bytes, None, &mut counter).unwrap();
    assert!(!reread.broken());
    assert_eq!(counter.0, bytes.len() as u64);
}

#[test]
fn remove_elements_partitions_change_forms_from_vm_handles() {
    use skyrim_save_editor::changeform::{ChangeForm, ChangeFormData, RecordKind};
    use skyrim_save_editor::flags::Flags32;
    use skyrim_save_editor::{RefId, SaveElement};

    let mut save = common::minimal_skyrim_le();
    let keep = RefId::from_raw(0x40_0001).unwrap();
    let drop = RefId::from_raw(0x40_0002).unwrap();
    for refid in [keep, drop] {
        let mut form = ChangeForm::new(refid, Flags32(0), RecordKind::Book, 1);
        assert!(form.update_raw(&ChangeFormData::Default(vec![1, 2, 3]), None));
        save.change_forms.push(form);
    }

    let (removed, deferred) = save.remove_elements(&[
        SaveElement::ChangeForm(drop),
        SaveElement::Vm(77),
    ]);
    assert_eq!(removed, 1);
    assert_eq!(deferred, vec![77]);
    assert!(save.find_change_form(keep).is_some());
    assert!(save.find_change_form(drop).is_none());
}
