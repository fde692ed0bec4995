//! The 100-byte file location table sitting at the top of the body.
//!
//! Offsets are absolute positions as the file lays out uncompressed
//! (compressed saves count the eight framing bytes after the header). The
//! engine never trusts section order, it always seeks through this table, so
//! a writer has to rebuild it whenever anything changes size.

use nom::number::complete::le_u32;

use crate::error::PResult;
use crate::header::Game;
use crate::primitives::put_u32;

pub const FILE_LOCATION_TABLE_SIZE: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileLocationTable {
    pub form_id_array_count_offset: u32,
    pub unknown_table3_offset: u32,
    pub global_data_table_1_offset: u32,
    pub global_data_table_2_offset: u32,
    pub change_forms_offset: u32,
    pub global_data_table_3_offset: u32,
    pub global_data_table_1_count: u32,
    pub global_data_table_2_count: u32,
    pub global_data_table_3_count: u32,
    pub change_form_count: u32,
    /// Fifteen words the engine reserves but never writes meaning into.
    /// Preserved verbatim so files round trip.
    pub unused: [u32; 15],
}

impl FileLocationTable {
    pub fn write(&self, out: &mut Vec<u8>, game: Game) {
        put_u32(out, self.form_id_array_count_offset);
        put_u32(out, self.unknown_table3_offset);
        put_u32(out, self.global_data_table_1_offset);
        put_u32(out, self.global_data_table_2_offset);
        put_u32(out, self.change_forms_offset);
        put_u32(out, self.global_data_table_3_offset);
        put_u32(out, self.global_data_table_1_count);
        put_u32(out, self.global_data_table_2_count);
        // Skyrim (all variants) stores one less than the real count here.
        // Fallout 4 stores the truth. Nobody knows why.
        let table3_count = if game.tesv_family() {
            self.global_data_table_3_count.wrapping_sub(1)
        } else {
            self.global_data_table_3_count
        };
        put_u32(out, table3_count);
        put_u32(out, self.change_form_count);
        for word in self.unused {
            put_u32(out, word);
        }
    }
}

pub fn file_location_table(input: &[u8], game: Game) -> PResult<FileLocationTable> {
    let (input, form_id_array_count_offset) = le_u32(input)?;
    let (input, unknown_table3_offset) = le_u32(input)?;
    let (input, global_data_table_1_offset) = le_u32(input)?;
    let (input, global_data_table_2_offset) = le_u32(input)?;
    let (input, change_forms_offset) = le_u32(input)?;
    let (input, global_data_table_3_offset) = le_u32(input)?;
    let (input, global_data_table_1_count) = le_u32(input)?;
    let (input, global_data_table_2_count) = le_u32(input)?;
    let (input, stored_table3_count) = le_u32(input)?;
    let (mut input, change_form_count) = le_u32(input)?;

    let global_data_table_3_count = if game.tesv_family() {
        stored_table3_count.wrapping_add(1)
    } else {
        stored_table3_count
    };

    let mut unused = [0u32; 15];
    for word in unused.iter_mut() {
        let (rest, value) = le_u32(input)?;
        *word = value;
        input = rest;
    }

    Ok((
        input,
        FileLocationTable {
            form_id_array_count_offset,
            unknown_table3_offset,
            global_data_table_1_offset,
            global_data_table_2_offset,
            change_forms_offset,
            global_data_table_3_offset,
            global_data_table_1_count,
            global_data_table_2_count,
            global_data_table_3_count,
            change_form_count,
            unused,
        },
    ))
}
