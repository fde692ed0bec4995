//! The container: reads a whole save into a typed object graph and writes it
//! back out, byte-identical for uncompressed files.
//!
//! Reading is tolerant where it can afford to be. The header, plugin table
//! and file location table have to parse or nothing else can; after that,
//! every section is located through the table, so a corrupt section marks
//! the container broken and reading moves on to the next offset. A broken
//! container can be inspected but refuses to write, which is the only safe
//! answer when parts of the original bytes were never understood.

use std::collections::{BTreeMap, HashSet};

use crc::Crc;
use nom::number::complete::{le_u32, le_u8};

use crate::changeform::{change_form, ChangeForm, ChangeFormData, RecordKind};
use crate::compress::{lz4_deflate, lz4_inflate, zlib_deflate, zlib_inflate};
use crate::error::{Error, Result};
use crate::globals::{global_data, GlobalData, GlobalDataBody, GlobalDataGroup};
use crate::header::{read_header, CompressionType, Header};
use crate::location::{file_location_table, FileLocationTable, FILE_LOCATION_TABLE_SIZE};
use crate::papyrus::VmSubsystem;
use crate::plugin::{plugin_info, PluginInfo};
use crate::primitives::{put_u32, put_u8, put_wstring, wstring, WString};
use crate::refid::RefId;

const CRC64: Crc<u64> = Crc::<u64>::new(&crc::CRC_64_XZ);

/// Change-flag bit 2: the reference has havok movement data. Used by the
/// havok reset operation to find its targets without parsing everything.
const REFR_HAVOK_MOVE_BIT: u32 = 2;

/// Optional read-progress callback; `advance` is called once per section
/// with the number of bytes that section occupied.
pub trait Progress {
    fn advance(&mut self, bytes: u64);
}

/// The default sink: no reporting.
pub struct NoProgress;

impl Progress for NoProgress {
    fn advance(&mut self, _bytes: u64) {}
}

/// An element a caller can ask the container to remove. VM elements belong
/// to the scripting state and are handed back for an external VM subsystem
/// to deal with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveElement {
    ChangeForm(RefId),
    Vm(u64),
}

#[derive(Clone, Debug)]
pub struct SaveFile {
    pub header: Header,
    pub form_version: u8,
    /// Fallout 4 stores its patch version in the body.
    pub version_string: Option<WString>,
    pub plugins: PluginInfo,
    /// The location table as read; writing rebuilds everything except the
    /// reserved words.
    pub location: FileLocationTable,
    pub table1: Vec<GlobalData>,
    pub table2: Vec<GlobalData>,
    pub change_forms: Vec<ChangeForm>,
    pub table3: Vec<GlobalData>,
    pub form_ids: Vec<u32>,
    pub visited_worldspaces: Vec<u32>,
    /// Bytes after the visited worldspaces. Undocumented; preserved as-is.
    pub trailing: Vec<u8>,
    broken: bool,
    digest: u64,
}

impl SaveFile {
    /// An empty container around a header and plugin table. Sections start
    /// empty; the location table is derived on write.
    pub fn new(header: Header, form_version: u8, plugins: PluginInfo) -> SaveFile {
        let version_string = if header.game.has_version_string() {
            Some(WString::default())
        } else {
            None
        };
        SaveFile {
            header,
            form_version,
            version_string,
            plugins,
            location: FileLocationTable {
                form_id_array_count_offset: 0,
                unknown_table3_offset: 0,
                global_data_table_1_offset: 0,
                global_data_table_2_offset: 0,
                change_forms_offset: 0,
                global_data_table_3_offset: 0,
                global_data_table_1_count: 0,
                global_data_table_2_count: 0,
                global_data_table_3_count: 0,
                change_form_count: 0,
                unused: [0; 15],
            },
            table1: Vec::new(),
            table2: Vec::new(),
            change_forms: Vec::new(),
            table3: Vec::new(),
            form_ids: Vec::new(),
            visited_worldspaces: Vec::new(),
            trailing: Vec::new(),
            broken: false,
            digest: 0,
        }
    }

    pub fn read(buf: &[u8], filename: Option<&str>) -> Result<SaveFile> {
        SaveFile::read_with(buf, filename, &mut NoProgress)
    }

    pub fn read_with(
        buf: &[u8],
        filename: Option<&str>,
        progress: &mut dyn Progress,
    ) -> Result<SaveFile> {
        let (after_header, header) = read_header(buf, filename).map_err(Error::from)?;
        let header_len = buf.len() - after_header.len();
        progress.advance(header_len as u64);

        let compression = header.compression_type();
        let body: Vec<u8> = match compression {
            CompressionType::Uncompressed => after_header.to_vec(),
            CompressionType::Zlib | CompressionType::Lz4 => {
                let (rest, uncompressed_len) =
                    le_u32::<_, Error>(after_header).map_err(Error::from)?;
                let (rest, compressed_len) = le_u32::<_, Error>(rest).map_err(Error::from)?;
                if rest.len() != compressed_len as usize {
                    return Err(Error::position_mismatch(
                        u64::from(compressed_len),
                        rest.len() as u64,
                    )
                    .in_section("compressed body"));
                }
                match compression {
                    CompressionType::Zlib => zlib_inflate(rest, uncompressed_len as usize)?,
                    _ => lz4_inflate(rest, uncompressed_len as usize)?,
                }
            }
        };

        let mut crc = CRC64.digest();
        crc.update(&buf[..header_len]);
        crc.update(&body);
        let digest = crc.finalize();

        // Offsets in the location table count the header region, and for
        // compressed saves the two framing words too.
        let base = header_len + if compression.is_compressed() { 8 } else { 0 };
        let game = header.game;

        let (rest, form_version) = le_u8::<_, Error>(&body[..])
            .map_err(|err| Error::from(err).in_section("form version"))?;
        let (rest, version_string) = if game.has_version_string() {
            let (rest, value) =
                wstring(rest).map_err(|err| Error::from(err).in_section("version string"))?;
            (rest, Some(value))
        } else {
            (rest, None)
        };
        let (rest, plugins) = plugin_info(rest, game.supports_lite(form_version))
            .map_err(|err| Error::from(err).in_section("plugin table"))?;
        let (rest, location) = file_location_table(rest, game)
            .map_err(|err| Error::from(err).in_section("file location table"))?;
        progress.advance((body.len() - rest.len()) as u64);

        let mut broken = false;

        // Form id array and the visited worldspaces right behind it.
        let mut form_ids = Vec::new();
        let mut visited_worldspaces = Vec::new();
        let mut trailing = Vec::new();
        match read_tail_arrays(&body, base, &location) {
            Ok((ids, worldspaces, rest_of_body)) => {
                form_ids = ids;
                visited_worldspaces = worldspaces;
                trailing = rest_of_body;
                progress
                    .advance((8 + 4 * (form_ids.len() + visited_worldspaces.len())) as u64);
                progress.advance(trailing.len() as u64);
            }
            Err(_) => broken = true,
        }

        let (table1, ok) = read_global_table(
            &body,
            base,
            location.global_data_table_1_offset,
            location.global_data_table_1_count,
            GlobalDataGroup::One,
        );
        broken |= !ok;
        progress.advance(table1.iter().map(|b| b.size() as u64).sum());

        let (table2, ok) = read_global_table(
            &body,
            base,
            location.global_data_table_2_offset,
            location.global_data_table_2_count,
            GlobalDataGroup::Two,
        );
        broken |= !ok;
        progress.advance(table2.iter().map(|b| b.size() as u64).sum());

        let mut change_forms = Vec::with_capacity(location.change_form_count as usize);
        match section_slice(&body, base, location.change_forms_offset, "change forms") {
            Ok(mut input) => {
                for _ in 0..location.change_form_count {
                    match change_form(input, game) {
                        Ok((rest, form)) => {
                            change_forms.push(form);
                            input = rest;
                        }
                        Err(_) => {
                            // No way to resync to the next record.
                            broken = true;
                            break;
                        }
                    }
                }
            }
            Err(_) => broken = true,
        }
        progress.advance(change_forms.iter().map(|f| f.size() as u64).sum());

        let (table3, ok) = read_global_table(
            &body,
            base,
            location.global_data_table_3_offset,
            location.global_data_table_3_count,
            GlobalDataGroup::Three,
        );
        broken |= !ok;
        progress.advance(table3.iter().map(|b| b.size() as u64).sum());

        let mut save = SaveFile {
            header,
            form_version,
            version_string,
            plugins,
            location,
            table1,
            table2,
            change_forms,
            table3,
            form_ids,
            visited_worldspaces,
            trailing,
            broken,
            digest,
        };

        if !save.broken {
            // Everything parsed; the sections must tile the body exactly.
            if save.body_size() != body.len() {
                save.broken = true;
            }
            if !compression.is_compressed() && save.calculate_size() != buf.len() {
                save.broken = true;
            }
        }

        Ok(save)
    }

    pub fn game(&self) -> crate::header::Game {
        self.header.game
    }

    /// True when some section could not be fully understood. Broken saves
    /// can be inspected but not written.
    pub fn broken(&self) -> bool {
        self.broken
    }

    /// CRC-64 of header and (decompressed) body, taken at read time. Two
    /// loads with the same digest are the same save.
    pub fn digest(&self) -> u64 {
        self.digest
    }

    fn body_base(&self) -> usize {
        let framing = if self.header.compression_type().is_compressed() {
            8
        } else {
            0
        };
        self.header.size() + framing
    }

    fn body_size(&self) -> usize {
        let version_string = self
            .version_string
            .as_ref()
            .map_or(0, |value| value.size());
        1 + version_string
            + self.plugins.size()
            + FILE_LOCATION_TABLE_SIZE
            + self.table1.iter().map(GlobalData::size).sum::<usize>()
            + self.table2.iter().map(GlobalData::size).sum::<usize>()
            + self
                .change_forms
                .iter()
                .map(ChangeForm::size)
                .sum::<usize>()
            + self.table3.iter().map(GlobalData::size).sum::<usize>()
            + 4
            + 4 * self.form_ids.len()
            + 4
            + 4 * self.visited_worldspaces.len()
            + self.trailing.len()
    }

    /// Total size of the uncompressed on-disk form. For uncompressed saves
    /// this is exactly the number of bytes `write` produces.
    pub fn calculate_size(&self) -> usize {
        self.body_base() + self.body_size()
    }

    /// Derives a fresh location table from the current section sizes. The
    /// reserved words are carried over from the table that was read.
    pub fn rebuild_location(&self) -> FileLocationTable {
        let version_string = self
            .version_string
            .as_ref()
            .map_or(0, |value| value.size());
        let mut position =
            self.body_base() + 1 + version_string + self.plugins.size() + FILE_LOCATION_TABLE_SIZE;

        let global_data_table_1_offset = position as u32;
        position += self.table1.iter().map(GlobalData::size).sum::<usize>();
        let global_data_table_2_offset = position as u32;
        position += self.table2.iter().map(GlobalData::size).sum::<usize>();
        let change_forms_offset = position as u32;
        position += self
            .change_forms
            .iter()
            .map(ChangeForm::size)
            .sum::<usize>();
        let global_data_table_3_offset = position as u32;
        position += self.table3.iter().map(GlobalData::size).sum::<usize>();
        let form_id_array_count_offset = position as u32;
        let unknown_table3_offset = form_id_array_count_offset
            + 4
            + 4 * self.form_ids.len() as u32
            + 4
            + 4 * self.visited_worldspaces.len() as u32;

        FileLocationTable {
            form_id_array_count_offset,
            unknown_table3_offset,
            global_data_table_1_offset,
            global_data_table_2_offset,
            change_forms_offset,
            global_data_table_3_offset,
            global_data_table_1_count: self.table1.len() as u32,
            global_data_table_2_count: self.table2.len() as u32,
            global_data_table_3_count: self.table3.len() as u32,
            change_form_count: self.change_forms.len() as u32,
            unused: self.location.unused,
        }
    }

    pub fn write(&self) -> Result<Vec<u8>> {
        if self.broken {
            return Err(Error::format(
                "refusing to write a broken save; the original bytes were not fully understood",
            ));
        }
        if self.version_string.is_some() != self.header.game.has_version_string() {
            return Err(Error::format(
                "version string presence does not match the game variant",
            ));
        }
        let game = self.header.game;
        // A file with the wrong light-plugin table shape cannot be read
        // back, so refuse to produce one.
        if self.plugins.lite().is_some() != game.supports_lite(self.form_version) {
            return Err(Error::format(
                "light plugin table presence does not match the form version",
            ));
        }
        let location = self.rebuild_location();

        let mut body = Vec::with_capacity(self.body_size());
        put_u8(&mut body, self.form_version);
        if let Some(ref version_string) = self.version_string {
            put_wstring(&mut body, version_string)?;
        }
        self.plugins.write(&mut body)?;
        location.write(&mut body, game);
        for block in &self.table1 {
            block.write(&mut body)?;
        }
        for block in &self.table2 {
            block.write(&mut body)?;
        }
        for form in &self.change_forms {
            form.write(&mut body, game)?;
        }
        for block in &self.table3 {
            block.write(&mut body)?;
        }
        put_u32(&mut body, self.form_ids.len() as u32);
        for &form_id in &self.form_ids {
            put_u32(&mut body, form_id);
        }
        put_u32(&mut body, self.visited_worldspaces.len() as u32);
        for &worldspace in &self.visited_worldspaces {
            put_u32(&mut body, worldspace);
        }
        body.extend_from_slice(&self.trailing);

        let mut out = Vec::with_capacity(self.calculate_size());
        self.header.write(&mut out)?;
        match self.header.compression_type() {
            CompressionType::Uncompressed => out.extend_from_slice(&body),
            compression => {
                let packed = match compression {
                    CompressionType::Zlib => zlib_deflate(&body)?,
                    _ => lz4_deflate(&body),
                };
                put_u32(&mut out, body.len() as u32);
                put_u32(&mut out, packed.len() as u32);
                out.extend_from_slice(&packed);
            }
        }
        Ok(out)
    }

    /// How many change forms there are of each record kind.
    pub fn change_form_counts(&self) -> BTreeMap<RecordKind, usize> {
        let mut counts = BTreeMap::new();
        for form in &self.change_forms {
            *counts.entry(form.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn find_change_form(&self, refid: RefId) -> Option<&ChangeForm> {
        self.change_forms.iter().find(|form| form.refid == refid)
    }

    /// Zeroes the stored havok data of every placed object that carries
    /// some. Records with bytes we did not understand are left alone.
    /// Returns `(successes, failures)`.
    pub fn reset_havok(&mut self) -> (usize, usize) {
        let mut successes = 0;
        let mut failures = 0;
        for form in self
            .change_forms
            .iter_mut()
            .filter(|form| form.kind == RecordKind::Refr)
        {
            if !form.change_flags.get(REFR_HAVOK_MOVE_BIT) {
                continue;
            }
            match form.parse_body(false) {
                Ok(ChangeFormData::Reference(mut data)) => {
                    if data.has_unparsed() {
                        failures += 1;
                        continue;
                    }
                    match data.havok {
                        Some(ref mut havok) if !havok.is_empty() => {
                            havok.iter_mut().for_each(|byte| *byte = 0);
                            if form.update_raw(&ChangeFormData::Reference(data), None) {
                                successes += 1;
                            } else {
                                failures += 1;
                            }
                        }
                        _ => successes += 1,
                    }
                }
                _ => failures += 1,
            }
        }
        (successes, failures)
    }

    /// Strips null entries out of every form list. Returns
    /// `(entries_removed, forms_touched)`.
    pub fn cleanse_form_lists(&mut self) -> (usize, usize) {
        let mut entries_removed = 0;
        let mut forms_touched = 0;
        for form in self
            .change_forms
            .iter_mut()
            .filter(|form| form.kind == RecordKind::Flst)
        {
            let Ok(ChangeFormData::FormList(mut data)) = form.parse_body(false) else {
                continue;
            };
            let removed = data.cleanse();
            if removed > 0 && form.update_raw(&ChangeFormData::FormList(data), None) {
                entries_removed += removed;
                forms_touched += 1;
            }
        }
        (entries_removed, forms_touched)
    }

    /// Removes the given elements. Change forms are handled here; VM
    /// elements are returned for the caller's scripting-VM subsystem.
    pub fn remove_elements(&mut self, elements: &[SaveElement]) -> (usize, Vec<u64>) {
        let mut targets = HashSet::new();
        let mut deferred = Vec::new();
        for element in elements {
            match *element {
                SaveElement::ChangeForm(refid) => {
                    targets.insert(refid);
                }
                SaveElement::Vm(handle) => deferred.push(handle),
            }
        }
        let before = self.change_forms.len();
        self.change_forms
            .retain(|form| !targets.contains(&form.refid));
        (before - self.change_forms.len(), deferred)
    }

    /// Asks an external VM implementation to drop script instances attached
    /// to created forms that no longer exist in this save.
    pub fn remove_nonexistent_created(&mut self, vm: &dyn VmSubsystem) -> Result<usize> {
        let existing: HashSet<RefId> =
            self.change_forms.iter().map(|form| form.refid).collect();
        let form_version = self.form_version;
        for block in &mut self.table3 {
            if let GlobalDataBody::Papyrus(ref mut papyrus) = block.body {
                return vm.remove_nonexistent_created(papyrus, form_version, &|refid| {
                    existing.contains(&refid)
                });
            }
        }
        Err(Error::format("save has no scripting VM block"))
    }

    /// Runs every change-form body through decode and re-encode, replacing
    /// the stored bytes where the body parses. Bodies that fail to parse
    /// keep their raw form. Returns `(reencoded, kept_raw)`.
    pub fn reencode_change_forms(&mut self) -> (usize, usize) {
        let mut reencoded = 0;
        let mut kept = 0;
        for form in &mut self.change_forms {
            match form.parse_body(false) {
                Ok(data) => {
                    if form.update_raw(&data, None) {
                        reencoded += 1;
                    } else {
                        kept += 1;
                    }
                }
                Err(_) => kept += 1,
            }
        }
        (reencoded, kept)
    }
}

fn section_slice<'a>(
    body: &'a [u8],
    base: usize,
    offset: u32,
    what: &'static str,
) -> Result<&'a [u8]> {
    (offset as usize)
        .checked_sub(base)
        .and_then(|position| body.get(position..))
        .ok_or_else(|| Error::format(format!("{what} offset {offset} is outside the body")))
}

fn read_global_table(
    body: &[u8],
    base: usize,
    offset: u32,
    count: u32,
    group: GlobalDataGroup,
) -> (Vec<GlobalData>, bool) {
    let mut blocks = Vec::with_capacity(count.min(1024) as usize);
    let mut input = match section_slice(body, base, offset, "global data table") {
        Ok(input) => input,
        Err(_) => return (blocks, false),
    };
    for _ in 0..count {
        match global_data(input, group) {
            Ok((rest, block)) => {
                blocks.push(block);
                input = rest;
            }
            // Includes the papyrus block: keep what was read, mark broken.
            Err(_) => return (blocks, false),
        }
    }
    (blocks, true)
}

type TailArrays = (Vec<u32>, Vec<u32>, Vec<u8>);

fn read_tail_arrays(body: &[u8], base: usize, location: &FileLocationTable) -> Result<TailArrays> {
    let input = section_slice(
        body,
        base,
        location.form_id_array_count_offset,
        "form id array",
    )?;

    let read_u32_array = |input: &[u8]| -> Result<(Vec<u32>, usize)> {
        let (mut rest, count) = le_u32::<_, Error>(input).map_err(Error::from)?;
        let mut values = Vec::with_capacity(count.min(1 << 20) as usize);
        for _ in 0..count {
            let (next, value) = le_u32::<_, Error>(rest).map_err(Error::from)?;
            values.push(value);
            rest = next;
        }
        Ok((values, input.len() - rest.len()))
    };

    let (form_ids, consumed) = read_u32_array(input)?;
    let (visited, consumed2) = read_u32_array(&input[consumed..])?;
    let trailing = input[consumed + consumed2..].to_vec();
    Ok((form_ids, visited, trailing))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_slice_rejects_offsets_before_the_base() {
        let body = [0u8; 16];
        assert!(section_slice(&body, 100, 50, "test").is_err());
        assert!(section_slice(&body, 100, 200, "test").is_err());
        assert_eq!(section_slice(&body, 100, 104, "test").unwrap().len(), 12);
    }
}
