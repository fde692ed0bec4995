//! Save header: magic detection, game discrimination and the player block.
//!
//! Field layout documented at
//! https://en.uesp.net/wiki/Skyrim_Mod:Save_File_Format — the Fallout 4
//! header is the same shape with a different magic and a fourth screenshot
//! channel.

use nom::bytes::complete::take;
use nom::number::complete::{le_f32, le_u16, le_u32, le_u64};

use crate::error::{Error, PResult, Result};
use crate::primitives::{
    put_f32, put_u16, put_u32, put_u64, put_wstring, wstring, WString,
};

pub const MAGIC_TESV: &[u8] = b"TESV_SAVEGAME";
pub const MAGIC_FO4: &[u8] = b"FO4_SAVEGAME";

/// The four titles this codec understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Game {
    /// Original Skyrim (save version 9 and below).
    SkyrimLe,
    /// Skyrim Special Edition (save version 12 and up).
    SkyrimSe,
    /// The Switch port. Same format window as SE, told apart only by the
    /// `.sav0` file name the console uses.
    SkyrimSw,
    Fallout4,
}

impl Game {
    pub fn magic(self) -> &'static [u8] {
        match self {
            Game::Fallout4 => MAGIC_FO4,
            _ => MAGIC_TESV,
        }
    }

    /// All Skyrim variants share a handful of quirks (the off-by-one in the
    /// third global data table count chief among them).
    pub fn tesv_family(self) -> bool {
        !matches!(self, Game::Fallout4)
    }

    /// Only the remastered engine writes the compression field.
    pub fn supports_compression(self) -> bool {
        matches!(self, Game::SkyrimSe | Game::SkyrimSw)
    }

    /// Whether the body carries a light plugin table, which grew into the
    /// format partway through each game's patch history.
    pub fn supports_lite(self, form_version: u8) -> bool {
        match self {
            Game::Fallout4 => form_version >= 68,
            Game::SkyrimSe | Game::SkyrimSw => form_version >= 78,
            Game::SkyrimLe => false,
        }
    }

    /// Original Skyrim stored 24-bit screenshots; everything later is RGBA.
    pub fn screenshot_bytes_per_pixel(self) -> usize {
        match self {
            Game::SkyrimLe => 3,
            _ => 4,
        }
    }

    /// Only Fallout 4 embeds a version string in the body.
    pub fn has_version_string(self) -> bool {
        matches!(self, Game::Fallout4)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionType {
    Uncompressed,
    Zlib,
    Lz4,
}

impl CompressionType {
    pub fn from_code(code: u16) -> Result<CompressionType> {
        match code {
            0 => Ok(CompressionType::Uncompressed),
            1 => Ok(CompressionType::Zlib),
            2 => Ok(CompressionType::Lz4),
            other => Err(Error::format(format!("unknown compression type {other}"))),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            CompressionType::Uncompressed => 0,
            CompressionType::Zlib => 1,
            CompressionType::Lz4 => 2,
        }
    }

    pub fn is_compressed(self) -> bool {
        !matches!(self, CompressionType::Uncompressed)
    }
}

#[derive(Clone, Debug)]
pub struct Header {
    pub game: Game,
    pub version: u32,
    pub save_number: u32,
    pub player_name: WString,
    pub player_level: u32,
    pub player_location: WString,
    pub game_date: WString,
    pub player_race: WString,
    /// 0 = male, 1 = female.
    pub player_sex: u16,
    pub player_current_exp: f32,
    pub player_needed_exp: f32,
    /// Windows FILETIME of the save.
    pub filetime: u64,
    pub shot_width: u32,
    pub shot_height: u32,
    /// Present exactly when `game.supports_compression()`.
    pub compression: Option<CompressionType>,
    /// Raw pixels, `shot_width * shot_height * bytes_per_pixel` of them.
    pub screenshot: Vec<u8>,
}

impl Header {
    /// Size of the region covered by the stored header-size word: everything
    /// from the version field up to and including the compression tag, not
    /// the screenshot.
    pub fn partial_size(&self) -> usize {
        4 + 4
            + self.player_name.size()
            + 4
            + self.player_location.size()
            + self.game_date.size()
            + self.player_race.size()
            + 2
            + 4
            + 4
            + 8
            + 4
            + 4
            + if self.compression.is_some() { 2 } else { 0 }
    }

    /// Total on-disk size: magic, size word, header fields, screenshot.
    pub fn size(&self) -> usize {
        self.game.magic().len() + 4 + self.partial_size() + self.screenshot.len()
    }

    pub fn compression_type(&self) -> CompressionType {
        self.compression.unwrap_or(CompressionType::Uncompressed)
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let expected_pixels = self.shot_width as usize
            * self.shot_height as usize
            * self.game.screenshot_bytes_per_pixel();
        if self.screenshot.len() != expected_pixels {
            return Err(Error::format(format!(
                "screenshot is {} bytes, dimensions say {expected_pixels}",
                self.screenshot.len()
            )));
        }
        if self.compression.is_some() != self.game.supports_compression() {
            return Err(Error::format(
                "compression field does not match the game variant",
            ));
        }

        out.extend_from_slice(self.game.magic());
        put_u32(out, self.partial_size() as u32);
        put_u32(out, self.version);
        put_u32(out, self.save_number);
        put_wstring(out, &self.player_name)?;
        put_u32(out, self.player_level);
        put_wstring(out, &self.player_location)?;
        put_wstring(out, &self.game_date)?;
        put_wstring(out, &self.player_race)?;
        put_u16(out, self.player_sex);
        put_f32(out, self.player_current_exp);
        put_f32(out, self.player_needed_exp);
        put_u64(out, self.filetime);
        put_u32(out, self.shot_width);
        put_u32(out, self.shot_height);
        if let Some(compression) = self.compression {
            put_u16(out, compression.code());
        }
        out.extend_from_slice(&self.screenshot);
        Ok(())
    }
}

fn select_game(magic: &[u8], version: u32, filename: Option<&str>) -> Result<Game> {
    if magic == MAGIC_TESV {
        if version <= 9 {
            return Ok(Game::SkyrimLe);
        }
        if version >= 12 {
            let switch = filename.map_or(false, |name| name.ends_with(".sav0"));
            return Ok(if switch { Game::SkyrimSw } else { Game::SkyrimSe });
        }
    } else if magic == MAGIC_FO4 && version >= 11 {
        return Ok(Game::Fallout4);
    }
    Err(Error::format(format!(
        "unsupported save: magic {:?}, version {version}",
        String::from_utf8_lossy(magic)
    )))
}

/// Reads the header off the top of a save buffer. `filename` is only a hint,
/// used to tell the Switch port apart from SE.
pub fn read_header<'a>(input: &'a [u8], filename: Option<&str>) -> PResult<'a, Header> {
    if input.len() < 4 {
        return Err(Error::truncated(input.len()).fail());
    }
    let magic_len = match &input[..4] {
        b"TESV" => MAGIC_TESV.len(),
        b"FO4_" => MAGIC_FO4.len(),
        other => {
            return Err(Error::format(format!(
                "not a save file (leading bytes {other:02X?})"
            ))
            .fail())
        }
    };
    let (input, magic) = take(magic_len)(input)?;
    if magic != MAGIC_TESV && magic != MAGIC_FO4 {
        return Err(Error::format(format!(
            "bad magic {:?}",
            String::from_utf8_lossy(magic)
        ))
        .fail());
    }

    let (input, header_size) = le_u32(input)?;
    let region_start = input.len();
    let (input, version) = le_u32(input)?;
    let game = select_game(magic, version, filename).map_err(Error::fail)?;

    let (input, save_number) = le_u32(input)?;
    let (input, player_name) = wstring(input)?;
    let (input, player_level) = le_u32(input)?;
    let (input, player_location) = wstring(input)?;
    let (input, game_date) = wstring(input)?;
    let (input, player_race) = wstring(input)?;
    let (input, player_sex) = le_u16(input)?;
    let (input, player_current_exp) = le_f32(input)?;
    let (input, player_needed_exp) = le_f32(input)?;
    let (input, filetime) = le_u64(input)?;
    let (input, shot_width) = le_u32(input)?;
    let (input, shot_height) = le_u32(input)?;
    let (input, compression) = if game.supports_compression() {
        let (input, code) = le_u16(input)?;
        let compression = CompressionType::from_code(code).map_err(Error::fail)?;
        (input, Some(compression))
    } else {
        (input, None)
    };

    let consumed = region_start - input.len();
    if consumed != header_size as usize {
        return Err(Error::position_mismatch(u64::from(header_size), consumed as u64)
            .in_section("header")
            .fail());
    }

    let pixels = (u64::from(shot_width) * u64::from(shot_height)) as usize
        * game.screenshot_bytes_per_pixel();
    let (input, screenshot) = take(pixels)(input)?;

    Ok((
        input,
        Header {
            game,
            version,
            save_number,
            player_name,
            player_level,
            player_location,
            game_date,
            player_race,
            player_sex,
            player_current_exp,
            player_needed_exp,
            filetime,
            shot_width,
            shot_height,
            compression,
            screenshot: screenshot.to_vec(),
        },
    ))
}
