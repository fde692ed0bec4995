//! Builders for synthetic saves. No fixture files: every test constructs a
//! minimal valid save in memory, which keeps the suite honest about the
//! writer too.
#![allow(dead_code)] // not every test binary uses every builder

use skyrim_save_editor::header::{CompressionType, Game, Header};
use skyrim_save_editor::plugin::PluginInfo;
use skyrim_save_editor::primitives::WString;
use skyrim_save_editor::save::SaveFile;

pub fn header(game: Game, compression: CompressionType) -> Header {
    let compression = if game.supports_compression() {
        Some(compression)
    } else {
        None
    };
    let bytes_per_pixel = game.screenshot_bytes_per_pixel();
    Header {
        game,
        version: match game {
            Game::SkyrimLe => 9,
            Game::Fallout4 => 11,
            _ => 12,
        },
        save_number: 42,
        player_name: WString::from("Prisoner"),
        player_level: 1,
        player_location: WString::from("Helgen"),
        game_date: WString::from("17 Last Seed"),
        player_race: WString::from("NordRace"),
        player_sex: 0,
        player_current_exp: 0.0,
        player_needed_exp: 100.0,
        filetime: 0x01D9_8000_0000_0000,
        shot_width: 2,
        shot_height: 2,
        compression,
        screenshot: vec![0x7F; 4 * bytes_per_pixel],
    }
}

pub fn plugins(full: &[&str], lite: Option<&[&str]>) -> PluginInfo {
    PluginInfo::new(
        full.iter().map(|&name| WString::from(name)).collect(),
        lite.map(|names| names.iter().map(|&name| WString::from(name)).collect()),
    )
    .unwrap()
}

/// The smallest valid original-Skyrim save: one plugin, no data.
pub fn minimal_skyrim_le() -> SaveFile {
    SaveFile::new(
        header(Game::SkyrimLe, CompressionType::Uncompressed),
        73,
        plugins(&["Skyrim.esm"], None),
    )
}
