//! The plugin table: which esp/esm files contributed records to this save.
//!
//! Full plugins get a one-byte index (so at most 255 of them); newer formats
//! add "light" plugins with 12-bit indices packed under the 0xFE prefix. Form
//! ids embed the plugin index in their top byte(s), so the table is needed to
//! resolve anything.

use nom::number::complete::{le_u16, le_u32, le_u8};

use crate::error::{Error, PResult, Result};
use crate::primitives::{put_u16, put_u32, put_u8, put_wstring, wstring, WString};

pub const MAX_LITE_PLUGINS: usize = 4095;

/// Index the engine reserves for forms created at runtime.
pub const CREATED_INDEX: u16 = 0xFF;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plugin {
    /// File name as stored; not guaranteed to be valid UTF-8.
    pub name: WString,
    /// Position in its list: 0..=254 for full plugins, 0..=4094 for lite.
    pub index: u16,
    pub lite: bool,
}

impl Plugin {
    /// Case-insensitive name match, the way the game loads plugins.
    pub fn matches(&self, name: &str) -> bool {
        self.name
            .to_display()
            .eq_ignore_ascii_case(name)
    }

    /// The "01: Update.esm" / "FE002: small.esl" style tag used in listings.
    pub fn index_name(&self) -> String {
        if self.lite {
            format!("FE{:03x}: {}", self.index, self.name)
        } else {
            format!("{:02x}: {}", self.index, self.name)
        }
    }
}

#[derive(Clone, Debug)]
pub struct PluginInfo {
    full: Vec<Plugin>,
    lite: Option<Vec<Plugin>>,
    created: Plugin,
}

impl PluginInfo {
    pub fn new(full_names: Vec<WString>, lite_names: Option<Vec<WString>>) -> Result<PluginInfo> {
        if full_names.len() > 255 {
            return Err(Error::format(format!(
                "{} full plugins, the format caps out at 255",
                full_names.len()
            )));
        }
        if let Some(ref lite) = lite_names {
            if lite.len() > MAX_LITE_PLUGINS {
                return Err(Error::format(format!(
                    "{} lite plugins, the format caps out at {MAX_LITE_PLUGINS}",
                    lite.len()
                )));
            }
        }
        let full = full_names
            .into_iter()
            .enumerate()
            .map(|(index, name)| Plugin {
                name,
                index: index as u16,
                lite: false,
            })
            .collect();
        let lite = lite_names.map(|names| {
            names
                .into_iter()
                .enumerate()
                .map(|(index, name)| Plugin {
                    name,
                    index: index as u16,
                    lite: true,
                })
                .collect()
        });
        Ok(PluginInfo {
            full,
            lite,
            created: Plugin {
                name: WString::from("Created"),
                index: CREATED_INDEX,
                lite: false,
            },
        })
    }

    pub fn full(&self) -> &[Plugin] {
        &self.full
    }

    pub fn lite(&self) -> Option<&[Plugin]> {
        self.lite.as_deref()
    }

    /// The pseudo-plugin standing in for runtime-created forms.
    pub fn created(&self) -> &Plugin {
        &self.created
    }

    pub fn find(&self, name: &str) -> Option<&Plugin> {
        self.full
            .iter()
            .chain(self.lite.iter().flatten())
            .find(|plugin| plugin.matches(name))
    }

    /// Splits a global form id into its owning plugin and the id local to it.
    pub fn split_form_id(&self, form_id: u32) -> Option<(&Plugin, u32)> {
        let top = form_id >> 24;
        if top == 0xFE {
            let index = (form_id >> 12 & 0xFFF) as usize;
            let local = form_id & 0xFFF;
            self.lite.as_ref()?.get(index).map(|plugin| (plugin, local))
        } else if top == u32::from(CREATED_INDEX) {
            Some((&self.created, form_id & 0xFF_FFFF))
        } else {
            self.full
                .get(top as usize)
                .map(|plugin| (plugin, form_id & 0xFF_FFFF))
        }
    }

    /// Inverse of `split_form_id`.
    pub fn make_form_id(&self, plugin: &Plugin, local_id: u32) -> u32 {
        if plugin.lite {
            0xFE00_0000 | u32::from(plugin.index) << 12 | local_id & 0xFFF
        } else {
            u32::from(plugin.index) << 24 | local_id & 0xFF_FFFF
        }
    }

    /// On-disk size including the leading declared-size word.
    pub fn size(&self) -> usize {
        let names: usize = self.full.iter().map(|p| p.name.size()).sum();
        let lite: usize = match self.lite {
            Some(ref lite) => 2 + lite.iter().map(|p| p.name.size()).sum::<usize>(),
            None => 0,
        };
        4 + 1 + names + lite
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        // The declared size does not count its own four bytes.
        put_u32(out, (self.size() - 4) as u32);
        put_u8(out, self.full.len() as u8);
        for plugin in &self.full {
            put_wstring(out, &plugin.name)?;
        }
        if let Some(ref lite) = self.lite {
            put_u16(out, lite.len() as u16);
            for plugin in lite {
                put_wstring(out, &plugin.name)?;
            }
        }
        Ok(())
    }
}

/// Optional mod-analysis data an application can plug in. Everything in the
/// codec works without one; implementations only enrich display.
pub trait Analysis {
    /// Human-readable name for a form, e.g. from parsing the plugin itself.
    fn form_name(&self, plugin: &Plugin, form_id: u32) -> Option<String>;

    /// Which installed mods provide the given plugin file.
    fn providers(&self, plugin: &Plugin) -> Vec<String>;
}

pub fn plugin_info(input: &[u8], supports_lite: bool) -> PResult<PluginInfo> {
    let start = input.len();
    let (input, declared) = le_u32(input)?;
    let (mut input, full_count) = le_u8(input)?;

    let mut full_names = Vec::with_capacity(usize::from(full_count));
    for _ in 0..full_count {
        let (rest, name) = wstring(input)?;
        full_names.push(name);
        input = rest;
    }

    let lite_names = if supports_lite {
        let (rest, lite_count) = le_u16(input)?;
        input = rest;
        if usize::from(lite_count) > MAX_LITE_PLUGINS {
            return Err(Error::format(format!(
                "{lite_count} lite plugins, the format caps out at {MAX_LITE_PLUGINS}"
            ))
            .fail());
        }
        let mut names = Vec::with_capacity(usize::from(lite_count));
        for _ in 0..lite_count {
            let (rest, name) = wstring(input)?;
            names.push(name);
            input = rest;
        }
        Some(names)
    } else {
        None
    };

    // The declared size counts everything after itself.
    let consumed = start - input.len();
    if declared as usize + 4 != consumed {
        return Err(Error::position_mismatch(u64::from(declared) + 4, consumed as u64).fail());
    }

    let info = PluginInfo::new(full_names, lite_names).map_err(Error::fail)?;
    Ok((input, info))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PluginInfo {
        PluginInfo::new(
            vec![WString::from("Skyrim.esm"), WString::from("Update.esm")],
            Some(vec![
                WString::from("alpha.esl"),
                WString::from("beta.esl"),
                WString::from("gamma.esl"),
            ]),
        )
        .unwrap()
    }

    #[test]
    fn roundtrips_and_validates_the_declared_size() {
        let info = sample();
        let mut out = Vec::new();
        info.write(&mut out).unwrap();
        assert_eq!(out.len(), info.size());

        let (rest, decoded) = plugin_info(&out, true).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded.full().len(), 2);
        assert_eq!(decoded.lite().unwrap().len(), 3);

        // Corrupt the declared size and the table must be rejected.
        out[0] ^= 1;
        assert!(plugin_info(&out, true).is_err());
    }

    #[test]
    fn split_handles_both_index_regimes() {
        let info = sample();

        let (plugin, local) = info.split_form_id(0xFE00_2345).unwrap();
        assert!(plugin.lite);
        assert_eq!(plugin.index, 2);
        assert_eq!(local, 0x345);

        let (plugin, local) = info.split_form_id(0x01BE_EF00).unwrap();
        assert!(!plugin.lite);
        assert_eq!(plugin.index, 1);
        assert_eq!(local, 0xBEEF00);

        let (plugin, local) = info.split_form_id(0xFF00_0042).unwrap();
        assert_eq!(plugin.index, CREATED_INDEX);
        assert_eq!(local, 0x42);

        assert!(info.split_form_id(0x7F00_0000).is_none());
    }

    #[test]
    fn make_form_id_inverts_split() {
        let info = sample();
        for form_id in [0xFE00_2345u32, 0x01BE_EF00] {
            let (plugin, local) = info.split_form_id(form_id).unwrap();
            assert_eq!(info.make_form_id(plugin, local), form_id);
        }
    }

    #[test]
    fn find_is_case_insensitive() {
        let info = sample();
        assert_eq!(info.find("SKYRIM.ESM").unwrap().index, 0);
        assert_eq!(info.find("Beta.Esl").unwrap().index, 1);
        assert!(info.find("missing.esp").is_none());
    }

    #[test]
    fn index_names_use_the_two_regimes() {
        let info = sample();
        assert_eq!(info.full()[1].index_name(), "01: Update.esm");
        assert_eq!(info.lite().unwrap()[2].index_name(), "FE002: gamma.esl");
    }
}
