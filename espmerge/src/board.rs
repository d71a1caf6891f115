use crate::Error;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use toml::value::{Table, Value};

/// Board flash clock used when the board does not declare `build.f_flash`.
pub const DEFAULT_F_FLASH: &str = "40000000L";
const DEFAULT_FLASH_FREQ: &str = "40m";

/// Board settings keyed by dotted names such as `build.mcu` or
/// `upload.flash_size`.
///
/// Nested TOML tables flatten into dotted keys, so `[build] mcu = "esp32"`
/// and `"build.mcu" = "esp32"` describe the same setting. Empty values read
/// as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardConfig {
    settings: BTreeMap<String, String>,
}

impl BoardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, Error> {
        let table: Table = toml::from_slice(data)?;
        Ok(Self::from_table(&table))
    }

    pub fn from_table(table: &Table) -> Self {
        let mut board = BoardConfig::new();
        board.flatten("", table);
        board
    }

    fn flatten(&mut self, prefix: &str, table: &Table) {
        for (key, value) in table {
            let key = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            match value {
                Value::Table(table) => self.flatten(&key, table),
                Value::String(s) => {
                    self.settings.insert(key, s.clone());
                }
                Value::Array(_) => log::trace!("Ignore list setting {}", key),
                other => {
                    self.settings.insert(key, other.to_string());
                }
            }
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.settings.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Layers `other` on top of `self`; settings in `other` win.
    pub fn merge(&mut self, other: BoardConfig) {
        self.settings.extend(other.settings);
    }
}

impl<'de> Deserialize<'de> for BoardConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Table::deserialize(deserializer).map(|table| BoardConfig::from_table(&table))
    }
}

/// Computes the `--flash_freq` value for a board.
///
/// This belongs to the build environment rather than the device profile:
/// board packages each have their own rule for it.
pub trait FrequencyResolver {
    fn flash_freq(&self, board: &BoardConfig) -> String;
}

impl<F> FrequencyResolver for F
where
    F: Fn(&BoardConfig) -> String,
{
    fn flash_freq(&self, board: &BoardConfig) -> String {
        self(board)
    }
}

/// Reads `build.f_flash` in Hz (`80000000L`) and renders it in whole MHz
/// (`80m`). Values that are not a plain Hz count pass through untouched;
/// empty or sub-MHz values fall back to [`DEFAULT_F_FLASH`].
#[derive(Copy, Clone, Debug, Default)]
pub struct BoardFrequency;

impl BoardFrequency {
    fn render(raw: &str) -> Option<String> {
        let raw = raw.trim_end_matches('L');
        match raw.parse::<u64>() {
            Ok(hz) if hz >= 1_000_000 => Some(format!("{}m", hz / 1_000_000)),
            Ok(_) => None,
            Err(_) if raw.is_empty() => None,
            Err(_) => Some(raw.to_string()),
        }
    }
}

impl FrequencyResolver for BoardFrequency {
    fn flash_freq(&self, board: &BoardConfig) -> String {
        let raw = board.get_or("build.f_flash", DEFAULT_F_FLASH);
        Self::render(raw).unwrap_or_else(|| {
            log::warn!("Unusable build.f_flash {:?}, using {}", raw, DEFAULT_F_FLASH);
            DEFAULT_FLASH_FREQ.to_string()
        })
    }
}
