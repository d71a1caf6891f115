use serde::Deserialize;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// Placeholder the merge tool resolves to the chip's application offset.
pub const APP_OFFSET_TOKEN: &str = "$ESP32_APP_OFFSET";

/// Where an image goes in flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offset {
    /// Offset exactly as configured, e.g. `0x1000`.
    Literal(String),
    /// The chip's application offset, left for the merge tool to resolve.
    App,
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Literal(offset) => f.write_str(offset),
            Offset::App => f.write_str(APP_OFFSET_TOKEN),
        }
    }
}

/// One input to the merge, in the order it is handed to the merge tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    pub offset: Offset,
    pub path: PathBuf,
}

impl ImageEntry {
    pub fn new(offset: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        ImageEntry {
            offset: Offset::Literal(offset.into()),
            path: path.into(),
        }
    }

    pub fn app(path: impl Into<PathBuf>) -> Self {
        ImageEntry {
            offset: Offset::App,
            path: path.into(),
        }
    }

    /// The entry as the merge tool reads it: offset, then path.
    pub fn args(&self) -> [OsString; 2] {
        [
            self.offset.to_string().into(),
            self.path.clone().into_os_string(),
        ]
    }
}

/// Extra images contributed by earlier build stages.
///
/// Contributors may hand over a single `(offset, path)` pair or a group of
/// them, and groups may nest. In TOML a two-string array is a pair and any
/// other array is a group:
///
/// ```toml
/// flash_extra_images = [
///     ["0x1000", "bootloader.bin"],
///     [["0x8000", "partitions.bin"], ["0xe000", "boot_app0.bin"]],
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FlashImages {
    Pair(String, PathBuf),
    Group(Vec<FlashImages>),
}

impl FlashImages {
    pub fn pair(offset: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        FlashImages::Pair(offset.into(), path.into())
    }

    fn flatten_into(&self, out: &mut Vec<ImageEntry>) {
        match self {
            FlashImages::Pair(offset, path) => out.push(ImageEntry::new(offset.clone(), path)),
            FlashImages::Group(group) => {
                for images in group {
                    images.flatten_into(out);
                }
            }
        }
    }
}

/// Builds the merge list: every contributed image depth-first in
/// contribution order, then the application image at the application offset.
///
/// Paths are not checked here; the merge tool reports missing files.
pub fn image_list(extra: &[FlashImages], app: &Path) -> Vec<ImageEntry> {
    let mut entries = Vec::new();
    for images in extra {
        images.flatten_into(&mut entries);
    }
    entries.push(ImageEntry::app(app));
    entries
}
