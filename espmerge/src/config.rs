use crate::{
    board::{BoardConfig, BoardFrequency, FrequencyResolver},
    image::FlashImages,
    Error,
};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    ffi::{OsStr, OsString},
    fmt, fs,
    path::{Path, PathBuf},
};

/// Environment variable naming the merged image path.
pub const MERGED_BIN_PATH: &str = "MERGED_BIN_PATH";

pub const DEFAULT_CHIP: &str = "esp32";
pub const DEFAULT_FLASH_MODE: FlashMode = FlashMode::Dio;
pub const DEFAULT_FLASH_SIZE: &str = "4MB";
pub const DEFAULT_PYTHON: &str = "python3";
pub const DEFAULT_OBJCOPY: &str = "esptool.py";

/// Contents of `espmerge.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub build: BuildSection,
    pub board: BoardConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    pub dir: Option<PathBuf>,
    pub progname: Option<String>,
    pub python: Option<PathBuf>,
    pub objcopy: Option<PathBuf>,
    pub flash_extra_images: Vec<FlashImages>,
    pub vars: BTreeMap<String, String>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let data = fs::read(path)?;
        Ok(toml::from_slice(&data)?)
    }

    /// Like [`Config::load`], but a missing file yields the built-in defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("{} not found, using defaults", path.display());
            Ok(Config::default())
        }
    }

    pub fn into_env(self) -> Result<BuildEnv, Error> {
        let build = self.build;
        let build_dir = build.dir.ok_or(Error::MissingSetting("build.dir"))?;
        let prog_name = build
            .progname
            .filter(|name| !name.is_empty())
            .ok_or(Error::MissingSetting("build.progname"))?;

        let mut env = BuildEnv::new(build_dir, prog_name);
        env.board = self.board;
        if let Some(python) = build.python {
            env.python = python;
        }
        if let Some(objcopy) = build.objcopy {
            env.objcopy = objcopy;
        }
        env.extra_images = build.flash_extra_images;
        env.vars = build.vars;
        Ok(env)
    }
}

/// Parses a `key=value` board override.
pub fn parse_override(s: &str) -> Result<(String, String), Error> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(Error::InvalidOverride(s.to_string())),
    }
}

/// The host build environment, handed explicitly to every step of the merge.
pub struct BuildEnv {
    pub board: BoardConfig,
    pub build_dir: PathBuf,
    pub prog_name: String,
    /// Interpreter the merge tool runs under.
    pub python: PathBuf,
    /// The merge tool script.
    pub objcopy: PathBuf,
    pub extra_images: Vec<FlashImages>,
    /// Host variables substituted into `$NAME` arguments before launch.
    pub vars: BTreeMap<String, String>,
    /// Process environment overrides, see [`MERGED_BIN_PATH`].
    pub overrides: BTreeMap<String, OsString>,
    pub frequency: Box<dyn FrequencyResolver>,
}

impl BuildEnv {
    pub fn new(build_dir: impl Into<PathBuf>, prog_name: impl Into<String>) -> Self {
        BuildEnv {
            board: BoardConfig::new(),
            build_dir: build_dir.into(),
            prog_name: prog_name.into(),
            python: PathBuf::from(DEFAULT_PYTHON),
            objcopy: PathBuf::from(DEFAULT_OBJCOPY),
            extra_images: Vec::new(),
            vars: BTreeMap::new(),
            overrides: BTreeMap::new(),
            frequency: Box::new(BoardFrequency),
        }
    }

    pub fn with_frequency(mut self, frequency: impl FrequencyResolver + 'static) -> Self {
        self.frequency = Box::new(frequency);
        self
    }

    /// Copies the overrides this crate reads from the process environment.
    pub fn capture_process_env(&mut self) {
        if let Some(path) = std::env::var_os(MERGED_BIN_PATH) {
            self.overrides.insert(MERGED_BIN_PATH.to_string(), path);
        }
    }

    pub fn override_var(&self, name: &str) -> Option<&OsStr> {
        self.overrides
            .get(name)
            .map(OsString::as_os_str)
            .filter(|value| !value.is_empty())
    }

    /// `<build-dir>/<progname>.bin`, the image the linker stage leaves behind.
    pub fn firmware_bin(&self) -> PathBuf {
        self.build_dir.join(format!("{}.bin", self.prog_name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashMode {
    Qio,
    Qout,
    Dio,
    Dout,
    Keep,
    /// Not a mode this crate knows; handed to the merge tool as is.
    Other(String),
}

impl From<&str> for FlashMode {
    fn from(s: &str) -> Self {
        match s {
            "qio" => FlashMode::Qio,
            "qout" => FlashMode::Qout,
            "dio" => FlashMode::Dio,
            "dout" => FlashMode::Dout,
            "keep" => FlashMode::Keep,
            other => FlashMode::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FlashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlashMode::Qio => "qio",
            FlashMode::Qout => "qout",
            FlashMode::Dio => "dio",
            FlashMode::Dout => "dout",
            FlashMode::Keep => "keep",
            FlashMode::Other(other) => other,
        })
    }
}

/// Chip and flash parameters for one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub chip: String,
    pub flash_mode: FlashMode,
    pub flash_freq: String,
    pub flash_size: String,
}

impl DeviceProfile {
    pub fn resolve(env: &BuildEnv) -> Self {
        let board = &env.board;
        let flash_mode = board
            .get("build.flash_mode")
            .map(FlashMode::from)
            .unwrap_or(DEFAULT_FLASH_MODE);
        if let FlashMode::Other(mode) = &flash_mode {
            log::warn!("Unknown flash mode {:?}, passing it to the merge tool", mode);
        }

        let profile = DeviceProfile {
            chip: board.get_or("build.mcu", DEFAULT_CHIP).to_string(),
            flash_mode,
            flash_freq: env.frequency.flash_freq(board),
            flash_size: board
                .get_or("upload.flash_size", DEFAULT_FLASH_SIZE)
                .to_string(),
        };
        log::debug!("Device profile: {:?}", profile);
        profile
    }
}

/// Where the merged image is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget(pub PathBuf);

impl OutputTarget {
    pub fn resolve(env: &BuildEnv) -> Self {
        match env.override_var(MERGED_BIN_PATH) {
            Some(path) => OutputTarget(PathBuf::from(path)),
            None => OutputTarget(
                env.build_dir
                    .join(format!("{}-merged.bin", env.prog_name)),
            ),
        }
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}
