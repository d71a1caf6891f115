pub mod action;
pub mod board;
pub mod command;
pub mod config;
mod error;
pub mod image;

pub use action::{MergeBin, PostAction, PostActions, BUILD_PROGRAM};
pub use board::{BoardConfig, BoardFrequency, FrequencyResolver};
pub use command::MergeCommand;
pub use config::{BuildEnv, Config, DeviceProfile, FlashMode, OutputTarget};
pub use error::Error;
pub use image::{image_list, FlashImages, ImageEntry};
