use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Parse toml error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("missing setting `{0}` in build configuration")]
    MissingSetting(&'static str),
    #[error("invalid override `{0}`, expected key=value")]
    InvalidOverride(String),
    #[error("no build command given")]
    EmptyCommand,
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("merge tool failed with {status}")]
    MergeFailed { status: ExitStatus },
    #[error("post-build action was already triggered for this build")]
    ActionAlreadyRan,
}
