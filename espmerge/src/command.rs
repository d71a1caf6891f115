use crate::{
    config::{BuildEnv, DeviceProfile, OutputTarget},
    image::{image_list, ImageEntry},
};
use std::{
    ffi::{OsStr, OsString},
    fmt,
    path::Path,
    process::Command,
};

/// Sub-command of the merge tool that writes the composite image.
pub const MERGE_BIN: &str = "merge_bin";

/// Position of the `-o` value in the argument vector.
const OUTPUT_ARG: usize = 6;

/// The argument vector of one merge invocation, interpreter first.
///
/// The merge tool reads `(offset, path)` pairs positionally after its named
/// flags, so the order here is part of the contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCommand {
    argv: Vec<OsString>,
}

impl MergeCommand {
    pub fn assemble(
        python: &Path,
        objcopy: &Path,
        profile: &DeviceProfile,
        output: &OutputTarget,
        images: &[ImageEntry],
    ) -> Self {
        let mut argv: Vec<OsString> = vec![
            python.into(),
            objcopy.into(),
            "--chip".into(),
            profile.chip.clone().into(),
            MERGE_BIN.into(),
            "-o".into(),
            output.path().into(),
            "--flash_mode".into(),
            profile.flash_mode.to_string().into(),
            "--flash_freq".into(),
            profile.flash_freq.clone().into(),
            // the tool pads the output up to the declared size
            "--flash_size".into(),
            profile.flash_size.clone().into(),
            "--fill-flash-size".into(),
            profile.flash_size.clone().into(),
        ];
        argv.extend(images.iter().flat_map(ImageEntry::args));

        MergeCommand { argv }
    }

    /// Resolves the profile, output and image list for `app` and assembles
    /// the command.
    pub fn for_env(env: &BuildEnv, app: &Path) -> Self {
        let profile = DeviceProfile::resolve(env);
        let output = OutputTarget::resolve(env);
        let images = image_list(&env.extra_images, app);
        Self::assemble(&env.python, &env.objcopy, &profile, &output, &images)
    }

    pub fn program(&self) -> &OsStr {
        &self.argv[0]
    }

    pub fn args(&self) -> &[OsString] {
        &self.argv[1..]
    }

    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }

    /// Where the merge tool writes the composite image.
    pub fn output(&self) -> &Path {
        Path::new(&self.argv[OUTPUT_ARG])
    }

    /// Applies `f` to every UTF-8 argument, e.g. to substitute host
    /// variables. Other arguments are kept as they are.
    pub fn map_args(self, f: impl Fn(&str) -> String) -> Self {
        MergeCommand {
            argv: self
                .argv
                .into_iter()
                .map(|arg| match arg.to_str() {
                    Some(s) => f(s).into(),
                    None => arg,
                })
                .collect(),
        }
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(self.program());
        command.args(self.args());
        command
    }
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_./,:=@%+-".contains(c)
}

/// Renders the command for a POSIX shell: arguments with anything outside
/// the safe set are single-quoted.
impl fmt::Display for MergeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.argv.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let arg = arg.to_string_lossy();
            if !arg.is_empty() && arg.chars().all(is_shell_safe) {
                f.write_str(&arg)?;
            } else {
                write!(f, "'{}'", arg.replace('\'', "'\\''"))?;
            }
        }
        Ok(())
    }
}
