use crate::{command::MergeCommand, config::BuildEnv, Error};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::Stdio,
};

/// Build target that produces the firmware program.
pub const BUILD_PROGRAM: &str = "buildprog";

/// Something the host runs once a build target's artifact exists.
pub trait PostAction {
    fn run(&mut self, artifact: &Path, env: &BuildEnv) -> Result<(), Error>;
}

/// Post-build actions keyed by the build target they follow.
#[derive(Default)]
pub struct PostActions {
    actions: Vec<(String, Box<dyn PostAction>)>,
}

impl PostActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_post_action(&mut self, target: impl Into<String>, action: impl PostAction + 'static) {
        self.actions.push((target.into(), Box::new(action)));
    }

    /// Runs the actions bound to `target` in registration order and stops at
    /// the first failure. Returns how many ran.
    pub fn fire(&mut self, target: &str, artifact: &Path, env: &BuildEnv) -> Result<usize, Error> {
        let mut ran = 0;
        for (_, action) in self.actions.iter_mut().filter(|(t, _)| t == target) {
            action.run(artifact, env)?;
            ran += 1;
        }
        if ran == 0 {
            log::debug!("No post-build action for {}", target);
        }
        Ok(ran)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    Success,
    Failure,
}

/// Merges the flash images after the firmware program is built.
///
/// Runs at most once; a second trigger fails with
/// [`Error::ActionAlreadyRan`].
pub struct MergeBin {
    state: State,
}

impl Default for MergeBin {
    fn default() -> Self {
        MergeBin { state: State::Idle }
    }
}

impl MergeBin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The command this action runs for `artifact`, with host variables
    /// substituted.
    pub fn command(artifact: &Path, env: &BuildEnv) -> Result<MergeCommand, Error> {
        let app = absolute(artifact)?;
        Ok(MergeCommand::for_env(env, &app).map_args(|arg| substitute(arg, &env.vars)))
    }

    fn merge(&self, artifact: &Path, env: &BuildEnv) -> Result<(), Error> {
        let command = Self::command(artifact, env)?;

        log::info!("{}", command);
        let status = command
            .to_command()
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| Error::Launch {
                program: command.program().to_string_lossy().into_owned(),
                source,
            })?;

        if !status.success() {
            return Err(Error::MergeFailed { status });
        }
        log::info!("Merged image: {}", command.output().display());
        Ok(())
    }
}

impl PostAction for MergeBin {
    fn run(&mut self, artifact: &Path, env: &BuildEnv) -> Result<(), Error> {
        if self.state != State::Idle {
            return Err(Error::ActionAlreadyRan);
        }
        self.state = State::Running;

        let result = self.merge(artifact, env);
        self.state = if result.is_ok() {
            State::Success
        } else {
            State::Failure
        };
        result
    }
}

fn absolute(path: &Path) -> Result<PathBuf, Error> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Replaces `$NAME` and `${NAME}` with host variables. Names the host does
/// not define are left for the merge tool.
pub fn substitute(arg: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(at) = rest.find('$') {
        out.push_str(&rest[..at]);
        let after = &rest[at + 1..];
        let (name, len) = match after.strip_prefix('{') {
            Some(braced) => match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            },
            None => {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or_else(|| after.len());
                (&after[..end], end)
            }
        };
        match vars.get(name) {
            Some(value) if !name.is_empty() => {
                log::trace!("Substitute ${} = {}", name, value);
                out.push_str(value);
                rest = &after[len..];
            }
            _ => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
