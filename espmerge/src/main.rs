use env_logger::Env;
use espmerge::{
    config::parse_override, BoardConfig, BuildEnv, Config, Error, MergeBin, PostActions,
    BUILD_PROGRAM,
};
use main_error::MainError;
use std::fs::read;
use std::path::PathBuf;
use std::process::{exit, Command, ExitStatus, Stdio};
use structopt::StructOpt;

#[derive(StructOpt)]
struct ConfigOpt {
    /// Path to the merge configuration
    #[structopt(short, long, parse(from_os_str), default_value = "espmerge.toml")]
    config: PathBuf,
    /// Board settings file, layered over the config's [board] table
    #[structopt(long, parse(from_os_str))]
    board: Option<PathBuf>,
    /// Override a board setting, e.g. build.flash_mode=qio
    #[structopt(long = "set", number_of_values = 1, parse(try_from_str = parse_override))]
    overrides: Vec<(String, String)>,
    /// Build directory, overrides build.dir
    #[structopt(long, parse(from_os_str))]
    build_dir: Option<PathBuf>,
    /// Program name, overrides build.progname
    #[structopt(long)]
    progname: Option<String>,
}

#[derive(StructOpt)]
struct AppOpt {
    /// Application image
    #[structopt(parse(from_os_str))]
    app: PathBuf,
}

#[derive(StructOpt)]
struct BuildOpt {
    /// Application image, default to be <build-dir>/<progname>.bin
    #[structopt(long, parse(from_os_str))]
    app: Option<PathBuf>,
    /// Build command
    #[structopt(required = true, last = true)]
    command: Vec<String>,
}

#[derive(StructOpt)]
enum Cmd {
    /// Merge the flash images around an already built application image
    Merge(AppOpt),
    /// Print the merge command without running it
    Print(AppOpt),
    /// Run a build command, then merge the flash images if it succeeds
    Build(BuildOpt),
}

#[derive(StructOpt)]
struct Opt {
    #[structopt(flatten)]
    config: ConfigOpt,
    #[structopt(subcommand)]
    cmd: Cmd,
}

impl ConfigOpt {
    fn build_env(self) -> Result<BuildEnv, Error> {
        let mut config = Config::load_or_default(&self.config)?;
        if let Some(board) = self.board {
            config.board.merge(BoardConfig::from_slice(&read(board)?)?);
        }
        let mut overrides = BoardConfig::new();
        for (key, value) in self.overrides {
            overrides.set(key, value);
        }
        config.board.merge(overrides);
        if self.build_dir.is_some() {
            config.build.dir = self.build_dir;
        }
        if self.progname.is_some() {
            config.build.progname = self.progname;
        }

        let mut env = config.into_env()?;
        env.capture_process_env();
        Ok(env)
    }
}

fn merge(env: &BuildEnv, app: PathBuf) -> Result<(), Error> {
    let mut actions = PostActions::new();
    actions.add_post_action(BUILD_PROGRAM, MergeBin::new());
    actions.fire(BUILD_PROGRAM, &app, env)?;

    log::info!("Success");

    Ok(())
}

fn build(env: &BuildEnv, opt: BuildOpt) -> Result<(), Error> {
    let (program, args) = opt.command.split_first().ok_or(Error::EmptyCommand)?;
    log::info!("Building: {}", opt.command.join(" "));

    let status = Command::new(program)
        .args(args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|source| Error::Launch {
            program: program.clone(),
            source,
        })?;
    if !status.success() {
        exit_with_process_status(status)
    }

    let app = opt.app.unwrap_or_else(|| env.firmware_bin());
    merge(env, app)
}

#[paw::main]
fn main(args: Opt) -> Result<(), MainError> {
    env_logger::Builder::from_env(Env::default().default_filter_or("espmerge=info"))
        .format_timestamp(None)
        .init();
    let env = args.config.build_env()?;

    let result = match args.cmd {
        Cmd::Merge(opt) => merge(&env, opt.app),
        Cmd::Print(opt) => {
            MergeBin::command(&opt.app, &env).map(|command| println!("{}", command))
        }
        Cmd::Build(opt) => build(&env, opt),
    };

    match result {
        Err(Error::MergeFailed { status }) => {
            log::error!("Merge tool failed with {}", status);
            exit_with_process_status(status)
        }
        result => Ok(result?),
    }
}

#[cfg(unix)]
fn exit_with_process_status(status: ExitStatus) -> ! {
    use std::os::unix::process::ExitStatusExt;
    let code = status.code().or_else(|| status.signal()).unwrap_or(1);

    exit(code)
}

#[cfg(not(unix))]
fn exit_with_process_status(status: ExitStatus) -> ! {
    let code = status.code().unwrap_or(1);

    exit(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_without_command() {
        let env = BuildEnv::new("/build", "firmware");
        let opt = BuildOpt {
            app: None,
            command: Vec::new(),
        };
        assert!(matches!(build(&env, opt), Err(Error::EmptyCommand)));
    }
}
