#![cfg(unix)]

use espmerge::{
    action::State, config::MERGED_BIN_PATH, BuildEnv, Config, Error, FlashImages, MergeBin,
    PostAction, PostActions, BUILD_PROGRAM,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Stands in for the merge tool: records its arguments, then exits with
/// `code`.
fn fake_tool(dir: &Path, code: i32) -> PathBuf {
    let script = dir.join("esptool.sh");
    let record = dir.join("args.txt");
    fs::write(
        &script,
        format!(
            "printf '%s\\n' \"$@\" > '{}'\necho 'A fatal error occurred' >&2\nexit {}\n",
            record.display(),
            code
        ),
    )
    .unwrap();
    script
}

fn recorded_args(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("args.txt"))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn env(dir: &Path, code: i32) -> BuildEnv {
    let mut env = BuildEnv::new(dir.join("build"), "firmware");
    env.python = PathBuf::from("/bin/sh");
    env.objcopy = fake_tool(dir, code);
    env
}

#[test]
fn merge_runs_tool_with_ordered_arguments() {
    let dir = TempDir::new().unwrap();
    let mut env = env(dir.path(), 0);
    env.extra_images = vec![
        FlashImages::pair("0x1000", "bootloader.bin"),
        FlashImages::Group(vec![FlashImages::pair("0x8000", "partitions.bin")]),
    ];

    let mut action = MergeBin::new();
    action
        .run(Path::new("/build/firmware.bin"), &env)
        .unwrap();
    assert_eq!(action.state(), State::Success);

    let merged = dir.path().join("build").join("firmware-merged.bin");
    assert_eq!(
        recorded_args(dir.path()),
        [
            "--chip",
            "esp32",
            "merge_bin",
            "-o",
            merged.to_str().unwrap(),
            "--flash_mode",
            "dio",
            "--flash_freq",
            "40m",
            "--flash_size",
            "4MB",
            "--fill-flash-size",
            "4MB",
            "0x1000",
            "bootloader.bin",
            "0x8000",
            "partitions.bin",
            "$ESP32_APP_OFFSET",
            "/build/firmware.bin",
        ]
    );
}

#[test]
fn host_variables_are_substituted_before_launch() {
    let dir = TempDir::new().unwrap();
    let mut env = env(dir.path(), 0);
    env.vars
        .insert("ESP32_APP_OFFSET".to_string(), "0x10000".to_string());
    env.overrides
        .insert(MERGED_BIN_PATH.to_string(), "/tmp/all.bin".into());

    MergeBin::new()
        .run(Path::new("/build/firmware.bin"), &env)
        .unwrap();

    let args = recorded_args(dir.path());
    assert_eq!(args[4], "/tmp/all.bin");
    assert_eq!(args[args.len() - 2..], ["0x10000", "/build/firmware.bin"]);
}

#[test]
fn non_zero_exit_fails_the_build() {
    let dir = TempDir::new().unwrap();
    let env = env(dir.path(), 2);

    let mut action = MergeBin::new();
    let err = action
        .run(Path::new("/build/firmware.bin"), &env)
        .unwrap_err();

    match err {
        Error::MergeFailed { status } => {
            assert!(!status.success());
            assert_eq!(status.code(), Some(2));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(action.state(), State::Failure);
}

#[test]
fn registered_action_fires_once_per_build() {
    let dir = TempDir::new().unwrap();
    let env = env(dir.path(), 0);

    let mut actions = PostActions::new();
    actions.add_post_action(BUILD_PROGRAM, MergeBin::new());

    let app = Path::new("/build/firmware.bin");
    assert_eq!(actions.fire(BUILD_PROGRAM, app, &env).unwrap(), 1);
    assert!(matches!(
        actions.fire(BUILD_PROGRAM, app, &env),
        Err(Error::ActionAlreadyRan)
    ));
}

#[test]
fn config_file_drives_the_merge() {
    let dir = TempDir::new().unwrap();
    let tool = fake_tool(dir.path(), 0);
    let config_path = dir.path().join("espmerge.toml");
    fs::write(
        &config_path,
        format!(
            r#"
[build]
dir = "{dir}/build"
progname = "fw"
python = "/bin/sh"
objcopy = "{tool}"
flash_extra_images = [
    ["0x0", "bootloader.bin"],
    [["0x8000", "partitions.bin"], ["0xe000", "boot_app0.bin"]],
]

[board.build]
mcu = "esp32s3"
flash_mode = "qio"
f_flash = "80000000L"

[board.upload]
flash_size = "8MB"
"#,
            dir = dir.path().display(),
            tool = tool.display()
        ),
    )
    .unwrap();

    let env = Config::load(&config_path).unwrap().into_env().unwrap();
    MergeBin::new()
        .run(&dir.path().join("build").join("fw.bin"), &env)
        .unwrap();

    let args = recorded_args(dir.path());
    assert_eq!(args[..4], ["--chip", "esp32s3", "merge_bin", "-o"]);
    assert!(args[4].ends_with("build/fw-merged.bin"));
    assert_eq!(
        args[5..],
        [
            "--flash_mode",
            "qio",
            "--flash_freq",
            "80m",
            "--flash_size",
            "8MB",
            "--fill-flash-size",
            "8MB",
            "0x0",
            "bootloader.bin",
            "0x8000",
            "partitions.bin",
            "0xe000",
            "boot_app0.bin",
            "$ESP32_APP_OFFSET",
            &*dir.path().join("build").join("fw.bin").display().to_string(),
        ]
    );
}
