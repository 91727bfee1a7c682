//! Integration Tests

use std::collections::HashMap;
use std::fs::{self, DirEntry};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use lazy_static::lazy_static;
use tempfile::TempDir;

struct ScriptData<'a> {
    pub stdout: &'a str,
    pub exit_status: i32,
}

lazy_static! {
    static ref JCSH_SCRIPTS_MAP: HashMap<&'static str, ScriptData<'static>> = {
        let mut map = HashMap::new();
        map.insert("simple_echo.jcsh", ScriptData { stdout: "test\n", exit_status: 0 });
        map.insert("simple_redirects.jcsh", ScriptData {
            stdout: "test output\nplease ignore\n",
            exit_status: 0
        });
        map.insert("simple_pipeline.jcsh", ScriptData { stdout: "needle\n", exit_status: 0 });
        map.insert("simple_pipeline_status.jcsh", ScriptData { stdout: "", exit_status: 1 });
        map.insert("simple_exit_error.jcsh", ScriptData { stdout: "", exit_status: 85 });
        map.insert("simple_exit_large.jcsh", ScriptData { stdout: "", exit_status: 244 });
        map.insert("simple_exit_negative.jcsh", ScriptData { stdout: "", exit_status: 244 });
        map.insert("simple_command_not_found.jcsh", ScriptData { stdout: "", exit_status: 127 });
        map.insert("simple_syntax_error.jcsh", ScriptData { stdout: "", exit_status: 2 });
        map
    };
}

/// Runs jcsh inside `dir`, which also serves as HOME so the log file stays out
/// of the real home directory.
fn jcsh(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_jcsh"))
        .args(args)
        .current_dir(dir)
        .env("HOME", dir)
        .output()
        .expect("failed to run jcsh")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_all_simple_jcsh_scripts() {
    let simple_scripts = get_path_to_test_scripts()
        .read_dir()
        .expect("read_dir failed")
        .map(|entry| entry.expect("unable to read directory entry"))
        .filter(|entry| is_simple_jcsh_script(entry));

    let mut count = 0;
    for entry in simple_scripts {
        let temp_dir = TempDir::new().expect("unable to generate temp dir");
        let file_path = entry.path();
        let unicode_file_path = file_path.to_str().expect("file path should be valid Unicode");

        let filename = entry.file_name();
        let expected_data = JCSH_SCRIPTS_MAP
            .get(filename.to_str().expect("filename should be valid Unicode"))
            .expect("simple script should have matching data in JCSH_SCRIPTS_MAP");

        let output = jcsh(temp_dir.path(), &[unicode_file_path]);
        assert_eq!(stdout(&output), expected_data.stdout, "{}", unicode_file_path);
        assert_eq!(
            output.status.code(),
            Some(expected_data.exit_status),
            "{}: {}",
            unicode_file_path,
            stderr(&output)
        );
        count += 1;
    }

    assert_eq!(count, JCSH_SCRIPTS_MAP.len());
}

#[test]
fn test_command_string_pipeline() {
    let temp_dir = TempDir::new().unwrap();
    let output = jcsh(temp_dir.path(), &["-c", "echo a | tr a-z A-Z"]);
    assert_eq!(stdout(&output), "A\n");
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_command_not_found_message() {
    let temp_dir = TempDir::new().unwrap();
    let output = jcsh(temp_dir.path(), &["-c", "nonexistent_command_for_jcsh"]);
    assert_eq!(output.status.code(), Some(127));
    assert!(stderr(&output).contains("nonexistent_command_for_jcsh: command not found"));
}

#[test]
fn test_missing_input_redirect_fails() {
    let temp_dir = TempDir::new().unwrap();
    let output = jcsh(temp_dir.path(), &["-c", "cat < missing.txt"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("missing.txt"));
}

#[test]
fn test_output_redirect_creates_file() {
    let temp_dir = TempDir::new().unwrap();
    let output = jcsh(temp_dir.path(), &["-c", "echo hello | cat > out.txt"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "");
    let contents = fs::read_to_string(temp_dir.path().join("out.txt")).unwrap();
    assert_eq!(contents, "hello\n");
}

#[test]
fn test_background_job_is_listed() {
    let temp_dir = TempDir::new().unwrap();
    let script = temp_dir.path().join("background.jcsh");
    fs::write(&script, "sleep 5 &\njobs\njobs -p\n").unwrap();

    let output = jcsh(temp_dir.path(), &[script.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));

    let out = stdout(&output);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 3, "{}", out);
    let pgid = lines[0].trim_start_matches("[1] ");
    assert!(pgid.parse::<i32>().is_ok(), "{}", lines[0]);
    assert_eq!(lines[1], format!("[1] {} Running\tsleep 5 &", pgid));
    assert_eq!(lines[2], pgid);
}

#[test]
fn test_fg_without_jobs_fails() {
    let temp_dir = TempDir::new().unwrap();
    let output = jcsh(temp_dir.path(), &["-c", "fg"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("fg: no current job"));
}

#[test]
fn test_cd_changes_directory_for_later_commands() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir(temp_dir.path().join("sub")).unwrap();
    let script = temp_dir.path().join("cd.jcsh");
    fs::write(&script, "cd sub\npwd\n").unwrap();

    let output = jcsh(temp_dir.path(), &[script.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));
    let printed = PathBuf::from(stdout(&output).trim_end());
    assert_eq!(
        printed.canonicalize().unwrap(),
        temp_dir.path().join("sub").canonicalize().unwrap()
    );
}

#[test]
fn test_version() {
    let temp_dir = TempDir::new().unwrap();
    let output = jcsh(temp_dir.path(), &["--version"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        stdout(&output),
        format!("jcsh version {}\n", env!("CARGO_PKG_VERSION"))
    );
}

fn get_path_to_test_scripts() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("scripts")
}

/// Does filename start with 'simple' and end with '.jcsh'?
fn is_simple_jcsh_script(entry: &DirEntry) -> bool {
    let filename = entry.file_name();
    let unicode_filename = filename.to_str().expect("filename should be valid Unicode");
    unicode_filename.starts_with("simple") && unicode_filename.ends_with(".jcsh")
}
