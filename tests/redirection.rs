use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

struct TempDir(PathBuf);

impl TempDir {
    fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("icsh-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).expect("create temp dir");
        Self(path)
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

fn run_shell_in(dir: &Path, lines: &[&str]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_icsh"))
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn icsh");

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in lines {
            writeln!(stdin, "{line}").expect("write line");
        }
        writeln!(stdin, "exit").expect("write exit");
    }

    child.wait_with_output().expect("wait output")
}

#[test]
fn input_and_output_redirection() {
    let dir = TempDir::new("redirect");
    fs::write(dir.path().join("in.txt"), "hello\n").expect("write input");

    let output = run_shell_in(dir.path(), &["cat < in.txt > out.txt", "echo ST:$?"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("ST:0"), "stdout was: {stdout}");
    assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hello\n");
}

#[test]
fn builtin_output_is_redirected() {
    let dir = TempDir::new("builtin");

    let output = run_shell_in(dir.path(), &["echo saved > note.txt", "echo > empty.txt"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(!stdout.contains("saved"), "stdout was: {stdout}");
    assert_eq!(fs::read_to_string(dir.path().join("note.txt")).unwrap(), "saved\n");
    assert_eq!(fs::read_to_string(dir.path().join("empty.txt")).unwrap(), "\n");
}

#[test]
fn duplicate_redirection_creates_nothing() {
    let dir = TempDir::new("duplicate");

    let output = run_shell_in(dir.path(), &["echo hi > a.txt > b.txt", "echo ST:$?"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(stdout.contains("ST:1"), "stdout was: {stdout}");
    assert!(stderr.contains("icsh:"), "stderr was: {stderr}");
    assert!(!dir.path().join("a.txt").exists());
    assert!(!dir.path().join("b.txt").exists());
}

#[test]
fn missing_input_file_fails_without_running() {
    let dir = TempDir::new("missing");

    let output = run_shell_in(dir.path(), &["cat < nope.txt > out.txt", "echo ST:$?"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(stdout.contains("ST:1"), "stdout was: {stdout}");
    assert!(stderr.contains("nope.txt"), "stderr was: {stderr}");
}

#[test]
fn script_file_runs_without_prompt() {
    let dir = TempDir::new("script");
    let script = dir.path().join("run.icsh");
    fs::write(&script, "echo one\nsh -c 'exit 3'\necho two:$?\n").expect("write script");

    let output = Command::new(env!("CARGO_BIN_EXE_icsh"))
        .arg(&script)
        .stdin(Stdio::null())
        .output()
        .expect("run icsh");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(stdout, "one\ntwo:3\n");
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn missing_script_file_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_icsh"))
        .arg("/definitely/not/here.icsh")
        .output()
        .expect("run icsh");

    assert_eq!(output.status.code(), Some(127));
}
