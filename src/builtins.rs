use std::io::Write;

use crate::error::{ShellError, ShellResult};
use crate::executor::Launcher;

/// The list of all builtin command names.
const BUILTINS: &[&str] = &["cd", "echo", "exit", "help", "jobs", "fg", "bg"];

#[derive(Debug, PartialEq, Eq)]
pub enum BuiltinAction {
    Continue(i32),
    Exit(i32),
}

/// Returns true if the command name is a shell builtin.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Execute a builtin command, writing output to the provided streams.
pub fn execute(
    program: &str,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    launcher: &Launcher,
) -> BuiltinAction {
    match program {
        "cd" => BuiltinAction::Continue(builtin_cd(args, stderr)),
        "echo" => BuiltinAction::Continue(builtin_echo(args, stdout)),
        "exit" => builtin_exit(args, stdout, stderr),
        "help" => BuiltinAction::Continue(builtin_help(stdout)),
        "jobs" => BuiltinAction::Continue(builtin_jobs(launcher, stdout)),
        "fg" => BuiltinAction::Continue(report("fg", builtin_fg(args, launcher, stdout), stderr)),
        "bg" => BuiltinAction::Continue(report("bg", builtin_bg(args, launcher, stdout), stderr)),
        _ => {
            let _ = writeln!(stderr, "icsh: unknown builtin: {program}");
            BuiltinAction::Continue(1)
        }
    }
}

fn report(name: &str, result: ShellResult<i32>, stderr: &mut dyn Write) -> i32 {
    result.unwrap_or_else(|e| {
        let _ = writeln!(stderr, "icsh: {name}: {e}");
        e.exit_code()
    })
}

fn builtin_cd(args: &[String], stderr: &mut dyn Write) -> i32 {
    let target = match args.first() {
        Some(dir) => dir.clone(),
        None => match std::env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                let _ = writeln!(stderr, "cd: HOME not set");
                return 1;
            }
        },
    };

    if let Err(e) = std::env::set_current_dir(&target) {
        let _ = writeln!(stderr, "cd: {target}: {e}");
        return 1;
    }

    0
}

fn builtin_echo(args: &[String], stdout: &mut dyn Write) -> i32 {
    let _ = writeln!(stdout, "{}", args.join(" "));
    0
}

fn builtin_exit(args: &[String], stdout: &mut dyn Write, stderr: &mut dyn Write) -> BuiltinAction {
    let code = match args.first() {
        None => 0,
        Some(s) => match s.parse::<i32>() {
            Ok(code) => code & 0xFF,
            Err(_) => {
                let _ = writeln!(stderr, "exit: {s}: numeric argument required");
                2
            }
        },
    };
    let _ = writeln!(stdout, "bye");
    BuiltinAction::Exit(code)
}

fn builtin_help(stdout: &mut dyn Write) -> i32 {
    let _ = writeln!(
        stdout,
        "icsh built-in commands:\n  \
         echo <text>    print text ($? is the last status)\n  \
         !!             repeat the previous command\n  \
         exit [n]       leave the shell with status n\n  \
         cd [dir]       change directory (default $HOME)\n  \
         jobs           list background and stopped jobs\n  \
         fg [%N]        continue job N in the foreground\n  \
         bg [%N]        continue stopped job N in the background\n  \
         help           show this text\n\
         Other commands run as programs; end a line with & to run it in the\n\
         background, and use < file / > file to redirect input / output."
    );
    0
}

// ── Job control builtins ──

/// List all tracked jobs.
fn builtin_jobs(launcher: &Launcher, stdout: &mut dyn Write) -> i32 {
    // Report anything that finished first, so only live jobs are listed.
    launcher.refresh(stdout);

    for line in launcher.list_jobs() {
        let _ = writeln!(stdout, "{line}");
    }
    0
}

/// Bring a background or stopped job to the foreground and wait for it.
fn builtin_fg(args: &[String], launcher: &Launcher, stdout: &mut dyn Write) -> ShellResult<i32> {
    let id = parse_job_spec(args.first().map(String::as_str), launcher.current_job())?;
    launcher.bring_to_foreground(id, stdout)
}

/// Resume a stopped job in the background.
fn builtin_bg(args: &[String], launcher: &Launcher, stdout: &mut dyn Write) -> ShellResult<i32> {
    let id = parse_job_spec(args.first().map(String::as_str), launcher.current_job())?;
    launcher.resume_in_background(id, stdout)?;
    Ok(0)
}

// ── Helpers ──

/// Parse a job specifier (`%N`, `N`, `%+`, `%%`), falling back to `current`
/// when no argument is given.
pub fn parse_job_spec(arg: Option<&str>, current: Option<usize>) -> ShellResult<usize> {
    let Some(spec) = arg else {
        return current.ok_or(ShellError::NoCurrentJob);
    };

    let digits = spec.strip_prefix('%').unwrap_or(spec);
    if matches!(digits, "+" | "%") && spec.starts_with('%') {
        return current.ok_or(ShellError::NoCurrentJob);
    }

    match digits.parse::<usize>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ShellError::InvalidJobSpecifier(spec.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_control::ForegroundMarker;
    use crate::jobs::JobTable;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn run(program: &str, args: &[&str]) -> (BuiltinAction, String, String) {
        let launcher = Launcher::new(
            Arc::new(Mutex::new(JobTable::new())),
            Arc::new(ForegroundMarker::new()),
            Duration::from_millis(100),
        );
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let action = execute(program, &args, &mut stdout, &mut stderr, &launcher);
        (
            action,
            String::from_utf8(stdout).unwrap(),
            String::from_utf8(stderr).unwrap(),
        )
    }

    #[test]
    fn recognizes_builtins() {
        for name in ["cd", "echo", "exit", "help", "jobs", "fg", "bg"] {
            assert!(is_builtin(name), "{name}");
        }
        assert!(!is_builtin("ls"));
    }

    #[test]
    fn job_specs() {
        assert_eq!(parse_job_spec(Some("%3"), None).unwrap(), 3);
        assert_eq!(parse_job_spec(Some("3"), None).unwrap(), 3);
        assert_eq!(parse_job_spec(None, Some(2)).unwrap(), 2);
        assert_eq!(parse_job_spec(Some("%+"), Some(5)).unwrap(), 5);
        assert_eq!(parse_job_spec(Some("%%"), Some(5)).unwrap(), 5);
        assert!(matches!(parse_job_spec(None, None), Err(ShellError::NoCurrentJob)));
        assert!(matches!(
            parse_job_spec(Some("%abc"), Some(1)),
            Err(ShellError::InvalidJobSpecifier(s)) if s == "%abc"
        ));
        assert!(matches!(
            parse_job_spec(Some("%0"), Some(1)),
            Err(ShellError::InvalidJobSpecifier(_))
        ));
        assert!(matches!(
            parse_job_spec(Some("+"), Some(1)),
            Err(ShellError::InvalidJobSpecifier(_))
        ));
    }

    #[test]
    fn echo_joins_arguments() {
        let (action, out, _) = run("echo", &["a", "b  c"]);
        assert_eq!(action, BuiltinAction::Continue(0));
        assert_eq!(out, "a b  c\n");
    }

    #[test]
    fn exit_masks_status_and_says_bye() {
        let (action, out, _) = run("exit", &["258"]);
        assert_eq!(action, BuiltinAction::Exit(2));
        assert_eq!(out, "bye\n");

        let (action, _, err) = run("exit", &["x"]);
        assert_eq!(action, BuiltinAction::Exit(2));
        assert!(err.contains("numeric argument required"));
    }

    #[test]
    fn fg_without_jobs_fails() {
        let (action, _, err) = run("fg", &[]);
        assert_eq!(action, BuiltinAction::Continue(1));
        assert_eq!(err, "icsh: fg: no current job\n");

        let (action, _, err) = run("bg", &["%7"]);
        assert_eq!(action, BuiltinAction::Continue(1));
        assert_eq!(err, "icsh: bg: %7: no such job\n");
    }

    #[test]
    fn jobs_on_empty_table_prints_nothing() {
        let (action, out, _) = run("jobs", &[]);
        assert_eq!(action, BuiltinAction::Continue(0));
        assert!(out.is_empty());
    }
}
