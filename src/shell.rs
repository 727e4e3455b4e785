use std::io::{self, BufRead, Write};
use std::sync::Arc;

use log::{debug, trace};

use crate::builtins::{self, BuiltinAction};
use crate::config::ShellConfig;
use crate::executor::Launcher;
use crate::job_control::ForegroundMarker;
use crate::jobs::SharedJobs;
use crate::parser;
use crate::redirect;

const PROMPT: &str = "icsh $ ";

/// The command loop: one line at a time, built-ins in process, everything
/// else through the [`Launcher`].
pub struct Shell {
    launcher: Launcher,
    last_status: i32,
    last_line: Option<String>,
}

impl Shell {
    pub fn new(config: &ShellConfig, jobs: SharedJobs, foreground: Arc<ForegroundMarker>) -> Self {
        Self {
            launcher: Launcher::new(jobs, foreground, config.exit_grace),
            last_status: 0,
            last_line: None,
        }
    }

    /// Read and execute lines until EOF or `exit`. Returns the exit status.
    pub fn run(&mut self, input: &mut dyn BufRead, interactive: bool) -> i32 {
        let mut stdout = io::stdout();
        let prompt = if interactive { PROMPT } else { "" };

        loop {
            // Notifications queued while a command ran are printed here; while
            // blocked on input the signal bridge prints them itself.
            self.launcher.await_input(prompt, &mut stdout);

            let mut line = String::new();
            let read = input.read_line(&mut line);
            self.launcher.input_received();
            match read {
                Ok(0) => {
                    if interactive {
                        println!();
                    }
                    break;
                }
                Ok(_) => {
                    if let Some(code) = self.execute_line(&line) {
                        return code;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    eprintln!("icsh: error reading input: {e}");
                    break;
                }
            }
        }

        self.last_status
    }

    /// Execute one input line. Returns `Some(status)` when the shell should exit.
    pub fn execute_line(&mut self, line: &str) -> Option<i32> {
        let line = self.recall(line.trim_end_matches(['\n', '\r']))?;
        let mut command = parser::parse(&line)?;
        parser::expand_status(&mut command.words, self.last_status);
        trace!("dispatching {command:?}");

        let resolved = match redirect::resolve(&command.words) {
            Ok(resolved) => resolved,
            Err(e) => {
                eprintln!("icsh: {e}");
                self.last_status = e.exit_code();
                return None;
            }
        };

        let program = resolved.args.first().cloned().unwrap_or_default();
        if builtins::is_builtin(&program) {
            let mut stdout: Box<dyn Write> = match resolved.output {
                Some(file) => Box::new(file),
                None => Box::new(io::stdout()),
            };
            let action = builtins::execute(
                &program,
                &resolved.args[1..],
                stdout.as_mut(),
                &mut io::stderr(),
                &self.launcher,
            );
            let _ = stdout.flush();
            return match action {
                BuiltinAction::Continue(code) => {
                    self.last_status = code;
                    None
                }
                BuiltinAction::Exit(code) => Some(code),
            };
        }

        self.last_status = match self.launcher.launch(
            resolved,
            command.background,
            &command.display,
            &mut io::stdout(),
        ) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("icsh: {e}");
                e.exit_code()
            }
        };
        debug!("last status {}", self.last_status);
        None
    }

    /// `!!` history: replay the previous line, or remember this one.
    fn recall(&mut self, line: &str) -> Option<String> {
        if line.trim() == "!!" {
            let previous = self.last_line.clone()?;
            println!("{previous}");
            return Some(previous);
        }

        if !line.trim().is_empty() {
            self.last_line = Some(line.to_string());
        }
        Some(line.to_string())
    }

    /// Terminate and reap all remaining jobs.
    pub fn shutdown(&self) {
        self.launcher.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobTable;
    use std::sync::Mutex;

    fn shell() -> Shell {
        Shell::new(
            &ShellConfig::default(),
            Arc::new(Mutex::new(JobTable::new())),
            Arc::new(ForegroundMarker::new()),
        )
    }

    #[test]
    fn last_status_follows_commands() {
        let mut sh = shell();
        assert_eq!(sh.execute_line("sh -c 'exit 5'\n"), None);
        assert_eq!(sh.last_status, 5);
        assert_eq!(sh.execute_line("true"), None);
        assert_eq!(sh.last_status, 0);
        assert_eq!(sh.execute_line("icsh-definitely-missing"), None);
        assert_eq!(sh.last_status, 127);
    }

    #[test]
    fn bang_bang_repeats_previous_line() {
        let mut sh = shell();
        assert_eq!(sh.recall("!!"), None);
        sh.execute_line("sh -c 'exit 9'");
        sh.execute_line("true");
        assert_eq!(sh.last_status, 0);
        assert_eq!(sh.recall("!!").as_deref(), Some("true"));
        assert_eq!(sh.recall("   "), Some("   ".to_string()));
        assert_eq!(sh.recall("!!").as_deref(), Some("true"));
    }

    #[test]
    fn redirection_errors_set_failing_status() {
        let mut sh = shell();
        assert_eq!(sh.execute_line("echo hi > a > b"), None);
        assert_eq!(sh.last_status, 1);
        assert_eq!(sh.execute_line("echo hi >"), None);
        assert_eq!(sh.last_status, 1);
    }

    #[test]
    fn quoted_operator_is_an_argument() {
        let mut sh = shell();
        assert_eq!(sh.execute_line("echo '>'"), None);
        assert_eq!(sh.last_status, 0);
        assert_eq!(sh.execute_line(r"echo \<"), None);
        assert_eq!(sh.last_status, 0);
    }

    #[test]
    fn exit_builtin_ends_the_loop() {
        let mut sh = shell();
        assert_eq!(sh.execute_line("exit 3"), Some(3));
    }

    #[test]
    fn run_stops_at_exit_and_returns_status() {
        let mut sh = shell();
        let mut input = io::Cursor::new("sh -c 'exit 4'\nexit\necho never\n");
        assert_eq!(sh.run(&mut input, false), 0);
    }

    #[test]
    fn run_returns_last_status_at_eof() {
        let mut sh = shell();
        let mut input = io::Cursor::new("sh -c 'exit 6'\n");
        assert_eq!(sh.run(&mut input, false), 6);
    }
}
