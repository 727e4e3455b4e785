use std::fmt::{self, Display};
use std::io;

/// Everything that can go wrong while dispatching a command.
///
/// None of these end the shell; the dispatcher prints the error and records
/// [`ShellError::exit_code`] as the last status.
#[derive(Debug)]
pub enum ShellError {
    /// The child process could not be created (e.g. EAGAIN).
    LaunchFailure { program: String, source: io::Error },
    /// The program could not be found or executed.
    ExecFailure { program: String, source: io::Error },
    /// `<` or `>` without a filename.
    RedirectionSyntax { operator: char },
    /// A second `<` or `>` in the same command.
    DuplicateRedirection { operator: char },
    /// The redirection target could not be opened.
    RedirectionOpen { path: String, source: io::Error },
    JobNotFound(usize),
    InvalidJobSpecifier(String),
    NoCurrentJob,
    /// `bg` on a job that is already running.
    JobNotStopped(usize),
    /// The process was started but could not be tracked.
    JobTableFull { pid: libc::pid_t, capacity: usize },
    SignalSetup(String),
    Io(io::Error),
}

pub type ShellResult<T> = Result<T, ShellError>;

impl ShellError {
    /// The last-status value this error leaves behind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShellError::ExecFailure { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => 127,
                _ => 126,
            },
            _ => 1,
        }
    }
}

impl Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellError::LaunchFailure { program, source } => {
                write!(f, "{program}: cannot create process: {source}")
            }
            ShellError::ExecFailure { program, source } => match source.kind() {
                io::ErrorKind::NotFound => write!(f, "command not found: {program}"),
                _ => write!(f, "{program}: {source}"),
            },
            ShellError::RedirectionSyntax { operator } => {
                write!(f, "syntax error: expected filename after '{operator}'")
            }
            ShellError::DuplicateRedirection { operator } => {
                write!(f, "syntax error: duplicate '{operator}' redirection")
            }
            ShellError::RedirectionOpen { path, source } => write!(f, "{path}: {source}"),
            ShellError::JobNotFound(id) => write!(f, "%{id}: no such job"),
            ShellError::InvalidJobSpecifier(spec) => write!(f, "{spec}: invalid job specifier"),
            ShellError::NoCurrentJob => write!(f, "no current job"),
            ShellError::JobNotStopped(id) => write!(f, "job {id} already in background"),
            ShellError::JobTableFull { pid, capacity } => write!(
                f,
                "job table full ({capacity} jobs); process {pid} is not listed in jobs"
            ),
            ShellError::SignalSetup(msg) => write!(f, "cannot install signal handling: {msg}"),
            ShellError::Io(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for ShellError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShellError::LaunchFailure { source, .. }
            | ShellError::ExecFailure { source, .. }
            | ShellError::RedirectionOpen { source, .. } => Some(source),
            ShellError::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for ShellError {
    fn from(error: io::Error) -> Self {
        ShellError::Io(error)
    }
}
