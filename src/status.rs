/// A decoded child state change, as reported by `waitpid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitEvent {
    /// Exited normally with the given code.
    Exited(i32),
    /// Terminated by the given signal.
    Signaled(i32),
    /// Stopped by the given signal.
    Stopped(i32),
    /// Resumed by SIGCONT.
    Continued,
}

impl WaitEvent {
    /// Decode a raw wait status. Returns `None` for statuses that carry no
    /// state change we track.
    pub fn from_raw(raw_status: libc::c_int) -> Option<Self> {
        if unsafe { libc::WIFEXITED(raw_status) } {
            return Some(WaitEvent::Exited(unsafe { libc::WEXITSTATUS(raw_status) }));
        }

        if unsafe { libc::WIFSIGNALED(raw_status) } {
            return Some(WaitEvent::Signaled(unsafe { libc::WTERMSIG(raw_status) }));
        }

        if unsafe { libc::WIFSTOPPED(raw_status) } {
            return Some(WaitEvent::Stopped(unsafe { libc::WSTOPSIG(raw_status) }));
        }

        if unsafe { libc::WIFCONTINUED(raw_status) } {
            return Some(WaitEvent::Continued);
        }

        None
    }

    /// Shell-style exit code for this event.
    ///
    /// Processes terminated or stopped by a signal map to `128 + signal`.
    pub fn exit_code(self) -> i32 {
        match self {
            WaitEvent::Exited(code) => code,
            WaitEvent::Signaled(signal) | WaitEvent::Stopped(signal) => 128 + signal,
            WaitEvent::Continued => 0,
        }
    }

    /// True once the process is gone and must not be waited on again.
    pub fn is_terminal(self) -> bool {
        matches!(self, WaitEvent::Exited(_) | WaitEvent::Signaled(_))
    }
}
