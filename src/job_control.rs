use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::status::WaitEvent;

/// The process currently blocking the command loop, or none.
///
/// Stored as a `kill(2)` target: a positive pid for a single process, a
/// negated pid for a job leading its own process group. Written only by the
/// launcher on the main thread; read by the signal bridge when forwarding
/// SIGINT / SIGTSTP.
#[derive(Debug, Default)]
pub struct ForegroundMarker(AtomicI32);

impl ForegroundMarker {
    pub fn new() -> Self {
        Self(AtomicI32::new(0))
    }

    pub fn set(&self, pid: libc::pid_t, own_group: bool) {
        let target = if own_group { -pid } else { pid };
        self.0.store(target, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn get(&self) -> Option<libc::pid_t> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            target => Some(target.abs()),
        }
    }

    /// Where a forwarded signal should go.
    pub(crate) fn signal_target(&self) -> Option<libc::pid_t> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            target => Some(target),
        }
    }
}

/// Non-blocking status probe for one child. `Ok(None)` means nothing changed.
pub(crate) fn probe(pid: libc::pid_t) -> io::Result<Option<WaitEvent>> {
    let flags = libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED;
    let mut raw_status: libc::c_int = 0;

    loop {
        let rc = unsafe { libc::waitpid(pid, &mut raw_status, flags) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        if rc == 0 {
            return Ok(None);
        }
        return Ok(WaitEvent::from_raw(raw_status));
    }
}

/// Block until `pid` exits, is killed, or stops.
///
/// Retries on EINTR: the shell itself receives SIGINT/SIGTSTP while waiting.
pub(crate) fn wait_for_pid(pid: libc::pid_t) -> io::Result<WaitEvent> {
    let mut raw_status: libc::c_int = 0;

    loop {
        let rc = unsafe { libc::waitpid(pid, &mut raw_status, libc::WUNTRACED) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        match WaitEvent::from_raw(raw_status) {
            Some(WaitEvent::Continued) | None => continue,
            Some(event) => return Ok(event),
        }
    }
}

/// Poll `pid` until it is gone or `grace` elapses. Returns true if it was reaped.
pub(crate) fn wait_with_grace(pid: libc::pid_t, grace: Duration) -> io::Result<bool> {
    let deadline = Instant::now() + grace;

    loop {
        let mut raw_status: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(pid, &mut raw_status, libc::WNOHANG) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        if rc == pid && WaitEvent::from_raw(raw_status).is_some_and(WaitEvent::is_terminal) {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Reap `pid` with a blocking wait, ignoring stop/continue reports.
pub(crate) fn reap(pid: libc::pid_t) -> io::Result<()> {
    let mut raw_status: libc::c_int = 0;

    loop {
        let rc = unsafe { libc::waitpid(pid, &mut raw_status, 0) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        if WaitEvent::from_raw(raw_status).is_some_and(WaitEvent::is_terminal) {
            return Ok(());
        }
    }
}

/// Send `signal` to a `kill(2)` target: a pid, or a negated process group id.
pub(crate) fn send_signal(target: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    // 0 and -1 would address our own group or every process we may signal.
    if target == 0 || target == -1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process id",
        ));
    }

    loop {
        let rc = unsafe { libc::kill(target, signal) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// Parent-side half of putting a background child in its own group; the
/// child does the same before exec, whichever runs first wins.
pub(crate) fn set_process_group(pid: libc::pid_t, pgid: libc::pid_t) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::setpgid(pid, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            // Already exec'd or gone; caller can proceed with best-effort behavior.
            Some(code) if code == libc::EACCES || code == libc::ESRCH => return Ok(()),
            _ => return Err(err),
        }
    }
}

/// Runs in the forked child before exec. Only async-signal-safe calls.
///
/// Restores default dispositions for the signals the shell intercepts and,
/// for background jobs, moves the child into its own process group so
/// terminal-generated interrupts reach only the shell's group.
pub(crate) fn prepare_child(background: bool) -> io::Result<()> {
    for signal in [
        libc::SIGINT,
        libc::SIGQUIT,
        libc::SIGTSTP,
        libc::SIGCHLD,
        libc::SIGTTIN,
        libc::SIGTTOU,
    ] {
        if unsafe { libc::signal(signal, libc::SIG_DFL) } == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }

    if background && unsafe { libc::setpgid(0, 0) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
