use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, trace, warn};
use signal_hook::consts::{SIGCHLD, SIGTSTP};
use signal_hook::iterator::{Handle, Signals};

use crate::error::{ShellError, ShellResult};
use crate::job_control::{self, ForegroundMarker};
use crate::jobs::{self, JobTable, SharedJobs};

/// What an incoming signal asks the shell to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGINT: interrupt the foreground process.
    Interrupt,
    /// SIGTSTP: suspend the foreground process.
    Suspend,
    /// SIGCHLD: some child exited, stopped, or continued.
    ChildChanged,
}

impl SignalEvent {
    pub fn from_signal(signal: libc::c_int) -> Option<Self> {
        match signal {
            libc::SIGINT => Some(SignalEvent::Interrupt),
            libc::SIGTSTP => Some(SignalEvent::Suspend),
            libc::SIGCHLD => Some(SignalEvent::ChildChanged),
            _ => None,
        }
    }
}

/// Turns asynchronous signal delivery into ordinary-context work.
///
/// The handlers themselves only write to a self-pipe (ctrlc for SIGINT,
/// signal-hook for SIGCHLD/SIGTSTP). Everything else, including job table
/// mutation and output, happens on the consumer threads.
pub struct SignalBridge {
    handle: Handle,
    consumer: Option<JoinHandle<()>>,
}

impl SignalBridge {
    pub fn install(jobs: SharedJobs, foreground: Arc<ForegroundMarker>) -> ShellResult<Self> {
        let interrupt_target = Arc::clone(&foreground);
        ctrlc::set_handler(move || forward(&interrupt_target, libc::SIGINT))
            .map_err(|e| ShellError::SignalSetup(e.to_string()))?;

        let mut signals = Signals::new([SIGCHLD, SIGTSTP])
            .map_err(|e| ShellError::SignalSetup(e.to_string()))?;
        let handle = signals.handle();

        let consumer = thread::Builder::new()
            .name("icsh-signals".into())
            .spawn(move || {
                for signal in signals.forever() {
                    if let Some(event) = SignalEvent::from_signal(signal) {
                        dispatch(event, &jobs, &foreground, &mut io::stdout());
                    }
                }
                debug!("signal consumer stopped");
            })?;

        Ok(Self {
            handle,
            consumer: Some(consumer),
        })
    }

    /// Stop consuming signals. Pending SIGCHLD reports stay queued in the
    /// kernel; the caller reaps the remaining jobs itself.
    pub fn close(&mut self) {
        self.handle.close();
        if let Some(consumer) = self.consumer.take() {
            if consumer.join().is_err() {
                warn!("signal consumer panicked");
            }
        }
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        self.close();
    }
}

/// Apply one signal event.
///
/// Lock order is job table, then `out`; the command loop never holds stdout
/// while waiting for the table. Job notifications are printed here only while
/// the loop sits at its prompt, so they never split a line of output.
pub fn dispatch(
    event: SignalEvent,
    jobs: &Mutex<JobTable>,
    foreground: &ForegroundMarker,
    out: &mut dyn Write,
) {
    trace!("signal event {event:?}");
    match event {
        SignalEvent::Interrupt => forward(foreground, libc::SIGINT),
        SignalEvent::Suspend => forward(foreground, libc::SIGTSTP),
        // The foreground child is never in the table, so its status is left
        // for the launcher's blocking wait.
        SignalEvent::ChildChanged => {
            let mut table = jobs::lock(jobs);
            table.refresh_all();
            table.notify_if_idle(out);
        }
    }
}

fn forward(foreground: &ForegroundMarker, signal: libc::c_int) {
    let Some(target) = foreground.signal_target() else {
        return;
    };
    debug!("forwarding signal {signal} to foreground target {target}");
    if let Err(e) = job_control::send_signal(target, signal) {
        // ESRCH: the child exited between the read and the kill.
        debug!("forward to {target} failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_control::wait_for_pid;
    use crate::status::WaitEvent;
    use std::process::Command;
    use std::time::Duration;

    #[test]
    fn maps_known_signals() {
        assert_eq!(SignalEvent::from_signal(libc::SIGINT), Some(SignalEvent::Interrupt));
        assert_eq!(SignalEvent::from_signal(libc::SIGTSTP), Some(SignalEvent::Suspend));
        assert_eq!(SignalEvent::from_signal(libc::SIGCHLD), Some(SignalEvent::ChildChanged));
        assert_eq!(SignalEvent::from_signal(libc::SIGUSR1), None);
    }

    #[test]
    fn interrupt_without_foreground_is_noop() {
        let jobs = Mutex::new(JobTable::new());
        let foreground = ForegroundMarker::new();
        let mut out = Vec::new();
        dispatch(SignalEvent::Interrupt, &jobs, &foreground, &mut out);
        dispatch(SignalEvent::Suspend, &jobs, &foreground, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn interrupt_reaches_foreground_process() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as libc::pid_t;
        let jobs = Mutex::new(JobTable::new());
        let foreground = ForegroundMarker::new();
        foreground.set(pid, false);

        dispatch(SignalEvent::Interrupt, &jobs, &foreground, &mut Vec::new());
        assert_eq!(wait_for_pid(pid).unwrap(), WaitEvent::Signaled(libc::SIGINT));
    }

    #[test]
    fn suspend_stops_foreground_process() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as libc::pid_t;
        let jobs = Mutex::new(JobTable::new());
        let foreground = ForegroundMarker::new();
        foreground.set(pid, false);

        dispatch(SignalEvent::Suspend, &jobs, &foreground, &mut Vec::new());
        assert_eq!(wait_for_pid(pid).unwrap(), WaitEvent::Stopped(libc::SIGTSTP));

        job_control::send_signal(pid, libc::SIGKILL).unwrap();
        job_control::reap(pid).unwrap();
    }

    fn spawn_tracked(jobs: &Mutex<JobTable>, program: &str) -> libc::pid_t {
        let child = Command::new(program).spawn().unwrap();
        let pid = child.id() as libc::pid_t;
        jobs::lock(jobs).add(pid, program).unwrap();
        pid
    }

    #[test]
    fn child_change_reports_at_prompt() {
        let jobs = Mutex::new(JobTable::new());
        jobs::lock(&jobs).set_reading(Some("icsh $ "));
        spawn_tracked(&jobs, "true");
        let foreground = ForegroundMarker::new();

        let mut out = Vec::new();
        for _ in 0..200 {
            dispatch(SignalEvent::ChildChanged, &jobs, &foreground, &mut out);
            if !out.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(String::from_utf8(out).unwrap(), "\n[1]+ Done\ttrue\nicsh $ ");
        assert!(jobs::lock(&jobs).is_empty());
    }

    #[test]
    fn child_change_while_busy_is_queued() {
        let jobs = Mutex::new(JobTable::new());
        spawn_tracked(&jobs, "true");
        let foreground = ForegroundMarker::new();

        let mut out = Vec::new();
        for _ in 0..200 {
            dispatch(SignalEvent::ChildChanged, &jobs, &foreground, &mut out);
            if jobs::lock(&jobs).is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(jobs::lock(&jobs).is_empty());
        assert!(out.is_empty());

        jobs::lock(&jobs).flush_notifications(&mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "[1]+ Done\ttrue\n");
    }
}
