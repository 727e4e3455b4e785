use std::io::{self, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{ShellError, ShellResult};
use crate::job_control::{self, ForegroundMarker};
use crate::jobs::{self, JobStatus, JobTable, SharedJobs};
use crate::redirect::Resolved;
use crate::status::WaitEvent;

/// Creates child processes and owns foreground/background scheduling.
///
/// Shares the job table and the foreground marker with the signal bridge.
pub struct Launcher {
    jobs: SharedJobs,
    foreground: Arc<ForegroundMarker>,
    exit_grace: Duration,
}

impl Launcher {
    pub fn new(jobs: SharedJobs, foreground: Arc<ForegroundMarker>, exit_grace: Duration) -> Self {
        Self {
            jobs,
            foreground,
            exit_grace,
        }
    }

    /// Run an external command. Returns the last status for this step.
    ///
    /// Foreground commands block until they exit or stop; background ones
    /// are registered and reported as `[id] pid` immediately.
    pub fn launch(
        &self,
        command: Resolved,
        background: bool,
        display: &str,
        out: &mut dyn Write,
    ) -> ShellResult<i32> {
        if command.args.is_empty() {
            // Only redirections: the files were opened, nothing to run.
            return Ok(0);
        }

        if background {
            self.launch_background(command, display, out)
        } else {
            self.launch_foreground(command, display, out)
        }
    }

    fn launch_foreground(
        &self,
        command: Resolved,
        display: &str,
        out: &mut dyn Write,
    ) -> ShellResult<i32> {
        let child = spawn(command, false)?;
        let pid = child.id() as libc::pid_t;
        debug!("foreground pid {pid}: {display}");

        self.foreground.set(pid, false);
        let waited = job_control::wait_for_pid(pid);
        self.foreground.clear();

        match waited? {
            WaitEvent::Stopped(signal) => {
                let mut table = jobs::lock(&self.jobs);
                let id = match table.add_stopped(pid, display) {
                    Ok(id) => id,
                    Err(e) => {
                        table.add_untracked(pid);
                        return Err(e);
                    }
                };
                report_stopped(&table, id, out);
                Ok(128 + signal)
            }
            event => Ok(event.exit_code()),
        }
    }

    fn launch_background(
        &self,
        command: Resolved,
        display: &str,
        out: &mut dyn Write,
    ) -> ShellResult<i32> {
        // Held across spawn and registration so a fast exit cannot be
        // probed before the job exists.
        let mut table = jobs::lock(&self.jobs);

        let child = spawn(command, true)?;
        let pid = child.id() as libc::pid_t;
        if let Err(e) = job_control::set_process_group(pid, pid) {
            warn!("setpgid({pid}): {e}");
        }

        let id = match table.add(pid, display) {
            Ok(id) => id,
            Err(e) => {
                table.add_untracked(pid);
                return Err(e);
            }
        };
        info!("background job [{id}] pid {pid}: {display}");
        let _ = writeln!(out, "[{id}] {pid}");
        let _ = out.flush();
        Ok(0)
    }

    /// `fg`: continue a job if stopped and wait for it in the foreground.
    pub fn bring_to_foreground(&self, id: usize, out: &mut dyn Write) -> ShellResult<i32> {
        // Taking the job out and setting the marker under one lock keeps the
        // bridge from probing the pid once it belongs to the foreground.
        let mut job = {
            let mut table = jobs::lock(&self.jobs);
            let job = table.remove(id).ok_or(ShellError::JobNotFound(id))?;
            self.foreground.set(job.pid, job.own_group);
            job
        };

        let _ = writeln!(out, "{}", job.command);
        let _ = out.flush();

        if job.status == JobStatus::Stopped {
            if let Err(e) = job_control::send_signal(job.signal_target(), libc::SIGCONT) {
                self.foreground.clear();
                return Err(e.into());
            }
            job.status = JobStatus::Running;
        }

        let waited = job_control::wait_for_pid(job.pid);
        self.foreground.clear();

        match waited? {
            WaitEvent::Stopped(signal) => {
                job.status = JobStatus::Stopped;
                let pid = job.pid;
                let mut table = jobs::lock(&self.jobs);
                let id = match table.reinsert(job) {
                    Ok(id) => id,
                    Err(e) => {
                        table.add_untracked(pid);
                        return Err(e);
                    }
                };
                report_stopped(&table, id, out);
                Ok(128 + signal)
            }
            event => {
                debug!("job [{}] finished in foreground: {event:?}", job.id);
                Ok(event.exit_code())
            }
        }
    }

    /// `bg`: continue a stopped job without waiting for it.
    pub fn resume_in_background(&self, id: usize, out: &mut dyn Write) -> ShellResult<()> {
        let mut table = jobs::lock(&self.jobs);
        let job = table.find_mut(id).ok_or(ShellError::JobNotFound(id))?;
        if job.status == JobStatus::Running {
            return Err(ShellError::JobNotStopped(id));
        }

        job_control::send_signal(job.signal_target(), libc::SIGCONT)?;
        // Marked running before the lock is released, so the bridge treats
        // the coming SIGCONT report as no change.
        job.status = JobStatus::Running;
        let _ = writeln!(out, "{}", job.notification("Running"));
        let _ = out.flush();
        Ok(())
    }

    /// `jobs` output lines.
    pub fn list_jobs(&self) -> Vec<String> {
        jobs::lock(&self.jobs).list()
    }

    /// Default target for `fg` / `bg` without an argument.
    pub fn current_job(&self) -> Option<usize> {
        jobs::lock(&self.jobs).current_id()
    }

    /// Report and collect any background transitions that are pending.
    pub fn refresh(&self, out: &mut dyn Write) {
        let mut table = jobs::lock(&self.jobs);
        table.refresh_all();
        table.flush_notifications(out);
    }

    /// Report pending transitions, show `prompt` and mark the loop idle, all
    /// under one lock so the bridge cannot print in between.
    pub fn await_input(&self, prompt: &'static str, out: &mut dyn Write) {
        let mut table = jobs::lock(&self.jobs);
        table.refresh_all();
        table.flush_notifications(out);
        let _ = write!(out, "{prompt}");
        let _ = out.flush();
        table.set_reading(Some(prompt));
    }

    /// The loop has a line and is busy again.
    pub fn input_received(&self) {
        jobs::lock(&self.jobs).set_reading(None);
    }

    /// Terminate and reap every live job and untracked child. Called once,
    /// on the way out.
    pub fn shutdown(&self) {
        let leftovers: Vec<Leftover> = {
            let mut table = jobs::lock(&self.jobs);
            let tracked = table.drain().into_iter().map(|job| Leftover {
                pid: job.pid,
                target: job.signal_target(),
                stopped: job.status == JobStatus::Stopped,
            });
            let untracked = table.drain_untracked().into_iter().map(|pid| Leftover {
                pid,
                target: pid,
                // May be stopped; SIGCONT is harmless otherwise.
                stopped: true,
            });
            tracked.chain(untracked).collect()
        };
        if leftovers.is_empty() {
            return;
        }
        info!("terminating {} process(es)", leftovers.len());

        for leftover in &leftovers {
            terminate(leftover);
        }

        let deadline = Instant::now() + self.exit_grace;
        for leftover in &leftovers {
            let pid = leftover.pid;
            let grace = deadline.saturating_duration_since(Instant::now());
            match job_control::wait_with_grace(pid, grace) {
                Ok(true) => debug!("pid {pid} reaped"),
                Ok(false) => {
                    warn!("pid {pid} ignored SIGTERM; killing");
                    let _ = job_control::send_signal(leftover.target, libc::SIGKILL);
                    if let Err(e) = job_control::reap(pid) {
                        debug!("reap {pid}: {e}");
                    }
                }
                // ECHILD: already collected.
                Err(e) => debug!("wait {pid}: {e}"),
            }
        }
    }

    #[cfg(test)]
    fn table(&self) -> std::sync::MutexGuard<'_, JobTable> {
        jobs::lock(&self.jobs)
    }
}

fn spawn(command: Resolved, background: bool) -> ShellResult<Child> {
    let Resolved {
        args,
        input,
        output,
    } = command;
    let Some((program, rest)) = args.split_first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command").into());
    };

    let mut cmd = Command::new(program);
    cmd.args(rest);
    if let Some(file) = input {
        cmd.stdin(Stdio::from(file));
    }
    if let Some(file) = output {
        cmd.stdout(Stdio::from(file));
    }

    unsafe {
        cmd.pre_exec(move || job_control::prepare_child(background));
    }

    // `cmd` owns the parent's copies of the redirection files and closes
    // them when it goes out of scope here.
    cmd.spawn().map_err(|source| classify_spawn_error(program, source))
}

fn classify_spawn_error(program: &str, source: io::Error) -> ShellError {
    let program = program.to_string();
    match source.raw_os_error() {
        Some(libc::ENOENT | libc::EACCES | libc::ENOEXEC | libc::ENOTDIR | libc::EISDIR) => {
            ShellError::ExecFailure { program, source }
        }
        _ => ShellError::LaunchFailure { program, source },
    }
}

/// A child still alive when the shell exits.
struct Leftover {
    pid: libc::pid_t,
    target: libc::pid_t,
    stopped: bool,
}

fn terminate(leftover: &Leftover) {
    let target = leftover.target;
    debug!("sending SIGTERM to {target}");
    if let Err(e) = job_control::send_signal(target, libc::SIGTERM) {
        debug!("SIGTERM {target}: {e}");
    }
    if leftover.stopped {
        let _ = job_control::send_signal(target, libc::SIGCONT);
    }
}

fn report_stopped(table: &JobTable, id: usize, out: &mut dyn Write) {
    if let Some(job) = table.find(id) {
        let _ = writeln!(out, "\n{}", job.notification("Stopped"));
        let _ = out.flush();
    }
}
