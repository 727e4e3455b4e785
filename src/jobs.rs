use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::error::{ShellError, ShellResult};
use crate::job_control;
use crate::status::WaitEvent;

/// Live jobs tracked at once, unless overridden on the command line.
pub const MAX_JOBS: usize = 32;

/// Job ids wrap back to 1 once the counter passes this value.
pub const MAX_JOB_ID: usize = 32768;

/// The job table as shared between the command loop and the signal bridge.
pub type SharedJobs = Arc<Mutex<JobTable>>;

/// Lock the shared table. A panic while holding the lock leaves the table
/// structurally valid, so poisoning is ignored.
pub fn lock(jobs: &Mutex<JobTable>) -> MutexGuard<'_, JobTable> {
    jobs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The lifecycle state of a live job. `Done` jobs are removed, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
}

impl JobStatus {
    fn label(self) -> &'static str {
        match self {
            JobStatus::Running => "Running",
            JobStatus::Stopped => "Stopped",
        }
    }
}

/// A single tracked background or stopped job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: usize,
    pub pid: libc::pid_t,
    pub command: String,
    pub status: JobStatus,
    /// Launched in the background as leader of its own process group.
    /// Jobs stopped in the foreground share the shell's group.
    pub own_group: bool,
    sequence: u64,
}

impl Job {
    /// `kill(2)` target reaching the whole job.
    pub fn signal_target(&self) -> libc::pid_t {
        if self.own_group { -self.pid } else { self.pid }
    }

    /// `[N]+ <what>\t<command>` as printed for every state change.
    pub fn notification(&self, what: &str) -> String {
        format!("[{}]+ {}\t{}", self.id, what, self.command)
    }
}

/// The shell's job table: a fixed number of slots, freed slots left empty
/// so a scan that removes entries never skips one.
///
/// Also holds the notification lines not yet printed, and children that did
/// not fit in a slot but still have to be reaped.
#[derive(Debug)]
pub struct JobTable {
    slots: Vec<Option<Job>>,
    next_id: usize,
    max_id: usize,
    next_sequence: u64,
    pending: Vec<String>,
    untracked: Vec<libc::pid_t>,
    /// `Some(prompt)` while the command loop is blocked reading a line.
    reading: Option<&'static str>,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self::with_limits(MAX_JOBS, MAX_JOB_ID)
    }

    pub fn with_limits(capacity: usize, max_id: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            next_id: 1,
            max_id: max_id.max(capacity),
            next_sequence: 0,
            pending: Vec::new(),
            untracked: Vec::new(),
            reading: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Track a newly launched background job, which leads its own process
    /// group. Returns its id.
    pub fn add(&mut self, pid: libc::pid_t, command: &str) -> ShellResult<usize> {
        self.insert(pid, command, JobStatus::Running, true)
    }

    /// Track a foreground process that was stopped before it exited.
    pub fn add_stopped(&mut self, pid: libc::pid_t, command: &str) -> ShellResult<usize> {
        self.insert(pid, command, JobStatus::Stopped, false)
    }

    fn insert(
        &mut self,
        pid: libc::pid_t,
        command: &str,
        status: JobStatus,
        own_group: bool,
    ) -> ShellResult<usize> {
        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            return Err(ShellError::JobTableFull {
                pid,
                capacity: self.capacity(),
            });
        };

        let id = self.allocate_id();
        let sequence = self.bump_sequence();
        self.slots[slot] = Some(Job {
            id,
            pid,
            command: command.to_string(),
            status,
            own_group,
            sequence,
        });
        debug!("job [{id}] pid {pid} tracked as {status:?}: {command}");
        Ok(id)
    }

    /// Put a job that was moved to the foreground back under its old id.
    /// It becomes the current job.
    pub fn reinsert(&mut self, mut job: Job) -> ShellResult<usize> {
        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            return Err(ShellError::JobTableFull {
                pid: job.pid,
                capacity: self.capacity(),
            });
        };
        if self.find(job.id).is_some() {
            job.id = self.allocate_id();
        }

        job.sequence = self.bump_sequence();
        let id = job.id;
        self.slots[slot] = Some(job);
        Ok(id)
    }

    /// Next id: increasing from 1, wrapping past `max_id`, skipping live ids.
    /// A free slot exists whenever this runs, so some id is always free.
    fn allocate_id(&mut self) -> usize {
        loop {
            if self.next_id > self.max_id {
                self.next_id = 1;
            }
            let candidate = self.next_id;
            self.next_id += 1;
            if self.find(candidate).is_none() {
                return candidate;
            }
        }
    }

    fn bump_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    pub fn remove(&mut self, id: usize) -> Option<Job> {
        self.slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|job| job.id == id))
            .and_then(Option::take)
    }

    pub fn find(&self, id: usize) -> Option<&Job> {
        self.slots.iter().flatten().find(|job| job.id == id)
    }

    pub fn find_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.slots.iter_mut().flatten().find(|job| job.id == id)
    }

    /// Id of the most recently added live job: the `+` job and the default
    /// target of `fg` / `bg`.
    pub fn current_id(&self) -> Option<usize> {
        self.slots
            .iter()
            .flatten()
            .max_by_key(|job| job.sequence)
            .map(|job| job.id)
    }

    /// Live jobs in id order.
    pub fn jobs_sorted(&self) -> Vec<&Job> {
        let mut list: Vec<&Job> = self.slots.iter().flatten().collect();
        list.sort_by_key(|job| job.id);
        list
    }

    /// One `jobs` line per live job.
    pub fn list(&self) -> Vec<String> {
        let current = self.current_id();
        self.jobs_sorted()
            .into_iter()
            .map(|job| {
                let marker = if Some(job.id) == current { '+' } else { '-' };
                format!("[{}]{} {}\t{}", job.id, marker, job.status.label(), job.command)
            })
            .collect()
    }

    /// Probe every live job without blocking and queue a notification for
    /// each transition.
    pub fn refresh_all(&mut self) {
        self.refresh_with(job_control::probe);
    }

    /// [`JobTable::refresh_all`] with an explicit probe.
    pub fn refresh_with<F>(&mut self, mut probe: F)
    where
        F: FnMut(libc::pid_t) -> io::Result<Option<WaitEvent>>,
    {
        for slot in self.slots.iter_mut() {
            let Some(job) = slot.as_mut() else {
                continue;
            };

            // Drain every pending report for this pid before moving on.
            loop {
                let event = match probe(job.pid) {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(e) => {
                        // ECHILD: someone else reaped it; nothing more will come.
                        warn!("job [{}] pid {}: {e}", job.id, job.pid);
                        if e.raw_os_error() == Some(libc::ECHILD) {
                            self.pending.push(job.notification("Done"));
                            *slot = None;
                        }
                        break;
                    }
                };

                match apply_event(job, event) {
                    Transition::Report(line) => self.pending.push(line),
                    Transition::Finished(line) => {
                        self.pending.push(line);
                        debug!("job [{}] pid {} removed", job.id, job.pid);
                        *slot = None;
                        break;
                    }
                    Transition::Unchanged => {}
                }
            }
        }

        self.untracked.retain(|&pid| !untracked_finished(pid, &mut probe));
    }

    /// Write out every queued notification.
    pub fn flush_notifications(&mut self, out: &mut dyn Write) {
        for line in self.pending.drain(..) {
            let _ = writeln!(out, "{line}");
        }
        let _ = out.flush();
    }

    /// Record whether the command loop is blocked reading input, and with
    /// which prompt on screen.
    pub fn set_reading(&mut self, prompt: Option<&'static str>) {
        self.reading = prompt;
    }

    /// Print queued notifications only if the command loop is idle at its
    /// prompt, then redraw the prompt. Otherwise they wait for the next one.
    pub fn notify_if_idle(&mut self, out: &mut dyn Write) {
        let Some(prompt) = self.reading else {
            return;
        };
        if self.pending.is_empty() {
            return;
        }

        if !prompt.is_empty() {
            let _ = writeln!(out);
        }
        self.flush_notifications(out);
        let _ = write!(out, "{prompt}");
        let _ = out.flush();
    }

    /// Remember a child that could not get a slot so it is still reaped and
    /// terminated on exit.
    pub fn add_untracked(&mut self, pid: libc::pid_t) {
        debug!("pid {pid} kept outside the job table");
        self.untracked.push(pid);
    }

    pub fn drain_untracked(&mut self) -> Vec<libc::pid_t> {
        std::mem::take(&mut self.untracked)
    }

    /// Empty the table, handing back every live job.
    pub fn drain(&mut self) -> Vec<Job> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

/// Reap an untracked child if it has finished. Stops and continues are
/// consumed silently.
fn untracked_finished<F>(pid: libc::pid_t, probe: &mut F) -> bool
where
    F: FnMut(libc::pid_t) -> io::Result<Option<WaitEvent>>,
{
    loop {
        match probe(pid) {
            Ok(Some(event)) if event.is_terminal() => {
                debug!("untracked pid {pid} reaped: {event:?}");
                return true;
            }
            Ok(Some(_)) => {}
            Ok(None) => return false,
            Err(e) => {
                debug!("untracked pid {pid}: {e}");
                return true;
            }
        }
    }
}

enum Transition {
    Unchanged,
    Report(String),
    Finished(String),
}

fn apply_event(job: &mut Job, event: WaitEvent) -> Transition {
    match event {
        WaitEvent::Exited(_) => Transition::Finished(job.notification("Done")),
        WaitEvent::Signaled(signal) => {
            Transition::Finished(job.notification(&format!("Terminated by signal {signal}")))
        }
        WaitEvent::Stopped(_) if job.status == JobStatus::Stopped => Transition::Unchanged,
        WaitEvent::Stopped(_) => {
            job.status = JobStatus::Stopped;
            Transition::Report(job.notification("Stopped"))
        }
        WaitEvent::Continued if job.status == JobStatus::Running => Transition::Unchanged,
        WaitEvent::Continued => {
            job.status = JobStatus::Running;
            Transition::Report(job.notification("Continued"))
        }
    }
}
