//! Registry of the process groups the shell is tracking.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::{debug, warn};
use nix::sys::signal::{self, Signal};
use nix::sys::termios::Termios;
use nix::unistd::Pid;

use crate::core::job::{Job, JobId, JobStatus, Process, ProcessChange};
use crate::errors::{Error, Result};

/// Jobs keyed by id, with indexes by process group and by member pid.
///
/// Only the shell's main loop touches the table. The SIGCHLD handler never
/// does; it raises a flag that the main loop drains (see `SignalBridge`).
#[derive(Default)]
pub struct JobTable {
    jobs: BTreeMap<JobId, Job>,
    by_pgid: HashMap<Pid, JobId>,
    by_pid: HashMap<Pid, JobId>,
    job_count: u32,
}

impl JobTable {
    /// Registers a Running job for `pgid` under the next unused id.
    ///
    /// Ids increase monotonically for the life of the table, even across
    /// `reap` and `shutdown`.
    pub fn create(&mut self, pgid: Pid, input: &str, processes: Vec<Process>) -> Result<JobId> {
        if let Some(existing) = self.find_by_pgid(pgid) {
            if !existing.is_done() {
                return Err(Error::bookkeeping(format!(
                    "process group {} already belongs to job [{}]",
                    pgid,
                    existing.id()
                )));
            }
        }

        let job_id = self.get_next_job_id()?;
        for pid in processes.iter().filter_map(Process::id) {
            self.by_pid.insert(pid, job_id);
        }
        self.by_pgid.insert(pgid, job_id);
        self.jobs
            .insert(job_id, Job::new(job_id, input, pgid, processes));
        debug!("created job [{}] for process group {}", job_id, pgid);
        Ok(job_id)
    }

    pub fn find_by_id(&self, job_id: JobId) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    pub fn find_by_id_mut(&mut self, job_id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&job_id)
    }

    pub fn find_by_pgid(&self, pgid: Pid) -> Option<&Job> {
        self.by_pgid
            .get(&pgid)
            .and_then(|job_id| self.jobs.get(job_id))
    }

    /// The job with the highest id among those in `status`.
    pub fn most_recent(&self, status: JobStatus) -> Option<&Job> {
        self.jobs.values().rev().find(|job| job.status() == status)
    }

    /// Sets the status of the job owning `pgid`. Unknown groups are ignored,
    /// as notifications can outlive the jobs they were about.
    ///
    /// Returns `true` if a tracked job changed status.
    pub fn update_status(&mut self, pgid: Pid, status: JobStatus) -> bool {
        let job_id = match self.by_pgid.get(&pgid) {
            Some(job_id) => *job_id,
            None => {
                debug!("ignoring status {} for untracked group {}", status, pgid);
                return false;
            }
        };

        match self.jobs.get_mut(&job_id) {
            Some(job) => job.set_status(status),
            None => false,
        }
    }

    /// Marks the job owning `pgid` Stopped after it stopped in the foreground.
    /// The stop is shown right away, so it is not queued as a notice, and
    /// `tmodes` are reinstated when the job is resumed.
    pub fn mark_foreground_stop(&mut self, pgid: Pid, tmodes: Option<Termios>) -> Option<&Job> {
        let job = self.find_by_pgid_mut(pgid)?;
        job.set_status(JobStatus::Stopped);
        job.set_tmodes(tmodes);
        job.set_notified(true);
        Some(&*job)
    }

    /// Marks the job owning `pgid` Done after it finished in the foreground,
    /// with nothing left to announce.
    pub fn mark_foreground_done(&mut self, pgid: Pid) -> bool {
        match self.find_by_pgid_mut(pgid) {
            Some(job) => {
                let changed = job.set_status(JobStatus::Done);
                job.set_notified(true);
                changed
            }
            None => false,
        }
    }

    /// Records a state change of a single member process and recomputes the
    /// owning job's status. Unknown pids are ignored.
    ///
    /// Returns `true` if a tracked job changed status.
    pub fn mark_process_status(&mut self, pid: Pid, change: ProcessChange) -> bool {
        let jobs = &mut self.jobs;
        let job = match self.by_pid.get(&pid).and_then(|job_id| jobs.get_mut(job_id)) {
            Some(job) => job,
            None => {
                debug!("ignoring {:?} for untracked process {}", change, pid);
                return false;
            }
        };

        if let Some(process) = job
            .processes_mut()
            .iter_mut()
            .find(|p| p.id() == Some(pid))
        {
            change.apply(process);
        }
        job.refresh_status()
    }

    /// Removes every Done job, returning them in id order.
    pub fn reap(&mut self) -> Vec<Job> {
        let done: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| job.is_done())
            .map(Job::id)
            .collect();

        done.into_iter()
            .filter_map(|job_id| self.remove(job_id))
            .collect()
    }

    /// Asks every live tracked process group to terminate, then forgets all
    /// jobs. Stopped groups are continued so that they can act on the request.
    pub fn shutdown(&mut self) {
        for job in self.jobs.values().filter(|job| !job.is_done()) {
            debug!("terminating job [{}] (pgid {})", job.id(), job.pgid());
            let temp_result = signal::killpg(job.pgid(), Signal::SIGTERM);
            log_if_err!(temp_result, "failed to terminate job [{}]", job.id());
            if job.status() == JobStatus::Stopped {
                let temp_result = signal::killpg(job.pgid(), Signal::SIGCONT);
                log_if_err!(temp_result, "failed to continue job [{}]", job.id());
            }
        }

        self.jobs.clear();
        self.by_pgid.clear();
        self.by_pid.clear();
    }

    pub fn has_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }

    /// Jobs in id order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Process groups that may still report state changes.
    pub fn tracked_pgids(&self) -> Vec<Pid> {
        self.jobs
            .values()
            .filter(|job| !job.is_done())
            .map(Job::pgid)
            .collect()
    }

    /// One line for every job whose Stopped or Done status has not been
    /// announced yet; those jobs are then considered announced.
    pub fn pending_notices(&mut self) -> Vec<String> {
        self.jobs
            .values_mut()
            .filter(|job| !job.notified() && job.status() != JobStatus::Running)
            .map(|job| {
                job.set_notified(true);
                format!("{}", job)
            })
            .collect()
    }

    fn find_by_pgid_mut(&mut self, pgid: Pid) -> Option<&mut Job> {
        let jobs = &mut self.jobs;
        self.by_pgid
            .get(&pgid)
            .and_then(move |job_id| jobs.get_mut(job_id))
    }

    fn remove(&mut self, job_id: JobId) -> Option<Job> {
        let job = self.jobs.remove(&job_id)?;
        if self.by_pgid.get(&job.pgid()) == Some(&job_id) {
            self.by_pgid.remove(&job.pgid());
        }
        for pid in job.processes().iter().filter_map(Process::id) {
            if self.by_pid.get(&pid) == Some(&job_id) {
                self.by_pid.remove(&pid);
            }
        }
        Some(job)
    }

    fn get_next_job_id(&mut self) -> Result<JobId> {
        match self.job_count.checked_add(1) {
            Some(next) => {
                self.job_count = next;
                Ok(JobId(next))
            }
            None => {
                warn!("job ids exhausted after {}", self.job_count);
                Err(Error::bookkeeping("job ids exhausted"))
            }
        }
    }
}

impl fmt::Debug for JobTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} jobs\tjob_count: {}", self.jobs.len(), self.job_count)?;
        for job in self.jobs.values() {
            writeln!(f, "{:?}", job)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::os::unix::process::CommandExt;
    use std::process::{Command, ExitStatus};

    use nix::sys::wait::{self, WaitStatus};

    use crate::util::JcshExitStatusExt;

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    fn processes(raw: &[i32]) -> Vec<Process> {
        raw.iter()
            .map(|p| Process::new_external(&["cmd".to_string()], pid(*p)))
            .collect()
    }

    #[test]
    fn test_job_ids_are_never_reused() {
        let mut table = JobTable::default();
        let first = table.create(pid(100), "a", processes(&[100])).unwrap();
        assert_eq!(first, JobId(1));

        table.update_status(pid(100), JobStatus::Done);
        assert_eq!(table.reap().len(), 1);

        let second = table.create(pid(101), "b", processes(&[101])).unwrap();
        assert_eq!(second, JobId(2));
        table.update_status(pid(101), JobStatus::Done);
        table.reap();
        assert!(!table.has_jobs());

        let third = table.create(pid(100), "a again", processes(&[100])).unwrap();
        assert_eq!(third, JobId(3));
    }

    #[test]
    fn test_most_recent_prefers_highest_id() {
        let mut table = JobTable::default();
        for raw in 1..=5 {
            table.create(pid(raw * 10), "job", processes(&[raw * 10])).unwrap();
        }
        assert!(table.most_recent(JobStatus::Stopped).is_none());

        table.update_status(pid(20), JobStatus::Stopped);
        table.update_status(pid(50), JobStatus::Stopped);
        assert_eq!(table.most_recent(JobStatus::Stopped).unwrap().id(), JobId(5));
        assert_eq!(table.most_recent(JobStatus::Running).unwrap().id(), JobId(4));

        table.update_status(pid(50), JobStatus::Done);
        table.reap();
        assert_eq!(table.most_recent(JobStatus::Stopped).unwrap().id(), JobId(2));
    }

    #[test]
    fn test_find() {
        let mut table = JobTable::default();
        let job_id = table.create(pid(300), "sleep 5 &", processes(&[300, 301])).unwrap();

        assert_eq!(table.find_by_id(job_id).unwrap().pgid(), pid(300));
        assert_eq!(table.find_by_pgid(pid(300)).unwrap().id(), job_id);
        assert!(table.find_by_pgid(pid(301)).is_none());
        assert!(table.find_by_id(JobId(9)).is_none());
    }

    #[test]
    fn test_update_status_is_idempotent_and_ignores_unknown_groups() {
        let mut table = JobTable::default();
        table.create(pid(400), "cmd", processes(&[400])).unwrap();

        assert!(!table.update_status(pid(999), JobStatus::Done));
        assert!(table.update_status(pid(400), JobStatus::Stopped));
        assert!(!table.update_status(pid(400), JobStatus::Stopped));
        assert_eq!(table.find_by_pgid(pid(400)).unwrap().status(), JobStatus::Stopped);
    }

    #[test]
    fn test_foreground_transitions_are_not_queued_as_notices() {
        let mut table = JobTable::default();
        table.create(pid(600), "vim", processes(&[600])).unwrap();

        let job = table.mark_foreground_stop(pid(600), None).unwrap();
        assert_eq!(job.status(), JobStatus::Stopped);
        assert!(job.notified());
        assert!(table.pending_notices().is_empty());
        assert!(table.mark_foreground_stop(pid(999), None).is_none());

        assert!(table.update_status(pid(600), JobStatus::Running));
        assert!(table.mark_foreground_done(pid(600)));
        assert!(table.find_by_pgid(pid(600)).unwrap().is_done());
        assert!(table.pending_notices().is_empty());
        assert_eq!(table.reap().len(), 1);
        assert!(!table.mark_foreground_done(pid(600)));
    }

    #[test]
    fn test_mark_process_status() {
        let mut table = JobTable::default();
        let job_id = table.create(pid(500), "a | b", processes(&[500, 501])).unwrap();

        assert!(!table.mark_process_status(pid(777), ProcessChange::Stopped));

        assert!(table.mark_process_status(pid(501), ProcessChange::Stopped));
        assert_eq!(table.find_by_id(job_id).unwrap().status(), JobStatus::Stopped);

        assert!(table.mark_process_status(pid(501), ProcessChange::Continued));
        assert_eq!(table.find_by_id(job_id).unwrap().status(), JobStatus::Running);

        let exited = ProcessChange::Exited(ExitStatus::from_status(0));
        assert!(!table.mark_process_status(pid(500), exited));
        let exited = ProcessChange::Exited(ExitStatus::from_status(3));
        assert!(table.mark_process_status(pid(501), exited));

        let job = table.find_by_id(job_id).unwrap();
        assert_eq!(job.status(), JobStatus::Done);
        assert_eq!(job.last_status_code().code(), Some(3));
    }

    #[test]
    fn test_duplicate_live_pgid_is_fatal() {
        let mut table = JobTable::default();
        table.create(pid(600), "a", processes(&[600])).unwrap();

        let e = table.create(pid(600), "b", processes(&[600])).unwrap_err();
        assert!(e.is_fatal());

        table.update_status(pid(600), JobStatus::Done);
        let job_id = table.create(pid(600), "c", processes(&[600])).unwrap();
        assert_eq!(table.find_by_pgid(pid(600)).unwrap().id(), job_id);

        // reaping the old job must not drop the new job's index entries
        assert_eq!(table.reap().len(), 1);
        assert_eq!(table.find_by_pgid(pid(600)).unwrap().id(), job_id);
    }

    #[test]
    fn test_job_id_exhaustion_is_fatal() {
        let mut table = JobTable::default();
        table.job_count = u32::max_value();
        assert!(table.create(pid(700), "a", processes(&[700])).unwrap_err().is_fatal());
    }

    #[test]
    fn test_pending_notices_are_reported_once() {
        let mut table = JobTable::default();
        table.create(pid(800), "sleep 100", processes(&[800])).unwrap();
        assert!(table.pending_notices().is_empty());

        table.update_status(pid(800), JobStatus::Stopped);
        assert_eq!(table.pending_notices(), vec!["[1] 800 Stopped\tsleep 100"]);
        assert!(table.pending_notices().is_empty());

        table.update_status(pid(800), JobStatus::Done);
        assert_eq!(table.pending_notices(), vec!["[1] 800 Done\tsleep 100"]);
    }

    #[test]
    fn test_shutdown_terminates_live_groups() {
        let child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .expect("failed to spawn sleep");
        let child_pid = pid(child.id() as i32);

        let mut table = JobTable::default();
        table.create(child_pid, "sleep 30", processes(&[child.id() as i32])).unwrap();
        table.shutdown();
        assert!(!table.has_jobs());

        match wait::waitpid(child_pid, None).unwrap() {
            WaitStatus::Signaled(_, signal, _) => assert_eq!(signal, Signal::SIGTERM),
            status => panic!("unexpected wait status: {:?}", status),
        }

        let job_id = table.create(pid(900), "next", processes(&[900])).unwrap();
        assert_eq!(job_id, JobId(2));
    }
}
