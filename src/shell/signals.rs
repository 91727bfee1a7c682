//! Signal disposition for the shell and its children, and the bridge that
//! turns SIGCHLD deliveries into job table updates.

use std::io;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use failure::ResultExt;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use signal_hook::SigId;

use crate::core::job::{JobStatus, ProcessChange};
use crate::errors::{ErrorKind, Result};
use crate::shell::job_table::JobTable;
use crate::util::JcshExitStatusExt;

/// Signals an interactive shell ignores.
const JOB_CONTROL_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

/// Owns the SIGCHLD handler.
///
/// The handler does nothing but raise `pending`. Everything else, including
/// every job table update, happens in `reap_children` on the main loop.
pub struct SignalBridge {
    pending: Arc<AtomicBool>,
    sig_id: SigId,
}

impl SignalBridge {
    /// Installs the SIGCHLD handler.
    pub fn install() -> Result<Self> {
        let pending = Arc::new(AtomicBool::new(false));
        let sig_id =
            signal_hook::flag::register(signal_hook::consts::SIGCHLD, Arc::clone(&pending))
                .context(ErrorKind::Io)?;

        Ok(Self { pending, sig_id })
    }

    /// Ignores the interactive and job-control signals in the shell itself,
    /// so that only the foreground job receives them from the terminal.
    pub fn ignore_job_control_signals(&self) -> Result<()> {
        for &sig in &JOB_CONTROL_SIGNALS {
            unsafe { signal::signal(sig, SigHandler::SigIgn) }.context(ErrorKind::Nix)?;
        }
        Ok(())
    }

    /// Marks a drain as due without waiting for a SIGCHLD, e.g. after jobs
    /// were continued.
    pub fn request_reap(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Clears the pending marker, returning whether it was set.
    pub fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    /// Drains every outstanding state change of the tracked process groups
    /// into `job_table`, if a SIGCHLD arrived since the last drain.
    ///
    /// Returns `true` if a drain ran. Reaping Done jobs is left to the
    /// caller so that it can announce them first.
    pub fn reap_children(&self, job_table: &mut JobTable) -> bool {
        if !self.take_pending() {
            return false;
        }

        for pgid in job_table.tracked_pgids() {
            poll_process_group(pgid, job_table);
        }
        true
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        signal_hook::low_level::unregister(self.sig_id);
    }
}

fn poll_process_group(pgid: Pid, job_table: &mut JobTable) {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        match wait::waitpid(Pid::from_raw(-pgid.as_raw()), Some(flags)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(wait_status) => {
                if let Some((pid, change)) = process_change(wait_status) {
                    debug!("process {} in group {}: {:?}", pid, pgid, change);
                    job_table.mark_process_status(pid, change);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                // nothing left to wait for in this group
                job_table.update_status(pgid, JobStatus::Done);
                break;
            }
            Err(e) => {
                warn!("waitpid failed for process group {}: {}", pgid, e);
                break;
            }
        }
    }
}

/// Translates a `waitpid(2)` report into the process it concerns and what
/// happened to it. Reports that carry no job-control meaning yield `None`.
pub(crate) fn process_change(wait_status: WaitStatus) -> Option<(Pid, ProcessChange)> {
    match wait_status {
        WaitStatus::Exited(pid, status_code) => Some((
            pid,
            ProcessChange::Exited(ExitStatus::from_status(status_code)),
        )),
        WaitStatus::Signaled(pid, signal, _) => Some((
            pid,
            ProcessChange::Exited(ExitStatus::from_signal(signal)),
        )),
        WaitStatus::Stopped(pid, _) => Some((pid, ProcessChange::Stopped)),
        WaitStatus::Continued(pid) => Some((pid, ProcessChange::Continued)),
        _ => None,
    }
}

/// Restores the default disposition of every signal the shell customizes.
///
/// Runs in a forked child before exec, so it only makes async-signal-safe
/// calls and reports failure as an `io::Error`.
pub(crate) fn reset_child_signals() -> io::Result<()> {
    for &sig in JOB_CONTROL_SIGNALS.iter().chain(&[Signal::SIGCHLD]) {
        unsafe { signal::signal(sig, SigHandler::SigDfl) }
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::os::unix::process::CommandExt;
    use std::process::Command;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::core::job::Process;

    #[test]
    fn test_process_change() {
        let pid = Pid::from_raw(42);
        assert_eq!(
            process_change(WaitStatus::Exited(pid, 3)),
            Some((pid, ProcessChange::Exited(ExitStatus::from_status(3))))
        );
        assert_eq!(
            process_change(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Some((pid, ProcessChange::Exited(ExitStatus::from_status(137))))
        );
        assert_eq!(
            process_change(WaitStatus::Stopped(pid, Signal::SIGTSTP)),
            Some((pid, ProcessChange::Stopped))
        );
        assert_eq!(
            process_change(WaitStatus::Continued(pid)),
            Some((pid, ProcessChange::Continued))
        );
        assert_eq!(process_change(WaitStatus::StillAlive), None);
    }

    #[test]
    fn test_reap_children_requires_pending_marker() {
        let bridge = SignalBridge::install().unwrap();
        let mut table = JobTable::default();
        bridge.take_pending();
        assert!(!bridge.reap_children(&mut table));

        bridge.request_reap();
        assert!(bridge.reap_children(&mut table));
        assert!(!bridge.take_pending());
    }

    #[test]
    fn test_reap_children_tracks_group_lifecycle() {
        let bridge = SignalBridge::install().unwrap();
        let child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .expect("failed to spawn sleep");
        let pgid = Pid::from_raw(child.id() as i32);

        let mut table = JobTable::default();
        let argv = vec!["sleep".to_string(), "30".to_string()];
        let job_id = table
            .create(pgid, "sleep 30", vec![Process::new_external(&argv, pgid)])
            .unwrap();

        signal::killpg(pgid, Signal::SIGSTOP).unwrap();
        wait_for_status(&bridge, &mut table, job_id, JobStatus::Stopped);

        signal::killpg(pgid, Signal::SIGCONT).unwrap();
        wait_for_status(&bridge, &mut table, job_id, JobStatus::Running);

        signal::killpg(pgid, Signal::SIGKILL).unwrap();
        wait_for_status(&bridge, &mut table, job_id, JobStatus::Done);
        assert_eq!(
            table.find_by_id(job_id).unwrap().last_status_code().code(),
            Some(128 + Signal::SIGKILL as i32)
        );

        assert_eq!(table.reap().len(), 1);
        assert!(table.find_by_pgid(pgid).is_none());
    }

    fn wait_for_status(
        bridge: &SignalBridge,
        table: &mut JobTable,
        job_id: crate::core::job::JobId,
        status: JobStatus,
    ) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while table.find_by_id(job_id).unwrap().status() != status {
            assert!(Instant::now() < deadline, "job never became {}", status);
            // other tests reap their own children; do not rely on our SIGCHLD
            bridge.request_reap();
            bridge.reap_children(table);
            thread::sleep(Duration::from_millis(10));
        }
    }
}
