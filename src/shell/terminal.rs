//! Arbitration of the controlling terminal between the shell and its jobs.

use std::fs::File;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use failure::ResultExt;
use log::{debug, info};
use nix::fcntl::{self, FcntlArg};
use nix::sys::signal::{self, Signal};
use nix::sys::termios::{self, SetArg, Termios};
use nix::unistd::{self, Pid};

use crate::errors::{ErrorKind, Result};
use crate::shell::signals::SignalBridge;
use crate::util;

/// Descriptors below this are left free for redirections.
const MIN_TERMINAL_FD: RawFd = 10;

/// Tracks which process group owns the terminal.
///
/// `owner` is `None` while the shell itself holds the terminal. Without a
/// terminal (scripts, pipes) `acquire` and `release` only keep the
/// bookkeeping.
#[derive(Debug)]
pub struct TerminalController {
    /// Close-on-exec duplicate of the terminal, so children can still reach
    /// it after their stdin has been rewired.
    tty: Option<File>,
    shell_pgid: Pid,
    owner: Option<Pid>,
    shell_tmodes: Option<Termios>,
}

impl TerminalController {
    /// A controller for a shell without job control.
    pub fn detached() -> Self {
        Self {
            tty: None,
            shell_pgid: unistd::getpgrp(),
            owner: None,
            shell_tmodes: None,
        }
    }

    /// Puts the shell in its own process group in the foreground of the
    /// terminal on stdin, and saves the shell's terminal modes.
    ///
    /// Blocks (by stopping itself with SIGTTIN) until the shell is in the
    /// foreground, and only then starts ignoring job-control signals.
    pub fn initialize_job_control(signals: &SignalBridge) -> Result<Self> {
        let shell_terminal = util::get_terminal();

        loop {
            let shell_pgid = unistd::getpgrp();
            if unistd::tcgetpgrp(shell_terminal).context(ErrorKind::Nix)? == shell_pgid {
                break;
            }
            signal::killpg(shell_pgid, Signal::SIGTTIN).context(ErrorKind::Nix)?;
        }

        signals.ignore_job_control_signals()?;

        let shell_pgid = Pid::this();
        if unistd::getpgrp() != shell_pgid {
            unistd::setpgid(shell_pgid, shell_pgid).context(ErrorKind::Nix)?;
        }
        unistd::tcsetpgrp(shell_terminal, shell_pgid).context(ErrorKind::Nix)?;

        let tty = fcntl::fcntl(shell_terminal, FcntlArg::F_DUPFD_CLOEXEC(MIN_TERMINAL_FD))
            .context(ErrorKind::Nix)?;
        // tty is a fresh descriptor that nothing else owns
        let tty = unsafe { File::from_raw_fd(tty) };
        let shell_tmodes = termios::tcgetattr(tty.as_raw_fd()).ok();

        info!("initialized job control for process group {}", shell_pgid);
        Ok(Self {
            tty: Some(tty),
            shell_pgid,
            owner: None,
            shell_tmodes,
        })
    }

    /// The terminal descriptor, if the shell has one.
    pub fn tty(&self) -> Option<RawFd> {
        self.tty.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    /// The process group holding the terminal; `None` means the shell.
    pub fn owner(&self) -> Option<Pid> {
        self.owner
    }

    /// Hands the terminal to `pgid`.
    pub fn acquire(&mut self, pgid: Pid) -> Result<()> {
        debug!("giving terminal to process group {}", pgid);
        if let Some(tty) = self.tty() {
            unistd::tcsetpgrp(tty, pgid).context(ErrorKind::Nix)?;
        }
        self.owner = Some(pgid);
        Ok(())
    }

    /// Takes the terminal back for the shell and restores the shell's modes.
    ///
    /// Returns the modes the terminal had while the job owned it.
    pub fn release(&mut self) -> Option<Termios> {
        let owner = self.owner.take();
        let tty = self.tty()?;
        debug!(
            "reclaiming terminal from {:?} for shell group {}",
            owner, self.shell_pgid
        );

        let job_tmodes = termios::tcgetattr(tty).ok();
        let temp_result = unistd::tcsetpgrp(tty, self.shell_pgid);
        log_if_err!(temp_result, "failed to reclaim terminal");
        if let Some(ref shell_tmodes) = self.shell_tmodes {
            let temp_result = termios::tcsetattr(tty, SetArg::TCSADRAIN, shell_tmodes);
            log_if_err!(temp_result, "error restoring terminal configuration for shell");
        }
        job_tmodes
    }

    /// Reinstates modes saved from a job before resuming it in the foreground.
    pub fn set_modes(&self, tmodes: &Termios) {
        if let Some(tty) = self.tty() {
            let temp_result = termios::tcsetattr(tty, SetArg::TCSADRAIN, tmodes);
            log_if_err!(temp_result, "error setting terminal configuration for job");
        }
    }

    /// Gives the terminal to `pgid` until the returned guard is finished or
    /// dropped. A failed hand-off is logged; the job still runs, just
    /// without the terminal.
    pub fn foreground(&mut self, pgid: Pid) -> ForegroundGuard<'_> {
        let temp_result = self.acquire(pgid);
        log_if_err!(temp_result, "failed to give terminal to {}", pgid);
        ForegroundGuard {
            terminal: self,
            released: false,
        }
    }
}

/// Returns the terminal to the shell when it goes out of scope, so that
/// every exit from a foreground wait, including errors, releases it.
pub struct ForegroundGuard<'a> {
    terminal: &'a mut TerminalController,
    released: bool,
}

impl<'a> ForegroundGuard<'a> {
    pub fn set_modes(&self, tmodes: &Termios) {
        self.terminal.set_modes(tmodes);
    }

    /// Releases the terminal, returning the job's terminal modes.
    pub fn finish(mut self) -> Option<Termios> {
        self.released = true;
        self.terminal.release()
    }
}

impl<'a> Drop for ForegroundGuard<'a> {
    fn drop(&mut self) {
        if !self.released {
            self.terminal.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_tracks_owner() {
        let mut terminal = TerminalController::detached();
        assert_eq!(terminal.tty(), None);
        assert_eq!(terminal.shell_pgid(), unistd::getpgrp());
        assert_eq!(terminal.owner(), None);

        terminal.acquire(Pid::from_raw(4242)).unwrap();
        assert_eq!(terminal.owner(), Some(Pid::from_raw(4242)));
        assert!(terminal.release().is_none());
        assert_eq!(terminal.owner(), None);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let mut terminal = TerminalController::detached();
        {
            let _guard = terminal.foreground(Pid::from_raw(4242));
        }
        assert_eq!(terminal.owner(), None);

        let guard = terminal.foreground(Pid::from_raw(4243));
        assert!(guard.finish().is_none());
        assert_eq!(terminal.owner(), None);
    }
}
