//! Turning a `PipelineSpec` into running processes.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command as StdCommand, ExitStatus};

use failure::{Fail, ResultExt};
use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, FdFlag};
use nix::libc;
use nix::sys::signal::Signal;
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};

use crate::core::job::{last_status_code, Process};
use crate::core::pipeline::{Command, OutputRedirect, PipelineSpec};
use crate::errors::{Error, ErrorKind, Result};
use crate::shell::lookup::ExecutableLookup;
use crate::shell::signals;
use crate::util::{self, JcshExitStatusExt};

/// Where the saved copies of fds 0 and 1 live while a builtin runs.
const MIN_SAVED_FD: RawFd = 10;

/// How the executor launches a pipeline.
pub struct LaunchOptions<'a> {
    pub lookup: &'a dyn ExecutableLookup,
    /// Terminal handed to foreground jobs. `None` without job control.
    pub terminal: Option<RawFd>,
    pub job_control: bool,
}

pub struct ProcessGroup {
    /// `None` if the processes stayed in the shell's group, or none launched.
    pub id: Option<Pid>,
    pub processes: Vec<Process>,
    pub foreground: bool,
    /// Set when a fork failure cut the launch short.
    pub launch_error: Option<Error>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WaitOutcome {
    /// A member stopped; the rest of the group is left as it is.
    Stopped(Signal),
    /// Every member finished. Holds the status of the last stage.
    Completed(ExitStatus),
}

/// Files a single-stage pipeline reads from and writes to.
#[derive(Debug, Default)]
pub struct Redirections {
    pub stdin: Option<File>,
    pub stdout: Option<File>,
}

impl Redirections {
    pub fn open(pipeline: &PipelineSpec) -> Result<Self> {
        let stdin = match pipeline.input_file() {
            Some(path) => Some(open_input(path)?),
            None => None,
        };
        let stdout = match pipeline.output() {
            Some(redirect) => Some(open_output(redirect)?),
            None => None,
        };
        Ok(Self { stdin, stdout })
    }
}

/// Points fds 0 and 1 of the shell at the given redirections until dropped.
///
/// Used around builtins, which run inside the shell. Standard output is
/// flushed before the original descriptors come back.
pub struct RedirectGuard {
    saved_stdin: Option<RawFd>,
    saved_stdout: Option<RawFd>,
}

impl RedirectGuard {
    pub fn install(redirections: &Redirections) -> Result<Self> {
        let _ = io::stdout().flush();
        let mut guard = Self {
            saved_stdin: None,
            saved_stdout: None,
        };

        if let Some(ref file) = redirections.stdin {
            guard.saved_stdin = Some(redirect_fd(file.as_raw_fd(), libc::STDIN_FILENO)?);
        }
        if let Some(ref file) = redirections.stdout {
            guard.saved_stdout = Some(redirect_fd(file.as_raw_fd(), libc::STDOUT_FILENO)?);
        }
        Ok(guard)
    }
}

impl Drop for RedirectGuard {
    fn drop(&mut self) {
        let _ = io::stdout().flush();
        for &(saved, target) in &[
            (self.saved_stdin, libc::STDIN_FILENO),
            (self.saved_stdout, libc::STDOUT_FILENO),
        ] {
            if let Some(saved) = saved {
                let temp_result = unistd::dup2(saved, target);
                log_if_err!(temp_result, "failed to restore fd {}", target);
                let temp_result = unistd::close(saved);
                log_if_err!(temp_result, "failed to close saved fd {}", saved);
            }
        }
    }
}

/// Duplicates `target` out of the way, then points it at `source`.
/// Returns the saved duplicate.
fn redirect_fd(source: RawFd, target: RawFd) -> Result<RawFd> {
    let saved =
        fcntl::fcntl(target, FcntlArg::F_DUPFD_CLOEXEC(MIN_SAVED_FD)).context(ErrorKind::Nix)?;
    if let Err(e) = unistd::dup2(source, target) {
        let _ = unistd::close(saved);
        return Err(e.context(ErrorKind::Nix).into());
    }
    Ok(saved)
}

fn open_input(path: &Path) -> Result<File> {
    let file = File::open(path).with_context(|_| Error::redirect(path.display().to_string()))?;
    Ok(file)
}

fn open_output(redirect: &OutputRedirect) -> Result<File> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .append(redirect.append)
        .truncate(!redirect.append)
        .open(&redirect.path)
        .with_context(|_| Error::redirect(redirect.path.display().to_string()))?;
    Ok(file)
}

/// Spawns one process per stage of `pipeline`, connected by pipes.
///
/// Stages that cannot run (unresolvable program, exec failure, unopenable
/// redirection in a multi-stage pipeline) are recorded as already finished
/// processes and the remaining stages still launch. An unopenable
/// redirection of a single-stage pipeline is returned as an error before
/// anything is spawned.
pub fn spawn_processes(
    pipeline: &PipelineSpec,
    options: &LaunchOptions<'_>,
) -> Result<ProcessGroup> {
    let commands = pipeline.commands();
    let last = commands.len() - 1;
    let foreground = !pipeline.background();
    // without job control a foreground pipeline stays in the shell's group
    let grouped = options.job_control || !foreground;
    let child_terminal = if foreground && options.job_control {
        options.terminal
    } else {
        None
    };

    let mut redirect_failed = vec![false; commands.len()];
    let mut input_file = open_stage_redirect(
        pipeline.input_file().map(open_input),
        last == 0,
        &mut redirect_failed[0],
    )?;
    let mut output_file = open_stage_redirect(
        pipeline.output().map(open_output),
        last == 0,
        &mut redirect_failed[last],
    )?;

    let (mut readers, mut writers): (Vec<Option<File>>, Vec<Option<File>>) = create_pipes(last)?
        .into_iter()
        .map(|(read_end_pipe, write_end_pipe)| (Some(read_end_pipe), Some(write_end_pipe)))
        .unzip();

    let mut processes = Vec::with_capacity(commands.len());
    let mut pgid = None;
    let mut launch_error = None;
    for (index, command) in commands.iter().enumerate() {
        // taking the ends here closes the parent's copies once this stage is launched
        let stdin = if index == 0 {
            input_file.take()
        } else {
            readers[index - 1].take()
        };
        let stdout = if index == last {
            output_file.take()
        } else {
            writers[index].take()
        };

        if redirect_failed[index] {
            processes.push(Process::new_failed(command.argv(), ExitStatus::from_failure()));
            continue;
        }

        let program = match options.lookup.find_executable(command.program()) {
            Some(program) => program,
            None => {
                eprintln!("jcsh: {}", Error::command_not_found(command.program()));
                processes.push(Process::new_failed(
                    command.argv(),
                    ExitStatus::from_status(util::COMMAND_NOT_FOUND_EXIT_STATUS),
                ));
                continue;
            }
        };

        match spawn_stage(command, &program, stdin, stdout, pgid, grouped, child_terminal) {
            Ok(pid) => {
                if grouped && pgid.is_none() {
                    pgid = Some(pid);
                }
                debug!("spawned {} as {} in group {:?}", command.program(), pid, pgid);
                processes.push(Process::new_external(command.argv(), pid));
            }
            Err(e) if is_fork_failure(&e) => {
                warn!("fork failed at stage {} of '{}': {}", index, pipeline.input(), e);
                launch_error = Some(e.context(ErrorKind::Launch).into());
                break;
            }
            Err(e) => {
                eprintln!("jcsh: {}: {}", command.program(), e);
                processes.push(Process::new_failed(
                    command.argv(),
                    ExitStatus::from_status(util::COMMAND_NOT_FOUND_EXIT_STATUS),
                ));
            }
        }
    }

    Ok(ProcessGroup {
        id: pgid,
        processes,
        foreground,
        launch_error,
    })
}

/// A redirection failure of a single-stage pipeline aborts the launch; in a
/// longer pipeline it only fails the stage it belongs to.
fn open_stage_redirect(
    opened: Option<Result<File>>,
    single_stage: bool,
    stage_failed: &mut bool,
) -> Result<Option<File>> {
    match opened {
        Some(Ok(file)) => Ok(Some(file)),
        Some(Err(e)) if single_stage => Err(e),
        Some(Err(e)) => {
            eprintln!("jcsh: {}", e);
            *stage_failed = true;
            Ok(None)
        }
        None => Ok(None),
    }
}

fn spawn_stage(
    command: &Command,
    program: &Path,
    stdin: Option<File>,
    stdout: Option<File>,
    pgid: Option<Pid>,
    grouped: bool,
    terminal: Option<RawFd>,
) -> io::Result<Pid> {
    let mut child_command = StdCommand::new(program);
    child_command.arg0(command.program()).args(command.args());

    // The terminal is reached through its own close-on-exec descriptor, so
    // rewiring stdin here does not get in the way of tcsetpgrp below.
    if let Some(stdin) = stdin {
        child_command.stdin(stdin);
    }
    if let Some(stdout) = stdout {
        child_command.stdout(stdout);
    }

    unsafe {
        child_command.pre_exec(move || {
            if grouped {
                let pgid = pgid.unwrap_or_else(Pid::this);
                unistd::setpgid(Pid::from_raw(0), pgid).map_err(io::Error::from)?;

                // Take the terminal in both the child and the parent to avoid
                // racing against the job's first read. SIGTTOU is still
                // ignored at this point.
                if let Some(terminal) = terminal {
                    unistd::tcsetpgrp(terminal, pgid).map_err(io::Error::from)?;
                }
            }
            signals::reset_child_signals()
        });
    }

    let child = child_command.spawn()?;
    let pid = Pid::from_raw(child.id() as libc::pid_t);
    if grouped {
        match unistd::setpgid(pid, pgid.unwrap_or(pid)) {
            // EACCES: the child already exec'd, after joining the group itself
            Ok(()) | Err(Errno::EACCES) => {}
            Err(e) => warn!("failed to set pgid ({:?}) for pid ({}): {}", pgid, pid, e),
        }
    }
    Ok(pid)
}

fn is_fork_failure(e: &io::Error) -> bool {
    match e.raw_os_error() {
        Some(libc::EAGAIN) | Some(libc::ENOMEM) => true,
        _ => false,
    }
}

/// Creates `count` pipes up front, so that a failure happens before any
/// process exists.
pub fn create_pipes(count: usize) -> Result<Vec<(File, File)>> {
    (0..count).map(|_| create_pipe()).collect()
}

/// Wraps `unistd::pipe()` to return RAII structs instead of raw, owning file descriptors
/// Returns (`read_end_pipe`, `write_end_pipe`)
///
/// Both ends are close-on-exec: a child only keeps the ends dup'ed onto its
/// stdin and stdout.
fn create_pipe() -> Result<(File, File)> {
    let (read_end_pipe, write_end_pipe) = unistd::pipe().context(ErrorKind::Launch)?;
    // The files are the only owners of the fds, so no one closes them out
    // from under us.
    let pipe = unsafe {
        (
            File::from_raw_fd(read_end_pipe),
            File::from_raw_fd(write_end_pipe),
        )
    };
    for fd in &[read_end_pipe, write_end_pipe] {
        fcntl::fcntl(*fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).context(ErrorKind::Launch)?;
    }
    Ok(pipe)
}

/// Blocks until a member of the group stops or every member has finished.
///
/// With `pgid` set, any member of the group is waited for and stops are
/// reported. Without it, the processes are waited for one by one.
pub fn wait_for_process_group(
    pgid: Option<Pid>,
    processes: &mut [Process],
) -> Result<WaitOutcome> {
    loop {
        let pending = processes
            .iter()
            .filter(|p| !p.is_completed())
            .find_map(Process::id);
        let pid = match pending {
            Some(pid) => pid,
            None => return Ok(WaitOutcome::Completed(last_status_code(processes))),
        };

        let (target, flags) = match pgid {
            Some(pgid) => (Pid::from_raw(-pgid.as_raw()), Some(WaitPidFlag::WUNTRACED)),
            None => (pid, None),
        };
        match wait::waitpid(target, flags) {
            Ok(WaitStatus::Stopped(pid, signal)) => {
                debug!("process {} stopped by {:?}", pid, signal);
                if let Some(process) = processes.iter_mut().find(|p| p.id() == Some(pid)) {
                    process.mark_stopped();
                }
                return Ok(WaitOutcome::Stopped(signal));
            }
            Ok(wait_status) => {
                if let Some((pid, change)) = signals::process_change(wait_status) {
                    if let Some(process) = processes.iter_mut().find(|p| p.id() == Some(pid)) {
                        change.apply(process);
                    }
                }
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                warn!("lost track of children in group {:?}", pgid);
                for process in processes.iter_mut().filter(|p| !p.is_completed()) {
                    process.mark_exited(ExitStatus::from_failure());
                }
            }
            Err(e) => return Err(e.context(ErrorKind::Nix).into()),
        }
    }
}
