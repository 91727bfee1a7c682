use std::{fmt, process::ExitStatus};

use nix::{sys::termios::Termios, unistd::Pid};

use crate::util::JcshExitStatusExt;

#[derive(Clone, Debug, PartialEq)]
pub struct Process {
    argv: Vec<String>,
    /// `id` is None when the stage never launched (e.g. its program could not be resolved)
    id: Option<Pid>,
    status: ProcessStatus,
    status_code: Option<ExitStatus>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProcessStatus {
    Running,
    Stopped,
    Completed,
}

impl Process {
    /// A stage that finished without ever running, e.g. a missing program.
    pub fn new_failed(argv: &[String], status_code: ExitStatus) -> Self {
        Self {
            argv: argv.to_vec(),
            id: None,
            status: ProcessStatus::Completed,
            status_code: Some(status_code),
        }
    }

    pub fn new_external(argv: &[String], id: Pid) -> Self {
        Self {
            argv: argv.to_vec(),
            id: Some(id),
            status: ProcessStatus::Running,
            status_code: None,
        }
    }

    pub fn argv(&self) -> String {
        self.argv[..].join(" ")
    }

    pub fn id(&self) -> Option<Pid> {
        self.id
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    pub fn status_code(&self) -> Option<ExitStatus> {
        self.status_code
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProcessStatus::Completed
    }

    pub fn mark_exited(&mut self, status_code: ExitStatus) {
        self.status = ProcessStatus::Completed;
        self.status_code = Some(status_code);
    }

    pub fn mark_stopped(&mut self) {
        if !self.is_completed() {
            self.status = ProcessStatus::Stopped;
        }
    }

    pub fn mark_continued(&mut self) {
        if !self.is_completed() {
            self.status = ProcessStatus::Running;
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProcessStatus::Running => write!(f, "Running"),
            ProcessStatus::Stopped => write!(f, "Stopped"),
            ProcessStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// A state change reported by `waitpid(2)` for one process.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProcessChange {
    Exited(ExitStatus),
    Stopped,
    Continued,
}

impl ProcessChange {
    /// Applies the change; returns `false` if the process already completed.
    pub fn apply(self, process: &mut Process) -> bool {
        if process.is_completed() {
            return false;
        }
        match self {
            ProcessChange::Exited(status_code) => process.mark_exited(status_code),
            ProcessChange::Stopped => process.mark_stopped(),
            ProcessChange::Continued => process.mark_continued(),
        }
        true
    }
}

/// Status a shell reports for a set of processes.
///
/// All finished means Done; otherwise any stopped member makes the whole
/// group Stopped.
pub fn group_status(processes: &[Process]) -> JobStatus {
    if processes.iter().all(Process::is_completed) {
        JobStatus::Done
    } else if processes
        .iter()
        .any(|p| p.status() == ProcessStatus::Stopped)
    {
        JobStatus::Stopped
    } else {
        JobStatus::Running
    }
}

/// The status of the last stage, which is the status of the pipeline.
pub fn last_status_code(processes: &[Process]) -> ExitStatus {
    processes
        .last()
        .and_then(Process::status_code)
        .unwrap_or_else(ExitStatus::from_success)
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JobId(pub u32);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    Running,
    Stopped,
    Done,
}

#[derive(Clone)]
pub struct Job {
    id: JobId,
    input: String,
    pgid: Pid,
    processes: Vec<Process>,
    status: JobStatus,
    notified: bool,
    tmodes: Option<Termios>,
}

impl Job {
    pub fn new(id: JobId, input: &str, pgid: Pid, processes: Vec<Process>) -> Self {
        Self {
            id,
            input: input.to_string(),
            pgid,
            processes,
            status: JobStatus::Running,
            notified: false,
            tmodes: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn pgid(&self) -> Pid {
        self.pgid
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub(crate) fn processes_mut(&mut self) -> &mut Vec<Process> {
        &mut self.processes
    }

    pub fn is_done(&self) -> bool {
        self.status == JobStatus::Done
    }

    /// Exit status of the job's last stage, once known.
    pub fn last_status_code(&self) -> ExitStatus {
        last_status_code(&self.processes)
    }

    pub fn notified(&self) -> bool {
        self.notified
    }

    pub fn set_notified(&mut self, notified: bool) {
        self.notified = notified;
    }

    pub fn tmodes(&self) -> Option<&Termios> {
        self.tmodes.as_ref()
    }

    pub fn set_tmodes(&mut self, tmodes: Option<Termios>) {
        self.tmodes = tmodes;
    }

    /// Sets the job status, bringing member processes in line with it.
    /// Returns `true` if the status changed.
    pub(crate) fn set_status(&mut self, status: JobStatus) -> bool {
        for process in &mut self.processes {
            match status {
                JobStatus::Running => process.mark_continued(),
                JobStatus::Stopped => process.mark_stopped(),
                JobStatus::Done if !process.is_completed() => {
                    process.status = ProcessStatus::Completed
                }
                JobStatus::Done => {}
            }
        }
        self.replace_status(status)
    }

    /// Recomputes the job status from its processes. Returns `true` if it changed.
    pub(crate) fn refresh_status(&mut self) -> bool {
        let status = group_status(&self.processes);
        self.replace_status(status)
    }

    fn replace_status(&mut self, status: JobStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.notified = false;
        true
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id: {}\tpgid: {}\tstatus: {}\tinput: {}",
            self.id, self.pgid, self.status, self.input
        )
    }
}

/// `[id] pgid status<TAB>command`
impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}\t{}",
            self.id, self.pgid, self.status, self.input
        )
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Stopped => write!(f, "Stopped"),
            JobStatus::Done => write!(f, "Done"),
        }
    }
}
