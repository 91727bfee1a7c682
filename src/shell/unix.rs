//! The JobControlShell runs pipelines in the foreground and background,
//! hands the terminal to foreground jobs, and keeps track of every process
//! group it launched until the group is done.

use std::env;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{self, ExitStatus};

use failure::ResultExt;
use log::{debug, error, info, warn};
use nix::{
    sys::{
        signal::{self, Signal},
        termios::Termios,
    },
    unistd::Pid,
};

use super::{
    builtins,
    execute_command::{
        spawn_processes, wait_for_process_group, LaunchOptions, ProcessGroup, RedirectGuard,
        Redirections, WaitOutcome,
    },
    job_table::JobTable,
    lookup::PathLookup,
    signals::SignalBridge,
    terminal::TerminalController,
    Shell, ShellConfig, HISTORY_FILE_NAME, SYNTAX_ERROR_EXIT_STATUS,
};
use crate::{
    core::{
        job::{JobId, JobStatus},
        pipeline::PipelineSpec,
    },
    editor::Editor,
    errors::{Error, ErrorKind, Result},
    util::{self, JcshExitStatusExt},
};

pub struct JobControlShell {
    /// Responsible for readline and history.
    editor: Editor,
    history_file: Option<PathBuf>,
    job_table: JobTable,
    signals: SignalBridge,
    terminal: TerminalController,
    lookup: PathLookup,
    /// Exit status of last command executed.
    last_exit_status: ExitStatus,
    config: ShellConfig,
    /// Is `false` if the shell is running a script or if initializing job
    /// control fails.
    is_interactive: bool,
    /// Set once the user has been warned about exiting with live jobs.
    exit_warned: bool,
}

impl JobControlShell {
    /// Constructs a new JobControlShell to manage running jobs and command history.
    pub fn new(config: ShellConfig) -> Result<Self> {
        let signals = SignalBridge::install()?;

        let mut is_interactive = config.enable_job_control && util::isatty();
        let terminal = if is_interactive {
            match TerminalController::initialize_job_control(&signals) {
                Ok(terminal) => terminal,
                Err(e) => {
                    error!(
                        "failed to initialize shell for job control despite isatty: {}",
                        e
                    );
                    is_interactive = false;
                    TerminalController::detached()
                }
            }
        } else {
            TerminalController::detached()
        };

        let mut shell = Self {
            editor: Editor::with_capacity(config.command_history_capacity)?,
            history_file: None,
            job_table: JobTable::default(),
            signals,
            terminal,
            lookup: PathLookup::default(),
            last_exit_status: ExitStatus::from_success(),
            config,
            is_interactive,
            exit_warned: false,
        };

        if config.enable_command_history {
            shell.load_history()?
        }

        info!("jcsh started up");
        Ok(shell)
    }

    fn load_history(&mut self) -> Result<()> {
        self.history_file = dirs::home_dir().map(|p| p.join(HISTORY_FILE_NAME));
        match self.history_file {
            Some(ref history_file) => self.editor.load_history(history_file)?,
            None => warn!("unable to get home directory"),
        }

        Ok(())
    }

    /// Custom prompt to output to the user.
    /// Returns `None` when end of file is reached.
    fn prompt(&mut self) -> Result<Option<String>> {
        let cwd = env::current_dir().context(ErrorKind::Io)?;
        let rel = match dirs::home_dir().and_then(|home| cwd.strip_prefix(home).ok()) {
            Some(rel) if rel.as_os_str().is_empty() => PathBuf::from("~"),
            Some(rel) => Path::new("~").join(rel),
            None => cwd.clone(),
        };

        let prompt = format!(
            "{}|{}\n$ ",
            util::status_code(self.last_exit_status),
            rel.display()
        );
        self.editor.readline(&prompt)
    }

    /// Applies pending child state changes to the job table, announces
    /// stopped and finished jobs, then forgets the finished ones.
    fn do_job_notification(&mut self) {
        self.signals.reap_children(&mut self.job_table);
        for notice in self.job_table.pending_notices() {
            println!("{}", notice);
        }
        self.job_table.reap();
    }

    /// Runs a parsed pipeline and records its exit status.
    fn execute_pipeline(&mut self, pipeline: &PipelineSpec) -> Result<()> {
        let commands = pipeline.commands();
        if commands.len() == 1 && builtins::is_builtin(commands[0].program()) {
            self.last_exit_status = self.run_builtin(pipeline);
            return Ok(());
        }

        let process_group = {
            let options = LaunchOptions {
                lookup: &self.lookup,
                terminal: self.terminal.tty(),
                job_control: self.is_interactive,
            };
            match spawn_processes(pipeline, &options) {
                Ok(process_group) => process_group,
                Err(e) => match *e.kind() {
                    ErrorKind::Redirect(_) | ErrorKind::Launch => {
                        eprintln!("jcsh: {}", e);
                        self.last_exit_status = ExitStatus::from_failure();
                        return Ok(());
                    }
                    _ => return Err(e),
                },
            }
        };

        self.last_exit_status = self.launch_process_group(pipeline.input(), process_group)?;
        Ok(())
    }

    /// Runs a builtin inside the shell with the pipeline's redirections
    /// applied to the shell's own stdin and stdout.
    fn run_builtin(&mut self, pipeline: &PipelineSpec) -> ExitStatus {
        let redirections = match Redirections::open(pipeline) {
            Ok(redirections) => redirections,
            Err(e) => {
                eprintln!("jcsh: {}", e);
                return ExitStatus::from_failure();
            }
        };

        let command = &pipeline.commands()[0];
        let (status_code, result) = {
            let _redirect_guard = match RedirectGuard::install(&redirections) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("jcsh: {}", e);
                    return ExitStatus::from_failure();
                }
            };
            builtins::run(self, command.program(), command.args(), &mut io::stdout())
        };

        if let Err(e) = result {
            debug!("builtin {} failed: {}", command.program(), e);
            eprintln!("jcsh: {}", e);
        }
        status_code
    }

    /// Registers, announces or waits for freshly spawned processes.
    fn launch_process_group(
        &mut self,
        input: &str,
        process_group: ProcessGroup,
    ) -> Result<ExitStatus> {
        let ProcessGroup {
            id,
            mut processes,
            foreground,
            launch_error,
        } = process_group;

        if let Some(e) = launch_error {
            eprintln!("jcsh: {}", e);
            // children may have taken the terminal before the launch failed
            self.terminal.release();
            if let Some(pgid) = id {
                let job_id = self.job_table.create(pgid, input, processes)?;
                debug!("tracking partially launched job [{}]", job_id);
            }
            return Ok(ExitStatus::from_failure());
        }

        if foreground {
            // apply finished background jobs before blocking on this one
            self.signals.reap_children(&mut self.job_table);
        }

        let pgid = match id {
            Some(pgid) => pgid,
            // ungrouped processes never report stops
            None => {
                if foreground {
                    // a stage whose exec failed may have taken the terminal
                    self.terminal.release();
                }
                return match wait_for_process_group(None, &mut processes)? {
                    WaitOutcome::Completed(status_code) => Ok(status_code),
                    WaitOutcome::Stopped(signal) => Ok(ExitStatus::from_signal(signal)),
                };
            }
        };

        if !foreground {
            let job_id = self.job_table.create(pgid, input, processes)?;
            println!("[{}] {}", job_id, pgid);
            return Ok(ExitStatus::from_success());
        }

        let terminal_guard = self.terminal.foreground(pgid);
        match wait_for_process_group(Some(pgid), &mut processes)? {
            WaitOutcome::Completed(status_code) => Ok(status_code),
            WaitOutcome::Stopped(signal) => {
                let tmodes = terminal_guard.finish();
                self.job_table.create(pgid, input, processes)?;
                self.announce_stopped(pgid, tmodes);
                Ok(ExitStatus::from_signal(signal))
            }
        }
    }

    fn announce_stopped(&mut self, pgid: Pid, tmodes: Option<Termios>) {
        if let Some(job) = self.job_table.mark_foreground_stop(pgid, tmodes) {
            println!("\n{}", job);
        }
    }

    /// Logs and reports an error from one line of input. Fatal errors end
    /// the shell.
    fn report_error(&mut self, e: &Error) {
        error!("{}", e);
        eprintln!("jcsh: {}", e);
        if e.is_fatal() {
            self.exit(Some(ExitStatus::from_failure()));
        }
        self.last_exit_status = ExitStatus::from_failure();
    }
}

impl Shell for JobControlShell {
    fn execute_command_string(&mut self, input: &str) -> Result<()> {
        let input = input.trim();
        // skip if empty
        if input.is_empty() {
            return Ok(());
        }

        if self.config.enable_command_history {
            self.editor.add_history_entry(input);
        }

        let pipeline = match PipelineSpec::parse(input) {
            Ok(Some(pipeline)) => pipeline,
            Ok(None) => return Ok(()),
            Err(e) => {
                if let ErrorKind::Syntax(ref line) = *e.kind() {
                    eprintln!("jcsh: syntax error near: {}", line);
                    self.last_exit_status = ExitStatus::from_status(SYNTAX_ERROR_EXIT_STATUS);
                    return Ok(());
                }

                return Err(e);
            }
        };

        self.execute_pipeline(&pipeline)
    }

    fn execute_commands_from_file(&mut self, path: &Path) -> Result<()> {
        let buffer = fs::read_to_string(path).context(ErrorKind::Io)?;

        for line in buffer.lines() {
            self.do_job_notification();
            self.execute_command_string(line)?
        }

        Ok(())
    }

    fn execute_from_stdin(&mut self) {
        loop {
            // Check the status of background jobs, removing exited ones.
            self.do_job_notification();

            let input = match self.prompt() {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("prompt: {}", e);
                    eprintln!("jcsh: {}", e);
                    break;
                }
            };

            if let Err(e) = self.execute_command_string(&input) {
                self.report_error(&e);
            }
        }
    }

    fn exit(&mut self, n: Option<ExitStatus>) -> ! {
        if self.config.display_messages {
            println!("exit");
        }

        let code = util::status_code(n.unwrap_or(self.last_exit_status));
        let code_like_u8 = if code < 0 {
            (256 + code % 256) % 256
        } else {
            code % 256
        };

        self.job_table.shutdown();

        if self.config.enable_command_history {
            if let Some(ref history_file) = self.history_file {
                if let Err(e) = self.editor.save_history(history_file) {
                    error!(
                        "error: failed to save history to file during shutdown: {}",
                        e
                    );
                }
            }
        }

        let _ = io::stdout().flush();
        info!("jcsh has shut down");
        process::exit(code_like_u8);
    }

    fn last_exit_status(&self) -> ExitStatus {
        self.last_exit_status
    }

    fn is_interactive(&self) -> bool {
        self.is_interactive
    }

    fn job_table(&self) -> &JobTable {
        &self.job_table
    }

    fn confirm_exit(&mut self) -> bool {
        let live_jobs = self.job_table.jobs().any(|job| !job.is_done());
        if !live_jobs || self.exit_warned {
            return true;
        }
        self.exit_warned = true;
        false
    }

    fn put_job_in_foreground(&mut self, job_id: JobId) -> Result<ExitStatus> {
        debug!("putting job [{}] in foreground", job_id);
        self.signals.reap_children(&mut self.job_table);

        let (pgid, status, tmodes) = {
            let job = self
                .job_table
                .find_by_id(job_id)
                .ok_or_else(|| Error::no_such_job(format!("%{}", job_id)))?;
            (job.pgid(), job.status(), job.tmodes().cloned())
        };

        let terminal_guard = self.terminal.foreground(pgid);
        if status == JobStatus::Stopped {
            if let Some(ref tmodes) = tmodes {
                terminal_guard.set_modes(tmodes);
            }
            continue_process_group(pgid)?;
        }
        self.job_table.update_status(pgid, JobStatus::Running);

        let outcome = match self.job_table.find_by_id_mut(job_id) {
            Some(job) => wait_for_process_group(Some(pgid), job.processes_mut())?,
            None => return Err(Error::no_such_job(format!("%{}", job_id))),
        };
        match outcome {
            WaitOutcome::Completed(status_code) => {
                drop(terminal_guard);
                self.job_table.mark_foreground_done(pgid);
                Ok(status_code)
            }
            WaitOutcome::Stopped(signal) => {
                let tmodes = terminal_guard.finish();
                self.announce_stopped(pgid, tmodes);
                Ok(ExitStatus::from_signal(signal))
            }
        }
    }

    fn put_job_in_background(&mut self, job_id: JobId) -> Result<()> {
        debug!("putting job [{}] in background", job_id);
        let pgid = self
            .job_table
            .find_by_id(job_id)
            .map(|job| job.pgid())
            .ok_or_else(|| Error::no_such_job(format!("%{}", job_id)))?;

        continue_process_group(pgid)?;
        self.job_table.update_status(pgid, JobStatus::Running);
        Ok(())
    }
}

fn continue_process_group(pgid: Pid) -> Result<()> {
    signal::killpg(pgid, Signal::SIGCONT).context(ErrorKind::Nix)?;
    Ok(())
}

impl fmt::Debug for JobControlShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}\n{:?}", self.job_table, self.editor)
    }
}

pub fn create_shell(config: ShellConfig) -> Result<Box<dyn Shell>> {
    let shell = JobControlShell::new(config)?;
    Ok(Box::new(shell))
}
