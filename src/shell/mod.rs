use std::{path::Path, process::ExitStatus};

use crate::core::job::JobId;
use crate::errors::Result;

pub use self::job_table::JobTable;
#[cfg(unix)]
pub use self::unix::create_shell;

mod builtins;
pub mod execute_command;
pub mod job_table;
pub mod lookup;
pub mod signals;
pub mod terminal;
#[cfg(unix)]
pub mod unix;

const HISTORY_FILE_NAME: &str = ".jcsh_history";
const SYNTAX_ERROR_EXIT_STATUS: i32 = 2;

pub trait Shell {
    fn execute_command_string(&mut self, input: &str) -> Result<()>;
    fn execute_commands_from_file(&mut self, path: &Path) -> Result<()>;
    fn execute_from_stdin(&mut self);
    /// Shuts down every tracked job, saves history and exits the process.
    fn exit(&mut self, n: Option<ExitStatus>) -> !;
    fn last_exit_status(&self) -> ExitStatus;
    fn is_interactive(&self) -> bool;

    fn job_table(&self) -> &JobTable;
    /// Returns `false` the first time exit is requested while jobs are still
    /// tracked, `true` afterwards.
    fn confirm_exit(&mut self) -> bool;
    /// Continues the job if it is stopped and waits for it in the foreground.
    fn put_job_in_foreground(&mut self, job_id: JobId) -> Result<ExitStatus>;
    /// Continues a stopped job without waiting for it.
    fn put_job_in_background(&mut self, job_id: JobId) -> Result<()>;
}

/// Policy object to control a Shell's behavior
#[derive(Debug, Copy, Clone)]
pub struct ShellConfig {
    /// Determines if new command entries will be added to the shell's command history.
    enable_command_history: bool,

    /// Number of entries to store in the shell's command history
    command_history_capacity: usize,

    /// Determines if job control (process groups owning the terminal) is
    /// attempted. It only takes effect when stdin is a terminal.
    enable_job_control: bool,

    /// Determines if some messages (e.g. "exit") should be displayed.
    display_messages: bool,
}

impl ShellConfig {
    /// Creates an interactive shell, e.g. command history, job control
    ///
    /// # Complete List
    /// - Command History is enabled
    /// - Job Control is enabled
    /// - Some additional messages are displayed
    pub fn interactive(command_history_capacity: usize) -> Self {
        Self {
            enable_command_history: true,
            command_history_capacity,
            enable_job_control: true,
            display_messages: true,
        }
    }

    /// Creates a noninteractive shell, e.g. no command history, no job control
    ///
    /// # Complete List
    /// - Command History is disabled. Commands are neither saved nor loaded.
    /// - Job Control is disabled. Background jobs still get their own
    ///   process group, but the terminal is never handed over.
    /// - Fewer messages are displayed
    pub fn noninteractive() -> Self {
        Default::default()
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            enable_command_history: false,
            command_history_capacity: 0,
            enable_job_control: false,
            display_messages: false,
        }
    }
}
