//! Jcsh builtins
//!
//! This module includes the implementations of the builtin commands that run
//! inside the shell process. Where possible the commands conform to their
//! standard Bash counterparts.

use std::iter;

use docopt::Docopt;
use failure::Fail;

use self::prelude::*;

use self::dirs::{Cd, Pwd};
use self::echo::Echo;
use self::exit::Exit;
use self::help::Help;
use self::jobs::{Bg, Fg, Jobs};

pub mod prelude {
    pub use std::io::Write;
    pub use std::process::ExitStatus;

    pub use failure::ResultExt;
    pub use log::debug;
    pub use serde_derive::Deserialize;

    pub use super::parse_args;
    pub use crate::errors::{Error, ErrorKind, Result};
    pub use crate::shell::Shell;
    pub use crate::util::JcshExitStatusExt;
}

mod dirs;
mod echo;
mod exit;
mod help;
mod jobs;

const BG_NAME: &str = "bg";
const CD_NAME: &str = "cd";
const ECHO_NAME: &str = "echo";
const EXIT_NAME: &str = "exit";
const FG_NAME: &str = "fg";
const HELP_NAME: &str = "help";
const JOBS_NAME: &str = "jobs";
const PWD_NAME: &str = "pwd";

/// Represents a Jcsh builtin command such as cd or help.
pub trait BuiltinCommand {
    /// The NAME of the command.
    const NAME: &'static str;
    /// The help string to display to the user.
    const HELP: &'static str;
    /// The usage string to display to the user.
    fn usage() -> String {
        Self::HELP.lines().next().unwrap_or(Self::NAME).to_owned()
    }
    /// Runs the command with the given arguments in the `shell` environment.
    fn run<T: AsRef<str>>(
        shell: &mut dyn Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus>;
}

pub fn is_builtin<T: AsRef<str>>(program: T) -> bool {
    [
        BG_NAME, CD_NAME, ECHO_NAME, EXIT_NAME, FG_NAME, HELP_NAME, JOBS_NAME, PWD_NAME,
    ]
    .contains(&program.as_ref())
}

/// precondition: command is a builtin.
/// Returns (`exit_status_code`, `builtin_result`)
pub fn run<S1, S2>(
    shell: &mut dyn Shell,
    program: S1,
    args: &[S2],
    stdout: &mut dyn Write,
) -> (ExitStatus, Result<()>)
where
    S1: AsRef<str>,
    S2: AsRef<str>,
{
    debug_assert!(is_builtin(&program));

    let result = match program.as_ref() {
        BG_NAME => Bg::run(shell, args, stdout),
        CD_NAME => Cd::run(shell, args, stdout),
        ECHO_NAME => Echo::run(shell, args, stdout),
        EXIT_NAME => Exit::run(shell, args, stdout),
        FG_NAME => Fg::run(shell, args, stdout),
        HELP_NAME => Help::run(shell, args, stdout),
        JOBS_NAME => Jobs::run(shell, args, stdout),
        PWD_NAME => Pwd::run(shell, args, stdout),
        _ => unreachable!(),
    };

    match result {
        Ok(exit_status) => (exit_status, Ok(())),
        Err(e) => (get_builtin_exit_status(&e), Err(e)),
    }
}

fn get_builtin_exit_status(e: &Error) -> ExitStatus {
    let status = match *e.kind() {
        ErrorKind::BuiltinCommand { code, .. } => code,
        ErrorKind::Docopt => 2,
        _ => 1,
    };

    ExitStatus::from_status(status)
}

pub fn parse_args<'a, 'de: 'a, D, S, I>(usage: &str, program: S, args: I) -> Result<D>
where
    D: serde::Deserialize<'de>,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Docopt::new(usage)
        .and_then(|d| d.argv(iter::once(program).chain(args)).deserialize())
        .map_err(|e| e.context(ErrorKind::Docopt).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_builtin() {
        for name in &["bg", "cd", "echo", "exit", "fg", "help", "jobs", "pwd"] {
            assert!(is_builtin(name), "{} should be a builtin", name);
        }
        assert!(!is_builtin("ls"));
        assert!(!is_builtin("kill"));
    }

    #[test]
    fn test_builtin_exit_status() {
        assert_eq!(
            get_builtin_exit_status(&Error::builtin_command("fg: no current job", 1)).code(),
            Some(1)
        );
        assert_eq!(
            get_builtin_exit_status(&Error::from(ErrorKind::Docopt)).code(),
            Some(2)
        );
    }
}
