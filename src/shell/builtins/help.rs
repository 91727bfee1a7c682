use crate::shell::builtins::{self, prelude::*, BuiltinCommand};
use crate::shell::builtins::{Bg, Cd, Echo, Exit, Fg, Jobs, Pwd};

pub struct Help;

impl builtins::BuiltinCommand for Help {
    const NAME: &'static str = builtins::HELP_NAME;

    const HELP: &'static str = "\
help: help [command ...]
    Display helpful information about builtin commands. If COMMAND is specified,
    gives detailed help on all commands matching COMMAND, otherwise a list of the
    builtins is printed.";

    fn run<T: AsRef<str>>(
        _shell: &mut dyn Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        if args.is_empty() {
            for usage in all_usage_strings() {
                writeln!(stdout, "{}", usage).context(ErrorKind::Io)?;
            }
            return Ok(ExitStatus::from_success());
        }

        let mut all_invalid = true;
        for arg in args {
            if let Some(msg) = help_text(arg.as_ref()) {
                writeln!(stdout, "{}", msg).context(ErrorKind::Io)?;
                all_invalid = false;
            }
        }

        if all_invalid {
            let topic = args.last().map(|arg| arg.as_ref()).unwrap_or_default();
            return Err(Error::builtin_command(
                format!("help: no help topics match `{}'", topic),
                1,
            ));
        }
        Ok(ExitStatus::from_success())
    }
}

fn help_text(name: &str) -> Option<&'static str> {
    match name {
        builtins::BG_NAME => Some(Bg::HELP),
        builtins::CD_NAME => Some(Cd::HELP),
        builtins::ECHO_NAME => Some(Echo::HELP),
        builtins::EXIT_NAME => Some(Exit::HELP),
        builtins::FG_NAME => Some(Fg::HELP),
        builtins::HELP_NAME => Some(Help::HELP),
        builtins::JOBS_NAME => Some(Jobs::HELP),
        builtins::PWD_NAME => Some(Pwd::HELP),
        _ => None,
    }
}

fn all_usage_strings() -> Vec<String> {
    vec![
        Bg::usage(),
        Cd::usage(),
        Echo::usage(),
        Exit::usage(),
        Fg::usage(),
        Help::usage(),
        Jobs::usage(),
        Pwd::usage(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_has_help() {
        for name in &["bg", "cd", "echo", "exit", "fg", "help", "jobs", "pwd"] {
            let text = help_text(name).unwrap();
            assert!(text.starts_with(&format!("{}: {}", name, name)), "{}", text);
        }
        assert_eq!(help_text("ls"), None);
    }

    #[test]
    fn test_usage_is_first_line() {
        assert_eq!(Cd::usage(), "cd: cd [dir]");
        assert_eq!(all_usage_strings().len(), 8);
    }
}
