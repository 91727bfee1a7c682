use crate::shell::builtins::{self, prelude::*};

pub struct Echo;

impl builtins::BuiltinCommand for Echo {
    const NAME: &'static str = builtins::ECHO_NAME;

    const HELP: &'static str = "\
echo: echo [arg ...]
    Write arguments to the standard output.

    Display the ARGs, separated by a single space character and followed by a
    newline, on the standard output.

    Exit Status:
    Returns success unless a write error occurs.";

    fn run<T: AsRef<str>>(
        _shell: &mut dyn Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let line = args.iter().map(|arg| arg.as_ref()).collect::<Vec<&str>>().join(" ");
        writeln!(stdout, "{}", line).context(ErrorKind::Io)?;
        Ok(ExitStatus::from_success())
    }
}
