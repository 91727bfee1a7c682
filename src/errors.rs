//! Error module. See the [failure](https://crates.io/crates/failure) crate for details.

use std::fmt;
use std::result;

use failure::{Backtrace, Context, Fail};

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    ctx: Context<ErrorKind>,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.ctx.get_context()
    }

    pub(crate) fn syntax<T: AsRef<str>>(line: T) -> Error {
        Error::from(ErrorKind::Syntax(line.as_ref().to_string()))
    }

    pub(crate) fn builtin_command<T: AsRef<str>>(message: T, code: i32) -> Error {
        Error::from(ErrorKind::BuiltinCommand {
            message: message.as_ref().to_string(),
            code,
        })
    }

    pub(crate) fn command_not_found<T: AsRef<str>>(command: T) -> Error {
        Error::from(ErrorKind::CommandNotFound(command.as_ref().to_string()))
    }

    pub(crate) fn no_such_job<T: AsRef<str>>(job: T) -> Error {
        Error::from(ErrorKind::NoSuchJob(job.as_ref().to_string()))
    }

    pub(crate) fn redirect<T: AsRef<str>>(path: T) -> ErrorKind {
        ErrorKind::Redirect(path.as_ref().to_string())
    }

    pub(crate) fn bookkeeping<T: AsRef<str>>(message: T) -> Error {
        Error::from(ErrorKind::Bookkeeping(message.as_ref().to_string()))
    }

    pub(crate) fn readline<T: AsRef<str>>(message: T) -> Error {
        Error::from(ErrorKind::Readline(message.as_ref().to_string()))
    }

    /// Bookkeeping failures leave the job table in a state the shell can no
    /// longer trust; callers terminate the shell when this is `true`.
    pub fn is_fatal(&self) -> bool {
        match *self.kind() {
            ErrorKind::Bookkeeping(_) => true,
            _ => false,
        }
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.ctx.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.ctx.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ctx.cause() {
            Some(cause) => write!(f, "{}: {}", self.ctx, cause),
            None => fmt::Display::fmt(&self.ctx, f),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Syntax(String),
    BuiltinCommand { message: String, code: i32 },
    CommandNotFound(String),
    NoSuchJob(String),
    /// Pipe or fork failure while launching a pipeline.
    Launch,
    /// A redirection target could not be opened.
    Redirect(String),
    Bookkeeping(String),
    Docopt,
    Io,
    Nix,
    Readline(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ErrorKind::Syntax(ref line) => write!(f, "syntax error: '{}'", line),
            ErrorKind::BuiltinCommand { ref message, .. } => write!(f, "{}", message),
            ErrorKind::CommandNotFound(ref line) => write!(f, "{}: command not found", line),
            ErrorKind::NoSuchJob(ref job) => write!(f, "{}: no such job", job),
            ErrorKind::Launch => write!(f, "unable to launch pipeline"),
            ErrorKind::Redirect(ref path) => write!(f, "{}", path),
            ErrorKind::Bookkeeping(ref message) => write!(f, "job table corrupted: {}", message),
            ErrorKind::Docopt => write!(f, "Docopt error occurred"),
            ErrorKind::Io => write!(f, "I/O error occurred"),
            ErrorKind::Nix => write!(f, "Nix error occurred"),
            ErrorKind::Readline(ref message) => write!(f, "readline: {}", message),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error::from(Context::new(kind))
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(ctx: Context<ErrorKind>) -> Error {
        Error { ctx }
    }
}
