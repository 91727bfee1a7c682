use std::os::unix::process::ExitStatusExt as StdExitStatusExt;
use std::process::ExitStatus;

use nix::sys::signal::Signal;

pub use self::unix::{get_terminal, isatty};

pub mod unix;

/// Exit status conventionally reported when a program cannot be found or executed.
pub const COMMAND_NOT_FOUND_EXIT_STATUS: i32 = 127;

/// Offset added to a signal number to form the status of a signalled process.
const SIGNAL_EXIT_STATUS_OFFSET: i32 = 128;

/// The numeric status a shell reports for `status`.
pub fn status_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| SIGNAL_EXIT_STATUS_OFFSET + signal))
        .unwrap_or(1)
}

/// Jcsh Utility Extensions for `ExitStatus`
pub trait JcshExitStatusExt {
    /// Create an ExitStatus to indicate *successful* program execution.
    fn from_success() -> Self;

    /// Create an ExitStatus to indicate *unsuccessful* program execution.
    fn from_failure() -> Self;

    /// Create an ExitStatus from a status code
    fn from_status(code: i32) -> Self;

    /// Create the ExitStatus a shell reports for a process terminated or
    /// stopped by `signal`, i.e. 128 + the signal number.
    fn from_signal(signal: Signal) -> Self;
}

impl JcshExitStatusExt for ExitStatus {
    /// # Examples
    /// ```rust
    /// use jcsh::JcshExitStatusExt;
    /// use std::process::ExitStatus;
    /// assert!(ExitStatus::from_success().success());
    /// ```
    fn from_success() -> Self {
        ExitStatus::from_status(0)
    }

    /// # Examples
    /// ```rust
    /// use jcsh::JcshExitStatusExt;
    /// use std::process::ExitStatus;
    /// assert!(!ExitStatus::from_failure().success());
    /// ```
    fn from_failure() -> Self {
        ExitStatus::from_status(1)
    }

    /// # Examples
    /// ```rust
    /// use jcsh::JcshExitStatusExt;
    /// use std::process::ExitStatus;
    /// assert!(ExitStatus::from_status(0).success());
    /// assert_eq!(ExitStatus::from_status(127).code(), Some(127));
    /// ```
    fn from_status(code: i32) -> Self {
        ExitStatus::from_raw((code & 0xff) << 8)
    }

    fn from_signal(signal: Signal) -> Self {
        ExitStatus::from_status(SIGNAL_EXIT_STATUS_OFFSET + signal as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_signal() {
        assert_eq!(ExitStatus::from_signal(Signal::SIGINT).code(), Some(130));
        assert_eq!(ExitStatus::from_signal(Signal::SIGTSTP).code(), Some(148));
    }

    #[test]
    fn test_status_code() {
        assert_eq!(status_code(ExitStatus::from_status(3)), 3);
        assert_eq!(status_code(ExitStatus::from_raw(9)), 137);
    }

    #[test]
    fn test_from_status_wraps_like_u8() {
        assert_eq!(ExitStatus::from_status(256).code(), Some(0));
        assert_eq!(ExitStatus::from_status(-1).code(), Some(255));
    }
}
