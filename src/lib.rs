//! Jcsh - a job control shell
//!
//! Runs pipelines of external programs in their own process groups, hands the
//! controlling terminal to foreground jobs and tracks background and stopped
//! jobs until they are reaped.

/// Logs the error of a `Result` without consuming it.
macro_rules! log_if_err {
    ($result:expr, $fmt:expr) => {{
        if let Err(ref e) = $result {
            log::error!("{}: {}", $fmt, e);
        }
    }};
    ($result:expr, $fmt:expr, $($arg:tt)*) => {{
        if let Err(ref e) = $result {
            log::error!("{}: {}", format_args!($fmt, $($arg)*), e);
        }
    }};
}

pub mod core;
mod editor;
pub mod errors;
pub mod shell;
mod util;

pub use crate::shell::{create_shell, Shell, ShellConfig};
pub use crate::util::JcshExitStatusExt;
