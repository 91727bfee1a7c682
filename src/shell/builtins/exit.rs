use crate::core::job::JobStatus;
use crate::shell::builtins::{self, prelude::*};

pub struct Exit;

impl builtins::BuiltinCommand for Exit {
    const NAME: &'static str = builtins::EXIT_NAME;

    const HELP: &'static str = "\
exit: exit [n]
    Exit the shell with a status of N. If N is omitted, the exit status
    is that of the last command executed.

    Tracked jobs are asked to terminate first. If there are any, the first
    request only warns about them.";

    fn run<T: AsRef<str>>(
        shell: &mut dyn Shell,
        args: &[T],
        _stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let live_jobs = if shell.job_table().most_recent(JobStatus::Stopped).is_some() {
            "stopped"
        } else {
            "running"
        };
        if !shell.confirm_exit() {
            return Err(Error::builtin_command(
                format!("There are {} jobs.", live_jobs),
                1,
            ));
        }

        let status_code = args
            .get(0)
            .map(|arg| {
                arg.as_ref().parse::<i32>().unwrap_or_else(|_| {
                    eprintln!("jcsh: exit: {}: numeric argument required", arg.as_ref());
                    2
                })
            })
            .map(ExitStatus::from_status);
        shell.exit(status_code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;
    use std::time::{Duration, Instant};

    use nix::sys::signal::{self, Signal};

    use crate::core::job::JobId;
    use crate::shell::builtins::BuiltinCommand;
    use crate::shell::unix::JobControlShell;
    use crate::shell::ShellConfig;

    fn warning(shell: &mut JobControlShell) -> String {
        let no_args: &[&str] = &[];
        Exit::run(shell, no_args, &mut io::sink())
            .unwrap_err()
            .to_string()
    }

    #[test]
    fn test_warning_names_running_jobs() {
        let mut shell = JobControlShell::new(ShellConfig::noninteractive()).unwrap();
        shell.execute_command_string("sleep 0.2 &").unwrap();
        assert_eq!(warning(&mut shell), "There are running jobs.");
    }

    #[test]
    fn test_warning_names_stopped_jobs() {
        let mut shell = JobControlShell::new(ShellConfig::noninteractive()).unwrap();
        shell.execute_command_string("sleep 5 &").unwrap();
        let pgid = shell.job_table().find_by_id(JobId(1)).unwrap().pgid();
        signal::killpg(pgid, Signal::SIGSTOP).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while shell.job_table().most_recent(JobStatus::Stopped).is_none() {
            assert!(Instant::now() < deadline, "job never stopped");
            // the drain runs before every foreground wait
            shell.execute_command_string("sleep 0.01").unwrap();
        }

        assert_eq!(warning(&mut shell), "There are stopped jobs.");
        signal::killpg(pgid, Signal::SIGKILL).unwrap();
    }
}
