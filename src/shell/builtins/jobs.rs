use crate::core::job::{Job, JobId, JobStatus};
use crate::shell::builtins::{self, prelude::*};

const JOBS_USAGE: &str = "
Usage:
    jobs [-l | -p] [-r | -s]

Options:
    -l      lists process IDs in addition to the normal information
    -p      lists process group IDs only
    -r      restrict output to running jobs
    -s      restrict output to stopped jobs
";

pub struct Jobs;

#[derive(Debug, Deserialize)]
struct JobsArgs {
    flag_l: bool,
    flag_p: bool,
    flag_r: bool,
    flag_s: bool,
}

impl JobsArgs {
    fn selects(&self, job: &Job) -> bool {
        if self.flag_r {
            job.status() == JobStatus::Running
        } else if self.flag_s {
            job.status() == JobStatus::Stopped
        } else {
            true
        }
    }
}

impl builtins::BuiltinCommand for Jobs {
    const NAME: &'static str = builtins::JOBS_NAME;

    const HELP: &'static str = "\
jobs: jobs [-l | -p] [-r | -s]
    Display status of jobs.

    Lists the active jobs. Without options, the status of all active jobs
    is displayed.

    Options:
      -l      lists process IDs in addition to the normal information
      -p      lists process group IDs only
      -r      restrict output to running jobs
      -s      restrict output to stopped jobs

    Exit Status:
    Returns success unless an invalid option is given or an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut dyn Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let args: JobsArgs =
            parse_args(JOBS_USAGE, Self::NAME, args.iter().map(|arg| arg.as_ref()))?;
        debug!("{:?}", args);

        for job in shell.job_table().jobs().filter(|job| args.selects(job)) {
            if args.flag_p {
                writeln!(stdout, "{}", job.pgid()).context(ErrorKind::Io)?;
                continue;
            }

            writeln!(stdout, "{}", job).context(ErrorKind::Io)?;
            if args.flag_l {
                for process in job.processes() {
                    let pid = process
                        .id()
                        .map_or_else(|| String::from("-"), |pid| pid.to_string());
                    writeln!(stdout, "\t{}\t{}\t{}", pid, process.status(), process.argv())
                        .context(ErrorKind::Io)?;
                }
            }
        }

        Ok(ExitStatus::from_success())
    }
}

pub struct Fg;

impl builtins::BuiltinCommand for Fg {
    const NAME: &'static str = builtins::FG_NAME;

    const HELP: &'static str = "\
fg: fg [job_spec]
    Move job to the foreground.

    Place the job identified by JOB_SPEC in the foreground, making it
    the current job. If JOB_SPEC is not present, the most recently stopped
    job is used, or failing that the most recent running one.

    Exit Status:
    Status of command placed in foreground or failure if an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut dyn Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        let (job_id, input) = {
            let table = shell.job_table();
            let job = match args.first() {
                Some(arg) => {
                    let job_id = parse_job_spec(Self::NAME, arg.as_ref())?;
                    table.find_by_id(job_id).ok_or_else(|| {
                        Error::builtin_command(format!("fg: job {} not found", job_id), 1)
                    })?
                }
                None => table
                    .most_recent(JobStatus::Stopped)
                    .or_else(|| table.most_recent(JobStatus::Running))
                    .ok_or_else(|| Error::builtin_command("fg: no current job", 1))?,
            };
            (job.id(), job.input().to_owned())
        };

        writeln!(stdout, "{}", input).context(ErrorKind::Io)?;
        stdout.flush().context(ErrorKind::Io)?;
        shell.put_job_in_foreground(job_id)
    }
}

pub struct Bg;

impl builtins::BuiltinCommand for Bg {
    const NAME: &'static str = builtins::BG_NAME;

    const HELP: &'static str = "\
bg: bg [job_spec ...]
    Move jobs to the background.

    Place the jobs identified by each JOB_SPEC in the background, as if they
    had been started with `&'. If JOB_SPEC is not present, the most recently
    stopped job is used.

    Exit Status:
    Returns success unless a job is not stopped or an error occurs.";

    fn run<T: AsRef<str>>(
        shell: &mut dyn Shell,
        args: &[T],
        stdout: &mut dyn Write,
    ) -> Result<ExitStatus> {
        if args.is_empty() {
            let job_id = shell
                .job_table()
                .most_recent(JobStatus::Stopped)
                .map(Job::id)
                .ok_or_else(|| Error::builtin_command("bg: no stopped jobs", 1))?;
            resume_in_background(shell, job_id, stdout)?;
            return Ok(ExitStatus::from_success());
        }

        let mut last_error = None;
        for arg in args {
            let result = parse_job_spec(Self::NAME, arg.as_ref())
                .and_then(|job_id| resume_in_background(shell, job_id, stdout));
            if let Err(e) = result {
                if let Some(previous) = last_error.replace(e) {
                    eprintln!("jcsh: {}", previous);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(ExitStatus::from_success()),
        }
    }
}

fn resume_in_background(
    shell: &mut dyn Shell,
    job_id: JobId,
    stdout: &mut dyn Write,
) -> Result<()> {
    let input = match shell.job_table().find_by_id(job_id) {
        None => {
            return Err(Error::builtin_command(
                format!("bg: job {} not found", job_id),
                1,
            ))
        }
        Some(job) if job.status() != JobStatus::Stopped => {
            return Err(Error::builtin_command(
                format!("bg: job {} is not stopped", job_id),
                1,
            ))
        }
        Some(job) => job.input().to_owned(),
    };

    shell.put_job_in_background(job_id)?;
    writeln!(stdout, "[{}] {} &", job_id, input).context(ErrorKind::Io)?;
    Ok(())
}

/// Accepts `%N` or a bare `N`.
fn parse_job_spec(builtin: &str, spec: &str) -> Result<JobId> {
    let digits = if spec.starts_with('%') { &spec[1..] } else { spec };
    digits
        .parse::<u32>()
        .map(JobId)
        .map_err(|_| Error::builtin_command(format!("{}: invalid job ID: {}", builtin, spec), 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_spec() {
        assert_eq!(parse_job_spec("fg", "%3").unwrap(), JobId(3));
        assert_eq!(parse_job_spec("fg", "12").unwrap(), JobId(12));

        let err = parse_job_spec("bg", "%x").unwrap_err();
        assert_eq!(err.to_string(), "bg: invalid job ID: %x");
        assert_eq!(
            *err.kind(),
            ErrorKind::BuiltinCommand {
                message: String::from("bg: invalid job ID: %x"),
                code: 1,
            }
        );
    }

    #[test]
    fn test_jobs_usage_parses() {
        let args: JobsArgs = parse_args(JOBS_USAGE, "jobs", vec!["-l", "-s"]).unwrap();
        assert!(args.flag_l);
        assert!(args.flag_s);
        assert!(!args.flag_p);
        assert!(!args.flag_r);

        let result: Result<JobsArgs> = parse_args(JOBS_USAGE, "jobs", vec!["-l", "-p"]);
        assert_eq!(*result.unwrap_err().kind(), ErrorKind::Docopt);
    }
}
