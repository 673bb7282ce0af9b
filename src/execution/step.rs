//! Single Job Execution
//!
//! Runs one rendered job:
//! - Output and log directory creation
//! - Script generation (`set -euo pipefail`)
//! - Stdout/stderr capture into the job log
//! - Optional timeout
//! - Declared-output check after a successful exit
//! - Removal of partial outputs when a job fails

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::Local;
use log::{debug, error, warn};
use tokio::process::{Child, Command};

use crate::error::JobFailure;
use crate::workflow::Job;

/// Per-run settings shared by every job.
#[derive(Debug, Clone)]
pub struct StepOptions {
    /// Where scripts (and logs of rules without a log pattern) are written
    pub script_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            script_dir: std::env::temp_dir().join("atacflow_scripts"),
            timeout: None,
        }
    }
}

/// Executes a job to completion.
///
/// # Returns
///
/// * `Ok(())` - Exit status 0 and every declared output exists
/// * `Err` - The failure, naming the job
pub async fn execute_job(job: &Job, options: &StepOptions) -> Result<(), JobFailure> {
    let io_error = |source| JobFailure::Io {
        job: job.id.to_string(),
        source,
    };

    let log_path = job
        .log
        .clone()
        .unwrap_or_else(|| options.script_dir.join(format!("{}.log", job.slug())));

    ensure_output_directories(job.output_paths().chain(log_path.to_str())).map_err(io_error)?;
    let script_path =
        create_execution_script(&options.script_dir, &job.slug(), &job.command).map_err(io_error)?;

    let log_file = open_log(&log_path, job).map_err(io_error)?;
    let stderr = log_file.try_clone().map_err(io_error)?;

    let mut command = Command::new("bash");
    command
        .arg(&script_path)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(io_error)?;

    let waited = match options.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                kill_job_processes(&mut child, job).await;
                remove_script(&script_path);
                discard_outputs(job);
                error!("Job '{}' timed out after {:?}", job.id, limit);
                return Err(JobFailure::TimedOut {
                    job: job.id.to_string(),
                    after: limit,
                });
            }
        },
        None => child.wait().await,
    };

    remove_script(&script_path);
    let status = waited.map_err(io_error)?;

    if !status.success() {
        error!(
            "Job '{}' failed with exit code: {:?}",
            job.id,
            status.code()
        );
        discard_outputs(job);
        return Err(JobFailure::Exit {
            job: job.id.to_string(),
            code: status.code(),
            log: log_path,
        });
    }

    if let Some(missing) = job.missing_outputs().first() {
        error!("Job '{}' did not create '{}'", job.id, missing);
        let path = PathBuf::from(missing);
        discard_outputs(job);
        return Err(JobFailure::MissingOutput {
            job: job.id.to_string(),
            path,
        });
    }

    debug!("Job '{}' completed successfully", job.id);
    Ok(())
}

/// Creates parent directories for output files.
fn ensure_output_directories<'a, I>(paths: I) -> std::io::Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    for path in paths {
        if path.is_empty() {
            continue;
        }
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                debug!("Created directory: {}", parent.display());
            }
        }
    }
    Ok(())
}

/// Opens the job log for appending and writes a timestamped header.
fn open_log(path: &Path, job: &Job) -> std::io::Result<File> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(
        file,
        "[{}] {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        job.id
    )?;
    writeln!(file, "$ {}", job.command)?;
    Ok(file)
}

/// Writes the bash script for a job.
fn create_execution_script(dir: &Path, name: &str, command: &str) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let script_path = dir.join(format!("job_{}.sh", name));
    let mut file = File::create(&script_path)?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -euo pipefail")?;
    writeln!(file, "{}", command)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path)
}

/// Kills the script and everything it started.
///
/// The script leads its own process group, so pipeline members and
/// subshells are signalled together with it.
async fn kill_job_processes(child: &mut Child, job: &Job) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: `pid` leads the process group created at spawn and has
            // not been reaped yet.
            let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                warn!(
                    "Failed to kill process group of '{}': {}",
                    job.id,
                    std::io::Error::last_os_error()
                );
            }
        }
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill timed out job '{}': {}", job.id, e);
    }
}

/// Removes whatever a failed job left at its output paths.
fn discard_outputs(job: &Job) {
    for path in job.output_paths() {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed partial output {}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial output {}: {}", path, e),
        }
    }
}

fn remove_script(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("Failed to clean up script {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::job::tests::stub_job;
    use tempfile::tempdir;

    fn options(dir: &Path) -> StepOptions {
        StepOptions {
            script_dir: dir.join("scripts"),
            timeout: None,
        }
    }

    #[test]
    fn test_create_execution_script() {
        let dir = tempdir().unwrap();
        let script_path = create_execution_script(dir.path(), "test_job", "echo 'hello world'").unwrap();

        let content = fs::read_to_string(&script_path).unwrap();
        assert!(content.starts_with("#!/bin/bash\n"));
        assert!(content.contains("set -euo pipefail"));
        assert!(content.contains("echo 'hello world'"));
    }

    #[test]
    fn test_ensure_output_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/out.txt");

        ensure_output_directories([nested.to_str().unwrap(), ""]).unwrap();
        assert!(dir.path().join("a/b").exists());
    }

    #[tokio::test]
    async fn test_execute_job_writes_output_and_log() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out/hello.txt");
        let log = dir.path().join("logs/hello.log");

        let mut job = stub_job("hello", &[output.to_str().unwrap()], vec![]);
        job.command = format!("echo to-stdout; echo to-stderr >&2; echo hi > {}", output.display());
        job.log = Some(log.clone());

        execute_job(&job, &options(dir.path())).await.unwrap();

        assert!(output.exists());
        let text = fs::read_to_string(&log).unwrap();
        assert!(text.contains("stub[name=hello]"));
        assert!(text.contains("to-stdout"));
        assert!(text.contains("to-stderr"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = tempdir().unwrap();
        let mut job = stub_job("bad", &[], vec![]);
        job.command = "exit 3".to_string();

        match execute_job(&job, &options(dir.path())).await {
            Err(JobFailure::Exit { code, job, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(job, "stub[name=bad]");
            }
            other => panic!("Expected Exit failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_job_leaves_no_output() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out/half.txt");
        let mut job = stub_job("half", &[output.to_str().unwrap()], vec![]);
        job.command = format!("echo half > {}\nexit 1", output.display());

        assert!(matches!(
            execute_job(&job, &options(dir.path())).await,
            Err(JobFailure::Exit { .. })
        ));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_missing_second_output_discards_first() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        let mut job = stub_job(
            "partial",
            &[first.to_str().unwrap(), second.to_str().unwrap()],
            vec![],
        );
        job.command = format!("touch {}", first.display());

        assert!(matches!(
            execute_job(&job, &options(dir.path())).await,
            Err(JobFailure::MissingOutput { .. })
        ));
        assert!(!first.exists());
    }

    #[tokio::test]
    async fn test_pipeline_failure_is_failure() {
        let dir = tempdir().unwrap();
        let mut job = stub_job("pipe", &[], vec![]);
        job.command = "false | cat".to_string();

        assert!(matches!(
            execute_job(&job, &options(dir.path())).await,
            Err(JobFailure::Exit { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_output_is_failure() {
        let dir = tempdir().unwrap();
        let promised = dir.path().join("never.txt");
        let job = stub_job("liar", &[promised.to_str().unwrap()], vec![]);

        match execute_job(&job, &options(dir.path())).await {
            Err(JobFailure::MissingOutput { path, .. }) => assert_eq!(path, promised),
            other => panic!("Expected MissingOutput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempdir().unwrap();
        let mut job = stub_job("slow", &[], vec![]);
        job.command = "sleep 5".to_string();

        let mut opts = options(dir.path());
        opts.timeout = Some(Duration::from_millis(200));

        let started = std::time::Instant::now();
        match execute_job(&job, &opts).await {
            Err(JobFailure::TimedOut { after, .. }) => {
                assert_eq!(after, Duration::from_millis(200))
            }
            other => panic!("Expected TimedOut, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_timeout_kills_pipeline_members() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("late.txt");
        let mut job = stub_job("late", &[output.to_str().unwrap()], vec![]);
        job.command = format!("{{ sleep 0.6; echo late > {}; }} | cat", output.display());

        let mut opts = options(dir.path());
        opts.timeout = Some(Duration::from_millis(200));

        assert!(matches!(
            execute_job(&job, &opts).await,
            Err(JobFailure::TimedOut { .. })
        ));

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!output.exists());
    }
}
