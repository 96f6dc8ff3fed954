//! Command Runner: spawns `git`, `gh` and `diff` and captures their output.

use super::error::{Result, TmrError};
use log::trace;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// Result of running an external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    /// Returns true if the command exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout with surrounding whitespace removed.
    #[must_use]
    pub fn stdout_text(&self) -> &str {
        self.stdout.trim()
    }
}

/// Configuration for the command runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

/// Executes external commands without a shell.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    config: RunnerConfig,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

impl CommandRunner {
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// A runner with a different timeout, same otherwise.
    #[must_use]
    pub fn with_timeout(&self, timeout_secs: u64) -> Self {
        Self::new(RunnerConfig { timeout_secs })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Runs `program args...`, capturing stdout and stderr.
    ///
    /// A non-zero exit is reported in the output, not as an error.
    ///
    /// # Errors
    /// Returns error if the command cannot be spawned or times out.
    pub fn run<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        cwd: Option<&Path>,
    ) -> Result<CommandOutput> {
        let display = render(program, args);
        trace!("running: {display}");

        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(AsRef::as_ref))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| TmrError::Spawn {
            command: display.clone(),
            source,
        })?;

        // Drain both pipes while waiting so a chatty child cannot block on a full pipe.
        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let timeout = self.timeout();
        let status = match wait(&mut child, timeout, &display)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TmrError::Timeout {
                    command: display,
                    timeout,
                });
            }
        };

        Ok(CommandOutput {
            exit_code: status.code(),
            stdout: collect(stdout_reader),
            stderr: collect(stderr_reader),
            duration: start.elapsed(),
        })
    }

    /// Runs a command attached to the user's terminal, e.g. `git pull` or a diff tool.
    ///
    /// # Errors
    /// Returns error if the command cannot be spawned.
    pub fn run_interactive<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        cwd: Option<&Path>,
    ) -> Result<Option<i32>> {
        let display = render(program, args);
        trace!("running: {display}");

        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(AsRef::as_ref));
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let status = cmd.status().map_err(|source| TmrError::Spawn {
            command: display,
            source,
        })?;
        Ok(status.code())
    }
}

fn wait(
    child: &mut Child,
    timeout: Duration,
    display: &str,
) -> Result<Option<std::process::ExitStatus>> {
    child
        .wait_timeout(timeout)
        .map_err(|source| TmrError::Spawn {
            command: display.to_string(),
            source,
        })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn render<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut display = program.to_string();
    for arg in args {
        display.push(' ');
        display.push_str(arg.as_ref());
    }
    display
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_stdout_and_exit_code() {
        let runner = CommandRunner::default();
        let out = runner.run("sh", &["-c", "echo hello; exit 3"], None).unwrap();
        assert_eq!(out.stdout_text(), "hello");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
    }

    #[test]
    fn test_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let runner = CommandRunner::default();
        let out = runner.run("ls", &[] as &[&str], Some(dir.path())).unwrap();
        assert!(out.success());
        assert!(out.stdout.contains("marker.txt"));
    }

    #[test]
    fn test_large_output_does_not_block() {
        let runner = CommandRunner::new(RunnerConfig { timeout_secs: 30 });
        let out = runner
            .run("sh", &["-c", "i=0; while [ $i -lt 20000 ]; do echo line-$i; i=$((i+1)); done"], None)
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.lines().count(), 20000);
    }

    #[test]
    fn test_timeout_kills_child() {
        let runner = CommandRunner::default().with_timeout(1);
        let err = runner.run("sleep", &["5"], None).unwrap_err();
        assert!(matches!(err, TmrError::Timeout { .. }));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let runner = CommandRunner::default();
        let err = runner
            .run("definitely-not-a-real-program-tmr", &[] as &[&str], None)
            .unwrap_err();
        assert!(matches!(err, TmrError::Spawn { .. }));
    }
}
