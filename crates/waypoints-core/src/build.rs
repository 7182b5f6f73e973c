//! Running a profile's compile and test commands.

use crate::profile::{command_with_file, has_placeholder, Profile};
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Combined output is capped to this many bytes, keeping the tail.
pub const MAX_OUTPUT: usize = 10 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// `None` when the process was killed or never started.
    pub exit_code: Option<i32>,
    pub output: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl BuildOutcome {
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Executes a shell command and reports how it went. Never retries.
pub trait BuildRunner {
    fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> BuildOutcome;
}

// ---------------------------------------------------------------------------
// ShellRunner
// ---------------------------------------------------------------------------

/// Runs commands through `sh -c` in the project directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl BuildRunner for ShellRunner {
    fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> BuildOutcome {
        let started = Instant::now();
        debug!(command, cwd = %cwd.display(), "running build command");
        let mut outcome = execute_shell(command, cwd, timeout);
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        if outcome.timed_out {
            warn!(command, timeout_secs = timeout.as_secs(), "build command timed out");
        } else {
            info!(command, exit_code = ?outcome.exit_code, duration_ms = outcome.duration_ms, "build command finished");
        }
        outcome
    }
}

fn execute_shell(command: &str, cwd: &Path, timeout: Duration) -> BuildOutcome {
    let deadline = Instant::now() + timeout;
    let failed = |output: String| BuildOutcome {
        exit_code: None,
        output,
        timed_out: false,
        duration_ms: 0,
    };

    // Own process group, so a timeout can take down everything the shell started.
    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
    {
        Ok(c) => c,
        Err(e) => return failed(format!("failed to spawn: {e}")),
    };
    let child_pid = child.id();

    // Drain both pipes on their own threads so a chatty build cannot fill a
    // pipe buffer and stall.
    let stdout = Capture::spawn(child.stdout.take());
    let stderr = Capture::spawn(child.stderr.take());

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(child.wait());
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(status)) => {
            // Background jobs of the shell may still hold the pipes open.
            if !drained(&stdout, &stderr, deadline) {
                kill_group(child_pid);
                drained(&stdout, &stderr, Instant::now() + READER_GRACE);
            }
            BuildOutcome {
                exit_code: status.code(),
                output: combine_output(&stdout.text(), &stderr.text()),
                timed_out: false,
                duration_ms: 0,
            }
        }
        Ok(Err(e)) => failed(format!("wait failed: {e}")),
        Err(_) => {
            kill_group(child_pid);
            drained(&stdout, &stderr, Instant::now() + READER_GRACE);
            BuildOutcome {
                exit_code: None,
                output: combine_output(&stdout.text(), &stderr.text()),
                timed_out: true,
                duration_ms: 0,
            }
        }
    }
}

/// Wait until both readers hit end of file, or `deadline` passes. A process
/// that left the group can hold a pipe open forever.
fn drained(stdout: &Capture, stderr: &Capture, deadline: Instant) -> bool {
    loop {
        if stdout.is_finished() && stderr.is_finished() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// How long readers may drain after a kill.
const READER_GRACE: Duration = Duration::from_millis(500);

/// A pipe drained on a background thread into a shared buffer, readable
/// before the thread ends.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: thread::JoinHandle<()>,
}

impl Capture {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: Read + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = thread::spawn(move || {
            let Some(mut pipe) = pipe else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let Ok(mut buf) = sink.lock() else {
                            break;
                        };
                        buf.extend_from_slice(&chunk[..n]);
                        // Only the tail is ever reported.
                        if buf.len() > 4 * MAX_OUTPUT {
                            let excess = buf.len() - 2 * MAX_OUTPUT;
                            buf.drain(..excess);
                        }
                    }
                }
            }
        });
        Self { buf, handle }
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn text(&self) -> String {
        self.buf
            .lock()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }
}

/// Join stdout and stderr and keep at most [`MAX_OUTPUT`] bytes of the tail.
fn combine_output(stdout: &str, stderr: &str) -> String {
    let output = match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{stdout}\n{stderr}"),
    };
    let trimmed = output.trim();
    if trimmed.len() <= MAX_OUTPUT {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - MAX_OUTPUT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

/// SIGKILL the whole process group led by `pid`.
fn kill_group(pid: u32) {
    let _ = Command::new("kill")
        .arg("-9")
        .arg("--")
        .arg(format!("-{pid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

// ---------------------------------------------------------------------------
// Profile helpers
// ---------------------------------------------------------------------------

/// A runnable command: placeholders filled from `file`, or skipped when
/// there is no file to fill them with.
fn resolve_command(command: Option<&str>, file: Option<&Path>) -> Option<String> {
    let command = command?.trim();
    if command.is_empty() {
        return None;
    }
    let command = match file {
        Some(f) => command_with_file(command, f),
        None => command.to_string(),
    };
    if has_placeholder(&command) {
        debug!(command, "skipping command with unresolved placeholder");
        return None;
    }
    Some(command)
}

/// A command that was run together with how it went.
#[derive(Debug, Clone)]
pub struct Ran {
    pub command: String,
    pub outcome: BuildOutcome,
}

fn run_resolved(
    runner: &dyn BuildRunner,
    command: Option<&str>,
    file: Option<&Path>,
    cwd: &Path,
    timeout: Duration,
) -> Option<Ran> {
    let command = resolve_command(command, file)?;
    let outcome = runner.run(&command, cwd, timeout);
    Some(Ran { command, outcome })
}

/// Compile the project. `None` when the profile has no usable compile command.
pub fn compile(
    runner: &dyn BuildRunner,
    profile: &Profile,
    cwd: &Path,
    file: Option<&Path>,
    timeout: Duration,
) -> Option<Ran> {
    run_resolved(runner, profile.compile.as_deref(), file, cwd, timeout)
}

/// Compile the test sources, via `testCompile` or else `compile`.
pub fn test_compile(
    runner: &dyn BuildRunner,
    profile: &Profile,
    cwd: &Path,
    timeout: Duration,
) -> Option<Ran> {
    run_resolved(runner, profile.test_compile_command(), None, cwd, timeout)
}

pub fn test(
    runner: &dyn BuildRunner,
    profile: &Profile,
    cwd: &Path,
    file: Option<&Path>,
    timeout: Duration,
) -> Option<Ran> {
    run_resolved(runner, profile.test.as_deref(), file, cwd, timeout)
}

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// A runner that replays canned outcomes in order and records the commands it
/// was asked to run. Once the script is exhausted every command passes.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    script: std::sync::Mutex<std::collections::VecDeque<BuildOutcome>>,
    calls: std::sync::Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(outcomes: impl IntoIterator<Item = BuildOutcome>) -> Self {
        Self {
            script: std::sync::Mutex::new(outcomes.into_iter().collect()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn pass(output: &str) -> BuildOutcome {
        BuildOutcome {
            exit_code: Some(0),
            output: output.to_string(),
            timed_out: false,
            duration_ms: 1,
        }
    }

    pub fn fail(code: i32, output: &str) -> BuildOutcome {
        BuildOutcome {
            exit_code: Some(code),
            output: output.to_string(),
            timed_out: false,
            duration_ms: 1,
        }
    }
}

impl BuildRunner for ScriptedRunner {
    fn run(&self, command: &str, _cwd: &Path, _timeout: Duration) -> BuildOutcome {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.to_string());
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Self::pass(""))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileConfig;
    use tempfile::TempDir;

    const SHORT: Duration = Duration::from_secs(10);

    #[test]
    fn shell_runner_passes() {
        let dir = TempDir::new().unwrap();
        let out = ShellRunner.run("echo hello", dir.path(), SHORT);
        assert!(out.passed());
        assert_eq!(out.output, "hello");
    }

    #[test]
    fn shell_runner_reports_exit_code_and_stderr() {
        let dir = TempDir::new().unwrap();
        let out = ShellRunner.run("echo out; echo oops >&2; exit 3", dir.path(), SHORT);
        assert!(!out.passed());
        assert_eq!(out.exit_code, Some(3));
        assert!(out.output.contains("out"));
        assert!(out.output.contains("oops"));
    }

    #[test]
    fn shell_runner_runs_in_cwd() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let out = ShellRunner.run("ls", dir.path(), SHORT);
        assert!(out.output.contains("marker.txt"));
    }

    #[test]
    fn shell_runner_times_out() {
        let dir = TempDir::new().unwrap();
        let out = ShellRunner.run("sleep 30", dir.path(), Duration::from_millis(200));
        assert!(out.timed_out);
        assert!(!out.passed());
        assert!(out.duration_ms < 10_000);
    }

    /// True once `pid` has exited (gone, or a zombie awaiting its reaper).
    #[cfg(target_os = "linux")]
    fn exited(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn timeout_kills_the_whole_build_and_keeps_partial_output() {
        let dir = TempDir::new().unwrap();
        let out = ShellRunner.run(
            "sleep 30 & echo $! > sleeper.pid; echo compiling module a; wait",
            dir.path(),
            Duration::from_millis(500),
        );
        assert!(out.timed_out);
        assert!(out.output.contains("compiling module a"), "{:?}", out.output);

        let pid = std::fs::read_to_string(dir.path().join("sleeper.pid")).unwrap();
        let pid = pid.trim();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !exited(pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(exited(pid), "background build process {pid} survived the timeout");
    }

    #[test]
    fn background_job_does_not_hang_a_finished_build() {
        let dir = TempDir::new().unwrap();
        let started = Instant::now();
        let out = ShellRunner.run("sleep 30 & echo built", dir.path(), Duration::from_secs(1));
        assert!(out.passed());
        assert_eq!(out.output, "built");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn output_keeps_the_tail() {
        let big = "a".repeat(MAX_OUTPUT) + "END";
        let combined = combine_output(&big, "");
        assert_eq!(combined.len(), MAX_OUTPUT);
        assert!(combined.ends_with("END"));
    }

    #[test]
    fn placeholder_commands_are_skipped_without_a_file() {
        let mut profile = ProfileConfig::builtin().unwrap().get("go").unwrap().clone();
        profile.compile = Some("javac {file}".to_string());
        let runner = ScriptedRunner::default();
        let dir = TempDir::new().unwrap();

        assert!(compile(&runner, &profile, dir.path(), None, SHORT).is_none());
        let ran = compile(&runner, &profile, dir.path(), Some(Path::new("A.java")), SHORT).unwrap();
        assert_eq!(ran.command, "javac A.java");
        assert_eq!(runner.calls(), vec!["javac A.java"]);
    }

    #[test]
    fn test_compile_falls_back_to_compile() {
        let mut profile = ProfileConfig::builtin().unwrap().get("python").unwrap().clone();
        profile.test_compile = None;
        let runner = ScriptedRunner::default();
        let dir = TempDir::new().unwrap();
        let ran = test_compile(&runner, &profile, dir.path(), SHORT).unwrap();
        assert_eq!(Some(ran.command.as_str()), profile.compile.as_deref());
    }

    #[test]
    fn missing_command_yields_none() {
        let mut profile = ProfileConfig::builtin().unwrap().get("go").unwrap().clone();
        profile.test = None;
        let dir = TempDir::new().unwrap();
        assert!(test(&ScriptedRunner::default(), &profile, dir.path(), None, SHORT).is_none());
    }

    #[test]
    fn scripted_runner_replays_in_order() {
        let runner = ScriptedRunner::new([ScriptedRunner::fail(1, "boom")]);
        let dir = TempDir::new().unwrap();
        assert!(!runner.run("a", dir.path(), SHORT).passed());
        assert!(runner.run("b", dir.path(), SHORT).passed());
        assert_eq!(runner.calls(), vec!["a", "b"]);
    }
}
