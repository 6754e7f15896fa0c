//! Child process management for stabcam.
//!
//! This module handles spawning, monitoring, and terminating the external
//! tools the app drives: ffmpeg for capture and filtering, mpv for preview.

use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default program name for ffmpeg
pub const FFMPEG: &str = "ffmpeg";

/// How long a graceful shutdown may take before the process is killed
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that can occur during pipeline operations
#[derive(Debug)]
pub enum PipelineError {
    /// Executable not found on PATH (or at the given path)
    ToolNotFound { program: String },
    /// Failed to spawn the process
    SpawnFailed { program: String, source: std::io::Error },
    /// I/O error during pipeline operation
    IoError(std::io::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::ToolNotFound { program } => {
                write!(
                    f,
                    "{} not found. Please install it with:\n\n    brew install {}\n\nor your distribution's package manager (e.g. `apt install {}`).",
                    program, program, program
                )
            }
            PipelineError::SpawnFailed { program, source } => {
                write!(f, "Failed to spawn {}: {}", program, source)
            }
            PipelineError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::SpawnFailed { source, .. } => Some(source),
            PipelineError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IoError(e)
    }
}

/// Short label for log lines, e.g. `ffmpeg` for `/usr/local/bin/ffmpeg`.
fn program_label(program: &OsStr) -> String {
    Path::new(program)
        .file_name()
        .unwrap_or(program)
        .to_string_lossy()
        .into_owned()
}

/// Represents a running child process with captured stderr
pub struct Pipeline {
    child: Child,
    label: String,
    /// Handle for the stderr reader thread
    stderr_thread: Option<JoinHandle<Vec<String>>>,
}

/// How the child is attached to the controlling terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessGroup {
    /// Shares the caller's group and receives terminal signals with it
    Inherit,
    /// Leads a new group; a terminal Ctrl+C does not reach it
    Own,
}

impl Pipeline {
    /// Spawn an arbitrary program with the given arguments.
    ///
    /// stdout is discarded; stderr is collected line by line and logged at
    /// debug level.
    pub fn spawn_program(
        program: impl AsRef<OsStr>,
        args: &[String],
    ) -> Result<Self, PipelineError> {
        Self::spawn_inner(program.as_ref(), args, None, ProcessGroup::Inherit)
    }

    /// Like [`Pipeline::spawn_program`], but the child leads its own process
    /// group so that Ctrl+C in the terminal leaves it running.
    ///
    /// `shutdown` still signals the child directly.
    pub fn spawn_in_own_group(
        program: impl AsRef<OsStr>,
        args: &[String],
    ) -> Result<Self, PipelineError> {
        Self::spawn_inner(program.as_ref(), args, None, ProcessGroup::Own)
    }

    /// Spawn a program and pipe its stdout to a target stdin.
    ///
    /// This is used for preview mode where ffmpeg output is piped to mpv.
    pub fn spawn_with_stdout(
        program: impl AsRef<OsStr>,
        args: &[String],
        target_stdin: ChildStdin,
    ) -> Result<Self, PipelineError> {
        Self::spawn_inner(
            program.as_ref(),
            args,
            Some(target_stdin),
            ProcessGroup::Inherit,
        )
    }

    fn spawn_inner(
        program: &OsStr,
        args: &[String],
        target_stdin: Option<ChildStdin>,
        group: ProcessGroup,
    ) -> Result<Self, PipelineError> {
        let label = program_label(program);
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(if target_stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped());

        #[cfg(unix)]
        if group == ProcessGroup::Own {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        #[cfg(not(unix))]
        let _ = group;

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PipelineError::ToolNotFound {
                    program: label.clone(),
                }
            } else {
                PipelineError::SpawnFailed {
                    program: label.clone(),
                    source: e,
                }
            }
        })?;

        log::debug!("Spawned {} (pid {})", label, child.id());

        let stderr_thread = child.stderr.take().map(|stderr| {
            let label = label.clone();
            thread::spawn(move || {
                // Raw byte lines: tools echo metadata and paths that need not
                // be UTF-8, and the pipe must be drained until EOF.
                let reader = BufReader::new(stderr);
                let mut lines = Vec::new();
                for chunk in reader.split(b'\n') {
                    let Ok(bytes) = chunk else { break };
                    let line = String::from_utf8_lossy(&bytes)
                        .trim_end_matches('\r')
                        .to_string();
                    log::debug!("[{}] {}", label, line);
                    lines.push(line);
                }
                lines
            })
        });

        if let (Some(mut target), Some(mut stdout)) = (target_stdin, child.stdout.take()) {
            // Detached: it ends on EOF from the child or when the target
            // closes. Keeps draining during shutdown so ffmpeg never blocks on
            // a full pipe while finalizing the file output.
            thread::spawn(move || {
                let mut buf = [0u8; 65536];
                loop {
                    match std::io::Read::read(&mut stdout, &mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if target.write_all(&buf[..n]).is_err() {
                                break; // Target closed
                            }
                        }
                        Err(_) => break,
                    }
                }
            });
        }

        Ok(Pipeline {
            child,
            label,
            stderr_thread,
        })
    }

    /// OS process id of the child.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Non-blocking exit check.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, PipelineError> {
        self.child.try_wait().map_err(PipelineError::IoError)
    }

    /// Wait for the process to complete and return the exit status.
    pub fn wait(&mut self) -> Result<ExitStatus, PipelineError> {
        self.child.wait().map_err(PipelineError::IoError)
    }

    /// Request a graceful shutdown of the process.
    ///
    /// Sends SIGINT so ffmpeg can finalize its output container, then waits.
    /// If the process doesn't exit within the timeout, it is killed.
    pub fn shutdown(&mut self) -> Result<ExitStatus, PipelineError> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Ok(status);
        }

        #[cfg(unix)]
        {
            // SAFETY: the pid belongs to a child we spawned and have not reaped.
            unsafe {
                libc::kill(self.child.id() as libc::pid_t, libc::SIGINT);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }

        let start = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start.elapsed() > SHUTDOWN_TIMEOUT {
                        log::warn!("{} did not exit after SIGINT, killing it", self.label);
                        let _ = self.child.kill();
                        return self.child.wait().map_err(PipelineError::IoError);
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(PipelineError::IoError(e)),
            }
        }
    }

    /// Get the collected stderr output after the process has finished.
    pub fn take_stderr_output(&mut self) -> Vec<String> {
        self.stderr_thread
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Ensure the process is terminated when Pipeline is dropped
        if self.is_running() {
            let _ = self.shutdown();
        }
    }
}

/// Global flag for handling Ctrl+C across the application
static CTRLC_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Check if Ctrl+C has been received.
pub fn ctrlc_received() -> bool {
    CTRLC_RECEIVED.load(Ordering::SeqCst)
}

/// Set up the Ctrl+C handler.
///
/// This should be called once at program startup.
pub fn setup_ctrlc_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        CTRLC_RECEIVED.store(true, Ordering::SeqCst);
        log::info!("Received Ctrl+C, shutting down...");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_and_wait_success() {
        let mut pipeline = Pipeline::spawn_program("sh", &sh("exit 0")).unwrap();
        let status = pipeline.wait().unwrap();
        assert!(status.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_code_is_reported() {
        let mut pipeline = Pipeline::spawn_program("sh", &sh("exit 3")).unwrap();
        let status = pipeline.wait().unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_stderr_capture() {
        let mut pipeline =
            Pipeline::spawn_program("sh", &sh("echo first >&2; echo second >&2")).unwrap();
        let _ = pipeline.wait();
        let stderr = pipeline.take_stderr_output();
        assert_eq!(stderr, vec!["first".to_string(), "second".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_shutdown_interrupts_long_running_process() {
        let mut pipeline = Pipeline::spawn_program("sleep", &["30".to_string()]).unwrap();
        assert!(pipeline.is_running());
        let start = Instant::now();
        let status = pipeline.shutdown().unwrap();
        assert!(!status.success());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_shutdown_nonrunning_process() {
        let mut pipeline = Pipeline::spawn_program("sh", &sh("exit 0")).unwrap();
        let _ = pipeline.wait();
        // Already exited; must not hang or panic
        let _ = pipeline.shutdown();
    }

    #[test]
    fn test_missing_program_is_tool_not_found() {
        let result = Pipeline::spawn_program("stabcam-no-such-tool-xyz", &[]);
        match result {
            Err(PipelineError::ToolNotFound { program }) => {
                assert_eq!(program, "stabcam-no-such-tool-xyz")
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("spawning a missing program should fail"),
        }
    }

    #[test]
    fn test_tool_not_found_display() {
        let err = PipelineError::ToolNotFound {
            program: "ffmpeg".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("ffmpeg not found"));
        assert!(msg.contains("brew install ffmpeg"));
    }

    #[cfg(unix)]
    #[test]
    fn test_invalid_utf8_stderr_keeps_draining() {
        // The second write would raise SIGPIPE if the reader had stopped
        let script = r"printf 'Metadata: title \377\n' >&2; sleep 0.3; echo 'frame=1' >&2; exit 0";
        let mut pipeline = Pipeline::spawn_program("sh", &sh(script)).unwrap();
        let status = pipeline.wait().unwrap();
        assert!(status.success(), "status: {:?}", status);
        let stderr = pipeline.take_stderr_output();
        assert_eq!(
            stderr,
            vec!["Metadata: title \u{FFFD}".to_string(), "frame=1".to_string()]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_crlf_stderr_lines_are_trimmed() {
        let mut pipeline = Pipeline::spawn_program("sh", &sh(r"printf 'a\r\nb\n' >&2")).unwrap();
        let _ = pipeline.wait();
        assert_eq!(pipeline.take_stderr_output(), vec!["a".to_string(), "b".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_own_group_is_detached_from_caller_group() {
        let mut own = Pipeline::spawn_in_own_group("sleep", &["5".to_string()]).unwrap();
        let mut inherited = Pipeline::spawn_program("sleep", &["5".to_string()]).unwrap();

        // SAFETY: getpgid only reads process attributes of our own children.
        let (own_group, inherited_group, our_group) = unsafe {
            (
                libc::getpgid(own.pid() as libc::pid_t),
                libc::getpgid(inherited.pid() as libc::pid_t),
                libc::getpgid(0),
            )
        };
        assert_eq!(own_group, own.pid() as libc::pid_t);
        assert_ne!(own_group, our_group);
        assert_eq!(inherited_group, our_group);

        let _ = own.shutdown();
        let _ = inherited.shutdown();
    }
}
