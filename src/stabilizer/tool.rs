//! The external tool that runs the filter graph.

use super::StabilizeError;
use crate::pipeline::{Pipeline, FFMPEG};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the system ffmpeg program.
pub const FFMPEG_ENV: &str = "STABCAM_FFMPEG";

/// Where the ffmpeg binary comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolBackend {
    /// A program on PATH or at an explicit path
    System { program: PathBuf },
    /// A bundled binary copied into the private files directory on first use
    Installed { asset: PathBuf, install_dir: PathBuf },
}

impl Default for ToolBackend {
    fn default() -> Self {
        ToolBackend::system()
    }
}

impl ToolBackend {
    /// `ffmpeg` from PATH, unless `STABCAM_FFMPEG` names another program.
    pub fn system() -> Self {
        let program = std::env::var_os(FFMPEG_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(FFMPEG));
        ToolBackend::System { program }
    }

    /// Path of the program to execute, installing the bundled binary if needed.
    pub fn resolve_program(&self) -> Result<PathBuf, StabilizeError> {
        match self {
            ToolBackend::System { program } => Ok(program.clone()),
            ToolBackend::Installed { asset, install_dir } => install_bundled(asset, install_dir),
        }
    }
}

/// Private files directory the bundled binary is installed into.
pub fn default_install_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("stabcam")
        .join("bin")
}

/// Copy `asset` into `install_dir` and mark it executable.
///
/// An existing installed copy is reused as is.
pub fn install_bundled(asset: &Path, install_dir: &Path) -> Result<PathBuf, StabilizeError> {
    if !asset.is_file() {
        return Err(StabilizeError::MissingBundledBinary(asset.to_path_buf()));
    }
    let file_name = asset
        .file_name()
        .ok_or_else(|| StabilizeError::MissingBundledBinary(asset.to_path_buf()))?;
    let target = install_dir.join(file_name);
    if target.is_file() {
        return Ok(target);
    }

    std::fs::create_dir_all(install_dir).map_err(|source| StabilizeError::Io {
        path: install_dir.to_path_buf(),
        source,
    })?;

    // Copy under a temporary name so a half-written binary is never executed
    let partial = install_dir.join(format!(".{}.partial", file_name.to_string_lossy()));
    std::fs::copy(asset, &partial).map_err(|source| StabilizeError::Io {
        path: partial.clone(),
        source,
    })?;
    make_executable(&partial)?;
    std::fs::rename(&partial, &target).map_err(|source| StabilizeError::Io {
        path: target.clone(),
        source,
    })?;

    log::info!("Installed bundled ffmpeg to {}", target.display());
    Ok(target)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), StabilizeError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|source| {
        StabilizeError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), StabilizeError> {
    Ok(())
}

/// Exit code and log of a finished tool run.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub log: Vec<String>,
}

impl ToolOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs one filter invocation to completion.
pub trait FilterRunner: Send {
    fn run(&self, args: &[String]) -> Result<ToolOutcome, StabilizeError>;
}

/// Runs ffmpeg as a child process.
///
/// By default the child runs in its own process group, so a Ctrl+C aimed at
/// the recorder does not cancel a stabilization that is already running.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    backend: ToolBackend,
    own_group: bool,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new(ToolBackend::default())
    }
}

impl FfmpegRunner {
    pub fn new(backend: ToolBackend) -> Self {
        Self {
            backend,
            own_group: true,
        }
    }

    /// Keep the child in the foreground group so Ctrl+C stops it with us.
    pub fn interruptible(mut self) -> Self {
        self.own_group = false;
        self
    }
}

impl FilterRunner for FfmpegRunner {
    fn run(&self, args: &[String]) -> Result<ToolOutcome, StabilizeError> {
        let program = self.backend.resolve_program()?;
        let mut pipeline = if self.own_group {
            Pipeline::spawn_in_own_group(&program, args)?
        } else {
            Pipeline::spawn_program(&program, args)?
        };
        log::debug!("Filter run started (pid {})", pipeline.pid());
        let status = pipeline.wait()?;
        Ok(ToolOutcome {
            exit_code: status.code(),
            log: pipeline.take_stderr_output(),
        })
    }
}
