//! Camera screen: live preview plus a record/stop toggle.
//!
//! While idle, the camera feeds a preview player through an ffmpeg process.
//! Starting a recording restarts capture with file output into a pending
//! gallery entry (teed to the preview when enabled). Stopping shuts ffmpeg
//! down gracefully so the container is finalized, then publishes the entry.

use crate::capture::{self, CameraCapture, CaptureError, MicrophoneCapture};
use crate::devices::CaptureBackend;
use crate::media_store::{ContentUri, ContentValues, MediaStore, MediaStoreError, VIDEO_MP4};
use crate::pipeline::{Pipeline, PipelineError};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Gallery(#[from] MediaStoreError),
    #[error("{player} not found. Please install it with:\n\n    brew install {player}\n\nor your distribution's package manager (e.g. `apt install {player}`), or run with --no-preview.")]
    PlayerNotFound { player: String },
    #[error("Failed to spawn {player}: {source}")]
    PlayerFailed {
        player: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Already recording")]
    AlreadyRecording,
    #[error("Not recording")]
    NotRecording,
}

/// Whether a recording is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Idle,
    Recording,
}

/// Lifecycle events of a recording.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEvent {
    /// The capture process is writing to `uri`
    Start { uri: ContentUri },
    /// The recording ended: `Ok` carries the published entry, `Err` why it
    /// was discarded
    Finalize { result: Result<ContentUri, String> },
}

/// Output mode for the capture process
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMode {
    /// Preview only - output to pipe for the player
    Preview,
    /// Recording only - output to file (no preview)
    Recording(PathBuf),
    /// Both preview and recording (tee output)
    Both(PathBuf),
}

/// Resolved capture devices plus the program that drives them.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub program: PathBuf,
    pub backend: CaptureBackend,
    pub camera: CameraCapture,
    pub camera_device: String,
    pub microphone_device: Option<String>,
}

impl CaptureConfig {
    /// Look up the configured camera and microphone.
    pub fn resolve(
        program: PathBuf,
        backend: CaptureBackend,
        camera: CameraCapture,
        microphone: &MicrophoneCapture,
    ) -> Result<Self, CaptureError> {
        let camera_device = camera.find_camera_device(backend, &program)?;
        let microphone_device = if microphone.enabled {
            Some(microphone.find_microphone_device(backend, &program)?)
        } else {
            None
        };
        log::info!(
            "Using camera '{}'{}",
            camera_device,
            microphone_device
                .as_ref()
                .map(|m| format!(" and microphone '{}'", m))
                .unwrap_or_default()
        );
        Ok(Self {
            program,
            backend,
            camera,
            camera_device,
            microphone_device,
        })
    }

    /// Build the ffmpeg argument list for an output mode.
    ///
    /// Input 0 is the camera. The microphone is part of input 0 on
    /// AVFoundation and a separate input 1 on V4L2.
    pub fn build_ffmpeg_args(&self, output_mode: &OutputMode) -> Vec<String> {
        let mut args = vec!["-y".to_string()];
        args.extend(self.camera.to_ffmpeg_args(
            self.backend,
            &self.camera_device,
            self.microphone_device.as_deref(),
        ));

        args.extend(["-map".to_string(), "0:v".to_string()]);
        if self.microphone_device.is_some() {
            let audio_input = match self.backend {
                CaptureBackend::AvFoundation => "0:a",
                CaptureBackend::V4l2 => "1:a",
            };
            args.extend(["-map".to_string(), audio_input.to_string()]);
        }

        let (preset, tune) = match output_mode {
            OutputMode::Recording(_) => ("medium", None),
            OutputMode::Preview | OutputMode::Both(_) => ("ultrafast", Some("zerolatency")),
        };
        args.extend([
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            preset.to_string(),
        ]);
        if let Some(tune) = tune {
            args.extend(["-tune".to_string(), tune.to_string()]);
        }
        args.extend(["-pix_fmt".to_string(), "yuv420p".to_string()]);

        if self.microphone_device.is_some() {
            args.extend([
                "-c:a".to_string(),
                "aac".to_string(),
                "-b:a".to_string(),
                "128k".to_string(),
            ]);
        }

        match output_mode {
            OutputMode::Preview => {
                args.extend(["-f".to_string(), "nut".to_string(), "pipe:1".to_string()]);
            }
            OutputMode::Recording(path) => {
                args.extend([
                    "-movflags".to_string(),
                    "+faststart".to_string(),
                    "-f".to_string(),
                    "mp4".to_string(),
                    path.to_string_lossy().into_owned(),
                ]);
            }
            OutputMode::Both(path) => {
                let tee_output = format!(
                    "[f=nut]pipe:1|[f=mp4:movflags=+faststart]{}",
                    path.to_string_lossy()
                );
                args.extend(["-f".to_string(), "tee".to_string(), tee_output]);
            }
        }

        args
    }
}

/// Spawn the preview player reading a NUT stream on stdin.
fn spawn_player(player: &str) -> Result<Child, RecorderError> {
    Command::new(player)
        .args([
            "--no-cache",
            "--untimed",
            "--no-terminal",
            "--force-seekable=no",
            "--title=stabcam",
            "-",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RecorderError::PlayerNotFound {
                    player: player.to_string(),
                }
            } else {
                RecorderError::PlayerFailed {
                    player: player.to_string(),
                    source: e,
                }
            }
        })
}

/// A running capture process and its preview player.
struct Session {
    pipeline: Pipeline,
    player: Option<Child>,
}

impl Session {
    fn spawn(
        config: &CaptureConfig,
        output_mode: &OutputMode,
        player: Option<&str>,
    ) -> Result<Self, RecorderError> {
        let args = config.build_ffmpeg_args(output_mode);
        log::debug!("Capture command: {} {}", config.program.display(), args.join(" "));

        match (output_mode, player) {
            (OutputMode::Preview, Some(player)) | (OutputMode::Both(_), Some(player)) => {
                let mut child = spawn_player(player)?;
                let Some(stdin) = child.stdin.take() else {
                    let _ = child.kill();
                    return Err(RecorderError::PlayerFailed {
                        player: player.to_string(),
                        source: std::io::Error::other("player stdin unavailable"),
                    });
                };
                match Pipeline::spawn_with_stdout(&config.program, &args, stdin) {
                    Ok(pipeline) => Ok(Self {
                        pipeline,
                        player: Some(child),
                    }),
                    Err(e) => {
                        let _ = child.kill();
                        let _ = child.wait();
                        Err(e.into())
                    }
                }
            }
            _ => Ok(Self {
                pipeline: Pipeline::spawn_program(&config.program, &args)?,
                player: None,
            }),
        }
    }

    fn stop(mut self) {
        if let Err(e) = self.pipeline.shutdown() {
            log::warn!("Capture shutdown failed: {}", e);
        }
        self.close_player();
    }

    fn close_player(&mut self) {
        if let Some(mut player) = self.player.take() {
            let _ = player.kill();
            let _ = player.wait();
        }
    }
}

struct ActiveRecording {
    uri: ContentUri,
    path: PathBuf,
    started: Instant,
}

/// Preview and recording options for a camera screen.
#[derive(Debug, Clone)]
pub struct ScreenOptions {
    /// Preview player program, `None` to record without preview
    pub preview_player: Option<String>,
    /// Gallery relative path for recordings
    pub relative_path: String,
}

/// The camera screen: owns the capture session and the record toggle.
pub struct CameraScreen {
    config: CaptureConfig,
    options: ScreenOptions,
    store: MediaStore,
    session: Option<Session>,
    recording: Option<ActiveRecording>,
}

impl CameraScreen {
    /// Open the camera and start the preview.
    pub fn open(
        config: CaptureConfig,
        options: ScreenOptions,
        store: MediaStore,
    ) -> Result<Self, RecorderError> {
        if config.camera.hardware_stabilization {
            match capture::request_hardware_stabilization(config.backend, &config.camera_device) {
                Ok(()) => log::info!("Hardware video stabilization enabled"),
                Err(e) => log::warn!("{}", e),
            }
        }

        let mut screen = Self {
            config,
            options,
            store,
            session: None,
            recording: None,
        };
        screen.start_preview()?;
        Ok(screen)
    }

    pub fn state(&self) -> RecordState {
        if self.recording.is_some() {
            RecordState::Recording
        } else {
            RecordState::Idle
        }
    }

    /// Time since the current recording started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.recording.as_ref().map(|r| r.started.elapsed())
    }

    /// Start when idle, stop when recording.
    pub fn toggle(&mut self) -> Result<RecordEvent, RecorderError> {
        match self.state() {
            RecordState::Idle => self.start_recording(),
            RecordState::Recording => self.stop_recording(),
        }
    }

    /// Insert a pending entry and restart capture with file output.
    pub fn start_recording(&mut self) -> Result<RecordEvent, RecorderError> {
        if self.recording.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        let display_name = format!("{}.mp4", chrono::Local::now().format("%Y%m%d_%H%M%S"));
        let values = ContentValues::new(display_name, VIDEO_MP4)
            .with_relative_path(self.options.relative_path.clone())
            .pending(true);
        let uri = self.store.insert(values)?;
        let (path, _) = self.store.resolve(&uri)?;

        if let Some(preview) = self.session.take() {
            preview.stop();
        }

        let output_mode = match self.options.preview_player {
            Some(_) => OutputMode::Both(path.clone()),
            None => OutputMode::Recording(path.clone()),
        };
        match Session::spawn(&self.config, &output_mode, self.options.preview_player.as_deref()) {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                self.discard(&uri);
                if let Err(preview_err) = self.start_preview() {
                    log::warn!("Could not restart preview: {}", preview_err);
                }
                return Err(e);
            }
        }

        log::info!("Recording started: {}", uri);
        self.recording = Some(ActiveRecording {
            uri: uri.clone(),
            path,
            started: Instant::now(),
        });
        Ok(RecordEvent::Start { uri })
    }

    /// Stop capture, finalize the file and go back to preview.
    pub fn stop_recording(&mut self) -> Result<RecordEvent, RecorderError> {
        let recording = self.recording.take().ok_or(RecorderError::NotRecording)?;
        if let Some(session) = self.session.take() {
            session.stop();
        }

        let event = self.finalize(recording, None);
        if let Err(e) = self.start_preview() {
            log::warn!("Could not restart preview: {}", e);
        }
        Ok(event)
    }

    /// Check on the capture process.
    ///
    /// Returns a finalize event when it exited on its own mid-recording.
    pub fn poll(&mut self) -> Option<RecordEvent> {
        let session = self.session.as_mut()?;
        match session.pipeline.try_wait() {
            Ok(Some(status)) => {
                let mut session = self.session.take()?;
                let tail = session
                    .pipeline
                    .take_stderr_output()
                    .last()
                    .cloned()
                    .unwrap_or_default();
                session.close_player();

                match self.recording.take() {
                    Some(recording) => {
                        let reason = format!("capture exited with {}: {}", status, tail);
                        Some(self.finalize(recording, Some(reason)))
                    }
                    None => {
                        log::info!("Preview closed ({})", status);
                        None
                    }
                }
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Failed to poll capture process: {}", e);
                None
            }
        }
    }

    /// Stop everything. Returns the finalize event of an unfinished recording.
    pub fn close(mut self) -> Option<RecordEvent> {
        let event = if self.recording.is_some() {
            self.stop_recording().ok()
        } else {
            None
        };
        if let Some(session) = self.session.take() {
            session.stop();
        }
        event
    }

    fn start_preview(&mut self) -> Result<(), RecorderError> {
        let Some(player) = self.options.preview_player.as_deref() else {
            return Ok(());
        };
        self.session = Some(Session::spawn(&self.config, &OutputMode::Preview, Some(player))?);
        Ok(())
    }

    /// Publish a non-empty recording, discard anything else.
    fn finalize(&self, recording: ActiveRecording, failure: Option<String>) -> RecordEvent {
        let size = file_size(&recording.path);
        let result = match failure {
            Some(reason) if size == 0 => Err(reason),
            _ if size == 0 => Err("recording is empty".to_string()),
            failure => {
                if let Some(reason) = failure {
                    log::warn!("Keeping partial recording: {}", reason);
                }
                self.store
                    .publish(&recording.uri)
                    .map(|()| recording.uri.clone())
                    .map_err(|e| e.to_string())
            }
        };

        match &result {
            Ok(uri) => log::info!(
                "Recording saved: {} ({} bytes, {:.1}s)",
                uri,
                size,
                recording.started.elapsed().as_secs_f64()
            ),
            Err(reason) => {
                log::error!("Recording failed: {}", reason);
                self.discard(&recording.uri);
            }
        }
        RecordEvent::Finalize { result }
    }

    fn discard(&self, uri: &ContentUri) {
        if let Err(e) = self.store.delete(uri) {
            log::warn!("Failed to delete pending entry {}: {}", uri, e);
        }
    }
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
