//! Error types for capture operations.
//!
//! This module contains all error types related to camera and microphone
//! discovery and capture.

/// Errors that can occur during capture operations
#[derive(Debug)]
pub enum CaptureError {
    /// FFmpeg not found
    FfmpegNotFound,
    /// Failed to run FFmpeg
    FfmpegFailed(String),
    /// No capture backend for this platform
    UnsupportedPlatform,
    /// No camera devices found
    NoCameraDevices,
    /// Requested camera not found
    CameraNotFound { requested: String, available: Vec<String> },
    /// No microphone devices found
    NoMicrophoneDevices,
    /// Requested microphone not found
    MicrophoneNotFound { requested: String, available: Vec<String> },
    /// The camera does not expose a stabilization control
    StabilizationUnavailable(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::FfmpegNotFound => {
                write!(
                    f,
                    "FFmpeg not found. Please install it with:\n\n    brew install ffmpeg\n"
                )
            }
            CaptureError::FfmpegFailed(msg) => write!(f, "FFmpeg failed: {}", msg),
            CaptureError::UnsupportedPlatform => {
                write!(
                    f,
                    "Camera capture is only supported on macOS (AVFoundation) and Linux (V4L2)."
                )
            }
            CaptureError::NoCameraDevices => {
                write!(
                    f,
                    "No camera devices found.\n\nMake sure a camera is connected and camera permission is granted."
                )
            }
            CaptureError::CameraNotFound {
                requested,
                available,
            } => {
                write!(f, "Camera '{}' not found.\n\nAvailable cameras:\n", requested)?;
                for (i, name) in available.iter().enumerate() {
                    writeln!(f, "  [{}] {}", i, name)?;
                }
                write!(f, "\nUse `stabcam list-devices --video` to see all video devices.")
            }
            CaptureError::NoMicrophoneDevices => {
                write!(
                    f,
                    "No microphone devices found.\n\nMake sure microphone permission is granted, or record with --no-audio."
                )
            }
            CaptureError::MicrophoneNotFound {
                requested,
                available,
            } => {
                write!(
                    f,
                    "Microphone '{}' not found.\n\nAvailable microphones:\n",
                    requested
                )?;
                for (i, name) in available.iter().enumerate() {
                    writeln!(f, "  [{}] {}", i, name)?;
                }
                write!(f, "\nUse `stabcam list-devices --audio` to see all audio devices.")
            }
            CaptureError::StabilizationUnavailable(reason) => {
                write!(f, "Hardware video stabilization unavailable: {}", reason)
            }
        }
    }
}

impl std::error::Error for CaptureError {}
