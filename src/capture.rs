//! Camera and microphone capture configuration.
//!
//! This module resolves the devices to record from and generates the FFmpeg
//! input arguments for them.

mod errors;

pub use errors::CaptureError;

use crate::devices::{self, CaptureBackend, Device};
use std::path::Path;
use std::process::{Command, Stdio};

/// Represents a camera capture configuration
#[derive(Debug, Clone)]
pub struct CameraCapture {
    /// Device name or index (None = auto-detect first camera)
    pub device: Option<String>,
    /// Capture framerate
    pub framerate: u32,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Ask the device to stabilize frames in hardware before encoding
    pub hardware_stabilization: bool,
}

impl Default for CameraCapture {
    fn default() -> Self {
        Self {
            device: None,
            framerate: 30,
            width: 1280,
            height: 720,
            hardware_stabilization: true,
        }
    }
}

impl CameraCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device by name or index
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_framerate(mut self, framerate: u32) -> Self {
        self.framerate = framerate;
        self
    }

    pub fn with_resolution(mut self, (width, height): (u32, u32)) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_hardware_stabilization(mut self, enabled: bool) -> Self {
        self.hardware_stabilization = enabled;
        self
    }

    /// Find the camera device to use.
    ///
    /// If a device name/index is specified, validates it exists.
    /// Otherwise, picks the first camera.
    pub fn find_camera_device(
        &self,
        backend: CaptureBackend,
        ffmpeg: &Path,
    ) -> Result<String, CaptureError> {
        let devices = devices::list_devices(backend, ffmpeg)?;
        select_camera(&devices.cameras(), self.device.as_deref())
    }

    /// FFmpeg input arguments for this camera, with the microphone muxed in
    /// when one is given.
    pub fn to_ffmpeg_args(
        &self,
        backend: CaptureBackend,
        camera_device: &str,
        microphone_device: Option<&str>,
    ) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            match backend {
                CaptureBackend::AvFoundation => "avfoundation",
                CaptureBackend::V4l2 => "v4l2",
            }
            .to_string(),
            "-framerate".to_string(),
            self.framerate.to_string(),
            "-video_size".to_string(),
            format!("{}x{}", self.width, self.height),
        ];

        match backend {
            CaptureBackend::AvFoundation => {
                // "video:audio" selects both devices on a single input
                let input = match microphone_device {
                    Some(mic) => format!("{}:{}", camera_device, mic),
                    None => camera_device.to_string(),
                };
                args.extend(["-i".to_string(), input]);
            }
            CaptureBackend::V4l2 => {
                args.extend(["-i".to_string(), camera_device.to_string()]);
                if let Some(mic) = microphone_device {
                    args.extend([
                        "-f".to_string(),
                        "alsa".to_string(),
                        "-i".to_string(),
                        mic.to_string(),
                    ]);
                }
            }
        }

        args
    }
}

/// Pick a camera by index or case-insensitive name fragment.
pub fn select_camera(cameras: &[&Device], spec: Option<&str>) -> Result<String, CaptureError> {
    if cameras.is_empty() {
        return Err(CaptureError::NoCameraDevices);
    }

    select_device(cameras, spec).ok_or_else(|| CaptureError::CameraNotFound {
        requested: spec.unwrap_or_default().to_string(),
        available: cameras.iter().map(|d| d.name.clone()).collect(),
    })
}

fn select_device(candidates: &[&Device], spec: Option<&str>) -> Option<String> {
    let Some(spec) = spec else {
        return candidates.first().map(|d| d.name.clone());
    };

    if let Ok(index) = spec.parse::<usize>() {
        return candidates.get(index).map(|d| d.name.clone());
    }

    let needle = spec.to_lowercase();
    candidates
        .iter()
        .find(|d| d.name.to_lowercase().contains(&needle))
        .map(|d| d.name.clone())
}

/// Represents a microphone capture configuration
#[derive(Debug, Clone)]
pub struct MicrophoneCapture {
    /// Audio device name or index (None = first available)
    pub device: Option<String>,
    /// Whether audio is recorded at all
    pub enabled: bool,
}

impl Default for MicrophoneCapture {
    fn default() -> Self {
        Self {
            device: None,
            enabled: true,
        }
    }
}

impl MicrophoneCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Find the microphone device to use.
    pub fn find_microphone_device(
        &self,
        backend: CaptureBackend,
        ffmpeg: &Path,
    ) -> Result<String, CaptureError> {
        let devices = devices::list_devices(backend, ffmpeg)?;
        let microphones: Vec<&Device> = devices.audio_devices.iter().collect();
        select_microphone(&microphones, self.device.as_deref())
    }
}

pub fn select_microphone(
    microphones: &[&Device],
    spec: Option<&str>,
) -> Result<String, CaptureError> {
    if microphones.is_empty() {
        return Err(CaptureError::NoMicrophoneDevices);
    }

    select_device(microphones, spec).ok_or_else(|| CaptureError::MicrophoneNotFound {
        requested: spec.unwrap_or_default().to_string(),
        available: microphones.iter().map(|d| d.name.clone()).collect(),
    })
}

/// Turn on the camera's image stabilization control.
///
/// V4L2 exposes it as the `image_stabilization` control, set through
/// `v4l2-ctl`. AVFoundation offers no equivalent to ffmpeg clients.
pub fn request_hardware_stabilization(
    backend: CaptureBackend,
    camera_device: &str,
) -> Result<(), CaptureError> {
    match backend {
        CaptureBackend::AvFoundation => Err(CaptureError::StabilizationUnavailable(
            "AVFoundation capture through FFmpeg has no stabilization control".to_string(),
        )),
        CaptureBackend::V4l2 => {
            let output = Command::new("v4l2-ctl")
                .args(["-d", camera_device, "--set-ctrl=image_stabilization=1"])
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        CaptureError::StabilizationUnavailable(
                            "v4l2-ctl not found (install v4l-utils)".to_string(),
                        )
                    } else {
                        CaptureError::StabilizationUnavailable(e.to_string())
                    }
                })?;

            if output.status.success() {
                Ok(())
            } else {
                Err(CaptureError::StabilizationUnavailable(
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(index: usize, name: &str) -> Device {
        Device {
            index,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_camera_defaults() {
        let camera = CameraCapture::new();
        assert_eq!(camera.framerate, 30);
        assert_eq!((camera.width, camera.height), (1280, 720));
        assert!(camera.hardware_stabilization);
        assert!(camera.device.is_none());
    }

    #[test]
    fn test_select_camera_first_by_default() {
        let a = device(0, "FaceTime HD Camera");
        let b = device(1, "USB Camera");
        assert_eq!(select_camera(&[&a, &b], None).unwrap(), "FaceTime HD Camera");
    }

    #[test]
    fn test_select_camera_by_index_and_name() {
        let a = device(0, "FaceTime HD Camera");
        let b = device(1, "Logitech USB Camera");
        assert_eq!(select_camera(&[&a, &b], Some("1")).unwrap(), "Logitech USB Camera");
        assert_eq!(select_camera(&[&a, &b], Some("logitech")).unwrap(), "Logitech USB Camera");
    }

    #[test]
    fn test_select_camera_errors() {
        assert!(matches!(
            select_camera(&[], None),
            Err(CaptureError::NoCameraDevices)
        ));

        let a = device(0, "FaceTime HD Camera");
        match select_camera(&[&a], Some("5")) {
            Err(CaptureError::CameraNotFound { requested, available }) => {
                assert_eq!(requested, "5");
                assert_eq!(available, vec!["FaceTime HD Camera".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_select_microphone() {
        assert!(matches!(
            select_microphone(&[], None),
            Err(CaptureError::NoMicrophoneDevices)
        ));
        let mic = device(0, "default");
        assert_eq!(select_microphone(&[&mic], None).unwrap(), "default");
        assert!(matches!(
            select_microphone(&[&mic], Some("usb")),
            Err(CaptureError::MicrophoneNotFound { .. })
        ));
    }

    #[test]
    fn test_avfoundation_args_combine_camera_and_mic() {
        let camera = CameraCapture::new().with_framerate(24).with_resolution((1920, 1080));
        let args = camera.to_ffmpeg_args(
            CaptureBackend::AvFoundation,
            "FaceTime HD Camera",
            Some("MacBook Pro Microphone"),
        );
        assert_eq!(
            args,
            vec![
                "-f",
                "avfoundation",
                "-framerate",
                "24",
                "-video_size",
                "1920x1080",
                "-i",
                "FaceTime HD Camera:MacBook Pro Microphone",
            ]
        );
    }

    #[test]
    fn test_v4l2_args_add_alsa_input() {
        let camera = CameraCapture::new();
        let args = camera.to_ffmpeg_args(CaptureBackend::V4l2, "/dev/video0", Some("default"));
        assert_eq!(
            args,
            vec![
                "-f",
                "v4l2",
                "-framerate",
                "30",
                "-video_size",
                "1280x720",
                "-i",
                "/dev/video0",
                "-f",
                "alsa",
                "-i",
                "default",
            ]
        );

        let video_only = camera.to_ffmpeg_args(CaptureBackend::V4l2, "/dev/video0", None);
        assert_eq!(video_only.last().map(String::as_str), Some("/dev/video0"));
    }

    #[test]
    fn test_avfoundation_has_no_stabilization_control() {
        let result = request_hardware_stabilization(CaptureBackend::AvFoundation, "0");
        assert!(matches!(
            result,
            Err(CaptureError::StabilizationUnavailable(_))
        ));
    }
}
