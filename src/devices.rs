//! Capture device discovery.
//!
//! macOS devices are listed through FFmpeg's AVFoundation input; Linux
//! cameras are the `/dev/video*` nodes and audio goes through ALSA's
//! `default` device.

use crate::capture::CaptureError;
use std::path::Path;
use std::process::{Command, Stdio};

/// Prefix AVFoundation uses for screens in its video device list
pub const SCREEN_DEVICE_PREFIX: &str = "Capture screen";

/// Platform capture API used for camera and microphone input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBackend {
    /// macOS AVFoundation (`-f avfoundation`)
    AvFoundation,
    /// Linux Video4Linux2 for video, ALSA for audio
    V4l2,
}

impl CaptureBackend {
    /// Backend for the platform this binary was built for.
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "macos") {
            Some(CaptureBackend::AvFoundation)
        } else if cfg!(target_os = "linux") {
            Some(CaptureBackend::V4l2)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CaptureBackend::AvFoundation => "AVFoundation",
            CaptureBackend::V4l2 => "V4L2",
        }
    }
}

/// Represents a single capture device (video or audio).
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub index: usize,
    pub name: String,
}

impl Device {
    /// AVFoundation lists screens alongside cameras.
    pub fn is_screen(&self) -> bool {
        self.name.starts_with(SCREEN_DEVICE_PREFIX)
    }
}

/// Collection of available video and audio devices.
#[derive(Debug, Default)]
pub struct DeviceList {
    pub video_devices: Vec<Device>,
    pub audio_devices: Vec<Device>,
}

impl DeviceList {
    /// Video devices that are cameras (screens filtered out).
    pub fn cameras(&self) -> Vec<&Device> {
        self.video_devices.iter().filter(|d| !d.is_screen()).collect()
    }
}

/// List devices for the given backend.
///
/// `ffmpeg` is the program used for capture; AVFoundation discovery runs it.
pub fn list_devices(backend: CaptureBackend, ffmpeg: &Path) -> Result<DeviceList, CaptureError> {
    match backend {
        CaptureBackend::AvFoundation => list_avfoundation_devices(ffmpeg),
        CaptureBackend::V4l2 => Ok(DeviceList {
            video_devices: list_v4l2_nodes(Path::new("/dev")),
            audio_devices: list_alsa_devices(Path::new("/dev/snd")),
        }),
    }
}

/// Run ffmpeg to list available AVFoundation devices.
pub fn list_avfoundation_devices(ffmpeg: &Path) -> Result<DeviceList, CaptureError> {
    let output = Command::new(ffmpeg)
        .args(["-f", "avfoundation", "-list_devices", "true", "-i", ""])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CaptureError::FfmpegNotFound
            } else {
                CaptureError::FfmpegFailed(e.to_string())
            }
        })?;

    // FFmpeg outputs device list to stderr
    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok(parse_device_list(&stderr))
}

/// Parse FFmpeg's AVFoundation device list output.
pub fn parse_device_list(stderr: &str) -> DeviceList {
    let mut list = DeviceList::default();
    let mut in_video_section = false;
    let mut in_audio_section = false;

    for line in stderr.lines() {
        if line.contains("AVFoundation video devices:") {
            in_video_section = true;
            in_audio_section = false;
            continue;
        }
        if line.contains("AVFoundation audio devices:") {
            in_video_section = false;
            in_audio_section = true;
            continue;
        }

        if let Some(device) = parse_device_line(line) {
            if in_video_section {
                list.video_devices.push(device);
            } else if in_audio_section {
                list.audio_devices.push(device);
            }
        }
    }

    list
}

/// Parse a single device line: `[AVFoundation indev @ 0x...] [index] device name`
pub fn parse_device_line(line: &str) -> Option<Device> {
    let bracket_idx = line.find("] [")?;
    let after_bracket = &line[bracket_idx + 3..];

    let close_bracket = after_bracket.find(']')?;
    let index: usize = after_bracket[..close_bracket].parse().ok()?;

    let name = after_bracket.get(close_bracket + 1..)?.trim().to_string();
    if name.is_empty() {
        return None;
    }

    Some(Device { index, name })
}

/// Enumerate `videoN` nodes in a device directory, ordered by N.
pub fn list_v4l2_nodes(dev_dir: &Path) -> Vec<Device> {
    let Ok(entries) = std::fs::read_dir(dev_dir) else {
        return Vec::new();
    };

    let mut devices: Vec<Device> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name();
            let name = file_name.to_str()?;
            let index: usize = name.strip_prefix("video")?.parse().ok()?;
            Some(Device {
                index,
                name: entry.path().to_string_lossy().into_owned(),
            })
        })
        .collect();

    devices.sort_by_key(|d| d.index);
    devices
}

/// ALSA capture goes through the `default` PCM whenever a sound card exists.
pub fn list_alsa_devices(snd_dir: &Path) -> Vec<Device> {
    let has_card = std::fs::read_dir(snd_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| e.file_name().to_string_lossy().starts_with("pcmC"))
        })
        .unwrap_or(false);

    if has_card {
        vec![Device {
            index: 0,
            name: "default".to_string(),
        }]
    } else {
        Vec::new()
    }
}

/// Print the device list to stdout.
///
/// If both `show_video` and `show_audio` are false, all devices are shown.
pub fn print_devices(devices: &DeviceList, show_video: bool, show_audio: bool) {
    let show_both = !show_video && !show_audio;

    if show_video || show_both {
        println!("Video Devices:");
        if devices.video_devices.is_empty() {
            println!("  (none found)");
        } else {
            for device in &devices.video_devices {
                println!("  [{}] {}", device.index, device.name);
            }
        }
        if show_both {
            println!();
        }
    }

    if show_audio || show_both {
        println!("Audio Devices:");
        if devices.audio_devices.is_empty() {
            println!("  (none found)");
        } else {
            for device in &devices.audio_devices {
                println!("  [{}] {}", device.index, device.name);
            }
        }
    }
}
