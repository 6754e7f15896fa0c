//! Camera and microphone permission gate.
//!
//! Checks for the access the recorder needs before the camera screen opens,
//! providing clear error messages with the place to grant it when missing.

use crate::devices;
use std::path::Path;

/// Types of permissions the recorder requires
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PermissionType {
    /// Camera permission (required for video capture)
    Camera,
    /// Microphone permission (required for audio capture)
    Microphone,
}

impl PermissionType {
    /// Get the human-readable name of this permission type
    pub fn name(&self) -> &'static str {
        match self {
            PermissionType::Camera => "Camera",
            PermissionType::Microphone => "Microphone",
        }
    }

    /// Where the user grants this permission on the current platform
    pub fn settings_path(&self) -> &'static str {
        if cfg!(target_os = "macos") {
            match self {
                PermissionType::Camera => "System Settings > Privacy & Security > Camera",
                PermissionType::Microphone => "System Settings > Privacy & Security > Microphone",
            }
        } else {
            match self {
                PermissionType::Camera => {
                    "Read access to /dev/video* (add your user to the `video` group)"
                }
                PermissionType::Microphone => {
                    "Read access to /dev/snd/* (add your user to the `audio` group)"
                }
            }
        }
    }

    /// Deep link that opens System Settings to this permission (macOS only)
    pub fn settings_url(&self) -> Option<&'static str> {
        if !cfg!(target_os = "macos") {
            return None;
        }
        Some(match self {
            PermissionType::Camera => {
                "x-apple.systempreferences:com.apple.preference.security?Privacy_Camera"
            }
            PermissionType::Microphone => {
                "x-apple.systempreferences:com.apple.preference.security?Privacy_Microphone"
            }
        })
    }
}

/// Result of a permission check
#[derive(Debug)]
pub struct PermissionCheckResult {
    pub permission_type: PermissionType,
    pub granted: bool,
    /// Additional details or error message
    pub details: Option<String>,
}

impl PermissionCheckResult {
    pub fn granted(permission_type: PermissionType) -> Self {
        Self {
            permission_type,
            granted: true,
            details: None,
        }
    }

    pub fn denied(permission_type: PermissionType, details: Option<String>) -> Self {
        Self {
            permission_type,
            granted: false,
            details,
        }
    }
}

/// Error type for permission verification failures
#[derive(Debug)]
pub struct PermissionError {
    pub permission_type: PermissionType,
    pub details: Option<String>,
}

impl std::fmt::Display for PermissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} permission is required.\n\nPlease grant permission in:\n  {}",
            self.permission_type.name(),
            self.permission_type.settings_path(),
        )?;

        if let Some(url) = self.permission_type.settings_url() {
            write!(
                f,
                "\n\nYou can open System Settings directly by running:\n  open \"{}\"",
                url
            )?;
        }

        if let Some(ref details) = self.details {
            write!(f, "\n\nDetails: {}", details)?;
        }

        Ok(())
    }
}

impl std::error::Error for PermissionError {}

impl From<PermissionCheckResult> for PermissionError {
    fn from(result: PermissionCheckResult) -> Self {
        PermissionError {
            permission_type: result.permission_type,
            details: result.details,
        }
    }
}

/// Check Camera permission.
///
/// `ffmpeg` is only run on macOS, where the device list reveals access.
pub fn check_camera(ffmpeg: &Path) -> PermissionCheckResult {
    if cfg!(target_os = "macos") {
        check_avfoundation(ffmpeg, PermissionType::Camera)
    } else if cfg!(target_os = "linux") {
        check_camera_nodes(Path::new("/dev"))
    } else {
        PermissionCheckResult::granted(PermissionType::Camera)
    }
}

/// Check Microphone permission.
pub fn check_microphone(ffmpeg: &Path) -> PermissionCheckResult {
    if cfg!(target_os = "macos") {
        check_avfoundation(ffmpeg, PermissionType::Microphone)
    } else if cfg!(target_os = "linux") {
        check_sound_nodes(Path::new("/dev/snd"))
    } else {
        PermissionCheckResult::granted(PermissionType::Microphone)
    }
}

/// AVFoundation hides devices the process may not open, so an empty device
/// section means the permission was refused.
fn check_avfoundation(ffmpeg: &Path, permission_type: PermissionType) -> PermissionCheckResult {
    match devices::list_avfoundation_devices(ffmpeg) {
        Ok(list) => {
            let visible = match permission_type {
                PermissionType::Camera => !list.cameras().is_empty(),
                PermissionType::Microphone => !list.audio_devices.is_empty(),
            };
            if visible {
                PermissionCheckResult::granted(permission_type)
            } else {
                PermissionCheckResult::denied(
                    permission_type,
                    Some(format!(
                        "No {} devices are visible to this process",
                        permission_type.name().to_lowercase()
                    )),
                )
            }
        }
        Err(e) => PermissionCheckResult::denied(permission_type, Some(e.to_string())),
    }
}

/// Camera access on Linux: at least one `/dev/videoN` node opens for reading.
pub fn check_camera_nodes(dev_dir: &Path) -> PermissionCheckResult {
    let nodes = devices::list_v4l2_nodes(dev_dir);
    if nodes.is_empty() {
        return PermissionCheckResult::denied(
            PermissionType::Camera,
            Some(format!("No video devices found in {}", dev_dir.display())),
        );
    }

    check_any_opens(
        PermissionType::Camera,
        nodes.iter().map(|d| Path::new(&d.name).to_path_buf()),
    )
}

/// Microphone access on Linux: an ALSA control node opens for reading.
pub fn check_sound_nodes(snd_dir: &Path) -> PermissionCheckResult {
    let controls: Vec<_> = std::fs::read_dir(snd_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().starts_with("controlC"))
                .map(|e| e.path())
                .collect()
        })
        .unwrap_or_default();

    if controls.is_empty() {
        return PermissionCheckResult::denied(
            PermissionType::Microphone,
            Some(format!("No sound cards found in {}", snd_dir.display())),
        );
    }

    check_any_opens(PermissionType::Microphone, controls.into_iter())
}

fn check_any_opens(
    permission_type: PermissionType,
    paths: impl Iterator<Item = std::path::PathBuf>,
) -> PermissionCheckResult {
    let mut last_error = None;
    for path in paths {
        match std::fs::File::open(&path) {
            Ok(_) => return PermissionCheckResult::granted(permission_type),
            Err(e) => last_error = Some(format!("{}: {}", path.display(), e)),
        }
    }
    PermissionCheckResult::denied(permission_type, last_error)
}

/// Verify the permissions needed for a recording session.
///
/// Returns every missing permission, not just the first.
pub fn verify_permissions(
    ffmpeg: &Path,
    need_camera: bool,
    need_microphone: bool,
) -> Vec<PermissionError> {
    let mut errors = Vec::new();

    if need_camera {
        let result = check_camera(ffmpeg);
        if !result.granted {
            errors.push(result.into());
        }
    }

    if need_microphone {
        let result = check_microphone(ffmpeg);
        if !result.granted {
            errors.push(result.into());
        }
    }

    errors
}

/// Print permission errors to stderr.
pub fn print_permission_errors(errors: &[PermissionError]) {
    for (i, error) in errors.iter().enumerate() {
        if i > 0 {
            eprintln!("\n---\n");
        }
        eprintln!("Error: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn test_permission_names() {
        assert_eq!(PermissionType::Camera.name(), "Camera");
        assert_eq!(PermissionType::Microphone.name(), "Microphone");
    }

    #[test]
    fn test_permission_error_display() {
        let err = PermissionError {
            permission_type: PermissionType::Camera,
            details: Some("Test details".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("Camera permission is required"));
        assert!(msg.contains(PermissionType::Camera.settings_path()));
        assert!(msg.contains("Details: Test details"));
    }

    #[test]
    fn test_permission_error_display_without_details() {
        let err = PermissionError {
            permission_type: PermissionType::Microphone,
            details: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("Microphone permission is required"));
        assert!(!msg.contains("Details:"));
    }

    #[test]
    fn test_camera_nodes_granted_when_readable() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("video0")).unwrap();
        let result = check_camera_nodes(dir.path());
        assert!(result.granted);
        assert_eq!(result.permission_type, PermissionType::Camera);
    }

    #[test]
    fn test_camera_nodes_denied_when_missing() {
        let dir = TempDir::new().unwrap();
        let result = check_camera_nodes(dir.path());
        assert!(!result.granted);
        assert!(result.details.unwrap().contains("No video devices"));
    }

    #[test]
    fn test_sound_nodes() {
        let dir = TempDir::new().unwrap();
        assert!(!check_sound_nodes(dir.path()).granted);

        File::create(dir.path().join("controlC0")).unwrap();
        assert!(check_sound_nodes(dir.path()).granted);
    }

    #[test]
    fn test_check_result_into_error() {
        let result = PermissionCheckResult::denied(
            PermissionType::Microphone,
            Some("refused".to_string()),
        );
        let err: PermissionError = result.into();
        assert_eq!(err.permission_type, PermissionType::Microphone);
        assert_eq!(err.details.as_deref(), Some("refused"));
    }
}
