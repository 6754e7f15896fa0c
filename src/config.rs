//! Configuration file handling for stabcam.
//!
//! Loads configuration from `~/.config/stabcam/config.toml` or a custom path.

use crate::media_store::{MediaStore, DEFAULT_AUTHORITY, DEFAULT_RELATIVE_PATH};
use crate::stabilizer::{
    default_cache_dir, default_font_file, default_install_dir, DeshakeEdge, DeshakeParams,
    EncoderSettings, FilterGraph, StabilizerSettings, ToolBackend, Watermark, MAX_SEARCH_EXTENT,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration file structure for stabcam.
/// Loaded from ~/.config/stabcam/config.toml (or custom path via --config).
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub stabilizer: StabilizerConfig,
    #[serde(default)]
    pub gallery: GalleryConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device name fragment or index
    pub device: Option<String>,
    pub resolution: [u32; 2],
    pub framerate: u32,
    pub hardware_stabilization: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: None,
            resolution: [1280, 720],
            framerate: 30,
            hardware_stabilization: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub enabled: bool,
    /// Player that receives the preview stream on stdin
    pub player: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            player: "mpv".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    pub enabled: bool,
    /// Explicit ffmpeg program; falls back to `STABCAM_FFMPEG`, then PATH
    pub ffmpeg: Option<PathBuf>,
    /// Bundled ffmpeg binary to install into the private files directory
    pub bundled_ffmpeg: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub deshake: DeshakeConfig,
    pub watermark: WatermarkConfig,
    pub preset: String,
    pub video_codec: String,
    pub audio_codec: String,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        let encoder = EncoderSettings::default();
        Self {
            enabled: true,
            ffmpeg: None,
            bundled_ffmpeg: None,
            cache_dir: None,
            deshake: DeshakeConfig::default(),
            watermark: WatermarkConfig::default(),
            preset: encoder.preset,
            video_codec: encoder.video_codec,
            audio_codec: encoder.audio_codec,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeshakeConfig {
    pub rx: u32,
    pub ry: u32,
    pub edge: DeshakeEdge,
}

impl Default for DeshakeConfig {
    fn default() -> Self {
        let params = DeshakeParams::default();
        Self {
            rx: params.rx,
            ry: params.ry,
            edge: params.edge,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    pub enabled: bool,
    pub text: String,
    pub font_file: Option<PathBuf>,
    pub font_color: String,
    pub font_size: u32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        let watermark = Watermark::default();
        Self {
            enabled: true,
            text: watermark.text,
            font_file: None,
            font_color: watermark.font_color,
            font_size: watermark.font_size,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    /// Gallery root directory (default: the platform video directory)
    pub root: Option<PathBuf>,
    pub relative_path: String,
    /// Hide entries as pending until they are complete
    pub scoped_storage: bool,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            root: None,
            relative_path: DEFAULT_RELATIVE_PATH.to_string(),
            scoped_storage: true,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a path given on the command line. The file must exist.
    pub fn load_from_explicit(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Self::load_from(path)
    }

    fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject values ffmpeg would refuse at run time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let deshake = &self.stabilizer.deshake;
        let extents = [
            ("stabilizer.deshake.rx", deshake.rx),
            ("stabilizer.deshake.ry", deshake.ry),
        ];
        for (key, value) in extents {
            if value > MAX_SEARCH_EXTENT {
                return Err(ConfigError::InvalidValue {
                    key,
                    reason: format!("{} exceeds the maximum of {}", value, MAX_SEARCH_EXTENT),
                });
            }
        }
        let [width, height] = self.camera.resolution;
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidValue {
                key: "camera.resolution",
                reason: "width and height must be positive".to_string(),
            });
        }
        if self.camera.framerate == 0 {
            return Err(ConfigError::InvalidValue {
                key: "camera.framerate",
                reason: "must be positive".to_string(),
            });
        }
        if self.stabilizer.watermark.enabled && self.stabilizer.watermark.text.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "stabilizer.watermark.text",
                reason: "must not be empty while the watermark is enabled".to_string(),
            });
        }
        Ok(())
    }

    /// Where the ffmpeg binary for stabilization comes from.
    ///
    /// An explicit program wins over a bundled binary; neither means PATH.
    pub fn tool_backend(&self) -> ToolBackend {
        match (&self.stabilizer.ffmpeg, &self.stabilizer.bundled_ffmpeg) {
            (Some(program), _) => ToolBackend::System {
                program: program.clone(),
            },
            (None, Some(asset)) => ToolBackend::Installed {
                asset: asset.clone(),
                install_dir: default_install_dir(),
            },
            (None, None) => ToolBackend::system(),
        }
    }

    pub fn stabilizer_settings(&self) -> StabilizerSettings {
        let stabilizer = &self.stabilizer;
        let watermark = stabilizer.watermark.enabled.then(|| Watermark {
            text: stabilizer.watermark.text.clone(),
            font_file: stabilizer
                .watermark
                .font_file
                .clone()
                .unwrap_or_else(default_font_file),
            font_color: stabilizer.watermark.font_color.clone(),
            font_size: stabilizer.watermark.font_size,
        });

        StabilizerSettings {
            filter: FilterGraph {
                deshake: DeshakeParams {
                    rx: stabilizer.deshake.rx,
                    ry: stabilizer.deshake.ry,
                    edge: stabilizer.deshake.edge,
                },
                watermark,
            },
            encoder: EncoderSettings {
                preset: stabilizer.preset.clone(),
                video_codec: stabilizer.video_codec.clone(),
                audio_codec: stabilizer.audio_codec.clone(),
            },
            cache_dir: stabilizer.cache_dir.clone().unwrap_or_else(default_cache_dir),
            relative_path: self.gallery.relative_path.clone(),
        }
    }

    pub fn media_store(&self) -> MediaStore {
        match &self.gallery.root {
            Some(root) => MediaStore::new(
                root.clone(),
                DEFAULT_AUTHORITY,
                self.gallery.scoped_storage,
            ),
            None if self.gallery.scoped_storage => MediaStore::with_default_root(),
            None => MediaStore::new(
                crate::media_store::default_root(),
                DEFAULT_AUTHORITY,
                false,
            ),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    NotFound {
        path: PathBuf,
    },
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        key: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound { path } => {
                write!(f, "Config file not found: {}", path.display())
            }
            ConfigError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::InvalidValue { key, reason } => {
                write!(f, "Invalid config value for {}: {}", key, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("stabcam").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/stabcam/config.toml")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.camera.resolution, [1280, 720]);
        assert_eq!(config.camera.framerate, 30);
        assert!(config.audio.enabled);
        assert!(config.preview.enabled);
        assert_eq!(config.preview.player, "mpv");
        assert!(config.stabilizer.enabled);
        assert_eq!(config.stabilizer.preset, "veryfast");
        assert_eq!(config.gallery.relative_path, "Movies/StabCam");
        assert!(config.gallery.scoped_storage);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[camera]
device = "USB"
framerate = 24

[stabilizer.deshake]
rx = 32
edge = "clamp"

[stabilizer.watermark]
enabled = false
"#,
        );

        let config = Config::load_from_explicit(&path).unwrap();
        assert_eq!(config.camera.device.as_deref(), Some("USB"));
        assert_eq!(config.camera.framerate, 24);
        assert_eq!(config.camera.resolution, [1280, 720]);
        assert_eq!(config.stabilizer.deshake.rx, 32);
        assert_eq!(config.stabilizer.deshake.ry, 16);
        assert_eq!(config.stabilizer.deshake.edge, DeshakeEdge::Clamp);

        let settings = config.stabilizer_settings();
        assert!(settings.filter.watermark.is_none());
        assert_eq!(
            settings.filter.render(),
            "deshake=rx=32:ry=16:edge=clamp"
        );
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = TempDir::new().unwrap();
        let result = Config::load_from_explicit(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[camera\nframerate = ");
        let err = Config::load_from_explicit(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_search_extent_validated() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[stabilizer.deshake]\nry = 100\n");
        match Config::load_from_explicit(&path) {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "stabilizer.deshake.ry"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_tool_backend_precedence() {
        let mut config = Config::default();
        config.stabilizer.bundled_ffmpeg = Some(PathBuf::from("/assets/ffmpeg"));
        assert!(matches!(config.tool_backend(), ToolBackend::Installed { .. }));

        config.stabilizer.ffmpeg = Some(PathBuf::from("/opt/bin/ffmpeg"));
        assert_eq!(
            config.tool_backend(),
            ToolBackend::System {
                program: PathBuf::from("/opt/bin/ffmpeg")
            }
        );
    }

    #[test]
    fn test_gallery_settings_flow_into_store() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            &format!(
                "[gallery]\nroot = {:?}\nrelative_path = \"Videos/Test\"\nscoped_storage = false\n",
                dir.path().join("gallery").to_string_lossy()
            ),
        );
        let config = Config::load_from_explicit(&path).unwrap();
        let store = config.media_store();
        assert_eq!(store.root(), dir.path().join("gallery"));
        assert!(!store.is_scoped());
        assert_eq!(config.stabilizer_settings().relative_path, "Videos/Test");
    }

    #[test]
    fn test_watermark_settings() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "[stabilizer.watermark]\ntext = \"SAMPLE\"\nfont_file = \"/fonts/a.ttf\"\nfont_size = 40\n",
        );
        let config = Config::load_from_explicit(&path).unwrap();
        let watermark = config.stabilizer_settings().filter.watermark.unwrap();
        assert_eq!(watermark.text, "SAMPLE");
        assert_eq!(watermark.font_file, PathBuf::from("/fonts/a.ttf"));
        assert_eq!(watermark.font_size, 40);
        assert_eq!(watermark.font_color, "red");
    }
}
