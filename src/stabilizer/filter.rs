//! Filter graph and encoder arguments for the stabilization pass.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// How `deshake` fills the image border revealed by motion compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeshakeEdge {
    Blank,
    Original,
    Clamp,
    #[default]
    Mirror,
}

impl DeshakeEdge {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeshakeEdge::Blank => "blank",
            DeshakeEdge::Original => "original",
            DeshakeEdge::Clamp => "clamp",
            DeshakeEdge::Mirror => "mirror",
        }
    }
}

/// Largest motion search extent `deshake` accepts, in pixels.
pub const MAX_SEARCH_EXTENT: u32 = 64;

/// Parameters of ffmpeg's `deshake` filter.
#[derive(Debug, Clone, PartialEq)]
pub struct DeshakeParams {
    /// Horizontal motion search extent in pixels
    pub rx: u32,
    /// Vertical motion search extent in pixels
    pub ry: u32,
    pub edge: DeshakeEdge,
}

impl Default for DeshakeParams {
    fn default() -> Self {
        Self {
            rx: 16,
            ry: 16,
            edge: DeshakeEdge::Mirror,
        }
    }
}

impl DeshakeParams {
    pub fn render(&self) -> String {
        format!(
            "deshake=rx={}:ry={}:edge={}",
            self.rx,
            self.ry,
            self.edge.as_str()
        )
    }
}

/// Font used for the watermark when none is configured.
pub fn default_font_file() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/System/Library/Fonts/Helvetica.ttc")
    } else {
        PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf")
    }
}

/// Text burned into the center of every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    pub text: String,
    pub font_file: PathBuf,
    pub font_color: String,
    pub font_size: u32,
}

impl Default for Watermark {
    fn default() -> Self {
        Self {
            text: "DEMO".to_string(),
            font_file: default_font_file(),
            font_color: "red".to_string(),
            font_size: 80,
        }
    }
}

impl Watermark {
    /// `drawtext` filter centering the text in the frame.
    ///
    /// Plain text is single-quoted as is. Anything with filter syntax in it
    /// is escaped for both the option and the filtergraph level, and `%`
    /// expansion is turned off.
    pub fn render(&self) -> String {
        let text = if is_plain(&self.text) {
            format!("'{}'", self.text)
        } else {
            escape_value(&self.text)
        };
        let mut filter = format!(
            "drawtext=fontfile={}:text={}:fontcolor={}:fontsize={}:x=(w-text_w)/2:y=(h-text_h)/2",
            escape_value(&self.font_file.to_string_lossy()),
            text,
            escape_value(&self.font_color),
            self.font_size
        );
        if self.text.contains('%') {
            filter.push_str(":expansion=none");
        }
        filter
    }
}

fn is_plain(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | '!' | '?'))
}

/// Two levels: option value (`\ ' :`) then filtergraph (`\ ' [ ] , ;`).
fn escape_value(value: &str) -> String {
    let mut option_level = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '\'' | ':') {
            option_level.push('\\');
        }
        option_level.push(c);
    }

    let mut graph_level = String::with_capacity(option_level.len());
    for c in option_level.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            graph_level.push('\\');
        }
        graph_level.push(c);
    }
    graph_level
}

/// The video filter chain applied to a recording.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    pub deshake: DeshakeParams,
    pub watermark: Option<Watermark>,
}

impl Default for FilterGraph {
    fn default() -> Self {
        Self {
            deshake: DeshakeParams::default(),
            watermark: Some(Watermark::default()),
        }
    }
}

impl FilterGraph {
    /// Stabilization only, no watermark.
    pub fn deshake_only() -> Self {
        Self {
            deshake: DeshakeParams::default(),
            watermark: None,
        }
    }

    pub fn render(&self) -> String {
        match &self.watermark {
            Some(watermark) => format!("{},{}", self.deshake.render(), watermark.render()),
            None => self.deshake.render(),
        }
    }
}

/// Encoder options for the stabilized output.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub preset: String,
    pub video_codec: String,
    pub audio_codec: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            preset: "veryfast".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "copy".to_string(),
        }
    }
}

/// Full ffmpeg argument list for one stabilization pass.
pub fn build_args(
    input: &Path,
    output: &Path,
    graph: &FilterGraph,
    encoder: &EncoderSettings,
) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-vf".to_string(),
        graph.render(),
        "-preset".to_string(),
        encoder.preset.clone(),
        "-c:v".to_string(),
        encoder.video_codec.clone(),
        "-c:a".to_string(),
        encoder.audio_codec.clone(),
        output.to_string_lossy().into_owned(),
    ]
}
