//! MediaStore - directory-backed gallery of recorded and stabilized videos.
//!
//! Entries are addressed by opaque `content://` URIs. With scoped storage on,
//! entries live under a relative path (e.g. `Movies/StabCam`) and can be
//! inserted as pending: the file stays hidden as `.pending-<name>` until
//! [`MediaStore::publish`] is called. Legacy mode writes straight into the
//! gallery root and ignores both.

use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

pub const VIDEO_MP4: &str = "video/mp4";

/// Authority of URIs issued by the default gallery.
pub const DEFAULT_AUTHORITY: &str = "media";

/// Relative path used when none is configured.
pub const DEFAULT_RELATIVE_PATH: &str = "Movies/StabCam";

const SCHEME: &str = "content://";
const PENDING_PREFIX: &str = ".pending-";

/// Errors raised by gallery operations.
#[derive(Debug, thiserror::Error)]
pub enum MediaStoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid content URI '{0}'")]
    InvalidUri(String),
    #[error("content URI '{0}' was not issued by this gallery")]
    ForeignUri(String),
    #[error("no media entry for '{0}'")]
    NotFound(String),
    #[error("invalid display name '{0}'")]
    InvalidName(String),
    #[error("invalid relative path '{0}'")]
    InvalidRelativePath(String),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> MediaStoreError + '_ {
    move |source| MediaStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Opaque reference to a gallery entry:
/// `content://<authority>/<relative path>/<display name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ContentUri(String);

impl ContentUri {
    pub fn parse(s: &str) -> Result<Self, MediaStoreError> {
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| MediaStoreError::InvalidUri(s.to_string()))?;
        let (authority, path) = rest
            .split_once('/')
            .ok_or_else(|| MediaStoreError::InvalidUri(s.to_string()))?;
        if authority.is_empty() || path.is_empty() || path.ends_with('/') {
            return Err(MediaStoreError::InvalidUri(s.to_string()));
        }
        Ok(ContentUri(s.to_string()))
    }

    fn build(authority: &str, relative_path: &str, display_name: &str) -> Self {
        if relative_path.is_empty() {
            ContentUri(format!("{}{}/{}", SCHEME, authority, display_name))
        } else {
            ContentUri(format!(
                "{}{}/{}/{}",
                SCHEME, authority, relative_path, display_name
            ))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn authority(&self) -> &str {
        self.0[SCHEME.len()..]
            .split_once('/')
            .map(|(authority, _)| authority)
            .unwrap_or_default()
    }

    /// `(relative path, display name)`
    fn location(&self) -> (&str, &str) {
        let path = self.0[SCHEME.len()..]
            .split_once('/')
            .map(|(_, path)| path)
            .unwrap_or_default();
        path.rsplit_once('/').unwrap_or(("", path))
    }

    pub fn display_name(&self) -> &str {
        self.location().1
    }
}

impl std::fmt::Display for ContentUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ContentUri {
    type Err = MediaStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentUri::parse(s)
    }
}

/// Column values for a new gallery entry.
#[derive(Debug, Clone, Default)]
pub struct ContentValues {
    pub display_name: String,
    pub mime_type: String,
    pub relative_path: Option<String>,
    pub size: Option<u64>,
    pub pending: bool,
}

impl ContentValues {
    pub fn new(display_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            mime_type: mime_type.into(),
            ..Default::default()
        }
    }

    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn pending(mut self, pending: bool) -> Self {
        self.pending = pending;
        self
    }
}

/// A gallery record.
#[derive(Debug, Clone, Serialize)]
pub struct MediaEntry {
    pub uri: ContentUri,
    pub display_name: String,
    pub mime_type: String,
    pub relative_path: String,
    pub size_bytes: u64,
    pub pending: bool,
}

/// MIME type inferred from a file extension.
pub fn mime_type_for(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("mp4") | Some("m4v") => VIDEO_MP4,
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        VIDEO_MP4 => Some("mp4"),
        "video/quicktime" => Some("mov"),
        "video/x-matroska" => Some("mkv"),
        "video/webm" => Some("webm"),
        "video/x-msvideo" => Some("avi"),
        _ => None,
    }
}

/// Directory-backed gallery.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    authority: String,
    scoped: bool,
}

impl MediaStore {
    /// Create a gallery rooted at `root`. The directory is created lazily.
    pub fn new(root: PathBuf, authority: impl Into<String>, scoped: bool) -> Self {
        Self {
            root,
            authority: authority.into(),
            scoped,
        }
    }

    /// Gallery in the platform's video directory (e.g. `~/Videos`), scoped.
    pub fn with_default_root() -> Self {
        Self::new(default_root(), DEFAULT_AUTHORITY, true)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_scoped(&self) -> bool {
        self.scoped
    }

    /// Create a new, empty entry and return its URI.
    ///
    /// A name already taken gets a ` (n)` suffix before the extension.
    pub fn insert(&self, values: ContentValues) -> Result<ContentUri, MediaStoreError> {
        let display_name = self.normalize_display_name(&values)?;
        let relative_path = if self.scoped {
            normalize_relative_path(values.relative_path.as_deref().unwrap_or_default())?
        } else {
            String::new()
        };
        let pending = self.scoped && values.pending;

        let dir = self.dir_for(&relative_path);
        std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        let mut attempt = 0u32;
        loop {
            let candidate = numbered_name(&display_name, attempt);
            let published = dir.join(&candidate);
            let hidden = dir.join(format!("{}{}", PENDING_PREFIX, candidate));
            if !published.exists() && !hidden.exists() {
                let target = if pending { &hidden } else { &published };
                match OpenOptions::new().write(true).create_new(true).open(target) {
                    Ok(_) => {
                        let uri = ContentUri::build(&self.authority, &relative_path, &candidate);
                        log::debug!(
                            "Inserted gallery entry {} ({}, pending={})",
                            uri,
                            values.mime_type,
                            pending
                        );
                        return Ok(uri);
                    }
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(io_error(target)(e)),
                }
            }
            attempt += 1;
        }
    }

    /// On-disk location of an entry and whether it is still pending.
    pub fn resolve(&self, uri: &ContentUri) -> Result<(PathBuf, bool), MediaStoreError> {
        if uri.authority() != self.authority {
            return Err(MediaStoreError::ForeignUri(uri.to_string()));
        }
        let (relative_path, display_name) = uri.location();
        let relative_path = normalize_relative_path(relative_path)?;
        validate_display_name(display_name)?;

        let dir = self.dir_for(&relative_path);
        let published = dir.join(display_name);
        if published.is_file() {
            return Ok((published, false));
        }
        let hidden = dir.join(format!("{}{}", PENDING_PREFIX, display_name));
        if hidden.is_file() {
            return Ok((hidden, true));
        }
        Err(MediaStoreError::NotFound(uri.to_string()))
    }

    /// Open an entry for writing, truncating any previous content.
    pub fn open_output(&self, uri: &ContentUri) -> Result<File, MediaStoreError> {
        let (path, _) = self.resolve(uri)?;
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(io_error(&path))
    }

    pub fn open_input(&self, uri: &ContentUri) -> Result<File, MediaStoreError> {
        let (path, _) = self.resolve(uri)?;
        File::open(&path).map_err(io_error(&path))
    }

    /// Clear the pending flag, making the entry visible. No-op when already
    /// published.
    pub fn publish(&self, uri: &ContentUri) -> Result<(), MediaStoreError> {
        let (path, pending) = self.resolve(uri)?;
        if !pending {
            return Ok(());
        }
        let published = path.with_file_name(uri.display_name());
        std::fs::rename(&path, &published).map_err(io_error(&path))?;
        log::debug!("Published gallery entry {}", uri);
        Ok(())
    }

    pub fn delete(&self, uri: &ContentUri) -> Result<(), MediaStoreError> {
        let (path, _) = self.resolve(uri)?;
        std::fs::remove_file(&path).map_err(io_error(&path))
    }

    /// Look up a published entry by display name anywhere in the gallery.
    pub fn query(&self, display_name: &str) -> Result<Option<MediaEntry>, MediaStoreError> {
        Ok(self
            .list()?
            .into_iter()
            .find(|entry| entry.display_name == display_name))
    }

    /// All published entries, ordered by relative path then name.
    pub fn list(&self) -> Result<Vec<MediaEntry>, MediaStoreError> {
        let mut entries = Vec::new();
        if self.root.is_dir() {
            self.collect_entries(&self.root, &mut entries)?;
        }
        entries.sort_by(|a, b| {
            (a.relative_path.as_str(), a.display_name.as_str())
                .cmp(&(b.relative_path.as_str(), b.display_name.as_str()))
        });
        Ok(entries)
    }

    /// Total size of all published entries in bytes.
    pub fn total_size_bytes(&self) -> Result<u64, MediaStoreError> {
        Ok(self.list()?.iter().map(|e| e.size_bytes).sum())
    }

    /// Copy a file into the gallery: insert pending, copy, publish.
    ///
    /// A failed copy or publish removes the partial entry.
    pub fn save_file(
        &self,
        file: &Path,
        values: ContentValues,
    ) -> Result<ContentUri, MediaStoreError> {
        self.save_file_with(file, values, |uri| self.publish(uri))
    }

    fn save_file_with(
        &self,
        file: &Path,
        values: ContentValues,
        publish: impl FnOnce(&ContentUri) -> Result<(), MediaStoreError>,
    ) -> Result<ContentUri, MediaStoreError> {
        let mut source = File::open(file).map_err(io_error(file))?;
        let size = source.metadata().map_err(io_error(file))?.len();

        let uri = self.insert(values.with_size(size).pending(true))?;
        let stored = self
            .open_output(&uri)
            .and_then(|mut out| io::copy(&mut source, &mut out).map_err(io_error(file)))
            .and_then(|_| publish(&uri));

        if let Err(e) = stored {
            if let Err(cleanup) = self.delete(&uri) {
                log::warn!("Failed to remove partial entry {}: {}", uri, cleanup);
            }
            return Err(e);
        }

        Ok(uri)
    }

    fn dir_for(&self, relative_path: &str) -> PathBuf {
        relative_path
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |dir, segment| dir.join(segment))
    }

    fn normalize_display_name(&self, values: &ContentValues) -> Result<String, MediaStoreError> {
        validate_display_name(&values.display_name)?;
        let has_extension = Path::new(&values.display_name).extension().is_some();
        Ok(match extension_for_mime(&values.mime_type) {
            Some(ext) if !has_extension => format!("{}.{}", values.display_name, ext),
            _ => values.display_name.clone(),
        })
    }

    fn collect_entries(
        &self,
        dir: &Path,
        entries: &mut Vec<MediaEntry>,
    ) -> Result<(), MediaStoreError> {
        for entry in std::fs::read_dir(dir).map_err(io_error(dir))? {
            let entry = entry.map_err(io_error(dir))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }

            let metadata = entry.metadata().map_err(io_error(&path))?;
            if metadata.is_dir() {
                self.collect_entries(&path, entries)?;
            } else if metadata.is_file() {
                let relative_path = dir
                    .strip_prefix(&self.root)
                    .unwrap_or(Path::new(""))
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                entries.push(MediaEntry {
                    uri: ContentUri::build(&self.authority, &relative_path, &name),
                    mime_type: mime_type_for(&name).to_string(),
                    display_name: name,
                    relative_path,
                    size_bytes: metadata.len(),
                    pending: false,
                });
            }
        }
        Ok(())
    }
}

/// Default gallery root: the platform video directory.
pub fn default_root() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("Videos"))
}

fn validate_display_name(name: &str) -> Result<(), MediaStoreError> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(MediaStoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn normalize_relative_path(relative_path: &str) -> Result<String, MediaStoreError> {
    let mut segments = Vec::new();
    for component in Path::new(relative_path).components() {
        match component {
            Component::Normal(segment) => {
                let segment = segment.to_string_lossy();
                if segment.starts_with('.') {
                    return Err(MediaStoreError::InvalidRelativePath(
                        relative_path.to_string(),
                    ));
                }
                segments.push(segment.into_owned());
            }
            Component::CurDir => {}
            _ => {
                return Err(MediaStoreError::InvalidRelativePath(
                    relative_path.to_string(),
                ))
            }
        }
    }
    Ok(segments.join("/"))
}

/// `clip.mp4`, `clip (1).mp4`, `clip (2).mp4`, ...
fn numbered_name(display_name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return display_name.to_string();
    }
    match display_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, attempt, ext),
        _ => format!("{} ({})", display_name, attempt),
    }
}
