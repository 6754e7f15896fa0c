//! Video stabilization on a background worker.
//!
//! A recording is copied out of the gallery into a private temp file, run
//! through ffmpeg's `deshake` filter (optionally with a burned-in watermark),
//! and the result saved back into the gallery under a new name. Jobs run one
//! at a time on a single worker thread; their callbacks are posted to the
//! control loop through a [`MainThreadHandle`].

mod filter;
mod temp;
mod tool;

pub use filter::{
    build_args, default_font_file, DeshakeEdge, DeshakeParams, EncoderSettings, FilterGraph,
    Watermark, MAX_SEARCH_EXTENT,
};
pub use temp::TempFile;
pub use tool::{
    default_install_dir, install_bundled, FfmpegRunner, FilterRunner, ToolBackend, ToolOutcome,
    FFMPEG_ENV,
};

use crate::main_thread::MainThreadHandle;
use crate::media_store::{ContentUri, ContentValues, MediaStore, MediaStoreError, VIDEO_MP4};
use crate::pipeline::PipelineError;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Number of trailing tool log lines kept on a failed run.
const LOG_TAIL_LINES: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum StabilizeError {
    #[error("Failed to read source video {uri}: {source}")]
    ReadSource {
        uri: ContentUri,
        #[source]
        source: MediaStoreError,
    },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Missing bundled binary {}", .0.display())]
    MissingBundledBinary(PathBuf),
    #[error(transparent)]
    Tool(#[from] PipelineError),
    #[error("FFmpeg failed (code={}). See log output for details.", exit_code_label(.exit_code))]
    ToolFailed {
        exit_code: Option<i32>,
        log_tail: Vec<String>,
    },
    #[error("Failed to save stabilized file into gallery: {0}")]
    Save(#[source] MediaStoreError),
    #[error("Exception: {0}")]
    Panicked(String),
    #[error("Stabilizer worker has shut down")]
    WorkerGone,
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

/// Everything a stabilization pass needs besides the gallery and runner.
#[derive(Debug, Clone)]
pub struct StabilizerSettings {
    pub filter: FilterGraph,
    pub encoder: EncoderSettings,
    /// Private directory for temp input/output files
    pub cache_dir: PathBuf,
    /// Gallery relative path for stabilized videos
    pub relative_path: String,
}

impl Default for StabilizerSettings {
    fn default() -> Self {
        Self {
            filter: FilterGraph::default(),
            encoder: EncoderSettings::default(),
            cache_dir: default_cache_dir(),
            relative_path: crate::media_store::DEFAULT_RELATIVE_PATH.to_string(),
        }
    }
}

impl StabilizerSettings {
    /// Temp output prefix: `stab_watermarked` when a watermark is burned in.
    pub fn output_prefix(&self) -> &'static str {
        if self.filter.watermark.is_some() {
            "stab_watermarked"
        } else {
            "stab"
        }
    }
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("stabcam")
}

/// Run one stabilization inline and return the new gallery URI.
///
/// Both temp files are gone by the time this returns, whatever the outcome.
pub fn stabilize_once(
    store: &MediaStore,
    runner: &dyn FilterRunner,
    settings: &StabilizerSettings,
    source: &ContentUri,
) -> Result<ContentUri, StabilizeError> {
    let cache_dir = settings.cache_dir.as_path();
    std::fs::create_dir_all(cache_dir).map_err(io_error(cache_dir))?;

    let input = TempFile::create(cache_dir, "input", "mp4").map_err(io_error(cache_dir))?;
    let output = TempFile::create(cache_dir, settings.output_prefix(), "mp4")
        .map_err(io_error(cache_dir))?;

    let result = run_job(store, runner, settings, source, input.path(), output.path());

    for file in [input, output] {
        let path = file.path().to_path_buf();
        if let Err(e) = file.remove() {
            log::warn!("Failed to delete temp file {}: {}", path.display(), e);
        }
    }

    result
}

fn run_job(
    store: &MediaStore,
    runner: &dyn FilterRunner,
    settings: &StabilizerSettings,
    source: &ContentUri,
    input: &Path,
    output: &Path,
) -> Result<ContentUri, StabilizeError> {
    let mut reader = store
        .open_input(source)
        .map_err(|e| StabilizeError::ReadSource {
            uri: source.clone(),
            source: e,
        })?;
    let mut writer = std::fs::File::create(input).map_err(io_error(input))?;
    io::copy(&mut reader, &mut writer).map_err(io_error(input))?;
    drop(writer);

    let args = build_args(input, output, &settings.filter, &settings.encoder);
    log::debug!("Running FFmpeg command: {}", args.join(" "));

    let outcome = runner.run(&args)?;
    if !outcome.success() {
        log::error!(
            "FFmpeg failed (code={}):\n{}",
            exit_code_label(&outcome.exit_code),
            outcome.log.join("\n")
        );
        let skip = outcome.log.len().saturating_sub(LOG_TAIL_LINES);
        return Err(StabilizeError::ToolFailed {
            exit_code: outcome.exit_code,
            log_tail: outcome.log.into_iter().skip(skip).collect(),
        });
    }

    let display_name = format!("stab_{}.mp4", chrono::Utc::now().timestamp_millis());
    let values = ContentValues::new(display_name, VIDEO_MP4)
        .with_relative_path(settings.relative_path.clone());
    store.save_file(output, values).map_err(StabilizeError::Save)
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StabilizeError + '_ {
    move |source| StabilizeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Run [`stabilize_once`], turning a panic into an error.
fn guarded(
    store: &MediaStore,
    runner: &dyn FilterRunner,
    settings: &StabilizerSettings,
    source: &ContentUri,
) -> Result<ContentUri, StabilizeError> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        stabilize_once(store, runner, settings, source)
    }))
    .unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(StabilizeError::Panicked(message))
    })
}

type SuccessCallback = Box<dyn FnOnce(ContentUri) + Send>;
type ErrorCallback = Box<dyn FnOnce(String) + Send>;

struct Job {
    source: ContentUri,
    on_success: SuccessCallback,
    on_error: ErrorCallback,
}

/// Handle to the stabilization worker.
///
/// Dropping it lets queued jobs finish, then joins the worker.
pub struct Stabilizer {
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    main: MainThreadHandle,
    in_flight: Arc<AtomicUsize>,
}

impl Stabilizer {
    /// Start the worker thread.
    pub fn spawn(
        store: MediaStore,
        runner: Box<dyn FilterRunner>,
        settings: StabilizerSettings,
        main: MainThreadHandle,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let in_flight = Arc::new(AtomicUsize::new(0));

        let worker = {
            let main = main.clone();
            let in_flight = Arc::clone(&in_flight);
            thread::Builder::new()
                .name("stabilizer".to_string())
                .spawn(move || {
                    for job in rx {
                        log::info!("Stabilizing {}", job.source);
                        let result = guarded(&store, runner.as_ref(), &settings, &job.source);
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        let posted = match result {
                            Ok(uri) => {
                                log::info!("Stabilized video saved: {}", uri);
                                let on_success = job.on_success;
                                main.post(move || on_success(uri))
                            }
                            Err(e) => {
                                log::error!("Stabilization of {} failed: {}", job.source, e);
                                let message = e.to_string();
                                let on_error = job.on_error;
                                main.post(move || on_error(message))
                            }
                        };
                        if !posted {
                            log::warn!("Control loop is gone; dropping stabilizer callback");
                        }
                    }
                })
        };

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to start stabilizer worker: {}", e);
                None
            }
        };

        Self {
            tx: worker.as_ref().map(|_| tx),
            worker,
            main,
            in_flight,
        }
    }

    /// Queue `source` for stabilization. Returns immediately.
    ///
    /// Exactly one of the callbacks runs later on the main thread.
    pub fn stabilize<S, E>(&self, source: ContentUri, on_success: S, on_error: E)
    where
        S: FnOnce(ContentUri) + Send + 'static,
        E: FnOnce(String) + Send + 'static,
    {
        let job = Job {
            source,
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let rejected = match &self.tx {
            Some(tx) => tx.send(job).err().map(|e| e.0),
            None => Some(job),
        };

        if let Some(job) = rejected {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let message = StabilizeError::WorkerGone.to_string();
            let on_error = job.on_error;
            self.main.post(move || on_error(message));
        }
    }

    /// Run one stabilization on the calling thread.
    pub fn stabilize_blocking(
        store: &MediaStore,
        runner: &dyn FilterRunner,
        settings: &StabilizerSettings,
        source: &ContentUri,
    ) -> Result<ContentUri, StabilizeError> {
        guarded(store, runner, settings, source)
    }

    /// Jobs queued or running.
    pub fn pending_jobs(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub fn shutdown(mut self) {
        self.join_worker();
    }

    fn join_worker(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Stabilizer worker panicked");
            }
        }
    }
}

impl Drop for Stabilizer {
    fn drop(&mut self) {
        self.join_worker();
    }
}
