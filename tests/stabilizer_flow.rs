//! Stabilizer worker flow against a real gallery and a fake filter runner.

use stabcam::main_thread::{main_thread, MainLooper};
use stabcam::media_store::{ContentUri, ContentValues, MediaStore, DEFAULT_AUTHORITY, VIDEO_MP4};
use stabcam::stabilizer::{
    FilterGraph, FilterRunner, StabilizeError, Stabilizer, StabilizerSettings, ToolOutcome,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Copies the input to the output with a marker, or exits with `fail_code`.
struct FakeDeshake {
    fail_code: Option<i32>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FakeDeshake {
    fn succeeding() -> Self {
        Self {
            fail_code: None,
            calls: Arc::default(),
        }
    }

    fn failing(code: i32) -> Self {
        Self {
            fail_code: Some(code),
            calls: Arc::default(),
        }
    }
}

impl FilterRunner for FakeDeshake {
    fn run(&self, args: &[String]) -> Result<ToolOutcome, StabilizeError> {
        self.calls.lock().unwrap().push(args.to_vec());
        if let Some(code) = self.fail_code {
            return Ok(ToolOutcome {
                exit_code: Some(code),
                log: vec!["Error while filtering: Invalid argument".to_string()],
            });
        }
        let input = &args[args.iter().position(|a| a == "-i").unwrap() + 1];
        let output = args.last().unwrap();
        let mut content = std::fs::read(input).unwrap();
        content.extend_from_slice(b" +deshake");
        std::fs::write(output, content).unwrap();
        Ok(ToolOutcome {
            exit_code: Some(0),
            log: Vec::new(),
        })
    }
}

struct Setup {
    _dir: TempDir,
    store: MediaStore,
    settings: StabilizerSettings,
    recording: ContentUri,
}

fn setup() -> Setup {
    let dir = TempDir::new().unwrap();
    let store = MediaStore::new(dir.path().join("Videos"), DEFAULT_AUTHORITY, true);
    let source = dir.path().join("clip.mp4");
    std::fs::write(&source, b"raw").unwrap();
    let recording = store
        .save_file(
            &source,
            ContentValues::new("20240501_093000.mp4", VIDEO_MP4).with_relative_path("Movies/StabCam"),
        )
        .unwrap();
    let settings = StabilizerSettings {
        cache_dir: dir.path().join("cache"),
        ..Default::default()
    };
    Setup {
        _dir: dir,
        store,
        settings,
        recording,
    }
}

fn cache_files(settings: &StabilizerSettings) -> Vec<String> {
    std::fs::read_dir(&settings.cache_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

type Outcomes = Arc<Mutex<Vec<Result<ContentUri, String>>>>;

fn enqueue(stabilizer: &Stabilizer, source: ContentUri, outcomes: &Outcomes) {
    let ok = Arc::clone(outcomes);
    let err = Arc::clone(outcomes);
    stabilizer.stabilize(
        source,
        move |uri| ok.lock().unwrap().push(Ok(uri)),
        move |msg| err.lock().unwrap().push(Err(msg)),
    );
}

fn pump(looper: &MainLooper, count: usize) {
    for _ in 0..count {
        assert!(
            looper.run_one(Duration::from_secs(10)),
            "callback never arrived"
        );
    }
}

#[test]
fn successful_run_adds_exactly_one_gallery_entry() {
    let s = setup();
    let runner = FakeDeshake::succeeding();
    let calls = Arc::clone(&runner.calls);
    let (handle, looper) = main_thread();
    let stabilizer = Stabilizer::spawn(s.store.clone(), Box::new(runner), s.settings.clone(), handle);

    let outcomes: Outcomes = Arc::default();
    enqueue(&stabilizer, s.recording.clone(), &outcomes);
    pump(&looper, 1);
    stabilizer.shutdown();

    let outcomes = outcomes.lock().unwrap();
    let saved = outcomes[0].as_ref().expect("success callback");
    assert!(saved.display_name().starts_with("stab_"));
    assert!(saved.display_name().ends_with(".mp4"));

    let entries = s.store.list().unwrap();
    assert_eq!(entries.len(), 2, "recording plus one stabilized copy");
    let stabilized = s.store.query(saved.display_name()).unwrap().unwrap();
    assert_eq!(stabilized.relative_path, "Movies/StabCam");
    assert_eq!(stabilized.mime_type, VIDEO_MP4);
    assert_eq!(
        std::fs::read(s.store.resolve(saved).unwrap().0).unwrap(),
        b"raw +deshake"
    );

    let calls = calls.lock().unwrap();
    let args = &calls[0];
    let vf = &args[args.iter().position(|a| a == "-vf").unwrap() + 1];
    assert!(vf.starts_with("deshake=rx=16:ry=16:edge=mirror,drawtext="));
    assert!(vf.contains("text='DEMO'"));
    let output_name = std::path::Path::new(args.last().unwrap())
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    assert!(output_name.starts_with("stab_watermarked_"));

    assert!(cache_files(&s.settings).is_empty(), "temp files left behind");
}

#[test]
fn nonzero_exit_only_reports_error() {
    let s = setup();
    let (handle, looper) = main_thread();
    let stabilizer = Stabilizer::spawn(
        s.store.clone(),
        Box::new(FakeDeshake::failing(1)),
        s.settings.clone(),
        handle,
    );

    let outcomes: Outcomes = Arc::default();
    enqueue(&stabilizer, s.recording.clone(), &outcomes);
    pump(&looper, 1);
    stabilizer.shutdown();
    assert_eq!(looper.run_pending(), 0, "exactly one callback");

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(
        *outcomes,
        vec![Err::<ContentUri, String>(
            "FFmpeg failed (code=1). See log output for details.".to_string()
        )]
    );
    assert_eq!(s.store.list().unwrap().len(), 1, "no new gallery entry");
    assert!(cache_files(&s.settings).is_empty(), "temp files left behind");
}

#[test]
fn jobs_run_in_order_on_one_worker() {
    let s = setup();
    let mut settings = s.settings.clone();
    settings.filter = FilterGraph::deshake_only();
    let runner = FakeDeshake::succeeding();
    let calls = Arc::clone(&runner.calls);
    let (handle, looper) = main_thread();
    let stabilizer = Stabilizer::spawn(s.store.clone(), Box::new(runner), settings.clone(), handle);

    let missing = ContentUri::parse("content://media/Movies/StabCam/missing.mp4").unwrap();
    let outcomes: Outcomes = Arc::default();
    enqueue(&stabilizer, s.recording.clone(), &outcomes);
    enqueue(&stabilizer, missing, &outcomes);
    enqueue(&stabilizer, s.recording.clone(), &outcomes);
    pump(&looper, 3);
    stabilizer.shutdown();

    let outcomes = outcomes.lock().unwrap();
    assert!(outcomes[0].is_ok());
    assert!(outcomes[1]
        .as_ref()
        .unwrap_err()
        .starts_with("Failed to read source video"));
    assert!(outcomes[2].is_ok());
    assert_ne!(outcomes[0], outcomes[2], "each run gets its own entry");

    assert_eq!(calls.lock().unwrap().len(), 2, "missing source never reaches the tool");
    assert_eq!(s.store.list().unwrap().len(), 3);
    assert!(cache_files(&settings).is_empty());
}

#[test]
fn callbacks_wait_for_the_main_thread() {
    let s = setup();
    let (handle, looper) = main_thread();
    let stabilizer = Stabilizer::spawn(
        s.store.clone(),
        Box::new(FakeDeshake::succeeding()),
        s.settings.clone(),
        handle,
    );

    let outcomes: Outcomes = Arc::default();
    enqueue(&stabilizer, s.recording.clone(), &outcomes);
    stabilizer.shutdown();

    assert!(outcomes.lock().unwrap().is_empty(), "nothing runs off the main thread");
    assert_eq!(looper.run_pending(), 1);
    assert_eq!(outcomes.lock().unwrap().len(), 1);
}

#[test]
fn blocking_stabilize_with_unpublished_source() {
    let s = setup();
    let pending = s
        .store
        .insert(ContentValues::new("in-progress.mp4", VIDEO_MP4).pending(true))
        .unwrap();
    std::fs::write(s.store.resolve(&pending).unwrap().0, b"partial").unwrap();

    let saved = Stabilizer::stabilize_blocking(
        &s.store,
        &FakeDeshake::succeeding(),
        &s.settings,
        &pending,
    )
    .unwrap();
    assert!(!s.store.resolve(&saved).unwrap().1, "result is published");
    assert!(s.store.query("in-progress.mp4").unwrap().is_none());
}
