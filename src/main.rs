use clap::{Parser, Subcommand};
use stabcam::capture::{CameraCapture, CaptureError, MicrophoneCapture};
use stabcam::config::Config;
use stabcam::control::{ControlCommand, ControlInput};
use stabcam::devices::{self, CaptureBackend};
use stabcam::main_thread::main_thread;
use stabcam::media_store::{mime_type_for, ContentValues, MediaStore};
use stabcam::permissions;
use stabcam::pipeline::{ctrlc_received, setup_ctrlc_handler};
use stabcam::recorder::{CameraScreen, CaptureConfig, RecordEvent, RecordState, ScreenOptions};
use stabcam::stabilizer::{FfmpegRunner, Stabilizer};
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

/// How long the control loop waits for input before checking on capture.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parse and validate resolution (WIDTHxHEIGHT format)
fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid resolution format '{}'. Use WIDTHxHEIGHT (e.g., 1920x1080)",
            s
        ));
    }
    let width: u32 = parts[0]
        .parse()
        .map_err(|_| format!("Invalid width '{}' in resolution", parts[0]))?;
    let height: u32 = parts[1]
        .parse()
        .map_err(|_| format!("Invalid height '{}' in resolution", parts[1]))?;
    if width == 0 || height == 0 {
        return Err("Resolution width and height must be greater than 0".to_string());
    }
    if width > 7680 || height > 4320 {
        return Err("Resolution exceeds maximum supported (7680x4320)".to_string());
    }
    Ok((width, height))
}

/// Parse and validate framerate (1-120 fps)
fn parse_framerate(s: &str) -> Result<u32, String> {
    let fps: u32 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid framerate", s))?;
    if !(1..=120).contains(&fps) {
        return Err(format!(
            "Framerate must be between 1 and 120 fps, got {}",
            fps
        ));
    }
    Ok(fps)
}

/// Parse a recording duration in whole seconds
fn parse_duration(s: &str) -> Result<Duration, String> {
    let secs: u64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number of seconds", s))?;
    if secs == 0 {
        return Err("Duration must be at least 1 second".to_string());
    }
    Ok(Duration::from_secs(secs))
}

/// stabcam: record camera video and stabilize it
#[derive(Parser)]
#[command(name = "stabcam")]
#[command(version, about = "Record camera video and stabilize it with FFmpeg")]
#[command(long_about = "Preview the camera, toggle recording from the terminal, and \
    save every recording into a local gallery. Finished recordings are run \
    through FFmpeg's deshake filter with an optional watermark and saved \
    alongside the original.")]
#[command(after_help = "EXAMPLES:
    # Preview the camera; press Enter to start and stop recording
    stabcam record

    # Record 10 seconds without preview, then stabilize
    stabcam record --no-preview --duration 10

    # Stabilize an existing file without the watermark
    stabcam stabilize clip.mp4 --no-watermark

    # Show the gallery as JSON
    stabcam gallery list --json

    # List available devices
    stabcam list-devices")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the camera and record videos
    Record {
        /// Camera device (name fragment or index)
        #[arg(long)]
        camera: Option<String>,

        /// Microphone device (name fragment or index)
        #[arg(long)]
        mic: Option<String>,

        /// Record video only
        #[arg(long)]
        no_audio: bool,

        /// Do not open the preview window
        #[arg(long)]
        no_preview: bool,

        /// Capture resolution (e.g., 1920x1080)
        #[arg(long, value_parser = parse_resolution)]
        resolution: Option<(u32, u32)>,

        /// Capture framerate (1-120)
        #[arg(long, value_parser = parse_framerate)]
        framerate: Option<u32>,

        /// Start recording right away and stop after this many seconds
        #[arg(long, value_parser = parse_duration)]
        duration: Option<Duration>,

        /// Keep recordings as captured
        #[arg(long)]
        no_stabilize: bool,

        /// Stabilize without burning in the watermark
        #[arg(long)]
        no_watermark: bool,

        /// Leave the camera's own image stabilization off
        #[arg(long)]
        no_hw_stabilization: bool,

        /// Config file path
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Import a video into the gallery and stabilize it
    Stabilize {
        /// Video file to stabilize
        file: PathBuf,

        /// Stabilize without burning in the watermark
        #[arg(long)]
        no_watermark: bool,

        /// Config file path
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// List available capture devices
    ListDevices {
        /// Show only video devices
        #[arg(long)]
        video: bool,

        /// Show only audio devices
        #[arg(long)]
        audio: bool,

        /// Config file path (for the ffmpeg program)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Inspect the gallery
    Gallery {
        #[command(subcommand)]
        action: GalleryAction,
    },
}

#[derive(Subcommand)]
enum GalleryAction {
    /// List saved videos
    List {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,

        /// Config file path
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// What a `--duration` run should do after a control loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptedStep {
    Continue,
    /// The limit is reached; stop the recording and quit
    Stop,
    /// The recording already ended on its own; quit
    Finished,
}

/// Tracks the single recording a `--duration` run makes.
struct DurationLimit {
    limit: Duration,
    started: bool,
}

impl DurationLimit {
    fn new(limit: Duration) -> Self {
        Self {
            limit,
            started: false,
        }
    }

    fn check(&mut self, state: RecordState, elapsed: Option<Duration>) -> ScriptedStep {
        match (state, elapsed) {
            (RecordState::Recording, Some(elapsed)) => {
                self.started = true;
                if elapsed >= self.limit {
                    ScriptedStep::Stop
                } else {
                    ScriptedStep::Continue
                }
            }
            _ if self.started => ScriptedStep::Finished,
            _ => ScriptedStep::Continue,
        }
    }
}

/// Options of the `record` subcommand.
struct RecordArgs {
    camera: Option<String>,
    mic: Option<String>,
    no_audio: bool,
    no_preview: bool,
    resolution: Option<(u32, u32)>,
    framerate: Option<u32>,
    duration: Option<Duration>,
    no_stabilize: bool,
    no_watermark: bool,
    no_hw_stabilization: bool,
    config: Option<PathBuf>,
}

/// Load `--config` strictly; fall back to defaults when the default file is broken.
fn load_config(path: Option<&Path>) -> Result<Config, String> {
    match path {
        Some(path) => Config::load_from_explicit(path).map_err(|e| e.to_string()),
        None => match Config::load() {
            Ok(c) => Ok(c),
            Err(e) => {
                eprintln!("Warning: Failed to load config file: {}", e);
                eprintln!("Using default settings.\n");
                Ok(Config::default())
            }
        },
    }
}

fn run_record(args: RecordArgs) -> Result<(), String> {
    let cfg = load_config(args.config.as_deref())?;
    let backend = CaptureBackend::current().ok_or(CaptureError::UnsupportedPlatform.to_string())?;

    // Merge settings: CLI args > config file > built-in defaults
    let audio_enabled = !args.no_audio && cfg.audio.enabled;
    let preview_enabled = !args.no_preview && cfg.preview.enabled;
    let stabilize_enabled = !args.no_stabilize && cfg.stabilizer.enabled;

    let tool = cfg.tool_backend();
    let program = tool.resolve_program().map_err(|e| e.to_string())?;

    let missing = permissions::verify_permissions(&program, true, audio_enabled);
    if !missing.is_empty() {
        permissions::print_permission_errors(&missing);
        return Err("Required permissions were not granted".to_string());
    }

    let [cfg_width, cfg_height] = cfg.camera.resolution;
    let mut camera = CameraCapture::new()
        .with_resolution(args.resolution.unwrap_or((cfg_width, cfg_height)))
        .with_framerate(args.framerate.unwrap_or(cfg.camera.framerate))
        .with_hardware_stabilization(cfg.camera.hardware_stabilization && !args.no_hw_stabilization);
    if let Some(device) = args.camera.or_else(|| cfg.camera.device.clone()) {
        camera = camera.with_device(device);
    }

    let microphone = if audio_enabled {
        match args.mic.or_else(|| cfg.audio.device.clone()) {
            Some(device) => MicrophoneCapture::new().with_device(device),
            None => MicrophoneCapture::new(),
        }
    } else {
        MicrophoneCapture::disabled()
    };

    let capture = CaptureConfig::resolve(program, backend, camera, &microphone)
        .map_err(|e| e.to_string())?;

    let store = cfg.media_store();
    let mut settings = cfg.stabilizer_settings();
    if args.no_watermark {
        settings.filter.watermark = None;
    }

    setup_ctrlc_handler().map_err(|e| format!("Failed to install Ctrl+C handler: {}", e))?;

    let (main_handle, looper) = main_thread();
    let stabilizer = stabilize_enabled.then(|| {
        Stabilizer::spawn(
            store.clone(),
            Box::new(FfmpegRunner::new(tool)),
            settings,
            main_handle,
        )
    });

    let options = ScreenOptions {
        preview_player: preview_enabled.then(|| cfg.preview.player.clone()),
        relative_path: cfg.gallery.relative_path.clone(),
    };
    let mut screen = CameraScreen::open(capture, options, store).map_err(|e| e.to_string())?;

    print_controls(stabilize_enabled);
    let (control, commands) = ControlInput::spawn_listener();
    let mut scripted = args.duration.map(DurationLimit::new);
    if scripted.is_some() {
        let _ = control.send(ControlCommand::Toggle);
    }
    // Only the listener keeps the channel open from here on
    drop(control);

    loop {
        if ctrlc_received() {
            break;
        }

        looper.run_pending();

        if let Some(event) = screen.poll() {
            handle_event(event, stabilizer.as_ref());
        }

        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(ControlCommand::Toggle) => match screen.toggle() {
                Ok(event) => handle_event(event, stabilizer.as_ref()),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    if scripted.is_some() {
                        break;
                    }
                }
            },
            Ok(ControlCommand::Quit) => break,
            Ok(ControlCommand::Status) => print_status(&screen, stabilizer.as_ref()),
            Err(RecvTimeoutError::Timeout) => {}
            // stdin closed; keep running until Ctrl+C or --duration
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(POLL_INTERVAL),
        }

        if let Some(limit) = scripted.as_mut() {
            match limit.check(screen.state(), screen.elapsed()) {
                ScriptedStep::Continue => {}
                ScriptedStep::Stop => {
                    if let Ok(event) = screen.stop_recording() {
                        handle_event(event, stabilizer.as_ref());
                    }
                    break;
                }
                ScriptedStep::Finished => break,
            }
        }
    }

    if let Some(event) = screen.close() {
        handle_event(event, stabilizer.as_ref());
    }

    if let Some(stabilizer) = stabilizer {
        let pending = stabilizer.pending_jobs();
        if pending > 0 {
            println!("Waiting for {} stabilization job(s) to finish...", pending);
        }
        stabilizer.shutdown();
    }
    looper.run_pending();

    println!("Camera closed.");
    Ok(())
}

fn handle_event(event: RecordEvent, stabilizer: Option<&Stabilizer>) {
    match event {
        RecordEvent::Start { uri } => {
            println!("● Recording to {} (press Enter to stop)", uri);
        }
        RecordEvent::Finalize { result: Ok(uri) } => {
            println!("Recording saved: {}", uri);
            if let Some(stabilizer) = stabilizer {
                println!("Stabilizing...");
                stabilizer.stabilize(
                    uri,
                    |saved| println!("Stabilized video saved: {}", saved),
                    |message| eprintln!("Stabilization failed: {}", message),
                );
            }
        }
        RecordEvent::Finalize { result: Err(message) } => {
            eprintln!("Recording failed: {}", message);
        }
    }
}

fn print_status(screen: &CameraScreen, stabilizer: Option<&Stabilizer>) {
    match (screen.state(), screen.elapsed()) {
        (RecordState::Recording, Some(elapsed)) => {
            println!("Recording ({:.0}s)", elapsed.as_secs_f64())
        }
        _ => println!("Idle"),
    }
    if let Some(stabilizer) = stabilizer {
        println!("Stabilization jobs pending: {}", stabilizer.pending_jobs());
    }
}

fn print_controls(stabilize: bool) {
    println!();
    println!("┌─────────────────────────────────────────┐");
    println!("│  stabcam                                │");
    println!("├─────────────────────────────────────────┤");
    println!("│    Enter   Start / stop recording       │");
    println!("│    s       Show status                  │");
    println!("│    q       Quit                         │");
    println!("│    Ctrl+C  Quit                         │");
    println!("└─────────────────────────────────────────┘");
    if !stabilize {
        println!("Stabilization is off; recordings are kept as captured.");
    }
    println!();
}

fn run_stabilize(file: &Path, no_watermark: bool, config: Option<&Path>) -> Result<(), String> {
    let cfg = load_config(config)?;
    let store = cfg.media_store();
    let mut settings = cfg.stabilizer_settings();
    if no_watermark {
        settings.filter.watermark = None;
    }

    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| format!("Not a file: {}", file.display()))?;
    let values = ContentValues::new(name.clone(), mime_type_for(&name))
        .with_relative_path(cfg.gallery.relative_path.clone());
    let source = store.save_file(file, values).map_err(|e| e.to_string())?;
    println!("Imported {} as {}", file.display(), source);

    println!("Stabilizing...");
    let runner = FfmpegRunner::new(cfg.tool_backend()).interruptible();
    let saved = Stabilizer::stabilize_blocking(&store, &runner, &settings, &source)
        .map_err(|e| e.to_string())?;
    println!("Stabilized video saved: {}", saved);
    Ok(())
}

fn run_list_devices(video: bool, audio: bool, config: Option<&Path>) -> Result<(), String> {
    let backend = CaptureBackend::current().ok_or(CaptureError::UnsupportedPlatform.to_string())?;
    let cfg = load_config(config)?;
    let program = cfg.tool_backend().resolve_program().map_err(|e| e.to_string())?;
    let device_list = devices::list_devices(backend, &program).map_err(|e| e.to_string())?;
    println!("Capture backend: {}\n", backend.name());
    devices::print_devices(&device_list, video, audio);
    Ok(())
}

fn run_gallery_list(json: bool, config: Option<&Path>) -> Result<(), String> {
    let cfg = load_config(config)?;
    let store: MediaStore = cfg.media_store();
    let entries = store.list().map_err(|e| e.to_string())?;

    if json {
        let out = serde_json::to_string_pretty(&entries).map_err(|e| e.to_string())?;
        println!("{}", out);
        return Ok(());
    }

    println!("Gallery: {}", store.root().display());
    if entries.is_empty() {
        println!("  (no videos)");
        return Ok(());
    }
    for entry in &entries {
        println!(
            "  {:<32} {:>10}  {}",
            entry.display_name,
            format_size(entry.size_bytes),
            entry.uri
        );
    }
    let total = store.total_size_bytes().map_err(|e| e.to_string())?;
    println!("\n{} video(s), {}", entries.len(), format_size(total));
    Ok(())
}

/// Format bytes as human-readable string (KB, MB, GB)
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Load .env so RUST_LOG and STABCAM_FFMPEG can live there.
/// Does not override existing environment variables.
fn load_env() {
    // dotenv::dotenv() returns Err if .env doesn't exist, which is fine
    let _ = dotenv::dotenv();
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    load_env();
    init_logging();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Record {
            camera,
            mic,
            no_audio,
            no_preview,
            resolution,
            framerate,
            duration,
            no_stabilize,
            no_watermark,
            no_hw_stabilization,
            config,
        }) => run_record(RecordArgs {
            camera,
            mic,
            no_audio,
            no_preview,
            resolution,
            framerate,
            duration,
            no_stabilize,
            no_watermark,
            no_hw_stabilization,
            config,
        }),
        Some(Commands::Stabilize {
            file,
            no_watermark,
            config,
        }) => run_stabilize(&file, no_watermark, config.as_deref()),
        Some(Commands::ListDevices {
            video,
            audio,
            config,
        }) => run_list_devices(video, audio, config.as_deref()),
        Some(Commands::Gallery {
            action: GalleryAction::List { json, config },
        }) => run_gallery_list(json, config.as_deref()),
        None => {
            println!("stabcam - record camera video and stabilize it");
            println!();
            println!("Run 'stabcam --help' for usage information.");
            println!("Run 'stabcam record' to open the camera.");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_limit_stops_at_limit() {
        let mut limit = DurationLimit::new(Duration::from_secs(5));
        assert_eq!(limit.check(RecordState::Idle, None), ScriptedStep::Continue);
        assert_eq!(
            limit.check(RecordState::Recording, Some(Duration::from_secs(1))),
            ScriptedStep::Continue
        );
        assert_eq!(
            limit.check(RecordState::Recording, Some(Duration::from_secs(5))),
            ScriptedStep::Stop
        );
    }

    #[test]
    fn test_duration_limit_finishes_when_capture_ends_early() {
        let mut limit = DurationLimit::new(Duration::from_secs(60));
        assert_eq!(
            limit.check(RecordState::Recording, Some(Duration::from_millis(200))),
            ScriptedStep::Continue
        );
        // Capture exited by itself and the session went back to idle
        assert_eq!(limit.check(RecordState::Idle, None), ScriptedStep::Finished);
    }

    #[test]
    fn test_duration_limit_waits_for_first_start() {
        let mut limit = DurationLimit::new(Duration::from_secs(1));
        for _ in 0..3 {
            assert_eq!(limit.check(RecordState::Idle, None), ScriptedStep::Continue);
        }
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("1920x1080"), Ok((1920, 1080)));
        assert!(parse_resolution("1920").is_err());
        assert!(parse_resolution("0x720").is_err());
        assert!(parse_resolution("8000x720").is_err());
        assert!(parse_resolution("axb").is_err());
    }

    #[test]
    fn test_parse_framerate() {
        assert_eq!(parse_framerate("30"), Ok(30));
        assert!(parse_framerate("0").is_err());
        assert!(parse_framerate("121").is_err());
        assert!(parse_framerate("fast").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10"), Ok(Duration::from_secs(10)));
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("-1").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_record_args() {
        let cli = Cli::parse_from([
            "stabcam",
            "record",
            "--no-preview",
            "--duration",
            "5",
            "--resolution",
            "640x480",
            "--no-watermark",
        ]);
        match cli.command {
            Some(Commands::Record {
                no_preview,
                duration,
                resolution,
                no_watermark,
                no_stabilize,
                ..
            }) => {
                assert!(no_preview);
                assert_eq!(duration, Some(Duration::from_secs(5)));
                assert_eq!(resolution, Some((640, 480)));
                assert!(no_watermark);
                assert!(!no_stabilize);
            }
            _ => panic!("expected record command"),
        }
    }

    #[test]
    fn test_stabilize_requires_file() {
        assert!(Cli::try_parse_from(["stabcam", "stabilize"]).is_err());
        let cli = Cli::try_parse_from(["stabcam", "stabilize", "clip.mp4"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Stabilize { ref file, .. }) if file == Path::new("clip.mp4")
        ));
    }

    #[test]
    fn test_gallery_list_json_flag() {
        let cli = Cli::parse_from(["stabcam", "gallery", "list", "--json"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Gallery {
                action: GalleryAction::List { json: true, .. }
            })
        ));
    }
}
