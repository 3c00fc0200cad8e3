use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;

use voice2eye_stream::backend::BackendClient;
use voice2eye_stream::config::{self, ClientSettings};
use voice2eye_stream::streaming::{
    ConnectionState, GestureResult, GestureSession, MediaKind, SpeechResult, SpeechSession,
    StreamingSession,
};

mod cli;

use cli::{Cli, Command, ConfigArgs, HealthArgs, ListenArgs, MediaArg, SendFramesArgs};

const EXIT_SUCCESS: i32 = 0;
const EXIT_USAGE_ERROR: i32 = 2;
const EXIT_CONNECTION_ERROR: i32 = 3;
const EXIT_BACKEND_ERROR: i32 = 4;

#[tokio::main]
async fn main() {
    // Load .env file if present (for development convenience)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    let (settings_path, settings) = resolve_settings(&cli);

    let exit_code = match cli.command {
        Command::Health(args) => health(args, &settings).await,
        Command::Status => status(&settings).await,
        Command::Vocabulary => vocabulary(&settings).await,
        Command::Listen(args) => listen(args, &settings).await,
        Command::SendFrames(args) => send_frames(args, &settings).await,
        Command::Config(args) => show_config(args, settings_path, &settings),
    };

    std::process::exit(exit_code);
}

fn resolve_settings(cli: &Cli) -> (Option<PathBuf>, ClientSettings) {
    let path = match &cli.settings {
        Some(path) => Some(path.clone()),
        None => match config::default_settings_path() {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("{}; using built-in defaults", e);
                None
            }
        },
    };

    let mut settings = path
        .as_deref()
        .map(config::load_settings)
        .unwrap_or_default();
    settings.apply_env_overrides();
    if let Some(url) = &cli.api_url {
        settings.override_base_url(url);
    }

    log::info!("Backend: {}", settings.base_url());
    (path, settings)
}

fn backend(settings: &ClientSettings) -> Result<BackendClient, i32> {
    BackendClient::from_settings(settings).map_err(|e| {
        eprintln!("Error: {}", e);
        EXIT_BACKEND_ERROR
    })
}

async fn health(args: HealthArgs, settings: &ClientSettings) -> i32 {
    let client = match backend(settings) {
        Ok(client) => client,
        Err(code) => return code,
    };

    if let Some(service) = args.service {
        return match client.service_health(&service).await {
            Ok(health) => {
                println!(
                    "{}: {}{}",
                    health.service,
                    health.status,
                    health.details.map(|d| format!(" ({})", d)).unwrap_or_default()
                );
                EXIT_SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                EXIT_BACKEND_ERROR
            }
        };
    }

    match client.health().await {
        Ok(report) => {
            println!("{} at {}", report.status, client.base_url());
            if let Some(message) = &report.message {
                println!("{}", message);
            }
            let mut services: Vec<_> = report.services.iter().collect();
            services.sort();
            for (name, state) in services {
                println!("  {:<10} {}", name, state);
            }
            if report.is_healthy() && report.degraded_services().is_empty() {
                EXIT_SUCCESS
            } else {
                EXIT_BACKEND_ERROR
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_BACKEND_ERROR
        }
    }
}

async fn status(settings: &ClientSettings) -> i32 {
    let client = match backend(settings) {
        Ok(client) => client,
        Err(code) => return code,
    };

    match tokio::try_join!(client.speech_status(), client.gesture_status()) {
        Ok((speech, gesture)) => {
            println!(
                "speech:  {} (model loaded: {}, requests: {})",
                speech.status, speech.model_loaded, speech.total_requests
            );
            println!(
                "gesture: {} (camera: {}, detections: {})",
                gesture.status, gesture.camera_available, gesture.total_detections
            );
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_BACKEND_ERROR
        }
    }
}

async fn vocabulary(settings: &ClientSettings) -> i32 {
    let client = match backend(settings) {
        Ok(client) => client,
        Err(code) => return code,
    };

    match client.gesture_vocabulary().await {
        Ok(vocabulary) => {
            for (name, gesture) in &vocabulary.gestures {
                println!(
                    "{:<14} {}{}",
                    name,
                    gesture.description,
                    if gesture.emergency { "  [EMERGENCY]" } else { "" }
                );
            }
            println!(
                "{} gestures, confidence threshold {:.2}",
                vocabulary.gestures.len(),
                vocabulary.confidence_threshold
            );
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_BACKEND_ERROR
        }
    }
}

fn show_config(args: ConfigArgs, path: Option<PathBuf>, settings: &ClientSettings) -> i32 {
    match serde_json::to_string_pretty(settings) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_USAGE_ERROR;
        }
    }

    if args.write {
        let Some(path) = path else {
            eprintln!("Error: no settings path; pass --settings");
            return EXIT_USAGE_ERROR;
        };
        if let Err(e) = config::save_settings(&path, settings) {
            eprintln!("Error: {}", e);
            return EXIT_USAGE_ERROR;
        }
        eprintln!("Wrote {}", path.display());
    }
    EXIT_SUCCESS
}

// ============================================================================
// Streaming commands
// ============================================================================

async fn listen(args: ListenArgs, settings: &ClientSettings) -> i32 {
    let deadline = args.duration.map(Duration::from_secs);
    match args.media {
        MediaArg::Speech => {
            let session = match speech_session(settings, args.capture) {
                Ok(session) => session,
                Err(message) => {
                    eprintln!("Error: {}", message);
                    return EXIT_USAGE_ERROR;
                }
            };
            let json = args.json;
            session.on_result(move |result| print_speech(&result, json));
            run_until_stopped(session, settings, deadline).await
        }
        MediaArg::Gesture => {
            if args.capture {
                eprintln!("Error: --capture only applies to speech");
                return EXIT_USAGE_ERROR;
            }
            let session = GestureSession::from_settings(settings);
            let json = args.json;
            session.on_result(move |result| print_gesture(&result, json));
            run_until_stopped(session, settings, deadline).await
        }
    }
}

#[cfg(feature = "device-capture")]
fn speech_session(settings: &ClientSettings, capture: bool) -> Result<SpeechSession, String> {
    use std::sync::Arc;
    use voice2eye_stream::capture::CpalAudioSource;
    use voice2eye_stream::streaming::{SessionOptions, Speech, WsConnector};

    if !capture {
        return Ok(SpeechSession::from_settings(settings));
    }

    // The microphone source emits WAV chunks
    let mut options = SessionOptions::from_settings::<Speech>(settings);
    options.formats.audio.format = "wav".to_string();
    Ok(SpeechSession::with_audio_source(
        options,
        Arc::new(WsConnector::new()),
        Box::new(CpalAudioSource::new()),
    ))
}

#[cfg(not(feature = "device-capture"))]
fn speech_session(settings: &ClientSettings, capture: bool) -> Result<SpeechSession, String> {
    if capture {
        return Err("this build has no microphone support (enable the device-capture feature)".to_string());
    }
    Ok(SpeechSession::from_settings(settings))
}

/// Print connection changes, errors and reconnect notices to stderr
fn report_progress<M: MediaKind>(session: &StreamingSession<M>) {
    session.on_status_change(|state| eprintln!("[{}] {}", M::NAME, state));
    session.on_error(|error| eprintln!("[{}] error: {}", M::NAME, error));
    session.on_reconnect(|notice| {
        eprintln!(
            "[{}] reconnecting in {:.1}s (attempt {}/{})",
            M::NAME,
            notice.delay.as_secs_f32(),
            notice.attempt,
            notice.max_attempts
        )
    });
}

/// Connect, stream, and keep running until Ctrl-C, the deadline, or retries run out
async fn run_until_stopped<M: MediaKind>(
    session: StreamingSession<M>,
    settings: &ClientSettings,
    deadline: Option<Duration>,
) -> i32 {
    report_progress(&session);

    let mut status = session.subscribe_status();
    if session.connect().await {
        if let Err(e) = session.start_streaming().await {
            eprintln!("Error: {}", e);
            session.disconnect().await;
            return EXIT_USAGE_ERROR;
        }
    }

    let max_attempts = settings.reconnect.max_attempts;
    let stop_at = tokio::time::sleep(deadline.unwrap_or(Duration::MAX));
    tokio::pin!(stop_at);

    let exit_code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted");
                break EXIT_SUCCESS;
            }
            _ = &mut stop_at, if deadline.is_some() => break EXIT_SUCCESS,
            changed = status.changed() => {
                if changed.is_err() {
                    break EXIT_CONNECTION_ERROR;
                }
                let snapshot = status.borrow_and_update().clone();
                match snapshot.connection_state {
                    ConnectionState::Connected if !snapshot.is_streaming => {
                        if let Err(e) = session.start_streaming().await {
                            eprintln!("Error: {}", e);
                            break EXIT_USAGE_ERROR;
                        }
                    }
                    ConnectionState::Disconnected
                        if snapshot.reconnect_attempts >= max_attempts =>
                    {
                        break EXIT_CONNECTION_ERROR;
                    }
                    _ => {}
                }
            }
        }
    };

    session.disconnect().await;
    exit_code
}

async fn send_frames(args: SendFramesArgs, settings: &ClientSettings) -> i32 {
    let session = GestureSession::from_settings(settings);
    report_progress(&session);
    let json = args.json;
    session.on_result(move |result| print_gesture(&result, json));

    if !session.connect().await {
        eprintln!("Initial connection failed; frames will wait for a retry");
    }

    for path in &args.files {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Error: cannot read {}: {}", path.display(), e);
                session.disconnect().await;
                return EXIT_USAGE_ERROR;
            }
        };
        log::info!("Sending {} ({} bytes)", path.display(), bytes.len());
        if !session.send_frame(bytes).await {
            log::debug!("{} frame(s) waiting", session.pending_frames().await);
        }
        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    tokio::time::sleep(Duration::from_millis(args.linger_ms)).await;

    let pending = session.pending_frames().await;
    session.disconnect().await;
    if pending > 0 {
        eprintln!("{} frame(s) were never delivered", pending);
        return EXIT_CONNECTION_ERROR;
    }
    EXIT_SUCCESS
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => log::warn!("Failed to serialize result: {}", e),
    }
}

fn print_speech(result: &SpeechResult, json: bool) {
    if json {
        return print_json(result);
    }
    println!(
        "{}{} ({:.0}%){}",
        if result.partial { "(partial) " } else { "" },
        result.text,
        result.confidence * 100.0,
        if result.is_emergency { "  [EMERGENCY]" } else { "" }
    );
}

fn print_gesture(result: &GestureResult, json: bool) {
    if json {
        return print_json(result);
    }
    let hand = result
        .handedness
        .as_deref()
        .map(|h| format!(" {}", h))
        .unwrap_or_default();
    println!(
        "{}{} ({:.0}%){}",
        result.gesture_type,
        hand,
        result.confidence * 100.0,
        if result.is_emergency { "  [EMERGENCY]" } else { "" }
    );
}
