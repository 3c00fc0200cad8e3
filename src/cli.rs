use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "voice2eye-stream",
    version,
    about = "Streaming client for the VOICE2EYE speech and gesture backend",
    long_about = "Open speech or gesture streaming sessions against a VOICE2EYE backend \
                  and print recognition results as they arrive.\n\
                  The backend is chosen by $VOICE2EYE_ENV / $VOICE2EYE_API_URL or --api-url."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Backend base URL, e.g. http://192.168.1.20:8000
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check backend health
    Health(HealthArgs),
    /// Show speech and gesture service status
    Status,
    /// List the gestures the backend recognizes
    Vocabulary,
    /// Open a streaming session and print results until interrupted
    Listen(ListenArgs),
    /// Stream image files as gesture frames
    SendFrames(SendFramesArgs),
    /// Print the resolved settings, optionally writing them to the settings file
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct HealthArgs {
    /// Check a single service (speech, gestures, emergency, storage)
    #[arg(long)]
    pub service: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MediaArg {
    Speech,
    Gesture,
}

#[derive(Args)]
pub struct ListenArgs {
    #[arg(long, value_enum, default_value_t = MediaArg::Speech)]
    pub media: MediaArg,

    /// Record from the default microphone (speech only, needs the device-capture feature)
    #[arg(long)]
    pub capture: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration: Option<u64>,

    /// Print results as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct SendFramesArgs {
    /// Image files to send, in order
    #[arg(required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Delay between frames in milliseconds
    #[arg(long, default_value_t = 200)]
    pub interval_ms: u64,

    /// How long to wait for trailing results after the last frame, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub linger_ms: u64,

    /// Print results as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Write the resolved settings back to the settings file
    #[arg(long)]
    pub write: bool,
}
