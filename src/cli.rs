use clap::Parser;
use std::path::PathBuf;

/// Watch a folder for recordings, match them to talks from a schedule and
/// upload them together with the talk metadata to Auphonic.
#[derive(Parser, Debug, Clone)]
#[command(name = "auphonic-upload", version, about)]
pub struct Cli {
    /// URL of the schedule.xml
    #[arg(long)]
    pub schedule: String,
    /// Folder that receives the recording files.
    #[arg(long)]
    pub recordings: PathBuf,
    /// Where uploaded files are moved to. Defaults to `<recordings>/finished`.
    #[arg(long)]
    pub finished: Option<PathBuf>,
    /// File containing `username:password` of the Auphonic account.
    #[arg(long = "auphonic-login")]
    pub auphonic_login: Option<PathBuf>,
    /// UUID of the Auphonic preset applied after uploading.
    #[arg(long = "auphonic-preset")]
    pub preset: Option<String>,
    /// Seconds to sleep between two passes over the recordings folder.
    #[arg(long)]
    pub interval: Option<u64>,
    /// Seconds after which the schedule is downloaded again.
    #[arg(long = "max-age")]
    pub max_age: Option<u64>,
    /// Run a single pass and exit.
    #[arg(long)]
    pub once: bool,
    /// Don't draw the upload progress bar.
    #[arg(long)]
    pub no_progress: bool,
}
