use crate::cli::Cli;
use anyhow::{Context, Result, bail};
use directories::BaseDirs;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_UPLOAD_ENDPOINT: &str = "https://auphonic.com/api/simple/productions.json";

/// Tunables read from `~/.config/auphonic-upload.yaml`. Command line flags win.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub cycle_interval_secs: u64,
    pub schedule_max_age_secs: u64,
    pub request_timeout_secs: u64,
    pub upload_timeout_secs: u64,
    pub upload_endpoint: String,
    pub preset: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 30,
            schedule_max_age_secs: 600,
            request_timeout_secs: 30,
            upload_timeout_secs: 4 * 60 * 60,
            upload_endpoint: DEFAULT_UPLOAD_ENDPOINT.to_string(),
            preset: None,
        }
    }
}

/// The optional, read-only settings file. Absent means all defaults.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn locate() -> Result<Self> {
        let base = BaseDirs::new().context("unable to resolve home directory")?;
        let path = base.home_dir().join(".config").join("auphonic-upload.yaml");
        Ok(Self { path })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read settings {}", self.path.display()))?;
        // an empty file parses as null; treat it like an absent one
        if contents.trim().is_empty() {
            return Ok(Settings::default());
        }
        serde_yaml::from_str(&contents)
            .with_context(|| format!("parse settings {}", self.path.display()))
    }
}

/// HTTP basic auth pair for the upload API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub secret: String,
}

impl Credentials {
    /// Parses `login:secret`. Only the first colon separates, the secret may contain more.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (login, secret) = raw
            .split_once(':')
            .context("credentials must have the form login:secret")?;
        if login.is_empty() {
            bail!("credentials have an empty login");
        }
        Ok(Self {
            login: login.to_string(),
            secret: secret.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read login file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parse login file {}", path.display()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("secret", &"***")
            .finish()
    }
}

/// Everything the running loop needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub schedule_url: String,
    pub watch_dir: PathBuf,
    pub finished_dir: PathBuf,
    pub credentials: Credentials,
    pub preset: Option<String>,
    pub upload_endpoint: String,
    pub cycle_interval: Duration,
    pub schedule_max_age: Duration,
    pub request_timeout: Duration,
    pub upload_timeout: Duration,
    pub show_progress: bool,
}

impl Config {
    pub fn resolve(cli: &Cli, settings: Settings) -> Result<Self> {
        let login_path = match &cli.auphonic_login {
            Some(path) => path.clone(),
            None => default_login_path()?,
        };
        let credentials = Credentials::from_file(&login_path)?;
        Ok(Self::from_parts(cli, settings, credentials))
    }

    pub fn from_parts(cli: &Cli, settings: Settings, credentials: Credentials) -> Self {
        let finished_dir = cli
            .finished
            .clone()
            .unwrap_or_else(|| cli.recordings.join("finished"));
        Self {
            schedule_url: cli.schedule.clone(),
            watch_dir: cli.recordings.clone(),
            finished_dir,
            credentials,
            preset: cli.preset.clone().or(settings.preset),
            upload_endpoint: settings.upload_endpoint,
            cycle_interval: Duration::from_secs(
                cli.interval.unwrap_or(settings.cycle_interval_secs),
            ),
            schedule_max_age: Duration::from_secs(
                cli.max_age.unwrap_or(settings.schedule_max_age_secs),
            ),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            upload_timeout: Duration::from_secs(settings.upload_timeout_secs),
            show_progress: !cli.no_progress,
        }
    }
}

fn default_login_path() -> Result<PathBuf> {
    let base = BaseDirs::new().context("unable to resolve home directory")?;
    Ok(base.home_dir().join(".auphonic-login"))
}
