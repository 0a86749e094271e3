//! Multipart upload of one recording plus its talk metadata.

use crate::config::{Config, Credentials};
use crate::schedule::Event;
use crate::storage::RecordingFile;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted { status: u16 },
    Rejected { status: u16, body: String },
    Transport(String),
    /// The recording could not be opened or measured.
    Unreadable(String),
}

impl UploadOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, UploadOutcome::Accepted { .. })
    }
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadOutcome::Accepted { status } => write!(f, "accepted ({status})"),
            UploadOutcome::Rejected { status, body } => {
                write!(f, "rejected with status {status}: {body}")
            }
            UploadOutcome::Transport(err) => write!(f, "transport error: {err}"),
            UploadOutcome::Unreadable(err) => write!(f, "file unreadable: {err}"),
        }
    }
}

/// Sends one recording to the processing service. Never fails past this
/// boundary: every error ends up in the returned outcome.
pub trait Uploader {
    fn upload(&self, file: &RecordingFile, event: &Event) -> UploadOutcome;
}

/// Wraps a reader and reports `(bytes read, total)` each time the whole
/// percentage changes.
pub struct ProgressReader<R, F> {
    inner: R,
    sent: u64,
    total: u64,
    last_pct: Option<u8>,
    on_progress: F,
}

impl<R, F> ProgressReader<R, F>
where
    R: Read,
    F: FnMut(u64, u64),
{
    pub fn new(inner: R, total: u64, on_progress: F) -> Self {
        Self {
            inner,
            sent: 0,
            total,
            last_pct: None,
            on_progress,
        }
    }
}

impl<R, F> Read for ProgressReader<R, F>
where
    R: Read,
    F: FnMut(u64, u64),
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.sent += read as u64;
        let pct = if self.total == 0 {
            100
        } else {
            ((self.sent as f64 / self.total as f64) * 100.0).floor().min(100.0) as u8
        };
        if self.last_pct != Some(pct) {
            (self.on_progress)(self.sent, self.total);
            self.last_pct = Some(pct);
        }
        Ok(read)
    }
}

pub struct AuphonicUploader {
    client: Client,
    endpoint: String,
    credentials: Credentials,
    preset: Option<String>,
    show_progress: bool,
}

impl AuphonicUploader {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .timeout(config.upload_timeout)
            .build()
            .context("build upload http client")?;
        Ok(Self {
            client,
            endpoint: config.upload_endpoint.clone(),
            credentials: config.credentials.clone(),
            preset: config.preset.clone(),
            show_progress: config.show_progress,
        })
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        credentials: Credentials,
        preset: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build upload http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            credentials,
            preset,
            show_progress: false,
        })
    }

    fn progress_bar(&self, name: &str, total: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::with_template(
                "uploading {msg}: {percent}% ({bytes}/{total_bytes}, {bytes_per_sec}, {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_message(name.to_string());
        pb
    }

    fn form(&self, file: &RecordingFile, event: &Event, input: Part) -> Form {
        let form = Form::new()
            .text("title", event.title.clone())
            .text("subtitle", event.subtitle.clone())
            .text("artist", event.speaker_names())
            .text("summary", event.summary().to_string())
            .text("action", "start")
            .part("input_file", input.file_name(file.name.clone()));
        match &self.preset {
            Some(preset) => form.text("preset", preset.clone()),
            None => form,
        }
    }
}

impl Uploader for AuphonicUploader {
    fn upload(&self, file: &RecordingFile, event: &Event) -> UploadOutcome {
        tracing::info!(
            talk_id = event.id,
            title = %event.title,
            file = %file.name,
            "creating production"
        );
        let handle = match File::open(&file.path) {
            Ok(handle) => handle,
            Err(err) => {
                return UploadOutcome::Unreadable(format!("open {}: {err}", file.path.display()));
            }
        };
        let total = match handle.metadata() {
            Ok(meta) => meta.len(),
            Err(err) => {
                return UploadOutcome::Unreadable(format!("stat {}: {err}", file.path.display()));
            }
        };

        let pb = self.progress_bar(&file.name, total);
        let reader = ProgressReader::new(handle, total, {
            let pb = pb.clone();
            move |sent, _total| pb.set_position(sent)
        });
        let form = self.form(file, event, Part::reader_with_length(reader, total));

        let result = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.credentials.login, Some(&self.credentials.secret))
            .multipart(form)
            .send();
        pb.finish_and_clear();

        let resp = match result {
            Ok(resp) => resp,
            Err(err) => return UploadOutcome::Transport(format!("{:#}", anyhow::Error::new(err))),
        };
        let status = resp.status();
        if status.is_success() {
            tracing::debug!(status = status.as_u16(), file = %file.name, "upload accepted");
            return UploadOutcome::Accepted {
                status: status.as_u16(),
            };
        }
        let body = resp.text().unwrap_or_default();
        UploadOutcome::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}
