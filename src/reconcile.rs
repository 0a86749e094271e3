//! The polling loop: refresh the schedule when stale, scan the watch
//! directory, upload matched recordings and move them out of the way.

use crate::matcher::{self, NoMatch};
use crate::schedule::{Event, ScheduleSource, ScheduleStore};
use crate::storage::{self, RecordingFile};
use crate::upload::{UploadOutcome, Uploader};
use anyhow::Result;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

const STOP_POLL: Duration = Duration::from_millis(250);

/// What happened to one file during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Skipped(NoMatch),
    Uploaded { talk_id: u64, target: PathBuf },
    UploadFailed { talk_id: u64, outcome: UploadOutcome },
    /// Accepted remotely but still in the watch dir. Later cycles retry
    /// only the move for as long as the file is unchanged.
    MoveFailed { talk_id: u64, error: String },
}

#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub files: Vec<(RecordingFile, FileOutcome)>,
}

impl CycleReport {
    pub fn uploaded(&self) -> usize {
        self.count(|outcome| matches!(outcome, FileOutcome::Uploaded { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, FileOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| {
            matches!(
                outcome,
                FileOutcome::UploadFailed { .. } | FileOutcome::MoveFailed { .. }
            )
        })
    }

    pub fn outcome_for(&self, name: &str) -> Option<&FileOutcome> {
        self.files
            .iter()
            .find(|(file, _)| file.name == name)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|(_, outcome)| pred(outcome)).count()
    }
}

#[derive(Debug, Clone)]
pub struct LoopTiming {
    pub cycle_interval: Duration,
    pub schedule_max_age: Duration,
}

/// Size and modification time; a changed file is treated as new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Accepted {
    talk_id: u64,
    fingerprint: Fingerprint,
}

pub struct Reconciler<S, U> {
    schedule: ScheduleStore<S>,
    uploader: U,
    watch_dir: PathBuf,
    finished_dir: PathBuf,
    timing: LoopTiming,
    /// Uploads that were accepted but whose file could not be moved yet.
    pending_moves: HashMap<PathBuf, Accepted>,
}

impl<S, U> Reconciler<S, U>
where
    S: ScheduleSource,
    U: Uploader,
{
    pub fn new(
        schedule: ScheduleStore<S>,
        uploader: U,
        watch_dir: PathBuf,
        finished_dir: PathBuf,
        timing: LoopTiming,
    ) -> Self {
        Self {
            schedule,
            uploader,
            watch_dir,
            finished_dir,
            timing,
            pending_moves: HashMap::new(),
        }
    }

    pub fn schedule(&self) -> &ScheduleStore<S> {
        &self.schedule
    }

    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    /// Runs cycles until `stop` returns true. An upload in flight is always
    /// completed; the stop check happens between files and while sleeping.
    pub fn run(&mut self, stop: impl Fn() -> bool) {
        while !stop() {
            match self.cycle(&stop) {
                Ok(report) => tracing::info!(
                    uploaded = report.uploaded(),
                    skipped = report.skipped(),
                    failed = report.failed(),
                    "cycle finished"
                ),
                Err(err) => tracing::error!(error = %format!("{err:#}"), "cycle aborted"),
            }
            if stop() {
                break;
            }
            tracing::info!(
                seconds = self.timing.cycle_interval.as_secs_f64(),
                "sleeping until next scan"
            );
            sleep_unless_stopped(self.timing.cycle_interval, &stop);
        }
        tracing::info!("stop requested, good night");
    }

    /// One pass over the watch directory.
    pub fn run_cycle(&mut self) -> Result<CycleReport> {
        self.cycle(&|| false)
    }

    fn cycle(&mut self, stop: &impl Fn() -> bool) -> Result<CycleReport> {
        if self.schedule.is_stale(self.timing.schedule_max_age) {
            tracing::info!("schedule is stale, downloading again");
            if let Err(err) = self.schedule.refresh() {
                tracing::warn!(
                    error = %format!("{err:#}"),
                    "schedule refresh failed, keeping previous schedule"
                );
            }
        }
        let snapshot = self.schedule.current();

        let files = storage::list_recordings(&self.watch_dir)?;
        self.pending_moves
            .retain(|path, _| files.iter().any(|file| &file.path == path));

        let mut report = CycleReport::default();
        for file in files {
            if stop() {
                tracing::info!("stop requested, leaving remaining files for later");
                break;
            }
            tracing::info!(file = %file.name, "found file in recordings folder");
            if let Some(accepted) = self.already_accepted(&file) {
                tracing::info!(
                    file = %file.name,
                    talk_id = accepted.talk_id,
                    "upload already accepted, retrying the move only"
                );
                let outcome = self.relocate(&file, accepted);
                report.files.push((file, outcome));
                continue;
            }
            let outcome = match matcher::match_file(&file.name, &snapshot) {
                Err(reason) => {
                    tracing::info!(
                        file = %file.name,
                        reason = %reason,
                        "no matching talk, skipping"
                    );
                    FileOutcome::Skipped(reason)
                }
                Ok(event) => self.deliver(&file, event),
            };
            report.files.push((file, outcome));
        }
        Ok(report)
    }

    fn already_accepted(&mut self, file: &RecordingFile) -> Option<Accepted> {
        let accepted = *self.pending_moves.get(&file.path)?;
        if Fingerprint::of(&file.path) == Some(accepted.fingerprint) {
            return Some(accepted);
        }
        tracing::info!(file = %file.name, "file changed since its upload, sending it again");
        self.pending_moves.remove(&file.path);
        None
    }

    fn deliver(&mut self, file: &RecordingFile, event: &Event) -> FileOutcome {
        let talk_id = event.id;
        let fingerprint = Fingerprint::of(&file.path);
        let outcome = self.uploader.upload(file, event);
        if !outcome.succeeded() {
            tracing::warn!(
                file = %file.name,
                talk_id,
                outcome = %outcome,
                "upload failed, will retry on the next cycle"
            );
            return FileOutcome::UploadFailed { talk_id, outcome };
        }
        match fingerprint {
            Some(fingerprint) => self.relocate(
                file,
                Accepted {
                    talk_id,
                    fingerprint,
                },
            ),
            None => self.relocate_untracked(file, talk_id),
        }
    }

    fn relocate(&mut self, file: &RecordingFile, accepted: Accepted) -> FileOutcome {
        let outcome = self.relocate_untracked(file, accepted.talk_id);
        if matches!(outcome, FileOutcome::MoveFailed { .. }) {
            self.pending_moves.insert(file.path.clone(), accepted);
        } else {
            self.pending_moves.remove(&file.path);
        }
        outcome
    }

    fn relocate_untracked(&self, file: &RecordingFile, talk_id: u64) -> FileOutcome {
        match storage::relocate(file, &self.finished_dir) {
            Ok(target) => {
                tracing::info!(
                    file = %file.name,
                    target = %target.display(),
                    "uploaded, moved to finished folder"
                );
                FileOutcome::Uploaded { talk_id, target }
            }
            Err(err) => {
                let error = format!("{err:#}");
                tracing::error!(
                    file = %file.name,
                    talk_id,
                    error = %error,
                    "uploaded but could not move file"
                );
                FileOutcome::MoveFailed { talk_id, error }
            }
        }
    }
}

fn sleep_unless_stopped(total: Duration, stop: &impl Fn() -> bool) {
    let deadline = Instant::now() + total;
    loop {
        let now = Instant::now();
        if now >= deadline || stop() {
            return;
        }
        thread::sleep(STOP_POLL.min(deadline - now));
    }
}
