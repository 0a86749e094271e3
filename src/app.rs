use crate::cli::Cli;
use crate::config::{Config, SettingsFile};
use crate::logging;
use crate::reconcile::{LoopTiming, Reconciler};
use crate::schedule::{HttpScheduleSource, ScheduleStore};
use crate::shutdown;
use crate::storage;
use crate::upload::AuphonicUploader;
use anyhow::{Context, Result, bail};
use clap::Parser;

pub fn run() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let settings_file = SettingsFile::locate()?;
    let settings = settings_file.load()?;
    tracing::debug!(path = %settings_file.path().display(), "settings loaded");
    let config = Config::resolve(&cli, settings)?;
    let mut reconciler = build(&config)?;

    if cli.once {
        let report = reconciler.run_cycle()?;
        tracing::info!(
            uploaded = report.uploaded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "single pass finished"
        );
        return Ok(());
    }

    shutdown::install();
    reconciler.run(shutdown::requested);
    Ok(())
}

fn build(config: &Config) -> Result<Reconciler<HttpScheduleSource, AuphonicUploader>> {
    if !config.watch_dir.is_dir() {
        bail!("recordings folder {} does not exist", config.watch_dir.display());
    }
    storage::ensure_dir(&config.finished_dir)?;
    tracing::info!(
        recordings = %config.watch_dir.display(),
        finished = %config.finished_dir.display(),
        schedule = %config.schedule_url,
        preset = config.preset.as_deref().unwrap_or("-"),
        "starting"
    );

    let source = HttpScheduleSource::new(config.schedule_url.clone(), config.request_timeout)?;
    let uploader = AuphonicUploader::new(config).context("set up uploader")?;
    Ok(Reconciler::new(
        ScheduleStore::new(source),
        uploader,
        config.watch_dir.clone(),
        config.finished_dir.clone(),
        LoopTiming {
            cycle_interval: config.cycle_interval,
            schedule_max_age: config.schedule_max_age,
        },
    ))
}
