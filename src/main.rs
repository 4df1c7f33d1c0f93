use pulsecheck::common::time::{Clock, SystemClock};
use pulsecheck::data_model::settings::{AppCommand, RunSettings};
use pulsecheck::engine::{Engine, EngineError, definition_key, persisted_records, read_history};
use pulsecheck::logging::init_tracing;
use pulsecheck::metrics::{CheckSummary, summarize};
use pulsecheck::probe::Check;
use pulsecheck::probe_engine::curl_prober_factory;
use pulsecheck::settings::load_from_cli;
use pulsecheck::storage::FileStore;
use serde::Serialize;
use std::io::{Error, ErrorKind};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{error, info};

fn main() -> std::io::Result<()> {
    let settings =
        load_from_cli().map_err(|err| Error::new(ErrorKind::InvalidInput, err.to_string()))?;
    init_tracing(&settings.log).map_err(Error::other)?;

    std::fs::create_dir_all(&settings.data_dir)?;
    let store = match FileStore::open(&settings.data_dir) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(path = %settings.data_dir.display(), error = %err, "failed to open store");
            return Err(Error::other(err));
        }
    };

    match settings.command {
        AppCommand::Run(run) => run_checkers(store, run),
        AppCommand::Checkers => print_json(&persisted_records(&store)),
        AppCommand::Checks { id, since } => {
            if !store.contains(&definition_key(id)) {
                return Err(Error::new(
                    ErrorKind::NotFound,
                    EngineError::NotFound(id).to_string(),
                ));
            }
            let since = since.map_or(UNIX_EPOCH, |window| SystemClock.window_start(window));
            let checks = read_history(&store, id, since).map_err(Error::other)?;
            let summary = summarize(&checks);
            print_json(&ChecksReport {
                id: id.to_string(),
                checks: &checks,
                summary: &summary,
            })
        }
    }
}

#[derive(Serialize)]
struct ChecksReport<'a> {
    id: String,
    checks: &'a [Check],
    summary: &'a CheckSummary,
}

fn run_checkers(store: Arc<FileStore>, run: RunSettings) -> std::io::Result<()> {
    let engine = Engine::open(store, curl_prober_factory());

    for target in &run.targets {
        engine
            .ensure_running(
                target,
                run.method.as_str(),
                run.allow_redirects,
                run.timeout,
                run.interval,
            )
            .map_err(|err| match err {
                invalid @ EngineError::Config(_) => {
                    Error::new(ErrorKind::InvalidInput, invalid.to_string())
                }
                other => Error::other(other),
            })?;
    }

    let active = engine
        .list_checkers()
        .iter()
        .filter(|record| record.active)
        .count();
    info!(active, "checkers running");

    match run.run_for {
        Some(run_for) => {
            thread::sleep(run_for);
            engine.shutdown();
            info!("shutdown complete");
        }
        None => loop {
            thread::sleep(Duration::from_secs(3600));
        },
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> std::io::Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(Error::other)?;
    println!("{text}");
    Ok(())
}
