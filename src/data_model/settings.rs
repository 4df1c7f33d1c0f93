use crate::config::{CheckerId, HttpMethod};
use crate::logging::LogSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub data_dir: PathBuf,
    pub log: LogSettings,
    pub command: AppCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppCommand {
    Run(RunSettings),
    Checkers,
    Checks {
        id: CheckerId,
        since: Option<Duration>,
    },
}

/// Checkers to create and start for one `run` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub targets: Vec<String>,
    pub method: HttpMethod,
    pub allow_redirects: bool,
    pub timeout: Duration,
    pub interval: Duration,
    /// `None` runs until the process is killed.
    pub run_for: Option<Duration>,
}
