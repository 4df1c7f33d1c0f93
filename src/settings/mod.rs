use crate::config::{ConfigError, HttpMethod, validate_schedule};
use crate::data_model::settings::{AppCommand, AppSettings, RunSettings};
use crate::logging::{LogSettings, LoggingError};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

const APP_DIR: &str = "pulsecheck";

#[derive(Parser, Debug)]
#[command(name = "pulsecheck")]
#[command(about = "Scheduled HTTP uptime checks with file-backed history", long_about = None)]
pub struct CliArgs {
    /// Directory holding checker definitions and check history
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format: pretty|json
    #[arg(long, default_value = "pretty", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Resume persisted checkers, add the given targets and keep running
    Run {
        /// Target URL to probe (repeatable)
        #[arg(short, long, value_name = "URL")]
        target: Vec<String>,

        /// Request method: GET|POST|PUT|DELETE
        #[arg(long, default_value = "GET")]
        method: String,

        /// Per-probe timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,

        /// Seconds between probes
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,

        /// Do not follow 3xx responses
        #[arg(long)]
        no_redirects: bool,

        /// Stop after this many seconds instead of running forever
        #[arg(long, value_name = "SECS")]
        run_for_secs: Option<u64>,
    },
    /// Print every persisted checker as JSON
    Checkers,
    /// Print a checker's history and its summary as JSON
    Checks {
        /// Checker id
        id: String,

        /// Only include checks from the last N seconds
        #[arg(long, value_name = "SECS")]
        since_secs: Option<u64>,
    },
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("no data directory given and no platform default is available")]
    NoDataDir,
    #[error("invalid checker id {value:?}")]
    InvalidCheckerId { value: String },
    #[error("run duration must be greater than zero")]
    ZeroRunFor,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
}

pub fn load_from_cli() -> Result<AppSettings, SettingsError> {
    let args = CliArgs::parse();
    from_args(args)
}

pub fn from_args(args: CliArgs) -> Result<AppSettings, SettingsError> {
    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => default_data_dir().ok_or(SettingsError::NoDataDir)?,
    };
    let log = LogSettings {
        level: args.log_level,
        format: args.log_format.parse()?,
    };

    let command = match args.command {
        CliCommand::Run {
            target,
            method,
            timeout_secs,
            interval_secs,
            no_redirects,
            run_for_secs,
        } => {
            let timeout = Duration::from_secs(timeout_secs);
            let interval = Duration::from_secs(interval_secs);
            validate_schedule(timeout, interval)?;
            if run_for_secs == Some(0) {
                return Err(SettingsError::ZeroRunFor);
            }
            AppCommand::Run(RunSettings {
                targets: target,
                method: method.parse::<HttpMethod>()?,
                allow_redirects: !no_redirects,
                timeout,
                interval,
                run_for: run_for_secs.map(Duration::from_secs),
            })
        }
        CliCommand::Checkers => AppCommand::Checkers,
        CliCommand::Checks { id, since_secs } => {
            let parsed = Uuid::parse_str(&id)
                .map_err(|_| SettingsError::InvalidCheckerId { value: id })?;
            AppCommand::Checks {
                id: parsed,
                since: since_secs.map(Duration::from_secs),
            }
        }
    };

    Ok(AppSettings {
        data_dir,
        log,
        command,
    })
}

fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join(APP_DIR))
}

#[cfg(test)]
mod tests {
    use super::{CliArgs, SettingsError, from_args};
    use crate::config::{ConfigError, HttpMethod};
    use crate::data_model::settings::AppCommand;
    use crate::logging::LogFormat;
    use clap::Parser;
    use std::path::PathBuf;
    use std::time::Duration;

    fn parse(argv: &[&str]) -> Result<crate::data_model::settings::AppSettings, SettingsError> {
        let mut full = vec!["pulsecheck", "--data-dir", "/tmp/pulse"];
        full.extend_from_slice(argv);
        from_args(CliArgs::try_parse_from(full).expect("clap parse"))
    }

    #[test]
    fn run_defaults() {
        let settings = parse(&["run", "--target", "https://example.com"]).expect("settings");

        assert_eq!(settings.data_dir, PathBuf::from("/tmp/pulse"));
        assert_eq!(settings.log.level, "info");
        assert_eq!(settings.log.format, LogFormat::Pretty);
        let AppCommand::Run(run) = settings.command else {
            panic!("expected run command");
        };
        assert_eq!(run.targets, vec!["https://example.com".to_string()]);
        assert_eq!(run.method, HttpMethod::Get);
        assert!(run.allow_redirects);
        assert_eq!(run.timeout, Duration::from_secs(10));
        assert_eq!(run.interval, Duration::from_secs(30));
        assert_eq!(run.run_for, None);
    }

    #[test]
    fn run_with_overrides() {
        let settings = parse(&[
            "run",
            "-t",
            "http://a.test",
            "-t",
            "http://b.test",
            "--method",
            "POST",
            "--timeout-secs",
            "2",
            "--interval-secs",
            "5",
            "--no-redirects",
            "--run-for-secs",
            "60",
            "--log-format",
            "json",
        ])
        .expect("settings");

        assert_eq!(settings.log.format, LogFormat::Json);
        let AppCommand::Run(run) = settings.command else {
            panic!("expected run command");
        };
        assert_eq!(run.targets.len(), 2);
        assert_eq!(run.method, HttpMethod::Post);
        assert!(!run.allow_redirects);
        assert_eq!(run.run_for, Some(Duration::from_secs(60)));
    }

    #[test]
    fn run_rejects_bad_schedule_and_method() {
        let err = parse(&["run", "-t", "http://a.test", "--interval-secs", "1"])
            .expect_err("interval");
        assert!(matches!(
            err,
            SettingsError::Config(ConfigError::IntervalTooShort { .. })
        ));

        let err = parse(&["run", "-t", "http://a.test", "--method", "get"]).expect_err("method");
        assert!(matches!(
            err,
            SettingsError::Config(ConfigError::UnsupportedMethod { .. })
        ));

        let err = parse(&["run", "-t", "http://a.test", "--run-for-secs", "0"])
            .expect_err("run for");
        assert!(matches!(err, SettingsError::ZeroRunFor));
    }

    #[test]
    fn run_without_targets_only_resumes() {
        let settings = parse(&["run"]).expect("settings");
        let AppCommand::Run(run) = settings.command else {
            panic!("expected run command");
        };
        assert!(run.targets.is_empty());
    }

    #[test]
    fn a_subcommand_is_required() {
        assert!(CliArgs::try_parse_from(["pulsecheck"]).is_err());
    }

    #[test]
    fn checks_parses_id_and_window() {
        let id = "8f14e45f-ceea-467f-a8f1-4b2e7c3a9d10";
        let settings = parse(&["checks", id, "--since-secs", "3600"]).expect("settings");
        match settings.command {
            AppCommand::Checks { id: parsed, since } => {
                assert_eq!(parsed.to_string(), id);
                assert_eq!(since, Some(Duration::from_secs(3600)));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn checks_rejects_malformed_id() {
        let err = parse(&["checks", "not-a-uuid"]).expect_err("id");
        assert!(matches!(err, SettingsError::InvalidCheckerId { value } if value == "not-a-uuid"));
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let err = parse(&["checkers", "--log-format", "xml"]).expect_err("format");
        assert!(matches!(err, SettingsError::Logging(_)));
    }
}
