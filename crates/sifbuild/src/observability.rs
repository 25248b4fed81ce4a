//! Log setup for the command line: one formatting layer writing to stderr or
//! a log file, optionally mirrored to the systemd journal.
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, Registry};

use crate::GlobalOpts;

pub const LOG_LEVEL_ENV: &str = "SIFBUILD_LOG_LEVEL";

#[cfg(debug_assertions)]
const DEFAULT_LEVEL: LevelFilter = LevelFilter::DEBUG;
#[cfg(not(debug_assertions))]
const DEFAULT_LEVEL: LevelFilter = LevelFilter::ERROR;

#[derive(clap::ValueEnum, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line, event fields flattened
    Json,
}

type FormatLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// `--log-level` wins over `--debug`, which wins over $SIFBUILD_LOG_LEVEL.
/// The variable takes filter directives, e.g. `info,libsifbuild=trace`.
fn log_filter(level: Option<Level>, debug: bool) -> Result<EnvFilter> {
    let builder = EnvFilter::builder();
    let filter = match level.or(debug.then_some(Level::DEBUG)) {
        Some(level) => builder
            .with_default_directive(LevelFilter::from_level(level).into())
            .parse("")?,
        None => builder
            .with_default_directive(DEFAULT_LEVEL.into())
            .with_env_var(LOG_LEVEL_ENV)
            .from_env()
            .with_context(|| format!("invalid {LOG_LEVEL_ENV}"))?,
    };
    Ok(filter)
}

/// Returns the writer and whether it is an interactive terminal
fn log_writer(log_file: Option<&Path>) -> Result<(BoxMakeWriter, bool)> {
    let Some(path) = log_file else {
        return Ok((
            BoxMakeWriter::new(std::io::stderr),
            std::io::stderr().is_terminal(),
        ));
    };

    // repeated builds share one log
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {path:?}"))?;
    Ok((BoxMakeWriter::new(file), false))
}

fn format_layer(format: LogFormat, writer: BoxMakeWriter, ansi: bool) -> FormatLayer {
    match format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_span_list(false)
            .with_writer(writer)
            .boxed(),
    }
}

pub fn init(opts: &GlobalOpts) -> Result<()> {
    let filter = log_filter(opts.log_level, opts.debug)?;
    let (writer, ansi) = log_writer(opts.log.as_deref())?;

    let (journald, journald_err) = match opts.systemd_log.then(tracing_journald::layer) {
        Some(Ok(layer)) => (Some(layer.with_syslog_identifier("sifbuild".to_owned())), None),
        Some(Err(err)) => (None, Some(err)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(format_layer(opts.log_format, writer, ansi))
        .with(filter)
        .with(journald)
        .try_init()
        .context("failed to init logger")?;

    if let Some(err) = journald_err {
        // builds often run in containers without a journal
        tracing::warn!(?err, "journald logging unavailable");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_log_filter_precedence() -> Result<()> {
        std::env::set_var(LOG_LEVEL_ENV, "warn");
        let from_env = log_filter(None, false);
        let debug_flag = log_filter(None, true);
        let explicit = log_filter(Some(Level::TRACE), true);
        std::env::remove_var(LOG_LEVEL_ENV);

        assert_eq!(from_env?.max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(debug_flag?.max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(explicit?.max_level_hint(), Some(LevelFilter::TRACE));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_log_filter_default() -> Result<()> {
        std::env::remove_var(LOG_LEVEL_ENV);
        assert_eq!(log_filter(None, false)?.max_level_hint(), Some(DEFAULT_LEVEL));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_log_filter_env_directives() -> Result<()> {
        std::env::set_var(LOG_LEVEL_ENV, "error,libsifbuild=trace");
        let directives = log_filter(None, false);
        std::env::set_var(LOG_LEVEL_ENV, "libsifbuild=loud");
        let invalid = log_filter(None, false);
        std::env::remove_var(LOG_LEVEL_ENV);

        assert_eq!(directives?.max_level_hint(), Some(LevelFilter::TRACE));
        assert!(invalid.is_err());
        Ok(())
    }

    #[test]
    fn test_missing_log_dir() {
        assert!(log_writer(Some(Path::new("/nonexistent/dir/sifbuild.log"))).is_err());
    }

    // The global subscriber can only be installed once per process, so this
    // is the only test that calls init.
    #[test]
    fn test_json_logfile() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let log_file = temp_dir.path().join("test.log");
        std::fs::write(&log_file, "")?;
        let opts = GlobalOpts {
            log: Some(log_file.clone()),
            debug: false,
            log_format: LogFormat::Json,
            log_level: Some(Level::INFO),
            systemd_log: false,
        };
        init(&opts)?;

        tracing::debug!("below the level");
        tracing::error!(image = "out.sif", "testing json log");

        // other tests in this process may log through the same subscriber
        let data = std::fs::read_to_string(&log_file)?;
        let events = data
            .lines()
            .map(serde_json::from_str::<serde_json::Value>)
            .collect::<Result<Vec<_>, _>>()?;
        assert!(events.iter().all(|e| e["message"] != "below the level"));
        let event = events
            .iter()
            .find(|e| e["message"] == "testing json log")
            .context("event not logged")?;
        assert_eq!(event["image"], "out.sif");
        assert_eq!(event["level"], "ERROR");
        Ok(())
    }
}
