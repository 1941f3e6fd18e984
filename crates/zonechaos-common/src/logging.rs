//! ---
//! zc_section: "01-core-functionality"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Shared primitives and utilities for the experiment runtime."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Tracing setup for an experiment session: console output, a daily JSON
//! experiment trail, and a root span tagging every event with the run id.
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "ZONECHAOS_LOG";

/// Control-plane commands and fault transitions log at debug; dependencies stay quiet.
const DEFAULT_DIRECTIVE: &str = "info,zonechaos=debug";

static WRITER_GUARDS: OnceCell<[WorkerGuard; 2]> = OnceCell::new();

/// Available console log formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Identity of one CLI invocation in the experiment trail.
#[derive(Debug, Clone)]
pub struct RunSession {
    run_id: Uuid,
    span: Span,
}

impl RunSession {
    fn new(service_name: &str) -> Self {
        let run_id = Uuid::new_v4();
        let span = info_span!("zonechaos_run", service = %service_name, run_id = %run_id);
        Self { run_id, span }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Root span; instrument the experiment loop with it so every record in
    /// the trail can be grouped by invocation.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Resolve the filter: `ZONECHAOS_LOG`, then `RUST_LOG`, then the default.
/// An unparsable directive falls back to the default instead of silencing output.
fn resolve_filter(override_directive: Option<String>) -> EnvFilter {
    match override_directive {
        Some(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive '{directive}' ({err}); using '{DEFAULT_DIRECTIVE}'");
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }),
        None => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
        }
    }
}

fn trail_file_name(service_name: &str, config: &LoggingConfig) -> String {
    match &config.file_prefix {
        Some(prefix) => format!("{prefix}-{service_name}.experiments.log"),
        None => format!("{service_name}.experiments.log"),
    }
}

/// Install the global subscriber and open a [`RunSession`].
///
/// The daily JSON trail is always written, whatever the console format, so a
/// failed rollback can be reconciled after the fact. Installing twice keeps the
/// first subscriber; the returned session is still fresh.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<RunSession> {
    std::fs::create_dir_all(&config.directory)?;

    let trail = daily(&config.directory, trail_file_name(service_name, config));
    let (trail_writer, trail_guard) = tracing_appender::non_blocking(trail);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = WRITER_GUARDS.set([trail_guard, stdout_guard]);

    let console = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };
    let trail = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(trail_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(resolve_filter(std::env::var(LOG_ENV).ok()))
        .with(console)
        .with(trail)
        .try_init()
        .ok();

    let session = RunSession::new(service_name);
    info!(
        service = %service_name,
        run_id = %session.run_id,
        log_dir = %config.directory.display(),
        format = ?config.format,
        "experiment trail opened"
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_log_directory_and_distinct_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            format: LogFormat::StructuredJson,
            file_prefix: Some("test".into()),
        };
        let first = init_tracing("zonechaosctl", &config).unwrap();
        let second = init_tracing("zonechaosctl", &config).unwrap();
        assert!(config.directory.is_dir());
        assert_ne!(first.run_id(), second.run_id());
    }

    #[test]
    fn trail_file_carries_prefix_and_service() {
        let mut config = LoggingConfig::default();
        assert_eq!(trail_file_name("zonechaosctl", &config), "zonechaosctl.experiments.log");
        config.file_prefix = Some("nightly".into());
        assert_eq!(
            trail_file_name("zonechaosctl", &config),
            "nightly-zonechaosctl.experiments.log"
        );
    }

    #[test]
    fn bad_override_falls_back_to_default_directive() {
        let filter = resolve_filter(Some("zonechaos=loud".into()));
        assert_eq!(filter.to_string(), EnvFilter::new(DEFAULT_DIRECTIVE).to_string());
        let filter = resolve_filter(Some("warn".into()));
        assert_eq!(filter.to_string(), EnvFilter::new("warn").to_string());
    }
}
