//! ---
//! zc_section: "01-core-functionality"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Shared primitives and utilities for the experiment runtime."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Core shared primitives for the zonechaos workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the experiment runtime and the CLI.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, EvictionMode, ExperimentConfig, ExperimentEntry, FailoverMode, GatewayConfig,
    LoadedAppConfig, LoggingConfig, RetryConfig,
};
pub use logging::{init_tracing, LogFormat, RunSession};
