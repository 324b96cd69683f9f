//! Tracing subscriber setup.
//!
//! `RUST_LOG` always wins. Without it the filter is `info`, raised to
//! `debug` for the hpcid crates when stderr is a terminal.

use clap::ValueEnum;
use std::io::IsTerminal;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{CliError, CliResult};

const DEFAULT_FILTER: &str = "info";
const INTERACTIVE_FILTER: &str = "info,hpcid=debug,hpcid_provisioning=debug,hpcid_connector=debug,\
hpcid_connector_ldap=debug,hpcid_connector_slurm=debug,hpcid_connector_storage=debug,\
hpcid_allocations=debug,hpcid_notify=debug";

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event, for log aggregation.
    Json,
}

/// Default filter directive when `RUST_LOG` is unset.
pub fn default_filter(interactive: bool) -> &'static str {
    if interactive {
        INTERACTIVE_FILTER
    } else {
        DEFAULT_FILTER
    }
}

/// Initialize the tracing subscriber. Logs go to stderr.
pub fn init_logging(format: LogFormat) -> CliResult<()> {
    let filter = default_filter(std::io::stderr().is_terminal());
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .map_err(|e| CliError::Logging(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(filter_layer);
    let result = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
    };
    result.map_err(|e| CliError::Logging(e.to_string()))?;

    tracing::debug!(format = ?format, "Logging initialized");
    Ok(())
}
