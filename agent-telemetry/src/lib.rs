//! Logging setup for the runtime's binaries.
//!
//! Every binary calls [`init_tracing`] once at startup. Output goes to stderr
//! so stdout stays free for protocol traffic and command output.

#![warn(missing_docs, clippy::pedantic)]

use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Default filter directive when neither `RUST_LOG` nor configuration set one.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Output format of the log subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human readable output.
    #[default]
    Compact,
    /// Multi-line human readable output.
    Pretty,
    /// Newline-delimited JSON objects.
    Json,
}

impl LogFormat {
    /// Stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(TelemetryError::UnknownFormat(other.to_owned())),
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The format label is not one of `compact`, `pretty`, `json`.
    #[error("unknown log format `{0}`")]
    UnknownFormat(String),
    /// The filter directive does not parse.
    #[error("invalid log directive `{directive}`: {reason}")]
    InvalidDirective {
        /// Directive as configured.
        directive: String,
        /// Parser message.
        reason: String,
    },
    /// A global subscriber is already installed.
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Builds the filter: `RUST_LOG` when set and valid, otherwise `directive`.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidDirective`] when `RUST_LOG` is unset and
/// `directive` does not parse.
pub fn env_filter(directive: &str) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(directive).map_err(|err| TelemetryError::InvalidDirective {
        directive: directive.to_owned(),
        reason: err.to_string(),
    })
}

/// Installs the global `fmt` subscriber writing to stderr.
///
/// # Errors
///
/// Fails when the directive is invalid or a subscriber is already installed.
pub fn init_tracing(format: LogFormat, directive: &str) -> Result<(), TelemetryError> {
    let filter = env_filter(directive)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);
    let installed = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| TelemetryError::AlreadyInstalled(err.to_string()))?;
    tracing::debug!(%format, directive, "tracing initialised");
    Ok(())
}
