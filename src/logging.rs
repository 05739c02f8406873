//! Logging setup and runtime level switching
//!
//! One global `tracing` subscriber is installed by [`init`]. Its filter sits
//! behind a reload layer so the operator can change verbosity while the room
//! is running (console `setloglevel`).

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt as fmt_layer, reload, EnvFilter, Registry};

/// Reply for a level name that isn't recognised
pub const UNKNOWN_LEVEL_MESSAGE: &str = "Unknown log level provided!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
}

impl LogLevel {
    /// Filter directive for this level
    fn directive(self) -> &'static str {
        match self {
            Self::Verbose => "trace",
            Self::Debug => "debug",
            Self::Information => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Verbose => "verbose",
            Self::Debug => "debug",
            Self::Information => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown log level: {0}")]
pub struct UnknownLogLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verbose" | "trace" => Ok(Self::Verbose),
            "debug" => Ok(Self::Debug),
            "info" | "information" => Ok(Self::Information),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(UnknownLogLevel(other.to_string())),
        }
    }
}

/// Handle for changing the global log level at runtime.
///
/// Cheap to clone; all clones drive the same filter.
#[derive(Clone)]
pub struct LogLevelSwitch {
    handle: reload::Handle<EnvFilter, Registry>,
    current: Arc<RwLock<LogLevel>>,
    /// The filter came from `RUST_LOG`
    env_override: bool,
}

impl LogLevelSwitch {
    fn new(
        handle: reload::Handle<EnvFilter, Registry>,
        level: LogLevel,
        env_override: bool,
    ) -> Self {
        Self {
            handle,
            current: Arc::new(RwLock::new(level)),
            env_override,
        }
    }

    pub fn current(&self) -> LogLevel {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, level: LogLevel) -> Result<(), reload::Error> {
        self.handle.reload(EnvFilter::new(level.directive()))?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = level;
        tracing::info!("Log level set to {}", level);
        Ok(())
    }

    /// Apply the level named in the settings file. Skipped, returning None,
    /// when `RUST_LOG` chose the filter at startup.
    pub fn apply_configured(&self, name: &str) -> Option<String> {
        if self.env_override {
            tracing::debug!("RUST_LOG is set, ignoring configured log level {}", name);
            return None;
        }
        Some(self.set_named(name))
    }

    /// Apply a level by name and return the operator-facing reply.
    /// Unknown names switch to `warning`.
    pub fn set_named(&self, name: &str) -> String {
        let (level, reply) = match name.parse::<LogLevel>() {
            Ok(level) => (level, format!("Log level set to {}", level)),
            Err(_) => (LogLevel::Warning, UNKNOWN_LEVEL_MESSAGE.to_string()),
        };
        match self.set(level) {
            Ok(()) => reply,
            Err(e) => format!("Failed to change log level: {}", e),
        }
    }
}

/// Install the global subscriber. `RUST_LOG`, when set, overrides `level`.
pub fn init(level: LogLevel) -> Result<LogLevelSwitch, TryInitError> {
    let env_filter = EnvFilter::try_from_default_env().ok();
    let env_override = env_filter.is_some();
    let filter = env_filter.unwrap_or_else(|| EnvFilter::new(level.directive()));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer::layer())
        .try_init()?;

    Ok(LogLevelSwitch::new(handle, level, env_override))
}
