//! Optional tracing subscriber bootstrap.
//!
//! The library only emits `tracing` events. Nothing is printed unless the
//! host application installs a subscriber, either its own or the one built
//! by [`init_logging`].

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// Environment variable consulted by [`LogLevel::from_env`].
pub const LOG_LEVEL_ENV: &str = "QMC_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Disabled,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Disabled => "disabled",
        }
    }

    pub fn from_env() -> Self {
        std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }

    fn directive(self) -> &'static str {
        match self {
            Self::Debug => "quantamatics=debug",
            Self::Disabled => "off",
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "disabled" | "off" | "none" => Ok(Self::Disabled),
            other => Err(format!(
                "invalid log level '{other}', expected one of debug, disabled"
            )),
        }
    }
}

/// Installs a global fmt subscriber for `level`.
///
/// `RUST_LOG` takes precedence when set. Returns `false` when a global
/// subscriber was already installed.
pub fn init_logging(level: LogLevel) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
