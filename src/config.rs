//! Configuration for the queue polling pump.
//!
//! Settings are loaded in priority order: environment variables (highest),
//! the `pump.toml` configuration file, then built-in defaults. The loaded
//! [`PumpSettings`] convert into the engine-level [`PumpConfig`] consumed by
//! [`crate::pump::MessagePump`].

use std::{fmt, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{DEFAULT_CIRCUIT_WAIT_SECS, DEFAULT_MAX_CONCURRENCY, DEFAULT_STOP_TIMEOUT_SECS};

const CONFIG_FILE: &str = "pump.toml";

/// Transaction mode the receive strategy must honor.
///
/// The pump does not interpret the mode beyond handing it to the
/// [`crate::queue::ReceiveStrategyFactory`]; the chosen strategy owns the
/// actual transactional receive-and-invoke sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// No transactional guarantees; items are consumed on receive.
    None,
    /// The receive itself is transactional; pipeline failure returns the
    /// item to the queue.
    ReceiveOnly,
    /// Sends performed by the pipeline enlist in the receive transaction.
    Atomic,
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::ReceiveOnly => write!(f, "receive_only"),
            Self::Atomic => write!(f, "atomic"),
        }
    }
}

/// Pump settings with defaults, file, and environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpSettings {
    /// Transaction mode required of the receive strategy.
    ///
    /// Environment variable: `REQUIRED_TRANSACTION_MODE`
    #[serde(default = "default_transaction_mode", alias = "REQUIRED_TRANSACTION_MODE")]
    pub required_transaction_mode: TransactionMode,

    /// Address of the input queue to poll.
    ///
    /// Environment variable: `INPUT_QUEUE_ADDRESS`
    #[serde(default = "default_input_queue", alias = "INPUT_QUEUE_ADDRESS")]
    pub input_queue_address: String,

    /// Address of the queue receiving items that could not be processed.
    ///
    /// Environment variable: `ERROR_QUEUE_ADDRESS`
    #[serde(default = "default_error_queue", alias = "ERROR_QUEUE_ADDRESS")]
    pub error_queue_address: String,

    /// Whether to purge the input queue during initialization.
    ///
    /// Environment variable: `PURGE_ON_STARTUP`
    #[serde(default, alias = "PURGE_ON_STARTUP")]
    pub purge_on_startup: bool,

    /// Maximum number of concurrently running receive units.
    ///
    /// Environment variable: `MAX_CONCURRENCY`
    #[serde(default = "default_max_concurrency", alias = "MAX_CONCURRENCY")]
    pub max_concurrency: usize,

    /// Seconds of uninterrupted failures before a circuit breaker raises a
    /// critical error.
    ///
    /// Environment variable: `CIRCUIT_BREAKER_WAIT_SECS`
    #[serde(default = "default_circuit_wait", alias = "CIRCUIT_BREAKER_WAIT_SECS")]
    pub circuit_breaker_wait_secs: u64,

    /// Maximum seconds stop waits for in-flight work to drain.
    ///
    /// Environment variable: `STOP_TIMEOUT_SECS`
    #[serde(default = "default_stop_timeout", alias = "STOP_TIMEOUT_SECS")]
    pub stop_timeout_secs: u64,
}

impl PumpSettings {
    /// Loads settings from defaults, `pump.toml`, and environment overrides.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let settings: Self = figment.extract().context("Failed to load pump settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Converts to the engine-level configuration.
    pub fn to_pump_config(&self) -> PumpConfig {
        PumpConfig {
            transaction_mode: self.required_transaction_mode,
            input_queue: self.input_queue_address.clone(),
            error_queue: self.error_queue_address.clone(),
            purge_on_startup: self.purge_on_startup,
            max_concurrency: self.max_concurrency,
            circuit_breaker_wait: Duration::from_secs(self.circuit_breaker_wait_secs),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
        }
    }

    /// Validates settings values.
    fn validate(&self) -> Result<()> {
        if self.input_queue_address.is_empty() {
            anyhow::bail!("input_queue_address must not be empty");
        }

        if self.error_queue_address.is_empty() {
            anyhow::bail!("error_queue_address must not be empty");
        }

        if self.input_queue_address == self.error_queue_address {
            anyhow::bail!("input and error queue addresses must differ");
        }

        if self.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be greater than 0");
        }

        if self.circuit_breaker_wait_secs == 0 {
            anyhow::bail!("circuit_breaker_wait_secs must be greater than 0");
        }

        if self.stop_timeout_secs == 0 {
            anyhow::bail!("stop_timeout_secs must be greater than 0");
        }

        Ok(())
    }
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            required_transaction_mode: default_transaction_mode(),
            input_queue_address: default_input_queue(),
            error_queue_address: default_error_queue(),
            purge_on_startup: false,
            max_concurrency: default_max_concurrency(),
            circuit_breaker_wait_secs: default_circuit_wait(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

/// Engine-level configuration consumed by the pump.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Transaction mode handed to the receive strategy factory.
    pub transaction_mode: TransactionMode,
    /// Input queue address, resolved during init.
    pub input_queue: String,
    /// Error queue address, resolved during init.
    pub error_queue: String,
    /// Whether init purges the input queue.
    pub purge_on_startup: bool,
    /// Concurrency ceiling for in-flight receive units.
    pub max_concurrency: usize,
    /// Uninterrupted-failure window before a breaker escalates.
    pub circuit_breaker_wait: Duration,
    /// Bound on the stop-phase drain.
    pub stop_timeout: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        PumpSettings::default().to_pump_config()
    }
}

fn default_transaction_mode() -> TransactionMode {
    TransactionMode::ReceiveOnly
}

fn default_input_queue() -> String {
    "input".to_string()
}

fn default_error_queue() -> String {
    "error".to_string()
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_circuit_wait() -> u64 {
    DEFAULT_CIRCUIT_WAIT_SECS
}

fn default_stop_timeout() -> u64 {
    DEFAULT_STOP_TIMEOUT_SECS
}
