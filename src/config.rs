use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct SinkholeConfig {
    pub coordinator: CoordinatorConfig,
    pub dispatch: DispatchConfig,
    pub observer: ObserverConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Quiet period that closes a debounce window, in milliseconds
    #[serde(default = "default_debounce_interval_ms")]
    pub debounce_interval_ms: u64,

    /// Upper bound on how far user triggers may stretch a window, in milliseconds
    #[serde(default = "default_max_window_ms")]
    pub max_window_ms: u64,

    /// Undelivered triggers kept per producer before the oldest is dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Stop the managed service when the coordinator shuts down
    #[serde(default = "default_stop_on_shutdown")]
    pub stop_on_shutdown: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Bound on each start/stop call, in milliseconds
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// Automatic retries after a timed out attempt
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// First retry delay, doubled on each further retry, in milliseconds
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,

    /// Cap on the retry delay, in milliseconds
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ObserverConfig {
    /// Append lifecycle events as JSON lines to this file
    #[serde(default)]
    pub journal_path: Option<String>,

    /// Diagnostic event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

/// Settings for the simulated service used by the binary
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SimulationConfig {
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,

    #[serde(default = "default_stop_delay_ms")]
    pub stop_delay_ms: u64,

    /// Number of initial start calls that fail
    #[serde(default)]
    pub fail_starts: u32,
}

impl CoordinatorConfig {
    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_interval_ms)
    }

    pub fn max_window(&self) -> Duration {
        Duration::from_millis(self.max_window_ms)
    }
}

impl DispatchConfig {
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn retry_backoff_base(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_base_ms)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_ms)
    }
}

impl SimulationConfig {
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn stop_delay(&self) -> Duration {
        Duration::from_millis(self.stop_delay_ms)
    }
}

impl SinkholeConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("sinkhole.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("coordinator.debounce_interval_ms", default_debounce_interval_ms() as i64)?
            .set_default("coordinator.max_window_ms", default_max_window_ms() as i64)?
            .set_default(
                "coordinator.channel_capacity",
                default_channel_capacity() as i64,
            )?
            .set_default("coordinator.stop_on_shutdown", default_stop_on_shutdown())?
            .set_default("dispatch.dispatch_timeout_ms", default_dispatch_timeout_ms() as i64)?
            .set_default("dispatch.max_retry_attempts", default_max_retry_attempts() as i64)?
            .set_default("dispatch.retry_backoff_base_ms", default_retry_backoff_base_ms() as i64)?
            .set_default("dispatch.retry_backoff_max_ms", default_retry_backoff_max_ms() as i64)?
            .set_default(
                "observer.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("simulation.start_delay_ms", default_start_delay_ms() as i64)?
            .set_default("simulation.stop_delay_ms", default_stop_delay_ms() as i64)?
            .set_default("simulation.fail_starts", 0)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // SINKHOLE_DISPATCH__MAX_RETRY_ATTEMPTS=5
            .add_source(
                Environment::with_prefix("SINKHOLE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: SinkholeConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordinator.debounce_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Debounce interval must be greater than 0".to_string(),
            ));
        }

        if self.coordinator.max_window_ms < self.coordinator.debounce_interval_ms {
            return Err(ConfigError::Message(
                "Max window must not be shorter than the debounce interval".to_string(),
            ));
        }

        if self.coordinator.channel_capacity == 0 {
            return Err(ConfigError::Message(
                "Channel capacity must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.dispatch_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Dispatch timeout must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.retry_backoff_max_ms < self.dispatch.retry_backoff_base_ms {
            return Err(ConfigError::Message(
                "Retry backoff max must not be below the backoff base".to_string(),
            ));
        }

        if self.observer.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce_interval_ms: default_debounce_interval_ms(),
            max_window_ms: default_max_window_ms(),
            channel_capacity: default_channel_capacity(),
            stop_on_shutdown: default_stop_on_shutdown(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            journal_path: None,
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            start_delay_ms: default_start_delay_ms(),
            stop_delay_ms: default_stop_delay_ms(),
            fail_starts: 0,
        }
    }
}

// Default value functions
fn default_debounce_interval_ms() -> u64 {
    500
}
fn default_max_window_ms() -> u64 {
    5_000
}
fn default_channel_capacity() -> usize {
    64
}
fn default_stop_on_shutdown() -> bool {
    true
}

fn default_dispatch_timeout_ms() -> u64 {
    30_000
}
fn default_max_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_base_ms() -> u64 {
    1_000
}
fn default_retry_backoff_max_ms() -> u64 {
    60_000
}

fn default_event_bus_capacity() -> usize {
    100
}

fn default_start_delay_ms() -> u64 {
    200
}
fn default_stop_delay_ms() -> u64 {
    100
}
