use std::{env, fmt, str::FromStr};

use log::warn;

use crate::errors::{ErrorKind, MemcachedError};

/// Environment variable consulted by [`MetricType::from_env`].
pub const METRIC_TYPE_ENV: &str = "MEMCACHED_METRIC_TYPE";

/// Default number of times an operation may be cloned and re-dispatched.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// How much latency instrumentation is collected.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum MetricType {
    /// Samples are discarded.
    #[default]
    Off,
    /// Samples are recorded, intended for diagnosing a single client.
    Debug,
    /// Samples are recorded, intended for continuous production use.
    Performance,
}

impl MetricType {
    /// Returns true unless metrics are switched off.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, MetricType::Off)
    }

    /// Reads the metric type from the `MEMCACHED_METRIC_TYPE` environment variable.
    ///
    /// Missing, unreadable or unknown values fall back to [`MetricType::Off`].
    pub fn from_env() -> Self {
        match env::var(METRIC_TYPE_ENV) {
            Ok(value) => value.parse().unwrap_or_else(|err| {
                warn!("Ignoring {METRIC_TYPE_ENV}: {err}");
                MetricType::default()
            }),
            Err(env::VarError::NotPresent) => MetricType::default(),
            Err(err) => {
                warn!("Ignoring {METRIC_TYPE_ENV}: {err}");
                MetricType::default()
            }
        }
    }
}

impl FromStr for MetricType {
    type Err = MemcachedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(MetricType::Off),
            "debug" => Ok(MetricType::Debug),
            "performance" => Ok(MetricType::Performance),
            other => Err(MemcachedError::from((
                ErrorKind::InvalidClientConfig,
                "Unknown metric type",
                other.to_string(),
            ))),
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetricType::Off => "OFF",
            MetricType::Debug => "DEBUG",
            MetricType::Performance => "PERFORMANCE",
        })
    }
}

/// What dispatch does when the node selected for an operation is not active.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum FailureMode {
    /// Walk the locator sequence and use the first active node instead.
    #[default]
    Redistribute,
    /// Keep the operation on the selected node and wait for it to come back.
    Retry,
    /// Cancel the operation.
    Cancel,
}

/// Configuration for routing and re-dispatching operations.
#[derive(Clone, Copy, Debug)]
pub struct DispatchConfig {
    pub(crate) failure_mode: FailureMode,
    pub(crate) max_retries: u32,
}

impl DispatchConfig {
    /// Creates new DispatchConfig with default values ([`FailureMode::Redistribute`] and 5 retries)
    pub fn new() -> Self {
        Self {
            failure_mode: FailureMode::default(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Sets what happens when the selected node is inactive, default is [`FailureMode::Redistribute`].
    pub fn set_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Sets how many times an operation may be cloned and re-dispatched before
    /// it is failed with [`ErrorKind::RetriesExhausted`].
    pub fn set_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns the configured failure mode.
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Returns the configured retry budget.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Default for DispatchConfig {
    /// Creates new DispatchConfig with default values ([`FailureMode::Redistribute`] and 5 retries)
    fn default() -> Self {
        DispatchConfig::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_type_parses_case_insensitively() {
        assert_eq!("PERFORMANCE".parse::<MetricType>().unwrap(), MetricType::Performance);
        assert_eq!(" debug ".parse::<MetricType>().unwrap(), MetricType::Debug);
        assert_eq!("Off".parse::<MetricType>().unwrap(), MetricType::Off);
    }

    #[test]
    fn unknown_metric_type_is_a_config_error() {
        let err = "verbose".parse::<MetricType>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidClientConfig);
        assert_eq!(err.detail(), Some("verbose"));
    }

    #[test]
    fn dispatch_config_builder() {
        let config = DispatchConfig::new()
            .set_failure_mode(FailureMode::Cancel)
            .set_max_retries(1);
        assert_eq!(config.failure_mode(), FailureMode::Cancel);
        assert_eq!(config.max_retries(), 1);

        let default = DispatchConfig::default();
        assert_eq!(default.failure_mode(), FailureMode::Redistribute);
        assert_eq!(default.max_retries(), DEFAULT_MAX_RETRIES);
    }
}
