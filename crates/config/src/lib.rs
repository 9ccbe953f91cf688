#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Configuration for a dataflow manager.

use thiserror::Error;
use tracing::debug;
use validator::Validate;

/// Errors for the config module.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The configuration failed validation.
    #[error("invalid configuration for manager '{name}' - {message}")]
    InvalidConfig {
        /// The manager name.
        name: String,
        /// The validation failure message.
        message: String,
    },
}

fn default_channel_size() -> usize {
    1000
}

fn default_buffer_warning_threshold() -> usize {
    1000
}

fn default_buffer_warning_increment() -> usize {
    100
}

/// Configuration of a manager: its pool size and the channel/buffer
/// thresholds used by every node it owns.
#[derive(Debug, Clone, Validate)]
pub struct ManagerConfig {
    /// The manager's name, used in log output and error messages.
    pub name: String,

    /// Number of workers started when the manager starts.
    #[validate(range(min = 1))]
    pub pool_size: usize,

    /// Capacity of each node's inbound pipe and of each internal edge.
    #[validate(range(min = 1))]
    pub channel_size: usize,

    /// Overflow buffer length at which a warning is first logged.
    #[validate(range(min = 1))]
    pub buffer_warning_threshold: usize,

    /// How many further items must accumulate before the warning repeats.
    #[validate(range(min = 1))]
    pub buffer_warning_increment: usize,
}

impl ManagerConfig {
    /// Creates a configuration with the library's defaults for everything
    /// but the name and the initial pool size.
    pub fn new(name: impl Into<String>, pool_size: usize) -> Self {
        Self {
            name: name.into(),
            pool_size,
            channel_size: default_channel_size(),
            buffer_warning_threshold: default_buffer_warning_threshold(),
            buffer_warning_increment: default_buffer_warning_increment(),
        }
    }

    /// Overrides the channel size.
    #[must_use]
    pub fn with_channel_size(mut self, channel_size: usize) -> Self {
        self.channel_size = channel_size;
        self
    }

    /// Overrides the buffer-size warning threshold and increment.
    #[must_use]
    pub fn with_buffer_warning(mut self, threshold: usize, increment: usize) -> Self {
        self.buffer_warning_threshold = threshold;
        self.buffer_warning_increment = increment;
        self
    }

    /// Validates field ranges, returning a structured error describing the
    /// first failure found.
    pub fn validate_config(&self) -> Result<(), Error> {
        debug!(manager = %self.name, "validating manager configuration");

        self.validate().map_err(|report| Error::InvalidConfig {
            name: self.name.clone(),
            message: report.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = ManagerConfig::new("m", 4);
        assert!(config.validate_config().is_ok());
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let config = ManagerConfig::new("m", 0);
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn builder_overrides_apply() {
        let config = ManagerConfig::new("m", 4).with_channel_size(50).with_buffer_warning(10, 5);
        assert_eq!(config.channel_size, 50);
        assert_eq!(config.buffer_warning_threshold, 10);
        assert_eq!(config.buffer_warning_increment, 5);
        assert!(config.validate_config().is_ok());
    }
}
