//! Session configuration.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::delta::DEFAULT_MAX_PACKET_BYTES;

/// Timing, addressing and display geometry for one [`Session`](crate::Session).
///
/// With the `config` feature enabled this can be loaded from an INI file
/// whose keys are the field names:
///
/// ```ini
/// device_index = 62
/// repaint_interval_ms = 40
/// max_packet_bytes = 200
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct SessionConfig {
    /// Topology index of the block. Index 0 is reserved for topology requests.
    pub device_index: u8,
    pub heartbeat_interval_ms: u64,
    pub repaint_interval_ms: u64,
    /// How long each handshake step waits for its ack.
    pub ack_timeout_ms: u64,
    /// Delay between an ack arriving and the handshake moving on.
    pub ack_settle_ms: u64,
    /// Byte budget for a single change-list packet. 0 means unbounded.
    pub max_packet_bytes: usize,
    pub display_width: usize,
    pub display_height: usize,
    /// Device heap address of the LED bitmap.
    pub display_data_offset: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_index: 0x3E,
            heartbeat_interval_ms: 500,
            repaint_interval_ms: 40,
            ack_timeout_ms: 2000,
            ack_settle_ms: 100,
            max_packet_bytes: DEFAULT_MAX_PACKET_BYTES,
            display_width: 15,
            display_height: 15,
            display_data_offset: 113,
        }
    }
}

impl SessionConfig {
    /// Parses a configuration from INI text. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Fails if the text is not valid INI, a value has the wrong type, or the
    /// result does not pass [`SessionConfig::validate`].
    #[cfg(feature = "config")]
    pub fn from_ini_str(ini: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_ini::from_str(ini)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration can drive a session.
    ///
    /// # Errors
    ///
    /// Fails on a device index outside the 6-bit range, a zero interval, or an
    /// empty display.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_index > 0x3F {
            return Err(ConfigError::DeviceIndexOutOfRange(self.device_index));
        }

        for (name, value) in [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("repaint_interval_ms", self.repaint_interval_ms),
            ("ack_timeout_ms", self.ack_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval(name));
            }
        }

        if self.display_width == 0 || self.display_height == 0 {
            return Err(ConfigError::EmptyDisplay);
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn repaint_interval(&self) -> Duration {
        Duration::from_millis(self.repaint_interval_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn ack_settle(&self) -> Duration {
        Duration::from_millis(self.ack_settle_ms)
    }

    /// The change-list byte budget, with 0 mapped to unbounded.
    pub fn max_packet_bytes(&self) -> Option<usize> {
        (self.max_packet_bytes != 0).then_some(self.max_packet_bytes)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[cfg(feature = "config")]
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_ini::de::Error),

    #[error("Device index {0} does not fit in 6 bits")]
    DeviceIndexOutOfRange(u8),

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("Display must have at least one pixel")]
    EmptyDisplay,
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, SessionConfig};

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_packet_bytes(), Some(200));
        assert_eq!(config.repaint_interval().as_millis(), 40);
    }

    #[test]
    fn zero_budget_is_unbounded() {
        let config = SessionConfig {
            max_packet_bytes: 0,
            ..Default::default()
        };
        assert_eq!(config.max_packet_bytes(), None);
    }

    #[test]
    fn rejects_bad_values() {
        let config = SessionConfig {
            device_index: 0x40,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DeviceIndexOutOfRange(0x40))
        ));

        let config = SessionConfig {
            repaint_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroInterval("repaint_interval_ms"))
        ));
    }

    #[cfg(feature = "config")]
    #[test]
    fn parses_ini() {
        let config = SessionConfig::from_ini_str(
            "device_index=5\nrepaint_interval_ms=20\nmax_packet_bytes=0\n",
        )
        .unwrap();

        assert_eq!(config.device_index, 5);
        assert_eq!(config.repaint_interval_ms, 20);
        assert_eq!(config.max_packet_bytes(), None);
        assert_eq!(config.heartbeat_interval_ms, 500);
    }
}
