//! Configuration file support for the reception monitor

use liveloop_io::ReactorConfig;
use liveloop_rtp::{ReceptionConfig, SequencePolicy, DEFAULT_MAX_DROPOUT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Sequence tracking policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SequenceMode {
    /// Serial comparison with reorder correction
    #[default]
    Rfc3550,
    /// Forward distance from the previous packet only
    DeltaOnly,
}

impl From<SequenceMode> for SequencePolicy {
    fn from(mode: SequenceMode) -> Self {
        match mode {
            SequenceMode::Rfc3550 => SequencePolicy::Rfc3550,
            SequenceMode::DeltaOnly => SequencePolicy::DeltaOnly,
        }
    }
}

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Address to receive RTP on
    pub listen: SocketAddr,
    /// IPv4 multicast group to join
    #[serde(default)]
    pub multicast_group: Option<Ipv4Addr>,
    /// Media clock rate in Hz, used for jitter and presentation times
    #[serde(default = "default_clock_rate")]
    pub clock_rate: u32,
    /// Seconds between printed reports (0 disables them)
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Scheduler tick in milliseconds (0 disables the tick)
    #[serde(default = "default_granularity")]
    pub scheduler_granularity_ms: u64,
    #[serde(default)]
    pub sequence_mode: SequenceMode,
    /// Forward sequence jump reported as an anomaly
    #[serde(default = "default_max_dropout")]
    pub max_dropout: u32,
    /// Also report sources silent during the last interval
    #[serde(default)]
    pub include_inactive: bool,
    /// Socket receive buffer size in bytes
    #[serde(default)]
    pub recv_buffer_size: Option<usize>,
}

fn default_clock_rate() -> u32 {
    90_000
}

fn default_report_interval() -> u64 {
    5
}

fn default_granularity() -> u64 {
    10
}

fn default_max_dropout() -> u32 {
    DEFAULT_MAX_DROPOUT
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            listen: SocketAddr::from(([0, 0, 0, 0], 5004)),
            multicast_group: None,
            clock_rate: default_clock_rate(),
            report_interval_secs: default_report_interval(),
            scheduler_granularity_ms: default_granularity(),
            sequence_mode: SequenceMode::default(),
            max_dropout: default_max_dropout(),
            include_inactive: false,
            recv_buffer_size: None,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: MonitorConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Example configuration: a multicast video stream
    pub fn example() -> Self {
        MonitorConfig {
            listen: SocketAddr::from(([0, 0, 0, 0], 5004)),
            multicast_group: Some(Ipv4Addr::new(239, 255, 42, 42)),
            recv_buffer_size: Some(2 * 1024 * 1024),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock_rate == 0 {
            return Err(ConfigError::Invalid("clock_rate must be positive".to_string()));
        }
        if self.multicast_group.is_some() && !self.listen.is_ipv4() {
            return Err(ConfigError::Invalid(
                "multicast_group requires an IPv4 listen address".to_string(),
            ));
        }
        Ok(())
    }

    /// Report interval as Duration
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn reactor_config(&self) -> ReactorConfig {
        ReactorConfig {
            max_scheduler_granularity: Duration::from_millis(self.scheduler_granularity_ms),
            ..ReactorConfig::default()
        }
    }

    pub fn reception_config(&self) -> ReceptionConfig {
        ReceptionConfig {
            sequence_policy: self.sequence_mode.into(),
            max_dropout: self.max_dropout,
            ..ReceptionConfig::default()
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
