//! Application configuration
//!
//! Settings are plain serde records persisted as TOML. A record is
//! validated as a whole before it is applied, so a bad width or FEC count
//! is rejected before any stream starts.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, NetworkError, Result};
use crate::protocol::MAX_FEC_BLOCKS;
use crate::sample::SampleWidth;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub sender: SenderConfig,
    pub receiver: ReceiverConfig,
    pub monitor: MonitorConfig,
}

impl AppConfig {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "remote-iq", "remote-iq-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to defaults
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring configuration {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.sender.validate()?;
        self.receiver.validate()?;
        Ok(())
    }
}

/// UDP link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Destination address (sender) or bind address (receiver)
    pub data_address: String,
    pub data_port: u16,
    pub multicast_address: String,
    /// Receiver joins the multicast group; sender sends to it
    pub multicast_join: bool,
    /// Socket send buffer size in bytes, OS default when unset
    pub send_buffer_size: Option<usize>,
    /// Socket receive buffer size in bytes, derived from the stream rate when unset
    pub recv_buffer_size: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            data_address: "127.0.0.1".to_string(),
            data_port: DEFAULT_DATA_PORT,
            multicast_address: "224.0.0.1".to_string(),
            multicast_join: false,
            send_buffer_size: None,
            recv_buffer_size: None,
        }
    }
}

impl NetworkConfig {
    /// Data address and port
    pub fn data_socket_addr(&self) -> std::result::Result<SocketAddr, NetworkError> {
        let ip: IpAddr = self
            .data_address
            .parse()
            .map_err(|_| NetworkError::InvalidAddress(self.data_address.clone()))?;
        Ok(SocketAddr::new(ip, self.data_port))
    }

    /// Multicast group when multicast is enabled
    pub fn multicast_group(&self) -> std::result::Result<Option<Ipv4Addr>, NetworkError> {
        if !self.multicast_join {
            return Ok(None);
        }

        let group: Ipv4Addr = self
            .multicast_address
            .parse()
            .map_err(|_| NetworkError::InvalidAddress(self.multicast_address.clone()))?;

        if !group.is_multicast() {
            return Err(NetworkError::InvalidAddress(format!(
                "{} is not a multicast address",
                group
            )));
        }

        Ok(Some(group))
    }

    /// Where the sender addresses its datagrams
    pub fn destination(&self) -> std::result::Result<SocketAddr, NetworkError> {
        match self.multicast_group()? {
            Some(group) => Ok(SocketAddr::new(IpAddr::V4(group), self.data_port)),
            None => self.data_socket_addr(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.data_socket_addr()?;
        self.multicast_group()?;
        Ok(())
    }
}

/// Sender settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Recovery blocks per frame, 0 disables FEC
    pub nb_fec_blocks: u8,
    /// Spread of one frame's datagrams as a percentage of the frame duration
    pub tx_delay_percent: u32,
    pub device_index: u8,
    pub channel_index: u8,
    /// Center frequency in Hz reported in the metadata
    pub center_frequency: u64,
    /// Sample rate of the device feeding the channelizer
    pub device_sample_rate: u32,
    /// Decimation applied by the channelizer as a power of two
    pub log2_decim: u32,
    /// Component width on the wire
    pub sample_bits: u8,
    /// Frames buffered between the pipeline and the network task
    pub fifo_depth: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            nb_fec_blocks: DEFAULT_NB_FEC_BLOCKS,
            tx_delay_percent: DEFAULT_TX_DELAY_PERCENT,
            device_index: 0,
            channel_index: 0,
            center_frequency: 100_000_000,
            device_sample_rate: DEFAULT_SAMPLE_RATE,
            log2_decim: 0,
            sample_bits: 16,
            fifo_depth: DEFAULT_FIFO_DEPTH,
        }
    }
}

impl SenderConfig {
    /// Sample rate of the transmitted stream
    pub fn stream_sample_rate(&self) -> u32 {
        self.device_sample_rate >> self.log2_decim.min(31)
    }

    /// Component width on the wire
    pub fn sample_width(&self) -> Result<SampleWidth> {
        Ok(SampleWidth::from_bits(self.sample_bits)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.sample_width()?;

        if self.nb_fec_blocks as usize > MAX_FEC_BLOCKS {
            return Err(Error::Config(format!(
                "nb_fec_blocks {} exceeds {}",
                self.nb_fec_blocks, MAX_FEC_BLOCKS
            )));
        }
        if self.tx_delay_percent > 100 {
            return Err(Error::Config(format!(
                "tx_delay_percent {} exceeds 100",
                self.tx_delay_percent
            )));
        }
        if self.log2_decim > 6 {
            return Err(Error::Config(format!("log2_decim {} exceeds 6", self.log2_decim)));
        }
        if self.stream_sample_rate() == 0 {
            return Err(Error::Config("stream sample rate is zero".to_string()));
        }
        if self.fifo_depth == 0 {
            return Err(Error::Config("fifo_depth must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// Receiver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Decoder slots in the ring (even)
    pub nb_decoder_slots: usize,
    /// Resize the ring to about two seconds of signal when the rate changes
    pub auto_slots: bool,
    /// Read tick period in milliseconds
    pub tick_ms: u64,
    /// Apply the read/write balance correction
    pub auto_correction: bool,
    /// Weight of the newest estimate in the correction moving average
    pub correction_alpha: f64,
    /// Reads between two correction estimates
    pub correction_period: u32,
    /// Correction is clamped to sample rate / divisor samples per read
    pub correction_limit_divisor: u32,
    /// Component width delivered to the application
    pub output_sample_bits: u8,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            nb_decoder_slots: DEFAULT_NB_DECODER_SLOTS,
            auto_slots: true,
            tick_ms: DEFAULT_TICK_MS,
            auto_correction: true,
            correction_alpha: DEFAULT_CORRECTION_ALPHA,
            correction_period: DEFAULT_CORRECTION_PERIOD,
            correction_limit_divisor: DEFAULT_CORRECTION_LIMIT_DIVISOR,
            output_sample_bits: 16,
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<()> {
        SampleWidth::from_bits(self.output_sample_bits)?;

        if self.nb_decoder_slots < 2
            || self.nb_decoder_slots % 2 != 0
            || self.nb_decoder_slots > MAX_NB_DECODER_SLOTS
        {
            return Err(Error::Config(format!(
                "nb_decoder_slots must be even and in 2..={}, got {}",
                MAX_NB_DECODER_SLOTS, self.nb_decoder_slots
            )));
        }
        if !(1..=1000).contains(&self.tick_ms) {
            return Err(Error::Config(format!("tick_ms {} out of 1..=1000", self.tick_ms)));
        }
        if !(self.correction_alpha > 0.0 && self.correction_alpha <= 1.0) {
            return Err(Error::Config(format!(
                "correction_alpha {} out of (0, 1]",
                self.correction_alpha
            )));
        }
        if self.correction_period == 0 || self.correction_limit_divisor == 0 {
            return Err(Error::Config(
                "correction_period and correction_limit_divisor must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Diagnostics endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatError;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
        assert_eq!(SenderConfig::default().stream_sample_rate(), DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_unsupported_width_rejected() {
        let mut config = AppConfig::default();
        config.sender.sample_bits = 12;
        assert!(matches!(
            config.validate(),
            Err(Error::Format(FormatError::UnsupportedSampleWidth(12)))
        ));

        let mut config = AppConfig::default();
        config.receiver.output_sample_bits = 32;
        assert!(matches!(
            config.validate(),
            Err(Error::Format(FormatError::UnsupportedSampleWidth(32)))
        ));
    }

    #[test]
    fn test_fec_count_and_slots_checked() {
        let mut config = AppConfig::default();
        config.sender.nb_fec_blocks = 128;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AppConfig::default();
        config.receiver.nb_decoder_slots = 7;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.receiver.nb_decoder_slots = MAX_NB_DECODER_SLOTS + 2;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_decimated_rate() {
        let sender = SenderConfig {
            device_sample_rate: 2_048_000,
            log2_decim: 4,
            ..Default::default()
        };
        assert_eq!(sender.stream_sample_rate(), 128_000);
    }

    #[test]
    fn test_multicast_destination() {
        let mut network = NetworkConfig {
            multicast_join: true,
            multicast_address: "239.1.2.3".to_string(),
            ..Default::default()
        };
        assert_eq!(network.destination().unwrap(), "239.1.2.3:9090".parse().unwrap());

        network.multicast_address = "10.0.0.1".to_string();
        assert!(network.validate().is_err());

        network.multicast_join = false;
        network.data_address = "not-an-ip".to_string();
        assert!(matches!(
            network.data_socket_addr(),
            Err(NetworkError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [sender]
            nb_fec_blocks = 16

            [receiver]
            tick_ms = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.sender.nb_fec_blocks, 16);
        assert_eq!(config.sender.tx_delay_percent, DEFAULT_TX_DELAY_PERCENT);
        assert_eq!(config.receiver.tick_ms, 20);
        assert_eq!(config.network, NetworkConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("remote-iq-config-{}", std::process::id()))
            .join("config.toml");

        let mut config = AppConfig::default();
        config.sender.center_frequency = 145_500_000;
        config.receiver.auto_slots = false;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
