//! Client configuration
//!
//! Loaded from a YAML, TOML or JSON file with `MODBUS_`-prefixed
//! environment overrides (`__` separates nested keys, e.g.
//! `MODBUS_BATCH__ENABLED=true`).

use std::fmt;
use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{PointMapError, Result};
use crate::executor::DeviceLimits;
use crate::planner::PlannerConfig;
use crate::pool::BoundedPoolConfig;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "MODBUS_";

/// Serial parity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    #[serde(rename = "N", alias = "none", alias = "n")]
    None,
    #[serde(rename = "E", alias = "even", alias = "e")]
    Even,
    #[serde(rename = "O", alias = "odd", alias = "o")]
    Odd,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Self::None => 'N',
            Self::Even => 'E',
            Self::Odd => 'O',
        };
        write!(f, "{c}")
    }
}

fn default_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

/// Low-level serial line parameters. Every subscriber of one port must
/// present the same values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialParams {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::default(),
            stop_bits: default_stop_bits(),
        }
    }
}

impl fmt::Display for SerialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate, self.data_bits, self.parity, self.stop_bits
        )
    }
}

/// Link target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LinkConfig {
    Tcp {
        host: String,
        #[serde(default = "default_port")]
        port: u16,
    },
    Rtu {
        device: String,
        #[serde(flatten)]
        serial: SerialParams,
    },
}

impl LinkConfig {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn rtu(device: impl Into<String>, serial: SerialParams) -> Self {
        Self::Rtu {
            device: device.into(),
            serial,
        }
    }

    /// Registry key for shared links, or the socket address for TCP.
    pub fn key(&self) -> String {
        match self {
            Self::Tcp { host, port } => format!("{host}:{port}"),
            Self::Rtu { device, .. } => device.clone(),
        }
    }

    pub fn serial(&self) -> Option<&SerialParams> {
        match self {
            Self::Tcp { .. } => None,
            Self::Rtu { serial, .. } => Some(serial),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::tcp("127.0.0.1", default_port())
    }
}

/// Batching toggle and coalescer tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub planner: PlannerConfig,
}

fn default_slave_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_max_quantity() -> u16 {
    125
}

fn default_inter_request_delay_ms() -> u64 {
    1
}

/// Complete client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModbusConfig {
    #[serde(default)]
    pub link: LinkConfig,
    /// Slave/unit identifier
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    /// Deadline for each primitive request; 0 disables it
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub pool: BoundedPoolConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default = "default_max_quantity")]
    pub max_quantity: u16,
    #[serde(default = "default_inter_request_delay_ms")]
    pub inter_request_delay_ms: u64,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            slave_id: default_slave_id(),
            timeout_ms: default_timeout_ms(),
            pool: BoundedPoolConfig::default(),
            batch: BatchConfig::default(),
            max_quantity: default_max_quantity(),
            inter_request_delay_ms: default_inter_request_delay_ms(),
        }
    }
}

impl ModbusConfig {
    pub fn new(link: LinkConfig) -> Self {
        Self {
            link,
            ..Self::default()
        }
    }

    pub fn with_slave_id(mut self, slave_id: u8) -> Self {
        self.slave_id = slave_id;
        self
    }

    pub fn with_batching(mut self, enabled: bool) -> Self {
        self.batch.enabled = enabled;
        self
    }

    pub fn with_planner(mut self, planner: PlannerConfig) -> Self {
        self.batch.planner = planner;
        self
    }

    pub fn with_pool(mut self, pool: BoundedPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_quantity(mut self, max_quantity: u16) -> Self {
        self.max_quantity = max_quantity;
        self
    }

    pub fn with_inter_request_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inter_request_delay_ms = delay_ms;
        self
    }

    pub fn limits(&self) -> DeviceLimits {
        DeviceLimits::default()
            .with_max_quantity(self.max_quantity)
            .with_inter_request_delay_ms(self.inter_request_delay_ms)
            .with_timeout_ms(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        match &self.link {
            LinkConfig::Tcp { host, port } => {
                if host.trim().is_empty() {
                    return Err(PointMapError::Config("TCP host must not be empty".to_string()));
                }
                if *port == 0 {
                    return Err(PointMapError::Config("TCP port must not be 0".to_string()));
                }
            },
            LinkConfig::Rtu { device, serial } => {
                if device.trim().is_empty() {
                    return Err(PointMapError::Config(
                        "Serial device path must not be empty".to_string(),
                    ));
                }
                if serial.baud_rate == 0 {
                    return Err(PointMapError::Config("Baud rate must not be 0".to_string()));
                }
                if !(5..=8).contains(&serial.data_bits) {
                    return Err(PointMapError::Config(format!(
                        "Data bits must be 5-8, got {}",
                        serial.data_bits
                    )));
                }
                if !(1..=2).contains(&serial.stop_bits) {
                    return Err(PointMapError::Config(format!(
                        "Stop bits must be 1 or 2, got {}",
                        serial.stop_bits
                    )));
                }
            },
        }
        if self.slave_id == 0 || self.slave_id > 247 {
            return Err(PointMapError::Config(format!(
                "Slave id must be 1-247, got {}",
                self.slave_id
            )));
        }
        if !(1..=125).contains(&self.max_quantity) {
            return Err(PointMapError::Config(format!(
                "max_quantity must be 1-125, got {}",
                self.max_quantity
            )));
        }
        if self.pool.max_open_conns == 0 {
            return Err(PointMapError::Config(
                "pool.max_open_conns must be at least 1".to_string(),
            ));
        }
        if self.batch.planner.max_block_size == 0 {
            return Err(PointMapError::Config(
                "batch.max_block_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn file_figment(path: &Path) -> Result<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| PointMapError::Config("Config file must have an extension".to_string()))?;

    match extension {
        "toml" => Ok(Figment::new().merge(Toml::file(path))),
        "yaml" | "yml" => Ok(Figment::new().merge(Yaml::file(path))),
        "json" => Ok(Figment::new().merge(Json::file(path))),
        _ => Err(PointMapError::Config(format!(
            "Unsupported config file format: {}",
            extension
        ))),
    }
}

fn extract(figment: Figment) -> Result<ModbusConfig> {
    let config: ModbusConfig = figment
        .extract()
        .map_err(|e| PointMapError::Config(format!("Failed to load configuration: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Load and validate configuration from a file only.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<ModbusConfig> {
    extract(file_figment(path.as_ref())?)
}

/// Load from a file, then apply `MODBUS_*` environment overrides.
pub fn load<P: AsRef<Path>>(path: P) -> Result<ModbusConfig> {
    let figment = file_figment(path.as_ref())?.merge(Env::prefixed(ENV_PREFIX).split("__"));
    extract(figment)
}
