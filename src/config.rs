//! Configuration using Figment
//!
//! Configuration is layered:
//! 1. Built-in defaults (the production controller layout)
//! 2. `config/default.toml` (or a file given on the command line)
//! 3. Environment variables prefixed with `FINS_DAQ_`, nested keys separated by `__`
//!
//! # Example
//! ```no_run
//! use fins_daq::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("PLC endpoint: {}", settings.plc.endpoint());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! `FINS_DAQ_PLC__IP=192.168.0.10` overrides `plc.ip`.

use crate::data::{Area, ZONES};
use crate::hardware::fins::Address;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Name and logging
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Controller endpoint and FINS nodes
    #[serde(default)]
    pub plc: PlcConfig,
    /// Polling and log storage
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Controller memory layout
    #[serde(default)]
    pub addresses: AddressMap,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output
    #[default]
    Pretty,
    /// Single-line human-readable output
    Compact,
    /// One JSON object per event
    Json,
}

/// Controller endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    /// PLC address
    #[serde(default = "default_ip")]
    pub ip: IpAddr,
    /// FINS UDP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// FINS node number of the PLC
    #[serde(default = "default_plc_node")]
    pub plc_node: u8,
    /// FINS node number of this host
    #[serde(default = "default_pc_node")]
    pub pc_node: u8,
    /// Reply timeout per request in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Trigger monitor scheduling and storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Tick period in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Directory receiving per-session CSV files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Capacity of the event bus
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// A 2×8 parameter table laid out as `base + row * row_stride + zone * zone_stride`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableAddresses {
    /// Memory area code
    pub area: u8,
    /// Word of P1 zone 1
    pub base: u16,
    /// Words between P1 and P2 of one zone
    #[serde(default = "default_row_stride")]
    pub row_stride: u16,
    /// Words between consecutive zones
    #[serde(default = "default_zone_stride")]
    pub zone_stride: u16,
}

impl TableAddresses {
    /// Word address of `row` (0 = P1, 1 = P2) and zero-based `zone`.
    ///
    /// `None` if the address leaves the 16-bit range.
    pub fn word(&self, row: usize, zone: usize) -> Option<u16> {
        let offset = row as u64 * u64::from(self.row_stride) + zone as u64 * u64::from(self.zone_stride);
        u16::try_from(u64::from(self.base) + offset).ok()
    }

    /// All 16 addresses in row-major, zone-ascending order, or `None` if any
    /// cell leaves the 16-bit range.
    pub fn cells(&self) -> Option<Vec<Address>> {
        (0..2)
            .flat_map(|r| (0..ZONES).map(move |z| (r, z)))
            .map(|(r, z)| self.word(r, z).map(|w| Address::word(self.area, w)))
            .collect()
    }
}

/// Per-tube block of process channels (PTC, CTC, SP, MV; 8 words each).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessBlock {
    /// Memory area code
    pub area: u8,
    /// First PTC word of tube 1
    pub base: u16,
    /// Words between consecutive tubes
    pub tube_stride: u16,
    /// Words between consecutive channel families
    pub channel_stride: u16,
}

impl ProcessBlock {
    /// First word of channel family `channel` (0 = PTC .. 3 = MV) for `tube`.
    ///
    /// Tube 0 is treated as tube 1. `None` if the address leaves the 16-bit range.
    pub fn channel_word(&self, tube: u16, channel: u16) -> Option<u16> {
        let addr = u32::from(self.base)
            + u32::from(tube.saturating_sub(1)) * u32::from(self.tube_stride)
            + u32::from(channel) * u32::from(self.channel_stride);
        u16::try_from(addr).ok()
    }
}

/// Fixed controller addresses used by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressMap {
    /// Liveness bit, also used as the connect probe
    #[serde(default = "default_heartbeat")]
    pub heartbeat: Address,
    /// Parameter trigger bit
    #[serde(default = "default_param_trigger")]
    pub param_trigger: Address,
    /// Temperature logging trigger bit
    #[serde(default = "default_temp_trigger")]
    pub temp_trigger: Address,
    /// Normal area selector bit
    #[serde(default = "default_area_normal")]
    pub area_normal: Address,
    /// High area selector bit
    #[serde(default = "default_area_high")]
    pub area_high: Address,
    /// Two words: tube id, job id
    #[serde(default = "default_job_info")]
    pub job_info: Address,
    /// Per-tube process channels
    #[serde(default = "default_process")]
    pub process: ProcessBlock,
    /// Normal area parameter table
    #[serde(default = "default_normal_table")]
    pub normal_table: TableAddresses,
    /// High area parameter table
    #[serde(default = "default_high_table")]
    pub high_table: TableAddresses,
}

impl AddressMap {
    /// Parameter table grid for `area`.
    pub fn table(&self, area: Area) -> &TableAddresses {
        match area {
            Area::Normal => &self.normal_table,
            Area::High => &self.high_table,
        }
    }
}

// Default value functions
fn default_name() -> String {
    "FINS DAQ".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(172, 22, 80, 1))
}

fn default_port() -> u16 {
    9600
}

fn default_plc_node() -> u8 {
    1
}

fn default_pc_node() -> u8 {
    3
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("temperature_logs")
}

fn default_event_capacity() -> usize {
    crate::messages::DEFAULT_EVENT_CAPACITY
}

fn default_row_stride() -> u16 {
    1
}

fn default_zone_stride() -> u16 {
    5
}

fn default_heartbeat() -> Address {
    Address::bit(0xAF, 0, 0)
}

fn default_param_trigger() -> Address {
    Address::bit(0xAF, 1, 1)
}

fn default_temp_trigger() -> Address {
    Address::bit(0xAF, 1, 2)
}

fn default_area_normal() -> Address {
    Address::bit(0xAF, 1, 3)
}

fn default_area_high() -> Address {
    Address::bit(0xAF, 1, 4)
}

fn default_job_info() -> Address {
    Address::word(0xAF, 500)
}

fn default_process() -> ProcessBlock {
    ProcessBlock {
        area: 0xA0,
        base: 17550,
        tube_stride: 800,
        channel_stride: 10,
    }
}

fn default_normal_table() -> TableAddresses {
    TableAddresses {
        area: 0xA0,
        base: 840,
        row_stride: default_row_stride(),
        zone_stride: default_zone_stride(),
    }
}

fn default_high_table() -> TableAddresses {
    TableAddresses {
        area: 0xA0,
        base: 842,
        row_stride: default_row_stride(),
        zone_stride: default_zone_stride(),
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
            plc_node: default_plc_node(),
            pc_node: default_pc_node(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl PlcConfig {
    /// Socket address of the PLC.
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Per-request reply timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            log_dir: default_log_dir(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl MonitorConfig {
    /// Tick period.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for AddressMap {
    fn default() -> Self {
        Self {
            heartbeat: default_heartbeat(),
            param_trigger: default_param_trigger(),
            temp_trigger: default_temp_trigger(),
            area_normal: default_area_normal(),
            area_high: default_area_high(),
            job_info: default_job_info(),
            process: default_process(),
            normal_table: default_normal_table(),
            high_table: default_high_table(),
        }
    }
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path. A missing file leaves the defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("FINS_DAQ_").split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.plc.timeout_ms == 0 {
            return Err("plc.timeout_ms must be greater than 0".to_string());
        }
        if self.monitor.tick_ms == 0 {
            return Err("monitor.tick_ms must be greater than 0".to_string());
        }
        if self.monitor.log_dir.as_os_str().is_empty() {
            return Err("monitor.log_dir must not be empty".to_string());
        }

        let bits = [
            ("heartbeat", self.addresses.heartbeat),
            ("param_trigger", self.addresses.param_trigger),
            ("temp_trigger", self.addresses.temp_trigger),
            ("area_normal", self.addresses.area_normal),
            ("area_high", self.addresses.area_high),
        ];
        for (name, addr) in &bits {
            if addr.bit > 15 {
                return Err(format!("Invalid bit offset {} for {name}. Must be 0-15", addr.bit));
            }
        }

        // Trigger and area selector bits must be distinct lines.
        let mut seen = std::collections::HashSet::new();
        for (name, addr) in &bits[1..] {
            if !seen.insert(*addr) {
                return Err(format!("Duplicate trigger address for {name}: {addr}"));
            }
        }

        if self.addresses.process.channel_word(1, 3).is_none() {
            return Err("addresses.process does not fit in the 16-bit word range".to_string());
        }
        for area in Area::ALL {
            if self.addresses.table(area).cells().is_none() {
                return Err(format!(
                    "addresses.{area}_table does not fit in the 16-bit word range"
                ));
            }
        }

        Ok(())
    }
}
