//! # FINS DAQ Core Library
//!
//! Trigger-driven temperature acquisition and parameter tuning for controllers
//! speaking FINS over UDP. The library holds the whole pipeline so the CLI
//! (`main.rs`) and tests share one implementation.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: the FINS protocol client (`hardware::fins`), the fail-soft
//!   `PlcConnector` facade, and `MockPlc`, a simulated controller.
//! - **`monitor`**: the `TriggerMonitor` state machine and the task that drives it on a
//!   fixed tick.
//! - **`data`**: per-session temperature CSV logs and the pure tuning calculator.
//! - **`messages`**: the event bus (connection status, temperature log updates) and the
//!   commands accepted by the running monitor.
//! - **`config`**: Figment-based configuration with validation. See `config::Settings`.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`error`**: `FinsError` for protocol faults and `DaqError` for everything else.
//!
//! ## Data Flow
//!
//! ```text
//! MonitorHandle ──tick──> TriggerMonitor ──> PlcConnector ──> FinsClient ──> UDP
//!                              │   ▲
//!                   LogSession │   │ TuningResult
//!                              ▼   │
//!                        temperature_logs/*.csv
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod messages;
pub mod monitor;

pub use error::{AppResult, DaqError, FinsError};
