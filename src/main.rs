//! CLI Entry Point for fins-daq
//!
//! Provides command-line interface for:
//! - Running the trigger monitor against a PLC (or a simulated one)
//! - One-shot word/bit diagnostics
//! - Offline tuning calculation over a logged session
//!
//! # Usage
//!
//! ```bash
//! fins-daq monitor
//! fins-daq monitor --simulate --duration-secs 30
//! fins-daq read-word --area 0xA0 --addr 840 --count 5
//! fins-daq write-bit --area 0xAF --addr 2 --bit 1 --on true
//! fins-daq tune temperature_logs/temperature_T1_7_normal_20260314_090000.csv --json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fins_daq::config::Settings;
use fins_daq::data::temperature_log;
use fins_daq::data::tuning;
use fins_daq::hardware::fins::frame::encode_signed;
use fins_daq::hardware::{MockPlc, PlcConnector};
use fins_daq::logging;
use fins_daq::messages::{DaqEvent, EventBus};
use fins_daq::monitor::{MonitorHandle, TriggerMonitor};
use fins_daq::DaqError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "fins-daq")]
#[command(about = "Trigger-driven temperature logging and tuning over FINS/UDP", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = fins_daq::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trigger monitor until Ctrl+C
    Monitor {
        /// Use an in-memory simulated controller instead of UDP
        #[arg(long)]
        simulate: bool,

        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Read one or more words
    ReadWord {
        #[arg(long, value_parser = parse_u8)]
        area: u8,
        #[arg(long)]
        addr: u16,
        #[arg(long, default_value = "1")]
        count: u16,
    },

    /// Read one bit
    ReadBit {
        #[arg(long, value_parser = parse_u8)]
        area: u8,
        #[arg(long)]
        addr: u16,
        #[arg(long)]
        bit: u8,
    },

    /// Write one word (signed values are encoded to wire form)
    WriteWord {
        #[arg(long, value_parser = parse_u8)]
        area: u8,
        #[arg(long)]
        addr: u16,
        #[arg(long, allow_hyphen_values = true)]
        value: i32,
    },

    /// Set or clear one bit (read-modify-write)
    WriteBit {
        #[arg(long, value_parser = parse_u8)]
        area: u8,
        #[arg(long)]
        addr: u16,
        #[arg(long)]
        bit: u8,
        #[arg(long, action = clap::ArgAction::Set)]
        on: bool,
    },

    /// Run the tuning calculation over a session CSV
    Tune {
        csv: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Parse `0xAF`-style hex or decimal.
fn parse_u8(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid memory area '{s}': {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    settings.validate().map_err(DaqError::Configuration)?;
    logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Monitor {
            simulate,
            duration_secs,
        } => run_monitor(&settings, simulate, duration_secs).await,
        Commands::Tune { csv, json } => tune(csv, json),
        command => run_diagnostic(&settings, command).await,
    }
}

fn build_connector(settings: &Settings, events: EventBus) -> Arc<PlcConnector> {
    Arc::new(
        PlcConnector::new(events)
            .with_heartbeat(settings.addresses.heartbeat)
            .with_timeout(settings.plc.timeout()),
    )
}

async fn connect(settings: &Settings, connector: &PlcConnector) -> Result<()> {
    let endpoint = settings.plc.endpoint();
    if !connector
        .connect(endpoint, settings.plc.plc_node, settings.plc.pc_node)
        .await
    {
        bail!("PLC connection failed: no heartbeat reply from {endpoint}");
    }
    Ok(())
}

async fn run_monitor(settings: &Settings, simulate: bool, duration_secs: Option<u64>) -> Result<()> {
    let events = EventBus::new(settings.monitor.event_capacity);
    let connector = build_connector(settings, events.clone());

    if simulate {
        // Nothing inspects the simulated request log.
        let plc = Arc::new(MockPlc::new().with_log_capacity(0));
        seed_simulation(&plc, settings).await;
        if !connector
            .connect_with(plc, settings.plc.plc_node, settings.plc.pc_node)
            .await
        {
            bail!("Simulated PLC did not answer");
        }
    } else {
        connect(settings, &connector).await?;
    }

    if settings.plc.timeout() >= settings.monitor.tick() {
        tracing::warn!(
            timeout_ms = settings.plc.timeout_ms,
            tick_ms = settings.monitor.tick_ms,
            "Request timeout is not below the tick period; ticks are skipped while the PLC is silent"
        );
    }

    let mut rx = events.subscribe();
    let observer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(DaqEvent::ConnectionStatusChanged(connected)) => {
                    tracing::info!(connected, "Connection status changed");
                }
                Ok(DaqEvent::TemperatureLogUpdated { normal, high }) => {
                    tracing::info!(
                        normal_rows = normal.len(),
                        high_rows = high.len(),
                        "Temperature log updated"
                    );
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event observer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let monitor = TriggerMonitor::new(
        connector.clone(),
        settings.addresses.clone(),
        settings.monitor.log_dir.clone(),
    );
    let handle = MonitorHandle::spawn(monitor, settings.monitor.tick());

    match duration_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?,
    }

    let monitor = handle.stop().await?;
    let snapshot = monitor.snapshot();
    tracing::info!(
        triggers = snapshot.trigger_count,
        heartbeats = snapshot.heartbeat_count,
        "Monitor finished"
    );

    connector.disconnect().await;
    observer.abort();
    Ok(())
}

/// Give the simulated controller a heartbeat and a plausible tube 1 block.
async fn seed_simulation(plc: &MockPlc, settings: &Settings) {
    let a = &settings.addresses;
    plc.set_bit(a.heartbeat.area, a.heartbeat.word, a.heartbeat.bit, true)
        .await;
    plc.set_words(a.job_info.area, a.job_info.word, &[1, 1]).await;

    let block = a.process;
    let values: [(u16, u16); 4] = [(0, 2480), (1, 2450), (2, 2500), (3, 35)];
    for (channel, value) in values {
        if let Some(word) = block.channel_word(1, channel) {
            plc.set_words(block.area, word, &[value; 8]).await;
        }
    }
}

async fn run_diagnostic(settings: &Settings, command: Commands) -> Result<()> {
    let connector = build_connector(settings, EventBus::default());
    connect(settings, &connector).await?;

    let outcome = match command {
        Commands::ReadWord { area, addr, count } => {
            match connector.read_word(area, addr, count).await {
                Some(words) => {
                    for (i, w) in words.iter().enumerate() {
                        println!("{area:#04X}:{} = {w} ({:#06X})", addr as usize + i, w);
                    }
                    Ok(())
                }
                None => Err(anyhow::anyhow!("read failed")),
            }
        }
        Commands::ReadBit { area, addr, bit } => {
            match connector.read_trigger_bit(area, addr, bit).await {
                Some(on) => {
                    println!("{area:#04X}:{addr}.{bit:02} = {}", u8::from(on));
                    Ok(())
                }
                None => Err(anyhow::anyhow!("read failed")),
            }
        }
        Commands::WriteWord { area, addr, value } => {
            if connector.write_word(area, addr, encode_signed(value)).await {
                println!("{area:#04X}:{addr} <- {value}");
                Ok(())
            } else {
                Err(anyhow::anyhow!("write failed"))
            }
        }
        Commands::WriteBit { area, addr, bit, on } => {
            if connector.write_response_bit(area, addr, bit, on).await {
                println!("{area:#04X}:{addr}.{bit:02} <- {}", u8::from(on));
                Ok(())
            } else {
                Err(anyhow::anyhow!("write failed"))
            }
        }
        Commands::Monitor { .. } | Commands::Tune { .. } => Ok(()),
    };

    connector.disconnect().await;
    outcome
}

fn tune(csv: PathBuf, json: bool) -> Result<()> {
    let rows = temperature_log::read_rows(&csv)
        .with_context(|| format!("Failed to read {}", csv.display()))?;
    let result = tuning::calculate(&rows);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Retain point: {}", result.retain_point);
        println!("{:<12}{}", "Zone", (1..=8).map(|z| format!("{:>6}", format!("Z{z}"))).collect::<String>());
        for (label, values) in [
            ("P1", result.p1),
            ("Initial P2", result.initial_p2),
            ("P2 adjust", result.p2_adjust),
        ] {
            println!("{label:<12}{}", values.iter().map(|v| format!("{v:>6}")).collect::<String>());
        }
    }
    Ok(())
}
