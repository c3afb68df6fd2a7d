use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::protocol::{
    health::DEFAULT_MAX_MISSED_POLLS,
    multiplexer::DEFAULT_PORT_SWITCH_DELAY,
    scheduler::{PollTimings, DEFAULT_POLL_INTERVAL, DEFAULT_RESPONSE_TIMEOUT},
};

pub const ENV_SERIAL_PORT: &str = "FAN_TEMP_SERIAL_PORT";
pub const ENV_BAUD_RATE: &str = "FAN_TEMP_BAUD_RATE";
pub const ENV_READ_TIMEOUT: &str = "FAN_TEMP_READ_TIMEOUT";
pub const ENV_CPU_TEMP_CMD: &str = "FAN_TEMP_CPU_CMD";
pub const ENV_NVME_TEMP_CMD: &str = "FAN_TEMP_NVME_CMD";
pub const ENV_VERBOSE: &str = "FAN_TEMP_VERBOSE";

pub const SUPPORTED_BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

/// Only baud rates both line drivers are specified for are accepted.
pub fn parse_baud_rate(value: &str) -> Option<u32> {
    let baud: u32 = value.trim().parse().ok()?;
    SUPPORTED_BAUD_RATES.contains(&baud).then_some(baud)
}

/// Answering-side configuration, loaded from `FAN_TEMP_*` environment
/// variables. All variables are required; problems are collected and
/// reported together so a unit file can be fixed in one pass.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub serial_port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub cpu_temp_cmd: String,
    pub nvme_temp_cmd: String,
    pub verbose: bool,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut problems: Vec<String> = Vec::new();
        let mut require = |name: &str| -> Option<String> {
            match lookup(name).filter(|v| !v.trim().is_empty()) {
                Some(value) => Some(value),
                None => {
                    problems.push(format!("{name} environment variable is not set"));
                    None
                }
            }
        };

        let serial_port = require(ENV_SERIAL_PORT);
        let baud_raw = require(ENV_BAUD_RATE);
        let timeout_raw = require(ENV_READ_TIMEOUT);
        let cpu_temp_cmd = require(ENV_CPU_TEMP_CMD);
        let nvme_temp_cmd = require(ENV_NVME_TEMP_CMD);
        let verbose_raw = require(ENV_VERBOSE);

        let baud_rate = baud_raw.as_deref().and_then(|raw| {
            let parsed = parse_baud_rate(raw);
            if parsed.is_none() {
                problems.push(format!("Invalid baud rate: {raw}"));
            }
            parsed
        });

        let read_timeout = timeout_raw.as_deref().and_then(|raw| {
            let secs: Option<u64> = raw.trim().parse().ok().filter(|&s| s > 0);
            if secs.is_none() {
                problems.push(format!("Invalid read timeout: {raw}"));
            }
            secs.map(Duration::from_secs)
        });

        let verbose = verbose_raw
            .as_deref()
            .map(|raw| raw.trim() != "0")
            .unwrap_or(false);

        if !problems.is_empty() {
            return Err(anyhow!("Configuration errors:\n  {}", problems.join("\n  ")));
        }

        // All Nones pushed a problem above, so these cannot fire.
        Ok(Self {
            serial_port: serial_port.ok_or_else(|| anyhow!("serial port missing"))?,
            baud_rate: baud_rate.ok_or_else(|| anyhow!("baud rate missing"))?,
            read_timeout: read_timeout.ok_or_else(|| anyhow!("read timeout missing"))?,
            cpu_temp_cmd: cpu_temp_cmd.ok_or_else(|| anyhow!("cpu command missing"))?,
            nvme_temp_cmd: nvme_temp_cmd.ok_or_else(|| anyhow!("nvme command missing"))?,
            verbose,
        })
    }
}

/// Polling-side configuration, built from CLI arguments.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// One serial port per polled device, in device order.
    pub ports: Vec<String>,
    pub baud_rate: u32,
    pub timings: PollTimings,
    pub port_switch_delay: Duration,
    /// Per-read window on each channel.
    pub read_timeout: Duration,
    pub max_missed_polls: u32,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            baud_rate: 115200,
            timings: PollTimings {
                poll_interval: DEFAULT_POLL_INTERVAL,
                response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            },
            port_switch_delay: DEFAULT_PORT_SWITCH_DELAY,
            read_timeout: Duration::from_millis(50),
            max_missed_polls: DEFAULT_MAX_MISSED_POLLS,
        }
    }
}
