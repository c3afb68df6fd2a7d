use std::process::Command;

use crate::protocol::wire::Reading;

pub const DEFAULT_CPU_TEMP: f32 = 61.0;
pub const DEFAULT_NVME_TEMP: f32 = 59.0;

// Plausibility bounds for parsed values. Anything outside is treated as a
// parse failure and falls back to the defaults, so a garbled tool output can
// never report an impossible temperature.
const CPU_TEMP_MAX: f32 = 120.0;
const NVME_TEMP_MAX: f32 = 150.0;

/// Source of the two temperatures reported in a poll response.
///
/// The production implementation shells out to the platform tools; tests
/// substitute a fixed-value probe.
pub trait TemperatureProbe: Send {
    fn sample(&mut self) -> Reading;
}

/// Probe that runs the configured shell commands (`vcgencmd` for the CPU,
/// `smartctl` for the NVMe drive) and parses their text output.
///
/// Deliberately fail-safe: any failure along the way (spawn error, no
/// parsable number, out-of-range value) yields the conservative defaults
/// rather than an error. The fan controller on the other end of the wire
/// treats the defaults as "warm", which keeps the fans moving when the
/// sensors are unreadable.
pub struct CommandProbe {
    cpu_cmd: String,
    nvme_cmd: String,
}

impl CommandProbe {
    pub fn new(cpu_cmd: impl Into<String>, nvme_cmd: impl Into<String>) -> Self {
        Self {
            cpu_cmd: cpu_cmd.into(),
            nvme_cmd: nvme_cmd.into(),
        }
    }

    fn run(cmd: &str) -> Option<String> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .map_err(|err| {
                log::error!("Failed to run temperature command '{cmd}': {err}");
            })
            .ok()?;
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TemperatureProbe for CommandProbe {
    fn sample(&mut self) -> Reading {
        let cpu_temp = Self::run(&self.cpu_cmd)
            .and_then(|out| parse_cpu_output(&out))
            .unwrap_or(DEFAULT_CPU_TEMP);
        let nvme_temp = Self::run(&self.nvme_cmd)
            .and_then(|out| parse_nvme_output(&out))
            .unwrap_or(DEFAULT_NVME_TEMP);
        Reading {
            cpu_temp,
            nvme_temp,
        }
    }
}

/// Longest numeric prefix of `s` as a float ("61.2'C" parses as 61.2).
fn leading_float(s: &str) -> Option<f32> {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    s[..end].parse().ok()
}

/// Parse `vcgencmd measure_temp` output: `temp=61.2'C`.
pub fn parse_cpu_output(output: &str) -> Option<f32> {
    let idx = output.find("temp=")?;
    let value = leading_float(&output[idx + 5..])?;
    (value > 0.0 && value < CPU_TEMP_MAX).then_some(value)
}

/// Parse `smartctl` output: the first line starting with `Temperature:`
/// whose value passes the sanity bound.
pub fn parse_nvme_output(output: &str) -> Option<f32> {
    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("Temperature:") {
            if let Some(value) = leading_float(rest) {
                if value > 0.0 && value < NVME_TEMP_MAX {
                    return Some(value);
                }
            }
        }
    }
    None
}
