use anyhow::{anyhow, Result};
use chrono::Local;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    core::tachometer::{Tachometer, RPM_SAMPLE_INTERVAL},
    protocol::{
        health::DeviceSummary,
        multiplexer::ChannelMultiplexer,
        scheduler::{CycleSummary, MasterEvent, PollScheduler},
        transport::{SerialTransport, Transport},
    },
};

use super::config::MasterConfig;

/// Pause between ticks while waiting out the poll interval.
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// One JSONL record per completed poll cycle.
#[derive(Debug, Serialize)]
struct CycleRecord<'a> {
    timestamp: String,
    fan_rpm: u32,
    highest_cpu: f32,
    highest_nvme: f32,
    devices: &'a [DeviceSummary],
}

fn cycle_record_json(summary: &CycleSummary, fan_rpm: u32) -> Result<String> {
    let record = CycleRecord {
        timestamp: Local::now().to_rfc3339(),
        fan_rpm,
        highest_cpu: summary.highest_cpu,
        highest_nvme: summary.highest_nvme,
        devices: &summary.devices,
    };
    Ok(serde_json::to_string(&record)?)
}

/// Entry point for the `master` subcommand: poll every configured channel
/// round-robin and print one JSON line per completed cycle.
pub fn run(config: &MasterConfig, running: Arc<AtomicBool>) -> Result<()> {
    if config.ports.is_empty() {
        return Err(anyhow!("At least one serial port is required"));
    }

    log::info!(
        "Polling {} device(s) at baud {} (interval: {}ms, response timeout: {}ms)",
        config.ports.len(),
        config.baud_rate,
        config.timings.poll_interval.as_millis(),
        config.timings.response_timeout.as_millis()
    );

    let channels = config
        .ports
        .iter()
        .map(|port| {
            SerialTransport::open(port, config.baud_rate, config.read_timeout)
                .map(|t| Box::new(t) as Box<dyn Transport>)
        })
        .collect::<Result<Vec<_>>>()?;

    let mux = ChannelMultiplexer::new(channels, config.port_switch_delay);
    let (evt_tx, evt_rx) = flume::unbounded();
    let mut scheduler =
        PollScheduler::with_max_missed(mux, config.timings, config.max_missed_polls, evt_tx);

    let tachometer = Tachometer::new();
    let mut last_rpm_sample = Instant::now();

    while running.load(Ordering::Relaxed) {
        scheduler.tick();

        for event in evt_rx.try_iter() {
            match event {
                MasterEvent::Reading { device, reading } => {
                    log::debug!(
                        "Device {} reported CPU {:.2}C / NVME {:.2}C",
                        device + 1,
                        reading.cpu_temp,
                        reading.nvme_temp
                    );
                }
                MasterEvent::DeviceDisconnected { device } => {
                    log::warn!("Device {} marked disconnected", device + 1);
                }
                MasterEvent::CycleComplete(summary) => {
                    let json = cycle_record_json(&summary, tachometer.rpm())?;
                    println!("{json}");
                }
            }
        }

        if last_rpm_sample.elapsed() >= RPM_SAMPLE_INTERVAL {
            tachometer.sample_rpm();
            last_rpm_sample = Instant::now();
        }

        // Collect-phase reads block on the channel timeout; only the idle
        // wait between cycles needs explicit pacing.
        if scheduler.is_idle() {
            std::thread::sleep(IDLE_SLEEP);
        }
    }

    log::info!("Polling stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_record_serializes_summary_fields() {
        let summary = CycleSummary {
            devices: vec![DeviceSummary {
                device: 0,
                connected: true,
                missed_polls: 0,
                cpu_temp: Some(45.5),
                nvme_temp: Some(38.0),
            }],
            highest_cpu: 45.5,
            highest_nvme: 38.0,
        };

        let json = cycle_record_json(&summary, 1200).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["fan_rpm"], 1200);
        assert_eq!(value["highest_cpu"], 45.5);
        assert_eq!(value["devices"][0]["connected"], true);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn empty_port_list_is_rejected() {
        let config = MasterConfig::default();
        let running = Arc::new(AtomicBool::new(true));
        assert!(run(&config, running).is_err());
    }
}
