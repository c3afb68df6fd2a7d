use chrono::Local;
use serde::{Deserialize, Serialize};

use super::wire::{Reading, TimestampedReading};

pub const DEFAULT_MAX_MISSED_POLLS: u32 = 10;

/// Connectivity state for one polled device.
#[derive(Debug, Clone, Default)]
pub struct DeviceHealth {
    pub connected: bool,
    pub missed_polls: u32,
    pub last_reading: Option<TimestampedReading>,
}

/// Per-device health line for the post-cycle summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device: usize,
    pub connected: bool,
    pub missed_polls: u32,
    pub cpu_temp: Option<f32>,
    pub nvme_temp: Option<f32>,
}

/// Tracks missed polls per device and derives connect/disconnect transitions.
///
/// Pure state machine: the only observable effect besides mutation is the
/// `true` returned by `on_missed` when a device crosses the disconnect
/// threshold, which the caller forwards to the fan-speed consumer.
pub struct HealthTracker {
    devices: Vec<DeviceHealth>,
    max_missed_polls: u32,
}

impl HealthTracker {
    pub fn new(device_count: usize, max_missed_polls: u32) -> Self {
        Self {
            devices: vec![DeviceHealth::default(); device_count],
            max_missed_polls,
        }
    }

    /// A well-formed response was accepted: counter resets, the device is
    /// connected no matter what it was before, and the reading is stored.
    pub fn on_success(&mut self, device: usize, reading: Reading) {
        let d = &mut self.devices[device];
        d.missed_polls = 0;
        d.connected = true;
        d.last_reading = Some(reading.with_timestamp(Local::now()));
        log::info!(
            "Device {} temperatures - CPU: {:.2}C, NVME: {:.2}C",
            device + 1,
            reading.cpu_temp,
            reading.nvme_temp
        );
    }

    /// The poll slot elapsed without a valid response. Returns `true` exactly
    /// when this miss disconnects a previously connected device.
    pub fn on_missed(&mut self, device: usize) -> bool {
        let d = &mut self.devices[device];
        d.missed_polls += 1;
        log::info!("Device {} missed polls: {}", device + 1, d.missed_polls);

        if d.missed_polls >= self.max_missed_polls && d.connected {
            d.connected = false;
            log::warn!("Device {} disconnected (too many missed polls)", device + 1);
            return true;
        }
        false
    }

    pub fn is_connected(&self, device: usize) -> bool {
        self.devices[device].connected
    }

    pub fn missed_polls(&self, device: usize) -> u32 {
        self.devices[device].missed_polls
    }

    pub fn last_reading(&self, device: usize) -> Option<TimestampedReading> {
        self.devices[device].last_reading
    }

    /// Highest CPU and NVMe temperature across devices with a stored
    /// reading. Feeds the (external) fan curve.
    pub fn highest_temperatures(&self) -> (f32, f32) {
        let mut highest_cpu = 0.0f32;
        let mut highest_nvme = 0.0f32;
        for d in &self.devices {
            if let Some(r) = d.last_reading {
                if r.cpu_temp > highest_cpu {
                    highest_cpu = r.cpu_temp;
                }
                if r.nvme_temp > highest_nvme {
                    highest_nvme = r.nvme_temp;
                }
            }
        }
        (highest_cpu, highest_nvme)
    }

    pub fn summary(&self) -> Vec<DeviceSummary> {
        self.devices
            .iter()
            .enumerate()
            .map(|(i, d)| DeviceSummary {
                device: i,
                connected: d.connected,
                missed_polls: d.missed_polls,
                cpu_temp: d.last_reading.map(|r| r.cpu_temp),
                nvme_temp: d.last_reading.map(|r| r.nvme_temp),
            })
            .collect()
    }
}
