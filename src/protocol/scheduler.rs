use std::time::{Duration, Instant};

use flume::Sender;

use super::{
    accumulator::ResponseAccumulator,
    health::{DeviceSummary, HealthTracker, DEFAULT_MAX_MISSED_POLLS},
    multiplexer::ChannelMultiplexer,
    transport::TransportRead,
    wire::{self, Reading},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(200);

const COLLECT_CHUNK: usize = 64;

/// Timing knobs for the master-side poll loop. All of these are deployment
/// configuration, not part of the wire protocol.
#[derive(Debug, Clone, Copy)]
pub struct PollTimings {
    /// Gap between the starts of two full poll cycles.
    pub poll_interval: Duration,
    /// How long one device may take to answer a `POLL`.
    pub response_timeout: Duration,
}

impl Default for PollTimings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Events pushed to whoever consumes the poll results (fan-speed logic, CLI
/// output). Mirrors the runtime-event channel pattern used elsewhere: the
/// scheduler never calls back into its consumer.
#[derive(Debug, Clone)]
pub enum MasterEvent {
    Reading { device: usize, reading: Reading },
    DeviceDisconnected { device: usize },
    CycleComplete(CycleSummary),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CycleSummary {
    pub devices: Vec<DeviceSummary>,
    pub highest_cpu: f32,
    pub highest_nvme: f32,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// Between cycles; no channel active.
    Idle,
    /// A device is selected but `POLL` has not gone out yet.
    AwaitingPollStart { device: usize },
    /// `POLL` is on the wire; draining bytes until a line or the timeout.
    Collecting {
        device: usize,
        sent_at: Instant,
        responded: bool,
    },
}

/// Round-robin poll state machine over N multiplexed channels.
///
/// `tick` never blocks beyond one bounded transport read, so the owning loop
/// can interleave other periodic work (RPM computation, event draining)
/// between calls.
pub struct PollScheduler {
    mux: ChannelMultiplexer,
    accumulator: ResponseAccumulator,
    health: HealthTracker,
    timings: PollTimings,
    evt_tx: Sender<MasterEvent>,
    phase: Phase,
    last_cycle_start: Option<Instant>,
}

impl PollScheduler {
    pub fn new(mux: ChannelMultiplexer, timings: PollTimings, evt_tx: Sender<MasterEvent>) -> Self {
        Self::with_max_missed(mux, timings, DEFAULT_MAX_MISSED_POLLS, evt_tx)
    }

    pub fn with_max_missed(
        mux: ChannelMultiplexer,
        timings: PollTimings,
        max_missed_polls: u32,
        evt_tx: Sender<MasterEvent>,
    ) -> Self {
        let devices = mux.len();
        Self {
            mux,
            accumulator: ResponseAccumulator::new(devices),
            health: HealthTracker::new(devices, max_missed_polls),
            timings,
            evt_tx,
            phase: Phase::Idle,
            last_cycle_start: None,
        }
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// Advance the state machine by one step. Transport failures are logged
    /// and degrade into missed polls; they never tear the loop down.
    pub fn tick(&mut self) {
        match self.phase {
            Phase::Idle => {
                let due = self
                    .last_cycle_start
                    .map(|t| t.elapsed() >= self.timings.poll_interval)
                    .unwrap_or(true);
                if due {
                    log::debug!("Starting device polling sequence");
                    self.last_cycle_start = Some(Instant::now());
                    self.phase = Phase::AwaitingPollStart { device: 0 };
                }
            }
            Phase::AwaitingPollStart { device } => {
                self.send_poll(device);
            }
            Phase::Collecting {
                device,
                sent_at,
                responded,
            } => {
                self.collect(device, sent_at, responded);
            }
        }
    }

    fn send_poll(&mut self, device: usize) {
        if let Err(err) = self.mux.activate(device) {
            log::warn!("Channel switch to device {} failed: {err}", device + 1);
        }

        let sent = match self.mux.active_channel() {
            Some(channel) => {
                let result = channel
                    .write_all(wire::POLL_COMMAND.as_bytes())
                    .and_then(|_| channel.write_all(b"\n"))
                    .and_then(|_| channel.flush_output());
                match result {
                    Ok(()) => true,
                    Err(err) => {
                        log::warn!("Failed to send POLL to device {}: {err}", device + 1);
                        false
                    }
                }
            }
            None => false,
        };

        if sent {
            log::debug!("Polling device {} (sent: POLL)", device + 1);
        }
        // Even a failed send enters the collect phase: the slot then times
        // out and is counted as a missed poll instead of being retried in a
        // tight loop.
        self.phase = Phase::Collecting {
            device,
            sent_at: Instant::now(),
            responded: false,
        };
    }

    fn collect(&mut self, device: usize, sent_at: Instant, mut responded: bool) {
        let mut chunk = [0u8; COLLECT_CHUNK];
        let read = match self.mux.active_channel() {
            Some(channel) => channel.read(&mut chunk),
            None => Ok(TransportRead::Timeout),
        };

        match read {
            Ok(TransportRead::Data(n)) => {
                for &byte in &chunk[..n] {
                    if let Some(line) = self.accumulator.push_byte(device, byte) {
                        self.handle_response(device, &line);
                        responded = true;
                        break;
                    }
                }
            }
            Ok(TransportRead::Timeout) => {}
            Err(err) => {
                // No bytes available and a broken channel look the same from
                // the scheduler's point of view: the slot just times out.
                log::warn!("Read error on device {}: {err}", device + 1);
            }
        }

        // A response that lands in the same tick the timeout would fire wins:
        // the byte drain above ran before this check.
        if responded {
            self.finish_slot(device, true);
        } else if sent_at.elapsed() >= self.timings.response_timeout {
            self.finish_slot(device, false);
        } else {
            self.phase = Phase::Collecting {
                device,
                sent_at,
                responded,
            };
        }
    }

    fn handle_response(&mut self, device: usize, line: &str) {
        let body = wire::clean_command(line);
        if body.is_empty() {
            return;
        }
        match wire::parse_reading(body) {
            Some(reading) => {
                self.health.on_success(device, reading);
                let _ = self.evt_tx.send(MasterEvent::Reading { device, reading });
            }
            None => {
                // Garbled but present: the device is alive, so the line still
                // counts as a response and must not feed the miss counter.
                log::info!("Device {} sent unknown response: {body}", device + 1);
            }
        }
    }

    fn finish_slot(&mut self, device: usize, responded: bool) {
        if !responded {
            log::info!("Device {} did not respond", device + 1);
            if self.health.on_missed(device) {
                let _ = self.evt_tx.send(MasterEvent::DeviceDisconnected { device });
            }
        }
        self.accumulator.clear(device);

        let next = device + 1;
        if next >= self.mux.len() {
            self.mux.deactivate();
            self.phase = Phase::Idle;
            log::debug!("Completed polling all devices");
            let (highest_cpu, highest_nvme) = self.health.highest_temperatures();
            let _ = self.evt_tx.send(MasterEvent::CycleComplete(CycleSummary {
                devices: self.health.summary(),
                highest_cpu,
                highest_nvme,
            }));
        } else {
            self.phase = Phase::AwaitingPollStart { device: next };
        }
    }
}
