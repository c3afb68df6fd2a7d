use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    core::temperature::{CommandProbe, TemperatureProbe},
    protocol::{
        framer::{FramerPoll, LineFramer},
        reconnect::{
            LinkAction, LinkSupervisor, ERROR_SETTLE, REOPEN_BACKOFF, REOPEN_SETTLE,
        },
        sync::{recover_synchronization, SyncTimings},
        transport::{SerialTransport, Transport},
        wire,
    },
};

use super::config::DaemonConfig;

/// Factory for (re)opening the daemon's single channel.
pub type ChannelOpener = Box<dyn FnMut() -> Result<Box<dyn Transport>>>;

/// Pauses taken by the daemon loop outside of normal reads. Tests zero them.
#[derive(Debug, Clone, Copy)]
pub struct DaemonPauses {
    pub error_settle: Duration,
    pub reopen_settle: Duration,
    pub reopen_backoff: Duration,
}

impl Default for DaemonPauses {
    fn default() -> Self {
        Self {
            error_settle: ERROR_SETTLE,
            reopen_settle: REOPEN_SETTLE,
            reopen_backoff: REOPEN_BACKOFF,
        }
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

/// The answering side: waits for `POLL` on one serial channel and replies
/// with the current temperatures.
///
/// The channel is owned as an `Option`: `None` means "needs (re)opening",
/// and each `step` makes at most one open attempt, so a dead port costs one
/// backoff pause per iteration instead of a spin.
pub struct SlaveDaemon<P: TemperatureProbe> {
    opener: ChannelOpener,
    transport: Option<Box<dyn Transport>>,
    framer: LineFramer,
    link: LinkSupervisor,
    probe: P,
    read_timeout: Duration,
    pauses: DaemonPauses,
    sync_timings: SyncTimings,
}

impl<P: TemperatureProbe> SlaveDaemon<P> {
    pub fn new(
        opener: ChannelOpener,
        probe: P,
        read_timeout: Duration,
        pauses: DaemonPauses,
        sync_timings: SyncTimings,
    ) -> Self {
        Self {
            opener,
            transport: None,
            framer: LineFramer::default(),
            link: LinkSupervisor::new(),
            probe,
            read_timeout,
            pauses,
            sync_timings,
        }
    }

    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            self.step();
        }
        log::info!("Main loop completed");
    }

    /// One loop iteration: ensure the channel is open, then service at most
    /// one read.
    pub fn step(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            self.try_open();
            return;
        };

        // Long silence with nothing ever exchanged: ask the hardware whether
        // the link is still there at all.
        if self.link.should_probe_health() && !transport.healthy() {
            log::warn!(
                "Serial port health check failed after {} timeouts, attempting reconnection",
                self.link.consecutive_timeouts()
            );
            self.transport = None;
            return;
        }

        match self.framer.feed(transport.as_mut()) {
            Ok(FramerPoll::Command(body)) => {
                self.link.on_command_received();
                self.handle_command(&body);
            }
            Ok(FramerPoll::Pending) => {}
            Ok(FramerPoll::Empty) => {
                if self.link.on_timeout() {
                    log::debug!(
                        "Timeout waiting for data from serial port (count: {})",
                        self.link.consecutive_timeouts()
                    );
                }
            }
            Err(err) => {
                log::debug!("Serial read failed: {err}");
                if self.link.on_error() == LinkAction::Reconnect {
                    self.transport = None;
                }
                pause(self.pauses.error_settle);
            }
        }
    }

    fn try_open(&mut self) {
        match (self.opener)() {
            Ok(mut transport) => {
                recover_synchronization(transport.as_mut(), &mut self.framer, &self.sync_timings);
                // Recovery shortened the read window for draining; restore
                // the configured one for normal operation.
                if let Err(err) = transport.set_read_timeout(self.read_timeout) {
                    log::debug!("Failed to restore read timeout: {err}");
                }
                self.transport = Some(transport);
                self.link.on_reopened();
                pause(self.pauses.reopen_settle);
            }
            Err(err) => {
                log::error!("Failed to open serial port: {err}");
                pause(self.pauses.reopen_backoff);
            }
        }
    }

    fn handle_command(&mut self, body: &[u8]) {
        let command = String::from_utf8_lossy(body);
        let command = wire::clean_command(&command);
        log::debug!("Received command: '{command}'");

        if command == wire::POLL_COMMAND {
            if self.link.on_poll_received() {
                log::info!("Serial synchronization established - normal operation begins");
            }
            let reading = self.probe.sample();
            let response = wire::format_reading(reading.cpu_temp, reading.nvme_temp);

            let sent = self.transport.as_mut().map(|transport| {
                transport
                    .write_all(response.as_bytes())
                    .and_then(|_| transport.flush_output())
            });
            match sent {
                Some(Ok(())) => {
                    log::debug!("Sent: {}", response.trim_end());
                    self.link.on_exchange_complete();
                }
                Some(Err(err)) => log::error!("Failed to send temperature response: {err}"),
                None => {}
            }
        } else if self.link.in_startup_sync() {
            log::debug!("Unknown command during startup sync: '{command}' - ignoring");
        } else {
            log::debug!("Unknown command received: '{command}'");
        }
    }
}

/// Entry point for the `daemon` subcommand.
pub fn run(config: &DaemonConfig, running: Arc<AtomicBool>) -> Result<()> {
    log::info!(
        "Temperature monitoring started on {} (baud: {}, timeout: {}s)",
        config.serial_port,
        config.baud_rate,
        config.read_timeout.as_secs()
    );

    let port = config.serial_port.clone();
    let baud = config.baud_rate;
    let timeout = config.read_timeout;
    let opener: ChannelOpener = Box::new(move || {
        SerialTransport::open(&port, baud, timeout).map(|t| Box::new(t) as Box<dyn Transport>)
    });

    let probe = CommandProbe::new(&config.cpu_temp_cmd, &config.nvme_temp_cmd);
    let mut daemon = SlaveDaemon::new(
        opener,
        probe,
        config.read_timeout,
        DaemonPauses::default(),
        SyncTimings::default(),
    );
    daemon.run(&running);
    Ok(())
}
