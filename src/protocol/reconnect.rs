use std::time::Duration;

/// Consecutive read errors that force a channel reopen.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;
/// Consecutive timeouts before the link health probe is consulted.
pub const TIMEOUT_HEALTH_THRESHOLD: u32 = 30;
/// Wait between reopen attempts when opening the port keeps failing.
pub const REOPEN_BACKOFF: Duration = Duration::from_secs(5);
/// Stabilization pause after a successful reopen.
pub const REOPEN_SETTLE: Duration = Duration::from_millis(500);
/// Pause after a read error so a broken descriptor cannot spin the loop.
pub const ERROR_SETTLE: Duration = Duration::from_millis(100);

/// What the owning loop should do after reporting an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    Continue,
    /// Close the channel and reopen it from scratch.
    Reconnect,
}

/// Reconnection policy for the answering side's single channel.
///
/// Pure counters, no IO: the loop reports what each read attempt produced and
/// this decides when the link is beyond saving. Timeouts alone are normal
/// (the polling side may simply be down), so they only lead to a reconnect
/// when the active health probe also fails; read errors are harder evidence
/// and trip the reopen on their own.
pub struct LinkSupervisor {
    consecutive_errors: u32,
    consecutive_timeouts: u32,
    successful_exchanges: u32,
    startup_sync: bool,
}

impl Default for LinkSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkSupervisor {
    pub fn new() -> Self {
        Self {
            consecutive_errors: 0,
            consecutive_timeouts: 0,
            successful_exchanges: 0,
            startup_sync: true,
        }
    }

    /// While set, unknown commands are dropped without comment: right after
    /// an open the stream may start mid-line.
    pub fn in_startup_sync(&self) -> bool {
        self.startup_sync
    }

    /// A valid `POLL` arrived. Ends startup sync; returns `true` on the
    /// transition so the caller can log that synchronization is established.
    pub fn on_poll_received(&mut self) -> bool {
        let was_syncing = self.startup_sync;
        self.startup_sync = false;
        was_syncing
    }

    /// A complete command line was read (valid or not).
    pub fn on_command_received(&mut self) {
        self.consecutive_errors = 0;
        self.consecutive_timeouts = 0;
    }

    /// A response went out successfully.
    pub fn on_exchange_complete(&mut self) {
        self.successful_exchanges += 1;
        // Wrap instead of growing forever; staying non-zero is what matters.
        if self.successful_exchanges > 10 {
            self.successful_exchanges = 1;
        }
    }

    /// The read window elapsed with no data. Returns `true` when this
    /// timeout is worth a debug log line (every 10th, to keep quiet links
    /// from flooding the log).
    pub fn on_timeout(&mut self) -> bool {
        self.consecutive_timeouts += 1;
        self.consecutive_timeouts % 10 == 1
    }

    /// A read failed outright.
    pub fn on_error(&mut self) -> LinkAction {
        self.consecutive_errors += 1;
        self.successful_exchanges = 0;
        log::warn!(
            "Error reading from serial port (error count: {})",
            self.consecutive_errors
        );
        if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            log::warn!("Too many consecutive errors, attempting reconnection");
            LinkAction::Reconnect
        } else {
            LinkAction::Continue
        }
    }

    /// Whether the loop should spend an active health probe on the link.
    /// Only once the silence is long and nothing has ever been exchanged;
    /// a link with past successes is trusted through quiet spells.
    pub fn should_probe_health(&self) -> bool {
        self.consecutive_timeouts > TIMEOUT_HEALTH_THRESHOLD && self.successful_exchanges == 0
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// The channel was reopened; all evidence about the old one is void.
    pub fn on_reopened(&mut self) {
        self.consecutive_errors = 0;
        self.consecutive_timeouts = 0;
        self.startup_sync = true;
    }
}
