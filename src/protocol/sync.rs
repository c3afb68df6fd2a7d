use std::time::Duration;

use super::{
    framer::LineFramer,
    transport::{Transport, TransportRead},
};

const DRAIN_CHUNK: usize = 256;
const MAX_DRAIN_ROUNDS: usize = 20;

/// Delays used by [`recover_synchronization`]. The defaults match the settle
/// times the attached microcontrollers need; tests zero them out.
#[derive(Debug, Clone, Copy)]
pub struct SyncTimings {
    /// Pause between the repeated hardware-buffer flushes.
    pub flush_delay: Duration,
    /// Wait after the newline probe for the remote end to finish whatever
    /// transmission the probe triggered.
    pub probe_settle: Duration,
    /// Pause after the post-probe flush before draining starts.
    pub post_probe_delay: Duration,
    /// Read window for each drain round.
    pub drain_read_timeout: Duration,
    /// Pause after the first final flush.
    pub final_flush_delay: Duration,
    /// Pause after the second final flush.
    pub final_settle: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            flush_delay: Duration::from_millis(200),
            probe_settle: Duration::from_millis(300),
            post_probe_delay: Duration::from_millis(100),
            drain_read_timeout: Duration::from_millis(100),
            final_flush_delay: Duration::from_millis(100),
            final_settle: Duration::from_millis(50),
        }
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

/// Printable preview of discarded bytes for the debug log: terminators are
/// escaped, anything non-printable becomes `?`, capped at 64 characters.
fn printable_preview(bytes: &[u8]) -> String {
    let mut out = String::new();
    for &b in bytes {
        if out.len() >= 62 {
            break;
        }
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push('?'),
        }
    }
    out
}

/// Aggressively re-synchronize a channel whose byte stream may be mid-line.
///
/// The remote end sends lines asynchronously relative to our reads, so after
/// a reopen or a burst of errors the input can hold a tail fragment with no
/// head. Recovery flushes the hardware queues repeatedly, pokes the remote
/// with bare newlines to kick out any transmission it is sitting on, drains
/// whatever arrives (bounded), flushes once more and resets the software
/// framer so parsing restarts at a line boundary.
///
/// Best-effort throughout: individual transport failures are logged and the
/// procedure carries on. Returns the number of drain rounds that saw data.
pub fn recover_synchronization(
    transport: &mut dyn Transport,
    framer: &mut LineFramer,
    timings: &SyncTimings,
) -> usize {
    log::debug!("Starting serial synchronization recovery");

    for _ in 0..5 {
        if let Err(err) = transport.discard_io() {
            log::debug!("Buffer flush during recovery failed: {err}");
        }
        pause(timings.flush_delay);
    }

    // Bare newlines terminate whatever half-line the remote parser holds and
    // provoke any response it has queued.
    if let Err(err) = transport
        .write_all(b"\n\n\n")
        .and_then(|_| transport.flush_output())
    {
        log::debug!("Sync probe write failed: {err}");
    }
    pause(timings.probe_settle);

    if let Err(err) = transport.discard_io() {
        log::debug!("Buffer flush during recovery failed: {err}");
    }
    pause(timings.post_probe_delay);

    if let Err(err) = transport.set_read_timeout(timings.drain_read_timeout) {
        log::debug!("Failed to set drain read timeout: {err}");
    }

    let mut rounds = 0;
    let mut chunk = [0u8; DRAIN_CHUNK];
    while rounds < MAX_DRAIN_ROUNDS {
        match transport.read(&mut chunk) {
            Ok(TransportRead::Data(n)) => {
                log::debug!(
                    "Discarded stale data: '{}' ({n} bytes)",
                    printable_preview(&chunk[..n])
                );
                rounds += 1;
            }
            Ok(TransportRead::Timeout) => break,
            Err(_) => break,
        }
    }

    if let Err(err) = transport.discard_io() {
        log::debug!("Buffer flush during recovery failed: {err}");
    }
    pause(timings.final_flush_delay);
    if let Err(err) = transport.discard_io() {
        log::debug!("Buffer flush during recovery failed: {err}");
    }
    pause(timings.final_settle);

    framer.reset();

    log::debug!("Serial synchronization recovery completed ({rounds} cleanup rounds)");
    rounds
}
