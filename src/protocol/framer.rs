use anyhow::Result;

use super::transport::{Transport, TransportRead};

// Buffer sizing mirrors the field-proven values: the accumulation buffer holds
// the most recent 512 bytes per channel, and no extracted command may reach
// the 256-byte output bound. A single serial read never pulls more than 64
// bytes so bursts interleave with command extraction.
pub const READ_BUFFER_CAPACITY: usize = 512;
pub const OUTPUT_CAPACITY: usize = 256;
const READ_CHUNK: usize = 64;

/// Result of one `feed` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerPoll {
    /// A complete, validated command body (terminator stripped).
    Command(Vec<u8>),
    /// Bytes were buffered but no full line is available yet.
    Pending,
    /// Nothing arrived within the read window.
    Empty,
}

/// Accumulates raw serial bytes and extracts terminated commands.
///
/// The transport's read primitive may return partial lines, several lines at
/// once, or a line split across calls; this framer is resilient to all three
/// without losing or duplicating a command. When the buffer is full the
/// oldest byte is evicted so the window always holds the newest traffic.
pub struct LineFramer {
    buf: Vec<u8>,
    capacity: usize,
    output_capacity: usize,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(READ_BUFFER_CAPACITY, OUTPUT_CAPACITY)
    }
}

impl LineFramer {
    pub fn new(capacity: usize, output_capacity: usize) -> Self {
        assert!(capacity > 0 && output_capacity > 0);
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            output_capacity,
        }
    }

    /// Drop all buffered bytes. Called on channel reopen.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append bytes, evicting the oldest when the window is full.
    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.buf.len() == self.capacity {
                self.buf.remove(0);
            }
            self.buf.push(b);
        }
    }

    /// Extract the next complete command from the buffer, if any.
    ///
    /// Empty and oversize segments are discarded and extraction retries on
    /// the remaining bytes, so a backlog of several terminators (typical
    /// right after a reconnect burst) is worked off one valid command at a
    /// time. An explicit loop rather than recursion: pathological input can
    /// hold hundreds of terminators.
    pub fn next_command(&mut self) -> Option<Vec<u8>> {
        loop {
            let (cmd_end, term_len) = self.find_terminator()?;

            // Skip any leading terminator bytes (empty leading segments).
            let mut cmd_start = 0;
            while cmd_start < cmd_end
                && (self.buf[cmd_start] == b'\n' || self.buf[cmd_start] == b'\r')
            {
                cmd_start += 1;
            }

            let cmd_len = cmd_end - cmd_start;
            let consumed = cmd_end + term_len;

            if cmd_len > 0 && cmd_len < self.output_capacity {
                let command = self.buf[cmd_start..cmd_end].to_vec();
                self.buf.drain(..consumed);
                return Some(command);
            }

            // Empty or oversize segment: drop it, terminator included, and
            // retry on whatever is left.
            log::debug!("Skipping invalid command segment (len: {cmd_len})");
            self.buf.drain(..consumed);
        }
    }

    /// One timed read from the transport followed by command extraction.
    pub fn feed(&mut self, transport: &mut dyn Transport) -> Result<FramerPoll> {
        let mut chunk = [0u8; READ_CHUNK];
        match transport.read(&mut chunk)? {
            TransportRead::Data(n) => {
                if log::log_enabled!(log::Level::Trace) {
                    let hex = chunk[..n]
                        .iter()
                        .map(|b| format!("{b:02X}"))
                        .collect::<Vec<_>>()
                        .join(" ");
                    log::trace!("Raw data received ({n} bytes): {hex}");
                }
                self.push(&chunk[..n]);
                match self.next_command() {
                    Some(command) => Ok(FramerPoll::Command(command)),
                    None => Ok(FramerPoll::Pending),
                }
            }
            TransportRead::Timeout => Ok(FramerPoll::Empty),
        }
    }

    /// Earliest `\r\n`, else earliest bare `\n`. Returns the terminator
    /// position and its width.
    fn find_terminator(&self) -> Option<(usize, usize)> {
        for i in 0..self.buf.len().saturating_sub(1) {
            if self.buf[i] == b'\r' && self.buf[i + 1] == b'\n' {
                return Some((i, 2));
            }
        }
        self.buf.iter().position(|&b| b == b'\n').map(|i| (i, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::transport::mock::MockTransport;

    #[test]
    fn extracts_crlf_terminated_command() {
        let mut framer = LineFramer::default();
        framer.push(b"CPU:45.00|NVME:38.00\r\n");
        let cmd = framer.next_command().unwrap();
        assert_eq!(cmd, b"CPU:45.00|NVME:38.00");
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn byte_at_a_time_yields_exactly_one_command() {
        let mut framer = LineFramer::default();
        let line = b"CPU:45.00|NVME:38.00\r\n";
        let mut commands = Vec::new();
        for &b in line.iter() {
            framer.push(&[b]);
            if let Some(cmd) = framer.next_command() {
                commands.push(cmd);
            }
        }
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0], b"CPU:45.00|NVME:38.00");
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn back_to_back_commands_stay_separate() {
        let mut framer = LineFramer::default();
        framer.push(b"POLL\nPOLL\n");
        assert_eq!(framer.next_command().unwrap(), b"POLL");
        // Second command is retained in the buffer and comes out next call.
        assert_eq!(framer.next_command().unwrap(), b"POLL");
        assert!(framer.next_command().is_none());
    }

    #[test]
    fn bare_lf_and_crlf_mixed() {
        let mut framer = LineFramer::default();
        framer.push(b"POLL\r\nSTATUS\n");
        assert_eq!(framer.next_command().unwrap(), b"POLL");
        assert_eq!(framer.next_command().unwrap(), b"STATUS");
    }

    #[test]
    fn leading_terminators_are_skipped() {
        let mut framer = LineFramer::default();
        framer.push(b"\r\n\nPOLL\n");
        assert_eq!(framer.next_command().unwrap(), b"POLL");
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn partial_line_is_retained() {
        let mut framer = LineFramer::default();
        framer.push(b"PO");
        assert!(framer.next_command().is_none());
        assert_eq!(framer.buffered(), 2);
        framer.push(b"LL\n");
        assert_eq!(framer.next_command().unwrap(), b"POLL");
    }

    #[test]
    fn overflow_drops_oldest_bytes() {
        let mut framer = LineFramer::new(8, 256);
        framer.push(b"ABCDEFGHIJ"); // capacity 8: A and B fall off
        assert_eq!(framer.buffered(), 8);
        framer.push(b"\n");
        let cmd = framer.next_command().unwrap();
        assert_eq!(cmd, b"DEFGHIJ"); // C evicted by the terminator byte
    }

    #[test]
    fn emitted_command_never_exceeds_output_capacity() {
        let mut framer = LineFramer::new(512, 16);
        // 100 bytes without a terminator, then one.
        framer.push(&[b'x'; 100]);
        framer.push(b"\nPOLL\n");
        // The 100-byte segment is over the output bound and gets discarded;
        // the following POLL must still come through.
        assert_eq!(framer.next_command().unwrap(), b"POLL");
    }

    #[test]
    fn oversize_then_valid_in_same_buffer() {
        let mut framer = LineFramer::new(64, 8);
        framer.push(b"WAYTOOLONGCMD\nOK\n");
        assert_eq!(framer.next_command().unwrap(), b"OK");
        assert!(framer.next_command().is_none());
    }

    #[test]
    fn feed_reports_empty_pending_and_command() {
        let mut framer = LineFramer::default();
        let mut transport = MockTransport::new();
        transport.push_timeout();
        transport.push_data(b"POL");
        transport.push_data(b"L\n");

        assert_eq!(framer.feed(&mut transport).unwrap(), FramerPoll::Empty);
        assert_eq!(framer.feed(&mut transport).unwrap(), FramerPoll::Pending);
        assert_eq!(
            framer.feed(&mut transport).unwrap(),
            FramerPoll::Command(b"POLL".to_vec())
        );
    }

    #[test]
    fn feed_propagates_transport_errors() {
        let mut framer = LineFramer::default();
        let mut transport = MockTransport::new();
        transport.push_error("device gone");
        assert!(framer.feed(&mut transport).is_err());
    }

    #[test]
    fn reset_clears_buffer() {
        let mut framer = LineFramer::default();
        framer.push(b"half a li");
        framer.reset();
        assert_eq!(framer.buffered(), 0);
        framer.push(b"POLL\n");
        assert_eq!(framer.next_command().unwrap(), b"POLL");
    }
}
