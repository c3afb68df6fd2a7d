use super::framer::READ_BUFFER_CAPACITY;

/// Master-side per-device line collector.
///
/// Much simpler than the slave framer: the master only ever expects one short
/// response per poll slot, so a byte-wise `\r`-dropping accumulator is
/// enough. The buffer is still bounded with the same oldest-byte eviction as
/// the slave side — an endless unterminated stream from a faulty device must
/// not grow memory without limit.
pub struct ResponseAccumulator {
    lines: Vec<Vec<u8>>,
    capacity: usize,
}

impl ResponseAccumulator {
    pub fn new(devices: usize) -> Self {
        Self::with_capacity(devices, READ_BUFFER_CAPACITY)
    }

    pub fn with_capacity(devices: usize, capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            lines: vec![Vec::new(); devices],
            capacity,
        }
    }

    /// Feed one received byte for a device. Returns the completed line body
    /// when the byte is a terminator.
    pub fn push_byte(&mut self, device: usize, byte: u8) -> Option<String> {
        let line = &mut self.lines[device];
        match byte {
            b'\n' => {
                let body = String::from_utf8_lossy(line).into_owned();
                line.clear();
                Some(body)
            }
            b'\r' => None,
            _ => {
                if line.len() == self.capacity {
                    line.remove(0);
                }
                line.push(byte);
                None
            }
        }
    }

    /// Discard whatever is buffered for a device. Used when its poll slot
    /// ends without a terminator.
    pub fn clear(&mut self, device: usize) {
        self.lines[device].clear();
    }

    pub fn pending(&self, device: usize) -> usize {
        self.lines[device].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_line_and_drops_cr() {
        let mut acc = ResponseAccumulator::new(4);
        let mut out = None;
        for &b in b"CPU:45.12|NVME:38.00\r\n" {
            out = acc.push_byte(2, b);
        }
        assert_eq!(out.unwrap(), "CPU:45.12|NVME:38.00");
        assert_eq!(acc.pending(2), 0);
    }

    #[test]
    fn devices_are_independent() {
        let mut acc = ResponseAccumulator::new(2);
        acc.push_byte(0, b'A');
        acc.push_byte(1, b'B');
        assert_eq!(acc.push_byte(0, b'\n').unwrap(), "A");
        assert_eq!(acc.pending(1), 1);
    }

    #[test]
    fn empty_line_yields_empty_body() {
        let mut acc = ResponseAccumulator::new(1);
        assert_eq!(acc.push_byte(0, b'\n').unwrap(), "");
    }

    #[test]
    fn bounded_growth_keeps_newest_bytes() {
        let mut acc = ResponseAccumulator::with_capacity(1, 4);
        for &b in b"ABCDEF" {
            acc.push_byte(0, b);
        }
        assert_eq!(acc.pending(0), 4);
        assert_eq!(acc.push_byte(0, b'\n').unwrap(), "CDEF");
    }

    #[test]
    fn clear_discards_partial_line() {
        let mut acc = ResponseAccumulator::new(1);
        acc.push_byte(0, b'X');
        acc.clear(0);
        assert_eq!(acc.push_byte(0, b'\n').unwrap(), "");
    }
}
