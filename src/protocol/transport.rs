use anyhow::{anyhow, Result};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

/// Outcome of a single timed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRead {
    /// At least one byte arrived.
    Data(usize),
    /// The read window elapsed with nothing on the wire.
    Timeout,
}

/// One half-duplex serial channel to one remote end.
///
/// The protocol core only talks to this trait; the production implementation
/// wraps a `serialport` handle, tests substitute a scripted mock.
pub trait Transport: Send {
    /// Blocking read bounded by the configured read timeout.
    fn read(&mut self, buf: &mut [u8]) -> Result<TransportRead>;

    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Push any buffered output onto the wire.
    fn flush_output(&mut self) -> Result<()>;

    /// Drop everything pending in both hardware queues.
    fn discard_io(&mut self) -> Result<()>;

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Active probe of the underlying link (modem line query on real
    /// hardware). `false` means the channel should be reopened.
    fn healthy(&mut self) -> bool;
}

/// `Transport` backed by a real serial port, 8N1 without flow control.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(port_name: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self> {
        let builder = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(read_timeout);

        let port = builder
            .open()
            .map_err(|err| anyhow!("Failed to open port {port_name}: {err}"))?;

        // Start from a clean slate; the sync recovery procedure does the
        // heavier draining right after.
        let _ = port.clear(ClearBuffer::All);

        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<TransportRead> {
        match std::io::Read::read(&mut self.port, buf) {
            Ok(0) => Ok(TransportRead::Timeout),
            Ok(n) => Ok(TransportRead::Data(n)),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => Ok(TransportRead::Timeout),
            Err(err) => Err(anyhow!("Serial read failed: {err}")),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        std::io::Write::write_all(&mut self.port, bytes)
            .map_err(|err| anyhow!("Serial write failed: {err}"))
    }

    fn flush_output(&mut self) -> Result<()> {
        std::io::Write::flush(&mut self.port).map_err(|err| anyhow!("Serial flush failed: {err}"))
    }

    fn discard_io(&mut self) -> Result<()> {
        self.port
            .clear(ClearBuffer::All)
            .map_err(|err| anyhow!("Failed to clear serial buffers: {err}"))
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|err| anyhow!("Failed to set serial timeout: {err}"))
    }

    fn healthy(&mut self) -> bool {
        // A modem status query fails once the device node has gone away
        // (unplugged adapter, reset USB bridge), which is exactly the case
        // the reconnection manager wants to detect.
        self.port.read_clear_to_send().is_ok() || self.port.read_data_set_ready().is_ok()
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Cloneable handle over a [`MockTransport`] so a test can keep scripting
    /// reads and inspecting writes after the transport has been boxed away
    /// into a multiplexer.
    #[derive(Clone)]
    pub struct SharedMockTransport(pub Arc<Mutex<MockTransport>>);

    impl SharedMockTransport {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(MockTransport::new())))
        }

        pub fn push_data(&self, bytes: &[u8]) {
            self.0.lock().unwrap().push_data(bytes);
        }

        pub fn push_timeout(&self) {
            self.0.lock().unwrap().push_timeout();
        }

        pub fn push_error(&self, msg: &str) {
            self.0.lock().unwrap().push_error(msg);
        }

        pub fn written_str(&self) -> String {
            self.0.lock().unwrap().written_str()
        }

        pub fn clear_written(&self) {
            self.0.lock().unwrap().written.clear();
        }

        pub fn discards(&self) -> usize {
            self.0.lock().unwrap().discards
        }

        pub fn set_healthy(&self, healthy: bool) {
            self.0.lock().unwrap().healthy = healthy;
        }
    }

    impl Transport for SharedMockTransport {
        fn read(&mut self, buf: &mut [u8]) -> Result<TransportRead> {
            self.0.lock().unwrap().read(buf)
        }
        fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
            self.0.lock().unwrap().write_all(bytes)
        }
        fn flush_output(&mut self) -> Result<()> {
            self.0.lock().unwrap().flush_output()
        }
        fn discard_io(&mut self) -> Result<()> {
            self.0.lock().unwrap().discard_io()
        }
        fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.0.lock().unwrap().set_read_timeout(timeout)
        }
        fn healthy(&mut self) -> bool {
            self.0.lock().unwrap().healthy
        }
    }

    /// Scripted transport for unit tests: reads are served from a queue of
    /// pre-planned results, writes are captured.
    pub struct MockTransport {
        pub reads: VecDeque<MockRead>,
        pub written: Vec<u8>,
        pub flushes: usize,
        pub discards: usize,
        pub healthy: bool,
        pub read_timeout: Duration,
    }

    pub enum MockRead {
        Data(Vec<u8>),
        Timeout,
        Error(String),
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                reads: VecDeque::new(),
                written: Vec::new(),
                flushes: 0,
                discards: 0,
                healthy: true,
                read_timeout: Duration::from_secs(1),
            }
        }

        pub fn push_data(&mut self, bytes: &[u8]) {
            self.reads.push_back(MockRead::Data(bytes.to_vec()));
        }

        pub fn push_timeout(&mut self) {
            self.reads.push_back(MockRead::Timeout);
        }

        pub fn push_error(&mut self, msg: &str) {
            self.reads.push_back(MockRead::Error(msg.to_string()));
        }

        pub fn written_str(&self) -> String {
            String::from_utf8_lossy(&self.written).into_owned()
        }
    }

    impl Transport for MockTransport {
        fn read(&mut self, buf: &mut [u8]) -> Result<TransportRead> {
            match self.reads.pop_front() {
                Some(MockRead::Data(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    // Anything that did not fit goes back to the front so a
                    // small caller buffer behaves like a slow serial driver.
                    if n < bytes.len() {
                        self.reads.push_front(MockRead::Data(bytes[n..].to_vec()));
                    }
                    Ok(TransportRead::Data(n))
                }
                Some(MockRead::Timeout) | None => Ok(TransportRead::Timeout),
                Some(MockRead::Error(msg)) => Err(anyhow!("{msg}")),
            }
        }

        fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
            self.written.extend_from_slice(bytes);
            Ok(())
        }

        fn flush_output(&mut self) -> Result<()> {
            self.flushes += 1;
            Ok(())
        }

        fn discard_io(&mut self) -> Result<()> {
            self.discards += 1;
            self.reads.clear();
            Ok(())
        }

        fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.read_timeout = timeout;
            Ok(())
        }

        fn healthy(&mut self) -> bool {
            self.healthy
        }
    }
}
