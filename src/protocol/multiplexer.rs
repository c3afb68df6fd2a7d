use anyhow::Result;
use std::time::Duration;

use super::transport::Transport;

pub const DEFAULT_PORT_SWITCH_DELAY: Duration = Duration::from_millis(50);

/// Keeps exactly one of N half-duplex channels active.
///
/// The master's hardware can only service one emulated UART at a time, so a
/// switch is not instantaneous: after selecting the new channel we wait a
/// stabilization delay and then purge whatever bytes accumulated while the
/// channel was electrically settling or carrying cross-talk from the
/// previously active one. The delay is the accepted latency cost of not
/// capturing garbage as a response.
pub struct ChannelMultiplexer {
    channels: Vec<Box<dyn Transport>>,
    active: Option<usize>,
    switch_delay: Duration,
}

impl ChannelMultiplexer {
    pub fn new(channels: Vec<Box<dyn Transport>>, switch_delay: Duration) -> Self {
        Self {
            channels,
            active: None,
            switch_delay,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    /// Make `device` the single listening channel: settle, then purge stale
    /// input before the caller sends its command.
    pub fn activate(&mut self, device: usize) -> Result<()> {
        self.active = Some(device);

        if !self.switch_delay.is_zero() {
            std::thread::sleep(self.switch_delay);
        }
        self.channels[device].discard_io()?;
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    /// Mutable access to the currently active channel.
    pub fn active_channel(&mut self) -> Option<&mut (dyn Transport + '_)> {
        let idx = self.active?;
        Some(self.channels[idx].as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::transport::{mock::MockTransport, TransportRead};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Transport that only counts discards, shared across the box boundary.
    struct CountingTransport {
        discards: Arc<AtomicUsize>,
    }

    impl Transport for CountingTransport {
        fn read(&mut self, _buf: &mut [u8]) -> Result<TransportRead> {
            Ok(TransportRead::Timeout)
        }
        fn write_all(&mut self, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
        fn flush_output(&mut self) -> Result<()> {
            Ok(())
        }
        fn discard_io(&mut self) -> Result<()> {
            self.discards.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn set_read_timeout(&mut self, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        fn healthy(&mut self) -> bool {
            true
        }
    }

    fn mux(n: usize) -> ChannelMultiplexer {
        let channels: Vec<Box<dyn Transport>> = (0..n)
            .map(|_| Box::new(MockTransport::new()) as Box<dyn Transport>)
            .collect();
        ChannelMultiplexer::new(channels, Duration::ZERO)
    }

    #[test]
    fn only_one_channel_active() {
        let mut m = mux(4);
        assert_eq!(m.active(), None);
        m.activate(2).unwrap();
        assert_eq!(m.active(), Some(2));
        m.activate(0).unwrap();
        assert_eq!(m.active(), Some(0));
    }

    #[test]
    fn activation_purges_pending_input() {
        let counters: Vec<Arc<AtomicUsize>> =
            (0..2).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let channels: Vec<Box<dyn Transport>> = counters
            .iter()
            .map(|c| {
                Box::new(CountingTransport {
                    discards: c.clone(),
                }) as Box<dyn Transport>
            })
            .collect();
        let mut m = ChannelMultiplexer::new(channels, Duration::ZERO);

        m.activate(1).unwrap();
        m.activate(0).unwrap();
        m.activate(1).unwrap();

        assert_eq!(counters[0].load(Ordering::Relaxed), 1);
        assert_eq!(counters[1].load(Ordering::Relaxed), 2);
    }

    #[test]
    fn deactivate_clears_active_channel() {
        let mut m = mux(2);
        m.activate(1).unwrap();
        m.deactivate();
        assert_eq!(m.active(), None);
        assert!(m.active_channel().is_none());
    }
}
