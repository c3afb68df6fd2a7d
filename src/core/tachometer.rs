use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// How often the pulse count is folded into an RPM figure.
pub const RPM_SAMPLE_INTERVAL: Duration = Duration::from_millis(1000);

// Two pulses per revolution over a one-second window: count / 2 * 60.
const PULSES_TO_RPM: u32 = 30;

/// Fan tachometer pulse counter.
///
/// `record_pulse` is called from whatever edge-detection source the platform
/// provides and must stay wait-free, hence the atomic counter. `sample_rpm`
/// atomically takes and resets the count so no pulse is ever counted twice
/// or lost between samples.
#[derive(Default)]
pub struct Tachometer {
    pulses: AtomicU32,
    rpm: AtomicU32,
}

impl Tachometer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pulse(&self) {
        self.pulses.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold the pulses accumulated since the last sample into an RPM value.
    pub fn sample_rpm(&self) -> u32 {
        let count = self.pulses.swap(0, Ordering::Relaxed);
        let rpm = count * PULSES_TO_RPM;
        self.rpm.store(rpm, Ordering::Relaxed);
        log::debug!("RPM: {rpm} | count: {count}");
        rpm
    }

    /// Most recently sampled RPM.
    pub fn rpm(&self) -> u32 {
        self.rpm.load(Ordering::Relaxed)
    }
}
