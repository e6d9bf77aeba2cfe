// Real-time clock: a free-running tick counter and per-descriptor virtual rates
use crate::config::RTC_BASE_HZ;
use crate::error::KernelError;
use core::sync::atomic::{AtomicU64, Ordering};

/// Counts periodic RTC interrupts since boot.
pub struct Rtc {
    ticks: AtomicU64,
}

pub static RTC: Rtc = Rtc::new();

impl Rtc {
    pub const fn new() -> Self {
        Rtc {
            ticks: AtomicU64::new(0),
        }
    }

    /// Called from the RTC interrupt.
    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Default for Rtc {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse and check a rate written to an `rtc` descriptor.
pub fn parse_frequency(bytes: &[u8]) -> Result<u32, KernelError> {
    let raw: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(KernelError::InvalidArgument)?;
    let hz = u32::from_le_bytes(raw);
    if hz < 2 || hz > RTC_BASE_HZ || !hz.is_power_of_two() {
        return Err(KernelError::InvalidArgument);
    }
    Ok(hz)
}

/// First base tick at which a virtual clock running at `hz` fires after `now`.
pub fn next_deadline(now: u64, hz: u32) -> u64 {
    let period = u64::from(RTC_BASE_HZ / hz.max(1)).max(1);
    (now / period + 1) * period
}

/// Program the RTC for periodic interrupts at the base rate.
#[cfg(target_os = "none")]
pub fn init_hardware() {
    use x86_64::instructions::port::Port;

    let mut select = Port::<u8>::new(0x70);
    let mut data = Port::<u8>::new(0x71);
    x86_64::instructions::interrupts::without_interrupts(|| unsafe {
        // Register A, NMI disabled: rate 6 gives 1024 Hz.
        select.write(0x8A);
        let a = data.read();
        select.write(0x8A);
        data.write((a & 0xF0) | 0x06);
        // Register B: periodic interrupt enable.
        select.write(0x8B);
        let b = data.read();
        select.write(0x8B);
        data.write(b | 0x40);
    });
    log::debug!("rtc programmed at {} Hz", RTC_BASE_HZ);
}

/// Read register C so the RTC raises its next interrupt.
#[cfg(target_os = "none")]
pub fn acknowledge() {
    use x86_64::instructions::port::Port;

    let mut select = Port::<u8>::new(0x70);
    let mut data = Port::<u8>::new(0x71);
    unsafe {
        select.write(0x0C);
        let _: u8 = data.read();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_powers_of_two_up_to_the_base_rate_are_accepted() {
        assert_eq!(parse_frequency(&8u32.to_le_bytes()), Ok(8));
        assert_eq!(parse_frequency(&1024u32.to_le_bytes()), Ok(1024));
        assert_eq!(parse_frequency(&2048u32.to_le_bytes()), Err(KernelError::InvalidArgument));
        assert_eq!(parse_frequency(&6u32.to_le_bytes()), Err(KernelError::InvalidArgument));
        assert_eq!(parse_frequency(&1u32.to_le_bytes()), Err(KernelError::InvalidArgument));
        assert_eq!(parse_frequency(&[2, 0]), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn deadlines_fall_on_virtual_tick_boundaries() {
        // 2 Hz on a 1024 Hz base fires every 512 ticks.
        assert_eq!(next_deadline(0, 2), 512);
        assert_eq!(next_deadline(511, 2), 512);
        assert_eq!(next_deadline(512, 2), 1024);
        assert_eq!(next_deadline(5, 1024), 6);
    }

    #[test]
    fn ticks_accumulate() {
        let rtc = Rtc::new();
        rtc.tick();
        rtc.tick();
        assert_eq!(rtc.now(), 2);
    }
}
