//! Timing and streaming parameters shared by the parser, the executor and the CSPI session.

/// Length of one scheduler tick in microseconds.
pub const TICK_US: u32 = 10;

/// Capacity of the CSPI transmit ring in bytes. One slot always stays empty.
pub const RING_SIZE: usize = 2048;

/// Largest RX capture a CSPI session may request.
pub const RX_CAPTURE_CAPACITY: usize = 1024;

/// Tick conversion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingConfig {
    /// Microseconds per tick
    pub tick_us: u32,
}

impl TimingConfig {
    /// Ticks elapsed per millisecond.
    pub const fn ticks_per_ms(&self) -> u32 {
        1000 / self.tick_us
    }

    /// Convert a wire duration to ticks, rounding the microsecond part to the nearest tick.
    ///
    /// # Arguments
    ///
    /// * `ms` - Whole milliseconds
    /// * `us` - Additional microseconds
    ///
    /// # Returns
    ///
    /// The tick count, saturated at `u32::MAX`.
    pub fn to_ticks(&self, ms: u32, us: u16) -> u32 {
        let us_ticks = (u64::from(us) + u64::from(self.tick_us / 2)) / u64::from(self.tick_us);
        let ticks = u64::from(ms) * u64::from(self.ticks_per_ms()) + us_ticks;
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self { tick_us: TICK_US }
    }
}

/// Flow-control tuning of a CSPI session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CspiTuning {
    /// Ring occupancy at or below which a refill is requested
    pub low_watermark: usize,
    /// Free space the ring must have before a refill is requested
    pub refill_min_free: usize,
    /// Byte clocked out when the ring runs dry
    pub idle_fill: u8,
}

impl CspiTuning {
    /// The low watermark actually applied to a ring of `ring_size` bytes.
    ///
    /// Zero or a value at least as large as the ring falls back to a quarter of the ring.
    pub const fn effective_low_watermark(&self, ring_size: usize) -> usize {
        if self.low_watermark == 0 || self.low_watermark >= ring_size {
            ring_size / 4
        } else {
            self.low_watermark
        }
    }
}

impl Default for CspiTuning {
    fn default() -> Self {
        Self {
            low_watermark: 256,
            refill_min_free: 512,
            idle_fill: 0x00,
        }
    }
}
