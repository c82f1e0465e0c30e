//! Hardware seams of the core.
//!
//! The firmware binary implements these traits on top of embassy drivers; tests implement them
//! with plain in-memory mocks.

use crate::actions::Level;
use crate::cspi::{CspiConfig, RoundConsumer};

/// Free-running tick counter, 10 µs per tick by default.
pub trait TickSource {
    /// Current tick count. Wraps at `u32::MAX`.
    fn now(&self) -> u32;

    /// Start counting. Called when an action graph begins.
    fn start(&mut self) {}

    /// Stop counting. Called when an action graph finishes or fails.
    fn stop(&mut self) {}
}

/// Port/pin addressed GPIO access.
///
/// Ports are numbered from zero (port A). Operations on an unsupported port or pin are ignored.
pub trait GpioBank {
    /// Whether `port`/`pin` exists on this board.
    fn supports(&self, port: u8, pin: u8) -> bool;
    fn enable_clock(&mut self, port: u8);
    /// Route the pin to the GPIO function.
    fn set_mux(&mut self, port: u8, pin: u8);
    fn set_input(&mut self, port: u8, pin: u8);
    fn set_output(&mut self, port: u8, pin: u8);
    fn write_high(&mut self, port: u8, pin: u8);
    fn write_low(&mut self, port: u8, pin: u8);
    fn read(&mut self, port: u8, pin: u8) -> Level;

    /// Drive `level` on the pin.
    fn write(&mut self, port: u8, pin: u8, level: Level) {
        match level {
            Level::High => self.write_high(port, pin),
            Level::Low => self.write_low(port, pin),
        }
    }
}

/// Errors reported by a [`FlashStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Erasing the user region failed
    Erase,
    /// Programming failed
    Program,
    /// Reading back failed
    Read,
    /// The access does not fit in the user region
    OutOfRange,
}

/// The user flash region that persists one frame across resets.
pub trait FlashStore {
    /// Erase the whole user region.
    fn erase(&mut self) -> Result<(), FlashError>;

    /// Program `data` at `offset` bytes into the user region.
    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Fill `buf` from `offset` bytes into the user region.
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError>;
}

/// Non-blocking byte link to the host.
pub trait ByteTransport {
    /// Next received byte, if one is buffered.
    fn try_read_byte(&mut self) -> Option<u8>;

    /// Queue `bytes` for transmission.
    ///
    /// # Returns
    ///
    /// The number of bytes accepted, which may be fewer than requested when the link is congested.
    fn write(&mut self, bytes: &[u8]) -> usize;
}

/// SPI peripheral running in slave mode on behalf of a CSPI session.
///
/// The slave owns the [`RoundConsumer`] while a session is attached and feeds it one received byte
/// per SPI frame from its interrupt handler. Once a round completes the slave stops feeding it until
/// [`SpiSlave::start_round`] is called again.
pub trait SpiSlave<'r> {
    /// Configure the peripheral for `config` (mode, alert pin) and take ownership of `rounds`.
    fn attach(&mut self, config: &CspiConfig, rounds: RoundConsumer<'r>);

    /// Unmask the SPI interrupt for the next round.
    fn start_round(&mut self);

    /// Run `f` on the attached consumer with the SPI interrupt held off.
    ///
    /// # Returns
    ///
    /// `None` if nothing is attached.
    fn with_rounds<R>(&mut self, f: impl FnOnce(&mut RoundConsumer<'r>) -> R) -> Option<R>;

    /// Mask the interrupt, stop the peripheral and hand the consumer back.
    fn detach(&mut self) -> Option<RoundConsumer<'r>>;
}

/// Whole-system control.
pub trait SystemControl {
    /// Reset the microcontroller.
    fn reset(&mut self);
}
