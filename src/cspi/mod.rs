//! CSPI: host data streamed out of the SPI slave.
//!
//! The host opens a session with a BEGIN frame, then keeps the transmit ring topped up with DATA
//! frames whenever the device asks with a REQ frame. The SPI master clocks the ring out in rounds
//! of `transfer_size` bytes; after every round the alert pin reports whether the bytes just sent,
//! read as one big-endian number, exceed the configured threshold.

pub mod ring;
pub mod round;
pub mod session;

pub use ring::{used_between, Consumer, Producer, SpscRing};
pub use round::RoundConsumer;
pub use session::{BeginError, CspiConfig, CspiManager, CspiSession, DataError};
