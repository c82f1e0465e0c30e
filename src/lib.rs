//! Core of the debug tool firmware.
//!
//! The crate is split the same way the board firmware is wired:
//! - [`protocol`] frames every message exchanged with the host (CRC, encoder, decoder, link)
//! - [`actions`] parses and executes timed GPIO action graphs
//! - [`cspi`] streams host data out of an SPI slave with flow control and a threshold alert
//! - [`dispatch`] is the main loop tying the three together
//!
//! Hardware is only reached through the traits in [`platform`], so everything here
//! builds and runs its tests on the host.

#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
pub(crate) mod fmt;

pub mod actions;
pub mod config;
pub mod cspi;
pub mod dispatch;
pub mod platform;
pub mod protocol;

pub use actions::{ActionSet, Level};
pub use dispatch::{Board, BootOutcome, Dispatcher};
pub use protocol::{Frame, FrameDecoder, Link, MessageId};
