//! Host wire protocol.
//!
//! Every message in either direction is one frame:
//! `0xAA 0x55 <msg_id:1> <len:2 BE> <payload:len> <crc16:2 BE>`, with the CRC computed over
//! `msg_id ‖ len ‖ payload`.

pub mod crc;
pub mod frame;
pub mod link;

pub use crc::{crc16, Crc16};
pub use frame::{encode, encode_into, Frame, FrameDecoder, FrameError, StoredFrameError};
pub use link::Link;

/// First start-of-frame byte.
pub const SOF0: u8 = 0xAA;
/// Second start-of-frame byte.
pub const SOF1: u8 = 0x55;
/// Largest payload a frame may carry.
pub const MAX_PAYLOAD: usize = 512;
/// Bytes a frame adds around its payload: SOF pair, message id, length and CRC.
pub const FRAME_OVERHEAD: usize = 7;
/// Largest encoded frame.
pub const MAX_FRAME: usize = MAX_PAYLOAD + FRAME_OVERHEAD;

/// Message identifiers understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageId {
    /// Parse and run an action graph
    ExecuteActions = 0x10,
    /// Open a CSPI session
    CspiBegin = 0x50,
    /// Bulk bytes for the CSPI transmit ring
    CspiData = 0x52,
    /// The host has no more CSPI data
    CspiEnd = 0x54,
    /// Device to host: the CSPI ring wants more data
    CspiReq = 0x59,
    /// Abort the CSPI session now
    CspiTerminate = 0x5B,
    /// Persist the payload without marking it bootable
    WriteFlash = 0x90,
    /// Persist the payload and run it at every boot
    WriteFlashBoot = 0x91,
    /// Clear the persisted frame
    ClearFlash = 0xCC,
    /// Reset the microcontroller
    Reset = 0xFF,
}

impl MessageId {
    /// Look up a raw message id.
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x10 => Self::ExecuteActions,
            0x50 => Self::CspiBegin,
            0x52 => Self::CspiData,
            0x54 => Self::CspiEnd,
            0x59 => Self::CspiReq,
            0x5B => Self::CspiTerminate,
            0x90 => Self::WriteFlash,
            0x91 => Self::WriteFlashBoot,
            0xCC => Self::ClearFlash,
            0xFF => Self::Reset,
            _ => return None,
        })
    }
}

impl From<MessageId> for u8 {
    fn from(id: MessageId) -> Self {
        id as u8
    }
}
