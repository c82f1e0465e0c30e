//! Frame encoder, byte-wise frame decoder and persisted-frame validation.

use heapless::Vec;

use super::{Crc16, MessageId, MAX_FRAME, MAX_PAYLOAD, SOF0, SOF1};
use crate::platform::ByteTransport;

/// Errors raised while building a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// The payload exceeds [`MAX_PAYLOAD`]
    PayloadTooLarge,
    /// The output buffer cannot hold the encoded frame
    BufferTooSmall,
}

/// Reasons a persisted frame image is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoredFrameError {
    /// The image does not start with the SOF pair (erased or foreign data)
    NoPreamble,
    /// The length field is larger than a payload may be, or runs past the image
    BadLength,
    /// The stored CRC does not match the stored contents
    CrcMismatch,
}

/// A validated frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub msg_id: u8,
    pub payload: Vec<u8, MAX_PAYLOAD>,
}

impl Frame {
    /// Build a frame from a message id and payload.
    pub fn new(msg_id: u8, payload: &[u8]) -> Result<Self, FrameError> {
        let payload = Vec::from_slice(payload).map_err(|_| FrameError::PayloadTooLarge)?;
        Ok(Self { msg_id, payload })
    }

    /// The message id, if it is one the device knows.
    pub fn message(&self) -> Option<MessageId> {
        MessageId::from_u8(self.msg_id)
    }

    /// CRC over `msg_id ‖ len ‖ payload`, as carried on the wire.
    pub fn crc(&self) -> u16 {
        frame_crc(self.msg_id, &self.payload)
    }

    /// Validate a frame image read back from flash.
    ///
    /// The image uses the wire layout; bytes after the CRC are ignored.
    ///
    /// # Arguments
    ///
    /// * `image` - Raw bytes starting at the SOF pair
    ///
    /// # Returns
    ///
    /// The stored frame, or the first check it failed.
    pub fn from_stored(image: &[u8]) -> Result<Self, StoredFrameError> {
        if image.len() < 2 || image[0] != SOF0 || image[1] != SOF1 {
            return Err(StoredFrameError::NoPreamble);
        }
        if image.len() < 5 {
            return Err(StoredFrameError::BadLength);
        }

        let len = usize::from(u16::from_be_bytes([image[3], image[4]]));
        if len > MAX_PAYLOAD || image.len() < len + super::FRAME_OVERHEAD {
            return Err(StoredFrameError::BadLength);
        }

        let msg_id = image[2];
        let payload = &image[5..5 + len];
        let stored_crc = u16::from_be_bytes([image[5 + len], image[6 + len]]);
        if frame_crc(msg_id, payload) != stored_crc {
            return Err(StoredFrameError::CrcMismatch);
        }

        Self::new(msg_id, payload).map_err(|_| StoredFrameError::BadLength)
    }
}

fn frame_crc(msg_id: u8, payload: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(msg_id);
    crc.update_slice(&(payload.len() as u16).to_be_bytes());
    crc.update_slice(payload);
    crc.value()
}

/// Encode a frame into `out`.
///
/// # Returns
///
/// * `Ok(len)` - Number of bytes written
/// * `Err(FrameError)` - The payload is too large or `out` too small
pub fn encode_into(msg_id: u8, payload: &[u8], out: &mut [u8]) -> Result<usize, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge);
    }
    let total = payload.len() + super::FRAME_OVERHEAD;
    if out.len() < total {
        return Err(FrameError::BufferTooSmall);
    }

    let len = (payload.len() as u16).to_be_bytes();
    out[0] = SOF0;
    out[1] = SOF1;
    out[2] = msg_id;
    out[3..5].copy_from_slice(&len);
    out[5..5 + payload.len()].copy_from_slice(payload);
    let crc = frame_crc(msg_id, payload).to_be_bytes();
    out[total - 2..total].copy_from_slice(&crc);
    Ok(total)
}

/// Encode a frame into an owned buffer.
pub fn encode(msg_id: u8, payload: &[u8]) -> Result<Vec<u8, MAX_FRAME>, FrameError> {
    let mut out = [0u8; MAX_FRAME];
    let len = encode_into(msg_id, payload, &mut out)?;
    Vec::from_slice(&out[..len]).map_err(|_| FrameError::BufferTooSmall)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    WaitSof0,
    WaitSof1,
    Msg,
    LenHi,
    LenLo,
    Payload,
    CrcHi,
    CrcLo,
}

/// Incremental frame decoder.
///
/// Noise is skipped until a SOF pair, oversized lengths and CRC mismatches drop the frame in
/// progress and scanning resumes with the following byte.
///
/// A second `0xAA` while waiting for `0x55` keeps the decoder waiting for `0x55`. This departs
/// from the plain rule of going back to waiting for `0xAA` on anything but `0x55`, which loses
/// the frame opened by `0xAA 0xAA 0x55` when line noise ends in `0xAA`.
#[derive(Debug)]
pub struct FrameDecoder {
    state: RxState,
    msg_id: u8,
    len: u16,
    payload: Vec<u8, MAX_PAYLOAD>,
    crc: Crc16,
    crc_hi: u8,
}

impl FrameDecoder {
    pub const fn new() -> Self {
        Self {
            state: RxState::WaitSof0,
            msg_id: 0,
            len: 0,
            payload: Vec::new(),
            crc: Crc16::new(),
            crc_hi: 0,
        }
    }

    /// Drop any partial frame and wait for a new SOF pair.
    pub fn reset(&mut self) {
        self.state = RxState::WaitSof0;
        self.len = 0;
        self.payload.clear();
        self.crc = Crc16::new();
        self.crc_hi = 0;
    }

    /// Whether the decoder sits between frames.
    pub fn is_idle(&self) -> bool {
        self.state == RxState::WaitSof0
    }

    /// Feed one received byte.
    ///
    /// # Returns
    ///
    /// The completed frame when `byte` was the last byte of a valid frame.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            RxState::WaitSof0 => {
                if byte == SOF0 {
                    self.state = RxState::WaitSof1;
                }
            }
            RxState::WaitSof1 => {
                if byte == SOF1 {
                    self.crc = Crc16::new();
                    self.state = RxState::Msg;
                } else if byte != SOF0 {
                    // Only non-SOF bytes go back to scanning, a repeated SOF0 stays here
                    self.reset();
                }
            }
            RxState::Msg => {
                self.msg_id = byte;
                self.crc.update(byte);
                self.state = RxState::LenHi;
            }
            RxState::LenHi => {
                self.len = u16::from(byte) << 8;
                self.crc.update(byte);
                self.state = RxState::LenLo;
            }
            RxState::LenLo => {
                self.len |= u16::from(byte);
                self.crc.update(byte);
                if usize::from(self.len) > MAX_PAYLOAD {
                    debug!("Frame length {} too large, resyncing", self.len);
                    self.reset();
                } else {
                    self.payload.clear();
                    self.state = if self.len == 0 {
                        RxState::CrcHi
                    } else {
                        RxState::Payload
                    };
                }
            }
            RxState::Payload => {
                if self.payload.push(byte).is_err() {
                    self.reset();
                    return None;
                }
                self.crc.update(byte);
                if self.payload.len() == usize::from(self.len) {
                    self.state = RxState::CrcHi;
                }
            }
            RxState::CrcHi => {
                self.crc_hi = byte;
                self.state = RxState::CrcLo;
            }
            RxState::CrcLo => {
                let received = u16::from_be_bytes([self.crc_hi, byte]);
                let frame = if received == self.crc.value() {
                    Some(Frame {
                        msg_id: self.msg_id,
                        payload: core::mem::take(&mut self.payload),
                    })
                } else {
                    debug!(
                        "Frame CRC mismatch: received {=u16:04x}, computed {=u16:04x}",
                        received,
                        self.crc.value()
                    );
                    None
                };
                self.reset();
                return frame;
            }
        }
        None
    }

    /// Drain buffered bytes from `transport` until one frame completes or nothing is left.
    ///
    /// Bytes after a completed frame stay in the transport for the next call.
    pub fn poll<T: ByteTransport>(&mut self, transport: &mut T) -> Option<Frame> {
        while let Some(byte) = transport.try_read_byte() {
            if let Some(frame) = self.push(byte) {
                return Some(frame);
            }
        }
        None
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
