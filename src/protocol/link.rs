//! Host link: frames in, frames and console text out, over one [`ByteTransport`].

use core::fmt;

use super::{encode_into, Frame, FrameDecoder, FrameError, MessageId, MAX_FRAME};
use crate::platform::ByteTransport;

/// A transport paired with the frame decoder reading from it.
///
/// Writes never block: whatever the transport cannot accept is dropped and counted.
pub struct Link<T> {
    transport: T,
    decoder: FrameDecoder,
    dropped: usize,
}

impl<T: ByteTransport> Link<T> {
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            decoder: FrameDecoder::new(),
            dropped: 0,
        }
    }

    /// Next complete frame from the host, if the buffered bytes finish one.
    pub fn poll_frame(&mut self) -> Option<Frame> {
        let frame = self.decoder.poll(&mut self.transport);
        #[cfg(feature = "debug-frames")]
        {
            if let Some(frame) = &frame {
                debug!("RX frame msg={=u8:x} len={}", frame.msg_id, frame.payload.len());
            }
        }
        frame
    }

    /// Encode and send one frame.
    pub fn send_frame(&mut self, msg: MessageId, payload: &[u8]) -> Result<(), FrameError> {
        let mut buf = [0u8; MAX_FRAME];
        let len = encode_into(msg.into(), payload, &mut buf)?;
        self.send_raw(&buf[..len]);
        Ok(())
    }

    /// Send bytes as they are.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        let written = self.transport.write(bytes);
        if written < bytes.len() {
            self.dropped += bytes.len() - written;
            warn!("Link congested, dropped {} bytes", bytes.len() - written);
        }
    }

    /// Send one console line to the host, terminated with CRLF.
    pub fn line(&mut self, args: fmt::Arguments<'_>) {
        // Writing to the link itself cannot fail
        let _ = fmt::write(self, args);
        self.send_raw(b"\r\n");
    }

    /// Bytes lost to a congested transport since start-up.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: ByteTransport> fmt::Write for Link<T> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.send_raw(s.as_bytes());
        Ok(())
    }
}
