//! Session lifecycle and flow control, run from the main loop.

use core::fmt::{self, Write};

use heapless::Vec;

use super::ring::{Producer, SpscRing};
use super::round::RoundConsumer;
use crate::actions::PinRef;
use crate::config::{CspiTuning, RING_SIZE, RX_CAPTURE_CAPACITY};
use crate::platform::{ByteTransport, SpiSlave};
use crate::protocol::{Link, MessageId};

/// Reasons a BEGIN frame is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BeginError {
    /// Fewer than [`CspiConfig::BEGIN_LEN`] bytes
    TooShort,
    /// SPI mode outside 0..=3
    BadMode(u8),
    /// Only 8-bit words are supported
    BadWordSize(u8),
    /// The transmit ring is still held by a previous session
    RingBusy,
    /// The RX capture exceeds [`RX_CAPTURE_CAPACITY`]
    CaptureTooLarge(u16),
}

impl BeginError {
    /// Stable code reported to the host.
    pub const fn code(&self) -> i32 {
        match self {
            Self::TooShort => -2,
            Self::BadMode(_) => -3,
            Self::BadWordSize(_) => -4,
            Self::RingBusy => -5,
            Self::CaptureTooLarge(_) => -6,
        }
    }
}

/// DATA arrived while no session was streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataError;

/// Session parameters carried by a BEGIN frame.
///
/// ```text
/// offset  0     1          2..4        4              5..7      7..11         11    12
///         mode  word_size  rx_size BE  transfer_size  reserved  threshold BE  port  pin
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CspiConfig {
    /// SPI mode: bit 1 is CPOL, bit 0 is CPHA
    pub mode: u8,
    pub word_size: u8,
    /// Bytes to capture from the master per round, 0 to disable capture
    pub rx_size: u16,
    /// Bytes per round, clamped to 1..=4
    pub transfer_size: u8,
    pub threshold: u32,
    pub alert: PinRef,
}

impl CspiConfig {
    pub const BEGIN_LEN: usize = 13;

    /// Decode and validate a BEGIN payload.
    pub fn parse(payload: &[u8]) -> Result<Self, BeginError> {
        if payload.len() < Self::BEGIN_LEN {
            return Err(BeginError::TooShort);
        }

        let config = Self {
            mode: payload[0],
            word_size: payload[1],
            rx_size: u16::from_be_bytes([payload[2], payload[3]]),
            transfer_size: payload[4].clamp(1, 4),
            threshold: u32::from_be_bytes([payload[7], payload[8], payload[9], payload[10]]),
            alert: PinRef {
                port: payload[11],
                pin: payload[12],
            },
        };

        if config.mode > 3 {
            return Err(BeginError::BadMode(config.mode));
        }
        if config.word_size != 8 {
            return Err(BeginError::BadWordSize(config.word_size));
        }
        Ok(config)
    }

    /// Clock idles high.
    pub const fn cpol(&self) -> bool {
        self.mode & 0b10 != 0
    }

    /// Data is captured on the second clock edge.
    pub const fn cpha(&self) -> bool {
        self.mode & 0b01 != 0
    }

    /// Mask selecting the `transfer_size` low bytes of a word.
    pub const fn window_mask(&self) -> u32 {
        if self.transfer_size >= 4 {
            u32::MAX
        } else {
            (1u32 << (8 * self.transfer_size as u32)) - 1
        }
    }
}

impl fmt::Display for CspiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "----- CSPI CONFIG -----\r\n  mode={}\r\n  word_size={} bits\r\n  transfer_size={}\r\n  threshold={}\r\n  port={}  pin={}\r\n  rx_size={}\r\n-----------------------\r\n",
            self.mode,
            self.word_size,
            self.transfer_size,
            self.threshold,
            self.alert.port,
            self.alert.pin,
            self.rx_size
        )
    }
}

/// Main-loop state of an open session. The consumer half lives with the SPI slave.
pub struct CspiSession<'r> {
    config: CspiConfig,
    producer: Producer<'r, RING_SIZE>,
    low_watermark: usize,
    bulk_active: bool,
    bulk_finished: bool,
    total_received: u32,
    req_inflight: bool,
}

impl<'r> CspiSession<'r> {
    pub fn config(&self) -> &CspiConfig {
        &self.config
    }

    pub fn bulk_active(&self) -> bool {
        self.bulk_active
    }

    pub fn bulk_finished(&self) -> bool {
        self.bulk_finished
    }

    /// Bytes accepted from DATA frames since BEGIN.
    pub fn total_received(&self) -> u32 {
        self.total_received
    }

    pub fn req_inflight(&self) -> bool {
        self.req_inflight
    }

    pub fn low_watermark(&self) -> usize {
        self.low_watermark
    }

    /// Read-only view of the transmit ring.
    pub fn ring(&self) -> &Producer<'r, RING_SIZE> {
        &self.producer
    }
}

/// Owns the CSPI session, if any, and drives its lifecycle.
pub struct CspiManager<'r> {
    ring: &'r SpscRing<RING_SIZE>,
    tuning: CspiTuning,
    session: Option<CspiSession<'r>>,
}

impl<'r> CspiManager<'r> {
    pub const fn new(ring: &'r SpscRing<RING_SIZE>, tuning: CspiTuning) -> Self {
        Self {
            ring,
            tuning,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&CspiSession<'r>> {
        self.session.as_ref()
    }

    /// Whether a session is open and still accepting DATA.
    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.bulk_active)
    }

    /// Open a session from a BEGIN payload.
    ///
    /// An open session is shut down first. On success the first REQ is sent and the first round
    /// started.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The session is streaming
    /// * `Err(BeginError)` - Nothing was started; a previous session survives only a malformed payload
    pub fn begin<T, S>(&mut self, payload: &[u8], link: &mut Link<T>, spi: &mut S) -> Result<(), BeginError>
    where
        T: ByteTransport,
        S: SpiSlave<'r>,
    {
        let config = CspiConfig::parse(payload)?;
        link.line(format_args!("{}", config));

        if self.session.is_some() {
            self.shutdown(link, spi);
        }

        if usize::from(config.rx_size) > RX_CAPTURE_CAPACITY {
            return Err(BeginError::CaptureTooLarge(config.rx_size));
        }
        let (producer, consumer) = self.ring.try_split().ok_or(BeginError::RingBusy)?;

        let low_watermark = self.tuning.effective_low_watermark(producer.size());
        spi.attach(&config, RoundConsumer::new(consumer, &config, self.tuning.idle_fill));
        self.session = Some(CspiSession {
            config,
            producer,
            low_watermark,
            bulk_active: true,
            bulk_finished: false,
            total_received: 0,
            req_inflight: false,
        });
        info!(
            "CSPI session open: mode={} transfer_size={} threshold={} rx_size={}",
            config.mode,
            config.transfer_size,
            config.threshold,
            config.rx_size
        );

        self.send_req(link);
        self.start_round(spi);
        Ok(())
    }

    /// Append DATA bytes to the transmit ring.
    ///
    /// # Returns
    ///
    /// The number of bytes accepted; the ring may take fewer than offered.
    pub fn push(&mut self, data: &[u8]) -> Result<usize, DataError> {
        let session = self.session.as_mut().filter(|s| s.bulk_active).ok_or(DataError)?;
        let written = session.producer.push(data);
        session.total_received = session.total_received.wrapping_add(written as u32);
        if written > 0 {
            session.req_inflight = false;
        }
        if written < data.len() {
            debug!("CSPI ring full, accepted {} of {} bytes", written, data.len());
        }
        Ok(written)
    }

    /// Ask the host for more data when the ring runs low.
    ///
    /// # Returns
    ///
    /// Whether a REQ was sent.
    pub fn poll_refill<T: ByteTransport>(&mut self, link: &mut Link<T>) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        if !session.bulk_active || session.bulk_finished || session.req_inflight {
            return false;
        }
        let ring = &session.producer;
        if ring.used() <= session.low_watermark && ring.free() >= self.tuning.refill_min_free {
            self.send_req(link);
            return true;
        }
        false
    }

    /// The host has no more data: finish draining, shutting down now if already drained.
    ///
    /// # Returns
    ///
    /// Whether the session was shut down.
    pub fn end<T, S>(&mut self, link: &mut Link<T>, spi: &mut S) -> bool
    where
        T: ByteTransport,
        S: SpiSlave<'r>,
    {
        let Some(session) = self.session.as_mut().filter(|s| s.bulk_active) else {
            return false;
        };
        session.bulk_finished = true;
        session.req_inflight = false;
        link.line(format_args!("CSPI END"));

        let drained = session.producer.used() == 0;
        if drained && spi.with_rounds(|r| r.capture_done()).unwrap_or(true) {
            self.shutdown(link, spi);
            return true;
        }
        false
    }

    /// Abort the session immediately, whatever is still queued.
    pub fn terminate<T, S>(&mut self, link: &mut Link<T>, spi: &mut S)
    where
        T: ByteTransport,
        S: SpiSlave<'r>,
    {
        link.line(format_args!("CSPI TERMINATE"));
        if let Some(session) = self.session.as_mut() {
            session.req_inflight = false;
            session.bulk_finished = true;
            session.bulk_active = false;
        }
        self.shutdown(link, spi);
    }

    /// Main-loop work after a round: report the capture, then finish or start the next round.
    ///
    /// # Returns
    ///
    /// Whether a completed round was handled.
    pub fn service_round<T, S>(&mut self, link: &mut Link<T>, spi: &mut S) -> bool
    where
        T: ByteTransport,
        S: SpiSlave<'r>,
    {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        let round = spi.with_rounds(|r| {
            if !r.is_complete() {
                return None;
            }
            let captured: Vec<u8, RX_CAPTURE_CAPACITY> = Vec::from_slice(r.captured()).unwrap_or_default();
            Some((captured, r.capture_done()))
        });
        let Some((captured, capture_done)) = round.flatten() else {
            return false;
        };

        if !captured.is_empty() {
            for byte in &captured {
                let _ = write!(link, "0x{:02X} ", byte);
            }
            link.send_raw(b"\r\n");
        }

        if session.bulk_finished && session.producer.used() == 0 && capture_done {
            link.line(format_args!("CSPI DONE total={}", session.total_received));
            self.shutdown(link, spi);
        } else {
            self.start_round(spi);
        }
        true
    }

    /// Stop the slave and release the ring. Safe to call with no session open.
    pub fn shutdown<T, S>(&mut self, link: &mut Link<T>, spi: &mut S)
    where
        T: ByteTransport,
        S: SpiSlave<'r>,
    {
        let rounds = spi.detach();
        let session = self.session.take();
        if let Some(session) = &session {
            info!(
                "CSPI session closed: received {} bytes, {} queued",
                session.total_received,
                session.producer.used()
            );
        }
        // Dropping both halves returns the ring
        drop(rounds);
        drop(session);
        link.line(format_args!("CSPI SHUTDOWN"));
    }

    fn send_req<T: ByteTransport>(&mut self, link: &mut Link<T>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.req_inflight {
            return;
        }
        // An empty payload always fits in a frame
        let _ = link.send_frame(MessageId::CspiReq, &[]);
        session.req_inflight = true;
        link.line(format_args!("CSPI REQ"));
    }

    fn start_round<S: SpiSlave<'r>>(&mut self, spi: &mut S) {
        if spi.with_rounds(|r| r.begin_round()).is_some() {
            spi.start_round();
        }
    }
}
