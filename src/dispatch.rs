//! Main loop: boot check of the stored frame, then one host message per poll.

use core::fmt::Write;

use crate::actions::{self, ActionSet, Executor};
use crate::config::{CspiTuning, TimingConfig, RING_SIZE};
use crate::cspi::{CspiManager, SpscRing};
use crate::platform::{ByteTransport, FlashError, FlashStore, GpioBank, SpiSlave, SystemControl, TickSource};
use crate::protocol::{encode, Frame, Link, MessageId, StoredFrameError, MAX_FRAME};

/// Most ring bytes echoed after a DATA frame.
const RING_DUMP_LEN: usize = 32;

/// The board collaborators the dispatcher drives.
pub struct Board<G, K, F, S, Y> {
    pub gpio: G,
    pub ticks: K,
    pub flash: F,
    pub spi: S,
    pub system: Y,
}

/// What happened to the frame stored in flash at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootOutcome {
    /// No preamble or an impossible length
    Empty,
    CrcFailed,
    /// A valid frame without the boot flag
    NotBootable,
    UnknownMessage(u8),
    /// The stored actions did not parse, with the parser code
    ParseFailed(i32),
    /// The stored actions ran, to completion or to their first error
    Executed,
    ReadFailed(FlashError),
}

/// Routes host frames to the flash, the action executor and the CSPI session.
pub struct Dispatcher<'r, T, G, K, F, S, Y> {
    link: Link<T>,
    board: Board<G, K, F, S, Y>,
    cspi: CspiManager<'r>,
    timing: TimingConfig,
}

impl<'r, T, G, K, F, S, Y> Dispatcher<'r, T, G, K, F, S, Y>
where
    T: ByteTransport,
    G: GpioBank,
    K: TickSource,
    F: FlashStore,
    S: SpiSlave<'r>,
    Y: SystemControl,
{
    pub fn new(transport: T, board: Board<G, K, F, S, Y>, ring: &'r SpscRing<RING_SIZE>) -> Self {
        Self::with_config(transport, board, ring, TimingConfig::default(), CspiTuning::default())
    }

    pub fn with_config(
        transport: T,
        board: Board<G, K, F, S, Y>,
        ring: &'r SpscRing<RING_SIZE>,
        timing: TimingConfig,
        tuning: CspiTuning,
    ) -> Self {
        Self {
            link: Link::new(transport),
            board,
            cspi: CspiManager::new(ring, tuning),
            timing,
        }
    }

    /// Announce the device, then run the stored frame if it is marked bootable.
    pub fn boot(&mut self) -> BootOutcome {
        self.link.line(format_args!("Debug Tool initialized"));
        self.link.line(format_args!("Checking flash..."));

        let mut image = [0u8; MAX_FRAME];
        if let Err(e) = self.board.flash.read(0, &mut image) {
            warn!("Flash read failed: {}", e);
            self.link.line(format_args!("Flash error"));
            return BootOutcome::ReadFailed(e);
        }

        let frame = match Frame::from_stored(&image) {
            Ok(frame) => frame,
            Err(StoredFrameError::CrcMismatch) => {
                self.link.line(format_args!("Flash CRC check failed"));
                return BootOutcome::CrcFailed;
            }
            Err(_) => {
                self.link.line(format_args!("No valid data in flash"));
                return BootOutcome::Empty;
            }
        };

        match frame.message() {
            Some(MessageId::WriteFlashBoot) => {
                self.link.line(format_args!("Executing actions stored in flash..."));
                match actions::parse_with(&frame.payload, &self.timing) {
                    Ok(set) if !set.is_empty() => {
                        if let Err(code) = self.execute(set) {
                            warn!("Stored actions failed: {}", code);
                            self.link.line(format_args!("Execution Error!!"));
                        }
                        self.link.line(format_args!("Execution from flash completed"));
                        BootOutcome::Executed
                    }
                    result => {
                        let code = result.err().map_or(0, |e| e.code());
                        self.link.line(format_args!("Flash parse error {}", code));
                        BootOutcome::ParseFailed(code)
                    }
                }
            }
            Some(MessageId::WriteFlash) => {
                self.link.line(format_args!("Flash contains a frame, but not marked as bootable"));
                BootOutcome::NotBootable
            }
            _ => {
                self.link.line(format_args!("Flash has unknown message ID"));
                BootOutcome::UnknownMessage(frame.msg_id)
            }
        }
    }

    /// One main loop iteration.
    ///
    /// Checks the CSPI ring for a refill, then handles at most one host frame. Without a frame,
    /// services a completed SPI round instead.
    ///
    /// # Returns
    ///
    /// Whether a frame was handled.
    pub fn poll(&mut self) -> bool {
        self.cspi.poll_refill(&mut self.link);

        match self.link.poll_frame() {
            Some(frame) => {
                self.handle(&frame);
                true
            }
            None => {
                self.cspi.service_round(&mut self.link, &mut self.board.spi);
                false
            }
        }
    }

    /// Act on one validated frame.
    pub fn handle(&mut self, frame: &Frame) {
        let Some(message) = frame.message() else {
            debug!("Unknown message id {=u8:x}", frame.msg_id);
            self.link.line(format_args!("Unknown msg"));
            return;
        };

        match message {
            MessageId::ClearFlash => match self.board.flash.erase() {
                Ok(()) => self.link.line(format_args!("Flash erased")),
                Err(e) => self.flash_failed(e),
            },
            MessageId::WriteFlash | MessageId::WriteFlashBoot => match self.store(frame) {
                Ok(()) => self.link.line(format_args!("Flash programmed")),
                Err(e) => self.flash_failed(e),
            },
            MessageId::ExecuteActions => match actions::parse_with(&frame.payload, &self.timing) {
                Ok(set) if !set.is_empty() => {
                    self.link.line(format_args!("Executing..."));
                    if self.execute(set).is_err() {
                        self.link.line(format_args!("Execution Error!!"));
                    }
                    self.link.line(format_args!("Execution completed"));
                }
                result => {
                    let code = result.err().map_or(0, |e| e.code());
                    self.link.line(format_args!("Parse error {}", code));
                }
            },
            MessageId::CspiBegin => {
                match self.cspi.begin(&frame.payload, &mut self.link, &mut self.board.spi) {
                    Ok(()) => self.link.line(format_args!("CSPI BEGIN OK")),
                    Err(e) => {
                        warn!("CSPI begin rejected: {}", e);
                        self.link.line(format_args!("CSPI parse error {}", e.code()));
                    }
                }
            }
            MessageId::CspiData => match self.cspi.push(&frame.payload) {
                Ok(written) => self.report_push(written),
                Err(_) => self.link.line(format_args!("CSPI DATA ignored (not active)")),
            },
            MessageId::CspiEnd => {
                self.cspi.end(&mut self.link, &mut self.board.spi);
            }
            MessageId::CspiTerminate => self.cspi.terminate(&mut self.link, &mut self.board.spi),
            MessageId::Reset => {
                info!("Reset requested by host");
                self.board.system.reset();
            }
            // Device to host only
            MessageId::CspiReq => self.link.line(format_args!("Unknown msg")),
        }
    }

    pub fn link(&self) -> &Link<T> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link<T> {
        &mut self.link
    }

    pub fn board(&self) -> &Board<G, K, F, S, Y> {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board<G, K, F, S, Y> {
        &mut self.board
    }

    pub fn cspi(&self) -> &CspiManager<'r> {
        &self.cspi
    }

    /// Run an action set to completion.
    ///
    /// # Returns
    ///
    /// The executor error code on failure.
    fn execute(&mut self, set: ActionSet) -> Result<(), i32> {
        #[cfg(feature = "debug-frames")]
        self.link.line(format_args!("{}", set));

        let mut executor = Executor::new(set, &mut self.board.gpio, &mut self.board.ticks);
        executor.run().map_err(|e| e.code())
    }

    /// Persist `frame` in wire layout at the start of the user region.
    fn store(&mut self, frame: &Frame) -> Result<(), FlashError> {
        // A decoded frame always fits the encoder
        let image = encode(frame.msg_id, &frame.payload).map_err(|_| FlashError::OutOfRange)?;
        self.board.flash.erase()?;
        self.board.flash.program(0, &image)
    }

    fn flash_failed(&mut self, e: FlashError) {
        warn!("Flash operation failed: {}", e);
        self.link.line(format_args!("Flash error"));
    }

    fn report_push(&mut self, written: usize) {
        let Some(session) = self.cspi.session() else {
            return;
        };
        let ring = session.ring();
        let (used, size) = (ring.used(), ring.size());
        self.link.line(format_args!(
            "CSPI DATA push: written={} total={} head={} tail={} used={}/{} free={}",
            written,
            session.total_received(),
            ring.head(),
            ring.tail(),
            used,
            size,
            ring.free()
        ));

        let mut dump = [0u8; RING_DUMP_LEN];
        let len = ring.peek(&mut dump);
        if len > 0 {
            let _ = self.link.write_str("RB data: ");
            for byte in &dump[..len] {
                let _ = write!(self.link, "{:02X} ", byte);
            }
            self.link.send_raw(b"\r\n");
        }
    }
}
