//! In-memory stand-ins for the board, shared by the integration tests.
#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::convert::Infallible;

use debug_tool::actions::Level;
use debug_tool::config::RING_SIZE;
use debug_tool::cspi::{CspiConfig, RoundConsumer, SpscRing};
use debug_tool::platform::{ByteTransport, FlashError, FlashStore, GpioBank, SpiSlave, SystemControl, TickSource};
use debug_tool::protocol::{encode, Frame, FrameDecoder, MessageId};
use debug_tool::{Board, Dispatcher};
use embedded_hal::digital::{ErrorType, OutputPin};

/// Host side of the link: bytes queued for the device and everything it sent back.
#[derive(Default)]
pub struct MockLink {
    pub rx: VecDeque<u8>,
    pub tx: Vec<u8>,
}

impl MockLink {
    pub fn queue(&mut self, msg: u8, payload: &[u8]) {
        let bytes = encode(msg, payload).unwrap();
        self.rx.extend(bytes.iter().copied());
    }
}

impl ByteTransport for MockLink {
    fn try_read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        self.tx.extend_from_slice(bytes);
        bytes.len()
    }
}

/// Every GPIO call, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOp {
    Output(u8, u8),
    Input(u8, u8),
    Write(u8, u8, Level),
}

/// Five 16-pin ports. Input levels are set by the test, writes are logged.
#[derive(Default)]
pub struct MockGpio {
    pub levels: [[bool; 16]; 5],
    pub ops: Vec<PinOp>,
}

impl MockGpio {
    pub fn writes(&self) -> Vec<(u8, u8, Level)> {
        self.ops
            .iter()
            .filter_map(|op| match *op {
                PinOp::Write(port, pin, level) => Some((port, pin, level)),
                _ => None,
            })
            .collect()
    }
}

impl GpioBank for MockGpio {
    fn supports(&self, port: u8, pin: u8) -> bool {
        port < 5 && pin < 16
    }

    fn enable_clock(&mut self, _port: u8) {}

    fn set_mux(&mut self, _port: u8, _pin: u8) {}

    fn set_input(&mut self, port: u8, pin: u8) {
        self.ops.push(PinOp::Input(port, pin));
    }

    fn set_output(&mut self, port: u8, pin: u8) {
        self.ops.push(PinOp::Output(port, pin));
    }

    fn write_high(&mut self, port: u8, pin: u8) {
        if !self.supports(port, pin) {
            return;
        }
        self.levels[usize::from(port)][usize::from(pin)] = true;
        self.ops.push(PinOp::Write(port, pin, Level::High));
    }

    fn write_low(&mut self, port: u8, pin: u8) {
        if !self.supports(port, pin) {
            return;
        }
        self.levels[usize::from(port)][usize::from(pin)] = false;
        self.ops.push(PinOp::Write(port, pin, Level::Low));
    }

    fn read(&mut self, port: u8, pin: u8) -> Level {
        if !self.supports(port, pin) {
            return Level::Low;
        }
        Level::from(self.levels[usize::from(port)][usize::from(pin)])
    }
}

/// Advances by `step` ticks on every read.
pub struct MockTicks {
    pub now: Cell<u32>,
    pub step: u32,
    pub running: bool,
    pub starts: u32,
    pub stops: u32,
}

impl MockTicks {
    pub fn starting_at(now: u32) -> Self {
        Self {
            now: Cell::new(now),
            ..Self::default()
        }
    }
}

impl Default for MockTicks {
    fn default() -> Self {
        Self {
            now: Cell::new(0),
            step: 1,
            running: false,
            starts: 0,
            stops: 0,
        }
    }
}

impl TickSource for MockTicks {
    fn now(&self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.step));
        now
    }

    fn start(&mut self) {
        self.running = true;
        self.starts += 1;
    }

    fn stop(&mut self) {
        self.running = false;
        self.stops += 1;
    }
}

/// A 4 KiB user region, erased to 0xFF.
pub struct MockFlash {
    pub bytes: Vec<u8>,
    pub fail_program: bool,
}

impl Default for MockFlash {
    fn default() -> Self {
        Self {
            bytes: vec![0xFF; 4096],
            fail_program: false,
        }
    }
}

impl FlashStore for MockFlash {
    fn erase(&mut self) -> Result<(), FlashError> {
        self.bytes.fill(0xFF);
        Ok(())
    }

    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if self.fail_program {
            return Err(FlashError::Program);
        }
        let start = offset as usize;
        let region = self.bytes.get_mut(start..start + data.len()).ok_or(FlashError::OutOfRange)?;
        region.copy_from_slice(data);
        Ok(())
    }

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = offset as usize;
        let region = self.bytes.get(start..start + buf.len()).ok_or(FlashError::OutOfRange)?;
        buf.copy_from_slice(region);
        Ok(())
    }
}

/// Records every level driven on the alert pin.
#[derive(Default)]
pub struct AlertPin(pub Vec<bool>);

impl ErrorType for AlertPin {
    type Error = Infallible;
}

impl OutputPin for AlertPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.push(true);
        Ok(())
    }
}

/// SPI slave driven by the test acting as the master.
#[derive(Default)]
pub struct MockSpi<'r> {
    pub rounds: Option<RoundConsumer<'r>>,
    pub config: Option<CspiConfig>,
    pub alert: AlertPin,
    pub enabled: bool,
    pub attaches: u32,
    pub detaches: u32,
}

impl<'r> MockSpi<'r> {
    /// Clock frames until the round ends or `rx` runs out.
    ///
    /// # Returns
    ///
    /// The bytes sent back to the master.
    pub fn clock(&mut self, rx: &[u8]) -> Vec<u8> {
        let mut sent = Vec::new();
        let Some(rounds) = self.rounds.as_mut() else {
            return sent;
        };
        for &byte in rx {
            if !self.enabled {
                break;
            }
            sent.push(rounds.exchange(byte, &mut self.alert));
            if rounds.is_complete() {
                self.enabled = false;
            }
        }
        sent
    }

    /// Clock one full round of idle bytes from the master.
    pub fn clock_round(&mut self) -> Vec<u8> {
        let size = self.config.map_or(1, |c| usize::from(c.transfer_size));
        self.clock(&vec![0u8; size])
    }
}

impl<'r> SpiSlave<'r> for MockSpi<'r> {
    fn attach(&mut self, config: &CspiConfig, rounds: RoundConsumer<'r>) {
        self.config = Some(*config);
        self.rounds = Some(rounds);
        self.attaches += 1;
    }

    fn start_round(&mut self) {
        self.enabled = true;
    }

    fn with_rounds<R>(&mut self, f: impl FnOnce(&mut RoundConsumer<'r>) -> R) -> Option<R> {
        self.rounds.as_mut().map(f)
    }

    fn detach(&mut self) -> Option<RoundConsumer<'r>> {
        self.enabled = false;
        self.config = None;
        let rounds = self.rounds.take();
        if rounds.is_some() {
            self.detaches += 1;
        }
        rounds
    }
}

#[derive(Default)]
pub struct MockSystem {
    pub resets: u32,
}

impl SystemControl for MockSystem {
    fn reset(&mut self) {
        self.resets += 1;
    }
}

pub type TestBoard<'r> = Board<MockGpio, MockTicks, MockFlash, MockSpi<'r>, MockSystem>;
pub type TestDispatcher<'r> = Dispatcher<'r, MockLink, MockGpio, MockTicks, MockFlash, MockSpi<'r>, MockSystem>;

pub fn board<'r>() -> TestBoard<'r> {
    Board {
        gpio: MockGpio::default(),
        ticks: MockTicks::default(),
        flash: MockFlash::default(),
        spi: MockSpi::default(),
        system: MockSystem::default(),
    }
}

pub fn dispatcher(ring: &SpscRing<RING_SIZE>) -> TestDispatcher<'_> {
    Dispatcher::new(MockLink::default(), board(), ring)
}

/// Queue a frame for the device.
pub fn send(d: &mut TestDispatcher<'_>, msg: MessageId, payload: &[u8]) {
    d.link_mut().transport_mut().queue(msg.into(), payload);
}

/// Everything the device sent since the last call, split into frames and console text.
pub fn drain(d: &mut TestDispatcher<'_>) -> (Vec<Frame>, String) {
    let bytes = std::mem::take(&mut d.link_mut().transport_mut().tx);
    split_output(&bytes)
}

/// Separate device frames from console text in a captured byte stream.
pub fn split_output(bytes: &[u8]) -> (Vec<Frame>, String) {
    let mut frames = Vec::new();
    let mut text = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0xAA && bytes.get(i + 1) == Some(&0x55) {
            let mut decoder = FrameDecoder::new();
            let mut j = i;
            let mut frame = None;
            while j < bytes.len() && frame.is_none() {
                frame = decoder.push(bytes[j]);
                j += 1;
            }
            if let Some(frame) = frame {
                frames.push(frame);
                i = j;
                continue;
            }
        }
        text.push(bytes[i]);
        i += 1;
    }
    (frames, String::from_utf8_lossy(&text).into_owned())
}

/// Console lines, without their CRLF.
pub fn lines(text: &str) -> Vec<&str> {
    text.split("\r\n").filter(|line| !line.is_empty()).collect()
}

/// A CSPI BEGIN payload.
pub fn begin_payload(mode: u8, rx_size: u16, transfer_size: u8, threshold: u32, port: u8, pin: u8) -> Vec<u8> {
    let mut payload = vec![mode, 8];
    payload.extend_from_slice(&rx_size.to_be_bytes());
    payload.extend_from_slice(&[transfer_size, 0, 0]);
    payload.extend_from_slice(&threshold.to_be_bytes());
    payload.extend_from_slice(&[port, pin]);
    payload
}
