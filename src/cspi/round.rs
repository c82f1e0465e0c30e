//! Interrupt-side half of a CSPI session.
//!
//! For every SPI frame the master clocks, the slave hands the received byte to
//! [`RoundConsumer::exchange`] and transmits the byte it returns. A round ends after
//! `transfer_size` bytes went out, at which point the big-endian window of those bytes is compared
//! against the threshold and the alert pin follows the result. With RX capture enabled a round
//! also ends once the capture is full.

use embedded_hal::digital::OutputPin;
use heapless::Vec;

use super::ring::Consumer;
use super::CspiConfig;
use crate::actions::Level;
use crate::config::{RING_SIZE, RX_CAPTURE_CAPACITY};

pub struct RoundConsumer<'r> {
    ring: Consumer<'r, RING_SIZE>,
    transfer_size: u8,
    mask: u32,
    threshold: u32,
    idle_fill: u8,
    rx_size: usize,
    capture: Vec<u8, RX_CAPTURE_CAPACITY>,
    window: u32,
    sent_in_round: u8,
    complete: bool,
    last_alert: Option<Level>,
    underflows: u32,
}

impl<'r> RoundConsumer<'r> {
    /// Build the consumer for a session.
    ///
    /// `config.rx_size` must not exceed [`RX_CAPTURE_CAPACITY`]; larger requests are rejected when
    /// the session begins.
    pub fn new(ring: Consumer<'r, RING_SIZE>, config: &CspiConfig, idle_fill: u8) -> Self {
        Self {
            ring,
            transfer_size: config.transfer_size,
            mask: config.window_mask(),
            threshold: config.threshold,
            idle_fill,
            rx_size: usize::from(config.rx_size).min(RX_CAPTURE_CAPACITY),
            capture: Vec::new(),
            window: 0,
            sent_in_round: 0,
            complete: false,
            last_alert: None,
            underflows: 0,
        }
    }

    /// Reset the per-round counters and the capture before a new round.
    pub fn begin_round(&mut self) {
        self.complete = false;
        self.sent_in_round = 0;
        self.capture.clear();
    }

    /// Handle one SPI frame.
    ///
    /// # Arguments
    ///
    /// * `rx` - Byte received from the master
    /// * `alert` - Output driven with the threshold result when the round ends
    ///
    /// # Returns
    ///
    /// The byte to transmit: the oldest ring byte, or the idle fill when the ring is empty.
    pub fn exchange<P: OutputPin>(&mut self, rx: u8, alert: &mut P) -> u8 {
        if self.capture.len() < self.rx_size {
            // Cannot overflow, rx_size is capped to the capacity
            let _ = self.capture.push(rx);
        }

        let tx = match self.ring.pop() {
            Some(byte) => byte,
            None => {
                self.underflows = self.underflows.wrapping_add(1);
                self.idle_fill
            }
        };

        self.window = ((self.window << 8) | u32::from(tx)) & self.mask;
        self.sent_in_round += 1;

        if self.sent_in_round >= self.transfer_size {
            let level = Level::from(self.window > (self.threshold & self.mask));
            // The alert pin is push-pull GPIO, setting it cannot fail
            let _ = alert.set_state(level.into());
            self.last_alert = Some(level);
            self.window = 0;
            self.sent_in_round = 0;
            self.complete = true;
        }
        if self.rx_size > 0 && self.capture.len() >= self.rx_size {
            self.complete = true;
        }

        tx
    }

    /// Whether the current round has ended and the slave must stop feeding frames.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Bytes captured from the master this round.
    pub fn captured(&self) -> &[u8] {
        &self.capture
    }

    /// Whether the RX capture, if any, is full.
    pub fn capture_done(&self) -> bool {
        self.rx_size == 0 || self.capture.len() >= self.rx_size
    }

    /// Alert level produced by the most recent round.
    pub fn last_alert(&self) -> Option<Level> {
        self.last_alert
    }

    /// Frames that had to be padded with the idle fill.
    pub fn underflows(&self) -> u32 {
        self.underflows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cspi::SpscRing;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;

    #[derive(Default)]
    struct Alert(std::vec::Vec<bool>);

    impl ErrorType for Alert {
        type Error = Infallible;
    }

    impl OutputPin for Alert {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.push(false);
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.push(true);
            Ok(())
        }
    }

    fn config(transfer_size: u8, threshold: u32, rx_size: u16) -> CspiConfig {
        let mut payload = [0u8; 13];
        payload[1] = 8;
        payload[2..4].copy_from_slice(&rx_size.to_be_bytes());
        payload[4] = transfer_size;
        payload[7..11].copy_from_slice(&threshold.to_be_bytes());
        CspiConfig::parse(&payload).unwrap()
    }

    #[test]
    fn window_is_big_endian() {
        let ring: SpscRing<RING_SIZE> = SpscRing::new();
        let (mut producer, consumer) = ring.try_split().unwrap();
        let mut rounds = RoundConsumer::new(consumer, &config(2, 0x00FF, 0), 0x00);
        let mut alert = Alert::default();

        producer.push(&[0x01, 0x00, 0x00, 0xFF, 0x00, 0x01, 0xFF, 0x00]);
        let mut sent = std::vec::Vec::new();
        for _ in 0..4 {
            rounds.begin_round();
            sent.push(rounds.exchange(0, &mut alert));
            assert!(!rounds.is_complete());
            sent.push(rounds.exchange(0, &mut alert));
            assert!(rounds.is_complete());
        }

        assert_eq!(sent, [0x01, 0x00, 0x00, 0xFF, 0x00, 0x01, 0xFF, 0x00]);
        // 0x0100 > 0xFF, 0x00FF == 0xFF, 0x0001 < 0xFF, 0xFF00 > 0xFF
        assert_eq!(alert.0, [true, false, false, true]);
    }

    #[test]
    fn underflow_sends_idle_fill() {
        let ring: SpscRing<RING_SIZE> = SpscRing::new();
        let (_producer, consumer) = ring.try_split().unwrap();
        let mut rounds = RoundConsumer::new(consumer, &config(1, 0, 0), 0xA5);
        let mut alert = Alert::default();

        assert_eq!(rounds.exchange(0, &mut alert), 0xA5);
        assert_eq!(rounds.underflows(), 1);
        assert_eq!(rounds.last_alert(), Some(Level::High));
    }

    #[test]
    fn full_capture_ends_round() {
        let ring: SpscRing<RING_SIZE> = SpscRing::new();
        let (_producer, consumer) = ring.try_split().unwrap();
        let mut rounds = RoundConsumer::new(consumer, &config(4, 0, 2), 0x00);
        let mut alert = Alert::default();

        rounds.begin_round();
        rounds.exchange(0x11, &mut alert);
        assert!(!rounds.is_complete());
        assert!(!rounds.capture_done());
        rounds.exchange(0x22, &mut alert);
        assert!(rounds.is_complete());
        assert!(rounds.capture_done());
        assert_eq!(rounds.captured(), &[0x11, 0x22]);
        assert!(alert.0.is_empty());

        rounds.begin_round();
        assert!(rounds.captured().is_empty());
    }
}
