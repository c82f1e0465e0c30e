//! The debug tool main loop as an embassy task.

use debug_tool::config::RING_SIZE;
use debug_tool::cspi::SpscRing;
use debug_tool::{Board, BootOutcome, Dispatcher};
use defmt::info;
use embassy_futures::yield_now;

use super::host_link::UsbSerial;
use crate::drivers::{flash::UserFlash, pins::BoardPins};
use crate::peripherals::{Mcu, SpiSlavePort, UptimeTicks};

/// CSPI transmit ring, shared with the SPI4 interrupt while a session is open.
static CSPI_RING: SpscRing<RING_SIZE> = SpscRing::new();

pub type FirmwareBoard = Board<BoardPins, UptimeTicks, UserFlash<'static>, SpiSlavePort<'static>, Mcu>;

/// Check the stored frame, then serve the host forever.
///
/// Each iteration yields so the USB tasks can move bytes; action graphs run to completion inside
/// one iteration.
#[embassy_executor::task]
pub async fn task(serial: UsbSerial, board: FirmwareBoard) -> ! {
    let mut dispatcher = Dispatcher::new(serial, board, &CSPI_RING);

    let outcome: BootOutcome = dispatcher.boot();
    info!("Boot check: {}", outcome);

    loop {
        dispatcher.poll();
        yield_now().await;
    }
}
