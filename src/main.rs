//! Firmware entry point for the debug tool on STM32H753.
//!
//! Brings up the clocks, USB and the CSPI slave, then hands the board to the dispatcher task.

#![no_std]
#![no_main]

// Application modules
mod apps;
mod drivers;
mod peripherals;

use debug_tool::Board;
use defmt::{error, info};
use embassy_executor::Spawner;
use peripherals::{init_system, Mcu, SpiSlavePort, UptimeTicks, UsbSystem};

use apps::host_link::HostLink;
use drivers::{flash::UserFlash, pins::BoardPins};

// Import panic handler and defmt RTT for debugging
#[cfg(not(feature = "debug"))]
use panic_halt as _;
#[cfg(feature = "debug")]
use {defmt_rtt as _, panic_probe as _};

/// Main application entry point
///
/// Initializes the system and spawns the USB, host link and dispatcher tasks.
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Starting debug tool firmware v{}", env!("CARGO_PKG_VERSION"));

    let p = init_system();

    let (usb, acm) = UsbSystem::new(claim_usb!(p), claim_acm!(p));
    let Some((link, serial)) = HostLink::new(acm) else {
        error!("Host link rings already claimed");
        return;
    };

    let board = Board {
        gpio: BoardPins,
        ticks: UptimeTicks::default(),
        flash: UserFlash::new(claim_flash!(p)),
        spi: SpiSlavePort::new(claim_cspi_spi!(p)),
        system: Mcu,
    };

    info!("System initialized, spawning tasks...");
    spawner.spawn(peripherals::usb_system::task(usb)).unwrap();
    spawner.spawn(apps::host_link::task(link)).unwrap();
    spawner.spawn(apps::dispatcher::task(serial, board)).unwrap();
}
