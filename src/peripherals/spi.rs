//! SPI4 in slave mode, feeding CSPI rounds from its interrupt.
//!
//! Pins: PE11 NSS, PE12 SCK, PE13 MISO, PE14 MOSI, all on AF5. The embassy SPI driver only
//! supports master mode, so the peripheral is programmed through the PAC while the typed
//! peripherals are held to keep anything else from using them.

use core::cell::RefCell;
use core::convert::Infallible;
use core::ptr;

use debug_tool::cspi::{CspiConfig, RoundConsumer};
use debug_tool::platform::SpiSlave;
use defmt::{info, warn};
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::{
    pac::{self, gpio::vals as gpio_vals, spi::vals},
    peripherals, Peri,
};
use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use embedded_hal::digital::{ErrorType, OutputPin};

use crate::drivers::pins::PortPin;

/// Peripheral collection for the CSPI slave
pub struct SpiPeripherals<'d> {
    pub spi4: Peri<'d, peripherals::SPI4>,
    pub nss: Peri<'d, peripherals::PE11>,  // NSS
    pub sck: Peri<'d, peripherals::PE12>,  // SCK
    pub miso: Peri<'d, peripherals::PE13>, // MISO
    pub mosi: Peri<'d, peripherals::PE14>, // MOSI
}

/// Macro to claim peripherals for SpiSlavePort
#[macro_export]
macro_rules! claim_cspi_spi {
    ($peripherals:expr) => {{
        $crate::peripherals::spi::SpiPeripherals {
            spi4: $peripherals.SPI4,
            nss: $peripherals.PE11,  // NSS
            sck: $peripherals.PE12,  // SCK
            miso: $peripherals.PE13, // MISO
            mosi: $peripherals.PE14, // MOSI
        }
    }};
}

const SPI_PINS: [usize; 4] = [11, 12, 13, 14];
const SPI_AF: u8 = 5;

/// Alert output; a session may name a pin the board cannot drive.
struct Alert(Option<PortPin>);

impl ErrorType for Alert {
    type Error = Infallible;
}

impl OutputPin for Alert {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.as_mut().map_or(Ok(()), |pin| pin.set_low())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.as_mut().map_or(Ok(()), |pin| pin.set_high())
    }
}

struct Attached {
    rounds: RoundConsumer<'static>,
    alert: Alert,
}

/// Session state shared with the SPI4 interrupt.
static ATTACHED: Mutex<CriticalSectionRawMutex, RefCell<Option<Attached>>> = Mutex::new(RefCell::new(None));

/// [`SpiSlave`] on SPI4.
pub struct SpiSlavePort<'d> {
    _claims: SpiPeripherals<'d>,
}

impl<'d> SpiSlavePort<'d> {
    /// Route the pins and enable the peripheral clock. The slave stays disabled until a session
    /// attaches.
    pub fn new(claims: SpiPeripherals<'d>) -> Self {
        pac::RCC.ahb4enr().modify(|w| w.set_gpioeen(true));
        pac::RCC.apb2enr().modify(|w| w.set_spi4en(true));

        let gpio = pac::GPIOE;
        for pin in SPI_PINS {
            gpio.afr(pin / 8).modify(|w| w.set_afr(pin % 8, SPI_AF));
            gpio.ospeedr().modify(|w| w.set_ospeedr(pin, gpio_vals::Ospeedr::VERY_HIGH_SPEED));
            gpio.moder().modify(|w| w.set_moder(pin, gpio_vals::Moder::ALTERNATE));
        }

        interrupt::SPI4.set_priority(Priority::P1);
        Self { _claims: claims }
    }

    fn configure(config: &CspiConfig) {
        let regs = pac::SPI4;
        regs.cr1().modify(|w| w.set_spe(false));
        regs.cfg1().modify(|w| {
            w.set_dsize(config.word_size - 1);
            w.set_fthlv(vals::Fthlv::ONE_FRAME);
        });
        regs.cfg2().modify(|w| {
            w.set_master(vals::Master::SLAVE);
            w.set_comm(vals::Comm::FULL_DUPLEX);
            w.set_ssm(false);
            w.set_cpol(if config.cpol() { vals::Cpol::IDLE_HIGH } else { vals::Cpol::IDLE_LOW });
            w.set_cpha(if config.cpha() {
                vals::Cpha::SECOND_EDGE
            } else {
                vals::Cpha::FIRST_EDGE
            });
        });
        regs.cr1().modify(|w| w.set_spe(true));
    }
}

impl SpiSlave<'static> for SpiSlavePort<'_> {
    fn attach(&mut self, config: &CspiConfig, rounds: RoundConsumer<'static>) {
        Self::configure(config);

        let alert = PortPin::into_output(config.alert.port, config.alert.pin, debug_tool::Level::Low);
        if alert.is_none() {
            warn!("CSPI alert pin P{}.{} is not available", config.alert.port, config.alert.pin);
        }
        ATTACHED.lock(|cell| {
            cell.replace(Some(Attached {
                rounds,
                alert: Alert(alert),
            }))
        });
        info!("SPI4 slave attached in mode {}", config.mode);
    }

    fn start_round(&mut self) {
        pac::SPI4.ier().modify(|w| w.set_rxpie(true));
        interrupt::SPI4.unpend();
        // SAFETY: the handler only touches state guarded by ATTACHED
        unsafe { interrupt::SPI4.enable() };
    }

    fn with_rounds<R>(&mut self, f: impl FnOnce(&mut RoundConsumer<'static>) -> R) -> Option<R> {
        ATTACHED.lock(|cell| cell.borrow_mut().as_mut().map(|attached| f(&mut attached.rounds)))
    }

    fn detach(&mut self) -> Option<RoundConsumer<'static>> {
        interrupt::SPI4.disable();
        let regs = pac::SPI4;
        regs.ier().write(|w| w.0 = 0);
        regs.cr1().modify(|w| w.set_spe(false));

        let attached = ATTACHED.lock(|cell| cell.take());
        if attached.is_some() {
            info!("SPI4 slave detached");
        }
        attached.map(|attached| attached.rounds)
    }
}

#[interrupt]
fn SPI4() {
    let regs = pac::SPI4;
    ATTACHED.lock(|cell| {
        let mut slot = cell.borrow_mut();
        let Some(attached) = slot.as_mut() else {
            regs.ier().write(|w| w.0 = 0);
            return;
        };

        while regs.sr().read().rxp() {
            // SAFETY: 8-bit access to the data registers is how the FIFO is read and written one frame at a time
            let rx = unsafe { ptr::read_volatile(regs.rxdr().as_ptr() as *const u8) };
            let tx = attached.rounds.exchange(rx, &mut attached.alert);
            unsafe { ptr::write_volatile(regs.txdr().as_ptr() as *mut u8, tx) };

            if attached.rounds.is_complete() {
                // Hold off until the main loop starts the next round
                regs.ier().modify(|w| w.set_rxpie(false));
                break;
            }
        }
    });
    cortex_m::asm::dsb();
}
