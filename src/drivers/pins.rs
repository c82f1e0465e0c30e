//! GPIO addressed by port and pin number at runtime.
//!
//! Action graphs name their pins in the payload, so these go straight to the GPIO registers
//! instead of through typed embassy pins. Ports A to E exist on the 100-pin package. Pins wired to
//! the USB ULPI PHY and to the CSPI slave are refused.

use core::convert::Infallible;

use debug_tool::actions::Level;
use debug_tool::platform::GpioBank;
use defmt::warn;
use embassy_stm32::pac::{
    self,
    gpio::{vals, Gpio},
};
use embedded_hal::digital::{ErrorType, OutputPin};

const PORTS: usize = 5;
const PINS: u8 = 16;

/// Pins claimed by other peripherals, one mask per port.
const RESERVED: [u16; PORTS] = [
    1 << 3 | 1 << 5,                         // PA3, PA5: ULPI
    1 << 0 | 1 << 1 | 1 << 5 | 0b1111 << 10, // PB0, PB1, PB5, PB10-13: ULPI
    1 << 0 | 1 << 2 | 1 << 3,                // PC0, PC2, PC3: ULPI
    0,
    0b1111 << 11, // PE11-14: SPI4
];

fn port(port: u8) -> Option<Gpio> {
    match port {
        0 => Some(pac::GPIOA),
        1 => Some(pac::GPIOB),
        2 => Some(pac::GPIOC),
        3 => Some(pac::GPIOD),
        4 => Some(pac::GPIOE),
        _ => None,
    }
}

/// Whether `port`/`pin` exists and is free for user code.
pub fn available(port: u8, pin: u8) -> bool {
    usize::from(port) < PORTS && pin < PINS && RESERVED[usize::from(port)] & (1 << pin) == 0
}

fn enable_port_clock(port: u8) {
    pac::RCC.ahb4enr().modify(|w| match port {
        0 => w.set_gpioaen(true),
        1 => w.set_gpioben(true),
        2 => w.set_gpiocen(true),
        3 => w.set_gpioden(true),
        4 => w.set_gpioeen(true),
        _ => {}
    });
}

/// One GPIO line driven through its port registers.
#[derive(Clone, Copy)]
pub struct PortPin {
    regs: Gpio,
    pin: usize,
}

impl PortPin {
    /// # Returns
    ///
    /// `None` for pins that are missing or reserved.
    pub fn new(port_index: u8, pin: u8) -> Option<Self> {
        if !available(port_index, pin) {
            return None;
        }
        Some(Self {
            regs: port(port_index)?,
            pin: usize::from(pin),
        })
    }

    /// Configure as a push-pull output driving `level`.
    pub fn into_output(port_index: u8, pin: u8, level: Level) -> Option<Self> {
        let mut line = Self::new(port_index, pin)?;
        enable_port_clock(port_index);
        line.route();
        line.drive(level);
        line.regs.moder().modify(|w| w.set_moder(line.pin, vals::Moder::OUTPUT));
        Some(line)
    }

    fn route(&mut self) {
        self.regs.otyper().modify(|w| w.set_ot(self.pin, vals::Ot::PUSH_PULL));
        self.regs.pupdr().modify(|w| w.set_pupdr(self.pin, vals::Pupdr::FLOATING));
        self.regs.ospeedr().modify(|w| w.set_ospeedr(self.pin, vals::Ospeedr::VERY_HIGH_SPEED));
    }

    fn drive(&mut self, level: Level) {
        match level {
            Level::High => self.regs.bsrr().write(|w| w.set_bs(self.pin, true)),
            Level::Low => self.regs.bsrr().write(|w| w.set_br(self.pin, true)),
        }
    }

    fn level(&self) -> Level {
        Level::from(self.regs.idr().read().idr(self.pin) == vals::Idr::HIGH)
    }
}

impl ErrorType for PortPin {
    type Error = Infallible;
}

impl OutputPin for PortPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(Level::Low);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(Level::High);
        Ok(())
    }
}

/// [`GpioBank`] over every free pin of ports A to E.
#[derive(Default)]
pub struct BoardPins;

impl BoardPins {
    fn line(&self, port: u8, pin: u8) -> Option<PortPin> {
        let line = PortPin::new(port, pin);
        if line.is_none() {
            warn!("GPIO P{}.{} is not available", port, pin);
        }
        line
    }
}

impl GpioBank for BoardPins {
    fn supports(&self, port: u8, pin: u8) -> bool {
        available(port, pin)
    }

    fn enable_clock(&mut self, port: u8) {
        if usize::from(port) < PORTS {
            enable_port_clock(port);
        }
    }

    fn set_mux(&mut self, port: u8, pin: u8) {
        if let Some(mut line) = self.line(port, pin) {
            line.route();
        }
    }

    fn set_input(&mut self, port: u8, pin: u8) {
        if let Some(line) = self.line(port, pin) {
            line.regs.moder().modify(|w| w.set_moder(line.pin, vals::Moder::INPUT));
        }
    }

    fn set_output(&mut self, port: u8, pin: u8) {
        if let Some(line) = self.line(port, pin) {
            line.regs.moder().modify(|w| w.set_moder(line.pin, vals::Moder::OUTPUT));
        }
    }

    fn write_high(&mut self, port: u8, pin: u8) {
        if let Some(mut line) = self.line(port, pin) {
            line.drive(Level::High);
        }
    }

    fn write_low(&mut self, port: u8, pin: u8) {
        if let Some(mut line) = self.line(port, pin) {
            line.drive(Level::Low);
        }
    }

    fn read(&mut self, port: u8, pin: u8) -> Level {
        self.line(port, pin).map_or(Level::Low, |line| line.level())
    }
}
