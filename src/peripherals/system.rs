//! System initialization and clock configuration for STM32H753, plus the system-level
//! collaborators of the dispatcher: the action tick source and the reset control.

use debug_tool::config::TICK_US;
use debug_tool::platform::{SystemControl, TickSource};
use embassy_stm32::{rcc::*, Config, Peripherals};
use embassy_time::Instant;

/// Initialize the STM32H753 system with optimal clock configuration.
///
/// Configures the system for high-performance operation:
/// - **480 MHz** system clock (maximum for STM32H753) using PLL1 from HSI
/// - **240 MHz** AHB clock (CPU and high-speed peripherals)
/// - **120 MHz** APB clocks (peripheral buses)
/// - **48 MHz** HSI48 clock for USB (synchronized from USB SOF)
/// - **Scale0** voltage scaling for maximum performance
///
/// The 120 MHz APB2 clock also feeds SPI4, which only bounds how fast the host may clock the
/// CSPI slave.
///
/// # Returns
///
/// The initialized [`Peripherals`] struct containing all STM32 peripheral instances.
pub fn init_system() -> Peripherals {
    let mut config = Config::default();

    // Enable high-speed internal oscillator (16 MHz)
    config.rcc.hsi = Some(HSIPrescaler::DIV1);
    
    // Enable low-power internal oscillator for backup
    config.rcc.csi = true;
    
    // Enable HSI48 for USB with automatic synchronization from USB SOF packets
    config.rcc.hsi48 = Some(Hsi48Config { sync_from_usb: true });

    // Configure PLL1 for maximum system performance (480 MHz)
    // PLL1 = HSI(16MHz) / DIVM1(4) * DIVN1(60) / DIVP1(2) = 480MHz
    config.rcc.pll1 = Some(Pll {
        source: PllSource::HSI,     // Use internal 16MHz oscillator
        prediv: PllPreDiv::DIV4,    // DIVM1=4 → 4MHz PLL input
        mul: PllMul::MUL60,         // DIVN1=60 → 240MHz VCO
        divp: Some(PllDiv::DIV2),   // DIVP1=2 → 480MHz output
        divq: None,                 // Q output not used
        divr: None,                 // R output not used
    });
    
    // System clock configuration
    config.rcc.sys = Sysclk::PLL1_P;                        // 480 MHz system clock
    config.rcc.ahb_pre = AHBPrescaler::DIV2;                // 240 MHz AHB clock
    config.rcc.apb1_pre = APBPrescaler::DIV2;               // 120 MHz APB1 clock
    config.rcc.apb2_pre = APBPrescaler::DIV2;               // 120 MHz APB2 clock
    config.rcc.apb3_pre = APBPrescaler::DIV2;               // 120 MHz APB3 clock
    config.rcc.apb4_pre = APBPrescaler::DIV2;               // 120 MHz APB4 clock
    
    // Maximum voltage scaling for 480MHz operation
    config.rcc.voltage_scale = VoltageScale::Scale0;
    
    // Use HSI48 for USB (provides accurate 48MHz for USB timing)
    config.rcc.mux.usbsel = mux::Usbsel::HSI48;

    embassy_stm32::init(config)
}

/// Action tick counter on top of the embassy time driver.
///
/// Counts [`TICK_US`] microsecond ticks from the last `start`, and reads zero while stopped.
#[derive(Default)]
pub struct UptimeTicks {
    origin: Option<Instant>,
}

impl TickSource for UptimeTicks {
    fn now(&self) -> u32 {
        match self.origin {
            // Truncation wraps the counter the same way a 32-bit timer would
            Some(origin) => (origin.elapsed().as_micros() / u64::from(TICK_US)) as u32,
            None => 0,
        }
    }

    fn start(&mut self) {
        self.origin = Some(Instant::now());
    }

    fn stop(&mut self) {
        self.origin = None;
    }
}

/// Microcontroller reset.
pub struct Mcu;

impl SystemControl for Mcu {
    fn reset(&mut self) {
        cortex_m::peripheral::SCB::sys_reset();
    }
}
