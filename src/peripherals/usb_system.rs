//! USB system abstraction for STM32H753 with ULPI PHY.
//!
//! The debug tool enumerates as a single CDC ACM device; the host frame link runs over it.

use defmt::info;
use embassy_stm32::{
    bind_interrupts, peripherals as stm32_peripherals,
    peripherals::{PA3, PA5, PB0, PB1, PB10, PB11, PB12, PB13, PB5, PC0, PC2, PC3, USB_OTG_HS},
    usb::{self, Driver, InterruptHandler},
    Peri,
};
use embassy_usb::{Builder, UsbDevice};
use static_cell::ConstStaticCell;

use super::acm::{AcmClaims, AcmConnection};

/// Peripheral collection for USB system interface
pub struct UsbClaims<'d> {
    pub usb_otg_hs: Peri<'d, USB_OTG_HS>,
    pub ulpi_clk: Peri<'d, PA5>, // USB_OTG_HS_ULPI_CK
    pub ulpi_dir: Peri<'d, PC2>, // USB_OTG_HS_ULPI_DIR
    pub ulpi_nxt: Peri<'d, PC3>, // USB_OTG_HS_ULPI_NXT
    pub ulpi_stp: Peri<'d, PC0>, // USB_OTG_HS_ULPI_STP
    pub ulpi_d0: Peri<'d, PA3>,  // USB_OTG_HS_ULPI_D0
    pub ulpi_d1: Peri<'d, PB0>,  // USB_OTG_HS_ULPI_D1
    pub ulpi_d2: Peri<'d, PB1>,  // USB_OTG_HS_ULPI_D2
    pub ulpi_d3: Peri<'d, PB10>, // USB_OTG_HS_ULPI_D3
    pub ulpi_d4: Peri<'d, PB11>, // USB_OTG_HS_ULPI_D4
    pub ulpi_d5: Peri<'d, PB12>, // USB_OTG_HS_ULPI_D5
    pub ulpi_d6: Peri<'d, PB13>, // USB_OTG_HS_ULPI_D6
    pub ulpi_d7: Peri<'d, PB5>,  // USB_OTG_HS_ULPI_D7
    pub usb_buffers: &'d mut UsbBuffers,
}

/// Macro to claim peripherals for UsbSystem
#[macro_export]
macro_rules! claim_usb {
    ($peripherals:expr) => {{
        $crate::peripherals::usb_system::UsbClaims {
            usb_otg_hs: $peripherals.USB_OTG_HS,
            ulpi_clk: $peripherals.PA5, // USB_OTG_HS_ULPI_CK
            ulpi_dir: $peripherals.PC2, // USB_OTG_HS_ULPI_DIR
            ulpi_nxt: $peripherals.PC3, // USB_OTG_HS_ULPI_NXT
            ulpi_stp: $peripherals.PC0, // USB_OTG_HS_ULPI_STP
            ulpi_d0: $peripherals.PA3,  // USB_OTG_HS_ULPI_D0
            ulpi_d1: $peripherals.PB0,  // USB_OTG_HS_ULPI_D1
            ulpi_d2: $peripherals.PB1,  // USB_OTG_HS_ULPI_D2
            ulpi_d3: $peripherals.PB10, // USB_OTG_HS_ULPI_D3
            ulpi_d4: $peripherals.PB11, // USB_OTG_HS_ULPI_D4
            ulpi_d5: $peripherals.PB12, // USB_OTG_HS_ULPI_D5
            ulpi_d6: $peripherals.PB13, // USB_OTG_HS_ULPI_D6
            ulpi_d7: $peripherals.PB5,  // USB_OTG_HS_ULPI_D7
            usb_buffers: $crate::peripherals::usb_system::USB_BUFFERS.take(),
        }
    }};
}

/// Maximum USB packet size for high-speed USB (ULPI PHY).
/// This influences buffer sizing throughout the USB system.
pub const MAX_PACKET_SIZE: u16 = 512;

// Bind USB interrupts for the OTG_HS peripheral
bind_interrupts!(
    /// USB interrupt handlers
    pub struct UsbInterrupts {
        OTG_HS => InterruptHandler<stm32_peripherals::USB_OTG_HS>;
    }
);

/// USB buffers for device operation.
#[repr(C, align(32))]
pub struct UsbBuffers {
    /// Endpoint output buffer - sized for maximum packet size
    pub ep_out_buffer: [u8; MAX_PACKET_SIZE as usize * 2], // Double buffered
    /// USB configuration descriptor buffer
    pub config_descriptor: [u8; 256],
    /// USB BOS descriptor buffer
    pub bos_descriptor: [u8; 256],
    /// USB control transfer buffer
    pub control_buf: [u8; 64],
}
pub static USB_BUFFERS: ConstStaticCell<UsbBuffers> = ConstStaticCell::new(UsbBuffers::new());

impl UsbBuffers {
    /// Create a new set of USB buffers.
    pub const fn new() -> Self {
        Self {
            ep_out_buffer: [0u8; MAX_PACKET_SIZE as usize * 2],
            config_descriptor: [0u8; 256],
            bos_descriptor: [0u8; 256],
            control_buf: [0u8; 64],
        }
    }
}

impl Default for UsbBuffers {
    fn default() -> Self {
        Self::new()
    }
}

type UsbDriver<'d> = Driver<'d, stm32_peripherals::USB_OTG_HS>;

/// The enumerated USB device. The debug tool exposes exactly one CDC ACM interface.
pub struct UsbSystem<'d> {
    device: UsbDevice<'d, UsbDriver<'d>>,
}

impl<'d> UsbSystem<'d> {
    /// Bring up the ULPI PHY, register the CDC ACM class and build the device.
    ///
    /// # Arguments
    ///
    /// * `claims` - USB peripherals, ULPI pins and descriptor buffers
    /// * `acm` - State for the CDC ACM class
    ///
    /// # Returns
    ///
    /// The device, to be serviced by [`task`], and the serial connection carrying the host link.
    pub fn new(claims: UsbClaims<'d>, acm: AcmClaims<'d>) -> (Self, AcmConnection<'d>) {
        let buffers = claims.usb_buffers;

        let mut config = embassy_usb::Config::new(0xc0de, 0xdb61);
        config.manufacturer = Some("Debug Tool");
        config.product = Some("Debug Tool CDC");
        config.serial_number = Some(env!("CARGO_PKG_VERSION"));
        config.max_power = 100;

        let mut usb_config = usb::Config::default();
        usb_config.vbus_detection = true;

        let driver = Driver::new_hs_ulpi(
            claims.usb_otg_hs,
            UsbInterrupts,
            claims.ulpi_clk,
            claims.ulpi_dir,
            claims.ulpi_nxt,
            claims.ulpi_stp,
            claims.ulpi_d0,
            claims.ulpi_d1,
            claims.ulpi_d2,
            claims.ulpi_d3,
            claims.ulpi_d4,
            claims.ulpi_d5,
            claims.ulpi_d6,
            claims.ulpi_d7,
            &mut buffers.ep_out_buffer,
            usb_config,
        );

        let mut builder = Builder::new(
            driver,
            config,
            &mut buffers.config_descriptor,
            &mut buffers.bos_descriptor,
            &mut [], // No Microsoft OS descriptors
            &mut buffers.control_buf,
        );
        let connection = AcmConnection::new(&mut builder, acm);
        let device = builder.build();

        info!("USB device ready: {=u16:x}:{=u16:x}", 0xc0de, 0xdb61);
        (Self { device }, connection)
    }
}

/// Services the USB device stack.
#[embassy_executor::task]
pub async fn task(mut usb: UsbSystem<'static>) -> ! {
    usb.device.run().await
}
