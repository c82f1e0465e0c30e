//! CDC ACM (virtual serial port) carrying the host frame link.
//!
//! The class is split into independent send and receive halves so that host frames can be read
//! while device output is being flushed.

use defmt::info;
use embassy_stm32::{peripherals::USB_OTG_HS, usb::Driver};
pub use embassy_usb::class::cdc_acm::State;
use embassy_usb::{
    class::cdc_acm::{CdcAcmClass, Receiver, Sender},
    driver::EndpointError,
    Builder,
};
use static_cell::StaticCell;

use super::usb_system::MAX_PACKET_SIZE;

pub static ACM_STATE: StaticCell<State<'static>> = StaticCell::new();

/// Peripheral collection for ACM interface
pub struct AcmClaims<'d> {
    pub acm_state: &'d mut State<'d>,
}

/// Macro to claim peripherals for AcmConnection
#[macro_export]
macro_rules! claim_acm {
    ($peripherals:expr) => {{
        $crate::peripherals::acm::AcmClaims {
            acm_state: $crate::peripherals::acm::ACM_STATE.init(embassy_usb::class::cdc_acm::State::new()),
        }
    }};
}

/// Error indicating USB connection was disconnected.
#[derive(Debug, Clone, Copy, defmt::Format)]
pub struct Disconnected;

impl From<EndpointError> for Disconnected {
    fn from(error: EndpointError) -> Self {
        match error {
            EndpointError::BufferOverflow => panic!("USB buffer overflow"),
            EndpointError::Disabled => Disconnected,
        }
    }
}

type UsbDriver<'d> = Driver<'d, USB_OTG_HS>;

/// CDC ACM connection to the host.
pub struct AcmConnection<'d> {
    class: CdcAcmClass<'d, UsbDriver<'d>>,
}

impl<'d> AcmConnection<'d> {
    /// Register the CDC ACM interface on the device being built.
    ///
    /// # Arguments
    ///
    /// * `builder` - USB device builder
    /// * `claims` - AcmClaims struct containing ACM state
    pub fn new(builder: &mut Builder<'d, UsbDriver<'d>>, claims: AcmClaims<'d>) -> Self {
        info!("CDC ACM connection initialized");
        Self {
            class: CdcAcmClass::new(builder, claims.acm_state, MAX_PACKET_SIZE),
        }
    }

    /// Split into halves that can be awaited concurrently.
    pub fn split(self) -> (AcmSender<'d>, AcmReceiver<'d>) {
        let (sender, receiver) = self.class.split();
        (AcmSender { sender }, AcmReceiver { receiver })
    }
}

/// Device to host half.
pub struct AcmSender<'d> {
    sender: Sender<'d, UsbDriver<'d>>,
}

impl AcmSender<'_> {
    /// Send one USB packet of at most [`MAX_PACKET_SIZE`] bytes.
    ///
    /// # Returns
    ///
    /// * `Ok(())` if sent successfully
    /// * `Err(Disconnected)` if host disconnected
    pub async fn send_packet(&mut self, data: &[u8]) -> Result<(), Disconnected> {
        self.sender.write_packet(data).await.map_err(Into::into)
    }
}

/// Host to device half.
pub struct AcmReceiver<'d> {
    receiver: Receiver<'d, UsbDriver<'d>>,
}

impl AcmReceiver<'_> {
    /// Wait for USB host to connect and open the CDC ACM interface.
    pub async fn wait_connection(&mut self) {
        self.receiver.wait_connection().await;
        info!("CDC ACM connection established");
    }

    /// Receive one USB packet from the host.
    ///
    /// # Returns
    ///
    /// * `Ok(bytes_received)` - Number of bytes received (0 to MAX_PACKET_SIZE)
    /// * `Err(Disconnected)` - If host disconnected
    pub async fn receive_packet(&mut self, buffer: &mut [u8]) -> Result<usize, Disconnected> {
        self.receiver.read_packet(buffer).await.map_err(Into::into)
    }
}
