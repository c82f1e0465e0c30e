pub mod acm;
pub mod spi;
pub mod system;
pub mod usb_system;

pub use acm::{AcmConnection, AcmReceiver, AcmSender, Disconnected};
pub use spi::SpiSlavePort;
pub use system::{init_system, Mcu, UptimeTicks};
pub use usb_system::UsbSystem;
