//! Bridges the USB CDC ACM connection to the dispatcher's byte transport.
//!
//! The dispatcher runs a synchronous main loop, so it never awaits USB itself. Received packets
//! are queued in one ring for it to read, and everything it writes is queued in another ring that
//! this task flushes to the host. Output written while no host is connected stays queued, and is
//! dropped at the dispatcher once the ring fills.

use debug_tool::cspi::{Consumer, Producer, SpscRing};
use debug_tool::platform::ByteTransport;
use defmt::{info, warn};
use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::Timer;

use crate::peripherals::usb_system::MAX_PACKET_SIZE;
use crate::peripherals::{AcmConnection, AcmReceiver, AcmSender, Disconnected};

/// Bytes buffered in each direction.
pub const HOST_RING_SIZE: usize = 2048;

/// Largest chunk sent per packet. Staying below a full packet means no zero-length packet is
/// needed to end a transfer.
const TX_CHUNK: usize = MAX_PACKET_SIZE as usize - 1;

/// Delay between reconnection attempts when the connection is lost
const RECONNECT_DELAY_MS: u64 = 100;

static FROM_HOST: SpscRing<HOST_RING_SIZE> = SpscRing::new();
static TO_HOST: SpscRing<HOST_RING_SIZE> = SpscRing::new();
static TX_PENDING: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// The dispatcher's end of the host link.
pub struct UsbSerial {
    rx: Consumer<'static, HOST_RING_SIZE>,
    tx: Producer<'static, HOST_RING_SIZE>,
}

impl ByteTransport for UsbSerial {
    fn try_read_byte(&mut self) -> Option<u8> {
        self.rx.pop()
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let written = self.tx.push(bytes);
        if written > 0 {
            TX_PENDING.signal(());
        }
        written
    }
}

/// USB side of the host link.
pub struct HostLink<'d> {
    sender: AcmSender<'d>,
    receiver: AcmReceiver<'d>,
    rx: Producer<'static, HOST_RING_SIZE>,
    tx: Consumer<'static, HOST_RING_SIZE>,
}

impl<'d> HostLink<'d> {
    /// Split the connection and claim both rings.
    ///
    /// # Returns
    ///
    /// The USB side and the dispatcher side, or `None` if the rings were already claimed.
    pub fn new(acm: AcmConnection<'d>) -> Option<(Self, UsbSerial)> {
        let (rx, serial_rx) = FROM_HOST.try_split()?;
        let (serial_tx, tx) = TO_HOST.try_split()?;
        let (sender, receiver) = acm.split();
        Some((
            Self { sender, receiver, rx, tx },
            UsbSerial {
                rx: serial_rx,
                tx: serial_tx,
            },
        ))
    }

    /// Run the link forever, waiting for the host again whenever it goes away.
    pub async fn run(&mut self) -> ! {
        info!("Host link started");

        loop {
            self.receiver.wait_connection().await;
            info!("Host link: host connected");
            // Anything queued for the host flushes on connect
            TX_PENDING.signal(());

            let result = match select(
                receive(&mut self.receiver, &mut self.rx),
                transmit(&mut self.sender, &mut self.tx),
            )
            .await
            {
                Either::First(result) | Either::Second(result) => result,
            };

            if let Err(Disconnected) = result {
                warn!("Host link: connection lost, will reconnect...");
                Timer::after_millis(RECONNECT_DELAY_MS).await;
            }
        }
    }
}

/// Queue host packets for the dispatcher until the host disconnects.
async fn receive(
    receiver: &mut AcmReceiver<'_>,
    rx: &mut Producer<'static, HOST_RING_SIZE>,
) -> Result<(), Disconnected> {
    let mut buffer = [0u8; MAX_PACKET_SIZE as usize];
    loop {
        let n = receiver.receive_packet(&mut buffer).await?;
        let accepted = rx.push(&buffer[..n]);
        if accepted < n {
            warn!("Host link: RX ring full, dropped {} bytes", n - accepted);
        }
    }
}

/// Flush queued output whenever the dispatcher writes.
async fn transmit(
    sender: &mut AcmSender<'_>,
    tx: &mut Consumer<'static, HOST_RING_SIZE>,
) -> Result<(), Disconnected> {
    let mut chunk = [0u8; TX_CHUNK];
    loop {
        TX_PENDING.wait().await;
        loop {
            let n = tx.pop_into(&mut chunk);
            if n == 0 {
                break;
            }
            sender.send_packet(&chunk[..n]).await?;
        }
    }
}

/// Moves bytes between USB and the rings.
#[embassy_executor::task]
pub async fn task(mut link: HostLink<'static>) -> ! {
    link.run().await
}
