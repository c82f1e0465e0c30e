//! The last 128 KiB sector of bank 2, reserved in `memory.x` for the stored frame.

use debug_tool::platform::{FlashError, FlashStore};
use defmt::{warn, Debug2Format};
use embassy_stm32::{
    flash::{Blocking, Flash},
    peripherals::FLASH,
    Peri,
};

/// Offset of the user sector from the start of flash.
pub const USER_OFFSET: u32 = 0x1E_0000;
/// One H7 sector.
pub const USER_SIZE: u32 = 128 * 1024;
/// Programming unit of the H7 flash, one 256-bit word.
const WRITE_SIZE: usize = 32;

/// Peripheral collection for the user flash
pub struct FlashClaims<'d> {
    pub flash: Peri<'d, FLASH>,
}

/// Macro to claim peripherals for UserFlash
#[macro_export]
macro_rules! claim_flash {
    ($peripherals:expr) => {{
        $crate::drivers::flash::FlashClaims {
            flash: $peripherals.FLASH,
        }
    }};
}

/// [`FlashStore`] over the user sector. Offsets are relative to the sector.
pub struct UserFlash<'d> {
    flash: Flash<'d, Blocking>,
}

impl<'d> UserFlash<'d> {
    pub fn new(claims: FlashClaims<'d>) -> Self {
        Self {
            flash: Flash::new_blocking(claims.flash),
        }
    }

    fn check(offset: u32, len: usize) -> Result<u32, FlashError> {
        let end = offset.checked_add(len as u32).ok_or(FlashError::OutOfRange)?;
        if end > USER_SIZE {
            return Err(FlashError::OutOfRange);
        }
        Ok(USER_OFFSET + offset)
    }
}

impl FlashStore for UserFlash<'_> {
    fn erase(&mut self) -> Result<(), FlashError> {
        self.flash.blocking_erase(USER_OFFSET, USER_OFFSET + USER_SIZE).map_err(|e| {
            warn!("Flash erase failed: {}", Debug2Format(&e));
            FlashError::Erase
        })
    }

    /// Data is padded with 0xFF up to whole flash words; `offset` must be word aligned.
    fn program(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if offset as usize % WRITE_SIZE != 0 {
            return Err(FlashError::OutOfRange);
        }
        let padded = data.len().div_ceil(WRITE_SIZE) * WRITE_SIZE;
        let mut address = Self::check(offset, padded)?;

        for chunk in data.chunks(WRITE_SIZE) {
            let mut word = [0xFFu8; WRITE_SIZE];
            word[..chunk.len()].copy_from_slice(chunk);
            self.flash.blocking_write(address, &word).map_err(|e| {
                warn!("Flash program failed at {=u32:#x}: {}", address, Debug2Format(&e));
                FlashError::Program
            })?;
            address += WRITE_SIZE as u32;
        }
        Ok(())
    }

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let address = Self::check(offset, buf.len())?;
        self.flash.blocking_read(address, buf).map_err(|e| {
            warn!("Flash read failed: {}", Debug2Format(&e));
            FlashError::Read
        })
    }
}
