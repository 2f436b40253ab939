//! Data-flash block access
//!
//! Data flash is reached through a 32-byte window: the class and block
//! selectors pick a block, the bytes of that block are then read or written
//! one register at a time, and a write is committed by storing
//! `0xFF - (sum of the 32 block bytes)` in the checksum register.
//!
//! A failure anywhere in a sequence leaves the selectors in an unknown state.
//! Sequences are never retried as a whole; the next call selects again.

use embedded_hal::{delay::DelayNs, i2c::I2c};
use log::{debug, warn};

use crate::{
    config_mode::ConfigMode, error::Error, registers::DATA_FLASH_BLOCK_SIZE, session::Session,
};

/// Location of a field in data flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFlashAddress {
    /// Data-flash class (subclass id)
    pub class: u8,
    /// Byte offset inside the class
    pub offset: u8,
}

impl DataFlashAddress {
    /// Field at `offset` bytes into data-flash class `class`
    pub const fn new(class: u8, offset: u8) -> Self {
        Self { class, offset }
    }

    /// Block index written to the block selector
    pub const fn block(&self) -> u8 {
        self.offset / DATA_FLASH_BLOCK_SIZE as u8
    }

    /// Position of the first byte inside the selected block
    pub const fn position(&self) -> u8 {
        self.offset % DATA_FLASH_BLOCK_SIZE as u8
    }
}

/// Class in the high byte, offset in the low byte
impl From<u16> for DataFlashAddress {
    fn from(address: u16) -> Self {
        let [offset, class] = address.to_le_bytes();
        Self { class, offset }
    }
}

/// Block checksum as stored by the gauge
pub fn checksum(block: &[u8]) -> u8 {
    let sum = block.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0xFF - sum
}

impl<I, D> Session<I, D>
where
    I: I2c,
    D: DelayNs,
{
    /// Read `buf.len()` bytes starting at `address`
    pub fn read_block(
        &mut self,
        address: DataFlashAddress,
        buf: &mut [u8],
    ) -> Result<(), Error<I::Error>> {
        self.check_block_access(address, buf.len())?;
        self.select_block(address)?;

        let base = self.map.block_data + address.position();
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_byte(base + i as u8)?;
        }
        debug!(
            "read {} bytes from data flash class {} offset {}",
            buf.len(),
            address.class,
            address.offset
        );
        Ok(())
    }

    /// Write `data` starting at `address` and commit the block checksum
    pub fn write_block(
        &mut self,
        address: DataFlashAddress,
        data: &[u8],
    ) -> Result<(), Error<I::Error>> {
        self.check_block_access(address, data.len())?;
        self.select_block(address)?;

        let base = self.map.block_data + address.position();
        for (i, byte) in data.iter().enumerate() {
            self.write_byte(base + i as u8, *byte)?;
        }

        let mut block = [0u8; DATA_FLASH_BLOCK_SIZE];
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = self.read_byte(self.map.block_data + i as u8)?;
        }
        let sum = checksum(&block);
        self.write_byte(self.map.block_data_checksum, sum)?;

        debug!(
            "wrote {} bytes to data flash class {} offset {}, checksum {:#04x}",
            data.len(),
            address.class,
            address.offset,
            sum
        );
        Ok(())
    }

    fn check_block_access(
        &self,
        address: DataFlashAddress,
        len: usize,
    ) -> Result<(), Error<I::Error>> {
        if self.mode != ConfigMode::Config {
            warn!("data flash access outside config mode");
            return Err(Error::Configuration);
        }
        if address.position() as usize + len > DATA_FLASH_BLOCK_SIZE {
            warn!(
                "data flash access of {} bytes at offset {} crosses a block",
                len, address.offset
            );
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }

    fn select_block(&mut self, address: DataFlashAddress) -> Result<(), Error<I::Error>> {
        self.write_byte(self.map.block_data_control, 0x00)?;
        self.write_byte(self.map.data_flash_class, address.class)?;
        self.write_byte(self.map.data_flash_block, address.block())
    }
}
