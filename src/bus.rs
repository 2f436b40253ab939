//! Word and byte register transactions
//!
//! The innermost layer: one transaction per call, no retries and no locking.
//! Words travel low byte first.

use embedded_hal::i2c::I2c;

/// Raw register access to one device on the bus
pub struct Bus<I> {
    i2c: I,
    addr: u8,
}

impl<I> Bus<I>
where
    I: I2c,
{
    /// Talk to the device at 7-bit address `addr`
    pub fn new(i2c: I, addr: u8) -> Self {
        Self { i2c, addr }
    }

    /// 7-bit device address
    pub fn address(&self) -> u8 {
        self.addr
    }

    /// Read a 16-bit register (address write, repeated start, 2-byte read)
    pub fn read_word(&mut self, reg: u8) -> Result<u16, I::Error> {
        let mut buf = [0u8; 2];
        self.i2c.write_read(self.addr, &[reg], &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Write a 16-bit register
    pub fn write_word(&mut self, reg: u8, value: u16) -> Result<(), I::Error> {
        let [lo, hi] = value.to_le_bytes();
        self.i2c.write(self.addr, &[reg, lo, hi])
    }

    /// Read a single register byte
    pub fn read_byte(&mut self, reg: u8) -> Result<u8, I::Error> {
        let mut buf = [0u8];
        self.i2c.write_read(self.addr, &[reg], &mut buf)?;
        Ok(buf[0])
    }

    /// Write a single register byte
    pub fn write_byte(&mut self, reg: u8, value: u8) -> Result<(), I::Error> {
        self.i2c.write(self.addr, &[reg, value])
    }

    /// Consume the bus and hand back the I2C peripheral
    pub fn release(self) -> I {
        self.i2c
    }
}
