//! Test doubles shared by the unit tests

use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation, SevenBitAddress};

/// One observed bus write: register followed by payload
pub type Write = (u8, Vec<u8>);

/// In-memory gauge with a flat 256-byte register file.
///
/// Writes store their payload from the addressed register upwards, reads
/// return bytes from the addressed register upwards. Every write is logged.
#[derive(Clone)]
pub struct FakeGauge {
    state: Rc<RefCell<FakeState>>,
}

struct FakeState {
    regs: [u8; 256],
    pointer: u8,
    writes: Vec<Write>,
    reads: usize,
}

impl FakeGauge {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(FakeState {
                regs: [0; 256],
                pointer: 0,
                writes: Vec::new(),
                reads: 0,
            })),
        }
    }

    pub fn set_word(&self, reg: u8, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        let mut state = self.state.borrow_mut();
        state.regs[reg as usize] = lo;
        state.regs[reg.wrapping_add(1) as usize] = hi;
    }

    pub fn set_bytes(&self, reg: u8, bytes: &[u8]) {
        let mut state = self.state.borrow_mut();
        for (i, b) in bytes.iter().enumerate() {
            state.regs[reg as usize + i] = *b;
        }
    }

    pub fn word(&self, reg: u8) -> u16 {
        let state = self.state.borrow();
        u16::from_le_bytes([
            state.regs[reg as usize],
            state.regs[reg.wrapping_add(1) as usize],
        ])
    }

    pub fn byte(&self, reg: u8) -> u8 {
        self.state.borrow().regs[reg as usize]
    }

    pub fn writes(&self) -> Vec<Write> {
        self.state.borrow().writes.clone()
    }

    /// Registers written to, in order
    pub fn written_registers(&self) -> Vec<u8> {
        self.writes().into_iter().map(|(reg, _)| reg).collect()
    }

    pub fn transactions(&self) -> usize {
        let state = self.state.borrow();
        state.writes.len() + state.reads
    }
}

impl ErrorType for FakeGauge {
    type Error = ErrorKind;
}

impl I2c<SevenBitAddress> for FakeGauge {
    fn transaction(
        &mut self,
        _address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        for op in operations {
            match op {
                Operation::Write(bytes) => {
                    let Some((&reg, payload)) = bytes.split_first() else {
                        continue;
                    };
                    state.pointer = reg;
                    if !payload.is_empty() {
                        state.writes.push((reg, payload.to_vec()));
                        for b in payload.iter() {
                            let at = state.pointer as usize;
                            state.regs[at] = *b;
                            state.pointer = state.pointer.wrapping_add(1);
                        }
                    }
                }
                Operation::Read(buf) => {
                    state.reads += 1;
                    for b in buf.iter_mut() {
                        *b = state.regs[state.pointer as usize];
                        state.pointer = state.pointer.wrapping_add(1);
                    }
                }
            }
        }
        Ok(())
    }
}
