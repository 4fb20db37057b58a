//! # Simulated GPIO register block
//!
//! An in-memory stand-in for the peripheral page, used to exercise pins and
//! edge watchers without hardware. It follows the register conventions of the
//! real block:
//!
//! - `GPSETn`/`GPCLRn` are write-1-to-set/clear and only move the level of
//!   ports configured as outputs
//! - `GPEDSn` is write-1-to-clear
//! - a level change latches the event status bit when the matching rising or
//!   falling enable bit is set
//! - every other register stores what is written
//!
//! External stimulus is applied with [`SimulatedPeripheral::drive`].
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::board::{regs, Soc, BLOCK_SIZE, PORT_COUNT};
use crate::gpio::reg::Function;
use crate::gpio::Level;

const WORDS: usize = BLOCK_SIZE / 4;

#[derive(Debug)]
pub struct SimulatedPeripheral {
    words: Box<[AtomicU32]>,
    // Level updates touch LEV and EDS together
    update: Mutex<()>,
    soc: Soc,
}

impl Default for SimulatedPeripheral {
    fn default() -> Self {
        Self::new(Soc::Bcm2835)
    }
}

impl SimulatedPeripheral {
    /// All registers start at zero: every port is an input, low, without edge detection
    pub fn new(soc: Soc) -> Self {
        SimulatedPeripheral {
            words: (0..WORDS).map(|_| AtomicU32::new(0)).collect(),
            update: Mutex::new(()),
            soc,
        }
    }

    #[inline]
    pub fn soc(&self) -> Soc {
        self.soc
    }

    /// Raw register value at a byte offset
    #[inline]
    pub fn word(&self, offset: usize) -> u32 {
        self.words[offset / 4].load(Ordering::SeqCst)
    }

    /// Current level of `port`
    pub fn level(&self, port: u8) -> Level {
        let (offset, mask) = bit(regs::GPLEV0, port);
        (self.word(offset) & mask != 0).into()
    }

    /// Whether the event status bit of `port` is latched
    pub fn event_pending(&self, port: u8) -> bool {
        let (offset, mask) = bit(regs::GPEDS0, port);
        self.word(offset) & mask != 0
    }

    /// Drive `port` from outside the SoC. Ports configured as outputs keep their own level.
    pub fn drive(&self, port: u8, level: Level) {
        assert!(port < PORT_COUNT, "GPIO{port} does not exist");
        let _guard = self.update.lock().unwrap_or_else(PoisonError::into_inner);
        let bank = usize::from(port / 32);
        let mask = (1 << (port % 32)) & !self.output_mask(bank);
        let lev = self.word(regs::GPLEV0 + bank * 4);
        let new = match level {
            Level::High => lev | mask,
            Level::Low => lev & !mask,
        };
        self.apply_level(bank, new);
    }

    pub(crate) fn load(&self, offset: usize) -> u32 {
        self.word(offset)
    }

    pub(crate) fn store(&self, offset: usize, value: u32) {
        let _guard = self.update.lock().unwrap_or_else(PoisonError::into_inner);
        match offset {
            regs::GPSET0 | regs::GPSET1 => {
                let bank = (offset - regs::GPSET0) / 4;
                let lev = self.word(regs::GPLEV0 + bank * 4);
                self.apply_level(bank, lev | (value & self.output_mask(bank)));
            }
            regs::GPCLR0 | regs::GPCLR1 => {
                let bank = (offset - regs::GPCLR0) / 4;
                let lev = self.word(regs::GPLEV0 + bank * 4);
                self.apply_level(bank, lev & !(value & self.output_mask(bank)));
            }
            regs::GPEDS0 | regs::GPEDS1 => {
                self.words[offset / 4].fetch_and(!value, Ordering::SeqCst);
            }
            _ => self.words[offset / 4].store(value, Ordering::SeqCst),
        }
    }

    fn apply_level(&self, bank: usize, new: u32) {
        let old = self.words[(regs::GPLEV0 / 4) + bank].swap(new, Ordering::SeqCst);
        let rising = !old & new & self.word(regs::GPREN0 + bank * 4);
        let falling = old & !new & self.word(regs::GPFEN0 + bank * 4);
        if rising | falling != 0 {
            self.words[(regs::GPEDS0 / 4) + bank].fetch_or(rising | falling, Ordering::SeqCst);
        }
    }

    /// Bits of a 32-bit bank whose ports are configured as outputs
    fn output_mask(&self, bank: usize) -> u32 {
        (0..32u8)
            .map(|bit| (bank as u8) * 32 + bit)
            .filter(|&port| port < PORT_COUNT)
            .filter(|&port| {
                let fsel = self.word(regs::GPFSEL0 + usize::from(port / 10) * 4);
                (fsel >> ((port % 10) * 3)) & 0b111 == Function::Output as u32
            })
            .fold(0, |mask, port| mask | 1 << (port % 32))
    }
}

fn bit(bank_base: usize, port: u8) -> (usize, u32) {
    (bank_base + usize::from(port / 32) * 4, 1 << (port % 32))
}
