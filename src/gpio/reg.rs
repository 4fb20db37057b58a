use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use super::mem::MemoryWindow;
use crate::board::{regs, Soc, PORT_COUNT};
use crate::error::{Error, Result};

//==================================================================================================
//  Register banks
//==================================================================================================

/// Value-level `enum` for the register banks touched by pins and edge watchers
///
/// Every bank but [`FunctionSelect`](Self::FunctionSelect) holds one bit per
/// port: the bit of port `p` lives in word `p / 32` at bit `p % 32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterBank {
    FunctionSelect,
    SetOutput,
    ClearOutput,
    Level,
    EventStatus,
    RisingEdgeEnable,
    FallingEdgeEnable,
}

impl RegisterBank {
    /// Byte offset of the first word of the bank
    pub const fn base(self) -> usize {
        match self {
            RegisterBank::FunctionSelect => regs::GPFSEL0,
            RegisterBank::SetOutput => regs::GPSET0,
            RegisterBank::ClearOutput => regs::GPCLR0,
            RegisterBank::Level => regs::GPLEV0,
            RegisterBank::EventStatus => regs::GPEDS0,
            RegisterBank::RisingEdgeEnable => regs::GPREN0,
            RegisterBank::FallingEdgeEnable => regs::GPFEN0,
        }
    }

    /// Write-1 banks act on the bits written as 1 and ignore the zeros, so they never need a
    /// read-modify-write
    pub const fn is_write_one(self) -> bool {
        matches!(
            self,
            RegisterBank::SetOutput | RegisterBank::ClearOutput | RegisterBank::EventStatus
        )
    }

    /// Index of the lock guarding read-modify-write on this bank
    const fn lock_index(self) -> usize {
        match self {
            RegisterBank::RisingEdgeEnable => 1,
            RegisterBank::FallingEdgeEnable => 2,
            _ => 0,
        }
    }
}

const FSEL_LOCK: usize = 0;
const PULL_LOCK: usize = 3;
const LOCKS: usize = 4;

//==================================================================================================
//  Function select
//==================================================================================================

/// 3-bit function select encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Input = 0b000,
    Output = 0b001,
    Alt0 = 0b100,
    Alt1 = 0b101,
    Alt2 = 0b110,
    Alt3 = 0b111,
    Alt4 = 0b011,
    Alt5 = 0b010,
}

pub const FSEL_MASK: u32 = 0b111;
const FSEL_WIDTH: u32 = 3;
const FSEL_PER_WORD: u8 = 10;

impl Function {
    pub const fn from_bits(bits: u32) -> Function {
        match bits & FSEL_MASK {
            0b000 => Function::Input,
            0b001 => Function::Output,
            0b100 => Function::Alt0,
            0b101 => Function::Alt1,
            0b110 => Function::Alt2,
            0b111 => Function::Alt3,
            0b011 => Function::Alt4,
            _ => Function::Alt5,
        }
    }
}

//==================================================================================================
//  Pull resistors
//==================================================================================================

/// Internal pull resistor configuration of an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Off,
    Down,
    Up,
}

impl Pull {
    /// `GPPUD` encoding used by BCM2835 to BCM2837
    const fn legacy_bits(self) -> u32 {
        match self {
            Pull::Off => 0b00,
            Pull::Down => 0b01,
            Pull::Up => 0b10,
        }
    }

    /// `GPIO_PUP_PDN_CNTRL_REGn` encoding used by BCM2711. Note the swapped up/down codes.
    const fn bcm2711_bits(self) -> u32 {
        match self {
            Pull::Off => 0b00,
            Pull::Up => 0b01,
            Pull::Down => 0b10,
        }
    }
}

const PULL_WIDTH: u32 = 2;
const PULL_PER_WORD: u8 = 16;
// Datasheet asks for 150 cycles of setup and hold around the pull clock
const PULL_SETTLE: Duration = Duration::from_micros(5);

//==================================================================================================
//  Locating bits
//==================================================================================================

fn check_port(port: u8) -> Result<()> {
    if port >= PORT_COUNT {
        return Err(Error::OutOfRange(format!(
            "GPIO{port} does not exist, the SoC has {PORT_COUNT} ports"
        )));
    }
    Ok(())
}

/// Byte offset of the word holding `port` in `bank` and the position of its lowest bit
///
/// For one-bit banks this is `(base + (port / 32) * 4, port % 32)`. For
/// [`RegisterBank::FunctionSelect`] it is the position of the 3-bit field, see [`fsel_locate`].
pub fn locate(port: u8, bank: RegisterBank) -> Result<(usize, u32)> {
    if bank == RegisterBank::FunctionSelect {
        return fsel_locate(port);
    }
    check_port(port)?;
    Ok((bank.base() + usize::from(port / 32) * 4, u32::from(port % 32)))
}

/// Word offset and shift of the 3-bit function select field of `port`. Ten fields per word.
pub fn fsel_locate(port: u8) -> Result<(usize, u32)> {
    check_port(port)?;
    Ok((
        regs::GPFSEL0 + usize::from(port / FSEL_PER_WORD) * 4,
        u32::from(port % FSEL_PER_WORD) * FSEL_WIDTH,
    ))
}

/// Word offset and shift of the BCM2711 2-bit pull field of `port`. Sixteen fields per word.
pub fn pull_locate(port: u8) -> Result<(usize, u32)> {
    check_port(port)?;
    Ok((
        regs::GPIO_PUP_PDN_CNTRL_REG0 + usize::from(port / PULL_PER_WORD) * 4,
        u32::from(port % PULL_PER_WORD) * PULL_WIDTH,
    ))
}

/// Replace the `width` bit field at `shift` in `word` by `value`, keeping every other bit
#[inline]
pub const fn with_field(word: u32, shift: u32, width: u32, value: u32) -> u32 {
    let mask = ((1 << width) - 1) << shift;
    (word & !mask) | ((value << shift) & mask)
}

//==================================================================================================
// Register Interface
//==================================================================================================

/// Bit-level register access on top of a [`MemoryWindow`]
///
/// Read-modify-write sequences on function select, edge enable and pull
/// registers run under one lock per bank, so pins sharing a word never lose
/// each other's bits. The lock is only about this process: another process
/// writing the same registers concurrently is not detected and is unsafe.
/// Write-1 banks are written directly without reading.
#[derive(Debug)]
pub(crate) struct Registers {
    window: MemoryWindow,
    locks: [Mutex<()>; LOCKS],
}

impl Registers {
    pub(crate) fn new(window: MemoryWindow) -> Self {
        Registers {
            window,
            locks: Default::default(),
        }
    }

    #[inline]
    pub(crate) fn window(&self) -> &MemoryWindow {
        &self.window
    }

    fn lock(&self, index: usize) -> MutexGuard<'_, ()> {
        self.locks[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the bit of `port` in `bank`. On write-1 banks this triggers the bank's action.
    pub(crate) fn set_bit(&self, port: u8, bank: RegisterBank) -> Result<()> {
        let (offset, bit) = locate(port, bank)?;
        let mask = 1 << bit;
        if bank.is_write_one() {
            return self.window.write32(offset, mask);
        }
        let _guard = self.lock(bank.lock_index());
        let word = self.window.read32(offset)?;
        self.window.write32(offset, word | mask)
    }

    /// Clear the bit of `port` in `bank`. Writing 0 to a write-1 bank has no effect, so this is
    /// a no-op there.
    pub(crate) fn clear_bit(&self, port: u8, bank: RegisterBank) -> Result<()> {
        let (offset, bit) = locate(port, bank)?;
        if bank.is_write_one() {
            return Ok(());
        }
        let _guard = self.lock(bank.lock_index());
        let word = self.window.read32(offset)?;
        self.window.write32(offset, word & !(1 << bit))
    }

    pub(crate) fn read_bit(&self, port: u8, bank: RegisterBank) -> Result<bool> {
        let (offset, bit) = locate(port, bank)?;
        Ok((self.window.read32(offset)? >> bit) & 0x01 == 1)
    }

    /// Program the 3-bit function select field of `port`, leaving the other nine fields alone
    pub(crate) fn set_function(&self, port: u8, function: Function) -> Result<()> {
        let (offset, shift) = fsel_locate(port)?;
        let _guard = self.lock(FSEL_LOCK);
        let word = self.window.read32(offset)?;
        self.window
            .write32(offset, with_field(word, shift, FSEL_WIDTH, function as u32))
    }

    pub(crate) fn function(&self, port: u8) -> Result<Function> {
        let (offset, shift) = fsel_locate(port)?;
        Ok(Function::from_bits(self.window.read32(offset)? >> shift))
    }

    pub(crate) fn set_pull(&self, port: u8, pull: Pull) -> Result<()> {
        check_port(port)?;
        let soc = self.window.soc().unwrap_or(Soc::Bcm2835);
        let _guard = self.lock(PULL_LOCK);
        if soc.has_direct_pull_registers() {
            let (offset, shift) = pull_locate(port)?;
            let word = self.window.read32(offset)?;
            return self.window.write32(
                offset,
                with_field(word, shift, PULL_WIDTH, pull.bcm2711_bits()),
            );
        }
        // Clocked sequence: select the pull, clock it into the port, then release both
        let clk = regs::GPPUDCLK0 + usize::from(port / 32) * 4;
        self.window.write32(regs::GPPUD, pull.legacy_bits())?;
        thread::sleep(PULL_SETTLE);
        self.window.write32(clk, 1 << (port % 32))?;
        thread::sleep(PULL_SETTLE);
        self.window.write32(regs::GPPUD, 0)?;
        self.window.write32(clk, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::sim::SimulatedPeripheral;
    use std::sync::Arc;

    fn registers(soc: Soc) -> (Registers, Arc<SimulatedPeripheral>) {
        let sim = Arc::new(SimulatedPeripheral::new(soc));
        let window = MemoryWindow::simulated(sim.clone());
        window.ensure_mapped().unwrap();
        (Registers::new(window), sim)
    }

    #[test]
    fn locate_word_boundaries() {
        use RegisterBank::*;
        assert_eq!(locate(0, Level).unwrap(), (regs::GPLEV0, 0));
        assert_eq!(locate(31, Level).unwrap(), (regs::GPLEV0, 31));
        assert_eq!(locate(32, Level).unwrap(), (regs::GPLEV1, 0));
        assert_eq!(locate(53, Level).unwrap(), (regs::GPLEV1, 21));
        assert_eq!(locate(31, RisingEdgeEnable).unwrap(), (regs::GPREN0, 31));
        assert_eq!(locate(32, FallingEdgeEnable).unwrap(), (regs::GPFEN1, 0));
        assert_eq!(locate(32, SetOutput).unwrap(), (regs::GPSET1, 0));
        assert_eq!(locate(32, ClearOutput).unwrap(), (regs::GPCLR1, 0));
        assert_eq!(locate(32, EventStatus).unwrap(), (regs::GPEDS1, 0));
        assert!(matches!(locate(54, Level), Err(Error::OutOfRange(_))));
    }

    #[test]
    fn fsel_field_boundaries() {
        assert_eq!(fsel_locate(0).unwrap(), (regs::GPFSEL0, 0));
        assert_eq!(fsel_locate(9).unwrap(), (regs::GPFSEL0, 27));
        assert_eq!(fsel_locate(10).unwrap(), (regs::GPFSEL0 + 4, 0));
        assert_eq!(fsel_locate(22).unwrap(), (regs::GPFSEL0 + 8, 6));
        assert_eq!(fsel_locate(53).unwrap(), (regs::GPFSEL5, 9));
        assert_eq!(
            locate(22, RegisterBank::FunctionSelect).unwrap(),
            fsel_locate(22).unwrap()
        );
        assert!(fsel_locate(54).is_err());
    }

    #[test]
    fn pull_field_boundaries() {
        assert_eq!(pull_locate(15).unwrap(), (regs::GPIO_PUP_PDN_CNTRL_REG0, 30));
        assert_eq!(pull_locate(16).unwrap(), (regs::GPIO_PUP_PDN_CNTRL_REG0 + 4, 0));
        assert_eq!(pull_locate(53).unwrap(), (regs::GPIO_PUP_PDN_CNTRL_REG3, 10));
    }

    #[test]
    fn with_field_masks_exactly() {
        assert_eq!(with_field(u32::MAX, 27, 3, 0), !(0b111 << 27));
        assert_eq!(with_field(0, 27, 3, 0b1111), 0b111 << 27);
        assert_eq!(with_field(0xffff_ffff, 0, 2, 0b01), 0xffff_fffd);
    }

    #[test]
    fn function_encodings_round_trip() {
        use Function::*;
        for f in [Input, Output, Alt0, Alt1, Alt2, Alt3, Alt4, Alt5] {
            assert_eq!(Function::from_bits(f as u32), f);
        }
    }

    #[test]
    fn bit_isolation_across_a_word() {
        let (codec, _sim) = registers(Soc::Bcm2835);
        for bank in [RegisterBank::RisingEdgeEnable, RegisterBank::FallingEdgeEnable] {
            for (p1, p2) in [(0, 1), (30, 31), (31, 32), (32, 33), (52, 53), (5, 22)] {
                codec.set_bit(p2, bank).unwrap();
                codec.set_bit(p1, bank).unwrap();
                assert!(codec.read_bit(p2, bank).unwrap());
                codec.clear_bit(p1, bank).unwrap();
                assert!(!codec.read_bit(p1, bank).unwrap());
                assert!(codec.read_bit(p2, bank).unwrap());
                codec.clear_bit(p2, bank).unwrap();
            }
        }
    }

    #[test]
    fn set_function_keeps_neighbours() {
        let (codec, sim) = registers(Soc::Bcm2835);
        for port in 10..20 {
            codec.set_function(port, Function::Alt3).unwrap();
        }
        codec.set_function(14, Function::Output).unwrap();
        for port in 10..20 {
            let expected = if port == 14 { Function::Output } else { Function::Alt3 };
            assert_eq!(codec.function(port).unwrap(), expected);
        }
        // Only the 3 bits of field 4 differ from all-ones in the low 30 bits
        assert_eq!(sim.word(regs::GPFSEL0 + 4), 0x3fff_ffff & !(0b110 << 12));
        assert_eq!(codec.function(9).unwrap(), Function::Input);
        assert_eq!(codec.function(20).unwrap(), Function::Input);
    }

    #[test]
    fn concurrent_rmw_on_one_word() {
        let (codec, _sim) = registers(Soc::Bcm2835);
        let codec = Arc::new(codec);
        let handles: Vec<_> = (0..10u8)
            .map(|port| {
                let codec = codec.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        codec.set_function(port, Function::Output).unwrap();
                        codec.set_bit(port, RegisterBank::RisingEdgeEnable).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for port in 0..10 {
            assert_eq!(codec.function(port).unwrap(), Function::Output);
            assert!(codec.read_bit(port, RegisterBank::RisingEdgeEnable).unwrap());
        }
    }

    #[test]
    fn write_one_banks_do_not_read() {
        let (codec, sim) = registers(Soc::Bcm2835);
        codec.set_function(3, Function::Output).unwrap();
        codec.set_function(4, Function::Output).unwrap();
        codec.set_bit(3, RegisterBank::SetOutput).unwrap();
        codec.set_bit(4, RegisterBank::SetOutput).unwrap();
        codec.set_bit(3, RegisterBank::ClearOutput).unwrap();
        assert!(!codec.read_bit(3, RegisterBank::Level).unwrap());
        assert!(codec.read_bit(4, RegisterBank::Level).unwrap());
        // Clearing a bit of a write-1 bank means writing 0, which the hardware ignores
        codec.clear_bit(4, RegisterBank::SetOutput).unwrap();
        assert_eq!(sim.level(4), crate::gpio::Level::High);
    }

    #[test]
    fn pull_on_bcm2711() {
        let (codec, sim) = registers(Soc::Bcm2711);
        codec.set_pull(17, Pull::Up).unwrap();
        codec.set_pull(18, Pull::Down).unwrap();
        assert_eq!(
            sim.word(regs::GPIO_PUP_PDN_CNTRL_REG0 + 4),
            0b01 << 2 | 0b10 << 4
        );
        codec.set_pull(17, Pull::Off).unwrap();
        assert_eq!(sim.word(regs::GPIO_PUP_PDN_CNTRL_REG0 + 4), 0b10 << 4);
    }

    #[test]
    fn legacy_pull_sequence_releases_clock() {
        let (codec, sim) = registers(Soc::Bcm2837);
        codec.set_pull(40, Pull::Up).unwrap();
        assert_eq!(sim.word(regs::GPPUD), 0);
        assert_eq!(sim.word(regs::GPPUDCLK1), 0);
    }
}
