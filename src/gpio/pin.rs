//! # Value-level pin handles
//!
//! A [`Pin`] is opened from a [`Gpio`] controller for one port number and one
//! [`Mode`]. The mode is fixed for the life of the handle; reconfiguring a
//! port means closing the handle and opening it again.
//!
//! Because modes are tracked at run-time, many [`Pin`] operations are
//! fallible. Setting the output of an input, or reading an output, returns
//! [`Error::InvalidOperation`].
//!
//! Each port is a singleton: while a [`Pin`] for a port is alive, opening the
//! same port again fails with [`Error::AlreadyOpen`], regardless of the
//! requested mode. Closing (or dropping) a pin stops its edge watch, puts the
//! port back into input mode and releases the reservation.
//!
//! ```no_run
//! use bcm_gpiomem::gpio::{open_pin, Level, Mode};
//!
//! let mut led = open_pin(17, Mode::Output)?;
//! led.set()?;
//! let button = open_pin(5, Mode::Input)?;
//! if button.read()? == Level::Low {
//!     led.clear()?;
//! }
//! # Ok::<(), bcm_gpiomem::Error>(())
//! ```
//!
//! # Embedded HAL traits
//!
//! [`Pin`] implements the embedded HAL `OutputPin` and `InputPin` traits with
//! [`Error`] as the error type.
use core::fmt;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use embedded_hal::digital::v2::{InputPin, OutputPin};
use once_cell::sync::{Lazy, OnceCell};

use super::mem::MemoryWindow;
use super::reg::{Function, Pull, RegisterBank, Registers};
use super::sim::SimulatedPeripheral;
use super::watch::{EdgeEvent, Watch};
use crate::board::{self, PORT_COUNT};
use crate::config::GpioConfig;
use crate::error::{Error, Result};

//==================================================================================================
//  Definitions
//==================================================================================================

/// Direction of an opened pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Input,
    Output,
}

impl Mode {
    const fn function(self) -> Function {
        match self {
            Mode::Input => Function::Input,
            Mode::Output => Function::Output,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Input => f.write_str("input"),
            Mode::Output => f.write_str("output"),
        }
    }
}

/// Logic level of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low = 0,
    High = 1,
}

impl From<bool> for Level {
    #[inline]
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<Level> for bool {
    #[inline]
    fn from(level: Level) -> Self {
        level == Level::High
    }
}

/// Transitions an edge watch reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

impl Edge {
    #[inline]
    pub const fn rising(self) -> bool {
        matches!(self, Edge::Rising | Edge::Both)
    }

    #[inline]
    pub const fn falling(self) -> bool {
        matches!(self, Edge::Falling | Edge::Both)
    }
}

//==================================================================================================
//  Gpio
//==================================================================================================

/// State shared by a controller, its pins and their watcher threads
#[derive(Debug)]
pub(crate) struct GpioInner {
    pub(crate) regs: Registers,
    // One bit per port, set while a Pin for the port is alive
    reserved: Mutex<u64>,
    pub(crate) poll_interval: Duration,
}

impl GpioInner {
    fn new(window: MemoryWindow, poll_interval: Duration) -> Self {
        GpioInner {
            regs: Registers::new(window),
            reserved: Mutex::new(0),
            poll_interval,
        }
    }

    fn reserved(&self) -> MutexGuard<'_, u64> {
        self.reserved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, port: u8) {
        *self.reserved() &= !(1 << port);
    }
}

static GPIO: OnceCell<Gpio> = OnceCell::new();

/// What a controller maps. Two controllers must never share one of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Backend {
    Device(PathBuf),
    Simulated(usize),
}

static CONTROLLERS: Lazy<Mutex<HashMap<Backend, Weak<GpioInner>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Live controller for `backend`, or a new one from `build` if there is none
fn shared(backend: Backend, build: impl FnOnce() -> GpioInner) -> Gpio {
    let mut controllers = CONTROLLERS.lock().unwrap_or_else(PoisonError::into_inner);
    controllers.retain(|_, inner| inner.strong_count() > 0);
    if let Some(inner) = controllers.get(&backend).and_then(Weak::upgrade) {
        log::debug!("reusing the controller of {:?}", backend);
        return Gpio { inner };
    }
    let inner = Arc::new(build());
    controllers.insert(backend, Arc::downgrade(&inner));
    Gpio { inner }
}

/// Owner of the register mapping and the port reservations
///
/// Cloning is cheap and yields a handle to the same controller. Hardware code
/// normally uses the process-wide controller returned by [`Gpio::new`].
#[derive(Debug, Clone)]
pub struct Gpio {
    inner: Arc<GpioInner>,
}

impl Gpio {
    /// Process-wide controller, configured by [`GpioConfig::from_env`] on first use
    ///
    /// The register block itself is mapped when the first pin is opened.
    pub fn new() -> Result<Gpio> {
        GPIO.get_or_try_init(|| GpioConfig::from_env().map(Gpio::with_config))
            .cloned()
    }

    /// Controller for the device described by `config`
    ///
    /// There is at most one controller per device node. If a controller for `config.device`
    /// is still alive it is returned and the rest of `config` is ignored.
    pub fn with_config(config: GpioConfig) -> Gpio {
        let device = fs::canonicalize(&config.device).unwrap_or_else(|_| config.device.clone());
        shared(Backend::Device(device), || {
            let poll_interval = config.poll_interval();
            GpioInner::new(MemoryWindow::new(config), poll_interval)
        })
    }

    /// Controller backed by a simulated register block instead of hardware
    ///
    /// Calling this again with the same block returns the same controller.
    pub fn simulated(sim: Arc<SimulatedPeripheral>) -> Gpio {
        shared(Backend::Simulated(Arc::as_ptr(&sim) as usize), || {
            let poll_interval = GpioConfig::default().poll_interval();
            GpioInner::new(MemoryWindow::simulated(sim), poll_interval)
        })
    }

    /// Open `port` in `mode`
    ///
    /// Maps the register block if this is the first open, reserves the port and programs its
    /// function select field.
    pub fn open_pin(&self, port: u8, mode: Mode) -> Result<Pin> {
        if port >= PORT_COUNT {
            return Err(Error::OutOfRange(format!(
                "GPIO{port} does not exist, the SoC has {PORT_COUNT} ports"
            )));
        }
        {
            let mut reserved = self.inner.reserved();
            self.inner.regs.window().ensure_mapped()?;
            if *reserved & (1 << port) != 0 {
                return Err(Error::AlreadyOpen(port));
            }
            *reserved |= 1 << port;
        }
        if let Err(e) = self.inner.regs.set_function(port, mode.function()) {
            self.inner.release(port);
            return Err(e);
        }
        log::debug!("opened {} as {}", board::label(port), mode);
        Ok(Pin {
            port,
            mode,
            gpio: self.inner.clone(),
            watch: None,
            closed: false,
        })
    }

    /// Current function select value of `port`, whether or not it is open
    pub fn function(&self, port: u8) -> Result<Function> {
        self.inner.regs.window().ensure_mapped()?;
        self.inner.regs.function(port)
    }

    /// Number of currently open pins
    pub fn open_count(&self) -> usize {
        self.inner.reserved().count_ones() as usize
    }

    /// Unmap the register block
    ///
    /// Fails with [`Error::PinsOpen`] while any pin is still open. Opening a pin afterwards maps
    /// the block again.
    pub fn close(&self) -> Result<()> {
        let reserved = self.inner.reserved();
        if *reserved != 0 {
            return Err(Error::PinsOpen(reserved.count_ones() as usize));
        }
        self.inner.regs.window().unmap();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<GpioInner> {
        &self.inner
    }
}

/// Open `port` on the process-wide controller
pub fn open_pin(port: u8, mode: Mode) -> Result<Pin> {
    Gpio::new()?.open_pin(port, mode)
}

//==================================================================================================
//  Pin
//==================================================================================================

/// An opened GPIO port
#[derive(Debug)]
pub struct Pin {
    port: u8,
    mode: Mode,
    gpio: Arc<GpioInner>,
    watch: Option<Watch>,
    closed: bool,
}

impl Pin {
    #[inline]
    pub fn port(&self) -> u8 {
        self.port
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Human readable name including the header pin, e.g. `GPIO17 (P1-11)`
    pub fn label(&self) -> String {
        board::label(self.port)
    }

    fn require(&self, mode: Mode, op: &'static str) -> Result<()> {
        if self.mode != mode {
            return Err(Error::InvalidOperation {
                port: self.port,
                mode: self.mode,
                op,
            });
        }
        Ok(())
    }

    /// Drive the output high
    pub fn set(&mut self) -> Result<()> {
        self.require(Mode::Output, "set")?;
        self.gpio.regs.set_bit(self.port, RegisterBank::SetOutput)
    }

    /// Drive the output low
    pub fn clear(&mut self) -> Result<()> {
        self.require(Mode::Output, "clear")?;
        self.gpio.regs.set_bit(self.port, RegisterBank::ClearOutput)
    }

    pub fn set_level(&mut self, level: Level) -> Result<()> {
        match level {
            Level::High => self.set(),
            Level::Low => self.clear(),
        }
    }

    /// Instantaneous level of an input
    pub fn read(&self) -> Result<Level> {
        self.require(Mode::Input, "read")?;
        self.gpio
            .regs
            .read_bit(self.port, RegisterBank::Level)
            .map(Level::from)
    }

    /// Configure the internal pull resistor of an input
    pub fn set_pull(&mut self, pull: Pull) -> Result<()> {
        self.require(Mode::Input, "set_pull")?;
        self.gpio.regs.set_pull(self.port, pull)
    }

    /// Start calling `callback` for every observed `edge` on this input
    ///
    /// The callback runs on a dedicated thread, so invocations for one pin never overlap while
    /// different pins are notified independently. Edges arriving faster than the poll interval
    /// collapse into one notification because the event status bit stays latched until it is
    /// cleared.
    ///
    /// A callback that panics ends the watch, and [`Pin::watch_error`] then returns
    /// [`Error::CallbackPanicked`]. Calling this again replaces a watch that has ended.
    pub fn begin_watch<F>(&mut self, edge: Edge, callback: F) -> Result<()>
    where
        F: FnMut(EdgeEvent) + Send + 'static,
    {
        self.require(Mode::Input, "begin_watch")?;
        if let Some(watch) = &self.watch {
            if watch.is_running() {
                return Err(Error::AlreadyWatching(self.port));
            }
            // The previous watch ended on an error, tear it down before starting over
            self.end_watch()?;
        }
        self.watch = Some(Watch::start(self.gpio.clone(), self.port, edge, callback)?);
        Ok(())
    }

    /// Stop the edge watch, if any
    ///
    /// When this returns the watcher thread has exited and the callback will not run again.
    pub fn end_watch(&mut self) -> Result<()> {
        match self.watch.take() {
            Some(watch) => watch.stop(&self.gpio.regs),
            None => Ok(()),
        }
    }

    /// Whether an edge watch is running. A watch that failed is no longer running.
    pub fn is_watching(&self) -> bool {
        self.watch.as_ref().map_or(false, Watch::is_running)
    }

    /// The error that terminated the edge watch. Each failure is returned once.
    pub fn watch_error(&self) -> Option<Error> {
        self.watch.as_ref().and_then(Watch::take_error)
    }

    /// Stop any watch, return the port to input mode and release it
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let watch = self.end_watch();
        let reset = self.gpio.regs.set_function(self.port, Function::Input);
        self.gpio.release(self.port);
        log::debug!("closed {}", board::label(self.port));
        watch.and(reset)
    }
}

impl Drop for Pin {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("failed to reset {}: {}", board::label(self.port), e);
        }
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.label(), self.mode)
    }
}

//==================================================================================================
// Embedded HAL traits
//==================================================================================================

impl OutputPin for Pin {
    type Error = Error;
    #[inline]
    fn set_high(&mut self) -> Result<()> {
        self.set()
    }
    #[inline]
    fn set_low(&mut self) -> Result<()> {
        self.clear()
    }
}

impl InputPin for Pin {
    type Error = Error;
    #[inline]
    fn is_high(&self) -> Result<bool> {
        self.read().map(bool::from)
    }
    #[inline]
    fn is_low(&self) -> Result<bool> {
        self.read().map(|level| level == Level::Low)
    }
}
