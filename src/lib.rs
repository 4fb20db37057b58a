//! Memory-mapped GPIO for Broadcom based single-board computers
//!
//! Configures ports as inputs or outputs, drives and reads them, and watches
//! inputs for edges by accessing the GPIO registers of the BCM2835, BCM2836,
//! BCM2837 and BCM2711 directly through `/dev/gpiomem`.
//!
//! ```no_run
//! use bcm_gpiomem::board::{GPIO05, GPIO17};
//! use bcm_gpiomem::{open_pin, Edge, Mode};
//!
//! let mut led = open_pin(GPIO17, Mode::Output)?;
//! let mut button = open_pin(GPIO05, Mode::Input)?;
//! button.begin_watch(Edge::Falling, |event| {
//!     println!("GPIO{} pressed", event.port);
//! })?;
//! led.set()?;
//! # Ok::<(), bcm_gpiomem::Error>(())
//! ```
pub mod board;
pub mod config;
pub mod error;
pub mod gpio;
pub mod prelude;

pub use config::GpioConfig;
pub use error::{Error, Result};
pub use gpio::{open_pin, Edge, EdgeEvent, Gpio, Level, Mode, Pin};
