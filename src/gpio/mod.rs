//! # GPIO module
//!
//! Pins are controlled by writing the GPIO registers of the SoC directly
//! through a memory mapping of `/dev/gpiomem` (or `/dev/mem`), instead of
//! going through the kernel's sysfs or character device interfaces.
//!
//! The module is split into the following parts:
//!
//! - [`mem`]: the single mapping of the register page shared by everything else
//! - [`reg`]: pure helpers locating a port's bits, plus the bank-locked
//!   read-modify-write used to change one port without disturbing its neighbours
//! - [`pin`]: the [`Gpio`] controller and the value-level [`Pin`] handle
//! - [`watch`]: per-pin edge watcher threads
//! - [`sim`]: a simulated register block for running without hardware
//!
//! The register layout assumes this process is the only one touching the GPIO
//! block. Read-modify-write sequences are serialized inside the process, not
//! against other processes.
//!
//! ## Examples
//!
//! - Blink example: `demos/blink.rs`, run with `cargo run --example blink`
pub mod mem;
pub mod pin;
pub use pin::*;

pub mod reg;
pub use reg::{Function, Pull, RegisterBank};

pub mod sim;
pub use sim::SimulatedPeripheral;

pub mod watch;
pub use watch::EdgeEvent;
