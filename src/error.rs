//! # Error type shared by all GPIO operations
use std::path::PathBuf;

use thiserror::Error;

use crate::gpio::Mode;

/// GPIO error type
#[derive(Debug, Error)]
pub enum Error {
    /// The peripheral memory device exists but could not be opened or mapped by this process.
    #[error("permission denied while opening {}", path.display())]
    PermissionDenied { path: PathBuf },
    /// No usable peripheral memory device or unknown SoC.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("GPIO{0} is already open")]
    AlreadyOpen(u8),
    #[error("GPIO{0} is already being watched")]
    AlreadyWatching(u8),
    /// The pin is not in the correct [`Mode`] for the requested operation.
    /// Pins are not tracked and verified at compile-time, so these checks happen at run-time.
    #[error("{op} is not valid on GPIO{port} configured as {mode}")]
    InvalidOperation {
        port: u8,
        mode: Mode,
        op: &'static str,
    },
    /// Malformed port number or register offset. Usually points at a register map bug.
    #[error("out of range: {0}")]
    OutOfRange(String),
    /// An edge callback panicked. Its watch has ended.
    #[error("edge callback of GPIO{0} panicked")]
    CallbackPanicked(u8),
    #[error("cannot tear down the register mapping while {0} pin(s) are still open")]
    PinsOpen(usize),
    /// Register access after the mapping has been torn down.
    #[error("peripheral memory is not mapped")]
    Unmapped,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
