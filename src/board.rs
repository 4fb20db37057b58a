//! # Register map and board description
//!
//! Physical addresses and register offsets of the Broadcom GPIO block, the
//! supported SoC variants and the 40-pin header of the Raspberry Pi boards.
//!
//! The header table is only used to label pins for humans. All register
//! arithmetic works on the SoC's own port numbering.
use std::fs;
use std::path::Path;

use paste::paste;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Offset of the GPIO block relative to the peripheral base address
pub const GPIO_OFFSET: u64 = 0x20_0000;
/// Size of the mapped register block. One page covers every GPIO register.
pub const BLOCK_SIZE: usize = 4 * 1024;
/// Number of GPIO lines exposed by the GPIO block
pub const PORT_COUNT: u8 = 54;

/// Byte offsets of the GPIO registers inside the GPIO block
pub mod regs {
    pub const GPFSEL0: usize = 0x00; // Function Select 0 (ports 0-9)
    pub const GPFSEL5: usize = 0x14; // Function Select 5 (ports 50-53)
    pub const GPSET0: usize = 0x1c; // Pin Output Set 0
    pub const GPSET1: usize = 0x20;
    pub const GPCLR0: usize = 0x28; // Pin Output Clear 0
    pub const GPCLR1: usize = 0x2c;
    pub const GPLEV0: usize = 0x34; // Pin Level 0
    pub const GPLEV1: usize = 0x38;
    pub const GPEDS0: usize = 0x40; // Event Detect Status 0
    pub const GPEDS1: usize = 0x44;
    pub const GPREN0: usize = 0x4c; // Rising Edge Detect Enable 0
    pub const GPREN1: usize = 0x50;
    pub const GPFEN0: usize = 0x58; // Falling Edge Detect Enable 0
    pub const GPFEN1: usize = 0x5c;
    pub const GPHEN0: usize = 0x64; // High Detect Enable 0
    pub const GPLEN0: usize = 0x70; // Low Detect Enable 0
    pub const GPAREN0: usize = 0x7c; // Async Rising Edge Detect 0
    pub const GPAFEN0: usize = 0x88; // Async Falling Edge Detect 0
    pub const GPPUD: usize = 0x94; // Pull-up/down Enable (BCM2835-BCM2837)
    pub const GPPUDCLK0: usize = 0x98; // Pull-up/down Enable Clock 0
    pub const GPPUDCLK1: usize = 0x9c;
    pub const GPIO_PUP_PDN_CNTRL_REG0: usize = 0xe4; // Pull control (BCM2711)
    pub const GPIO_PUP_PDN_CNTRL_REG3: usize = 0xf0;
}

//==================================================================================================
//  SoC
//==================================================================================================

/// Supported Broadcom SoCs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Soc {
    /// Raspberry Pi 1, Zero
    Bcm2835,
    /// Raspberry Pi 2
    Bcm2836,
    /// Raspberry Pi 3, Zero 2
    Bcm2837,
    /// Raspberry Pi 4, 400
    Bcm2711,
}

const DEVICE_TREE_COMPATIBLE: &str = "/proc/device-tree/compatible";

impl Soc {
    /// Physical base address of the peripheral bus
    pub const fn peripheral_base(self) -> u64 {
        match self {
            Soc::Bcm2835 => 0x2000_0000,
            Soc::Bcm2836 | Soc::Bcm2837 => 0x3f00_0000,
            Soc::Bcm2711 => 0xfe00_0000,
        }
    }

    /// Physical address of the GPIO register block
    pub const fn gpio_base(self) -> u64 {
        self.peripheral_base() + GPIO_OFFSET
    }

    /// The BCM2711 replaced the clocked GPPUD sequence with directly writable pull fields
    pub const fn has_direct_pull_registers(self) -> bool {
        matches!(self, Soc::Bcm2711)
    }

    /// Pick the SoC out of a device tree `compatible` property. Entries are NUL separated.
    pub fn from_compatible(compatible: &str) -> Option<Soc> {
        compatible
            .split('\0')
            .find_map(|entry| match entry.trim() {
                "brcm,bcm2835" => Some(Soc::Bcm2835),
                "brcm,bcm2836" => Some(Soc::Bcm2836),
                "brcm,bcm2837" => Some(Soc::Bcm2837),
                "brcm,bcm2711" => Some(Soc::Bcm2711),
                _ => None,
            })
    }

    /// Detect the SoC of the running board from the device tree
    pub fn detect() -> Result<Soc> {
        Self::detect_from(Path::new(DEVICE_TREE_COMPATIBLE))
    }

    pub(crate) fn detect_from(path: &Path) -> Result<Soc> {
        let raw = fs::read(path).map_err(|e| {
            Error::UnsupportedPlatform(format!("cannot read {}: {e}", path.display()))
        })?;
        let compatible = String::from_utf8_lossy(&raw);
        Self::from_compatible(&compatible).ok_or_else(|| {
            Error::UnsupportedPlatform(format!(
                "no supported SoC in {}",
                compatible.replace('\0', " ").trim()
            ))
        })
    }
}

//==================================================================================================
//  40-pin header
//==================================================================================================

macro_rules! header_pins {
    ($($header:literal => $port:literal),* $(,)?) => {
        paste! {
            $(
                #[doc = "Port wired to header pin P1-" $header]
                pub const [<GPIO_P1_ $header>]: u8 = $port;
            )*

            /// `(header pin, port)` pairs of the 40-pin connector
            pub const HEADER_PINS: &[(u8, u8)] = &[$(($header, $port)),*];
        }
    };
}

macro_rules! port_aliases {
    ($($port:literal => $header:ident),* $(,)?) => {
        paste! {
            $(
                #[doc = "GPIO port " $port ", available on " $header]
                pub const [<GPIO $port>]: u8 = $header;
            )*
        }
    };
}

header_pins! {
    3 => 2,
    5 => 3,
    7 => 4,
    8 => 14,
    10 => 15,
    11 => 17,
    12 => 18,
    13 => 27,
    15 => 22,
    16 => 23,
    18 => 24,
    19 => 10,
    21 => 9,
    22 => 25,
    23 => 11,
    24 => 8,
    26 => 7,
    27 => 0,
    28 => 1,
    29 => 5,
    31 => 6,
    32 => 12,
    33 => 13,
    35 => 19,
    36 => 16,
    37 => 26,
    38 => 20,
    40 => 21,
}

port_aliases! {
    05 => GPIO_P1_29,
    06 => GPIO_P1_31,
    12 => GPIO_P1_32,
    13 => GPIO_P1_33,
    16 => GPIO_P1_36,
    17 => GPIO_P1_11,
    18 => GPIO_P1_12,
    19 => GPIO_P1_35,
    20 => GPIO_P1_38,
    21 => GPIO_P1_40,
    22 => GPIO_P1_15,
    23 => GPIO_P1_16,
    24 => GPIO_P1_18,
    25 => GPIO_P1_22,
    26 => GPIO_P1_37,
    27 => GPIO_P1_13,
}

/// Header pin a port is wired to, if any
pub fn header_pin(port: u8) -> Option<u8> {
    HEADER_PINS
        .iter()
        .find(|&&(_, p)| p == port)
        .map(|&(header, _)| header)
}

/// Port wired to a header pin, if the pin is a GPIO at all
pub fn port_for_header(header: u8) -> Option<u8> {
    HEADER_PINS
        .iter()
        .find(|&&(h, _)| h == header)
        .map(|&(_, port)| port)
}

/// Human readable pin name, e.g. `GPIO17 (P1-11)`
pub fn label(port: u8) -> String {
    match header_pin(port) {
        Some(header) => format!("GPIO{port} (P1-{header})"),
        None => format!("GPIO{port}"),
    }
}
