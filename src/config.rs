//! # Runtime configuration
//!
//! Controls which device node is mapped, which SoC layout is assumed and how
//! often edge watchers poll the event status registers. Configuration can be
//! given as TOML:
//!
//! ```toml
//! device = "/dev/gpiomem"
//! fallback_device = "/dev/mem"
//! soc = "bcm2711"
//! poll_interval_us = 500
//! ```
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::board::Soc;
use crate::error::Result;

/// Environment variable naming a TOML file read by [`GpioConfig::from_env`]
pub const CONFIG_ENV: &str = "BCM_GPIOMEM_CONFIG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpioConfig {
    /// Device node exposing the GPIO block. `/dev/gpiomem` maps the GPIO block at offset 0.
    pub device: PathBuf,
    /// Tried when `device` does not exist. `/dev/mem` needs the physical GPIO base address,
    /// so the SoC must be known or detectable.
    pub fallback_device: Option<PathBuf>,
    /// Skip device tree detection and assume this SoC
    pub soc: Option<Soc>,
    /// Cadence of the edge watcher event status poll
    pub poll_interval_us: u64,
}

impl Default for GpioConfig {
    fn default() -> Self {
        GpioConfig {
            device: PathBuf::from("/dev/gpiomem"),
            fallback_device: Some(PathBuf::from("/dev/mem")),
            soc: None,
            poll_interval_us: 1000,
        }
    }
}

impl GpioConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load the file named by [`CONFIG_ENV`], or fall back to the defaults if it is unset
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => {
                log::debug!("loading GPIO configuration from {:?}", path);
                Self::load(path)
            }
            None => Ok(Self::default()),
        }
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(GpioConfig::from_toml_str("").unwrap(), GpioConfig::default());
    }

    #[test]
    fn parses_all_fields() {
        let cfg = GpioConfig::from_toml_str(
            r#"
            device = "/dev/mem"
            soc = "bcm2837"
            poll_interval_us = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.device, PathBuf::from("/dev/mem"));
        assert_eq!(cfg.soc, Some(Soc::Bcm2837));
        assert_eq!(cfg.poll_interval(), Duration::from_micros(250));
        // Untouched fields keep their default
        assert_eq!(cfg.fallback_device, Some(PathBuf::from("/dev/mem")));
    }

    #[test]
    fn rejects_unknown_soc_and_fields() {
        assert!(matches!(
            GpioConfig::from_toml_str("soc = \"bcm9999\""),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            GpioConfig::from_toml_str("pol_interval_us = 3"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let cfg = GpioConfig {
            poll_interval_us: 0,
            ..Default::default()
        };
        assert_eq!(cfg.poll_interval(), Duration::from_micros(1));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fallback_device = \"/dev/null\"").unwrap();
        let cfg = GpioConfig::load(file.path()).unwrap();
        assert_eq!(cfg.fallback_device, Some(PathBuf::from("/dev/null")));
    }
}
