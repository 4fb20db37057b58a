//! # Memory window onto the GPIO register block
//!
//! Owns the single mapping of the GPIO register page. The mapping is created
//! lazily by [`MemoryWindow::ensure_mapped`] and shared by every pin and edge
//! watcher of a [`Gpio`](super::Gpio) controller. Racing openers serialize on
//! a write lock, so only the first one performs the `mmap`.
//!
//! Word accesses are volatile, 4-byte aligned and bounds checked.
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::{Arc, PoisonError, RwLock};

use crate::board::{Soc, BLOCK_SIZE};
use crate::config::GpioConfig;
use crate::error::{Error, Result};

use super::sim::SimulatedPeripheral;

// 32-bit glibc targets have a 32-bit off_t, too small for the BCM2711 GPIO base
#[cfg(all(target_os = "linux", target_env = "gnu", target_pointer_width = "32"))]
use libc::{mmap64 as mmap, off64_t as Offset};
#[cfg(not(all(target_os = "linux", target_env = "gnu", target_pointer_width = "32")))]
use libc::{mmap, off_t as Offset};

//==================================================================================================
//  Mapping
//==================================================================================================

/// One `mmap`ed page of a device or file
#[derive(Debug)]
struct Mapping {
    base: NonNull<u32>,
}

// The mapping is plain memory shared with the device. All accesses are volatile word accesses
// and read-modify-write sequences are serialized by the register codec.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    fn open(path: &Path, offset: u64) -> Result<Mapping> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|e| classify(e, path))?;
        let file_offset = page_offset(offset)?;

        // Safety: fresh mapping, no existing memory is aliased
        let base = unsafe {
            mmap(
                ptr::null_mut(),
                BLOCK_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                file_offset,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(classify(io::Error::last_os_error(), path));
        }
        // The file descriptor may be closed once the mapping exists
        let base = NonNull::new(base as *mut u32).ok_or_else(|| {
            Error::UnsupportedPlatform(format!("{} mapped at address 0", path.display()))
        })?;
        log::debug!(
            "mapped {} bytes of {} at offset {:#x}",
            BLOCK_SIZE,
            path.display(),
            offset
        );
        Ok(Mapping { base })
    }

    #[inline]
    fn read(&self, offset: usize) -> u32 {
        // Safety: offset was checked against BLOCK_SIZE and alignment
        unsafe { ptr::read_volatile(self.base.as_ptr().add(offset / 4)) }
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        // Safety: offset was checked against BLOCK_SIZE and alignment
        unsafe { ptr::write_volatile(self.base.as_ptr().add(offset / 4), value) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // Safety: base and length come from the successful mmap call
        let ret = unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, BLOCK_SIZE) };
        if ret != 0 {
            log::warn!("munmap failed: {}", io::Error::last_os_error());
        } else {
            log::debug!("unmapped GPIO register block");
        }
    }
}

/// Physical offset as the `mmap` offset type of the target
fn page_offset(offset: u64) -> Result<Offset> {
    Offset::try_from(offset).map_err(|_| {
        Error::OutOfRange(format!("offset {offset:#x} does not fit the mmap offset type"))
    })
}

fn classify(err: io::Error, path: &Path) -> Error {
    match err.raw_os_error() {
        Some(libc::EACCES) | Some(libc::EPERM) => Error::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => Error::Io(err),
    }
}

fn is_not_found(err: &Error) -> bool {
    matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::NotFound)
}

/// `/dev/mem` exposes physical memory, every other node is expected to start at the GPIO block
fn needs_physical_offset(path: &Path) -> bool {
    path.file_name().map_or(false, |name| name == "mem")
}

//==================================================================================================
//  MemoryWindow
//==================================================================================================

#[derive(Debug)]
enum Source {
    Device(GpioConfig),
    Simulated(Arc<SimulatedPeripheral>),
}

#[derive(Debug)]
enum Backing {
    Mapped(Mapping),
    Simulated(Arc<SimulatedPeripheral>),
}

#[derive(Debug)]
struct Window {
    backing: Backing,
    soc: Option<Soc>,
}

/// Word-level access to the GPIO register page
#[derive(Debug)]
pub struct MemoryWindow {
    source: Source,
    window: RwLock<Option<Window>>,
}

impl MemoryWindow {
    pub(crate) fn new(config: GpioConfig) -> Self {
        MemoryWindow {
            source: Source::Device(config),
            window: RwLock::new(None),
        }
    }

    pub(crate) fn simulated(sim: Arc<SimulatedPeripheral>) -> Self {
        MemoryWindow {
            source: Source::Simulated(sim),
            window: RwLock::new(None),
        }
    }

    /// Map the register block unless it is already mapped
    pub fn ensure_mapped(&self) -> Result<()> {
        if self.is_mapped() {
            return Ok(());
        }
        let mut window = self.window.write().unwrap_or_else(PoisonError::into_inner);
        // Another opener may have won the race while we waited for the lock
        if window.is_none() {
            *window = Some(self.map()?);
        }
        Ok(())
    }

    pub fn is_mapped(&self) -> bool {
        self.window
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Tear down the mapping. Later accesses fail with [`Error::Unmapped`] until the next
    /// [`ensure_mapped`](Self::ensure_mapped).
    pub fn unmap(&self) {
        self.window
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// SoC of the mapped board, if it is known
    pub fn soc(&self) -> Option<Soc> {
        self.window
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|w| w.soc)
    }

    pub fn read32(&self, offset: usize) -> Result<u32> {
        check_offset(offset)?;
        let window = self.window.read().unwrap_or_else(PoisonError::into_inner);
        match window.as_ref().map(|w| &w.backing) {
            Some(Backing::Mapped(mapping)) => Ok(mapping.read(offset)),
            Some(Backing::Simulated(sim)) => Ok(sim.load(offset)),
            None => Err(Error::Unmapped),
        }
    }

    pub fn write32(&self, offset: usize, value: u32) -> Result<()> {
        check_offset(offset)?;
        let window = self.window.read().unwrap_or_else(PoisonError::into_inner);
        match window.as_ref().map(|w| &w.backing) {
            Some(Backing::Mapped(mapping)) => mapping.write(offset, value),
            Some(Backing::Simulated(sim)) => sim.store(offset, value),
            None => return Err(Error::Unmapped),
        }
        Ok(())
    }

    fn map(&self) -> Result<Window> {
        match &self.source {
            Source::Simulated(sim) => Ok(Window {
                backing: Backing::Simulated(sim.clone()),
                soc: Some(sim.soc()),
            }),
            Source::Device(config) => map_device(config),
        }
    }
}

fn check_offset(offset: usize) -> Result<()> {
    if offset % 4 != 0 || offset.checked_add(4).map_or(true, |end| end > BLOCK_SIZE) {
        return Err(Error::OutOfRange(format!(
            "register offset {offset:#x} outside the {BLOCK_SIZE} byte window"
        )));
    }
    Ok(())
}

fn map_device(config: &GpioConfig) -> Result<Window> {
    match open_node(&config.device, config.soc) {
        Err(e) if is_not_found(&e) => {}
        other => return other,
    }
    let Some(fallback) = &config.fallback_device else {
        return Err(Error::UnsupportedPlatform(format!(
            "{} does not exist",
            config.device.display()
        )));
    };
    log::warn!(
        "{} does not exist, falling back to {}",
        config.device.display(),
        fallback.display()
    );
    open_node(fallback, config.soc).map_err(|e| {
        if is_not_found(&e) {
            Error::UnsupportedPlatform(format!(
                "neither {} nor {} exist",
                config.device.display(),
                fallback.display()
            ))
        } else {
            e
        }
    })
}

fn open_node(path: &Path, soc: Option<Soc>) -> Result<Window> {
    if needs_physical_offset(path) {
        let soc = match soc {
            Some(soc) => soc,
            None => Soc::detect()?,
        };
        let backing = Backing::Mapped(Mapping::open(path, soc.gpio_base())?);
        Ok(Window {
            backing,
            soc: Some(soc),
        })
    } else {
        let backing = Backing::Mapped(Mapping::open(path, 0)?);
        Ok(Window {
            backing,
            soc: soc.or_else(|| Soc::detect().ok()),
        })
    }
}
