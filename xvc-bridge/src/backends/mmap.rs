//! # Memory-mapped register window
//!
//! Maps a window of 32-bit registers from a device file (typically a UIO device) into the
//! process and gives indexed access to it. Drivers are written against
//! [`RegisterAccess`] so the access method can be overridden, e.g. with [`ByteSwapped`]
//! for buses that present registers in the opposite byte order.
use std::{
    fs::{File, OpenOptions},
    num::NonZero,
    path::Path,
    ptr::{NonNull, read_volatile, write_volatile},
};

use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};
use xvc_server::{Error, IoContext, Result};

/// Default size of the mapped window.
pub const MAP_SIZE: usize = 0x10000;

/// Indexed access to 32-bit registers.
pub trait RegisterAccess {
    fn read(&self, index: usize) -> u32;
    fn write(&self, index: usize, value: u32);
}

/// A register window mapped from a device file.
#[derive(Debug)]
pub struct MemMap {
    base: NonNull<u32>,
    size: usize,
    // Kept open for the lifetime of the mapping; UIO interrupts are delivered through it.
    file: File,
}

impl MemMap {
    pub fn open(path: impl AsRef<Path>, size: usize) -> Result<MemMap> {
        let device_path = path.as_ref();
        log::debug!("Opening register window: {}", device_path.display());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device_path)
            .context(format!("Opening {}", device_path.display()))?;

        let length = NonZero::new(size)
            .ok_or_else(|| Error::Config("register window must not be empty".to_string()))?;
        log::debug!("Mapping registers (size=0x{:x})", size);
        // SAFETY: The mapping is shared with the device and only accessed through volatile
        // reads and writes within `size` bytes; it is unmapped exactly once on drop.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        }
        .map_err(|errno| Error::io(format!("Mapping {}", device_path.display()), errno.into()))?;
        log::info!("Mapped {} registers of {}", size / 4, device_path.display());

        Ok(MemMap {
            base: ptr.cast(),
            size,
            file,
        })
    }

    /// Number of 32-bit registers in the window.
    pub fn len(&self) -> usize {
        self.size / 4
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The device file backing the window.
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl RegisterAccess for MemMap {
    fn read(&self, index: usize) -> u32 {
        assert!(index < self.len(), "register {index} outside of window");
        // SAFETY: index is within the mapping, see `open`.
        unsafe { read_volatile(self.base.as_ptr().add(index)) }
    }

    fn write(&self, index: usize, value: u32) {
        assert!(index < self.len(), "register {index} outside of window");
        // SAFETY: index is within the mapping, see `open`.
        unsafe { write_volatile(self.base.as_ptr().add(index), value) }
    }
}

impl Drop for MemMap {
    fn drop(&mut self) {
        // SAFETY: base and size describe the mapping created in `open`.
        unsafe {
            let _ = munmap(self.base.cast(), self.size);
        }
    }
}

/// Swaps the byte order of every register access.
#[derive(Debug)]
pub struct ByteSwapped<R>(pub R);

impl<R: RegisterAccess> RegisterAccess for ByteSwapped<R> {
    fn read(&self, index: usize) -> u32 {
        self.0.read(index).swap_bytes()
    }

    fn write(&self, index: usize, value: u32) {
        self.0.write(index, value.swap_bytes())
    }
}
