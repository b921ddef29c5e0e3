//! The flash device contract (spec §6.1) and a hosted-test implementation of it.

use std::vec;
use std::vec::Vec;

/// Error returned by a [`FlashDevice`] operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceError {
    /// `erase_subsector` failed.
    Erase,
    /// `page_write` failed.
    Program,
    /// Switching between memory-mapped and programming mode failed.
    ModeToggle,
    /// An address or length fell outside the device's addressable range.
    OutOfRange,
}

/// Result type for [`FlashDevice`] operations.
pub type DeviceResult = Result<(), DeviceError>;

/// The flash device contract consumed by the allocator (spec §6.1).
///
/// Implementors own a fixed geometry (page size, subsector size, reserved
/// region bounds) and two modes: memory-mapped (reads are plain loads) and
/// programming (erase/program are valid, reads are not guaranteed). The
/// allocator never calls erase/program while in memory-mapped mode, and
/// always asks to return to memory-mapped mode before giving control back to
/// its caller.
pub trait FlashDevice {
    /// Bytes in one programmable page.
    fn page_size(&self) -> u32;

    /// Bytes in one erasable subsector.
    fn subsector_size(&self) -> u32;

    /// First address of the reserved feature region.
    fn kf_start(&self) -> u32;

    /// One past the last address of the reserved feature region.
    fn kf_end(&self) -> u32;

    /// Round `addr` down to the start of its containing page.
    fn page_base(&self, addr: u32) -> u32 {
        addr - (addr % self.page_size())
    }

    /// Round `addr` down to the start of its containing subsector.
    fn subsector_base(&self, addr: u32) -> u32 {
        addr - (addr % self.subsector_size())
    }

    /// Prepare the device for use. Called once before any other operation.
    fn startup(&mut self) -> DeviceResult;

    /// Erase the subsector starting at `addr`. `addr` must be subsector-aligned.
    /// Requires programming mode.
    fn erase_subsector(&mut self, addr: u32) -> DeviceResult;

    /// Program `bytes` (at most one page) starting at `addr`. `addr` must be
    /// page-aligned. Requires programming mode.
    fn page_write(&mut self, addr: u32, bytes: &[u8]) -> DeviceResult;

    /// Switch to memory-mapped read mode.
    fn enable_memory_mapped_mode(&mut self) -> DeviceResult;

    /// Switch to programming mode.
    fn disable_memory_mapped_mode(&mut self) -> DeviceResult;

    /// Read `buf.len()` bytes starting at `addr`. Valid in memory-mapped mode;
    /// the idiomatic stand-in for a plain memory load off the mapped region.
    fn read(&self, addr: u32, buf: &mut [u8]);
}

/// RAII guard that puts a [`FlashDevice`] into programming mode on
/// construction and restores memory-mapped mode on drop, mirroring the
/// ancestor `stm32_hal::flash::UnlockGuard`'s lock/unlock discipline.
///
/// A failure to re-enter memory-mapped mode on drop is logged (spec §7: "a
/// failure to re-enable memory-mapped mode is logged but not further
/// propagated") and otherwise swallowed, since `Drop` cannot return a `Result`.
pub struct ModeGuard<'a, D: FlashDevice> {
    device: &'a mut D,
}

impl<'a, D: FlashDevice> ModeGuard<'a, D> {
    /// Disable memory-mapped mode and return a guard that re-enables it on drop.
    pub fn enter(device: &'a mut D) -> Result<Self, DeviceError> {
        device.disable_memory_mapped_mode()?;
        Ok(ModeGuard { device })
    }
}

impl<'a, D: FlashDevice> core::ops::Deref for ModeGuard<'a, D> {
    type Target = D;
    fn deref(&self) -> &D {
        self.device
    }
}

impl<'a, D: FlashDevice> core::ops::DerefMut for ModeGuard<'a, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.device
    }
}

impl<'a, D: FlashDevice> Drop for ModeGuard<'a, D> {
    fn drop(&mut self) {
        if self.device.enable_memory_mapped_mode().is_err() {
            log::warn!("flash-hal: failed to re-enter memory-mapped mode");
        }
    }
}

/// Byte value of an erased flash cell.
pub const ERASED_BYTE: u8 = 0xFF;

/// In-memory [`FlashDevice`] simulator for hosted tests.
///
/// Not a production driver: `erase_subsector`/`page_write` operate directly
/// on a `Vec<u8>` and never fail unless `fail_next_*` is armed, which tests
/// use to exercise the crash-safety properties in spec §8 (P6).
pub struct SimFlash {
    base: u32,
    page_size: u32,
    subsector_size: u32,
    mapped: bool,
    started: bool,
    bytes: Vec<u8>,
    fail_next_erase: bool,
    fail_next_program: bool,
}

impl SimFlash {
    /// Create a simulated device of `region_size` bytes starting at `base`.
    pub fn new(base: u32, region_size: u32, page_size: u32, subsector_size: u32) -> Self {
        SimFlash {
            base,
            page_size,
            subsector_size,
            mapped: true,
            started: false,
            bytes: vec![ERASED_BYTE; region_size as usize],
            fail_next_erase: false,
            fail_next_program: false,
        }
    }

    fn offset(&self, addr: u32) -> usize {
        (addr - self.base) as usize
    }

    /// Arm a one-shot failure for the next `erase_subsector` call.
    pub fn fail_next_erase(&mut self) {
        self.fail_next_erase = true;
    }

    /// Arm a one-shot failure for the next `page_write` call.
    pub fn fail_next_program(&mut self) {
        self.fail_next_program = true;
    }

    /// Whether the device is currently in memory-mapped mode (test introspection).
    pub fn is_memory_mapped(&self) -> bool {
        self.mapped
    }

    /// Whether `startup` has been called (test introspection).
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Direct slice access for assertions in tests.
    pub fn raw(&self) -> &[u8] {
        &self.bytes
    }
}

impl FlashDevice for SimFlash {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn subsector_size(&self) -> u32 {
        self.subsector_size
    }

    fn kf_start(&self) -> u32 {
        self.base
    }

    fn kf_end(&self) -> u32 {
        self.base + self.bytes.len() as u32
    }

    fn startup(&mut self) -> DeviceResult {
        self.started = true;
        Ok(())
    }

    fn erase_subsector(&mut self, addr: u32) -> DeviceResult {
        if self.mapped {
            return Err(DeviceError::ModeToggle);
        }
        if self.fail_next_erase {
            self.fail_next_erase = false;
            return Err(DeviceError::Erase);
        }
        let start = self.offset(addr);
        let end = start + self.subsector_size as usize;
        if end > self.bytes.len() {
            return Err(DeviceError::OutOfRange);
        }
        self.bytes[start..end].fill(ERASED_BYTE);
        Ok(())
    }

    fn page_write(&mut self, addr: u32, data: &[u8]) -> DeviceResult {
        if self.mapped {
            return Err(DeviceError::ModeToggle);
        }
        if data.len() as u32 > self.page_size {
            return Err(DeviceError::OutOfRange);
        }
        if self.fail_next_program {
            self.fail_next_program = false;
            return Err(DeviceError::Program);
        }
        let start = self.offset(addr);
        let end = start + data.len();
        if end > self.bytes.len() {
            return Err(DeviceError::OutOfRange);
        }
        // Real NOR flash can only clear bits during a program; this is a
        // hosted simulator, so a plain overwrite is faithful enough for the
        // allocator's own invariants (it never programs a byte twice without
        // an intervening erase).
        self.bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn enable_memory_mapped_mode(&mut self) -> DeviceResult {
        self.mapped = true;
        Ok(())
    }

    fn disable_memory_mapped_mode(&mut self) -> DeviceResult {
        self.mapped = false;
        Ok(())
    }

    fn read(&self, addr: u32, buf: &mut [u8]) {
        let start = self.offset(addr);
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn device() -> SimFlash {
        let mut d = SimFlash::new(0x1000_0000, 4096 * 4, 256, 4096);
        d.startup().unwrap();
        d
    }

    #[test]
    fn fresh_device_reads_erased_pattern() {
        let d = device();
        let mut buf = [0u8; 16];
        d.read(0x1000_0000, &mut buf);
        assert_eq!(buf, [ERASED_BYTE; 16]);
    }

    #[test]
    fn program_requires_programming_mode() {
        let mut d = device();
        assert_eq!(
            d.page_write(0x1000_0000, &[1, 2, 3]),
            Err(DeviceError::ModeToggle)
        );
    }

    #[test]
    fn erase_then_program_round_trips() {
        let mut d = device();
        d.disable_memory_mapped_mode().unwrap();
        d.erase_subsector(0x1000_0000).unwrap();
        d.page_write(0x1000_0000, &[1, 2, 3, 4]).unwrap();
        d.enable_memory_mapped_mode().unwrap();

        let mut buf = [0u8; 4];
        d.read(0x1000_0000, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn mode_guard_restores_memory_mapped_on_drop() {
        let mut d = device();
        {
            let guard = ModeGuard::enter(&mut d).unwrap();
            assert!(!guard.is_memory_mapped());
        }
        assert!(d.is_memory_mapped());
    }

    #[test]
    fn armed_erase_failure_leaves_bytes_intact() {
        let mut d = device();
        d.disable_memory_mapped_mode().unwrap();
        d.erase_subsector(0x1000_0000).unwrap();
        d.page_write(0x1000_0000, &[0xAA; 4]).unwrap();
        d.fail_next_erase();
        assert_eq!(
            d.erase_subsector(0x1000_1000),
            Err(DeviceError::Erase)
        );
        d.enable_memory_mapped_mode().unwrap();

        let mut buf = [0u8; 4];
        d.read(0x1000_0000, &mut buf);
        assert_eq!(buf, [0xAA; 4]);
    }

    #[test]
    fn armed_failure_leaves_prior_bytes_intact() {
        let mut d = device();
        d.disable_memory_mapped_mode().unwrap();
        d.erase_subsector(0x1000_0000).unwrap();
        d.page_write(0x1000_0000, &[0xAA; 4]).unwrap();
        d.fail_next_program();
        assert_eq!(
            d.page_write(0x1000_0004, &[0xBB; 4]),
            Err(DeviceError::Program)
        );
        d.enable_memory_mapped_mode().unwrap();

        let mut buf = [0u8; 8];
        d.read(0x1000_0000, &mut buf);
        assert_eq!(&buf[0..4], &[0xAA; 4]);
        assert_eq!(&buf[4..8], &[ERASED_BYTE; 4]);
    }
}
