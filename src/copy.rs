//! The streaming ROM-copy engine (spec §4.7).
//!
//! Page-buffered writer in the same spirit as the page-buffering in
//! `drv-stm32h7-update-server`'s block writer: short writes are padded with
//! the flash-erased byte and only committed a whole page at a time.

use crate::config::{ERASED_BYTE, PAGE_SIZE};
use crate::error::CoreError;
use crate::geometry::Geometry;
use flash_hal::flash::{FlashDevice, ModeGuard};

/// Program `bytes` starting at the page-aligned address `addr`, chunking
/// into at most `device.page_size()` bytes per call since the device
/// contract forbids a single `page_write` spanning more than one page
/// (spec §9, "Single-page copy_to_rom call-with-len>page"). Shared between
/// the copy engine's own flush path and the slot table's repair-on-read
/// path (spec §4.4), which rewrites a whole subsector at a time.
pub fn program_chunked<D: FlashDevice>(
    guard: &mut ModeGuard<'_, D>,
    addr: u32,
    bytes: &[u8],
) -> Result<(), CoreError> {
    let page_size = guard.page_size();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let chunk = core::cmp::min(page_size as usize, bytes.len() - offset);
        guard.page_write(addr + offset as u32, &bytes[offset..offset + chunk])?;
        offset += chunk;
    }
    Ok(())
}

/// Page-buffered streaming writer (spec §3.1 `PageBuffer`, §4.7).
pub struct CopyEngine {
    target_page_address: Option<u32>,
    write_offset: usize,
    buffer: [u8; PAGE_SIZE],
}

impl CopyEngine {
    /// A fresh engine with no pending page.
    pub const fn new() -> CopyEngine {
        CopyEngine {
            target_page_address: None,
            write_offset: 0,
            buffer: [ERASED_BYTE; PAGE_SIZE],
        }
    }

    /// Whether a partially-filled page is buffered and awaiting flush.
    pub fn has_pending(&self) -> bool {
        self.target_page_address.is_some()
    }

    /// Append `src` at absolute address `dest` (spec §4.7).
    pub fn copy_to_rom<D: FlashDevice>(
        &mut self,
        device: &mut D,
        geometry: &Geometry,
        dest: u32,
        src: &[u8],
    ) -> Result<(), CoreError> {
        let size = src.len() as u32;
        if dest < geometry.kf_start() || dest >= geometry.kf_end() {
            return Err(CoreError::Placement);
        }
        if dest + size > geometry.kf_end() {
            return Err(CoreError::Placement);
        }
        if size > geometry.slot_size() {
            return Err(CoreError::Placement);
        }
        if geometry.slot_index_containing(dest) != geometry.slot_index_containing(dest + size) {
            return Err(CoreError::Placement);
        }

        if let Some(target) = self.target_page_address {
            match dest.checked_sub(target) {
                Some(new_offset)
                    if new_offset as usize > self.write_offset
                        && (new_offset as usize) < PAGE_SIZE =>
                {
                    self.write_offset = new_offset as usize;
                }
                Some(new_offset) if new_offset as usize == self.write_offset => {}
                _ => self.flush(device)?,
            }
        }

        let mut guard = ModeGuard::enter(device)?;
        self.write_loop(&mut guard, dest, src)
    }

    fn write_loop<D: FlashDevice>(
        &mut self,
        guard: &mut ModeGuard<'_, D>,
        mut dest: u32,
        src: &[u8],
    ) -> Result<(), CoreError> {
        let page_size = guard.page_size() as usize;
        let mut src_off = 0usize;
        let mut remaining = src.len();

        while remaining > 0 {
            let page_addr = guard.page_base(dest);
            let page_offset = (dest - page_addr) as usize;
            let chunk = core::cmp::min(page_size - page_offset, remaining);

            if self.target_page_address.is_none() {
                if page_offset != 0 {
                    guard.enable_memory_mapped_mode()?;
                    guard.read(page_addr, &mut self.buffer[..page_size]);
                    guard.disable_memory_mapped_mode()?;
                } else {
                    self.buffer[..page_size].fill(ERASED_BYTE);
                }
            }

            self.buffer[page_offset..page_offset + chunk]
                .copy_from_slice(&src[src_off..src_off + chunk]);

            if page_offset + chunk == page_size {
                guard.page_write(page_addr, &self.buffer[..page_size])?;
                self.target_page_address = None;
                self.write_offset = 0;
            } else {
                self.target_page_address = Some(page_addr);
                self.write_offset = page_offset + chunk;
            }

            dest += chunk as u32;
            src_off += chunk;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Commit a pending partial page, if any (spec §4.7 `flush_copy_to_rom`).
    pub fn flush<D: FlashDevice>(&mut self, device: &mut D) -> Result<(), CoreError> {
        let Some(target) = self.target_page_address else {
            return Ok(());
        };
        let page_size = device.page_size() as usize;
        let mut guard = ModeGuard::enter(device)?;
        guard.page_write(target, &self.buffer[..page_size])?;
        self.target_page_address = None;
        self.write_offset = 0;
        Ok(())
    }
}

impl Default for CopyEngine {
    fn default() -> Self {
        CopyEngine::new()
    }
}
