//! The public API façade (spec §6.2): six operations over a [`FlashDevice`],
//! plus the host-invoked initialization-error hook (§4.9).
//!
//! Handles and destinations cross this boundary as `i32`, literal sentinels
//! and all, the same as the ancestor's C-shaped surface: `0` means "no
//! handle", `-1` a pre-check rejection. Everything behind the façade works
//! in `u32` addresses and `Result`/`Option`.

use crate::config::{self, ERASED_BYTE, PAGE_SIZE};
use crate::copy::CopyEngine;
use crate::error::{CoreError, Status};
use crate::geometry::Geometry;
use crate::header::{SlotHeader, SlotStatus, SLOT_HEADER_SIZE};
use crate::ram;
use crate::table::AllocatorState;
use flash_hal::flash::{FlashDevice, ModeGuard};

/// Classification passed to [`FeatureStore::on_feature_initialization_error`]
/// (spec §4.9).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InitErrorCode {
    /// The feature's content failed a content check.
    CorruptedContent,
    /// The feature targets a kernel UID this build does not provide.
    IncompatibleKernelWrongUid,
    /// The feature's linked addresses do not match this kernel's layout.
    IncompatibleKernelWrongAddresses,
    /// Any other cause; logged, slot left intact.
    Other(u32),
}

fn handle_to_addr(handle: i32) -> Option<u32> {
    if handle == 0 {
        None
    } else {
        Some(handle as u32)
    }
}

/// The flash-backed dynamic feature allocator (spec §2, §6.2).
pub struct FeatureStore<D: FlashDevice> {
    device: D,
    geometry: Geometry,
    state: AllocatorState,
    copy: CopyEngine,
}

impl<D: FlashDevice> FeatureStore<D> {
    /// Start up `device` and derive geometry for `max_features` slots over a
    /// RAM window pool of `ram_size` bytes at `ram_base`, aligned to
    /// `ram_align`. Fails with [`CoreError::Configuration`] if
    /// `max_features == 0`.
    pub fn new(
        mut device: D,
        max_features: u32,
        ram_base: u32,
        ram_size: u32,
        ram_align: u32,
    ) -> Result<FeatureStore<D>, CoreError> {
        device.startup()?;
        let geometry = Geometry::new(&device, max_features, ram_base, ram_size, ram_align)?;
        Ok(FeatureStore {
            device,
            geometry,
            state: AllocatorState::new(),
            copy: CopyEngine::new(),
        })
    }

    /// Same as [`FeatureStore::new`], but with the RAM window pool sized and
    /// aligned to the spec's defaults (§6.4: `DEFAULT_RAM_BUFFER_SIZE`,
    /// `DEFAULT_RAM_ALIGN`) instead of caller-supplied ones.
    pub fn new_with_default_ram(
        device: D,
        max_features: u32,
        ram_base: u32,
    ) -> Result<FeatureStore<D>, CoreError> {
        Self::new(
            device,
            max_features,
            ram_base,
            config::DEFAULT_RAM_BUFFER_SIZE,
            config::DEFAULT_RAM_ALIGN,
        )
    }

    /// Borrow the underlying device (test/diagnostic use).
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Derived geometry in effect for this store.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Re-scan the table, repairing dense indices as needed, and return the
    /// refreshed count of `USED` slots (spec §4.4).
    pub fn allocated_features_count(&mut self) -> u32 {
        self.state.count_and_repair(&mut self.device, &self.geometry)
    }

    /// Address of the `USED` slot at dense index `i`, or `0` (spec §4.8).
    pub fn get_feature_handle(&self, i: i32) -> i32 {
        if i < 0 {
            return 0;
        }
        self.state.get_feature_handle(&self.device, &self.geometry, i as u32) as i32
    }

    /// RAM window address of a `USED` slot, or `None` (spec §4.8).
    pub fn feature_address_ram(&self, handle: i32) -> Option<i32> {
        let addr = handle_to_addr(handle)?;
        AllocatorState::feature_address_ram(&self.device, &self.geometry, addr).map(|a| a as i32)
    }

    /// ROM payload address of a `USED` slot, or `None` (spec §4.8).
    pub fn feature_address_rom(&self, handle: i32) -> Option<i32> {
        let addr = handle_to_addr(handle)?;
        AllocatorState::feature_address_rom(&self.device, &self.geometry, addr).map(|a| a as i32)
    }

    /// Reserve a slot for a new feature of `size_rom` ROM bytes and
    /// `size_ram` RAM bytes (spec §4.5).
    ///
    /// Returns `-1` if a pre-check fails (misconfiguration, oversize
    /// request), `0` if no slot or RAM window is available or a flash
    /// operation fails, otherwise the new slot's handle.
    pub fn allocate_feature(&mut self, size_rom: u32, size_ram: u32) -> i32 {
        if self.geometry.slot_count() == 0 {
            log::error!("dynfeat: allocate_feature: misconfigured, max_features == 0");
            return -1;
        }
        if size_rom + SLOT_HEADER_SIZE > self.geometry.slot_size() {
            log::error!(
                "dynfeat: allocate_feature: rom size {} exceeds slot capacity",
                size_rom
            );
            return -1;
        }
        if size_ram > self.geometry.ram_size() {
            log::error!(
                "dynfeat: allocate_feature: ram size {} exceeds pool capacity",
                size_ram
            );
            return -1;
        }

        self.state.count_and_repair(&mut self.device, &self.geometry);

        let Some((slot_addr, candidate)) =
            AllocatorState::find_free_or_removed(&self.device, &self.geometry)
        else {
            log::warn!("dynfeat: allocate_feature: no free or removed slot available");
            return 0;
        };

        let last_header = self
            .state
            .last_feature_ptr()
            .map(|addr| AllocatorState::read_header(&self.device, addr));
        let ram_addr = match ram::choose_window(
            last_header.as_ref(),
            &candidate,
            size_ram,
            self.geometry.ram_base(),
            self.geometry.ram_size(),
            self.geometry.ram_align(),
        ) {
            Ok(addr) => addr,
            Err(e) => {
                log::warn!("dynfeat: allocate_feature: {}", e);
                return 0;
            }
        };

        let rom_address = slot_addr + SLOT_HEADER_SIZE;
        let subsector_size = self.device.subsector_size();
        let end = rom_address + size_rom;

        let erased: Result<u32, CoreError> = (|| {
            let mut guard = ModeGuard::enter(&mut self.device)?;
            let mut addr = slot_addr;
            let mut count = 0u32;
            while addr < end {
                guard.erase_subsector(addr)?;
                addr += subsector_size;
                count += 1;
            }
            Ok(count)
        })();
        let nb_subsectors = match erased {
            Ok(n) => n,
            Err(e) => {
                log::error!("dynfeat: allocate_feature: erase failed: {}", e);
                return 0;
            }
        };

        let header = SlotHeader::new_used(
            nb_subsectors,
            rom_address,
            size_rom,
            ram_addr,
            size_ram,
            self.state.nb_used(),
        );
        let mut page = [ERASED_BYTE; PAGE_SIZE];
        page[..SLOT_HEADER_SIZE as usize].copy_from_slice(&header.encode());

        let programmed: Result<(), CoreError> = (|| {
            let mut guard = ModeGuard::enter(&mut self.device)?;
            let page_len = guard.page_size() as usize;
            guard.page_write(slot_addr, &page[..page_len])?;
            Ok(())
        })();
        if let Err(e) = programmed {
            log::error!("dynfeat: allocate_feature: header program failed: {}", e);
            return 0;
        }

        self.state.record_install(slot_addr);
        slot_addr as i32
    }

    /// Uninstall the feature at `handle` (spec §4.6). A no-op, silently, if
    /// `handle` does not reference a `USED` slot.
    pub fn free_feature(&mut self, handle: i32) {
        let Some(addr) = handle_to_addr(handle) else {
            return;
        };
        let header = AllocatorState::read_header(&self.device, addr);
        if header.status() != SlotStatus::Used {
            return;
        }
        let removed = header.into_removed();
        let mut page = [ERASED_BYTE; PAGE_SIZE];
        page[..SLOT_HEADER_SIZE as usize].copy_from_slice(&removed.encode());

        let result: Result<(), CoreError> = (|| {
            let mut guard = ModeGuard::enter(&mut self.device)?;
            guard.erase_subsector(addr)?;
            let page_len = guard.page_size() as usize;
            guard.page_write(addr, &page[..page_len])?;
            Ok(())
        })();

        match result {
            Ok(()) => self.state.record_removal(),
            Err(e) => log::error!("dynfeat: free_feature: {}", e),
        }
    }

    /// Append `src` into flash at absolute address `dest` (spec §4.7).
    pub fn copy_to_rom(&mut self, dest: i32, src: &[u8]) -> Status {
        let addr = dest as u32;
        let result = self
            .copy
            .copy_to_rom(&mut self.device, &self.geometry, addr, src);
        if let Err(e) = &result {
            log::error!("dynfeat: copy_to_rom: {}", e);
        }
        result.into()
    }

    /// Commit any pending partially-filled page (spec §4.7).
    pub fn flush_copy_to_rom(&mut self) -> Status {
        let result = self.copy.flush(&mut self.device);
        if let Err(e) = &result {
            log::error!("dynfeat: flush_copy_to_rom: {}", e);
        }
        result.into()
    }

    /// Host-invoked hook for a failed feature initialization (spec §4.9).
    /// `CorruptedContent`, `IncompatibleKernelWrongUid`, and
    /// `IncompatibleKernelWrongAddresses` reclaim the slot; other codes are
    /// only logged. Always returns `Status::Ok`.
    pub fn on_feature_initialization_error(&mut self, handle: i32, code: InitErrorCode) -> Status {
        match code {
            InitErrorCode::CorruptedContent
            | InitErrorCode::IncompatibleKernelWrongUid
            | InitErrorCode::IncompatibleKernelWrongAddresses => {
                log::warn!(
                    "dynfeat: on_feature_initialization_error: reclaiming handle={:#x} code={:?}",
                    handle,
                    code
                );
                self.free_feature(handle);
            }
            InitErrorCode::Other(raw) => {
                log::warn!(
                    "dynfeat: on_feature_initialization_error: handle={:#x} code=Other({})",
                    handle,
                    raw
                );
            }
        }
        Status::Ok
    }
}
