//! Slot geometry (spec §4.1) and the cached, per-device layout it is derived into.

use crate::error::CoreError;
use flash_hal::flash::FlashDevice;

/// `floor(region_subsectors / max_features) * subsector_size`. Zero if
/// `max_features` is zero.
pub fn slot_size(region_subsectors: u32, subsector_size: u32, max_features: u32) -> u32 {
    if max_features == 0 {
        return 0;
    }
    (region_subsectors / max_features) * subsector_size
}

/// `floor(region_size / slot_size)`. Zero if `slot_size` is zero.
pub fn slot_count(region_size: u32, slot_size: u32) -> u32 {
    if slot_size == 0 {
        0
    } else {
        region_size / slot_size
    }
}

/// Largest payload a slot can hold once the header is subtracted.
pub fn payload_max(slot_size: u32, header_size: u32) -> u32 {
    slot_size.saturating_sub(header_size)
}

/// Cached layout derived once from device geometry, `max_features`, and the
/// RAM window pool bounds (spec's "process-wide caches" note in §9: encapsulate
/// behind a type with explicit refresh rather than free variables).
#[derive(Copy, Clone, Debug)]
pub struct Geometry {
    kf_start: u32,
    kf_end: u32,
    slot_size: u32,
    slot_count: u32,
    ram_base: u32,
    ram_size: u32,
    ram_align: u32,
}

impl Geometry {
    /// Derive a `Geometry` from a device's reported bounds, the link-time
    /// feature cap, and the RAM window pool bounds. Fails with
    /// [`CoreError::Configuration`] if `max_features == 0`.
    pub fn new<D: FlashDevice>(
        device: &D,
        max_features: u32,
        ram_base: u32,
        ram_size: u32,
        ram_align: u32,
    ) -> Result<Geometry, CoreError> {
        if max_features == 0 {
            return Err(CoreError::Configuration);
        }
        let kf_start = device.kf_start();
        let kf_end = device.kf_end();
        let region_size = kf_end - kf_start;
        let region_subsectors = region_size / device.subsector_size();
        let slot_size = slot_size(region_subsectors, device.subsector_size(), max_features);
        let slot_count = slot_count(region_size, slot_size);
        Ok(Geometry {
            kf_start,
            kf_end,
            slot_size,
            slot_count,
            ram_base,
            ram_size,
            ram_align,
        })
    }

    /// First address of the reserved feature region.
    pub fn kf_start(&self) -> u32 {
        self.kf_start
    }

    /// One past the last address of the reserved feature region.
    pub fn kf_end(&self) -> u32 {
        self.kf_end
    }

    /// Uniform byte size of every slot.
    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    /// Number of slots in the region.
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Largest ROM payload a slot can hold.
    pub fn payload_max(&self, header_size: u32) -> u32 {
        payload_max(self.slot_size, header_size)
    }

    /// Base address of the slot at index `k`.
    pub fn slot_address(&self, k: u32) -> u32 {
        self.kf_start + k * self.slot_size
    }

    /// Whether `addr` is the start address of a slot within the region.
    pub fn is_slot_start(&self, addr: u32) -> bool {
        if addr < self.kf_start || addr >= self.kf_end || self.slot_size == 0 {
            return false;
        }
        (addr - self.kf_start) % self.slot_size == 0
    }

    /// Which slot index contains `addr`, if any (used by the copy engine to
    /// reject destinations that would cross a slot boundary).
    pub fn slot_index_containing(&self, addr: u32) -> Option<u32> {
        if addr < self.kf_start || addr > self.kf_end || self.slot_size == 0 {
            return None;
        }
        Some((addr - self.kf_start) / self.slot_size)
    }

    /// Base address of the RAM window pool.
    pub fn ram_base(&self) -> u32 {
        self.ram_base
    }

    /// One past the last address of the RAM window pool.
    pub fn ram_end(&self) -> u32 {
        self.ram_base + self.ram_size
    }

    /// Total size of the RAM window pool.
    pub fn ram_size(&self) -> u32 {
        self.ram_size
    }

    /// Alignment required of every RAM window.
    pub fn ram_align(&self) -> u32 {
        self.ram_align
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn zero_max_features_yields_zero_slot_size() {
        assert_eq!(slot_size(1024, 4096, 0), 0);
    }

    #[test]
    fn slot_size_floors_to_whole_subsectors() {
        // 4MiB block / 4096 subsector = 1024 subsectors; 1024 / 4 features = 256 subsectors/slot.
        assert_eq!(slot_size(1024, 4096, 4), 256 * 4096);
    }

    #[test]
    fn payload_max_subtracts_header() {
        assert_eq!(payload_max(4096, 32), 4064);
    }
}
