//! The on-flash slot table: iteration, lookup, and repair-on-read (spec §4.3, §4.4, §4.8).

use crate::config::MAX_SUBSECTOR_SIZE;
use crate::copy::program_chunked;
use crate::error::CoreError;
use crate::geometry::Geometry;
use crate::header::{SlotHeader, SlotStatus, SLOT_HEADER_SIZE};
use flash_hal::flash::{FlashDevice, ModeGuard};

/// Process-wide caches derived from the slot table (spec §3.3): `nb_used`
/// and `last_feature_ptr`, rebuilt by [`AllocatorState::count_and_repair`]
/// and consulted (not refreshed) by lookups.
#[derive(Copy, Clone, Debug, Default)]
pub struct AllocatorState {
    nb_used: u32,
    last_feature_ptr: Option<u32>,
}

impl AllocatorState {
    /// A state with no cached counts; callers must run
    /// [`AllocatorState::count_and_repair`] before relying on it.
    pub fn new() -> AllocatorState {
        AllocatorState {
            nb_used: 0,
            last_feature_ptr: None,
        }
    }

    /// Record a freshly installed slot without a full re-scan, used by
    /// `allocate_feature` after it programs the new header (spec §4.5:
    /// "update `last_feature_ptr`, `nb_used += 1`").
    pub fn record_install(&mut self, slot_addr: u32) {
        self.last_feature_ptr = Some(slot_addr);
        self.nb_used += 1;
    }

    /// Record a removal without a full re-scan (spec §4.6: "decrement
    /// `nb_used`"). `last_feature_ptr` is left as-is; it is rebuilt by the
    /// next `count_and_repair`.
    pub fn record_removal(&mut self) {
        self.nb_used = self.nb_used.saturating_sub(1);
    }

    /// Cached count of `USED` slots, as of the last `count_and_repair` run.
    pub fn nb_used(&self) -> u32 {
        self.nb_used
    }

    /// Cached address of the most recently counted `USED` slot, if any.
    pub fn last_feature_ptr(&self) -> Option<u32> {
        self.last_feature_ptr
    }

    /// Read and decode the header at `slot_addr`. Memory-mapped mode only.
    pub fn read_header<D: FlashDevice>(device: &D, slot_addr: u32) -> SlotHeader {
        let mut bytes = [0u8; SLOT_HEADER_SIZE as usize];
        device.read(slot_addr, &mut bytes);
        SlotHeader::decode(&bytes)
    }

    /// Walk the table from slot 0, repairing any `USED` slot whose
    /// `feature_index` does not match its scan rank, and refresh the cached
    /// `nb_used`/`last_feature_ptr` (spec §4.4).
    ///
    /// On a repair failure the walk stops and the count reflects whatever was
    /// accepted before the failure, per the spec's "no other natural undo
    /// point" note (§9).
    pub fn count_and_repair<D: FlashDevice>(&mut self, device: &mut D, geometry: &Geometry) -> u32 {
        self.nb_used = 0;
        self.last_feature_ptr = None;

        for slot in 0..geometry.slot_count() {
            let addr = geometry.slot_address(slot);
            let header = Self::read_header(device, addr);
            match header.status() {
                SlotStatus::Used => {
                    if header.feature_index != self.nb_used {
                        if let Err(e) = Self::repair(device, addr, header, self.nb_used) {
                            log::error!(
                                "dynfeat: count_and_repair: repair of slot {:#x} failed: {}",
                                addr,
                                e
                            );
                            break;
                        }
                    }
                    self.last_feature_ptr = Some(addr);
                    self.nb_used += 1;
                }
                SlotStatus::Removed => continue,
                SlotStatus::Free => break,
            }
        }
        self.nb_used
    }

    fn repair<D: FlashDevice>(
        device: &mut D,
        slot_addr: u32,
        header: SlotHeader,
        new_index: u32,
    ) -> Result<(), CoreError> {
        let subsector_size = device.subsector_size() as usize;
        let mut scratch = [0u8; MAX_SUBSECTOR_SIZE];
        device.read(slot_addr, &mut scratch[..subsector_size]);

        let mut patched = header;
        patched.feature_index = new_index;
        scratch[0..SLOT_HEADER_SIZE as usize].copy_from_slice(&patched.encode());

        let mut guard = ModeGuard::enter(device)?;
        guard.erase_subsector(slot_addr)?;
        program_chunked(&mut guard, slot_addr, &scratch[..subsector_size])
    }

    /// Address of the `USED` slot whose `feature_index == index`, or `0` if
    /// `index` is out of range or the scan reaches a `FREE` slot first
    /// (spec §4.8).
    pub fn get_feature_handle<D: FlashDevice>(
        &self,
        device: &D,
        geometry: &Geometry,
        index: u32,
    ) -> u32 {
        if index >= self.nb_used {
            return 0;
        }
        for slot in 0..geometry.slot_count() {
            let addr = geometry.slot_address(slot);
            let header = Self::read_header(device, addr);
            match header.status() {
                SlotStatus::Used if header.feature_index == index => return addr,
                SlotStatus::Used | SlotStatus::Removed => continue,
                SlotStatus::Free => break,
            }
        }
        0
    }

    /// RAM window address of a `USED` slot, or `None` if `handle` is not a
    /// `USED` slot header — including when it isn't even a slot boundary,
    /// which is checked before the header is trusted at all (spec §4.8).
    pub fn feature_address_ram<D: FlashDevice>(
        device: &D,
        geometry: &Geometry,
        handle: u32,
    ) -> Option<u32> {
        if !geometry.is_slot_start(handle) {
            return None;
        }
        let header = Self::read_header(device, handle);
        (header.status() == SlotStatus::Used).then_some(header.ram_address)
    }

    /// ROM payload address of a `USED` slot, or `None` if `handle` is not a
    /// `USED` slot header — including when it isn't even a slot boundary,
    /// which is checked before the header is trusted at all (spec §4.8).
    pub fn feature_address_rom<D: FlashDevice>(
        device: &D,
        geometry: &Geometry,
        handle: u32,
    ) -> Option<u32> {
        if !geometry.is_slot_start(handle) {
            return None;
        }
        let header = Self::read_header(device, handle);
        (header.status() == SlotStatus::Used).then_some(header.rom_address)
    }

    /// First non-`USED` slot (`REMOVED` or `FREE`), along with its decoded
    /// header, scanning the whole table (spec §4.5). `None` if every slot is
    /// `USED`.
    pub fn find_free_or_removed<D: FlashDevice>(
        device: &D,
        geometry: &Geometry,
    ) -> Option<(u32, SlotHeader)> {
        for slot in 0..geometry.slot_count() {
            let addr = geometry.slot_address(slot);
            let header = Self::read_header(device, addr);
            if header.status() != SlotStatus::Used {
                return Some((addr, header));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram;
    use flash_hal::flash::SimFlash;
    use pretty_assertions::assert_eq;

    fn device() -> SimFlash {
        let mut d = SimFlash::new(0x1000_0000, 4096 * 4, 256, 4096);
        d.startup().unwrap();
        d
    }

    fn geometry(d: &SimFlash) -> Geometry {
        Geometry::new(d, 4, 0x2000_0000, 4096, 256).unwrap()
    }

    fn write_header<D: FlashDevice>(device: &mut D, addr: u32, header: SlotHeader) {
        let mut guard = ModeGuard::enter(device).unwrap();
        guard.erase_subsector(addr).unwrap();
        guard.page_write(addr, &header.encode()).unwrap();
    }

    #[test]
    fn count_stops_at_first_free_slot() {
        let mut d = device();
        let g = geometry(&d);
        let slot0 = g.slot_address(0);
        let slot1 = g.slot_address(1);
        write_header(&mut d, slot0, SlotHeader::new_used(1, slot0 + 32, 10, 0x2000_0000, 100, 0));
        write_header(&mut d, slot1, SlotHeader::new_used(1, slot1 + 32, 10, 0x2000_0100, 100, 1));

        let mut state = AllocatorState::new();
        let count = state.count_and_repair(&mut d, &g);
        assert_eq!(count, 2);
        assert_eq!(state.last_feature_ptr(), Some(slot1));
    }

    #[test]
    fn count_repairs_out_of_order_feature_index() {
        let mut d = device();
        let g = geometry(&d);
        let slot0 = g.slot_address(0);
        // feature_index is 5, should be repaired to 0 since it's the first USED slot seen.
        write_header(&mut d, slot0, SlotHeader::new_used(1, slot0 + 32, 10, 0x2000_0000, 100, 5));

        let mut state = AllocatorState::new();
        let count = state.count_and_repair(&mut d, &g);
        assert_eq!(count, 1);

        let repaired = AllocatorState::read_header(&d, slot0);
        assert_eq!(repaired.feature_index, 0);
    }

    #[test]
    fn removed_slots_are_skipped_without_stopping_the_scan() {
        let mut d = device();
        let g = geometry(&d);
        let slot0 = g.slot_address(0);
        let slot1 = g.slot_address(1);
        write_header(
            &mut d,
            slot0,
            SlotHeader::new_used(1, slot0 + 32, 10, 0x2000_0000, 100, 0).into_removed(),
        );
        write_header(&mut d, slot1, SlotHeader::new_used(1, slot1 + 32, 10, 0x2000_0100, 100, 0));

        let mut state = AllocatorState::new();
        let count = state.count_and_repair(&mut d, &g);
        assert_eq!(count, 1);
        assert_eq!(state.last_feature_ptr(), Some(slot1));
    }

    #[test]
    fn count_and_repair_stops_at_a_failed_repair_leaving_the_slot_unrepaired() {
        let mut d = device();
        let g = geometry(&d);
        let slot0 = g.slot_address(0);
        // feature_index 5 needs repair to 0 since it's the first USED slot seen.
        write_header(&mut d, slot0, SlotHeader::new_used(1, slot0 + 32, 10, 0x2000_0000, 100, 5));
        d.fail_next_erase();

        let mut state = AllocatorState::new();
        let count = state.count_and_repair(&mut d, &g);

        assert_eq!(count, 0);
        let unrepaired = AllocatorState::read_header(&d, slot0);
        assert_eq!(unrepaired.feature_index, 5);
    }

    #[test]
    fn get_feature_handle_returns_zero_for_out_of_range_index() {
        let mut d = device();
        let g = geometry(&d);
        let mut state = AllocatorState::new();
        state.count_and_repair(&mut d, &g);
        assert_eq!(state.get_feature_handle(&d, &g, 0), 0);
    }

    #[test]
    fn find_free_or_removed_returns_first_non_used_slot() {
        let mut d = device();
        let g = geometry(&d);
        let slot0 = g.slot_address(0);
        write_header(&mut d, slot0, SlotHeader::new_used(1, slot0 + 32, 10, 0x2000_0000, 100, 0));

        let (addr, header) = AllocatorState::find_free_or_removed(&d, &g).unwrap();
        assert_eq!(addr, g.slot_address(1));
        assert_eq!(header.status(), SlotStatus::Free);
    }

    #[test]
    fn ram_window_helper_agrees_with_table_state_for_first_allocation() {
        let d = device();
        let g = geometry(&d);
        let state = AllocatorState::new();
        let (_, candidate) = AllocatorState::find_free_or_removed(&d, &g).unwrap();
        let addr = ram::choose_window(
            state.last_feature_ptr().map(|p| AllocatorState::read_header(&d, p)).as_ref(),
            &candidate,
            500,
            g.ram_base(),
            g.ram_size(),
            g.ram_align(),
        )
        .unwrap();
        assert_eq!(addr, g.ram_base());
    }
}
