//! RAM window allocation (spec §4.5's RAM-window sub-rule).
//!
//! A pure decision function over already-read slot state, kept separate from
//! [`crate::table`] so the reuse-vs-bump-allocate choice can be tested
//! without a [`flash_hal::flash::FlashDevice`] in the loop, the same
//! separation the ancestor `eeprom` draws between `find_active` (read state)
//! and the arithmetic that follows.

use crate::error::CoreError;
use crate::header::{SlotHeader, SlotStatus};

/// Align `addr` up to the next multiple of `align`. `align` must be a power
/// of two; callers only ever pass [`crate::geometry::Geometry::ram_align`].
pub fn align_up(addr: u32, align: u32) -> u32 {
    let mask = align - 1;
    (addr + mask) & !mask
}

/// Decide the RAM window address for a new allocation (spec §4.5).
///
/// - `last_feature`: header of the slot recorded as `last_feature_ptr`, or
///   `None` if no feature is currently installed.
/// - `candidate`: header currently occupying the slot chosen for the new
///   allocation (status `Removed` or `Free`).
/// - `size_ram`: bytes requested for the new window.
/// - `ram_base`/`ram_size`/`ram_align`: the RAM window pool's bounds.
///
/// Returns [`CoreError::Capacity`] if the window would exceed the pool.
pub fn choose_window(
    last_feature: Option<&SlotHeader>,
    candidate: &SlotHeader,
    size_ram: u32,
    ram_base: u32,
    ram_size: u32,
    ram_align: u32,
) -> Result<u32, CoreError> {
    let last = match last_feature {
        None => return Ok(ram_base),
        Some(last) => last,
    };

    if candidate.status() == SlotStatus::Removed
        && candidate.ram_address >= ram_base
        && candidate.ram_address < ram_base + ram_size
        && candidate.ram_size >= size_ram
    {
        return Ok(candidate.ram_address);
    }

    let addr = align_up(last.ram_address + last.ram_size, ram_align);
    if addr > ram_base + ram_size - 1 {
        return Err(CoreError::Capacity);
    }
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn used(ram_address: u32, ram_size: u32) -> SlotHeader {
        SlotHeader::new_used(1, 0x1000_0020, 100, ram_address, ram_size, 0)
    }

    fn removed(ram_address: u32, ram_size: u32) -> SlotHeader {
        used(ram_address, ram_size).into_removed()
    }

    #[test]
    fn first_allocation_starts_at_pool_base() {
        let candidate = used(0, 0); // status irrelevant, no last feature yet
        let addr = choose_window(None, &candidate, 500, 0x2000_0000, 4096, 256).unwrap();
        assert_eq!(addr, 0x2000_0000);
    }

    #[test]
    fn removed_slot_with_big_enough_window_is_reused_exactly() {
        let last = used(0x2000_0000, 500);
        let candidate = removed(0x2000_0200, 1000);
        let addr = choose_window(Some(&last), &candidate, 800, 0x2000_0000, 4096, 256).unwrap();
        assert_eq!(addr, 0x2000_0200);
    }

    #[test]
    fn removed_slot_too_small_falls_through_to_bump_allocation() {
        let last = used(0x2000_0000, 500);
        let candidate = removed(0x2000_0200, 100); // smaller than requested
        let addr = choose_window(Some(&last), &candidate, 800, 0x2000_0000, 4096, 256).unwrap();
        assert_eq!(addr, align_up(0x2000_0000 + 500, 256));
    }

    #[test]
    fn free_candidate_bump_allocates_after_last_feature() {
        let last = used(0x2000_0000, 500);
        let candidate = SlotHeader::decode(&[0xFF; crate::header::SLOT_HEADER_SIZE as usize]);
        let addr = choose_window(Some(&last), &candidate, 200, 0x2000_0000, 4096, 256).unwrap();
        assert_eq!(addr, align_up(0x2000_0000 + 500, 256));
    }

    #[test]
    fn bump_allocation_past_pool_end_fails_with_capacity() {
        let last = used(0x2000_0000, 4000);
        let candidate = SlotHeader::decode(&[0xFF; crate::header::SLOT_HEADER_SIZE as usize]);
        let result = choose_window(Some(&last), &candidate, 200, 0x2000_0000, 4096, 256);
        assert_eq!(result, Err(CoreError::Capacity));
    }
}
