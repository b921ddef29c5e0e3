//! The 32-byte slot header codec (spec §3.1, §4.2).
//!
//! Field-by-field `to_le_bytes`/`from_le_bytes` packing, the same style as
//! the ancestor `eeprom` item header: no serde, no zerocopy, because the
//! layout is part of the persisted contract and must not move if a derive
//! macro's output ever changed.

use crate::config::{FEATURE_REMOVED_MAGIC, FEATURE_USED_MAGIC};

/// Encoded size of a [`SlotHeader`] on flash.
pub const SLOT_HEADER_SIZE: u32 = 32;

/// Classification of a slot's `status` word (spec §3.1, §4.2).
///
/// `Free` is "anything that isn't one of the two magic constants" — never
/// tested as `== 0xFFFF_FFFF`, so an unerased-but-garbage word is still
/// correctly classified as free rather than mistaken for `Used`/`Removed`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotStatus {
    /// Slot holds a live, installed feature.
    Used,
    /// Slot held a feature that has been uninstalled; payload may be dirty.
    Removed,
    /// Slot has never been allocated, or was fully erased.
    Free,
}

impl SlotStatus {
    fn from_word(word: u32) -> SlotStatus {
        if word == FEATURE_USED_MAGIC {
            SlotStatus::Used
        } else if word == FEATURE_REMOVED_MAGIC {
            SlotStatus::Removed
        } else {
            SlotStatus::Free
        }
    }

    fn to_word(self) -> u32 {
        match self {
            SlotStatus::Used => FEATURE_USED_MAGIC,
            SlotStatus::Removed => FEATURE_REMOVED_MAGIC,
            // A header is never encoded directly as `Free`; `allocate`
            // reclaims a free slot by erasing it, not by writing a header.
            SlotStatus::Free => 0xFFFF_FFFF,
        }
    }
}

/// The 32-byte slot header persisted at the start of every slot (spec §3.1).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlotHeader {
    status: u32,
    /// Subsectors spanned by the slot's ROM footprint.
    pub nb_subsectors: u32,
    /// Absolute address of the payload (slot start + 32).
    pub rom_address: u32,
    /// Payload byte count requested at allocation.
    pub rom_size: u32,
    /// Absolute address of the RAM window.
    pub ram_address: u32,
    /// RAM window byte count.
    pub ram_size: u32,
    /// Dense index in `[0, nb_used)` assigned on install.
    pub feature_index: u32,
    /// Padding; carried through unchanged, never interpreted.
    pub reserved: u32,
}

impl SlotHeader {
    /// Build a fresh header for a newly allocated slot.
    pub fn new_used(
        nb_subsectors: u32,
        rom_address: u32,
        rom_size: u32,
        ram_address: u32,
        ram_size: u32,
        feature_index: u32,
    ) -> SlotHeader {
        SlotHeader {
            status: SlotStatus::Used.to_word(),
            nb_subsectors,
            rom_address,
            rom_size,
            ram_address,
            ram_size,
            feature_index,
            reserved: 0xFFFF_FFFF,
        }
    }

    /// Current status classification.
    pub fn status(&self) -> SlotStatus {
        SlotStatus::from_word(self.status)
    }

    /// Reclassify this header as `REMOVED`, per §4.6: `nb_subsectors` is
    /// reset to 1 since only the header subsector is rewritten, the rest of
    /// the fields (notably `ram_address`/`ram_size`, needed by the reuse
    /// rule in §4.5) are left as they were.
    pub fn into_removed(mut self) -> SlotHeader {
        self.status = SlotStatus::Removed.to_word();
        self.nb_subsectors = 1;
        self
    }

    /// Field-by-field little-endian encode into a 32-byte page-sized buffer.
    pub fn encode(&self) -> [u8; SLOT_HEADER_SIZE as usize] {
        let mut out = [0u8; SLOT_HEADER_SIZE as usize];
        out[0..4].copy_from_slice(&self.status.to_le_bytes());
        out[4..8].copy_from_slice(&self.nb_subsectors.to_le_bytes());
        out[8..12].copy_from_slice(&self.rom_address.to_le_bytes());
        out[12..16].copy_from_slice(&self.rom_size.to_le_bytes());
        out[16..20].copy_from_slice(&self.ram_address.to_le_bytes());
        out[20..24].copy_from_slice(&self.ram_size.to_le_bytes());
        out[24..28].copy_from_slice(&self.feature_index.to_le_bytes());
        out[28..32].copy_from_slice(&self.reserved.to_le_bytes());
        out
    }

    /// Field-by-field little-endian decode. Tolerates any bit pattern: a
    /// non-`USED` header's payload fields are not validated here, only
    /// classified by [`SlotHeader::status`].
    pub fn decode(bytes: &[u8; SLOT_HEADER_SIZE as usize]) -> SlotHeader {
        let word = |r: core::ops::Range<usize>| -> u32 {
            u32::from_le_bytes(bytes[r].try_into().unwrap())
        };
        SlotHeader {
            status: word(0..4),
            nb_subsectors: word(4..8),
            rom_address: word(8..12),
            rom_size: word(12..16),
            ram_address: word(16..20),
            ram_size: word(20..24),
            feature_index: word(24..28),
            reserved: word(28..32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_through_encode_decode() {
        let h = SlotHeader::new_used(2, 0x1000_0020, 1000, 0x2000_0000, 500, 3);
        let decoded = SlotHeader::decode(&h.encode());
        assert_eq!(h, decoded);
        assert_eq!(decoded.status(), SlotStatus::Used);
    }

    #[test]
    fn erased_pattern_classifies_as_free() {
        let bytes = [0xFFu8; SLOT_HEADER_SIZE as usize];
        let h = SlotHeader::decode(&bytes);
        assert_eq!(h.status(), SlotStatus::Free);
    }

    #[test]
    fn zeroed_garbage_classifies_as_free_not_used() {
        let bytes = [0u8; SLOT_HEADER_SIZE as usize];
        let h = SlotHeader::decode(&bytes);
        assert_eq!(h.status(), SlotStatus::Free);
    }

    #[test]
    fn into_removed_preserves_ram_fields_and_resets_subsectors() {
        let h = SlotHeader::new_used(5, 0x1000_0020, 1000, 0x2000_0000, 500, 3);
        let removed = h.into_removed();
        assert_eq!(removed.status(), SlotStatus::Removed);
        assert_eq!(removed.nb_subsectors, 1);
        assert_eq!(removed.ram_address, 0x2000_0000);
        assert_eq!(removed.ram_size, 500);
    }
}
