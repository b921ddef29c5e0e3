//! Compile-time geometry and magic constants (spec §6.4).
//!
//! Mirrors how the ancestor `eeprom::EEPROM::new_default` resolved
//! `_eeprom_start`/`_page_size`/`_eeprom_pages` from linker-injected symbols:
//! under the `default-config` feature, [`max_dynamic_features`] resolves
//! `_max_dynamic_features` the same way (the symbol's *address*, not its
//! contents, carries the value). Without the feature, callers pass the
//! equivalent value to [`crate::store::FeatureStore::new`] explicitly.

/// Byte value of an erased flash cell.
pub use flash_hal::flash::ERASED_BYTE;

/// Size of one page buffer the copy engine and repair path operate on.
/// The default device contract geometry (spec §6.4) fixes this at 256; a
/// `FlashDevice` whose `page_size()` exceeds this bound is unsupported.
pub const PAGE_SIZE: usize = 256;

/// Upper bound on subsector size used for the repair-path scratch buffer.
/// The default device contract geometry (spec §6.4) fixes this at 4096; a
/// `FlashDevice` whose `subsector_size()` exceeds this bound is unsupported.
pub const MAX_SUBSECTOR_SIZE: usize = 4096;

/// Default RAM window pool size (spec §6.4).
pub const DEFAULT_RAM_BUFFER_SIZE: u32 = 102_400;

/// Default RAM window alignment (spec §6.4).
pub const DEFAULT_RAM_ALIGN: u32 = 256;

/// Status magic marking a slot as holding a live, installed feature.
pub const FEATURE_USED_MAGIC: u32 = u32::from_be_bytes(*b"USED");

/// Status magic marking a slot as holding a reclaimable, uninstalled feature.
pub const FEATURE_REMOVED_MAGIC: u32 = u32::from_be_bytes(*b"RMVD");

#[cfg(feature = "default-config")]
extern "C" {
    #[link_name = "_max_dynamic_features"]
    static MAX_DYNAMIC_FEATURES: u32;
}

/// Read the link-time maximum feature count (spec §6.1).
///
/// # Safety
/// Requires a linker script defining `_max_dynamic_features` whose *address*
/// (not contents) is the desired count, same convention as `eeprom`'s
/// `_eeprom_pages` symbol.
#[cfg(feature = "default-config")]
pub fn max_dynamic_features() -> u32 {
    unsafe { &MAX_DYNAMIC_FEATURES as *const u32 as u32 }
}
