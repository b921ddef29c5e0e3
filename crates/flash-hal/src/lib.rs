//! Flash device contract for the dynamic feature allocator.
//!
//! This crate does not drive any real flash part. It defines the
//! [`flash::FlashDevice`] trait — the geometry queries, erase/program
//! operations and memory-mapped/programming mode toggle that `dynfeat`
//! consumes — plus [`flash::SimFlash`], an in-memory implementation of that
//! trait used by `dynfeat`'s own test suite and by any downstream integrator
//! that wants to exercise the allocator without real hardware.
#![warn(missing_docs)]

/// Flash device contract: geometry, erase/program, and mode toggle.
///
/// # Examples
///
/// Erasing a subsector and programming a page into a simulated device:
///
/// ```rust
/// use flash_hal::flash::{FlashDevice, SimFlash, ModeGuard};
///
/// let mut device = SimFlash::new(0x2000_0000, 4096 * 4, 256, 4096);
/// device.startup().unwrap();
/// {
///     let mut guard = ModeGuard::enter(&mut device).unwrap();
///     guard.erase_subsector(0x2000_0000).unwrap();
///     guard.page_write(0x2000_0000, &[0xCA, 0xFE]).unwrap();
/// }
/// assert!(device.is_memory_mapped());
/// ```
pub mod flash;
