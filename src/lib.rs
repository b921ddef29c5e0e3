//! Flash-backed dynamic feature allocator for an embedded sandboxed VM.
//!
//! `dynfeat` owns the persistent slot table that records which features are
//! installed in a reserved region of flash, the bump allocator for the RAM
//! windows paired with each feature, and the page-buffered engine that
//! streams feature payloads into flash under the device's erase/program
//! constraints. It does not drive a real flash part — see
//! [`flash_hal::flash::FlashDevice`] for the contract an integrator
//! implements, and [`flash_hal::flash::SimFlash`] for the in-memory stand-in
//! this crate tests against.
#![no_std]
#![warn(missing_docs)]

#[cfg(test)]
extern crate std;

pub mod config;
pub mod copy;
pub mod error;
pub mod geometry;
pub mod header;
pub mod ram;
pub mod store;
pub mod table;

pub use error::{CoreError, Status};
pub use geometry::Geometry;
pub use header::{SlotHeader, SlotStatus};
pub use store::{FeatureStore, InitErrorCode};
