//! Error taxonomy (spec §7).
//!
//! Shaped like the ancestor `stm32_hal::flash::FlashError`: a plain
//! `Copy`/`Clone`/`Debug` enum consumed through `Result`, with a hand-written
//! `Display` rather than `std::error::Error` since this crate is `no_std`.

use core::fmt;
use flash_hal::flash::DeviceError;

/// Failure taxonomy for the allocator's internal operations (spec §7).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoreError {
    /// `max_features == 0`; the allocator has no usable slots.
    Configuration,
    /// Requested ROM or RAM size exceeds its bound.
    SizeExceeded,
    /// No free slot, or the RAM pool would overflow.
    Capacity,
    /// Destination outside the reserved region, or a call crossed a slot boundary.
    Placement,
    /// The flash driver reported an erase or program failure.
    Device(DeviceError),
    /// The handle does not point at a `USED` slot.
    State,
}

impl From<DeviceError> for CoreError {
    fn from(e: DeviceError) -> Self {
        CoreError::Device(e)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Configuration => write!(f, "allocator misconfigured (max_features == 0)"),
            CoreError::SizeExceeded => write!(f, "requested size exceeds slot or RAM pool bound"),
            CoreError::Capacity => write!(f, "no free slot, or RAM pool exhausted"),
            CoreError::Placement => write!(f, "destination outside reserved region or crosses a slot boundary"),
            CoreError::Device(e) => write!(f, "flash device error: {:?}", e),
            CoreError::State => write!(f, "handle does not reference a USED slot"),
        }
    }
}

/// The `OK`/`ERROR` sentinel the façade returns for `copy_to_rom` and
/// `flush_copy_to_rom` (spec §6.2), kept distinct from `CoreError` because
/// those two operations never report *why* they failed to the caller, only
/// *that* they did (the reason is logged, per §7's propagation policy).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// Operation succeeded.
    Ok,
    /// Operation failed; the cause was logged.
    Error,
}

impl<T> From<Result<T, CoreError>> for Status {
    fn from(result: Result<T, CoreError>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(_) => Status::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_converts_into_core_error() {
        let err: CoreError = DeviceError::Erase.into();
        assert_eq!(err, CoreError::Device(DeviceError::Erase));
    }

    #[test]
    fn status_from_result() {
        let ok: Status = Ok::<(), CoreError>(()).into();
        let err: Status = Err::<(), CoreError>(CoreError::Capacity).into();
        assert_eq!(ok, Status::Ok);
        assert_eq!(err, Status::Error);
    }
}
