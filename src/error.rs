//! Error taxonomy shared by every lookup structure.
//!
//! Each variant names one distinct failure mode (bad alignment, a buffer
//! too small, an invalid key or value, ...). There is no `Success`
//! variant: absence of an `Err` is success.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by arena placement, compilation, and deserialization.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The supplied buffer is not aligned to the structure's required
    /// alignment (8 bytes for most structures, 64 bytes for the domain set
    /// and the 64-bit map).
    #[error("buffer is not aligned to the required boundary")]
    BadAlignment,

    /// The supplied buffer is smaller than the size computed by `size_for`.
    #[error("buffer is too small for this structure")]
    SmallPlace,

    /// The number of input elements is zero.
    #[error("no input elements were supplied")]
    NoMasks,

    /// A key, value, or pattern violates a structural invariant (zero key,
    /// zero value, sentinel value, duplicate key, invalid character, wrong
    /// magic).
    #[error("invalid value")]
    BadValue,

    /// A CIDR prefix is out of `[1, 32]` or has non-zero bits below the
    /// prefix length.
    #[error("invalid CIDR range")]
    BadRange,

    /// A sizing argument (capacity, speed) is invalid.
    #[error("invalid size argument")]
    BadSize,

    /// The domain set's popular-suffix set exceeded its 256-entry cap.
    #[error("too many popular domains")]
    TooManyPopularDomains,

    /// Calibration exhausted its attempt budget without finding a
    /// collision-free hash function / table size.
    #[error("failed to calibrate hash table")]
    FailedToCalibrate,

    /// A domain pattern has no label separator (`.`); the fast suffix-match
    /// path does not support top-level-only domains.
    #[error("top-level domains are not supported")]
    TopLevelDomain,
}
