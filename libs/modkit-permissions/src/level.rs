use std::fmt;

use serde::{Deserialize, Serialize};

/// An ordinal access level.
///
/// The engine only orders and clamps levels; what a given level allows is
/// up to the application (e.g. `READ = 1`, `WRITE = 2`, `OWNER = 8`).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Permission(u16);

impl Permission {
    /// No access.
    pub const NONE: Self = Self(0);

    #[must_use]
    pub const fn new(level: u16) -> Self {
        Self(level)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Storage representation.
    #[inline]
    #[must_use]
    pub(crate) fn to_stored(self) -> i32 {
        i32::from(self.0)
    }

    /// Reads a stored integer, saturating values written out-of-band.
    #[must_use]
    pub(crate) fn from_stored(value: i32) -> Self {
        Self(u16::try_from(value.max(0)).unwrap_or(u16::MAX))
    }
}

impl From<u16> for Permission {
    fn from(level: u16) -> Self {
        Self(level)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
