//! Bounded expiration for asserted presence.

use std::fmt;
use std::time::Duration;

use crate::error::{PresenceError, Result};

/// How long a published presence holds before the service reverts it.
///
/// Whole minutes between [`PresenceExpiry::MIN_MINUTES`] and
/// [`PresenceExpiry::MAX_MINUTES`]; rendered as an ISO-8601 duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PresenceExpiry {
    minutes: u32,
}

impl PresenceExpiry {
    pub const MIN_MINUTES: u32 = 5;
    pub const MAX_MINUTES: u32 = 240;
    pub const DEFAULT_MINUTES: u32 = 60;

    pub fn from_minutes(minutes: u32) -> Result<Self> {
        if (Self::MIN_MINUTES..=Self::MAX_MINUTES).contains(&minutes) {
            Ok(Self { minutes })
        } else {
            Err(PresenceError::InvalidExpiry(minutes))
        }
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.minutes) * 60)
    }

    /// `PT1H`, `PT5M`, `PT1H30M`
    pub fn to_iso8601(&self) -> String {
        let (hours, minutes) = (self.minutes / 60, self.minutes % 60);
        match (hours, minutes) {
            (0, m) => format!("PT{}M", m),
            (h, 0) => format!("PT{}H", h),
            (h, m) => format!("PT{}H{}M", h, m),
        }
    }
}

impl Default for PresenceExpiry {
    fn default() -> Self {
        Self {
            minutes: Self::DEFAULT_MINUTES,
        }
    }
}

impl fmt::Display for PresenceExpiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}
