//! Query coordinates on the (version, correction) plane.
//!
//! # Invariants
//! - "Latest" on either axis is resolved once per logical operation via
//!   [`VersionCorrection::with_latest_fixed`]; storage queries only accept
//!   the resulting [`FixedVersionCorrection`].
//! - Version and correction intervals are half-open: `[from, to)`.

use crate::clock::Instant;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Query coordinate; `None` on an axis means "latest".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionCorrection {
    pub version_as_of: Option<Instant>,
    pub corrected_to: Option<Instant>,
}

/// Coordinate with both axes pinned to concrete instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedVersionCorrection {
    pub version_as_of: Instant,
    pub corrected_to: Instant,
}

impl VersionCorrection {
    pub const LATEST: Self = Self {
        version_as_of: None,
        corrected_to: None,
    };

    pub fn of(version_as_of: Option<Instant>, corrected_to: Option<Instant>) -> Self {
        Self {
            version_as_of,
            corrected_to,
        }
    }

    pub fn of_version_as_of(version_as_of: Instant) -> Self {
        Self::of(Some(version_as_of), None)
    }

    pub fn of_corrected_to(corrected_to: Instant) -> Self {
        Self::of(None, Some(corrected_to))
    }

    pub fn contains_latest(&self) -> bool {
        self.version_as_of.is_none() || self.corrected_to.is_none()
    }

    /// Pins every "latest" axis to `now`.
    pub fn with_latest_fixed(&self, now: Instant) -> FixedVersionCorrection {
        FixedVersionCorrection {
            version_as_of: self.version_as_of.unwrap_or(now),
            corrected_to: self.corrected_to.unwrap_or(now),
        }
    }
}

impl FixedVersionCorrection {
    pub fn new(version_as_of: Instant, corrected_to: Instant) -> Self {
        Self {
            version_as_of,
            corrected_to,
        }
    }

    /// True when `[ver_from, ver_to) x [corr_from, corr_to)` contains this point.
    pub fn matches(
        &self,
        ver_from: Instant,
        ver_to: Option<Instant>,
        corr_from: Instant,
        corr_to: Option<Instant>,
    ) -> bool {
        ver_from <= self.version_as_of
            && ver_to.map_or(true, |to| self.version_as_of < to)
            && corr_from <= self.corrected_to
            && corr_to.map_or(true, |to| self.corrected_to < to)
    }
}

impl From<FixedVersionCorrection> for VersionCorrection {
    fn from(value: FixedVersionCorrection) -> Self {
        Self::of(Some(value.version_as_of), Some(value.corrected_to))
    }
}

impl Display for VersionCorrection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let version = self
            .version_as_of
            .map_or_else(|| "LATEST".to_string(), |instant| instant.to_rfc3339());
        let correction = self
            .corrected_to
            .map_or_else(|| "LATEST".to_string(), |instant| instant.to_rfc3339());
        write!(f, "V{version}.C{correction}")
    }
}

#[cfg(test)]
mod tests {
    use super::{FixedVersionCorrection, VersionCorrection};
    use crate::clock::{Clock, SteppingClock};

    #[test]
    fn latest_is_fixed_to_one_instant() {
        let clock = SteppingClock::starting_2020();
        let now = clock.now();
        let fixed = VersionCorrection::LATEST.with_latest_fixed(now);
        assert_eq!(fixed.version_as_of, now);
        assert_eq!(fixed.corrected_to, now);
    }

    #[test]
    fn explicit_axes_survive_fixing() {
        let clock = SteppingClock::starting_2020();
        let earlier = clock.now();
        let now = clock.now();
        let vc = VersionCorrection::of_corrected_to(earlier);
        assert!(vc.contains_latest());
        let fixed = vc.with_latest_fixed(now);
        assert_eq!(fixed.version_as_of, now);
        assert_eq!(fixed.corrected_to, earlier);
    }

    #[test]
    fn matches_uses_half_open_intervals() {
        let clock = SteppingClock::starting_2020();
        let t0 = clock.now();
        let t1 = clock.now();
        let at_t0 = FixedVersionCorrection::new(t0, t0);
        let at_t1 = FixedVersionCorrection::new(t1, t1);

        assert!(at_t0.matches(t0, Some(t1), t0, None));
        assert!(!at_t1.matches(t0, Some(t1), t0, None));
        assert!(at_t1.matches(t0, None, t0, None));
        assert!(!at_t0.matches(t1, None, t1, None));
    }
}
