//! TTL specifications with optional jitter.
//!
//! A write either names an exact duration or a `{min, max}` range. Ranges are
//! resolved to one concrete duration per write, uniformly at random, so keys
//! written together do not all expire in the same instant.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Used when neither the write nor the configuration names a TTL.
pub const FALLBACK_TTL: Duration = Duration::from_millis(1000);

/// Expiry requested for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ttl {
    /// Exactly this long.
    Fixed(Duration),
    /// Uniformly random within the bounds. A missing bound collapses to the
    /// other one; with no bounds at all the caller's default applies.
    Range {
        min: Option<Duration>,
        max: Option<Duration>,
    },
}

impl Ttl {
    pub fn millis(ms: u64) -> Self {
        Ttl::Fixed(Duration::from_millis(ms))
    }

    pub fn range(min: Duration, max: Duration) -> Self {
        Ttl::Range {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn range_ms(min: u64, max: u64) -> Self {
        Self::range(Duration::from_millis(min), Duration::from_millis(max))
    }

    /// Inclusive bounds, or `None` for an empty range.
    pub fn bounds(&self) -> Option<(Duration, Duration)> {
        match *self {
            Ttl::Fixed(d) => Some((d, d)),
            Ttl::Range {
                min: Some(a),
                max: Some(b),
            } => Some((a.min(b), a.max(b))),
            Ttl::Range {
                min: Some(d),
                max: None,
            }
            | Ttl::Range {
                min: None,
                max: Some(d),
            } => Some((d, d)),
            Ttl::Range {
                min: None,
                max: None,
            } => None,
        }
    }

    /// Pick one concrete duration for a single write.
    pub fn resolve(&self, default: &Ttl) -> Duration {
        self.resolve_with(default, &mut rand::rng())
    }

    pub fn resolve_with<R: Rng>(&self, default: &Ttl, rng: &mut R) -> Duration {
        let (lo, hi) = self.effective_bounds(default);
        if lo == hi {
            return lo;
        }
        let ms = rng.random_range(lo.as_millis() as u64..=hi.as_millis() as u64);
        Duration::from_millis(ms)
    }

    /// The shortest duration [`resolve`](Self::resolve) can pick.
    ///
    /// Refresh periods are derived from this so no write outlives its ticks.
    pub fn shortest(&self, default: &Ttl) -> Duration {
        self.effective_bounds(default).0
    }

    fn effective_bounds(&self, default: &Ttl) -> (Duration, Duration) {
        self.bounds()
            .or_else(|| default.bounds())
            .unwrap_or((FALLBACK_TTL, FALLBACK_TTL))
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Ttl::Fixed(FALLBACK_TTL)
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        Ttl::Fixed(duration)
    }
}
