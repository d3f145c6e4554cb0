//! Routing-decision and congestion-monitoring engine for a leaf-spine fabric.
//!
//! Static ECMP tables come from [`planner`], adaptive per-flowlet decisions from
//! [`selector`], and the measurements used to compare the two from [`monitor`],
//! [`fct`] and [`analysis`].

pub mod error;
pub use error::{Error, Result};

pub mod bandwidth;
pub mod topology;

pub mod planner;

pub mod counters;
pub mod timer;

pub mod fct;
pub mod monitor;
pub mod stats;

pub mod congestion;
pub mod flowlet;
pub mod selector;

pub mod analysis;
pub mod report;

pub mod config;
pub mod experiment;

// nanoseconds
pub type Timestamp = u64;
pub type Duration = u64;

pub trait ToNanos {
    fn to_nanos(self) -> Duration;
}

impl ToNanos for std::time::Duration {
    #[inline]
    fn to_nanos(self) -> Duration {
        self.as_nanos() as Duration
    }
}

/// Wall-clock time in nanoseconds since the Unix epoch.
#[inline]
pub fn now() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.to_nanos())
        .unwrap_or(0)
}

#[inline]
pub(crate) fn nanos_to_secs(d: Duration) -> f64 {
    d as f64 / 1e9
}
