//! Congestion scores from the latest link utilization readings.

use std::sync::{Arc, RwLock};

use fnv::FnvHashMap as HashMap;

use crate::counters::{take_snapshot, CounterSource, PortKey, Snapshot};
use crate::flowlet::PathId;
use crate::monitor::{interval_utilization, LinkCapacities};
use crate::timer::PeriodicTask;
use crate::{Error, Result};

pub const DEFAULT_PROBE_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);
pub const DEFAULT_CONGESTION_THRESHOLD: f64 = 0.7;

/// The links each candidate path crosses.
pub type PathLinks = HashMap<PathId, Vec<PortKey>>;

/// Latest utilization of every measured link, as a fraction of its capacity.
#[derive(Debug, Default)]
pub struct CongestionEstimator {
    readings: RwLock<HashMap<PortKey, f64>>,
}

impl CongestionEstimator {
    pub fn new() -> Self {
        Default::default()
    }

    /// Replace the reading of `link`, clamped to `[0, 1]`.
    pub fn record(&self, link: PortKey, utilization: f64) {
        if !utilization.is_finite() {
            log::warn!("ignoring utilization {} on {}", utilization, link);
            return;
        }
        let mut readings = self.readings.write().unwrap_or_else(|e| e.into_inner());
        readings.insert(link, utilization.max(0.).min(1.));
    }

    pub fn utilization(&self, link: &PortKey) -> Option<f64> {
        let readings = self.readings.read().unwrap_or_else(|e| e.into_inner());
        readings.get(link).copied()
    }

    pub fn len(&self) -> usize {
        self.readings.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record the utilization of every link measured between two snapshots.
    /// Returns the number of readings taken.
    pub fn update_from(&self, prev: &Snapshot, curr: &Snapshot, capacities: &LinkCapacities) -> usize {
        let utils = interval_utilization(prev, curr, capacities);
        let n = utils.len();
        for (key, pct) in utils {
            self.record(key.clone(), pct / 100.);
        }
        n
    }

    /// Mean utilization of the links of a path, lower is better. A path without
    /// links scores 0, and so does a link never measured.
    pub fn score(&self, links: &[PortKey]) -> f64 {
        if links.is_empty() {
            return 0.;
        }
        let readings = self.readings.read().unwrap_or_else(|e| e.into_inner());
        let total: f64 = links
            .iter()
            .map(|link| match readings.get(link) {
                Some(&u) => u,
                None => {
                    log::trace!("{} not measured yet, reads as idle", link);
                    0.
                }
            })
            .sum();
        total / links.len() as f64
    }

    /// The least congested of `available`; the first one wins a tie. A path
    /// missing from `path_links` has no links.
    pub fn select_path(&self, available: &[PathId], path_links: &PathLinks) -> Result<PathId> {
        let mut best: Option<(PathId, f64)> = None;
        for &path in available {
            let score = path_links.get(&path).map_or(0., |links| self.score(links));
            if best.map_or(true, |(_, s)| score < s) {
                best = Some((path, score));
            }
        }
        best.map(|(path, _)| path)
            .ok_or_else(|| Error::NoCandidate("a congestion-aware choice".to_owned()))
    }
}

struct ProbeState {
    source: Box<dyn CounterSource>,
    prev: Option<Snapshot>,
}

/// Background task feeding a [`CongestionEstimator`] from a counter source.
pub struct CongestionProbe {
    task: PeriodicTask<ProbeState>,
}

impl CongestionProbe {
    pub fn start(
        interval: std::time::Duration,
        estimator: Arc<CongestionEstimator>,
        capacities: Arc<LinkCapacities>,
        source: Box<dyn CounterSource>,
    ) -> Result<Self> {
        let state = ProbeState { source, prev: None };
        let task = PeriodicTask::spawn("congestion-probe", interval, state, move |state| {
            let curr = take_snapshot(state.source.as_mut(), crate::now());
            if let Some(prev) = &state.prev {
                estimator.update_from(prev, &curr, &capacities);
            }
            state.prev = Some(curr);
        })?;
        Ok(CongestionProbe { task })
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Stop probing and hand the counter source back.
    pub fn stop(&mut self) -> Result<Option<Box<dyn CounterSource>>> {
        Ok(self.task.stop()?.map(|state| state.source))
    }
}
