//! Flowlet classification.
//!
//! Packets of a flow separated by less than the flowlet timeout form one
//! flowlet and stay on one path. A larger gap starts a new flowlet, which may
//! move to the currently least loaded path without reordering the previous one.

use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use fnv::FnvHashMap as HashMap;
use serde::{Deserialize, Serialize};

use crate::fct::FlowId;
use crate::{Duration, Error, Result, Timestamp};

/// 50 ms
pub const DEFAULT_FLOWLET_TIMEOUT: Duration = 50_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathId(pub usize);

impl std::fmt::Display for PathId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "path{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub flow_id: FlowId,
}

impl FlowKey {
    #[inline]
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, flow_id: FlowId) -> Self {
        FlowKey { src, dst, flow_id }
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}#{}", self.src, self.dst, self.flow_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowletEntry {
    pub last_active: Timestamp,
    pub path: PathId,
}

pub(crate) type PathLoads = HashMap<PathId, i64>;

#[derive(Debug, Default)]
struct FlowletState {
    table: HashMap<FlowKey, FlowletEntry>,
    loads: PathLoads,
}

/// The least loaded of `available`, lowest id first among equals.
pub(crate) fn least_loaded(loads: &PathLoads, available: &[PathId]) -> Option<PathId> {
    available
        .iter()
        .copied()
        .min_by_key(|p| (loads.get(p).copied().unwrap_or(0), *p))
}

#[derive(Debug)]
pub struct FlowletClassifier {
    timeout: Duration,
    state: Mutex<FlowletState>,
}

impl Default for FlowletClassifier {
    fn default() -> Self {
        FlowletClassifier::new(DEFAULT_FLOWLET_TIMEOUT)
    }
}

impl FlowletClassifier {
    pub fn new(timeout: Duration) -> Self {
        FlowletClassifier {
            timeout,
            state: Mutex::new(FlowletState::default()),
        }
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn state(&self) -> MutexGuard<'_, FlowletState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Path of the flowlet `key` belongs to at `now`; a new flowlet goes to the
    /// least loaded of `available`.
    ///
    /// A flowlet keeps its path even if the path is no longer in `available`.
    pub fn select_path(&self, key: &FlowKey, available: &[PathId], now: Timestamp) -> Result<PathId> {
        self.select_with(key, now, |loads| least_loaded(loads, available))
    }

    /// The stickiness check, and `choose` for a new flowlet, run under one lock:
    /// two callers with the same key inside the timeout cannot get different
    /// paths.
    pub(crate) fn select_with<F>(&self, key: &FlowKey, now: Timestamp, choose: F) -> Result<PathId>
    where
        F: FnOnce(&PathLoads) -> Option<PathId>,
    {
        let mut state = self.state();

        if let Some(entry) = state.table.get_mut(key) {
            if now.saturating_sub(entry.last_active) < self.timeout {
                entry.last_active = entry.last_active.max(now);
                return Ok(entry.path);
            }
        }

        let path = choose(&state.loads).ok_or_else(|| Error::NoCandidate(key.to_string()))?;
        log::trace!("new flowlet of {} at {} on {}", key, now, path);
        state.table.insert(
            *key,
            FlowletEntry {
                last_active: now,
                path,
            },
        );
        Ok(path)
    }

    /// Adjust the advisory load of `path`.
    pub fn update_path_load(&self, path: PathId, delta: i64) {
        *self.state().loads.entry(path).or_insert(0) += delta;
    }

    pub fn path_load(&self, path: PathId) -> i64 {
        self.state().loads.get(&path).copied().unwrap_or(0)
    }

    pub fn entry(&self, key: &FlowKey) -> Option<FlowletEntry> {
        self.state().table.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.state().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget flows idle for at least `max_idle`. Returns how many were removed.
    pub fn purge_idle(&self, now: Timestamp, max_idle: Duration) -> usize {
        let mut state = self.state();
        let before = state.table.len();
        state
            .table
            .retain(|_, e| now.saturating_sub(e.last_active) < max_idle);
        let purged = before - state.table.len();
        if purged > 0 {
            log::debug!("purged {} idle flows", purged);
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::Arc;

    const MS: u64 = 1_000_000;

    fn key(flow_id: FlowId) -> FlowKey {
        FlowKey::new(Ipv4Addr::new(10, 0, 1, 1), Ipv4Addr::new(10, 0, 2, 1), flow_id)
    }

    fn paths(n: usize) -> Vec<PathId> {
        (0..n).map(PathId).collect()
    }

    #[test]
    fn same_flowlet_keeps_its_path() {
        let fc = FlowletClassifier::default();
        let avail = paths(4);
        let p = fc.select_path(&key(1), &avail, 0).unwrap();
        assert_eq!(p, PathId(0));

        // make the chosen path the most loaded: stickiness still wins
        fc.update_path_load(p, 100);
        for i in 1..10 {
            assert_eq!(fc.select_path(&key(1), &avail, i * 40 * MS).unwrap(), p);
        }
        assert_eq!(fc.entry(&key(1)).unwrap().last_active, 360 * MS);

        // not even a shrinking path set moves an active flowlet
        assert_eq!(fc.select_path(&key(1), &avail[1..], 370 * MS).unwrap(), p);
    }

    #[test]
    fn idle_gap_starts_a_new_flowlet() {
        let fc = FlowletClassifier::new(50 * MS);
        let avail = paths(3);
        assert_eq!(fc.select_path(&key(1), &avail, 0).unwrap(), PathId(0));
        fc.update_path_load(PathId(0), 5);
        fc.update_path_load(PathId(1), 2);
        // exactly one timeout later counts as idle
        assert_eq!(fc.select_path(&key(1), &avail, 50 * MS).unwrap(), PathId(2));
        assert_eq!(fc.path_load(PathId(0)), 5);
    }

    #[test]
    fn ties_go_to_the_lowest_id() {
        let fc = FlowletClassifier::default();
        let avail = vec![PathId(3), PathId(1), PathId(2)];
        assert_eq!(fc.select_path(&key(9), &avail, 0).unwrap(), PathId(1));
        fc.update_path_load(PathId(1), 1);
        fc.update_path_load(PathId(3), -1);
        assert_eq!(fc.select_path(&key(10), &avail, 0).unwrap(), PathId(3));
    }

    #[test]
    fn re_routing_is_deterministic() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let a = FlowletClassifier::default();
            let b = FlowletClassifier::default();
            let avail = paths(8);
            for &p in &avail {
                let load = rng.gen_range(-3..4);
                a.update_path_load(p, load);
                b.update_path_load(p, load);
            }
            let pa = a.select_path(&key(1), &avail, 0).unwrap();
            let pb = b.select_path(&key(1), &avail, 0).unwrap();
            assert_eq!(pa, pb);
            let min = avail.iter().map(|&p| a.path_load(p)).min().unwrap();
            assert_eq!(a.path_load(pa), min);
        }
    }

    #[test]
    fn concurrent_callers_agree() {
        let fc = Arc::new(FlowletClassifier::new(1_000 * MS));
        let avail = paths(4);
        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let fc = Arc::clone(&fc);
                let avail = avail.clone();
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    for j in 0..100u64 {
                        // other keys and load churn in between
                        fc.update_path_load(PathId((i + j) as usize % 4), 1);
                        fc.select_path(&key(1000 + i), &avail, j * MS).unwrap();
                        seen.push(fc.select_path(&key(1), &avail, (i + j) * MS).unwrap());
                    }
                    seen
                })
            })
            .collect();

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        assert!(all.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn empty_candidates_and_purge() {
        let fc = FlowletClassifier::default();
        assert!(matches!(
            fc.select_path(&key(1), &[], 0),
            Err(Error::NoCandidate(_))
        ));
        assert!(fc.is_empty());

        fc.select_path(&key(1), &paths(2), 0).unwrap();
        fc.select_path(&key(2), &paths(2), 100 * MS).unwrap();
        assert_eq!(fc.purge_idle(120 * MS, 50 * MS), 1);
        assert_eq!(fc.len(), 1);
        assert!(fc.entry(&key(2)).is_some());
    }
}
