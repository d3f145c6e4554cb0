//! Adaptive path selection: flowlet stickiness, congestion scores, or both.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

use crate::congestion::{
    CongestionEstimator, CongestionProbe, PathLinks, DEFAULT_CONGESTION_THRESHOLD,
    DEFAULT_PROBE_INTERVAL,
};
use crate::counters::{CounterSource, PortKey};
use crate::flowlet::{FlowKey, FlowletClassifier, PathId, DEFAULT_FLOWLET_TIMEOUT};
use crate::monitor::LinkCapacities;
use crate::planner::{FibSet, PortSet};
use crate::topology::PortNo;
use crate::{Error, Result, Timestamp, ToNanos};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Least loaded path per flowlet.
    #[strum(serialize = "flowlet")]
    Flowlet,
    /// Least congested path on every lookup, no stickiness.
    #[strum(serialize = "congestion")]
    Congestion,
    /// Flowlet stickiness, least congested path for a new flowlet.
    #[strum(serialize = "hybrid")]
    Hybrid,
}

impl Default for RoutingMode {
    fn default() -> Self {
        RoutingMode::Flowlet
    }
}

impl RoutingMode {
    #[inline]
    pub fn needs_probe(&self) -> bool {
        !matches!(self, RoutingMode::Flowlet)
    }
}

impl std::fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoutingMode::Flowlet => "flowlet",
            RoutingMode::Congestion => "congestion",
            RoutingMode::Hybrid => "hybrid",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingSetting {
    pub mode: RoutingMode,
    pub flowlet_timeout_ms: u64,
    pub probe_interval_ms: u64,
    /// Utilization fraction at or above which a port is dropped from a
    /// multipath entry by [`AdaptiveSelector::narrow`].
    pub congestion_threshold: f64,
}

impl Default for RoutingSetting {
    fn default() -> Self {
        RoutingSetting {
            mode: RoutingMode::default(),
            flowlet_timeout_ms: DEFAULT_FLOWLET_TIMEOUT / 1_000_000,
            probe_interval_ms: DEFAULT_PROBE_INTERVAL.as_millis() as u64,
            congestion_threshold: DEFAULT_CONGESTION_THRESHOLD,
        }
    }
}

/// Number the candidate paths in order and index their links.
pub fn candidates(paths: Vec<Vec<PortKey>>) -> (Vec<PathId>, PathLinks) {
    let ids = (0..paths.len()).map(PathId).collect();
    let links = paths.into_iter().enumerate().map(|(i, l)| (PathId(i), l)).collect();
    (ids, links)
}

pub struct AdaptiveSelector {
    setting: RoutingSetting,
    flowlets: FlowletClassifier,
    estimator: Arc<CongestionEstimator>,
    capacities: Arc<LinkCapacities>,
    // parked here between probe runs
    source: Mutex<Option<Box<dyn CounterSource>>>,
    probe: Option<CongestionProbe>,
}

impl AdaptiveSelector {
    /// `source` feeds the congestion probe; it may be omitted in flowlet mode.
    pub fn new(
        setting: RoutingSetting,
        capacities: LinkCapacities,
        source: Option<Box<dyn CounterSource>>,
    ) -> Self {
        let timeout = std::time::Duration::from_millis(setting.flowlet_timeout_ms).to_nanos();
        AdaptiveSelector {
            flowlets: FlowletClassifier::new(timeout),
            estimator: Arc::new(CongestionEstimator::new()),
            capacities: Arc::new(capacities),
            source: Mutex::new(source),
            probe: None,
            setting,
        }
    }

    #[inline]
    pub fn mode(&self) -> RoutingMode {
        self.setting.mode
    }

    #[inline]
    pub fn classifier(&self) -> &FlowletClassifier {
        &self.flowlets
    }

    #[inline]
    pub fn estimator(&self) -> &Arc<CongestionEstimator> {
        &self.estimator
    }

    #[inline]
    pub fn is_probing(&self) -> bool {
        self.probe.is_some()
    }

    /// Launch the congestion probe when the mode needs one. A no-op otherwise
    /// or when already probing.
    pub fn start(&mut self) -> Result<()> {
        if !self.mode().needs_probe() || self.is_probing() {
            log::info!("adaptive routing started (mode: {})", self.mode());
            return Ok(());
        }

        let mode = self.mode();
        let source = self
            .source
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::Config(format!("{} mode needs a counter source", mode)))?;
        let interval = std::time::Duration::from_millis(self.setting.probe_interval_ms);
        self.probe = Some(CongestionProbe::start(
            interval,
            Arc::clone(&self.estimator),
            Arc::clone(&self.capacities),
            source,
        )?);

        log::info!(
            "adaptive routing started (mode: {}, probe every {:?})",
            self.mode(),
            interval
        );
        Ok(())
    }

    /// Stop the probe and wait for it. Calling it again is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(mut probe) = self.probe.take() {
            if let Some(source) = probe.stop()? {
                *self.source.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(source);
            }
            log::info!("adaptive routing stopped");
        }
        Ok(())
    }

    /// Path for the packet of `key` seen at `now`.
    pub fn select_path(
        &self,
        key: &FlowKey,
        available: &[PathId],
        path_links: &PathLinks,
        now: Timestamp,
    ) -> Result<PathId> {
        match self.mode() {
            RoutingMode::Flowlet => self.flowlets.select_path(key, available, now),
            RoutingMode::Congestion => self.estimator.select_path(available, path_links),
            RoutingMode::Hybrid => self.flowlets.select_with(key, now, |_| {
                self.estimator.select_path(available, path_links).ok()
            }),
        }
    }

    #[inline]
    pub fn update_path_load(&self, path: PathId, delta: i64) {
        self.flowlets.update_path_load(path, delta);
    }

    /// A copy of `fibs` whose multipath entries avoid ports at or above the
    /// congestion threshold. When every port of an entry is above it, the least
    /// congested one stays.
    pub fn narrow(&self, fibs: &FibSet) -> Result<FibSet> {
        let threshold = self.setting.congestion_threshold;
        let mut narrowed = fibs.clone();
        let mut dropped = 0;

        for table in fibs.iter() {
            for (dst, entry) in table.entries().filter(|(_, e)| e.is_multipath()) {
                let util = |port: PortNo| {
                    self.estimator
                        .utilization(&PortKey::new(&table.switch, port))
                        .unwrap_or(0.)
                };

                let mut keep: PortSet = entry
                    .ports
                    .iter()
                    .copied()
                    .filter(|&p| util(p) < threshold)
                    .collect();
                if keep.is_empty() {
                    let least = entry.ports.iter().copied().min_by(|&a, &b| {
                        util(a)
                            .partial_cmp(&util(b))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                    keep.extend(least);
                }

                if keep.len() < entry.ports.len() {
                    dropped += entry.ports.len() - keep.len();
                    if let Some(t) = narrowed.get_mut(&table.switch) {
                        t.set_ports(*dst, keep)?;
                    }
                }
            }
        }

        log::debug!("narrowing at {} dropped {} egress ports", threshold, dropped);
        Ok(narrowed)
    }
}

impl Drop for AdaptiveSelector {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("stopping adaptive routing: {}", e);
        }
    }
}
