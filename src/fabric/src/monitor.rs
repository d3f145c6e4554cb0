//! Link monitor: periodic counter snapshots and the statistics derived from them.

use std::sync::{Arc, Mutex, MutexGuard};

use fnv::FnvHashMap as HashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::bandwidth::{Bandwidth, BandwidthTrait};
use crate::counters::{take_snapshot, CounterSource, PortKey, Snapshot};
use crate::timer::PeriodicTask;
use crate::topology::Topology;
use crate::{nanos_to_secs, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorSetting {
    /// Time between two snapshots, in milliseconds.
    pub sample_interval_ms: u64,
}

impl Default for MonitorSetting {
    fn default() -> Self {
        MonitorSetting {
            sample_interval_ms: 1000,
        }
    }
}

/// Capacity of each switch port, with a fallback for ports the topology does
/// not describe.
#[derive(Debug, Clone)]
pub struct LinkCapacities {
    ports: HashMap<PortKey, Bandwidth>,
    default: Bandwidth,
}

impl Default for LinkCapacities {
    fn default() -> Self {
        LinkCapacities::new(1.gbps())
    }
}

impl LinkCapacities {
    pub fn new(default: Bandwidth) -> Self {
        LinkCapacities {
            ports: HashMap::default(),
            default,
        }
    }

    pub fn from_topology(topo: &Topology, default: Bandwidth) -> Self {
        let mut caps = LinkCapacities::new(default);
        caps.ports.extend(topo.port_capacities());
        caps
    }

    #[inline]
    pub fn insert(&mut self, key: PortKey, capacity: Bandwidth) {
        self.ports.insert(key, capacity);
    }

    #[inline]
    pub fn get(&self, key: &PortKey) -> Bandwidth {
        self.ports.get(key).copied().unwrap_or(self.default)
    }
}

/// Utilization percentage of every port present in both snapshots over the
/// interval between them: `(Δtx_bytes * 8) / Δt / capacity * 100`.
///
/// Ports whose tx counter went backwards (counter reset) produce no reading, nor
/// does a pair of snapshots that is not strictly increasing in time.
pub fn interval_utilization<'a>(
    prev: &Snapshot,
    curr: &'a Snapshot,
    capacities: &LinkCapacities,
) -> Vec<(&'a PortKey, f64)> {
    let dt = match curr.timestamp.checked_sub(prev.timestamp) {
        Some(dt) if dt > 0 => nanos_to_secs(dt),
        _ => {
            log::debug!(
                "snapshots out of order: {} then {}",
                prev.timestamp,
                curr.timestamp
            );
            return Vec::new();
        }
    };

    curr.ports
        .iter()
        .filter_map(|(key, c)| {
            let p = prev.get(key)?;
            let delta = match c.tx_bytes.checked_sub(p.tx_bytes) {
                Some(delta) => delta,
                None => {
                    log::debug!("tx counter of {} went backwards, skipping interval", key);
                    return None;
                }
            };
            let util = capacities.get(key).utilization(delta as f64 * 8., dt)?;
            Some((key, util * 100.))
        })
        .collect()
}

/// Append-only, shareable list of snapshots.
///
/// Readers get a copy of the list of handles, so iteration never races with the
/// sampler appending.
#[derive(Debug, Clone, Default)]
pub struct SampleLog {
    inner: Arc<Mutex<Vec<Arc<Snapshot>>>>,
}

impl SampleLog {
    pub fn new() -> Self {
        Default::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Snapshot>>> {
        // snapshots are immutable, a panic elsewhere cannot leave one half written
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[inline]
    pub fn append(&self, snapshot: Snapshot) {
        self.lock().push(Arc::new(snapshot));
    }

    #[inline]
    pub fn snapshot(&self) -> Vec<Arc<Snapshot>> {
        self.lock().clone()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Per-link utilization history, pairwise over consecutive snapshots. A link
/// seen in a single snapshot contributes nothing.
pub fn link_utilization(
    samples: &[Arc<Snapshot>],
    capacities: &LinkCapacities,
) -> IndexMap<PortKey, Vec<f64>> {
    let mut utilization: IndexMap<PortKey, Vec<f64>> = IndexMap::new();
    for pair in samples.windows(2) {
        for (key, util) in interval_utilization(&pair[0], &pair[1], capacities) {
            utilization.entry(key.clone()).or_default().push(util);
        }
    }
    utilization
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSummary {
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    pub samples: usize,
}

impl UtilizationSummary {
    /// `None` for an empty history.
    pub fn from_readings(readings: &[f64]) -> Option<Self> {
        if readings.is_empty() {
            return None;
        }
        Some(UtilizationSummary {
            mean: crate::stats::mean(readings)?,
            max: crate::stats::max(readings)?,
            min: crate::stats::min(readings)?,
            samples: readings.len(),
        })
    }
}

/// What a monitoring run observed. Link ids are `switch:port`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatistics {
    pub total_samples: usize,
    /// Seconds between the first and the last snapshot.
    pub duration: f64,
    pub link_utilization: IndexMap<String, UtilizationSummary>,
    /// Cumulative `rx_drops + tx_drops` of every link that dropped anything,
    /// read from the last snapshot.
    pub packet_drops: IndexMap<String, u64>,
}

impl MonitorStatistics {
    pub fn from_samples(samples: &[Arc<Snapshot>], capacities: &LinkCapacities) -> Self {
        let duration = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) if samples.len() >= 2 => {
                nanos_to_secs(last.timestamp.saturating_sub(first.timestamp))
            }
            _ => 0.,
        };

        let link_utilization = link_utilization(samples, capacities)
            .into_iter()
            .filter_map(|(key, readings)| {
                UtilizationSummary::from_readings(&readings).map(|s| (key.to_string(), s))
            })
            .collect();

        // not a delta: the total observed when the statistics are queried
        let packet_drops = samples
            .last()
            .map(|last| {
                last.ports
                    .iter()
                    .filter(|(_, c)| c.total_drops() > 0)
                    .map(|(key, c)| (key.to_string(), c.total_drops()))
                    .collect()
            })
            .unwrap_or_default();

        MonitorStatistics {
            total_samples: samples.len(),
            duration,
            link_utilization,
            packet_drops,
        }
    }

    #[inline]
    pub fn total_drops(&self) -> u64 {
        self.packet_drops.values().sum()
    }

    /// Links that dropped at least one packet.
    #[inline]
    pub fn num_congested_links(&self) -> usize {
        self.packet_drops.values().filter(|&&d| d > 0).count()
    }
}

/// Samples every switch's port counters in the background while running.
pub struct LinkMonitor {
    setting: MonitorSetting,
    capacities: Arc<LinkCapacities>,
    log: SampleLog,
    source: Option<Box<dyn CounterSource>>,
    sampler: Option<PeriodicTask<Box<dyn CounterSource>>>,
}

impl LinkMonitor {
    pub fn new(
        setting: MonitorSetting,
        capacities: LinkCapacities,
        source: Box<dyn CounterSource>,
    ) -> Self {
        LinkMonitor {
            setting,
            capacities: Arc::new(capacities),
            log: SampleLog::new(),
            source: Some(source),
            sampler: None,
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.sampler.is_some()
    }

    #[inline]
    pub fn capacities(&self) -> &LinkCapacities {
        &self.capacities
    }

    /// Clear previous samples and start sampling. A no-op while running.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            log::warn!("link monitor is already running");
            return Ok(());
        }

        let source = self
            .source
            .take()
            .ok_or_else(|| Error::Join("counter source lost by a failed sampler".to_owned()))?;

        self.log.clear();
        let log = self.log.clone();
        let interval = std::time::Duration::from_millis(self.setting.sample_interval_ms);
        let task = PeriodicTask::spawn("link-monitor", interval, source, move |source| {
            log.append(take_snapshot(source.as_mut(), crate::now()));
        })?;
        self.sampler = Some(task);

        log::info!("link monitor started");
        Ok(())
    }

    /// Stop sampling and wait for the sampler to exit. Calling it again is a
    /// no-op.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(mut task) = self.sampler.take() {
            if let Some(source) = task.stop()? {
                self.source = Some(source);
            }
            log::info!("link monitor stopped, {} samples", self.log.len());
        }
        Ok(())
    }

    /// Append a snapshot obtained elsewhere.
    #[inline]
    pub fn record(&self, snapshot: Snapshot) {
        self.log.append(snapshot);
    }

    #[inline]
    pub fn samples(&self) -> Vec<Arc<Snapshot>> {
        self.log.snapshot()
    }

    pub fn compute_link_utilization(&self) -> IndexMap<PortKey, Vec<f64>> {
        link_utilization(&self.samples(), &self.capacities)
    }

    pub fn get_statistics(&self) -> MonitorStatistics {
        MonitorStatistics::from_samples(&self.samples(), &self.capacities)
    }
}
