use std::sync::Mutex;

use fnv::FnvHashMap as HashMap;
use serde::{Deserialize, Serialize};

use crate::{nanos_to_secs, stats, Timestamp};

pub type FlowId = u64;

/// A closed flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_id: FlowId,
    pub src: String,
    pub dst: String,
    /// in bytes
    pub size: u64,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    /// in seconds
    pub completion_time: f64,
}

impl FlowRecord {
    /// Average goodput in bits per second, `None` for an instantaneous flow.
    pub fn throughput_bps(&self) -> Option<f64> {
        if self.completion_time > 0. {
            Some(self.size as f64 * 8. / self.completion_time)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
struct OpenFlow {
    src: String,
    dst: String,
    size: u64,
    start_time: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FctStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
    pub min: f64,
}

impl FctStats {
    /// Index-based selection over the sorted completion times. `None` when
    /// empty.
    pub fn from_completion_times(fcts: &[f64]) -> Option<Self> {
        let fcts = stats::sorted(fcts);
        Some(FctStats {
            count: fcts.len(),
            mean: stats::mean(&fcts)?,
            median: stats::index_median(&fcts)?,
            p95: stats::index_percentile(&fcts, 0.95)?,
            p99: stats::index_percentile(&fcts, 0.99)?,
            max: *fcts.last()?,
            min: *fcts.first()?,
        })
    }
}

#[derive(Debug, Default)]
struct Flows {
    open: HashMap<FlowId, OpenFlow>,
    closed: Vec<FlowRecord>,
}

/// Opens a record on `start_flow` and closes it on `end_flow`.
///
/// Shared by the traffic threads, every method takes `&self`.
#[derive(Debug, Default)]
pub struct FlowCompletionTracker {
    flows: Mutex<Flows>,
}

impl FlowCompletionTracker {
    pub fn new() -> Self {
        Default::default()
    }

    fn flows(&self) -> std::sync::MutexGuard<'_, Flows> {
        self.flows.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[inline]
    pub fn start_flow(&self, flow_id: FlowId, src: &str, dst: &str, size: u64) {
        self.start_flow_at(flow_id, src, dst, size, crate::now());
    }

    /// Restarting an open flow replaces its record.
    pub fn start_flow_at(&self, flow_id: FlowId, src: &str, dst: &str, size: u64, now: Timestamp) {
        let prev = self.flows().open.insert(
            flow_id,
            OpenFlow {
                src: src.to_owned(),
                dst: dst.to_owned(),
                size,
                start_time: now,
            },
        );
        if prev.is_some() {
            log::debug!("flow {} restarted", flow_id);
        }
    }

    #[inline]
    pub fn end_flow(&self, flow_id: FlowId) {
        self.end_flow_at(flow_id, crate::now());
    }

    /// Close a flow. Unknown ids are ignored.
    pub fn end_flow_at(&self, flow_id: FlowId, now: Timestamp) {
        let mut flows = self.flows();
        let open = match flows.open.remove(&flow_id) {
            Some(open) => open,
            None => {
                log::trace!("end of unknown flow {}", flow_id);
                return;
            }
        };
        let completion_time = nanos_to_secs(now.saturating_sub(open.start_time));
        flows.closed.push(FlowRecord {
            flow_id,
            src: open.src,
            dst: open.dst,
            size: open.size,
            start_time: open.start_time,
            end_time: now,
            completion_time,
        });
    }

    pub fn num_open(&self) -> usize {
        self.flows().open.len()
    }

    /// Closed records in completion order.
    pub fn completed(&self) -> Vec<FlowRecord> {
        self.flows().closed.clone()
    }

    pub fn get_fct_stats(&self) -> Option<FctStats> {
        let fcts: Vec<f64> = self
            .flows()
            .closed
            .iter()
            .map(|r| r.completion_time)
            .collect();
        FctStats::from_completion_times(&fcts)
    }
}
