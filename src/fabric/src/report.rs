use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::fct::FlowRecord;
use crate::monitor::MonitorStatistics;
use crate::topology::LeafSpineDims;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyMeta {
    pub num_spines: usize,
    pub num_leaves: usize,
    pub hosts_per_leaf: usize,
    pub total_hosts: usize,
}

impl From<LeafSpineDims> for TopologyMeta {
    fn from(dims: LeafSpineDims) -> Self {
        TopologyMeta {
            num_spines: dims.spines,
            num_leaves: dims.leaves,
            hosts_per_leaf: dims.hosts_per_leaf,
            total_hosts: dims.total_hosts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMeta {
    /// `ecmp`, or the adaptive routing mode.
    pub routing_scheme: String,
    pub traffic_type: String,
    /// in seconds
    pub duration: f64,
    pub topology: TopologyMeta,
    pub timestamp: chrono::DateTime<chrono::Local>,
}

/// Everything one run leaves behind, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub experiment: ExperimentMeta,
    #[serde(rename = "traffic")]
    pub flows: Vec<FlowRecord>,
    pub monitoring: MonitorStatistics,
}

impl ExperimentReport {
    /// `<scheme>_<traffic>_<YYYYmmdd_HHMMSS>.json`
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.json",
            self.experiment.routing_scheme,
            self.experiment.traffic_type,
            self.experiment.timestamp.format("%Y%m%d_%H%M%S")
        )
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        log::info!("results saved to {}", path.display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}
