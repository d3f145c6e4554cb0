use serde::{Deserialize, Serialize};

use crate::bandwidth::{Bandwidth, BandwidthTrait};
use crate::monitor::MonitorSetting;
use crate::selector::RoutingSetting;
use crate::topology::LeafSpineDims;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TopologySetting {
    pub spines: usize,
    pub leaves: usize,
    pub hosts_per_leaf: usize,
    /// Capacity of every link, in Gb/s
    pub link_gbps: f64,
}

impl Default for TopologySetting {
    fn default() -> Self {
        let dims = LeafSpineDims::default();
        TopologySetting {
            spines: dims.spines,
            leaves: dims.leaves,
            hosts_per_leaf: dims.hosts_per_leaf,
            link_gbps: 1.,
        }
    }
}

impl TopologySetting {
    #[inline]
    pub fn dims(&self) -> LeafSpineDims {
        LeafSpineDims {
            spines: self.spines,
            leaves: self.leaves,
            hosts_per_leaf: self.hosts_per_leaf,
        }
    }

    #[inline]
    pub fn link_capacity(&self) -> Bandwidth {
        self.link_gbps.gbps()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Fabric shape
    pub topology: TopologySetting,

    /// Link monitor settings
    pub monitor: MonitorSetting,

    /// Adaptive routing settings
    pub routing: RoutingSetting,
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.monitor.sample_interval_ms == 0 || self.routing.probe_interval_ms == 0 {
            return Err(Error::Config("sampling intervals must be positive".to_owned()));
        }
        let threshold = self.routing.congestion_threshold;
        if !(threshold > 0. && threshold <= 1.) {
            return Err(Error::Config(format!(
                "congestion_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if !(self.topology.link_gbps > 0.) {
            return Err(Error::Config(format!(
                "link_gbps must be positive, got {}",
                self.topology.link_gbps
            )));
        }
        Ok(())
    }
}

impl std::str::FromStr for ExperimentConfig {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let config: ExperimentConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

pub fn read_config<P: AsRef<std::path::Path>>(path: P) -> Result<ExperimentConfig> {
    let content = std::fs::read_to_string(path)?;
    content.parse()
}
