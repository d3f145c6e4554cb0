//! Summaries of one run and the comparison of an ECMP run against an adaptive
//! one.
//!
//! Medians and percentiles use the same index-based selection as
//! [`FctStats`](crate::fct::FctStats), never interpolation.

use serde::{Deserialize, Serialize};

use crate::fct::FctStats;
use crate::report::{ExperimentMeta, ExperimentReport};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSummary {
    pub mean_mbps: f64,
    pub median_mbps: f64,
    pub std_mbps: f64,
    pub min_mbps: f64,
    pub max_mbps: f64,
    pub total_flows: usize,
    pub fct_mean: f64,
    pub fct_median: f64,
    pub fct_p95: f64,
    pub fct_p99: f64,
    pub fct_max: f64,
}

impl ThroughputSummary {
    /// `None` without a closed flow of non-zero duration.
    pub fn from_flows(flows: &[crate::fct::FlowRecord]) -> Option<Self> {
        let mbps: Vec<f64> = flows
            .iter()
            .filter_map(|f| f.throughput_bps())
            .map(|bps| bps / 1e6)
            .collect();
        let sorted = stats::sorted(&mbps);
        let fcts: Vec<f64> = flows.iter().map(|f| f.completion_time).collect();
        let fct = FctStats::from_completion_times(&fcts)?;

        Some(ThroughputSummary {
            mean_mbps: stats::mean(&sorted)?,
            median_mbps: stats::index_median(&sorted)?,
            std_mbps: stats::std_dev(&sorted)?,
            min_mbps: stats::min(&sorted)?,
            max_mbps: stats::max(&sorted)?,
            total_flows: sorted.len(),
            fct_mean: fct.mean,
            fct_median: fct.median,
            fct_p95: fct.p95,
            fct_p99: fct.p99,
            fct_max: fct.max,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkLoadSummary {
    pub avg_mean_util: f64,
    pub avg_max_util: f64,
    pub std_util: f64,
    pub balance_score: f64,
    pub num_links: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DropSummary {
    pub total_drops: u64,
    pub num_congested_links: usize,
    pub avg_drops_per_link: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub experiment: ExperimentMeta,
    pub throughput: Option<ThroughputSummary>,
    pub utilization: Option<LinkLoadSummary>,
    pub drops: DropSummary,
}

impl RunSummary {
    pub fn from_report(report: &ExperimentReport) -> Self {
        let links = &report.monitoring.link_utilization;
        let means: Vec<f64> = links.values().map(|u| u.mean).collect();
        let maxes: Vec<f64> = links.values().map(|u| u.max).collect();
        let utilization = match (stats::mean(&means), stats::mean(&maxes), stats::std_dev(&means)) {
            (Some(avg_mean_util), Some(avg_max_util), Some(std_util)) => Some(LinkLoadSummary {
                avg_mean_util,
                avg_max_util,
                std_util,
                balance_score: stats::balance_score(&means).unwrap_or(0.),
                num_links: links.len(),
            }),
            _ => None,
        };

        let total_drops = report.monitoring.total_drops();
        let num_congested_links = report.monitoring.num_congested_links();
        let avg_drops_per_link = if num_congested_links == 0 {
            0.
        } else {
            total_drops as f64 / num_congested_links as f64
        };

        RunSummary {
            experiment: report.experiment.clone(),
            throughput: ThroughputSummary::from_flows(&report.flows),
            utilization,
            drops: DropSummary {
                total_drops,
                num_congested_links,
                avg_drops_per_link,
            },
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let exp = &self.experiment;
        writeln!(f, "Routing scheme: {}", exp.routing_scheme)?;
        writeln!(f, "Traffic type: {}", exp.traffic_type)?;
        writeln!(f, "Duration: {} seconds", exp.duration)?;
        match &self.throughput {
            Some(tp) => {
                writeln!(f, "Throughput:")?;
                writeln!(f, "  Mean: {:.2} Mbps", tp.mean_mbps)?;
                writeln!(f, "  Median: {:.2} Mbps", tp.median_mbps)?;
                writeln!(f, "  Std Dev: {:.2} Mbps", tp.std_mbps)?;
                writeln!(f, "  Flows: {}", tp.total_flows)?;
                writeln!(f, "  Mean FCT: {:.3} seconds", tp.fct_mean)?;
                writeln!(f, "  P99 FCT: {:.3} seconds", tp.fct_p99)?;
            }
            None => writeln!(f, "Throughput: no data")?,
        }
        match &self.utilization {
            Some(u) => {
                writeln!(f, "Link utilization:")?;
                writeln!(f, "  Average: {:.2}%", u.avg_mean_util)?;
                writeln!(f, "  Average peak: {:.2}%", u.avg_max_util)?;
                writeln!(f, "  Balance score: {:.3}", u.balance_score)?;
                writeln!(f, "  Links: {}", u.num_links)?;
            }
            None => writeln!(f, "Link utilization: no data")?,
        }
        writeln!(f, "Packet drops:")?;
        writeln!(f, "  Total: {}", self.drops.total_drops)?;
        write!(f, "  Congested links: {}", self.drops.num_congested_links)
    }
}

/// A metric in both runs. `improvement_pct > 0` means the adaptive run did
/// better.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub ecmp: f64,
    pub adaptive: f64,
    pub improvement_pct: f64,
}

impl MetricDelta {
    fn new(ecmp: f64, adaptive: f64, higher_is_better: bool) -> Self {
        MetricDelta {
            ecmp,
            adaptive,
            improvement_pct: stats::improvement(ecmp, adaptive, higher_is_better),
        }
    }
}

/// A metric is present only when both runs measured it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub throughput: Option<MetricDelta>,
    pub balance: Option<MetricDelta>,
    pub drops: Option<MetricDelta>,
    pub tail_latency: Option<MetricDelta>,
}

impl Comparison {
    pub fn between(ecmp: &RunSummary, adaptive: &RunSummary) -> Self {
        let both = |a: Option<f64>, b: Option<f64>, higher_is_better| match (a, b) {
            (Some(a), Some(b)) => Some(MetricDelta::new(a, b, higher_is_better)),
            _ => None,
        };
        let mbps = |s: &RunSummary| s.throughput.map(|t| t.mean_mbps);
        let p99 = |s: &RunSummary| s.throughput.map(|t| t.fct_p99);
        let balance = |s: &RunSummary| s.utilization.map(|u| u.balance_score);
        let drops = |s: &RunSummary| Some(s.drops.total_drops as f64);

        Comparison {
            throughput: both(mbps(ecmp), mbps(adaptive), true),
            balance: both(balance(ecmp), balance(adaptive), true),
            drops: both(drops(ecmp), drops(adaptive), false),
            tail_latency: both(p99(ecmp), p99(adaptive), false),
        }
    }
}

fn verdict(pct: f64, significant: f64, what: &str) -> String {
    if pct > significant {
        format!("+ adaptive routing significantly improves {}", what)
    } else if pct > 0. {
        format!("~ adaptive routing slightly improves {}", what)
    } else {
        format!("- no improvement in {}", what)
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:<30} {:<15} {:<15} {:<10}", "Metric", "ECMP", "Adaptive", "Change")?;
        writeln!(f, "{}", "-".repeat(70))?;

        let rows = [
            ("Throughput (Mbps)", self.throughput),
            ("Load Balance Score", self.balance),
            ("Packet Drops", self.drops),
            ("Tail Latency P99 (s)", self.tail_latency),
        ];
        for (name, delta) in rows.iter() {
            if let Some(d) = delta {
                writeln!(
                    f,
                    "{:<30} {:<15.3} {:<15.3} {:>+9.2}%",
                    name, d.ecmp, d.adaptive, d.improvement_pct
                )?;
            }
        }

        writeln!(f)?;
        let findings = [
            (self.throughput, 5., "throughput"),
            (self.balance, 10., "load balance"),
            (self.drops, 20., "packet drops"),
            (self.tail_latency, 10., "tail latency"),
        ];
        for (delta, significant, what) in findings.iter() {
            if let Some(d) = delta {
                writeln!(f, "{}", verdict(d.improvement_pct, *significant, what))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fct::FlowRecord;
    use crate::monitor::{MonitorStatistics, UtilizationSummary};
    use crate::report::TopologyMeta;
    use crate::topology::LeafSpineDims;

    fn flow(flow_id: u64, size: u64, secs: f64) -> FlowRecord {
        FlowRecord {
            flow_id,
            src: "h1".to_owned(),
            dst: "h9".to_owned(),
            size,
            start_time: 0,
            end_time: (secs * 1e9) as u64,
            completion_time: secs,
        }
    }

    fn report(scheme: &str, flows: Vec<FlowRecord>, means: &[f64], drops: &[u64]) -> ExperimentReport {
        let mut monitoring = MonitorStatistics::default();
        for (i, &m) in means.iter().enumerate() {
            monitoring.link_utilization.insert(
                format!("leaf1:{}", i + 1),
                UtilizationSummary {
                    mean: m,
                    max: m * 2.,
                    min: 0.,
                    samples: 4,
                },
            );
        }
        for (i, &d) in drops.iter().enumerate() {
            monitoring.packet_drops.insert(format!("leaf1:{}", i + 1), d);
        }
        ExperimentReport {
            experiment: ExperimentMeta {
                routing_scheme: scheme.to_owned(),
                traffic_type: "bursty".to_owned(),
                duration: 10.,
                topology: TopologyMeta::from(LeafSpineDims::default()),
                timestamp: chrono::Local::now(),
            },
            flows,
            monitoring,
        }
    }

    #[test]
    fn summary_of_one_run() {
        let flows = vec![flow(1, 1_250_000, 1.), flow(2, 2_500_000, 1.), flow(3, 0, 0.)];
        let s = RunSummary::from_report(&report("ecmp", flows, &[10., 10., 10., 10.], &[0, 3, 0, 1]));

        let tp = s.throughput.unwrap();
        assert_eq!(tp.total_flows, 2);
        assert!((tp.mean_mbps - 15.).abs() < 1e-9);
        assert!((tp.std_mbps - 5.).abs() < 1e-9);
        assert_eq!(tp.median_mbps, 20.);
        assert_eq!(tp.fct_max, 1.);

        let u = s.utilization.unwrap();
        assert_eq!(u.balance_score, 1.);
        assert_eq!(u.avg_max_util, 20.);
        assert_eq!(u.num_links, 4);

        assert_eq!(s.drops.total_drops, 4);
        assert_eq!(s.drops.num_congested_links, 2);
        // averaged over the links that dropped, not over every link
        assert_eq!(s.drops.avg_drops_per_link, 2.);
    }

    #[test]
    fn idle_links_score_zero_and_empty_runs_have_no_data() {
        let s = RunSummary::from_report(&report("ecmp", vec![], &[0., 0., 0., 0.], &[]));
        assert_eq!(s.utilization.unwrap().balance_score, 0.);
        assert!(s.throughput.is_none());
        assert_eq!(s.drops.avg_drops_per_link, 0.);

        let s = RunSummary::from_report(&report("ecmp", vec![], &[], &[]));
        assert!(s.utilization.is_none());
    }

    #[test]
    fn idle_ports_do_not_dilute_drops() {
        use crate::counters::{PortCounters, PortKey, Snapshot};
        use crate::monitor::LinkCapacities;
        use std::sync::Arc;

        let mut snap = Snapshot::new(0);
        for port in 1..=4 {
            let drops = if port == 1 { 10 } else { 0 };
            snap.insert(
                PortKey::new("leaf1", port),
                PortCounters {
                    tx_drops: drops,
                    ..Default::default()
                },
            );
        }
        let mut r = report("ecmp", vec![], &[], &[]);
        r.monitoring = MonitorStatistics::from_samples(&[Arc::new(snap)], &LinkCapacities::default());
        assert_eq!(r.monitoring.packet_drops.len(), 1);
        assert_eq!(r.monitoring.packet_drops["leaf1:1"], 10);

        let s = RunSummary::from_report(&r);
        assert_eq!(s.drops.total_drops, 10);
        assert_eq!(s.drops.num_congested_links, 1);
        assert_eq!(s.drops.avg_drops_per_link, 10.);
    }

    #[test]
    fn comparison_is_oriented_towards_adaptive() {
        let ecmp = RunSummary::from_report(&report(
            "ecmp",
            vec![flow(1, 1_250_000, 1.), flow(2, 1_250_000, 4.)],
            &[10., 30.],
            &[8, 0],
        ));
        let adaptive = RunSummary::from_report(&report(
            "hybrid",
            vec![flow(1, 2_500_000, 1.), flow(2, 2_500_000, 2.)],
            &[20., 20.],
            &[2, 0],
        ));
        let cmp = Comparison::between(&ecmp, &adaptive);

        let tp = cmp.throughput.unwrap();
        // 6.25 -> 15 Mbps
        assert!((tp.improvement_pct - 140.).abs() < 1e-9);
        assert!((cmp.balance.unwrap().improvement_pct - 100.).abs() < 1e-9);
        assert!((cmp.drops.unwrap().improvement_pct - 75.).abs() < 1e-9);
        // p99 FCT 4 s -> 2 s
        assert!((cmp.tail_latency.unwrap().improvement_pct - 50.).abs() < 1e-9);

        let text = cmp.to_string();
        assert!(text.contains("Packet Drops"));
        assert!(text.contains("significantly improves packet drops"));
    }

    #[test]
    fn zero_drop_baseline_is_guarded() {
        let ecmp = RunSummary::from_report(&report("ecmp", vec![], &[], &[0, 0]));
        let adaptive = RunSummary::from_report(&report("flowlet", vec![], &[], &[7, 1]));
        let cmp = Comparison::between(&ecmp, &adaptive);
        assert_eq!(cmp.drops.unwrap().improvement_pct, 0.);
        assert!(cmp.throughput.is_none());
        assert!(cmp.balance.is_none());
        assert!(cmp.tail_latency.is_none());
    }
}
