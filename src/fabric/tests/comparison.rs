use std::path::PathBuf;

use fabric::analysis::{Comparison, RunSummary};
use fabric::bandwidth::BandwidthTrait;
use fabric::counters::{CounterSource, PortCounters, PortKey, PortReading, SampleParseError, Snapshot};
use fabric::experiment::ExperimentContext;
use fabric::monitor::{LinkCapacities, LinkMonitor, MonitorSetting};
use fabric::report::{ExperimentMeta, ExperimentReport, TopologyMeta};
use fabric::topology::LeafSpineDims;

const SEC: u64 = 1_000_000_000;

struct Unused;

impl CounterSource for Unused {
    fn switches(&self) -> Vec<String> {
        Vec::new()
    }

    fn read_ports(&mut self, _switch: &str) -> Result<Vec<PortReading>, SampleParseError> {
        Ok(Vec::new())
    }
}

fn scratch_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("fabric-{}-{}", name, std::process::id()))
}

/// A finished run: two uplinks moving `tx` bytes over one second, the given
/// drops on the first, and one flow per completion time.
fn run(scheme: &str, tx: [u64; 2], drops: u64, fcts: &[f64]) -> ExperimentReport {
    let monitor = LinkMonitor::new(
        MonitorSetting::default(),
        LinkCapacities::new(1.gbps()),
        Box::new(Unused),
    );
    let ctx = ExperimentContext::new(ExperimentMeta {
        routing_scheme: scheme.to_owned(),
        traffic_type: "all_to_all".to_owned(),
        duration: 1.,
        topology: TopologyMeta::from(LeafSpineDims::default()),
        timestamp: chrono::Local::now(),
    })
    .with_monitor(monitor);

    for (i, ts) in [0, SEC].iter().enumerate() {
        let mut snap = Snapshot::new(*ts);
        for (port, bytes) in [3u32, 4].iter().zip(tx.iter()) {
            snap.insert(
                PortKey::new("leaf1", *port),
                PortCounters {
                    tx_bytes: bytes * i as u64,
                    tx_drops: if *port == 3 { drops * i as u64 } else { 0 },
                    ..Default::default()
                },
            );
        }
        ctx.monitor().unwrap().record(snap);
    }

    for (id, fct) in fcts.iter().enumerate() {
        let id = id as u64;
        ctx.tracker().start_flow_at(id, "h1", "h16", 1_000_000, 0);
        ctx.tracker().end_flow_at(id, (fct * SEC as f64) as u64);
    }
    // never finished, left out of the report
    ctx.tracker().start_flow_at(99, "h2", "h15", 1_000_000, 0);

    ctx.finish().unwrap()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn adaptive_run_beats_ecmp() {
    logging::init_test_log();

    let dir = scratch_dir("compare");
    let ecmp = run("ecmp", [93_750_000, 31_250_000], 10, &[1., 1.]);
    let adaptive = run("hybrid", [62_500_000, 62_500_000], 0, &[0.5, 0.5]);
    let ecmp_path = dir.join(ecmp.file_name());
    let adaptive_path = dir.join(adaptive.file_name());
    assert!(ecmp.file_name().starts_with("ecmp_all_to_all_"));
    ecmp.save(&ecmp_path).unwrap();
    adaptive.save(&adaptive_path).unwrap();

    let ecmp = RunSummary::from_report(&ExperimentReport::load(&ecmp_path).unwrap());
    let adaptive = RunSummary::from_report(&ExperimentReport::load(&adaptive_path).unwrap());

    let tp = ecmp.throughput.unwrap();
    assert_eq!(tp.total_flows, 2);
    assert!(close(tp.mean_mbps, 8.));
    let load = ecmp.utilization.unwrap();
    assert_eq!(load.num_links, 2);
    assert!(close(load.avg_mean_util, 50.));
    assert!(close(load.balance_score, 0.5));
    assert_eq!(ecmp.drops.total_drops, 10);
    assert_eq!(ecmp.drops.num_congested_links, 1);
    assert!(close(ecmp.drops.avg_drops_per_link, 10.));

    let cmp = Comparison::between(&ecmp, &adaptive);
    assert!(close(cmp.throughput.unwrap().improvement_pct, 100.));
    assert!(close(cmp.balance.unwrap().improvement_pct, 100.));
    assert!(close(cmp.drops.unwrap().improvement_pct, 100.));
    assert!(close(cmp.tail_latency.unwrap().improvement_pct, 50.));

    let text = cmp.to_string();
    assert!(text.contains("significantly improves throughput"));
    assert!(text.contains("significantly improves packet drops"));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn runs_without_drops_or_flows() {
    logging::init_test_log();

    let ecmp = RunSummary::from_report(&run("ecmp", [1000, 1000], 0, &[]));
    let adaptive = RunSummary::from_report(&run("flowlet", [1000, 1000], 0, &[]));
    assert!(ecmp.throughput.is_none());
    assert_eq!(ecmp.drops.num_congested_links, 0);

    let cmp = Comparison::between(&ecmp, &adaptive);
    assert!(cmp.throughput.is_none());
    assert!(cmp.tail_latency.is_none());
    assert_eq!(cmp.drops.unwrap().improvement_pct, 0.);

    let text = cmp.to_string();
    assert!(!text.contains("Throughput"));
    assert!(text.contains("- no improvement in packet drops"));
    assert!(ecmp.to_string().contains("Throughput: no data"));
}
