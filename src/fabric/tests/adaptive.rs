use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use fabric::bandwidth::BandwidthTrait;
use fabric::counters::{CounterSource, PortCounters, PortKey, PortReading, SampleParseError};
use fabric::flowlet::{FlowKey, PathId};
use fabric::monitor::LinkCapacities;
use fabric::planner::{equal_cost_paths, EcmpPlanner};
use fabric::selector::{candidates, AdaptiveSelector, RoutingMode, RoutingSetting};
use fabric::topology::{LeafSpineDims, Topology};

const MS: u64 = 1_000_000;

/// spine1 pushes far more than line rate toward leaf2, spine2 stays idle.
struct HotSpine {
    reads: u64,
}

impl CounterSource for HotSpine {
    fn switches(&self) -> Vec<String> {
        vec!["spine1".to_owned(), "spine2".to_owned()]
    }

    fn read_ports(&mut self, switch: &str) -> Result<Vec<PortReading>, SampleParseError> {
        let tx_bytes = if switch == "spine1" {
            self.reads += 1;
            self.reads * 1_000_000_000_000
        } else {
            0
        };
        Ok(vec![Ok((
            2,
            PortCounters {
                tx_bytes,
                ..Default::default()
            },
        ))])
    }
}

fn fabric() -> (Topology, LeafSpineDims) {
    let dims = LeafSpineDims {
        spines: 2,
        leaves: 2,
        hosts_per_leaf: 2,
    };
    (Topology::leaf_spine(dims, 1.gbps()).unwrap(), dims)
}

fn flow(id: u64) -> FlowKey {
    FlowKey::new(Ipv4Addr::new(10, 0, 1, 1), Ipv4Addr::new(10, 0, 2, 1), id)
}

#[test]
fn hybrid_routing_moves_new_flowlets_off_a_hot_spine() {
    logging::init_test_log();

    let (topo, _) = fabric();
    let paths = equal_cost_paths(&topo, "leaf1", "leaf2").unwrap();
    assert_eq!(paths[0][1], PortKey::new("spine1", 2));
    assert_eq!(paths[1][1], PortKey::new("spine2", 2));
    let (available, links) = candidates(paths);

    let setting = RoutingSetting {
        mode: RoutingMode::Hybrid,
        probe_interval_ms: 5,
        ..Default::default()
    };
    let mut selector = AdaptiveSelector::new(
        setting,
        LinkCapacities::from_topology(&topo, 1.gbps()),
        Some(Box::new(HotSpine { reads: 0 })),
    );

    // nothing measured yet, every path scores the same
    assert_eq!(
        selector.select_path(&flow(1), &available, &links, 0).unwrap(),
        PathId(0)
    );

    selector.start().unwrap();
    assert!(selector.is_probing());
    let hot = PortKey::new("spine1", 2);
    let deadline = Instant::now() + Duration::from_secs(10);
    while selector.estimator().utilization(&hot) != Some(1.) {
        assert!(Instant::now() < deadline, "probe never saw the hot spine");
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(selector.estimator().utilization(&PortKey::new("spine2", 2)), Some(0.));

    // an active flowlet keeps its path
    assert_eq!(
        selector.select_path(&flow(1), &available, &links, 10 * MS).unwrap(),
        PathId(0)
    );
    // a new flow avoids spine1
    assert_eq!(
        selector.select_path(&flow(2), &available, &links, 10 * MS).unwrap(),
        PathId(1)
    );
    // after an idle gap the old flow moves too
    assert_eq!(
        selector.select_path(&flow(1), &available, &links, 200 * MS).unwrap(),
        PathId(1)
    );

    // lookups from many threads agree on the flowlet's path
    let chosen: Vec<PathId> = crossbeam::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let selector = &selector;
                let available = &available;
                let links = &links;
                s.spawn(move |_| {
                    selector
                        .select_path(&flow(3), available, links, 300 * MS)
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
    .unwrap();
    assert!(chosen.iter().all(|&p| p == PathId(1)));
    assert_eq!(selector.classifier().len(), 3);

    selector.stop().unwrap();
    assert!(!selector.is_probing());
    selector.stop().unwrap();

    // the source comes back and the probe can run again
    selector.start().unwrap();
    assert!(selector.is_probing());
    selector.stop().unwrap();
}

#[test]
fn narrowed_tables_avoid_a_hot_uplink() {
    logging::init_test_log();

    let (topo, dims) = fabric();
    let fibs = EcmpPlanner::new(&topo, dims).build().unwrap();
    let remote = Ipv4Addr::new(10, 0, 2, 2);
    let uplinks = fibs.get("leaf1").unwrap().lookup(&remote).unwrap().ports.to_vec();
    assert_eq!(uplinks.len(), 2);

    let selector = AdaptiveSelector::new(
        RoutingSetting {
            mode: RoutingMode::Congestion,
            ..Default::default()
        },
        LinkCapacities::from_topology(&topo, 1.gbps()),
        None,
    );
    selector
        .estimator()
        .record(PortKey::new("leaf1", uplinks[0]), 0.9);

    let narrowed = selector.narrow(&fibs).unwrap();
    let leaf1 = narrowed.get("leaf1").unwrap();
    for (dst, entry) in leaf1.entries() {
        let before = fibs.get("leaf1").unwrap().lookup(dst).unwrap();
        if before.is_multipath() {
            assert_eq!(entry.ports.to_vec(), vec![uplinks[1]], "{}", dst);
        } else {
            assert_eq!(entry, before);
        }
    }
    assert_eq!(narrowed.get("leaf2"), fibs.get("leaf2"));
    assert_eq!(narrowed.get("spine1"), fibs.get("spine1"));
}
