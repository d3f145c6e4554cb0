//! Static ECMP forwarding tables for a leaf-spine fabric.
//!
//! A leaf forwards to its own hosts over their single port and to every other
//! host over all of its spine ports. A spine forwards to each host over the port
//! facing that host's leaf. Entries with several ports carry a group id; the
//! forwarding plane spreads flows across the group by hashing, the planner never
//! does.

use std::net::Ipv4Addr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::counters::PortKey;
use crate::topology::{LeafSpineDims, NodeIx, NodeRole, PortNo, Topology};
use crate::{Error, Result};

pub type GroupId = u32;
pub type PortSet = SmallVec<[PortNo; 4]>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FibEntry {
    /// Egress ports, ascending, never empty.
    pub ports: PortSet,
    /// Present exactly when there is more than one port.
    pub group: Option<GroupId>,
}

impl FibEntry {
    #[inline]
    pub fn is_multipath(&self) -> bool {
        self.ports.len() > 1
    }
}

/// A flow or group in `ovs-ofctl` syntax. Groups must be added
/// before the flows pointing at them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    AddGroup(String),
    AddFlow(String),
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rule::AddGroup(group) => write!(f, "add-group {}", group),
            Rule::AddFlow(flow) => write!(f, "add-flow \"{}\"", flow),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardingTable {
    pub switch: String,
    entries: IndexMap<Ipv4Addr, FibEntry>,
    next_group: GroupId,
}

impl ForwardingTable {
    pub fn new(switch: &str) -> Self {
        ForwardingTable {
            switch: switch.to_owned(),
            entries: IndexMap::new(),
            next_group: 1,
        }
    }

    /// Set the ports towards `dst`. A multipath entry keeps the group id it
    /// already had or gets the next free one.
    pub fn set_ports(&mut self, dst: Ipv4Addr, mut ports: PortSet) -> Result<()> {
        if ports.is_empty() {
            return Err(Error::NoPath {
                switch: self.switch.clone(),
                dst: dst.to_string(),
            });
        }
        ports.sort_unstable();
        ports.dedup();

        let group = if ports.len() > 1 {
            match self.entries.get(&dst).and_then(|e| e.group) {
                Some(gid) => Some(gid),
                None => {
                    let gid = self.next_group;
                    self.next_group += 1;
                    Some(gid)
                }
            }
        } else {
            None
        };

        self.entries.insert(dst, FibEntry { ports, group });
        Ok(())
    }

    #[inline]
    pub fn lookup(&self, dst: &Ipv4Addr) -> Option<&FibEntry> {
        self.entries.get(dst)
    }

    #[inline]
    pub fn entries(&self) -> impl Iterator<Item = (&Ipv4Addr, &FibEntry)> {
        self.entries.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The table as `ovs-ofctl` rules, ending with the flood default.
    pub fn rules(&self) -> Vec<Rule> {
        let mut groups = Vec::new();
        let mut flows = Vec::with_capacity(self.entries.len() + 1);
        for (dst, entry) in &self.entries {
            match entry.group {
                Some(gid) if entry.is_multipath() => {
                    let buckets: Vec<String> = entry
                        .ports
                        .iter()
                        .map(|p| format!("bucket=output:{}", p))
                        .collect();
                    groups.push(Rule::AddGroup(format!(
                        "group_id={},type=select,{}",
                        gid,
                        buckets.join(",")
                    )));
                    flows.push(Rule::AddFlow(format!(
                        "priority=100,ip,nw_dst={},actions=group:{}",
                        dst, gid
                    )));
                }
                _ => flows.push(Rule::AddFlow(format!(
                    "priority=100,ip,nw_dst={},actions=output:{}",
                    dst, entry.ports[0]
                ))),
            }
        }
        flows.push(Rule::AddFlow("priority=0,actions=flood".to_owned()));
        groups.extend(flows);
        groups
    }
}

/// One forwarding table per switch, keyed by switch name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FibSet {
    tables: IndexMap<String, ForwardingTable>,
}

impl FibSet {
    #[inline]
    pub fn get(&self, switch: &str) -> Option<&ForwardingTable> {
        self.tables.get(switch)
    }

    #[inline]
    pub fn get_mut(&mut self, switch: &str) -> Option<&mut ForwardingTable> {
        self.tables.get_mut(switch)
    }

    #[inline]
    pub fn insert(&mut self, table: ForwardingTable) {
        self.tables.insert(table.switch.clone(), table);
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &ForwardingTable> {
        self.tables.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// A reachable host: its address, its leaf and the leaf port it hangs off.
#[derive(Debug, Clone, Copy)]
struct Destination {
    addr: Ipv4Addr,
    leaf: NodeIx,
    leaf_port: PortNo,
}

/// Every equal-cost path from one leaf to another, one per spine in spine
/// order. A path is the list of egress ports it leaves through: the uplink on
/// `src` then the spine's downlink towards `dst`. Within one leaf there is a
/// single path with no fabric links.
pub fn equal_cost_paths(topo: &Topology, src: &str, dst: &str) -> Result<Vec<Vec<PortKey>>> {
    let lookup = |name: &str| {
        topo.get_node_index(name)
            .filter(|&ix| topo[ix].role == NodeRole::Leaf)
            .ok_or_else(|| Error::Topology(format!("{} is not a leaf", name)))
    };
    let src_ix = lookup(src)?;
    let dst_ix = lookup(dst)?;
    if src_ix == dst_ix {
        return Ok(vec![Vec::new()]);
    }

    let mut paths = Vec::new();
    for up in topo.attachments_towards(src_ix, NodeRole::Spine) {
        let spine = &topo[up.peer].name;
        let down = topo
            .attachments(up.peer)
            .into_iter()
            .find(|att| att.peer == dst_ix);
        if let Some(down) = down {
            paths.push(vec![
                PortKey::new(src, up.local_port),
                PortKey::new(spine, down.local_port),
            ]);
        }
    }

    if paths.is_empty() {
        return Err(Error::NoPath {
            switch: src.to_owned(),
            dst: dst.to_owned(),
        });
    }
    Ok(paths)
}

pub struct EcmpPlanner<'a> {
    topo: &'a Topology,
    dims: LeafSpineDims,
}

impl<'a> EcmpPlanner<'a> {
    pub fn new(topo: &'a Topology, dims: LeafSpineDims) -> Self {
        EcmpPlanner { topo, dims }
    }

    fn check_dims(&self, spines: &[NodeIx], leaves: &[NodeIx], num_hosts: usize) -> Result<()> {
        if spines.is_empty() || leaves.is_empty() {
            return Err(Error::Topology(format!(
                "cannot tell spines from leaves: {} spines, {} leaves",
                spines.len(),
                leaves.len()
            )));
        }
        let found = LeafSpineDims {
            spines: spines.len(),
            leaves: leaves.len(),
            hosts_per_leaf: self.dims.hosts_per_leaf,
        };
        if found != self.dims || num_hosts != self.dims.total_hosts() {
            return Err(Error::Topology(format!(
                "expected {:?}, found {} spines, {} leaves and {} hosts",
                self.dims,
                spines.len(),
                leaves.len(),
                num_hosts
            )));
        }
        Ok(())
    }

    /// Hosts in leaf order, then by leaf port.
    fn destinations(&self, leaves: &[NodeIx]) -> Result<Vec<Destination>> {
        let hosts = self.topo.hosts();
        for &host in &hosts {
            self.topo.leaf_of(host)?;
        }

        let mut dests = Vec::with_capacity(hosts.len());
        for &leaf in leaves {
            for att in self.topo.attachments_towards(leaf, NodeRole::Host) {
                let host = &self.topo[att.peer];
                let addr = host.addr.ok_or_else(|| {
                    Error::Topology(format!("host {} has no address", host.name))
                })?;
                dests.push(Destination {
                    addr,
                    leaf,
                    leaf_port: att.local_port,
                });
            }
        }
        Ok(dests)
    }

    pub fn build(&self) -> Result<FibSet> {
        let spines = self.topo.spines();
        let leaves = self.topo.leaves();
        let dests = self.destinations(&leaves)?;
        self.check_dims(&spines, &leaves, dests.len())?;

        let mut fibs = FibSet::default();

        for &leaf in &leaves {
            let name = &self.topo[leaf].name;
            let uplinks: PortSet = self
                .topo
                .attachments_towards(leaf, NodeRole::Spine)
                .iter()
                .map(|att| att.local_port)
                .collect();

            let mut table = ForwardingTable::new(name);
            for d in &dests {
                let ports = if d.leaf == leaf {
                    std::iter::once(d.leaf_port).collect()
                } else {
                    uplinks.clone()
                };
                table.set_ports(d.addr, ports)?;
            }
            log::debug!("{}: {} entries, {} uplinks", name, table.len(), uplinks.len());
            fibs.insert(table);
        }

        for &spine in &spines {
            let name = &self.topo[spine].name;
            let downlinks = self.topo.attachments_towards(spine, NodeRole::Leaf);

            let mut table = ForwardingTable::new(name);
            for d in &dests {
                let ports: PortSet = downlinks
                    .iter()
                    .filter(|att| att.peer == d.leaf)
                    .map(|att| att.local_port)
                    .take(1)
                    .collect();
                table.set_ports(d.addr, ports)?;
            }
            log::debug!("{}: {} entries", name, table.len());
            fibs.insert(table);
        }

        log::info!(
            "planned ECMP tables for {} switches, {} destinations",
            fibs.len(),
            dests.len()
        );
        Ok(fibs)
    }
}
