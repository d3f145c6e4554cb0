use std::net::Ipv4Addr;
use std::ops::Index;

use fnv::FnvHashMap as HashMap;
use petgraph::{
    dot::Dot,
    graph::{EdgeIndex, NodeIndex, UnGraph},
};
use serde::{Deserialize, Serialize};

use crate::bandwidth::Bandwidth;
use crate::counters::PortKey;
use crate::{Error, Result};

pub type NodeIx = NodeIndex;
pub type LinkIx = EdgeIndex;
pub type PortNo = u32;

/// The port a host uses towards its leaf.
pub const HOST_PORT: PortNo = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeRole {
    Spine,
    Leaf,
    Host,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub role: NodeRole,
    /// Only hosts are addressed.
    pub addr: Option<Ipv4Addr>,
}

impl Node {
    #[inline]
    pub fn spine(name: &str) -> Self {
        Node {
            name: name.to_owned(),
            role: NodeRole::Spine,
            addr: None,
        }
    }

    #[inline]
    pub fn leaf(name: &str) -> Self {
        Node {
            name: name.to_owned(),
            role: NodeRole::Leaf,
            addr: None,
        }
    }

    #[inline]
    pub fn host(name: &str, addr: Ipv4Addr) -> Self {
        Node {
            name: name.to_owned(),
            role: NodeRole::Host,
            addr: Some(addr),
        }
    }

    #[inline]
    pub fn is_switch(&self) -> bool {
        !matches!(self.role, NodeRole::Host)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "{} ({})", self.name, addr),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An undirected link. `ports[i]` is the port on the i-th endpoint as returned by
/// `edge_endpoints`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub capacity: Bandwidth,
    ports: [PortNo; 2],
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}-{}]", self.capacity, self.ports[0], self.ports[1])
    }
}

/// One end of a link seen from `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub link: LinkIx,
    pub local_port: PortNo,
    pub peer: NodeIx,
    pub peer_port: PortNo,
}

/// Shape of a canonical leaf-spine fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafSpineDims {
    pub spines: usize,
    pub leaves: usize,
    pub hosts_per_leaf: usize,
}

impl Default for LeafSpineDims {
    fn default() -> Self {
        LeafSpineDims {
            spines: 4,
            leaves: 4,
            hosts_per_leaf: 4,
        }
    }
}

impl LeafSpineDims {
    #[inline]
    pub fn total_hosts(&self) -> usize {
        self.leaves * self.hosts_per_leaf
    }
}

/// Switches, hosts and the links between them.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Topology {
    graph: UnGraph<Node, Link>,
    node_map: HashMap<String, NodeIx>,
}

impl Topology {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self> {
        let mut topo = Topology::new();
        for n in nodes {
            topo.add_node(n)?;
        }
        Ok(topo)
    }

    /// Build the fabric the experiments run on: `spine1..S`, `leaf1..L`, hosts
    /// `h1..` numbered across leaves with address `10.0.<leaf>.<host>`. On a leaf,
    /// hosts use ports `1..=H` and spine `s` uses port `H + s`; on a spine, leaf `l`
    /// uses port `l`.
    pub fn leaf_spine(dims: LeafSpineDims, capacity: Bandwidth) -> Result<Self> {
        if dims.leaves > u8::MAX as usize || dims.hosts_per_leaf > u8::MAX as usize {
            return Err(Error::Topology(format!(
                "{} leaves x {} hosts does not fit the 10.0.L.H address plan",
                dims.leaves, dims.hosts_per_leaf
            )));
        }

        let mut topo = Topology::new();
        for s in 1..=dims.spines {
            topo.add_node(Node::spine(&format!("spine{}", s)))?;
        }

        let mut host_id = 1;
        for l in 1..=dims.leaves {
            let leaf = format!("leaf{}", l);
            topo.add_node(Node::leaf(&leaf))?;
            for h in 1..=dims.hosts_per_leaf {
                let host = format!("h{}", host_id);
                topo.add_node(Node::host(&host, Ipv4Addr::new(10, 0, l as u8, h as u8)))?;
                topo.add_link_by_name(&host, HOST_PORT, &leaf, h as PortNo, capacity)?;
                host_id += 1;
            }
            for s in 1..=dims.spines {
                let port = (dims.hosts_per_leaf + s) as PortNo;
                topo.add_link_by_name(&leaf, port, &format!("spine{}", s), l as PortNo, capacity)?;
            }
        }

        log::debug!(
            "built leaf-spine fabric: {} spines, {} leaves, {} hosts",
            dims.spines,
            dims.leaves,
            dims.total_hosts()
        );
        Ok(topo)
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeIx> {
        if self.node_map.contains_key(&node.name) {
            return Err(Error::Topology(format!("repeated node name: {}", node.name)));
        }
        let name = node.name.clone();
        let ix = self.graph.add_node(node);
        self.node_map.insert(name, ix);
        Ok(ix)
    }

    pub fn add_link_by_name(
        &mut self,
        a: &str,
        a_port: PortNo,
        b: &str,
        b_port: PortNo,
        capacity: Bandwidth,
    ) -> Result<LinkIx> {
        let a_ix = self.lookup(a)?;
        let b_ix = self.lookup(b)?;
        if a_ix == b_ix {
            return Err(Error::Topology(format!("self loop on {}", a)));
        }
        for (ix, port) in [(a_ix, a_port), (b_ix, b_port)].iter() {
            if self.attachments(*ix).iter().any(|att| att.local_port == *port) {
                return Err(Error::Topology(format!(
                    "port {} of {} is already in use",
                    port, self.graph[*ix].name
                )));
            }
        }
        Ok(self.graph.add_edge(
            a_ix,
            b_ix,
            Link {
                capacity,
                ports: [a_port, b_port],
            },
        ))
    }

    #[inline]
    pub fn get_node_index(&self, name: &str) -> Option<NodeIx> {
        self.node_map.get(name).copied()
    }

    fn lookup(&self, name: &str) -> Result<NodeIx> {
        self.get_node_index(name)
            .ok_or_else(|| Error::Topology(format!("cannot find node with name: {}", name)))
    }

    /// Nodes of one role, in insertion order.
    pub fn nodes_with_role(&self, role: NodeRole) -> Vec<NodeIx> {
        self.graph
            .node_indices()
            .filter(|&ix| self.graph[ix].role == role)
            .collect()
    }

    #[inline]
    pub fn spines(&self) -> Vec<NodeIx> {
        self.nodes_with_role(NodeRole::Spine)
    }

    #[inline]
    pub fn leaves(&self) -> Vec<NodeIx> {
        self.nodes_with_role(NodeRole::Leaf)
    }

    #[inline]
    pub fn hosts(&self) -> Vec<NodeIx> {
        self.nodes_with_role(NodeRole::Host)
    }

    #[inline]
    pub fn num_switches(&self) -> usize {
        self.graph.node_count() - self.hosts().len()
    }

    /// Every link of `ix`, sorted by local port.
    pub fn attachments(&self, ix: NodeIx) -> Vec<Attachment> {
        use petgraph::visit::EdgeRef;
        // `edges` reports `ix` as the source whichever end it is stored at,
        // so the port order follows the stored endpoints
        let mut atts: Vec<Attachment> = self
            .graph
            .edges(ix)
            .filter_map(|e| {
                let link_ix = e.id();
                let (first, _) = self.graph.edge_endpoints(link_ix)?;
                let ports = self.graph[link_ix].ports;
                let (local_port, peer_port) = if first == ix {
                    (ports[0], ports[1])
                } else {
                    (ports[1], ports[0])
                };
                Some(Attachment {
                    link: link_ix,
                    local_port,
                    peer: e.target(),
                    peer_port,
                })
            })
            .collect();
        atts.sort_by_key(|att| att.local_port);
        atts
    }

    /// Links of `ix` whose peer has the given role.
    pub fn attachments_towards(&self, ix: NodeIx, role: NodeRole) -> Vec<Attachment> {
        self.attachments(ix)
            .into_iter()
            .filter(|att| self.graph[att.peer].role == role)
            .collect()
    }

    /// The leaf a host hangs off. A host must have exactly one link, and it must
    /// reach a leaf.
    pub fn leaf_of(&self, host: NodeIx) -> Result<NodeIx> {
        let atts = self.attachments(host);
        match atts.as_slice() {
            [att] if self.graph[att.peer].role == NodeRole::Leaf => Ok(att.peer),
            _ => Err(Error::Topology(format!(
                "host {} must be attached to exactly one leaf, found {} links",
                self.graph[host].name,
                atts.len()
            ))),
        }
    }

    /// Capacity of every switch port, keyed the way counters are.
    pub fn port_capacities(&self) -> Vec<(PortKey, Bandwidth)> {
        self.graph
            .node_indices()
            .filter(|&ix| self.graph[ix].is_switch())
            .flat_map(|ix| {
                self.attachments(ix).into_iter().map(move |att| {
                    (
                        PortKey::new(&self.graph[ix].name, att.local_port),
                        self.graph[att.link].capacity,
                    )
                })
            })
            .collect()
    }

    /// Check the leaf-spine invariants: at least one spine and one leaf, every leaf
    /// linked to every spine, and each host attached to exactly one leaf.
    pub fn validate(&self) -> Result<()> {
        let spines = self.spines();
        let leaves = self.leaves();
        if spines.is_empty() || leaves.is_empty() {
            return Err(Error::Topology(format!(
                "need at least one spine and one leaf, found {} spines and {} leaves",
                spines.len(),
                leaves.len()
            )));
        }

        for &leaf in &leaves {
            let uplinks = self.attachments_towards(leaf, NodeRole::Spine);
            for &spine in &spines {
                if !uplinks.iter().any(|att| att.peer == spine) {
                    return Err(Error::Topology(format!(
                        "{} is not linked to {}",
                        self.graph[leaf].name, self.graph[spine].name
                    )));
                }
            }
        }

        for host in self.hosts() {
            self.leaf_of(host)?;
        }

        Ok(())
    }

    pub fn to_dot(&self) -> Dot<&UnGraph<Node, Link>> {
        Dot::with_config(&self.graph, &[])
    }
}

impl Index<NodeIx> for Topology {
    type Output = Node;
    fn index(&self, index: NodeIx) -> &Self::Output {
        &self.graph[index]
    }
}

impl Index<LinkIx> for Topology {
    type Output = Link;
    fn index(&self, index: LinkIx) -> &Self::Output {
        &self.graph[index]
    }
}
