//! The physical compute fabric: routers, switches, and hosts joined by
//! undirected links.
//!
//! Hosts carry placement slots derived from their memory; routers and
//! switches exist purely to shape the topology. Slot counters are guarded by
//! a per-node mutex so concurrent placement requests can share a scenario.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use rustc_hash::FxHashMap;

use crate::constants::{LOCAL_BANDWIDTH, SLOT_MEMORY_SIZE};
use crate::units::{BitsPerSec, Bytes, Millisecs};

identifier!(NodeId);
identifier!(LinkId);
identifier!(HostName);

/// What a physical node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhysKind {
    Router,
    Switch,
    Host,
}

/// A physical node. Only hosts have non-zero slot capacity.
#[derive(Debug)]
pub struct PhysNode {
    pub id: NodeId,
    pub kind: PhysKind,
    pub mips: u64,
    pub cores: u64,
    pub memory: Bytes,
    pub labels: BTreeMap<String, String>,
    slots: u64,
    occupied: Mutex<u64>,
}

impl PhysNode {
    /// Creates a router node.
    pub fn new_router(id: impl Into<NodeId>) -> Self {
        Self::bare(id, PhysKind::Router)
    }

    /// Creates a switch node.
    pub fn new_switch(id: impl Into<NodeId>) -> Self {
        Self::bare(id, PhysKind::Switch)
    }

    /// Creates a host node. Slot capacity is derived from memory.
    pub fn new_host(
        id: impl Into<NodeId>,
        mips: u64,
        cores: u64,
        memory: Bytes,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: PhysKind::Host,
            mips,
            cores,
            memory,
            labels,
            slots: memory.into_u64() / SLOT_MEMORY_SIZE.into_u64(),
            occupied: Mutex::new(0),
        }
    }

    fn bare(id: impl Into<NodeId>, kind: PhysKind) -> Self {
        Self {
            id: id.into(),
            kind,
            mips: 0,
            cores: 0,
            memory: Bytes::ZERO,
            labels: BTreeMap::new(),
            slots: 0,
            occupied: Mutex::new(0),
        }
    }

    /// Total slot capacity.
    pub fn slots(&self) -> u64 {
        self.slots
    }

    /// Currently occupied slots.
    pub fn occupied(&self) -> u64 {
        *self.occupied.lock().unwrap()
    }

    /// Free slots right now.
    pub fn free_slots(&self) -> u64 {
        self.slots.saturating_sub(self.occupied())
    }

    /// Atomically claims `n` slots. Returns false (claiming nothing) if fewer
    /// than `n` are free.
    pub fn occupy(&self, n: u64) -> bool {
        let mut occupied = self.occupied.lock().unwrap();
        if self.slots - *occupied >= n {
            *occupied += n;
            true
        } else {
            false
        }
    }

    /// Returns `n` previously claimed slots.
    pub fn release(&self, n: u64) {
        let mut occupied = self.occupied.lock().unwrap();
        *occupied = occupied.saturating_sub(n);
    }

    /// The host label used for placement pinning, if any.
    pub fn host_label(&self) -> Option<&str> {
        self.labels.get(crate::dataflow::HOST_CONSTRAINT).map(String::as_str)
    }

    /// Whether this node's labels satisfy all of `required`.
    pub fn matches_labels(&self, required: &BTreeMap<String, String>) -> bool {
        required
            .iter()
            .all(|(k, v)| self.labels.get(k).map(|have| have == v).unwrap_or(false))
    }
}

impl Clone for PhysNode {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            kind: self.kind,
            mips: self.mips,
            cores: self.cores,
            memory: self.memory,
            labels: self.labels.clone(),
            slots: self.slots,
            occupied: Mutex::new(self.occupied()),
        }
    }
}

/// An undirected physical link.
#[derive(Debug)]
pub struct PhysLink {
    pub id: LinkId,
    pub bandwidth: BitsPerSec,
    pub delay: Millisecs,
    occupied_bw: Mutex<u64>,
}

impl PhysLink {
    /// Creates a link with the given bandwidth and propagation delay.
    pub fn new(id: impl Into<LinkId>, bandwidth: BitsPerSec, delay: Millisecs) -> Self {
        Self {
            id: id.into(),
            bandwidth,
            delay,
            occupied_bw: Mutex::new(0),
        }
    }

    /// Aggregate bandwidth of streams routed over this link.
    pub fn occupied_bw(&self) -> BitsPerSec {
        BitsPerSec::new(*self.occupied_bw.lock().unwrap())
    }

    /// Records a stream's bandwidth demand on this link.
    pub fn occupy(&self, bw: BitsPerSec) {
        *self.occupied_bw.lock().unwrap() += bw.into_u64();
    }
}

impl Clone for PhysLink {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            bandwidth: self.bandwidth,
            delay: self.delay,
            occupied_bw: Mutex::new(self.occupied_bw().into_u64()),
        }
    }
}

/// The physical fabric as an undirected graph.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    graph: UnGraph<PhysNode, PhysLink>,
    id2idx: FxHashMap<NodeId, NodeIndex>,
}

impl Topology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node.
    pub fn add_node(&mut self, node: PhysNode) -> Result<(), TopologyError> {
        let id = node.id.clone();
        if self.id2idx.contains_key(&id) {
            return Err(TopologyError::DuplicateNode(id));
        }
        let idx = self.graph.add_node(node);
        self.id2idx.insert(id, idx);
        Ok(())
    }

    /// Connects two nodes with a link.
    pub fn connect(
        &mut self,
        a: &NodeId,
        b: &NodeId,
        link: PhysLink,
    ) -> Result<(), TopologyError> {
        if a == b {
            return Err(TopologyError::NodeAdjacentSelf(a.clone()));
        }
        let ai = self.idx_of(a)?;
        let bi = self.idx_of(b)?;
        if self.graph.find_edge(ai, bi).is_some() {
            return Err(TopologyError::DuplicateLink {
                n1: a.clone(),
                n2: b.clone(),
            });
        }
        self.graph.add_edge(ai, bi, link);
        Ok(())
    }

    fn idx_of(&self, id: &NodeId) -> Result<NodeIndex, TopologyError> {
        self.id2idx
            .get(id)
            .copied()
            .ok_or_else(|| TopologyError::UndeclaredNode(id.clone()))
    }

    /// Returns the node with the given ID, if any.
    pub fn node(&self, id: &NodeId) -> Option<&PhysNode> {
        self.id2idx.get(id).map(|&idx| &self.graph[idx])
    }

    /// Returns an iterator over all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &PhysNode> {
        self.graph.node_weights()
    }

    /// Returns an iterator over all hosts.
    pub fn hosts(&self) -> impl Iterator<Item = &PhysNode> {
        self.nodes().filter(|n| matches!(n.kind, PhysKind::Host))
    }

    /// Returns an iterator over all links.
    pub fn links(&self) -> impl Iterator<Item = &PhysLink> {
        self.graph.edge_weights()
    }

    /// The number of links.
    pub fn nr_links(&self) -> usize {
        self.graph.edge_count()
    }

    /// Shortest path between two nodes by hop count, as a list of edges.
    fn path_between(&self, a: NodeIndex, b: NodeIndex) -> Option<Vec<EdgeIndex>> {
        let mut prev: FxHashMap<NodeIndex, NodeIndex> = FxHashMap::default();
        let mut queue = VecDeque::from([a]);
        prev.insert(a, a);
        while let Some(n) = queue.pop_front() {
            if n == b {
                break;
            }
            for succ in self.graph.neighbors(n) {
                if !prev.contains_key(&succ) {
                    prev.insert(succ, n);
                    queue.push_back(succ);
                }
            }
        }
        if !prev.contains_key(&b) {
            return None;
        }
        let mut edges = Vec::new();
        let mut cur = b;
        while cur != a {
            let p = prev[&cur];
            edges.push(self.graph.find_edge(p, cur).unwrap());
            cur = p;
        }
        edges.reverse();
        Some(edges)
    }

    /// Sum of propagation delays along the shortest path between two nodes.
    pub fn intrinsic_latency(&self, a: &NodeId, b: &NodeId) -> Result<Millisecs, TopologyError> {
        if a == b {
            return Ok(Millisecs::ZERO);
        }
        let path = self
            .path_between(self.idx_of(a)?, self.idx_of(b)?)
            .ok_or_else(|| TopologyError::NoPath {
                from: a.clone(),
                to: b.clone(),
            })?;
        Ok(path.iter().map(|&e| self.graph[e].delay).sum())
    }

    /// Time to push one unit across the shortest path between two nodes,
    /// under a proportional-share model: each link grants the stream
    /// `bandwidth / occupied_bw × request_bw` of capacity. Co-located
    /// endpoints transfer at [`LOCAL_BANDWIDTH`].
    pub fn transmission_latency(
        &self,
        a: &NodeId,
        b: &NodeId,
        unit_size: Bytes,
        request_bw: BitsPerSec,
    ) -> Result<Millisecs, TopologyError> {
        if a == b {
            let ms = unit_size.into_f64() / LOCAL_BANDWIDTH.into_f64() * 1000.0;
            return Ok(Millisecs::new(ms as u64));
        }
        let path = self
            .path_between(self.idx_of(a)?, self.idx_of(b)?)
            .ok_or_else(|| TopologyError::NoPath {
                from: a.clone(),
                to: b.clone(),
            })?;
        let mut total = 0.0f64;
        for &e in &path {
            let link = &self.graph[e];
            let occupied = link.occupied_bw().into_f64();
            let share = if occupied == 0.0 {
                link.bandwidth.into_f64()
            } else {
                link.bandwidth.into_f64() / occupied * request_bw.into_f64()
            };
            total += unit_size.into_f64() / share * 1000.0;
        }
        Ok(Millisecs::new(total as u64))
    }

    /// Time to process `mi` million instructions on a node, assuming single
    /// threaded execution and cores shared evenly across occupants.
    pub fn computation_latency(&self, id: &NodeId, mi: u64) -> Result<Millisecs, TopologyError> {
        let node = self.node(id).ok_or_else(|| TopologyError::UndeclaredNode(id.clone()))?;
        if !matches!(node.kind, PhysKind::Host) {
            return Err(TopologyError::NotAHost(id.clone()));
        }
        let occupied = node.occupied();
        let factor = if occupied == 0 {
            1.0
        } else {
            (node.cores as f64 / occupied as f64).min(1.0)
        };
        let ms = mi as f64 / (factor * node.mips as f64) * 1000.0;
        Ok(Millisecs::new(ms as u64))
    }

    /// Records a stream's bandwidth on every link of the shortest path
    /// between two nodes. Co-located endpoints occupy nothing.
    pub fn occupy_path(
        &self,
        a: &NodeId,
        b: &NodeId,
        bw: BitsPerSec,
    ) -> Result<(), TopologyError> {
        if a == b {
            return Ok(());
        }
        let path = self
            .path_between(self.idx_of(a)?, self.idx_of(b)?)
            .ok_or_else(|| TopologyError::NoPath {
                from: a.clone(),
                to: b.clone(),
            })?;
        for &e in &path {
            self.graph[e].occupy(bw);
        }
        Ok(())
    }
}

/// An error type listing some of the reasons a topology is invalid.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// Duplicate node ID.
    #[error("duplicate node {0}")]
    DuplicateNode(NodeId),

    /// A link references a node that does not exist.
    #[error("node {0} is not declared")]
    UndeclaredNode(NodeId),

    /// A node is connected to itself.
    #[error("node {0} is connected to itself")]
    NodeAdjacentSelf(NodeId),

    /// Duplicate link between two nodes.
    #[error("duplicate links between {n1} and {n2}")]
    DuplicateLink {
        /// The first node.
        n1: NodeId,
        /// The second node.
        n2: NodeId,
    },

    /// No path between two nodes.
    #[error("no path from {from} to {to}")]
    NoPath {
        /// The starting node.
        from: NodeId,
        /// The unreachable node.
        to: NodeId,
    },

    /// A latency query that only makes sense on a host hit another kind.
    #[error("node {0} is not a host")]
    NotAHost(NodeId),
}
