//! Streaming job graphs: typed vertices connected by fixed-rate streams.
//!
//! A [`Dataflow`] is a DAG of sources, operators, and sinks. Each edge carries
//! a fixed-rate [`Stream`]; every vertex tracks the aggregate bandwidth of its
//! incident streams, which the cut and provisioning stages use as weights.

use std::collections::BTreeMap;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::units::{BitsPerSec, Bytes};

identifier!(VertexId);
identifier!(JobId);

/// The constraint key that pins a vertex to a named host.
pub const HOST_CONSTRAINT: &str = "host";

/// The role a vertex plays in its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VertexKind {
    /// Emits a stream; pinned to the host where the data originates.
    Source,
    /// Transforms streams; free to run anywhere.
    Operator,
    /// Consumes a stream; pinned to the host that ingests the results.
    Sink,
}

/// A single vertex of a streaming job.
#[derive(Debug, Clone)]
pub struct Vertex {
    pub id: VertexId,
    pub kind: VertexKind,
    /// Keyed placement constraints. The [`HOST_CONSTRAINT`] key pins the
    /// vertex to a named host; other keys must match host labels.
    pub constraints: BTreeMap<String, String>,
    /// Size of one emitted unit, in bytes.
    pub unit_size: Bytes,
    /// Emitted units per second.
    pub unit_rate: u64,
    /// Computation weight in million instructions per unit.
    pub mi: u64,
    /// Resident memory requirement.
    pub memory: Bytes,
    /// Aggregate bandwidth of incoming streams. Derived from the edge set.
    pub upstream_bw: BitsPerSec,
    /// Aggregate bandwidth of outgoing streams. Derived from the edge set.
    pub downstream_bw: BitsPerSec,
}

impl Vertex {
    /// Creates a source pinned to `host`.
    pub fn source(id: impl Into<VertexId>, host: impl Into<String>) -> Self {
        let mut v = Self::bare(id, VertexKind::Source);
        v.constraints.insert(HOST_CONSTRAINT.to_owned(), host.into());
        v
    }

    /// Creates an unconstrained operator.
    pub fn operator(id: impl Into<VertexId>) -> Self {
        Self::bare(id, VertexKind::Operator)
    }

    /// Creates a sink pinned to `host`.
    pub fn sink(id: impl Into<VertexId>, host: impl Into<String>) -> Self {
        let mut v = Self::bare(id, VertexKind::Sink);
        v.constraints.insert(HOST_CONSTRAINT.to_owned(), host.into());
        v
    }

    fn bare(id: impl Into<VertexId>, kind: VertexKind) -> Self {
        Self {
            id: id.into(),
            kind,
            constraints: BTreeMap::new(),
            unit_size: Bytes::ZERO,
            unit_rate: 0,
            mi: 0,
            memory: Bytes::ZERO,
            upstream_bw: BitsPerSec::ZERO,
            downstream_bw: BitsPerSec::ZERO,
        }
    }

    /// The host this vertex is pinned to, if any.
    pub fn pinned_host(&self) -> Option<&str> {
        self.constraints.get(HOST_CONSTRAINT).map(String::as_str)
    }
}

/// A fixed-rate stream between two vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Stream {
    /// Size of one unit, in bytes.
    pub unit_size: Bytes,
    /// Units per second.
    pub per_second: u64,
}

impl Stream {
    /// Creates a stream with the given unit size and rate.
    pub const fn new(unit_size: Bytes, per_second: u64) -> Self {
        Self {
            unit_size,
            per_second,
        }
    }

    /// The stream's bandwidth demand.
    pub fn bandwidth(&self) -> BitsPerSec {
        BitsPerSec::new(self.unit_size.into_u64() * self.per_second)
    }
}

/// A streaming job: a DAG of vertices and streams.
#[derive(Debug, Clone)]
pub struct Dataflow {
    id: JobId,
    graph: StableDiGraph<Vertex, Stream>,
    id2idx: FxHashMap<VertexId, NodeIndex>,
}

impl Dataflow {
    /// Creates an empty job.
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            graph: StableDiGraph::new(),
            id2idx: FxHashMap::default(),
        }
    }

    /// The job's ID.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Adds a vertex. Its bandwidth aggregates are reset; they are derived
    /// from the streams connected afterwards.
    pub fn add_vertex(&mut self, vertex: Vertex) -> Result<(), DataflowError> {
        let mut vertex = vertex;
        vertex.upstream_bw = BitsPerSec::ZERO;
        vertex.downstream_bw = BitsPerSec::ZERO;
        let id = vertex.id.clone();
        if self.id2idx.contains_key(&id) {
            return Err(DataflowError::DuplicateVertex(id));
        }
        let idx = self.graph.add_node(vertex);
        self.id2idx.insert(id, idx);
        Ok(())
    }

    /// Connects two vertices with a stream and updates both bandwidth
    /// aggregates.
    pub fn connect(
        &mut self,
        from: &VertexId,
        to: &VertexId,
        stream: Stream,
    ) -> Result<(), DataflowError> {
        let a = self.idx_of(from)?;
        let b = self.idx_of(to)?;
        let bw = stream.bandwidth();
        self.graph.add_edge(a, b, stream);
        self.graph[a].downstream_bw += bw;
        self.graph[b].upstream_bw += bw;
        Ok(())
    }

    fn idx_of(&self, id: &VertexId) -> Result<NodeIndex, DataflowError> {
        self.id2idx
            .get(id)
            .copied()
            .ok_or_else(|| DataflowError::UnknownVertex(id.clone()))
    }

    /// Returns the vertex with the given ID, if any.
    pub fn vertex(&self, id: &VertexId) -> Option<&Vertex> {
        self.id2idx.get(id).map(|&idx| &self.graph[idx])
    }

    /// Whether the job contains the given vertex.
    pub fn contains(&self, id: &VertexId) -> bool {
        self.id2idx.contains_key(id)
    }

    /// Returns an iterator over all vertices in insertion order.
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.graph.node_weights()
    }

    /// The number of vertices.
    pub fn nr_vertices(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the job has no vertices left.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Returns an iterator over all streams as `(from, to, stream)`.
    pub fn streams(&self) -> impl Iterator<Item = (&VertexId, &VertexId, &Stream)> {
        self.graph.edge_references().map(|e| {
            (
                &self.graph[e.source()].id,
                &self.graph[e.target()].id,
                e.weight(),
            )
        })
    }

    /// Returns the stream between two vertices, if any.
    pub fn stream(&self, from: &VertexId, to: &VertexId) -> Option<&Stream> {
        let a = *self.id2idx.get(from)?;
        let b = *self.id2idx.get(to)?;
        let e = self.graph.find_edge(a, b)?;
        self.graph.edge_weight(e)
    }

    /// Removes a vertex, deducting its streams from the neighbors' bandwidth
    /// aggregates so they stay consistent with the remaining edge set.
    pub fn remove_vertex(&mut self, id: &VertexId) -> Option<Vertex> {
        let idx = self.id2idx.remove(id)?;
        let incoming = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (e.source(), e.weight().bandwidth()))
            .collect::<Vec<_>>();
        for (up, bw) in incoming {
            self.graph[up].downstream_bw -= bw;
        }
        let outgoing = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.target(), e.weight().bandwidth()))
            .collect::<Vec<_>>();
        for (down, bw) in outgoing {
            self.graph[down].upstream_bw -= bw;
        }
        self.graph.remove_node(idx)
    }

    /// All source vertices.
    pub fn sources(&self) -> Vec<&Vertex> {
        self.of_kind(VertexKind::Source)
    }

    /// All sink vertices.
    pub fn sinks(&self) -> Vec<&Vertex> {
        self.of_kind(VertexKind::Sink)
    }

    /// All operator vertices.
    pub fn operators(&self) -> Vec<&Vertex> {
        self.of_kind(VertexKind::Operator)
    }

    fn of_kind(&self, kind: VertexKind) -> Vec<&Vertex> {
        self.vertices().filter(|v| v.kind == kind).collect()
    }

    /// Vertices with no incoming streams.
    pub fn in_vertices(&self) -> Vec<&Vertex> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| &self.graph[idx])
            .collect()
    }

    /// Vertices with no outgoing streams.
    pub fn out_vertices(&self) -> Vec<&Vertex> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|idx| &self.graph[idx])
            .collect()
    }

    /// Direct predecessors of a vertex.
    pub fn upstream_of(&self, id: &VertexId) -> Vec<&Vertex> {
        self.neighbors_of(id, Direction::Incoming)
    }

    /// Direct successors of a vertex.
    pub fn downstream_of(&self, id: &VertexId) -> Vec<&Vertex> {
        self.neighbors_of(id, Direction::Outgoing)
    }

    fn neighbors_of(&self, id: &VertexId, dir: Direction) -> Vec<&Vertex> {
        match self.id2idx.get(id) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, dir)
                .map(|n| &self.graph[n])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Vertices in topological order.
    pub fn topological_order(&self) -> Result<Vec<&Vertex>, DataflowError> {
        petgraph::algo::toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|idx| &self.graph[idx]).collect())
            .map_err(|_| DataflowError::Cycle(self.id.clone()))
    }

    /// Vertices in topological order, always dequeuing the ready vertex with
    /// the largest upstream bandwidth (ties broken by insertion order). The
    /// provisioner uses this order to form placement prefixes whose cross-cut
    /// bandwidth is approximated by the next vertex's upstream bandwidth.
    pub fn topological_order_by_upstream(&self) -> Vec<&Vertex> {
        let mut in_degree: FxHashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                (
                    idx,
                    self.graph.neighbors_directed(idx, Direction::Incoming).count(),
                )
            })
            .collect();
        let mut ready = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx] == 0)
            .collect::<Vec<_>>();
        let mut order = Vec::with_capacity(self.graph.node_count());
        while !ready.is_empty() {
            let pick = ready
                .iter()
                .enumerate()
                .max_by(|(_, &a), (_, &b)| {
                    self.graph[a]
                        .upstream_bw
                        .cmp(&self.graph[b].upstream_bw)
                        // On equal bandwidth prefer the earlier-inserted vertex.
                        .then_with(|| b.index().cmp(&a.index()))
                })
                .map(|(i, _)| i)
                .unwrap();
            let idx = ready.swap_remove(pick);
            order.push(&self.graph[idx]);
            for succ in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                let d = in_degree.get_mut(&succ).unwrap();
                *d -= 1;
                if *d == 0 {
                    ready.push(succ);
                }
            }
        }
        debug_assert_eq!(order.len(), self.graph.node_count());
        order
    }

    /// Builds a new job from the vertices in `keep`, with all streams between
    /// them. Bandwidth aggregates are rebuilt from the surviving streams.
    pub fn sub_graph(&self, keep: &FxHashSet<VertexId>, id: impl Into<JobId>) -> Dataflow {
        let mut sub = Dataflow::new(id);
        for v in self.vertices() {
            if keep.contains(&v.id) {
                sub.add_vertex(v.clone()).unwrap();
            }
        }
        for (from, to, stream) in self.streams() {
            if keep.contains(from) && keep.contains(to) {
                sub.connect(from, to, *stream).unwrap();
            }
        }
        sub
    }

    /// Merges several jobs with disjoint vertex sets into one.
    pub fn merge(
        parts: impl IntoIterator<Item = Dataflow>,
        id: impl Into<JobId>,
    ) -> Result<Dataflow, DataflowError> {
        let mut merged = Dataflow::new(id);
        for part in parts {
            for v in part.vertices() {
                merged.add_vertex(v.clone())?;
            }
            for (from, to, stream) in part.streams() {
                merged.connect(from, to, *stream)?;
            }
        }
        Ok(merged)
    }

    /// Splits the job into its connected components (over the undirected
    /// projection). A single component keeps the job's ID; otherwise each
    /// component gets a derived ID.
    pub fn connected_components(&self) -> Vec<Dataflow> {
        let mut visited = FxHashSet::default();
        let mut components: Vec<FxHashSet<VertexId>> = Vec::new();
        for start in self.graph.node_indices() {
            if !visited.insert(start) {
                continue;
            }
            let mut member = FxHashSet::default();
            let mut queue = vec![start];
            while let Some(idx) = queue.pop() {
                member.insert(self.graph[idx].id.clone());
                for n in self.graph.neighbors_undirected(idx) {
                    if visited.insert(n) {
                        queue.push(n);
                    }
                }
            }
            components.push(member);
        }
        if components.len() <= 1 {
            return vec![self.clone()];
        }
        components
            .into_iter()
            .enumerate()
            .map(|(i, member)| self.sub_graph(&member, format!("{}.{}", self.id, i)))
            .collect()
    }

    /// Validates the job's structural invariants: acyclicity, source/sink
    /// pinning, and degree rules.
    pub fn validate(&self) -> Result<(), DataflowError> {
        self.topological_order()?;
        for v in self.vertices() {
            match v.kind {
                VertexKind::Source => {
                    if v.pinned_host().is_none() {
                        return Err(DataflowError::SourceNotPinned(v.id.clone()));
                    }
                    if !self.upstream_of(&v.id).is_empty() {
                        return Err(DataflowError::SourceHasInputs(v.id.clone()));
                    }
                }
                VertexKind::Sink => {
                    if v.pinned_host().is_none() {
                        return Err(DataflowError::SinkNotPinned(v.id.clone()));
                    }
                    if !self.downstream_of(&v.id).is_empty() {
                        return Err(DataflowError::SinkHasOutputs(v.id.clone()));
                    }
                }
                VertexKind::Operator => {
                    if v.pinned_host().is_some() {
                        return Err(DataflowError::OperatorPinned(v.id.clone()));
                    }
                }
            }
        }
        Ok(())
    }
}

/// An error type listing the ways a job graph can be invalid.
#[derive(Debug, thiserror::Error)]
pub enum DataflowError {
    /// Duplicate vertex ID.
    #[error("duplicate vertex {0}")]
    DuplicateVertex(VertexId),

    /// A stream references a vertex that does not exist.
    #[error("unknown vertex {0}")]
    UnknownVertex(VertexId),

    /// The job graph contains a cycle.
    #[error("job {0} contains a cycle")]
    Cycle(JobId),

    /// A source without a host constraint.
    #[error("source {0} is not pinned to a host")]
    SourceNotPinned(VertexId),

    /// A sink without a host constraint.
    #[error("sink {0} is not pinned to a host")]
    SinkNotPinned(VertexId),

    /// An operator with a host constraint.
    #[error("operator {0} must not be pinned to a host")]
    OperatorPinned(VertexId),

    /// A source with incoming streams.
    #[error("source {0} has incoming streams")]
    SourceHasInputs(VertexId),

    /// A sink with outgoing streams.
    #[error("sink {0} has outgoing streams")]
    SinkHasOutputs(VertexId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn aggregates_follow_edge_set() -> anyhow::Result<()> {
        let g = testing::linear_job("g1", 1, 1000);
        let v2 = g.vertex(&"v2".into()).unwrap();
        assert_eq!(v2.upstream_bw, BitsPerSec::new(1000));
        assert_eq!(v2.downstream_bw, BitsPerSec::new(1000));
        let v1 = g.vertex(&"v1".into()).unwrap();
        assert_eq!(v1.upstream_bw, BitsPerSec::ZERO);
        assert_eq!(v1.downstream_bw, BitsPerSec::new(1000));
        Ok(())
    }

    #[test]
    fn remove_vertex_deducts_neighbor_aggregates() {
        let mut g = testing::linear_job("g1", 1, 1000);
        g.remove_vertex(&"v1".into());
        let v2 = g.vertex(&"v2".into()).unwrap();
        assert_eq!(v2.upstream_bw, BitsPerSec::ZERO);
        assert_eq!(v2.downstream_bw, BitsPerSec::new(1000));
    }

    #[test]
    fn sub_graph_of_all_vertices_recovers_job() {
        let g = testing::diamond_job("g1");
        let all = g.vertices().map(|v| v.id.clone()).collect();
        let copy = g.sub_graph(&all, "g2");
        assert_eq!(copy.nr_vertices(), g.nr_vertices());
        assert_eq!(copy.streams().count(), g.streams().count());
        for v in g.vertices() {
            let c = copy.vertex(&v.id).unwrap();
            assert_eq!(c.upstream_bw, v.upstream_bw);
            assert_eq!(c.downstream_bw, v.downstream_bw);
        }
    }

    #[test]
    fn upstream_weighted_order_prefers_heavy_vertices() {
        let g = testing::diamond_job("g1");
        let order = g
            .topological_order_by_upstream()
            .iter()
            .map(|v| v.id.as_str().to_owned())
            .collect::<Vec<_>>();
        // v1 is the only ready vertex at first; afterwards the heavier
        // in-bandwidth vertex of each level is dequeued first.
        assert_eq!(order[0], "v1");
        assert!(order.iter().position(|v| v == "v22") < order.iter().position(|v| v == "v21"));
        assert_eq!(order.len(), 6);
    }

    #[test]
    fn components_split_after_bridge_removal() {
        let mut g = testing::diamond_job("g1");
        // Removing the source disconnects the two operator chains only once
        // the shared sink goes as well.
        g.remove_vertex(&"v1".into());
        g.remove_vertex(&"v4".into());
        let mut parts = g.connected_components();
        parts.sort_by_key(|p| p.id().to_string());
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.nr_vertices() == 2));
    }

    #[test]
    fn cycle_is_rejected() {
        let mut g = Dataflow::new("g1");
        g.add_vertex(Vertex::operator("a")).unwrap();
        g.add_vertex(Vertex::operator("b")).unwrap();
        g.connect(&"a".into(), &"b".into(), Stream::new(Bytes::ONE, 1))
            .unwrap();
        g.connect(&"b".into(), &"a".into(), Stream::new(Bytes::ONE, 1))
            .unwrap();
        assert!(matches!(g.validate(), Err(DataflowError::Cycle(..))));
    }

    #[test]
    fn unpinned_source_is_rejected() {
        let mut g = Dataflow::new("g1");
        let mut src = Vertex::source("s", "h1");
        src.constraints.clear();
        g.add_vertex(src).unwrap();
        assert!(matches!(
            g.validate(),
            Err(DataflowError::SourceNotPinned(..))
        ));
    }

    #[test]
    fn pinned_operator_is_rejected() {
        let mut g = Dataflow::new("g1");
        let mut op = Vertex::operator("o");
        op.constraints
            .insert(HOST_CONSTRAINT.to_owned(), "h1".to_owned());
        g.add_vertex(op).unwrap();
        assert!(matches!(
            g.validate(),
            Err(DataflowError::OperatorPinned(..))
        ));
    }

    #[test]
    fn merge_rejects_duplicates() {
        let a = testing::linear_job("a", 1, 10);
        let b = testing::linear_job("b", 1, 10);
        assert!(matches!(
            Dataflow::merge([a, b], "ab"),
            Err(DataflowError::DuplicateVertex(..))
        ));
    }
}
