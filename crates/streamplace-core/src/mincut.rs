//! Min s-t cuts over job graphs.
//!
//! A job is turned into a flow network with a virtual source feeding every
//! in-vertex and a virtual sink draining every out-vertex. Max-flow runs by
//! repeated BFS augmentation over paired residual edges; the cut is read off
//! the terminal residual graph. [`cut_options`] iterates the cut on the
//! shrinking source side to produce a chain of increasingly small candidate
//! cuts for the slot allocator.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::constants::{CUT_CHAIN_CAP, UNBOUNDED_CAPACITY};
use crate::dataflow::{Dataflow, JobId, VertexId, VertexKind};
use crate::units::BitsPerSec;

/// One candidate split of a job: the vertices kept edge-side (`s_cut`), the
/// vertices offloaded (`t_cut`), and the bandwidth crossing between them.
#[derive(Debug, Clone)]
pub struct CutOption {
    pub s_cut: FxHashSet<VertexId>,
    pub t_cut: FxHashSet<VertexId>,
    pub flow: BitsPerSec,
}

struct FlowEdge {
    from: usize,
    to: usize,
    cap: u64,
}

/// A residual flow network. Each forward edge at index `2k` is paired with
/// its reverse at `2k + 1`, so residual updates are `cap -= inc` /
/// `cap[idx ^ 1] += inc`.
struct FlowNet {
    out_edges: Vec<Vec<usize>>,
    in_edges: Vec<Vec<usize>>,
    edges: Vec<FlowEdge>,
    source: usize,
    sink: usize,
}

impl FlowNet {
    fn new(nr_vertices: usize) -> Self {
        // Vertices occupy 0..nr; the virtual source and sink come after.
        let source = nr_vertices;
        let sink = nr_vertices + 1;
        Self {
            out_edges: vec![Vec::new(); nr_vertices + 2],
            in_edges: vec![Vec::new(); nr_vertices + 2],
            edges: Vec::new(),
            source,
            sink,
        }
    }

    fn add_edge(&mut self, from: usize, to: usize, cap: u64) {
        for (a, b, c) in [(from, to, cap), (to, from, 0)] {
            let idx = self.edges.len();
            self.edges.push(FlowEdge { from: a, to: b, cap: c });
            self.out_edges[a].push(idx);
            self.in_edges[b].push(idx);
        }
    }

    /// Shortest augmenting path from source to sink, as edge indices.
    fn shortest_path(&self) -> Option<Vec<usize>> {
        let mut visited = vec![false; self.out_edges.len()];
        let mut via: FxHashMap<usize, usize> = FxHashMap::default();
        let mut queue = VecDeque::from([self.source]);
        visited[self.source] = true;
        while let Some(node) = queue.pop_front() {
            if node == self.sink {
                let mut path = Vec::new();
                let mut cur = node;
                while cur != self.source {
                    let e = via[&cur];
                    path.push(e);
                    cur = self.edges[e].from;
                }
                path.reverse();
                return Some(path);
            }
            for &e in &self.out_edges[node] {
                let edge = &self.edges[e];
                if edge.cap > 0 && !visited[edge.to] {
                    visited[edge.to] = true;
                    via.insert(edge.to, e);
                    queue.push_back(edge.to);
                }
            }
        }
        None
    }

    fn max_flow(&mut self) {
        while let Some(path) = self.shortest_path() {
            let inc = path.iter().map(|&e| self.edges[e].cap).min().unwrap();
            for e in path {
                self.edges[e].cap -= inc;
                self.edges[e ^ 1].cap += inc;
            }
        }
    }

    /// The set of vertices with a positive-residual path to the sink.
    fn sink_side(&self) -> FxHashSet<usize> {
        let mut reached = FxHashSet::default();
        let mut queue = VecDeque::from([self.sink]);
        reached.insert(self.sink);
        while let Some(node) = queue.pop_front() {
            for &e in &self.in_edges[node] {
                let edge = &self.edges[e];
                if edge.cap > 0 && reached.insert(edge.from) {
                    queue.push_back(edge.from);
                }
            }
        }
        reached
    }
}

/// Builds the flow network for `g`. Capacities on virtual-sink arcs come
/// from `bw_ref`: real sinks and the out-vertex with the least reference
/// upstream bandwidth stay unbounded, every other out-vertex is capped at
/// its reference downstream bandwidth. The finite caps keep high-traffic
/// paths together when the cut is re-run on a source-side sub-graph whose
/// frontier vertices are plain operators.
fn build_network(g: &Dataflow, bw_ref: &Dataflow) -> (FlowNet, Vec<VertexId>) {
    let order: Vec<VertexId> = g.vertices().map(|v| v.id.clone()).collect();
    let index: FxHashMap<&VertexId, usize> =
        order.iter().enumerate().map(|(i, id)| (id, i)).collect();
    let mut net = FlowNet::new(order.len());
    for (from, to, stream) in g.streams() {
        net.add_edge(index[from], index[to], stream.bandwidth().into_u64());
    }
    let source = net.source;
    for v in g.in_vertices() {
        net.add_edge(source, index[&v.id], UNBOUNDED_CAPACITY.into_u64());
    }
    let ref_upstream = |id: &VertexId| {
        bw_ref
            .vertex(id)
            .map(|v| v.upstream_bw)
            .unwrap_or(BitsPerSec::ZERO)
    };
    let best = g
        .out_vertices()
        .into_iter()
        .min_by_key(|v| ref_upstream(&v.id))
        .map(|v| v.id.clone());
    let sink = net.sink;
    for v in g.out_vertices() {
        let cap = if Some(&v.id) == best.as_ref() || v.kind == VertexKind::Sink {
            UNBOUNDED_CAPACITY
        } else {
            bw_ref
                .vertex(&v.id)
                .map(|r| r.downstream_bw)
                .unwrap_or(BitsPerSec::ZERO)
        };
        net.add_edge(index[&v.id], sink, cap.into_u64());
    }
    (net, order)
}

fn min_cut_partition(
    g: &Dataflow,
    bw_ref: &Dataflow,
) -> (FxHashSet<VertexId>, FxHashSet<VertexId>) {
    let (mut net, order) = build_network(g, bw_ref);
    net.max_flow();
    let sink_side = net.sink_side();
    let mut s_cut = FxHashSet::default();
    let mut t_cut = FxHashSet::default();
    for (i, id) in order.into_iter().enumerate() {
        if sink_side.contains(&i) {
            t_cut.insert(id);
        } else {
            s_cut.insert(id);
        }
    }
    (s_cut, t_cut)
}

/// The bandwidth of `g`'s streams leaving the vertex set `s`.
pub fn cross_bandwidth(g: &Dataflow, s: &FxHashSet<VertexId>) -> BitsPerSec {
    g.streams()
        .filter(|(from, to, _)| s.contains(from) && !s.contains(to))
        .map(|(_, _, stream)| stream.bandwidth())
        .sum()
}

/// Computes the min cut of a job. Every source lands in `s_cut`, every sink
/// in `t_cut`; when several min cuts exist the one keeping the most vertices
/// on the source side is returned.
pub fn min_cut(g: &Dataflow) -> CutOption {
    let (s_cut, t_cut) = min_cut_partition(g, g);
    let flow = cross_bandwidth(g, &s_cut);
    CutOption { s_cut, t_cut, flow }
}

/// Enumerates a chain of cut options with strictly shrinking source sides,
/// by re-cutting the sub-graph induced by the previous source side. Each
/// option's flow is the crossing bandwidth measured in the original job.
pub fn cut_options(g: &Dataflow) -> Result<Vec<CutOption>, CutError> {
    let first = min_cut(g);
    let mut s = first.s_cut.clone();
    let mut options = vec![first];
    let all: FxHashSet<VertexId> = g.vertices().map(|v| v.id.clone()).collect();
    let mut iterations = 0;
    while s.len() > 1 {
        iterations += 1;
        // The source side shrinks on every real-world input, but nothing
        // formally guarantees it; a stuck chain is a fatal diagnostic.
        if iterations > CUT_CHAIN_CAP {
            return Err(CutError::ChainCapExceeded {
                job: g.id().clone(),
                cap: CUT_CHAIN_CAP,
                stuck: Box::new(g.sub_graph(&s, format!("{}~stuck", g.id()))),
            });
        }
        let sub = g.sub_graph(&s, format!("{}~s{}", g.id(), iterations));
        let (s_next, _) = min_cut_partition(&sub, g);
        let t_next = all.difference(&s_next).cloned().collect();
        let flow = cross_bandwidth(g, &s_next);
        options.push(CutOption {
            s_cut: s_next.clone(),
            t_cut: t_next,
            flow,
        });
        s = s_next;
    }
    Ok(options)
}

/// Errors from the cut-option generator.
#[derive(Debug, thiserror::Error)]
pub enum CutError {
    /// The shrinking chain failed to make progress.
    #[error(
        "cut chain for job {job} exceeded {cap} iterations, stuck with {} vertices",
        .stuck.nr_vertices()
    )]
    ChainCapExceeded {
        /// The job being cut.
        job: JobId,
        /// The iteration cap that was hit.
        cap: usize,
        /// The sub-graph the chain was stuck on, kept for debugging.
        stuck: Box<Dataflow>,
    },
}
