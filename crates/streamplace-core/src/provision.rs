//! Provisioning engines: one per domain.
//!
//! Edge domains use a [`TreeProvisioner`], a placement engine shaped like the
//! physical topology (router at the root, switches below, hosts at the
//! leaves). Each node repeatedly packs what it can into its own slots, hands
//! whole jobs or topological prefixes down to children with advertised
//! capacity, and escalates the rest to its parent, until a round passes with
//! nothing to do. Cloud domains use the simpler [`RandomProvisioner`].

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt::Write as _;

use itertools::Itertools;
use rand::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::constants::WATCHDOG_ROUNDS;
use crate::dataflow::{Dataflow, DataflowError, JobId, VertexId};
use crate::knapsack::{grouped_exactly_one, FillMode, GroupItem, KnapsackError};
use crate::placement::{Placement, RejectReason};
use crate::scenario::{Domain, DomainName};
use crate::topology::{NodeId, PhysNode, Topology};

/// A message between tree nodes: jobs changing hands plus a slot-count delta
/// accumulated since the sender's last step.
#[derive(Debug, Default)]
struct Scatter {
    graphs: Vec<Dataflow>,
    slot_diff: i64,
}

impl Scatter {
    fn is_empty(&self) -> bool {
        self.graphs.is_empty() && self.slot_diff == 0
    }
}

#[derive(Debug)]
struct StepOutput {
    parent: Scatter,
    children: Vec<Scatter>,
}

/// One node of the provisioning tree, mirroring a physical node.
#[derive(Debug)]
struct ProvisionNode {
    /// Tree key: the host label for hosts, the node ID otherwise.
    key: String,
    node: NodeId,
    /// Host labels reachable in this node's subtree. Pinned vertices may
    /// only travel toward their label.
    covered_hosts: FxHashSet<String>,
    /// Host labels reachable per child subtree, parallel to `children`.
    children_covered: Vec<FxHashSet<String>>,
    /// Snapshot of the node's total slot capacity.
    local_slots: u64,
    /// Slot delta to report upward since the last step.
    slot_diff: i64,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Advertised free capacity per child subtree.
    children_slots: Vec<i64>,
    scheduled: Vec<VertexId>,
    held: Vec<Dataflow>,
    /// Sequence for deriving fragment job IDs.
    spawn_seq: usize,
}

impl ProvisionNode {
    fn new(key: String, phys: &PhysNode, parent: Option<usize>) -> Self {
        Self {
            key,
            node: phys.id.clone(),
            covered_hosts: FxHashSet::default(),
            children_covered: Vec::new(),
            local_slots: phys.slots(),
            // Advertise what is free right now, not the raw capacity, so a
            // scenario shared between requests is not oversold.
            slot_diff: phys.free_slots() as i64,
            parent,
            children: Vec::new(),
            children_slots: Vec::new(),
            scheduled: Vec::new(),
            held: Vec::new(),
            spawn_seq: 0,
        }
    }

    fn step(&mut self, phys: &PhysNode) -> Result<Option<StepOutput>, ProvisionError> {
        if self.held.is_empty() && self.slot_diff == 0 {
            return Ok(None);
        }
        let free = self.local_slots.saturating_sub(phys.occupied());
        if free > 0 {
            self.schedule_local(free, phys)?;
        }
        let to_children = if self.held.is_empty() {
            vec![Vec::new(); self.children.len()]
        } else {
            self.pass_to_children()?
        };
        let children = to_children
            .into_iter()
            .map(|graphs| {
                // The transfer was already charged against the child's
                // advertised capacity here; the positive delta is the credit
                // that keeps the child from reporting the same loss again.
                let slot_diff = graphs.iter().map(|g| g.nr_vertices() as i64).sum();
                Scatter { graphs, slot_diff }
            })
            .collect();
        let parent = Scatter {
            graphs: std::mem::take(&mut self.held),
            slot_diff: std::mem::take(&mut self.slot_diff),
        };
        Ok(Some(StepOutput { parent, children }))
    }

    /// Places as much held work as fits locally: pinned sources first, then
    /// everything if it fits, otherwise the best prefix of each job.
    fn schedule_local(&mut self, free: u64, phys: &PhysNode) -> Result<(), ProvisionError> {
        let mut free = free;
        let pinned_here: Vec<(usize, VertexId)> = self
            .held
            .iter()
            .enumerate()
            .flat_map(|(i, g)| {
                g.sources()
                    .into_iter()
                    .filter(|s| s.pinned_host() == Some(self.key.as_str()))
                    .map(move |s| (i, s.id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (gidx, vid) in pinned_here {
            // The scheduler verified source fit before provisioning started.
            if free == 0 || !phys.occupy(1) {
                return Err(ProvisionError::SourceSlotExhausted {
                    node: self.node.clone(),
                    vertex: vid,
                });
            }
            self.held[gidx].remove_vertex(&vid);
            self.scheduled.push(vid);
            self.slot_diff -= 1;
            free -= 1;
        }
        self.rearrange();
        if free == 0 || self.held.is_empty() {
            return Ok(());
        }

        let orders: Vec<Vec<VertexId>> = self
            .held
            .iter()
            .map(|g| {
                g.topological_order_by_upstream()
                    .into_iter()
                    .map(|v| v.id.clone())
                    .collect()
            })
            .collect();
        let total: usize = orders.iter().map(Vec::len).sum();
        let all_placeable = self.held.iter().zip(&orders).all(|(g, order)| {
            placeable_prefix_len(g, order, &self.covered_hosts) == order.len()
        });
        if all_placeable && total as u64 <= free {
            for g in std::mem::take(&mut self.held) {
                for v in g.vertices() {
                    if !phys.occupy(1) {
                        return Err(ProvisionError::OccupyFailed {
                            node: self.node.clone(),
                        });
                    }
                    self.scheduled.push(v.id.clone());
                    self.slot_diff -= 1;
                }
            }
            return Ok(());
        }

        let groups: Vec<Vec<GroupItem>> = self
            .held
            .iter()
            .zip(&orders)
            .map(|(g, order)| prefix_group(g, order, &self.covered_hosts))
            .collect();
        let solution = grouped_exactly_one(free as usize, &groups, FillMode::BestFill)?;
        for (j, &choice) in solution.iter().enumerate() {
            let take = groups[j][choice].volume;
            for vid in orders[j][..take].iter() {
                if !phys.occupy(1) {
                    return Err(ProvisionError::OccupyFailed {
                        node: self.node.clone(),
                    });
                }
                self.held[j].remove_vertex(vid);
                self.scheduled.push(vid.clone());
                self.slot_diff -= 1;
            }
        }
        self.rearrange();
        Ok(())
    }

    /// Hands held jobs to children: whole jobs into the largest advertised
    /// capacities first, then best prefixes into whatever capacity remains.
    fn pass_to_children(&mut self) -> Result<Vec<Vec<Dataflow>>, ProvisionError> {
        let mut out: Vec<Vec<Dataflow>> = vec![Vec::new(); self.children.len()];

        // Largest child capacity first; ties resolve to declaration order.
        let mut heap: BinaryHeap<(i64, Reverse<usize>)> = self
            .children_slots
            .iter()
            .enumerate()
            .map(|(i, &slots)| (slots, Reverse(i)))
            .collect();
        while let Some((slots, Reverse(cidx))) = heap.pop() {
            if slots <= 0 {
                continue;
            }
            // The largest held job that fits the child whole, and whose
            // pinned vertices all live under that child.
            let fit = self
                .held
                .iter()
                .enumerate()
                .filter(|(_, g)| {
                    g.nr_vertices() as i64 <= slots
                        && pins_within(g, &self.children_covered[cidx])
                })
                .max_by(|(ai, a), (bi, b)| {
                    (a.nr_vertices(), Reverse(*ai)).cmp(&(b.nr_vertices(), Reverse(*bi)))
                })
                .map(|(i, _)| i);
            if let Some(gidx) = fit {
                let g = self.held.remove(gidx);
                let nr = g.nr_vertices() as i64;
                out[cidx].push(g);
                self.children_slots[cidx] -= nr;
                self.slot_diff -= nr;
                if slots - nr > 0 {
                    heap.push((slots - nr, Reverse(cidx)));
                }
            }
        }
        self.rearrange();

        // Split the remainder: best prefix of each job into each child with
        // capacity, largest advertised capacity first.
        let mut by_capacity: Vec<usize> = (0..self.children.len()).collect();
        by_capacity.sort_by_key(|&i| Reverse(self.children_slots[i]));
        for cidx in by_capacity {
            let slots = self.children_slots[cidx];
            if slots <= 0 || self.held.is_empty() {
                continue;
            }
            let orders: Vec<Vec<VertexId>> = self
                .held
                .iter()
                .map(|g| {
                    g.topological_order_by_upstream()
                        .into_iter()
                        .map(|v| v.id.clone())
                        .collect()
                })
                .collect();
            let groups: Vec<Vec<GroupItem>> = self
                .held
                .iter()
                .zip(&orders)
                .map(|(g, order)| prefix_group(g, order, &self.children_covered[cidx]))
                .collect();
            let solution = grouped_exactly_one(slots as usize, &groups, FillMode::BestFill)?;
            for (j, &choice) in solution.iter().enumerate() {
                let take = groups[j][choice].volume;
                if take == 0 {
                    continue;
                }
                let cut: FxHashSet<VertexId> = orders[j][..take].iter().cloned().collect();
                self.spawn_seq += 1;
                let id = format!("{}~p{}", self.held[j].id(), self.spawn_seq);
                let sub = self.held[j].sub_graph(&cut, id);
                out[cidx].push(sub);
                for vid in &cut {
                    self.held[j].remove_vertex(vid);
                }
                self.children_slots[cidx] -= take as i64;
                self.slot_diff -= take as i64;
            }
            self.rearrange();
        }
        Ok(out)
    }

    /// Splits held residuals into connected components; vertex removal can
    /// disconnect a job, and each piece travels independently afterwards.
    fn rearrange(&mut self) {
        let held = std::mem::take(&mut self.held);
        self.held = held
            .into_iter()
            .filter(|g| !g.is_empty())
            .flat_map(|g| g.connected_components())
            .collect();
    }

    fn gather_from_parent(&mut self, scatter: Scatter) {
        self.held.extend(scatter.graphs);
        // The parent already charged this delivery against its bookkeeping of
        // our capacity; adding the credit here keeps our own deduction from
        // being reported twice.
        self.slot_diff += scatter.slot_diff;
    }

    fn gather_from_child(&mut self, child_pos: usize, scatter: Scatter) {
        self.children_slots[child_pos] += scatter.slot_diff;
        self.slot_diff += scatter.slot_diff;
        self.held.extend(scatter.graphs);
    }
}

/// How many vertices of `order` may live at a node covering `covered`: the
/// prefix up to the first vertex pinned somewhere else.
fn placeable_prefix_len(
    g: &Dataflow,
    order: &[VertexId],
    covered: &FxHashSet<String>,
) -> usize {
    order
        .iter()
        .position(|vid| {
            g.vertex(vid)
                .and_then(|v| v.pinned_host())
                .map(|h| !covered.contains(h))
                .unwrap_or(false)
        })
        .unwrap_or(order.len())
}

/// Prefix options for the grouped knapsack: volume `k` places the first `k`
/// vertices of `order`, costed at the bandwidth entering the first vertex
/// left behind (or leaving the last one, for the complete prefix).
fn prefix_group(g: &Dataflow, order: &[VertexId], covered: &FxHashSet<String>) -> Vec<GroupItem> {
    let limit = placeable_prefix_len(g, order, covered);
    let mut items = Vec::with_capacity(limit + 1);
    for k in 0..=limit {
        let cost = if k < order.len() {
            g.vertex(&order[k]).map(|v| v.upstream_bw.into_u64())
        } else {
            g.vertex(&order[order.len() - 1])
                .map(|v| v.downstream_bw.into_u64())
        };
        items.push(GroupItem::new(k, cost.unwrap_or(0)));
    }
    items
}

fn pins_within(g: &Dataflow, covered: &FxHashSet<String>) -> bool {
    g.vertices()
        .filter_map(|v| v.pinned_host())
        .all(|h| covered.contains(h))
}

/// The provisioning tree for one domain, with O(1) delivery by node key.
#[derive(Debug)]
struct ProvisionTree {
    nodes: Vec<ProvisionNode>,
    by_key: FxHashMap<String, usize>,
}

impl ProvisionTree {
    fn build(domain: &Domain, topo: &Topology) -> Result<Self, ProvisionError> {
        let mut tree = Self {
            nodes: Vec::new(),
            by_key: FxHashMap::default(),
        };
        let root = tree.add_node(&domain.router, topo, None)?;
        for hrg in &domain.hrgs {
            let switch = tree.add_node(&hrg.switch, topo, Some(root))?;
            tree.link_child(root, switch);
            for host in &hrg.hosts {
                let leaf = tree.add_node(host, topo, Some(switch))?;
                tree.link_child(switch, leaf);
            }
        }
        // Children always sit at higher indices than their parent, so a
        // reverse sweep collects subtree host labels bottom-up.
        for i in (0..tree.nodes.len()).rev() {
            let kids = tree.nodes[i].children.clone();
            let mut covered = FxHashSet::default();
            if kids.is_empty() {
                covered.insert(tree.nodes[i].key.clone());
            }
            for &c in &kids {
                covered.extend(tree.nodes[c].covered_hosts.iter().cloned());
            }
            tree.nodes[i].covered_hosts = covered;
        }
        for i in 0..tree.nodes.len() {
            let covered: Vec<FxHashSet<String>> = tree.nodes[i]
                .children
                .iter()
                .map(|&c| tree.nodes[c].covered_hosts.clone())
                .collect();
            tree.nodes[i].children_covered = covered;
        }
        Ok(tree)
    }

    fn add_node(
        &mut self,
        id: &NodeId,
        topo: &Topology,
        parent: Option<usize>,
    ) -> Result<usize, ProvisionError> {
        let phys = topo
            .node(id)
            .ok_or_else(|| ProvisionError::UnknownNode(id.clone()))?;
        let key = phys
            .host_label()
            .map(str::to_owned)
            .unwrap_or_else(|| id.to_string());
        let idx = self.nodes.len();
        self.nodes.push(ProvisionNode::new(key.clone(), phys, parent));
        self.by_key.insert(key, idx);
        Ok(idx)
    }

    fn link_child(&mut self, parent: usize, child: usize) {
        self.nodes[parent].children.push(child);
        self.nodes[parent].children_slots.push(0);
    }

    /// Steps every node once, then delivers the resulting scatters. No node
    /// observes a half-finished round. Returns whether any node had work.
    fn step_round(&mut self, topo: &Topology) -> Result<bool, ProvisionError> {
        let mut outputs = Vec::new();
        for i in 0..self.nodes.len() {
            let phys = topo
                .node(&self.nodes[i].node)
                .ok_or_else(|| ProvisionError::UnknownNode(self.nodes[i].node.clone()))?;
            if let Some(output) = self.nodes[i].step(phys)? {
                outputs.push((i, output));
            }
        }
        if outputs.is_empty() {
            return Ok(false);
        }
        for (i, output) in outputs {
            match self.nodes[i].parent {
                Some(p) => {
                    let pos = self.nodes[p]
                        .children
                        .iter()
                        .position(|&c| c == i)
                        .expect("tree links are built consistently");
                    self.nodes[p].gather_from_child(pos, output.parent);
                }
                None => {
                    // Residuals escalated past the root have nowhere else to
                    // go; the root keeps retrying them, and the watchdog
                    // catches a domain that can never fit them.
                    self.nodes[i].held.extend(output.parent.graphs);
                }
            }
            for (pos, scatter) in output.children.into_iter().enumerate() {
                if scatter.is_empty() {
                    continue;
                }
                let child = self.nodes[i].children[pos];
                self.nodes[child].gather_from_parent(scatter);
            }
        }
        Ok(true)
    }

    fn nr_scheduled(&self) -> usize {
        self.nodes.iter().map(|n| n.scheduled.len()).sum()
    }

    fn dump(&self, topo: &Topology) -> String {
        let mut out = String::new();
        for n in &self.nodes {
            let occupied = topo.node(&n.node).map(|p| p.occupied()).unwrap_or(0);
            let held = n.held.iter().map(|g| g.id()).join(", ");
            let _ = writeln!(
                out,
                "{}: slots={} occupied={} slot_diff={} held=[{}]",
                n.key, n.local_slots, occupied, n.slot_diff, held
            );
        }
        out
    }
}

/// The tree-shaped provisioner used for edge domains.
#[derive(Debug)]
pub struct TreeProvisioner<'a> {
    domain: &'a Domain,
    topo: &'a Topology,
    tree: ProvisionTree,
}

impl<'a> TreeProvisioner<'a> {
    /// Builds the tree for a domain and propagates initial slot counts.
    pub fn new(domain: &'a Domain, topo: &'a Topology) -> Result<Self, ProvisionError> {
        let tree = ProvisionTree::build(domain, topo)?;
        let mut provisioner = Self { domain, topo, tree };
        provisioner.rebalance()?;
        Ok(provisioner)
    }

    /// Queues a job. It enters the tree at the host one of its sources is
    /// pinned to, or at a random node when it has none.
    pub fn place(&mut self, job: Dataflow, rng: &mut impl Rng) -> Result<(), ProvisionError> {
        let entry = job
            .sources()
            .iter()
            .find_map(|s| s.pinned_host().map(str::to_owned));
        let idx = match entry {
            Some(host) => *self
                .tree
                .by_key
                .get(&host)
                .ok_or_else(|| ProvisionError::MissingHost {
                    domain: self.domain.name.clone(),
                    host,
                })?,
            None => rng.gen_range(0..self.tree.nodes.len()),
        };
        self.tree.nodes[idx].held.push(job);
        Ok(())
    }

    /// Runs step rounds until the tree is quiescent. A long run of rounds
    /// without a single new placement trips the watchdog.
    pub fn rebalance(&mut self) -> Result<(), ProvisionError> {
        let mut idle_rounds = 0;
        loop {
            let before = self.tree.nr_scheduled();
            if !self.tree.step_round(self.topo)? {
                return Ok(());
            }
            if self.tree.nr_scheduled() > before {
                idle_rounds = 0;
            } else {
                idle_rounds += 1;
            }
            if idle_rounds > WATCHDOG_ROUNDS {
                return Err(ProvisionError::Watchdog {
                    domain: self.domain.name.clone(),
                    rounds: idle_rounds,
                    dump: self.tree.dump(self.topo),
                });
            }
        }
    }

    /// Collects the node each of `job`'s vertices landed on.
    pub fn result_for(&self, job: &Dataflow) -> Result<Placement, ProvisionError> {
        let mut placement = Placement::new();
        for v in job.vertices() {
            let holder = self
                .tree
                .nodes
                .iter()
                .find(|n| n.scheduled.contains(&v.id))
                .ok_or_else(|| ProvisionError::VertexLost {
                    job: job.id().clone(),
                    vertex: v.id.clone(),
                    dump: self.tree.dump(self.topo),
                })?;
            placement.assign(v.id.clone(), holder.node.clone());
        }
        Ok(placement)
    }

    /// Rolls a placed job back out of the tree, releasing its slots.
    pub fn remove_job(&mut self, job: &Dataflow) {
        let ids: FxHashSet<&VertexId> = job.vertices().map(|v| &v.id).collect();
        for node in &mut self.tree.nodes {
            let before = node.scheduled.len();
            node.scheduled.retain(|v| !ids.contains(v));
            let removed = before - node.scheduled.len();
            if removed > 0 {
                if let Some(phys) = self.topo.node(&node.node) {
                    phys.release(removed as u64);
                }
                node.slot_diff += removed as i64;
            }
        }
    }
}

/// Random placement over a domain's hosts, used for cloud domains. All
/// mutations are staged and committed only once the whole job fits.
#[derive(Debug)]
pub struct RandomProvisioner<'a> {
    domain: &'a Domain,
    topo: &'a Topology,
}

impl<'a> RandomProvisioner<'a> {
    /// Creates a provisioner over one domain.
    pub fn new(domain: &'a Domain, topo: &'a Topology) -> Self {
        Self { domain, topo }
    }

    /// Places a job on random hosts that satisfy each vertex's constraints.
    pub fn schedule(
        &self,
        job: &Dataflow,
        rng: &mut impl Rng,
    ) -> Result<Placement, ProvisionError> {
        for v in job.vertices() {
            if let Some(host) = v.pinned_host() {
                if self.domain.find_host(&host.into()).is_none() {
                    return Ok(Placement::failed(RejectReason::DomainConstraintViolation));
                }
            }
        }
        let mut staged: FxHashMap<NodeId, u64> = FxHashMap::default();
        let mut placement = Placement::new();
        for v in job.topological_order()? {
            let candidates: Vec<&NodeId> = self
                .domain
                .host_ids()
                .filter(|id| {
                    self.topo
                        .node(id)
                        .map(|phys| {
                            phys.matches_labels(&v.constraints)
                                && phys.free_slots() > staged.get(*id).copied().unwrap_or(0)
                        })
                        .unwrap_or(false)
                })
                .collect();
            let Some(&node) = candidates.choose(rng) else {
                return Ok(Placement::failed(RejectReason::NoAvailableHost));
            };
            *staged.entry(node.clone()).or_insert(0) += 1;
            placement.assign(v.id.clone(), node.clone());
        }
        // Commit. The staged counts were checked against live occupancy, so
        // within one serialized request this cannot fail.
        let mut committed: Vec<(&NodeId, u64)> = Vec::new();
        for (node, n) in &staged {
            let ok = self
                .topo
                .node(node)
                .map(|phys| phys.occupy(*n))
                .unwrap_or(false);
            if !ok {
                for (done, m) in committed {
                    if let Some(phys) = self.topo.node(done) {
                        phys.release(m);
                    }
                }
                return Ok(Placement::failed(RejectReason::NoAvailableHost));
            }
            committed.push((node, *n));
        }
        Ok(placement)
    }
}

/// Errors raised by the provisioning engines. These are internal invariant
/// breaks; resource shortfalls surface as failed placements instead.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// A domain references a node missing from the topology.
    #[error("node {0} is not in the topology")]
    UnknownNode(NodeId),

    /// A job was queued for a host that is not in this domain.
    #[error("domain {domain} has no host {host}")]
    MissingHost {
        /// The provisioning domain.
        domain: DomainName,
        /// The missing host label.
        host: String,
    },

    /// A pinned source arrived at its host after the slots were gone.
    #[error("no slot left on {node} for pinned source {vertex}")]
    SourceSlotExhausted {
        /// The exhausted host.
        node: NodeId,
        /// The source that could not be placed.
        vertex: VertexId,
    },

    /// A slot claim failed although bookkeeping said it would succeed.
    #[error("failed to occupy a slot on {node}")]
    OccupyFailed {
        /// The node that rejected the claim.
        node: NodeId,
    },

    /// The tree stopped making progress before quiescence.
    #[error("provisioning in {domain} made no progress for {rounds} rounds\n{dump}")]
    Watchdog {
        /// The domain being provisioned.
        domain: DomainName,
        /// Consecutive rounds without a placement.
        rounds: usize,
        /// Per-node state dump for debugging.
        dump: String,
    },

    /// A vertex was never placed although the tree went quiescent.
    #[error("vertex {vertex} of job {job} was lost during provisioning\n{dump}")]
    VertexLost {
        /// The affected job.
        job: JobId,
        /// The lost vertex.
        vertex: VertexId,
        /// Per-node state dump for debugging.
        dump: String,
    },

    /// The prefix allocator failed internally.
    #[error("prefix allocation failed")]
    Knapsack(#[from] KnapsackError),

    /// A held job was structurally invalid.
    #[error("invalid job graph")]
    Dataflow(#[from] DataflowError),
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::dataflow::{Stream, Vertex};
    use crate::scenario::Scenario;
    use crate::testing;
    use crate::units::Bytes;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn edge_domain(scenario: &Scenario) -> &Domain {
        scenario.find_domain(&"edge1".into()).unwrap()
    }

    /// A source plus a two-operator chain, all cut for the edge side.
    fn edge_fragment(id: &str) -> Dataflow {
        let mut g = Dataflow::new(id);
        g.add_vertex(Vertex::source("v1", "rasp1")).unwrap();
        g.add_vertex(Vertex::operator("a")).unwrap();
        g.add_vertex(Vertex::operator("b")).unwrap();
        let s = Stream::new(Bytes::ONE, 500);
        g.connect(&"v1".into(), &"a".into(), s).unwrap();
        g.connect(&"a".into(), &"b".into(), s).unwrap();
        g
    }

    #[test]
    fn whole_job_lands_on_the_pinned_host() -> anyhow::Result<()> {
        let scenario = testing::edge_cloud_spec(10, 10).build()?;
        let domain = edge_domain(&scenario);
        let mut provisioner = TreeProvisioner::new(domain, scenario.topology())?;
        let fragment = edge_fragment("g1");
        provisioner.place(fragment.clone(), &mut rng())?;
        provisioner.rebalance()?;
        let placement = provisioner.result_for(&fragment)?;
        for v in fragment.vertices() {
            assert_eq!(
                placement.node_of(&v.id).map(NodeId::as_str),
                Some("edge1_rasp1"),
                "vertex {}",
                v.id
            );
        }
        Ok(())
    }

    #[test]
    fn overflow_escalates_to_a_sibling_host() -> anyhow::Result<()> {
        // rasp1 has two slots; the third vertex must travel through the
        // switch to rasp2.
        let scenario = testing::edge_cloud_spec_with_replicas(2, 2, 10).build()?;
        let domain = edge_domain(&scenario);
        let mut provisioner = TreeProvisioner::new(domain, scenario.topology())?;
        let fragment = edge_fragment("g1");
        provisioner.place(fragment.clone(), &mut rng())?;
        provisioner.rebalance()?;
        let placement = provisioner.result_for(&fragment)?;
        assert_eq!(
            placement.node_of(&"v1".into()).map(NodeId::as_str),
            Some("edge1_rasp1")
        );
        let homes: Vec<&str> = ["a", "b"]
            .iter()
            .map(|v| placement.node_of(&(*v).into()).map(NodeId::as_str).unwrap())
            .collect();
        assert!(homes.contains(&"edge1_rasp2"), "homes: {homes:?}");
        Ok(())
    }

    #[test]
    fn disconnected_residual_is_rehomed_without_duplication() -> anyhow::Result<()> {
        // After v1 and one branch head are placed on rasp1, the remaining
        // operator is disconnected and must be re-homed as its own job.
        let scenario = testing::edge_cloud_spec_with_replicas(2, 2, 10).build()?;
        let domain = edge_domain(&scenario);
        let mut g = Dataflow::new("g1");
        g.add_vertex(Vertex::source("v1", "rasp1")).context("add")?;
        g.add_vertex(Vertex::operator("a")).context("add")?;
        g.add_vertex(Vertex::operator("b")).context("add")?;
        g.connect(&"v1".into(), &"a".into(), Stream::new(Bytes::ONE, 800))?;
        g.connect(&"v1".into(), &"b".into(), Stream::new(Bytes::ONE, 300))?;
        let mut provisioner = TreeProvisioner::new(domain, scenario.topology())?;
        provisioner.place(g.clone(), &mut rng())?;
        provisioner.rebalance()?;
        let placement = provisioner.result_for(&g)?;
        let mut homes: Vec<&str> = g
            .vertices()
            .map(|v| placement.node_of(&v.id).map(NodeId::as_str).unwrap())
            .collect();
        homes.sort_unstable();
        assert_eq!(homes, vec!["edge1_rasp1", "edge1_rasp1", "edge1_rasp2"]);
        Ok(())
    }

    #[test]
    fn remove_job_releases_slots() -> anyhow::Result<()> {
        let scenario = testing::edge_cloud_spec(10, 10).build()?;
        let domain = edge_domain(&scenario);
        let mut provisioner = TreeProvisioner::new(domain, scenario.topology())?;
        let fragment = edge_fragment("g1");
        provisioner.place(fragment.clone(), &mut rng())?;
        provisioner.rebalance()?;
        assert_eq!(domain.free_slots(scenario.topology()), 7);
        provisioner.remove_job(&fragment);
        assert_eq!(domain.free_slots(scenario.topology()), 10);
        Ok(())
    }

    #[test]
    fn random_provisioner_honors_pins() -> anyhow::Result<()> {
        let scenario = testing::edge_cloud_spec(10, 10).build()?;
        let cloud = scenario.find_domain(&"cloud1".into()).unwrap();
        let mut g = Dataflow::new("g1");
        g.add_vertex(Vertex::operator("op"))?;
        g.add_vertex(Vertex::sink("out", "cloud1"))?;
        g.connect(&"op".into(), &"out".into(), Stream::new(Bytes::ONE, 10))?;
        let placement =
            RandomProvisioner::new(cloud, scenario.topology()).schedule(&g, &mut rng())?;
        assert!(!placement.is_failed());
        assert_eq!(
            placement.node_of(&"out".into()).map(NodeId::as_str),
            Some("cloud1_cloud1")
        );
        Ok(())
    }

    #[test]
    fn random_provisioner_rejects_foreign_pins() -> anyhow::Result<()> {
        let scenario = testing::edge_cloud_spec(10, 10).build()?;
        let cloud = scenario.find_domain(&"cloud1".into()).unwrap();
        let mut g = Dataflow::new("g1");
        g.add_vertex(Vertex::sink("out", "rasp1"))?;
        let placement =
            RandomProvisioner::new(cloud, scenario.topology()).schedule(&g, &mut rng())?;
        assert_eq!(
            placement.reason(),
            Some(RejectReason::DomainConstraintViolation)
        );
        Ok(())
    }

    #[test]
    fn random_provisioner_reports_exhaustion_without_mutating() -> anyhow::Result<()> {
        let scenario = testing::edge_cloud_spec(10, 1).build()?;
        let cloud = scenario.find_domain(&"cloud1".into()).unwrap();
        let mut g = Dataflow::new("g1");
        g.add_vertex(Vertex::operator("a"))?;
        g.add_vertex(Vertex::operator("b"))?;
        g.connect(&"a".into(), &"b".into(), Stream::new(Bytes::ONE, 10))?;
        let placement =
            RandomProvisioner::new(cloud, scenario.topology()).schedule(&g, &mut rng())?;
        assert_eq!(placement.reason(), Some(RejectReason::NoAvailableHost));
        assert_eq!(cloud.free_slots(scenario.topology()), 1);
        Ok(())
    }
}
