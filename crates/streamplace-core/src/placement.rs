//! Placement results.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;

use crate::dataflow::{Dataflow, VertexId};
use crate::topology::NodeId;

/// Why a job could not be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// The job's sources are pinned to hosts in zero or several edge domains.
    SourcesNotInSingleDomain,
    /// A pinned source host lacks the free slots for its sources.
    InsufficientResourceForSources,
    /// No cut option fits the edge domain's free slots.
    SlotsNotEnough,
    /// No host satisfies a vertex's constraints with a free slot.
    NoAvailableHost,
    /// A vertex is pinned to a host outside the chosen domain.
    DomainConstraintViolation,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::SourcesNotInSingleDomain => "sources-not-in-single-domain",
            Self::InsufficientResourceForSources => "insufficient-resource-for-sources",
            Self::SlotsNotEnough => "slots-not-enough",
            Self::NoAvailableHost => "no-available-host",
            Self::DomainConstraintViolation => "domain-constraint-violation",
        };
        f.write_str(tag)
    }
}

/// A finished placement: either a total vertex-to-node map or a tagged
/// failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    reason: Option<RejectReason>,
    assignments: BTreeMap<VertexId, NodeId>,
}

impl Placement {
    /// An empty successful placement.
    pub fn new() -> Self {
        Self {
            reason: None,
            assignments: BTreeMap::new(),
        }
    }

    /// A failed placement.
    pub fn failed(reason: RejectReason) -> Self {
        Self {
            reason: Some(reason),
            assignments: BTreeMap::new(),
        }
    }

    /// Whether the placement failed.
    pub fn is_failed(&self) -> bool {
        self.reason.is_some()
    }

    /// The failure reason, if any.
    pub fn reason(&self) -> Option<RejectReason> {
        self.reason
    }

    /// Records a vertex's node.
    pub fn assign(&mut self, vertex: VertexId, node: NodeId) {
        self.assignments.insert(vertex, node);
    }

    /// The node a vertex was placed on, if any.
    pub fn node_of(&self, vertex: &VertexId) -> Option<&NodeId> {
        self.assignments.get(vertex)
    }

    /// All assignments, ordered by vertex ID.
    pub fn assignments(&self) -> &BTreeMap<VertexId, NodeId> {
        &self.assignments
    }

    /// Unions two placements. Any failure wins, left one first.
    pub fn merge(a: Placement, b: Placement) -> Placement {
        if a.is_failed() {
            return a;
        }
        if b.is_failed() {
            return b;
        }
        let mut merged = a;
        merged.assignments.extend(b.assignments);
        merged
    }

    /// The sub-placement covering only the given vertices.
    pub fn extract(&self, keep: &FxHashSet<VertexId>) -> Placement {
        Placement {
            reason: self.reason,
            assignments: self
                .assignments
                .iter()
                .filter(|(v, _)| keep.contains(v))
                .map(|(v, n)| (v.clone(), n.clone()))
                .collect(),
        }
    }

    /// Whether every vertex of `job` has an assignment.
    pub fn is_complete_for(&self, job: &Dataflow) -> bool {
        !self.is_failed() && job.vertices().all(|v| self.assignments.contains_key(&v.id))
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::new()
    }
}
