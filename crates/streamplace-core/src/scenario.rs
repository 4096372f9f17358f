//! Sites and the composite fabric they form.
//!
//! A [`Domain`] is one physical site: a router fronting one or more
//! host-rack groups (switch + hosts). A [`Scenario`] owns the composite
//! [`Topology`] of all domains plus a full mesh of inter-domain router links.

use rustc_hash::FxHashMap;

use crate::topology::{HostName, NodeId, Topology};

identifier!(DomainName);

/// Whether a site is bandwidth-constrained edge or resource-rich cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainKind {
    Edge,
    Cloud,
}

/// One switch and the hosts racked behind it.
#[derive(Debug, Clone)]
pub struct Hrg {
    pub switch: NodeId,
    pub hosts: Vec<NodeId>,
}

/// A physical site.
#[derive(Debug, Clone)]
pub struct Domain {
    pub kind: DomainKind,
    pub name: DomainName,
    pub router: NodeId,
    pub hrgs: Vec<Hrg>,
    host_lookup: FxHashMap<HostName, NodeId>,
}

impl Domain {
    pub(crate) fn new(
        kind: DomainKind,
        name: DomainName,
        router: NodeId,
        hrgs: Vec<Hrg>,
        host_lookup: FxHashMap<HostName, NodeId>,
    ) -> Self {
        Self {
            kind,
            name,
            router,
            hrgs,
            host_lookup,
        }
    }

    /// Resolves a host label to the backing node.
    pub fn find_host(&self, name: &HostName) -> Option<&NodeId> {
        self.host_lookup.get(name)
    }

    /// All host node IDs in this domain.
    pub fn host_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.hrgs.iter().flat_map(|hrg| hrg.hosts.iter())
    }

    /// Free placement slots across the domain's hosts.
    pub fn free_slots(&self, topo: &Topology) -> u64 {
        self.host_ids()
            .filter_map(|id| topo.node(id))
            .map(|n| n.free_slots())
            .sum()
    }
}

/// A set of domains and the composite topology connecting them.
#[derive(Debug, Clone)]
pub struct Scenario {
    topo: Topology,
    domains: Vec<Domain>,
    by_name: FxHashMap<DomainName, usize>,
}

impl Scenario {
    pub(crate) fn from_parts(topo: Topology, domains: Vec<Domain>) -> Self {
        let by_name = domains
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        Self {
            topo,
            domains,
            by_name,
        }
    }

    /// The composite physical topology.
    pub fn topology(&self) -> &Topology {
        &self.topo
    }

    /// All domains.
    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    /// All edge domains.
    pub fn edge_domains(&self) -> Vec<&Domain> {
        self.of_kind(DomainKind::Edge)
    }

    /// All cloud domains.
    pub fn cloud_domains(&self) -> Vec<&Domain> {
        self.of_kind(DomainKind::Cloud)
    }

    fn of_kind(&self, kind: DomainKind) -> Vec<&Domain> {
        self.domains.iter().filter(|d| d.kind == kind).collect()
    }

    /// Finds a domain by name.
    pub fn find_domain(&self, name: &DomainName) -> Option<&Domain> {
        self.by_name.get(name).map(|&i| &self.domains[i])
    }

    /// The edge domain hosting the given label, if exactly resolvable.
    pub fn edge_domain_of_host(&self, host: &HostName) -> Option<&Domain> {
        self.edge_domains()
            .into_iter()
            .find(|d| d.find_host(host).is_some())
    }
}
