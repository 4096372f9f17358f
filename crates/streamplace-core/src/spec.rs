//! Serde-facing input documents.
//!
//! A [`ScenarioSpec`] describes the physical fabric (bandwidths in Mbps,
//! memory in GB) and builds into a runtime [`Scenario`]. A [`JobSpec`]
//! describes one streaming job and builds into a [`Dataflow`]. Job sets can
//! be persisted as a self-describing stream of documents with [`save_all`] /
//! [`load_all`].

use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::dataflow::{Dataflow, DataflowError, Stream, Vertex, VertexId, VertexKind};
use crate::scenario::{Domain, DomainKind, DomainName, Hrg, Scenario};
use crate::topology::{HostName, NodeId, PhysLink, PhysNode, Topology, TopologyError};
use crate::units::{BitsPerSec, Bytes, Mbps, Millisecs};

/// A link description: bandwidth in Mbps, propagation delay in ms.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct LinkSpec {
    pub bd: Mbps,
    pub delay: Millisecs,
}

/// A host template; hosts are named `{prefix}{n}` for n in `1..=replica`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HostSpec {
    pub prefix: String,
    pub mips: u64,
    pub cores: u64,
    /// Memory in GB.
    pub memory: f64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// One host-rack group: a switch and `replica` hosts stamped from `spec`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HrgSpec {
    pub replica: u32,
    pub switch: LinkSpec,
    pub spec: HostSpec,
}

/// One domain: a router fronting a list of host-rack groups.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DomainSpec {
    #[serde(rename = "type")]
    pub kind: DomainKind,
    pub name: String,
    pub router: LinkSpec,
    pub hrgs: Vec<HrgSpec>,
}

/// A full scenario: domains plus the inter-domain router mesh.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScenarioSpec {
    pub domains: Vec<DomainSpec>,
    pub interdomain: LinkSpec,
}

impl ScenarioSpec {
    /// Builds the runtime scenario: every domain's router, switches, and
    /// hosts, host-switch and switch-router links, and a full mesh of
    /// router-router links between domains.
    pub fn build(&self) -> Result<Scenario, ScenarioError> {
        let mut topo = Topology::new();
        let mut domains = Vec::with_capacity(self.domains.len());
        for d in &self.domains {
            let router = NodeId::new(format!("{}_router", d.name));
            topo.add_node(PhysNode::new_router(router.clone()))?;
            let mut hrgs = Vec::with_capacity(d.hrgs.len());
            let mut host_lookup = rustc_hash::FxHashMap::default();
            for (i, hrg) in d.hrgs.iter().enumerate() {
                let switch = NodeId::new(format!("{}_sw{}", d.name, i + 1));
                topo.add_node(PhysNode::new_switch(switch.clone()))?;
                topo.connect(
                    &router,
                    &switch,
                    PhysLink::new(
                        format!("{}~{}", router, switch),
                        d.router.bd.into(),
                        d.router.delay,
                    ),
                )?;
                let mut hosts = Vec::with_capacity(hrg.replica as usize);
                for n in 1..=hrg.replica {
                    let label = format!("{}{}", hrg.spec.prefix, n);
                    let id = NodeId::new(format!("{}_{}", d.name, label));
                    let mut labels = hrg.spec.labels.clone();
                    labels.insert(
                        crate::dataflow::HOST_CONSTRAINT.to_owned(),
                        label.clone(),
                    );
                    let memory = Bytes::new((hrg.spec.memory * 1e9).round() as u64);
                    topo.add_node(PhysNode::new_host(
                        id.clone(),
                        hrg.spec.mips,
                        hrg.spec.cores,
                        memory,
                        labels,
                    ))?;
                    topo.connect(
                        &switch,
                        &id,
                        PhysLink::new(
                            format!("{}~{}", switch, id),
                            hrg.switch.bd.into(),
                            hrg.switch.delay,
                        ),
                    )?;
                    let label = HostName::new(label);
                    if host_lookup.insert(label.clone(), id.clone()).is_some() {
                        return Err(ScenarioError::DuplicateHost {
                            domain: d.name.clone(),
                            host: label,
                        });
                    }
                    hosts.push(id);
                }
                hrgs.push(Hrg { switch, hosts });
            }
            domains.push(Domain::new(
                d.kind,
                DomainName::new(d.name.as_str()),
                router,
                hrgs,
                host_lookup,
            ));
        }
        for i in 0..domains.len() {
            for j in (i + 1)..domains.len() {
                let (a, b) = (&domains[i].router, &domains[j].router);
                topo.connect(
                    a,
                    b,
                    PhysLink::new(
                        format!("{}~{}", a, b),
                        self.interdomain.bd.into(),
                        self.interdomain.delay,
                    ),
                )?;
            }
        }
        Ok(Scenario::from_parts(topo, domains))
    }
}

/// A vertex description inside a [`JobSpec`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VertexSpec {
    #[serde(rename = "type")]
    pub kind: VertexKind,
    #[serde(default)]
    pub domain_constraint: BTreeMap<String, String>,
    pub out_unit_size: Bytes,
    pub out_unit_rate: u64,
    pub mi: u64,
    pub memory: Bytes,
    /// Aggregate incoming bandwidth. Written on save; recomputed from the
    /// edge list on load.
    pub upstream_bd: BitsPerSec,
    /// Aggregate outgoing bandwidth. Written on save; recomputed on load.
    pub downstream_bd: BitsPerSec,
}

/// An edge description inside a [`JobSpec`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EdgeSpec {
    pub from: String,
    pub to: String,
    pub data: Stream,
}

/// One streaming job as an input/output document.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JobSpec {
    pub uuid: String,
    pub vertices: BTreeMap<String, VertexSpec>,
    pub edges: Vec<EdgeSpec>,
}

impl JobSpec {
    /// Builds and validates the runtime job.
    pub fn build(&self) -> Result<Dataflow, DataflowError> {
        let mut g = Dataflow::new(self.uuid.as_str());
        for (id, v) in &self.vertices {
            g.add_vertex(Vertex {
                id: VertexId::new(id.clone()),
                kind: v.kind,
                constraints: v.domain_constraint.clone(),
                unit_size: v.out_unit_size,
                unit_rate: v.out_unit_rate,
                mi: v.mi,
                memory: v.memory,
                upstream_bw: BitsPerSec::ZERO,
                downstream_bw: BitsPerSec::ZERO,
            })?;
        }
        for e in &self.edges {
            g.connect(
                &VertexId::new(e.from.as_str()),
                &VertexId::new(e.to.as_str()),
                e.data,
            )?;
        }
        g.validate()?;
        Ok(g)
    }

    /// Captures a job as a document, in canonical order.
    pub fn from_dataflow(g: &Dataflow) -> Self {
        let vertices = g
            .vertices()
            .map(|v| {
                (
                    v.id.to_string(),
                    VertexSpec {
                        kind: v.kind,
                        domain_constraint: v.constraints.clone(),
                        out_unit_size: v.unit_size,
                        out_unit_rate: v.unit_rate,
                        mi: v.mi,
                        memory: v.memory,
                        upstream_bd: v.upstream_bw,
                        downstream_bd: v.downstream_bw,
                    },
                )
            })
            .collect();
        let mut edges = g
            .streams()
            .map(|(from, to, stream)| EdgeSpec {
                from: from.to_string(),
                to: to.to_string(),
                data: *stream,
            })
            .collect::<Vec<_>>();
        edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));
        Self {
            uuid: g.id().to_string(),
            vertices,
            edges,
        }
    }
}

/// Writes a job set as a stream of JSON documents, one per line.
pub fn save_all(mut writer: impl Write, jobs: &[Dataflow]) -> Result<(), SpecError> {
    for job in jobs {
        serde_json::to_writer(&mut writer, &JobSpec::from_dataflow(job))?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Reads a job set previously written by [`save_all`].
pub fn load_all(reader: impl Read) -> Result<Vec<Dataflow>, SpecError> {
    let mut jobs = Vec::new();
    for doc in serde_json::Deserializer::from_reader(reader).into_iter::<JobSpec>() {
        jobs.push(doc?.build()?);
    }
    Ok(jobs)
}

/// An error building a scenario from its document.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// The declared shape does not form a valid topology.
    #[error("invalid topology")]
    Topology(#[from] TopologyError),

    /// Two hosts in one domain share a label.
    #[error("domain {domain} declares host {host} twice")]
    DuplicateHost {
        /// The domain declaring the duplicate.
        domain: String,
        /// The colliding host label.
        host: HostName,
    },
}

/// An error reading or writing job documents.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// A document does not form a valid job.
    #[error("invalid job")]
    Dataflow(#[from] DataflowError),

    /// JSON serialization/deserialization error.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error")]
    Io(#[from] std::io::Error),
}
