//! Utilities for writing tests.

use crate::dataflow::{Dataflow, Stream, Vertex};
use crate::spec::{DomainSpec, HostSpec, HrgSpec, LinkSpec, ScenarioSpec};
use crate::scenario::DomainKind;
use crate::units::{Bytes, Mbps, Millisecs};

fn link(bd: u64, delay: u64) -> LinkSpec {
    LinkSpec {
        bd: Mbps::new(bd),
        delay: Millisecs::new(delay),
    }
}

fn domain(kind: DomainKind, name: &str, prefix: &str, replica: u32, slots: u64) -> DomainSpec {
    DomainSpec {
        kind,
        name: name.to_owned(),
        router: link(1000, 10),
        hrgs: vec![HrgSpec {
            replica,
            switch: link(100, 2),
            spec: HostSpec {
                prefix: prefix.to_owned(),
                mips: 1000,
                cores: 4,
                // Each slot is 0.5 GB.
                memory: slots as f64 * 0.5,
                labels: Default::default(),
            },
        }],
    }
}

/// One edge domain (`edge1`, host `rasp1`) and one cloud domain (`cloud1`,
/// host `cloud1`), each with the given slot count.
pub fn edge_cloud_spec(edge_slots: u64, cloud_slots: u64) -> ScenarioSpec {
    ScenarioSpec {
        domains: vec![
            domain(DomainKind::Edge, "edge1", "rasp", 1, edge_slots),
            domain(DomainKind::Cloud, "cloud1", "cloud", 1, cloud_slots),
        ],
        interdomain: link(40, 50),
    }
}

/// Like [`edge_cloud_spec`], but with `edge_replica` hosts (`rasp1..n`) in
/// the edge domain's rack.
pub fn edge_cloud_spec_with_replicas(
    edge_replica: u32,
    edge_slots: u64,
    cloud_slots: u64,
) -> ScenarioSpec {
    ScenarioSpec {
        domains: vec![
            domain(DomainKind::Edge, "edge1", "rasp", edge_replica, edge_slots),
            domain(DomainKind::Cloud, "cloud1", "cloud", 1, cloud_slots),
        ],
        interdomain: link(40, 50),
    }
}

/// Two edge domains (`edge1` with `rasp1`, `edge2` with `pi1`) and one cloud
/// domain.
pub fn two_edge_cloud_spec(slots: u64) -> ScenarioSpec {
    ScenarioSpec {
        domains: vec![
            domain(DomainKind::Edge, "edge1", "rasp", 1, slots),
            domain(DomainKind::Edge, "edge2", "pi", 1, slots),
            domain(DomainKind::Cloud, "cloud1", "cloud", 1, slots),
        ],
        interdomain: link(40, 50),
    }
}

/// A three-vertex chain: source on `rasp1`, one operator, sink on `cloud1`.
/// Both streams carry `unit_size` bytes at `rate` units/sec.
pub fn linear_job(id: &str, unit_size: u64, rate: u64) -> Dataflow {
    let mut g = Dataflow::new(id);
    g.add_vertex(Vertex::source("v1", "rasp1")).unwrap();
    g.add_vertex(Vertex::operator("v2")).unwrap();
    g.add_vertex(Vertex::sink("v3", "cloud1")).unwrap();
    let s = Stream::new(Bytes::new(unit_size), rate);
    g.connect(&"v1".into(), &"v2".into(), s).unwrap();
    g.connect(&"v2".into(), &"v3".into(), s).unwrap();
    g
}

/// A two-branch fan-out job: `v1` feeds two operator chains that join at the
/// sink. Stream rates are chosen so the branches carry uneven bandwidth.
///
/// ```text
/// v1 -> v21 -> v31 \
///    \> v22 -> v32 -> v4
/// ```
pub fn diamond_job(id: &str) -> Dataflow {
    let mut g = Dataflow::new(id);
    g.add_vertex(Vertex::source("v1", "rasp1")).unwrap();
    for op in ["v21", "v22", "v31", "v32"] {
        g.add_vertex(Vertex::operator(op)).unwrap();
    }
    g.add_vertex(Vertex::sink("v4", "cloud1")).unwrap();
    let s = |rate| Stream::new(Bytes::ONE, rate);
    g.connect(&"v1".into(), &"v21".into(), s(1100)).unwrap();
    g.connect(&"v1".into(), &"v22".into(), s(1900)).unwrap();
    g.connect(&"v21".into(), &"v31".into(), s(1100)).unwrap();
    g.connect(&"v22".into(), &"v32".into(), s(2000)).unwrap();
    g.connect(&"v31".into(), &"v4".into(), s(100)).unwrap();
    g.connect(&"v32".into(), &"v4".into(), s(100)).unwrap();
    g
}
