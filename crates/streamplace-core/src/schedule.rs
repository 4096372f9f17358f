//! The placement façade.
//!
//! [`FlowScheduler`] takes a batch of jobs and a scenario and produces one
//! [`Placement`] per job: cut options are generated per job, an edge slot
//! budget is allocated across jobs with the grouped knapsack, the chosen
//! source sides go to the edge domain's provisioning tree, and the sink
//! sides go to a cloud domain's random provisioner.

use itertools::Itertools;
use rand::prelude::*;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::dataflow::Dataflow;
use crate::knapsack::{grouped_exactly_one, FillMode, GroupItem, KnapsackError};
use crate::mincut::{cut_options, CutError, CutOption};
use crate::placement::{Placement, RejectReason};
use crate::provision::{ProvisionError, RandomProvisioner, TreeProvisioner};
use crate::scenario::{Domain, Scenario};
use crate::topology::{HostName, NodeId};

/// Places streaming jobs onto a scenario.
#[derive(Debug)]
pub struct FlowScheduler<'a> {
    scenario: &'a Scenario,
}

impl<'a> FlowScheduler<'a> {
    /// Creates a scheduler over a scenario.
    pub fn new(scenario: &'a Scenario) -> Self {
        Self { scenario }
    }

    /// Places a single job.
    pub fn schedule(&self, job: &Dataflow, rng: &mut impl Rng) -> Result<Placement, Error> {
        let mut results = self.schedule_all(std::slice::from_ref(job), rng)?;
        // One job in, one placement out.
        Ok(results.remove(0))
    }

    /// Places a batch of jobs. Constraint failures are per-job; internal
    /// invariant breaks abort the whole batch.
    pub fn schedule_all(
        &self,
        jobs: &[Dataflow],
        rng: &mut impl Rng,
    ) -> Result<Vec<Placement>, Error> {
        let mut results: Vec<Option<Placement>> = vec![None; jobs.len()];

        // Jobs with no pinned source are unconstrained on the edge side and
        // go wholesale to a cloud domain.
        let mut sourced = Vec::new();
        for (i, job) in jobs.iter().enumerate() {
            if job.sources().is_empty() {
                results[i] = Some(self.cloud_place(job, rng)?);
            } else {
                sourced.push(i);
            }
        }

        // Group the rest by the edge domain holding all of a job's sources.
        let mut by_domain: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
        for i in sourced {
            match self.edge_domain_for(&jobs[i]) {
                Some(domain) => by_domain
                    .entry(domain.name.as_str())
                    .or_default()
                    .push(i),
                None => {
                    results[i] = Some(Placement::failed(RejectReason::SourcesNotInSingleDomain));
                }
            }
        }

        // Process domains in scenario declaration order for determinism.
        for domain in self.scenario.edge_domains() {
            let Some(idxs) = by_domain.remove(domain.name.as_str()) else {
                continue;
            };
            self.schedule_domain(jobs, domain, idxs, &mut results, rng)?;
        }

        // CORRECTNESS: every branch above settles its job indices.
        Ok(results
            .into_iter()
            .map(|r| r.expect("every job receives a result"))
            .collect())
    }

    /// Places the jobs whose sources live in one edge domain.
    fn schedule_domain(
        &self,
        jobs: &[Dataflow],
        domain: &Domain,
        idxs: Vec<usize>,
        results: &mut Vec<Option<Placement>>,
        rng: &mut impl Rng,
    ) -> Result<(), Error> {
        let topo = self.scenario.topology();

        // Source fit is checked for the batch as a whole: the per-host
        // demand of every admitted job must fit that host's free slots.
        let mut demand: FxHashMap<&NodeId, u64> = FxHashMap::default();
        for &i in &idxs {
            for source in jobs[i].sources() {
                if let Some(host) = source.pinned_host() {
                    if let Some(node) = domain.find_host(&host.into()) {
                        *demand.entry(node).or_insert(0) += 1;
                    }
                }
            }
        }
        let mut oversubscribed: FxHashSet<&NodeId> = FxHashSet::default();
        for (&node, &n) in &demand {
            let fits = topo.node(node).map(|p| p.free_slots() >= n).unwrap_or(false);
            if !fits {
                oversubscribed.insert(node);
            }
        }
        let mut admitted = Vec::new();
        for i in idxs {
            let blocked = jobs[i].sources().iter().any(|s| {
                s.pinned_host()
                    .and_then(|h| domain.find_host(&h.into()))
                    .map(|node| oversubscribed.contains(node))
                    .unwrap_or(false)
            });
            if blocked {
                results[i] =
                    Some(Placement::failed(RejectReason::InsufficientResourceForSources));
            } else {
                admitted.push(i);
            }
        }
        if admitted.is_empty() {
            return Ok(());
        }

        // Cut options per job, cheapest crossing bandwidth first. The sort
        // is stable, so equal-flow options keep the chain's larger-first
        // order and ties favor fuller edge sides.
        let options: Vec<Vec<CutOption>> = admitted
            .par_iter()
            .map(|&i| {
                cut_options(&jobs[i])
                    .map(|opts| opts.into_iter().sorted_by_key(|o| o.flow).collect::<Vec<_>>())
            })
            .collect::<Result<_, _>>()?;

        // Fast path: the cheapest option of every job fits together.
        // Otherwise the grouped knapsack picks one option per job.
        let capacity = domain.free_slots(topo) as usize;
        let min_flow_total: usize = options.iter().map(|o| o[0].s_cut.len()).sum();
        let picks: Vec<usize> = if min_flow_total <= capacity {
            vec![0; admitted.len()]
        } else {
            let groups: Vec<Vec<GroupItem>> = options
                .iter()
                .map(|opts| {
                    opts.iter()
                        .map(|o| GroupItem::new(o.s_cut.len(), o.flow.into_u64()))
                        .collect()
                })
                .collect();
            match grouped_exactly_one(capacity, &groups, FillMode::MinCost) {
                Ok(solution) => solution,
                Err(KnapsackError::NoFeasibleSelection { .. }) => {
                    // Not even the smallest cuts fit the domain together.
                    for i in admitted {
                        results[i] = Some(Placement::failed(RejectReason::SlotsNotEnough));
                    }
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }
        };

        // Edge halves go through the provisioning tree in one shared pass.
        let mut provisioner = TreeProvisioner::new(domain, topo)?;
        let mut halves = Vec::with_capacity(admitted.len());
        for (k, &i) in admitted.iter().enumerate() {
            let option = &options[k][picks[k]];
            let s_graph = jobs[i].sub_graph(&option.s_cut, format!("{}~s", jobs[i].id()));
            provisioner.place(s_graph.clone(), rng)?;
            halves.push((i, option, s_graph));
        }
        provisioner.rebalance()?;

        // Sink halves go to a cloud; a cloud failure rolls the edge half
        // back so the rest of the batch sees consistent counters.
        for (i, option, s_graph) in halves {
            let s_result = provisioner.result_for(&s_graph)?;
            let t_result = if option.t_cut.is_empty() {
                Placement::new()
            } else {
                let t_graph = jobs[i].sub_graph(&option.t_cut, format!("{}~t", jobs[i].id()));
                self.cloud_place(&t_graph, rng)?
            };
            let merged = Placement::merge(s_result, t_result);
            if merged.is_failed() {
                provisioner.remove_job(&s_graph);
            }
            results[i] = Some(merged);
        }
        Ok(())
    }

    /// The unique edge domain containing every source's pinned host, if any.
    fn edge_domain_for(&self, job: &Dataflow) -> Option<&Domain> {
        let mut found: Option<&Domain> = None;
        for source in job.sources() {
            let host = HostName::new(source.pinned_host()?);
            let domain = self.scenario.edge_domain_of_host(&host)?;
            match found {
                None => found = Some(domain),
                Some(seen) if seen.name == domain.name => {}
                Some(_) => return None,
            }
        }
        found
    }

    /// Places a job wholesale into a cloud domain chosen at random among
    /// those that contain all of the job's pinned hosts.
    fn cloud_place(&self, job: &Dataflow, rng: &mut impl Rng) -> Result<Placement, Error> {
        let clouds = self.scenario.cloud_domains();
        if clouds.is_empty() {
            return Ok(Placement::failed(RejectReason::NoAvailableHost));
        }
        let viable: Vec<&Domain> = clouds
            .iter()
            .copied()
            .filter(|d| {
                job.vertices().all(|v| {
                    v.pinned_host()
                        .map(|h| d.find_host(&h.into()).is_some())
                        .unwrap_or(true)
                })
            })
            .collect();
        let Some(&domain) = viable.choose(rng) else {
            return Ok(Placement::failed(RejectReason::DomainConstraintViolation));
        };
        let placement =
            RandomProvisioner::new(domain, self.scenario.topology()).schedule(job, rng)?;
        Ok(placement)
    }
}

/// Fatal scheduling errors. Per-job constraint failures are reported inside
/// the returned placements instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Cut-option generation failed.
    #[error("cut generation failed")]
    Cut(#[from] CutError),

    /// The slot allocator failed internally.
    #[error("slot allocation failed")]
    Knapsack(#[from] KnapsackError),

    /// The provisioning engine failed.
    #[error("provisioning failed")]
    Provision(#[from] ProvisionError),
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::dataflow::{Stream, Vertex};
    use crate::testing;
    use crate::units::Bytes;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn node_str<'p>(p: &'p Placement, v: &str) -> &'p str {
        p.node_of(&v.into()).map(NodeId::as_str).unwrap()
    }

    #[test]
    fn chain_keeps_operator_on_edge() -> anyhow::Result<()> {
        // Single job, plenty of room: the equal-cost cut closer to the sink
        // wins, so the operator stays with the source.
        let scenario = testing::edge_cloud_spec(10, 10).build()?;
        let job = testing::linear_job("g1", 1, 1000);
        let placement = FlowScheduler::new(&scenario).schedule(&job, &mut rng())?;
        assert!(!placement.is_failed());
        assert_eq!(node_str(&placement, "v1"), "edge1_rasp1");
        assert_eq!(node_str(&placement, "v2"), "edge1_rasp1");
        assert_eq!(node_str(&placement, "v3"), "cloud1_cloud1");
        Ok(())
    }

    #[test]
    fn fan_out_splits_at_the_cheapest_fitting_cut() -> anyhow::Result<()> {
        // Three free edge slots force the chain's three-vertex option; the
        // heavy v22 branch stays on the edge and the rest is offloaded.
        let scenario = testing::edge_cloud_spec(3, 10).build()?;
        let job = testing::diamond_job("g1");
        let placement = FlowScheduler::new(&scenario).schedule(&job, &mut rng())?;
        assert!(!placement.is_failed());
        for v in ["v1", "v22", "v32"] {
            assert_eq!(node_str(&placement, v), "edge1_rasp1", "vertex {v}");
        }
        for v in ["v21", "v31", "v4"] {
            assert_eq!(node_str(&placement, v), "cloud1_cloud1", "vertex {v}");
        }
        Ok(())
    }

    #[test]
    fn single_slot_keeps_only_the_source() -> anyhow::Result<()> {
        let scenario = testing::edge_cloud_spec(1, 10).build()?;
        let job = testing::diamond_job("g1");
        let placement = FlowScheduler::new(&scenario).schedule(&job, &mut rng())?;
        assert!(!placement.is_failed());
        assert_eq!(node_str(&placement, "v1"), "edge1_rasp1");
        for v in ["v21", "v22", "v31", "v32", "v4"] {
            assert_eq!(node_str(&placement, v), "cloud1_cloud1", "vertex {v}");
        }
        Ok(())
    }

    #[test]
    fn competing_jobs_share_the_edge_budget() -> anyhow::Result<()> {
        // Two diamonds against five free slots: the allocator must pick one
        // cut per job with minimum total crossing bandwidth.
        let scenario = testing::edge_cloud_spec(5, 20).build()?;
        let jobs = vec![testing::diamond_job("g1"), testing::diamond_job("g2")];
        let results = FlowScheduler::new(&scenario).schedule_all(&jobs, &mut rng())?;
        assert!(results.iter().all(|r| !r.is_failed()));
        let edge_counts: Vec<usize> = jobs
            .iter()
            .zip(&results)
            .map(|(job, placement)| {
                job.vertices()
                    .filter(|v| {
                        placement.node_of(&v.id).map(NodeId::as_str) == Some("edge1_rasp1")
                    })
                    .count()
            })
            .collect();
        let total: usize = edge_counts.iter().sum();
        assert!(total <= 5, "edge slots oversubscribed: {edge_counts:?}");
        // The optimum keeps the bare source of one job and a three-vertex
        // cut of the other: 3000 + 1200 total crossing bandwidth.
        assert_eq!(edge_counts, vec![1, 3]);
        Ok(())
    }

    #[test]
    fn both_jobs_fit_when_the_budget_allows() -> anyhow::Result<()> {
        // Six free slots let both jobs keep their three-vertex cuts.
        let scenario = testing::edge_cloud_spec(6, 20).build()?;
        let jobs = vec![testing::diamond_job("g1"), testing::diamond_job("g2")];
        let results = FlowScheduler::new(&scenario).schedule_all(&jobs, &mut rng())?;
        for (job, placement) in jobs.iter().zip(&results) {
            assert!(!placement.is_failed());
            let on_edge = job
                .vertices()
                .filter(|v| placement.node_of(&v.id).map(NodeId::as_str) == Some("edge1_rasp1"))
                .count();
            assert_eq!(on_edge, 3);
        }
        Ok(())
    }

    #[test]
    fn oversubscribed_source_host_rejects_without_mutation() -> anyhow::Result<()> {
        // Two sources pinned to a one-slot host.
        let scenario = testing::edge_cloud_spec(1, 10).build()?;
        let mut job = Dataflow::new("g1");
        job.add_vertex(Vertex::source("s1", "rasp1"))?;
        job.add_vertex(Vertex::source("s2", "rasp1"))?;
        job.add_vertex(Vertex::sink("out", "cloud1"))?;
        job.connect(&"s1".into(), &"out".into(), Stream::new(Bytes::ONE, 10))?;
        job.connect(&"s2".into(), &"out".into(), Stream::new(Bytes::ONE, 10))?;
        let placement = FlowScheduler::new(&scenario).schedule(&job, &mut rng())?;
        assert_eq!(
            placement.reason(),
            Some(RejectReason::InsufficientResourceForSources)
        );
        let edge = scenario.find_domain(&"edge1".into()).unwrap();
        assert_eq!(edge.free_slots(scenario.topology()), 1);
        Ok(())
    }

    #[test]
    fn sources_across_domains_are_rejected() -> anyhow::Result<()> {
        let scenario = testing::two_edge_cloud_spec(10).build()?;
        let mut job = Dataflow::new("g1");
        job.add_vertex(Vertex::source("s1", "rasp1"))?;
        job.add_vertex(Vertex::source("s2", "pi1"))?;
        job.add_vertex(Vertex::sink("out", "cloud1"))?;
        job.connect(&"s1".into(), &"out".into(), Stream::new(Bytes::ONE, 10))?;
        job.connect(&"s2".into(), &"out".into(), Stream::new(Bytes::ONE, 10))?;
        let placement = FlowScheduler::new(&scenario).schedule(&job, &mut rng())?;
        assert_eq!(
            placement.reason(),
            Some(RejectReason::SourcesNotInSingleDomain)
        );
        Ok(())
    }

    #[test]
    fn sourceless_job_goes_to_the_cloud() -> anyhow::Result<()> {
        let scenario = testing::edge_cloud_spec(10, 10).build()?;
        let mut job = Dataflow::new("g1");
        job.add_vertex(Vertex::operator("a"))?;
        job.add_vertex(Vertex::operator("b"))?;
        job.connect(&"a".into(), &"b".into(), Stream::new(Bytes::ONE, 10))?;
        let placement = FlowScheduler::new(&scenario).schedule(&job, &mut rng())?;
        assert!(!placement.is_failed());
        for v in ["a", "b"] {
            assert_eq!(node_str(&placement, v), "cloud1_cloud1");
        }
        Ok(())
    }

    #[test]
    fn successful_plans_are_complete_and_within_capacity() -> anyhow::Result<()> {
        let scenario = testing::edge_cloud_spec(3, 10).build()?;
        let jobs = vec![testing::diamond_job("g1"), testing::linear_job("g2", 1, 50)];
        let results = FlowScheduler::new(&scenario).schedule_all(&jobs, &mut rng())?;
        for (job, placement) in jobs.iter().zip(&results) {
            assert!(placement.is_complete_for(job));
        }
        for host in scenario.topology().hosts() {
            assert!(host.occupied() <= host.slots(), "host {}", host.id);
        }
        Ok(())
    }
}
