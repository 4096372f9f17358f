//! Post-placement latency and back-pressure estimation.
//!
//! Placed jobs are replayed onto the topology's link counters, then each job
//! is walked in topological order to estimate per-vertex arrival latency and
//! to count streams whose transmission time exceeds their production
//! interval.

use rustc_hash::FxHashMap;

use crate::dataflow::{Dataflow, DataflowError, JobId, VertexId};
use crate::placement::Placement;
use crate::topology::{NodeId, Topology, TopologyError};
use crate::units::Millisecs;

/// A job with its finished placement.
#[derive(Debug, Clone)]
struct ScheduledJob {
    job: Dataflow,
    placement: Placement,
}

/// Estimated latency figures for one job.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct JobLatency {
    /// Arrival latency at the end of the job's topological order.
    pub end_to_end: Millisecs,
    /// Fraction of streams whose transmission time exceeds the producer's
    /// inter-unit interval.
    pub backpressure: f64,
}

/// Accumulates placed jobs and computes their latency estimates.
#[derive(Debug)]
pub struct LatencyCalculator<'a> {
    topo: &'a Topology,
    jobs: Vec<ScheduledJob>,
}

impl<'a> LatencyCalculator<'a> {
    /// Creates a calculator over a topology.
    pub fn new(topo: &'a Topology) -> Self {
        Self {
            topo,
            jobs: Vec::new(),
        }
    }

    /// Registers a placed job and charges its streams to the links they
    /// traverse.
    pub fn add(&mut self, job: Dataflow, placement: Placement) -> Result<(), LatencyError> {
        if !placement.is_complete_for(&job) {
            return Err(LatencyError::IncompletePlacement {
                job: job.id().clone(),
            });
        }
        for (from, to, stream) in job.streams() {
            let a = self.node_of(&placement, from)?;
            let b = self.node_of(&placement, to)?;
            self.topo.occupy_path(a, b, stream.bandwidth())?;
        }
        self.jobs.push(ScheduledJob { job, placement });
        Ok(())
    }

    fn node_of<'p>(
        &self,
        placement: &'p Placement,
        vertex: &VertexId,
    ) -> Result<&'p NodeId, LatencyError> {
        placement
            .node_of(vertex)
            .ok_or_else(|| LatencyError::UnplacedVertex {
                vertex: vertex.clone(),
            })
    }

    /// Computes latency figures for every registered job.
    pub fn compute(&self) -> Result<FxHashMap<JobId, JobLatency>, LatencyError> {
        let mut out = FxHashMap::default();
        for scheduled in &self.jobs {
            out.insert(
                scheduled.job.id().clone(),
                self.job_latency(scheduled)?,
            );
        }
        Ok(out)
    }

    fn job_latency(&self, scheduled: &ScheduledJob) -> Result<JobLatency, LatencyError> {
        let ScheduledJob { job, placement } = scheduled;
        let mut arrival: FxHashMap<&VertexId, f64> = FxHashMap::default();
        let mut backpressured = 0usize;
        let mut last = 0.0f64;
        for v in job.topological_order()? {
            let home = self.node_of(placement, &v.id)?;
            let compute = self
                .topo
                .computation_latency(home, v.mi)?
                .into_f64();
            let upstream = job.upstream_of(&v.id);
            let input = if upstream.is_empty() {
                0.0
            } else {
                let mut sum = 0.0;
                for u in &upstream {
                    let from = self.node_of(placement, &u.id)?;
                    let stream = job
                        .stream(&u.id, &v.id)
                        .ok_or_else(|| LatencyError::UnplacedVertex {
                            vertex: u.id.clone(),
                        })?;
                    let intrinsic = self.topo.intrinsic_latency(from, home)?.into_f64();
                    let transmission = self
                        .topo
                        .transmission_latency(from, home, stream.unit_size, stream.bandwidth())?
                        .into_f64();
                    if transmission > 1000.0 / stream.per_second as f64 {
                        backpressured += 1;
                    }
                    sum += arrival[&u.id] + intrinsic + transmission;
                }
                // Averaging over fan-in underestimates joins that wait for
                // their slowest input.
                sum / upstream.len() as f64
            };
            let total = input + compute;
            arrival.insert(&v.id, total);
            last = total;
        }
        let nr_streams = job.streams().count();
        let backpressure = if nr_streams == 0 {
            0.0
        } else {
            backpressured as f64 / nr_streams as f64
        };
        Ok(JobLatency {
            end_to_end: Millisecs::new(last.round() as u64),
            backpressure,
        })
    }
}

/// Errors from the latency calculator.
#[derive(Debug, thiserror::Error)]
pub enum LatencyError {
    /// The placement does not cover the whole job.
    #[error("placement for job {job} is incomplete")]
    IncompletePlacement {
        /// The affected job.
        job: JobId,
    },

    /// A vertex has no assigned node.
    #[error("vertex {vertex} has no assigned node")]
    UnplacedVertex {
        /// The unassigned vertex.
        vertex: VertexId,
    },

    /// A latency query failed.
    #[error("topology query failed")]
    Topology(#[from] TopologyError),

    /// The job graph was invalid.
    #[error("invalid job graph")]
    Dataflow(#[from] DataflowError),
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::schedule::FlowScheduler;
    use crate::testing;

    #[test]
    fn incomplete_placement_is_rejected() {
        let scenario = testing::edge_cloud_spec(10, 10).build().unwrap();
        let job = testing::linear_job("g1", 1, 1000);
        let mut calc = LatencyCalculator::new(scenario.topology());
        assert!(matches!(
            calc.add(job, Placement::new()),
            Err(LatencyError::IncompletePlacement { .. })
        ));
    }

    #[test]
    fn placed_chain_has_positive_latency() -> anyhow::Result<()> {
        let scenario = testing::edge_cloud_spec(10, 10).build()?;
        let job = testing::linear_job("g1", 1_000_000, 2);
        let placement =
            FlowScheduler::new(&scenario).schedule(&job, &mut StdRng::seed_from_u64(1))?;
        let mut calc = LatencyCalculator::new(scenario.topology());
        calc.add(job.clone(), placement)?;
        let figures = calc.compute()?;
        let figure = figures.get(job.id()).unwrap();
        assert!(figure.end_to_end > Millisecs::ZERO);
        Ok(())
    }

    #[test]
    fn slow_cross_domain_stream_counts_as_backpressure() -> anyhow::Result<()> {
        // One-byte units at 1000/s cross between rasp1 and cloud1 over a
        // 40 Mbps interdomain link; pushing 10 MB units at that rate cannot
        // keep up, so the edge-to-cloud stream is back-pressured.
        let scenario = testing::edge_cloud_spec(10, 10).build()?;
        let job = testing::linear_job("g1", 10_000_000, 1000);
        let placement =
            FlowScheduler::new(&scenario).schedule(&job, &mut StdRng::seed_from_u64(1))?;
        let mut calc = LatencyCalculator::new(scenario.topology());
        calc.add(job.clone(), placement)?;
        let figures = calc.compute()?;
        let figure = figures.get(job.id()).unwrap();
        assert!(figure.backpressure >= 0.5, "got {}", figure.backpressure);
        Ok(())
    }
}
