//! Thin file-based driver around the core placement engine: read a scenario
//! and a job stream, place the jobs, and report the plans as JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;

use streamplace_core::dataflow::Dataflow;
use streamplace_core::latency::{JobLatency, LatencyCalculator, LatencyError};
use streamplace_core::schedule::FlowScheduler;
use streamplace_core::spec::{load_all, ScenarioSpec, ScenarioError, SpecError};

/// A placement request: the scenario, the jobs, and run options.
#[derive(Debug, typed_builder::TypedBuilder)]
pub struct Request {
    /// The physical fabric.
    pub scenario: ScenarioSpec,
    /// Jobs to place.
    pub jobs: Vec<Dataflow>,
    /// Seed for the random placement choices.
    #[builder(default)]
    pub seed: u64,
    /// Whether to also estimate latency and back-pressure.
    #[builder(default)]
    pub latency: bool,
}

/// One job's outcome.
#[derive(Debug, serde::Serialize)]
pub struct JobReport {
    /// The job's UUID.
    pub job: String,
    /// `succeeded` or `failed`.
    pub status: String,
    /// The failure tag, for failed jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Vertex-to-node assignments, for succeeded jobs.
    pub assignments: BTreeMap<String, String>,
    /// Latency figures, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<JobLatency>,
}

/// Reads a scenario document.
pub fn read_scenario(path: impl AsRef<Path>) -> Result<ScenarioSpec, Error> {
    let contents = fs::read_to_string(path.as_ref())?;
    match path.as_ref().extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(serde_json::from_str(&contents)?),
        _ => Err(Error::UnknownFileType(path.as_ref().into())),
    }
}

/// Reads a job stream written by [`streamplace_core::spec::save_all`].
pub fn read_jobs(path: impl AsRef<Path>) -> Result<Vec<Dataflow>, Error> {
    let file = fs::File::open(path.as_ref())?;
    Ok(load_all(file)?)
}

/// Places the jobs of a request and reports one plan per job.
pub fn run(request: Request) -> Result<Vec<JobReport>, Error> {
    let scenario = request.scenario.build()?;
    let mut rng = StdRng::seed_from_u64(request.seed);
    let scheduler = FlowScheduler::new(&scenario);
    let placements = scheduler.schedule_all(&request.jobs, &mut rng)?;

    let mut latencies = BTreeMap::new();
    if request.latency {
        let mut calculator = LatencyCalculator::new(scenario.topology());
        for (job, placement) in request.jobs.iter().zip(&placements) {
            if placement.is_complete_for(job) {
                calculator.add(job.clone(), placement.clone())?;
            }
        }
        for (job, figure) in calculator.compute()? {
            latencies.insert(job.to_string(), figure);
        }
    }

    let reports = request
        .jobs
        .iter()
        .zip(placements)
        .map(|(job, placement)| JobReport {
            job: job.id().to_string(),
            status: if placement.is_failed() {
                "failed".to_owned()
            } else {
                "succeeded".to_owned()
            },
            reason: placement.reason().map(|r| r.to_string()),
            assignments: placement
                .assignments()
                .iter()
                .map(|(v, n)| (v.to_string(), n.to_string()))
                .collect(),
            latency: latencies.get(&job.id().to_string()).copied(),
        })
        .collect();
    Ok(reports)
}

/// Reads both input files and places the jobs.
pub fn run_from_files(
    scenario: impl AsRef<Path>,
    jobs: impl AsRef<Path>,
    seed: u64,
    latency: bool,
) -> Result<Vec<JobReport>, Error> {
    let request = Request::builder()
        .scenario(read_scenario(scenario)?)
        .jobs(read_jobs(jobs)?)
        .seed(seed)
        .latency(latency)
        .build();
    run(request)
}

/// Driver errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input files must carry a known extension.
    #[error("unknown file type: {0}")]
    UnknownFileType(PathBuf),

    /// JSON error.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error")]
    Io(#[from] std::io::Error),

    /// The scenario document is invalid.
    #[error("invalid scenario")]
    Scenario(#[from] ScenarioError),

    /// The job stream is invalid.
    #[error("invalid job stream")]
    Spec(#[from] SpecError),

    /// Placement failed fatally.
    #[error("failed to place jobs")]
    Schedule(#[from] streamplace_core::schedule::Error),

    /// Latency estimation failed.
    #[error("failed to estimate latency")]
    Latency(#[from] LatencyError),
}
