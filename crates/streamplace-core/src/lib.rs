#![warn(unreachable_pub, missing_debug_implementations)]

//! Core placement engine for streaming-dataflow jobs on an edge/cloud
//! fabric.
//!
//! A [`Scenario`](scenario::Scenario) describes the physical sites; each
//! [`Dataflow`](dataflow::Dataflow) is a DAG of sources, operators, and
//! sinks. The [`FlowScheduler`](schedule::FlowScheduler) decides which
//! vertex runs on which host: min-cut chains per job, a grouped knapsack
//! over the edge slot budget, a provisioning tree per edge domain, and
//! random placement in the cloud. The
//! [`LatencyCalculator`](latency::LatencyCalculator) estimates end-to-end
//! latency and back-pressure for finished placements.

#[macro_use]
mod ident;

pub mod constants;
pub mod dataflow;
pub mod knapsack;
pub mod latency;
pub mod mincut;
pub mod placement;
pub mod provision;
pub mod scenario;
pub mod schedule;
pub mod spec;
pub mod topology;
pub mod units;

#[cfg(test)]
pub(crate) mod testing;

pub use dataflow::{Dataflow, Stream, Vertex, VertexKind};
pub use latency::LatencyCalculator;
pub use mincut::{cut_options, min_cut, CutOption};
pub use placement::{Placement, RejectReason};
pub use scenario::Scenario;
pub use schedule::{Error, FlowScheduler};
pub use spec::{load_all, save_all, JobSpec, ScenarioSpec};
