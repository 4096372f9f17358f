//! Placement constants shared across the pipeline.

use crate::units::{Bytes, BitsPerSec};

/// Memory backing one placement slot on a host.
pub const SLOT_MEMORY_SIZE: Bytes = Bytes::new(500_000_000);

/// Bandwidth assumed for vertices co-located on the same host.
pub const LOCAL_BANDWIDTH: BitsPerSec = BitsPerSec::new(100_000_000);

/// Capacity of virtual source/sink arcs in the flow network. Far above any
/// attainable aggregate stream bandwidth, and small enough that sums of a few
/// of them still fit in a `u64`.
pub const UNBOUNDED_CAPACITY: BitsPerSec = BitsPerSec::new(1_000_000_000_000_000_000);

/// Sentinel for "no solution yet" knapsack cells.
pub const MAX_COST: u64 = 1_000_000_000_000_000_000;

/// Upper bound on the cut-chain length; exceeding it is a fatal diagnostic.
pub const CUT_CHAIN_CAP: usize = 100;

/// Provisioning rounds without a newly placed vertex before the tree gives up.
pub const WATCHDOG_ROUNDS: usize = 20;
