//! Grouped 0/1 knapsack: pick exactly one option per group.
//!
//! Both allocators in the pipeline reduce to this problem. The scheduler
//! picks one cut per job minimizing total crossing bandwidth within the edge
//! slot budget; the provisioner picks one topological prefix per held job to
//! fill a node's free slots.

use ndarray::{Array1, Array2};

use crate::constants::MAX_COST;

/// One selectable option: `volume` slots at `cost` crossing bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupItem {
    pub volume: usize,
    pub cost: u64,
}

impl GroupItem {
    /// Creates an item.
    pub const fn new(volume: usize, cost: u64) -> Self {
        Self { volume, cost }
    }
}

/// How to pick among complete selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// The cheapest complete selection within capacity.
    MinCost,
    /// The complete selection consuming the most capacity.
    BestFill,
}

/// Selects exactly one item per group with total volume at most `capacity`.
/// Returns the chosen item index per group.
///
/// The DP walks capacity descending per group; `selected[c]` counts how many
/// groups contributed to the cell so that a cell is only extended when
/// exactly the preceding groups filled it, which enforces one pick per
/// group.
pub fn grouped_exactly_one(
    capacity: usize,
    groups: &[Vec<GroupItem>],
    mode: FillMode,
) -> Result<Vec<usize>, KnapsackError> {
    let nr_groups = groups.len();
    let mut dp = Array1::<u64>::from_elem(capacity + 1, MAX_COST);
    let mut selected = Array1::<i64>::from_elem(capacity + 1, -1);
    let mut choices = Array2::<i64>::from_elem((nr_groups, capacity + 1), -1);
    dp[0] = 0;
    selected[0] = 0;
    for (gid, group) in groups.iter().enumerate() {
        let gid_i = gid as i64;
        for cap in (0..=capacity).rev() {
            for (eid, item) in group.iter().enumerate() {
                if item.volume > cap {
                    continue;
                }
                let prev = cap - item.volume;
                if selected[prev] != gid_i {
                    continue;
                }
                let candidate = dp[prev].saturating_add(item.cost);
                // A cell not reached by the current prefix is stale and may
                // be overwritten even by a worse candidate.
                if candidate < dp[cap] || selected[cap] <= gid_i {
                    dp[cap] = candidate;
                    selected[cap] = gid_i + 1;
                    choices[(gid, cap)] = eid as i64;
                }
            }
        }
    }
    let complete: Vec<usize> = (0..=capacity)
        .filter(|&c| selected[c] == nr_groups as i64)
        .collect();
    if complete.is_empty() {
        return Err(KnapsackError::NoFeasibleSelection { capacity });
    }
    let mut backtrace = match mode {
        FillMode::MinCost => *complete.iter().min_by_key(|&&c| (dp[c], c)).unwrap(),
        FillMode::BestFill => *complete.last().unwrap(),
    };
    let mut solution = vec![0usize; nr_groups];
    for gid in (0..nr_groups).rev() {
        let choice = choices[(gid, backtrace)];
        if choice < 0 {
            return Err(KnapsackError::MissingChoice {
                group: gid,
                capacity: backtrace,
            });
        }
        solution[gid] = choice as usize;
        backtrace -= groups[gid][choice as usize].volume;
    }
    Ok(solution)
}

/// Errors from the grouped knapsack.
#[derive(Debug, thiserror::Error)]
pub enum KnapsackError {
    /// No way to pick one item per group within capacity.
    #[error("no selection of one option per group fits capacity {capacity}")]
    NoFeasibleSelection {
        /// The capacity that could not be met.
        capacity: usize,
    },

    /// The backtrace hit a cell with no recorded choice. This indicates a
    /// bug in the DP itself.
    #[error("missing backtrace choice for group {group} at capacity {capacity}")]
    MissingChoice {
        /// The group whose choice is missing.
        group: usize,
        /// The capacity cell being unwound.
        capacity: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exhaustive reference: the cheapest complete selection, preferring
    /// smaller volume on cost ties.
    fn brute_force(capacity: usize, groups: &[Vec<GroupItem>]) -> Option<(u64, usize)> {
        fn walk(
            capacity: usize,
            groups: &[Vec<GroupItem>],
            gid: usize,
            volume: usize,
            cost: u64,
            best: &mut Option<(u64, usize)>,
        ) {
            if gid == groups.len() {
                if best.map(|(c, v)| (cost, volume) < (c, v)).unwrap_or(true) {
                    *best = Some((cost, volume));
                }
                return;
            }
            for item in &groups[gid] {
                if volume + item.volume <= capacity {
                    walk(
                        capacity,
                        groups,
                        gid + 1,
                        volume + item.volume,
                        cost + item.cost,
                        best,
                    );
                }
            }
        }
        let mut best = None;
        walk(capacity, groups, 0, 0, 0, &mut best);
        best
    }

    fn cut_like_groups() -> Vec<Vec<GroupItem>> {
        // Two jobs with shrinking cut chains, as the scheduler would build.
        vec![
            vec![
                GroupItem::new(5, 200),
                GroupItem::new(4, 1200),
                GroupItem::new(3, 1200),
                GroupItem::new(1, 3000),
            ],
            vec![
                GroupItem::new(5, 200),
                GroupItem::new(4, 1200),
                GroupItem::new(3, 1200),
                GroupItem::new(1, 3000),
            ],
        ]
    }

    #[test]
    fn min_cost_matches_brute_force() -> anyhow::Result<()> {
        let groups = cut_like_groups();
        for capacity in 2..=10 {
            let solution = grouped_exactly_one(capacity, &groups, FillMode::MinCost)?;
            let volume: usize = solution
                .iter()
                .zip(&groups)
                .map(|(&s, g)| g[s].volume)
                .sum();
            let cost: u64 = solution.iter().zip(&groups).map(|(&s, g)| g[s].cost).sum();
            assert!(volume <= capacity);
            let (best_cost, _) = brute_force(capacity, &groups).unwrap();
            assert_eq!(cost, best_cost, "capacity {capacity}");
        }
        Ok(())
    }

    #[test]
    fn exactly_one_item_per_group() -> anyhow::Result<()> {
        let groups = vec![
            vec![GroupItem::new(2, 7), GroupItem::new(1, 9)],
            vec![GroupItem::new(3, 1)],
            vec![GroupItem::new(0, 4), GroupItem::new(2, 2)],
        ];
        let solution = grouped_exactly_one(6, &groups, FillMode::MinCost)?;
        assert_eq!(solution.len(), groups.len());
        let cost: u64 = solution.iter().zip(&groups).map(|(&s, g)| g[s].cost).sum();
        assert_eq!(cost, brute_force(6, &groups).unwrap().0);
        Ok(())
    }

    #[test]
    fn best_fill_consumes_the_most_capacity() -> anyhow::Result<()> {
        // Prefix groups as the provisioner builds them: volume 0 is always an
        // option, so the fullest selection wins even when it costs more.
        let groups = vec![
            vec![
                GroupItem::new(0, 500),
                GroupItem::new(1, 300),
                GroupItem::new(2, 800),
            ],
            vec![GroupItem::new(0, 400), GroupItem::new(1, 100)],
        ];
        let solution = grouped_exactly_one(3, &groups, FillMode::BestFill)?;
        let volume: usize = solution
            .iter()
            .zip(&groups)
            .map(|(&s, g)| g[s].volume)
            .sum();
        assert_eq!(volume, 3);
        Ok(())
    }

    #[test]
    fn infeasible_groups_are_reported() {
        let groups = vec![vec![GroupItem::new(4, 1)], vec![GroupItem::new(4, 1)]];
        assert!(matches!(
            grouped_exactly_one(5, &groups, FillMode::MinCost),
            Err(KnapsackError::NoFeasibleSelection { .. })
        ));
    }

    #[test]
    fn no_groups_is_a_valid_empty_selection() -> anyhow::Result<()> {
        assert_eq!(grouped_exactly_one(3, &[], FillMode::BestFill)?, Vec::<usize>::new());
        Ok(())
    }
}
