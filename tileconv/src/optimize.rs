//! Greedy weighted agglomeration of tiles down to a bounded pattern count.
//!
//! Every distinct encoded tile becomes a [`TileGroup`] in an arena indexed by
//! its creation order. Merging the pair (A, B) costs
//! `distortion(A, B) * count(loser)`, where the loser is the group covering
//! fewer cells (the lower id on equal counts). The cheapest pair is merged
//! until only `max_tiles` groups remain; the winner keeps its own tile.
//!
//! Two strategies pick the cheapest pair:
//! - `Sequential` rescans every active pair on each merge.
//! - `Parallel` computes the pairwise distortion table once on a rayon pool,
//!   then pops candidates from a min-heap. Candidates are tagged with the
//!   generation of both groups and skipped once either has merged or died;
//!   after each merge only the winner's row is pushed again.
//!
//! Both order candidates by `(cost, lower id, higher id)` and so make the
//! same choice at every step.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use itertools::Itertools;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cost::TileCostModel;
use crate::error::ConversionError;
use crate::remap::Grid;
use crate::tile::EncodedTile;

/// How the merge loop finds the cheapest pair
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Recompute every pairwise cost on each iteration
    Sequential,
    /// Precompute distortions in parallel, then merge from a priority queue
    #[default]
    Parallel,
}

/// A cluster of grid cells sharing one representative tile
#[derive(Debug, Clone)]
pub struct TileGroup {
    /// Position in the arena, assigned in order of first appearance
    pub id: usize,
    pub tile: EncodedTile,
    /// Number of grid cells this group currently stands for
    pub count: usize,
    /// Ids of every original group merged into this one, itself included
    pub members: Vec<usize>,
    active: bool,
    generation: u32,
}

impl TileGroup {
    fn new(id: usize, tile: EncodedTile) -> Self {
        TileGroup {
            id,
            tile,
            count: 0,
            members: vec![id],
            active: true,
            generation: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct MergeCandidate {
    cost: u64,
    a: usize,
    b: usize,
    generation_a: u32,
    generation_b: u32,
}

/// The group arena after optimization plus each cell's original group
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub groups: Vec<TileGroup>,
    /// Original group id of every grid cell, row-major
    pub cell_groups: Vec<usize>,
    pub merges: usize,
}

impl MergeOutcome {
    /// Number of distinct tiles in the source grid
    pub fn distinct_tiles(&self) -> usize {
        self.groups.len()
    }

    /// Surviving groups in creation order
    pub fn survivors(&self) -> impl Iterator<Item = &TileGroup> {
        self.groups.iter().filter(|g| g.active)
    }
}

/// Summary of one optimization run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub distinct_tiles: usize,
    pub merges: usize,
    pub final_tiles: usize,
    /// Sum over all cells of the distortion between the original and final tile
    pub total_distortion: u64,
}

/// Reduces a grid of encoded tiles to at most `max_tiles` unique patterns
pub struct MergeOptimizer<'a> {
    cost: TileCostModel<'a>,
    max_tiles: usize,
    strategy: MergeStrategy,
    workers: usize,
}

impl<'a> MergeOptimizer<'a> {
    pub fn new(
        cost: TileCostModel<'a>,
        max_tiles: usize,
        strategy: MergeStrategy,
        workers: usize,
    ) -> Self {
        MergeOptimizer {
            cost,
            max_tiles,
            strategy,
            workers,
        }
    }

    pub fn optimize(&self, cells: &[EncodedTile]) -> Result<MergeOutcome, ConversionError> {
        if self.max_tiles == 0 {
            return Err(ConversionError::InvalidConfig {
                field: "max_unique_tiles",
                reason: "must be at least 1".to_string(),
            });
        }

        let (mut groups, cell_groups) = deduplicate(cells);
        let distinct = groups.len();

        if distinct <= self.max_tiles {
            info!(
                "{} distinct tiles fit within {}, no merging needed",
                distinct, self.max_tiles
            );
            return Ok(MergeOutcome {
                groups,
                cell_groups,
                merges: 0,
            });
        }

        info!(
            "Reducing {} distinct tiles to {} ({:?} strategy, {:?} cost)",
            distinct,
            self.max_tiles,
            self.strategy,
            self.cost.model()
        );

        let merges = match self.strategy {
            MergeStrategy::Sequential => self.merge_sequential(&mut groups)?,
            MergeStrategy::Parallel => self.merge_parallel(&mut groups)?,
        };

        Ok(MergeOutcome {
            groups,
            cell_groups,
            merges,
        })
    }

    fn merge_cost(&self, a: &TileGroup, b: &TileGroup) -> Result<u64, ConversionError> {
        let distortion = self.cost.distortion(&a.tile, &b.tile)?;
        Ok(distortion * a.count.min(b.count) as u64)
    }

    fn merge_sequential(&self, groups: &mut [TileGroup]) -> Result<usize, ConversionError> {
        let mut active = groups.len();
        let mut merges = 0;

        while active > self.max_tiles {
            let mut best: Option<(u64, usize, usize)> = None;
            for (a, b) in groups.iter().filter(|g| g.active).tuple_combinations() {
                let key = (self.merge_cost(a, b)?, a.id, b.id);
                if best.map_or(true, |current| key < current) {
                    best = Some(key);
                }
            }

            let (cost, a, b) = best.ok_or(ConversionError::TargetUnreachable {
                active,
                target: self.max_tiles,
            })?;
            let winner = merge_pair(groups, a, b);
            debug!("merged {} and {} into {} at cost {}", a, b, winner, cost);

            active -= 1;
            merges += 1;
        }

        Ok(merges)
    }

    fn merge_parallel(&self, groups: &mut [TileGroup]) -> Result<usize, ConversionError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;
        let table = DistortionTable::build(&pool, groups, &self.cost)?;

        let mut heap: BinaryHeap<Reverse<MergeCandidate>> = groups
            .iter()
            .tuple_combinations()
            .map(|(a, b)| Reverse(candidate(a, b, table.get(a.id, b.id))))
            .collect();
        debug!("seeded merge queue with {} candidates", heap.len());

        let mut active = groups.len();
        let mut merges = 0;

        while active > self.max_tiles {
            let Some(Reverse(next)) = heap.pop() else {
                return Err(ConversionError::TargetUnreachable {
                    active,
                    target: self.max_tiles,
                });
            };
            if !is_current(groups, &next) {
                continue;
            }

            let winner = merge_pair(groups, next.a, next.b);
            debug!(
                "merged {} and {} into {} at cost {}",
                next.a, next.b, winner, next.cost
            );
            active -= 1;
            merges += 1;

            let winner = &groups[winner];
            for other in groups.iter().filter(|g| g.active && g.id != winner.id) {
                heap.push(Reverse(candidate(
                    winner,
                    other,
                    table.get(winner.id, other.id),
                )));
            }
        }

        Ok(merges)
    }
}

/// Group identical tiles, in order of first appearance
fn deduplicate(cells: &[EncodedTile]) -> (Vec<TileGroup>, Vec<usize>) {
    let mut lookup: HashMap<EncodedTile, usize> = HashMap::new();
    let mut groups: Vec<TileGroup> = Vec::new();
    let mut cell_groups = Vec::with_capacity(cells.len());

    for tile in cells {
        let id = *lookup.entry(*tile).or_insert_with(|| {
            groups.push(TileGroup::new(groups.len(), *tile));
            groups.len() - 1
        });
        groups[id].count += 1;
        cell_groups.push(id);
    }

    (groups, cell_groups)
}

/// Returns (winner, loser); the loser covers fewer cells, or has the lower id on a tie
fn winner_and_loser(a: &TileGroup, b: &TileGroup) -> (usize, usize) {
    match a.count.cmp(&b.count) {
        Ordering::Greater => (a.id, b.id),
        Ordering::Less => (b.id, a.id),
        Ordering::Equal => (a.id.max(b.id), a.id.min(b.id)),
    }
}

/// Fold the loser of (a, b) into the winner and return the winner's id
fn merge_pair(groups: &mut [TileGroup], a: usize, b: usize) -> usize {
    let (winner, loser) = winner_and_loser(&groups[a], &groups[b]);

    let members = std::mem::take(&mut groups[loser].members);
    let count = std::mem::take(&mut groups[loser].count);
    groups[loser].active = false;
    groups[loser].generation += 1;

    let survivor = &mut groups[winner];
    survivor.count += count;
    survivor.members.extend(members);
    survivor.generation += 1;

    winner
}

fn candidate(a: &TileGroup, b: &TileGroup, distortion: u64) -> MergeCandidate {
    let (first, second) = if a.id < b.id { (a, b) } else { (b, a) };
    MergeCandidate {
        cost: distortion * first.count.min(second.count) as u64,
        a: first.id,
        b: second.id,
        generation_a: first.generation,
        generation_b: second.generation,
    }
}

fn is_current(groups: &[TileGroup], candidate: &MergeCandidate) -> bool {
    let (a, b) = (&groups[candidate.a], &groups[candidate.b]);
    a.active
        && b.active
        && a.generation == candidate.generation_a
        && b.generation == candidate.generation_b
}

/// Upper-triangular table of pairwise tile distortions
struct DistortionTable {
    len: usize,
    values: Vec<u64>,
}

impl DistortionTable {
    fn build(
        pool: &rayon::ThreadPool,
        groups: &[TileGroup],
        cost: &TileCostModel,
    ) -> Result<Self, ConversionError> {
        let len = groups.len();
        let pairs: Vec<(usize, usize)> = (0..len).tuple_combinations().collect();

        let values = pool.install(|| {
            pairs
                .par_iter()
                .map(|&(a, b)| cost.distortion(&groups[a].tile, &groups[b].tile))
                .collect::<Result<Vec<u64>, ConversionError>>()
        })?;

        Ok(DistortionTable { len, values })
    }

    fn get(&self, a: usize, b: usize) -> u64 {
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        self.values[a * (2 * self.len - a - 1) / 2 + (b - a - 1)]
    }
}

/// Total distortion between each cell's original tile and the tile it ends up showing
pub fn total_distortion(
    cost: &TileCostModel,
    cells: &[EncodedTile],
    tiles: &[EncodedTile],
    grid: &Grid,
) -> Result<u64, ConversionError> {
    cells
        .iter()
        .zip(grid.cells())
        .map(|(original, &index)| {
            let shown = tiles.get(index).ok_or_else(|| {
                ConversionError::Internal(format!("grid references missing tile {index}"))
            })?;
            cost.distortion(original, shown)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;
    use crate::cost::CostModel;
    use crate::tile::TILE_SIZE;

    fn palette() -> Vec<Rgb<u8>> {
        vec![Rgb([0, 0, 0]), Rgb([255, 255, 255])]
    }

    fn tile(pattern: u8) -> EncodedTile {
        EncodedTile {
            patterns: [pattern; TILE_SIZE],
            colors: [0x10; TILE_SIZE],
        }
    }

    /// Cells with uneven repetition of a dozen patterns
    fn cells() -> Vec<EncodedTile> {
        let patterns = [
            0x00, 0x01, 0x03, 0x07, 0x0f, 0x1f, 0x3f, 0x7f, 0xff, 0x55, 0xaa, 0x81,
        ];
        patterns
            .iter()
            .enumerate()
            .flat_map(|(i, &p)| std::iter::repeat(tile(p)).take(1 + (i * 7) % 5))
            .collect()
    }

    fn optimizer(palette: &[Rgb<u8>], max_tiles: usize, strategy: MergeStrategy) -> MergeOptimizer<'_> {
        MergeOptimizer::new(
            TileCostModel::new(CostModel::Exact, palette),
            max_tiles,
            strategy,
            2,
        )
    }

    #[test]
    fn deduplicates_in_order_of_appearance() {
        let (groups, cell_groups) = deduplicate(&[tile(1), tile(2), tile(1), tile(3)]);
        assert_eq!(groups.len(), 3);
        assert_eq!(cell_groups, vec![0, 1, 0, 2]);
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[2].tile, tile(3));
    }

    #[test]
    fn no_merges_when_under_the_limit() {
        let palette = palette();
        let cells = cells();
        let outcome = optimizer(&palette, 12, MergeStrategy::Parallel)
            .optimize(&cells)
            .unwrap();
        assert_eq!(outcome.merges, 0);
        assert_eq!(outcome.survivors().count(), 12);
    }

    #[test]
    fn reduces_to_exactly_the_target() {
        let palette = palette();
        let cells = cells();
        for strategy in [MergeStrategy::Sequential, MergeStrategy::Parallel] {
            let outcome = optimizer(&palette, 5, strategy).optimize(&cells).unwrap();
            assert_eq!(outcome.survivors().count(), 5);
            assert_eq!(outcome.merges, 7);
            let covered: usize = outcome.survivors().map(|g| g.count).sum();
            assert_eq!(covered, cells.len());
            let members: usize = outcome.survivors().map(|g| g.members.len()).sum();
            assert_eq!(members, 12);
        }
    }

    #[test]
    fn strategies_agree() {
        let palette = palette();
        let cells = cells();
        for target in [1, 3, 6, 11] {
            let sequential = optimizer(&palette, target, MergeStrategy::Sequential)
                .optimize(&cells)
                .unwrap();
            let parallel = optimizer(&palette, target, MergeStrategy::Parallel)
                .optimize(&cells)
                .unwrap();
            let summary = |outcome: &MergeOutcome| -> Vec<(usize, usize)> {
                outcome.survivors().map(|g| (g.id, g.count)).collect()
            };
            assert_eq!(summary(&sequential), summary(&parallel));
        }
    }

    #[test]
    fn loser_is_the_smaller_group() {
        let palette = palette();
        // 0xff appears three times, 0xfe once: the single cell is folded in
        let cells = [tile(0xff), tile(0xfe), tile(0xff), tile(0xff), tile(0x00)];
        let outcome = optimizer(&palette, 2, MergeStrategy::Sequential)
            .optimize(&cells)
            .unwrap();
        let survivors: Vec<&TileGroup> = outcome.survivors().collect();
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].tile, tile(0xff));
        assert_eq!(survivors[0].count, 4);
        assert_eq!(survivors[0].members, vec![0, 1]);
    }

    #[test]
    fn equal_counts_sacrifice_the_lower_id() {
        let a = TileGroup::new(3, tile(1));
        let b = TileGroup::new(7, tile(2));
        assert_eq!(winner_and_loser(&a, &b), (7, 3));
        assert_eq!(winner_and_loser(&b, &a), (7, 3));
    }

    #[test]
    fn identical_renders_merge_first() {
        let palette = palette();
        // Solid black encoded with two different foregrounds
        let black_a = EncodedTile {
            patterns: [0; TILE_SIZE],
            colors: [0x00; TILE_SIZE],
        };
        let black_b = EncodedTile {
            patterns: [0; TILE_SIZE],
            colors: [0x10; TILE_SIZE],
        };
        let cells = [black_a, tile(0xf0), black_b, tile(0x0f)];
        for strategy in [MergeStrategy::Sequential, MergeStrategy::Parallel] {
            let outcome = optimizer(&palette, 3, strategy).optimize(&cells).unwrap();
            assert!(!outcome.groups[0].is_active());
            assert_eq!(outcome.groups[2].members, vec![2, 0]);
        }
    }

    #[test]
    fn distortion_table_indexes_every_pair() {
        let palette = palette();
        let cost = TileCostModel::new(CostModel::BitProxy, &palette);
        let (groups, _) = deduplicate(&[tile(0x00), tile(0x01), tile(0x03), tile(0x07)]);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let table = DistortionTable::build(&pool, &groups, &cost).unwrap();
        for (a, b) in (0..4).tuple_combinations() {
            let expected = cost.distortion(&groups[a].tile, &groups[b].tile).unwrap();
            assert_eq!(table.get(a, b), expected);
            assert_eq!(table.get(b, a), expected);
        }
    }

    #[test]
    fn zero_target_is_rejected() {
        let palette = palette();
        assert!(optimizer(&palette, 0, MergeStrategy::Sequential)
            .optimize(&cells())
            .is_err());
    }
}
