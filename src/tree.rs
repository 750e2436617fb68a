// tree.rs — Descriptor tree construction and approximate matching, CPU
// reference.
//
// The tree is a binary heap over a fixed number of leaves. Leaf cells hold
// reference descriptors (plus their original list index); every internal
// cell is the bitwise OR of its two children, so the match error against an
// internal cell is a lower bound on the error against any leaf below it —
// descending toward the lower-error child is a cheap greedy heuristic.
//
// Traversal does not start at the heap root: with L leaves and a traversal
// depth of `levels`, search starts at the L >> levels cells of the
// pre-root row and descends `levels` times from each. Iterating several
// shallow subtrees instead of one deep tree bounds the cost of a wrong
// greedy turn near the top.
//
// The first leaf whose error is within the acceptance threshold wins; this
// is an artifact of traversal order and deliberately approximate. The only
// guarantees are the acceptance contract (every emitted match has error ≤
// the threshold) and the output bound (at most one match per query).

use log::warn;

use crate::fast::Point;
use crate::hips::{match_error, HipsDescriptor, ROTATIONS};

/// Sentinel for leaf cells that carry no reference descriptor.
pub const INVALID_INDEX: u32 = u32::MAX;

/// Tree shape parameters.
#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    /// Number of leaf cells. Must be a power of two.
    pub leaves: usize,
    /// Number of levels descended per traversal. The pre-root row has
    /// `leaves >> levels` cells.
    pub levels: usize,
}

impl TreeConfig {
    /// # Panics
    /// Panics unless `leaves` is a power of two and `1 <= levels <= log2(leaves)`.
    pub fn new(leaves: usize, levels: usize) -> Self {
        assert!(
            leaves.is_power_of_two() && leaves >= 2,
            "leaves must be a power of two >= 2 (got {leaves})"
        );
        assert!(
            levels >= 1 && (leaves >> levels) >= 1,
            "levels must be in 1..=log2(leaves) (got {levels} for {leaves} leaves)"
        );
        TreeConfig { leaves, levels }
    }

    /// Number of pre-root cells traversal starts from.
    pub fn pre_roots(&self) -> usize {
        self.leaves >> self.levels
    }
}

/// A built descriptor tree. Read-only after construction.
pub struct HipsTree {
    config: TreeConfig,
    /// Binary heap of descriptor cells, children of i at 2i+1 and 2i+2.
    /// Length 2 * leaves - 1; leaves occupy the tail half. Cells above the
    /// pre-root row are never visited and stay zero.
    cells: Vec<HipsDescriptor>,
    /// Original reference-list index per leaf, `INVALID_INDEX` when empty.
    leaf_index: Vec<u32>,
}

impl HipsTree {
    /// Build a tree over a reference descriptor list.
    ///
    /// Deterministic given the list contents and order: the first
    /// `min(len, leaves)` descriptors are placed into the leaf row in
    /// ascending popcount order (stable, so equal-popcount descriptors
    /// keep their insertion order), then internal cells are filled with
    /// child ORs. Descriptors beyond the leaf capacity are dropped and
    /// reported.
    pub fn build(descriptors: &[HipsDescriptor], config: TreeConfig) -> HipsTree {
        let leaves = config.leaves;

        if descriptors.len() > leaves {
            warn!(
                "descriptor tree: dropping {} of {} reference descriptors (leaf capacity {})",
                descriptors.len() - leaves,
                descriptors.len(),
                leaves,
            );
        }
        let used = descriptors.len().min(leaves);

        // Popcount-sorted leaf order groups descriptors of similar density,
        // which is what the OR-folding upper levels discriminate on.
        let mut order: Vec<u32> = (0..used as u32).collect();
        order.sort_by_key(|&i| descriptors[i as usize].popcount());

        let mut cells = vec![HipsDescriptor::zero(); 2 * leaves - 1];
        let mut leaf_index = vec![INVALID_INDEX; leaves];

        let leaf0 = leaves - 1;
        for (slot, &orig) in order.iter().enumerate() {
            cells[leaf0 + slot] = descriptors[orig as usize];
            leaf_index[slot] = orig;
        }

        // Fold leaves upward: every internal cell is the OR of its children.
        for i in (0..leaf0).rev() {
            cells[i] = cells[2 * i + 1].or(&cells[2 * i + 2]);
        }

        HipsTree {
            config,
            cells,
            leaf_index,
        }
    }

    pub fn config(&self) -> TreeConfig {
        self.config
    }

    /// Heap cell array (pre-root row and below are meaningful).
    pub fn cells(&self) -> &[HipsDescriptor] {
        &self.cells
    }

    /// Leaf-slot → original reference index map.
    pub fn leaf_index(&self) -> &[u32] {
        &self.leaf_index
    }

    /// Search for an acceptable reference match for one query.
    ///
    /// Returns `(reference_index, error)` for the first leaf found within
    /// `max_error`, or `None`. Zero queries never match.
    pub fn find(&self, query: &HipsDescriptor, max_error: u32, rotate: bool) -> Option<(u32, u32)> {
        if query.is_zero() {
            return None;
        }

        let pre_roots = self.config.pre_roots();
        let steps = if rotate { ROTATIONS } else { 1 };

        for step in 0..steps {
            let q = query.rotate_lanes(step);

            for root in 0..pre_roots {
                // Pre-root row occupies cells [pre_roots - 1, 2 * pre_roots - 1).
                let mut icell = (pre_roots - 1) + root;

                for _ in 0..self.config.levels {
                    let left = 2 * icell + 1;
                    let right = left + 1;
                    let err_l = match_error(&q, &self.cells[left], false);
                    let err_r = match_error(&q, &self.cells[right], false);
                    icell = if err_r < err_l { right } else { left };
                }

                let err = match_error(&q, &self.cells[icell], false);
                if err <= max_error {
                    let slot = icell - (self.config.leaves - 1);
                    let orig = self.leaf_index[slot];
                    if orig != INVALID_INDEX {
                        return Some((orig, err));
                    }
                }
            }
        }
        None
    }
}

/// Match a query descriptor list against a built tree.
///
/// Output is a correspondence list reusing the point type:
/// `x` = reference index, `y` = query index. At most one entry per query,
/// so the output count never exceeds the query count.
pub fn find_matches(
    tree: &HipsTree,
    queries: &[HipsDescriptor],
    max_error: u32,
    rotate: bool,
) -> Vec<Point> {
    let mut matches = Vec::new();
    for (iq, q) in queries.iter().enumerate() {
        if let Some((ir, _err)) = tree.find(q, max_error, rotate) {
            matches.push(Point::new(ir as i32, iq as i32));
        }
    }
    matches
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fast::Point as Pt;
    use crate::hips::{build_descriptor, HipsConfig};
    use crate::image::Image;

    fn textured_image(seed: u32) -> Image<u8> {
        let mut rng = seed;
        let pixels: Vec<u8> = (0..96 * 96)
            .map(|_| {
                rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
                (rng >> 24) as u8
            })
            .collect();
        Image::from_vec(96, 96, pixels)
    }

    /// Descriptors at distinct noise patches — mutually far in error space.
    fn noise_descriptors(n: usize, blend: usize) -> Vec<HipsDescriptor> {
        let img = textured_image(17);
        (0..n)
            .map(|i| {
                let x = 10 + (i % 8) * 10;
                let y = 10 + (i / 8) * 10;
                build_descriptor(&img, Pt::new(x as i32, y as i32), HipsConfig::new(blend))
            })
            .collect()
    }

    #[test]
    fn test_build_is_deterministic() {
        let descs = noise_descriptors(20, 5);
        let a = HipsTree::build(&descs, TreeConfig::new(64, 3));
        let b = HipsTree::build(&descs, TreeConfig::new(64, 3));
        assert_eq!(a.cells(), b.cells());
        assert_eq!(a.leaf_index(), b.leaf_index());
    }

    #[test]
    fn test_internal_cells_are_child_or() {
        let descs = noise_descriptors(16, 1);
        let tree = HipsTree::build(&descs, TreeConfig::new(16, 2));
        for i in 0..15 {
            let expect = tree.cells()[2 * i + 1].or(&tree.cells()[2 * i + 2]);
            assert_eq!(tree.cells()[i], expect, "cell {i}");
        }
    }

    #[test]
    fn test_exact_queries_recovered() {
        // Reference frame blended, queries thin — every query is a strict
        // subset of its own reference descriptor, so its error there is 0.
        let img = textured_image(23);
        let points: Vec<Pt> = (0..12)
            .map(|i| Pt::new(12 + (i % 4) * 20, 12 + (i / 4) * 20))
            .collect();
        let refs: Vec<HipsDescriptor> = points
            .iter()
            .map(|&p| build_descriptor(&img, p, HipsConfig::new(5)))
            .collect();
        let queries: Vec<HipsDescriptor> = points
            .iter()
            .map(|&p| build_descriptor(&img, p, HipsConfig::new(1)))
            .collect();

        // Shallow tree: one greedy junction per pre-root keeps this test
        // about retrieval, not about deep-descent approximation error.
        let tree = HipsTree::build(&refs, TreeConfig::new(16, 1));
        let matches = find_matches(&tree, &queries, 3, false);

        assert_eq!(matches.len(), queries.len(), "all queries should match");
        for m in &matches {
            assert_eq!(m.x, m.y, "query {} matched wrong reference {}", m.y, m.x);
        }
    }

    #[test]
    fn test_match_soundness_and_bound() {
        let refs = noise_descriptors(30, 5);
        let queries = noise_descriptors(40, 1);
        let tree = HipsTree::build(&refs, TreeConfig::new(32, 3));
        let max_error = 8;
        let matches = find_matches(&tree, &queries, max_error, true);

        assert!(matches.len() <= queries.len());
        for m in &matches {
            let err = match_error(&queries[m.y as usize], &refs[m.x as usize], true);
            assert!(
                err <= max_error,
                "match ({}, {}) has error {err} > {max_error}",
                m.x,
                m.y
            );
        }
    }

    #[test]
    fn test_zero_queries_never_match() {
        let refs = noise_descriptors(8, 5);
        let tree = HipsTree::build(&refs, TreeConfig::new(16, 2));
        // A zero query has error 0 against everything; it must still be
        // skipped (clipped descriptors are dead).
        assert_eq!(tree.find(&HipsDescriptor::zero(), 100, false), None);
    }

    #[test]
    fn test_overfull_reference_list_truncated() {
        let refs = noise_descriptors(10, 1);
        let tree = HipsTree::build(&refs, TreeConfig::new(4, 2));
        // Only 4 leaves: exactly 4 valid leaf indices survive.
        let valid = tree
            .leaf_index()
            .iter()
            .filter(|&&i| i != INVALID_INDEX)
            .count();
        assert_eq!(valid, 4);
        // Dropped descriptors must never be reported as matches.
        for &i in tree.leaf_index() {
            if i != INVALID_INDEX {
                assert!(i < 4, "only the first 4 descriptors are indexed");
            }
        }
    }

    #[test]
    fn test_empty_reference_list() {
        let tree = HipsTree::build(&[], TreeConfig::new(16, 2));
        let queries = noise_descriptors(5, 1);
        assert!(find_matches(&tree, &queries, 50, false).is_empty());
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_non_power_of_two_leaves() {
        TreeConfig::new(12, 2);
    }

    #[test]
    #[should_panic(expected = "levels")]
    fn test_too_many_levels() {
        TreeConfig::new(16, 5);
    }
}
