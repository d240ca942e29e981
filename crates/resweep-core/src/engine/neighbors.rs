use crate::core::models::structure::Structure;
use kiddo::{KdTree, SquaredEuclidean};
use tracing::debug;

/// A k-d tree over residue positions that answers "the `count` nearest residues" with a
/// deterministic order: ascending distance, ties broken by residue index.
pub(crate) struct PositionTree {
    tree: KdTree<f64, 3>,
    len: usize,
}

impl PositionTree {
    pub(crate) fn new(positions: &[[f64; 3]]) -> Self {
        let mut tree: KdTree<f64, 3> = KdTree::with_capacity(positions.len().max(1));
        for (i, position) in positions.iter().enumerate() {
            tree.add(position, i as u64);
        }
        Self {
            tree,
            len: positions.len(),
        }
    }

    pub(crate) fn nearest(&self, query: &[f64; 3], count: usize) -> Vec<usize> {
        let count = count.min(self.len);
        if count == 0 {
            return Vec::new();
        }
        let mut found = self.tree.nearest_n::<SquaredEuclidean>(query, count);
        found.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.item.cmp(&b.item)));
        found.into_iter().map(|n| n.item as usize).collect()
    }
}

/// Static per-residue neighbour lists computed once from the input positions.
///
/// Selection bumps the visit counts of a picked centre's neighbours so that centres chosen
/// within one round spread out over the structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborIndex {
    lists: Vec<Vec<usize>>,
}

impl NeighborIndex {
    /// Builds lists of the `k` nearest other residues for every position.
    pub fn build(positions: &[[f64; 3]], k: usize) -> Self {
        let tree = PositionTree::new(positions);
        let k = k.min(positions.len().saturating_sub(1));
        let lists = positions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                tree.nearest(p, k + 1)
                    .into_iter()
                    .filter(|&j| j != i)
                    .take(k)
                    .collect()
            })
            .collect();
        debug!(residues = positions.len(), k, "Neighbour index built.");
        Self { lists }
    }

    /// Neighbour lists sized for a crop length: `max(1, crop_length / 4)` per residue.
    pub fn for_crop_length(structure: &Structure, crop_length: usize) -> Self {
        Self::build(&structure.positions(), (crop_length / 4).max(1))
    }

    pub fn from_lists(lists: Vec<Vec<usize>>) -> Self {
        Self { lists }
    }

    pub fn neighbors_of(&self, index: usize) -> &[usize] {
        self.lists.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}
