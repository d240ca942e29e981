use super::dispatch::ResiduePrediction;
use super::neighbors::NeighborIndex;
use super::results::FinalResults;
use crate::core::models::amino_acid::AMINO_ACID_COUNT;
use crate::core::models::structure::Structure;
use nalgebra::Point3;
use rand::Rng;

/// Running means of every prediction merged into one residue.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidueAccumulator {
    pub position: Point3<f64>,
    pub confidence: f64,
    pub existence: f64,
    pub aa_logits: [f64; AMINO_ACID_COUNT],
}

impl Default for ResidueAccumulator {
    fn default() -> Self {
        Self {
            position: Point3::origin(),
            confidence: 0.0,
            existence: 0.0,
            aa_logits: [0.0; AMINO_ACID_COUNT],
        }
    }
}

impl ResidueAccumulator {
    fn fold(&mut self, prediction: &ResiduePrediction, previous_count: u32) {
        let n = previous_count as f64 + 1.0;
        self.position += (prediction.position - self.position) / n;
        self.confidence += (prediction.confidence - self.confidence) / n;
        self.existence += (prediction.existence - self.existence) / n;
        for (mean, &x) in self.aa_logits.iter_mut().zip(&prediction.aa_logits) {
            *mean += (x - *mean) / n;
        }
    }
}

/// Per-residue visit counts and aggregated predictions for one run.
///
/// Counts only ever grow, and only through [`CoverageState::record`], which the
/// aggregator calls once per merged prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageState {
    counts: Vec<u32>,
    accumulators: Vec<ResidueAccumulator>,
}

impl CoverageState {
    pub fn new(num_residues: usize) -> Self {
        Self {
            counts: vec![0; num_residues],
            accumulators: vec![ResidueAccumulator::default(); num_residues],
        }
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn count(&self, index: usize) -> u32 {
        self.counts[index]
    }

    pub fn accumulator(&self, index: usize) -> &ResidueAccumulator {
        &self.accumulators[index]
    }

    pub fn total_visits(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    /// Visits that count towards the target: `Σ min(count, target)`.
    pub fn covered_steps(&self, target: u32) -> u64 {
        self.counts.iter().map(|&c| c.min(target) as u64).sum()
    }

    pub fn residues_left(&self, target: u32) -> usize {
        self.counts.iter().filter(|&&c| c < target).count()
    }

    pub fn is_complete(&self, target: u32) -> bool {
        self.residues_left(target) == 0
    }

    /// Folds one prediction into residue `index` and increments its count by one.
    pub fn record(&mut self, index: usize, prediction: &ResiduePrediction) -> &ResidueAccumulator {
        let previous = self.counts[index];
        self.accumulators[index].fold(prediction, previous);
        self.counts[index] = previous.saturating_add(1);
        &self.accumulators[index]
    }

    /// Converts the aggregate into final per-residue results.
    pub fn finalize(&self, structure: &Structure) -> FinalResults {
        FinalResults::from_state(self, structure)
    }
}

/// Picks `request_size` crop centres, always from the least-visited residues.
///
/// Works on a scratch copy of `counts`: each pick draws uniformly among the residues tied
/// at the minimum, then bumps the scratch count of the pick and of its neighbours so later
/// picks in the same request land elsewhere in the structure. When fewer residues are
/// under-visited than picks requested, the remaining picks fall on satisfied residues.
pub fn select(
    counts: &[u32],
    neighbors: &NeighborIndex,
    request_size: usize,
    rng: &mut impl Rng,
) -> Vec<usize> {
    if counts.is_empty() {
        return Vec::new();
    }
    let mut scratch: Vec<u64> = counts.iter().map(|&c| c as u64).collect();
    let mut picks = Vec::with_capacity(request_size);
    let mut tied = Vec::with_capacity(counts.len());

    for _ in 0..request_size {
        let Some(&min) = scratch.iter().min() else {
            break;
        };
        tied.clear();
        tied.extend((0..scratch.len()).filter(|&i| scratch[i] == min));
        let pick = tied[rng.gen_range(0..tied.len())];

        picks.push(pick);
        scratch[pick] += 1;
        for &neighbor in neighbors.neighbors_of(pick) {
            if let Some(slot) = scratch.get_mut(neighbor) {
                *slot += 1;
            }
        }
    }
    picks
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    fn prediction(x: f64, confidence: f64) -> ResiduePrediction {
        ResiduePrediction {
            position: Point3::new(x, 0.0, 0.0),
            confidence,
            existence: confidence * 2.0,
            aa_logits: [confidence; AMINO_ACID_COUNT],
        }
    }

    fn no_neighbors(n: usize) -> NeighborIndex {
        NeighborIndex::from_lists(vec![Vec::new(); n])
    }

    #[test]
    fn record_keeps_running_mean_and_count() {
        let mut state = CoverageState::new(2);
        state.record(0, &prediction(2.0, 0.2));
        state.record(0, &prediction(4.0, 0.4));
        let acc = state.record(0, &prediction(6.0, 0.9));

        assert!((acc.position.x - 4.0).abs() < 1e-12);
        assert!((acc.confidence - 0.5).abs() < 1e-12);
        assert!((acc.existence - 1.0).abs() < 1e-12);
        assert!((acc.aa_logits[7] - 0.5).abs() < 1e-12);
        assert_eq!(state.counts(), &[3, 0]);
        assert_eq!(state.total_visits(), 3);
    }

    #[test]
    fn covered_steps_clip_counts_at_target() {
        let mut state = CoverageState::new(3);
        for _ in 0..5 {
            state.record(0, &prediction(0.0, 0.0));
        }
        state.record(1, &prediction(0.0, 0.0));

        assert_eq!(state.covered_steps(2), 3);
        assert_eq!(state.residues_left(2), 2);
        assert!(!state.is_complete(2));
        assert!(state.is_complete(0));
    }

    #[test]
    fn select_prefers_least_visited() {
        let counts = [3, 0, 2, 0, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let picks = select(&counts, &no_neighbors(5), 3, &mut rng);

        let first_two: HashSet<_> = picks[..2].iter().copied().collect();
        assert_eq!(first_two, HashSet::from([1, 3]));
        assert!(picks[2] == 1 || picks[2] == 3 || picks[2] == 4);
    }

    #[test]
    fn select_returns_distinct_centres_while_possible() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let picks = select(&[0; 10], &no_neighbors(10), 10, &mut rng);
        let unique: HashSet<_> = picks.iter().collect();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn select_pads_with_repeats_when_request_exceeds_size() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let picks = select(&[0, 0, 0], &no_neighbors(3), 7, &mut rng);
        assert_eq!(picks.len(), 7);
        let mut per_residue = [0; 3];
        for p in picks {
            per_residue[p] += 1;
        }
        assert!(per_residue.iter().all(|&c| c == 2 || c == 3));
    }

    #[test]
    fn neighbour_bump_spreads_centres() {
        // 0-1-2-3 chain: picking 1 or 2 first pushes its neighbours up.
        let neighbors = NeighborIndex::from_lists(vec![vec![1], vec![0, 2], vec![1, 3], vec![2]]);
        for seed in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let picks = select(&[0, 0, 0, 0], &neighbors, 2, &mut rng);
            let (a, b) = (picks[0], picks[1]);
            assert!(!neighbors.neighbors_of(a).contains(&b), "seed {seed}: {a} then {b}");
        }
    }

    #[test]
    fn select_is_deterministic_for_a_seed() {
        let counts = [0, 1, 0, 2, 0, 0, 1, 0];
        let neighbors = NeighborIndex::from_lists((0..8).map(|i| vec![(i + 1) % 8]).collect());
        let run = |seed| select(&counts, &neighbors, 5, &mut ChaCha8Rng::seed_from_u64(seed));
        assert_eq!(run(9), run(9));
    }

    #[test]
    fn select_on_empty_counts_is_empty() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(select(&[], &no_neighbors(0), 4, &mut rng).is_empty());
    }
}
