use super::coverage::CoverageState;
use super::crop::Batch;
use super::dispatch::RawResult;
use super::error::EngineError;
use super::results::softmax;
use crate::core::models::amino_acid::AminoAcid;
use crate::core::models::structure::Structure;

/// Folds worker output back into the coverage state and the residues.
///
/// Only the first `update_len` residues of each crop (the centre and its closest
/// neighbours) are merged; the rest of the crop is context for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultAggregator {
    update_len: usize,
}

impl ResultAggregator {
    pub fn new(num_pred_residues: usize, crop_length: usize) -> Self {
        Self {
            update_len: num_pred_residues.min(crop_length),
        }
    }

    pub fn update_len(&self) -> usize {
        self.update_len
    }

    /// Merges one crop slot: predictions `raw[offset + p]` go to residue `indices[p]`
    /// for `p < update_len`, in order. Returns the number of count increments.
    pub fn merge_slot(
        &self,
        state: &mut CoverageState,
        structure: &mut Structure,
        raw: &RawResult,
        indices: &[usize],
        offset: usize,
    ) -> Result<usize, EngineError> {
        let n = self.update_len.min(indices.len());
        let predictions = raw.predictions.get(offset..offset + n).ok_or_else(|| {
            EngineError::Internal(format!(
                "slot at offset {} needs {} predictions, device {} returned {}",
                offset,
                n,
                raw.device,
                raw.predictions.len()
            ))
        })?;

        for (&index, prediction) in indices[..n].iter().zip(predictions) {
            let residue = structure.residue_mut(index).ok_or_else(|| {
                EngineError::Internal(format!("residue index {} out of range", index))
            })?;
            let acc = state.record(index, prediction);

            residue.position = acc.position;
            residue.confidence = acc.confidence;
            let probabilities = softmax(&acc.aa_logits);
            residue.predicted_type = probabilities
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .and_then(|(i, _)| AminoAcid::from_index(i));
        }
        Ok(n)
    }

    /// Merges every crop slot of `batch` from its worker's result, slot by slot.
    pub fn merge(
        &self,
        state: &mut CoverageState,
        structure: &mut Structure,
        raw: &RawResult,
        batch: &Batch,
    ) -> Result<usize, EngineError> {
        let mut merged = 0;
        for (slot, crop) in batch.crops.iter().enumerate() {
            merged += self.merge_slot(state, structure, raw, &crop.indices, batch.offset(slot))?;
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::amino_acid::AMINO_ACID_COUNT;
    use crate::core::models::residue::Residue;
    use crate::engine::crop::Crop;
    use crate::engine::dispatch::{Device, ResiduePrediction};
    use nalgebra::Point3;

    fn structure(n: usize) -> Structure {
        Structure::from_residues(
            (0..n)
                .map(|i| Residue::new("A", i as isize, "GLY", Point3::new(i as f64, 0.0, 0.0)))
                .collect(),
        )
    }

    fn raw(values: &[f64]) -> RawResult {
        RawResult {
            device_index: 0,
            device: Device::Cpu,
            predictions: values
                .iter()
                .map(|&v| {
                    let mut aa_logits = [0.0; AMINO_ACID_COUNT];
                    aa_logits[AminoAcid::Serine.index()] = 1.0;
                    ResiduePrediction {
                        position: Point3::new(v, v, v),
                        confidence: v / 10.0,
                        existence: 0.0,
                        aa_logits,
                    }
                })
                .collect(),
        }
    }

    #[test]
    fn update_len_is_bounded_by_crop_length() {
        assert_eq!(ResultAggregator::new(50, 200).update_len(), 50);
        assert_eq!(ResultAggregator::new(50, 10).update_len(), 10);
    }

    #[test]
    fn merge_slot_updates_only_the_crop_core() {
        let mut structure = structure(4);
        let mut state = CoverageState::new(4);
        let aggregator = ResultAggregator::new(2, 3);

        let merged = aggregator
            .merge_slot(&mut state, &mut structure, &raw(&[9.0, 8.0, 7.0]), &[2, 3, 1], 0)
            .unwrap();

        assert_eq!(merged, 2);
        assert_eq!(state.counts(), &[0, 0, 1, 1]);
        let r2 = structure.residue(2).unwrap();
        assert_eq!(r2.position, Point3::new(9.0, 9.0, 9.0));
        assert!((r2.confidence - 0.9).abs() < 1e-12);
        assert_eq!(r2.predicted_type, Some(AminoAcid::Serine));
        assert_eq!(structure.residue(1).unwrap().position, Point3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn merge_uses_slot_offsets() {
        let mut structure = structure(4);
        let mut state = CoverageState::new(4);
        let aggregator = ResultAggregator::new(1, 2);
        let batch = Batch {
            device_index: 0,
            crop_length: 2,
            crops: vec![
                Crop {
                    center: 0,
                    indices: vec![0, 1],
                },
                Crop {
                    center: 3,
                    indices: vec![3, 2],
                },
            ],
        };

        let merged = aggregator
            .merge(&mut state, &mut structure, &raw(&[1.0, 2.0, 3.0, 4.0]), &batch)
            .unwrap();

        assert_eq!(merged, 2);
        assert_eq!(state.counts(), &[1, 0, 0, 1]);
        assert_eq!(structure.residue(3).unwrap().position, Point3::new(3.0, 3.0, 3.0));
    }

    #[test]
    fn each_merge_increments_by_exactly_one() {
        let mut structure = structure(2);
        let mut state = CoverageState::new(2);
        let aggregator = ResultAggregator::new(1, 1);
        for _ in 0..3 {
            aggregator
                .merge_slot(&mut state, &mut structure, &raw(&[5.0]), &[1], 0)
                .unwrap();
        }
        assert_eq!(state.counts(), &[0, 3]);
    }

    #[test]
    fn short_result_is_internal_error() {
        let mut structure = structure(3);
        let mut state = CoverageState::new(3);
        let err = ResultAggregator::new(2, 2)
            .merge_slot(&mut state, &mut structure, &raw(&[1.0]), &[0, 1], 0)
            .unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
        assert_eq!(state.total_visits(), 0);
    }
}
