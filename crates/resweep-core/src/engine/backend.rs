//! Reference inference backend.
//!
//! [`CentroidBackend`] moves each residue towards the density-weighted centroid of the
//! positive density around it and derives confidence and existence scores from the local
//! density. It needs no accelerator and makes the scheduler runnable end to end; a learned
//! model plugs in through the same [`InferenceBackend`] trait.

use super::crop::Batch;
use super::dispatch::{
    Device, InferenceBackend, InferenceError, InferenceInput, InferenceWorker, ModelSpec, Precision,
    ResiduePrediction,
};
use super::results::logistic;
use crate::core::grid::FieldGrid;
use crate::core::models::amino_acid::AMINO_ACID_COUNT;
use nalgebra::{Point3, Vector3};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CentroidParams {
    pub search_radius: f64,
    pub max_shift: f64,
    #[serde(default)]
    pub type_prior: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CentroidWeights {
    pub density_scale: f64,
    #[serde(default)]
    pub bias: f64,
}

#[derive(Deserialize)]
struct ModelDefinitionFile {
    centroid: CentroidParams,
}

#[derive(Deserialize)]
struct CheckpointFile {
    weights: CentroidWeights,
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, InferenceError> {
    let text = fs::read_to_string(path)
        .map_err(|e| InferenceError::ModelLoad(format!("{}: {}", path.display(), e)))?;
    toml::from_str(&text).map_err(|e| InferenceError::ModelLoad(format!("{}: {}", path.display(), e)))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CentroidBackend;

impl InferenceBackend for CentroidBackend {
    type Worker = CentroidWorker;

    fn open(&self, device: Device, model: &ModelSpec, precision: Precision) -> Result<CentroidWorker, InferenceError> {
        let definition: ModelDefinitionFile = read_toml(&model.definition_path)?;
        let checkpoint: CheckpointFile = read_toml(&model.weights_path)?;
        let params = definition.centroid;
        if !(params.search_radius > 0.0 && params.max_shift >= 0.0) {
            return Err(InferenceError::ModelLoad(format!(
                "search-radius must be positive and max-shift non-negative (got {} and {})",
                params.search_radius, params.max_shift
            )));
        }
        debug!(%device, step = model.step, ?params, "Centroid model loaded.");
        Ok(CentroidWorker {
            device,
            params,
            weights: checkpoint.weights,
            precision,
        })
    }
}

pub struct CentroidWorker {
    device: Device,
    params: CentroidParams,
    weights: CentroidWeights,
    precision: Precision,
}

impl CentroidWorker {
    pub fn new(device: Device, params: CentroidParams, weights: CentroidWeights, precision: Precision) -> Self {
        Self {
            device,
            params,
            weights,
            precision,
        }
    }

    /// Weighted centroid of positive density within the search radius, and the mean
    /// density over all grid points in that sphere.
    fn local_density(&self, field: &FieldGrid, center: &Point3<f64>) -> (Option<Point3<f64>>, f64) {
        let voxel = field.voxel_size();
        let shape = field.shape();
        let origin = field.origin();
        let radius = self.params.search_radius;
        let g = (center - origin) / voxel;
        let reach = radius / voxel;

        let bounds = |c: f64, n: usize| -> Option<(usize, usize)> {
            let lo = (c - reach).ceil().max(0.0);
            let hi = (c + reach).floor().min(n as f64 - 1.0);
            (lo <= hi).then_some((lo as usize, hi as usize))
        };
        let (Some(bx), Some(by), Some(bz)) = (bounds(g.x, shape[0]), bounds(g.y, shape[1]), bounds(g.z, shape[2]))
        else {
            return (None, 0.0);
        };

        let mut weighted = Vector3::zeros();
        let mut weight_sum = 0.0;
        let mut density_sum = 0.0;
        let mut points = 0usize;
        for z in bz.0..=bz.1 {
            for y in by.0..=by.1 {
                for x in bx.0..=bx.1 {
                    let p = origin + Vector3::new(x as f64, y as f64, z as f64) * voxel;
                    if (p - center).norm() > radius {
                        continue;
                    }
                    let value = field.get(x, y, z) as f64;
                    density_sum += value;
                    points += 1;
                    if value > 0.0 {
                        weighted += p.coords * value;
                        weight_sum += value;
                    }
                }
            }
        }

        let centroid = (weight_sum > 0.0).then(|| Point3::from(weighted / weight_sum));
        let mean = if points > 0 { density_sum / points as f64 } else { 0.0 };
        (centroid, mean)
    }

    fn round(&self, value: f64) -> f64 {
        match self.precision {
            Precision::Full => value,
            Precision::Half => value as f32 as f64,
        }
    }

    fn predict(&self, field: &FieldGrid, position: &Point3<f64>, known_type: Option<usize>) -> ResiduePrediction {
        let (centroid, mean_density) = self.local_density(field, position);
        let shift = centroid.map(|c| c - position).unwrap_or_else(Vector3::zeros);
        let shift = if shift.norm() > self.params.max_shift {
            shift.normalize() * self.params.max_shift
        } else {
            shift
        };
        let moved = position + shift;

        let mut aa_logits = [0.0; AMINO_ACID_COUNT];
        if let Some(i) = known_type {
            aa_logits[i] = self.round(self.params.type_prior);
        }
        ResiduePrediction {
            position: Point3::new(self.round(moved.x), self.round(moved.y), self.round(moved.z)),
            confidence: self.round(logistic(self.weights.density_scale * mean_density + self.weights.bias)),
            existence: self.round(self.weights.density_scale * field.sample(&moved) + self.weights.bias),
            aa_logits,
        }
    }
}

impl InferenceWorker for CentroidWorker {
    fn device(&self) -> Device {
        self.device
    }

    fn infer(&self, input: InferenceInput<'_>, batch: &Batch) -> Result<Vec<ResiduePrediction>, InferenceError> {
        batch
            .entity_indices()
            .into_iter()
            .map(|index| {
                let residue = input.structure.residue(index).ok_or_else(|| {
                    InferenceError::Execution(format!("residue index {} not in structure", index))
                })?;
                Ok(self.predict(
                    input.field,
                    &residue.position,
                    residue.residue_type.map(|aa| aa.index()),
                ))
            })
            .collect()
    }

    fn release(&mut self) {
        debug!(device = %self.device, "Centroid worker released.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::amino_acid::AminoAcid;
    use crate::core::models::residue::Residue;
    use crate::core::models::structure::Structure;
    use crate::engine::crop::Crop;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn peak_field() -> FieldGrid {
        let mut field = FieldGrid::zeros([11, 11, 11], 1.0, Point3::origin()).unwrap();
        field.set(5, 5, 5, 4.0);
        field
    }

    fn worker(max_shift: f64, precision: Precision) -> CentroidWorker {
        CentroidWorker::new(
            Device::Cpu,
            CentroidParams {
                search_radius: 3.0,
                max_shift,
                type_prior: 2.0,
            },
            CentroidWeights {
                density_scale: 1.0,
                bias: 0.0,
            },
            precision,
        )
    }

    #[test]
    fn residue_moves_to_nearby_peak() {
        let p = worker(5.0, Precision::Full).predict(&peak_field(), &Point3::new(6.0, 5.0, 5.0), None);
        assert!((p.position - Point3::new(5.0, 5.0, 5.0)).norm() < 1e-9);
        assert!((p.existence - 4.0).abs() < 1e-9);
        assert!(p.confidence > 0.5);
    }

    #[test]
    fn shift_is_capped() {
        let p = worker(0.5, Precision::Full).predict(&peak_field(), &Point3::new(7.0, 5.0, 5.0), None);
        assert!((p.position - Point3::new(6.5, 5.0, 5.0)).norm() < 1e-9);
    }

    #[test]
    fn empty_neighbourhood_keeps_position() {
        let p = worker(1.0, Precision::Full).predict(&peak_field(), &Point3::new(50.0, 0.0, 0.0), None);
        assert_eq!(p.position, Point3::new(50.0, 0.0, 0.0));
        assert_eq!(p.confidence, 0.5);
    }

    #[test]
    fn known_type_gets_prior_logit() {
        let p = worker(1.0, Precision::Full).predict(
            &peak_field(),
            &Point3::new(5.0, 5.0, 5.0),
            Some(AminoAcid::Tryptophan.index()),
        );
        assert_eq!(p.aa_logits[AminoAcid::Tryptophan.index()], 2.0);
        assert_eq!(p.aa_logits.iter().filter(|&&l| l != 0.0).count(), 1);
    }

    #[test]
    fn half_precision_rounds_through_f32() {
        let p = worker(5.0, Precision::Half).predict(&peak_field(), &Point3::new(5.3, 5.1, 4.9), None);
        assert_eq!(p.confidence, p.confidence as f32 as f64);
        assert_eq!(p.position.x, p.position.x as f32 as f64);
    }

    #[test]
    fn infer_returns_one_prediction_per_flat_position() {
        let structure = Structure::from_residues(vec![
            Residue::new("A", 1, "ALA", Point3::new(5.0, 5.0, 5.0)),
            Residue::new("A", 2, "GLY", Point3::new(6.0, 5.0, 5.0)),
        ]);
        let field = peak_field();
        let batch = Batch {
            device_index: 0,
            crop_length: 2,
            crops: vec![
                Crop { center: 0, indices: vec![0, 1] },
                Crop { center: 1, indices: vec![1, 0] },
            ],
        };
        let out = worker(1.0, Precision::Full)
            .infer(
                InferenceInput {
                    structure: &structure,
                    field: &field,
                },
                &batch,
            )
            .unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], out[3]);
    }

    #[test]
    fn open_reads_definition_and_checkpoint() {
        let dir = tempdir().unwrap();
        let definition_path = dir.path().join("model.toml");
        let weights_path = dir.path().join("chkpt_3.toml");
        fs::write(&definition_path, "[centroid]\nsearch-radius = 4.0\nmax-shift = 1.0\ntype-prior = 0.5\n").unwrap();
        fs::write(&weights_path, "[weights]\ndensity-scale = 2.0\nbias = -1.0\n").unwrap();
        let model = ModelSpec {
            definition_path,
            weights_path,
            step: 3,
        };

        let worker = CentroidBackend.open(Device::Gpu(0), &model, Precision::Full).unwrap();
        assert_eq!(worker.device(), Device::Gpu(0));
        assert_eq!(worker.params.search_radius, 4.0);
        assert_eq!(worker.weights.bias, -1.0);
    }

    #[test]
    fn open_with_missing_weights_is_model_load_error() {
        let model = ModelSpec {
            definition_path: PathBuf::from("/nonexistent/model.toml"),
            weights_path: PathBuf::from("/nonexistent/chkpt_1.toml"),
            step: 1,
        };
        assert!(matches!(
            CentroidBackend.open(Device::Cpu, &model, Precision::Full),
            Err(InferenceError::ModelLoad(_))
        ));
    }
}
