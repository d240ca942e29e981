use super::error::EngineError;
use super::neighbors::PositionTree;
use crate::core::models::structure::Structure;
use tracing::trace;

/// A spatially contiguous subset of residues around one centre.
///
/// `indices[0]` is always the centre; the rest follow in order of increasing distance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crop {
    pub center: usize,
    pub indices: Vec<usize>,
}

/// The crops sent to one device in one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub device_index: usize,
    pub crop_length: usize,
    pub crops: Vec<Crop>,
}

impl Batch {
    /// Number of flat positions, which is also the number of predictions a worker returns.
    pub fn len(&self) -> usize {
        self.crops.len() * self.crop_length
    }

    pub fn is_empty(&self) -> bool {
        self.crops.is_empty()
    }

    /// Start of crop slot `slot` in the flat prediction list.
    pub fn offset(&self, slot: usize) -> usize {
        slot * self.crop_length
    }

    /// All residue indices of the batch, crop after crop.
    pub fn entity_indices(&self) -> Vec<usize> {
        self.crops
            .iter()
            .flat_map(|crop| crop.indices.iter().copied())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBuilder {
    crop_length: usize,
    batch_size: usize,
    num_devices: usize,
}

impl CropBuilder {
    pub fn new(crop_length: usize, batch_size: usize, num_devices: usize) -> Self {
        Self {
            crop_length,
            batch_size,
            num_devices,
        }
    }

    pub fn crop_length(&self) -> usize {
        self.crop_length
    }

    /// Centres needed per round: one per crop on every device.
    pub fn request_size(&self) -> usize {
        self.batch_size * self.num_devices
    }

    /// Cuts one crop per centre around current positions and groups them by device:
    /// device `g` gets `centers[g * batch_size..(g + 1) * batch_size]`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidBatchShape`] if `centers` does not hold exactly
    /// `batch_size * num_devices` entries.
    pub fn build(&self, centers: &[usize], structure: &Structure) -> Result<Vec<Batch>, EngineError> {
        let expected = self.request_size();
        if centers.len() != expected {
            return Err(EngineError::InvalidBatchShape {
                expected,
                actual: centers.len(),
            });
        }
        if let Some(&bad) = centers.iter().find(|&&c| c >= structure.len()) {
            return Err(EngineError::Internal(format!(
                "crop centre {} is outside a structure of {} residues",
                bad,
                structure.len()
            )));
        }

        let crop_length = self.crop_length.min(structure.len());
        let positions = structure.positions();
        let tree = PositionTree::new(&positions);

        let batches = centers
            .chunks(self.batch_size)
            .enumerate()
            .map(|(device_index, group)| Batch {
                device_index,
                crop_length,
                crops: group
                    .iter()
                    .map(|&center| Self::crop_around(&tree, &positions, center, crop_length))
                    .collect(),
            })
            .collect::<Vec<_>>();
        trace!(batches = batches.len(), crop_length, "Built crops for round.");
        Ok(batches)
    }

    fn crop_around(tree: &PositionTree, positions: &[[f64; 3]], center: usize, crop_length: usize) -> Crop {
        let mut indices = tree.nearest(&positions[center], crop_length);
        match indices.iter().position(|&i| i == center) {
            Some(at) => {
                indices.remove(at);
            }
            None => {
                indices.pop();
            }
        }
        indices.insert(0, center);
        Crop { center, indices }
    }
}
