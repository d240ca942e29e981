use resweep::engine::config::{DEFAULT_NUM_PRED_RESIDUES, DEFAULT_SEED};

pub struct DefaultsConfig {
    pub repeat_per_residue: u32,
    pub batch_size: usize,
    pub crop_length: usize,
    pub num_pred_residues: usize,
    pub seed: u64,
    pub device: String,
    pub fp16: bool,
    pub voxel_size: f64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            repeat_per_residue: 3,
            batch_size: 1,
            crop_length: 200,
            num_pred_residues: DEFAULT_NUM_PRED_RESIDUES,
            seed: DEFAULT_SEED,
            device: "cpu".to_string(),
            fp16: false,
            voxel_size: 1.5,
        }
    }
}
