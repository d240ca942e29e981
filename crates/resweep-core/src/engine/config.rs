use thiserror::Error;

pub const DEFAULT_NUM_PRED_RESIDUES: usize = 50;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Scheduling parameters for one refinement run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineConfig {
    /// Number of independent passes every residue must receive.
    pub target_repeats: u32,
    /// Crops per device per round.
    pub batch_size: usize,
    /// Residues per crop, clamped to the structure size at run start.
    pub crop_length: usize,
    /// Leading residues of each crop whose predictions are merged.
    pub num_pred_residues: usize,
    pub seed: u64,
}

#[derive(Default)]
pub struct RefineConfigBuilder {
    target_repeats: Option<u32>,
    batch_size: Option<usize>,
    crop_length: Option<usize>,
    num_pred_residues: Option<usize>,
    seed: Option<u64>,
}

impl RefineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target_repeats(mut self, repeats: u32) -> Self {
        self.target_repeats = Some(repeats);
        self
    }
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }
    pub fn crop_length(mut self, length: usize) -> Self {
        self.crop_length = Some(length);
        self
    }
    pub fn num_pred_residues(mut self, n: usize) -> Self {
        self.num_pred_residues = Some(n);
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<RefineConfig, ConfigError> {
        let config = RefineConfig {
            target_repeats: self
                .target_repeats
                .ok_or(ConfigError::MissingParameter("target_repeats"))?,
            batch_size: self
                .batch_size
                .ok_or(ConfigError::MissingParameter("batch_size"))?,
            crop_length: self
                .crop_length
                .ok_or(ConfigError::MissingParameter("crop_length"))?,
            num_pred_residues: self.num_pred_residues.unwrap_or(DEFAULT_NUM_PRED_RESIDUES),
            seed: self.seed.unwrap_or(DEFAULT_SEED),
        };

        for (name, value) in [
            ("batch_size", config.batch_size),
            ("crop_length", config.crop_length),
            ("num_pred_residues", config.num_pred_residues),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    name,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_applies_defaults_for_optional_parameters() {
        let config = RefineConfigBuilder::new()
            .target_repeats(3)
            .batch_size(2)
            .crop_length(200)
            .build()
            .unwrap();
        assert_eq!(config.num_pred_residues, DEFAULT_NUM_PRED_RESIDUES);
        assert_eq!(config.seed, DEFAULT_SEED);
    }

    #[test]
    fn build_reports_first_missing_parameter() {
        let err = RefineConfigBuilder::new().batch_size(1).build().unwrap_err();
        assert_eq!(err, ConfigError::MissingParameter("target_repeats"));

        let err = RefineConfigBuilder::new()
            .target_repeats(1)
            .batch_size(1)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingParameter("crop_length"));
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let err = RefineConfigBuilder::new()
            .target_repeats(1)
            .batch_size(0)
            .crop_length(10)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "batch_size", .. }));
    }

    #[test]
    fn zero_target_repeats_is_allowed() {
        let config = RefineConfigBuilder::new()
            .target_repeats(0)
            .batch_size(1)
            .crop_length(1)
            .seed(7)
            .build()
            .unwrap();
        assert_eq!(config.target_repeats, 0);
        assert_eq!(config.seed, 7);
    }
}
