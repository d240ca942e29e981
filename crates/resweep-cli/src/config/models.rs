use resweep::engine::config::RefineConfig;
use resweep::engine::dispatch::{Device, Precision};
use std::path::PathBuf;

/// Fully resolved settings for one `refine` invocation.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub structure_path: PathBuf,
    pub map_path: PathBuf,
    pub model_dir: PathBuf,
    pub output_dir: PathBuf,
    pub refine: RefineConfig,
    pub devices: Vec<Device>,
    pub precision: Precision,
    pub voxel_size: f64,
}
