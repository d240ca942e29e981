use super::config::ConfigError;
use super::crop::Batch;
use super::error::EngineError;
use crate::core::grid::FieldGrid;
use crate::core::models::amino_acid::AMINO_ACID_COUNT;
use crate::core::models::structure::Structure;
use nalgebra::Point3;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub const MODEL_DEFINITION_FILE: &str = "model.toml";
const CHECKPOINT_PREFIX: &str = "chkpt_";
const CHECKPOINT_EXTENSION: &str = ".toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Gpu(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(id) => write!(f, "cuda:{}", id),
        }
    }
}

impl Device {
    /// Parses a device list: `"cpu"`, or comma-separated GPU ids such as `"0,1"` or
    /// `"cuda:0,cuda:1"`.
    pub fn parse_list(text: &str) -> Result<Vec<Device>, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            name: "device",
            reason,
        };
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("cpu") {
            return Ok(vec![Device::Cpu]);
        }

        let mut devices = Vec::new();
        for part in trimmed.split(',').map(str::trim) {
            let id_text = part
                .strip_prefix("cuda:")
                .or_else(|| part.strip_prefix("gpu:"))
                .unwrap_or(part);
            let id: u32 = id_text
                .parse()
                .map_err(|_| invalid(format!("'{}' is not 'cpu' or a GPU id", part)))?;
            let device = Device::Gpu(id);
            if devices.contains(&device) {
                return Err(invalid(format!("device {} listed twice", device)));
            }
            devices.push(device);
        }
        Ok(devices)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Full,
    Half,
}

/// Model definition plus the weights checkpoint to load into every worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub definition_path: PathBuf,
    pub weights_path: PathBuf,
    pub step: u64,
}

impl ModelSpec {
    /// Locates `model.toml` and the latest `chkpt_<step>.toml` in a model directory.
    pub fn discover(model_dir: &Path) -> Result<Self, EngineError> {
        let definition_path = model_dir.join(MODEL_DEFINITION_FILE);
        if !definition_path.is_file() {
            return Err(EngineError::Initialization(format!(
                "model definition '{}' not found",
                definition_path.display()
            )));
        }

        let entries = fs::read_dir(model_dir).map_err(|e| {
            EngineError::Initialization(format!(
                "cannot read model directory '{}': {}",
                model_dir.display(),
                e
            ))
        })?;
        let latest = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let step = name
                    .strip_prefix(CHECKPOINT_PREFIX)?
                    .strip_suffix(CHECKPOINT_EXTENSION)?
                    .parse::<u64>()
                    .ok()?;
                Some((step, entry.path()))
            })
            .max_by_key(|(step, _)| *step);

        let (step, weights_path) = latest.ok_or_else(|| {
            EngineError::Initialization(format!(
                "no checkpoint '{}<step>{}' in '{}'",
                CHECKPOINT_PREFIX,
                CHECKPOINT_EXTENSION,
                model_dir.display()
            ))
        })?;
        info!(step, weights = %weights_path.display(), "Using latest model checkpoint.");
        Ok(Self {
            definition_path,
            weights_path,
            step,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSpec {
    pub model: ModelSpec,
    pub devices: Vec<Device>,
    pub precision: Precision,
}

/// One predicted residue at one flat position of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ResiduePrediction {
    pub position: Point3<f64>,
    pub confidence: f64,
    pub existence: f64,
    pub aa_logits: [f64; AMINO_ACID_COUNT],
}

/// The output of one worker for one batch, positionally aligned with the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    pub device_index: usize,
    pub device: Device,
    pub predictions: Vec<ResiduePrediction>,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Device {0} is unavailable")]
    DeviceUnavailable(Device),
    #[error("Inference failed: {0}")]
    Execution(String),
    #[error("Expected {expected} predictions for the batch, got {actual}")]
    Cardinality { expected: usize, actual: usize },
}

/// Read-only view of the run state handed to workers during dispatch.
#[derive(Debug, Clone, Copy)]
pub struct InferenceInput<'a> {
    pub structure: &'a Structure,
    pub field: &'a FieldGrid,
}

/// A model instance bound to one device.
pub trait InferenceWorker: Send + Sync {
    fn device(&self) -> Device;

    /// Predicts every flat position of `batch`; the result must have `batch.len()` entries.
    fn infer(&self, input: InferenceInput<'_>, batch: &Batch) -> Result<Vec<ResiduePrediction>, InferenceError>;

    /// Frees device resources. Called exactly once, when the owning pool is dropped.
    fn release(&mut self);
}

pub trait InferenceBackend: Sync {
    type Worker: InferenceWorker;

    fn open(&self, device: Device, model: &ModelSpec, precision: Precision) -> Result<Self::Worker, InferenceError>;
}

/// One open worker per device for the lifetime of a run.
///
/// Dropping the pool releases every worker, whichever way the run ends.
pub struct DevicePool<W: InferenceWorker> {
    workers: Vec<W>,
}

impl<W: InferenceWorker> DevicePool<W> {
    /// Opens a worker on every device of `spec`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::WorkerFailure`] naming the first device that fails to open;
    /// workers already opened are released before returning.
    #[instrument(skip_all, name = "acquire_device_pool")]
    pub fn acquire<B>(backend: &B, spec: &EngineSpec) -> Result<Self, EngineError>
    where
        B: InferenceBackend<Worker = W>,
    {
        if spec.devices.is_empty() {
            return Err(EngineError::Initialization("no inference devices configured".into()));
        }
        let mut pool = Self {
            workers: Vec::with_capacity(spec.devices.len()),
        };
        for &device in &spec.devices {
            let worker = backend
                .open(device, &spec.model, spec.precision)
                .map_err(|source| EngineError::WorkerFailure { device, source })?;
            debug!(%device, "Inference worker opened.");
            pool.workers.push(worker);
        }
        info!(devices = pool.workers.len(), precision = ?spec.precision, "Device pool ready.");
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.workers.iter().map(|w| w.device()).collect()
    }

    /// Runs batch `g` on worker `g`, all workers concurrently, and waits for every one of
    /// them before returning the results in device order.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidBatchShape`] if there is not exactly one batch per worker;
    /// [`EngineError::WorkerFailure`] for the lowest-indexed device that failed or
    /// returned the wrong number of predictions.
    pub fn run(&self, input: InferenceInput<'_>, batches: &[Batch]) -> Result<Vec<RawResult>, EngineError> {
        if batches.len() != self.workers.len() {
            return Err(EngineError::InvalidBatchShape {
                expected: self.workers.len(),
                actual: batches.len(),
            });
        }

        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<Result<RawResult, EngineError>> = self
            .workers
            .iter()
            .zip(batches.iter())
            .enumerate()
            .map(|(index, (worker, batch))| Self::run_one(index, worker, input, batch))
            .collect();

        #[cfg(feature = "parallel")]
        let outcomes: Vec<Result<RawResult, EngineError>> = self
            .workers
            .par_iter()
            .zip(batches.par_iter())
            .enumerate()
            .map(|(index, (worker, batch))| Self::run_one(index, worker, input, batch))
            .collect();

        outcomes.into_iter().collect()
    }

    fn run_one(index: usize, worker: &W, input: InferenceInput<'_>, batch: &Batch) -> Result<RawResult, EngineError> {
        let device = worker.device();
        let predictions = worker
            .infer(input, batch)
            .map_err(|source| EngineError::WorkerFailure { device, source })?;
        if predictions.len() != batch.len() {
            return Err(EngineError::WorkerFailure {
                device,
                source: InferenceError::Cardinality {
                    expected: batch.len(),
                    actual: predictions.len(),
                },
            });
        }
        Ok(RawResult {
            device_index: index,
            device,
            predictions,
        })
    }
}

impl<W: InferenceWorker> Drop for DevicePool<W> {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            worker.release();
            debug!(device = %worker.device(), "Inference worker released.");
        }
    }
}
