use crate::core::grid::FieldGrid;
use crate::core::models::structure::Structure;
use crate::engine::aggregate::ResultAggregator;
use crate::engine::config::RefineConfig;
use crate::engine::coverage::{CoverageState, select};
use crate::engine::crop::CropBuilder;
use crate::engine::dispatch::{DevicePool, EngineSpec, InferenceBackend, InferenceInput};
use crate::engine::error::EngineError;
use crate::engine::monitor::{AbortSignal, ProgressMonitor};
use crate::engine::neighbors::NeighborIndex;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::results::FinalResults;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct RefineOutcome {
    pub status: RunStatus,
    pub rounds: usize,
    pub coverage: CoverageState,
    pub results: FinalResults,
    pub total_steps: u64,
    pub steps_left: u64,
}

/// Runs inference rounds until every residue has been merged `target_repeats` times, or
/// until `abort` asks the run to stop.
///
/// Each round selects `batch_size` centres per device, crops the nearest residues around
/// them, runs all devices in parallel and merges the results in device order. Residue
/// positions, confidences and predicted types in `structure` are updated as results are
/// merged, so later rounds crop around refined positions.
///
/// An abort is not an error: the outcome carries [`RunStatus::Aborted`] and the partial
/// aggregate.
///
/// # Errors
///
/// Fails if the device pool cannot be opened, a worker fails or returns a result of the
/// wrong size, or the batch shape is inconsistent. The device pool is released in every
/// case.
#[instrument(skip_all, name = "refine_workflow")]
pub fn run<B: InferenceBackend>(
    structure: &mut Structure,
    field: &FieldGrid,
    backend: &B,
    engine: &EngineSpec,
    config: &RefineConfig,
    abort: &dyn AbortSignal,
    reporter: &ProgressReporter,
) -> Result<RefineOutcome, EngineError> {
    let num_residues = structure.len();
    let target = config.target_repeats;

    if num_residues == 0 || target == 0 {
        info!(num_residues, target, "Nothing to refine.");
        let coverage = CoverageState::new(num_residues);
        let monitor = ProgressMonitor::new(reporter, num_residues, target);
        monitor.finish();
        return Ok(RefineOutcome {
            status: RunStatus::Completed,
            rounds: 0,
            results: coverage.finalize(structure),
            coverage,
            total_steps: monitor.total_steps(),
            steps_left: 0,
        });
    }

    // === Phase 0: Initialization ===
    reporter.report(Progress::PhaseStart {
        name: "Initialization",
    });
    let crop_length = config.crop_length.min(num_residues);
    if crop_length < config.crop_length {
        warn!(
            requested = config.crop_length,
            crop_length, "Crop length exceeds structure size; clamping."
        );
    }
    let neighbors = NeighborIndex::for_crop_length(structure, config.crop_length);
    let builder = CropBuilder::new(crop_length, config.batch_size, engine.devices.len());
    let aggregator = ResultAggregator::new(config.num_pred_residues, crop_length);
    let mut coverage = CoverageState::new(num_residues);
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    let pool = DevicePool::acquire(backend, engine)?;
    info!(
        num_residues,
        target,
        crop_length,
        update_len = aggregator.update_len(),
        devices = pool.len(),
        centres_per_round = builder.request_size(),
        "Scheduler initialized."
    );
    reporter.report(Progress::PhaseFinish);

    // === Phase 1: Inference rounds ===
    reporter.report(Progress::PhaseStart { name: "Inference" });
    let mut monitor = ProgressMonitor::new(reporter, num_residues, target);
    let status = loop {
        let centers = select(coverage.counts(), &neighbors, builder.request_size(), &mut rng);
        let batches = builder.build(&centers, structure)?;

        let raw_results = pool.run(
            InferenceInput {
                structure: &*structure,
                field,
            },
            &batches,
        )?;

        for (raw, batch) in raw_results.iter().zip(&batches) {
            aggregator.merge(&mut coverage, structure, raw, batch)?;
        }

        let progress = monitor.update(&coverage);
        debug!(
            round = progress.round,
            steps_left = progress.steps_left,
            residues_left = progress.residues_left,
            "Round merged."
        );
        reporter.report(Progress::StatusUpdate {
            text: format!("Round {}: {} residues left", progress.round, progress.residues_left),
        });

        if progress.is_done() {
            break RunStatus::Completed;
        }
        if abort.should_abort() {
            warn!(round = progress.round, residues_left = progress.residues_left, "Run aborted.");
            break RunStatus::Aborted;
        }
    };
    monitor.finish();
    drop(pool);
    reporter.report(Progress::PhaseFinish);

    let results = coverage.finalize(structure);
    info!(
        ?status,
        rounds = monitor.rounds(),
        visits = coverage.total_visits(),
        "Refinement finished."
    );

    Ok(RefineOutcome {
        status,
        rounds: monitor.rounds(),
        coverage,
        results,
        total_steps: monitor.total_steps(),
        steps_left: monitor.steps_left(),
    })
}
