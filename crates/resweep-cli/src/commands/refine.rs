use crate::cli::RefineArgs;
use crate::config::{AppConfig, build_config};
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use resweep::{
    core::{
        grid::load_field,
        io::{cif::CifFile, load_structure, pdb::PdbFile, prot::ProtFile, traits::StructureFile},
        models::structure::Structure,
    },
    engine::{
        backend::CentroidBackend,
        dispatch::{EngineSpec, ModelSpec},
        error::EngineError,
        monitor::MarkerFileAbort,
        progress::ProgressReporter,
        results::FinalResults,
    },
    workflows::refine::{self, RunStatus},
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const OUTPUT_STEM: &str = "output";

pub fn run(args: RefineArgs) -> Result<RunStatus> {
    info!("Merging configuration from file and CLI arguments...");
    let app = build_config(&args)?;
    execute(&app)
}

fn execute(app: &AppConfig) -> Result<RunStatus> {
    info!("Loading input structure from {:?}", &app.structure_path);
    let mut structure = load_structure(&app.structure_path).map_err(EngineError::from)?;

    info!("Loading density map from {:?}", &app.map_path);
    let field = load_field(&app.map_path, Some(app.voxel_size)).map_err(EngineError::from)?;

    let engine = EngineSpec {
        model: ModelSpec::discover(&app.model_dir)?,
        devices: app.devices.clone(),
        precision: app.precision,
    };

    let abort = MarkerFileAbort::new(job_dir(&app.output_dir));
    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Refining {} residues ({} passes each) on {} device(s)...",
        structure.len(),
        app.refine.target_repeats,
        engine.devices.len()
    );
    let outcome = refine::run(
        &mut structure,
        &field,
        &CentroidBackend,
        &engine,
        &app.refine,
        &abort,
        &reporter,
    )?;
    info!(
        status = ?outcome.status,
        rounds = outcome.rounds,
        steps_left = outcome.steps_left,
        "Workflow finished."
    );

    let written = write_outputs(&app.output_dir, &structure, &outcome.results)?;
    for path in &written {
        println!("  wrote {}", path.display());
    }

    match outcome.status {
        RunStatus::Completed => {
            println!(
                "✓ Every residue refined {} times in {} rounds.",
                app.refine.target_repeats, outcome.rounds
            );
        }
        RunStatus::Aborted => {
            warn!(
                steps_left = outcome.steps_left,
                total_steps = outcome.total_steps,
                "Stopped on abort request; outputs hold the partial aggregate."
            );
            println!(
                "Aborted after {} rounds with {} of {} steps left.",
                outcome.rounds, outcome.steps_left, outcome.total_steps
            );
            abort.acknowledge()?;
        }
    }
    Ok(outcome.status)
}

/// The directory a job manager watches: the parent of the output directory.
fn job_dir(output_dir: &Path) -> PathBuf {
    match output_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn output_error(path: &Path, source: impl Into<anyhow::Error>) -> CliError {
    CliError::Output {
        path: path.to_path_buf(),
        source: source.into(),
    }
}

/// Output files written under temporary names and renamed into place together.
/// Anything still staged when this is dropped is removed.
struct StagedOutputs {
    staged: Vec<(PathBuf, PathBuf)>,
}

impl StagedOutputs {
    fn new() -> Self {
        Self { staged: Vec::new() }
    }

    /// Registers `final_path` and returns the temporary path to write instead.
    fn stage(&mut self, final_path: PathBuf) -> PathBuf {
        let name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = final_path.with_file_name(format!(".{}.partial", name));
        self.staged.push((temp_path.clone(), final_path));
        temp_path
    }

    fn commit(mut self) -> std::io::Result<Vec<PathBuf>> {
        let mut committed = Vec::with_capacity(self.staged.len());
        let mut pending = std::mem::take(&mut self.staged).into_iter();
        while let Some((temp_path, final_path)) = pending.next() {
            if let Err(e) = fs::rename(&temp_path, &final_path) {
                self.staged.push((temp_path, final_path));
                self.staged.extend(pending);
                for path in &committed {
                    let _ = fs::remove_file(path);
                }
                return Err(e);
            }
            committed.push(final_path);
        }
        Ok(committed)
    }
}

impl Drop for StagedOutputs {
    fn drop(&mut self) {
        for (temp_path, _) in self.staged.drain(..) {
            if temp_path.exists() {
                if let Err(e) = fs::remove_file(&temp_path) {
                    warn!("Failed to remove partial output {:?}: {}", temp_path, e);
                }
            }
        }
    }
}

fn write_outputs(output_dir: &Path, structure: &Structure, results: &FinalResults) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;
    let path_for = |extension: &str| output_dir.join(format!("{}.{}", OUTPUT_STEM, extension));
    let mut outputs = StagedOutputs::new();

    let pdb_path = outputs.stage(path_for("pdb"));
    PdbFile::write_to_path(structure, &pdb_path).map_err(|e| output_error(&pdb_path, e))?;

    let cif_path = outputs.stage(path_for("cif"));
    CifFile::write_to_path(structure, &cif_path).map_err(|e| output_error(&cif_path, e))?;

    let prot_path = outputs.stage(path_for("prot"));
    ProtFile::write_to_path(structure, &prot_path).map_err(|e| output_error(&prot_path, e))?;

    let csv_path = outputs.stage(path_for("csv"));
    results.write_csv_path(&csv_path).map_err(|e| output_error(&csv_path, e))?;

    Ok(outputs.commit()?)
}
