use super::coverage::CoverageState;
use super::progress::{Progress, ProgressReporter};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Marker whose presence asks a running job to stop.
pub const ABORT_REQUEST_FILE: &str = "RELION_JOB_ABORT_NOW";
/// Marker written once a job has stopped because of an abort request.
pub const ABORT_ACK_FILE: &str = "RELION_JOB_EXIT_ABORTED";

/// Cooperative cancellation, polled once per round after results are merged.
pub trait AbortSignal: Sync {
    fn should_abort(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverAbort;

impl AbortSignal for NeverAbort {
    fn should_abort(&self) -> bool {
        false
    }
}

/// An in-process abort switch that can be cloned and flipped from any thread.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl AbortSignal for AbortFlag {
    fn should_abort(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Job-manager handshake through marker files in a watched directory.
#[derive(Debug, Clone)]
pub struct MarkerFileAbort {
    dir: PathBuf,
}

impl MarkerFileAbort {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records that the job stopped in response to the abort request.
    pub fn acknowledge(&self) -> io::Result<()> {
        let path = self.dir.join(ABORT_ACK_FILE);
        OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "Abort acknowledged.");
        Ok(())
    }
}

impl AbortSignal for MarkerFileAbort {
    fn should_abort(&self) -> bool {
        let requested = self.dir.join(ABORT_REQUEST_FILE).exists();
        if requested {
            warn!(dir = %self.dir.display(), "Abort requested by job manager.");
        }
        requested
    }
}

/// Snapshot taken after each round's merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundProgress {
    pub round: usize,
    pub steps_left: u64,
    pub residues_left: usize,
    pub increment: u64,
}

impl RoundProgress {
    pub fn is_done(&self) -> bool {
        self.residues_left == 0
    }
}

/// Turns coverage into progress accounting.
///
/// Steps are `num_residues * target_repeats`; a residue contributes at most
/// `target_repeats` covered steps however often it is visited, so increments always sum
/// to the total at completion.
pub struct ProgressMonitor<'r, 'a> {
    reporter: &'r ProgressReporter<'a>,
    target_repeats: u32,
    total_steps: u64,
    steps_left: u64,
    rounds: usize,
}

impl<'r, 'a> ProgressMonitor<'r, 'a> {
    pub fn new(reporter: &'r ProgressReporter<'a>, num_residues: usize, target_repeats: u32) -> Self {
        let total_steps = num_residues as u64 * target_repeats as u64;
        reporter.report(Progress::TaskStart { total_steps });
        Self {
            reporter,
            target_repeats,
            total_steps,
            steps_left: total_steps,
            rounds: 0,
        }
    }

    pub fn update(&mut self, state: &CoverageState) -> RoundProgress {
        self.rounds += 1;
        let steps_left = self.total_steps - state.covered_steps(self.target_repeats);
        let increment = self.steps_left - steps_left;
        self.steps_left = steps_left;
        self.reporter.report(Progress::TaskIncrement { amount: increment });

        RoundProgress {
            round: self.rounds,
            steps_left,
            residues_left: state.residues_left(self.target_repeats),
            increment,
        }
    }

    pub fn finish(&self) {
        self.reporter.report(Progress::TaskFinish);
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn steps_left(&self) -> u64 {
        self.steps_left
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }
}
