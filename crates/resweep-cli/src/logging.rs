use crate::error::{CliError, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Library and binary both log under this target.
const TOOL_TARGET: &str = "resweep";
/// File name used when `--log-file` names a directory, e.g. a job directory.
pub const DEFAULT_LOG_FILE_NAME: &str = "resweep.log";

fn level_filter(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::OFF;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Our own events at the requested level; dependencies never below WARN.
fn targets(level: LevelFilter) -> Targets {
    Targets::new()
        .with_target(TOOL_TARGET, level)
        .with_default(level.min(LevelFilter::WARN))
}

fn resolve_log_path(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        path.join(DEFAULT_LOG_FILE_NAME)
    } else {
        path
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    File::create(path).map_err(CliError::Io)
}

pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<PathBuf>) -> Result<()> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact();

    let subscriber = tracing_subscriber::registry()
        .with(targets(level_filter(verbosity, quiet)))
        .with(stderr_layer);

    if let Some(path) = log_file {
        let file = open_log_file(&resolve_log_path(path))?;

        // Span close events carry `time.busy` for the refine workflow and pool acquisition.
        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);

        subscriber.with(file_layer).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tracing::{debug, info, info_span};

    #[test]
    fn verbosity_maps_to_level_filter() {
        assert_eq!(level_filter(0, false), LevelFilter::WARN);
        assert_eq!(level_filter(1, false), LevelFilter::INFO);
        assert_eq!(level_filter(2, false), LevelFilter::DEBUG);
        assert_eq!(level_filter(7, false), LevelFilter::TRACE);
        assert_eq!(level_filter(3, true), LevelFilter::OFF);
    }

    #[test]
    fn dependencies_are_capped_at_warn() {
        let filter = targets(LevelFilter::DEBUG);
        assert!(filter.would_enable("resweep::engine::dispatch", &tracing::Level::DEBUG));
        assert!(!filter.would_enable("kiddo", &tracing::Level::INFO));
        assert!(filter.would_enable("kiddo", &tracing::Level::WARN));

        let quiet = targets(LevelFilter::OFF);
        assert!(!quiet.would_enable("kiddo", &tracing::Level::ERROR));
    }

    #[test]
    fn directory_log_path_gets_default_file_name() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_log_path(dir.path().to_path_buf()),
            dir.path().join(DEFAULT_LOG_FILE_NAME)
        );
        let file = dir.path().join("run.log");
        assert_eq!(resolve_log_path(file.clone()), file);
    }

    #[test]
    #[serial]
    fn file_layer_records_round_fields_and_span_close() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = resolve_log_path(temp_dir.path().to_path_buf());

        let file = open_log_file(&log_path).unwrap();
        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE);
        let subscriber = tracing_subscriber::registry()
            .with(targets(LevelFilter::DEBUG))
            .with(file_layer);

        tracing::subscriber::with_default(subscriber, || {
            let span = info_span!(target: "resweep", "refine_workflow");
            let _guard = span.enter();
            debug!(target: "resweep", round = 3, residues_left = 2, "Round merged.");
            info!(target: "kiddo", "dependency chatter");
        });

        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.contains("Round merged."));
        assert!(content.contains("round=3"));
        assert!(content.contains("refine_workflow"));
        assert!(content.contains("close"));
        assert!(content.contains("ThreadId"));
        assert!(!content.contains("dependency chatter"));
    }

    #[test]
    #[serial]
    fn unwritable_log_file_propagates_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing_parent = dir.path().join("missing").join("run.log");
        let result = setup_logging(0, false, Some(missing_parent));
        assert!(matches!(result, Err(CliError::Io(_))));
    }
}
