use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "resweep developers",
    version,
    about = "resweep - iterative, coverage-driven refinement of per-residue predictions against a density map.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a file in addition to the console output.
    /// A directory gets a `resweep.log` inside it.
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Refine every residue of a structure against a density map until each has been
    /// predicted the requested number of times.
    Refine(RefineArgs),
}

/// Arguments for the `refine` subcommand.
#[derive(Args, Debug, Clone)]
pub struct RefineArgs {
    // --- Inputs and outputs ---
    /// Input structure (.pdb, .cif, .mmcif or .prot).
    #[arg(long = "struct", required = true, value_name = "PATH")]
    pub structure: PathBuf,

    /// Input density map (.mrc, .map or .ccp4).
    #[arg(long, required = true, value_name = "PATH")]
    pub map: PathBuf,

    /// Directory holding `model.toml` and one or more `chkpt_<step>.toml` checkpoints.
    #[arg(long, required = true, value_name = "DIR")]
    pub model_dir: PathBuf,

    /// Directory the refined model and per-residue table are written to.
    #[arg(long, required = true, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Optional configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    // --- Engine overrides ---
    /// Inference devices: "cpu" or a comma-separated list of GPU ids (e.g. "0,1").
    #[arg(short, long, value_name = "DEVICES")]
    pub device: Option<String>,

    /// Run inference in half precision.
    #[arg(long)]
    pub fp16: bool,

    /// Resample the map to this voxel size (in Angstrom) before refinement.
    #[arg(long, value_name = "FLOAT")]
    pub voxel_size: Option<f64>,

    // --- Scheduling overrides ---
    /// Number of predictions required for every residue.
    #[arg(short = 'r', long, value_name = "INT")]
    pub repeat_per_residue: Option<u32>,

    /// Number of crops sent to each device per round.
    #[arg(short, long, value_name = "INT")]
    pub batch_size: Option<usize>,

    /// Number of residues in each crop.
    #[arg(long, value_name = "INT")]
    pub crop_length: Option<usize>,

    /// Number of residues nearest each crop centre whose predictions are kept.
    #[arg(long, value_name = "INT")]
    pub num_pred_residues: Option<usize>,

    /// Seed for centre selection.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S scheduling.batch-size=4
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refine_requires_inputs_and_outputs() {
        let result = Cli::try_parse_from(["resweep", "refine", "--struct", "in.pdb"]);
        assert!(result.is_err());
    }

    #[test]
    fn refine_parses_overrides_and_global_flags() {
        let cli = Cli::try_parse_from([
            "resweep",
            "-vv",
            "-j",
            "4",
            "refine",
            "--struct",
            "in.cif",
            "--map",
            "map.mrc",
            "--model-dir",
            "model",
            "--output-dir",
            "out",
            "--device",
            "0,1",
            "--repeat-per-residue",
            "5",
            "--fp16",
            "-S",
            "scheduling.seed=7",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.threads, Some(4));
        let Commands::Refine(args) = cli.command;
        assert_eq!(args.structure, PathBuf::from("in.cif"));
        assert_eq!(args.device.as_deref(), Some("0,1"));
        assert_eq!(args.repeat_per_residue, Some(5));
        assert!(args.fp16);
        assert_eq!(args.batch_size, None);
        assert_eq!(args.set_values, vec!["scheduling.seed=7".to_string()]);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from([
            "resweep", "-q", "-v", "refine", "--struct", "a.pdb", "--map", "m.mrc", "--model-dir",
            "m", "--output-dir", "o",
        ]);
        assert!(result.is_err());
    }
}
