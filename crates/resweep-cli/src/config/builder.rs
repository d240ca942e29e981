use super::defaults::DefaultsConfig;
use super::file::FileConfig;
use super::models::AppConfig;
use crate::cli::RefineArgs;
use crate::error::{CliError, Result};
use resweep::engine::config::RefineConfigBuilder;
use resweep::engine::dispatch::{Device, Precision};
use std::str::FromStr;

/// Resolves every setting with precedence CLI flag > `--set` > config file > default.
pub fn build_config(args: &RefineArgs) -> Result<AppConfig> {
    let defaults = DefaultsConfig::default();

    let file_config = if let Some(config_path) = &args.config {
        FileConfig::from_file(config_path)?
    } else {
        FileConfig::default()
    };

    let mut file_config = apply_set_values(file_config, &args.set_values)?;

    let scheduling = file_config.scheduling.take().unwrap_or_default();
    let engine = file_config.engine.take().unwrap_or_default();

    let refine = RefineConfigBuilder::new()
        .target_repeats(
            args.repeat_per_residue
                .or(scheduling.repeat_per_residue)
                .unwrap_or(defaults.repeat_per_residue),
        )
        .batch_size(
            args.batch_size
                .or(scheduling.batch_size)
                .unwrap_or(defaults.batch_size),
        )
        .crop_length(
            args.crop_length
                .or(scheduling.crop_length)
                .unwrap_or(defaults.crop_length),
        )
        .num_pred_residues(
            args.num_pred_residues
                .or(scheduling.num_pred_residues)
                .unwrap_or(defaults.num_pred_residues),
        )
        .seed(args.seed.or(scheduling.seed).unwrap_or(defaults.seed))
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    let device_text = args
        .device
        .as_deref()
        .or(engine.device.as_deref())
        .unwrap_or(&defaults.device);
    let devices = Device::parse_list(device_text).map_err(|e| CliError::Config(e.to_string()))?;

    let fp16 = args.fp16 || engine.fp16.unwrap_or(defaults.fp16);
    let precision = if fp16 { Precision::Half } else { Precision::Full };

    let voxel_size = args
        .voxel_size
        .or(engine.voxel_size)
        .unwrap_or(defaults.voxel_size);
    if !(voxel_size.is_finite() && voxel_size > 0.0) {
        return Err(CliError::Config(format!(
            "voxel-size must be a positive number, got {}",
            voxel_size
        )));
    }

    Ok(AppConfig {
        structure_path: args.structure.clone(),
        map_path: args.map.clone(),
        model_dir: args.model_dir.clone(),
        output_dir: args.output_dir.clone(),
        refine,
        devices,
        precision,
        voxel_size,
    })
}

fn parse_value<T: FromStr>(key: &str, value_str: &str, kind: &str) -> Result<T> {
    value_str
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid {} value for {}: {}", kind, key, value_str)))
}

fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let parts: Vec<_> = kv_pair.splitn(2, '=').collect();
        if parts.len() != 2 {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        }
        let key = parts[0];
        let value_str = parts[1];

        match key {
            "scheduling.repeat-per-residue" => {
                config
                    .scheduling
                    .get_or_insert_with(Default::default)
                    .repeat_per_residue = Some(parse_value(key, value_str, "integer")?);
            }
            "scheduling.batch-size" => {
                config.scheduling.get_or_insert_with(Default::default).batch_size =
                    Some(parse_value(key, value_str, "integer")?);
            }
            "scheduling.crop-length" => {
                config.scheduling.get_or_insert_with(Default::default).crop_length =
                    Some(parse_value(key, value_str, "integer")?);
            }
            "scheduling.num-pred-residues" => {
                config
                    .scheduling
                    .get_or_insert_with(Default::default)
                    .num_pred_residues = Some(parse_value(key, value_str, "integer")?);
            }
            "scheduling.seed" => {
                config.scheduling.get_or_insert_with(Default::default).seed =
                    Some(parse_value(key, value_str, "integer")?);
            }
            "engine.device" => {
                config.engine.get_or_insert_with(Default::default).device = Some(value_str.to_string());
            }
            "engine.fp16" => {
                config.engine.get_or_insert_with(Default::default).fp16 =
                    Some(parse_value(key, value_str, "boolean")?);
            }
            "engine.voxel-size" => {
                config.engine.get_or_insert_with(Default::default).voxel_size =
                    Some(parse_value(key, value_str, "float")?);
            }
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(config)
}
