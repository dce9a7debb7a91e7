//! # sharpen 子命令实现
//!
//! ## 依赖关系
//! - 使用 `cli/sharpen.rs` 定义的参数
//! - 使用 `manager/sharpen.rs`

use crate::cli::sharpen::SharpenArgs;
use crate::error::{MapRegionError, Result};
use crate::manager::sharpen::{SharpenConfig, SharpenSummary};
use crate::manager::{MapId, MapModelManager, ModelId};
use crate::parsers;
use crate::utils::{output, progress};

/// 执行 sharpen 命令
pub fn execute(args: SharpenArgs) -> Result<()> {
    output::print_header("Sharpening");

    let mut mmm = build_manager(&args)?;
    let config = SharpenConfig {
        local: args.local,
        anisotropic: args.anisotropic,
        spectral_scaling: !args.no_spectral_scaling,
        resolution: args.resolution,
        nproc: args.nproc,
        n_boxes: args.n_boxes,
        scratch_dir: args.scratch_dir.clone(),
        optimize_with_model: !args.no_optimize_with_model,
        ..SharpenConfig::default()
    };

    let spinner = progress::create_spinner("Sharpening...");
    let summary = if args.half_maps.is_some() {
        mmm.half_map_sharpen(&config)
    } else if args.model.is_some() {
        mmm.model_sharpen(&config)
    } else {
        mmm.external_sharpen(&MapId::new("external"), &config)
    };
    spinner.finish_and_clear();
    let summary = summary?;

    print_summary(&summary);
    parsers::write_map_file(mmm.primary_map()?, &args.output)?;
    output::print_written("Sharpened map", &args.output);
    Ok(())
}

fn build_manager(args: &SharpenArgs) -> Result<MapModelManager> {
    let mut mmm = match (&args.map, &args.half_maps) {
        (_, Some(halves)) if halves.len() == 2 => {
            let first = parsers::read_map_file(&halves[0])?;
            let second = parsers::read_map_file(&halves[1])?;
            let mut mmm = MapModelManager::from_half_maps(first, second)?;
            if let Some(ref path) = args.map {
                mmm.replace_map(&MapId::primary(), parsers::read_map_file(path)?)?;
            }
            mmm
        }
        (Some(path), _) => MapModelManager::new(parsers::read_map_file(path)?),
        _ => {
            return Err(MapRegionError::InvalidArgument(
                "--map is required unless two --half-maps are given".to_string(),
            ))
        }
    };
    if let Some(path) = args.model.as_ref() {
        mmm.add_model(ModelId::primary(), parsers::read_model_file(path)?)?;
    }
    if let Some(ref path) = args.external {
        mmm.add_map(MapId::new("external"), parsers::read_map_file(path)?)?;
    }
    Ok(mmm)
}

fn print_summary(summary: &SharpenSummary) {
    output::print_info(&format!(
        "Mode: {} ({}), resolution {:.2} Å, {} sample(s)",
        summary.mode,
        if summary.local { "local" } else { "overall" },
        summary.resolution,
        summary.n_samples
    ));
    if let (Some(w), Some(cc)) = (summary.weight, summary.cc) {
        output::print_info(&format!("Weight on local sharpening {:.1}, CC to model {:.3}", w, cc));
    }
}
