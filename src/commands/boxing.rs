//! # box 子命令实现
//!
//! 读入图（和模型），按所选方式盒子化，写出盒子图与平移回原始框架的模型。
//!
//! ## 依赖关系
//! - 使用 `cli/boxing.rs` 定义的参数
//! - 使用 `manager/boxing.rs`

use crate::cli::boxing::BoxArgs;
use crate::commands::{load_manager, write_primary_model};
use crate::error::Result;
use crate::manager::boxing::BoxingOptions;
use crate::manager::MapId;
use crate::parsers;
use crate::utils::output;

/// 执行 box 命令
pub fn execute(args: BoxArgs) -> Result<()> {
    output::print_header("Boxing Map and Model");

    let mut mmm = load_manager(&args.map, args.model.as_deref())?;
    let options = BoxingOptions {
        box_cushion: args.box_cushion,
        selection: args.selection.clone(),
        select_unique_by_ncs: args.select_unique_by_ncs,
        model_can_be_outside_bounds: !args.keep_model_inside,
        density_threshold: args.density_threshold,
        resolution: args.resolution,
        solvent_content: args.solvent_content,
    };
    let before = mmm.primary_map()?.shape();

    if let Some((lower, upper)) = args.bounds {
        mmm.box_with_bounds(lower, upper)?;
    } else if args.around_model {
        mmm.box_around_model(&options)?;
    } else if args.around_density {
        mmm.box_around_density(&options)?;
    } else if let Some(ref mask_path) = args.around_mask {
        let mut mask = parsers::read_map_file(mask_path)?;
        mask.set_is_mask(true);
        mmm.add_map(MapId::mask(), mask)?;
        mmm.box_around_mask(&MapId::mask(), &options)?;
    } else if args.around_unique {
        mmm.box_around_unique(&options)?;
    }

    let primary = mmm.primary_map()?;
    output::print_info(&format!(
        "Box {:?} -> {:?} (origin shift {:?})",
        before,
        primary.shape(),
        primary.origin_shift_grid_units()
    ));

    parsers::write_map_file(primary, &args.output)?;
    output::print_written("Map", &args.output);

    if let Some(ref path) = args.output_model {
        write_primary_model(&mmm, path)?;
    }
    output::print_done("Boxing complete");
    Ok(())
}
