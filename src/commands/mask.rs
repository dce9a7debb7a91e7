//! # mask 子命令实现
//!
//! ## 依赖关系
//! - 使用 `cli/mask.rs` 定义的参数
//! - 使用 `manager/masks.rs`

use crate::cli::mask::MaskArgs;
use crate::commands::load_manager;
use crate::error::Result;
use crate::manager::MapId;
use crate::parsers;
use crate::utils::output;

/// 执行 mask 命令
pub fn execute(args: MaskArgs) -> Result<()> {
    output::print_header("Creating Mask");

    let mut mmm = load_manager(&args.map, args.model.as_deref())?;
    if args.model.is_some() {
        mmm.create_mask_around_atoms(args.radius, args.soft_radius)?;
    } else if args.density {
        mmm.create_mask_around_density(args.resolution, args.solvent_content)?;
    } else {
        mmm.create_mask_around_edges(args.soft_radius.unwrap_or(0.0))?;
    }
    if let Some(buffer) = args.expand {
        mmm.expand_mask(buffer)?;
    }

    let mask = mmm.map(&MapId::mask())?;
    output::print_info(&format!(
        "{} of {} points inside the mask",
        mask.count_above(0.5),
        mask.data().len()
    ));

    if args.apply {
        mmm.apply_mask_to_maps(&MapId::mask())?;
        parsers::write_map_file(mmm.primary_map()?, &args.output)?;
        output::print_written("Masked map", &args.output);
    } else {
        parsers::write_map_file(mmm.map(&MapId::mask())?, &args.output)?;
        output::print_written("Mask", &args.output);
    }
    Ok(())
}
