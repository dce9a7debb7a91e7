//! # split 子命令实现
//!
//! 按链 / 片段 / 平铺划分，打印盒子表，可选写出每个盒子的图和模型。
//!
//! ## 依赖关系
//! - 使用 `cli/split.rs` 定义的参数
//! - 使用 `manager/split.rs`

use crate::boxing::SplitOptions;
use crate::cli::split::{SplitArgs, SplitMethod};
use crate::commands::{load_manager, write_primary_model};
use crate::error::{MapRegionError, Result};
use crate::manager::split::SplitResult;
use crate::parsers;
use crate::utils::output;

use std::fs;
use tabled::{Table, Tabled};

/// 盒子表的一行
#[derive(Debug, Clone, Tabled)]
struct BoxRow {
    #[tabled(rename = "Box")]
    index: usize,
    #[tabled(rename = "Lower")]
    lower: String,
    #[tabled(rename = "Upper")]
    upper: String,
    #[tabled(rename = "Shape")]
    shape: String,
    #[tabled(rename = "Atoms")]
    atoms: usize,
}

fn box_rows(split: &SplitResult) -> Vec<BoxRow> {
    split
        .regions
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let s = r.box_spec.shape();
            BoxRow {
                index: i + 1,
                lower: format!("{:?}", r.box_spec.lower),
                upper: format!("{:?}", r.box_spec.upper),
                shape: format!("{}x{}x{}", s[0], s[1], s[2]),
                atoms: r.selection.count(),
            }
        })
        .collect()
}

/// 执行 split 命令
pub fn execute(args: SplitArgs) -> Result<()> {
    output::print_header(&format!("Splitting by {}", args.method));

    let mmm = load_manager(&args.map, args.model.as_deref())?;
    let options = SplitOptions {
        box_cushion: args.box_cushion,
        skip_waters: args.skip_waters,
        skip_hetero: args.skip_hetero,
        skip_empty_boxes: !args.keep_empty_boxes,
        select_final_boxes_based_on_model: args.model.is_some(),
        mask_around_unselected_atoms: args.mask_unselected,
        mask_radius: args.mask_radius,
        masked_value: args.masked_value,
        ..SplitOptions::default()
    };

    let split = match args.method {
        SplitMethod::Chain => mmm.split_up_map_and_model_by_chain(&options)?,
        SplitMethod::Segment => mmm.split_up_map_and_model_by_segment(&options)?,
        SplitMethod::Boxes => mmm.split_up_map_and_model_by_boxes(args.target_for_boxes, &options)?,
    };

    if split.is_empty() {
        output::print_warning("No boxes produced.");
        return Ok(());
    }

    println!("{}", Table::new(box_rows(&split)));

    if let Some(ref dir) = args.write_dir {
        fs::create_dir_all(dir).map_err(|e| MapRegionError::FileWriteError {
            path: dir.display().to_string(),
            source: e,
        })?;
        for (i, region) in split.regions.iter().enumerate() {
            let map_path = dir.join(format!("box_{:03}.ccp4", i + 1));
            parsers::write_map_file(region.manager.primary_map()?, &map_path)?;
            match region.manager.primary_model() {
                Some(m) if m.len() > 0 => {
                    write_primary_model(&region.manager, &dir.join(format!("box_{:03}.pdb", i + 1)))?;
                }
                Some(_) => output::print_skip(&format!("Box {}: no atoms, model not written", i + 1)),
                None => {}
            }
        }
        output::print_success(&format!("{} boxes written to '{}'", split.len(), dir.display()));
    }

    output::print_done(&format!("Split into {} boxes", split.len()));
    Ok(())
}
