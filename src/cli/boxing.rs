//! # box 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/boxing.rs`

use clap::{ArgGroup, Args};
use std::path::PathBuf;

/// box 子命令参数
#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("method")
        .required(true)
        .args(["bounds", "around_model", "around_density", "around_mask", "around_unique"]),
))]
pub struct BoxArgs {
    /// Input map (.ccp4/.mrc/.map)
    #[arg(long)]
    pub map: PathBuf,

    /// Input model (.pdb)
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Grid bounds x0,y0,z0,x1,y1,z1 (inclusive)
    #[arg(long, value_parser = super::parse_bounds)]
    pub bounds: Option<([i64; 3], [i64; 3])>,

    /// Box around the model (optionally a selection)
    #[arg(long, requires = "model")]
    pub around_model: bool,

    /// Atom selection for --around-model (e.g. "chain A and resseq 1:50")
    #[arg(long)]
    pub selection: Option<String>,

    /// Box around the NCS-unique part of the model
    #[arg(long, default_value_t = false)]
    pub select_unique_by_ncs: bool,

    /// Box around density above the edge mean
    #[arg(long)]
    pub around_density: bool,

    /// Fraction of (max - edge mean) above the edge mean for --around-density
    #[arg(long, default_value_t = 0.05)]
    pub density_threshold: f64,

    /// Box around the mask in this file
    #[arg(long)]
    pub around_mask: Option<PathBuf>,

    /// Box around the NCS-unique region of the density
    #[arg(long)]
    pub around_unique: bool,

    /// Resolution (Å) for --around-unique (default: from the map)
    #[arg(long)]
    pub resolution: Option<f64>,

    /// Solvent fraction for --around-unique
    #[arg(long, default_value_t = 0.5)]
    pub solvent_content: f64,

    /// Cushion around the region (Å)
    #[arg(long, default_value_t = 5.0)]
    pub box_cushion: f64,

    /// Remove atoms outside the box
    #[arg(long, default_value_t = false)]
    pub keep_model_inside: bool,

    /// Output map
    #[arg(short, long)]
    pub output: PathBuf,

    /// Output model (written in the original frame)
    #[arg(long)]
    pub output_model: Option<PathBuf>,
}
