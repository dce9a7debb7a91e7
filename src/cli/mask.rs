//! # mask 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/mask.rs`

use clap::{ArgGroup, Args};
use std::path::PathBuf;

/// mask 子命令参数
#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("kind")
        .required(true)
        .args(["model", "density", "edges"]),
))]
pub struct MaskArgs {
    /// Template map
    #[arg(long)]
    pub map: PathBuf,

    /// Mask around the atoms of this model
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Radius around atoms (Å)
    #[arg(long, default_value_t = 3.0)]
    pub radius: f64,

    /// Mask around density
    #[arg(long)]
    pub density: bool,

    /// Solvent fraction left outside a density mask
    #[arg(long, default_value_t = 0.5)]
    pub solvent_content: f64,

    /// Smoothing resolution for a density mask (Å); default from the map
    #[arg(long)]
    pub resolution: Option<f64>,

    /// Soft edge around box faces
    #[arg(long)]
    pub edges: bool,

    /// Soft mask radius (Å)
    #[arg(long)]
    pub soft_radius: Option<f64>,

    /// Expand the mask by this distance (Å)
    #[arg(long)]
    pub expand: Option<f64>,

    /// Write the masked map instead of the mask
    #[arg(long, default_value_t = false)]
    pub apply: bool,

    /// Output file
    #[arg(short, long)]
    pub output: PathBuf,
}
