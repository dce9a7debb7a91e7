//! # sharpen 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/sharpen.rs`

use clap::{ArgGroup, Args};
use std::path::PathBuf;

/// sharpen 子命令参数
#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("reference")
        .required(true)
        .args(["half_maps", "model", "external"]),
))]
pub struct SharpenArgs {
    /// Map to sharpen; default is the average of the half-maps
    #[arg(long)]
    pub map: Option<PathBuf>,

    /// Two half-maps
    #[arg(long, num_args = 2, value_names = ["HALF_MAP_1", "HALF_MAP_2"])]
    pub half_maps: Option<Vec<PathBuf>>,

    /// Model (.pdb) as reference
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// External reference map
    #[arg(long)]
    pub external: Option<PathBuf>,

    /// Local sharpening
    #[arg(long, default_value_t = false)]
    pub local: bool,

    /// Anisotropic sharpening
    #[arg(long, default_value_t = false)]
    pub anisotropic: bool,

    /// Disable spectral scaling (half-map mode)
    #[arg(long, default_value_t = false)]
    pub no_spectral_scaling: bool,

    /// Keep the local result as is instead of blending it with the overall
    /// result by masked correlation with the model map (--model --local)
    #[arg(long, default_value_t = false)]
    pub no_optimize_with_model: bool,

    /// Resolution (Å); default from the map
    #[arg(long)]
    pub resolution: Option<f64>,

    /// Number of local boxes (default from map volume)
    #[arg(long)]
    pub n_boxes: Option<usize>,

    /// Number of worker threads (0 = all CPUs)
    #[arg(long, env = "MAPREGION_NPROC", default_value_t = 0)]
    pub nproc: usize,

    /// Parent directory of the scratch directory used by anisotropic local sharpening
    #[arg(long, default_value = ".")]
    pub scratch_dir: PathBuf,

    /// Output map
    #[arg(short, long)]
    pub output: PathBuf,
}
