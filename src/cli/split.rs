//! # split 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/split.rs`

use clap::{Args, ValueEnum};
use std::path::PathBuf;

/// 划分方式
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum SplitMethod {
    /// One box per chain
    Chain,
    /// One box per contiguous segment
    Segment,
    /// Tile the map into boxes
    Boxes,
}

impl std::fmt::Display for SplitMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplitMethod::Chain => write!(f, "chain"),
            SplitMethod::Segment => write!(f, "segment"),
            SplitMethod::Boxes => write!(f, "boxes"),
        }
    }
}

/// split 子命令参数
#[derive(Args, Debug)]
pub struct SplitArgs {
    /// Input map (.ccp4/.mrc/.map)
    #[arg(long)]
    pub map: PathBuf,

    /// Input model (.pdb); required except for --method boxes
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// How to split
    #[arg(long, value_enum, default_value_t = SplitMethod::Chain)]
    pub method: SplitMethod,

    /// Approximate number of boxes for --method boxes
    #[arg(long, default_value_t = 24)]
    pub target_for_boxes: usize,

    /// Cushion around each region (Å)
    #[arg(long, default_value_t = 3.0)]
    pub box_cushion: f64,

    /// Skip waters
    #[arg(long, default_value_t = false)]
    pub skip_waters: bool,

    /// Skip HETATM records
    #[arg(long, default_value_t = false)]
    pub skip_hetero: bool,

    /// Keep boxes without selected atoms
    #[arg(long, default_value_t = false)]
    pub keep_empty_boxes: bool,

    /// Overwrite density near unselected atoms with --masked-value
    #[arg(long, default_value_t = false)]
    pub mask_unselected: bool,

    /// Radius around unselected atoms (Å)
    #[arg(long, default_value_t = 3.0)]
    pub mask_radius: f64,

    /// Value written near unselected atoms
    #[arg(long, default_value_t = -10.0, allow_hyphen_values = true)]
    pub masked_value: f64,

    /// Directory for box_NNN.ccp4 / box_NNN.pdb
    #[arg(long)]
    pub write_dir: Option<PathBuf>,
}
