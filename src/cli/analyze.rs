//! # analyze 子命令 CLI 定义
//!
//! 分析功能统一入口，包含多个子命令：
//! - `fsc`: 两张图的 FSC 曲线
//! - `local-resolution`: 半图局部分辨率
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/analyze.rs`

use clap::{Args, Subcommand};
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────
// Analyze 主命令
// ─────────────────────────────────────────────────────────────

/// analyze 主命令参数
#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    #[command(subcommand)]
    pub command: AnalyzeCommands,
}

/// analyze 子命令
#[derive(Subcommand, Debug)]
pub enum AnalyzeCommands {
    /// Fourier shell correlation between two maps
    Fsc(FscArgs),

    /// Local resolution from half-maps
    LocalResolution(LocalResolutionArgs),
}

// ─────────────────────────────────────────────────────────────
// FSC
// ─────────────────────────────────────────────────────────────

/// fsc 子命令参数
#[derive(Args, Debug)]
pub struct FscArgs {
    /// First map
    #[arg(long)]
    pub map1: PathBuf,

    /// Second map
    #[arg(long)]
    pub map2: PathBuf,

    /// FSC threshold
    #[arg(long, default_value_t = 0.143)]
    pub cutoff: f64,

    /// Plot file (.png or .svg)
    #[arg(long)]
    pub plot: Option<PathBuf>,

    /// CSV file for the curve
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Number of curve points to print
    #[arg(long, default_value_t = 12)]
    pub show: usize,
}

// ─────────────────────────────────────────────────────────────
// 局部分辨率
// ─────────────────────────────────────────────────────────────

/// local-resolution 子命令参数
#[derive(Args, Debug)]
pub struct LocalResolutionArgs {
    /// First half-map
    #[arg(long)]
    pub map1: PathBuf,

    /// Second half-map
    #[arg(long)]
    pub map2: PathBuf,

    /// Nominal resolution (Å); default from the half-map FSC
    #[arg(long)]
    pub resolution: Option<f64>,

    /// Output local resolution map
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// CSV file for the samples
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Number of worker threads (0 = all CPUs)
    #[arg(long, env = "MAPREGION_NPROC", default_value_t = 0)]
    pub nproc: usize,
}
