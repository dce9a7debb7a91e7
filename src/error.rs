//! # 统一错误处理模块
//!
//! 定义 mapregion 的所有错误类型，使用 `thiserror` 派生。
//!
//! ## 错误分类
//! - 配置错误（对称性不一致、缺少必要的图/模型）：立即失败
//! - 数值退化（空分辨率壳层、空盒子）：由调用方局部跳过，只在无法继续时报错
//! - 资源错误（临时目录冲突）：重试后失败
//! - 工作线程错误：整个并行调用失败
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 无外部模块依赖

use thiserror::Error;

/// mapregion 统一错误类型
#[derive(Error, Debug)]
pub enum MapRegionError {
    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ─────────────────────────────────────────────────────────────
    // 解析错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to parse {format} file: {path}\nReason: {reason}")]
    ParseError {
        format: String,
        path: String,
        reason: String,
    },

    #[error("Invalid atom selection '{selection}': {reason}")]
    InvalidSelection { selection: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // 配置错误
    // ─────────────────────────────────────────────────────────────
    #[error("Crystal symmetry mismatch ({context}):\n  {first}\n  {second}")]
    SymmetryMismatch {
        context: String,
        first: String,
        second: String,
    },

    #[error("Map '{id}' is required but not present")]
    MissingMap { id: String },

    #[error("Model '{id}' is required but not present")]
    MissingModel { id: String },

    #[error("Map '{id}' is not a mask")]
    NotAMask { id: String },

    #[error(
        "Shift mismatch ({context}): expected ({:.4}, {:.4}, {:.4}), found ({:.4}, {:.4}, {:.4})",
        expected[0], expected[1], expected[2], found[0], found[1], found[2]
    )]
    ShiftMismatch {
        context: String,
        expected: [f64; 3],
        found: [f64; 3],
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid range format: {0}")]
    InvalidRange(String),

    // ─────────────────────────────────────────────────────────────
    // 数值错误
    // ─────────────────────────────────────────────────────────────
    #[error("Unable to set up {n_bins} resolution bins to {d_min:.2} A (map too small?)")]
    BinningFailed { n_bins: usize, d_min: f64 },

    #[error("No reflections to {d_min:.2} A")]
    NoReflections { d_min: f64 },

    // ─────────────────────────────────────────────────────────────
    // 资源与并行错误
    // ─────────────────────────────────────────────────────────────
    #[error("Unable to create scratch directory {path} after {attempts} attempts")]
    ScratchDirectory { path: String, attempts: usize },

    #[error("Worker for boxes {first}..{last} failed: {reason}")]
    WorkerFailed {
        first: usize,
        last: usize,
        reason: String,
    },

    // ─────────────────────────────────────────────────────────────
    // CSV 错误
    // ─────────────────────────────────────────────────────────────
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    // ─────────────────────────────────────────────────────────────
    // 其他
    // ─────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, MapRegionError>;
