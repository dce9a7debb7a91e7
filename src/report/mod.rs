//! # 结果输出
//!
//! ## 功能
//! - FSC 曲线图 (PNG / SVG)
//! - FSC 曲线与局部分辨率样本的 CSV
//!
//! ## 依赖关系
//! - 被 `commands/analyze.rs` 使用
//! - 使用 `maps/fsc.rs`, `local/`

pub mod export;
pub mod plot;
