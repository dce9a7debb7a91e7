//! # mapregion - 密度图/模型的空间划分与局部缩放
//!
//! 围绕一张主密度图及其配套图、模型，提供裁剪、划分合并、掩膜、
//! FSC 与局部分辨率分析、整体和局部锐化。
//!
//! ## 子命令
//! - `box`      - 按边界 / 模型 / 密度 / 掩膜 / NCS 唯一部分裁剪
//! - `split`    - 按链、片段或平铺把图和模型划分成盒子
//! - `analyze`  - 分析功能
//!   - `fsc` - 两张图的 FSC 曲线
//!   - `local-resolution` - 半图局部分辨率
//! - `sharpen`  - 半图 / 模型 / 外部参考图锐化
//! - `mask`     - 原子、密度或边缘掩膜
//!
//! ## 依赖关系
//! ```text
//! main.rs
//!   ├── cli/        (命令行参数定义)
//!   ├── commands/   (命令执行逻辑)
//!   │     ├── manager/   (图与模型容器)
//!   │     ├── parsers/   (CCP4 / PDB 读写)
//!   │     └── report/    (图表与 CSV)
//!   ├── boxing/     (盒子规划)
//!   ├── local/      (局部 FSC 与缩放)
//!   ├── maps/, masking/, models/
//!   ├── utils/      (工具函数)
//!   └── error.rs    (错误处理)
//! ```

mod boxing;
mod cli;
mod commands;
mod error;
mod local;
mod manager;
mod maps;
mod masking;
mod models;
mod parsers;
mod report;
mod utils;

use clap::Parser;
use cli::Cli;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();

    if let Err(e) = commands::run(cli.command) {
        utils::output::print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
