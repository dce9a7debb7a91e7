//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `box`: 把图和模型裁剪到一个盒子
//! - `split`: 按链 / 片段 / 平铺划分成若干盒子
//! - `analyze`: 分析功能（嵌套子命令）
//!   - `fsc`: 两张图的 FSC
//!   - `local-resolution`: 半图局部分辨率
//! - `sharpen`: 半图 / 模型 / 外部图锐化
//! - `mask`: 构造掩膜
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: boxing, split, analyze, sharpen, mask

pub mod analyze;
pub mod boxing;
pub mod mask;
pub mod sharpen;
pub mod split;

use clap::{Parser, Subcommand};

/// mapregion - 密度图与模型的盒子划分和局部缩放
#[derive(Parser)]
#[command(name = "mapregion")]
#[command(author = "Changjiang Wu")]
#[command(version)]
#[command(about = "Box, split, mask and locally sharpen density maps with their models", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Cut out a box of the map (and model) by bounds, model, density, mask or NCS-unique region
    Box(boxing::BoxArgs),

    /// Split map and model into boxes by chain, segment or tiling
    Split(split::SplitArgs),

    /// Analyze maps (FSC, local resolution)
    Analyze(analyze::AnalyzeArgs),

    /// Sharpen a map with half-maps, a model or an external map
    Sharpen(sharpen::SharpenArgs),

    /// Create a mask around atoms, density or box edges
    Mask(mask::MaskArgs),
}

/// 解析 "x0,y0,z0,x1,y1,z1" 格式的格点边界
pub fn parse_bounds(input: &str) -> Result<([i64; 3], [i64; 3]), String> {
    let values: Vec<i64> = input
        .split(',')
        .map(|s| s.trim().parse::<i64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| format!("Invalid bounds '{}': {}", input, e))?;
    if values.len() != 6 {
        return Err(format!(
            "Invalid bounds '{}': expected 6 comma-separated integers (x0,y0,z0,x1,y1,z1)",
            input
        ));
    }
    let lower = [values[0], values[1], values[2]];
    let upper = [values[3], values[4], values[5]];
    if (0..3).any(|i| lower[i] > upper[i]) {
        return Err(format!("Invalid bounds '{}': lower exceeds upper", input));
    }
    Ok((lower, upper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_bounds() {
        assert_eq!(parse_bounds("0,1,2, 9,10,11").unwrap(), ([0, 1, 2], [9, 10, 11]));
        assert!(parse_bounds("0,1,2").is_err());
        assert!(parse_bounds("5,0,0,4,1,1").is_err());
        assert!(parse_bounds("a,0,0,4,1,1").is_err());
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from([
            "mapregion", "box", "--map", "m.ccp4", "--bounds", "0,0,0,9,9,9", "-o", "out.ccp4",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Box(_)));

        let cli = Cli::try_parse_from([
            "mapregion", "sharpen", "--map", "m.ccp4", "--half-maps", "a.ccp4", "b.ccp4", "--local",
            "-o", "s.ccp4",
        ])
        .unwrap();
        match cli.command {
            Commands::Sharpen(args) => {
                assert_eq!(args.half_maps.map(|v| v.len()), Some(2));
                assert!(args.local);
            }
            _ => panic!("expected sharpen"),
        }

        // 盒子方式互斥
        assert!(Cli::try_parse_from([
            "mapregion", "box", "--map", "m.ccp4", "--around-density", "--around-unique", "-o", "o.ccp4",
        ])
        .is_err());
    }
}
