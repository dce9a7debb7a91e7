//! # 解析器模块
//!
//! 提供原子模型 (PDB) 与密度图 (CCP4/MRC) 的读写。
//!
//! ## 依赖关系
//! - 被 `commands/` 模块使用
//! - 使用 `models/`, `maps/`
//! - 子模块: pdb, ccp4

pub mod ccp4;
pub mod pdb;

use crate::error::{MapRegionError, Result};
use crate::maps::DensityMap;
use crate::models::AtomicModel;
use std::path::Path;

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default()
}

/// 从文件扩展名推断格式并读取密度图
pub fn read_map_file(path: &Path) -> Result<DensityMap> {
    match extension(path).as_str() {
        "ccp4" | "mrc" | "map" => ccp4::parse_ccp4_file(path),
        _ => Err(MapRegionError::InvalidArgument(format!(
            "Cannot determine map format for: {} (expected .ccp4, .mrc or .map)",
            path.display()
        ))),
    }
}

/// 从文件扩展名推断格式并读取原子模型
pub fn read_model_file(path: &Path) -> Result<AtomicModel> {
    match extension(path).as_str() {
        "pdb" | "ent" => pdb::parse_pdb_file(path),
        _ => Err(MapRegionError::InvalidArgument(format!(
            "Cannot determine model format for: {} (expected .pdb)",
            path.display()
        ))),
    }
}

/// 写出密度图（CCP4）
pub fn write_map_file(map: &DensityMap, path: &Path) -> Result<()> {
    ccp4::write_ccp4_file(map, path)
}

/// 写出原子模型（PDB）
pub fn write_model_file(model: &AtomicModel, path: &Path) -> Result<()> {
    pdb::write_pdb_file(model, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_extension() {
        assert!(read_map_file(Path::new("x.cif")).is_err());
        assert!(read_model_file(Path::new("x.ccp4")).is_err());
    }
}
