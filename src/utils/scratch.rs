//! # 临时工作目录
//!
//! 各向异性局部缩放时，每个方向的部分结果以原始 f64 数组写入临时目录，
//! 由主线程读回求和。目录随 `ScratchDir` 析构删除（包括出错返回的路径）。
//!
//! ## 命名
//! 优先使用 `TEMP_ANISO_LOCAL`；已存在时依次尝试 `_0` … `_999` 后缀，
//! 全部失败返回 `ScratchDirectory` 错误。
//!
//! ## 依赖关系
//! - 被 `local/shells.rs` 使用
//! - 使用 `tempfile`, `bytemuck`

use crate::error::{MapRegionError, Result};

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// 首选目录名
pub const SCRATCH_PREFIX: &str = "TEMP_ANISO_LOCAL";

/// 带后缀重试次数
const MAX_SUFFIX: usize = 1000;

/// 作用域内有效的临时目录
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// 在 `parent` 下创建临时目录
    pub fn create_in(parent: &Path) -> Result<Self> {
        let io_error = |source: std::io::Error| MapRegionError::FileWriteError {
            path: parent.join(SCRATCH_PREFIX).display().to_string(),
            source,
        };

        match tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .rand_bytes(0)
            .tempdir_in(parent)
        {
            Ok(dir) => return Ok(Self { dir }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(io_error(e)),
        }

        for i in 0..MAX_SUFFIX {
            let suffix = format!("_{}", i);
            match tempfile::Builder::new()
                .prefix(SCRATCH_PREFIX)
                .suffix(&suffix)
                .rand_bytes(0)
                .tempdir_in(parent)
            {
                Ok(dir) => return Ok(Self { dir }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(io_error(e)),
            }
        }

        Err(MapRegionError::ScratchDirectory {
            path: parent.join(SCRATCH_PREFIX).display().to_string(),
            attempts: MAX_SUFFIX + 1,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// 目录中的文件路径
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// 写入原始 f64 数组
    pub fn write_values(&self, name: &str, values: &[f64]) -> Result<PathBuf> {
        let path = self.file(name);
        fs::write(&path, bytemuck::cast_slice::<f64, u8>(values)).map_err(|source| {
            MapRegionError::FileWriteError {
                path: path.display().to_string(),
                source,
            }
        })?;
        Ok(path)
    }

    /// 读回 `n` 个 f64
    pub fn read_values(&self, name: &str, n: usize) -> Result<Vec<f64>> {
        let path = self.file(name);
        let bytes = fs::read(&path).map_err(|source| MapRegionError::FileReadError {
            path: path.display().to_string(),
            source,
        })?;
        if bytes.len() != n * std::mem::size_of::<f64>() {
            return Err(MapRegionError::ParseError {
                format: "scratch".to_string(),
                path: path.display().to_string(),
                reason: format!("expected {} values, found {} bytes", n, bytes.len()),
            });
        }
        let mut values = vec![0.0f64; n];
        bytemuck::cast_slice_mut::<f64, u8>(&mut values).copy_from_slice(&bytes);
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_name_then_suffix() {
        let parent = tempfile::tempdir().unwrap();
        let first = ScratchDir::create_in(parent.path()).unwrap();
        assert_eq!(first.path(), parent.path().join("TEMP_ANISO_LOCAL"));
        let second = ScratchDir::create_in(parent.path()).unwrap();
        assert_eq!(second.path(), parent.path().join("TEMP_ANISO_LOCAL_0"));
    }

    #[test]
    fn test_deleted_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let path = {
            let scratch = ScratchDir::create_in(parent.path()).unwrap();
            scratch.write_values("a.bin", &[1.0, 2.0]).unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_values_roundtrip() {
        let parent = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create_in(parent.path()).unwrap();
        let values = vec![0.5, -1.25, 3.0e10];
        scratch.write_values("partial_0.bin", &values).unwrap();
        assert_eq!(scratch.read_values("partial_0.bin", 3).unwrap(), values);
        assert!(scratch.read_values("partial_0.bin", 4).is_err());
    }

    #[test]
    fn test_collisions_exhausted() {
        let parent = tempfile::tempdir().unwrap();
        fs::create_dir(parent.path().join(SCRATCH_PREFIX)).unwrap();
        for i in 0..MAX_SUFFIX {
            fs::create_dir(parent.path().join(format!("{}_{}", SCRATCH_PREFIX, i))).unwrap();
        }
        let err = ScratchDir::create_in(parent.path()).unwrap_err();
        assert!(matches!(
            err,
            MapRegionError::ScratchDirectory { attempts: 1001, .. }
        ));
    }
}
