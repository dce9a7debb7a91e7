//! # CCP4/MRC 密度图格式
//!
//! 读写 mode 2（32 位浮点）、轴顺序 1,2,3（列=X，行=Y，节=Z）的图。
//!
//! ## 头部（1024 字节，小端，按 4 字节字编号，从 1 开始）
//! ```text
//! 1-3   NC NR NS        数据尺寸
//! 4     MODE            2 = f32
//! 5-7   NCSTART ...     数据起点（晶胞格点）
//! 8-10  NX NY NZ        晶胞格点数
//! 11-16 cell            a b c α β γ
//! 17-19 MAPC MAPR MAPS  轴顺序
//! 20-22 AMIN AMAX AMEAN
//! 23    ISPG            空间群号
//! 24    NSYMBT          扩展头字节数
//! 53    'MAP '          54 机器戳   55 RMS
//! ```
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs`, `commands/` 使用
//! - 使用 `maps/density.rs`

use crate::error::{MapRegionError, Result};
use crate::maps::DensityMap;
use crate::models::{CrystalSymmetry, UnitCell};

use ndarray::Array3;
use std::fs;
use std::path::Path;

const HEADER_BYTES: usize = 1024;
const MODE_FLOAT32: i32 = 2;

fn read_error(path: &Path, reason: impl Into<String>) -> MapRegionError {
    MapRegionError::ParseError {
        format: "CCP4".to_string(),
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

fn word_i32(bytes: &[u8], word: usize) -> i32 {
    let o = (word - 1) * 4;
    i32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]])
}

fn word_f32(bytes: &[u8], word: usize) -> f32 {
    let o = (word - 1) * 4;
    f32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]])
}

/// 读取 CCP4/MRC 文件
///
/// 数据起点不为 0 或不覆盖整个晶胞时得到非周期的图，原点保留文件中的位置。
pub fn parse_ccp4_file(path: &Path) -> Result<DensityMap> {
    if !path.exists() {
        return Err(MapRegionError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let bytes = fs::read(path).map_err(|e| MapRegionError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_ccp4_bytes(&bytes).map_err(|e| match e {
        MapRegionError::ParseError { reason, .. } => read_error(path, reason),
        other => other,
    })
}

/// 从内存解析
pub fn parse_ccp4_bytes(bytes: &[u8]) -> Result<DensityMap> {
    let here = Path::new("<bytes>");
    if bytes.len() < HEADER_BYTES {
        return Err(read_error(here, "file shorter than the 1024-byte header"));
    }

    let dims = [word_i32(bytes, 1), word_i32(bytes, 2), word_i32(bytes, 3)];
    let mode = word_i32(bytes, 4);
    if mode != MODE_FLOAT32 {
        return Err(read_error(here, format!("unsupported mode {} (only mode 2)", mode)));
    }
    if dims.iter().any(|&d| d <= 0) {
        return Err(read_error(here, format!("invalid dimensions {:?}", dims)));
    }
    let axes = [word_i32(bytes, 17), word_i32(bytes, 18), word_i32(bytes, 19)];
    if axes != [1, 2, 3] {
        return Err(read_error(
            here,
            format!("unsupported axis order {:?} (only 1,2,3)", axes),
        ));
    }

    let start = [
        word_i32(bytes, 5) as i64,
        word_i32(bytes, 6) as i64,
        word_i32(bytes, 7) as i64,
    ];
    let grid = [word_i32(bytes, 8), word_i32(bytes, 9), word_i32(bytes, 10)];
    let grid = [
        if grid[0] > 0 { grid[0] as usize } else { dims[0] as usize },
        if grid[1] > 0 { grid[1] as usize } else { dims[1] as usize },
        if grid[2] > 0 { grid[2] as usize } else { dims[2] as usize },
    ];
    let cell = UnitCell::new(
        word_f32(bytes, 11) as f64,
        word_f32(bytes, 12) as f64,
        word_f32(bytes, 13) as f64,
        word_f32(bytes, 14) as f64,
        word_f32(bytes, 15) as f64,
        word_f32(bytes, 16) as f64,
    );
    let ispg = word_i32(bytes, 23);
    let nsymbt = word_i32(bytes, 24).max(0) as usize;

    let n = dims.iter().map(|&d| d as usize).product::<usize>();
    let data_start = HEADER_BYTES + nsymbt;
    let data_end = data_start + 4 * n;
    if bytes.len() < data_end {
        return Err(read_error(
            here,
            format!("expected {} data bytes, found {}", 4 * n, bytes.len().saturating_sub(data_start)),
        ));
    }

    // 文件中 X 变化最快
    let values: Vec<f64> = bytes[data_start..data_end]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
        .collect();
    let (nx, ny, nz) = (dims[0] as usize, dims[1] as usize, dims[2] as usize);
    let data = Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| values[i + nx * (j + ny * k)]);

    let space_group = if ispg <= 1 { "P 1".to_string() } else { format!("{}", ispg) };
    let symmetry = CrystalSymmetry::new(cell, space_group);
    Ok(DensityMap::from_region(data, start, grid, symmetry))
}

/// 写出 CCP4 文件
///
/// 起点为 原点平移 + 工作原点，晶胞与格点为完整晶胞，使盒子在原始框架中就位。
pub fn write_ccp4_file(map: &DensityMap, path: &Path) -> Result<()> {
    fs::write(path, to_ccp4_bytes(map)).map_err(|e| MapRegionError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

/// 编码为 CCP4 字节
pub fn to_ccp4_bytes(map: &DensityMap) -> Vec<u8> {
    let shape = map.shape();
    let start = {
        let shift = map.origin_shift_grid_units();
        let origin = map.origin();
        [shift[0] + origin[0], shift[1] + origin[1], shift[2] + origin[2]]
    };
    let grid = map.unit_cell_grid();
    let p = map.unit_cell().parameters;

    let n = shape.iter().product::<usize>();
    let mean = map.mean();
    let rms = map.std_dev();
    let min = map.data().iter().cloned().fold(f64::INFINITY, f64::min);
    let max = map.max_value();

    let mut header = vec![0u8; HEADER_BYTES];
    let put_i32 = |h: &mut Vec<u8>, word: usize, v: i32| {
        let o = (word - 1) * 4;
        h[o..o + 4].copy_from_slice(&v.to_le_bytes());
    };
    put_i32(&mut header, 1, shape[0] as i32);
    put_i32(&mut header, 2, shape[1] as i32);
    put_i32(&mut header, 3, shape[2] as i32);
    put_i32(&mut header, 4, MODE_FLOAT32);
    put_i32(&mut header, 5, start[0] as i32);
    put_i32(&mut header, 6, start[1] as i32);
    put_i32(&mut header, 7, start[2] as i32);
    put_i32(&mut header, 8, grid[0] as i32);
    put_i32(&mut header, 9, grid[1] as i32);
    put_i32(&mut header, 10, grid[2] as i32);
    put_i32(&mut header, 17, 1);
    put_i32(&mut header, 18, 2);
    put_i32(&mut header, 19, 3);
    put_i32(&mut header, 23, 1);
    put_i32(&mut header, 24, 0);

    let put_f32 = |h: &mut Vec<u8>, word: usize, v: f64| {
        let o = (word - 1) * 4;
        h[o..o + 4].copy_from_slice(&(v as f32).to_le_bytes());
    };
    for (i, v) in p.iter().enumerate() {
        put_f32(&mut header, 11 + i, *v);
    }
    put_f32(&mut header, 20, min);
    put_f32(&mut header, 21, max);
    put_f32(&mut header, 22, mean);
    put_f32(&mut header, 55, rms);
    header[208..212].copy_from_slice(b"MAP ");
    // 小端机器戳
    header[212..216].copy_from_slice(&[0x44, 0x41, 0x00, 0x00]);

    let mut out = header;
    out.reserve(4 * n);
    let data = map.data();
    for k in 0..shape[2] {
        for j in 0..shape[1] {
            for i in 0..shape[0] {
                out.extend_from_slice(&(data[[i, j, k]] as f32).to_le_bytes());
            }
        }
    }
    out
}
