//! # CSV 导出
//!
//! - FSC 曲线：d_min, d_star, fsc, n_refl
//! - 局部分辨率样本：x, y, z, d_min（原始坐标系）
//!
//! ## 依赖关系
//! - 被 `commands/analyze.rs` 调用
//! - 使用 `csv` 库写入 CSV 文件

use crate::error::{MapRegionError, Result};
use crate::local::ResolutionSample;
use crate::maps::fsc::FscCurve;

use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct SampleRow {
    x: f64,
    y: f64,
    z: f64,
    d_min: f64,
}

fn finish<W: std::io::Write>(mut wtr: csv::Writer<W>, output_path: &Path) -> Result<()> {
    wtr.flush().map_err(|e| MapRegionError::FileWriteError {
        path: output_path.display().to_string(),
        source: e,
    })
}

/// 导出 FSC 曲线
pub fn fsc_to_csv(curve: &FscCurve, output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;
    for point in &curve.points {
        wtr.serialize(point)?;
    }
    finish(wtr, output_path)
}

/// 导出局部分辨率样本
pub fn samples_to_csv(samples: &[ResolutionSample], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;
    for s in samples {
        wtr.serialize(SampleRow {
            x: s.location[0],
            y: s.location[1],
            z: s.location[2],
            d_min: s.d_min,
        })?;
    }
    finish(wtr, output_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::fsc::FscPoint;

    #[test]
    fn test_fsc_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fsc.csv");
        let curve = FscCurve {
            points: vec![
                FscPoint {
                    d_min: 10.0,
                    d_star: 0.05,
                    fsc: 0.99,
                    n_refl: 20,
                },
                FscPoint {
                    d_min: 5.0,
                    d_star: 0.15,
                    fsc: 0.1,
                    n_refl: 40,
                },
            ],
        };
        fsc_to_csv(&curve, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "d_min,d_star,fsc,n_refl");
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("5.0,"));
    }

    #[test]
    fn test_samples_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        let samples = vec![ResolutionSample {
            location: [1.0, 2.0, 3.5],
            d_min: 4.25,
        }];
        samples_to_csv(&samples, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "x,y,z,d_min\n1.0,2.0,3.5,4.25\n");
    }
}
