//! # 傅里叶壳层相关 (FSC) 与图-图相关
//!
//! ## 功能
//! - 分箱统计：每箱的 FSC、振幅均方、反射数（可带每反射权重）
//! - `FscCurve`：按分辨率排列的 FSC，查找阈值对应的分辨率
//! - 实空间相关系数 `map_map_cc`
//!
//! ## 依赖关系
//! - 被 `local/estimate.rs`, `local/runner.rs`, `manager/` 使用
//! - 使用 `maps/coefficients.rs`

use crate::error::{MapRegionError, Result};
use crate::maps::coefficients::{Binner, MapCoefficients};

use ndarray::Array3;
use serde::Serialize;

/// 默认 FSC 阈值
pub const DEFAULT_FSC_CUTOFF: f64 = 0.143;

/// 单箱统计
#[derive(Debug, Clone, Copy, Default)]
pub struct BinCorrelation {
    /// Σ w Re(F1 F2*) / sqrt(Σ w |F1|² · Σ w |F2|²)
    pub cc: f64,
    /// Σ w |F1|² / Σ w
    pub mean_sq_1: f64,
    pub mean_sq_2: f64,
    pub n_refl: usize,
    pub sum_weight: f64,
}

/// 两组系数（同一组反射）逐箱的相关
pub fn correlation_in_bins(
    first: &MapCoefficients,
    second: &MapCoefficients,
    binner: &Binner,
    weights: Option<&[f64]>,
) -> Vec<BinCorrelation> {
    let n_bins = binner.n_bins();
    let mut cross = vec![0.0; n_bins];
    let mut sq1 = vec![0.0; n_bins];
    let mut sq2 = vec![0.0; n_bins];
    let mut sw = vec![0.0; n_bins];
    let mut counts = vec![0usize; n_bins];

    for (i, (a, b)) in first.reflections.iter().zip(&second.reflections).enumerate() {
        let w = weights.map_or(1.0, |w| w[i]);
        let bin = binner.bin_of(i);
        cross[bin] += w * (a.value * b.value.conj()).re;
        sq1[bin] += w * a.value.norm_sqr();
        sq2[bin] += w * b.value.norm_sqr();
        sw[bin] += w;
        counts[bin] += 1;
    }

    (0..n_bins)
        .map(|b| {
            let denom = (sq1[b] * sq2[b]).sqrt();
            BinCorrelation {
                cc: if denom > 0.0 { cross[b] / denom } else { 0.0 },
                mean_sq_1: if sw[b] > 0.0 { sq1[b] / sw[b] } else { 0.0 },
                mean_sq_2: if sw[b] > 0.0 { sq2[b] / sw[b] } else { 0.0 },
                n_refl: counts[b],
                sum_weight: sw[b],
            }
        })
        .collect()
}

/// FSC 曲线上的一点
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FscPoint {
    /// 箱高分辨率端 d (Å)
    pub d_min: f64,
    /// 箱中心 1/d
    pub d_star: f64,
    pub fsc: f64,
    pub n_refl: usize,
}

/// FSC 曲线，从低分辨率到高分辨率
#[derive(Debug, Clone, Default)]
pub struct FscCurve {
    pub points: Vec<FscPoint>,
}

impl FscCurve {
    /// FSC 仍不低于阈值的最高分辨率；从未跨过阈值时为最高测试分辨率
    pub fn d_min_at_cutoff(&self, cutoff: f64) -> Option<f64> {
        let first = self.points.first()?;
        let mut d_min = first.d_min;
        for p in &self.points {
            if p.fsc < cutoff {
                break;
            }
            d_min = p.d_min;
        }
        Some(d_min)
    }

    /// 最高测试分辨率
    pub fn finest_d(&self) -> Option<f64> {
        self.points.last().map(|p| p.d_min)
    }
}

/// 两张图的 FSC 曲线，每箱约 `bin_width` 个反射
pub fn fsc_curve(
    first: &MapCoefficients,
    second: &MapCoefficients,
    bin_width: usize,
) -> Result<FscCurve> {
    if first.len() != second.len() || first.n_real != second.n_real {
        return Err(MapRegionError::InvalidArgument(
            "FSC requires coefficients on the same gridding".to_string(),
        ));
    }
    if first.is_empty() {
        return Err(MapRegionError::NoReflections { d_min: first.d_min });
    }
    let binner = Binner::equal_count(first, bin_width);
    let stats = correlation_in_bins(first, second, &binner, None);
    let points = stats
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let (d_max, d_min) = binner.bin_d_range(i);
            let d_star = if d_max.is_finite() {
                0.5 * (1.0 / d_max + 1.0 / d_min)
            } else {
                1.0 / d_min
            };
            FscPoint {
                d_min,
                d_star,
                fsc: s.cc,
                n_refl: s.n_refl,
            }
        })
        .collect();
    Ok(FscCurve { points })
}

/// 每箱反射数：max(20, round(n_refl / n_bins))
pub fn bin_width_for(n_refl: usize, n_bins: usize) -> usize {
    let per_bin = (n_refl as f64 / n_bins.max(1) as f64).round() as usize;
    per_bin.max(20)
}

/// 实空间 Pearson 相关系数
pub fn map_map_cc(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mean_a = a.iter().take(n).sum::<f64>() / n as f64;
    let mean_b = b.iter().take(n).sum::<f64>() / n as f64;
    let mut sab = 0.0;
    let mut saa = 0.0;
    let mut sbb = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    let denom = (saa * sbb).sqrt();
    if denom > 0.0 {
        sab / denom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitCell;

    fn random_map(n: usize, seed: u64) -> Array3<f64> {
        let mut state = seed;
        Array3::from_shape_fn((n, n, n), |_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5
        })
    }

    #[test]
    fn test_identical_maps_fsc_is_one() {
        let data = random_map(12, 7);
        let cell = UnitCell::cubic(24.0);
        let c = MapCoefficients::from_map(&data, cell, 4.0, None);
        let curve = fsc_curve(&c, &c, 20).unwrap();
        assert!(curve.points.iter().all(|p| (p.fsc - 1.0).abs() < 1e-9));
        let d = curve.d_min_at_cutoff(DEFAULT_FSC_CUTOFF).unwrap();
        assert!((d - curve.finest_d().unwrap()).abs() < 1e-12);
        assert!((d - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_independent_noise_low_fsc() {
        let cell = UnitCell::cubic(24.0);
        let a = MapCoefficients::from_map(&random_map(12, 1), cell, 4.0, None);
        let b = MapCoefficients::from_map(&random_map(12, 2), cell, 4.0, None);
        let curve = fsc_curve(&a, &b, 100).unwrap();
        let mean_fsc: f64 =
            curve.points.iter().map(|p| p.fsc).sum::<f64>() / curve.points.len() as f64;
        assert!(mean_fsc.abs() < 0.2);
    }

    #[test]
    fn test_bin_width() {
        assert_eq!(bin_width_for(1000, 2000), 20);
        assert_eq!(bin_width_for(100000, 2000), 50);
    }

    #[test]
    fn test_map_map_cc() {
        let a = random_map(6, 3);
        let b = a.mapv(|v| 2.0 * v + 1.0);
        assert!((map_map_cc(&a, &b) - 1.0).abs() < 1e-9);
        let c = a.mapv(|v| -v);
        assert!((map_map_cc(&a, &c) + 1.0).abs() < 1e-9);
    }
}
