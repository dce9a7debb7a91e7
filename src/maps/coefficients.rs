//! # 傅里叶系数与分辨率分箱
//!
//! ## 功能
//! - `MapCoefficients`：到给定分辨率的 (hkl, d*², F) 列表，可回到实空间
//! - `Binner`：按 d*³ 等体积（或按反射数等宽）分箱，第 0 箱为最低分辨率
//! - 分箱插值（d*² 线性，端点外取端点值）
//! - `set_n_bins`：减少箱数直到所有箱非空
//! - 傅里叶重采样（粗格点 -> 细格点）
//!
//! ## 依赖关系
//! - 被 `maps/density.rs`, `maps/fsc.rs`, `local/` 使用
//! - 使用 `maps/fft.rs`

use crate::error::{MapRegionError, Result};
use crate::maps::fft;
use crate::models::symmetry::{dot, norm, UnitCell};

use ndarray::Array3;
use num_complex::Complex64;

/// 单个反射
#[derive(Debug, Clone, Copy)]
pub struct Reflection {
    pub hkl: [i32; 3],
    pub d_star_sq: f64,
    pub value: Complex64,
}

impl Reflection {
    pub fn d_spacing(&self) -> f64 {
        if self.d_star_sq > 0.0 {
            1.0 / self.d_star_sq.sqrt()
        } else {
            f64::INFINITY
        }
    }
}

/// 傅里叶系数集合（不含 F000）
#[derive(Debug, Clone)]
pub struct MapCoefficients {
    pub reflections: Vec<Reflection>,
    pub unit_cell: UnitCell,
    pub n_real: [usize; 3],
    pub d_min: f64,
}

impl MapCoefficients {
    /// 从实空间格点计算，保留 d_max >= d >= d_min 的反射
    pub fn from_map(
        data: &Array3<f64>,
        unit_cell: UnitCell,
        d_min: f64,
        d_max: Option<f64>,
    ) -> Self {
        let s = data.shape();
        let n_real = [s[0], s[1], s[2]];
        let coeffs = fft::forward(data);

        let max_d_star_sq = if d_min > 0.0 {
            1.0 / (d_min * d_min) * (1.0 + 1e-9)
        } else {
            f64::INFINITY
        };
        let min_d_star_sq = d_max.map_or(0.0, |d| 1.0 / (d * d) * (1.0 - 1e-9));

        let mut reflections = Vec::new();
        for ((i, j, k), value) in coeffs.indexed_iter() {
            if i == 0 && j == 0 && k == 0 {
                continue;
            }
            let hkl = [
                fft::index_to_miller(i, n_real[0]),
                fft::index_to_miller(j, n_real[1]),
                fft::index_to_miller(k, n_real[2]),
            ];
            let d_star_sq = unit_cell.d_star_sq(&hkl);
            if d_star_sq > max_d_star_sq || d_star_sq < min_d_star_sq {
                continue;
            }
            reflections.push(Reflection {
                hkl,
                d_star_sq,
                value: *value,
            });
        }

        MapCoefficients {
            reflections,
            unit_cell,
            n_real,
            d_min,
        }
    }

    pub fn len(&self) -> usize {
        self.reflections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reflections.is_empty()
    }

    /// 回到实空间（缺失反射视为 0）
    pub fn to_map(&self) -> Array3<f64> {
        let shape = (self.n_real[0], self.n_real[1], self.n_real[2]);
        let mut grid = Array3::<Complex64>::zeros(shape);
        for r in &self.reflections {
            let idx = [
                fft::miller_to_index(r.hkl[0], self.n_real[0]),
                fft::miller_to_index(r.hkl[1], self.n_real[1]),
                fft::miller_to_index(r.hkl[2], self.n_real[2]),
            ];
            grid[idx] = r.value;
        }
        fft::inverse(grid)
    }

    /// 同一组反射，替换为新值
    pub fn with_values(&self, values: &[Complex64]) -> MapCoefficients {
        let mut copy = self.clone();
        for (r, v) in copy.reflections.iter_mut().zip(values) {
            r.value = *v;
        }
        copy
    }

    /// 振幅乘以缩放因子，相位不变
    pub fn scaled(&self, factors: &[f64]) -> MapCoefficients {
        let mut copy = self.clone();
        for (r, f) in copy.reflections.iter_mut().zip(factors) {
            r.value *= *f;
        }
        copy
    }

    /// 只保留 `keep[i]` 为真的反射
    pub fn select(&self, keep: &[bool]) -> MapCoefficients {
        let mut copy = self.clone();
        copy.reflections = self
            .reflections
            .iter()
            .zip(keep)
            .filter(|(_, k)| **k)
            .map(|(r, _)| *r)
            .collect();
        copy
    }

    /// 每个反射在倒空间中的单位方向
    pub fn reciprocal_directions(&self) -> Vec<[f64; 3]> {
        self.reflections
            .iter()
            .map(|r| {
                let s = self.unit_cell.reciprocal_cart(&r.hkl);
                let n = norm(&s);
                if n > 0.0 {
                    [s[0] / n, s[1] / n, s[2] / n]
                } else {
                    [0.0; 3]
                }
            })
            .collect()
    }

    /// 反射方向与 `direction` 夹角余弦平方，用作各方向的权重
    pub fn direction_weights(&self, direction: &[f64; 3]) -> Vec<f64> {
        let n = norm(direction).max(1e-12);
        let unit = [direction[0] / n, direction[1] / n, direction[2] / n];
        self.reciprocal_directions()
            .iter()
            .map(|d| dot(d, &unit).powi(2))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────
// 分箱
// ─────────────────────────────────────────────────────────────

/// 分辨率分箱；`limits` 为升序 d* 边界（长度 n_bins + 1）
#[derive(Debug, Clone)]
pub struct Binner {
    limits: Vec<f64>,
    bin_of: Vec<usize>,
    counts: Vec<usize>,
}

impl Binner {
    /// d*³ 等体积分箱，范围取数据的最小/最大 d*
    pub fn equal_volume(coeffs: &MapCoefficients, n_bins: usize) -> Self {
        let n_bins = n_bins.max(1);
        let (lo, hi) = d_star_range(coeffs);
        let lo3 = lo.powi(3);
        let hi3 = hi.powi(3);
        let limits: Vec<f64> = (0..=n_bins)
            .map(|i| (lo3 + (hi3 - lo3) * i as f64 / n_bins as f64).cbrt())
            .collect();

        let bin_of: Vec<usize> = coeffs
            .reflections
            .iter()
            .map(|r| {
                let d_star3 = r.d_star_sq.sqrt().powi(3);
                let t = if hi3 > lo3 {
                    (d_star3 - lo3) / (hi3 - lo3)
                } else {
                    0.0
                };
                ((t * n_bins as f64).floor().max(0.0) as usize).min(n_bins - 1)
            })
            .collect();

        Self::from_assignment(limits, bin_of)
    }

    /// 按 d* 排序后每 `bin_width` 个反射一箱
    pub fn equal_count(coeffs: &MapCoefficients, bin_width: usize) -> Self {
        let bin_width = bin_width.max(1);
        let mut order: Vec<usize> = (0..coeffs.len()).collect();
        order.sort_by(|&a, &b| {
            coeffs.reflections[a]
                .d_star_sq
                .total_cmp(&coeffs.reflections[b].d_star_sq)
        });
        let n_bins = (order.len() / bin_width).max(1);

        let mut bin_of = vec![0usize; coeffs.len()];
        let mut limits = vec![0.0f64; n_bins + 1];
        for (rank, &idx) in order.iter().enumerate() {
            let bin = (rank / bin_width).min(n_bins - 1);
            bin_of[idx] = bin;
            let d_star = coeffs.reflections[idx].d_star_sq.sqrt();
            limits[bin + 1] = limits[bin + 1].max(d_star);
        }
        for i in 1..=n_bins {
            limits[i] = limits[i].max(limits[i - 1]);
        }
        Self::from_assignment(limits, bin_of)
    }

    fn from_assignment(limits: Vec<f64>, bin_of: Vec<usize>) -> Self {
        let n_bins = limits.len() - 1;
        let mut counts = vec![0usize; n_bins];
        for &b in &bin_of {
            counts[b] += 1;
        }
        Binner {
            limits,
            bin_of,
            counts,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    pub fn count(&self, bin: usize) -> usize {
        self.counts[bin]
    }

    pub fn bin_of(&self, reflection: usize) -> usize {
        self.bin_of[reflection]
    }

    /// 所有箱至少有一个反射
    pub fn all_bins_populated(&self) -> bool {
        self.counts.iter().all(|&c| c > 0)
    }

    /// 箱的 (d_max, d_min)；低分辨率端 d* 为 0 时 d_max 为无穷大
    pub fn bin_d_range(&self, bin: usize) -> (f64, f64) {
        let to_d = |s: f64| if s > 0.0 { 1.0 / s } else { f64::INFINITY };
        (to_d(self.limits[bin]), to_d(self.limits[bin + 1]))
    }

    /// 各箱高分辨率端 d
    pub fn d_min_list(&self) -> Vec<f64> {
        (0..self.n_bins()).map(|i| self.bin_d_range(i).1).collect()
    }

    /// 箱的平均 d（低分辨率端无界时取高分辨率端）
    pub fn mean_d(&self, bin: usize) -> f64 {
        let (d_1, d_2) = self.bin_d_range(bin);
        let d_1 = if d_1.is_finite() { d_1 } else { d_2 };
        0.5 * (d_1 + d_2)
    }

    /// 箱中心 d*²
    pub fn center_d_star_sq(&self, bin: usize) -> f64 {
        0.5 * (self.limits[bin].powi(2) + self.limits[bin + 1].powi(2))
    }

    /// 把每箱的值插值到每个反射（d*² 线性）
    pub fn interpolate(&self, values: &[f64], coeffs: &MapCoefficients) -> Vec<f64> {
        let n = self.n_bins().min(values.len());
        if n == 0 {
            return vec![1.0; coeffs.len()];
        }
        let centers: Vec<f64> = (0..n).map(|i| self.center_d_star_sq(i)).collect();
        coeffs
            .reflections
            .iter()
            .map(|r| {
                let x = r.d_star_sq;
                if x <= centers[0] {
                    return values[0];
                }
                if x >= centers[n - 1] {
                    return values[n - 1];
                }
                let hi = centers.partition_point(|&c| c < x).min(n - 1).max(1);
                let lo = hi - 1;
                let span = centers[hi] - centers[lo];
                if span <= 0.0 {
                    return values[lo];
                }
                let t = (x - centers[lo]) / span;
                values[lo] + t * (values[hi] - values[lo])
            })
            .collect()
    }
}

fn d_star_range(coeffs: &MapCoefficients) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi: f64 = 0.0;
    for r in &coeffs.reflections {
        let d_star = r.d_star_sq.sqrt();
        lo = lo.min(d_star);
        hi = hi.max(d_star);
    }
    if !lo.is_finite() {
        lo = 0.0;
    }
    // 边界稍微放宽，避免最大 d* 落在箱外
    (lo * (1.0 - 1e-9), hi * (1.0 + 1e-9))
}

/// 从 `n_bins` 开始递减，直到所有箱非空；低于 n_bins/3 时失败
pub fn set_n_bins(coeffs: &MapCoefficients, n_bins: usize, d_min: f64) -> Result<usize> {
    let min_n_bins = n_bins / 3;
    let mut n = n_bins;
    while n > min_n_bins && n > 0 {
        if Binner::equal_volume(coeffs, n).all_bins_populated() {
            return Ok(n);
        }
        n -= 1;
    }
    Err(MapRegionError::BinningFailed { n_bins, d_min })
}

/// 傅里叶重采样到新的格点（只保留粗格点能表达的非 Nyquist 项）
pub fn resample_fourier(data: &Array3<f64>, target: [usize; 3]) -> Array3<f64> {
    let s = data.shape().to_vec();
    let coeffs = fft::forward(data);
    let mut grid = Array3::<Complex64>::zeros((target[0], target[1], target[2]));
    for ((i, j, k), v) in coeffs.indexed_iter() {
        let hkl = [
            fft::index_to_miller(i, s[0]),
            fft::index_to_miller(j, s[1]),
            fft::index_to_miller(k, s[2]),
        ];
        let nyquist = (0..3).any(|a| s[a] % 2 == 0 && s[a] > 1 && hkl[a].abs() * 2 == s[a] as i32);
        let fits = (0..3).all(|a| (hkl[a].unsigned_abs() as usize) * 2 < target[a].max(1));
        if nyquist || !fits {
            continue;
        }
        let idx = [
            fft::miller_to_index(hkl[0], target[0]),
            fft::miller_to_index(hkl[1], target[1]),
            fft::miller_to_index(hkl[2], target[2]),
        ];
        grid[idx] = *v;
    }
    fft::inverse(grid)
}
