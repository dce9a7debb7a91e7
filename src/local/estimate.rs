//! # 分辨率壳层缩放因子估计
//!
//! 对一组傅里叶系数（整张图或一个盒子）逐箱估计目标缩放因子。
//!
//! ## 步骤
//! 1. 参考相关：半图模式为 sqrt(2c/(1+c))（c 为两半图 FSC），
//!    模型 / 外部图模式为与参考图的相关 c
//! 2. 最后一个相关不低于 `cc_cut` 的箱之后，相关截断到 `max_cc_for_rescale`
//! 3. `equalize_power`：除以箱内振幅均方根，使各箱功率一致
//! 4. 以第 0 箱归一化，截断到 [0, `maximum_scale_factor`]
//! 5. `optimize_b_eff`：用 ln(s) = a + b·d*² 的最小二乘拟合替换
//!
//! 任何一箱没有反射时不产生结果；模型模式下低分辨率相关低于
//! `minimum_low_res_cc` 时该方向没有目标缩放因子。
//!
//! ## 依赖关系
//! - 被 `local/mod.rs` 使用
//! - 使用 `maps/coefficients.rs`, `maps/fsc.rs`

use crate::local::DirectionScaleInfo;
use crate::maps::coefficients::{Binner, MapCoefficients};
use crate::maps::fsc::correlation_in_bins;

use std::f64::consts::PI;
use std::fmt;

/// 参考信号来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingMode {
    /// 两张独立半图
    HalfMaps,
    /// 由原子模型计算的图
    Model,
    /// 外部参考图
    External,
}

impl fmt::Display for ScalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingMode::HalfMaps => write!(f, "half-maps"),
            ScalingMode::Model => write!(f, "model"),
            ScalingMode::External => write!(f, "external"),
        }
    }
}

/// 估计参数
#[derive(Debug, Clone)]
pub struct ScalingOptions {
    pub equalize_power: bool,
    /// None 时模型模式开启，其余关闭
    pub optimize_b_eff: Option<bool>,
    pub cc_cut: f64,
    pub max_cc_for_rescale: f64,
    pub maximum_scale_factor: f64,
    pub minimum_low_res_cc: f64,
    /// 模型坐标误差 (Å)，限制高分辨率权重
    pub rmsd: Option<f64>,
}

impl Default for ScalingOptions {
    fn default() -> Self {
        Self {
            equalize_power: true,
            optimize_b_eff: None,
            cc_cut: 0.2,
            max_cc_for_rescale: 0.2,
            maximum_scale_factor: 10.0,
            minimum_low_res_cc: 0.35,
            rmsd: None,
        }
    }
}

/// 估计一个方向（None 为各向同性）的缩放因子
///
/// `first`/`second` 是用于相关的两组系数（两张半图，或主图与参考图），
/// `primary` 是将被缩放的系数，三者反射顺序一致。
pub fn estimate_scale_factors(
    primary: &MapCoefficients,
    first: &MapCoefficients,
    second: &MapCoefficients,
    binner: &Binner,
    mode: ScalingMode,
    direction: Option<[f64; 3]>,
    options: &ScalingOptions,
) -> Option<DirectionScaleInfo> {
    if !binner.all_bins_populated() {
        return None;
    }
    let n_bins = binner.n_bins();
    let weights = direction.map(|d| primary.direction_weights(&d));
    let weights = weights.as_deref();

    let correlation = correlation_in_bins(first, second, binner, weights);
    let power = correlation_in_bins(primary, primary, binner, weights);
    let cc_per_bin: Vec<f64> = correlation.iter().map(|s| s.cc).collect();

    let mut reference: Vec<f64> = cc_per_bin
        .iter()
        .map(|&cc| {
            let c = cc.max(0.0);
            match mode {
                ScalingMode::HalfMaps => (2.0 * c / (1.0 + c)).sqrt(),
                ScalingMode::Model | ScalingMode::External => c,
            }
        })
        .collect();

    if let Some(last_good) = reference.iter().rposition(|&c| c >= options.cc_cut) {
        for c in reference.iter_mut().skip(last_good + 1) {
            *c = c.min(options.max_cc_for_rescale);
        }
    }

    if let (ScalingMode::Model, Some(rmsd)) = (mode, options.rmsd) {
        for (b, c) in reference.iter_mut().enumerate() {
            let d_star_sq = binner.center_d_star_sq(b);
            let limit = (-2.0 * PI * PI / 3.0 * rmsd * rmsd * d_star_sq).exp();
            *c = c.min(limit);
        }
    }

    let mut target: Vec<f64> = reference
        .iter()
        .zip(&power)
        .map(|(&c, p)| {
            if options.equalize_power {
                let rms = p.mean_sq_1.sqrt();
                if rms > 0.0 {
                    c / rms
                } else {
                    0.0
                }
            } else {
                c
            }
        })
        .collect();
    normalize(&mut target, options.maximum_scale_factor);

    let optimize_b_eff = options
        .optimize_b_eff
        .unwrap_or(mode == ScalingMode::Model);
    if optimize_b_eff {
        if let Some((a, b)) = fit_log_linear(&target, binner) {
            for (i, t) in target.iter_mut().enumerate() {
                *t = (a + b * binner.center_d_star_sq(i)).exp();
            }
            normalize(&mut target, options.maximum_scale_factor);
        }
    }

    let n_low = (n_bins / 4).max(1);
    let low_res_cc = cc_per_bin.iter().take(n_low).sum::<f64>() / n_low as f64;
    let usable = mode != ScalingMode::Model || low_res_cc >= options.minimum_low_res_cc;

    Some(DirectionScaleInfo {
        direction,
        target_scale_factors: if usable { Some(target) } else { None },
        bin_d_min: binner.d_min_list(),
        cc_per_bin,
        low_res_cc,
    })
}

/// 第 0 箱归一化并截断
fn normalize(target: &mut [f64], maximum: f64) {
    let first = target.first().copied().unwrap_or(0.0);
    for t in target.iter_mut() {
        if first > 0.0 {
            *t /= first;
        }
        *t = t.clamp(0.0, maximum);
    }
}

/// ln(s) = a + b·d*² 的最小二乘拟合，只用 s > 0 的箱
fn fit_log_linear(target: &[f64], binner: &Binner) -> Option<(f64, f64)> {
    let points: Vec<(f64, f64)> = target
        .iter()
        .enumerate()
        .filter(|(_, t)| **t > 0.0)
        .map(|(i, &t)| (binner.center_d_star_sq(i), t.ln()))
        .collect();
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let sx: f64 = points.iter().map(|p| p.0).sum();
    let sy: f64 = points.iter().map(|p| p.1).sum();
    let sxx: f64 = points.iter().map(|p| p.0 * p.0).sum();
    let sxy: f64 = points.iter().map(|p| p.0 * p.1).sum();
    let denom = n * sxx - sx * sx;
    if denom.abs() < 1e-20 {
        return None;
    }
    let b = (n * sxy - sx * sy) / denom;
    let a = (sy - b * sx) / n;
    Some((a, b))
}

/// 各向异性方向：三个坐标轴、三个体对角方向、六个面对角方向，均为单位向量
pub fn direction_vectors() -> Vec<[f64; 3]> {
    let raw: [[f64; 3]; 12] = [
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [-1.0, 1.0, 1.0],
        [1.0, -1.0, 1.0],
        [1.0, 1.0, -1.0],
        [1.0, 1.0, 0.0],
        [1.0, 0.0, 1.0],
        [0.0, 1.0, 1.0],
        [1.0, -1.0, 0.0],
        [1.0, 0.0, -1.0],
        [0.0, 1.0, -1.0],
    ];
    raw.iter()
        .map(|v| {
            let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            [v[0] / n, v[1] / n, v[2] / n]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitCell;
    use ndarray::Array3;

    fn wavy_map(n: usize, seed: u64) -> Array3<f64> {
        let mut state = seed;
        Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let noise = ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5;
            (i as f64 * 0.8).sin() + (j as f64 * 0.5).cos() + (k as f64 * 1.3).sin() + noise
        })
    }

    fn coeffs(data: &Array3<f64>) -> MapCoefficients {
        MapCoefficients::from_map(data, UnitCell::cubic(32.0), 4.0, None)
    }

    #[test]
    fn test_identical_half_maps_equalize_power() {
        let data = wavy_map(16, 3);
        let c = coeffs(&data);
        let binner = Binner::equal_volume(&c, 6);
        let info = estimate_scale_factors(
            &c,
            &c,
            &c,
            &binner,
            ScalingMode::HalfMaps,
            None,
            &ScalingOptions::default(),
        )
        .unwrap();
        let target = info.target_scale_factors.unwrap();
        assert_eq!(target.len(), 6);
        assert!((target[0] - 1.0).abs() < 1e-12);
        assert!(target.iter().all(|t| *t >= 0.0 && *t <= 10.0));
        assert!(info.cc_per_bin.iter().all(|cc| (cc - 1.0).abs() < 1e-9));
        // 功率均衡后，缩放后的各箱均方根一致
        let rms0 = info_rms(&c, &binner, 0);
        for b in 1..6 {
            let scaled = info_rms(&c, &binner, b) * target[b];
            assert!((scaled - rms0).abs() / rms0 < 1e-6 || target[b] == 10.0);
        }
    }

    fn info_rms(c: &MapCoefficients, binner: &Binner, bin: usize) -> f64 {
        let stats = correlation_in_bins(c, c, binner, None);
        stats[bin].mean_sq_1.sqrt()
    }

    #[test]
    fn test_empty_bin_gives_no_sample() {
        let data = wavy_map(4, 1);
        let c = MapCoefficients::from_map(&data, UnitCell::cubic(8.0), 4.0, None);
        let binner = Binner::equal_volume(&c, 50);
        assert!(!binner.all_bins_populated());
        let info = estimate_scale_factors(
            &c,
            &c,
            &c,
            &binner,
            ScalingMode::HalfMaps,
            None,
            &ScalingOptions::default(),
        );
        assert!(info.is_none());
    }

    #[test]
    fn test_model_mode_requires_low_res_cc() {
        let a = coeffs(&wavy_map(16, 1));
        let b = coeffs(&wavy_map(16, 1).mapv(|v| -v));
        let binner = Binner::equal_volume(&a, 5);
        let info = estimate_scale_factors(
            &a,
            &a,
            &b,
            &binner,
            ScalingMode::Model,
            None,
            &ScalingOptions::default(),
        )
        .unwrap();
        assert!(info.low_res_cc < 0.0);
        assert!(info.target_scale_factors.is_none());

        let good = estimate_scale_factors(
            &a,
            &a,
            &a,
            &binner,
            ScalingMode::Model,
            None,
            &ScalingOptions::default(),
        )
        .unwrap();
        // optimize_b_eff：拟合后 ln(s) 对 d*² 线性
        let t = good.target_scale_factors.unwrap();
        let x: Vec<f64> = (0..5).map(|i| binner.center_d_star_sq(i)).collect();
        let slope1 = (t[2].ln() - t[1].ln()) / (x[2] - x[1]);
        let slope2 = (t[4].ln() - t[3].ln()) / (x[4] - x[3]);
        assert!((slope1 - slope2).abs() < 1e-6 || t.iter().any(|v| *v >= 10.0));
    }

    #[test]
    fn test_direction_vectors() {
        let dv = direction_vectors();
        assert_eq!(dv.len(), 12);
        for v in &dv {
            assert!(((v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt() - 1.0).abs() < 1e-12);
        }
        assert_eq!(dv[0], [1.0, 0.0, 0.0]);
    }
}
