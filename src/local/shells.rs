//! # 壳层缩放
//!
//! ## 功能
//! - 全局：按分箱目标缩放因子（d*² 线性插值）乘振幅，相位不变
//! - 各向异性：Σ w·s / Σ w，w 为反射方向与各方向夹角余弦平方
//! - 谱形缩放：再乘以参考振幅曲线在箱平均 d 处的值
//! - 局部：Σ_箱 权重图 × 壳层图，权重图由各位置样本生成
//! - 各向异性局部：每个方向一个并行任务，部分结果写入临时目录，由主线程求和
//!
//! ## 依赖关系
//! - 被 `manager/sharpen.rs` 使用
//! - 使用 `local/aggregate.rs`, `maps/`, `utils/scratch.rs`

use crate::error::{MapRegionError, Result};
use crate::local::aggregate::{create_map_with_value_list, DefaultValue};
use crate::local::{DirectionScaleInfo, ScaleProfile};
use crate::maps::coefficients::{Binner, MapCoefficients};
use crate::maps::spectral::get_scale;
use crate::maps::DensityMap;
use crate::utils::scratch::ScratchDir;

use ndarray::Array3;
use rayon::prelude::*;
use std::path::Path;

/// 权重和的下限
const MIN_WEIGHT_SUM: f64 = 1e-10;

/// 每个反射的缩放因子；没有任何目标缩放因子时为 None
pub fn reflection_scale_factors(
    coeffs: &MapCoefficients,
    binner: &Binner,
    per_direction: &[DirectionScaleInfo],
    spectral: bool,
) -> Option<Vec<f64>> {
    let usable: Vec<&DirectionScaleInfo> = per_direction
        .iter()
        .filter(|info| info.target_scale_factors.is_some())
        .collect();
    if usable.is_empty() {
        return None;
    }

    let mut factors = if usable.iter().all(|info| info.direction.is_none()) {
        let targets = usable[0].target_scale_factors.as_deref()?;
        binner.interpolate(targets, coeffs)
    } else {
        let mut sum = vec![0.0; coeffs.len()];
        let mut weight = vec![0.0; coeffs.len()];
        for info in usable.iter().filter(|info| info.direction.is_some()) {
            let (direction, targets) = match (info.direction, info.target_scale_factors.as_deref()) {
                (Some(d), Some(t)) => (d, t),
                _ => continue,
            };
            let w = coeffs.direction_weights(&direction);
            let s = binner.interpolate(targets, coeffs);
            for i in 0..coeffs.len() {
                sum[i] += w[i] * s[i];
                weight[i] += w[i];
            }
        }
        sum.iter()
            .zip(&weight)
            .map(|(s, w)| s / w.max(MIN_WEIGHT_SUM))
            .collect()
    };

    if spectral {
        apply_spectral(&mut factors, binner);
    }
    Some(factors)
}

fn apply_spectral(factors: &mut [f64], binner: &Binner) {
    for (i, f) in factors.iter_mut().enumerate() {
        *f *= get_scale(binner.mean_d(binner.bin_of(i)));
    }
}

fn profile_coefficients(map: &DensityMap, profile: &ScaleProfile) -> Result<(MapCoefficients, Binner)> {
    let coeffs = map.map_as_fourier_coefficients(profile.d_min, None);
    if coeffs.is_empty() {
        return Err(MapRegionError::NoReflections { d_min: profile.d_min });
    }
    let binner = Binner::equal_volume(&coeffs, profile.n_bins);
    Ok((coeffs, binner))
}

/// 用第一个样本对整张图做壳层缩放
pub fn apply_global_scaling(map: &DensityMap, profile: &ScaleProfile, spectral: bool) -> Result<DensityMap> {
    let sample = profile
        .samples
        .first()
        .ok_or_else(|| MapRegionError::Other("No scale factors could be estimated".to_string()))?;
    let (coeffs, binner) = profile_coefficients(map, profile)?;
    let factors = reflection_scale_factors(&coeffs, &binner, &sample.per_direction, spectral)
        .ok_or_else(|| MapRegionError::Other("Scale factors are not usable".to_string()))?;
    map.fourier_coefficients_as_map(&coeffs.scaled(&factors))
}

/// 只含第 `bin` 箱的系数，可带每反射权重
fn shell_map(coeffs: &MapCoefficients, binner: &Binner, bin: usize, weights: Option<&[f64]>) -> Array3<f64> {
    let keep: Vec<bool> = (0..coeffs.len()).map(|i| binner.bin_of(i) == bin).collect();
    let shell = match weights {
        Some(w) => coeffs.scaled(w),
        None => coeffs.clone(),
    };
    shell.select(&keep).to_map()
}

/// 一个方向（或各向同性，`direction_index` 为 0）的 Σ_箱 权重图 × 壳层图
#[allow(clippy::too_many_arguments)]
fn weighted_shell_sum(
    map: &DensityMap,
    profile: &ScaleProfile,
    coeffs: &MapCoefficients,
    binner: &Binner,
    direction_index: usize,
    reflection_weights: Option<&[f64]>,
    smoothing_radius: f64,
    spectral: bool,
) -> Result<Array3<f64>> {
    let mut total = Array3::<f64>::zeros(map.data().dim());
    for bin in 0..binner.n_bins() {
        let values: Vec<([f64; 3], f64)> = profile
            .samples
            .iter()
            .filter_map(|s| {
                let info = s.per_direction.get(direction_index)?;
                let targets = info.target_scale_factors.as_ref()?;
                targets.get(bin).map(|v| (s.location, *v))
            })
            .collect();
        let mut weight_map =
            create_map_with_value_list(map, &values, smoothing_radius, DefaultValue::Fixed(1.0))?;
        if spectral {
            let scale = get_scale(binner.mean_d(bin));
            weight_map.data_mut().mapv_inplace(|v| v * scale);
        }
        let shell = shell_map(coeffs, binner, bin, reflection_weights);
        total.zip_mut_with(&(weight_map.data() * &shell), |t, v| *t += *v);
    }
    Ok(total)
}

/// 局部壳层缩放
///
/// 各向异性时每个方向的部分结果写入 `scratch_parent` 下的临时目录，
/// 返回前目录被删除。
pub fn apply_local_scaling(
    map: &DensityMap,
    profile: &ScaleProfile,
    smoothing_radius: f64,
    spectral: bool,
    scratch_parent: &Path,
) -> Result<DensityMap> {
    if profile.samples.is_empty() {
        return Err(MapRegionError::Other(
            "No local scale factors could be estimated".to_string(),
        ));
    }
    let (coeffs, binner) = profile_coefficients(map, profile)?;

    let directions = match &profile.directions {
        None => {
            let data = weighted_shell_sum(map, profile, &coeffs, &binner, 0, None, smoothing_radius, spectral)?;
            return map.customized_copy(data);
        }
        Some(d) => d.clone(),
    };

    // 每个反射在各方向上的归一化权重
    let raw: Vec<Vec<f64>> = directions.iter().map(|d| coeffs.direction_weights(d)).collect();
    let mut sums = vec![0.0; coeffs.len()];
    for w in &raw {
        for (s, v) in sums.iter_mut().zip(w) {
            *s += v;
        }
    }
    let normalized: Vec<Vec<f64>> = raw
        .iter()
        .map(|w| w.iter().zip(&sums).map(|(v, s)| v / s.max(MIN_WEIGHT_SUM)).collect())
        .collect();

    let scratch = ScratchDir::create_in(scratch_parent)?;
    log::debug!("Anisotropic partial maps in {}", scratch.path().display());

    let names: Vec<String> = (0..directions.len())
        .into_par_iter()
        .map(|k| -> Result<String> {
            let partial = weighted_shell_sum(
                map,
                profile,
                &coeffs,
                &binner,
                k,
                Some(&normalized[k]),
                smoothing_radius,
                spectral,
            )?;
            let name = format!("direction_{}.bin", k);
            let flat: Vec<f64> = partial.iter().cloned().collect();
            scratch.write_values(&name, &flat)?;
            Ok(name)
        })
        .collect::<Result<Vec<_>>>()?;

    let n = map.data().len();
    let mut total = vec![0.0; n];
    for name in &names {
        let values = scratch.read_values(name, n)?;
        for (t, v) in total.iter_mut().zip(&values) {
            *t += v;
        }
    }
    let shape = map.data().dim();
    let data = Array3::from_shape_vec(shape, total)
        .map_err(|e| MapRegionError::Other(format!("partial map shape: {}", e)))?;
    map.customized_copy(data)
}
