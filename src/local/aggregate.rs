//! # 稀疏样本 -> 全尺寸平滑场
//!
//! 1. 粗格点：间距 (V/n)^(1/3)，每轴 max(1, round(1.5·a/间距)) 个点
//! 2. 每个样本赋给最近的粗格点；冲突时取更近的样本，距离相同取位置字典序较小者
//! 3. 半径 0.5·k·间距 (k = 1..20) 逐步膨胀，填充尚未赋值的点（同样按距离 / 字典序）
//! 4. 其余点取默认值
//! 5. 傅里叶重采样到模板格点，再以 `smoothing_radius` 高斯平滑
//!
//! 结果与样本顺序无关。
//!
//! ## 依赖关系
//! - 被 `local/mod.rs`, `local/shells.rs` 使用
//! - 使用 `maps/`

use crate::error::Result;
use crate::maps::coefficients::resample_fourier;
use crate::maps::DensityMap;
use crate::models::symmetry::{add, distance, sub};
use crate::models::CrystalSymmetry;

use ndarray::Array3;
use std::cmp::Ordering;

/// 膨胀的最大迭代次数
const MAX_DILATION_STEPS: usize = 20;

/// 未覆盖格点的取值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Fixed(f64),
    /// 所有样本值的均值
    Mean,
}

/// 候选：(距离, 位置, 值)
type Candidate = (f64, [f64; 3], f64);

fn better(a: &Candidate, b: &Candidate) -> bool {
    let order = a
        .0
        .partial_cmp(&b.0)
        .filter(|o| *o != Ordering::Equal)
        .or_else(|| a.1.partial_cmp(&b.1).filter(|o| *o != Ordering::Equal))
        .or_else(|| a.2.partial_cmp(&b.2));
    order == Some(Ordering::Less)
}

/// 原始坐标系位置 -> 相对盒子第一个格点的工作坐标
pub fn relative_to_box(template: &DensityMap, location: &[f64; 3]) -> [f64; 3] {
    sub(&add(location, &template.shift_cart()), &template.site_cart([0, 0, 0]))
}

fn offer(slot: &mut Option<Candidate>, candidate: Candidate) {
    match slot {
        Some(current) if !better(&candidate, current) => {}
        _ => *slot = Some(candidate),
    }
}

/// 把 (原始坐标系位置, 值) 列表变成与 `template` 同格点的平滑图
pub fn create_map_with_value_list(
    template: &DensityMap,
    values: &[([f64; 3], f64)],
    smoothing_radius: f64,
    default_value: DefaultValue,
) -> Result<DensityMap> {
    let default = match default_value {
        DefaultValue::Fixed(v) => v,
        DefaultValue::Mean if values.is_empty() => 1.0,
        DefaultValue::Mean => values.iter().map(|v| v.1).sum::<f64>() / values.len() as f64,
    };
    if values.is_empty() {
        return template.customized_copy(Array3::from_elem(template.data().dim(), default));
    }

    let cell = template.crystal_symmetry().unit_cell;
    let target_spacing = (cell.volume() / values.len() as f64).cbrt();
    let lengths = cell.lengths();
    let n_real = [
        ((1.5 * lengths[0] / target_spacing).round() as usize).max(1),
        ((1.5 * lengths[1] / target_spacing).round() as usize).max(1),
        ((1.5 * lengths[2] / target_spacing).round() as usize).max(1),
    ];
    let coarse = DensityMap::new(
        Array3::zeros((n_real[0], n_real[1], n_real[2])),
        CrystalSymmetry::p1(cell),
    );

    let sites: Vec<([f64; 3], [f64; 3], f64)> = values
        .iter()
        .map(|(location, value)| (relative_to_box(template, location), *location, *value))
        .collect();

    let mut slots: Array3<Option<Candidate>> = Array3::from_elem(coarse.data().dim(), None);

    for (site, location, value) in &sites {
        let g = coarse.grid_position(site);
        let rounded = [g[0].round(), g[1].round(), g[2].round()];
        let point = cell.orthogonalize(&[
            rounded[0] / n_real[0] as f64,
            rounded[1] / n_real[1] as f64,
            rounded[2] / n_real[2] as f64,
        ]);
        let idx = [
            (rounded[0] as i64).rem_euclid(n_real[0] as i64) as usize,
            (rounded[1] as i64).rem_euclid(n_real[1] as i64) as usize,
            (rounded[2] as i64).rem_euclid(n_real[2] as i64) as usize,
        ];
        offer(&mut slots[idx], (distance(site, &point), *location, *value));
    }

    for k in 1..=MAX_DILATION_STEPS {
        if slots.iter().all(|s| s.is_some()) {
            break;
        }
        let radius = 0.5 * k as f64 * target_spacing;
        let mut fresh: Array3<Option<Candidate>> = Array3::from_elem(coarse.data().dim(), None);
        for (site, location, value) in &sites {
            coarse.for_each_point_near(site, radius, |idx, d| {
                if slots[idx].is_none() {
                    offer(&mut fresh[idx], (d, *location, *value));
                }
            });
        }
        for (slot, candidate) in slots.iter_mut().zip(fresh.iter()) {
            if slot.is_none() {
                *slot = *candidate;
            }
        }
    }

    let coarse_data = slots.mapv(|s| s.map_or(default, |c| c.2));
    let fine = resample_fourier(&coarse_data, template.shape());
    let map = template.customized_copy(fine)?;
    Ok(map.gaussian_filter(smoothing_radius))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitCell;

    fn template(n: usize, cell: f64) -> DensityMap {
        DensityMap::new(
            Array3::zeros((n, n, n)),
            CrystalSymmetry::p1(UnitCell::cubic(cell)),
        )
    }

    #[test]
    fn test_constant_values_give_constant_map() {
        let t = template(12, 24.0);
        let values: Vec<([f64; 3], f64)> = (0..8)
            .map(|i| {
                let x = if i & 1 == 0 { 6.0 } else { 18.0 };
                let y = if i & 2 == 0 { 6.0 } else { 18.0 };
                let z = if i & 4 == 0 { 6.0 } else { 18.0 };
                ([x, y, z], 2.5)
            })
            .collect();
        let map = create_map_with_value_list(&t, &values, 2.0, DefaultValue::Fixed(1.0)).unwrap();
        assert!(map.data().iter().all(|v| (v - 2.5).abs() < 1e-9));
    }

    #[test]
    fn test_order_independent() {
        let t = template(10, 20.0);
        let values = vec![
            ([5.0, 5.0, 5.0], 1.0),
            ([15.0, 5.0, 5.0], 2.0),
            ([5.0, 15.0, 5.0], 3.0),
            ([15.0, 15.0, 15.0], 4.0),
            // 与第一个样本重合，按字典序竞争
            ([5.0, 5.0, 5.0], 9.0),
        ];
        let mut reversed = values.clone();
        reversed.reverse();
        let a = create_map_with_value_list(&t, &values, 1.0, DefaultValue::Mean).unwrap();
        let b = create_map_with_value_list(&t, &reversed, 1.0, DefaultValue::Mean).unwrap();
        for (x, y) in a.data().iter().zip(b.data().iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_no_values_uses_default() {
        let t = template(6, 12.0);
        let map = create_map_with_value_list(&t, &[], 1.0, DefaultValue::Fixed(1.0)).unwrap();
        assert!(map.data().iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_values_follow_samples() {
        let t = template(16, 32.0);
        let mut values = Vec::new();
        for &y in &[8.0, 24.0] {
            for &z in &[8.0, 24.0] {
                values.push(([8.0, y, z], 1.0));
                values.push(([24.0, y, z], 3.0));
            }
        }
        let map = create_map_with_value_list(&t, &values, 0.0, DefaultValue::Mean).unwrap();
        assert!(map.data()[[4, 8, 8]] < map.data()[[12, 8, 8]]);
    }

    #[test]
    fn test_boxed_template_uses_original_frame() {
        let full = template(20, 20.0);
        let boxed = full.crop([10, 0, 0], [19, 19, 19]).unwrap();
        let rel = relative_to_box(&boxed, &[12.0, 3.0, 4.0]);
        assert!((rel[0] - 2.0).abs() < 1e-9);
        assert!((rel[1] - 3.0).abs() < 1e-9);
        assert!((rel[2] - 4.0).abs() < 1e-9);
    }
}
