//! # 掩膜引擎
//!
//! 掩膜是 `is_mask == true` 的 `DensityMap`，值域 [0, 1]。
//!
//! ## 功能
//! - 构造：原子周围（硬/软）、盒子边缘（余弦过渡）、密度（按溶剂含量取阈值）、
//!   已有掩膜的膨胀、NCS 独立区域
//! - 应用：相乘、掩膜内均值混合、掩膜区域填充固定值
//!
//! ## 依赖关系
//! - 被 `local/`, `manager/` 使用
//! - 使用 `maps/density.rs`, `models/`

use crate::error::{MapRegionError, Result};
use crate::maps::density::gaussian_filter_data;
use crate::maps::DensityMap;
use crate::models::symmetry::distance;
use crate::models::{AtomicModel, NcsSpec};

use ndarray::{s, Array3};
use std::f64::consts::PI;

/// 掩膜构造参数
#[derive(Debug, Clone)]
pub struct MaskOptions {
    /// 原子周围的掩膜半径 (Å)
    pub atom_radius: f64,
    /// 软边宽度 (Å)；None 为硬掩膜
    pub soft_mask_radius: Option<f64>,
    /// 密度掩膜外（溶剂）所占比例
    pub solvent_content: f64,
    /// 膨胀半径 (Å)
    pub buffer_radius: f64,
}

impl Default for MaskOptions {
    fn default() -> Self {
        Self {
            atom_radius: 3.0,
            soft_mask_radius: None,
            solvent_content: 0.5,
            buffer_radius: 5.0,
        }
    }
}

fn as_mask(template: &DensityMap, data: Array3<f64>) -> Result<DensityMap> {
    let mut mask = template.customized_copy(data)?;
    mask.set_is_mask(true);
    mask.set_ncs(None);
    Ok(mask)
}

/// 高斯平滑；非周期的图先补零再平滑，避免值从对侧回绕进来
pub fn smooth(map: &DensityMap, radius: f64) -> Array3<f64> {
    if radius <= 0.0 {
        return map.data().clone();
    }
    let cell = map.crystal_symmetry().unit_cell;
    if map.wrapping() {
        return gaussian_filter_data(map.data(), &cell, radius);
    }
    let shape = map.shape();
    let spacing = map.grid_spacing();
    let pad: Vec<usize> = (0..3)
        .map(|i| (3.0 * radius / spacing[i]).ceil() as usize)
        .collect();
    let padded_shape = [
        shape[0] + 2 * pad[0],
        shape[1] + 2 * pad[1],
        shape[2] + 2 * pad[2],
    ];
    let mut padded = Array3::<f64>::zeros((padded_shape[0], padded_shape[1], padded_shape[2]));
    padded
        .slice_mut(s![
            pad[0]..pad[0] + shape[0],
            pad[1]..pad[1] + shape[1],
            pad[2]..pad[2] + shape[2]
        ])
        .assign(map.data());
    let padded_cell = cell.scaled([
        padded_shape[0] as f64 / shape[0] as f64,
        padded_shape[1] as f64 / shape[1] as f64,
        padded_shape[2] as f64 / shape[2] as f64,
    ]);
    let smoothed = gaussian_filter_data(&padded, &padded_cell, radius);
    smoothed
        .slice(s![
            pad[0]..pad[0] + shape[0],
            pad[1]..pad[1] + shape[1],
            pad[2]..pad[2] + shape[2]
        ])
        .to_owned()
}

// ─────────────────────────────────────────────────────────────
// 掩膜构造
// ─────────────────────────────────────────────────────────────

/// 原子周围的掩膜
///
/// 硬掩膜：距任一原子 `radius` 内为 1。软掩膜：先在 `radius + soft` 内取 1，
/// 再以 `soft` 为半径高斯平滑，截断到 [0, 1]。
pub fn create_mask_around_atoms(
    template: &DensityMap,
    model: &AtomicModel,
    radius: f64,
    soft_mask_radius: Option<f64>,
) -> Result<DensityMap> {
    let soft = soft_mask_radius.unwrap_or(0.0).max(0.0);
    let mut data = Array3::<f64>::zeros(template.data().dim());
    for atom in model.atoms() {
        template.for_each_point_near(&atom.xyz, radius + soft, |idx, _| data[idx] = 1.0);
    }
    let hard = as_mask(template, data)?;
    if soft <= 0.0 {
        return Ok(hard);
    }
    let smoothed = smooth(&hard, soft).mapv(|v| v.clamp(0.0, 1.0));
    as_mask(template, smoothed)
}

/// 盒子边缘的余弦过渡掩膜：距最近面 `soft_mask_radius` 以内从 0 升到 1
pub fn create_mask_around_edges(template: &DensityMap, soft_mask_radius: f64) -> Result<DensityMap> {
    let shape = template.shape();
    let spacing = template.grid_spacing();
    let data = Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(i, j, k)| {
        let idx = [i, j, k];
        let d = (0..3)
            .map(|a| idx[a].min(shape[a] - 1 - idx[a]) as f64 * spacing[a])
            .fold(f64::INFINITY, f64::min);
        if soft_mask_radius <= 0.0 || d >= soft_mask_radius {
            1.0
        } else {
            0.5 * (1.0 - (PI * d / soft_mask_radius).cos())
        }
    });
    as_mask(template, data)
}

/// 密度掩膜：以 `resolution` 平滑后，取使 `solvent_content` 比例的点落在外面的阈值
pub fn create_mask_around_density(
    map: &DensityMap,
    resolution: f64,
    solvent_content: f64,
) -> Result<DensityMap> {
    let smoothed = smooth(map, resolution);
    let mut values: Vec<f64> = smoothed.iter().cloned().collect();
    if values.is_empty() {
        return as_mask(map, smoothed);
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let fraction = solvent_content.clamp(0.0, 1.0);
    let cut = ((values.len() as f64 * fraction) as usize).min(values.len() - 1);
    let threshold = values[cut];
    let data = smoothed.mapv(|v| if v >= threshold { 1.0 } else { 0.0 });
    as_mask(map, data)
}

/// 掩膜向外膨胀 `buffer_radius`
pub fn expand_mask(mask: &DensityMap, buffer_radius: f64) -> Result<DensityMap> {
    if !mask.is_mask() {
        return Err(MapRegionError::NotAMask {
            id: "mask".to_string(),
        });
    }
    let shape = mask.shape();
    let src = mask.data();
    let mut data = src.mapv(|v| if v > 0.5 { 1.0 } else { 0.0 });
    for ((i, j, k), v) in src.indexed_iter() {
        if *v <= 0.5 {
            continue;
        }
        // 只有边界点需要膨胀
        let interior = [(1i64, 0i64, 0i64), (-1, 0, 0), (0, 1, 0), (0, -1, 0), (0, 0, 1), (0, 0, -1)]
            .iter()
            .all(|(di, dj, dk)| {
                let n = [i as i64 + di, j as i64 + dj, k as i64 + dk];
                (0..3).all(|a| n[a] >= 0 && n[a] < shape[a] as i64)
                    && src[[n[0] as usize, n[1] as usize, n[2] as usize]] > 0.5
            });
        if interior {
            continue;
        }
        let xyz = mask.site_cart([i, j, k]);
        mask.for_each_point_near(&xyz, buffer_radius, |idx, _| data[idx] = 1.0);
    }
    as_mask(mask, data)
}

/// NCS 独立区域：密度掩膜内的点按最近的 NCS 拷贝中心（密度最大值的各个像）划分，
/// 只保留属于恒等拷贝的点
pub fn create_mask_around_unique(
    map: &DensityMap,
    ncs: &NcsSpec,
    resolution: f64,
    solvent_content: f64,
) -> Result<DensityMap> {
    let density_mask = create_mask_around_density(map, resolution, solvent_content)?;
    if ncs.is_trivial() {
        return Ok(density_mask);
    }

    let smoothed = smooth(map, resolution);
    let mut best = ([0usize; 3], f64::NEG_INFINITY);
    for ((i, j, k), v) in smoothed.indexed_iter() {
        if density_mask.data()[[i, j, k]] > 0.5 && *v > best.1 {
            best = ([i, j, k], *v);
        }
    }
    let shift = map.shift_cart();
    let seed = map.site_cart(best.0);
    let centers: Vec<[f64; 3]> = ncs
        .operators()
        .iter()
        .map(|op| op.apply_in_frame(&seed, &shift))
        .collect();

    let mut data = density_mask.data().clone();
    for ((i, j, k), v) in data.indexed_iter_mut() {
        if *v <= 0.5 {
            continue;
        }
        let site = map.site_cart([i, j, k]);
        let nearest = centers
            .iter()
            .enumerate()
            .map(|(c, center)| (c, distance(&site, center)))
            .fold((0usize, f64::INFINITY), |acc, x| if x.1 < acc.1 { x } else { acc });
        if nearest.0 != 0 {
            *v = 0.0;
        }
    }
    as_mask(map, data)
}

// ─────────────────────────────────────────────────────────────
// 掩膜应用
// ─────────────────────────────────────────────────────────────

fn check_mask(map: &DensityMap, mask: &DensityMap) -> Result<()> {
    if !mask.is_mask() {
        return Err(MapRegionError::NotAMask {
            id: "mask".to_string(),
        });
    }
    if map.shape() != mask.shape() {
        return Err(MapRegionError::InvalidArgument(format!(
            "mask shape {:?} does not match map shape {:?}",
            mask.shape(),
            map.shape()
        )));
    }
    Ok(())
}

/// map × mask
pub fn apply_mask(map: &mut DensityMap, mask: &DensityMap) -> Result<()> {
    check_mask(map, mask)?;
    let m = mask.data();
    map.data_mut().zip_mut_with(m, |v, w| *v *= *w);
    Ok(())
}

/// m·v + (1 - m)·(掩膜内均值)
pub fn apply_mask_mean_inside(map: &mut DensityMap, mask: &DensityMap) -> Result<()> {
    check_mask(map, mask)?;
    let m = mask.data();
    let mut sum = 0.0;
    let mut weight = 0.0;
    for (v, w) in map.data().iter().zip(m.iter()) {
        sum += w * v;
        weight += w;
    }
    let mean_inside = if weight > 0.0 { sum / weight } else { 0.0 };
    map.data_mut()
        .zip_mut_with(m, |v, w| *v = *w * *v + (1.0 - *w) * mean_inside);
    Ok(())
}

/// 掩膜值大于 0.5 处填 `value`
pub fn fill_where_masked(map: &mut DensityMap, mask: &DensityMap, value: f64) -> Result<()> {
    check_mask(map, mask)?;
    map.data_mut().zip_mut_with(mask.data(), |v, w| {
        if *w > 0.5 {
            *v = value;
        }
    });
    Ok(())
}
