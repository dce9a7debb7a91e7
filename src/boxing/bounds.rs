//! # 盒子边界
//!
//! 所有边界都在工作格点上（数据下标 + 图的 `origin`）。
//! 周期图的边界可以越出图；非周期图的边界截断到数据范围。
//!
//! ## 依赖关系
//! - 被 `boxing/planner.rs`, `manager/boxing.rs` 使用
//! - 使用 `maps/density.rs`

use crate::boxing::BoxSpec;
use crate::maps::DensityMap;

/// 覆盖整张图的盒子
pub fn whole_map(map: &DensityMap) -> BoxSpec {
    let o = map.origin();
    let s = map.shape();
    BoxSpec {
        lower: o,
        upper: [
            o[0] + s[0] as i64 - 1,
            o[1] + s[1] as i64 - 1,
            o[2] + s[2] as i64 - 1,
        ],
    }
}

/// 非周期图截断到数据范围
fn restrict_to_map(map: &DensityMap, b: BoxSpec) -> BoxSpec {
    if map.wrapping() {
        return b;
    }
    let whole = whole_map(map);
    let mut out = b;
    for i in 0..3 {
        out.lower[i] = b.lower[i].clamp(whole.lower[i], whole.upper[i]);
        out.upper[i] = b.upper[i].clamp(out.lower[i], whole.upper[i]);
    }
    out
}

/// 原子周围的盒子
///
/// lower = floor(最小格点位置 - 缓冲) - 1，upper = ceil(最大格点位置 + 缓冲) + 1。
/// 没有原子时返回整张图。
pub fn around_sites(map: &DensityMap, sites: &[[f64; 3]], cushion: f64) -> BoxSpec {
    if sites.is_empty() {
        return whole_map(map);
    }
    let spacing = map.grid_spacing();
    let origin = map.origin();
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for xyz in sites {
        let g = map.grid_position(xyz);
        for i in 0..3 {
            lo[i] = lo[i].min(g[i]);
            hi[i] = hi[i].max(g[i]);
        }
    }
    let mut b = BoxSpec {
        lower: [0; 3],
        upper: [0; 3],
    };
    for i in 0..3 {
        let cushion_grid = cushion / spacing[i];
        b.lower[i] = (lo[i] - cushion_grid).floor() as i64 - 1 + origin[i];
        b.upper[i] = (hi[i] + cushion_grid).ceil() as i64 + 1 + origin[i];
    }
    restrict_to_map(map, b)
}

/// 满足 `keep(value)` 的格点周围的盒子；没有满足的点时为 None
fn around_points<F>(map: &DensityMap, cushion: f64, keep: F) -> Option<BoxSpec>
where
    F: Fn(f64) -> bool,
{
    let mut lo = [i64::MAX; 3];
    let mut hi = [i64::MIN; 3];
    let mut found = false;
    for ((i, j, k), v) in map.data().indexed_iter() {
        if !keep(*v) {
            continue;
        }
        found = true;
        let idx = [i as i64, j as i64, k as i64];
        for a in 0..3 {
            lo[a] = lo[a].min(idx[a]);
            hi[a] = hi[a].max(idx[a]);
        }
    }
    if !found {
        return None;
    }
    let spacing = map.grid_spacing();
    let origin = map.origin();
    let mut b = BoxSpec {
        lower: [0; 3],
        upper: [0; 3],
    };
    for a in 0..3 {
        let c = (cushion / spacing[a]).ceil() as i64;
        b.lower[a] = lo[a] - c + origin[a];
        b.upper[a] = hi[a] + c + origin[a];
    }
    Some(restrict_to_map(map, b))
}

/// 盒子各面上格点的均值
pub fn edge_mean(map: &DensityMap) -> f64 {
    let s = map.shape();
    let mut sum = 0.0;
    let mut n = 0usize;
    for ((i, j, k), v) in map.data().indexed_iter() {
        if i == 0 || j == 0 || k == 0 || i + 1 == s[0] || j + 1 == s[1] || k + 1 == s[2] {
            sum += v;
            n += 1;
        }
    }
    if n > 0 {
        sum / n as f64
    } else {
        0.0
    }
}

/// 密度高于 边缘均值 + threshold·(最大值 - 边缘均值) 的区域
pub fn around_density(map: &DensityMap, threshold: f64, cushion: f64) -> Option<BoxSpec> {
    let base = edge_mean(map);
    let cut = base + threshold * (map.max_value() - base);
    around_points(map, cushion, |v| v > cut)
}

/// 掩膜值大于 0.5 的区域
pub fn around_mask(mask: &DensityMap, cushion: f64) -> Option<BoxSpec> {
    around_points(mask, cushion, |v| v > 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CrystalSymmetry, UnitCell};
    use ndarray::Array3;

    fn grid(n: usize, cell: f64) -> DensityMap {
        DensityMap::new(
            Array3::zeros((n, n, n)),
            CrystalSymmetry::p1(UnitCell::cubic(cell)),
        )
    }

    #[test]
    fn test_around_sites_padding_by_one() {
        // 间距 1 Å
        let map = grid(20, 20.0);
        let b = around_sites(&map, &[[5.0, 6.0, 7.0], [8.0, 8.0, 9.5]], 2.0);
        assert_eq!(b.lower, [2, 3, 4]);
        assert_eq!(b.upper, [11, 11, 13]);
    }

    #[test]
    fn test_around_sites_restricted_without_wrapping() {
        let mut map = grid(10, 10.0);
        map.set_wrapping(false);
        let b = around_sites(&map, &[[1.0, 1.0, 1.0]], 3.0);
        assert_eq!(b.lower, [0, 0, 0]);
        assert_eq!(b.upper, [5, 5, 5]);
        let empty = around_sites(&map, &[], 3.0);
        assert_eq!(empty, whole_map(&map));
    }

    #[test]
    fn test_around_density_and_mask() {
        let mut map = grid(12, 12.0);
        map.data_mut()[[4, 5, 6]] = 1.0;
        map.data_mut()[[6, 5, 6]] = 1.0;
        let b = around_density(&map, 0.05, 1.0).unwrap();
        assert_eq!(b.lower, [3, 4, 5]);
        assert_eq!(b.upper, [7, 6, 7]);

        map.set_is_mask(true);
        let m = around_mask(&map, 0.0).unwrap();
        assert_eq!(m.lower, [4, 5, 6]);
        assert_eq!(m.upper, [6, 5, 6]);

        let flat = grid(6, 6.0);
        assert!(around_density(&flat, 0.05, 1.0).is_none());
    }
}
