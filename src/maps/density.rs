//! # 密度图
//!
//! `DensityMap` 持有实空间格点数据、完整晶胞对称性、原点平移记录
//! （格点单位）、边界策略（周期/有界）以及可选的 NCS 描述。
//!
//! ## 坐标约定
//! - `origin`：`data[[0,0,0]]` 在工作坐标系中的格点下标
//! - `origin_shift_grid_units`：工作格点 + 该值 = 原始晶胞格点
//! - `shift_cart = -orthogonalize(origin_shift / unit_cell_grid)`，
//!   即工作坐标 = 原始坐标 + shift_cart
//!
//! 所有改变尺寸的操作都返回新的实例，携带更新后的 `origin_shift_grid_units`。
//!
//! ## 依赖关系
//! - 被 `boxing/`, `masking/`, `local/`, `manager/`, `parsers/ccp4.rs` 使用
//! - 使用 `maps/fft.rs`, `maps/coefficients.rs`, `models/`

use crate::error::{MapRegionError, Result};
use crate::maps::coefficients::MapCoefficients;
use crate::maps::fft;
use crate::models::symmetry::{sub, CrystalSymmetry, ShiftRecord, UnitCell};
use crate::models::NcsSpec;

use ndarray::Array3;

/// 实空间密度图
#[derive(Debug, Clone)]
pub struct DensityMap {
    data: Array3<f64>,
    origin: [i64; 3],
    origin_shift_grid_units: [i64; 3],
    unit_cell_grid: [usize; 3],
    unit_cell_symmetry: CrystalSymmetry,
    wrapping: bool,
    ncs: Option<NcsSpec>,
    is_mask: bool,
    resolution: Option<f64>,
}

impl DensityMap {
    /// 覆盖完整晶胞的图，原点在 (0,0,0)，周期边界
    pub fn new(data: Array3<f64>, unit_cell_symmetry: CrystalSymmetry) -> Self {
        let s = data.shape();
        let unit_cell_grid = [s[0], s[1], s[2]];
        DensityMap {
            data,
            origin: [0; 3],
            origin_shift_grid_units: [0; 3],
            unit_cell_grid,
            unit_cell_symmetry,
            wrapping: true,
            ncs: None,
            is_mask: false,
            resolution: None,
        }
    }

    /// 晶胞中的一部分，`origin` 为数据起点在晶胞格点中的位置（如 CCP4 nxstart）
    pub fn from_region(
        data: Array3<f64>,
        origin: [i64; 3],
        unit_cell_grid: [usize; 3],
        unit_cell_symmetry: CrystalSymmetry,
    ) -> Self {
        let s = data.shape();
        let full = [s[0], s[1], s[2]] == unit_cell_grid && origin == [0; 3];
        DensityMap {
            data,
            origin,
            origin_shift_grid_units: [0; 3],
            unit_cell_grid,
            unit_cell_symmetry,
            wrapping: full,
            ncs: None,
            is_mask: false,
            resolution: None,
        }
    }

    // ─────────────────────────────────────────────────────────────
    // 访问器
    // ─────────────────────────────────────────────────────────────

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    pub fn shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }

    pub fn origin(&self) -> [i64; 3] {
        self.origin
    }

    pub fn origin_shift_grid_units(&self) -> [i64; 3] {
        self.origin_shift_grid_units
    }

    pub fn unit_cell_grid(&self) -> [usize; 3] {
        self.unit_cell_grid
    }

    pub fn unit_cell_crystal_symmetry(&self) -> &CrystalSymmetry {
        &self.unit_cell_symmetry
    }

    pub fn unit_cell(&self) -> &UnitCell {
        &self.unit_cell_symmetry.unit_cell
    }

    pub fn wrapping(&self) -> bool {
        self.wrapping
    }

    /// 只有覆盖完整晶胞的图才能周期化
    pub fn set_wrapping(&mut self, wrapping: bool) {
        self.wrapping = wrapping && self.is_full_cell();
    }

    pub fn is_mask(&self) -> bool {
        self.is_mask
    }

    pub fn set_is_mask(&mut self, is_mask: bool) {
        self.is_mask = is_mask;
    }

    pub fn ncs(&self) -> Option<&NcsSpec> {
        self.ncs.as_ref()
    }

    pub fn set_ncs(&mut self, ncs: Option<NcsSpec>) {
        self.ncs = ncs;
    }

    /// 名义分辨率；未设置时取 2 倍最大格点间距
    pub fn resolution(&self) -> f64 {
        self.resolution.unwrap_or_else(|| self.nyquist_resolution())
    }

    pub fn set_resolution(&mut self, resolution: Option<f64>) {
        self.resolution = resolution;
    }

    /// 格点能表达的最高分辨率
    pub fn nyquist_resolution(&self) -> f64 {
        2.0 * self.grid_spacing().iter().cloned().fold(0.0, f64::max)
    }

    /// 各轴格点间距 (Å)
    pub fn grid_spacing(&self) -> [f64; 3] {
        let l = self.unit_cell().lengths();
        let n = self.unit_cell_grid;
        [
            l[0] / n[0] as f64,
            l[1] / n[1] as f64,
            l[2] / n[2] as f64,
        ]
    }

    /// 是否覆盖完整晶胞且原点在 0
    pub fn is_full_cell(&self) -> bool {
        self.shape() == self.unit_cell_grid && self.origin == [0; 3]
    }

    /// 工作对称性：完整晶胞按 盒子/晶胞 格点比缩放，P 1
    pub fn crystal_symmetry(&self) -> CrystalSymmetry {
        let shape = self.shape();
        if shape == self.unit_cell_grid {
            return self.unit_cell_symmetry.clone();
        }
        let factors = [
            shape[0] as f64 / self.unit_cell_grid[0] as f64,
            shape[1] as f64 / self.unit_cell_grid[1] as f64,
            shape[2] as f64 / self.unit_cell_grid[2] as f64,
        ];
        CrystalSymmetry::p1(self.unit_cell().scaled(factors))
    }

    /// 工作坐标 = 原始坐标 + shift_cart
    pub fn shift_cart(&self) -> [f64; 3] {
        let frac = [
            -(self.origin_shift_grid_units[0] as f64) / self.unit_cell_grid[0] as f64,
            -(self.origin_shift_grid_units[1] as f64) / self.unit_cell_grid[1] as f64,
            -(self.origin_shift_grid_units[2] as f64) / self.unit_cell_grid[2] as f64,
        ];
        self.unit_cell().orthogonalize(&frac)
    }

    pub fn shift_record(&self) -> ShiftRecord {
        ShiftRecord {
            shift_cart: self.shift_cart(),
            unit_cell_symmetry: self.unit_cell_symmetry.clone(),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // 坐标换算
    // ─────────────────────────────────────────────────────────────

    /// 数据下标 -> 工作坐标系笛卡尔坐标
    pub fn site_cart(&self, index: [usize; 3]) -> [f64; 3] {
        let frac = [
            (index[0] as i64 + self.origin[0]) as f64 / self.unit_cell_grid[0] as f64,
            (index[1] as i64 + self.origin[1]) as f64 / self.unit_cell_grid[1] as f64,
            (index[2] as i64 + self.origin[2]) as f64 / self.unit_cell_grid[2] as f64,
        ];
        self.unit_cell().orthogonalize(&frac)
    }

    /// 工作坐标 -> 数据下标（连续值）
    pub fn grid_position(&self, xyz: &[f64; 3]) -> [f64; 3] {
        let frac = self.unit_cell().fractionalize(xyz);
        [
            frac[0] * self.unit_cell_grid[0] as f64 - self.origin[0] as f64,
            frac[1] * self.unit_cell_grid[1] as f64 - self.origin[1] as f64,
            frac[2] * self.unit_cell_grid[2] as f64 - self.origin[2] as f64,
        ]
    }

    /// 盒子中心（工作坐标）
    pub fn center_cart(&self) -> [f64; 3] {
        let s = self.shape();
        let frac = [
            (self.origin[0] as f64 + (s[0] as f64 - 1.0) * 0.5) / self.unit_cell_grid[0] as f64,
            (self.origin[1] as f64 + (s[1] as f64 - 1.0) * 0.5) / self.unit_cell_grid[1] as f64,
            (self.origin[2] as f64 + (s[2] as f64 - 1.0) * 0.5) / self.unit_cell_grid[2] as f64,
        ];
        self.unit_cell().orthogonalize(&frac)
    }

    /// 盒子中心（原始坐标系）
    pub fn absolute_center_cart(&self) -> [f64; 3] {
        sub(&self.center_cart(), &self.shift_cart())
    }

    /// 对半径 `radius` 内的每个格点调用 `f(下标, 距离)`
    ///
    /// 周期图按晶胞回绕，否则忽略盒子外的点。
    pub fn for_each_point_near<F>(&self, xyz: &[f64; 3], radius: f64, mut f: F)
    where
        F: FnMut([usize; 3], f64),
    {
        let shape = self.shape();
        let center = self.grid_position(xyz);
        let recip = self.unit_cell().reciprocal_vectors();
        let mut extent = [0i64; 3];
        let mut lo = [0i64; 3];
        for i in 0..3 {
            let recip_len = crate::models::symmetry::norm(&recip[i]);
            extent[i] = (radius * recip_len * self.unit_cell_grid[i] as f64).ceil() as i64 + 1;
            lo[i] = center[i].round() as i64 - extent[i];
        }
        let wrap = self.wrapping && self.is_full_cell();
        let radius_sq = radius * radius;

        for di in 0..=(2 * extent[0]) {
            for dj in 0..=(2 * extent[1]) {
                for dk in 0..=(2 * extent[2]) {
                    let g = [lo[0] + di, lo[1] + dj, lo[2] + dk];
                    let frac = [
                        (g[0] + self.origin[0]) as f64 / self.unit_cell_grid[0] as f64,
                        (g[1] + self.origin[1]) as f64 / self.unit_cell_grid[1] as f64,
                        (g[2] + self.origin[2]) as f64 / self.unit_cell_grid[2] as f64,
                    ];
                    let site = self.unit_cell().orthogonalize(&frac);
                    let d = sub(&site, xyz);
                    let dist_sq = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
                    if dist_sq > radius_sq {
                        continue;
                    }
                    let index = if wrap {
                        [
                            g[0].rem_euclid(shape[0] as i64) as usize,
                            g[1].rem_euclid(shape[1] as i64) as usize,
                            g[2].rem_euclid(shape[2] as i64) as usize,
                        ]
                    } else {
                        if (0..3).any(|i| g[i] < 0 || g[i] >= shape[i] as i64) {
                            continue;
                        }
                        [g[0] as usize, g[1] as usize, g[2] as usize]
                    };
                    f(index, dist_sq.sqrt());
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // 拷贝与比较
    // ─────────────────────────────────────────────────────────────

    /// 同一框架下替换数据（形状必须一致）
    pub fn customized_copy(&self, data: Array3<f64>) -> Result<DensityMap> {
        if data.shape() != self.data.shape() {
            return Err(MapRegionError::InvalidArgument(format!(
                "customized_copy: shape {:?} does not match map shape {:?}",
                data.shape(),
                self.data.shape()
            )));
        }
        let mut copy = self.clone();
        copy.data = data;
        copy.is_mask = false;
        Ok(copy)
    }

    /// 同一晶胞、同一格点、同一工作框架
    pub fn is_similar(&self, other: &DensityMap, angle_tol: f64, length_tol: f64) -> bool {
        self.unit_cell_symmetry
            .is_similar(&other.unit_cell_symmetry, angle_tol, length_tol)
            && self.unit_cell_grid == other.unit_cell_grid
            && self.shape() == other.shape()
            && self.origin == other.origin
            && self.origin_shift_grid_units == other.origin_shift_grid_units
    }

    pub fn is_similar_default(&self, other: &DensityMap) -> bool {
        self.is_similar(
            other,
            CrystalSymmetry::ANGLE_TOLERANCE,
            CrystalSymmetry::LENGTH_TOLERANCE,
        )
    }

    // ─────────────────────────────────────────────────────────────
    // 裁剪与原点
    // ─────────────────────────────────────────────────────────────

    /// 裁剪到工作格点 [lower, upper]（含两端）
    ///
    /// 盒子外的点：周期图按晶胞回绕，否则填 0。
    pub fn crop(&self, lower: [i64; 3], upper: [i64; 3]) -> Result<DensityMap> {
        if (0..3).any(|i| lower[i] > upper[i]) {
            return Err(MapRegionError::InvalidRange(format!(
                "lower bounds {:?} exceed upper bounds {:?}",
                lower, upper
            )));
        }
        let new_shape = (
            (upper[0] - lower[0] + 1) as usize,
            (upper[1] - lower[1] + 1) as usize,
            (upper[2] - lower[2] + 1) as usize,
        );
        let shape = self.shape();
        let wrap = self.wrapping && self.is_full_cell();
        let origin = self.origin;
        let data = Array3::from_shape_fn(new_shape, |(i, j, k)| {
            let g = [
                lower[0] + i as i64 - origin[0],
                lower[1] + j as i64 - origin[1],
                lower[2] + k as i64 - origin[2],
            ];
            if wrap {
                self.data[[
                    g[0].rem_euclid(shape[0] as i64) as usize,
                    g[1].rem_euclid(shape[1] as i64) as usize,
                    g[2].rem_euclid(shape[2] as i64) as usize,
                ]]
            } else if (0..3).all(|a| g[a] >= 0 && g[a] < shape[a] as i64) {
                self.data[[g[0] as usize, g[1] as usize, g[2] as usize]]
            } else {
                0.0
            }
        });

        Ok(DensityMap {
            data,
            origin: [0; 3],
            origin_shift_grid_units: [
                self.origin_shift_grid_units[0] + lower[0],
                self.origin_shift_grid_units[1] + lower[1],
                self.origin_shift_grid_units[2] + lower[2],
            ],
            unit_cell_grid: self.unit_cell_grid,
            unit_cell_symmetry: self.unit_cell_symmetry.clone(),
            wrapping: false,
            ncs: self.ncs.clone(),
            is_mask: self.is_mask,
            resolution: self.resolution,
        })
    }

    /// 把 `region` 中与本图重叠的值写回本图（按原始格点对齐）
    pub fn insert_region(&mut self, region: &DensityMap) {
        let shape = self.shape();
        let offset = [
            region.origin_shift_grid_units[0] + region.origin[0]
                - self.origin_shift_grid_units[0]
                - self.origin[0],
            region.origin_shift_grid_units[1] + region.origin[1]
                - self.origin_shift_grid_units[1]
                - self.origin[1],
            region.origin_shift_grid_units[2] + region.origin[2]
                - self.origin_shift_grid_units[2]
                - self.origin[2],
        ];
        for ((i, j, k), v) in region.data.indexed_iter() {
            let g = [offset[0] + i as i64, offset[1] + j as i64, offset[2] + k as i64];
            if (0..3).all(|a| g[a] >= 0 && g[a] < shape[a] as i64) {
                self.data[[g[0] as usize, g[1] as usize, g[2] as usize]] = *v;
            }
        }
    }

    /// 移动工作框架，使 `data[[0,0,0]]` 位于工作格点 `desired_origin`
    ///
    /// 返回 shift_cart 的变化量；已在目标位置时为零且不做任何修改。
    pub fn shift_origin(&mut self, desired_origin: [i64; 3]) -> [f64; 3] {
        if desired_origin == self.origin {
            return [0.0; 3];
        }
        let before = self.shift_cart();
        for i in 0..3 {
            let delta = desired_origin[i] - self.origin[i];
            self.origin_shift_grid_units[i] -= delta;
        }
        self.origin = desired_origin;
        sub(&self.shift_cart(), &before)
    }

    // ─────────────────────────────────────────────────────────────
    // 傅里叶变换
    // ─────────────────────────────────────────────────────────────

    /// 计算到 `d_min`（可选低分辨率截断 `d_max`）的傅里叶系数
    pub fn map_as_fourier_coefficients(&self, d_min: f64, d_max: Option<f64>) -> MapCoefficients {
        MapCoefficients::from_map(&self.data, self.crystal_symmetry().unit_cell, d_min, d_max)
    }

    /// 用傅里叶系数重建同一框架下的图
    pub fn fourier_coefficients_as_map(&self, coeffs: &MapCoefficients) -> Result<DensityMap> {
        if coeffs.n_real != self.shape() {
            return Err(MapRegionError::InvalidArgument(format!(
                "coefficients gridding {:?} does not match map {:?}",
                coeffs.n_real,
                self.shape()
            )));
        }
        self.customized_copy(coeffs.to_map())
    }

    /// 高斯平滑（倒空间乘 exp(-2π² σ² d*²)，σ = radius）
    pub fn gaussian_filter(&self, radius: f64) -> DensityMap {
        let mut copy = self.clone();
        copy.data = gaussian_filter_data(&self.data, &self.crystal_symmetry().unit_cell, radius);
        copy
    }

    // ─────────────────────────────────────────────────────────────
    // 统计
    // ─────────────────────────────────────────────────────────────

    pub fn mean(&self) -> f64 {
        self.data.mean().unwrap_or(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.data.std(0.0)
    }

    pub fn max_value(&self) -> f64 {
        self.data.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
    }

    /// 大于阈值的格点数
    pub fn count_above(&self, threshold: f64) -> usize {
        self.data.iter().filter(|&&v| v > threshold).count()
    }
}

/// 对任意格点数据做周期高斯平滑
pub fn gaussian_filter_data(data: &Array3<f64>, cell: &UnitCell, radius: f64) -> Array3<f64> {
    if radius <= 0.0 {
        return data.clone();
    }
    let mut coeffs = fft::forward(data);
    let shape = coeffs.shape().to_vec();
    let factor = 2.0 * std::f64::consts::PI.powi(2) * radius * radius;
    for ((i, j, k), v) in coeffs.indexed_iter_mut() {
        let hkl = [
            fft::index_to_miller(i, shape[0]),
            fft::index_to_miller(j, shape[1]),
            fft::index_to_miller(k, shape[2]),
        ];
        *v *= (-factor * cell.d_star_sq(&hkl)).exp();
    }
    fft::inverse(coeffs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_map(n: usize, cell: f64) -> DensityMap {
        let data = Array3::from_shape_fn((n, n, n), |(i, j, k)| (i * 100 + j * 10 + k) as f64);
        DensityMap::new(data, CrystalSymmetry::p1(UnitCell::cubic(cell)))
    }

    #[test]
    fn test_shift_cart_after_crop() {
        let map = test_map(10, 20.0);
        let boxed = map.crop([2, 3, 4], [5, 6, 7]).unwrap();
        assert_eq!(boxed.shape(), [4, 4, 4]);
        assert_eq!(boxed.origin_shift_grid_units(), [2, 3, 4]);
        let s = boxed.shift_cart();
        assert!((s[0] + 4.0).abs() < 1e-9);
        assert!((s[1] + 6.0).abs() < 1e-9);
        assert!((s[2] + 8.0).abs() < 1e-9);
        assert_eq!(boxed.data()[[0, 0, 0]], 234.0);
        // 工作对称性按盒子缩放
        let cs = boxed.crystal_symmetry();
        assert!((cs.unit_cell.parameters[0] - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_crop_roundtrip() {
        let map = test_map(8, 16.0);
        let lower = [1, 2, 0];
        let upper = [5, 6, 3];
        let boxed = map.crop(lower, upper).unwrap();

        let mut empty = map.customized_copy(Array3::zeros((8, 8, 8))).unwrap();
        empty.insert_region(&boxed);
        for ((i, j, k), v) in map.data().indexed_iter() {
            let inside = (i as i64) >= lower[0]
                && (i as i64) <= upper[0]
                && (j as i64) >= lower[1]
                && (j as i64) <= upper[1]
                && (k as i64) >= lower[2]
                && (k as i64) <= upper[2];
            if inside {
                assert_eq!(empty.data()[[i, j, k]], *v);
            } else {
                assert_eq!(empty.data()[[i, j, k]], 0.0);
            }
        }
    }

    #[test]
    fn test_crop_wrapping_vs_padding() {
        let map = test_map(6, 12.0);
        let wrapped = map.crop([-1, 0, 0], [1, 0, 0]).unwrap();
        assert_eq!(wrapped.data()[[0, 0, 0]], 500.0);

        let mut bounded = map.clone();
        bounded.set_wrapping(false);
        let padded = bounded.crop([-1, 0, 0], [1, 0, 0]).unwrap();
        assert_eq!(padded.data()[[0, 0, 0]], 0.0);
        assert_eq!(padded.data()[[1, 0, 0]], 0.0);
        assert_eq!(padded.data()[[2, 0, 0]], 100.0);
    }

    #[test]
    fn test_crop_rejects_inverted_bounds() {
        let map = test_map(4, 8.0);
        assert!(map.crop([2, 0, 0], [1, 3, 3]).is_err());
    }

    #[test]
    fn test_shift_origin_idempotent() {
        let mut map = test_map(6, 12.0);
        let before_data = map.data().clone();
        let before_shift = map.shift_cart();
        let delta = map.shift_origin(map.origin());
        assert_eq!(delta, [0.0; 3]);
        assert_eq!(map.data(), &before_data);
        assert_eq!(map.shift_cart(), before_shift);
    }

    #[test]
    fn test_shift_origin_from_file_origin() {
        let data = Array3::zeros((4, 4, 4));
        let mut map = DensityMap::from_region(
            data,
            [2, 2, 2],
            [8, 8, 8],
            CrystalSymmetry::p1(UnitCell::cubic(16.0)),
        );
        assert!(!map.wrapping());
        let delta = map.shift_origin([0, 0, 0]);
        assert_eq!(map.origin_shift_grid_units(), [2, 2, 2]);
        assert!((delta[0] + 4.0).abs() < 1e-9);
        // 原点平移前后，同一个格点的原始坐标不变
        let original = sub(&map.site_cart([0, 0, 0]), &map.shift_cart());
        assert!((original[0] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_for_each_point_near_counts_sphere() {
        let map = test_map(10, 10.0);
        let mut n = 0;
        map.for_each_point_near(&[5.0, 5.0, 5.0], 1.5, |_, _| n += 1);
        assert_eq!(n, 19);
    }

    #[test]
    fn test_gaussian_filter_preserves_mean() {
        let map = test_map(8, 16.0);
        let smoothed = map.gaussian_filter(2.0);
        assert!((smoothed.mean() - map.mean()).abs() < 1e-6);
        assert!(smoothed.std_dev() < map.std_dev());
    }

    #[test]
    fn test_absolute_center() {
        let map = test_map(10, 20.0);
        let boxed = map.crop([2, 2, 2], [4, 4, 4]).unwrap();
        let c = boxed.absolute_center_cart();
        assert!((c[0] - 6.0).abs() < 1e-9);
        assert!((boxed.center_cart()[0] - 2.0).abs() < 1e-9);
    }
}
