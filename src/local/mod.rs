//! # 局部分辨率与局部缩放
//!
//! 把图平铺成盒子，在每个盒子中估计局部分辨率（半图 FSC）或各分辨率箱的
//! 缩放因子，再把稀疏样本变成平滑的全图场。
//!
//! ## 功能
//! - `LocalSetup`：由分辨率推出盒子大小、盒子数、平滑半径等参数
//! - `sample_scale_factors`：一个区域（整张图或一个盒子）的缩放样本
//! - `run_local_resolution` / `run_local_scaling`：平铺、并行估计、NCS 展开
//!
//! ## 子模块
//! - `estimate`：逐箱缩放因子
//! - `runner`：盒子并行执行器
//! - `ncs_expand`：样本的 NCS 展开
//! - `aggregate`：样本 -> 平滑场
//! - `shells`：壳层缩放的应用（全局 / 局部）
//!
//! ## 依赖关系
//! - 被 `manager/`, `commands/` 使用
//! - 使用 `boxing/`, `maps/`, `masking/`

pub mod aggregate;
pub mod estimate;
pub mod ncs_expand;
pub mod runner;
pub mod shells;

pub use estimate::{ScalingMode, ScalingOptions};

use crate::boxing::planner::plan_split;
use crate::boxing::{SelectionStrategy, SplitOptions, SplitPlan};
use crate::error::{MapRegionError, Result};
use crate::maps::coefficients::{Binner, MapCoefficients};
use crate::maps::fsc::{bin_width_for, fsc_curve, DEFAULT_FSC_CUTOFF};
use crate::maps::DensityMap;
use crate::masking::{apply_mask, create_mask_around_edges};
use crate::models::AtomicModel;

use aggregate::{create_map_with_value_list, DefaultValue};
use runner::BoxRunner;

/// FSC 计算的名义箱数（每箱至少 20 个反射）
pub const FSC_N_BINS: usize = 2000;

// ─────────────────────────────────────────────────────────────
// 样本类型
// ─────────────────────────────────────────────────────────────

/// 一个方向（或各向同性）的估计结果
#[derive(Debug, Clone)]
pub struct DirectionScaleInfo {
    /// None 为各向同性
    pub direction: Option<[f64; 3]>,
    /// 每箱目标缩放因子；模型模式低分辨率相关不足时为 None
    pub target_scale_factors: Option<Vec<f64>>,
    pub bin_d_min: Vec<f64>,
    pub cc_per_bin: Vec<f64>,
    pub low_res_cc: f64,
}

/// 一个位置的缩放样本
#[derive(Debug, Clone)]
pub struct ScaleSample {
    /// 原始坐标系位置
    pub location: [f64; 3],
    pub per_direction: Vec<DirectionScaleInfo>,
}

/// 一个位置的局部分辨率
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionSample {
    pub location: [f64; 3],
    pub d_min: f64,
}

/// 缩放样本集合及其分箱约定
#[derive(Debug, Clone)]
pub struct ScaleProfile {
    pub samples: Vec<ScaleSample>,
    pub n_bins: usize,
    pub d_min: f64,
    /// 各向异性时的方向列表，与每个样本的 `per_direction` 一一对应
    pub directions: Option<Vec<[f64; 3]>>,
}

impl ScaleProfile {
    pub fn is_anisotropic(&self) -> bool {
        self.directions.is_some()
    }
}

/// 局部分辨率结果
#[derive(Debug, Clone)]
pub struct LocalResolution {
    pub samples: Vec<ResolutionSample>,
    /// 与输入图同格点的局部分辨率图
    pub map: DensityMap,
}

// ─────────────────────────────────────────────────────────────
// 参数
// ─────────────────────────────────────────────────────────────

/// 局部计算的盒子参数
#[derive(Debug, Clone)]
pub struct LocalSetup {
    /// 名义分辨率 (Å)
    pub resolution: f64,
    pub box_cushion: f64,
    pub core_box_size: f64,
    /// 平铺目标盒子数
    pub n_boxes: usize,
    pub smoothing_radius: f64,
    /// 系数截断分辨率，局部分辨率不会比它更高
    pub minimum_resolution: f64,
    pub n_bins: usize,
    pub fsc_cutoff: f64,
    /// 0 表示全部 CPU
    pub nproc: usize,
}

impl Default for LocalSetup {
    fn default() -> Self {
        Self {
            resolution: 3.0,
            box_cushion: 4.5,
            core_box_size: 9.0,
            n_boxes: 24,
            smoothing_radius: 4.5,
            minimum_resolution: 2.5,
            n_bins: 20,
            fsc_cutoff: DEFAULT_FSC_CUTOFF,
            nproc: 0,
        }
    }
}

impl LocalSetup {
    /// 由图和分辨率推出盒子参数
    pub fn for_map(map: &DensityMap, resolution: f64) -> Self {
        let core_box_size = 3.0 * resolution;
        let volume = map.crystal_symmetry().unit_cell.volume();
        let n_boxes = ((volume / core_box_size.powi(3)).round() as usize).max(1);
        let setup = Self {
            resolution,
            box_cushion: 1.5 * resolution,
            core_box_size,
            n_boxes,
            smoothing_radius: 0.5 * core_box_size,
            minimum_resolution: map.nyquist_resolution().max(0.833 * resolution),
            ..Self::default()
        };
        log::info!(
            "Local boxes: resolution {:.2} A, core {:.1} A, cushion {:.1} A, target {} boxes",
            setup.resolution,
            setup.core_box_size,
            setup.box_cushion,
            setup.n_boxes
        );
        setup
    }

    fn split_options(&self) -> SplitOptions {
        SplitOptions {
            box_cushion: self.box_cushion,
            skip_empty_boxes: false,
            select_final_boxes_based_on_model: false,
            ..SplitOptions::default()
        }
    }

    /// 平铺方案（不依赖模型）
    pub fn plan(&self, map: &DensityMap) -> Result<SplitPlan> {
        plan_split(
            map,
            &AtomicModel::new(Vec::new(), None),
            &SelectionStrategy::Tiling {
                target_for_boxes: self.n_boxes,
            },
            &self.split_options(),
        )
    }
}

// ─────────────────────────────────────────────────────────────
// 单个区域
// ─────────────────────────────────────────────────────────────

fn require_same_shape(a: &DensityMap, b: &DensityMap) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(MapRegionError::InvalidArgument(format!(
            "map shapes differ: {:?} vs {:?}",
            a.shape(),
            b.shape()
        )));
    }
    Ok(())
}

/// 边缘软化后的傅里叶系数
fn edge_masked_coefficients(map: &DensityMap, edge: &DensityMap, d_min: f64) -> Result<MapCoefficients> {
    let mut masked = map.clone();
    apply_mask(&mut masked, edge)?;
    Ok(masked.map_as_fourier_coefficients(d_min, None))
}

/// 一个区域的缩放样本
///
/// `first`/`second` 提供参考相关（两张半图，或主图与参考图）。
/// 有空箱、或所有方向都没有目标缩放因子时返回 `Ok(None)`。
pub fn sample_scale_factors(
    primary: &DensityMap,
    first: &DensityMap,
    second: &DensityMap,
    setup: &LocalSetup,
    mode: ScalingMode,
    directions: Option<&[[f64; 3]]>,
    options: &ScalingOptions,
) -> Result<Option<ScaleSample>> {
    require_same_shape(primary, first)?;
    require_same_shape(primary, second)?;

    let edge = create_mask_around_edges(primary, setup.resolution)?;
    let d_min = setup.minimum_resolution;
    let p = edge_masked_coefficients(primary, &edge, d_min)?;
    let a = edge_masked_coefficients(first, &edge, d_min)?;
    let b = edge_masked_coefficients(second, &edge, d_min)?;
    if p.is_empty() {
        return Ok(None);
    }
    let binner = Binner::equal_volume(&p, setup.n_bins);

    let estimate =
        |direction| estimate::estimate_scale_factors(&p, &a, &b, &binner, mode, direction, options);
    let per_direction: Option<Vec<DirectionScaleInfo>> = match directions {
        None => estimate(None).map(|info| vec![info]),
        Some(dirs) => dirs.iter().map(|d| estimate(Some(*d))).collect(),
    };
    let per_direction = match per_direction {
        Some(list) => list,
        None => return Ok(None),
    };
    if per_direction.iter().all(|info| info.target_scale_factors.is_none()) {
        return Ok(None);
    }
    Ok(Some(ScaleSample {
        location: primary.absolute_center_cart(),
        per_direction,
    }))
}

/// 一个区域的半图 FSC 分辨率，不高于 `minimum_resolution`
pub fn sample_resolution(
    first: &DensityMap,
    second: &DensityMap,
    setup: &LocalSetup,
) -> Result<Option<ResolutionSample>> {
    require_same_shape(first, second)?;
    let edge = create_mask_around_edges(first, setup.resolution)?;
    let a = edge_masked_coefficients(first, &edge, setup.minimum_resolution)?;
    let b = edge_masked_coefficients(second, &edge, setup.minimum_resolution)?;
    if a.is_empty() {
        return Ok(None);
    }
    let curve = fsc_curve(&a, &b, bin_width_for(a.len(), FSC_N_BINS))?;
    Ok(curve
        .d_min_at_cutoff(setup.fsc_cutoff)
        .map(|d| ResolutionSample {
            location: first.absolute_center_cart(),
            d_min: d.max(setup.minimum_resolution),
        }))
}

/// 整张图作为一个区域的缩放方案
pub fn global_scale_profile(
    primary: &DensityMap,
    first: &DensityMap,
    second: &DensityMap,
    setup: &LocalSetup,
    mode: ScalingMode,
    directions: Option<&[[f64; 3]]>,
    options: &ScalingOptions,
) -> Result<ScaleProfile> {
    let sample = sample_scale_factors(primary, first, second, setup, mode, directions, options)?;
    Ok(ScaleProfile {
        samples: sample.into_iter().collect(),
        n_bins: setup.n_bins,
        d_min: setup.minimum_resolution,
        directions: directions.map(|d| d.to_vec()),
    })
}

// ─────────────────────────────────────────────────────────────
// 平铺 + 并行
// ─────────────────────────────────────────────────────────────

fn log_counts(attempted: usize, successful: usize, with_ncs: usize) {
    log::info!("Sampling points attempted: {}", attempted);
    log::info!("Sampling points successful: {}", successful);
    log::info!("Sampling points with NCS: {}", with_ncs);
}

/// 局部分辨率：每个盒子的半图 FSC 分辨率，展开 NCS 后生成平滑的分辨率图
pub fn run_local_resolution(
    first: &DensityMap,
    second: &DensityMap,
    setup: &LocalSetup,
) -> Result<LocalResolution> {
    require_same_shape(first, second)?;
    let plan = setup.plan(first)?;
    let runner = BoxRunner::new(setup.nproc);
    log::info!("Local resolution over {} boxes with {} processors", plan.len(), runner.nproc());

    let out = runner.run(plan.len(), |i| {
        let b = plan.entries[i].crop_box();
        let box_1 = first.crop(b.lower, b.upper)?;
        let box_2 = second.crop(b.lower, b.upper)?;
        sample_resolution(&box_1, &box_2, setup)
    })?;

    let samples = match first.ncs() {
        Some(ncs) if ncs.n_operators() > 1 => ncs_expand::expand_resolution_samples(&out.results, ncs),
        _ => out.results,
    };
    log_counts(out.attempted, out.successful, samples.len());

    let values: Vec<([f64; 3], f64)> = samples.iter().map(|s| (s.location, s.d_min)).collect();
    let mut map = create_map_with_value_list(first, &values, setup.smoothing_radius, DefaultValue::Mean)?;
    map.set_ncs(None);
    Ok(LocalResolution { samples, map })
}

/// 局部缩放因子：每个盒子一个样本，展开 NCS
pub fn run_local_scaling(
    primary: &DensityMap,
    first: &DensityMap,
    second: &DensityMap,
    setup: &LocalSetup,
    mode: ScalingMode,
    directions: Option<&[[f64; 3]]>,
    options: &ScalingOptions,
) -> Result<ScaleProfile> {
    require_same_shape(primary, first)?;
    require_same_shape(primary, second)?;
    let plan = setup.plan(primary)?;
    let runner = BoxRunner::new(setup.nproc);
    log::info!(
        "Local scaling ({}) over {} boxes with {} processors",
        mode,
        plan.len(),
        runner.nproc()
    );

    let out = runner.run(plan.len(), |i| {
        let b = plan.entries[i].crop_box();
        let p = primary.crop(b.lower, b.upper)?;
        let a = first.crop(b.lower, b.upper)?;
        let c = second.crop(b.lower, b.upper)?;
        sample_scale_factors(&p, &a, &c, setup, mode, directions, options)
    })?;

    let samples = match primary.ncs() {
        Some(ncs) if ncs.n_operators() > 1 => ncs_expand::expand_scale_samples(&out.results, ncs),
        _ => out.results,
    };
    log_counts(out.attempted, out.successful, samples.len());

    Ok(ScaleProfile {
        samples,
        n_bins: setup.n_bins,
        d_min: setup.minimum_resolution,
        directions: directions.map(|d| d.to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CrystalSymmetry, NcsSpec, UnitCell};
    use ndarray::Array3;

    pub(crate) fn noise_map(n: usize, cell: f64, seed: u64) -> DensityMap {
        let mut state = seed;
        let data = Array3::from_shape_fn((n, n, n), |(i, j, k)| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let noise = ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5;
            (i as f64 * 0.7).sin() + (j as f64 * 0.4).cos() * (k as f64 * 0.9).sin() + noise
        });
        DensityMap::new(data, CrystalSymmetry::p1(UnitCell::cubic(cell)))
    }

    #[test]
    fn test_setup_for_map() {
        let map = noise_map(24, 48.0, 1);
        let setup = LocalSetup::for_map(&map, 6.0);
        assert!((setup.box_cushion - 9.0).abs() < 1e-12);
        assert!((setup.core_box_size - 18.0).abs() < 1e-12);
        assert_eq!(setup.n_boxes, 19);
        assert!((setup.smoothing_radius - 9.0).abs() < 1e-12);
        assert!((setup.minimum_resolution - 0.833 * 6.0).abs() < 1e-12);
        // 粗分辨率时由 Nyquist 决定
        let coarse = LocalSetup::for_map(&map, 4.0);
        assert!((coarse.minimum_resolution - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_identical_half_maps_report_finest_d() {
        let map = noise_map(24, 48.0, 5);
        let setup = LocalSetup {
            nproc: 2,
            ..LocalSetup::for_map(&map, 6.0)
        };
        let result = run_local_resolution(&map, &map, &setup).unwrap();
        assert_eq!(result.samples.len(), 27);
        for s in &result.samples {
            assert!(s.d_min >= setup.minimum_resolution);
            assert!(s.d_min < setup.minimum_resolution + 0.2);
        }
        assert_eq!(result.map.shape(), map.shape());
        let mean = result.map.mean();
        assert!(mean > setup.minimum_resolution - 0.2 && mean < setup.minimum_resolution + 0.3);
    }

    #[test]
    fn test_single_tile_matches_global() {
        let primary = noise_map(16, 32.0, 11);
        let first = noise_map(16, 32.0, 11);
        let second = noise_map(16, 32.0, 12);
        // 默认缓冲 (1.5·分辨率) 下，单个盒子仍然正好是整个晶胞
        let setup = LocalSetup {
            n_boxes: 1,
            n_bins: 8,
            nproc: 1,
            ..LocalSetup::for_map(&primary, 5.0)
        };
        assert!(setup.box_cushion > 0.0);
        let plan = setup.plan(&primary).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries[0].crop_box().lower, [0, 0, 0]);
        assert_eq!(plan.entries[0].crop_box().upper, [15, 15, 15]);

        let options = ScalingOptions::default();
        let global = global_scale_profile(
            &primary,
            &first,
            &second,
            &setup,
            ScalingMode::HalfMaps,
            None,
            &options,
        )
        .unwrap();
        let local = run_local_scaling(
            &primary,
            &first,
            &second,
            &setup,
            ScalingMode::HalfMaps,
            None,
            &options,
        )
        .unwrap();
        assert_eq!(global.samples.len(), 1);
        assert_eq!(local.samples.len(), 1);
        let g = global.samples[0].per_direction[0].target_scale_factors.clone().unwrap();
        let l = local.samples[0].per_direction[0].target_scale_factors.clone().unwrap();
        assert_eq!(g.len(), 8);
        for (a, b) in g.iter().zip(&l) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_ncs_expands_samples() {
        let mut map = noise_map(16, 32.0, 3);
        map.set_ncs(Some(NcsSpec::cyclic(2, [16.0, 16.0, 16.0])));
        let setup = LocalSetup {
            resolution: 5.0,
            box_cushion: 0.0,
            n_boxes: 1,
            minimum_resolution: 4.2,
            n_bins: 6,
            nproc: 1,
            ..LocalSetup::default()
        };
        let dirs = estimate::direction_vectors();
        let profile = run_local_scaling(
            &map,
            &map,
            &map,
            &setup,
            ScalingMode::HalfMaps,
            Some(&dirs),
            &ScalingOptions::default(),
        )
        .unwrap();
        assert_eq!(profile.samples.len(), 2);
        assert!(profile.is_anisotropic());
        assert!(profile.samples.iter().all(|s| s.per_direction.len() == 12));
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let a = noise_map(8, 16.0, 1);
        let b = noise_map(10, 16.0, 1);
        assert!(run_local_resolution(&a, &b, &LocalSetup::default()).is_err());
    }
}
