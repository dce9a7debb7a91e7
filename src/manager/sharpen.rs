//! # 锐化
//!
//! ## 功能
//! - 半图锐化：参考相关来自两张半图 FSC，默认带谱形缩放
//! - 模型锐化：参考图由模型计算（B 置 0），不带谱形缩放
//! - 外部图锐化：参考图为容器中另一张图，不带谱形缩放
//! - 局部模式：整体缩放 → 局部缩放 → 再整体缩放
//! - 模型局部锐化的 `optimize_with_model`：三张图（局部结果、第一次整体结果、
//!   模型图）都先乘以局部结果的密度掩膜，再按 w = 0…1（步长 0.1）混合，
//!   取与掩膜后模型图相关最高的权重
//!
//! 结果替换主图。
//!
//! ## 依赖关系
//! - 使用 `local/`, `maps/`

use crate::error::{MapRegionError, Result};
use crate::local::estimate::direction_vectors;
use crate::local::shells::{apply_global_scaling, apply_local_scaling};
use crate::local::{global_scale_profile, run_local_scaling, LocalSetup, ScalingMode, ScalingOptions};
use crate::manager::{MapId, MapModelManager, ModelId};
use crate::maps::coefficients::set_n_bins;
use crate::maps::fsc::map_map_cc;
use crate::maps::model_map::generate_map;
use crate::maps::DensityMap;
use crate::masking::{apply_mask, create_mask_around_density, MaskOptions};

use std::path::PathBuf;

/// 锐化参数
#[derive(Debug, Clone)]
pub struct SharpenConfig {
    /// 局部锐化
    pub local: bool,
    /// 各向异性（12 个方向）
    pub anisotropic: bool,
    /// 半图模式的谱形缩放
    pub spectral_scaling: bool,
    /// 整体缩放的初始箱数（按需递减）
    pub n_bins_overall: usize,
    pub n_bins_local: usize,
    /// None 取主图分辨率
    pub resolution: Option<f64>,
    pub scaling: ScalingOptions,
    /// 0 表示全部 CPU
    pub nproc: usize,
    /// None 由图体积推出
    pub n_boxes: Option<usize>,
    /// 各向异性局部缩放的临时目录所在位置
    pub scratch_dir: PathBuf,
    /// 模型局部锐化时优化局部 / 整体结果的混合权重
    pub optimize_with_model: bool,
}

impl Default for SharpenConfig {
    fn default() -> Self {
        Self {
            local: false,
            anisotropic: false,
            spectral_scaling: true,
            n_bins_overall: 200,
            n_bins_local: 20,
            resolution: None,
            scaling: ScalingOptions::default(),
            nproc: 0,
            n_boxes: None,
            scratch_dir: PathBuf::from("."),
            optimize_with_model: true,
        }
    }
}

/// 锐化结果摘要
#[derive(Debug, Clone)]
pub struct SharpenSummary {
    pub mode: ScalingMode,
    pub resolution: f64,
    pub local: bool,
    /// 局部模式下的样本数，整体模式为 1
    pub n_samples: usize,
    /// `optimize_with_model` 选中的局部权重
    pub weight: Option<f64>,
    /// 与模型图的相关
    pub cc: Option<f64>,
}

/// 一次锐化的输入
struct SharpenInputs<'a> {
    primary: &'a DensityMap,
    first: &'a DensityMap,
    second: &'a DensityMap,
    mode: ScalingMode,
    spectral: bool,
}

impl SharpenConfig {
    fn setup(&self, primary: &DensityMap) -> LocalSetup {
        let resolution = self.resolution.unwrap_or_else(|| primary.resolution());
        let mut setup = LocalSetup::for_map(primary, resolution);
        setup.nproc = self.nproc;
        setup.n_bins = self.n_bins_local;
        if let Some(n) = self.n_boxes {
            setup.n_boxes = n.max(1);
        }
        setup
    }

    fn directions(&self) -> Option<Vec<[f64; 3]>> {
        if self.anisotropic {
            Some(direction_vectors())
        } else {
            None
        }
    }
}

/// 整体缩放；箱数从 `n_bins_overall` 开始递减到所有箱非空
fn overall_scaling(
    map: &DensityMap,
    inputs: &SharpenInputs<'_>,
    setup: &LocalSetup,
    config: &SharpenConfig,
    spectral: bool,
) -> Result<DensityMap> {
    let coeffs = map.map_as_fourier_coefficients(setup.minimum_resolution, None);
    let n_bins = set_n_bins(&coeffs, config.n_bins_overall, setup.minimum_resolution)?;
    log::info!("Overall scaling with {} bins to {:.2} A", n_bins, setup.minimum_resolution);
    let overall_setup = LocalSetup {
        n_bins,
        ..setup.clone()
    };
    let directions = config.directions();
    let profile = global_scale_profile(
        map,
        inputs.first,
        inputs.second,
        &overall_setup,
        inputs.mode,
        directions.as_deref(),
        &config.scaling,
    )?;
    if profile.samples.is_empty() {
        return Err(MapRegionError::Other(format!(
            "No overall scale factors could be estimated ({})",
            inputs.mode
        )));
    }
    apply_global_scaling(map, &profile, spectral)
}

/// 一次锐化的结果
struct SharpenOutcome {
    map: DensityMap,
    /// 局部模式下第一次整体缩放的结果
    overall: Option<DensityMap>,
    n_samples: usize,
}

/// 整体或局部锐化
fn sharpen_with(inputs: &SharpenInputs<'_>, config: &SharpenConfig) -> Result<SharpenOutcome> {
    let setup = config.setup(inputs.primary);
    if !config.local {
        let map = overall_scaling(inputs.primary, inputs, &setup, config, inputs.spectral)?;
        return Ok(SharpenOutcome {
            map,
            overall: None,
            n_samples: 1,
        });
    }

    // 谱形只在最后一次整体缩放中施加
    let overall = overall_scaling(inputs.primary, inputs, &setup, config, false)?;
    let directions = config.directions();
    let profile = run_local_scaling(
        &overall,
        inputs.first,
        inputs.second,
        &setup,
        inputs.mode,
        directions.as_deref(),
        &config.scaling,
    )?;
    let n_samples = profile.samples.len();
    let local = apply_local_scaling(&overall, &profile, setup.smoothing_radius, false, &config.scratch_dir)?;
    let map = overall_scaling(&local, inputs, &setup, config, inputs.spectral)?;
    Ok(SharpenOutcome {
        map,
        overall: Some(overall),
        n_samples,
    })
}

/// 局部结果的权重 w（w·local + (1-w)·overall），三张图都乘以 `mask` 后
/// 按与模型图的相关选取；返回 (w, cc)
fn best_local_weight(
    local: &DensityMap,
    overall: &DensityMap,
    model_map: &DensityMap,
    mask: &DensityMap,
) -> Result<(f64, f64)> {
    let mut local = local.clone();
    let mut overall = overall.clone();
    let mut target = model_map.clone();
    apply_mask(&mut local, mask)?;
    apply_mask(&mut overall, mask)?;
    apply_mask(&mut target, mask)?;

    let mut best: Option<(f64, f64)> = None;
    for i in 0..=10 {
        let w = i as f64 / 10.0;
        let blend = local.data() * w + overall.data() * (1.0 - w);
        let cc = map_map_cc(&blend, target.data());
        log::debug!("Weight on local {:.1}: CC {:.4}", w, cc);
        if best.map_or(true, |(_, c)| cc > c) {
            best = Some((w, cc));
        }
    }
    best.ok_or_else(|| MapRegionError::Other("No weights tested".to_string()))
}

impl MapModelManager {
    /// 以两张半图的平均为主图创建容器
    pub fn from_half_maps(first: DensityMap, second: DensityMap) -> Result<Self> {
        if first.shape() != second.shape() {
            return Err(MapRegionError::InvalidArgument(format!(
                "half-map shapes differ: {:?} vs {:?}",
                first.shape(),
                second.shape()
            )));
        }
        let average = (first.data() + second.data()) * 0.5;
        let primary = first.customized_copy(average)?;
        let mut mmm = MapModelManager::new(primary);
        mmm.add_map(MapId::half_map_1(), first)?;
        mmm.add_map(MapId::half_map_2(), second)?;
        Ok(mmm)
    }

    fn finish_sharpen(&mut self, map: DensityMap, summary: &SharpenSummary) -> Result<()> {
        log::info!(
            "Sharpened map ({}, {}) at {:.2} A from {} samples",
            summary.mode,
            if summary.local { "local" } else { "overall" },
            summary.resolution,
            summary.n_samples
        );
        self.replace_map(&MapId::primary(), map)
    }

    /// 分辨率：显式给定，否则有半图时取半图 FSC，否则取主图分辨率
    fn resolved(&self, config: &SharpenConfig) -> Result<SharpenConfig> {
        let resolution = match config.resolution {
            Some(r) => r,
            None if self.has_map(&MapId::half_map_1()) && self.has_map(&MapId::half_map_2()) => {
                self.resolution_from_half_maps()?
            }
            None => self.primary_map()?.resolution(),
        };
        Ok(SharpenConfig {
            resolution: Some(resolution),
            ..config.clone()
        })
    }

    /// 半图锐化
    pub fn half_map_sharpen(&mut self, config: &SharpenConfig) -> Result<SharpenSummary> {
        self.map(&MapId::half_map_1())?;
        self.map(&MapId::half_map_2())?;
        let config = &self.resolved(config)?;
        let resolution = config.resolution.unwrap_or_default();
        let (map, n_samples) = {
            let inputs = SharpenInputs {
                primary: self.primary_map()?,
                first: self.map(&MapId::half_map_1())?,
                second: self.map(&MapId::half_map_2())?,
                mode: ScalingMode::HalfMaps,
                spectral: config.spectral_scaling,
            };
            let outcome = sharpen_with(&inputs, config)?;
            (outcome.map, outcome.n_samples)
        };
        let summary = SharpenSummary {
            mode: ScalingMode::HalfMaps,
            resolution,
            local: config.local,
            n_samples,
            weight: None,
            cc: None,
        };
        self.finish_sharpen(map, &summary)?;
        Ok(summary)
    }

    /// 主模型在 `d_min` 的模型图（B 置 0）
    fn model_map_for_sharpening(&self, d_min: f64) -> Result<DensityMap> {
        let mut model = self.model(&ModelId::primary())?.clone();
        model.set_b_iso(0.0);
        generate_map(&model, self.primary_map()?, d_min)
    }

    /// 模型锐化
    ///
    /// 局部模式且 `optimize_with_model` 时，最终结果是局部与整体结果的最佳混合。
    pub fn model_sharpen(&mut self, config: &SharpenConfig) -> Result<SharpenSummary> {
        let config = &self.resolved(config)?;
        let resolution = config.resolution.unwrap_or_default();
        let model_map = self.model_map_for_sharpening(resolution)?;
        let outcome = {
            let primary = self.primary_map()?;
            let inputs = SharpenInputs {
                primary,
                first: primary,
                second: &model_map,
                mode: ScalingMode::Model,
                spectral: false,
            };
            sharpen_with(&inputs, config)?
        };

        let (map, weight, cc) = match outcome.overall {
            Some(ref overall) if config.optimize_with_model => {
                let mask = create_mask_around_density(
                    &outcome.map,
                    resolution,
                    MaskOptions::default().solvent_content,
                )?;
                let (w, cc) = best_local_weight(&outcome.map, overall, &model_map, &mask)?;
                log::info!(
                    "Optimized weight: overall map {:.2}, local map {:.2} (CC {:.4})",
                    1.0 - w,
                    w,
                    cc
                );
                let blend = outcome.map.data() * w + overall.data() * (1.0 - w);
                (outcome.map.customized_copy(blend)?, Some(w), Some(cc))
            }
            _ => (outcome.map, None, None),
        };

        let summary = SharpenSummary {
            mode: ScalingMode::Model,
            resolution,
            local: config.local,
            n_samples: outcome.n_samples,
            weight,
            cc,
        };
        self.finish_sharpen(map, &summary)?;
        Ok(summary)
    }

    /// 以容器中另一张图为参考锐化
    pub fn external_sharpen(&mut self, reference: &MapId, config: &SharpenConfig) -> Result<SharpenSummary> {
        let config = &self.resolved(config)?;
        let resolution = config.resolution.unwrap_or_default();
        let (map, n_samples) = {
            let primary = self.primary_map()?;
            let inputs = SharpenInputs {
                primary,
                first: primary,
                second: self.map(reference)?,
                mode: ScalingMode::External,
                spectral: false,
            };
            let outcome = sharpen_with(&inputs, config)?;
            (outcome.map, outcome.n_samples)
        };
        let summary = SharpenSummary {
            mode: ScalingMode::External,
            resolution,
            local: config.local,
            n_samples,
            weight: None,
            cc: None,
        };
        self.finish_sharpen(map, &summary)?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::test_support::*;

    fn half_map_manager() -> MapModelManager {
        let mut mmm = MapModelManager::from_half_maps(noisy(&blob_map(), 1, 0.05), noisy(&blob_map(), 2, 0.05)).unwrap();
        mmm.add_model(ModelId::primary(), two_chain_model()).unwrap();
        mmm
    }

    fn small_config() -> SharpenConfig {
        SharpenConfig {
            n_bins_overall: 12,
            n_bins_local: 6,
            n_boxes: Some(1),
            nproc: 1,
            ..SharpenConfig::default()
        }
    }

    #[test]
    fn test_from_half_maps_averages() {
        let a = blob_map();
        let mut b = blob_map();
        b.data_mut().mapv_inplace(|v| v + 2.0);
        let mmm = MapModelManager::from_half_maps(a.clone(), b).unwrap();
        let p = mmm.primary_map().unwrap();
        assert!((p.data()[[0, 0, 0]] - (a.data()[[0, 0, 0]] + 1.0)).abs() < 1e-12);
        assert!(mmm.has_map(&MapId::half_map_2()));
    }

    #[test]
    fn test_half_map_sharpen_overall() {
        let mut mmm = half_map_manager();
        let summary = mmm.half_map_sharpen(&small_config()).unwrap();
        assert_eq!(summary.n_samples, 1);
        assert!(!summary.local);
        let p = mmm.primary_map().unwrap();
        assert_eq!(p.shape(), [20, 20, 20]);
        assert!(p.data().iter().all(|v| v.is_finite()));
        mmm.check_consistency("sharpen").unwrap();
    }

    #[test]
    fn test_half_map_sharpen_local_anisotropic() {
        let scratch = tempfile::tempdir().unwrap();
        let mut mmm = half_map_manager();
        let config = SharpenConfig {
            local: true,
            anisotropic: true,
            scratch_dir: scratch.path().to_path_buf(),
            ..small_config()
        };
        let summary = mmm.half_map_sharpen(&config).unwrap();
        assert!(summary.local);
        assert_eq!(summary.n_samples, 1);
        assert!(mmm.primary_map().unwrap().data().iter().all(|v| v.is_finite()));
        // 临时目录已删除
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_inputs() {
        let mut mmm = MapModelManager::new(blob_map());
        assert!(matches!(
            mmm.half_map_sharpen(&small_config()),
            Err(MapRegionError::MissingMap { .. })
        ));
        assert!(matches!(
            mmm.model_sharpen(&small_config()),
            Err(MapRegionError::MissingModel { .. })
        ));
        assert!(matches!(
            mmm.external_sharpen(&MapId::new("reference"), &small_config()),
            Err(MapRegionError::MissingMap { .. })
        ));
    }

    #[test]
    fn test_external_sharpen_with_self_reference() {
        let mut mmm = half_map_manager();
        let reference = mmm.primary_map().unwrap().clone();
        mmm.add_map(MapId::new("reference"), reference).unwrap();
        let summary = mmm.external_sharpen(&MapId::new("reference"), &small_config()).unwrap();
        assert_eq!(summary.mode, ScalingMode::External);
    }

    #[test]
    fn test_model_sharpen_local_optimizes_weight() {
        let mut mmm = half_map_manager();
        let config = SharpenConfig {
            local: true,
            ..small_config()
        };
        let summary = mmm.model_sharpen(&config).unwrap();
        assert_eq!(summary.mode, ScalingMode::Model);
        let w = summary.weight.unwrap();
        assert!((0.0..=1.0).contains(&w));
        assert!(summary.cc.unwrap().is_finite());
        assert!(mmm.primary_map().unwrap().data().iter().all(|v| v.is_finite()));

        // 关闭优化或整体模式时没有权重
        let mut plain = half_map_manager();
        let no_opt = SharpenConfig {
            local: true,
            optimize_with_model: false,
            ..small_config()
        };
        assert!(plain.model_sharpen(&no_opt).unwrap().weight.is_none());
        let mut overall = half_map_manager();
        assert!(overall.model_sharpen(&small_config()).unwrap().weight.is_none());
    }

    #[test]
    fn test_masked_correlation_chooses_weight() {
        let template = blob_map();
        let wave = template.customized_copy(ndarray::Array3::from_shape_fn((20, 20, 20), |(i, j, k)| {
            (0.7 * i as f64).sin() + (0.4 * j as f64).cos() * (0.9 * k as f64).sin()
        }))
        .unwrap();
        let zero = template.customized_copy(ndarray::Array3::zeros((20, 20, 20))).unwrap();
        let small_noise = noisy(&zero, 7, 2.0);
        let large_noise = noisy(&zero, 8, 20.0);

        // i < 10 内：局部结果等于模型图，整体结果是噪声；i >= 10 处相反且局部结果噪声很大
        let inside = |idx: (usize, usize, usize)| idx.0 < 10;
        let pick = |a: &DensityMap, b: &DensityMap| {
            let data = ndarray::Array3::from_shape_fn((20, 20, 20), |idx| {
                if inside(idx) {
                    a.data()[idx]
                } else {
                    b.data()[idx]
                }
            });
            template.customized_copy(data).unwrap()
        };
        let local = pick(&wave, &large_noise);
        let overall = pick(&small_noise, &wave);

        let mut region = pick(&template.customized_copy(ndarray::Array3::ones((20, 20, 20))).unwrap(), &zero);
        region.set_is_mask(true);
        let mut everywhere = template.customized_copy(ndarray::Array3::ones((20, 20, 20))).unwrap();
        everywhere.set_is_mask(true);

        let (w_masked, cc_masked) = best_local_weight(&local, &overall, &wave, &region).unwrap();
        assert!((w_masked - 1.0).abs() < 1e-12);
        assert!((cc_masked - 1.0).abs() < 1e-9);

        let (w_unmasked, _) = best_local_weight(&local, &overall, &wave, &everywhere).unwrap();
        assert!(w_unmasked < 0.5);
    }
}
