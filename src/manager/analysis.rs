//! # 容器上的分析
//!
//! ## 功能
//! - `map_map_fsc`：两张图到 Nyquist 的 FSC 曲线
//! - `resolution_from_half_maps`：半图 FSC 在 0.143 处的分辨率
//! - `map_map_cc` / `map_model_cc`：实空间相关
//! - `generate_map`：模型图
//! - `resolution_filter`：分辨率带通
//! - `local_fsc`：半图局部分辨率
//!
//! ## 依赖关系
//! - 使用 `maps/fsc.rs`, `maps/model_map.rs`, `local/`

use crate::error::{MapRegionError, Result};
use crate::local::{run_local_resolution, LocalResolution, LocalSetup, FSC_N_BINS};
use crate::manager::{MapId, MapModelManager, ModelId};
use crate::maps::fsc::{bin_width_for, fsc_curve, map_map_cc, FscCurve, DEFAULT_FSC_CUTOFF};
use crate::maps::model_map;
use crate::maps::DensityMap;
use crate::masking::create_mask_around_atoms;

/// `map_model_cc` 的原子掩膜半径 (Å)
const MODEL_CC_MASK_RADIUS: f64 = 3.0;

impl MapModelManager {
    fn same_gridding(&self, id1: &MapId, id2: &MapId) -> Result<(&DensityMap, &DensityMap)> {
        let a = self.map(id1)?;
        let b = self.map(id2)?;
        if a.shape() != b.shape() {
            return Err(MapRegionError::InvalidArgument(format!(
                "maps '{}' {:?} and '{}' {:?} are on different grids",
                id1,
                a.shape(),
                id2,
                b.shape()
            )));
        }
        Ok((a, b))
    }

    /// 两张图的 FSC 曲线（到 Nyquist）
    pub fn map_map_fsc(&self, id1: &MapId, id2: &MapId) -> Result<FscCurve> {
        let (a, b) = self.same_gridding(id1, id2)?;
        let d_min = a.nyquist_resolution();
        let ca = a.map_as_fourier_coefficients(d_min, None);
        let cb = b.map_as_fourier_coefficients(d_min, None);
        fsc_curve(&ca, &cb, bin_width_for(ca.len(), FSC_N_BINS))
    }

    /// 半图 FSC 在 0.143 处的分辨率
    pub fn resolution_from_half_maps(&self) -> Result<f64> {
        let curve = self.map_map_fsc(&MapId::half_map_1(), &MapId::half_map_2())?;
        let d = curve
            .d_min_at_cutoff(DEFAULT_FSC_CUTOFF)
            .ok_or_else(|| MapRegionError::Other("Empty FSC curve".to_string()))?;
        log::info!("Resolution from half-maps (FSC={}): {:.2} A", DEFAULT_FSC_CUTOFF, d);
        Ok(d)
    }

    pub fn map_map_cc(&self, id1: &MapId, id2: &MapId) -> Result<f64> {
        let (a, b) = self.same_gridding(id1, id2)?;
        Ok(map_map_cc(a.data(), b.data()))
    }

    /// 主模型在 `resolution` 的模型图
    pub fn generate_map(&self, resolution: f64) -> Result<DensityMap> {
        let model = self.model(&ModelId::primary())?;
        model_map::generate_map(model, self.primary_map()?, resolution)
    }

    /// 主图与模型图在原子周围 3 Å 内的相关
    pub fn map_model_cc(&self, resolution: Option<f64>) -> Result<f64> {
        let primary = self.primary_map()?;
        let resolution = resolution.unwrap_or_else(|| primary.resolution());
        let model_map = self.generate_map(resolution)?;
        let model = self.model(&ModelId::primary())?;
        let mask = create_mask_around_atoms(primary, model, MODEL_CC_MASK_RADIUS, None)?;

        let (values_map, values_model): (Vec<f64>, Vec<f64>) = primary
            .data()
            .iter()
            .zip(model_map.data().iter())
            .zip(mask.data().iter())
            .filter(|(_, m)| **m > 0.5)
            .map(|((a, b), _)| (*a, *b))
            .unzip();
        if values_map.is_empty() {
            return Err(MapRegionError::InvalidArgument(
                "no map points near the model".to_string(),
            ));
        }
        let n = values_map.len();
        let a = ndarray::Array3::from_shape_vec((n, 1, 1), values_map)
            .map_err(|e| MapRegionError::Other(e.to_string()))?;
        let b = ndarray::Array3::from_shape_vec((n, 1, 1), values_model)
            .map_err(|e| MapRegionError::Other(e.to_string()))?;
        Ok(map_map_cc(&a, &b))
    }

    /// 只保留 d_min..d_max 之间的傅里叶成分
    pub fn resolution_filter(&self, id: &MapId, d_min: f64, d_max: Option<f64>) -> Result<DensityMap> {
        let map = self.map(id)?;
        let coeffs = map.map_as_fourier_coefficients(d_min, d_max);
        let mut filtered = map.fourier_coefficients_as_map(&coeffs)?;
        filtered.set_resolution(Some(d_min));
        Ok(filtered)
    }

    /// 半图局部分辨率；`resolution` 为 None 时取半图 FSC 分辨率
    pub fn local_fsc(&self, resolution: Option<f64>, nproc: usize) -> Result<LocalResolution> {
        let first = self.map(&MapId::half_map_1())?;
        let second = self.map(&MapId::half_map_2())?;
        let resolution = match resolution {
            Some(r) => r,
            None => self.resolution_from_half_maps()?,
        };
        let setup = LocalSetup {
            nproc,
            ..LocalSetup::for_map(first, resolution)
        };
        run_local_resolution(first, second, &setup)
    }
}
