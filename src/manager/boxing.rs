//! # 盒子化入口
//!
//! 六种入口各有原地版本 (`box_*`) 和复制版本 (`extract_*`)：
//! 给定边界、模型周围、密度周围、掩膜周围、NCS 独立区域周围，
//! 以及 `split.rs` 中的划分。
//!
//! 同一个盒子用于容器中的每张图与每个模型：图裁剪后得到新的 shift_cart，
//! 模型平移 (新 shift_cart - 旧 shift_cart) 并换成盒子的对称性，最后检查一致性。
//!
//! ## 依赖关系
//! - 使用 `boxing/bounds.rs`, `masking/`, `models/ncs.rs`

use crate::boxing::{bounds, BoxSpec};
use crate::error::{MapRegionError, Result};
use crate::manager::{MapId, MapModelManager, ModelId};
use crate::masking::{self, MaskOptions};
use crate::models::ncs::search_for_ncs;
use crate::models::symmetry::sub;
use crate::models::{AtomSelection, AtomicModel, NcsSpec};

use std::collections::BTreeMap;

/// 盒子化参数
#[derive(Debug, Clone)]
pub struct BoxingOptions {
    /// 盒子缓冲 (Å)
    pub box_cushion: f64,
    /// 模型周围盒子：原子选择字符串，None 为全部原子
    pub selection: Option<String>,
    /// 模型周围盒子：只用 NCS 独立部分
    pub select_unique_by_ncs: bool,
    /// 保留盒子外的原子
    pub model_can_be_outside_bounds: bool,
    /// 密度周围盒子：高于 边缘均值 + threshold·(最大值 - 边缘均值)
    pub density_threshold: f64,
    /// NCS 独立区域：分辨率（None 取主图分辨率）
    pub resolution: Option<f64>,
    pub solvent_content: f64,
}

impl Default for BoxingOptions {
    fn default() -> Self {
        Self {
            box_cushion: 5.0,
            selection: None,
            select_unique_by_ncs: false,
            model_can_be_outside_bounds: true,
            density_threshold: 0.05,
            resolution: None,
            solvent_content: MaskOptions::default().solvent_content,
        }
    }
}

impl MapModelManager {
    // ─────────────────────────────────────────────────────────────
    // 公共步骤
    // ─────────────────────────────────────────────────────────────

    /// 用盒子 `b` 裁剪所有图，并把 `models` 平移到盒子的框架
    pub(crate) fn crop_with_models(
        &self,
        b: &BoxSpec,
        models: &BTreeMap<ModelId, AtomicModel>,
    ) -> Result<MapModelManager> {
        let mut boxed = MapModelManager {
            maps: BTreeMap::new(),
            models: BTreeMap::new(),
            ignore_symmetry_conflicts: self.ignore_symmetry_conflicts,
        };
        for (id, map) in &self.maps {
            boxed.maps.insert(id.clone(), map.crop(b.lower, b.upper)?);
        }
        let target_shift = boxed.shift_cart()?;
        let symmetry = boxed.crystal_symmetry()?;
        for (id, model) in models {
            let mut m = model.clone();
            let delta = sub(&target_shift, &m.shift_cart());
            m.shift_model_and_set_crystal_symmetry(delta, Some(symmetry.clone()));
            boxed.models.insert(id.clone(), m);
        }
        boxed.check_consistency(&format!("box {}", b))?;
        log::debug!("Boxed to {} (shape {:?})", b, b.shape());
        Ok(boxed)
    }

    /// 用同一个盒子裁剪所有图、平移所有模型
    pub(crate) fn boxed_copy(&self, b: &BoxSpec, model_can_be_outside_bounds: bool) -> Result<MapModelManager> {
        let mut boxed = self.crop_with_models(b, &self.models)?;
        if !model_can_be_outside_bounds {
            boxed.remove_model_outside_map(0.0)?;
        }
        Ok(boxed)
    }

    fn apply_box(&mut self, b: &BoxSpec, model_can_be_outside_bounds: bool) -> Result<()> {
        *self = self.boxed_copy(b, model_can_be_outside_bounds)?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // 给定边界
    // ─────────────────────────────────────────────────────────────

    pub fn extract_with_bounds(&self, lower: [i64; 3], upper: [i64; 3]) -> Result<MapModelManager> {
        let b = BoxSpec::new(lower, upper)?;
        self.boxed_copy(&b, true)
    }

    pub fn box_with_bounds(&mut self, lower: [i64; 3], upper: [i64; 3]) -> Result<()> {
        *self = self.extract_with_bounds(lower, upper)?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // 模型周围
    // ─────────────────────────────────────────────────────────────

    fn bounds_around_model(&self, options: &BoxingOptions) -> Result<BoxSpec> {
        let model = self.model(&ModelId::primary())?;
        let mut selection = match &options.selection {
            Some(text) => model.selection(text)?,
            None => AtomSelection::all(model.len()),
        };
        if options.select_unique_by_ncs {
            let found = search_for_ncs(model);
            if found.ncs.n_operators() > 1 {
                log::info!("Boxing around NCS-unique part ({} copies)", found.ncs.n_operators());
                selection = selection.and(&found.master_selection);
            }
        }
        if selection.count() == 0 {
            return Err(MapRegionError::InvalidSelection {
                selection: options.selection.clone().unwrap_or_else(|| "all".to_string()),
                reason: "no atoms selected".to_string(),
            });
        }
        let sites: Vec<[f64; 3]> = selection
            .indices()
            .into_iter()
            .map(|i| model.atoms()[i].xyz)
            .collect();
        Ok(bounds::around_sites(self.primary_map()?, &sites, options.box_cushion))
    }

    pub fn extract_around_model(&self, options: &BoxingOptions) -> Result<MapModelManager> {
        let b = self.bounds_around_model(options)?;
        self.boxed_copy(&b, options.model_can_be_outside_bounds)
    }

    pub fn box_around_model(&mut self, options: &BoxingOptions) -> Result<()> {
        let b = self.bounds_around_model(options)?;
        self.apply_box(&b, options.model_can_be_outside_bounds)
    }

    // ─────────────────────────────────────────────────────────────
    // 密度周围
    // ─────────────────────────────────────────────────────────────

    fn bounds_around_density(&self, options: &BoxingOptions) -> Result<BoxSpec> {
        bounds::around_density(self.primary_map()?, options.density_threshold, options.box_cushion)
            .ok_or_else(|| {
                MapRegionError::InvalidArgument(format!(
                    "no density above threshold {:.3} to box around",
                    options.density_threshold
                ))
            })
    }

    pub fn extract_around_density(&self, options: &BoxingOptions) -> Result<MapModelManager> {
        let b = self.bounds_around_density(options)?;
        self.boxed_copy(&b, options.model_can_be_outside_bounds)
    }

    pub fn box_around_density(&mut self, options: &BoxingOptions) -> Result<()> {
        let b = self.bounds_around_density(options)?;
        self.apply_box(&b, options.model_can_be_outside_bounds)
    }

    // ─────────────────────────────────────────────────────────────
    // 掩膜周围
    // ─────────────────────────────────────────────────────────────

    fn bounds_around_mask(&self, mask_id: &MapId, options: &BoxingOptions) -> Result<BoxSpec> {
        let mask = self.map(mask_id)?;
        if !mask.is_mask() {
            return Err(MapRegionError::NotAMask {
                id: mask_id.to_string(),
            });
        }
        bounds::around_mask(mask, options.box_cushion).ok_or_else(|| {
            MapRegionError::InvalidArgument(format!("mask '{}' is empty", mask_id))
        })
    }

    pub fn extract_around_mask(&self, mask_id: &MapId, options: &BoxingOptions) -> Result<MapModelManager> {
        let b = self.bounds_around_mask(mask_id, options)?;
        self.boxed_copy(&b, options.model_can_be_outside_bounds)
    }

    pub fn box_around_mask(&mut self, mask_id: &MapId, options: &BoxingOptions) -> Result<()> {
        let b = self.bounds_around_mask(mask_id, options)?;
        self.apply_box(&b, options.model_can_be_outside_bounds)
    }

    // ─────────────────────────────────────────────────────────────
    // NCS 独立区域
    // ─────────────────────────────────────────────────────────────

    /// NCS：主图已有的描述，否则从模型搜索
    fn ncs_for_unique(&self) -> Result<NcsSpec> {
        let primary = self.primary_map()?;
        if let Some(ncs) = primary.ncs() {
            return Ok(ncs.clone());
        }
        Ok(self
            .primary_model()
            .map(|m| search_for_ncs(m).ncs)
            .unwrap_or_default())
    }

    /// 独立区域掩膜 -> 盒子 -> 其他图乘以掩膜
    fn unique_region(&self, options: &BoxingOptions) -> Result<MapModelManager> {
        let primary = self.primary_map()?;
        let ncs = self.ncs_for_unique()?;
        let resolution = options.resolution.unwrap_or_else(|| primary.resolution());
        let unique = masking::create_mask_around_unique(primary, &ncs, resolution, options.solvent_content)?;

        let mut with_mask = self.clone();
        with_mask.maps.insert(MapId::mask(), unique);
        let b = with_mask.bounds_around_mask(&MapId::mask(), options)?;
        let mut boxed = with_mask.boxed_copy(&b, options.model_can_be_outside_bounds)?;
        boxed.apply_mask_to_maps(&MapId::mask())?;
        Ok(boxed)
    }

    pub fn extract_around_unique(&self, options: &BoxingOptions) -> Result<MapModelManager> {
        self.unique_region(options)
    }

    pub fn box_around_unique(&mut self, options: &BoxingOptions) -> Result<()> {
        *self = self.unique_region(options)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::test_support::*;

    #[test]
    fn test_box_keeps_shift_consistent_and_sites() {
        let mut mmm = manager_with_model();
        mmm.add_map(MapId::half_map_1(), blob_map()).unwrap();
        let original = mmm.primary_model().unwrap().get_sites_cart();
        mmm.box_with_bounds([3, 2, 1], [12, 11, 10]).unwrap();
        mmm.check_consistency("test").unwrap();
        let shift = mmm.shift_cart().unwrap();
        assert!((shift[0] + 3.0).abs() < 1e-9);
        assert!((shift[2] + 1.0).abs() < 1e-9);
        // 工作坐标 - shift_cart = 原始坐标
        let boxed = mmm.primary_model().unwrap().get_sites_cart();
        for (a, b) in original.iter().zip(&boxed) {
            for i in 0..3 {
                assert!((b[i] - shift[i] - a[i]).abs() < 1e-9);
            }
        }
        assert_eq!(mmm.map(&MapId::half_map_1()).unwrap().shape(), [10, 10, 10]);
    }

    #[test]
    fn test_box_twice_accumulates_shift() {
        let mut mmm = manager_with_model();
        mmm.box_with_bounds([2, 2, 2], [17, 17, 17]).unwrap();
        mmm.box_with_bounds([1, 1, 1], [10, 10, 10]).unwrap();
        let shift = mmm.shift_cart().unwrap();
        assert!((shift[1] + 3.0).abs() < 1e-9);
        assert_eq!(mmm.primary_map().unwrap().origin_shift_grid_units(), [3, 3, 3]);
        mmm.check_consistency("twice").unwrap();
    }

    #[test]
    fn test_extract_around_model_selection() {
        let mmm = manager_with_model();
        let options = BoxingOptions {
            selection: Some("chain A".to_string()),
            box_cushion: 2.0,
            ..BoxingOptions::default()
        };
        let boxed = mmm.extract_around_model(&options).unwrap();
        let shape = boxed.primary_map().unwrap().shape();
        assert!(shape[0] < 20);
        // 复制版本不改变原容器
        assert_eq!(mmm.primary_map().unwrap().shape(), [20, 20, 20]);
        // 所有原子都留在模型中
        assert_eq!(boxed.primary_model().unwrap().len(), 12);

        let bad = BoxingOptions {
            selection: Some("chain Z".to_string()),
            ..BoxingOptions::default()
        };
        assert!(mmm.extract_around_model(&bad).is_err());
    }

    #[test]
    fn test_box_around_density_and_mask() {
        let mut mmm = manager_with_model();
        let before = mmm.primary_map().unwrap().shape();
        let options = BoxingOptions {
            density_threshold: 0.5,
            box_cushion: 1.0,
            ..BoxingOptions::default()
        };
        let boxed = mmm.extract_around_density(&options).unwrap();
        assert!(boxed.primary_map().unwrap().shape()[0] < before[0]);

        assert!(matches!(
            mmm.box_around_mask(&MapId::primary(), &options),
            Err(MapRegionError::NotAMask { .. })
        ));
        mmm.create_mask_around_atoms(3.0, None).unwrap();
        mmm.box_around_mask(&MapId::mask(), &options).unwrap();
        assert!(mmm.primary_map().unwrap().shape()[0] < before[0]);
        mmm.check_consistency("mask").unwrap();
    }

    #[test]
    fn test_box_around_unique_masks_other_copy() {
        let mut mmm = MapModelManager::new(blob_map());
        let mut map = blob_map();
        map.set_ncs(Some(NcsSpec::cyclic(2, [10.0, 10.0, 10.0])));
        mmm.replace_map(&MapId::primary(), map).unwrap();
        let options = BoxingOptions {
            box_cushion: 1.0,
            resolution: Some(2.0),
            solvent_content: 0.9,
            ..BoxingOptions::default()
        };
        mmm.box_around_unique(&options).unwrap();
        assert!(mmm.has_map(&MapId::mask()));
        let primary = mmm.primary_map().unwrap();
        assert!(primary.shape().iter().any(|&n| n < 20));
        mmm.check_consistency("unique").unwrap();
    }
}
