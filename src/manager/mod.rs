//! # 图-模型容器
//!
//! `MapModelManager` 按 id 持有若干共处同一工作框架的密度图与原子模型。
//! 所有图与模型的 shift_cart 必须一致（容差 1e-6），任何改变框架的操作
//! 都对全部图与模型施加同一平移，然后检查一致性。
//!
//! ## 保留 id
//! - 图：`map_manager`（主图）、`map_manager_1`、`map_manager_2`（半图）、`mask`
//! - 模型：`model`
//!
//! ## 子模块
//! - `boxing`：六种盒子化入口（原地 `box_*` / 复制 `extract_*`）
//! - `split`：按链 / 片段 / 给定选择 / 平铺划分与合并
//! - `masks`：掩膜构造与应用
//! - `sharpen`：半图 / 模型 / 外部图锐化，局部与各向异性
//! - `analysis`：FSC、相关系数、模型图、分辨率滤波、局部分辨率
//!
//! ## 依赖关系
//! - 被 `commands/` 使用
//! - 使用 `maps/`, `models/`, `boxing/`, `masking/`, `local/`

pub mod analysis;
pub mod boxing;
pub mod masks;
pub mod sharpen;
pub mod split;

use crate::error::{MapRegionError, Result};
use crate::maps::DensityMap;
use crate::models::symmetry::{check_shift_consistency, sub, CrystalSymmetry};
use crate::models::{AtomSelection, AtomicModel};

use std::collections::BTreeMap;
use std::fmt;

/// 图的 id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapId(String);

impl MapId {
    pub fn new(id: impl Into<String>) -> Self {
        MapId(id.into())
    }

    /// 主图
    pub fn primary() -> Self {
        Self::new("map_manager")
    }

    pub fn half_map_1() -> Self {
        Self::new("map_manager_1")
    }

    pub fn half_map_2() -> Self {
        Self::new("map_manager_2")
    }

    pub fn mask() -> Self {
        Self::new("mask")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 模型的 id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        ModelId(id.into())
    }

    pub fn primary() -> Self {
        Self::new("model")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 图与模型的容器
#[derive(Debug, Clone)]
pub struct MapModelManager {
    maps: BTreeMap<MapId, DensityMap>,
    models: BTreeMap<ModelId, AtomicModel>,
    ignore_symmetry_conflicts: bool,
}

impl MapModelManager {
    /// 以主图创建
    pub fn new(primary: DensityMap) -> Self {
        let mut maps = BTreeMap::new();
        maps.insert(MapId::primary(), primary);
        MapModelManager {
            maps,
            models: BTreeMap::new(),
            ignore_symmetry_conflicts: false,
        }
    }

    /// 允许模型与图的晶胞不一致
    pub fn set_ignore_symmetry_conflicts(&mut self, ignore: bool) {
        self.ignore_symmetry_conflicts = ignore;
    }

    // ─────────────────────────────────────────────────────────────
    // 图
    // ─────────────────────────────────────────────────────────────

    pub fn map(&self, id: &MapId) -> Result<&DensityMap> {
        self.maps.get(id).ok_or_else(|| MapRegionError::MissingMap {
            id: id.to_string(),
        })
    }

    pub fn map_mut(&mut self, id: &MapId) -> Result<&mut DensityMap> {
        self.maps.get_mut(id).ok_or_else(|| MapRegionError::MissingMap {
            id: id.to_string(),
        })
    }

    pub fn has_map(&self, id: &MapId) -> bool {
        self.maps.contains_key(id)
    }

    pub fn primary_map(&self) -> Result<&DensityMap> {
        self.map(&MapId::primary())
    }

    pub fn map_ids(&self) -> Vec<MapId> {
        self.maps.keys().cloned().collect()
    }

    /// 加入一张与主图同框架的图
    pub fn add_map(&mut self, id: MapId, map: DensityMap) -> Result<()> {
        if let Some(primary) = self.maps.get(&MapId::primary()) {
            if id != MapId::primary() {
                primary
                    .unit_cell_crystal_symmetry()
                    .require_similar(map.unit_cell_crystal_symmetry(), &format!("map '{}'", id))?;
                if !primary.is_similar_default(&map) {
                    return Err(MapRegionError::InvalidArgument(format!(
                        "map '{}' (shape {:?}, origin shift {:?}) is not on the gridding of '{}' (shape {:?}, origin shift {:?})",
                        id,
                        map.shape(),
                        map.origin_shift_grid_units(),
                        MapId::primary(),
                        primary.shape(),
                        primary.origin_shift_grid_units()
                    )));
                }
            }
        }
        self.maps.insert(id, map);
        Ok(())
    }

    /// 替换已有的图（框架不变）
    pub fn replace_map(&mut self, id: &MapId, map: DensityMap) -> Result<()> {
        let current = self.map(id)?;
        check_shift_consistency(&format!("replace map '{}'", id), current.shift_cart(), map.shift_cart())?;
        self.maps.insert(id.clone(), map);
        Ok(())
    }

    pub fn remove_map(&mut self, id: &MapId) -> Option<DensityMap> {
        self.maps.remove(id)
    }

    // ─────────────────────────────────────────────────────────────
    // 模型
    // ─────────────────────────────────────────────────────────────

    pub fn model(&self, id: &ModelId) -> Result<&AtomicModel> {
        self.models.get(id).ok_or_else(|| MapRegionError::MissingModel {
            id: id.to_string(),
        })
    }

    pub fn model_mut(&mut self, id: &ModelId) -> Result<&mut AtomicModel> {
        self.models.get_mut(id).ok_or_else(|| MapRegionError::MissingModel {
            id: id.to_string(),
        })
    }

    pub fn primary_model(&self) -> Option<&AtomicModel> {
        self.models.get(&ModelId::primary())
    }

    pub fn model_ids(&self) -> Vec<ModelId> {
        self.models.keys().cloned().collect()
    }

    /// 加入模型；模型先被平移到本容器的工作框架
    pub fn add_model(&mut self, id: ModelId, mut model: AtomicModel) -> Result<()> {
        let primary = self.primary_map()?;
        if let Some(symmetry) = model.unit_cell_crystal_symmetry() {
            if !self.ignore_symmetry_conflicts {
                primary
                    .unit_cell_crystal_symmetry()
                    .require_similar(symmetry, &format!("model '{}'", id))?;
            }
        }
        self.shift_any_model_to_match(&mut model)?;
        self.models.insert(id, model);
        Ok(())
    }

    pub fn remove_model(&mut self, id: &ModelId) -> Option<AtomicModel> {
        self.models.remove(id)
    }

    // ─────────────────────────────────────────────────────────────
    // 坐标框架
    // ─────────────────────────────────────────────────────────────

    /// 工作坐标 = 原始坐标 + shift_cart
    pub fn shift_cart(&self) -> Result<[f64; 3]> {
        Ok(self.primary_map()?.shift_cart())
    }

    /// 当前工作对称性
    pub fn crystal_symmetry(&self) -> Result<CrystalSymmetry> {
        Ok(self.primary_map()?.crystal_symmetry())
    }

    /// 把任意模型平移到本容器的工作框架，设置工作对称性
    pub fn shift_any_model_to_match(&self, model: &mut AtomicModel) -> Result<()> {
        let primary = self.primary_map()?;
        if model.unit_cell_crystal_symmetry().is_none() || self.ignore_symmetry_conflicts {
            model.set_unit_cell_crystal_symmetry(primary.unit_cell_crystal_symmetry().clone());
        }
        model.shift_to(primary.shift_cart(), Some(primary.crystal_symmetry()));
        Ok(())
    }

    /// 另一个容器（如盒子）中的模型，平移到本容器的框架
    pub fn get_model_from_other(&self, other: &MapModelManager, id: &ModelId) -> Result<AtomicModel> {
        let mut model = other.model(id)?.clone();
        let delta = sub(&self.shift_cart()?, &other.shift_cart()?);
        model.shift_model_and_set_crystal_symmetry(delta, Some(self.crystal_symmetry()?));
        Ok(model)
    }

    /// 移动所有图的原点到 `desired_origin`，模型随之平移
    pub fn shift_origin(&mut self, desired_origin: [i64; 3]) -> Result<()> {
        let mut delta: Option<[f64; 3]> = None;
        for (id, map) in self.maps.iter_mut() {
            let d = map.shift_origin(desired_origin);
            match delta {
                None => delta = Some(d),
                Some(expected) => check_shift_consistency(&format!("shift origin of '{}'", id), expected, d)?,
            }
        }
        let delta = delta.unwrap_or([0.0; 3]);
        let symmetry = self.crystal_symmetry()?;
        for model in self.models.values_mut() {
            model.shift_model_and_set_crystal_symmetry(delta, Some(symmetry.clone()));
        }
        self.check_consistency("shift_origin")
    }

    /// 所有图与模型的 shift_cart 与主图一致
    pub fn check_consistency(&self, context: &str) -> Result<()> {
        let expected = self.shift_cart()?;
        for (id, map) in &self.maps {
            check_shift_consistency(&format!("{}: map '{}'", context, id), expected, map.shift_cart())?;
        }
        for (id, model) in &self.models {
            check_shift_consistency(&format!("{}: model '{}'", context, id), expected, model.shift_cart())?;
        }
        Ok(())
    }

    /// 删除距盒子超过 `boundary` Å 的原子，返回每个模型删除的原子数
    pub fn remove_model_outside_map(&mut self, boundary: f64) -> Result<Vec<(ModelId, usize)>> {
        let primary = self
            .maps
            .get(&MapId::primary())
            .ok_or_else(|| MapRegionError::MissingMap {
                id: MapId::primary().to_string(),
            })?;
        let mut removed = Vec::new();
        for (id, model) in self.models.iter_mut() {
            let keep = inside_map(primary, model, boundary);
            let n_removed = model.len() - keep.count();
            if n_removed > 0 {
                let name = model.name.clone();
                *model = model.select(&keep);
                model.name = name;
                log::info!("Removed {} atoms of '{}' outside the map", n_removed, id);
            }
            removed.push((id.clone(), n_removed));
        }
        Ok(removed)
    }
}

/// 距盒子不超过 `boundary` Å 的原子
pub(crate) fn inside_map(map: &DensityMap, model: &AtomicModel, boundary: f64) -> AtomSelection {
    let shape = map.shape();
    let spacing = map.grid_spacing();
    AtomSelection(
        model
            .atoms()
            .iter()
            .map(|a| {
                let g = map.grid_position(&a.xyz);
                (0..3).all(|i| {
                    let margin = boundary / spacing[i];
                    g[i] >= -margin && g[i] <= (shape[i] - 1) as f64 + margin
                })
            })
            .collect(),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::{Atom, CrystalSymmetry, UnitCell};
    use ndarray::Array3;

    /// 20 Å 立方晶胞、20³ 格点，两个高斯团块
    pub fn blob_map() -> DensityMap {
        let centers = [[6.0, 6.0, 6.0], [14.0, 13.0, 12.0]];
        let data = Array3::from_shape_fn((20, 20, 20), |(i, j, k)| {
            let p = [i as f64, j as f64, k as f64];
            centers
                .iter()
                .map(|c| {
                    let d2 = (p[0] - c[0]).powi(2) + (p[1] - c[1]).powi(2) + (p[2] - c[2]).powi(2);
                    (-d2 / 4.0).exp()
                })
                .sum()
        });
        let mut map = DensityMap::new(data, CrystalSymmetry::p1(UnitCell::cubic(20.0)));
        map.set_resolution(Some(3.0));
        map
    }

    /// 加上可复现的均匀噪声
    pub fn noisy(map: &DensityMap, seed: u64, amplitude: f64) -> DensityMap {
        let mut state = seed;
        let data = map.data().mapv(|v| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let u = (state >> 33) as f64 / (1u64 << 31) as f64 - 0.5;
            v + amplitude * u
        });
        let mut out = map.clone();
        *out.data_mut() = data;
        out
    }

    /// 两条链，每条三个残基
    pub fn two_chain_model() -> AtomicModel {
        let mut atoms = Vec::new();
        for (c, chain) in ["A", "B"].iter().enumerate() {
            for r in 0..3 {
                let base = if c == 0 { [5.0, 5.0, 5.0] } else { [13.0, 12.0, 11.0] };
                atoms.push(
                    Atom::new("CA", "C", [base[0] + 1.2 * r as f64, base[1] + 0.5, base[2]])
                        .with_residue(chain, "ALA", r + 1),
                );
                atoms.push(
                    Atom::new("O", "O", [base[0] + 1.2 * r as f64, base[1] + 1.5, base[2] + 0.7])
                        .with_residue(chain, "ALA", r + 1),
                );
            }
        }
        AtomicModel::new(atoms, Some(CrystalSymmetry::p1(UnitCell::cubic(20.0))))
    }

    pub fn manager_with_model() -> MapModelManager {
        let mut mmm = MapModelManager::new(blob_map());
        mmm.add_model(ModelId::primary(), two_chain_model()).unwrap();
        mmm
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::{CrystalSymmetry, UnitCell};
    use ndarray::Array3;

    #[test]
    fn test_missing_ids() {
        let mmm = MapModelManager::new(blob_map());
        assert!(matches!(
            mmm.map(&MapId::half_map_1()),
            Err(MapRegionError::MissingMap { .. })
        ));
        assert!(matches!(
            mmm.model(&ModelId::primary()),
            Err(MapRegionError::MissingModel { .. })
        ));
    }

    #[test]
    fn test_symmetry_conflict_and_override() {
        let mut model = two_chain_model();
        model.set_unit_cell_crystal_symmetry(CrystalSymmetry::p1(UnitCell::cubic(30.0)));
        let mut mmm = MapModelManager::new(blob_map());
        assert!(matches!(
            mmm.add_model(ModelId::primary(), model.clone()),
            Err(MapRegionError::SymmetryMismatch { .. })
        ));
        mmm.set_ignore_symmetry_conflicts(true);
        assert!(mmm.add_model(ModelId::primary(), model).is_ok());
    }

    #[test]
    fn test_add_map_requires_same_gridding() {
        let mut mmm = MapModelManager::new(blob_map());
        let other = DensityMap::new(
            Array3::zeros((10, 10, 10)),
            CrystalSymmetry::p1(UnitCell::cubic(20.0)),
        );
        assert!(mmm.add_map(MapId::half_map_1(), other).is_err());
        assert!(mmm.add_map(MapId::half_map_1(), blob_map()).is_ok());
    }

    #[test]
    fn test_shift_origin_moves_models() {
        let mut mmm = manager_with_model();
        let before = mmm.primary_model().unwrap().atoms()[0].xyz;
        mmm.shift_origin([2, 0, 0]).unwrap();
        let after = mmm.primary_model().unwrap().atoms()[0].xyz;
        assert!((after[0] - before[0] - 2.0).abs() < 1e-9);
        // 再次移到同一原点不做任何改变
        mmm.shift_origin([2, 0, 0]).unwrap();
        let again = mmm.primary_model().unwrap().atoms()[0].xyz;
        assert_eq!(after, again);
        mmm.check_consistency("test").unwrap();
    }

    #[test]
    fn test_remove_model_outside_map() {
        let mut mmm = manager_with_model();
        mmm.box_with_bounds([0, 0, 0], [9, 9, 9]).unwrap();
        let removed = mmm.remove_model_outside_map(0.0).unwrap();
        assert_eq!(removed[0].1, 6);
        assert_eq!(mmm.primary_model().unwrap().len(), 6);
    }
}
