//! # 容器上的掩膜
//!
//! 由主图和主模型构造掩膜，存入保留 id `mask`；
//! 把掩膜应用到容器中所有非掩膜图。
//!
//! ## 依赖关系
//! - 使用 `masking/`

use crate::error::{MapRegionError, Result};
use crate::manager::{MapId, MapModelManager, ModelId};
use crate::maps::DensityMap;
use crate::masking::{self, apply_mask, apply_mask_mean_inside};

impl MapModelManager {
    fn require_mask(&self, mask_id: &MapId) -> Result<DensityMap> {
        let mask = self.map(mask_id)?;
        if !mask.is_mask() {
            return Err(MapRegionError::NotAMask {
                id: mask_id.to_string(),
            });
        }
        Ok(mask.clone())
    }

    fn store_mask(&mut self, mask: DensityMap) -> Result<()> {
        let n_inside = mask.count_above(0.5);
        log::info!("Mask '{}': {} of {} points inside", MapId::mask(), n_inside, mask.data().len());
        self.maps.insert(MapId::mask(), mask);
        Ok(())
    }

    /// 主模型原子周围的掩膜
    pub fn create_mask_around_atoms(&mut self, radius: f64, soft_mask_radius: Option<f64>) -> Result<()> {
        let model = self.model(&ModelId::primary())?;
        let mask = masking::create_mask_around_atoms(self.primary_map()?, model, radius, soft_mask_radius)?;
        self.store_mask(mask)
    }

    /// 盒子边缘的软掩膜
    pub fn create_mask_around_edges(&mut self, soft_mask_radius: f64) -> Result<()> {
        let mask = masking::create_mask_around_edges(self.primary_map()?, soft_mask_radius)?;
        self.store_mask(mask)
    }

    /// 主图密度的掩膜；`resolution` 为 None 时用主图分辨率
    pub fn create_mask_around_density(&mut self, resolution: Option<f64>, solvent_content: f64) -> Result<()> {
        let primary = self.primary_map()?;
        let resolution = resolution.unwrap_or_else(|| primary.resolution());
        let mask = masking::create_mask_around_density(primary, resolution, solvent_content)?;
        self.store_mask(mask)
    }

    /// 已有掩膜向外膨胀
    pub fn expand_mask(&mut self, buffer_radius: f64) -> Result<()> {
        let mask = self.map(&MapId::mask())?;
        let expanded = masking::expand_mask(mask, buffer_radius)?;
        self.store_mask(expanded)
    }

    /// 所有非掩膜图乘以掩膜 `mask_id`
    pub fn apply_mask_to_maps(&mut self, mask_id: &MapId) -> Result<()> {
        let mask = self.require_mask(mask_id)?;
        for (id, map) in self.maps.iter_mut() {
            if map.is_mask() || id == mask_id {
                continue;
            }
            apply_mask(map, &mask)?;
        }
        Ok(())
    }

    /// 掩膜外取掩膜内均值
    pub fn apply_mask_to_maps_mean_inside(&mut self, mask_id: &MapId) -> Result<()> {
        let mask = self.require_mask(mask_id)?;
        for (id, map) in self.maps.iter_mut() {
            if map.is_mask() || id == mask_id {
                continue;
            }
            apply_mask_mean_inside(map, &mask)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::test_support::*;
    use crate::models::{Atom, AtomicModel, CrystalSymmetry, UnitCell};
    use ndarray::Array3;

    #[test]
    fn test_mask_stored_and_applied() {
        let mut mmm = manager_with_model();
        mmm.add_map(MapId::half_map_1(), blob_map()).unwrap();
        mmm.create_mask_around_atoms(2.0, None).unwrap();
        assert!(mmm.map(&MapId::mask()).unwrap().is_mask());
        mmm.apply_mask_to_maps(&MapId::mask()).unwrap();

        // 远离原子的点被清零，掩膜本身不变
        let far = [0usize, 19, 19];
        assert_eq!(mmm.primary_map().unwrap().data()[far], 0.0);
        assert_eq!(mmm.map(&MapId::half_map_1()).unwrap().data()[far], 0.0);
        let mask = mmm.map(&MapId::mask()).unwrap();
        assert_eq!(mask.data()[[6, 6, 5]], 1.0);
    }

    #[test]
    fn test_atom_mask_applied_to_container() {
        let symmetry = CrystalSymmetry::p1(UnitCell::cubic(20.0));
        let ones = DensityMap::new(Array3::from_elem((20, 20, 20), 1.0), symmetry.clone());
        let mut mmm = MapModelManager::new(ones.clone());
        mmm.add_map(MapId::half_map_1(), ones).unwrap();
        let model = AtomicModel::new(vec![Atom::new("C", "C", [10.0, 10.0, 10.0])], Some(symmetry));
        mmm.add_model(ModelId::primary(), model).unwrap();

        mmm.create_mask_around_atoms(1.5, None).unwrap();
        mmm.apply_mask_to_maps(&MapId::mask()).unwrap();

        // 半径 1.5 Å、间距 1 Å 的球：1 + 6 + 12
        assert_eq!(mmm.map(&MapId::mask()).unwrap().count_above(0.5), 19);
        let primary_sum: f64 = mmm.primary_map().unwrap().data().sum();
        let half_sum: f64 = mmm.map(&MapId::half_map_1()).unwrap().data().sum();
        assert!((primary_sum - 19.0).abs() < 1e-9);
        assert!((half_sum - 19.0).abs() < 1e-9);
    }

    #[test]
    fn test_not_a_mask() {
        let mut mmm = manager_with_model();
        mmm.add_map(MapId::half_map_1(), blob_map()).unwrap();
        assert!(matches!(
            mmm.apply_mask_to_maps(&MapId::half_map_1()),
            Err(MapRegionError::NotAMask { .. })
        ));
        assert!(matches!(
            mmm.apply_mask_to_maps_mean_inside(&MapId::half_map_1()),
            Err(MapRegionError::NotAMask { .. })
        ));
        assert!(matches!(mmm.expand_mask(2.0), Err(MapRegionError::MissingMap { .. })));
    }

    #[test]
    fn test_mean_inside_fills_outside() {
        let mut mmm = manager_with_model();
        mmm.create_mask_around_edges(0.0).unwrap();
        let before = mmm.primary_map().unwrap().data().clone();
        // 硬边缘掩膜处处为 1，图不变
        mmm.apply_mask_to_maps_mean_inside(&MapId::mask()).unwrap();
        let after = mmm.primary_map().unwrap().data();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_density_mask_and_expand() {
        let mut mmm = manager_with_model();
        mmm.create_mask_around_density(Some(2.0), 0.9).unwrap();
        let n_before = mmm.map(&MapId::mask()).unwrap().count_above(0.5);
        mmm.expand_mask(2.0).unwrap();
        let n_after = mmm.map(&MapId::mask()).unwrap().count_above(0.5);
        assert!(n_after > n_before);
    }
}
