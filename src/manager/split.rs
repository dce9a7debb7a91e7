//! # 划分与合并
//!
//! ## 功能
//! - 按链 / 连续片段 / 给定选择 / 平铺，把主图和主模型划分成若干盒子
//! - 每个盒子是一个独立的容器，含裁剪后的所有图和所选原子
//! - 可选：把盒子主图中未选中原子周围的密度替换为 `masked_value`
//! - 合并：盒子中（可能已修改的）坐标平移回本容器，按选择写回主模型
//!
//! ## 依赖关系
//! - 使用 `boxing/planner.rs`, `masking/`

use crate::boxing::{planner::plan_split, BoxSpec, SelectionStrategy, SplitOptions};
use crate::error::{MapRegionError, Result};
use crate::manager::{inside_map, MapId, MapModelManager, ModelId};
use crate::masking::{create_mask_around_atoms, fill_where_masked};
use crate::models::model::rms_difference;
use crate::models::symmetry::sub;
use crate::models::{AtomSelection, AtomicModel};

use std::collections::BTreeMap;

/// 划分出的一个区域
#[derive(Debug, Clone)]
pub struct BoxedRegion {
    /// 盒子容器（主模型只含所选原子）
    pub manager: MapModelManager,
    /// 所选原子在父容器主模型中的位置
    pub selection: AtomSelection,
    /// 裁剪用的盒子（父容器工作格点）
    pub box_spec: BoxSpec,
}

/// 划分结果
#[derive(Debug, Clone, Default)]
pub struct SplitResult {
    pub regions: Vec<BoxedRegion>,
}

impl SplitResult {
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl MapModelManager {
    pub fn split_up_map_and_model_by_chain(&self, options: &SplitOptions) -> Result<SplitResult> {
        self.split_with_strategy(&SelectionStrategy::ByChain, options)
    }

    pub fn split_up_map_and_model_by_segment(&self, options: &SplitOptions) -> Result<SplitResult> {
        self.split_with_strategy(&SelectionStrategy::BySegment, options)
    }

    pub fn split_up_map_and_model_by_supplied_selections(
        &self,
        selections: Vec<AtomSelection>,
        options: &SplitOptions,
    ) -> Result<SplitResult> {
        self.split_with_strategy(&SelectionStrategy::Supplied(selections), options)
    }

    /// 平铺；没有模型时每个盒子只含图
    pub fn split_up_map_and_model_by_boxes(
        &self,
        target_for_boxes: usize,
        options: &SplitOptions,
    ) -> Result<SplitResult> {
        self.split_with_strategy(&SelectionStrategy::Tiling { target_for_boxes }, options)
    }

    fn split_with_strategy(&self, strategy: &SelectionStrategy, options: &SplitOptions) -> Result<SplitResult> {
        let primary = self.primary_map()?;
        let empty;
        let model = match (self.primary_model(), strategy) {
            (Some(m), _) => m,
            (None, SelectionStrategy::Tiling { .. }) => {
                empty = AtomicModel::new(Vec::new(), Some(primary.crystal_symmetry()));
                &empty
            }
            (None, _) => {
                return Err(MapRegionError::MissingModel {
                    id: ModelId::primary().to_string(),
                })
            }
        };

        let plan = plan_split(primary, model, strategy, options)?;
        log::info!("Splitting by {} into {} boxes", strategy, plan.len());

        let mut regions = Vec::with_capacity(plan.len());
        for entry in &plan.entries {
            let b = *entry.crop_box();
            let mut models = BTreeMap::new();
            if self.primary_model().is_some() {
                models.insert(ModelId::primary(), model.select(&entry.selection));
            }
            let mut boxed = self.crop_with_models(&b, &models)?;
            let mut selection = entry.selection.clone();

            if !options.model_can_be_outside_bounds && self.primary_model().is_some() {
                selection = drop_atoms_outside(&mut boxed, &selection)?;
            }
            if options.mask_around_unselected_atoms && self.primary_model().is_some() {
                mask_unselected(&mut boxed, self, model, &selection, options)?;
            }
            regions.push(BoxedRegion {
                manager: boxed,
                selection,
                box_spec: b,
            });
        }
        Ok(SplitResult { regions })
    }

    /// 把各盒子模型的坐标写回主模型，返回每个盒子的 RMSD
    pub fn merge_split_maps_and_models(&mut self, split: &SplitResult) -> Result<Vec<f64>> {
        let mut rmsd_list = Vec::with_capacity(split.len());
        for (i, region) in split.regions.iter().enumerate() {
            if region.manager.primary_model().is_none() {
                continue;
            }
            let boxed_model = self.get_model_from_other(&region.manager, &ModelId::primary())?;
            let new_sites = boxed_model.get_sites_cart();
            let model = self.model_mut(&ModelId::primary())?;
            let old_sites: Vec<[f64; 3]> = region
                .selection
                .indices()
                .into_iter()
                .map(|idx| model.atoms()[idx].xyz)
                .collect();
            model.set_selected_sites_cart(&region.selection, &new_sites)?;
            let rmsd = rms_difference(&old_sites, &new_sites).unwrap_or(0.0);
            log::info!("Box {}: {} atoms, RMSD {:.3} A", i + 1, new_sites.len(), rmsd);
            rmsd_list.push(rmsd);
        }
        self.check_consistency("merge")?;
        Ok(rmsd_list)
    }
}

/// 删除盒子外的所选原子，返回收缩后的选择
fn drop_atoms_outside(boxed: &mut MapModelManager, selection: &AtomSelection) -> Result<AtomSelection> {
    let primary = boxed.primary_map()?.clone();
    let model = boxed.model_mut(&ModelId::primary())?;
    let keep = inside_map(&primary, model, 0.0);
    let name = model.name.clone();
    *model = model.select(&keep);
    model.name = name;

    let mut narrowed = AtomSelection::none(selection.len());
    for (k, idx) in selection.indices().into_iter().enumerate() {
        if keep.get(k) {
            narrowed.0[idx] = true;
        }
    }
    Ok(narrowed)
}

/// 盒子主图中，未选中原子周围的点填 `masked_value`
fn mask_unselected(
    boxed: &mut MapModelManager,
    parent: &MapModelManager,
    model: &AtomicModel,
    selection: &AtomSelection,
    options: &SplitOptions,
) -> Result<()> {
    let unselected = selection.not();
    if unselected.count() == 0 {
        return Ok(());
    }
    let mut others = model.select(&unselected);
    let delta = sub(&boxed.shift_cart()?, &parent.shift_cart()?);
    others.shift_model_and_set_crystal_symmetry(delta, Some(boxed.crystal_symmetry()?));

    let primary = boxed.map_mut(&MapId::primary())?;
    let soft = primary.resolution();
    let mask = create_mask_around_atoms(primary, &others, options.mask_radius, Some(soft))?;
    fill_where_masked(primary, &mask, options.masked_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::test_support::*;

    #[test]
    fn test_split_by_chain_then_merge_is_identity() {
        let mut mmm = manager_with_model();
        mmm.add_map(MapId::half_map_1(), blob_map()).unwrap();
        let before = mmm.primary_model().unwrap().get_sites_cart();

        let split = mmm.split_up_map_and_model_by_chain(&SplitOptions::default()).unwrap();
        assert_eq!(split.len(), 2);
        for region in &split.regions {
            assert_eq!(region.manager.primary_model().unwrap().len(), 6);
            assert!(region.manager.has_map(&MapId::half_map_1()));
            region.manager.check_consistency("region").unwrap();
        }

        let rmsd = mmm.merge_split_maps_and_models(&split).unwrap();
        assert_eq!(rmsd.len(), 2);
        assert!(rmsd.iter().all(|r| r.abs() < 1e-9));
        let after = mmm.primary_model().unwrap().get_sites_cart();
        assert!(rms_difference(&before, &after).unwrap() < 1e-9);
    }

    #[test]
    fn test_merge_writes_moved_atoms() {
        let mut mmm = manager_with_model();
        let mut split = mmm.split_up_map_and_model_by_chain(&SplitOptions::default()).unwrap();
        // 第二个盒子整体平移 1 Å
        let boxed = split.regions[1].manager.model_mut(&ModelId::primary()).unwrap();
        let moved: Vec<[f64; 3]> = boxed
            .get_sites_cart()
            .iter()
            .map(|s| [s[0] + 1.0, s[1], s[2]])
            .collect();
        boxed.set_sites_cart(&moved).unwrap();

        let rmsd = mmm.merge_split_maps_and_models(&split).unwrap();
        assert!(rmsd[0].abs() < 1e-9);
        assert!((rmsd[1] - 1.0).abs() < 1e-9);
        let chain_b = mmm.primary_model().unwrap().selection("chain B").unwrap();
        let first_b = chain_b.indices()[0];
        assert!((mmm.primary_model().unwrap().atoms()[first_b].xyz[0] - 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_split_without_model() {
        let mmm = MapModelManager::new(blob_map());
        assert!(matches!(
            mmm.split_up_map_and_model_by_chain(&SplitOptions::default()),
            Err(MapRegionError::MissingModel { .. })
        ));
        let options = SplitOptions {
            skip_empty_boxes: false,
            select_final_boxes_based_on_model: false,
            ..SplitOptions::default()
        };
        let split = mmm.split_up_map_and_model_by_boxes(8, &options).unwrap();
        assert_eq!(split.len(), 8);
        assert!(split.regions.iter().all(|r| r.manager.primary_model().is_none()));
    }

    #[test]
    fn test_mask_around_unselected_atoms() {
        let mmm = manager_with_model();
        let options = SplitOptions {
            box_cushion: 12.0,
            mask_around_unselected_atoms: true,
            ..SplitOptions::default()
        };
        let split = mmm.split_up_map_and_model_by_chain(&options).unwrap();
        let region = &split.regions[0];
        let primary = region.manager.primary_map().unwrap();
        // 链 B 的第一个原子落在链 A 的盒子里，被填成 masked_value
        let shift = region.manager.shift_cart().unwrap();
        let b_atom = [13.0 + shift[0], 12.5 + shift[1], 11.0 + shift[2]];
        let g = primary.grid_position(&b_atom);
        let idx = [g[0].round() as usize, g[1].round() as usize, g[2].round() as usize];
        assert_eq!(primary.data()[idx], options.masked_value);
        // 链 A 的原子处保持原值
        let a_atom = [5.0 + shift[0], 5.5 + shift[1], 5.0 + shift[2]];
        let g = primary.grid_position(&a_atom);
        let idx = [g[0].round() as usize, g[1].round() as usize, g[2].round() as usize];
        assert!(primary.data()[idx] > options.masked_value);
    }

    #[test]
    fn test_model_inside_bounds_narrows_selection() {
        let mmm = manager_with_model();
        let options = SplitOptions {
            box_cushion: 0.0,
            model_can_be_outside_bounds: false,
            ..SplitOptions::default()
        };
        let selections = vec![AtomSelection::all(12)];
        let split = mmm
            .split_up_map_and_model_by_supplied_selections(selections, &options)
            .unwrap();
        let region = &split.regions[0];
        assert_eq!(region.selection.count(), region.manager.primary_model().unwrap().len());
    }
}
