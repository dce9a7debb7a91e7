//! # 划分方案
//!
//! 由图、模型和选择策略生成 `SplitPlan`。
//!
//! ## 规则
//! - 水与 HETATM 可整体跳过（`skip_waters` / `skip_hetero`）
//! - 按链 / 片段 / 给定选择：盒子总是围绕所选原子（加 `box_cushion`）
//! - 平铺：边长 (V/target)^(1/3)，每轴 max(1, round(L/边长)) 个，格点均分；
//!   每个盒子另有扩展 `box_cushion` 的缓冲盒子；有 NCS 时去掉与已保留盒子等价的盒子
//! - 片段断点：残基号跳跃 > 1，或相邻残基不接触
//!   （CA–CA < 4.5 Å，或 P–P < 8 Å，否则任意原子对 < 2.5 Å）
//!
//! ## 依赖关系
//! - 被 `manager/split.rs`, `local/mod.rs` 使用
//! - 使用 `boxing/bounds.rs`, `maps/`, `models/`

use crate::boxing::{bounds, BoxSpec, PlanEntry, SelectionStrategy, SplitOptions, SplitPlan};
use crate::error::Result;
use crate::maps::DensityMap;
use crate::models::model::ResidueGroup;
use crate::models::symmetry::distance;
use crate::models::{AtomSelection, AtomicModel};

const MAX_CA_CA: f64 = 4.5;
const MAX_P_P: f64 = 8.0;
const MAX_ANY_CONTACT: f64 = 2.5;

/// 生成划分方案
pub fn plan_split(
    map: &DensityMap,
    model: &AtomicModel,
    strategy: &SelectionStrategy,
    options: &SplitOptions,
) -> Result<SplitPlan> {
    let keep = skip_selection(model, options);

    let selections: Vec<AtomSelection> = match strategy {
        SelectionStrategy::ByChain => model
            .chain_ids()
            .iter()
            .map(|id| {
                AtomSelection(model.atoms().iter().map(|a| &a.chain_id == id).collect())
            })
            .collect(),
        SelectionStrategy::BySegment => segment_selections(model),
        SelectionStrategy::Supplied(list) => list.clone(),
        SelectionStrategy::Tiling { target_for_boxes } => {
            return plan_tiles(map, model, *target_for_boxes, &keep, options);
        }
    };

    let mut plan = SplitPlan::default();
    for selection in selections {
        let selection = if selection.len() == keep.len() {
            selection.and(&keep)
        } else {
            AtomSelection::none(model.len())
        };
        if selection.count() == 0 && options.skip_empty_boxes {
            continue;
        }
        let sites = selected_sites(model, &selection);
        plan.entries.push(PlanEntry {
            box_spec: bounds::around_sites(map, &sites, options.box_cushion),
            selection,
            cushion_box: None,
        });
    }
    log::debug!("Plan ({}): {} boxes", strategy, plan.len());
    Ok(plan)
}

/// 水 / HETATM 过滤后保留的原子
fn skip_selection(model: &AtomicModel, options: &SplitOptions) -> AtomSelection {
    AtomSelection(
        model
            .atoms()
            .iter()
            .map(|a| !(options.skip_waters && a.is_water()) && !(options.skip_hetero && a.hetero))
            .collect(),
    )
}

fn selected_sites(model: &AtomicModel, selection: &AtomSelection) -> Vec<[f64; 3]> {
    selection
        .indices()
        .into_iter()
        .map(|i| model.atoms()[i].xyz)
        .collect()
}

// ─────────────────────────────────────────────────────────────
// 片段
// ─────────────────────────────────────────────────────────────

/// 连续片段的原子选择
pub fn segment_selections(model: &AtomicModel) -> Vec<AtomSelection> {
    let groups = model.residue_groups();
    let mut segments: Vec<Vec<usize>> = Vec::new();
    let mut previous: Option<&ResidueGroup> = None;
    for group in &groups {
        let starts_new = match previous {
            None => true,
            Some(prev) => {
                prev.chain_id != group.chain_id
                    || (group.resseq - prev.resseq).abs() > 1
                    || !residues_in_contact(model, prev, group)
            }
        };
        if starts_new {
            segments.push(Vec::new());
        }
        if let Some(current) = segments.last_mut() {
            current.extend_from_slice(&group.atom_indices);
        }
        previous = Some(group);
    }
    segments
        .iter()
        .map(|indices| AtomSelection::from_indices(model.len(), indices))
        .collect()
}

fn find_atom<'a>(model: &'a AtomicModel, group: &ResidueGroup, name: &str) -> Option<&'a [f64; 3]> {
    group
        .atom_indices
        .iter()
        .map(|&i| &model.atoms()[i])
        .find(|a| a.name.trim().eq_ignore_ascii_case(name))
        .map(|a| &a.xyz)
}

fn residues_in_contact(model: &AtomicModel, a: &ResidueGroup, b: &ResidueGroup) -> bool {
    if let (Some(x), Some(y)) = (find_atom(model, a, "CA"), find_atom(model, b, "CA")) {
        return distance(x, y) < MAX_CA_CA;
    }
    if let (Some(x), Some(y)) = (find_atom(model, a, "P"), find_atom(model, b, "P")) {
        return distance(x, y) < MAX_P_P;
    }
    a.atom_indices.iter().any(|&i| {
        b.atom_indices
            .iter()
            .any(|&j| distance(&model.atoms()[i].xyz, &model.atoms()[j].xyz) < MAX_ANY_CONTACT)
    })
}

// ─────────────────────────────────────────────────────────────
// 平铺
// ─────────────────────────────────────────────────────────────

/// 把当前图的格点均分成盒子，返回 (盒子, 边长 Å)
pub fn tile_boxes(map: &DensityMap, target_for_boxes: usize) -> (Vec<BoxSpec>, f64) {
    let whole = bounds::whole_map(map);
    let cell = map.crystal_symmetry().unit_cell;
    if target_for_boxes <= 1 {
        let edge = cell.volume().cbrt();
        return (vec![whole], edge);
    }
    let edge = (cell.volume() / target_for_boxes as f64).cbrt();
    let lengths = cell.lengths();
    let shape = map.shape();
    let counts: Vec<usize> = (0..3)
        .map(|i| ((lengths[i] / edge).round() as usize).clamp(1, shape[i].max(1)))
        .collect();

    let ranges = |axis: usize| -> Vec<(i64, i64)> {
        let n = shape[axis] as i64;
        let m = counts[axis] as i64;
        (0..m)
            .map(|t| (t * n / m + whole.lower[axis], (t + 1) * n / m - 1 + whole.lower[axis]))
            .collect()
    };
    let (rx, ry, rz) = (ranges(0), ranges(1), ranges(2));
    let mut boxes = Vec::with_capacity(rx.len() * ry.len() * rz.len());
    for &(x0, x1) in &rx {
        for &(y0, y1) in &ry {
            for &(z0, z1) in &rz {
                boxes.push(BoxSpec {
                    lower: [x0, y0, z0],
                    upper: [x1, y1, z1],
                });
            }
        }
    }
    (boxes, edge)
}

/// 工作格点 -> 工作坐标
fn grid_to_cart(map: &DensityMap, g: [f64; 3]) -> [f64; 3] {
    let n = map.unit_cell_grid();
    map.unit_cell().orthogonalize(&[
        g[0] / n[0] as f64,
        g[1] / n[1] as f64,
        g[2] / n[2] as f64,
    ])
}

/// 去掉中心经某个 NCS 算符落到已保留盒子中心附近的盒子
fn unique_under_ncs(map: &DensityMap, boxes: Vec<BoxSpec>, edge: f64) -> Vec<BoxSpec> {
    let ncs = match map.ncs() {
        Some(ncs) if !ncs.is_trivial() => ncs,
        _ => return boxes,
    };
    let shift = map.shift_cart();
    let tolerance = 0.5 * edge;
    let mut kept: Vec<(BoxSpec, [f64; 3])> = Vec::new();
    for b in boxes {
        let center = grid_to_cart(map, b.center_grid());
        let duplicate = ncs.operators().iter().skip(1).any(|op| {
            let image = op.apply_in_frame(&center, &shift);
            kept.iter().any(|(_, c)| distance(&image, c) < tolerance)
        });
        if !duplicate {
            kept.push((b, center));
        }
    }
    kept.into_iter().map(|(b, _)| b).collect()
}

/// 缓冲盒子；某轴上比整张图还宽时该轴退回整张图的范围，
/// 与盒子相同时返回 None
fn cushion_box_for(b: &BoxSpec, whole: &BoxSpec, cushion_grid: [i64; 3]) -> Option<BoxSpec> {
    let mut c = b.expanded(cushion_grid);
    for i in 0..3 {
        if c.upper[i] - c.lower[i] > whole.upper[i] - whole.lower[i] {
            c.lower[i] = whole.lower[i];
            c.upper[i] = whole.upper[i];
        }
    }
    if c == *b {
        None
    } else {
        Some(c)
    }
}

fn plan_tiles(
    map: &DensityMap,
    model: &AtomicModel,
    target_for_boxes: usize,
    keep: &AtomSelection,
    options: &SplitOptions,
) -> Result<SplitPlan> {
    let (boxes, edge) = tile_boxes(map, target_for_boxes);
    let n_tiles = boxes.len();
    let boxes = unique_under_ncs(map, boxes, edge);
    if boxes.len() < n_tiles {
        log::info!("NCS reduced {} tiles to {}", n_tiles, boxes.len());
    }

    let spacing = map.grid_spacing();
    let cushion_grid = [
        (options.box_cushion / spacing[0]).ceil() as i64,
        (options.box_cushion / spacing[1]).ceil() as i64,
        (options.box_cushion / spacing[2]).ceil() as i64,
    ];
    let whole = bounds::whole_map(map);
    let origin = map.origin();
    let positions: Vec<[f64; 3]> = model
        .atoms()
        .iter()
        .map(|a| {
            let g = map.grid_position(&a.xyz);
            [
                g[0] + origin[0] as f64,
                g[1] + origin[1] as f64,
                g[2] + origin[2] as f64,
            ]
        })
        .collect();

    let mut plan = SplitPlan::default();
    for b in boxes {
        let inside = AtomSelection(
            positions
                .iter()
                .map(|g| (0..3).all(|i| g[i] >= b.lower[i] as f64 && g[i] < (b.upper[i] + 1) as f64))
                .collect(),
        );
        let selection = inside.and(keep);
        if selection.count() == 0 && options.skip_empty_boxes {
            continue;
        }
        let entry = if options.select_final_boxes_based_on_model && selection.count() > 0 {
            PlanEntry {
                box_spec: bounds::around_sites(
                    map,
                    &selected_sites(model, &selection),
                    options.box_cushion,
                ),
                selection,
                cushion_box: None,
            }
        } else {
            PlanEntry {
                box_spec: b,
                selection,
                cushion_box: cushion_box_for(&b, &whole, cushion_grid),
            }
        };
        plan.entries.push(entry);
    }
    log::debug!(
        "Tiling with target {}: edge {:.1} A, {} boxes",
        target_for_boxes,
        edge,
        plan.len()
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Atom, CrystalSymmetry, NcsSpec, UnitCell};
    use ndarray::Array3;

    fn grid(n: usize, cell: f64) -> DensityMap {
        DensityMap::new(
            Array3::zeros((n, n, n)),
            CrystalSymmetry::p1(UnitCell::cubic(cell)),
        )
    }

    fn residue(chain: &str, resseq: i32, ca: [f64; 3]) -> Atom {
        Atom::new("CA", "C", ca).with_residue(chain, "ALA", resseq)
    }

    fn tiling_options() -> SplitOptions {
        SplitOptions {
            skip_empty_boxes: false,
            select_final_boxes_based_on_model: false,
            ..SplitOptions::default()
        }
    }

    #[test]
    fn test_single_tile_is_whole_map() {
        let map = grid(12, 24.0);
        let model = AtomicModel::new(vec![], None);
        let plan = plan_split(
            &map,
            &model,
            &SelectionStrategy::Tiling { target_for_boxes: 1 },
            &tiling_options(),
        )
        .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries[0].box_spec.lower, [0, 0, 0]);
        assert_eq!(plan.entries[0].box_spec.upper, [11, 11, 11]);
    }

    #[test]
    fn test_single_tile_cushion_stays_in_cell() {
        let map = grid(12, 24.0);
        let model = AtomicModel::new(vec![], None);
        let options = SplitOptions {
            box_cushion: 7.5,
            ..tiling_options()
        };
        let plan = plan_split(&map, &model, &SelectionStrategy::Tiling { target_for_boxes: 1 }, &options).unwrap();
        assert!(plan.entries[0].cushion_box.is_none());
        assert_eq!(*plan.entries[0].crop_box(), BoxSpec::new([0, 0, 0], [11, 11, 11]).unwrap());

        // 两块平铺：缓冲 4 格点会超过 12 格点的轴，只在该轴上退回整张图
        let wide = SplitOptions {
            box_cushion: 8.0,
            ..tiling_options()
        };
        let plan = plan_split(&map, &model, &SelectionStrategy::Tiling { target_for_boxes: 8 }, &wide).unwrap();
        for entry in &plan.entries {
            let c = entry.crop_box();
            assert_eq!(c.lower, [0, 0, 0]);
            assert_eq!(c.upper, [11, 11, 11]);
            assert!(c.shape().iter().all(|&n| n <= 12));
        }
    }

    #[test]
    fn test_tiles_cover_grid() {
        let map = grid(10, 20.0);
        let (boxes, edge) = tile_boxes(&map, 8);
        assert!((edge - 10.0).abs() < 1e-9);
        assert_eq!(boxes.len(), 8);
        let total: usize = boxes.iter().map(|b| b.shape().iter().product::<usize>()).sum();
        assert_eq!(total, 1000);
        assert_eq!(boxes[0].upper, [4, 4, 4]);
        assert_eq!(boxes[7].lower, [5, 5, 5]);
    }

    #[test]
    fn test_tile_selection_and_cushion() {
        let map = grid(10, 20.0);
        let model = AtomicModel::new(
            vec![
                Atom::new("C1", "C", [1.0, 1.0, 1.0]),
                Atom::new("C2", "C", [15.0, 15.0, 15.0]),
                Atom::new("O", "O", [15.0, 15.0, 14.0]).with_residue("W", "HOH", 1),
            ],
            None,
        );
        let options = SplitOptions {
            skip_waters: true,
            ..tiling_options()
        };
        let plan = plan_split(
            &map,
            &model,
            &SelectionStrategy::Tiling { target_for_boxes: 8 },
            &options,
        )
        .unwrap();
        assert_eq!(plan.len(), 8);
        assert_eq!(plan.entries[0].selection.indices(), vec![0]);
        assert_eq!(plan.entries[7].selection.indices(), vec![1]);
        // 缓冲 3 Å，间距 2 Å -> 2 个格点
        let cushion = plan.entries[0].cushion_box.unwrap();
        assert_eq!(cushion.lower, [-2, -2, -2]);
        assert_eq!(cushion.upper, [6, 6, 6]);

        let skipping = plan_split(
            &map,
            &model,
            &SelectionStrategy::Tiling { target_for_boxes: 8 },
            &SplitOptions::default(),
        )
        .unwrap();
        assert_eq!(skipping.len(), 2);
        assert!(skipping.entries.iter().all(|e| e.cushion_box.is_none()));
    }

    #[test]
    fn test_empty_model_by_chain_gives_empty_plan() {
        let map = grid(8, 16.0);
        let model = AtomicModel::new(vec![], None);
        let plan =
            plan_split(&map, &model, &SelectionStrategy::ByChain, &SplitOptions::default()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_by_chain() {
        let map = grid(20, 40.0);
        let model = AtomicModel::new(
            vec![
                residue("A", 1, [10.0, 10.0, 10.0]),
                residue("A", 2, [13.8, 10.0, 10.0]),
                residue("B", 1, [30.0, 30.0, 30.0]),
            ],
            None,
        );
        let plan =
            plan_split(&map, &model, &SelectionStrategy::ByChain, &SplitOptions::default()).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.entries[0].selection.indices(), vec![0, 1]);
        assert_eq!(plan.entries[1].selection.indices(), vec![2]);
        assert!(plan.entries[1].box_spec.lower[0] > plan.entries[0].box_spec.upper[0]);
    }

    #[test]
    fn test_segment_breaks() {
        let model = AtomicModel::new(
            vec![
                residue("A", 1, [0.0, 0.0, 0.0]),
                residue("A", 2, [3.8, 0.0, 0.0]),
                // 残基号跳跃
                residue("A", 4, [7.6, 0.0, 0.0]),
                // 距离过远
                residue("A", 5, [20.0, 0.0, 0.0]),
                residue("B", 6, [23.8, 0.0, 0.0]),
            ],
            None,
        );
        let segments = segment_selections(&model);
        let indices: Vec<Vec<usize>> = segments.iter().map(|s| s.indices()).collect();
        assert_eq!(indices, vec![vec![0, 1], vec![2], vec![3], vec![4]]);
    }

    #[test]
    fn test_ncs_removes_equivalent_tiles() {
        let mut map = grid(10, 20.0);
        map.set_ncs(Some(NcsSpec::cyclic(2, [10.0, 10.0, 10.0])));
        let (boxes, edge) = tile_boxes(&map, 8);
        let unique = unique_under_ncs(&map, boxes, edge);
        assert_eq!(unique.len(), 4);
    }
}
