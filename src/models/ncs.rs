//! # 非晶体学对称性 (NCS)
//!
//! NCS 算符 x' = R x + t 定义在原始（未平移）坐标系中。
//! 第一个算符总是恒等算符。
//!
//! ## 功能
//! - 在工作坐标系中作用于位点（考虑 shift_cart）
//! - 旋转方向向量（仅旋转部分）
//! - 循环点群 (Cn) 构造
//! - 从模型搜索 NCS：序列相同的链之间做 Kabsch 叠合
//!
//! ## 依赖关系
//! - 被 `maps/density.rs`, `boxing/planner.rs`, `local/ncs_expand.rs`, `manager/` 使用
//! - 使用 `nalgebra` 的 SVD

use crate::models::model::{AtomSelection, AtomicModel};
use crate::models::symmetry::{add, mat_vec, sub};

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 叠合后视为 NCS 拷贝的最大 RMSD (Å)
const MAX_NCS_RMSD: f64 = 2.0;

/// 单个 NCS 算符
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NcsOperator {
    pub rotation: [[f64; 3]; 3],
    pub translation: [f64; 3],
}

impl NcsOperator {
    pub fn identity() -> Self {
        NcsOperator {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }

    /// 原始坐标系中的位点变换
    pub fn apply(&self, xyz: &[f64; 3]) -> [f64; 3] {
        add(&mat_vec(&self.rotation, xyz), &self.translation)
    }

    /// 工作坐标系中的位点变换：R(x - s) + t + s
    pub fn apply_in_frame(&self, xyz_working: &[f64; 3], shift_cart: &[f64; 3]) -> [f64; 3] {
        add(&self.apply(&sub(xyz_working, shift_cart)), shift_cart)
    }

    /// 方向向量只受旋转影响
    pub fn rotate(&self, direction: &[f64; 3]) -> [f64; 3] {
        mat_vec(&self.rotation, direction)
    }

    pub fn is_identity(&self) -> bool {
        let id = Self::identity();
        self.translation.iter().all(|t| t.abs() < 1e-6)
            && (0..3).all(|i| (0..3).all(|j| (self.rotation[i][j] - id.rotation[i][j]).abs() < 1e-6))
    }
}

/// NCS 描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NcsSpec {
    operators: Vec<NcsOperator>,
}

impl Default for NcsSpec {
    fn default() -> Self {
        NcsSpec {
            operators: vec![NcsOperator::identity()],
        }
    }
}

impl NcsSpec {
    /// 创建；若首个算符不是恒等算符则在前面补上
    pub fn new(operators: Vec<NcsOperator>) -> Self {
        let mut ops = Vec::with_capacity(operators.len() + 1);
        if operators.first().map_or(true, |op| !op.is_identity()) {
            ops.push(NcsOperator::identity());
        }
        ops.extend(operators);
        NcsSpec { operators: ops }
    }

    /// 绕平行于 z 轴、过 `center` 的轴的 Cn 对称
    pub fn cyclic(n: usize, center: [f64; 3]) -> Self {
        let n = n.max(1);
        let operators = (0..n)
            .map(|k| {
                let (s, c) = (2.0 * std::f64::consts::PI * k as f64 / n as f64).sin_cos();
                let rotation = [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]];
                // t = center - R center
                let translation = sub(&center, &mat_vec(&rotation, &center));
                NcsOperator {
                    rotation,
                    translation,
                }
            })
            .collect();
        NcsSpec { operators }
    }

    pub fn operators(&self) -> &[NcsOperator] {
        &self.operators
    }

    pub fn n_operators(&self) -> usize {
        self.operators.len()
    }

    /// 只有恒等算符
    pub fn is_trivial(&self) -> bool {
        self.operators.len() <= 1
    }
}

// ─────────────────────────────────────────────────────────────
// NCS 搜索
// ─────────────────────────────────────────────────────────────

/// NCS 搜索结果：算符与独立部分（参考链 + 无拷贝的链）的选择
#[derive(Debug, Clone)]
pub struct NcsSearchResult {
    pub ncs: NcsSpec,
    pub master_selection: AtomSelection,
}

/// 在序列相同的链之间搜索 NCS
///
/// 取拷贝数最多的一组链，以第一条链为参考，用 Kabsch 叠合求出
/// 参考链 -> 各拷贝的算符。坐标先回到原始坐标系。
pub fn search_for_ncs(model: &AtomicModel) -> NcsSearchResult {
    let shift = model.shift_cart();
    let atoms = model.atoms();
    let chain_ids = model.chain_ids();

    // 链 -> 残基名序列
    let mut sequences: Vec<(String, Vec<String>)> = Vec::new();
    for chain in &chain_ids {
        let seq = model
            .residue_groups()
            .into_iter()
            .filter(|g| &g.chain_id == chain)
            .map(|g| g.resname)
            .collect();
        sequences.push((chain.clone(), seq));
    }

    let mut groups: Vec<Vec<String>> = Vec::new();
    for (chain, seq) in &sequences {
        match groups.iter_mut().find(|g| {
            sequences
                .iter()
                .find(|(c, _)| c == &g[0])
                .map_or(false, |(_, s)| s == seq && !seq.is_empty())
        }) {
            Some(g) => g.push(chain.clone()),
            None => groups.push(vec![chain.clone()]),
        }
    }

    let best = groups.iter().max_by_key(|g| g.len()).cloned().unwrap_or_default();
    let mut operators = vec![NcsOperator::identity()];
    let mut copy_chains: Vec<String> = Vec::new();

    if best.len() > 1 {
        let reference = &best[0];
        let key_of = |chain: &str| -> HashMap<(i32, String), [f64; 3]> {
            atoms
                .iter()
                .filter(|a| a.chain_id == chain)
                .map(|a| ((a.resseq, a.name.clone()), sub(&a.xyz, &shift)))
                .collect()
        };
        let reference_sites = key_of(reference);
        // 按参考链原子顺序配对
        let ordered_keys: Vec<(i32, String)> = atoms
            .iter()
            .filter(|a| &a.chain_id == reference)
            .map(|a| (a.resseq, a.name.clone()))
            .collect();

        for copy in best.iter().skip(1) {
            let copy_sites = key_of(copy);
            let mut source = Vec::new();
            let mut target = Vec::new();
            for key in &ordered_keys {
                if let (Some(s), Some(t)) = (reference_sites.get(key), copy_sites.get(key)) {
                    source.push(*s);
                    target.push(*t);
                }
            }
            if let Some((op, rmsd)) = superpose(&source, &target) {
                if rmsd <= MAX_NCS_RMSD {
                    log::debug!("NCS copy {} -> {}: rmsd {:.3}", reference, copy, rmsd);
                    operators.push(op);
                    copy_chains.push(copy.clone());
                }
            }
        }
    }

    let master_selection = AtomSelection(
        atoms
            .iter()
            .map(|a| !copy_chains.contains(&a.chain_id))
            .collect(),
    );

    NcsSearchResult {
        ncs: NcsSpec { operators },
        master_selection,
    }
}

/// Kabsch 叠合：返回 source -> target 的算符与叠合 RMSD
pub fn superpose(source: &[[f64; 3]], target: &[[f64; 3]]) -> Option<(NcsOperator, f64)> {
    if source.len() != target.len() || source.len() < 3 {
        return None;
    }
    let to_vec = |p: &[f64; 3]| Vector3::new(p[0], p[1], p[2]);
    let n = source.len() as f64;
    let source_centroid = source.iter().map(to_vec).sum::<Vector3<f64>>() / n;
    let target_centroid = target.iter().map(to_vec).sum::<Vector3<f64>>() / n;

    let mut h = Matrix3::zeros();
    for (s, t) in source.iter().zip(target) {
        h += (to_vec(s) - source_centroid) * (to_vec(t) - target_centroid).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut rotation = v_t.transpose() * u.transpose();
    if rotation.determinant() < 0.0 {
        let mut v = v_t.transpose();
        for i in 0..3 {
            v[(i, 2)] = -v[(i, 2)];
        }
        rotation = v * u.transpose();
    }
    let translation = target_centroid - rotation * source_centroid;

    let op = NcsOperator {
        rotation: [
            [rotation[(0, 0)], rotation[(0, 1)], rotation[(0, 2)]],
            [rotation[(1, 0)], rotation[(1, 1)], rotation[(1, 2)]],
            [rotation[(2, 0)], rotation[(2, 1)], rotation[(2, 2)]],
        ],
        translation: [translation[0], translation[1], translation[2]],
    };

    let sum_sq: f64 = source
        .iter()
        .zip(target)
        .map(|(s, t)| {
            let d = sub(&op.apply(s), t);
            d[0] * d[0] + d[1] * d[1] + d[2] * d[2]
        })
        .sum();
    Some((op, (sum_sq / n).sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::model::Atom;
    use crate::models::symmetry::distance;

    #[test]
    fn test_cyclic_operators() {
        let ncs = NcsSpec::cyclic(4, [10.0, 10.0, 0.0]);
        assert_eq!(ncs.n_operators(), 4);
        assert!(ncs.operators()[0].is_identity());
        let moved = ncs.operators()[1].apply(&[15.0, 10.0, 3.0]);
        assert!(distance(&moved, &[10.0, 15.0, 3.0]) < 1e-9);
        // 方向只旋转
        let d = ncs.operators()[1].rotate(&[1.0, 0.0, 0.0]);
        assert!(distance(&d, &[0.0, 1.0, 0.0]) < 1e-9);
    }

    #[test]
    fn test_apply_in_frame() {
        let ncs = NcsSpec::cyclic(2, [10.0, 10.0, 0.0]);
        let shift = [-5.0, -5.0, 0.0];
        // 原始 (12, 10, 0) -> (8, 10, 0)，工作坐标均加 shift
        let moved = ncs.operators()[1].apply_in_frame(&[7.0, 5.0, 0.0], &shift);
        assert!(distance(&moved, &[3.0, 5.0, 0.0]) < 1e-9);
    }

    #[test]
    fn test_new_prepends_identity() {
        let ops = NcsSpec::cyclic(3, [0.0; 3]).operators()[1..].to_vec();
        let ncs = NcsSpec::new(ops);
        assert_eq!(ncs.n_operators(), 3);
        assert!(ncs.operators()[0].is_identity());
    }

    #[test]
    fn test_search_for_ncs_two_copies() {
        let ncs = NcsSpec::cyclic(2, [20.0, 20.0, 0.0]);
        let op = &ncs.operators()[1];
        let chain_a = [[22.0, 20.0, 1.0], [24.0, 21.0, 2.0], [25.0, 23.0, 4.0], [23.0, 25.0, 5.0]];
        let mut atoms = Vec::new();
        for (i, xyz) in chain_a.iter().enumerate() {
            atoms.push(Atom::new("CA", "C", *xyz).with_residue("A", "ALA", i as i32 + 1));
        }
        for (i, xyz) in chain_a.iter().enumerate() {
            atoms.push(Atom::new("CA", "C", op.apply(xyz)).with_residue("B", "ALA", i as i32 + 1));
        }
        let model = AtomicModel::new(atoms, None);
        let result = search_for_ncs(&model);
        assert_eq!(result.ncs.n_operators(), 2);
        assert_eq!(result.master_selection.count(), 4);
        let found = result.ncs.operators()[1].apply(&chain_a[2]);
        assert!(distance(&found, &op.apply(&chain_a[2])) < 1e-6);
    }
}
