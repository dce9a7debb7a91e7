//! # 原子模型
//!
//! 盒子划分与缩放所需的最小原子模型：原子坐标、链/残基信息、
//! 晶体对称性与累计平移。不涉及约束与几何校验。
//!
//! ## 功能
//! - 原子选择 (`AtomSelection`) 与选择字符串解析（如 `chain A and resseq 10:20`）
//! - 坐标读写、按选择切片
//! - 平移并设置工作对称性 (`shift_model_and_set_crystal_symmetry`)
//!
//! ## 依赖关系
//! - 被 `parsers/pdb.rs`, `boxing/`, `masking/`, `manager/` 使用
//! - 使用 `models/symmetry.rs`
//! - 使用 `regex` 解析选择字符串

use crate::error::{MapRegionError, Result};
use crate::models::symmetry::{add, distance, sub, CrystalSymmetry, SHIFT_TOLERANCE};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// 视为水分子的残基名
const WATER_NAMES: [&str; 4] = ["HOH", "WAT", "DOD", "H2O"];

/// 原子信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub serial: i32,
    /// 原子名（如 CA）
    pub name: String,
    pub resname: String,
    pub chain_id: String,
    pub resseq: i32,
    pub element: String,
    /// 笛卡尔坐标 (Å)
    pub xyz: [f64; 3],
    pub occupancy: f64,
    pub b_iso: f64,
    /// HETATM 记录
    pub hetero: bool,
}

impl Atom {
    pub fn new(name: impl Into<String>, element: impl Into<String>, xyz: [f64; 3]) -> Self {
        Atom {
            serial: 0,
            name: name.into(),
            resname: "UNK".to_string(),
            chain_id: "A".to_string(),
            resseq: 1,
            element: element.into(),
            xyz,
            occupancy: 1.0,
            b_iso: 0.0,
            hetero: false,
        }
    }

    pub fn with_residue(mut self, chain_id: &str, resname: &str, resseq: i32) -> Self {
        self.chain_id = chain_id.to_string();
        self.resname = resname.to_string();
        self.resseq = resseq;
        self
    }

    pub fn as_hetero(mut self) -> Self {
        self.hetero = true;
        self
    }

    pub fn is_water(&self) -> bool {
        WATER_NAMES.contains(&self.resname.trim().to_uppercase().as_str())
    }
}

// ─────────────────────────────────────────────────────────────
// 原子选择
// ─────────────────────────────────────────────────────────────

/// 布尔原子选择，长度与模型原子数一致
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AtomSelection(pub Vec<bool>);

impl AtomSelection {
    pub fn all(n: usize) -> Self {
        AtomSelection(vec![true; n])
    }

    pub fn none(n: usize) -> Self {
        AtomSelection(vec![false; n])
    }

    pub fn from_indices(n: usize, indices: &[usize]) -> Self {
        let mut sel = vec![false; n];
        for &i in indices {
            if i < n {
                sel[i] = true;
            }
        }
        AtomSelection(sel)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 选中的原子数
    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&s| s).count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn get(&self, i: usize) -> bool {
        self.0.get(i).copied().unwrap_or(false)
    }

    /// 选中原子的索引
    pub fn indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &s)| if s { Some(i) } else { None })
            .collect()
    }

    pub fn and(&self, other: &AtomSelection) -> AtomSelection {
        AtomSelection(self.0.iter().zip(&other.0).map(|(a, b)| *a && *b).collect())
    }

    pub fn or(&self, other: &AtomSelection) -> AtomSelection {
        AtomSelection(self.0.iter().zip(&other.0).map(|(a, b)| *a || *b).collect())
    }

    pub fn not(&self) -> AtomSelection {
        AtomSelection(self.0.iter().map(|a| !a).collect())
    }
}

// ─────────────────────────────────────────────────────────────
// 原子模型
// ─────────────────────────────────────────────────────────────

/// 原子模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicModel {
    pub name: String,
    atoms: Vec<Atom>,
    /// 工作对称性（盒子化后为盒子的对称性）
    crystal_symmetry: Option<CrystalSymmetry>,
    /// 完整（未平移）晶胞对称性
    unit_cell_symmetry: Option<CrystalSymmetry>,
    /// 累计平移 (Å)
    shift_cart: [f64; 3],
}

impl AtomicModel {
    pub fn new(atoms: Vec<Atom>, crystal_symmetry: Option<CrystalSymmetry>) -> Self {
        AtomicModel {
            name: "model".to_string(),
            atoms,
            unit_cell_symmetry: crystal_symmetry.clone(),
            crystal_symmetry,
            shift_cart: [0.0; 3],
        }
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn crystal_symmetry(&self) -> Option<&CrystalSymmetry> {
        self.crystal_symmetry.as_ref()
    }

    pub fn unit_cell_crystal_symmetry(&self) -> Option<&CrystalSymmetry> {
        self.unit_cell_symmetry.as_ref()
    }

    pub fn set_unit_cell_crystal_symmetry(&mut self, symmetry: CrystalSymmetry) {
        self.unit_cell_symmetry = Some(symmetry);
    }

    pub fn shift_cart(&self) -> [f64; 3] {
        self.shift_cart
    }

    pub fn get_sites_cart(&self) -> Vec<[f64; 3]> {
        self.atoms.iter().map(|a| a.xyz).collect()
    }

    pub fn set_sites_cart(&mut self, sites: &[[f64; 3]]) -> Result<()> {
        if sites.len() != self.atoms.len() {
            return Err(MapRegionError::InvalidArgument(format!(
                "site count {} does not match atom count {}",
                sites.len(),
                self.atoms.len()
            )));
        }
        for (atom, xyz) in self.atoms.iter_mut().zip(sites) {
            atom.xyz = *xyz;
        }
        Ok(())
    }

    /// 在选择位置写入新坐标（`new_sites` 按选择顺序排列）
    pub fn set_selected_sites_cart(
        &mut self,
        selection: &AtomSelection,
        new_sites: &[[f64; 3]],
    ) -> Result<()> {
        let indices = selection.indices();
        if indices.len() != new_sites.len() {
            return Err(MapRegionError::InvalidArgument(format!(
                "selection of {} atoms does not match {} new sites",
                indices.len(),
                new_sites.len()
            )));
        }
        for (i, xyz) in indices.into_iter().zip(new_sites) {
            self.atoms[i].xyz = *xyz;
        }
        Ok(())
    }

    pub fn set_b_iso(&mut self, b_iso: f64) {
        for atom in &mut self.atoms {
            atom.b_iso = b_iso;
        }
    }

    /// 按选择切片，保留对称性与平移
    pub fn select(&self, selection: &AtomSelection) -> AtomicModel {
        let atoms = self
            .atoms
            .iter()
            .enumerate()
            .filter(|(i, _)| selection.get(*i))
            .map(|(_, a)| a.clone())
            .collect();
        AtomicModel {
            name: self.name.clone(),
            atoms,
            crystal_symmetry: self.crystal_symmetry.clone(),
            unit_cell_symmetry: self.unit_cell_symmetry.clone(),
            shift_cart: self.shift_cart,
        }
    }

    /// 平移所有原子，累加 shift_cart，并设置新的工作对称性
    pub fn shift_model_and_set_crystal_symmetry(
        &mut self,
        delta_cart: [f64; 3],
        crystal_symmetry: Option<CrystalSymmetry>,
    ) {
        for atom in &mut self.atoms {
            atom.xyz = add(&atom.xyz, &delta_cart);
        }
        self.shift_cart = add(&self.shift_cart, &delta_cart);
        if crystal_symmetry.is_some() {
            self.crystal_symmetry = crystal_symmetry;
        }
    }

    /// 平移到指定的累计平移值
    pub fn shift_to(&mut self, target_shift_cart: [f64; 3], crystal_symmetry: Option<CrystalSymmetry>) {
        let mut delta = sub(&target_shift_cart, &self.shift_cart);
        if delta.iter().all(|d| d.abs() <= SHIFT_TOLERANCE) {
            delta = [0.0; 3];
        }
        self.shift_model_and_set_crystal_symmetry(delta, crystal_symmetry);
    }

    /// 回到原始位置并恢复完整晶胞对称性
    pub fn shift_back(&mut self) {
        let delta = [-self.shift_cart[0], -self.shift_cart[1], -self.shift_cart[2]];
        let symmetry = self.unit_cell_symmetry.clone();
        self.shift_model_and_set_crystal_symmetry(delta, symmetry);
    }

    /// 链 ID，按首次出现顺序
    pub fn chain_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for atom in &self.atoms {
            if !ids.contains(&atom.chain_id) {
                ids.push(atom.chain_id.clone());
            }
        }
        ids
    }

    /// 按 (链, 残基号) 连续分组的原子索引
    pub fn residue_groups(&self) -> Vec<ResidueGroup> {
        let mut groups: Vec<ResidueGroup> = Vec::new();
        for (i, atom) in self.atoms.iter().enumerate() {
            match groups.last_mut() {
                Some(g) if g.chain_id == atom.chain_id && g.resseq == atom.resseq => {
                    g.atom_indices.push(i)
                }
                _ => groups.push(ResidueGroup {
                    chain_id: atom.chain_id.clone(),
                    resseq: atom.resseq,
                    resname: atom.resname.clone(),
                    atom_indices: vec![i],
                }),
            }
        }
        groups
    }

    /// 非水、非 HETATM 原子
    pub fn not_water_or_hetero_selection(&self) -> AtomSelection {
        AtomSelection(
            self.atoms
                .iter()
                .map(|a| !(a.is_water() || a.hetero))
                .collect(),
        )
    }

    /// 解析选择字符串
    pub fn selection(&self, selection_string: &str) -> Result<AtomSelection> {
        parse_selection(selection_string, &self.atoms)
    }

    /// 与另一模型坐标的 RMSD（原子数需一致）
    pub fn rms_difference(&self, other_sites: &[[f64; 3]]) -> Option<f64> {
        rms_difference(&self.get_sites_cart(), other_sites)
    }
}

/// 同一残基的原子
#[derive(Debug, Clone)]
pub struct ResidueGroup {
    pub chain_id: String,
    pub resseq: i32,
    pub resname: String,
    pub atom_indices: Vec<usize>,
}

/// 两组坐标的 RMSD
pub fn rms_difference(a: &[[f64; 3]], b: &[[f64; 3]]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    if a.is_empty() {
        return Some(0.0);
    }
    let sum: f64 = a.iter().zip(b).map(|(x, y)| distance(x, y).powi(2)).sum();
    Some((sum / a.len() as f64).sqrt())
}

// ─────────────────────────────────────────────────────────────
// 选择字符串解析
// ─────────────────────────────────────────────────────────────

static KEYWORD_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(not\s+)?(chain|resseq|resname|name|element)\s+(\S+)$")
        .expect("valid selection regex")
});

static FLAG_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(not\s+)?(all|water|hetero)$").expect("valid selection regex")
});

static OR_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+or\s+").expect("valid selection regex"));

static AND_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+and\s+").expect("valid selection regex"));

/// 解析选择字符串，`and` 优先于 `or`，支持 `not` 前缀
pub fn parse_selection(selection_string: &str, atoms: &[Atom]) -> Result<AtomSelection> {
    let text = selection_string.trim();
    if text.is_empty() {
        return Ok(AtomSelection::all(atoms.len()));
    }

    let mut result = AtomSelection::none(atoms.len());
    for clause in OR_SPLIT.split(text) {
        let mut clause_sel = AtomSelection::all(atoms.len());
        for term in AND_SPLIT.split(clause) {
            let term_sel = parse_term(term.trim(), atoms).map_err(|reason| {
                MapRegionError::InvalidSelection {
                    selection: selection_string.to_string(),
                    reason,
                }
            })?;
            clause_sel = clause_sel.and(&term_sel);
        }
        result = result.or(&clause_sel);
    }
    Ok(result)
}

fn parse_term(term: &str, atoms: &[Atom]) -> std::result::Result<AtomSelection, String> {
    if let Some(caps) = FLAG_TERM.captures(term) {
        let negate = caps.get(1).is_some();
        let flag = caps[2].to_lowercase();
        let sel = AtomSelection(
            atoms
                .iter()
                .map(|a| match flag.as_str() {
                    "water" => a.is_water(),
                    "hetero" => a.hetero,
                    _ => true,
                })
                .collect(),
        );
        return Ok(if negate { sel.not() } else { sel });
    }

    let caps = KEYWORD_TERM
        .captures(term)
        .ok_or_else(|| format!("unrecognized term '{}'", term))?;
    let negate = caps.get(1).is_some();
    let keyword = caps[2].to_lowercase();
    let value = caps[3].to_string();

    let sel = match keyword.as_str() {
        "resseq" => {
            let (first, last) = parse_resseq_range(&value)?;
            AtomSelection(
                atoms
                    .iter()
                    .map(|a| a.resseq >= first && a.resseq <= last)
                    .collect(),
            )
        }
        _ => AtomSelection(
            atoms
                .iter()
                .map(|a| {
                    let field = match keyword.as_str() {
                        "chain" => &a.chain_id,
                        "resname" => &a.resname,
                        "name" => &a.name,
                        _ => &a.element,
                    };
                    field.trim().eq_ignore_ascii_case(&value)
                })
                .collect(),
        ),
    };
    Ok(if negate { sel.not() } else { sel })
}

fn parse_resseq_range(value: &str) -> std::result::Result<(i32, i32), String> {
    let parse = |s: &str| {
        s.trim()
            .parse::<i32>()
            .map_err(|_| format!("invalid residue number '{}'", s))
    };
    match value.split_once(':') {
        Some((a, b)) => Ok((parse(a)?, parse(b)?)),
        None => {
            let v = parse(value)?;
            Ok((v, v))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::symmetry::UnitCell;

    fn two_chain_model() -> AtomicModel {
        let atoms = vec![
            Atom::new("CA", "C", [1.0, 1.0, 1.0]).with_residue("A", "ALA", 1),
            Atom::new("CA", "C", [4.8, 1.0, 1.0]).with_residue("A", "GLY", 2),
            Atom::new("CA", "C", [8.6, 1.0, 1.0]).with_residue("B", "SER", 10),
            Atom::new("O", "O", [2.0, 9.0, 9.0])
                .with_residue("B", "HOH", 101)
                .as_hetero(),
        ];
        AtomicModel::new(atoms, Some(CrystalSymmetry::p1(UnitCell::cubic(20.0))))
    }

    #[test]
    fn test_selection_strings() {
        let model = two_chain_model();
        assert_eq!(model.selection("chain A").unwrap().count(), 2);
        assert_eq!(model.selection("chain B and not water").unwrap().count(), 1);
        assert_eq!(model.selection("resseq 1:2 or resseq 10").unwrap().count(), 3);
        assert_eq!(model.selection("all").unwrap().count(), 4);
        assert_eq!(model.selection("name CA").unwrap().count(), 3);
        assert!(model.selection("bogus thing here").is_err());
    }

    #[test]
    fn test_water_and_hetero_mask() {
        let model = two_chain_model();
        let sel = model.not_water_or_hetero_selection();
        assert_eq!(sel.indices(), vec![0, 1, 2]);
    }

    #[test]
    fn test_select_and_shift() {
        let mut model = two_chain_model();
        let sub_model = model.select(&model.selection("chain B").unwrap());
        assert_eq!(sub_model.len(), 2);

        model.shift_model_and_set_crystal_symmetry([1.0, 0.0, -1.0], None);
        assert_eq!(model.shift_cart(), [1.0, 0.0, -1.0]);
        assert_eq!(model.atoms()[0].xyz, [2.0, 1.0, 0.0]);

        model.shift_back();
        assert_eq!(model.shift_cart(), [0.0, 0.0, 0.0]);
        assert_eq!(model.atoms()[0].xyz, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_chain_ids_and_residue_groups() {
        let model = two_chain_model();
        assert_eq!(model.chain_ids(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(model.residue_groups().len(), 4);
    }

    #[test]
    fn test_set_selected_sites() {
        let mut model = two_chain_model();
        let sel = AtomSelection::from_indices(4, &[1, 3]);
        model
            .set_selected_sites_cart(&sel, &[[0.0; 3], [1.0; 3]])
            .unwrap();
        assert_eq!(model.atoms()[1].xyz, [0.0; 3]);
        assert_eq!(model.atoms()[3].xyz, [1.0; 3]);
        assert!(model.set_selected_sites_cart(&sel, &[[0.0; 3]]).is_err());
    }
}
