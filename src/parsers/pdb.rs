//! # PDB 坐标格式解析器
//!
//! 只读写盒子划分需要的记录：`CRYST1`、`ATOM`、`HETATM`。
//!
//! ## 格式说明（定宽列，0 起始）
//! ```text
//! CRYST1    a(6..15)  b(15..24)  c(24..33)  α(33..40)  β(40..47)  γ(47..54)  sg(55..66)
//! ATOM      name(12..16) resName(17..20) chain(21) resSeq(22..26)
//!           x(30..38) y(38..46) z(46..54) occ(54..60) B(60..66) element(76..78)
//! ```
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs`, `commands/` 使用
//! - 使用 `models/model.rs`, `models/symmetry.rs`

use crate::error::{MapRegionError, Result};
use crate::models::{Atom, AtomicModel, CrystalSymmetry, UnitCell};

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// 解析 PDB 文件
pub fn parse_pdb_file(path: &Path) -> Result<AtomicModel> {
    if !path.exists() {
        return Err(MapRegionError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let content = fs::read_to_string(path).map_err(|e| MapRegionError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut model = parse_pdb_content(&content).map_err(|e| match e {
        MapRegionError::ParseError { format, reason, .. } => MapRegionError::ParseError {
            format,
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })?;
    model.name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("model")
        .to_string();
    Ok(model)
}

/// 定宽列，越界时为空串
fn field(line: &str, start: usize, end: usize) -> &str {
    let end = end.min(line.len());
    if start >= end {
        return "";
    }
    line.get(start..end).unwrap_or("").trim()
}

fn parse_error(line_no: usize, reason: String) -> MapRegionError {
    MapRegionError::ParseError {
        format: "PDB".to_string(),
        path: "<content>".to_string(),
        reason: format!("line {}: {}", line_no + 1, reason),
    }
}

fn parse_f64(line: &str, start: usize, end: usize, name: &str, line_no: usize) -> Result<f64> {
    let text = field(line, start, end);
    text.parse::<f64>()
        .map_err(|_| parse_error(line_no, format!("invalid {} '{}'", name, text)))
}

/// 从字符串内容解析 PDB
pub fn parse_pdb_content(content: &str) -> Result<AtomicModel> {
    let mut symmetry: Option<CrystalSymmetry> = None;
    let mut atoms: Vec<Atom> = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let record = field(line, 0, 6);
        match record {
            "CRYST1" => {
                let a = parse_f64(line, 6, 15, "a", line_no)?;
                let b = parse_f64(line, 15, 24, "b", line_no)?;
                let c = parse_f64(line, 24, 33, "c", line_no)?;
                let alpha = parse_f64(line, 33, 40, "alpha", line_no)?;
                let beta = parse_f64(line, 40, 47, "beta", line_no)?;
                let gamma = parse_f64(line, 47, 54, "gamma", line_no)?;
                let sg = field(line, 55, 66);
                let sg = if sg.is_empty() { "P 1" } else { sg };
                symmetry = Some(CrystalSymmetry::new(
                    UnitCell::new(a, b, c, alpha, beta, gamma),
                    sg,
                ));
            }
            "ATOM" | "HETATM" => {
                let name = field(line, 12, 16).to_string();
                let xyz = [
                    parse_f64(line, 30, 38, "x", line_no)?,
                    parse_f64(line, 38, 46, "y", line_no)?,
                    parse_f64(line, 46, 54, "z", line_no)?,
                ];
                let mut element = field(line, 76, 78).to_string();
                if element.is_empty() {
                    // 没有元素列时取原子名首字母
                    element = name
                        .chars()
                        .find(|c| c.is_ascii_alphabetic())
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "C".to_string());
                }
                let chain = field(line, 21, 22);
                let resseq = field(line, 22, 26).parse::<i32>().unwrap_or(0);
                let mut atom = Atom::new(name, element, xyz).with_residue(
                    if chain.is_empty() { " " } else { chain },
                    field(line, 17, 20),
                    resseq,
                );
                atom.serial = field(line, 6, 11).parse().unwrap_or(atoms.len() as i32 + 1);
                atom.occupancy = field(line, 54, 60).parse().unwrap_or(1.0);
                atom.b_iso = field(line, 60, 66).parse().unwrap_or(0.0);
                if record == "HETATM" {
                    atom = atom.as_hetero();
                }
                atoms.push(atom);
            }
            _ => {}
        }
    }

    Ok(AtomicModel::new(atoms, symmetry))
}

/// 转为 PDB 文本（使用模型当前坐标与工作对称性）
pub fn to_pdb_string(model: &AtomicModel) -> String {
    let mut out = String::new();
    if let Some(cs) = model.crystal_symmetry() {
        let p = cs.unit_cell.parameters;
        let _ = writeln!(
            out,
            "CRYST1{:9.3}{:9.3}{:9.3}{:7.2}{:7.2}{:7.2} {:<11}",
            p[0], p[1], p[2], p[3], p[4], p[5], cs.space_group
        );
    }
    for (i, atom) in model.atoms().iter().enumerate() {
        let record = if atom.hetero { "HETATM" } else { "ATOM  " };
        // 四字符以内的原子名按惯例从第 14 列开始
        let name = if atom.name.len() < 4 {
            format!(" {:<3}", atom.name)
        } else {
            format!("{:<4}", atom.name)
        };
        let serial = if atom.serial > 0 { atom.serial } else { i as i32 + 1 };
        let _ = writeln!(
            out,
            "{}{:>5} {}{:1}{:>3} {:1}{:>4}    {:8.3}{:8.3}{:8.3}{:6.2}{:6.2}          {:>2}",
            record,
            serial % 100000,
            name,
            "",
            atom.resname,
            atom.chain_id,
            atom.resseq,
            atom.xyz[0],
            atom.xyz[1],
            atom.xyz[2],
            atom.occupancy,
            atom.b_iso,
            atom.element.to_uppercase(),
        );
    }
    out.push_str("END\n");
    out
}

/// 写出 PDB 文件
pub fn write_pdb_file(model: &AtomicModel, path: &Path) -> Result<()> {
    fs::write(path, to_pdb_string(model)).map_err(|e| MapRegionError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}
