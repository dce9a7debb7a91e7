//! # 晶胞、晶体对称性与坐标平移记录
//!
//! 定义图与模型共享的坐标框架：
//! - `UnitCell`：晶胞参数与正交化/分数化变换
//! - `CrystalSymmetry`：晶胞 + 空间群，带容差的相似性判断
//! - `ShiftRecord`：自原始（沉积）位置以来累计的笛卡尔平移
//!
//! ## 依赖关系
//! - 被 `maps/`, `models/model.rs`, `boxing/`, `manager/` 使用
//! - 无外部模块依赖

use crate::error::{MapRegionError, Result};

use serde::{Deserialize, Serialize};
use std::fmt;

/// 两个共处实体 shift_cart 之间允许的最大差值 (Å)
pub const SHIFT_TOLERANCE: f64 = 1e-6;

// ─────────────────────────────────────────────────────────────
// 向量工具
// ─────────────────────────────────────────────────────────────

/// 向量叉积
pub fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// 向量点积
pub fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn add(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn scale(a: &[f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

pub fn norm(a: &[f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

/// 两点间距离
pub fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    norm(&sub(a, b))
}

/// 3x3 矩阵乘向量
pub fn mat_vec(m: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [dot(&m[0], v), dot(&m[1], v), dot(&m[2], v)]
}

// ─────────────────────────────────────────────────────────────
// 晶胞
// ─────────────────────────────────────────────────────────────

/// 晶胞参数 (a, b, c, alpha, beta, gamma)，角度单位：度
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    pub parameters: [f64; 6],
    /// 晶格向量矩阵，行向量表示 a, b, c
    matrix: [[f64; 3]; 3],
}

impl UnitCell {
    /// 从晶胞参数创建，a 沿 x 轴，b 在 xy 平面
    pub fn new(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Self {
        let cos_alpha = alpha.to_radians().cos();
        let cos_beta = beta.to_radians().cos();
        let (sin_gamma, cos_gamma) = gamma.to_radians().sin_cos();

        let a_vec = [a, 0.0, 0.0];
        let b_vec = [b * cos_gamma, b * sin_gamma, 0.0];

        let c1 = c * cos_beta;
        let c2 = c * (cos_alpha - cos_beta * cos_gamma) / sin_gamma;
        let c3 = (c * c - c1 * c1 - c2 * c2).max(0.0).sqrt();

        UnitCell {
            parameters: [a, b, c, alpha, beta, gamma],
            matrix: [a_vec, b_vec, [c1, c2, c3]],
        }
    }

    /// 立方晶胞
    pub fn cubic(a: f64) -> Self {
        Self::new(a, a, a, 90.0, 90.0, 90.0)
    }

    /// 晶胞边长 (a, b, c)
    pub fn lengths(&self) -> [f64; 3] {
        [self.parameters[0], self.parameters[1], self.parameters[2]]
    }

    /// 晶胞体积
    pub fn volume(&self) -> f64 {
        dot(&self.matrix[0], &cross(&self.matrix[1], &self.matrix[2])).abs()
    }

    /// 分数坐标转笛卡尔坐标
    pub fn orthogonalize(&self, frac: &[f64; 3]) -> [f64; 3] {
        let m = &self.matrix;
        [
            frac[0] * m[0][0] + frac[1] * m[1][0] + frac[2] * m[2][0],
            frac[0] * m[0][1] + frac[1] * m[1][1] + frac[2] * m[2][1],
            frac[0] * m[0][2] + frac[1] * m[1][2] + frac[2] * m[2][2],
        ]
    }

    /// 笛卡尔坐标转分数坐标（倒格矢点积）
    pub fn fractionalize(&self, cart: &[f64; 3]) -> [f64; 3] {
        let r = self.reciprocal_vectors();
        [dot(&r[0], cart), dot(&r[1], cart), dot(&r[2], cart)]
    }

    /// 倒格矢 a*, b*, c*（不含 2π，满足 a_i · b_j = δ_ij）
    pub fn reciprocal_vectors(&self) -> [[f64; 3]; 3] {
        let [a, b, c] = self.matrix;
        let v = dot(&a, &cross(&b, &c));
        if v.abs() < 1e-12 {
            return [[0.0; 3]; 3];
        }
        [
            scale(&cross(&b, &c), 1.0 / v),
            scale(&cross(&c, &a), 1.0 / v),
            scale(&cross(&a, &b), 1.0 / v),
        ]
    }

    /// 倒空间笛卡尔向量 s = h a* + k b* + l c*
    pub fn reciprocal_cart(&self, hkl: &[i32; 3]) -> [f64; 3] {
        let r = self.reciprocal_vectors();
        let mut s = [0.0; 3];
        for (i, rv) in r.iter().enumerate() {
            let f = hkl[i] as f64;
            for j in 0..3 {
                s[j] += f * rv[j];
            }
        }
        s
    }

    /// d*² = 1/d²
    pub fn d_star_sq(&self, hkl: &[i32; 3]) -> f64 {
        let s = self.reciprocal_cart(hkl);
        dot(&s, &s)
    }

    /// 按轴缩放边长，角度不变
    pub fn scaled(&self, factors: [f64; 3]) -> Self {
        let p = self.parameters;
        Self::new(
            p[0] * factors[0],
            p[1] * factors[1],
            p[2] * factors[2],
            p[3],
            p[4],
            p[5],
        )
    }
}

impl fmt::Display for UnitCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.parameters;
        write!(
            f,
            "({:.3}, {:.3}, {:.3}, {:.2}, {:.2}, {:.2})",
            p[0], p[1], p[2], p[3], p[4], p[5]
        )
    }
}

// ─────────────────────────────────────────────────────────────
// 晶体对称性
// ─────────────────────────────────────────────────────────────

/// 晶胞 + 空间群
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrystalSymmetry {
    pub unit_cell: UnitCell,
    pub space_group: String,
}

impl CrystalSymmetry {
    /// 默认相对长度容差
    pub const LENGTH_TOLERANCE: f64 = 0.01;
    /// 默认角度容差（度）
    pub const ANGLE_TOLERANCE: f64 = 0.01;

    pub fn new(unit_cell: UnitCell, space_group: impl Into<String>) -> Self {
        CrystalSymmetry {
            unit_cell,
            space_group: space_group.into(),
        }
    }

    /// P 1 对称性
    pub fn p1(unit_cell: UnitCell) -> Self {
        Self::new(unit_cell, "P 1")
    }

    /// 带容差的相似性判断（相对边长、角度、空间群）
    pub fn is_similar(&self, other: &CrystalSymmetry, angle_tol: f64, length_tol: f64) -> bool {
        let a = self.unit_cell.parameters;
        let b = other.unit_cell.parameters;
        for i in 0..3 {
            let scale = a[i].abs().max(b[i].abs()).max(1e-10);
            if (a[i] - b[i]).abs() / scale > length_tol {
                return false;
            }
        }
        for i in 3..6 {
            if (a[i] - b[i]).abs() > angle_tol {
                return false;
            }
        }
        normalize_space_group(&self.space_group) == normalize_space_group(&other.space_group)
    }

    /// 使用默认容差的相似性判断
    pub fn is_similar_default(&self, other: &CrystalSymmetry) -> bool {
        self.is_similar(other, Self::ANGLE_TOLERANCE, Self::LENGTH_TOLERANCE)
    }

    /// 不相似时返回 `SymmetryMismatch`
    pub fn require_similar(&self, other: &CrystalSymmetry, context: &str) -> Result<()> {
        if self.is_similar_default(other) {
            Ok(())
        } else {
            Err(MapRegionError::SymmetryMismatch {
                context: context.to_string(),
                first: self.to_string(),
                second: other.to_string(),
            })
        }
    }
}

impl fmt::Display for CrystalSymmetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell {} space group '{}'", self.unit_cell, self.space_group)
    }
}

fn normalize_space_group(sg: &str) -> String {
    sg.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

// ─────────────────────────────────────────────────────────────
// 平移记录
// ─────────────────────────────────────────────────────────────

/// 自原始位置以来累计的平移与完整晶胞对称性
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftRecord {
    pub shift_cart: [f64; 3],
    pub unit_cell_symmetry: CrystalSymmetry,
}

impl ShiftRecord {
    pub fn new(unit_cell_symmetry: CrystalSymmetry) -> Self {
        ShiftRecord {
            shift_cart: [0.0; 3],
            unit_cell_symmetry,
        }
    }

    /// 累加平移：shift_cart = old + delta
    pub fn shift(&mut self, delta_cart: [f64; 3]) {
        self.shift_cart = add(&self.shift_cart, &delta_cart);
    }

    /// 回到原始位置所需的平移
    pub fn shift_back_delta(&self) -> [f64; 3] {
        scale(&self.shift_cart, -1.0)
    }

    /// 工作坐标 -> 原始坐标
    pub fn to_original(&self, xyz: &[f64; 3]) -> [f64; 3] {
        sub(xyz, &self.shift_cart)
    }

    /// 原始坐标 -> 工作坐标
    pub fn to_working(&self, xyz: &[f64; 3]) -> [f64; 3] {
        add(xyz, &self.shift_cart)
    }
}

/// 检查两个平移是否一致（容差 `SHIFT_TOLERANCE`）
pub fn check_shift_consistency(context: &str, expected: [f64; 3], found: [f64; 3]) -> Result<()> {
    if distance(&expected, &found) > SHIFT_TOLERANCE {
        return Err(MapRegionError::ShiftMismatch {
            context: context.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}
