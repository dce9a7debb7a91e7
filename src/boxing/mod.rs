//! # 盒子划分
//!
//! 盒子 (`BoxSpec`) 是工作格点上的闭区间 [lower, upper]。
//! 划分方案 (`SplitPlan`) 为每个区域给出盒子、原子选择和可选的缓冲盒子。
//!
//! ## 功能
//! - `planner`：按链 / 片段 / 给定选择 / 空间平铺生成方案
//! - `bounds`：原子、密度、掩膜周围的盒子边界
//!
//! ## 依赖关系
//! - 被 `manager/`, `local/`, `commands/` 使用
//! - 使用 `maps/`, `models/`

pub mod bounds;
pub mod planner;

use crate::error::{MapRegionError, Result};
use crate::models::AtomSelection;

use std::fmt;

/// 工作格点上的盒子（含两端）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxSpec {
    pub lower: [i64; 3],
    pub upper: [i64; 3],
}

impl BoxSpec {
    pub fn new(lower: [i64; 3], upper: [i64; 3]) -> Result<Self> {
        if (0..3).any(|i| lower[i] > upper[i]) {
            return Err(MapRegionError::InvalidRange(format!(
                "lower bounds {:?} exceed upper bounds {:?}",
                lower, upper
            )));
        }
        Ok(Self { lower, upper })
    }

    /// 各轴格点数
    pub fn shape(&self) -> [usize; 3] {
        [
            (self.upper[0] - self.lower[0] + 1) as usize,
            (self.upper[1] - self.lower[1] + 1) as usize,
            (self.upper[2] - self.lower[2] + 1) as usize,
        ]
    }

    /// 各轴向两侧扩展 `by` 个格点
    pub fn expanded(&self, by: [i64; 3]) -> BoxSpec {
        BoxSpec {
            lower: [self.lower[0] - by[0], self.lower[1] - by[1], self.lower[2] - by[2]],
            upper: [self.upper[0] + by[0], self.upper[1] + by[1], self.upper[2] + by[2]],
        }
    }

    /// 盒子中心（工作格点，可为半整数）
    pub fn center_grid(&self) -> [f64; 3] {
        [
            0.5 * (self.lower[0] + self.upper[0]) as f64,
            0.5 * (self.lower[1] + self.upper[1]) as f64,
            0.5 * (self.lower[2] + self.upper[2]) as f64,
        ]
    }
}

impl fmt::Display for BoxSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}) - ({}, {}, {})",
            self.lower[0], self.lower[1], self.lower[2], self.upper[0], self.upper[1], self.upper[2]
        )
    }
}

/// 方案中的一个区域
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub box_spec: BoxSpec,
    /// 属于本区域的原子
    pub selection: AtomSelection,
    /// 带缓冲的盒子（平铺方案）
    pub cushion_box: Option<BoxSpec>,
}

impl PlanEntry {
    /// 实际裁剪用的盒子：有缓冲盒子时用缓冲盒子
    pub fn crop_box(&self) -> &BoxSpec {
        self.cushion_box.as_ref().unwrap_or(&self.box_spec)
    }
}

/// 划分方案
#[derive(Debug, Clone, Default)]
pub struct SplitPlan {
    pub entries: Vec<PlanEntry>,
}

impl SplitPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 选择策略
#[derive(Debug, Clone)]
pub enum SelectionStrategy {
    /// 每条链一个区域
    ByChain,
    /// 每个连续片段一个区域
    BySegment,
    /// 给定的原子选择
    Supplied(Vec<AtomSelection>),
    /// 把当前图平铺成约 `target_for_boxes` 个盒子
    Tiling { target_for_boxes: usize },
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionStrategy::ByChain => write!(f, "chain"),
            SelectionStrategy::BySegment => write!(f, "segment"),
            SelectionStrategy::Supplied(s) => write!(f, "supplied ({})", s.len()),
            SelectionStrategy::Tiling { target_for_boxes } => {
                write!(f, "boxes (target {})", target_for_boxes)
            }
        }
    }
}

/// 划分参数
#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// 盒子缓冲 (Å)
    pub box_cushion: f64,
    pub skip_waters: bool,
    pub skip_hetero: bool,
    /// 丢弃没有原子的区域
    pub skip_empty_boxes: bool,
    /// 平铺后按所选原子重新确定盒子
    pub select_final_boxes_based_on_model: bool,
    /// 保留盒子外的原子
    pub model_can_be_outside_bounds: bool,
    /// 把盒子中未选中原子周围的密度替换为 `masked_value`
    pub mask_around_unselected_atoms: bool,
    pub mask_radius: f64,
    pub masked_value: f64,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            box_cushion: 3.0,
            skip_waters: false,
            skip_hetero: false,
            skip_empty_boxes: true,
            select_final_boxes_based_on_model: true,
            model_can_be_outside_bounds: true,
            mask_around_unselected_atoms: false,
            mask_radius: 3.0,
            masked_value: -10.0,
        }
    }
}
