//! # 数据模型模块
//!
//! 定义坐标框架、原子模型与 NCS 描述。
//!
//! ## 依赖关系
//! - 被 `parsers/`, `maps/`, `boxing/`, `local/`, `manager/` 使用
//! - 子模块: symmetry, model, ncs

pub mod model;
pub mod ncs;
pub mod symmetry;

pub use model::{Atom, AtomSelection, AtomicModel};
pub use ncs::{NcsOperator, NcsSpec};
pub use symmetry::{CrystalSymmetry, ShiftRecord, UnitCell};
