//! # 密度图模块
//!
//! 实空间格点、傅里叶系数、分辨率分箱与相关统计。
//!
//! ## 依赖关系
//! - 被 `boxing/`, `masking/`, `local/`, `manager/`, `parsers/` 使用
//! - 子模块: density, coefficients, fft, fsc, model_map, spectral

pub mod coefficients;
pub mod density;
pub mod fft;
pub mod fsc;
pub mod model_map;
pub mod spectral;

pub use density::DensityMap;
