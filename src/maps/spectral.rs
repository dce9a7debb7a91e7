//! # 参考振幅谱
//!
//! 典型蛋白质图的振幅随分辨率的变化曲线（低分辨率归一化为 1），
//! 用于谱缩放：每个分辨率箱的缩放因子再乘以该箱平均 d 处的参考值。
//!
//! ## 依赖关系
//! - 被 `local/shells.rs` 和 `manager/sharpen.rs` 使用

/// (s = 1/d, 相对振幅)，s 升序
const REFERENCE_AMPLITUDES: [(f64, f64); 15] = [
    (0.00, 1.000),
    (0.05, 0.820),
    (0.10, 0.420),
    (0.15, 0.200),
    (0.18, 0.150),
    (0.20, 0.160),
    (0.22, 0.180),
    (0.25, 0.170),
    (0.30, 0.130),
    (0.35, 0.100),
    (0.40, 0.080),
    (0.50, 0.055),
    (0.60, 0.040),
    (0.80, 0.025),
    (1.00, 0.015),
];

/// 分辨率 `d` (Å) 处的参考相对振幅，表外取端点值
pub fn get_scale(d: f64) -> f64 {
    let s = if d > 0.0 && d.is_finite() { 1.0 / d } else { 0.0 };
    let table = &REFERENCE_AMPLITUDES;
    if s <= table[0].0 {
        return table[0].1;
    }
    let last = table[table.len() - 1];
    if s >= last.0 {
        return last.1;
    }
    let hi = table.partition_point(|&(x, _)| x < s);
    let (x0, y0) = table[hi - 1];
    let (x1, y1) = table[hi];
    y0 + (s - x0) / (x1 - x0) * (y1 - y0)
}
