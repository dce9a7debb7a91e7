//! # 三维 FFT
//!
//! 使用 `rustfft` 沿三个轴依次做一维变换。
//! 正变换除以格点总数，逆变换不归一化，二者互逆。
//!
//! ## 依赖关系
//! - 被 `maps/coefficients.rs`, `maps/density.rs` 使用
//! - 使用 `rustfft`, `num-complex`, `ndarray`

use ndarray::{Array3, Axis};
use num_complex::Complex64;
use rustfft::FftPlanner;

/// 原地三维 FFT
pub fn fft_3d(data: &mut Array3<Complex64>, inverse: bool) {
    let mut planner = FftPlanner::<f64>::new();
    for axis in 0..3 {
        let n = data.len_of(Axis(axis));
        if n <= 1 {
            continue;
        }
        let fft = if inverse {
            planner.plan_fft_inverse(n)
        } else {
            planner.plan_fft_forward(n)
        };
        let mut buf: Vec<Complex64> = vec![Complex64::new(0.0, 0.0); n];
        for mut lane in data.lanes_mut(Axis(axis)) {
            for (b, v) in buf.iter_mut().zip(lane.iter()) {
                *b = *v;
            }
            fft.process(&mut buf);
            for (v, b) in lane.iter_mut().zip(buf.iter()) {
                *v = *b;
            }
        }
    }
    if !inverse {
        let scale = 1.0 / data.len().max(1) as f64;
        data.mapv_inplace(|v| v * scale);
    }
}

/// 实空间 -> 傅里叶系数（正变换，已归一化）
pub fn forward(map: &Array3<f64>) -> Array3<Complex64> {
    let mut data = map.mapv(|v| Complex64::new(v, 0.0));
    fft_3d(&mut data, false);
    data
}

/// 傅里叶系数 -> 实空间（取实部）
pub fn inverse(mut coeffs: Array3<Complex64>) -> Array3<f64> {
    fft_3d(&mut coeffs, true);
    coeffs.mapv(|v| v.re)
}

/// FFT 下标 -> Miller 指数
pub fn index_to_miller(u: usize, n: usize) -> i32 {
    if u <= n / 2 {
        u as i32
    } else {
        u as i32 - n as i32
    }
}

/// Miller 指数 -> FFT 下标
pub fn miller_to_index(h: i32, n: usize) -> usize {
    h.rem_euclid(n as i32) as usize
}
