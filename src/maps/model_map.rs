//! # 由原子模型计算密度图
//!
//! 用 Cromer-Mann 参数的高斯展开在实空间累加电子密度，再截断到 d_min。
//!
//! ## 公式
//! f(s) = Σᵢ aᵢ exp(-bᵢ s²) + c，s = d*/2
//! 每一项在实空间为 aᵢ (4π/bᵢ')^{3/2} exp(-4π² r²/bᵢ')，bᵢ' = bᵢ + B + b_blur
//!
//! ## 数据来源
//! International Tables for Crystallography, Vol. C, Table 6.1.1.4
//!
//! ## 依赖关系
//! - 被 `manager/sharpen.rs`（模型锐化）和 `manager/mod.rs`（map_model_cc）调用
//! - 使用 `maps/density.rs`

use crate::error::Result;
use crate::maps::density::DensityMap;
use crate::models::AtomicModel;

use ndarray::Array3;
use std::f64::consts::PI;

/// 原子散射因子参数
#[derive(Debug, Clone, Copy)]
pub struct ScatteringFactorParams {
    pub a: [f64; 4],
    pub b: [f64; 4],
    pub c: f64,
}

impl ScatteringFactorParams {
    /// 计算散射因子 f(s)，其中 s = sin(θ)/λ
    pub fn calculate(&self, s: f64) -> f64 {
        let s2 = s * s;
        let mut f = self.c;
        for i in 0..4 {
            f += self.a[i] * (-self.b[i] * s2).exp();
        }
        f
    }
}

/// 元素 -> 散射因子参数；未知元素按碳处理
pub fn form_factor(element: &str) -> ScatteringFactorParams {
    let p = |a: [f64; 4], b: [f64; 4], c: f64| ScatteringFactorParams { a, b, c };
    match element.trim().to_uppercase().as_str() {
        "H" => p(
            [0.493002, 0.322912, 0.140191, 0.040810],
            [10.5109, 26.1257, 3.14236, 57.7997],
            0.003038,
        ),
        "N" => p(
            [12.2126, 3.1322, 2.0125, 1.1663],
            [0.0057, 9.8933, 28.9975, 0.5826],
            -11.529,
        ),
        "O" => p(
            [3.0485, 2.2868, 1.5463, 0.8670],
            [13.2771, 5.7011, 0.3239, 32.9089],
            0.2508,
        ),
        "NA" => p(
            [4.7626, 3.1736, 1.2674, 1.1128],
            [3.2850, 8.8422, 0.3136, 129.424],
            0.6760,
        ),
        "MG" => p(
            [5.4204, 2.1735, 1.2269, 2.3073],
            [2.8275, 79.2611, 0.3808, 7.1937],
            0.8584,
        ),
        "P" => p(
            [6.4345, 4.1791, 1.7800, 1.4908],
            [1.9067, 27.1570, 0.5260, 68.1645],
            1.1149,
        ),
        "S" => p(
            [6.9053, 5.2034, 1.4379, 1.5863],
            [1.4679, 22.2151, 0.2536, 56.1720],
            0.8669,
        ),
        "CL" => p(
            [11.4604, 7.1964, 6.2556, 1.6455],
            [0.0104, 1.1662, 18.5194, 47.7784],
            -9.5574,
        ),
        "CA" => p(
            [8.6266, 7.3873, 1.5899, 1.0211],
            [10.4421, 0.6599, 85.7484, 178.437],
            1.3751,
        ),
        "FE" => p(
            [11.7695, 7.3573, 3.5222, 2.3045],
            [4.7611, 0.3072, 15.3535, 76.8805],
            1.0369,
        ),
        "ZN" => p(
            [14.0743, 7.0318, 5.1652, 2.4100],
            [3.2655, 0.2333, 10.3163, 58.7097],
            1.3041,
        ),
        "SE" => p(
            [17.0006, 5.8196, 3.9731, 4.3543],
            [2.4098, 0.2726, 15.2372, 43.8163],
            2.8409,
        ),
        _ => p(
            [2.3100, 1.0200, 1.5886, 0.8650],
            [20.8439, 10.2075, 0.5687, 51.6512],
            0.2156,
        ),
    }
}

/// 在 `template` 的格点与工作框架上计算模型密度图，截断到 `d_min`
pub fn generate_map(model: &AtomicModel, template: &DensityMap, d_min: f64) -> Result<DensityMap> {
    let spacing = template.grid_spacing().iter().cloned().fold(0.0, f64::max);
    let sigma_blur = 0.5 * spacing;
    let b_blur = 8.0 * PI * PI * sigma_blur * sigma_blur;

    let mut data = Array3::<f64>::zeros(template.data().dim());
    for atom in model.atoms() {
        let ff = form_factor(&atom.element);
        let b_atom = atom.b_iso.max(0.0) + b_blur;

        // (振幅, b') 的五个高斯项
        let mut terms = [(0.0, 0.0); 5];
        for i in 0..4 {
            terms[i] = (ff.a[i], ff.b[i] + b_atom);
        }
        terms[4] = (ff.c, b_atom);
        let b_max = terms.iter().map(|t| t.1).fold(0.0, f64::max);
        let radius = 4.0 * (b_max / (8.0 * PI * PI)).sqrt();

        let occupancy = atom.occupancy;
        template.for_each_point_near(&atom.xyz, radius, |idx, r| {
            let mut rho = 0.0;
            for &(a, b) in &terms {
                rho += a * (4.0 * PI / b).powf(1.5) * (-4.0 * PI * PI * r * r / b).exp();
            }
            data[idx] += occupancy * rho;
        });
    }

    let map = template.customized_copy(data)?;
    if d_min > 0.0 {
        let coeffs = map.map_as_fourier_coefficients(d_min, None);
        let mut filtered = map.fourier_coefficients_as_map(&coeffs)?;
        filtered.set_resolution(Some(d_min));
        Ok(filtered)
    } else {
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Atom, CrystalSymmetry, UnitCell};

    #[test]
    fn test_form_factor_at_zero_is_electron_count() {
        assert!((form_factor("C").calculate(0.0) - 6.0).abs() < 0.01);
        assert!((form_factor("O").calculate(0.0) - 8.0).abs() < 0.01);
        assert!((form_factor("n").calculate(0.0) - 7.0).abs() < 0.01);
        assert!((form_factor("Xx").calculate(0.0) - 6.0).abs() < 0.01);
    }

    #[test]
    fn test_generate_map_peaks_at_atom() {
        let template = DensityMap::new(
            Array3::zeros((20, 20, 20)),
            CrystalSymmetry::p1(UnitCell::cubic(20.0)),
        );
        let model = AtomicModel::new(vec![Atom::new("C1", "C", [10.0, 10.0, 10.0])], None);
        let map = generate_map(&model, &template, 0.0).unwrap();
        let peak = map.data()[[10, 10, 10]];
        assert!(peak > 0.0);
        assert!((peak - map.max_value()).abs() < 1e-12);
        // 积分约等于电子数
        let total: f64 = map.data().sum();
        assert!((total - 6.0).abs() < 0.3);
    }
}
