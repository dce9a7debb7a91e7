//! # 样本的 NCS 展开
//!
//! 每个样本经 k 个 NCS 算符得到 k 个样本：位置按算符变换（原始坐标系），
//! 各方向的数据按旋转后的方向重新对应到原方向列表。
//!
//! ## 方向匹配
//! - 相似度为单位向量点积的绝对值
//! - 严格模式：先把与自身相似度 ≥ 0.95 的方向对应到自身，且每个目标只用一次
//! - 其余按相似度从大到小贪心分配，相等时取（源, 目标）下标最小的一对
//!
//! ## 依赖关系
//! - 被 `local/mod.rs` 使用
//! - 使用 `models/ncs.rs`

use crate::local::{ResolutionSample, ScaleSample};
use crate::models::symmetry::{dot, norm};
use crate::models::NcsSpec;

/// 严格模式下视为已对应的相似度
const SELF_MATCH: f64 = 0.95;

fn unit(v: &[f64; 3]) -> [f64; 3] {
    let n = norm(v).max(1e-12);
    [v[0] / n, v[1] / n, v[2] / n]
}

/// 为每个源方向找到对应的目标方向下标
pub fn match_directions(sources: &[[f64; 3]], targets: &[[f64; 3]], strict: bool) -> Vec<Option<usize>> {
    let sources: Vec<[f64; 3]> = sources.iter().map(unit).collect();
    let targets: Vec<[f64; 3]> = targets.iter().map(unit).collect();
    let similarity: Vec<Vec<f64>> = sources
        .iter()
        .map(|s| targets.iter().map(|t| dot(s, t).abs()).collect())
        .collect();

    let mut assigned: Vec<Option<usize>> = vec![None; sources.len()];
    let mut used = vec![false; targets.len()];

    if strict {
        for i in 0..sources.len().min(targets.len()) {
            if similarity[i][i] >= SELF_MATCH && !used[i] {
                assigned[i] = Some(i);
                used[i] = true;
            }
        }
    }

    loop {
        let mut best: Option<(usize, usize)> = None;
        let mut best_value = -1.0;
        for (i, row) in similarity.iter().enumerate() {
            if assigned[i].is_some() {
                continue;
            }
            for (j, &value) in row.iter().enumerate() {
                if strict && used[j] {
                    continue;
                }
                if value > best_value {
                    best_value = value;
                    best = Some((i, j));
                }
            }
        }
        match best {
            Some((i, j)) => {
                assigned[i] = Some(j);
                used[j] = true;
            }
            None => break,
        }
    }
    assigned
}

/// 缩放样本的 NCS 展开
pub fn expand_scale_samples(samples: &[ScaleSample], ncs: &NcsSpec) -> Vec<ScaleSample> {
    if ncs.is_trivial() {
        return samples.to_vec();
    }
    let mut expanded = Vec::with_capacity(samples.len() * ncs.n_operators());
    for sample in samples {
        let directions: Vec<[f64; 3]> = sample
            .per_direction
            .iter()
            .filter_map(|info| info.direction)
            .collect();
        let anisotropic = directions.len() == sample.per_direction.len() && !directions.is_empty();

        for op in ncs.operators() {
            let location = op.apply(&sample.location);
            let per_direction = if anisotropic {
                let rotated: Vec<[f64; 3]> = directions.iter().map(|d| op.rotate(d)).collect();
                let pointers = match_directions(&rotated, &directions, true);
                let mut rearranged = sample.per_direction.clone();
                for (j, pointer) in pointers.iter().enumerate() {
                    if let Some(p) = pointer {
                        rearranged[*p] = sample.per_direction[j].clone();
                        rearranged[*p].direction = Some(directions[*p]);
                    }
                }
                rearranged
            } else {
                sample.per_direction.clone()
            };
            expanded.push(ScaleSample {
                location,
                per_direction,
            });
        }
    }
    expanded
}

/// 分辨率样本的 NCS 展开（只变换位置）
pub fn expand_resolution_samples(samples: &[ResolutionSample], ncs: &NcsSpec) -> Vec<ResolutionSample> {
    if ncs.is_trivial() {
        return samples.to_vec();
    }
    samples
        .iter()
        .flat_map(|s| {
            ncs.operators().iter().map(move |op| ResolutionSample {
                location: op.apply(&s.location),
                d_min: s.d_min,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::estimate::direction_vectors;
    use crate::local::DirectionScaleInfo;

    fn info(direction: Option<[f64; 3]>, value: f64) -> DirectionScaleInfo {
        DirectionScaleInfo {
            direction,
            target_scale_factors: Some(vec![value]),
            bin_d_min: vec![3.0],
            cc_per_bin: vec![0.9],
            low_res_cc: 0.9,
        }
    }

    #[test]
    fn test_identity_matches_itself() {
        let dv = direction_vectors();
        let p = match_directions(&dv, &dv, true);
        assert_eq!(p, (0..12).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn test_tie_break_lowest_index() {
        // 两个目标相似度相同，取下标小的
        let sources = [[1.0, 1.0, 0.0]];
        let targets = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        assert_eq!(match_directions(&sources, &targets, false), vec![Some(0)]);
        // 非严格模式允许重复使用目标
        let sources = [[1.0, 0.1, 0.0], [1.0, -0.1, 0.0]];
        assert_eq!(
            match_directions(&sources, &targets, false),
            vec![Some(0), Some(0)]
        );
        assert_eq!(
            match_directions(&sources, &targets, true),
            vec![Some(0), Some(1)]
        );
    }

    #[test]
    fn test_expansion_cardinality_and_permutation() {
        let dv = direction_vectors();
        let sample = ScaleSample {
            location: [5.0, 0.0, 0.0],
            per_direction: dv.iter().enumerate().map(|(i, d)| info(Some(*d), i as f64)).collect(),
        };
        let ncs = NcsSpec::cyclic(4, [0.0, 0.0, 0.0]);
        let expanded = expand_scale_samples(&[sample.clone()], &ncs);
        assert_eq!(expanded.len(), 4);
        for s in &expanded {
            assert_eq!(s.per_direction.len(), 12);
        }
        // 第一个拷贝不变
        assert_eq!(expanded[0].location, [5.0, 0.0, 0.0]);
        // 绕 z 转 90°：x 方向的数据落到 y 方向上
        let quarter = &expanded[1];
        assert!((quarter.location[1] - 5.0).abs() < 1e-9);
        assert_eq!(quarter.per_direction[1].target_scale_factors, Some(vec![0.0]));
        assert_eq!(quarter.per_direction[0].target_scale_factors, Some(vec![1.0]));
        assert_eq!(quarter.per_direction[2].target_scale_factors, Some(vec![2.0]));
    }

    #[test]
    fn test_isotropic_and_resolution_expansion() {
        let ncs = NcsSpec::cyclic(3, [0.0, 0.0, 0.0]);
        let sample = ScaleSample {
            location: [1.0, 0.0, 0.0],
            per_direction: vec![info(None, 2.0)],
        };
        let out = expand_scale_samples(&[sample], &ncs);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|s| s.per_direction.len() == 1));

        let res = expand_resolution_samples(
            &[ResolutionSample {
                location: [1.0, 0.0, 0.0],
                d_min: 3.5,
            }],
            &ncs,
        );
        assert_eq!(res.len(), 3);
        assert!(res.iter().all(|r| r.d_min == 3.5));
    }
}
