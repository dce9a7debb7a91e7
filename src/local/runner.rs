//! # 盒子并行执行器
//!
//! 把 n 个盒子分成连续的下标区间，每个区间是一个不可变的 `BoxJob`，
//! 在 rayon 线程池中并行执行。
//!
//! ## 功能
//! - 分组：每组 max(1, round(n / nproc)) 个，最后一组延伸到 n
//! - 进度条显示
//! - 原子计数：尝试 / 成功的盒子数
//! - 任一盒子出错则整个调用失败 (`WorkerFailed`)
//!
//! ## 依赖关系
//! - 被 `local/mod.rs` 调用
//! - 使用 `utils/progress.rs` 创建进度条
//! - 使用 `rayon` 进行并行计算

use crate::error::{MapRegionError, Result};
use crate::utils::progress;

use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 一个工作单元：盒子下标 [first, last)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxJob {
    pub first: usize,
    pub last: usize,
}

/// 把 n 个盒子分给 nproc 个工作单元
pub fn partition_jobs(n: usize, nproc: usize) -> Vec<BoxJob> {
    if n == 0 {
        return Vec::new();
    }
    let nproc = nproc.max(1);
    let n_in_group = ((n as f64 / nproc as f64).round() as usize).max(1);
    let mut jobs = Vec::new();
    let mut first = 0;
    while first < n {
        let mut last = (first + n_in_group).min(n);
        // 最后一个工作单元包含剩余全部盒子
        if jobs.len() + 1 == nproc {
            last = n;
        }
        jobs.push(BoxJob { first, last });
        first = last;
    }
    jobs
}

/// 执行统计
#[derive(Debug)]
pub struct RunResult<T> {
    /// 成功的结果，顺序不保证
    pub results: Vec<T>,
    pub attempted: usize,
    pub successful: usize,
}

/// 盒子执行器
pub struct BoxRunner {
    /// 并行作业数
    nproc: usize,
}

impl BoxRunner {
    /// 创建执行器；0 表示使用全部 CPU
    pub fn new(nproc: usize) -> Self {
        let nproc = if nproc == 0 { num_cpus::get() } else { nproc };
        Self { nproc }
    }

    pub fn nproc(&self) -> usize {
        self.nproc
    }

    /// 对盒子 0..n 并行调用 `worker`
    ///
    /// `worker` 返回 `Ok(None)` 表示该盒子跳过（如存在空箱）。
    pub fn run<T, F>(&self, n: usize, worker: F) -> Result<RunResult<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<Option<T>> + Sync + Send,
    {
        let jobs = partition_jobs(n, self.nproc);
        let pb = progress::create_progress_bar(n as u64, "Boxes");

        let attempted = AtomicUsize::new(0);
        let successful = AtomicUsize::new(0);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.nproc)
            .build()
            .map_err(|e| MapRegionError::Other(format!("Unable to start thread pool: {}", e)))?;

        let grouped: Result<Vec<Vec<T>>> = pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let mut out = Vec::new();
                    for index in job.first..job.last {
                        attempted.fetch_add(1, Ordering::Relaxed);
                        let result = worker(index).map_err(|e| MapRegionError::WorkerFailed {
                            first: job.first,
                            last: job.last,
                            reason: e.to_string(),
                        })?;
                        if let Some(value) = result {
                            successful.fetch_add(1, Ordering::Relaxed);
                            out.push(value);
                        }
                        pb.inc(1);
                    }
                    Ok(out)
                })
                .collect()
        });

        pb.finish_and_clear();

        let results: Vec<T> = grouped?.into_iter().flatten().collect();
        Ok(RunResult {
            results,
            attempted: attempted.into_inner(),
            successful: successful.into_inner(),
        })
    }
}
