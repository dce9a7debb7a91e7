//! # analyze 命令实现
//!
//! - `fsc`: 两张图的 FSC 曲线，打印摘要表，可选图表与 CSV
//! - `local-resolution`: 半图局部分辨率图与样本 CSV
//!
//! ## 依赖关系
//! - 使用 `cli/analyze.rs` 定义的参数
//! - 使用 `manager/analysis.rs`, `report/`

use crate::cli::analyze::{AnalyzeArgs, AnalyzeCommands, FscArgs, LocalResolutionArgs};
use crate::error::Result;
use crate::manager::{MapId, MapModelManager};
use crate::maps::fsc::FscCurve;
use crate::parsers;
use crate::report::{export, plot};
use crate::utils::output;

use tabled::{Table, Tabled};

/// FSC 摘要表的一行
#[derive(Debug, Clone, Tabled)]
struct FscRow {
    #[tabled(rename = "d_min (Å)")]
    d_min: String,
    #[tabled(rename = "1/d")]
    d_star: String,
    #[tabled(rename = "FSC")]
    fsc: String,
    #[tabled(rename = "N")]
    n_refl: usize,
}

/// 执行 analyze 命令
pub fn execute(args: AnalyzeArgs) -> Result<()> {
    match args.command {
        AnalyzeCommands::Fsc(fsc_args) => execute_fsc(fsc_args),
        AnalyzeCommands::LocalResolution(lr_args) => execute_local_resolution(lr_args),
    }
}

fn load_pair(map1: &std::path::Path, map2: &std::path::Path) -> Result<MapModelManager> {
    let first = parsers::read_map_file(map1)?;
    let second = parsers::read_map_file(map2)?;
    MapModelManager::from_half_maps(first, second)
}

/// 均匀取 `show` 个点
fn summary_rows(curve: &FscCurve, show: usize) -> Vec<FscRow> {
    let n = curve.points.len();
    let step = if show == 0 { n.max(1) } else { n.div_ceil(show).max(1) };
    curve
        .points
        .iter()
        .enumerate()
        .filter(|(i, _)| i % step == 0 || *i + 1 == n)
        .map(|(_, p)| FscRow {
            d_min: format!("{:.2}", p.d_min),
            d_star: format!("{:.4}", p.d_star),
            fsc: format!("{:.3}", p.fsc),
            n_refl: p.n_refl,
        })
        .collect()
}

fn execute_fsc(args: FscArgs) -> Result<()> {
    output::print_header("Fourier Shell Correlation");

    let mmm = load_pair(&args.map1, &args.map2)?;
    let curve = mmm.map_map_fsc(&MapId::half_map_1(), &MapId::half_map_2())?;
    println!("{}", Table::new(summary_rows(&curve, args.show)));

    match curve.d_min_at_cutoff(args.cutoff) {
        Some(d) => output::print_success(&format!("Resolution at FSC={}: {:.2} Å", args.cutoff, d)),
        None => output::print_warning("FSC curve is empty"),
    }

    if let Some(ref path) = args.csv {
        export::fsc_to_csv(&curve, path)?;
        output::print_written("FSC curve", path);
    }
    if let Some(ref path) = args.plot {
        let title = format!(
            "FSC: {} vs {}",
            args.map1.file_name().unwrap_or_default().to_string_lossy(),
            args.map2.file_name().unwrap_or_default().to_string_lossy()
        );
        plot::generate_fsc_plot(&curve, args.cutoff, path, &title)?;
        output::print_written("FSC plot", path);
    }
    Ok(())
}

fn execute_local_resolution(args: LocalResolutionArgs) -> Result<()> {
    output::print_header("Local Resolution");

    let mmm = load_pair(&args.map1, &args.map2)?;
    let resolution = match args.resolution {
        Some(r) => r,
        None => mmm.resolution_from_half_maps()?,
    };
    output::print_info(&format!("Nominal resolution {:.2} Å", resolution));

    let result = mmm.local_fsc(Some(resolution), args.nproc)?;
    if result.samples.is_empty() {
        output::print_warning("No local resolution samples could be obtained.");
        return Ok(());
    }
    let (lo, hi, sum) = result
        .samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY, 0.0), |(lo, hi, sum), s| {
            (lo.min(s.d_min), hi.max(s.d_min), sum + s.d_min)
        });
    output::print_info(&format!(
        "{} samples: d_min {:.2} - {:.2} Å, mean {:.2} Å",
        result.samples.len(),
        lo,
        hi,
        sum / result.samples.len() as f64
    ));

    if let Some(ref path) = args.output {
        parsers::write_map_file(&result.map, path)?;
        output::print_written("Local resolution map", path);
    }
    if let Some(ref path) = args.csv {
        export::samples_to_csv(&result.samples, path)?;
        output::print_written("Samples", path);
    }
    Ok(())
}
