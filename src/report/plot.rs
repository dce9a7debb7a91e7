//! # FSC 曲线图
//!
//! 使用 `plotters` 绘制 FSC 对 1/d 的曲线，并标出阈值线与对应分辨率。
//! 扩展名为 `.svg` 时输出 SVG，否则输出 PNG。
//!
//! ## 依赖关系
//! - 被 `commands/analyze.rs` 调用
//! - 使用 `maps/fsc.rs` 的 FscCurve

use crate::error::{MapRegionError, Result};
use crate::maps::fsc::FscCurve;

use plotters::prelude::*;
use std::path::Path;

/// 图像尺寸
pub const DEFAULT_SIZE: (u32, u32) = (1000, 700);

fn plot_error<E: std::fmt::Debug>(e: E) -> MapRegionError {
    MapRegionError::Other(format!("{:?}", e))
}

/// 按扩展名选择后端生成 FSC 图
pub fn generate_fsc_plot(curve: &FscCurve, cutoff: f64, output_path: &Path, title: &str) -> Result<()> {
    let use_svg = output_path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("svg"));
    if use_svg {
        let root = SVGBackend::new(output_path, DEFAULT_SIZE).into_drawing_area();
        draw_fsc_chart(&root, curve, cutoff, title)?;
        root.present().map_err(plot_error)?;
    } else {
        let root = BitMapBackend::new(output_path, DEFAULT_SIZE).into_drawing_area();
        draw_fsc_chart(&root, curve, cutoff, title)?;
        root.present().map_err(plot_error)?;
    }
    Ok(())
}

fn draw_fsc_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, plotters::coord::Shift>,
    curve: &FscCurve,
    cutoff: f64,
    title: &str,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE).map_err(plot_error)?;

    let x_max = curve
        .points
        .iter()
        .map(|p| p.d_star)
        .fold(0.0, f64::max)
        .max(0.1)
        * 1.02;
    let y_min = curve
        .points
        .iter()
        .map(|p| p.fsc)
        .fold(0.0, f64::min)
        .max(-1.0)
        - 0.05;

    let mut chart = ChartBuilder::on(root)
        .caption(title, ("sans-serif", 28).into_font())
        .margin(30)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..x_max, y_min..1.05)
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .x_desc("1/d (1/Å)")
        .y_desc("FSC")
        .x_label_style(("sans-serif", 16))
        .y_label_style(("sans-serif", 16))
        .axis_desc_style(("sans-serif", 18))
        .draw()
        .map_err(plot_error)?;

    let line_color = RGBColor(0, 102, 204);
    chart
        .draw_series(LineSeries::new(
            curve.points.iter().map(|p| (p.d_star, p.fsc)),
            line_color.stroke_width(2),
        ))
        .map_err(plot_error)?;

    // 阈值线
    let cutoff_color = RGBColor(204, 51, 0);
    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![(0.0, cutoff), (x_max, cutoff)],
            cutoff_color.stroke_width(1),
        )))
        .map_err(plot_error)?;

    if let Some(d) = curve.d_min_at_cutoff(cutoff) {
        let label = format!("FSC={} at {:.2} Å", cutoff, d);
        chart
            .draw_series(std::iter::once(Text::new(
                label,
                (x_max * 0.55, 0.9),
                ("sans-serif", 16).into_font().color(&BLACK),
            )))
            .map_err(plot_error)?;
    }

    Ok(())
}
