//! Diagnostic plot rendering (PRD-03).
//!
//! One plot per completed job, written into the job directory: a
//! normalized confusion-matrix heatmap for classification or a
//! predicted-vs-actual scatter for regression. Rendering failures are
//! non-fatal to the job; the evaluator logs them and stores a null
//! artifact reference.
//!
//! Rendering is text-free: the bitmap feature set carries no system font
//! dependency, so plots draw the same in containers without fonts.

use std::path::Path;

use plotters::prelude::*;

use crate::error::PipelineError;

/// Filename of the classification plot inside a job directory.
pub const CONFUSION_MATRIX_FILE: &str = "confusion_matrix.png";

/// Filename of the regression plot inside a job directory.
pub const REGRESSION_PLOT_FILE: &str = "regression_plot.png";

/// Plot dimensions in pixels.
const PLOT_SIZE: (u32, u32) = (640, 480);

fn plot_err<E: std::fmt::Display>(e: E) -> PipelineError {
    PipelineError::Plot(e.to_string())
}

/// Shade of blue for a normalized cell value in `0.0..=1.0`.
fn blue_shade(fraction: f64) -> RGBColor {
    let f = fraction.clamp(0.0, 1.0);
    let lerp = |from: f64, to: f64| (from + (to - from) * f) as u8;
    RGBColor(lerp(235.0, 8.0), lerp(245.0, 48.0), lerp(255.0, 107.0))
}

/// Render a row-normalized confusion matrix heatmap. Cell (predicted,
/// actual) intensity encodes the fraction of that actual class predicted
/// as each label.
pub fn render_confusion_matrix(
    path: &Path,
    classes: &[String],
    y_true: &[f64],
    y_pred: &[f64],
) -> Result<(), PipelineError> {
    let n = classes.len();
    if n == 0 {
        return Err(PipelineError::Plot("No classes to plot".to_string()));
    }

    // counts[actual][predicted], normalized per actual-class row.
    let mut counts = vec![vec![0usize; n]; n];
    for (t, p) in y_true.iter().zip(y_pred) {
        let (t, p) = (*t as usize, *p as usize);
        if t < n && p < n {
            counts[t][p] += 1;
        }
    }

    let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let n_i32 = n as i32;
    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(0..n_i32, 0..n_i32)
        .map_err(plot_err)?;

    chart
        .draw_series((0..n).flat_map(|actual| {
            let row_total: usize = counts[actual].iter().sum();
            let counts = &counts;
            (0..n).map(move |predicted| {
                let fraction = if row_total > 0 {
                    counts[actual][predicted] as f64 / row_total as f64
                } else {
                    0.0
                };
                Rectangle::new(
                    [
                        (predicted as i32, actual as i32),
                        (predicted as i32 + 1, actual as i32 + 1),
                    ],
                    blue_shade(fraction).filled(),
                )
            })
        }))
        .map_err(plot_err)?;

    // Cell borders so low-intensity cells stay visible.
    chart
        .draw_series((0..n).flat_map(|actual| {
            (0..n).map(move |predicted| {
                Rectangle::new(
                    [
                        (predicted as i32, actual as i32),
                        (predicted as i32 + 1, actual as i32 + 1),
                    ],
                    BLACK.mix(0.3),
                )
            })
        }))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Render a predicted-vs-actual scatter with the identity diagonal.
pub fn render_regression_scatter(
    path: &Path,
    y_true: &[f64],
    y_pred: &[f64],
) -> Result<(), PipelineError> {
    if y_true.is_empty() {
        return Err(PipelineError::Plot("No points to plot".to_string()));
    }

    let lo = y_true
        .iter()
        .chain(y_pred)
        .copied()
        .fold(f64::INFINITY, f64::min);
    let hi = y_true
        .iter()
        .chain(y_pred)
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let pad = ((hi - lo) * 0.05).max(0.5);
    let range = (lo - pad)..(hi + pad);

    let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(range.clone(), range)
        .map_err(plot_err)?;

    // Identity diagonal: a perfect model lands every point on it.
    chart
        .draw_series(LineSeries::new(
            vec![(lo - pad, lo - pad), (hi + pad, hi + pad)],
            RED.stroke_width(2),
        ))
        .map_err(plot_err)?;

    chart
        .draw_series(
            y_true
                .iter()
                .zip(y_pred)
                .map(|(t, p)| Circle::new((*t, *p), 3, BLUE.mix(0.8).filled())),
        )
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
