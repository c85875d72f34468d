use crate::error::ExportError;
use crate::portfolio::{PortfolioSample, StudyResult};
use plotters::prelude::*;
use rust_xlsxwriter::{Format, FormatAlign, Workbook, Worksheet};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

pub const SAMPLES_SHEET: &str = "Portfolios";
pub const OPTIMAL_SHEET: &str = "Optimal Portfolio";
pub const MIN_VOL_SHEET: &str = "Min Volatility Portfolio";

const OPTIMAL_HEADER: &str = "Optimal Weights (%)";
const MIN_VOL_HEADER: &str = "Min Volatility Weights (%)";
const NUM_FORMAT: &str = "0.0000";
const SAMPLES_COL_WIDTH: f64 = 18.0;
const WEIGHTS_COL_WIDTH: f64 = 25.0;

/// 10×6 inches at 300 DPI.
const PLOT_SIZE: (u32, u32) = (3000, 1800);
/// 300 DPI in the pixels-per-metre unit of the PNG `pHYs` chunk.
const PLOT_PIXELS_PER_METRE: u32 = 11_811;
const COLORBAR_WIDTH: u32 = 300;
const PLOT_TITLE: &str = "Efficient Frontier - Portfolio Optimization";

/// Weight as a percentage, rounded to four decimal places.
pub fn weight_percent(weight: f64) -> f64 {
    (weight * 100.0 * 1e4).round() / 1e4
}

// Excel has no representation for NaN or infinities.
fn write_metric(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: f64,
    format: &Format,
) -> Result<(), ExportError> {
    if value.is_finite() {
        sheet.write_number_with_format(row, col, value, format)?;
    } else {
        sheet.write_string_with_format(row, col, value.to_string(), format)?;
    }
    Ok(())
}

fn write_weights_sheet(
    workbook: &mut Workbook,
    name: &str,
    header: &str,
    symbols: &[String],
    sample: &PortfolioSample,
    number: &Format,
    bold: &Format,
) -> Result<(), ExportError> {
    let sheet = workbook.add_worksheet();
    sheet.set_name(name)?;
    sheet.set_column_width(0, WEIGHTS_COL_WIDTH)?;
    sheet.set_column_width(1, WEIGHTS_COL_WIDTH)?;

    sheet.write_string_with_format(0, 0, "Symbol", bold)?;
    sheet.write_string_with_format(0, 1, header, bold)?;
    for (i, (symbol, &w)) in symbols.iter().zip(&sample.weights).enumerate() {
        let row = i as u32 + 1;
        sheet.write_string_with_format(row, 0, symbol, bold)?;
        sheet.write_number_with_format(row, 1, weight_percent(w), number)?;
    }
    Ok(())
}

/// Writes every sample plus the two selected weight vectors to an xlsx workbook.
pub fn write_workbook(result: &StudyResult, path: &Path) -> Result<(), ExportError> {
    let mut workbook = Workbook::new();
    let number = Format::new()
        .set_num_format(NUM_FORMAT)
        .set_align(FormatAlign::Center);
    let bold = Format::new().set_bold().set_align(FormatAlign::Center);

    {
        let sheet = workbook.add_worksheet();
        sheet.set_name(SAMPLES_SHEET)?;

        let mut headers = vec![
            "Expected Return".to_string(),
            "Volatility (Risk)".to_string(),
            "Sharpe Ratio".to_string(),
        ];
        headers.extend(result.symbols.iter().map(|s| format!("{} Weight", s)));
        for (col, header) in headers.iter().enumerate() {
            sheet.set_column_width(col as u16, SAMPLES_COL_WIDTH)?;
            sheet.write_string_with_format(0, col as u16, header, &bold)?;
        }

        for (i, s) in result.samples.iter().enumerate() {
            let row = i as u32 + 1;
            write_metric(sheet, row, 0, s.expected_return, &number)?;
            write_metric(sheet, row, 1, s.volatility, &number)?;
            write_metric(sheet, row, 2, s.sharpe_ratio, &number)?;
            for (j, &w) in s.weights.iter().enumerate() {
                sheet.write_number_with_format(row, 3 + j as u16, w, &number)?;
            }
        }
    }

    write_weights_sheet(
        &mut workbook,
        OPTIMAL_SHEET,
        OPTIMAL_HEADER,
        &result.symbols,
        result.max_sharpe(),
        &number,
        &bold,
    )?;
    write_weights_sheet(
        &mut workbook,
        MIN_VOL_SHEET,
        MIN_VOL_HEADER,
        &result.symbols,
        result.min_volatility(),
        &number,
        &bold,
    )?;

    workbook.save(path)?;
    info!("Wrote {} portfolios to {}", result.samples.len(), path.display());
    Ok(())
}

// ──────────────────────────────────────────────────────────────────────────────
// Scatter plot
// ──────────────────────────────────────────────────────────────────────────────

const VIRIDIS: [(u8, u8, u8); 9] = [
    (68, 1, 84),
    (71, 44, 122),
    (59, 81, 139),
    (44, 113, 142),
    (33, 144, 141),
    (39, 173, 129),
    (92, 200, 99),
    (170, 220, 50),
    (253, 231, 37),
];

/// Viridis ramp sampled at `t` in [0, 1].
fn viridis(t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let pos = t * (VIRIDIS.len() - 1) as f64;
    let lo = (pos.floor() as usize).min(VIRIDIS.len() - 2);
    let frac = pos - lo as f64;
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * frac).round() as u8;
    let (a, b) = (VIRIDIS[lo], VIRIDIS[lo + 1]);
    RGBColor(lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
}

/// Min/max of the finite values, widened by 5% on each side.
fn padded_extent(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return None;
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { lo.abs().max(1.0) * 0.05 };
    Some((lo - pad, hi + pad))
}

fn plot_err<E: std::fmt::Display>(e: E) -> ExportError {
    ExportError::Plot(e.to_string())
}

/// Five-pointed star as pixel offsets around its centre.
fn star_points(outer: f64) -> Vec<(i32, i32)> {
    let inner = outer * 0.4;
    (0..10)
        .map(|k| {
            let r = if k % 2 == 0 { outer } else { inner };
            let angle = std::f64::consts::FRAC_PI_2 - k as f64 * std::f64::consts::PI / 5.0;
            ((r * angle.cos()).round() as i32, (-r * angle.sin()).round() as i32)
        })
        .collect()
}

/// Writes an RGB8 buffer as a PNG tagged with the plot's 300 DPI.
fn encode_png(buffer: &[u8], (width, height): (u32, u32), path: &Path) -> Result<(), ExportError> {
    let file = File::create(path).map_err(plot_err)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_pixel_dims(Some(png::PixelDimensions {
        xppu: PLOT_PIXELS_PER_METRE,
        yppu: PLOT_PIXELS_PER_METRE,
        unit: png::Unit::Meter,
    }));
    let mut writer = encoder.write_header().map_err(plot_err)?;
    writer.write_image_data(buffer).map_err(plot_err)?;
    writer.finish().map_err(plot_err)
}

/// Renders volatility against expected return, colored by Sharpe ratio, with
/// the two selected portfolios highlighted.
pub fn write_plot(result: &StudyResult, path: &Path) -> Result<(), ExportError> {
    let mut buffer = vec![0u8; (PLOT_SIZE.0 * PLOT_SIZE.1 * 3) as usize];
    render_plot(result, &mut buffer)?;
    encode_png(&buffer, PLOT_SIZE, path)?;
    info!("Saved frontier plot to {}", path.display());
    Ok(())
}

fn render_plot(result: &StudyResult, buffer: &mut [u8]) -> Result<(), ExportError> {
    let samples = &result.samples;
    let (x_min, x_max) = padded_extent(samples.iter().map(|s| s.volatility))
        .ok_or_else(|| ExportError::Plot("no finite volatilities to plot".to_string()))?;
    let (y_min, y_max) = padded_extent(samples.iter().map(|s| s.expected_return))
        .ok_or_else(|| ExportError::Plot("no finite returns to plot".to_string()))?;
    let (s_min, s_max) = padded_extent(samples.iter().map(|s| s.sharpe_ratio))
        .ok_or_else(|| ExportError::Plot("no finite Sharpe ratios to plot".to_string()))?;

    let root = BitMapBackend::with_buffer(buffer, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let (main, bar) = root.split_horizontally(PLOT_SIZE.0 - COLORBAR_WIDTH);

    let mut chart = ChartBuilder::on(&main)
        .caption(PLOT_TITLE, ("sans-serif", 64))
        .margin(40)
        .x_label_area_size(120)
        .y_label_area_size(170)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("Volatility (Risk)")
        .y_desc("Expected Return")
        .label_style(("sans-serif", 36))
        .axis_desc_style(("sans-serif", 44))
        .draw()
        .map_err(plot_err)?;

    let norm = |s: f64| (s - s_min) / (s_max - s_min);
    chart
        .draw_series(samples.iter().filter(|s| s.volatility.is_finite()).map(|s| {
            Circle::new(
                (s.volatility, s.expected_return),
                7,
                viridis(norm(s.sharpe_ratio)).mix(0.5).filled(),
            )
        }))
        .map_err(plot_err)?;

    let best = result.max_sharpe();
    chart
        .draw_series(std::iter::once(
            EmptyElement::at((best.volatility, best.expected_return))
                + Polygon::new(star_points(36.0), RED.filled()),
        ))
        .map_err(plot_err)?
        .label("Max Sharpe Ratio")
        .legend(|(x, y)| EmptyElement::at((x, y)) + Polygon::new(star_points(16.0), RED.filled()));

    let safest = result.min_volatility();
    chart
        .draw_series(std::iter::once(Cross::new(
            (safest.volatility, safest.expected_return),
            24,
            BLUE.stroke_width(10),
        )))
        .map_err(plot_err)?
        .label("Min Volatility")
        .legend(|(x, y)| Cross::new((x, y), 12, BLUE.stroke_width(5)));

    chart
        .configure_series_labels()
        .label_font(("sans-serif", 40))
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::UpperRight)
        .draw()
        .map_err(plot_err)?;

    let mut colorbar = ChartBuilder::on(&bar)
        .margin_top(140)
        .margin_bottom(160)
        .margin_right(60)
        .y_label_area_size(140)
        .build_cartesian_2d(0.0..1.0, s_min..s_max)
        .map_err(plot_err)?;
    colorbar
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .disable_x_axis()
        .y_desc("Sharpe Ratio")
        .label_style(("sans-serif", 32))
        .axis_desc_style(("sans-serif", 40))
        .draw()
        .map_err(plot_err)?;

    const STEPS: usize = 200;
    let step = (s_max - s_min) / STEPS as f64;
    colorbar
        .draw_series((0..STEPS).map(|i| {
            let lo = s_min + i as f64 * step;
            Rectangle::new(
                [(0.0, lo), (1.0, lo + step)],
                viridis((i as f64 + 0.5) / STEPS as f64).filled(),
            )
        }))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)
}
