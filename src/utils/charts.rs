//! SVG Chart Generator for Training Curves
//!
//! Renders the per-epoch loss and ROC-AUC histories as standalone SVG line
//! charts, one train series and one validation series per chart.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::training::EpochMetrics;

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

const COLOR_TRAIN: &str = "#3498db";
const COLOR_VALID: &str = "#e74c3c";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// A data point for a line chart
#[derive(Debug, Clone, Copy)]
pub struct DataPoint {
    pub x: f64,
    pub y: f64,
}

/// A named, colored data series
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<DataPoint>,
    pub color: String,
}

impl DataSeries {
    /// Series indexed by 1-based epoch
    pub fn per_epoch(name: &str, values: impl IntoIterator<Item = f64>, color: &str) -> Self {
        Self {
            name: name.to_string(),
            points: values
                .into_iter()
                .enumerate()
                .map(|(i, y)| DataPoint {
                    x: (i + 1) as f64,
                    y,
                })
                .collect(),
            color: color.to_string(),
        }
    }
}

/// Render `loss.svg` and `auc.svg` for a run history into `output_dir`
pub fn render_history_charts(history: &[EpochMetrics], output_dir: &Path) -> std::io::Result<()> {
    let loss = [
        DataSeries::per_epoch("Train", history.iter().map(|m| m.train_loss), COLOR_TRAIN),
        DataSeries::per_epoch("Dev", history.iter().map(|m| m.val_loss), COLOR_VALID),
    ];
    generate_line_chart(
        "Training and Validation losses",
        "Epoch",
        "BCE loss",
        &loss,
        &output_dir.join("loss.svg"),
    )?;

    let auc = [
        DataSeries::per_epoch("Train", history.iter().map(|m| m.train_auc), COLOR_TRAIN),
        DataSeries::per_epoch("Dev", history.iter().map(|m| m.val_auc), COLOR_VALID),
    ];
    generate_line_chart(
        "Training and Validation ROC AUC",
        "Epoch",
        "ROC AUC",
        &auc,
        &output_dir.join("auc.svg"),
    )
}

/// Generate a line chart SVG
pub fn generate_line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    series: &[DataSeries],
    output_path: &Path,
) -> std::io::Result<()> {
    fs::write(output_path, line_chart_svg(title, x_label, y_label, series))
}

fn line_chart_svg(title: &str, x_label: &str, y_label: &str, series: &[DataSeries]) -> String {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let (x_min, x_max, y_min, y_max) = padded_ranges(series);
    let project = |p: &DataPoint| {
        (
            MARGIN_LEFT + ((p.x - x_min) / (x_max - x_min)) * plot_width,
            MARGIN_TOP + plot_height - ((p.y - y_min) / (y_max - y_min)) * plot_height,
        )
    };

    let mut svg = String::new();

    // write! into a String cannot fail
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#,
        w = CHART_WIDTH,
        h = CHART_HEIGHT
    );
    let _ = write!(
        svg,
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        CHART_WIDTH, CHART_HEIGHT
    );
    let _ = write!(
        svg,
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        CHART_WIDTH / 2.0,
        COLOR_TEXT,
        escape_xml(title)
    );

    for i in 0..=5 {
        let y = MARGIN_TOP + plot_height - (i as f64 / 5.0) * plot_height;
        let value = y_min + (i as f64 / 5.0) * (y_max - y_min);

        let _ = write!(
            svg,
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT,
            y,
            MARGIN_LEFT + plot_width,
            y,
            COLOR_GRID
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{:.3}</text>"#,
            MARGIN_LEFT - 10.0,
            y + 4.0,
            COLOR_TEXT,
            value
        );
    }

    // Axes
    let _ = write!(
        svg,
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT,
        MARGIN_TOP + plot_height,
        MARGIN_LEFT + plot_width,
        MARGIN_TOP + plot_height,
        COLOR_AXIS
    );
    let _ = write!(
        svg,
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT,
        MARGIN_TOP,
        MARGIN_LEFT,
        MARGIN_TOP + plot_height,
        COLOR_AXIS
    );
    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0,
        CHART_HEIGHT - 20.0,
        COLOR_TEXT,
        escape_xml(x_label)
    );
    let _ = write!(
        svg,
        r#"<text x="20" y="{c}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {c})">{}</text>"#,
        COLOR_TEXT,
        escape_xml(y_label),
        c = CHART_HEIGHT / 2.0
    );

    for s in series.iter().filter(|s| !s.points.is_empty()) {
        let path: Vec<String> = s
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let (x, y) = project(p);
                format!("{} {} {}", if i == 0 { "M" } else { "L" }, x, y)
            })
            .collect();
        let _ = write!(
            svg,
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
            path.join(" "),
            s.color
        );

        for p in &s.points {
            let (x, y) = project(p);
            let _ = write!(
                svg,
                r#"<circle cx="{}" cy="{}" r="4" fill="{}" stroke="white" stroke-width="2"/>"#,
                x, y, s.color
            );
        }
    }

    // X tick labels come from the first series
    if let Some(first) = series.first() {
        for p in &first.points {
            let (x, _) = project(p);
            let _ = write!(
                svg,
                r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{:.0}</text>"#,
                x,
                MARGIN_TOP + plot_height + 20.0,
                COLOR_TEXT,
                p.x
            );
        }
    }

    let mut legend_y = MARGIN_TOP + 10.0;
    for s in series {
        let _ = write!(
            svg,
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            CHART_WIDTH - MARGIN_RIGHT - 100.0,
            legend_y,
            s.color
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            CHART_WIDTH - MARGIN_RIGHT - 80.0,
            legend_y + 12.0,
            COLOR_TEXT,
            escape_xml(&s.name)
        );
        legend_y += 25.0;
    }

    svg.push_str("</svg>");
    svg
}

/// Data ranges, widened so that single points and flat series still map onto the plot
fn padded_ranges(series: &[DataSeries]) -> (f64, f64, f64, f64) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;

    for p in series.iter().flat_map(|s| s.points.iter()) {
        if !p.y.is_finite() {
            continue;
        }
        x_min = x_min.min(p.x);
        x_max = x_max.max(p.x);
        y_min = y_min.min(p.y);
        y_max = y_max.max(p.y);
    }

    if !x_min.is_finite() {
        return (0.0, 1.0, 0.0, 1.0);
    }
    if x_max - x_min < f64::EPSILON {
        x_min -= 0.5;
        x_max += 0.5;
    }
    if y_max - y_min < f64::EPSILON {
        y_min -= 0.5;
        y_max += 0.5;
    }

    (x_min, x_max, y_min, y_max)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
