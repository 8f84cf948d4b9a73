//! Diagnostic PNG renderers (plotters bitmap backend)

use crate::error::{ElementError, Result};
use crate::midi::Instrument;
use ndarray::Array2;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;

/// Columns/rows drawn per heatmap before decimation kicks in
const MAX_HEATMAP_COLS: usize = 400;
const MAX_HEATMAP_ROWS: usize = 256;
/// Points drawn per waveform line
const MAX_WAVEFORM_POINTS: usize = 4000;

const PITCH_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Base colour of a strength grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridTint {
    Red,
    Blue,
}

fn plot_err<E: std::fmt::Debug>(what: &'static str) -> impl FnOnce(E) -> ElementError {
    move |e| ElementError::Render(format!("Failed to {}: {:?}", what, e))
}

/// Min/max envelope of a signal as (time, amplitude) points
fn waveform_points(y: &[f32], sample_rate: u32) -> Vec<(f32, f32)> {
    if y.is_empty() || sample_rate == 0 {
        return Vec::new();
    }
    let bucket = (y.len() * 2).div_ceil(MAX_WAVEFORM_POINTS).max(1);
    let mut points = Vec::with_capacity(2 * y.len() / bucket + 2);
    for (i, chunk) in y.chunks(bucket).enumerate() {
        let t = (i * bucket) as f32 / sample_rate as f32;
        let lo = chunk.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = chunk.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        points.push((t, lo));
        points.push((t, hi));
    }
    points
}

fn duration_of(y: &[f32], sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        return 1e-3;
    }
    (y.len() as f32 / sample_rate as f32).max(1e-3)
}

/// Black-blue-red-yellow-white ramp for values in [0, 1]
fn heat_color(v: f32) -> RGBColor {
    const STOPS: [(f32, (u8, u8, u8)); 5] = [
        (0.0, (0, 0, 4)),
        (0.25, (59, 15, 112)),
        (0.5, (183, 55, 121)),
        (0.75, (252, 137, 97)),
        (1.0, (252, 253, 191)),
    ];
    let v = v.clamp(0.0, 1.0);
    for pair in STOPS.windows(2) {
        let ((a, ca), (b, cb)) = (pair[0], pair[1]);
        if v <= b {
            let f = (v - a) / (b - a);
            let mix = |x: u8, y: u8| (x as f32 + (y as f32 - x as f32) * f) as u8;
            return RGBColor(mix(ca.0, cb.0), mix(ca.1, cb.1), mix(ca.2, cb.2));
        }
    }
    RGBColor(252, 253, 191)
}

fn draw_waveform_panel(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    y: &[f32],
    sample_rate: u32,
    caption: &str,
    onset_times: &[f64],
) -> Result<()> {
    let duration = duration_of(y, sample_rate);
    let peak = y.iter().fold(0.0f32, |m, &x| m.max(x.abs())).max(1e-3);

    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(0f32..duration, -peak..peak)
        .map_err(plot_err("build chart"))?;

    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_desc("Amplitude")
        .draw()
        .map_err(plot_err("draw mesh"))?;

    chart
        .draw_series(LineSeries::new(waveform_points(y, sample_rate), &BLUE))
        .map_err(plot_err("draw waveform"))?;

    chart
        .draw_series(onset_times.iter().map(|&t| {
            PathElement::new(vec![(t as f32, -peak), (t as f32, peak)], RED.mix(0.7).stroke_width(1))
        }))
        .map_err(plot_err("draw onset markers"))?;

    Ok(())
}

/// Amplitude over time
pub fn waveform(path: &Path, y: &[f32], sample_rate: u32, title: &str, size: (u32, u32)) -> Result<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err("fill background"))?;
    draw_waveform_panel(&root, y, sample_rate, title, &[])?;
    root.present().map_err(plot_err("present plot"))?;
    Ok(())
}

/// dB heatmap; rows of `db` span `y_range` evenly, columns span `duration`
pub fn spectrogram(
    path: &Path,
    db: &Array2<f32>,
    duration: f32,
    y_range: (f32, f32),
    y_desc: &str,
    title: &str,
    size: (u32, u32),
) -> Result<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err("fill background"))?;

    let (n_rows, n_cols) = (db.shape()[0], db.shape()[1]);
    let duration = duration.max(1e-3);

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f32..duration, y_range.0..y_range.1)
        .map_err(plot_err("build chart"))?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Time (s)")
        .y_desc(y_desc)
        .draw()
        .map_err(plot_err("draw mesh"))?;

    if n_rows == 0 || n_cols == 0 {
        root.present().map_err(plot_err("present plot"))?;
        return Ok(());
    }

    let col_step = n_cols.div_ceil(MAX_HEATMAP_COLS).max(1);
    let row_step = n_rows.div_ceil(MAX_HEATMAP_ROWS).max(1);
    let col_width = duration / n_cols as f32;
    let row_height = (y_range.1 - y_range.0) / n_rows as f32;

    let mut cells = Vec::new();
    for col in (0..n_cols).step_by(col_step) {
        for row in (0..n_rows).step_by(row_step) {
            let col_end = (col + col_step).min(n_cols);
            let row_end = (row + row_step).min(n_rows);
            let value = db
                .slice(ndarray::s![row..row_end, col..col_end])
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max);
            // dB values lie in [-80, 0]
            let intensity = (value + 80.0) / 80.0;
            cells.push(Rectangle::new(
                [
                    (col as f32 * col_width, y_range.0 + row as f32 * row_height),
                    (col_end as f32 * col_width, y_range.0 + row_end as f32 * row_height),
                ],
                heat_color(intensity).filled(),
            ));
        }
    }
    chart.draw_series(cells).map_err(plot_err("draw heatmap"))?;

    root.present().map_err(plot_err("present plot"))?;
    Ok(())
}

/// Waveform with onset markers above the onset strength curve
#[allow(clippy::too_many_arguments)]
pub fn break_analysis(
    path: &Path,
    y: &[f32],
    sample_rate: u32,
    onset_times: &[f64],
    onset_envelope: &[f32],
    hop_length: usize,
    title: &str,
    size: (u32, u32),
) -> Result<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err("fill background"))?;
    let panels = root.split_evenly((2, 1));

    draw_waveform_panel(&panels[0], y, sample_rate, title, onset_times)?;

    let frame_sec = if sample_rate > 0 {
        hop_length as f32 / sample_rate as f32
    } else {
        0.0
    };
    let x_max = (onset_envelope.len() as f32 * frame_sec).max(1e-3);
    let y_max = onset_envelope.iter().copied().fold(0.0f32, f32::max).max(1e-6);

    let mut chart = ChartBuilder::on(&panels[1])
        .caption("Onset Strength", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(0f32..x_max, 0f32..y_max)
        .map_err(plot_err("build chart"))?;

    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .draw()
        .map_err(plot_err("draw mesh"))?;

    chart
        .draw_series(LineSeries::new(
            onset_envelope
                .iter()
                .enumerate()
                .map(|(i, &v)| (i as f32 * frame_sec, v)),
            &BLUE,
        ))
        .map_err(plot_err("draw onset strength"))?;

    root.present().map_err(plot_err("present plot"))?;
    Ok(())
}

/// Row of cells shaded by value in [0, 1]; cells above 0.5 are numbered
pub fn strength_grid(path: &Path, values: &[f64], tint: GridTint, title: &str, size: (u32, u32)) -> Result<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err("fill background"))?;

    let n = values.len().max(1) as f32;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(30)
        .build_cartesian_2d(0f32..n, 0f32..1f32)
        .map_err(plot_err("build chart"))?;

    chart
        .configure_mesh()
        .disable_mesh()
        .disable_y_axis()
        .x_labels(values.len().max(1))
        .x_label_formatter(&|x| format!("{}", x.floor() as usize + 1))
        .draw()
        .map_err(plot_err("draw mesh"))?;

    chart
        .draw_series(values.iter().enumerate().map(|(i, &v)| {
            let fade = (255.0 * (1.0 - v.clamp(0.0, 1.0))) as u8;
            let color = match tint {
                GridTint::Red => RGBColor(255, fade, fade),
                GridTint::Blue => RGBColor(fade, fade, 255),
            };
            Rectangle::new([(i as f32, 0.0), (i as f32 + 0.9, 1.0)], color.mix(0.8).filled())
        }))
        .map_err(plot_err("draw cells"))?;

    chart
        .draw_series(values.iter().enumerate().filter(|&(_, &v)| v > 0.5).map(|(i, _)| {
            Text::new(
                format!("{}", i + 1),
                (i as f32 + 0.35, 0.55),
                ("sans-serif", 16).into_font().color(&BLACK),
            )
        }))
        .map_err(plot_err("draw labels"))?;

    root.present().map_err(plot_err("present plot"))?;
    Ok(())
}

/// Waveform above its smoothed, normalized amplitude envelope
pub fn bass_envelope(
    path: &Path,
    y: &[f32],
    envelope: &[f32],
    sample_rate: u32,
    title: &str,
    size: (u32, u32),
) -> Result<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err("fill background"))?;
    let panels = root.split_evenly((2, 1));

    draw_waveform_panel(&panels[0], y, sample_rate, title, &[])?;

    let duration = duration_of(envelope, sample_rate);
    let mut chart = ChartBuilder::on(&panels[1])
        .caption("Amplitude Envelope", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(0f32..duration, 0f32..1.05f32)
        .map_err(plot_err("build chart"))?;

    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .draw()
        .map_err(plot_err("draw mesh"))?;

    chart
        .draw_series(LineSeries::new(waveform_points(envelope, sample_rate), &GREEN))
        .map_err(plot_err("draw envelope"))?;

    root.present().map_err(plot_err("present plot"))?;
    Ok(())
}

/// Per-frame pitch; frames without a pitch break the line
pub fn pitch_contour(
    path: &Path,
    contour: &[Option<f32>],
    times: &[f32],
    range: (f32, f32),
    title: &str,
    size: (u32, u32),
) -> Result<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err("fill background"))?;

    let x_max = times.last().copied().unwrap_or(0.0).max(1e-3);
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f32..x_max, range.0..range.1)
        .map_err(plot_err("build chart"))?;

    chart
        .configure_mesh()
        .x_desc("Time (s)")
        .y_desc("Frequency (Hz)")
        .draw()
        .map_err(plot_err("draw mesh"))?;

    let mut runs: Vec<Vec<(f32, f32)>> = vec![Vec::new()];
    for (&t, pitch) in times.iter().zip(contour) {
        match pitch {
            Some(hz) => {
                if let Some(run) = runs.last_mut() {
                    run.push((t, hz.clamp(range.0, range.1)));
                }
            }
            None => {
                if runs.last().map_or(false, |run| !run.is_empty()) {
                    runs.push(Vec::new());
                }
            }
        }
    }

    chart
        .draw_series(
            runs.into_iter()
                .filter(|run| !run.is_empty())
                .map(|run| PathElement::new(run, &MAGENTA)),
        )
        .map_err(plot_err("draw contour"))?;

    root.present().map_err(plot_err("present plot"))?;
    Ok(())
}

/// One note-rectangle panel per instrument
pub fn piano_roll(path: &Path, instruments: &[&Instrument], duration: f64, title: &str, size: (u32, u32)) -> Result<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err("fill background"))?;

    let (header, body) = root.split_vertically(40);
    header
        .titled(title, ("sans-serif", 22))
        .map_err(plot_err("draw title"))?;

    let panels = body.split_evenly((instruments.len().max(1), 1));
    let x_max = duration.max(1e-3);

    for (i, (instrument, panel)) in instruments.iter().zip(panels.iter()).enumerate() {
        let label = if instrument.name.is_empty() {
            "Unnamed"
        } else {
            instrument.name.as_str()
        };
        let mut chart = ChartBuilder::on(panel)
            .caption(format!("Instrument {}: {}", i + 1, label), ("sans-serif", 16))
            .margin(5)
            .x_label_area_size(25)
            .y_label_area_size(40)
            .build_cartesian_2d(0f64..x_max, 0f64..128f64)
            .map_err(plot_err("build chart"))?;

        chart
            .configure_mesh()
            .y_desc("Pitch")
            .draw()
            .map_err(plot_err("draw mesh"))?;

        chart
            .draw_series(instrument.notes.iter().map(|note| {
                let shade = note.velocity as f64 / 127.0;
                Rectangle::new(
                    [(note.start, note.pitch as f64), (note.end, note.pitch as f64 + 1.0)],
                    BLUE.mix(0.3 + 0.7 * shade).filled(),
                )
            }))
            .map_err(plot_err("draw notes"))?;
    }

    root.present().map_err(plot_err("present plot"))?;
    Ok(())
}

/// Bar chart of pitch-class counts
pub fn pitch_histogram(path: &Path, counts: &[u32; 12], title: &str, size: (u32, u32)) -> Result<()> {
    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err("fill background"))?;

    let y_max = counts.iter().copied().max().unwrap_or(0).max(1) as f32 * 1.1;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(0f32..12f32, 0f32..y_max)
        .map_err(plot_err("build chart"))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(12)
        .x_label_formatter(&|x| {
            PITCH_NAMES
                .get(x.floor() as usize)
                .map(|name| name.to_string())
                .unwrap_or_default()
        })
        .y_desc("Count")
        .draw()
        .map_err(plot_err("draw mesh"))?;

    chart
        .draw_series(counts.iter().enumerate().map(|(i, &count)| {
            Rectangle::new(
                [(i as f32 + 0.1, 0.0), (i as f32 + 0.9, count as f32)],
                RGBColor(70, 130, 180).filled(),
            )
        }))
        .map_err(plot_err("draw bars"))?;

    root.present().map_err(plot_err("present plot"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_points_are_bounded() {
        let y: Vec<f32> = (0..100_000).map(|i| ((i % 100) as f32 / 50.0) - 1.0).collect();
        let points = waveform_points(&y, 22050);
        assert!(points.len() <= MAX_WAVEFORM_POINTS + 2);
        assert!(points.iter().all(|&(_, v)| (-1.0..=1.0).contains(&v)));
        assert!(waveform_points(&[], 22050).is_empty());
    }

    #[test]
    fn test_heat_color_endpoints() {
        assert_eq!(heat_color(-1.0), RGBColor(0, 0, 4));
        assert_eq!(heat_color(2.0), RGBColor(252, 253, 191));
    }
}
