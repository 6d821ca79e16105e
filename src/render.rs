/// PNG rendering of candidate cutouts and spectrum diagnostics
use anyhow::{Context, Result};
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::image_analysis::ScienceImage;
use crate::layout::ensure_dir;
use crate::spectra::{SpectralLine, Spectrum, LINE_SNR_THRESHOLD};
use crate::utils::finite_percentile;

/// Each cutout pixel becomes a SCALE × SCALE block
const CUTOUT_SCALE: u32 = 4;
const MARGIN: u32 = 12;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const RED: Rgb<u8> = Rgb([220, 30, 30]);
const FRAME: Rgb<u8> = Rgb([60, 60, 60]);
const FLUX_LINE: Rgb<u8> = Rgb([31, 119, 180]);
const ERROR_BAND: Rgb<u8> = Rgb([190, 215, 235]);
const SNR_LINE: Rgb<u8> = Rgb([44, 160, 44]);

const PLOT_WIDTH: u32 = 1000;
const PLOT_HEIGHT: u32 = 700;

/// Grey level for `value` on a [lo, hi] stretch; non-finite pixels are black
fn stretch(value: f64, lo: f64, hi: f64) -> Rgb<u8> {
    if !value.is_finite() {
        return BLACK;
    }
    let span = (hi - lo).max(1e-12);
    let level = (((value - lo) / span).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([level, level, level])
}

/// Paint `values` (row-major, `w` × `h`) into the canvas at `(left, top)`,
/// flipping rows so that y increases upwards.
#[allow(clippy::too_many_arguments)]
fn paint_panel(
    canvas: &mut RgbImage,
    values: &[f64],
    w: usize,
    h: usize,
    left: u32,
    top: u32,
    lo: f64,
    hi: f64,
) {
    for cy in 0..h {
        let row = (h - 1 - cy) as u32;
        for cx in 0..w {
            let color = stretch(values[cy * w + cx], lo, hi);
            for dy in 0..CUTOUT_SCALE {
                for dx in 0..CUTOUT_SCALE {
                    canvas.put_pixel(
                        left + cx as u32 * CUTOUT_SCALE + dx,
                        top + row * CUTOUT_SCALE + dy,
                        color,
                    );
                }
            }
        }
    }
}

fn draw_cross(canvas: &mut RgbImage, cx: f32, cy: f32, arm: f32) {
    for offset in [-1.0f32, 0.0, 1.0] {
        draw_line_segment_mut(canvas, (cx - arm, cy + offset), (cx + arm, cy + offset), RED);
        draw_line_segment_mut(canvas, (cx + offset, cy - arm), (cx + offset, cy + arm), RED);
    }
}

/// Render a cutout of `half` pixels around (x, y) as two panels: a linear
/// 5-95 percentile stretch and a log stretch, with a red cross on the source.
pub fn render_cutout(image: &ScienceImage, x: f64, y: f64, half: usize, path: &Path) -> Result<()> {
    let window = image.window_around(x, y, half);
    if window.is_empty() {
        anyhow::bail!("Cutout at ({:.1}, {:.1}) lies outside the image", x, y);
    }
    let (w, h) = (window.width(), window.height());
    let linear = image.extract(&window);

    let min = linear
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::INFINITY, f64::min);
    let log: Vec<f64> = linear.iter().map(|v| (v - min + 1e-10).log10()).collect();

    let panel_w = w as u32 * CUTOUT_SCALE;
    let panel_h = h as u32 * CUTOUT_SCALE;
    let mut canvas: RgbImage =
        ImageBuffer::from_pixel(2 * panel_w + 3 * MARGIN, panel_h + 2 * MARGIN, WHITE);

    let panels = [
        (&linear, MARGIN),
        (&log, 2 * MARGIN + panel_w),
    ];
    // Source position inside the panel, pixel centres at +0.5
    let sx = ((x - window.x0 as f64 + 0.5) * CUTOUT_SCALE as f64) as f32;
    let sy = ((h as f64 - (y - window.y0 as f64 + 0.5)) * CUTOUT_SCALE as f64) as f32;

    for (values, left) in panels {
        let lo = finite_percentile(values, 5.0);
        let hi = finite_percentile(values, 95.0);
        paint_panel(&mut canvas, values, w, h, left, MARGIN, lo, hi);
        draw_hollow_rect_mut(
            &mut canvas,
            Rect::at(left as i32 - 1, MARGIN as i32 - 1).of_size(panel_w + 2, panel_h + 2),
            FRAME,
        );
        draw_cross(
            &mut canvas,
            left as f32 + sx,
            MARGIN as f32 + sy,
            (2 * CUTOUT_SCALE) as f32,
        );
    }

    ensure_dir(path)?;
    canvas
        .save(path)
        .with_context(|| format!("Failed to save cutout: {}", path.display()))?;
    Ok(())
}

/// Data-to-pixel mapping for one plot panel
struct PlotArea {
    left: f32,
    top: f32,
    width: f32,
    height: f32,
    x_range: (f64, f64),
    y_range: (f64, f64),
}

impl PlotArea {
    fn new(
        left: u32,
        top: u32,
        width: u32,
        height: u32,
        x_range: (f64, f64),
        y_range: (f64, f64),
    ) -> Self {
        let widen = |(lo, hi): (f64, f64)| {
            if hi > lo {
                (lo, hi)
            } else {
                (lo - 0.5, hi + 0.5)
            }
        };
        Self {
            left: left as f32,
            top: top as f32,
            width: width as f32,
            height: height as f32,
            x_range: widen(x_range),
            y_range: widen(y_range),
        }
    }

    fn map(&self, x: f64, y: f64) -> (f32, f32) {
        let fx = (x - self.x_range.0) / (self.x_range.1 - self.x_range.0);
        let fy = (y - self.y_range.0) / (self.y_range.1 - self.y_range.0);
        (
            self.left + (fx.clamp(0.0, 1.0) as f32) * self.width,
            self.top + (1.0 - fy.clamp(0.0, 1.0) as f32) * self.height,
        )
    }

    fn frame(&self, canvas: &mut RgbImage) {
        draw_hollow_rect_mut(
            canvas,
            Rect::at(self.left as i32, self.top as i32)
                .of_size(self.width as u32 + 1, self.height as u32 + 1),
            FRAME,
        );
    }

    fn polyline(&self, canvas: &mut RgbImage, xs: &[f64], ys: &[f64], color: Rgb<u8>) {
        let points: Vec<(f32, f32)> = xs
            .iter()
            .zip(ys)
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .map(|(&x, &y)| self.map(x, y))
            .collect();
        for pair in points.windows(2) {
            draw_line_segment_mut(canvas, pair[0], pair[1], color);
        }
    }

    fn dashed(&self, canvas: &mut RgbImage, start: (f32, f32), end: (f32, f32), color: Rgb<u8>) {
        let (dx, dy) = (end.0 - start.0, end.1 - start.1);
        let length = (dx * dx + dy * dy).sqrt();
        if length <= 0.0 {
            return;
        }
        let (ux, uy) = (dx / length, dy / length);
        let mut t = 0.0;
        while t < length {
            let stop = (t + 6.0).min(length);
            draw_line_segment_mut(
                canvas,
                (start.0 + ux * t, start.1 + uy * t),
                (start.0 + ux * stop, start.1 + uy * stop),
                color,
            );
            t += 10.0;
        }
    }
}

fn finite_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Render the spectrum with its error band and detected lines (top) and the
/// SNR spectrum with the detection threshold (bottom).
pub fn render_spectrum(
    spectrum: &Spectrum,
    snr: &[f64],
    lines: &[SpectralLine],
    path: &Path,
) -> Result<()> {
    if spectrum.is_empty() {
        anyhow::bail!("Cannot plot an empty spectrum");
    }
    let mut canvas: RgbImage = ImageBuffer::from_pixel(PLOT_WIDTH, PLOT_HEIGHT, WHITE);
    let x_range = spectrum.wavelength_bounds();

    let flux_range = finite_range(
        spectrum
            .flux
            .iter()
            .zip(&spectrum.error)
            .flat_map(|(f, e)| [f - e, f + e]),
    );
    let top = PlotArea::new(60, 30, 900, 370, x_range, flux_range);

    for ((&w, &f), &e) in spectrum.wavelength.iter().zip(&spectrum.flux).zip(&spectrum.error) {
        draw_line_segment_mut(&mut canvas, top.map(w, f - e), top.map(w, f + e), ERROR_BAND);
    }
    top.polyline(&mut canvas, &spectrum.wavelength, &spectrum.flux, FLUX_LINE);
    for line in lines {
        let upper = top.map(line.wavelength, top.y_range.1);
        let lower = top.map(line.wavelength, top.y_range.0);
        top.dashed(&mut canvas, upper, lower, RED);
    }
    top.frame(&mut canvas);

    // Keep zero and the threshold visible in the SNR panel
    let (lo, hi) = finite_range(snr.iter().copied());
    let snr_range = (lo.min(0.0), hi.max(LINE_SNR_THRESHOLD + 1.0));
    let bottom = PlotArea::new(60, 450, 900, 220, x_range, snr_range);
    bottom.polyline(&mut canvas, &spectrum.wavelength, snr, SNR_LINE);
    bottom.dashed(
        &mut canvas,
        bottom.map(x_range.0, LINE_SNR_THRESHOLD),
        bottom.map(x_range.1, LINE_SNR_THRESHOLD),
        RED,
    );
    bottom.frame(&mut canvas);

    ensure_dir(path)?;
    canvas
        .save(path)
        .with_context(|| format!("Failed to save spectrum plot: {}", path.display()))?;
    Ok(())
}
