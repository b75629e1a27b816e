//! Sketchsync Render - folds a stroke log over raster content
//!
//! The initial content is decoded as an image, every stroke is drawn on top
//! of it in log order, and the result is encoded as PNG. Rendering runs on
//! the blocking pool.

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageOutputFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use sketchsync_core::{LogSnapshot, Renderer, Stroke};
use std::io::Cursor;
use std::time::Instant;
use tracing::debug;

/// Rendering configuration
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Stroke width in pixels
    pub stroke_width: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { stroke_width: 1 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid color: {0}")]
    InvalidColor(String),

    #[error("Rendering failed: {0}")]
    RenderFailed(String),
}

impl From<RenderError> for sketchsync_core::Error {
    fn from(e: RenderError) -> Self {
        sketchsync_core::Error::Render(e.to_string())
    }
}

/// Renderer for image documents
#[derive(Debug, Clone, Default)]
pub struct RasterRenderer {
    config: RenderConfig,
}

impl RasterRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render synchronously.
    ///
    /// An empty log returns the initial content unchanged, without
    /// re-encoding it.
    pub fn render_blocking(&self, initial_content: &[u8], log: &[Stroke]) -> Result<Vec<u8>, RenderError> {
        if log.is_empty() {
            return Ok(initial_content.to_vec());
        }

        let mut canvas = image::load_from_memory(initial_content)?.to_rgba8();

        for stroke in log {
            let color = parse_color(stroke.color())?;
            draw_stroke(&mut canvas, stroke, color, self.config.stroke_width);
        }

        let mut output = Vec::new();
        canvas.write_to(&mut Cursor::new(&mut output), ImageOutputFormat::Png)?;
        Ok(output)
    }
}

#[async_trait]
impl Renderer for RasterRenderer {
    async fn render(&self, initial_content: Bytes, log: LogSnapshot) -> sketchsync_core::Result<Bytes> {
        let renderer = self.clone();
        let strokes = log.len();

        let started = Instant::now();
        let output = tokio::task::spawn_blocking(move || renderer.render_blocking(&initial_content, &log))
            .await
            .map_err(|e| RenderError::RenderFailed(e.to_string()))??;

        debug!(
            strokes = strokes,
            bytes = output.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rendered document"
        );
        Ok(Bytes::from(output))
    }
}

/// Parse a stroke color with the same grammar the edit log validates against
pub fn parse_color(color: &str) -> Result<Rgba<u8>, RenderError> {
    sketchsync_core::parse_color(color)
        .map(Rgba)
        .map_err(|_| RenderError::InvalidColor(color.trim().to_string()))
}

/// Draw one stroke as a polyline
fn draw_stroke(canvas: &mut RgbaImage, stroke: &Stroke, color: Rgba<u8>, width: u32) {
    let points: Vec<(f64, f64)> = stroke.points().iter().map(|p| (p.x(), p.y())).collect();

    if let [only] = points.as_slice() {
        if clip_segment(canvas, *only, *only, width).is_some() {
            dab(canvas, (only.0 as f32, only.1 as f32), color, width);
        }
        return;
    }

    for segment in points.windows(2) {
        let Some((start, end)) = clip_segment(canvas, segment[0], segment[1], width) else {
            continue;
        };
        if width <= 1 {
            draw_line_segment_mut(canvas, start, end, color);
            continue;
        }

        // Wide strokes are stamped with a round brush along the segment
        let length = (end.0 - start.0).hypot(end.1 - start.1);
        let steps = length.ceil().max(1.0) as u32;
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            let at = (start.0 + (end.0 - start.0) * t, start.1 + (end.1 - start.1) * t);
            dab(canvas, at, color, width);
        }
    }
}

/// Clip a segment to the canvas grown by the brush radius.
///
/// Work along a segment is proportional to its length, so segments are cut
/// down to the part that can touch a pixel before drawing. Returns `None`
/// when nothing of the segment is visible.
fn clip_segment(
    canvas: &RgbaImage,
    start: (f64, f64),
    end: (f64, f64),
    width: u32,
) -> Option<((f32, f32), (f32, f32))> {
    let margin = f64::from(width / 2 + 1);
    let (min_x, min_y) = (-margin, -margin);
    let max_x = f64::from(canvas.width()) - 1.0 + margin;
    let max_y = f64::from(canvas.height()) - 1.0 + margin;

    // Liang-Barsky
    let (dx, dy) = (end.0 - start.0, end.1 - start.1);
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    for (p, q) in [
        (-dx, start.0 - min_x),
        (dx, max_x - start.0),
        (-dy, start.1 - min_y),
        (dy, max_y - start.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }

    let at = |t: f64| ((start.0 + dx * t) as f32, (start.1 + dy * t) as f32);
    Some((at(t0), at(t1)))
}

fn dab(canvas: &mut RgbaImage, (x, y): (f32, f32), color: Rgba<u8>, width: u32) {
    if width <= 1 {
        let (px, py) = (x.round(), y.round());
        if px >= 0.0 && py >= 0.0 && (px as u32) < canvas.width() && (py as u32) < canvas.height() {
            canvas.put_pixel(px as u32, py as u32, color);
        }
        return;
    }

    let radius = (width / 2).max(1) as i32;
    draw_filled_circle_mut(canvas, (x.round() as i32, y.round() as i32), radius, color);
}
