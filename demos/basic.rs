//! Basic sketchsync example
//!
//! Embeds an authority in-process and edits one document from two views.
//!
//! Run with: cargo run --example basic

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};

use sketchsync_core::{Authority, DocumentId};
use sketchsync_render::{RasterRenderer, RenderConfig};
use sketchsync_storage::MemoryStorage;
use sketchsync_transport::ViewSession;
use sketchsync_view::Replica;

/// A view wired straight to its host session, no network in between
struct LocalView {
    name: &'static str,
    replica: Replica,
    session: ViewSession,
}

impl LocalView {
    fn new(name: &'static str, authority: &Arc<Authority>, document: DocumentId) -> Self {
        Self {
            name,
            replica: Replica::new(document),
            session: ViewSession::new(name.to_string(), authority.clone()),
        }
    }

    /// Exchange messages until both sides are quiet
    async fn pump(&mut self) {
        loop {
            for msg in self.replica.drain_outgoing() {
                if let Some(reply) = self.session.handle_message(msg).await {
                    self.replica.handle(reply);
                }
            }
            if self.replica.has_outgoing() {
                continue;
            }

            match tokio::time::timeout(Duration::from_millis(50), self.session.next_message()).await {
                Ok(msg) => {
                    if let Some(event) = self.replica.handle(msg) {
                        println!("  [{}] {:?}", self.name, event);
                    }
                }
                Err(_) => break,
            }
        }
    }
}

fn blank_png(width: u32, height: u32) -> Result<Vec<u8>, image::ImageError> {
    let image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image).write_to(&mut out, ImageOutputFormat::Png)?;
    Ok(out.into_inner())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("sketchsync Basic Example\n");

    let id = DocumentId::new("cat.png")?;
    let storage = Arc::new(MemoryStorage::new().with_document(id.clone(), blank_png(32, 32)?));
    let renderer = Arc::new(RasterRenderer::new(RenderConfig { stroke_width: 2 }));
    let authority = Arc::new(Authority::new(storage.clone(), renderer));

    let mut left = LocalView::new("left", &authority, id.clone());
    let mut right = LocalView::new("right", &authority, id.clone());
    left.pump().await;
    right.pump().await;

    println!("=== Left draws a red stroke ===");
    left.replica.begin_stroke("red")?;
    for i in 0..16 {
        left.replica.add_point((i as f64, i as f64))?;
    }
    left.replica.end_stroke()?;
    left.pump().await;
    right.pump().await;
    println!("  right sees {} stroke(s)", right.replica.log().len());

    println!("\n=== Right draws, then undoes ===");
    right.replica.begin_stroke("#0000ff")?;
    right.replica.add_point((31.0, 0.0))?;
    right.replica.add_point((0.0, 31.0))?;
    right.replica.end_stroke()?;
    right.pump().await;
    right.replica.undo()?;
    right.pump().await;
    left.pump().await;
    println!("  left sees {} stroke(s) at revision {}", left.replica.log().len(), left.replica.revision());

    println!("\n=== Save As ===");
    let copy = DocumentId::new("cat-annotated.png")?;
    left.replica.save(Some(copy.clone()))?;
    left.pump().await;
    if let Some(bytes) = storage.get(&copy) {
        println!("  {} holds {} bytes", copy, bytes.len());
    }

    println!("\nDocuments:");
    for meta in authority.list() {
        println!(
            "  - {} (revision {}, {} strokes, {} views, dirty: {})",
            meta.id, meta.revision, meta.log_len, meta.views, meta.dirty
        );
    }

    left.replica.close();
    left.pump().await;
    right.replica.close();
    right.pump().await;
    println!("\nOpen after close: {}", authority.is_open(&id));

    Ok(())
}
