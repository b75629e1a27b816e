//! Sketchsync Transport Layer
//!
//! Carries the view protocol between views and the document authority:
//! - TCP: newline-delimited JSON frames
//! - WebSocket: one JSON message per frame, for browser views
//! - Metrics: Prometheus metrics (optional feature)

pub mod session;
pub mod tcp;
#[cfg(feature = "websocket")]
pub mod websocket;
pub mod rate_limit;
#[cfg(feature = "metrics")]
pub mod metrics;

pub use session::{SessionConfig, ViewSession};
pub use tcp::TcpServer;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketServer;
pub use rate_limit::{RateLimiter, RateLimitConfig};
#[cfg(feature = "metrics")]
pub use metrics::{Metrics, MetricsServer};
