//! Daemon configuration: command line, environment and TOML file
//!
//! Explicit flags (or their `SKETCHSYNC_*` variables) win over the file,
//! and the file wins over built-in defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use sketchsync_core::AuthorityConfig;
use sketchsync_protocol::{FrameConfig, DEFAULT_MAX_FRAME_SIZE};
use sketchsync_render::RenderConfig;
use sketchsync_transport::{RateLimitConfig, SessionConfig};

pub const DEFAULT_TCP_PORT: u16 = 7380;
pub const DEFAULT_WS_PORT: u16 = 7381;
pub const DEFAULT_RATE_LIMIT: u32 = 200;

/// Sketchsync Daemon - document authority for collaborative sketch views
#[derive(Parser, Debug, Default)]
#[command(name = "sketchsyncd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TCP port to listen on
    #[arg(long, env = "SKETCHSYNC_TCP_PORT")]
    pub tcp_port: Option<u16>,

    /// WebSocket port to listen on
    #[arg(long, env = "SKETCHSYNC_WS_PORT")]
    pub ws_port: Option<u16>,

    /// Bind address
    #[arg(long, env = "SKETCHSYNC_BIND")]
    pub bind: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "SKETCHSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SKETCHSYNC_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Directory documents are read from and saved to
    #[arg(long, env = "SKETCHSYNC_ROOT")]
    pub root: Option<PathBuf>,

    /// Disable TCP server
    #[arg(long)]
    pub no_tcp: bool,

    /// Disable WebSocket server
    #[arg(long)]
    pub no_ws: bool,

    /// Rate limit: max messages per second per view (0 = disabled)
    #[arg(long, env = "SKETCHSYNC_RATE_LIMIT")]
    pub rate_limit: Option<u32>,

    /// Rate limit burst size (default: 2x rate limit)
    #[arg(long, env = "SKETCHSYNC_RATE_BURST")]
    pub rate_burst: Option<u32>,

    /// Maximum frame size in bytes
    #[arg(long, env = "SKETCHSYNC_MAX_FRAME_SIZE")]
    pub max_frame_size: Option<usize>,

    /// Stroke width in pixels used when materializing
    #[arg(long, env = "SKETCHSYNC_STROKE_WIDTH")]
    pub stroke_width: Option<u32>,

    /// Port for the Prometheus metrics endpoint (disabled when unset)
    #[arg(long, env = "SKETCHSYNC_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

/// Contents of the TOML configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub tcp_port: Option<u16>,
    pub ws_port: Option<u16>,
    pub root: Option<PathBuf>,
    pub log_level: Option<String>,
    pub limits: LimitsSection,
    pub render: RenderSection,
    pub metrics: MetricsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsSection {
    pub rate_limit: Option<u32>,
    pub rate_burst: Option<u32>,
    pub max_frame_size: Option<usize>,
    pub broadcast_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderSection {
    pub stroke_width: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsSection {
    pub port: Option<u16>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Fully resolved daemon settings
#[derive(Debug)]
pub struct Settings {
    pub tcp_addr: Option<SocketAddr>,
    pub ws_addr: Option<SocketAddr>,
    pub metrics_addr: Option<SocketAddr>,
    pub root: PathBuf,
    pub log_level: String,
    pub authority: AuthorityConfig,
    pub render: RenderConfig,
    pub session: SessionConfig,
}

impl Settings {
    pub fn resolve(args: &Args, file: FileConfig) -> Result<Self> {
        let bind = args
            .bind
            .clone()
            .or(file.bind)
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let addr = |port: u16| -> Result<SocketAddr> {
            format!("{}:{}", bind, port)
                .parse()
                .with_context(|| format!("Invalid bind address {}", bind))
        };

        let tcp_addr = if args.no_tcp {
            None
        } else {
            Some(addr(args.tcp_port.or(file.tcp_port).unwrap_or(DEFAULT_TCP_PORT))?)
        };
        let ws_addr = if args.no_ws {
            None
        } else {
            Some(addr(args.ws_port.or(file.ws_port).unwrap_or(DEFAULT_WS_PORT))?)
        };
        let metrics_addr = args.metrics_port.or(file.metrics.port).map(addr).transpose()?;

        let rate = args
            .rate_limit
            .or(file.limits.rate_limit)
            .unwrap_or(DEFAULT_RATE_LIMIT);
        let rate_limit = match args.rate_burst.or(file.limits.rate_burst) {
            _ if rate == 0 => RateLimitConfig::unlimited(),
            Some(burst) => RateLimitConfig::new(rate, burst),
            None => RateLimitConfig::from_rate(rate),
        };

        let mut authority = AuthorityConfig::default();
        if let Some(capacity) = file.limits.broadcast_capacity {
            anyhow::ensure!(capacity > 0, "broadcast_capacity must be positive");
            authority.broadcast_capacity = capacity;
        }

        let stroke_width = args.stroke_width.or(file.render.stroke_width).unwrap_or(1);
        anyhow::ensure!(stroke_width > 0, "stroke width must be positive");

        Ok(Self {
            tcp_addr,
            ws_addr,
            metrics_addr,
            root: args
                .root
                .clone()
                .or(file.root)
                .unwrap_or_else(|| PathBuf::from(".")),
            log_level: args
                .log_level
                .clone()
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
            authority,
            render: RenderConfig { stroke_width },
            session: SessionConfig {
                frames: FrameConfig {
                    max_frame_size: args
                        .max_frame_size
                        .or(file.limits.max_frame_size)
                        .unwrap_or(DEFAULT_MAX_FRAME_SIZE),
                },
                rate_limit,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
bind = "127.0.0.1"
tcp_port = 9000
root = "/srv/sketches"

[limits]
rate_limit = 50
broadcast_capacity = 16

[render]
stroke_width = 3

[metrics]
port = 9100
"#;

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(&Args::default(), FileConfig::default()).unwrap();

        assert_eq!(settings.tcp_addr, Some(SocketAddr::from(([0, 0, 0, 0], DEFAULT_TCP_PORT))));
        assert_eq!(settings.ws_addr, Some(SocketAddr::from(([0, 0, 0, 0], DEFAULT_WS_PORT))));
        assert_eq!(settings.metrics_addr, None);
        assert_eq!(settings.root, PathBuf::from("."));
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.render.stroke_width, 1);
        assert_eq!(settings.session.frames.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(settings.session.rate_limit.messages_per_second, DEFAULT_RATE_LIMIT);
    }

    #[test]
    fn test_file_values_apply() {
        let file = FileConfig::parse(SAMPLE).unwrap();
        let settings = Settings::resolve(&Args::default(), file).unwrap();

        assert_eq!(settings.tcp_addr, Some("127.0.0.1:9000".parse().unwrap()));
        assert_eq!(settings.metrics_addr, Some("127.0.0.1:9100".parse().unwrap()));
        assert_eq!(settings.root, PathBuf::from("/srv/sketches"));
        assert_eq!(settings.authority.broadcast_capacity, 16);
        assert_eq!(settings.render.stroke_width, 3);
        assert_eq!(settings.session.rate_limit.messages_per_second, 50);
        assert_eq!(settings.session.rate_limit.burst_size, 100);
    }

    #[test]
    fn test_flags_override_file() {
        let file = FileConfig::parse(SAMPLE).unwrap();
        let args = Args {
            tcp_port: Some(9500),
            stroke_width: Some(2),
            rate_limit: Some(0),
            no_ws: true,
            ..Args::default()
        };
        let settings = Settings::resolve(&args, file).unwrap();

        assert_eq!(settings.tcp_addr, Some("127.0.0.1:9500".parse().unwrap()));
        assert_eq!(settings.ws_addr, None);
        assert_eq!(settings.render.stroke_width, 2);
        assert!(settings.session.rate_limit.is_unlimited());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(FileConfig::parse("colour = \"red\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.tcp_port, Some(9000));
        assert!(FileConfig::load(Path::new("/nonexistent/sketchsync.toml")).is_err());
    }

    #[test]
    fn test_invalid_bind_address() {
        let args = Args {
            bind: Some("not an address".into()),
            ..Args::default()
        };
        assert!(Settings::resolve(&args, FileConfig::default()).is_err());
    }
}
