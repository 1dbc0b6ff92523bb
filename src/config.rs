use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use frame_bus::PipelineConfig;

/// Selects the synthetic colour bar source instead of a V4L2 node.
pub const PATTERN_DEVICE: &str = "pattern";

#[derive(Parser, Debug, Clone)]
#[command(name = "lite-cam")]
#[command(about = "Webcam MJPEG streaming server", long_about = None)]
pub struct AppConfig {
    /// Capture device path, or "pattern" for generated colour bars
    #[arg(long, env = "LITE_CAM_VIDEO", default_value = "/dev/video0")]
    pub video: String,

    /// Requested frame width
    #[arg(long, default_value_t = 1024)]
    pub width: u32,

    /// Requested frame height
    #[arg(long, default_value_t = 768)]
    pub height: u32,

    /// Seconds to wait for a frame before logging a timeout
    #[arg(long, default_value_t = 5)]
    pub frame_timeout: u64,

    /// HTTP listen port
    #[arg(long, env = "LITE_CAM_PORT", default_value_t = 4443)]
    pub port: u16,

    /// HTTP listen address
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// File listing the e-mail addresses allowed to watch
    #[arg(long, env = "LITE_CAM_ACCOUNTS", default_value = "accounts")]
    pub accounts: PathBuf,

    /// Disable authentication (use with caution)
    #[arg(long)]
    pub insecure: bool,

    /// Do not draw the time into the images
    #[arg(long)]
    pub no_timestamp: bool,

    /// Viewers served per broadcast cycle
    #[arg(long, default_value_t = 50)]
    pub max_viewers: usize,

    /// Google OAuth client id, the expected token audience
    #[arg(long, env = "OAUTH_CLIENT_ID", hide_env_values = true)]
    pub oauth_client_id: Option<String>,
}

impl AppConfig {
    /// Parses the command line and environment, then validates the result.
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("invalid frame size {}x{}", self.width, self.height);
        }
        if self.frame_timeout == 0 {
            bail!("--frame-timeout must be at least one second");
        }
        if self.max_viewers == 0 {
            bail!("--max-viewers must be at least 1");
        }
        if !self.insecure {
            if self.client_id().is_none() {
                bail!("OAuth client ID should be specified via OAUTH_CLIENT_ID environment variable");
            }
            if self.accounts.as_os_str().is_empty() {
                bail!("accounts file should be specified via --accounts");
            }
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn client_id(&self) -> Option<&str> {
        self.oauth_client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.bind, self.port);
        addr.parse()
            .with_context(|| format!("invalid listen address {}", addr))
    }

    pub fn is_pattern(&self) -> bool {
        self.video == PATTERN_DEVICE
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_size(self.width, self.height)
            .with_frame_timeout(Duration::from_secs(self.frame_timeout))
            .with_fanout(self.max_viewers)
            .with_timestamp(!self.no_timestamp)
    }
}
