//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Default listening port
pub const DEFAULT_PORT: u16 = 8000;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// The request head must arrive within this time
    pub request_timeout: Duration,

    /// Largest accepted request head in bytes (at least 8KB)
    pub max_request_size: usize,

    /// Drop a viewer that cannot take one part within this time (None = wait forever)
    pub write_timeout: Option<Duration>,

    /// Per-viewer buffer between the stream handler and the response body
    pub write_buffer_size: usize,

    /// Camera frame width, shown in logs
    pub frame_width: u32,

    /// Camera frame height, shown in logs
    pub frame_height: u32,

    /// Rotation applied by the landing page, in degrees
    pub rotation: u16,

    /// Landing page title
    pub page_title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            tcp_nodelay: true,  // Important for low latency
            request_timeout: Duration::from_secs(10),
            max_request_size: 8 * 1024, // 8KB
            write_timeout: Some(Duration::from_secs(10)),
            write_buffer_size: 64 * 1024, // 64KB
            frame_width: 1280,
            frame_height: 720,
            rotation: 90,
            page_title: "Dashcam Stream".to_string(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the listening port, keeping the bind IP
    pub fn port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set write timeout
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set frame dimensions
    pub fn frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_width = width;
        self.frame_height = height;
        self
    }

    /// Set page rotation, wrapped into 0..360
    pub fn rotation(mut self, degrees: u16) -> Self {
        self.rotation = degrees % 360;
        self
    }

    /// Set page title
    pub fn page_title(mut self, title: impl Into<String>) -> Self {
        self.page_title = title.into();
        self
    }

    /// Apply a shell-style `KEY=VALUE` configuration file
    ///
    /// Recognized keys: `STREAMING_PORT`, `CAMERA_WIDTH`, `CAMERA_HEIGHT`,
    /// `CAMERA_ROTATION`. Blank lines, `#` comments and unknown keys are
    /// skipped; values may be quoted.
    pub fn apply_conf_str(mut self, text: &str) -> Result<Self> {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');

            match key {
                "STREAMING_PORT" => {
                    let port = parse_number::<u16>(key, value)?;
                    self = self.port(port);
                }
                "CAMERA_WIDTH" => self.frame_width = parse_number(key, value)?,
                "CAMERA_HEIGHT" => self.frame_height = parse_number(key, value)?,
                "CAMERA_ROTATION" => {
                    let degrees = parse_number::<i32>(key, value)?;
                    if !(0..360).contains(&degrees) {
                        return Err(ConfigError::InvalidRotation(degrees).into());
                    }
                    self.rotation = degrees as u16;
                }
                _ => {
                    tracing::trace!(key = key, "Ignoring unknown config key");
                }
            }
        }

        Ok(self)
    }

    /// Defaults overlaid with a configuration string
    pub fn from_conf_str(text: &str) -> Result<Self> {
        Self::default().apply_conf_str(text)
    }

    /// Defaults overlaid with a configuration file
    ///
    /// A missing file is not an error; the defaults are used.
    pub fn from_conf_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                tracing::debug!(path = %path.display(), "Loaded config file");
                Self::from_conf_str(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        ConfigError::InvalidNumber {
            key: key.to_string(),
            value: value.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.frame_width, 1280);
        assert_eq!(config.frame_height, 720);
        assert_eq!(config.rotation, 90);
        assert!(config.tcp_nodelay);
        assert_eq!(config.write_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:8081".parse().unwrap();
        let config = ServerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 8081);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .max_connections(50)
            .request_timeout(Duration::from_secs(5))
            .write_timeout(None)
            .frame_size(640, 480)
            .rotation(450)
            .page_title("Garage");

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.write_timeout, None);
        assert_eq!((config.frame_width, config.frame_height), (640, 480));
        assert_eq!(config.rotation, 90);
        assert_eq!(config.page_title, "Garage");
    }

    #[test]
    fn test_conf_str() {
        let text = "\
# dashcam settings
STREAMING_PORT=8080
CAMERA_WIDTH=1920
CAMERA_HEIGHT=\"1080\"

CAMERA_ROTATION=180
RECORDING_DIR=/var/dashcam
not a setting
";
        let config = ServerConfig::from_conf_str(text).unwrap();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.frame_width, 1920);
        assert_eq!(config.frame_height, 1080);
        assert_eq!(config.rotation, 180);
    }

    #[test]
    fn test_conf_str_invalid_number() {
        let result = ServerConfig::from_conf_str("STREAMING_PORT=eighty");
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::InvalidNumber { .. }))
        ));

        let result = ServerConfig::from_conf_str("STREAMING_PORT=70000");
        assert!(result.is_err());
    }

    #[test]
    fn test_conf_str_invalid_rotation() {
        let result = ServerConfig::from_conf_str("CAMERA_ROTATION=-90");
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::InvalidRotation(-90)))
        ));
    }

    #[test]
    fn test_conf_file_missing() {
        let config = ServerConfig::from_conf_file("/nonexistent/dashcam.conf").unwrap();
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
    }
}
