//! Exporter configuration.
//!
//! The host provides an [`ExporterConfig`], either built in code with the
//! `with_*` methods or parsed from JSON using the option names the tracer
//! already uses (`serviceName`, `flushIntervalMs`, `maxPacketSize`, ...).

use crate::error::ConfigError;
use crate::span::Tag;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

pub const DEFAULT_AGENT_HOST: &str = "localhost";
pub const DEFAULT_AGENT_PORT: u16 = 6832;
pub const DEFAULT_MAX_PACKET_SIZE: usize = 65_000;
pub const DEFAULT_MAX_SPANS_PER_BATCH: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where batches are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Datagram agent, addressed by host and port
    Agent { host: String, port: u16 },
    /// HTTP collector, addressed by URL
    Collector { url: Url },
}

impl Endpoint {
    pub fn agent(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Agent {
            host: host.into(),
            port,
        }
    }

    pub fn collector(url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(url).map_err(|e| ConfigError::InvalidEndpoint(e.to_string()))?;
        Ok(Endpoint::Collector { url })
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::agent(DEFAULT_AGENT_HOST, DEFAULT_AGENT_PORT)
    }
}

/// Configuration for one exporter instance
#[derive(Debug, Clone, PartialEq)]
pub struct ExporterConfig {
    /// Service identity placed in every batch envelope (required)
    pub service_name: String,
    /// User tags, merged after the host tags
    pub tags: Vec<Tag>,
    /// Period of the background flush timer
    pub flush_interval: Duration,
    /// Ceiling on the serialized size of one batch (envelope included)
    pub max_batch_bytes: usize,
    /// Ceiling on the number of spans in one batch
    pub max_spans_per_batch: usize,
    /// Bound on the final flush performed by `close()`
    pub shutdown_timeout: Duration,
    /// Per-request timeout for the HTTP transport
    pub request_timeout: Duration,
    /// Collector endpoint
    pub endpoint: Endpoint,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            tags: Vec::new(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_batch_bytes: DEFAULT_MAX_PACKET_SIZE,
            max_spans_per_batch: DEFAULT_MAX_SPANS_PER_BATCH,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            endpoint: Endpoint::default(),
        }
    }
}

impl ExporterConfig {
    /// Creates a configuration with defaults for everything but the service name.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Parses a JSON configuration document and validates it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let config = Self::try_from(file)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the required options and limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::MissingServiceName);
        }
        if self.max_batch_bytes == 0 {
            return Err(ConfigError::InvalidLimit {
                name: "maxPacketSize",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_spans_per_batch == 0 {
            return Err(ConfigError::InvalidLimit {
                name: "maxSpansPerBatch",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::InvalidLimit {
                name: "flushIntervalMs",
                reason: "must be greater than zero".to_string(),
            });
        }
        match &self.endpoint {
            Endpoint::Agent { host, .. } if host.is_empty() => {
                Err(ConfigError::InvalidEndpoint("empty agent host".to_string()))
            }
            Endpoint::Collector { url } if !matches!(url.scheme(), "http" | "https") => Err(
                ConfigError::InvalidEndpoint(format!("unsupported scheme {}", url.scheme())),
            ),
            _ => Ok(()),
        }
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes;
        self
    }

    pub fn with_max_spans_per_batch(mut self, spans: usize) -> Self {
        self.max_spans_per_batch = spans;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }
}

/// On-disk / host-provided shape of the configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfigFile {
    service_name: Option<String>,
    tags: Vec<Tag>,
    flush_interval_ms: Option<u64>,
    #[serde(alias = "maxBatchBytes")]
    max_packet_size: Option<usize>,
    max_spans_per_batch: Option<usize>,
    shutdown_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    host: Option<String>,
    port: Option<u16>,
    url: Option<String>,
}

impl TryFrom<ConfigFile> for ExporterConfig {
    type Error = ConfigError;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        let endpoint = match (file.url, file.host, file.port) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(ConfigError::InvalidEndpoint(
                    "url cannot be combined with host/port".to_string(),
                ))
            }
            (Some(url), None, None) => Endpoint::collector(&url)?,
            (None, host, port) => Endpoint::agent(
                host.unwrap_or_else(|| DEFAULT_AGENT_HOST.to_string()),
                port.unwrap_or(DEFAULT_AGENT_PORT),
            ),
        };

        let defaults = ExporterConfig::default();
        Ok(Self {
            service_name: file.service_name.ok_or(ConfigError::MissingServiceName)?,
            tags: file.tags,
            flush_interval: file
                .flush_interval_ms
                .map_or(defaults.flush_interval, Duration::from_millis),
            max_batch_bytes: file.max_packet_size.unwrap_or(defaults.max_batch_bytes),
            max_spans_per_batch: file
                .max_spans_per_batch
                .unwrap_or(defaults.max_spans_per_batch),
            shutdown_timeout: file
                .shutdown_timeout_ms
                .map_or(defaults.shutdown_timeout, Duration::from_millis),
            request_timeout: file
                .request_timeout_ms
                .map_or(defaults.request_timeout, Duration::from_millis),
            endpoint,
        })
    }
}
