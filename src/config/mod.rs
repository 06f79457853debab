//! Configuration management for the session grid

pub mod file;

use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::data::Capabilities;
use crate::{Error, Result};

/// Default port, same as the classic hub
pub const DEFAULT_PORT: u16 = 4444;

/// Session grid configuration
#[derive(Debug, Clone, Default)]
pub struct GridConfig {
    /// HTTP listener configuration
    pub server: ServerConfig,

    /// Local node configuration (node and standalone modes)
    pub node: NodeConfig,

    /// Placement configuration (hub and standalone modes)
    pub distributor: DistributorConfig,

    /// New-session queue configuration
    pub queue: QueueConfig,

    /// Hub to register with in node mode
    pub hub_url: Option<Url>,
}

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Address other components should use to reach this process
    pub external_url: Option<Url>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            external_url: None,
        }
    }
}

impl ServerConfig {
    /// `external_url`, or one derived from the machine hostname and port
    ///
    /// # Errors
    ///
    /// Returns error if no valid URL can be formed
    pub fn external_url(&self) -> Result<Url> {
        if let Some(url) = &self.external_url {
            return Ok(url.clone());
        }
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Url::parse(&format!("http://{host}:{}", self.port))
            .map_err(|e| Error::Config(format!("invalid external url: {e}")))
    }
}

/// One group of identical slots
#[derive(Debug, Clone)]
pub struct SlotConfig {
    pub stereotype: Capabilities,
    pub count: usize,
    /// Driver endpoint sessions for these slots are relayed to
    pub relay_url: Url,
}

/// Local node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Upper bound on concurrent sessions; clamped to the slot count
    pub max_sessions: usize,
    /// Idle time after which a session is reclaimed
    pub session_timeout: Duration,
    pub heartbeat_period: Duration,
    /// Drain after this many sessions have been created (0 = never)
    pub drain_after_session_count: usize,
    pub slots: Vec<SlotConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            max_sessions: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            session_timeout: Duration::from_secs(300),
            heartbeat_period: Duration::from_secs(60),
            drain_after_session_count: 0,
            slots: Vec::new(),
        }
    }
}

/// Placement configuration
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    pub health_check_interval: Duration,
    /// Heartbeat periods a node may stay silent before it is marked down
    pub heartbeat_misses_allowed: u32,
    /// Fail requests no registered stereotype supports instead of queuing them
    pub reject_unsupported: bool,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(120),
            heartbeat_misses_allowed: 3,
            reject_unsupported: true,
        }
    }
}

/// New-session queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub retry_interval: Duration,
    /// Longest a request may wait in the queue
    pub request_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(300),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn parse_url(raw: &str, what: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Config(format!("invalid {what} '{raw}': {e}")))
}

impl GridConfig {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL is malformed
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let defaults = Self::default();

        let external_url = std::env::var("GRID_EXTERNAL_URL")
            .ok()
            .or(fc.server.external_url)
            .map(|u| parse_url(&u, "external url"))
            .transpose()?;

        let server = ServerConfig {
            host: std::env::var("GRID_HOST")
                .ok()
                .or(fc.server.host)
                .unwrap_or(defaults.server.host),
            port: env_parse("GRID_PORT")
                .or(fc.server.port)
                .unwrap_or(defaults.server.port),
            external_url,
        };

        let slots = fc
            .node
            .slots
            .into_iter()
            .map(|s| {
                Ok(SlotConfig {
                    relay_url: parse_url(&s.relay_url, "relay url")?,
                    stereotype: s.stereotype,
                    count: s.count,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let node = NodeConfig {
            max_sessions: env_parse("GRID_MAX_SESSIONS")
                .or(fc.node.max_sessions)
                .unwrap_or(defaults.node.max_sessions),
            session_timeout: env_parse("GRID_SESSION_TIMEOUT_SECS")
                .or(fc.node.session_timeout_secs)
                .map_or(defaults.node.session_timeout, Duration::from_secs),
            heartbeat_period: env_parse("GRID_HEARTBEAT_SECS")
                .or(fc.node.heartbeat_secs)
                .map_or(defaults.node.heartbeat_period, Duration::from_secs),
            drain_after_session_count: env_parse("GRID_DRAIN_AFTER_SESSIONS")
                .or(fc.node.drain_after_sessions)
                .unwrap_or(0),
            slots,
        };

        let distributor = DistributorConfig {
            health_check_interval: env_parse("GRID_HEALTH_CHECK_SECS")
                .or(fc.distributor.health_check_secs)
                .map_or(defaults.distributor.health_check_interval, Duration::from_secs),
            heartbeat_misses_allowed: fc
                .distributor
                .heartbeat_misses_allowed
                .unwrap_or(defaults.distributor.heartbeat_misses_allowed),
            reject_unsupported: env_bool("GRID_REJECT_UNSUPPORTED")
                .or(fc.distributor.reject_unsupported)
                .unwrap_or(defaults.distributor.reject_unsupported),
        };

        let queue = QueueConfig {
            retry_interval: env_parse("GRID_QUEUE_RETRY_MS")
                .or(fc.queue.retry_interval_ms)
                .map_or(defaults.queue.retry_interval, Duration::from_millis),
            request_timeout: env_parse("GRID_QUEUE_TIMEOUT_SECS")
                .or(fc.queue.request_timeout_secs)
                .map_or(defaults.queue.request_timeout, Duration::from_secs),
        };

        let hub_url = std::env::var("GRID_HUB_URL")
            .ok()
            .or(fc.hub_url)
            .map(|u| parse_url(&u, "hub url"))
            .transpose()?;

        Ok(Self {
            server,
            node,
            distributor,
            queue,
            hub_url,
        })
    }

    /// Check settings shared by every mode
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        if self.distributor.health_check_interval.is_zero() {
            return Err(Error::Config("health check interval must be positive".into()));
        }
        if self.queue.retry_interval.is_zero() {
            return Err(Error::Config("queue retry interval must be positive".into()));
        }
        if self.queue.request_timeout.is_zero() {
            return Err(Error::Config("queue request timeout must be positive".into()));
        }
        Ok(())
    }

    /// Check settings needed to run a local node
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid setting
    pub fn validate_node(&self) -> Result<()> {
        self.validate()?;
        if self.node.max_sessions == 0 {
            return Err(Error::Config("max sessions must be positive".into()));
        }
        if self.node.heartbeat_period.is_zero() || self.node.session_timeout.is_zero() {
            return Err(Error::Config("node periods must be positive".into()));
        }
        if self.node.slots.iter().map(|s| s.count).sum::<usize>() == 0 {
            return Err(Error::Config(
                "no slots configured; add [[node.slots]] entries to the config file".into(),
            ));
        }
        Ok(())
    }
}
