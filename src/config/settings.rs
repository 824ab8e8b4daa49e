use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the broadcast server, the chat client and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub client: ClientSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the broadcast server.
///
/// `poll_timeout_secs` only paces housekeeping; an idle peer is never
/// disconnected because of it. `max_frame_len` caps the length prefix a peer
/// may announce.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub poll_timeout_secs: u64,
    pub shutdown_grace_ms: u64,
    pub max_frame_len: usize,
    pub rebroadcast_malformed: bool,
}

/// Configuration settings for the chat client.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub reconnect_backoff_ms: u64,
    /// Short status name (`on`, `afk`, `dnd`, `off`) selected after a reconnect.
    pub default_status: String,
    pub max_frame_len: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub client: Option<PartialClientSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub poll_timeout_secs: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
    pub max_frame_len: Option<usize>,
    pub rebroadcast_malformed: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub reconnect_backoff_ms: Option<u64>,
    pub default_status: Option<String>,
    pub max_frame_len: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

/// Default host, shared by server and client.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default port, shared by server and client.
pub const DEFAULT_PORT: u16 = 14344;
/// Largest frame accepted unless configured otherwise (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            poll_timeout_secs: 60,
            shutdown_grace_ms: 2000,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            rebroadcast_malformed: false,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: "Unnamed".to_string(),
            reconnect_backoff_ms: 3000,
            default_status: "on".to_string(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            client: ClientSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `Settings::default()`.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();

        let server = match self.server {
            Some(s) => ServerSettings {
                host: s.host.unwrap_or(default.server.host),
                port: s.port.unwrap_or(default.server.port),
                poll_timeout_secs: s
                    .poll_timeout_secs
                    .unwrap_or(default.server.poll_timeout_secs),
                shutdown_grace_ms: s
                    .shutdown_grace_ms
                    .unwrap_or(default.server.shutdown_grace_ms),
                max_frame_len: s.max_frame_len.unwrap_or(default.server.max_frame_len),
                rebroadcast_malformed: s
                    .rebroadcast_malformed
                    .unwrap_or(default.server.rebroadcast_malformed),
            },
            None => default.server,
        };

        let client = match self.client {
            Some(c) => ClientSettings {
                host: c.host.unwrap_or(default.client.host),
                port: c.port.unwrap_or(default.client.port),
                username: c.username.unwrap_or(default.client.username),
                reconnect_backoff_ms: c
                    .reconnect_backoff_ms
                    .unwrap_or(default.client.reconnect_backoff_ms),
                default_status: c.default_status.unwrap_or(default.client.default_status),
                max_frame_len: c.max_frame_len.unwrap_or(default.client.max_frame_len),
            },
            None => default.client,
        };

        let logging = LoggingSettings {
            level: self
                .logging
                .and_then(|l| l.level)
                .unwrap_or(default.logging.level),
        };

        Settings {
            server,
            client,
            logging,
        }
    }
}
