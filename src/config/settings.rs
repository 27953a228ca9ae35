use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes the broker connection, the retry budget and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub retry: RetrySettings,
    pub logging: LoggingSettings,
}

/// Connection and topology settings for the message broker.
///
/// `host`, `username`, `password` and `exchange` have no built-in default.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub host: Option<String>,
    pub port: u16,
    pub virtual_host: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub exchange: Option<String>,
    /// Keys the subscriber binds its queue to.
    pub routing_keys: Vec<String>,
    /// Key the publisher uses when none is given explicitly.
    pub publish_route: String,
}

/// Retry budget applied to broker connection attempts.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
/// Missing values are filled from defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub retry: Option<PartialRetrySettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub virtual_host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub exchange: Option<String>,
    pub routing_keys: Option<Vec<String>>,
    pub publish_route: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRetrySettings {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Host, credentials and exchange are left unset; they have to come from
/// `config/default.toml` or the environment.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                host: None,
                port: 5672,
                virtual_host: "/".to_string(),
                username: None,
                password: None,
                exchange: None,
                routing_keys: vec!["vehicle.*".to_string()],
                publish_route: "vehicle.ping".to_string(),
            },
            retry: RetrySettings {
                max_attempts: 5,
                base_delay_ms: 200,
                max_delay_ms: 10_000,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}
