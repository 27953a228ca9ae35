//! The `config` module loads application settings and turns them into the
//! validated `BrokerConfig` consumed by the publisher and subscriber.
//!
//! Sources, later ones winning:
//! - built-in defaults (`Settings::default()`); host, credentials and exchange
//!   have none, so `broker_config()` fails until they are supplied
//! - `config/default.{toml,yaml,json}` if present
//! - environment variables prefixed `TRACKING__`, sections separated by `__`
//!   (`TRACKING__BROKER__HOST`, `TRACKING__BROKER__ROUTING_KEYS=a.*,b.*`)

mod broker;
mod settings;

use std::num::NonZeroU32;
use std::time::Duration;

use config::{Config, Environment, File};

use crate::retry::{Backoff, RetryPolicy};
use crate::utils::error::ConfigError;
use settings::PartialSettings;

pub use broker::{BrokerConfig, Credentials, DEFAULT_PORT, DEFAULT_VIRTUAL_HOST};
pub use settings::{BrokerSettings, LoggingSettings, RetrySettings, Settings};

const ENV_PREFIX: &str = "TRACKING";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Same as [`load_config`], reading the optional file at `path` (extension
/// resolved by the `config` crate).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("broker.routing_keys"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(merge_with_defaults(partial))
}

fn merge_with_defaults(partial: PartialSettings) -> Settings {
    let default = Settings::default();
    let broker = partial.broker;
    let retry = partial.retry;

    Settings {
        broker: BrokerSettings {
            host: broker.as_ref().and_then(|b| b.host.clone()),
            port: broker
                .as_ref()
                .and_then(|b| b.port)
                .unwrap_or(default.broker.port),
            virtual_host: broker
                .as_ref()
                .and_then(|b| b.virtual_host.clone())
                .unwrap_or(default.broker.virtual_host),
            username: broker.as_ref().and_then(|b| b.username.clone()),
            password: broker.as_ref().and_then(|b| b.password.clone()),
            exchange: broker.as_ref().and_then(|b| b.exchange.clone()),
            routing_keys: broker
                .as_ref()
                .and_then(|b| b.routing_keys.clone())
                .unwrap_or(default.broker.routing_keys),
            publish_route: broker
                .as_ref()
                .and_then(|b| b.publish_route.clone())
                .unwrap_or(default.broker.publish_route),
        },
        retry: RetrySettings {
            max_attempts: retry
                .as_ref()
                .and_then(|r| r.max_attempts)
                .unwrap_or(default.retry.max_attempts),
            base_delay_ms: retry
                .as_ref()
                .and_then(|r| r.base_delay_ms)
                .unwrap_or(default.retry.base_delay_ms),
            max_delay_ms: retry
                .as_ref()
                .and_then(|r| r.max_delay_ms)
                .unwrap_or(default.retry.max_delay_ms),
        },
        logging: LoggingSettings {
            level: partial
                .logging
                .and_then(|l| l.level)
                .unwrap_or(default.logging.level),
        },
    }
}

impl Settings {
    /// Validated descriptor for the subscriber side (binds every routing key).
    pub fn broker_config(&self) -> Result<BrokerConfig, ConfigError> {
        self.build_broker_config(self.broker.routing_keys.iter().cloned())
    }

    /// Validated descriptor for the publisher side, routed by `publish_route`.
    pub fn publisher_config(&self) -> Result<BrokerConfig, ConfigError> {
        self.build_broker_config([self.broker.publish_route.clone()])
    }

    /// Connection-layer retry policy. A zero attempt budget is clamped to one.
    pub fn retry_policy(&self) -> RetryPolicy {
        let attempts = NonZeroU32::new(self.retry.max_attempts).unwrap_or(NonZeroU32::MIN);
        RetryPolicy::new(attempts).with_backoff(Backoff::exponential(
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
        ))
    }

    fn build_broker_config<I>(&self, routing_keys: I) -> Result<BrokerConfig, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let broker = &self.broker;
        Ok(BrokerConfig::new(
            required("host", &broker.host)?,
            Credentials::new(
                required("username", &broker.username)?,
                required("password", &broker.password)?,
            ),
            required("exchange", &broker.exchange)?,
            routing_keys,
        )?
        .with_port(broker.port)
        .with_virtual_host(broker.virtual_host.clone()))
    }
}

fn required(field: &'static str, value: &Option<String>) -> Result<String, ConfigError> {
    value.clone().ok_or(ConfigError::EmptyField(field))
}
