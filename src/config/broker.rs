//! Validated broker connection and topology descriptor.
//!
//! A `BrokerConfig` is built once per publisher or subscriber and never
//! changes afterwards. Every field is checked at construction so the broker
//! code can assume a usable host, credentials, exchange and at least one
//! routing key.

use crate::utils::error::ConfigError;

pub const DEFAULT_PORT: u16 = 5672;
pub const DEFAULT_VIRTUAL_HOST: &str = "/";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    host: String,
    port: u16,
    virtual_host: String,
    credentials: Credentials,
    exchange: String,
    routing_keys: Vec<String>,
}

impl BrokerConfig {
    /// Validates and builds a descriptor on the default port and virtual host.
    pub fn new<I, S>(
        host: impl Into<String>,
        credentials: Credentials,
        exchange: impl Into<String>,
        routing_keys: I,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let host = non_empty("host", host.into())?;
        let user = non_empty("username", credentials.user)?;
        // passwords keep surrounding whitespace; only blank ones are rejected
        if credentials.password.trim().is_empty() {
            return Err(ConfigError::EmptyField("password"));
        }
        let password = credentials.password;
        let exchange = non_empty("exchange", exchange.into())?;

        let routing_keys: Vec<String> = routing_keys
            .into_iter()
            .map(|key| key.into().trim().to_string())
            .collect();
        if routing_keys.is_empty() {
            return Err(ConfigError::NoRoutingKeys);
        }
        if let Some(position) = routing_keys.iter().position(|key| key.is_empty()) {
            return Err(ConfigError::EmptyRoutingKey(position));
        }

        Ok(Self {
            host,
            port: DEFAULT_PORT,
            virtual_host: DEFAULT_VIRTUAL_HOST.to_string(),
            credentials: Credentials { user, password },
            exchange,
            routing_keys,
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        let virtual_host = virtual_host.into();
        if !virtual_host.is_empty() {
            self.virtual_host = virtual_host;
        }
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn virtual_host(&self) -> &str {
        &self.virtual_host
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Binding keys, in configuration order. Never empty.
    pub fn routing_keys(&self) -> &[String] {
        &self.routing_keys
    }

    /// `host:port`, used in log lines and error messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty(field: &'static str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ConfigError::EmptyField(field))
    } else {
        Ok(trimmed.to_string())
    }
}
