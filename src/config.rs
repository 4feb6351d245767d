// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Client Configuration
//!
//! This module holds the connection settings for the RabbitMQ client: broker address,
//! credentials, TLS options, the optional connection name, log verbosity, the fixed
//! backoff used while reconnecting channels and how long a restarting consumer waits
//! for its previous handler. Settings can be built in code, deserialized
//! with serde, or read from `RABBITMQ_*` environment variables.

use crate::errors::AmqpError;
use serde::{Deserialize, Deserializer};
use std::{str::FromStr, time::Duration};
use tracing::level_filters::LevelFilter;

/// Default delay between two attempts to re-create a closed channel.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

/// Default time a restarting consumer waits for its previous dispatch loop before
/// aborting it.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_HOST: &str = "RABBITMQ_HOST";
pub const ENV_PORT: &str = "RABBITMQ_PORT";
pub const ENV_USER: &str = "RABBITMQ_USER";
pub const ENV_PASSWORD: &str = "RABBITMQ_PASSWORD";
pub const ENV_VHOST: &str = "RABBITMQ_VHOST";
pub const ENV_TLS: &str = "RABBITMQ_TLS";
pub const ENV_TLS_SKIP_VERIFY: &str = "RABBITMQ_TLS_SKIP_VERIFY";
pub const ENV_TLS_CA_CERT: &str = "RABBITMQ_TLS_CA_CERT";
pub const ENV_CLIENT_NAME: &str = "RABBITMQ_CLIENT_NAME";
pub const ENV_LOG_LEVEL: &str = "RABBITMQ_LOG_LEVEL";
pub const ENV_RECONNECT_INTERVAL_SECS: &str = "RABBITMQ_RECONNECT_INTERVAL_SECS";
pub const ENV_DRAIN_TIMEOUT_SECS: &str = "RABBITMQ_DRAIN_TIMEOUT_SECS";

/// Connection settings for a [`RabbitMQClient`](crate::client::RabbitMQClient).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub tls: bool,
    pub tls_skip_verify: bool,
    /// PEM encoded certificate chain trusted when `tls` is enabled.
    pub tls_ca_cert: Option<String>,
    /// Sent to the broker as the `connection_name` client property.
    pub client_name: Option<String>,
    #[serde(deserialize_with = "deserialize_level")]
    pub log_level: LevelFilter,
    #[serde(
        rename = "reconnect_interval_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub reconnect_interval: Duration,
    #[serde(rename = "drain_timeout_secs", deserialize_with = "deserialize_secs")]
    pub drain_timeout: Duration,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: String::new(),
            tls: false,
            tls_skip_verify: false,
            tls_ca_cert: None,
            client_name: None,
            log_level: LevelFilter::INFO,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl RabbitMQConfigs {
    /// Creates a plain-text configuration for the given broker and credentials.
    pub fn new(host: &str, port: u16, user: &str, password: &str) -> RabbitMQConfigs {
        RabbitMQConfigs {
            host: host.to_owned(),
            port,
            user: user.to_owned(),
            password: password.to_owned(),
            ..RabbitMQConfigs::default()
        }
    }

    /// Reads the configuration from the process environment.
    ///
    /// Variables that are not set keep their default value.
    ///
    /// # Returns
    /// The configuration, or `AmqpError::ConfigError` when a variable cannot be parsed
    pub fn from_env() -> Result<RabbitMQConfigs, AmqpError> {
        RabbitMQConfigs::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary key lookup.
    ///
    /// # Parameters
    /// * `lookup` - Returns the raw value for an environment variable name
    pub fn from_lookup<F>(lookup: F) -> Result<RabbitMQConfigs, AmqpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = RabbitMQConfigs::default();

        if let Some(host) = lookup(ENV_HOST) {
            cfg.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            cfg.port = parse_value(ENV_PORT, &port)?;
        }
        if let Some(user) = lookup(ENV_USER) {
            cfg.user = user;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            cfg.password = password;
        }
        if let Some(vhost) = lookup(ENV_VHOST) {
            cfg.vhost = vhost;
        }
        if let Some(tls) = lookup(ENV_TLS) {
            cfg.tls = parse_value(ENV_TLS, &tls)?;
        }
        if let Some(skip) = lookup(ENV_TLS_SKIP_VERIFY) {
            cfg.tls_skip_verify = parse_value(ENV_TLS_SKIP_VERIFY, &skip)?;
        }
        cfg.tls_ca_cert = lookup(ENV_TLS_CA_CERT).or(cfg.tls_ca_cert);
        cfg.client_name = lookup(ENV_CLIENT_NAME).filter(|name| !name.is_empty());
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            cfg.log_level = parse_value(ENV_LOG_LEVEL, &level)?;
        }
        if let Some(secs) = lookup(ENV_RECONNECT_INTERVAL_SECS) {
            cfg.reconnect_interval = Duration::from_secs(parse_value(ENV_RECONNECT_INTERVAL_SECS, &secs)?);
        }
        if let Some(secs) = lookup(ENV_DRAIN_TIMEOUT_SECS) {
            cfg.drain_timeout = Duration::from_secs(parse_value(ENV_DRAIN_TIMEOUT_SECS, &secs)?);
        }

        Ok(cfg)
    }

    /// Enables TLS (`amqps`).
    pub fn with_tls(mut self) -> Self {
        self.tls = true;
        self
    }

    /// Asks the connector not to verify the broker certificate.
    pub fn skip_verify(mut self) -> Self {
        self.tls_skip_verify = true;
        self
    }

    /// Trusts the given PEM certificate chain for TLS connections.
    pub fn ca_cert(mut self, pem: &str) -> Self {
        self.tls_ca_cert = Some(pem.to_owned());
        self
    }

    pub fn vhost(mut self, vhost: &str) -> Self {
        self.vhost = vhost.to_owned();
        self
    }

    pub fn client_name(mut self, name: &str) -> Self {
        self.client_name = Some(name.to_owned());
        self
    }

    pub fn log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    /// Sets the fixed delay between channel re-creation attempts.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Sets how long a restarting consumer waits for the handler still running on the
    /// previous channel before aborting it.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// URI scheme selected by the TLS flag.
    pub fn protocol(&self) -> &'static str {
        if self.tls {
            "amqps"
        } else {
            "amqp"
        }
    }

    /// Renders the broker URI, `amqp(s)://{user}:{password}@{host}:{port}/{vhost}`.
    pub fn uri(&self) -> String {
        format!(
            "{}://{}:{}@{}:{}/{}",
            self.protocol(),
            self.user,
            self.password,
            self.host,
            self.port,
            self.vhost
        )
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AmqpError>
where
    T: FromStr,
{
    raw.trim()
        .parse::<T>()
        .map_err(|_| AmqpError::ConfigError(format!("{}={}", key, raw)))
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse::<LevelFilter>().map_err(serde::de::Error::custom)
}

fn deserialize_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Duration::from_secs(u64::deserialize(deserializer)?))
}
