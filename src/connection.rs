// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Connection
//!
//! This module owns the single connection a client shares between all of its
//! channels. The connection is dialed lazily on the first channel request and dialed
//! again whenever the held one reports closed. Dialing and channel creation are not
//! retried here; retrying belongs to the reconnection supervisor.

use crate::{
    channel::{AmqpChannel, ChannelProvider, CloseNotifier, LapinChannel, REPLY_SUCCESS},
    config::RabbitMQConfigs,
    errors::AmqpError,
    logger::Logger,
    tls::{self, Handshake},
};
use async_trait::async_trait;
use lapin::{types::LongString, uri::AMQPUri, Connection, ConnectionProperties};
use std::sync::{Arc, Mutex};
use tracing::error;

/// Close notifiers of the channels opened on one connection.
type Watchers = Arc<Mutex<Vec<CloseNotifier>>>;

struct Dialed {
    connection: Connection,
    watchers: Watchers,
}

/// Lazily dialed, shared AMQP connection.
pub struct BrokerConnection {
    config: RabbitMQConfigs,
    logger: Logger,
    current: tokio::sync::Mutex<Option<Dialed>>,
}

impl BrokerConnection {
    /// Creates a connection handle. Nothing is dialed until a channel is requested.
    ///
    /// # Parameters
    /// * `config` - Broker address, credentials, TLS settings and connection name
    /// * `logger` - Logger for connection events
    pub fn new(config: RabbitMQConfigs, logger: Logger) -> BrokerConnection {
        BrokerConnection {
            config,
            logger,
            current: tokio::sync::Mutex::new(None),
        }
    }

    async fn dial(&self) -> Result<Dialed, AmqpError> {
        self.logger.debug(format_args!("creating amqp connection..."));

        let mut options = ConnectionProperties::default();
        if let Some(name) = &self.config.client_name {
            options = options.with_connection_name(LongString::from(name.clone()));
        }

        let dialed = match Handshake::for_config(&self.config) {
            Handshake::Verified(tls) => {
                Connection::connect_with_config(&self.config.uri(), options, tls).await
            }
            Handshake::Unverified => {
                self.logger.warn(format_args!(
                    "tls certificate verification disabled for {}",
                    self.config.host
                ));
                let uri = self
                    .config
                    .uri()
                    .parse::<AMQPUri>()
                    .map_err(AmqpError::ConfigError)?;
                Connection::connector(uri, tls::unverified_connector()?, options).await
            }
        };

        let connection = match dialed {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }?;

        let watchers: Watchers = Arc::default();
        let on_error = watchers.clone();
        let logger = self.logger.clone();
        connection.on_error(move |err| {
            logger.error(format_args!("connection error: {}", err));
            if let Ok(list) = on_error.lock() {
                for notifier in list.iter() {
                    notifier.notify(Some(AmqpError::ConnectionError(err.to_string())));
                }
            }
        });

        self.logger.info(format_args!(
            "amqp connected to {}:{}",
            self.config.host, self.config.port
        ));

        Ok(Dialed {
            connection,
            watchers,
        })
    }
}

#[async_trait]
impl ChannelProvider for BrokerConnection {
    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        let mut current = self.current.lock().await;

        let alive = current
            .as_ref()
            .is_some_and(|dialed| dialed.connection.status().connected());
        if !alive {
            *current = Some(self.dial().await?);
        }

        let Some(dialed) = current.as_ref() else {
            return Err(AmqpError::InternalError);
        };

        self.logger.debug(format_args!("creating amqp channel..."));
        let channel = match dialed.connection.create_channel().await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }?;

        let notifier = CloseNotifier::new();
        if let Ok(mut list) = dialed.watchers.lock() {
            list.retain(|n| !n.is_closed());
            list.push(notifier.clone());
        }

        self.logger
            .debug(format_args!("channel {} created", channel.id()));

        Ok(Arc::new(LapinChannel::new(channel, notifier)))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let Some(dialed) = self.current.lock().await.take() else {
            return Ok(());
        };

        if !dialed.connection.status().connected() {
            self.logger.debug(format_args!("connection already closed"));
            return Ok(());
        }

        dialed
            .connection
            .close(REPLY_SUCCESS, "closed by client")
            .await
            .map_err(|err| AmqpError::ConnectionError(err.to_string()))
    }
}
