// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! This module provides functionality for publishing messages to RabbitMQ exchanges.
//! The publisher declares no topology; its exchange must already exist or be declared
//! by a consumer. Every publish reads the latest channel installed by the reconnection
//! supervisor. Failed publishes are returned as-is and never retried here.

use crate::{
    errors::AmqpError,
    managed::{ChannelOwner, ManagedChannel},
    otel,
    queue::{AMQP_HEADERS_DEAD_LETTER_EXCHANGE, AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY},
};
use async_trait::async_trait;
use lapin::{
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties,
};
use opentelemetry::Context;
use serde::Serialize;
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Delivery mode of messages the broker may drop on restart
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;
/// Delivery mode of messages persisted by the broker
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// An outgoing message: a body plus AMQP properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub body: Vec<u8>,
    pub properties: BasicProperties,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Message {
        Message {
            body: body.into(),
            properties: BasicProperties::default(),
        }
    }

    pub fn with_properties(mut self, properties: BasicProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.properties = self
            .properties
            .with_content_type(ShortString::from(content_type));
        self
    }

    pub fn delivery_mode(mut self, mode: u8) -> Self {
        self.properties = self.properties.with_delivery_mode(mode);
        self
    }

    /// Sets a single header, keeping the others.
    pub fn header(mut self, key: &str, value: AMQPValue) -> Self {
        let mut headers = self.properties.headers().clone().unwrap_or_default();
        headers.insert(ShortString::from(key), value);
        self.properties = self.properties.with_headers(headers);
        self
    }
}

/// Where and how a publisher sends its messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishConfig {
    pub(crate) exchange: String,
    pub(crate) routing_key: String,
    pub(crate) mandatory: bool,
    pub(crate) immediate: bool,
    pub(crate) dead_letter_exchange: Option<String>,
    pub(crate) dead_letter_routing_key: Option<String>,
}

impl PublishConfig {
    /// Creates a configuration publishing to `exchange` with a default routing key.
    ///
    /// # Parameters
    /// * `exchange` - Target exchange, `""` for the default exchange
    /// * `routing_key` - Routing key used when a publish does not override it
    pub fn new(exchange: &str, routing_key: &str) -> PublishConfig {
        PublishConfig {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            ..PublishConfig::default()
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Stamps `x-dead-letter-exchange` on JSON messages.
    pub fn dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self
    }

    /// Stamps `x-dead-letter-routing-key` on JSON messages.
    pub fn dead_letter_routing_key(mut self, routing_key: &str) -> Self {
        self.dead_letter_routing_key = Some(routing_key.to_owned());
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }
}

/// Publisher bound to one exchange.
pub struct RabbitMQPublisher {
    channel: ManagedChannel,
    config: PublishConfig,
}

impl RabbitMQPublisher {
    /// Creates a new RabbitMQ publisher.
    ///
    /// # Parameters
    /// * `channel` - The managed channel this publisher owns
    /// * `config` - Target exchange, routing and dead letter settings
    pub fn new(channel: ManagedChannel, config: PublishConfig) -> RabbitMQPublisher {
        RabbitMQPublisher { channel, config }
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Publishes a message on the current channel.
    ///
    /// The current OpenTelemetry context is propagated in the message headers.
    ///
    /// # Parameters
    /// * `message` - Body and properties to send
    /// * `routing_key` - Overrides the configured routing key
    ///
    /// # Returns
    /// Ok(()) on success, `AmqpError::ChannelClosed` after close, or the broker failure
    pub async fn publish(&self, message: Message, routing_key: Option<&str>) -> Result<(), AmqpError> {
        if self.channel.is_closed() {
            return Err(AmqpError::ChannelClosed);
        }

        let routing_key = routing_key.unwrap_or(&self.config.routing_key);
        let message = Message {
            properties: otel::inject_context(&Context::current(), message.properties),
            body: message.body,
        };

        self.channel
            .channel()
            .await
            .basic_publish(
                &self.config.exchange,
                routing_key,
                self.config.mandatory,
                self.config.immediate,
                &message,
            )
            .await?;

        self.channel.logger().trace(format_args!(
            "message published to {} with key {}",
            self.config.exchange, routing_key
        ));

        Ok(())
    }

    /// Serializes `value` as the JSON body of `message` and publishes it.
    ///
    /// The content type becomes `application/json`, the delivery mode defaults to
    /// persistent, a message id is generated when missing, and the configured dead
    /// letter exchange and routing key are stamped as headers. Serialization failures
    /// are returned before the channel is touched.
    pub async fn publish_json<T>(
        &self,
        value: &T,
        message: Message,
        routing_key: Option<&str>,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(value)
            .map_err(|err| AmqpError::SerializationError(err.to_string()))?;

        let mut properties = message
            .properties
            .with_content_type(ShortString::from(JSON_CONTENT_TYPE));

        if matches!(properties.delivery_mode(), None | Some(0)) {
            properties = properties.with_delivery_mode(DELIVERY_MODE_PERSISTENT);
        }

        if properties.message_id().is_none() {
            properties = properties.with_message_id(ShortString::from(Uuid::new_v4().to_string()));
        }

        let mut headers = properties.headers().clone().unwrap_or_default();
        let stamped = self.stamp_dead_letter(&mut headers);
        if stamped {
            properties = properties.with_headers(headers);
        }

        self.publish(Message { body, properties }, routing_key).await
    }

    /// Closes the underlying channel.
    pub async fn close(&self) -> Result<(), AmqpError> {
        self.channel.close().await
    }

    fn stamp_dead_letter(&self, headers: &mut FieldTable) -> bool {
        let mut stamped = false;

        if let Some(exchange) = self.config.dead_letter_exchange.as_deref().filter(|e| !e.is_empty()) {
            headers.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                AMQPValue::LongString(LongString::from(exchange)),
            );
            stamped = true;
        }

        if let Some(key) = self.config.dead_letter_routing_key.as_deref().filter(|k| !k.is_empty()) {
            headers.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
                AMQPValue::LongString(LongString::from(key)),
            );
            stamped = true;
        }

        stamped
    }
}

#[async_trait]
impl ChannelOwner for RabbitMQPublisher {
    fn managed_channel(&self) -> &ManagedChannel {
        &self.channel
    }
}
