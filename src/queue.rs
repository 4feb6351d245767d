// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions for RabbitMQ
//!
//! This module provides the queue and binding descriptors a consumer declares.
//! Descriptors are immutable once handed to a consumer and are re-applied verbatim
//! after every reconnection, so declaring them must stay idempotent on the broker.

use lapin::types::{AMQPValue, FieldTable, LongInt, LongString, ShortString};

/// Queue argument naming the exchange that receives dead-lettered messages
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Queue argument naming the routing key used when dead-lettering
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Queue argument for message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Queue argument for maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Queue argument for maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Definition of a RabbitMQ queue with its configuration parameters.
///
/// This struct implements the builder pattern to create and configure queue definitions.
/// An empty name asks the broker to generate one; the generated name is what the
/// consumer subscribes to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) auto_delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) no_wait: bool,
    pub(crate) args: FieldTable,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default, the queue is non-durable, non-exclusive and never auto-deleted.
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    ///
    /// # Returns
    /// A new queue definition with default settings
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_auto_delete(&self) -> bool {
        self.auto_delete
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_no_wait(&self) -> bool {
        self.no_wait
    }

    pub fn args(&self) -> &FieldTable {
        &self.args
    }

    /// Makes the queue durable, persisting across broker restarts.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete when its last consumer goes away.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Sets no_wait flag, the broker will not answer the declaration.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Replaces the queue arguments.
    pub fn with_args(mut self, args: FieldTable) -> Self {
        self.args = args;
        self
    }

    /// Adds a single queue argument.
    pub fn arg(mut self, key: &str, value: AMQPValue) -> Self {
        self.args.insert(ShortString::from(key), value);
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue.
    ///
    /// # Parameters
    /// * `ttl` - TTL in milliseconds
    pub fn ttl(self, ttl: i32) -> Self {
        self.arg(AMQP_HEADERS_MESSAGE_TTL, AMQPValue::LongInt(LongInt::from(ttl)))
    }

    /// Sets the maximum number of messages the queue can hold.
    ///
    /// # Parameters
    /// * `max` - Maximum number of messages
    pub fn max_length(self, max: i32) -> Self {
        self.arg(AMQP_HEADERS_MAX_LENGTH, AMQPValue::LongInt(LongInt::from(max)))
    }

    /// Sets the maximum size in bytes the queue can hold.
    ///
    /// # Parameters
    /// * `max_bytes` - Maximum size in bytes
    pub fn max_length_bytes(self, max_bytes: i32) -> Self {
        self.arg(
            AMQP_HEADERS_MAX_LENGTH_BYTES,
            AMQPValue::LongInt(LongInt::from(max_bytes)),
        )
    }

    /// Routes rejected and expired messages to the given exchange and routing key.
    ///
    /// # Parameters
    /// * `exchange` - The dead letter exchange, `""` for the default exchange
    /// * `routing_key` - The routing key used when dead-lettering
    pub fn dead_letter(self, exchange: &str, routing_key: &str) -> Self {
        self.arg(
            AMQP_HEADERS_DEAD_LETTER_EXCHANGE,
            AMQPValue::LongString(LongString::from(exchange)),
        )
        .arg(
            AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY,
            AMQPValue::LongString(LongString::from(routing_key)),
        )
    }
}

/// Configuration for binding a queue to an exchange.
///
/// The queue and exchange names come from the consumer's definitions; the binding only
/// carries the routing key and binding options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueBinding {
    pub(crate) routing_key: String,
    pub(crate) no_wait: bool,
    pub(crate) args: FieldTable,
}

impl QueueBinding {
    /// Creates a new binding for the given routing key.
    ///
    /// # Parameters
    /// * `key` - The routing key, or pattern for topic exchanges
    pub fn new(key: &str) -> QueueBinding {
        QueueBinding {
            routing_key: key.to_owned(),
            ..QueueBinding::default()
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn is_no_wait(&self) -> bool {
        self.no_wait
    }

    pub fn args(&self) -> &FieldTable {
        &self.args
    }

    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Adds a binding argument, used for matching on headers exchanges.
    pub fn arg(mut self, key: &str, value: AMQPValue) -> Self {
        self.args.insert(ShortString::from(key), value);
        self
    }
}
