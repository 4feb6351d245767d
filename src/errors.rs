// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Client
//!
//! This module provides the error taxonomy shared by every component of the client.
//! The `AmqpError` enum covers connection dialing, channel creation, topology
//! declaration, subscription, delivery handling, publishing and configuration.
//! Variants carry the underlying error text so they stay `Clone` and comparable.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Errors raised while a component is being constructed are returned to the caller.
/// Errors raised inside the background reconnection loop are logged and drive the
/// retry instead of being returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel `{0}`")]
    ChannelError(String),

    /// The channel was closed, either by the client or by the broker
    #[error("channel is closed")]
    ChannelClosed,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error subscribing a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish `{0}`")]
    PublishingError(String),

    /// Error encoding a payload before publishing
    #[error("failure to serialize payload `{0}`")]
    SerializationError(String),

    /// Error returned by a delivery handler
    #[error("failure to handle message `{0}`")]
    HandlerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error rejecting a message
    #[error("failure to reject message")]
    RejectMessageError,

    /// Error reading a delivery from the subscription
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Invalid client configuration
    #[error("invalid configuration `{0}`")]
    ConfigError(String),
}
