// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Resilient RabbitMQ Client
//!
//! Publishers and consumers built on channels that recover on their own. Each one owns
//! a [`managed::ManagedChannel`] watched by a [`supervisor`] task: when the channel
//! closes with an error a new one is requested at a fixed interval until it succeeds,
//! and consumers redeclare their topology and resubscribe on it.

mod otel;
mod tls;

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod delivery;
pub mod errors;
pub mod exchange;
pub mod logger;
pub mod managed;
pub mod publisher;
pub mod queue;
pub mod supervisor;
pub mod topology;

pub use client::RabbitMQClient;
pub use config::RabbitMQConfigs;
pub use consumer::{ConsumeConfig, ConsumeOptions, RabbitMQConsumer};
pub use delivery::{handler_fn, Delivery, DeliveryHandler};
pub use errors::AmqpError;
pub use exchange::{ExchangeDefinition, ExchangeKind};
pub use publisher::{Message, PublishConfig, RabbitMQPublisher};
pub use queue::{QueueBinding, QueueDefinition};
