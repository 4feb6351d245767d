// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Deliveries and Handlers
//!
//! A `Delivery` is one message received by a consumer subscription. Handlers receive
//! deliveries one at a time and own acknowledgment: unless the consumer runs in
//! auto-ack mode, nothing is acked or nacked on the handler's behalf, whatever the
//! handler returns.

use crate::errors::AmqpError;
use async_trait::async_trait;
use lapin::BasicProperties;
use std::{fmt, future::Future, marker::PhantomData, sync::Arc};

/// Settles deliveries on the channel they were received from.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError>;

    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool)
        -> Result<(), AmqpError>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;
}

/// A message received from a queue subscription.
#[derive(Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        exchange: &str,
        routing_key: &str,
        redelivered: bool,
        properties: BasicProperties,
        data: Vec<u8>,
        acker: Arc<dyn Acknowledger>,
    ) -> Delivery {
        Delivery {
            delivery_tag,
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            redelivered,
            properties,
            data,
            acker,
        }
    }

    /// Acknowledges this delivery.
    pub async fn ack(&self) -> Result<(), AmqpError> {
        self.acker.ack(self.delivery_tag, false).await
    }

    /// Acknowledges this delivery and every earlier unacknowledged one on the channel.
    pub async fn ack_multiple(&self) -> Result<(), AmqpError> {
        self.acker.ack(self.delivery_tag, true).await
    }

    /// Negatively acknowledges this delivery.
    ///
    /// # Parameters
    /// * `requeue` - Put the message back on the queue instead of dead-lettering it
    pub async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.acker.nack(self.delivery_tag, false, requeue).await
    }

    /// Rejects this delivery.
    pub async fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
        self.acker.reject(self.delivery_tag, requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("properties", &self.properties)
            .field("data", &self.data.len())
            .finish()
    }
}

/// Processes deliveries for a consumer.
///
/// Handlers run sequentially for a given consumer. A returned error is logged and the
/// consumer moves on to the next delivery.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Result<(), AmqpError>;
}

/// Adapts an async closure into a [`DeliveryHandler`].
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> DeliveryHandler for FnHandler<F, Fut>
where
    F: Fn(Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), AmqpError>> + Send,
{
    async fn handle(&self, delivery: Delivery) -> Result<(), AmqpError> {
        (self.f)(delivery).await
    }
}

/// Wraps an async closure as a shareable handler.
///
/// # Example
/// ```ignore
/// let handler = handler_fn(|delivery: Delivery| async move {
///     println!("{}", String::from_utf8_lossy(&delivery.data));
///     delivery.ack().await
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn DeliveryHandler>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AmqpError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _fut: PhantomData,
    })
}
