// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares the topology a consumer depends on: its queue and, when one is
//! configured, an exchange plus the binding between them. Installation runs at consumer
//! start and again after every reconnection, relying on the broker treating identical
//! redeclarations as no-ops.

use crate::{
    channel::AmqpChannel,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use tracing::debug;

/// Topology of one consumer, borrowed from its configuration.
pub struct AmqpTopology<'tp> {
    pub(crate) queue: &'tp QueueDefinition,
    pub(crate) exchange: Option<&'tp ExchangeDefinition>,
    pub(crate) binding: Option<&'tp QueueBinding>,
}

impl<'tp> AmqpTopology<'tp> {
    /// Creates a topology made of a single queue.
    ///
    /// # Parameters
    /// * `queue` - The queue definition
    pub fn new(queue: &'tp QueueDefinition) -> AmqpTopology<'tp> {
        AmqpTopology {
            queue,
            exchange: None,
            binding: None,
        }
    }

    /// Adds the exchange the queue is bound to.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exchange(mut self, def: &'tp ExchangeDefinition) -> Self {
        self.exchange = Some(def);
        self
    }

    /// Sets the binding used between the queue and the exchange.
    ///
    /// Without a binding an empty routing key is used.
    pub fn queue_binding(mut self, binding: &'tp QueueBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Installs the topology on the given channel.
    ///
    /// This method performs the following operations in order:
    /// 1. Declares the queue
    /// 2. Declares the exchange, if any
    /// 3. Binds the queue to the exchange, if any
    ///
    /// The first failure aborts the installation.
    ///
    /// # Returns
    /// The declared queue name on success or AmqpError on failure
    pub async fn install(&self, channel: &dyn AmqpChannel) -> Result<String, AmqpError> {
        debug!("creating queue: {}", self.queue.name);
        let queue = channel.queue_declare(self.queue).await?;
        debug!("queue: {} was created", queue);

        let Some(exchange) = self.exchange else {
            return Ok(queue);
        };

        debug!("creating exchange: {}", exchange.name);
        channel.exchange_declare(exchange).await?;
        debug!("exchange: {} was created", exchange.name);

        let default_binding = QueueBinding::default();
        let binding = self.binding.unwrap_or(&default_binding);

        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange.name, binding.routing_key
        );
        channel.queue_bind(&queue, &exchange.name, binding).await?;

        Ok(queue)
    }
}
