// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! This module implements the consumer role: it declares the queue topology, opens a
//! delivery subscription and runs a dispatch loop that hands every delivery to the
//! user handler, one at a time.
//!
//! After a reconnection the consumer is started again on the new channel: topology is
//! redeclared first, then the subscription is reopened, then a new dispatch loop starts
//! reading. At most one dispatch loop is alive per consumer; a new loop only starts
//! once the previous one has drained.
//!
//! A subscription can end without the channel failing, for instance when the broker
//! cancels the consumer. The dispatch loop then reports its session lost so the
//! supervisor replaces the channel and starts the consumer again.

use crate::{
    channel::{CloseNotifier, DeliveryStream},
    delivery::DeliveryHandler,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    logger::Logger,
    managed::{ChannelOwner, ManagedChannel},
    otel,
    queue::{QueueBinding, QueueDefinition},
    topology::AmqpTopology,
};
use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use lapin::types::FieldTable;
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use std::{
    borrow::Cow,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::Mutex, task::JoinHandle, time::timeout};

/// Marks the dispatch loop as idle. Delivery tags start at 1.
const NO_DELIVERY: u64 = 0;

/// Subscription options of a consumer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumeOptions {
    pub(crate) tag: String,
    pub(crate) auto_ack: bool,
    pub(crate) exclusive: bool,
    pub(crate) no_local: bool,
    pub(crate) no_wait: bool,
    pub(crate) args: FieldTable,
}

impl ConsumeOptions {
    pub fn new() -> ConsumeOptions {
        ConsumeOptions::default()
    }

    pub fn consumer_tag(&self) -> &str {
        &self.tag
    }

    pub fn is_auto_ack(&self) -> bool {
        self.auto_ack
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_no_local(&self) -> bool {
        self.no_local
    }

    pub fn is_no_wait(&self) -> bool {
        self.no_wait
    }

    pub fn args(&self) -> &FieldTable {
        &self.args
    }

    /// Sets the consumer tag. Defaults to the queue name.
    pub fn tag(mut self, tag: &str) -> Self {
        self.tag = tag.to_owned();
        self
    }

    /// Lets the broker consider deliveries acknowledged as soon as they are sent.
    pub fn auto_ack(mut self) -> Self {
        self.auto_ack = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn no_local(mut self) -> Self {
        self.no_local = true;
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    pub fn with_args(mut self, args: FieldTable) -> Self {
        self.args = args;
        self
    }
}

/// Everything a consumer declares and subscribes with.
///
/// Without an exchange the consumer reads straight from its queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumeConfig {
    pub(crate) queue: QueueDefinition,
    pub(crate) exchange: Option<ExchangeDefinition>,
    pub(crate) binding: QueueBinding,
    pub(crate) options: ConsumeOptions,
}

impl ConsumeConfig {
    /// Creates a configuration consuming from the given queue.
    pub fn new(queue: QueueDefinition) -> ConsumeConfig {
        ConsumeConfig {
            queue,
            ..ConsumeConfig::default()
        }
    }

    /// Binds the queue to this exchange.
    pub fn exchange(mut self, exchange: ExchangeDefinition) -> Self {
        self.exchange = Some(exchange);
        self
    }

    pub fn binding(mut self, binding: QueueBinding) -> Self {
        self.binding = binding;
        self
    }

    pub fn options(mut self, options: ConsumeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn queue_definition(&self) -> &QueueDefinition {
        &self.queue
    }

    pub fn exchange_definition(&self) -> Option<&ExchangeDefinition> {
        self.exchange.as_ref()
    }

    pub fn queue_binding(&self) -> &QueueBinding {
        &self.binding
    }

    pub fn consume_options(&self) -> &ConsumeOptions {
        &self.options
    }

    fn topology(&self) -> AmqpTopology<'_> {
        let topology = AmqpTopology::new(&self.queue);
        match &self.exchange {
            Some(exchange) => topology.exchange(exchange).queue_binding(&self.binding),
            None => topology,
        }
    }
}

/// Queue consumer that survives channel failures.
pub struct RabbitMQConsumer {
    channel: ManagedChannel,
    config: ConsumeConfig,
    handler: Arc<dyn DeliveryHandler>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    in_flight: Arc<AtomicU64>,
    drain_timeout: Duration,
}

impl RabbitMQConsumer {
    /// Creates a consumer. Nothing is declared until [`start`](RabbitMQConsumer::start).
    ///
    /// # Parameters
    /// * `channel` - The managed channel this consumer owns
    /// * `config` - Topology and subscription options
    /// * `handler` - Invoked for every delivery
    /// * `drain_timeout` - How long a restart waits for the previous dispatch loop
    pub fn new(
        channel: ManagedChannel,
        config: ConsumeConfig,
        handler: Arc<dyn DeliveryHandler>,
        drain_timeout: Duration,
    ) -> RabbitMQConsumer {
        RabbitMQConsumer {
            channel,
            config,
            handler,
            dispatch: Mutex::new(None),
            in_flight: Arc::new(AtomicU64::new(NO_DELIVERY)),
            drain_timeout,
        }
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }

    pub fn config(&self) -> &ConsumeConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Declares the topology, subscribes and starts the dispatch loop.
    ///
    /// # Returns
    /// Ok(()) once the dispatch loop is running, or the first declare/subscribe failure
    pub async fn start(&self) -> Result<(), AmqpError> {
        if self.channel.is_closed() {
            return Err(AmqpError::ChannelClosed);
        }

        let mut dispatch = self.dispatch.lock().await;
        if let Some(previous) = dispatch.take() {
            self.drain(previous).await;
        }

        let (channel, lost) = self.channel.session().await;
        let queue = self.config.topology().install(channel.as_ref()).await?;

        let mut options = self.config.options.clone();
        if options.tag.is_empty() {
            options.tag = self.config.queue.name.clone();
        }

        let deliveries = channel.basic_consume(&queue, &options).await?;
        self.channel.logger().debug(format_args!(
            "consuming from queue {} on channel {}",
            queue,
            channel.id()
        ));

        *dispatch = Some(tokio::spawn(dispatch_loop(
            deliveries,
            self.handler.clone(),
            self.channel.logger().clone(),
            queue,
            lost,
            self.in_flight.clone(),
        )));

        Ok(())
    }

    /// Closes the channel, which ends the subscription and the dispatch loop.
    pub async fn close(&self) -> Result<(), AmqpError> {
        self.channel.close().await
    }

    /// Waits for a previous dispatch loop to finish its in-flight delivery.
    async fn drain(&self, previous: JoinHandle<()>) {
        if previous.is_finished() {
            return;
        }

        let abort = previous.abort_handle();
        if timeout(self.drain_timeout, previous).await.is_ok() {
            return;
        }

        abort.abort();
        let logger = self.channel.logger();
        match self.in_flight.swap(NO_DELIVERY, Ordering::SeqCst) {
            NO_DELIVERY => logger.warn(format_args!(
                "previous dispatch loop did not stop within {:?}, aborted",
                self.drain_timeout
            )),
            tag => logger.warn(format_args!(
                "previous dispatch loop did not stop within {:?}, aborted while handling delivery {}",
                self.drain_timeout, tag
            )),
        }
    }
}

#[async_trait]
impl ChannelOwner for RabbitMQConsumer {
    fn managed_channel(&self) -> &ManagedChannel {
        &self.channel
    }

    async fn after_reconnect(&self) -> Result<(), AmqpError> {
        self.start().await
    }
}

/// Hands deliveries to the handler until the subscription ends, then reports the
/// session lost.
///
/// `in_flight` holds the tag of the delivery being handled, [`NO_DELIVERY`] between
/// deliveries.
async fn dispatch_loop(
    mut deliveries: DeliveryStream,
    handler: Arc<dyn DeliveryHandler>,
    logger: Logger,
    queue: String,
    lost: CloseNotifier,
    in_flight: Arc<AtomicU64>,
) {
    let tracer = global::tracer("amqp consumer");

    while let Some(result) = deliveries.next().await {
        let delivery = match result {
            Ok(delivery) => delivery,
            Err(err) => {
                logger.error(format_args!("errors consume msg: {}", err));
                continue;
            }
        };

        let tag = delivery.delivery_tag;
        logger.debug(format_args!("id={}, message received", tag));

        let (_, mut span) = otel::new_span(&delivery.properties, &tracer, &queue);

        in_flight.store(tag, Ordering::SeqCst);
        let outcome = AssertUnwindSafe(handler.handle(delivery))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(AmqpError::HandlerError("handler panicked".to_owned())));
        in_flight.store(NO_DELIVERY, Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                span.set_status(Status::Ok);
                logger.debug(format_args!("id={}, message processed", tag));
            }
            Err(err) => {
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from(err.to_string()),
                });
                logger.error(format_args!("id={}, error processing message: {}", tag, err));
            }
        }
    }

    logger.debug(format_args!("delivery stream of {} ended", queue));
    lost.notify(Some(AmqpError::ConsumerError(format!(
        "delivery stream of {} ended",
        queue
    ))));
}
