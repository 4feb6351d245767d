// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Capability
//!
//! This module defines the channel operations the client relies on, the close
//! notification every channel carries, and the lapin-backed implementation.
//!
//! Client code never holds a raw lapin channel. Publishers and consumers go through a
//! [`ManagedChannel`](crate::managed::ManagedChannel), which swaps the channel it points
//! at whenever the reconnection supervisor obtains a new one.

use crate::{
    consumer::ConsumeOptions,
    delivery::{Acknowledger, Delivery},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    publisher::Message,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};

/// Reply code sent when the client closes a channel or connection on purpose.
pub const REPLY_SUCCESS: u16 = 200;

/// Stream of deliveries produced by a queue subscription.
///
/// The stream ends once the channel it was opened on is closed.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Lifecycle of a channel as seen by its watchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    /// `None` when the client closed the channel itself, the failure otherwise.
    Closed(Option<AmqpError>),
}

/// Write side of a channel's close notification.
///
/// Only the first notification is recorded; later ones are ignored.
#[derive(Debug, Clone)]
pub struct CloseNotifier {
    state: Arc<watch::Sender<ChannelState>>,
}

impl CloseNotifier {
    pub fn new() -> CloseNotifier {
        let (state, _) = watch::channel(ChannelState::Open);
        CloseNotifier {
            state: Arc::new(state),
        }
    }

    /// Marks the channel closed.
    ///
    /// # Parameters
    /// * `error` - The failure that closed the channel, `None` for an intentional close
    ///
    /// # Returns
    /// true when this call performed the transition
    pub fn notify(&self, error: Option<AmqpError>) -> bool {
        self.state.send_if_modified(move |state| {
            if *state == ChannelState::Open {
                *state = ChannelState::Closed(error);
                true
            } else {
                false
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.state.borrow() != ChannelState::Open
    }

    pub fn subscribe(&self) -> CloseSignal {
        CloseSignal {
            state: self.state.subscribe(),
        }
    }
}

impl Default for CloseNotifier {
    fn default() -> Self {
        CloseNotifier::new()
    }
}

/// Read side of a channel's close notification.
#[derive(Debug)]
pub struct CloseSignal {
    state: watch::Receiver<ChannelState>,
}

impl CloseSignal {
    /// Waits until the channel is closed.
    ///
    /// A close that happened before the signal was obtained is reported immediately.
    ///
    /// # Returns
    /// The error that closed the channel, or `None` when it was closed on purpose
    pub async fn closed(mut self) -> Option<AmqpError> {
        let state = match self
            .state
            .wait_for(|state| *state != ChannelState::Open)
            .await
        {
            Ok(state) => state.clone(),
            Err(_) => ChannelState::Closed(None),
        };

        match state {
            ChannelState::Closed(error) => error,
            ChannelState::Open => None,
        }
    }
}

/// Channel operations used by publishers and consumers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    /// Channel number, for logging.
    fn id(&self) -> u16;

    fn is_open(&self) -> bool;

    /// Returns a handle that resolves when this channel closes.
    fn close_signal(&self) -> CloseSignal;

    /// Declares a queue and returns its name, as generated by the broker for unnamed queues.
    async fn queue_declare(&self, def: &QueueDefinition) -> Result<String, AmqpError>;

    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        binding: &QueueBinding,
    ) -> Result<(), AmqpError>;

    async fn basic_consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        immediate: bool,
        message: &Message,
    ) -> Result<(), AmqpError>;

    /// Closes the channel. Closing an already closed channel is not an error.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// Mints fresh channels on demand.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;

    /// Releases the underlying connection.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// [`AmqpChannel`] backed by a lapin channel.
pub struct LapinChannel {
    inner: lapin::Channel,
    notifier: CloseNotifier,
}

impl LapinChannel {
    /// Wraps a lapin channel.
    ///
    /// The notifier fires when the broker closes the channel (`Channel.Close`), when
    /// the connection drops, or when a failed operation leaves the channel closed.
    ///
    /// # Parameters
    /// * `inner` - The lapin channel
    /// * `notifier` - Also fired by the connection's error handler
    pub fn new(inner: lapin::Channel, notifier: CloseNotifier) -> LapinChannel {
        let on_error = notifier.clone();
        inner.on_error(move |err| {
            on_error.notify(Some(AmqpError::ChannelError(err.to_string())));
        });

        LapinChannel { inner, notifier }
    }

    fn observe(&self, err: &lapin::Error) {
        observe(&self.inner, &self.notifier, err);
    }
}

/// Fires the close notification if a failed operation left the channel closed.
fn observe(channel: &lapin::Channel, notifier: &CloseNotifier, err: &lapin::Error) {
    if !channel.status().connected() {
        notifier.notify(Some(AmqpError::ChannelError(err.to_string())));
    }
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    fn id(&self) -> u16 {
        self.inner.id()
    }

    fn is_open(&self) -> bool {
        !self.notifier.is_closed() && self.inner.status().connected()
    }

    fn close_signal(&self) -> CloseSignal {
        self.notifier.subscribe()
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        match self
            .inner
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.auto_delete,
                    nowait: def.no_wait,
                },
                def.args.clone(),
            )
            .await
        {
            Ok(queue) => Ok(queue.name().as_str().to_owned()),
            Err(err) => {
                error!(error = err.to_string(), name = def.name.as_str(), "error to declare the queue");
                self.observe(&err);
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
        }
    }

    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        match self
            .inner
            .exchange_declare(
                &def.name,
                lapin::ExchangeKind::from(&def.kind),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: def.auto_delete,
                    internal: def.internal,
                    nowait: def.no_wait,
                },
                def.args.clone(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the exchange"
                );
                self.observe(&err);
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        binding: &QueueBinding,
    ) -> Result<(), AmqpError> {
        match self
            .inner
            .queue_bind(
                queue,
                exchange,
                &binding.routing_key,
                QueueBindOptions {
                    nowait: binding.no_wait,
                },
                binding.args.clone(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                self.observe(&err);
                Err(AmqpError::BindingExchangeToQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn basic_consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = match self
            .inner
            .basic_consume(
                queue,
                &options.tag,
                BasicConsumeOptions {
                    no_local: options.no_local,
                    no_ack: options.auto_ack,
                    exclusive: options.exclusive,
                    nowait: options.no_wait,
                },
                options.args.clone(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                self.observe(&err);
                Err(AmqpError::BindingConsumerError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        let acker: Arc<dyn Acknowledger> = Arc::new(LapinAcker {
            channel: self.inner.clone(),
            notifier: self.notifier.clone(),
        });
        let channel = self.inner.clone();
        let notifier = self.notifier.clone();

        Ok(consumer
            .map(move |result| match result {
                Ok(delivery) => Ok(Delivery::new(
                    delivery.delivery_tag,
                    delivery.exchange.as_str(),
                    delivery.routing_key.as_str(),
                    delivery.redelivered,
                    delivery.properties,
                    delivery.data,
                    acker.clone(),
                )),
                Err(err) => {
                    if !channel.status().connected() {
                        notifier.notify(Some(AmqpError::ConsumerError(err.to_string())));
                    }
                    Err(AmqpError::ConsumerError(err.to_string()))
                }
            })
            .boxed())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        immediate: bool,
        message: &Message,
    ) -> Result<(), AmqpError> {
        match self
            .inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory,
                    immediate,
                },
                &message.body,
                message.properties.clone(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                self.observe(&err);
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.notifier.notify(None);

        if !self.inner.status().connected() {
            debug!(channel = self.inner.id(), "channel already closed");
            return Ok(());
        }

        self.inner
            .close(REPLY_SUCCESS, "closed by client")
            .await
            .map_err(|err| AmqpError::ChannelError(err.to_string()))
    }
}

/// Settles deliveries on the lapin channel they arrived on.
struct LapinAcker {
    channel: lapin::Channel,
    notifier: CloseNotifier,
}

#[async_trait]
impl Acknowledger for LapinAcker {
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple })
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                observe(&self.channel, &self.notifier, &err);
                AmqpError::AckMessageError
            })
    }

    async fn nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), AmqpError> {
        self.channel
            .basic_nack(delivery_tag, BasicNackOptions { multiple, requeue })
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                observe(&self.channel, &self.notifier, &err);
                AmqpError::NackMessageError
            })
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling reject msg");
                observe(&self.channel, &self.notifier, &err);
                AmqpError::RejectMessageError
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_resolves_with_failure() {
        let notifier = CloseNotifier::new();
        let signal = notifier.subscribe();

        let waiter = tokio::spawn(signal.closed());
        assert!(notifier.notify(Some(AmqpError::ChannelError("broker went away".to_owned()))));

        assert_eq!(
            waiter.await.unwrap(),
            Some(AmqpError::ChannelError("broker went away".to_owned()))
        );
        assert!(notifier.is_closed());
    }

    #[tokio::test]
    async fn first_close_wins() {
        let notifier = CloseNotifier::new();

        assert!(notifier.notify(None));
        assert!(!notifier.notify(Some(AmqpError::ChannelClosed)));

        assert_eq!(notifier.subscribe().closed().await, None);
    }

    #[tokio::test]
    async fn late_subscribers_see_earlier_close() {
        let notifier = CloseNotifier::new();
        notifier.notify(Some(AmqpError::ChannelClosed));

        let closed = tokio::time::timeout(Duration::from_secs(1), notifier.subscribe().closed())
            .await
            .unwrap();

        assert_eq!(closed, Some(AmqpError::ChannelClosed));
    }

    #[tokio::test]
    async fn open_channel_does_not_resolve() {
        let notifier = CloseNotifier::new();

        let pending =
            tokio::time::timeout(Duration::from_millis(20), notifier.subscribe().closed()).await;

        assert!(pending.is_err());
        assert!(!notifier.is_closed());
    }
}
