// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker used by the integration tests.
//!
//! It implements the channel and provider seams with just enough AMQP behaviour to
//! drive the client: idempotent declarations, routing through bindings, per-channel
//! unacked tracking with requeue on channel loss, scripted dial failures,
//! simulated channel kills and silent subscription cancels.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use lapin::BasicProperties;
use rabbit_client::{
    channel::{AmqpChannel, ChannelProvider, CloseNotifier, CloseSignal, DeliveryStream},
    delivery::{handler_fn, Acknowledger, Delivery, DeliveryHandler},
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    publisher::Message,
    queue::{QueueBinding, QueueDefinition},
    ConsumeOptions, RabbitMQConfigs,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub queue_declares: usize,
    pub exchange_declares: usize,
    pub binds: usize,
    pub consumes: usize,
    pub publishes: usize,
}

#[derive(Clone)]
struct Stored {
    exchange: String,
    routing_key: String,
    properties: BasicProperties,
    body: Vec<u8>,
    redelivered: bool,
}

struct Subscriber {
    channel: u16,
    auto_ack: bool,
    sender: mpsc::UnboundedSender<Delivery>,
}

struct Queue {
    definition: QueueDefinition,
    ready: VecDeque<Stored>,
    subscribers: Vec<Subscriber>,
}

struct Binding {
    exchange: String,
    queue: String,
    routing_key: String,
}

struct Unacked {
    channel: u16,
    queue: String,
    message: Stored,
}

#[derive(Default)]
struct State {
    next_channel: u16,
    next_tag: u64,
    next_queue: u64,
    channels: HashMap<u16, CloseNotifier>,
    queues: HashMap<String, Queue>,
    exchanges: HashMap<String, ExchangeDefinition>,
    bindings: Vec<Binding>,
    unacked: HashMap<u64, Unacked>,
    stats: Stats,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    dial_failures: AtomicUsize,
    dials: AtomicUsize,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

/// Shared handle to the in-memory broker. Cloning it shares the broker.
#[derive(Clone, Default)]
pub struct FakeBroker {
    inner: Arc<Inner>,
}

impl FakeBroker {
    pub fn new() -> FakeBroker {
        FakeBroker::default()
    }

    pub fn provider(&self) -> Arc<dyn ChannelProvider> {
        Arc::new(self.clone())
    }

    /// The next `count` channel requests fail with a connection error.
    pub fn fail_next_dials(&self, count: usize) {
        self.inner.dial_failures.store(count, Ordering::SeqCst);
    }

    /// Number of channel requests received, failed ones included.
    pub fn dials(&self) -> usize {
        self.inner.dials.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> Stats {
        self.inner.lock().stats
    }

    pub fn open_channels(&self) -> usize {
        self.inner.lock().channels.len()
    }

    pub fn ready(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    pub fn unacked(&self) -> usize {
        self.inner.lock().unacked.len()
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.inner.lock().queues.contains_key(queue)
    }

    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.inner.lock().exchanges.contains_key(exchange)
    }

    pub fn subscribers(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map(|q| q.subscribers.len())
            .unwrap_or(0)
    }

    /// Closes, with an error, every channel subscribed to `queue`.
    pub fn kill_consumers_of(&self, queue: &str) {
        let mut state = self.inner.lock();
        let ids: Vec<u16> = state
            .queues
            .get(queue)
            .map(|q| q.subscribers.iter().map(|s| s.channel).collect())
            .unwrap_or_default();

        for id in ids {
            close_channel(
                &self.inner,
                &mut state,
                id,
                Some(AmqpError::ChannelError("CHANNEL_ERROR - simulated".to_owned())),
            );
        }
    }

    /// Cancels every subscription on `queue` and leaves the channels open, as a broker
    /// does when the queue is deleted. Nothing is notified.
    pub fn cancel_consumers_of(&self, queue: &str) {
        if let Some(target) = self.inner.lock().queues.get_mut(queue) {
            target.subscribers.clear();
        }
    }

    /// Closes every open channel with an error, as a broker restart would.
    pub fn kill_all(&self) {
        let mut state = self.inner.lock();
        let ids: Vec<u16> = state.channels.keys().copied().collect();
        for id in ids {
            close_channel(
                &self.inner,
                &mut state,
                id,
                Some(AmqpError::ConnectionError("CONNECTION_FORCED - simulated".to_owned())),
            );
        }
    }
}

#[async_trait]
impl ChannelProvider for FakeBroker {
    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        self.inner.dials.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .inner
            .dial_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AmqpError::ConnectionError("connection refused".to_owned()));
        }

        let mut state = self.inner.lock();
        state.next_channel += 1;
        let id = state.next_channel;
        let notifier = CloseNotifier::new();
        state.channels.insert(id, notifier.clone());

        Ok(Arc::new(FakeChannel {
            id,
            notifier,
            inner: self.inner.clone(),
        }))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let mut state = self.inner.lock();
        let ids: Vec<u16> = state.channels.keys().copied().collect();
        for id in ids {
            close_channel(&self.inner, &mut state, id, None);
        }
        Ok(())
    }
}

pub struct FakeChannel {
    id: u16,
    notifier: CloseNotifier,
    inner: Arc<Inner>,
}

impl FakeChannel {
    fn open_state(&self) -> Result<MutexGuard<'_, State>, AmqpError> {
        if self.notifier.is_closed() {
            return Err(AmqpError::ChannelClosed);
        }
        Ok(self.inner.lock())
    }
}

#[async_trait]
impl AmqpChannel for FakeChannel {
    fn id(&self) -> u16 {
        self.id
    }

    fn is_open(&self) -> bool {
        !self.notifier.is_closed()
    }

    fn close_signal(&self) -> CloseSignal {
        self.notifier.subscribe()
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        let mut state = self.open_state()?;
        state.stats.queue_declares += 1;

        let name = if def.name().is_empty() {
            state.next_queue += 1;
            format!("amq.gen-{}", state.next_queue)
        } else {
            def.name().to_owned()
        };

        if let Some(existing) = state.queues.get(&name) {
            if existing.definition.is_durable() != def.is_durable()
                || existing.definition.args() != def.args()
            {
                return Err(AmqpError::DeclareQueueError(name));
            }
            return Ok(name);
        }

        state.queues.insert(
            name.clone(),
            Queue {
                definition: def.clone(),
                ready: VecDeque::new(),
                subscribers: vec![],
            },
        );
        Ok(name)
    }

    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let mut state = self.open_state()?;
        state.stats.exchange_declares += 1;

        if let Some(existing) = state.exchanges.get(def.name()) {
            if existing.exchange_kind() != def.exchange_kind()
                || existing.is_durable() != def.is_durable()
            {
                return Err(AmqpError::DeclareExchangeError(def.name().to_owned()));
            }
            return Ok(());
        }

        state.exchanges.insert(def.name().to_owned(), def.clone());
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        binding: &QueueBinding,
    ) -> Result<(), AmqpError> {
        let mut state = self.open_state()?;
        state.stats.binds += 1;

        if !state.queues.contains_key(queue) || !state.exchanges.contains_key(exchange) {
            return Err(AmqpError::BindingExchangeToQueueError(
                exchange.to_owned(),
                queue.to_owned(),
            ));
        }

        let exists = state.bindings.iter().any(|b| {
            b.exchange == exchange && b.queue == queue && b.routing_key == binding.routing_key()
        });
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_owned(),
                queue: queue.to_owned(),
                routing_key: binding.routing_key().to_owned(),
            });
        }
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        let mut state = self.open_state()?;
        state.stats.consumes += 1;

        let (sender, receiver) = mpsc::unbounded_channel();
        let Some(target) = state.queues.get_mut(queue) else {
            return Err(AmqpError::BindingConsumerError(queue.to_owned()));
        };
        target.subscribers.push(Subscriber {
            channel: self.id,
            auto_ack: options.is_auto_ack(),
            sender,
        });

        dispatch(&self.inner, &mut state, queue);

        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver
                .recv()
                .await
                .map(|delivery| (Ok::<_, AmqpError>(delivery), receiver))
        })
        .boxed())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        _mandatory: bool,
        _immediate: bool,
        message: &Message,
    ) -> Result<(), AmqpError> {
        let mut state = self.open_state()?;

        let targets: Vec<String> = if exchange.is_empty() {
            vec![routing_key.to_owned()]
        } else {
            let Some(def) = state.exchanges.get(exchange) else {
                return Err(AmqpError::PublishingError(format!(
                    "NOT_FOUND - no exchange '{}'",
                    exchange
                )));
            };
            let fanout = matches!(def.exchange_kind(), ExchangeKind::Fanout);
            state
                .bindings
                .iter()
                .filter(|b| b.exchange == exchange && (fanout || b.routing_key == routing_key))
                .map(|b| b.queue.clone())
                .collect()
        };

        state.stats.publishes += 1;
        for queue in targets {
            let Some(target) = state.queues.get_mut(&queue) else {
                continue;
            };
            target.ready.push_back(Stored {
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
                properties: message.properties.clone(),
                body: message.body.clone(),
                redelivered: false,
            });
            dispatch(&self.inner, &mut state, &queue);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let mut state = self.inner.lock();
        close_channel(&self.inner, &mut state, self.id, None);
        Ok(())
    }
}

struct FakeAcker {
    channel: u16,
    inner: Arc<Inner>,
}

impl FakeAcker {
    fn settle(&self, tag: u64, requeue: bool, on_error: AmqpError) -> Result<(), AmqpError> {
        let mut state = self.inner.lock();
        if !state.channels.contains_key(&self.channel) {
            return Err(on_error);
        }
        let Some(unacked) = state.unacked.remove(&tag) else {
            return Err(on_error);
        };

        if requeue {
            let queue = unacked.queue.clone();
            if let Some(target) = state.queues.get_mut(&queue) {
                target.ready.push_front(Stored {
                    redelivered: true,
                    ..unacked.message
                });
            }
            dispatch(&self.inner, &mut state, &queue);
        }
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for FakeAcker {
    async fn ack(&self, tag: u64, _multiple: bool) -> Result<(), AmqpError> {
        self.settle(tag, false, AmqpError::AckMessageError)
    }

    async fn nack(&self, tag: u64, _multiple: bool, requeue: bool) -> Result<(), AmqpError> {
        self.settle(tag, requeue, AmqpError::NackMessageError)
    }

    async fn reject(&self, tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.settle(tag, requeue, AmqpError::RejectMessageError)
    }
}

/// Pushes ready messages of `queue` to its subscribers, round robin.
fn dispatch(inner: &Arc<Inner>, state: &mut State, queue: &str) {
    loop {
        let Some(target) = state.queues.get_mut(queue) else {
            return;
        };
        if target.subscribers.is_empty() {
            return;
        }
        let Some(message) = target.ready.pop_front() else {
            return;
        };

        let subscriber = target.subscribers.remove(0);
        state.next_tag += 1;
        let tag = state.next_tag;

        let delivery = Delivery::new(
            tag,
            &message.exchange,
            &message.routing_key,
            message.redelivered,
            message.properties.clone(),
            message.body.clone(),
            Arc::new(FakeAcker {
                channel: subscriber.channel,
                inner: inner.clone(),
            }),
        );

        if subscriber.sender.send(delivery).is_err() {
            if let Some(target) = state.queues.get_mut(queue) {
                target.ready.push_front(message);
            }
            continue;
        }

        if !subscriber.auto_ack {
            state.unacked.insert(
                tag,
                Unacked {
                    channel: subscriber.channel,
                    queue: queue.to_owned(),
                    message,
                },
            );
        }

        if let Some(target) = state.queues.get_mut(queue) {
            target.subscribers.push(subscriber);
        }
    }
}

/// Closes one channel: ends its subscriptions and requeues what it left unacked.
fn close_channel(inner: &Arc<Inner>, state: &mut State, id: u16, error: Option<AmqpError>) {
    let Some(notifier) = state.channels.remove(&id) else {
        return;
    };

    for queue in state.queues.values_mut() {
        queue.subscribers.retain(|s| s.channel != id);
    }

    let mut tags: Vec<u64> = state
        .unacked
        .iter()
        .filter(|(_, u)| u.channel == id)
        .map(|(tag, _)| *tag)
        .collect();
    tags.sort_unstable();

    let mut touched = vec![];
    for tag in tags.into_iter().rev() {
        if let Some(unacked) = state.unacked.remove(&tag) {
            if let Some(queue) = state.queues.get_mut(&unacked.queue) {
                queue.ready.push_front(Stored {
                    redelivered: true,
                    ..unacked.message
                });
            }
            touched.push(unacked.queue);
        }
    }

    notifier.notify(error);

    touched.dedup();
    for queue in touched {
        dispatch(inner, state, &queue);
    }
}

/// Polls `condition` every few milliseconds, failing after two seconds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(waited.is_ok(), "condition not met in time");
}

/// Handler that records every body it sees, then acks.
pub fn recording_handler(received: Arc<Mutex<Vec<String>>>) -> Arc<dyn DeliveryHandler> {
    handler_fn(move |delivery: Delivery| {
        let received = received.clone();
        async move {
            received
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&delivery.data).into_owned());
            delivery.ack().await
        }
    })
}

/// Client configuration with a millisecond reconnect interval.
pub fn test_config() -> RabbitMQConfigs {
    RabbitMQConfigs::default().reconnect_interval(Duration::from_millis(10))
}
