// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Client
//!
//! The client is the entry point of the crate. It owns the shared broker connection,
//! builds publishers and consumers on channels of that connection, attaches a
//! reconnection supervisor to each of them and keeps a registry of everything it
//! created so that [`RabbitMQClient::close`] can shut the whole set down.
//!
//! ```no_run
//! use rabbit_client::{
//!     client::RabbitMQClient, config::RabbitMQConfigs, consumer::ConsumeConfig,
//!     delivery::handler_fn, publisher::{Message, PublishConfig}, queue::QueueDefinition,
//! };
//!
//! # async fn run() -> Result<(), rabbit_client::errors::AmqpError> {
//! let client = RabbitMQClient::new(RabbitMQConfigs::from_env()?);
//!
//! let publisher = client
//!     .new_publisher("orders", PublishConfig::new("", "orders"))
//!     .await?;
//!
//! let _consumer = client
//!     .new_consumer(
//!         "orders",
//!         ConsumeConfig::new(QueueDefinition::new("orders").durable()),
//!         handler_fn(|delivery| async move { delivery.ack().await }),
//!     )
//!     .await?;
//!
//! publisher.publish(Message::new("hello"), None).await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

use crate::{
    channel::ChannelProvider,
    config::RabbitMQConfigs,
    connection::BrokerConnection,
    consumer::{ConsumeConfig, RabbitMQConsumer},
    delivery::DeliveryHandler,
    errors::AmqpError,
    logger::{Logger, LOG_NAME},
    managed::{ChannelOwner, ManagedChannel},
    publisher::{PublishConfig, RabbitMQPublisher},
    supervisor,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Mutex;

pub struct RabbitMQClient {
    config: RabbitMQConfigs,
    provider: Arc<dyn ChannelProvider>,
    logger: Logger,
    channels: Mutex<Vec<Arc<dyn ChannelOwner>>>,
    closed: AtomicBool,
}

impl RabbitMQClient {
    /// Creates a client for the configured broker. The connection is dialed on the
    /// first publisher or consumer.
    pub fn new(config: RabbitMQConfigs) -> RabbitMQClient {
        let logger = Logger::new(LOG_NAME, config.log_level);
        let provider = Arc::new(BrokerConnection::new(config.clone(), logger.named("connection")));
        RabbitMQClient::build(config, provider, logger)
    }

    /// Creates a client minting its channels from `provider`.
    pub fn with_provider(config: RabbitMQConfigs, provider: Arc<dyn ChannelProvider>) -> RabbitMQClient {
        let logger = Logger::new(LOG_NAME, config.log_level);
        RabbitMQClient::build(config, provider, logger)
    }

    fn build(config: RabbitMQConfigs, provider: Arc<dyn ChannelProvider>, logger: Logger) -> RabbitMQClient {
        RabbitMQClient {
            config,
            provider,
            logger,
            channels: Mutex::new(vec![]),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RabbitMQConfigs {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Creates a publisher on its own channel.
    ///
    /// # Parameters
    /// * `name` - Publisher name, used in its logger
    /// * `config` - Target exchange, routing and dead letter settings
    ///
    /// # Returns
    /// The publisher, the failure to obtain its first channel, or
    /// `AmqpError::ChannelClosed` when the client was closed meanwhile
    pub async fn new_publisher(
        &self,
        name: &str,
        config: PublishConfig,
    ) -> Result<Arc<RabbitMQPublisher>, AmqpError> {
        let channel = self.open_channel(name).await?;
        let publisher = Arc::new(RabbitMQPublisher::new(channel, config));

        self.register(publisher.clone()).await?;
        self.logger
            .debug(format_args!("publisher {} created", name));

        Ok(publisher)
    }

    /// Creates and starts a consumer on its own channel.
    ///
    /// The topology is declared and the subscription opened before this returns, so
    /// a declare or subscribe failure is reported here and the channel closed.
    ///
    /// # Parameters
    /// * `name` - Consumer name, used in its logger
    /// * `config` - Queue, optional exchange and binding, subscription options
    /// * `handler` - Invoked for every delivery
    pub async fn new_consumer(
        &self,
        name: &str,
        config: ConsumeConfig,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<Arc<RabbitMQConsumer>, AmqpError> {
        let channel = self.open_channel(name).await?;
        let consumer = Arc::new(RabbitMQConsumer::new(
            channel,
            config,
            handler,
            self.config.drain_timeout,
        ));

        if let Err(err) = consumer.start().await {
            self.logger
                .error(format_args!("failure to start consumer {}: {}", name, err));
            if let Err(close_err) = consumer.close().await {
                self.logger.debug(format_args!(
                    "error closing channel of consumer {}: {}",
                    name, close_err
                ));
            }
            return Err(err);
        }

        self.register(consumer.clone()).await?;
        self.logger.debug(format_args!("consumer {} started", name));

        Ok(consumer)
    }

    /// Closes every publisher and consumer created by this client, then the connection.
    ///
    /// Failures are logged; closing twice is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let owners = std::mem::take(&mut *self.channels.lock().await);
        self.logger
            .debug(format_args!("closing {} channel(s)", owners.len()));

        for owner in owners {
            if let Err(err) = owner.close().await {
                self.logger.warn(format_args!(
                    "error closing channel {}: {}",
                    owner.managed_channel().name(),
                    err
                ));
            }
        }

        if let Err(err) = self.provider.close().await {
            self.logger
                .warn(format_args!("error closing connection: {}", err));
        }
    }

    async fn open_channel(&self, name: &str) -> Result<ManagedChannel, AmqpError> {
        if self.is_closed() {
            return Err(AmqpError::ChannelClosed);
        }

        ManagedChannel::open(name, self.provider.clone(), self.logger.named(name)).await
    }

    /// Attaches a supervisor to `owner` and records it for [`close`](RabbitMQClient::close).
    ///
    /// An owner created while the client was closing is closed instead.
    async fn register(&self, owner: Arc<dyn ChannelOwner>) -> Result<(), AmqpError> {
        let mut channels = self.channels.lock().await;
        if self.is_closed() {
            drop(channels);
            let name = owner.managed_channel().name().to_owned();
            self.logger
                .debug(format_args!("client closed while creating {}", name));
            if let Err(err) = owner.close().await {
                self.logger
                    .warn(format_args!("error closing channel {}: {}", name, err));
            }
            return Err(AmqpError::ChannelClosed);
        }

        supervisor::watch(owner.clone(), self.config.reconnect_interval);
        channels.push(owner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{AmqpChannel, CloseNotifier, MockAmqpChannel, MockChannelProvider},
        delivery::handler_fn,
        publisher::Message,
        queue::QueueDefinition,
    };
    use async_trait::async_trait;
    use std::{sync::atomic::AtomicUsize, time::Duration};
    use tokio::time::sleep;

    /// Hands out channels after a delay, counting how many it closed.
    struct SlowProvider {
        delay: Duration,
        closed_channels: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChannelProvider for SlowProvider {
        async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
            sleep(self.delay).await;
            let closed = self.closed_channels.clone();
            let mut channel = MockAmqpChannel::new();
            channel.expect_id().return_const(7u16);
            channel
                .expect_close_signal()
                .returning(|| CloseNotifier::new().subscribe());
            channel.expect_close().times(1).returning(move || {
                closed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(Arc::new(channel))
        }

        async fn close(&self) -> Result<(), AmqpError> {
            Ok(())
        }
    }

    fn closable_channel() -> Arc<dyn AmqpChannel> {
        let notifier = CloseNotifier::new();
        let mut channel = MockAmqpChannel::new();
        channel.expect_id().return_const(1u16);
        let signal = notifier.clone();
        channel
            .expect_close_signal()
            .returning(move || signal.subscribe());
        channel.expect_close().times(1).returning(move || {
            notifier.notify(None);
            Ok(())
        });
        Arc::new(channel)
    }

    fn config() -> RabbitMQConfigs {
        RabbitMQConfigs::default().reconnect_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn close_closes_channels_and_connection() {
        let mut provider = MockChannelProvider::new();
        provider
            .expect_channel()
            .times(1)
            .returning(|| Ok(closable_channel()));
        provider.expect_close().times(1).returning(|| Ok(()));

        let client = RabbitMQClient::with_provider(config(), Arc::new(provider));
        let publisher = client
            .new_publisher("orders", PublishConfig::new("", "orders"))
            .await
            .unwrap();

        client.close().await;
        client.close().await;

        assert!(publisher.is_closed());
        assert_eq!(
            publisher.publish(Message::new("late"), None).await,
            Err(AmqpError::ChannelClosed)
        );
        assert!(matches!(
            client
                .new_publisher("late", PublishConfig::default())
                .await
                .err(),
            Some(AmqpError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn consumer_start_failure_is_returned() {
        let mut provider = MockChannelProvider::new();
        provider.expect_channel().times(1).returning(|| {
            let mut channel = MockAmqpChannel::new();
            channel.expect_id().return_const(1u16);
            channel
                .expect_queue_declare()
                .returning(|def| Err(AmqpError::DeclareQueueError(def.name().to_owned())));
            channel.expect_close().times(1).returning(|| Ok(()));
            Ok(Arc::new(channel) as Arc<dyn AmqpChannel>)
        });
        provider.expect_close().returning(|| Ok(()));

        let client = RabbitMQClient::with_provider(config(), Arc::new(provider));

        let err = client
            .new_consumer(
                "jobs",
                ConsumeConfig::new(QueueDefinition::new("jobs")),
                handler_fn(|_| async { Ok(()) }),
            )
            .await
            .err();

        assert_eq!(err, Some(AmqpError::DeclareQueueError("jobs".to_owned())));
        assert!(client.channels.lock().await.is_empty());
    }

    #[tokio::test]
    async fn connection_failure_is_returned() {
        let mut provider = MockChannelProvider::new();
        provider
            .expect_channel()
            .times(1)
            .returning(|| Err(AmqpError::ConnectionError("refused".to_owned())));

        let client = RabbitMQClient::with_provider(config(), Arc::new(provider));

        assert!(matches!(
            client
                .new_publisher("orders", PublishConfig::default())
                .await
                .err(),
            Some(AmqpError::ConnectionError(_))
        ));
    }

    #[tokio::test]
    async fn publisher_created_during_close_is_closed() {
        let closed_channels = Arc::new(AtomicUsize::new(0));
        let client = Arc::new(RabbitMQClient::with_provider(
            config(),
            Arc::new(SlowProvider {
                delay: Duration::from_millis(100),
                closed_channels: closed_channels.clone(),
            }),
        ));

        let creating = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .new_publisher("orders", PublishConfig::new("", "orders"))
                    .await
            })
        };
        sleep(Duration::from_millis(20)).await;
        client.close().await;

        let result = creating.await.unwrap();

        assert!(matches!(result.err(), Some(AmqpError::ChannelClosed)));
        assert_eq!(closed_channels.load(Ordering::SeqCst), 1);
        assert!(client.channels.lock().await.is_empty());
    }
}
