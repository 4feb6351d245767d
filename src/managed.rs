// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Managed Channels
//!
//! A `ManagedChannel` is the stable handle publishers and consumers use instead of a
//! raw channel. It holds the latest channel, the provider used to mint replacements,
//! and the component's logger.
//!
//! The channel reference sits behind a read/write lock: the reconnection supervisor is
//! its only writer, and readers always go through [`ManagedChannel::channel`], so a
//! publish that races a swap either uses the old channel (and fails because it is
//! closed) or the new one. Publishes are never queued across a swap.
//!
//! Every installed channel comes with a session notifier. Owners fire it when they
//! lose their use of the channel while the channel itself still looks healthy, for
//! example when the broker cancels a subscription. The supervisor treats it the same
//! way as a channel failure.

use crate::{
    channel::{AmqpChannel, ChannelProvider, CloseNotifier},
    errors::AmqpError,
    logger::Logger,
};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::RwLock;

/// The installed channel and the notifier of the session opened on it.
struct Session {
    channel: Arc<dyn AmqpChannel>,
    lost: CloseNotifier,
}

impl Session {
    fn new(channel: Arc<dyn AmqpChannel>) -> Session {
        Session {
            channel,
            lost: CloseNotifier::new(),
        }
    }
}

pub struct ManagedChannel {
    name: String,
    session: RwLock<Session>,
    provider: Arc<dyn ChannelProvider>,
    logger: Logger,
    closed: AtomicBool,
}

impl ManagedChannel {
    /// Wraps an initial channel.
    ///
    /// # Parameters
    /// * `name` - Name of the owning publisher or consumer
    /// * `channel` - The first channel
    /// * `provider` - Supplies replacement channels after a closure
    /// * `logger` - Logger of the owning component
    pub fn new(
        name: &str,
        channel: Arc<dyn AmqpChannel>,
        provider: Arc<dyn ChannelProvider>,
        logger: Logger,
    ) -> ManagedChannel {
        ManagedChannel {
            name: name.to_owned(),
            session: RwLock::new(Session::new(channel)),
            provider,
            logger,
            closed: AtomicBool::new(false),
        }
    }

    /// Requests a first channel from the provider and wraps it.
    pub async fn open(
        name: &str,
        provider: Arc<dyn ChannelProvider>,
        logger: Logger,
    ) -> Result<ManagedChannel, AmqpError> {
        let channel = provider.channel().await?;
        Ok(ManagedChannel::new(name, channel, provider, logger))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub(crate) fn provider(&self) -> &Arc<dyn ChannelProvider> {
        &self.provider
    }

    /// The latest channel installed.
    pub async fn channel(&self) -> Arc<dyn AmqpChannel> {
        self.session.read().await.channel.clone()
    }

    /// The latest channel together with the notifier its users fire once they can no
    /// longer work on it.
    pub(crate) async fn session(&self) -> (Arc<dyn AmqpChannel>, CloseNotifier) {
        let session = self.session.read().await;
        (session.channel.clone(), session.lost.clone())
    }

    /// Installs a replacement channel and starts a new session on it.
    pub(crate) async fn update_channel(&self, channel: Arc<dyn AmqpChannel>) {
        let mut current = self.session.write().await;
        self.logger.debug(format_args!(
            "channel {} replaced by channel {}",
            current.channel.id(),
            channel.id()
        ));
        *current = Session::new(channel);
    }

    /// True once [`close`](ManagedChannel::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closes the current channel and stops any further reconnection.
    ///
    /// Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), AmqpError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.logger.debug(format_args!("closing channel"));
        self.channel().await.close().await
    }
}

/// Shared behaviour of components built on a [`ManagedChannel`].
#[async_trait]
pub trait ChannelOwner: Send + Sync {
    fn managed_channel(&self) -> &ManagedChannel;

    /// Runs after the supervisor installed a replacement channel.
    async fn after_reconnect(&self) -> Result<(), AmqpError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.managed_channel().close().await
    }
}
