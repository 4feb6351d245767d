// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Reconnection Supervisor
//!
//! One supervisor task runs per managed channel for as long as its owner lives. It
//! waits for the current channel to close, or for its owner to report the session on
//! that channel lost, and then:
//!
//! 1. stops if the close was intentional (no error) or the owner was closed;
//! 2. otherwise asks the provider for a new channel, sleeping a fixed interval after
//!    each failure, without any limit on attempts;
//! 3. installs the new channel and runs the owner's `after_reconnect` hook. A failing
//!    hook closes the new channel and goes back to step 2 after the interval;
//! 4. waits on the new channel again.
//!
//! Nothing that fails inside this loop is returned; everything is logged.

use crate::{
    channel::AmqpChannel,
    managed::{ChannelOwner, ManagedChannel},
};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::sleep};

/// Spawns the supervisor for `owner`'s managed channel.
///
/// # Parameters
/// * `owner` - The publisher or consumer whose channel is watched
/// * `interval` - Fixed delay between two reconnection attempts
///
/// # Returns
/// The handle of the supervisor task; it finishes when the channel is closed on purpose
pub fn watch(owner: Arc<dyn ChannelOwner>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(supervise(owner, interval))
}

async fn supervise(owner: Arc<dyn ChannelOwner>, interval: Duration) {
    let managed = owner.managed_channel();
    let logger = managed.logger().clone();

    loop {
        let (channel, lost) = managed.session().await;
        logger.debug(format_args!("watching channel {}", channel.id()));

        let closed = tokio::select! {
            closed = channel.close_signal().closed() => closed,
            session = lost.subscribe().closed() => session,
        };

        let Some(err) = closed else {
            logger.debug(format_args!("channel {} closed, stop watching", channel.id()));
            return;
        };

        if managed.is_closed() {
            logger.debug(format_args!("channel closed by client, stop watching"));
            return;
        }

        logger.warn(format_args!(
            "channel {} closed: {}, reconnecting",
            channel.id(),
            err
        ));

        if channel.is_open() {
            discard(channel).await;
        }

        if !reconnect(owner.as_ref(), managed, interval).await {
            return;
        }
    }
}

/// Retries until a new channel is installed and the owner resumed on it.
///
/// # Returns
/// false when the owner was closed while reconnecting
async fn reconnect(owner: &dyn ChannelOwner, managed: &ManagedChannel, interval: Duration) -> bool {
    let logger = managed.logger();
    let mut attempt: u64 = 0;

    loop {
        if managed.is_closed() {
            return false;
        }
        attempt += 1;

        let channel = match managed.provider().channel().await {
            Ok(channel) => channel,
            Err(err) => {
                logger.error(format_args!(
                    "reconnection attempt {} failed: {}, retrying in {:?}",
                    attempt, err, interval
                ));
                sleep(interval).await;
                continue;
            }
        };

        if managed.is_closed() {
            discard(channel).await;
            return false;
        }

        managed.update_channel(channel.clone()).await;

        match owner.after_reconnect().await {
            Ok(()) => {
                logger.info(format_args!(
                    "reconnected on channel {} after {} attempt(s)",
                    channel.id(),
                    attempt
                ));
                return true;
            }
            Err(err) => {
                logger.error(format_args!(
                    "failure to resume on channel {}: {}, retrying in {:?}",
                    channel.id(),
                    err,
                    interval
                ));
                discard(channel).await;
                sleep(interval).await;
            }
        }
    }
}

async fn discard(channel: Arc<dyn AmqpChannel>) {
    if let Err(err) = channel.close().await {
        tracing::debug!(error = err.to_string(), "error closing discarded channel");
    }
}
