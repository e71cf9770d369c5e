// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Pattern Client Base
//!
//! Every publisher and delivery session embeds a [`Client`]: the single owner of
//! a broker channel plus the exchange the pattern works against. The channel is
//! released exactly once, either through [`Client::close`] or when the client
//! is dropped.

use crate::{channel::AmqpChannel, errors::AmqpError, exchange::ExchangeDefinition};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, warn};

/// Channel owner shared by the publishing and consuming clients.
pub struct Client {
    channel: Arc<dyn AmqpChannel>,
    exchange: Option<ExchangeDefinition>,
    declare_exchange: bool,
    closed: AtomicBool,
}

impl Client {
    /// Creates a client on its own channel.
    ///
    /// # Parameters
    /// * `channel` - A channel dedicated to this client
    /// * `exchange` - The exchange to work against, `None` for the default exchange
    /// * `declare_exchange` - Whether the client declares the exchange itself
    pub fn new(
        channel: Arc<dyn AmqpChannel>,
        exchange: Option<ExchangeDefinition>,
        declare_exchange: bool,
    ) -> Self {
        Client {
            channel,
            exchange,
            declare_exchange,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn channel(&self) -> &dyn AmqpChannel {
        self.channel.as_ref()
    }

    pub fn exchange(&self) -> Option<&ExchangeDefinition> {
        self.exchange.as_ref()
    }

    /// Name to publish to, empty for the default exchange.
    pub fn exchange_name(&self) -> &str {
        self.exchange.as_ref().map(|e| e.name()).unwrap_or_default()
    }

    /// Exchange to declare, if any: named and auto-declare enabled.
    pub(crate) fn exchange_to_declare(&self) -> Option<&ExchangeDefinition> {
        self.exchange
            .as_ref()
            .filter(|e| self.declare_exchange && !e.name().is_empty())
    }

    /// Declares the exchange when needed. Safe to repeat.
    pub async fn declare_exchange(&self) -> Result<(), AmqpError> {
        match self.exchange_to_declare() {
            Some(def) => self.channel.exchange_declare(def).await,
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closes the channel. Only the first call reaches the broker.
    pub async fn close(&self) -> Result<(), AmqpError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.channel.close().await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let channel = self.channel.clone();
                handle.spawn(async move {
                    if let Err(err) = channel.close().await {
                        debug!(error = err.to_string(), "channel close on drop failed");
                    }
                });
            }
            Err(_) => warn!("client dropped outside a runtime, channel left to the connection"),
        }
    }
}
