// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Declaration
//!
//! This module declares the broker-side topology a delivery session consumes
//! from: its queue, its exchange and the bindings between them.
//!
//! The rules are:
//! - a named queue is durable and shared, an anonymous one exclusive and transient
//! - the exchange is only declared when it has a name and auto-declare is on
//! - the queue is bound once per binding key, or with its own name as the key
//!   when no key is configured (direct exchanges where queue name = routing key)
//! - nothing is bound on the default exchange, which routes by queue name already
//!
//! Every declaration is idempotent, so installing the same topology twice is harmless.

use crate::{
    channel::AmqpChannel,
    config::SessionConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use tracing::debug;

/// The exchange, queue and binding keys of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub(crate) queue: QueueDefinition,
    pub(crate) exchange: Option<ExchangeDefinition>,
    pub(crate) declare_exchange: bool,
    pub(crate) binding_keys: Vec<String>,
}

impl Topology {
    /// Derives the topology from a session configuration.
    pub fn for_session(cfg: &SessionConfig) -> Topology {
        Topology {
            queue: cfg.queue_definition(),
            exchange: cfg.exchange_definition(),
            declare_exchange: cfg.declares_exchange(),
            binding_keys: cfg.binding_keys().to_vec(),
        }
    }

    pub fn queue(&self) -> &QueueDefinition {
        &self.queue
    }

    /// The exchange that [`Topology::install`] declares, if any.
    pub fn exchange_to_declare(&self) -> Option<&ExchangeDefinition> {
        self.exchange.as_ref().filter(|_| self.declare_exchange)
    }

    /// Bindings for a queue once its name is known.
    pub fn bindings(&self, queue_name: &str) -> Vec<QueueBinding> {
        let Some(exchange) = &self.exchange else {
            return vec![];
        };

        let binding = QueueBinding::new(queue_name).exchange(exchange.name());

        if self.binding_keys.is_empty() {
            return vec![binding.routing_key(queue_name)];
        }

        self.binding_keys
            .iter()
            .map(|key| binding.clone().routing_key(key))
            .collect()
    }

    /// Installs the topology on the broker.
    ///
    /// This method performs the following operations in order:
    /// 1. Declares the queue
    /// 2. Declares the exchange, when auto-declare is enabled
    /// 3. Binds the queue to the exchange
    ///
    /// # Returns
    /// The queue name, generated by the broker for anonymous queues
    pub async fn install(&self, channel: &dyn AmqpChannel) -> Result<String, AmqpError> {
        let queue_name = channel.queue_declare(&self.queue).await?;
        debug!("queue: {} was created", queue_name);

        if let Some(exchange) = self.exchange_to_declare() {
            channel.exchange_declare(exchange).await?;
            debug!("exchange: {} was created", exchange.name());
        }

        for binding in self.bindings(&queue_name) {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name(),
                binding.exchange_name(),
                binding.key()
            );
            channel.queue_bind(&binding).await?;
        }

        Ok(queue_name)
    }
}

/// Declares the queue, exchange and bindings a session consumes from.
///
/// # Returns
/// The name of the queue to consume
pub async fn prepare_queue(
    channel: &dyn AmqpChannel,
    cfg: &SessionConfig,
) -> Result<String, AmqpError> {
    Topology::for_session(cfg).install(channel).await
}
