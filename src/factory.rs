// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Pattern Factory
//!
//! Composition root of the crate. A [`PatternFactory`] holds the channel
//! provider and the process [`Lifecycle`], and hands out publishers and
//! delivery sessions configured for one of the three patterns:
//!
//! | Pattern | Exchange          | Ack | Queue                       | Binding keys            |
//! |---------|-------------------|-----|-----------------------------|-------------------------|
//! | fanout  | fanout, transient | no  | anonymous                   | none                    |
//! | task    | direct, durable   | yes | optional, shared by workers | explicit or queue name  |
//! | topic   | topic, durable    | yes | optional                    | required                |
//!
//! Every client gets its own channel.

use crate::{
    channel::{AmqpConnector, ChannelProvider},
    config::{Pattern, SessionConfig},
    connection::ConnectionConfig,
    dispatcher::RoutedPublisher,
    errors::AmqpError,
    lifecycle::Lifecycle,
    publisher::AmqpPublisher,
    routing::RouteMap,
    session::DeliverySession,
};
use tracing::debug;

/// Builds pattern clients sharing one channel provider and one lifecycle.
pub struct PatternFactory<P: ChannelProvider = AmqpConnector> {
    provider: P,
    lifecycle: Lifecycle,
}

impl PatternFactory<AmqpConnector> {
    /// Creates a factory over a broker connection.
    ///
    /// The connection is established right away unless the first host
    /// enables the `lazy` option.
    ///
    /// # Errors
    /// * `ConfigurationError` - a host definition is invalid
    /// * `ConnectionError` - no host accepted the connection
    pub async fn connect(cfg: &ConnectionConfig, lifecycle: Lifecycle) -> Result<Self, AmqpError> {
        let connector = AmqpConnector::new(cfg)?;

        if !connector.is_lazy() {
            connector.connect().await?;
        }

        Ok(PatternFactory::new(connector, lifecycle))
    }
}

impl<P: ChannelProvider> PatternFactory<P> {
    pub fn new(provider: P, lifecycle: Lifecycle) -> Self {
        PatternFactory {
            provider,
            lifecycle,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Publisher for an arbitrary configuration.
    pub async fn create_publisher(&self, cfg: SessionConfig) -> Result<AmqpPublisher, AmqpError> {
        let channel = self.provider.open_channel().await?;
        debug!(exchange = cfg.exchange().unwrap_or_default(), "publisher created");
        Ok(AmqpPublisher::new(channel, cfg))
    }

    /// Delivery session for an arbitrary configuration.
    ///
    /// # Errors
    /// * `ConfigurationError` - topic configuration without binding keys
    pub async fn create_session(&self, cfg: SessionConfig) -> Result<DeliverySession, AmqpError> {
        cfg.check_consumable()?;

        let channel = self.provider.open_channel().await?;
        debug!(
            exchange = cfg.exchange().unwrap_or_default(),
            queue = cfg.queue().unwrap_or_default(),
            "delivery session created"
        );
        Ok(DeliverySession::new(channel, cfg, self.lifecycle.clone()))
    }

    /// Publish/subscribe publisher on a transient fanout exchange.
    pub async fn create_fanout_publisher(&self, exchange: &str) -> Result<AmqpPublisher, AmqpError> {
        let cfg = Pattern::Fanout.builder().exchange(exchange).build()?;
        self.create_publisher(cfg).await
    }

    /// Subscriber receiving every message of a fanout exchange on its own
    /// anonymous queue, without ack.
    pub async fn create_fanout_subscriber(
        &self,
        exchange: &str,
    ) -> Result<DeliverySession, AmqpError> {
        let cfg = Pattern::Fanout.builder().exchange(exchange).build()?;
        self.create_session(cfg).await
    }

    /// Task publisher on a durable direct exchange, or the default exchange
    /// when `exchange` is `None`.
    pub async fn create_task_publisher(
        &self,
        exchange: Option<&str>,
        default_routing_key: Option<&str>,
    ) -> Result<AmqpPublisher, AmqpError> {
        let mut builder = Pattern::Task.builder().default_routing_key(default_routing_key);
        if let Some(exchange) = exchange {
            builder = builder.exchange(exchange);
        }
        self.create_publisher(builder.build()?).await
    }

    /// Competing consumer with ack. Workers given the same queue name share
    /// the load; without binding keys the queue is bound by its own name.
    pub async fn create_task_worker(
        &self,
        exchange: Option<&str>,
        queue: Option<&str>,
        binding_keys: &[&str],
    ) -> Result<DeliverySession, AmqpError> {
        let mut builder = Pattern::Task
            .builder()
            .queue(queue)
            .binding_keys(binding_keys.iter().copied());
        if let Some(exchange) = exchange {
            builder = builder.exchange(exchange);
        }
        self.create_session(builder.build()?).await
    }

    /// Topic publisher on a durable topic exchange.
    pub async fn create_topic_publisher(
        &self,
        exchange: &str,
        default_routing_key: Option<&str>,
    ) -> Result<AmqpPublisher, AmqpError> {
        let cfg = Pattern::Topic
            .builder()
            .exchange(exchange)
            .default_routing_key(default_routing_key)
            .build()?;
        self.create_publisher(cfg).await
    }

    /// Topic subscriber with ack, bound with each of the binding patterns.
    pub async fn create_topic_subscriber(
        &self,
        exchange: &str,
        queue: Option<&str>,
        binding_keys: &[&str],
    ) -> Result<DeliverySession, AmqpError> {
        let cfg = Pattern::Topic
            .builder()
            .exchange(exchange)
            .queue(queue)
            .binding_keys(binding_keys.iter().copied())
            .build()?;
        self.create_session(cfg).await
    }

    /// Publisher choosing exchange and routing key from the message type.
    pub async fn create_routed_publisher<M: RouteMap>(
        &self,
        routes: M,
    ) -> Result<RoutedPublisher<M>, AmqpError> {
        let channel = self.provider.open_channel().await?;
        Ok(RoutedPublisher::new(channel, routes))
    }
}
