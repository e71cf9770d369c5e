// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Pattern Publisher
//!
//! This module provides the publishing side of the messaging patterns.
//! A publisher sends each message exactly once to its pattern's exchange,
//! fire-and-forget: there is no delivery confirmation and no retry. The
//! current OpenTelemetry context travels in the message headers.

use crate::{
    channel::AmqpChannel,
    client::Client,
    config::SessionConfig,
    errors::AmqpError,
    message::{MessageProperties, JSON_CONTENT_TYPE, PROPERTY_CONTENT_TYPE, PROPERTY_MESSAGE_ID},
    otel,
};
use async_trait::async_trait;
use opentelemetry::Context;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error};
use uuid::Uuid;

/// Sends messages to a pattern's exchange.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes one message.
    ///
    /// # Parameters
    /// * `body` - Message payload
    /// * `properties` - Message properties (app_id, content_type, message_id, type...)
    /// * `routing_key` - Overrides the configured default routing key
    async fn publish(
        &self,
        body: &[u8],
        properties: MessageProperties,
        routing_key: Option<&str>,
    ) -> Result<(), AmqpError>;
}

/// Publisher working on its own channel.
pub struct AmqpPublisher {
    client: Client,
    config: SessionConfig,
    exchange_declared: OnceCell<()>,
}

impl AmqpPublisher {
    /// Creates a publisher owning the given channel.
    ///
    /// # Parameters
    /// * `channel` - A channel dedicated to this publisher
    /// * `config` - The pattern configuration
    pub fn new(channel: Arc<dyn AmqpChannel>, config: SessionConfig) -> Self {
        let client = Client::new(
            channel,
            config.exchange_definition(),
            config.declares_exchange(),
        );

        AmqpPublisher {
            client,
            config,
            exchange_declared: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn exchange_name(&self) -> &str {
        self.client.exchange_name()
    }

    /// Effective routing key: explicit, else the configured default, else empty.
    pub fn routing_key<'a>(&'a self, explicit: Option<&'a str>) -> &'a str {
        explicit
            .or(self.config.default_routing_key())
            .unwrap_or_default()
    }

    /// Releases the channel.
    pub async fn close(self) -> Result<(), AmqpError> {
        self.client.close().await
    }
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(
        &self,
        body: &[u8],
        mut properties: MessageProperties,
        routing_key: Option<&str>,
    ) -> Result<(), AmqpError> {
        self.exchange_declared
            .get_or_try_init(|| self.client.declare_exchange())
            .await?;

        if !properties.contains(PROPERTY_MESSAGE_ID) {
            properties.insert(PROPERTY_MESSAGE_ID, Uuid::new_v4().to_string());
        }
        if !properties.contains(PROPERTY_CONTENT_TYPE) {
            properties.insert(PROPERTY_CONTENT_TYPE, JSON_CONTENT_TYPE);
        }

        otel::inject(&Context::current(), &mut properties);

        let exchange = self.client.exchange_name();
        let key = self.routing_key(routing_key);

        debug!(exchange, routing_key = key, "publishing message");

        if let Err(err) = self
            .client
            .channel()
            .basic_publish(exchange, key, body, &properties)
            .await
        {
            error!(error = err.to_string(), exchange, "error publishing message");
            return Err(err);
        }

        Ok(())
    }
}
