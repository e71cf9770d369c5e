// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation and management of AMQP connections and channels.
//! Broker operations are exposed through the [`AmqpChannel`] trait so the pattern
//! clients never talk to lapin directly; [`LapinChannel`] is the production
//! implementation and [`AmqpConnector`] opens them over a normalized host list.

use crate::{
    connection::{ConnectionConfig, HostConfig},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    message::{Message, MessageProperties},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    Channel, Connection, ConnectionProperties,
};
use std::{pin::Pin, sync::Arc};
use tokio::sync::OnceCell;
use tracing::{debug, error, warn};

/// Stream of deliveries produced by a consumer registration.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Message, AmqpError>> + Send>>;

/// Consumer registration flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub consumer_tag: String,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
}

/// Broker operations the pattern clients rely on.
///
/// One implementor instance stands for one broker channel. It is owned by
/// exactly one client which closes it exactly once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    /// Declares a queue and returns its name, generated by the broker for
    /// anonymous queues.
    async fn queue_declare(&self, def: &QueueDefinition) -> Result<String, AmqpError>;

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), AmqpError>;

    async fn basic_consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Source of fresh channels, one per pattern client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;
}

/// [`AmqpChannel`] backed by a lapin channel.
pub struct LapinChannel {
    channel: Channel,
}

impl LapinChannel {
    pub fn new(channel: Channel) -> Self {
        LapinChannel { channel }
    }
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", def.name);

        match self
            .channel
            .exchange_declare(
                &def.name,
                def.kind.into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        debug!("creating queue: {}", def.declared_name());

        match self
            .channel
            .queue_declare(
                def.declared_name(),
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to declare the queue");
                Err(AmqpError::DeclareQueueError(def.declared_name().to_owned()))
            }
            Ok(queue) => Ok(queue.name().as_str().to_owned()),
        }
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        match self
            .channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), AmqpError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to configure qos");
                AmqpError::QoSDeclarationError(err.to_string())
            })
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                body,
                properties.to_amqp(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError)
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
            .channel
            .basic_consume(
                queue,
                &options.consumer_tag,
                BasicConsumeOptions {
                    no_local: options.no_local,
                    no_ack: options.no_ack,
                    exclusive: options.exclusive,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::BindingConsumerError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        Ok(Box::pin(consumer.map(|result| match result {
            Ok(delivery) => Ok(Message::from(delivery)),
            Err(err) => {
                error!(error = err.to_string(), "errors consume msg");
                Err(AmqpError::ConsumerError(err.to_string()))
            }
        })))
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling reject msg");
                AmqpError::RejectMessageError
            })
    }

    async fn close(&self) -> Result<(), AmqpError> {
        debug!("closing channel");
        self.channel.close(200, "bye").await.map_err(|err| {
            warn!(error = err.to_string(), "error closing the channel");
            AmqpError::ChannelError(err.to_string())
        })
    }
}

/// Opens lapin connections over the configured host list.
///
/// A single connection is shared by every channel; it is established lazily on
/// the first channel request unless [`AmqpConnector::connect`] is called.
pub struct AmqpConnector {
    hosts: Vec<HostConfig>,
    connection_name: Option<String>,
    connection: OnceCell<Arc<Connection>>,
}

impl AmqpConnector {
    /// Creates a connector, normalizing (and possibly shuffling) the hosts.
    pub fn new(cfg: &ConnectionConfig) -> Result<Self, AmqpError> {
        Ok(AmqpConnector {
            hosts: cfg.host_list()?,
            connection_name: cfg.connection_name.clone(),
            connection: OnceCell::new(),
        })
    }

    pub fn hosts(&self) -> &[HostConfig] {
        &self.hosts
    }

    /// True when the first host asks for a deferred connection.
    pub fn is_lazy(&self) -> bool {
        self.hosts.first().is_some_and(|h| h.options.lazy())
    }

    /// Establishes the shared connection if not done yet.
    pub async fn connect(&self) -> Result<Arc<Connection>, AmqpError> {
        self.connection
            .get_or_try_init(|| self.connect_first_available())
            .await
            .cloned()
    }

    /// Tries every host in order, the first successful connection wins.
    async fn connect_first_available(&self) -> Result<Arc<Connection>, AmqpError> {
        let mut last_err = AmqpError::ConnectionError("no host configured".to_owned());

        for host in &self.hosts {
            match self.connect_to(host).await {
                Ok(conn) => return Ok(Arc::new(conn)),
                Err(err) => {
                    warn!(host = host.host.as_str(), port = host.port, "host unreachable");
                    last_err = err;
                }
            }
        }

        Err(last_err)
    }

    async fn connect_to(&self, host: &HostConfig) -> Result<Connection, AmqpError> {
        debug!("creating amqp connection...");
        let mut options = ConnectionProperties::default();
        if let Some(name) = &self.connection_name {
            options = options.with_connection_name(LongString::from(name.as_str()));
        }

        let uri = host.uri();
        let connecting = Connection::connect(&uri, options);

        let result = match host.options.timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, connecting).await {
                Ok(result) => result,
                Err(_) => {
                    error!(host = host.host.as_str(), "connection timed out");
                    return Err(AmqpError::ConnectionError(format!(
                        "timed out after {timeout:?}"
                    )));
                }
            },
            None => connecting.await,
        };

        match result {
            Ok(conn) => {
                debug!("amqp connected");
                Ok(conn)
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }
    }
}

#[async_trait]
impl ChannelProvider for AmqpConnector {
    async fn open_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        let conn = self.connect().await?;

        debug!("creating amqp channel...");
        match conn.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(Arc::new(LapinChannel::new(c)))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }
}
