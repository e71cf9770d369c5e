// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Session
//!
//! A [`DeliverySession`] consumes one queue on its own channel and hands each
//! delivery to the registered [`ConsumerHandler`]. It guarantees that exactly
//! one response reaches the broker for every message delivered in ack mode:
//!
//! 1. the callback gets the message and a single-use [`DeliveryHandle`]
//! 2. a callback returning `Ok` without responding acks the message
//! 3. a failing callback goes to the error handler when there is one, and the
//!    message is rejected without requeue unless the handler responded itself
//! 4. without an error handler the failure is fatal: the message is rejected
//!    without requeue and `run()` returns [`AmqpError::DeliveryError`]
//!
//! Without ack mode the handle refuses to respond and callback failures are
//! only reported to the error handler, if any.
//!
//! Deliveries are processed one at a time, the loop only looks at the
//! [`Lifecycle`] between two of them.

use crate::{
    channel::{AmqpChannel, ConsumeOptions, DeliveryStream},
    client::Client,
    config::SessionConfig,
    delivery::{DeliveryHandle, Response},
    errors::AmqpError,
    handler::{ConsumerHandler, ErrorHandler, HandlerError},
    lifecycle::{Lifecycle, Turn},
    message::Message,
    otel,
    topology::prepare_queue,
};
use futures_util::StreamExt;
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use std::{borrow::Cow, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Broker-side result of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Acknowledged, explicitly or because the callback returned silently
    Acked,
    Rejected { requeue: bool },
    /// Delivered without ack, nothing was sent back
    Consumed,
}

/// Consumer/worker bound to one queue.
pub struct DeliverySession {
    client: Client,
    config: SessionConfig,
    lifecycle: Lifecycle,
    callback: Option<Arc<dyn ConsumerHandler>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    started: bool,
    queue_name: Option<String>,
    deliveries: Mutex<Option<DeliveryStream>>,
}

impl DeliverySession {
    /// Creates a session owning the given channel.
    ///
    /// # Parameters
    /// * `channel` - A channel dedicated to this session
    /// * `config` - The pattern configuration, frozen from now on
    /// * `lifecycle` - The process lifecycle controlling the receive loop
    pub fn new(channel: Arc<dyn AmqpChannel>, config: SessionConfig, lifecycle: Lifecycle) -> Self {
        let client = Client::new(
            channel,
            config.exchange_definition(),
            config.declares_exchange(),
        );

        DeliverySession {
            client,
            config,
            lifecycle,
            callback: None,
            error_handler: None,
            started: false,
            queue_name: None,
            deliveries: Mutex::new(None),
        }
    }

    /// Registers the message callback. Can only be done once, before running.
    pub fn set_callback<H>(&mut self, handler: H) -> Result<&mut Self, AmqpError>
    where
        H: ConsumerHandler + 'static,
    {
        self.ensure_not_started()?;

        if self.callback.is_some() {
            return Err(AmqpError::config("the callback can only be set once"));
        }

        self.callback = Some(Arc::new(handler));
        Ok(self)
    }

    /// Registers the handler receiving callback failures, before running.
    pub fn set_error_handler<H>(&mut self, handler: H) -> Result<&mut Self, AmqpError>
    where
        H: ErrorHandler + 'static,
    {
        self.ensure_not_started()?;

        self.error_handler = Some(Arc::new(handler));
        Ok(self)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Name of the consumed queue, known once the session ran.
    pub fn queue_name(&self) -> Option<&str> {
        self.queue_name.as_deref()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Runs the receive loop until the lifecycle stops it or the broker
    /// cancels the consumer.
    ///
    /// The topology is declared and the consumer registered on the first call
    /// only; calling `run()` again after an interrupt and a resume carries on
    /// with the same consumer.
    ///
    /// # Errors
    /// * `ConfigurationError` - no callback was registered
    /// * `DeliveryError` - a callback failed and no error handler is registered
    /// * any broker error met while declaring, consuming or responding
    pub async fn run(&mut self) -> Result<(), AmqpError> {
        let Some(callback) = self.callback.clone() else {
            return Err(AmqpError::config(
                "a callback must be set before running the session",
            ));
        };
        self.started = true;

        let mut deliveries = match self.deliveries.get_mut().take() {
            Some(deliveries) => deliveries,
            None => self.subscribe().await?,
        };

        let result = if self.lifecycle.start() {
            self.consume(&mut deliveries, callback.as_ref()).await
        } else {
            debug!("interrupted before start");
            Ok(())
        };

        self.lifecycle.settle();
        *self.deliveries.get_mut() = Some(deliveries);

        result
    }

    /// Releases the channel.
    pub async fn close(self) -> Result<(), AmqpError> {
        self.client.close().await
    }

    fn ensure_not_started(&self) -> Result<(), AmqpError> {
        if self.started {
            return Err(AmqpError::config(
                "a session cannot be changed once it started running",
            ));
        }
        Ok(())
    }

    /// Declares the topology and registers the consumer.
    async fn subscribe(&mut self) -> Result<DeliveryStream, AmqpError> {
        let channel = self.client.channel();
        let queue = prepare_queue(channel, &self.config).await?;

        if self.config.ack() {
            // one unacknowledged delivery at a time
            channel.basic_qos(1).await?;
        }

        let options = ConsumeOptions {
            consumer_tag: format!("{}-{}", queue, Uuid::new_v4()),
            no_local: false,
            no_ack: !self.config.ack(),
            exclusive: false,
        };
        let deliveries = channel.basic_consume(&queue, &options).await?;
        debug!(queue = queue.as_str(), ack = self.config.ack(), "consuming");

        self.queue_name = Some(queue);
        Ok(deliveries)
    }

    async fn consume(
        &self,
        deliveries: &mut DeliveryStream,
        callback: &dyn ConsumerHandler,
    ) -> Result<(), AmqpError> {
        loop {
            if self.lifecycle.next_turn().await == Turn::Stop {
                debug!("receive loop stopped");
                return Ok(());
            }

            let next = tokio::select! {
                biased;
                _ = self.lifecycle.stopped() => continue,
                next = deliveries.next() => next,
            };

            match next {
                None => {
                    debug!("consumer cancelled by the broker");
                    return Ok(());
                }
                Some(Err(err)) => return Err(err),
                Some(Ok(msg)) => {
                    let tag = msg.delivery_tag;
                    let outcome = self.deliver(msg, callback).await?;
                    debug!(tag, ?outcome, "delivery settled");
                }
            }
        }
    }

    /// Runs the callback for one message and sends the single response.
    pub(crate) async fn deliver(
        &self,
        msg: Message,
        callback: &dyn ConsumerHandler,
    ) -> Result<DeliveryOutcome, AmqpError> {
        let ack_mode = self.config.ack();
        let handle = DeliveryHandle::new(msg.delivery_tag, ack_mode);

        let tracer = global::tracer("amqp consumer");
        let (_ctx, mut span) = otel::new_span(&msg.properties, &tracer, msg.msg_type());

        debug!(
            "received: {} - exchange: {} - tag: {}",
            msg.msg_type(),
            msg.exchange,
            msg.delivery_tag
        );

        let failure = match callback.exec(&msg, &handle).await {
            Ok(()) => None,
            Err(err) => {
                span.record_error(err.as_ref());
                Some(self.handle_failure(err, &msg, &handle).await)
            }
        };

        if !ack_mode {
            span.set_status(Status::Ok);
            return Ok(DeliveryOutcome::Consumed);
        }

        let response = match (handle.response(), &failure) {
            (Some(response), _) => response,
            (None, None) => Response::Ack,
            (None, Some(_)) => Response::Reject { requeue: false },
        };

        if let Err(err) = self.respond(msg.delivery_tag, response).await {
            span.set_status(Status::Error {
                description: Cow::from("error to respond to the broker"),
            });
            return Err(err);
        }

        match failure {
            Some(Failure::Fatal(reason)) => {
                span.set_status(Status::Error {
                    description: Cow::from(reason.clone()),
                });
                Err(AmqpError::DeliveryError(reason))
            }
            _ => {
                span.set_status(Status::Ok);
                Ok(match response {
                    Response::Ack => DeliveryOutcome::Acked,
                    Response::Reject { requeue } => DeliveryOutcome::Rejected { requeue },
                })
            }
        }
    }

    /// Decides, once per failed delivery, whether the failure is handled or fatal.
    async fn handle_failure(
        &self,
        err: HandlerError,
        msg: &Message,
        handle: &DeliveryHandle,
    ) -> Failure {
        match &self.error_handler {
            Some(error_handler) => {
                warn!(error = err.to_string(), "callback failure forwarded to the error handler");
                error_handler.on_error(&err, msg, handle).await;
                Failure::Handled
            }
            None if !self.config.ack() => {
                debug!(error = err.to_string(), "callback failure ignored without ack");
                Failure::Handled
            }
            None => {
                error!(error = err.to_string(), "unhandled callback failure");
                Failure::Fatal(err.to_string())
            }
        }
    }

    async fn respond(&self, tag: u64, response: Response) -> Result<(), AmqpError> {
        let channel = self.client.channel();
        match response {
            Response::Ack => channel.basic_ack(tag).await,
            Response::Reject { requeue } => {
                debug!(tag, requeue, "rejecting message");
                channel.basic_reject(tag, requeue).await
            }
        }
    }
}

/// Callback failure after the error-handler-or-fatal decision.
enum Failure {
    Handled,
    Fatal(String),
}
