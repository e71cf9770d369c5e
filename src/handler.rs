// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Handlers
//!
//! Traits implemented by user code plugged into a delivery session. Plain
//! closures implement them too, for handlers that do not need to await.

use crate::{delivery::DeliveryHandle, message::Message};
use async_trait::async_trait;

/// Error returned by user callbacks.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one delivered message.
///
/// The handle may be used to ack or reject explicitly; returning `Ok` without
/// responding acknowledges the message.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn exec(&self, msg: &Message, delivery: &DeliveryHandle) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F> ConsumerHandler for F
where
    F: Fn(&Message, &DeliveryHandle) -> Result<(), HandlerError> + Send + Sync,
{
    async fn exec(&self, msg: &Message, delivery: &DeliveryHandle) -> Result<(), HandlerError> {
        (self)(msg, delivery)
    }
}

/// Receives callback failures.
///
/// The handler may still respond through the handle; when it does not, the
/// message is rejected without requeue.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn on_error(&self, err: &HandlerError, msg: &Message, delivery: &DeliveryHandle);
}

#[async_trait]
impl<F> ErrorHandler for F
where
    F: Fn(&HandlerError, &Message, &DeliveryHandle) + Send + Sync,
{
    async fn on_error(&self, err: &HandlerError, msg: &Message, delivery: &DeliveryHandle) {
        (self)(err, msg, delivery)
    }
}
