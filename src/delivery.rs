// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Handles
//!
//! A [`DeliveryHandle`] is created for every delivered message and handed to the
//! consumer callback next to the message. It records at most one response:
//! the first `ack`/`reject` wins and any further attempt fails with
//! [`AmqpError::AlreadyResponded`]. The session sends the recorded response to
//! the broker once the callback (and the error handler, if any) returned.

use crate::errors::AmqpError;
use std::sync::OnceLock;

/// Response recorded for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ack,
    Reject { requeue: bool },
}

/// Single-use acknowledgment handle for one delivery.
#[derive(Debug)]
pub struct DeliveryHandle {
    tag: u64,
    ack_mode: bool,
    response: OnceLock<Response>,
}

impl DeliveryHandle {
    pub(crate) fn new(tag: u64, ack_mode: bool) -> Self {
        DeliveryHandle {
            tag,
            ack_mode,
            response: OnceLock::new(),
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.tag
    }

    /// Positive acknowledgment.
    pub fn ack(&self) -> Result<(), AmqpError> {
        self.respond(Response::Ack)
    }

    /// Negative acknowledgment, `requeue` asks the broker to redeliver.
    pub fn reject(&self, requeue: bool) -> Result<(), AmqpError> {
        self.respond(Response::Reject { requeue })
    }

    /// Reject with requeue, the default rejection.
    pub fn requeue(&self) -> Result<(), AmqpError> {
        self.reject(true)
    }

    pub fn responded(&self) -> bool {
        self.response.get().is_some()
    }

    pub fn response(&self) -> Option<Response> {
        self.response.get().copied()
    }

    fn respond(&self, response: Response) -> Result<(), AmqpError> {
        if !self.ack_mode {
            return Err(AmqpError::AckModeDisabled);
        }

        self.response
            .set(response)
            .map_err(|_| AmqpError::AlreadyResponded(self.tag))
    }
}
