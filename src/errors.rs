// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Messaging Patterns
//!
//! This module provides the error taxonomy shared by every pattern client.
//! The `AmqpError` enum covers configuration mistakes, acknowledgment misuse,
//! callback failures, signal capability problems and every broker operation
//! that can fail (connection, channel, exchange, queue, binding, publishing).

use thiserror::Error;

/// Represents errors that can occur while building or running a messaging pattern.
///
/// Broker-side variants are produced when the underlying client reports a
/// failure; they are logged where they are mapped and never retried here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Invalid exchange type, double callback registration, changing a
    /// session once it started, malformed host definitions...
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// A second response was attempted for an already answered delivery
    #[error("delivery `{0}` was already acknowledged or rejected")]
    AlreadyResponded(u64),

    /// Ack or reject was attempted on a session consuming without ack
    #[error("ack and reject are unavailable when consuming without ack")]
    AckModeDisabled,

    /// The user callback failed and no error handler took care of it
    #[error("failure to process delivery: {0}")]
    DeliveryError(String),

    /// The process cannot subscribe to OS signals
    #[error("signal handling unavailable: {0}")]
    CapabilityError(String),

    /// Error establishing a connection to the broker
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating or closing a channel
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error registering a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error rejecting a message
    #[error("failure to reject message")]
    RejectMessageError,

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error receiving a delivery from the consumer stream
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),
}

impl AmqpError {
    /// Shorthand for building a [`AmqpError::ConfigurationError`].
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        AmqpError::ConfigurationError(msg.into())
    }
}
