// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! This module provides the queue and binding definitions used by the topology
//! declarator. Queues come in two flavors:
//! - named queues, durable and shared, so competing consumers can attach to them
//! - anonymous queues, exclusive and auto-deleted with the channel that declared them

/// Definition of a queue with its declaration parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: Option<String>,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
}

impl QueueDefinition {
    /// Creates a named queue definition.
    ///
    /// Named queues are durable, non-exclusive and never auto-deleted: they
    /// outlive the declaring client and can be shared by several workers
    /// for load distribution.
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    pub fn named(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: Some(name.to_owned()),
            durable: true,
            delete: false,
            exclusive: false,
        }
    }

    /// Creates an anonymous queue definition.
    ///
    /// The broker picks the name. The queue is exclusive, transient and
    /// auto-deleted, so it disappears once the owning channel closes.
    pub fn anonymous() -> QueueDefinition {
        QueueDefinition {
            name: None,
            durable: false,
            delete: true,
            exclusive: true,
        }
    }

    /// Picks the named or the anonymous rule. An empty name counts as absent.
    pub fn from_name(name: Option<&str>) -> QueueDefinition {
        match name {
            Some(name) if !name.is_empty() => QueueDefinition::named(name),
            _ => QueueDefinition::anonymous(),
        }
    }

    /// Name to send on the wire, empty for anonymous queues.
    pub fn declared_name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_auto_delete(&self) -> bool {
        self.delete
    }
}

/// Configuration for binding a queue to an exchange.
///
/// Queue bindings define how messages flow from exchanges to queues based on
/// routing keys and exchange types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new queue binding for the given queue.
    ///
    /// By default, the exchange name and routing key are empty strings.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key for the binding.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }
}
