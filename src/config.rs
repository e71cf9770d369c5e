// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Pattern Configuration
//!
//! [`SessionConfig`] gathers everything a publisher or a delivery session needs
//! to know about its pattern: exchange type and durability, ack mode, queue
//! name, binding keys and default routing key. It is only built through
//! [`SessionConfigBuilder`], which validates it, and cannot change afterwards.

use crate::{
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::QueueDefinition,
};
use std::str::FromStr;

/// The messaging patterns supported by the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Publish/subscribe over a fanout exchange, every subscriber gets every message
    Fanout,
    /// Competing consumers over a direct exchange, each message goes to one worker
    Task,
    /// Pattern-based routing over a topic exchange
    Topic,
}

impl Pattern {
    /// Builder preset with the pattern's exchange type, durability and ack mode.
    pub fn builder(self) -> SessionConfigBuilder {
        let builder = SessionConfig::builder().pattern(self);
        match self {
            Pattern::Fanout => builder
                .exchange_kind(ExchangeKind::Fanout)
                .durable(false)
                .ack(false),
            Pattern::Task => builder
                .exchange_kind(ExchangeKind::Direct)
                .durable(true)
                .ack(true),
            Pattern::Topic => builder
                .exchange_kind(ExchangeKind::Topic)
                .durable(true)
                .ack(true),
        }
    }
}

/// Immutable configuration of a pattern client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pattern: Option<Pattern>,
    exchange: Option<String>,
    exchange_kind: ExchangeKind,
    durable: bool,
    declare_exchange: bool,
    ack: bool,
    queue: Option<String>,
    binding_keys: Vec<String>,
    default_routing_key: Option<String>,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    pub fn pattern(&self) -> Option<Pattern> {
        self.pattern
    }

    /// Exchange name, `None` for the default exchange.
    pub fn exchange(&self) -> Option<&str> {
        self.exchange.as_deref()
    }

    pub fn exchange_kind(&self) -> ExchangeKind {
        self.exchange_kind
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn declares_exchange(&self) -> bool {
        self.declare_exchange
    }

    pub fn ack(&self) -> bool {
        self.ack
    }

    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    pub fn binding_keys(&self) -> &[String] {
        &self.binding_keys
    }

    pub fn default_routing_key(&self) -> Option<&str> {
        self.default_routing_key.as_deref()
    }

    /// Declaration parameters of the configured exchange.
    pub fn exchange_definition(&self) -> Option<ExchangeDefinition> {
        self.exchange.as_deref().map(|name| {
            ExchangeDefinition::new(name)
                .kind(self.exchange_kind)
                .durable(self.durable)
        })
    }

    /// Declaration parameters of the configured queue.
    pub fn queue_definition(&self) -> QueueDefinition {
        QueueDefinition::from_name(self.queue.as_deref())
    }

    /// Checks the configuration can back a delivery session.
    ///
    /// Topic subscriptions have no queue name fallback for their bindings.
    pub fn check_consumable(&self) -> Result<(), AmqpError> {
        if self.exchange_kind == ExchangeKind::Topic
            && self.exchange.is_some()
            && self.binding_keys.is_empty()
        {
            return Err(AmqpError::config(
                "topic subscriptions need at least one binding key",
            ));
        }
        Ok(())
    }
}

/// Builder for [`SessionConfig`].
///
/// Exchange types given as strings are validated on [`SessionConfigBuilder::build`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    pattern: Option<Pattern>,
    exchange: Option<String>,
    exchange_kind: Result<ExchangeKind, String>,
    durable: bool,
    declare_exchange: bool,
    ack: bool,
    queue: Option<String>,
    binding_keys: Vec<String>,
    default_routing_key: Option<String>,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        SessionConfigBuilder {
            pattern: None,
            exchange: None,
            exchange_kind: Ok(ExchangeKind::Direct),
            durable: true,
            declare_exchange: true,
            ack: false,
            queue: None,
            binding_keys: vec![],
            default_routing_key: None,
        }
    }
}

impl SessionConfigBuilder {
    fn pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Sets the exchange name. An empty name selects the default exchange.
    pub fn exchange(mut self, name: &str) -> Self {
        self.exchange = Some(name.to_owned()).filter(|n| !n.is_empty());
        self
    }

    pub fn exchange_kind(mut self, kind: ExchangeKind) -> Self {
        self.exchange_kind = Ok(kind);
        self
    }

    /// Sets the exchange type from its wire name.
    pub fn exchange_type(mut self, kind: &str) -> Self {
        self.exchange_kind = ExchangeKind::from_str(kind).map_err(|_| kind.to_owned());
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn declare_exchange(mut self, declare: bool) -> Self {
        self.declare_exchange = declare;
        self
    }

    pub fn ack(mut self, ack: bool) -> Self {
        self.ack = ack;
        self
    }

    /// Sets the queue name. `None` or an empty name selects an anonymous queue.
    pub fn queue(mut self, name: Option<&str>) -> Self {
        self.queue = name.filter(|n| !n.is_empty()).map(str::to_owned);
        self
    }

    pub fn binding_key(mut self, key: &str) -> Self {
        if !self.binding_keys.iter().any(|k| k == key) {
            self.binding_keys.push(key.to_owned());
        }
        self
    }

    pub fn binding_keys<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        keys.into_iter()
            .fold(self, |builder, key| builder.binding_key(key.as_ref()))
    }

    pub fn default_routing_key(mut self, key: Option<&str>) -> Self {
        self.default_routing_key = key.map(str::to_owned);
        self
    }

    /// Validates and freezes the configuration.
    pub fn build(self) -> Result<SessionConfig, AmqpError> {
        let exchange_kind = self.exchange_kind.map_err(|kind| {
            AmqpError::config(format!(
                "exchange type `{kind}` is not supported, expected one of: direct, fanout, topic"
            ))
        })?;

        Ok(SessionConfig {
            pattern: self.pattern,
            exchange: self.exchange,
            exchange_kind,
            durable: self.durable,
            declare_exchange: self.declare_exchange,
            ack: self.ack,
            queue: self.queue,
            binding_keys: self.binding_keys,
            default_routing_key: self.default_routing_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fanout_preset_is_transient_without_ack() {
        let cfg = Pattern::Fanout.builder().exchange("logs").build().unwrap();

        assert_eq!(cfg.exchange_kind(), ExchangeKind::Fanout);
        assert!(!cfg.is_durable());
        assert!(!cfg.ack());
        assert!(cfg.queue_definition().is_anonymous());
        assert!(cfg.binding_keys().is_empty());
    }

    #[test]
    fn task_preset_is_durable_with_ack() {
        let cfg = Pattern::Task
            .builder()
            .exchange("work")
            .queue(Some("jobs"))
            .build()
            .unwrap();

        assert_eq!(cfg.exchange_kind(), ExchangeKind::Direct);
        assert!(cfg.is_durable());
        assert!(cfg.ack());
        assert_eq!(cfg.queue(), Some("jobs"));

        let exchange = cfg.exchange_definition().unwrap();
        assert_eq!(exchange.name(), "work");
        assert!(exchange.is_durable());
    }

    #[test]
    fn topic_subscriptions_require_binding_keys() {
        let publishing = Pattern::Topic.builder().exchange("events").build().unwrap();
        let err = publishing.check_consumable().unwrap_err();
        assert!(matches!(err, AmqpError::ConfigurationError(_)));

        let cfg = Pattern::Topic
            .builder()
            .exchange("events")
            .binding_keys(["orders.*", "orders.*", "invoices.#"])
            .build()
            .unwrap();
        assert_eq!(cfg.binding_keys(), ["orders.*", "invoices.#"]);
        assert!(cfg.check_consumable().is_ok());
    }

    #[test]
    fn invalid_exchange_type_fails_on_build() {
        let err = SessionConfig::builder()
            .exchange("x")
            .exchange_type("headers")
            .build()
            .unwrap_err();

        assert!(matches!(err, AmqpError::ConfigurationError(_)));

        let cfg = SessionConfig::builder()
            .exchange("x")
            .exchange_type("topic")
            .build()
            .unwrap();
        assert_eq!(cfg.exchange_kind(), ExchangeKind::Topic);
    }

    #[test]
    fn empty_names_select_defaults() {
        let cfg = SessionConfig::builder()
            .exchange("")
            .queue(Some(""))
            .build()
            .unwrap();

        assert_eq!(cfg.exchange(), None);
        assert_eq!(cfg.exchange_definition(), None);
        assert_eq!(cfg.queue(), None);
    }
}
