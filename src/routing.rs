// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Routes
//!
//! A route tells where a message of a given type goes: exchange, exchange type,
//! routing key, content type and persistence. Routes come from a table keyed by
//! message type, usually loaded from configuration:
//!
//! ```json
//! {
//!   "user.created": { "exchange": "users", "exchange_type": "topic", "routing_key": "users.created" },
//!   "audit.entry": { "exchange": "audit", "persistent": true }
//! }
//! ```

use crate::{
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    message::JSON_CONTENT_TYPE,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, str::FromStr, sync::OnceLock};

/// Routing key of the route installed by [`DefaultRouteMap::set_default_exchange`].
pub const INTERNAL_MESSAGES_KEY: &str = "internal_messages";

/// One entry of a route table, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDefinition {
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default = "default_exchange_type")]
    pub exchange_type: String,
    #[serde(default = "default_durable")]
    pub durable: bool,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub routing_key: Option<String>,
}

fn default_content_type() -> String {
    JSON_CONTENT_TYPE.to_owned()
}

fn default_exchange_type() -> String {
    ExchangeKind::Direct.as_str().to_owned()
}

fn default_durable() -> bool {
    true
}

impl Default for RouteDefinition {
    fn default() -> Self {
        RouteDefinition {
            content_type: default_content_type(),
            exchange: None,
            exchange_type: default_exchange_type(),
            durable: default_durable(),
            persistent: false,
            routing_key: None,
        }
    }
}

/// Validated route.
#[derive(Debug, Clone)]
pub struct Route {
    content_type: String,
    exchange: Option<String>,
    exchange_kind: ExchangeKind,
    durable: bool,
    persistent: bool,
    routing_key: Option<String>,
    hash: OnceLock<String>,
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.content_type == other.content_type
            && self.exchange == other.exchange
            && self.exchange_kind == other.exchange_kind
            && self.durable == other.durable
            && self.persistent == other.persistent
            && self.routing_key == other.routing_key
    }
}

impl Eq for Route {}

impl Route {
    /// Route to the default exchange with an empty routing key.
    pub fn empty() -> Route {
        Route {
            content_type: default_content_type(),
            exchange: None,
            exchange_kind: ExchangeKind::Direct,
            durable: false,
            persistent: false,
            routing_key: None,
            hash: OnceLock::new(),
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn exchange(&self) -> Option<&str> {
        self.exchange.as_deref()
    }

    pub fn exchange_kind(&self) -> ExchangeKind {
        self.exchange_kind
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }

    /// Hex encoded sha256 of the exchange name, computed once.
    pub fn hash(&self) -> &str {
        self.hash.get_or_init(|| {
            let mut hasher = Sha256::new();
            hasher.update(self.exchange().unwrap_or_default().as_bytes());
            format!("{:x}", hasher.finalize())
        })
    }

    /// Declaration parameters of the route's exchange, `None` for the default exchange.
    pub fn exchange_definition(&self) -> Option<ExchangeDefinition> {
        self.exchange()
            .filter(|name| !name.is_empty())
            .map(|name| {
                ExchangeDefinition::new(name)
                    .kind(self.exchange_kind)
                    .durable(self.durable)
            })
    }
}

impl TryFrom<RouteDefinition> for Route {
    type Error = AmqpError;

    fn try_from(def: RouteDefinition) -> Result<Self, Self::Error> {
        let exchange_kind = ExchangeKind::from_str(&def.exchange_type)?;

        Ok(Route {
            content_type: def.content_type,
            exchange: def.exchange.filter(|name| !name.is_empty()),
            exchange_kind,
            durable: def.durable,
            persistent: def.persistent,
            routing_key: def.routing_key,
            hash: OnceLock::new(),
        })
    }
}

/// Resolves the route of a message type.
pub trait RouteMap: Send + Sync {
    fn route_for(&self, msg_type: &str) -> &Route;
}

/// Route table with an optional default route.
#[derive(Debug, Clone)]
pub struct DefaultRouteMap {
    routes: HashMap<String, Route>,
    default_route: Option<Route>,
    empty: Route,
}

impl Default for DefaultRouteMap {
    fn default() -> Self {
        DefaultRouteMap {
            routes: HashMap::default(),
            default_route: None,
            empty: Route::empty(),
        }
    }
}

impl DefaultRouteMap {
    /// Validates every entry of the table.
    ///
    /// # Errors
    /// * `ConfigurationError` - an entry has an unsupported exchange type
    pub fn new<I, K>(table: I) -> Result<Self, AmqpError>
    where
        I: IntoIterator<Item = (K, RouteDefinition)>,
        K: Into<String>,
    {
        let routes = table
            .into_iter()
            .map(|(msg_type, def)| Ok((msg_type.into(), Route::try_from(def)?)))
            .collect::<Result<HashMap<_, _>, AmqpError>>()?;

        Ok(DefaultRouteMap {
            routes,
            ..Default::default()
        })
    }

    /// Loads the table from a JSON object keyed by message type.
    pub fn from_json(raw: &str) -> Result<Self, AmqpError> {
        let table: HashMap<String, RouteDefinition> = serde_json::from_str(raw)
            .map_err(|err| AmqpError::config(format!("invalid route table: {err}")))?;

        DefaultRouteMap::new(table)
    }

    /// Sends unrouted message types to a durable direct exchange with the
    /// `internal_messages` routing key.
    pub fn set_default_exchange(&mut self, name: &str) -> &mut Self {
        self.default_route = Some(Route {
            content_type: default_content_type(),
            exchange: Some(name.to_owned()).filter(|name| !name.is_empty()),
            exchange_kind: ExchangeKind::Direct,
            durable: true,
            persistent: false,
            routing_key: Some(INTERNAL_MESSAGES_KEY.to_owned()),
            hash: OnceLock::new(),
        });
        self
    }

    pub fn default_route(&self) -> Option<&Route> {
        self.default_route.as_ref()
    }

    pub fn contains(&self, msg_type: &str) -> bool {
        self.routes.contains_key(msg_type)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteMap for DefaultRouteMap {
    fn route_for(&self, msg_type: &str) -> &Route {
        self.routes
            .get(msg_type)
            .or(self.default_route.as_ref())
            .unwrap_or(&self.empty)
    }
}
