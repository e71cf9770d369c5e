// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Routed Message Dispatcher
//!
//! This module publishes messages by type: each message type is looked up in a
//! [`RouteMap`] which gives the exchange, routing key, content type and
//! persistence to use. Each route's exchange is declared the first time a
//! message goes through it.

use crate::{
    channel::AmqpChannel,
    client::Client,
    errors::AmqpError,
    message::{
        MessageProperties, DELIVERY_MODE_PERSISTENT, PROPERTY_CONTENT_TYPE,
        PROPERTY_DELIVERY_MODE, PROPERTY_MESSAGE_ID, PROPERTY_TYPE,
    },
    otel,
    routing::{DefaultRouteMap, Route, RouteMap},
};
use opentelemetry::Context;
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

/// Publisher resolving exchange and routing key from the message type.
pub struct RoutedPublisher<M: RouteMap = DefaultRouteMap> {
    client: Client,
    routes: M,
    declared: Mutex<HashSet<String>>,
}

impl<M: RouteMap> RoutedPublisher<M> {
    /// Creates a routed publisher owning the given channel.
    ///
    /// # Parameters
    /// * `channel` - A channel dedicated to this publisher
    /// * `routes` - The route table
    pub fn new(channel: Arc<dyn AmqpChannel>, routes: M) -> Self {
        RoutedPublisher {
            client: Client::new(channel, None, false),
            routes,
            declared: Mutex::new(HashSet::default()),
        }
    }

    pub fn routes(&self) -> &M {
        &self.routes
    }

    /// Publishes a message of the given type through its route.
    ///
    /// This method performs the following operations:
    /// 1. Resolves the route of `msg_type`
    /// 2. Declares the route's exchange, once per exchange
    /// 3. Sets the content type, the message type and, for persistent routes,
    ///    the persistent delivery mode
    /// 4. Publishes to the route's exchange and routing key
    pub async fn dispatch(
        &self,
        msg_type: &str,
        body: &[u8],
        mut properties: MessageProperties,
    ) -> Result<(), AmqpError> {
        let route = self.routes.route_for(msg_type);
        self.declare_route(route).await?;

        properties.insert(PROPERTY_CONTENT_TYPE, route.content_type());
        properties.insert(PROPERTY_TYPE, msg_type);
        if route.is_persistent() {
            properties.insert(PROPERTY_DELIVERY_MODE, DELIVERY_MODE_PERSISTENT);
        }
        if !properties.contains(PROPERTY_MESSAGE_ID) {
            properties.insert(PROPERTY_MESSAGE_ID, Uuid::new_v4().to_string());
        }

        otel::inject(&Context::current(), &mut properties);

        let exchange = route.exchange().unwrap_or_default();
        let key = route.routing_key().unwrap_or_default();

        debug!(msg_type, exchange, routing_key = key, "dispatching message");

        if let Err(err) = self
            .client
            .channel()
            .basic_publish(exchange, key, body, &properties)
            .await
        {
            error!(error = err.to_string(), msg_type, "error dispatching message");
            return Err(err);
        }

        Ok(())
    }

    /// Serializes the payload to JSON and dispatches it.
    pub async fn dispatch_json<T>(
        &self,
        msg_type: &str,
        payload: &T,
        properties: MessageProperties,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + Sync,
    {
        let body = serde_json::to_vec(payload).map_err(|err| {
            error!(error = err.to_string(), msg_type, "error serializing message");
            AmqpError::PublishingError
        })?;

        self.dispatch(msg_type, &body, properties).await
    }

    /// Releases the channel.
    pub async fn close(self) -> Result<(), AmqpError> {
        self.client.close().await
    }

    async fn declare_route(&self, route: &Route) -> Result<(), AmqpError> {
        let Some(def) = route.exchange_definition() else {
            return Ok(());
        };

        let mut declared = self.declared.lock().await;
        if declared.contains(route.hash()) {
            return Ok(());
        }

        self.client.channel().exchange_declare(&def).await?;
        declared.insert(route.hash().to_owned());

        Ok(())
    }
}
