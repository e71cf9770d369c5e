// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod factory;
pub mod handler;
pub mod lifecycle;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod routing;
pub mod session;
pub mod topology;

pub use channel::{AmqpChannel, AmqpConnector, ChannelProvider, ConsumeOptions, DeliveryStream};
pub use config::{Pattern, SessionConfig, SessionConfigBuilder};
pub use connection::{ConnectionConfig, HostSpec};
pub use delivery::DeliveryHandle;
pub use dispatcher::RoutedPublisher;
pub use errors::AmqpError;
pub use exchange::ExchangeKind;
pub use factory::PatternFactory;
pub use handler::{ConsumerHandler, ErrorHandler, HandlerError};
pub use lifecycle::{Lifecycle, LifecycleState, PausePolicy};
pub use message::{Message, MessageProperties, PropertyValue};
pub use publisher::{AmqpPublisher, Publisher};
pub use routing::{DefaultRouteMap, Route, RouteDefinition, RouteMap};
pub use session::{DeliveryOutcome, DeliverySession};
