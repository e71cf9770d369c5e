// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! This module propagates trace context through message properties. Publishers
//! inject the current context, delivery sessions extract it and open a consumer
//! span per delivery.

use crate::message::{MessageProperties, PropertyValue};
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::borrow::Cow;

/// Adapter injecting and extracting OpenTelemetry context from message properties.
///
/// Propagation keys are not AMQP basic properties, so they travel as headers.
pub(crate) struct PropertiesPropagator<'a> {
    props: &'a mut MessageProperties,
}

impl<'a> PropertiesPropagator<'a> {
    pub(crate) fn new(props: &'a mut MessageProperties) -> Self {
        Self { props }
    }
}

impl Injector for PropertiesPropagator<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.props
            .insert(&key.to_lowercase(), PropertyValue::String(value));
    }
}

/// Read-only counterpart used on delivery.
pub(crate) struct PropertiesExtractor<'a> {
    props: &'a MessageProperties,
}

impl Extractor for PropertiesExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.props.get_str(key)
    }

    fn keys(&self) -> Vec<&str> {
        self.props.iter().map(|(key, _)| key.as_str()).collect()
    }
}

/// Writes the given context into the outgoing properties.
pub(crate) fn inject(ctx: &Context, props: &mut MessageProperties) {
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut PropertiesPropagator::new(props))
    });
}

/// Creates a consumer span for a delivery, parented on the propagated context.
///
/// # Parameters
/// * `props` - Properties of the delivered message
/// * `tracer` - OpenTelemetry tracer
/// * `name` - Span name, the message type when there is one
pub(crate) fn new_span(
    props: &MessageProperties,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let ctx = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&PropertiesExtractor { props })
    });

    let name = if name.is_empty() { "amqp delivery" } else { name };

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}
