// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messages and Properties
//!
//! This module defines the message envelope handed to consumer callbacks and
//! the string-keyed property map used on both the publishing and the consuming
//! side. Well-known AMQP properties (`app_id`, `content_type`, `message_id`,
//! `timestamp`, `type`...) map onto the basic properties frame; every other key
//! travels as a message header.

use lapin::{
    message::Delivery,
    types::{AMQPValue, FieldTable, LongLongInt, LongString, ShortString},
    BasicProperties,
};
use std::collections::{btree_map, BTreeMap};
use tracing::warn;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

pub const PROPERTY_APP_ID: &str = "app_id";
pub const PROPERTY_CLUSTER_ID: &str = "cluster_id";
pub const PROPERTY_CONTENT_ENCODING: &str = "content_encoding";
pub const PROPERTY_CONTENT_TYPE: &str = "content_type";
pub const PROPERTY_CORRELATION_ID: &str = "correlation_id";
pub const PROPERTY_DELIVERY_MODE: &str = "delivery_mode";
pub const PROPERTY_EXPIRATION: &str = "expiration";
pub const PROPERTY_MESSAGE_ID: &str = "message_id";
pub const PROPERTY_PRIORITY: &str = "priority";
pub const PROPERTY_REPLY_TO: &str = "reply_to";
pub const PROPERTY_TIMESTAMP: &str = "timestamp";
pub const PROPERTY_TYPE: &str = "type";
pub const PROPERTY_USER_ID: &str = "user_id";

/// Delivery mode flagging a message as persistent
pub const DELIVERY_MODE_PERSISTENT: i64 = 2;

/// A scalar property or header value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Float(f64),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(v) => Some(*v),
            PropertyValue::String(v) => v.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Text rendering used for the string-typed basic properties.
    fn to_text(&self) -> String {
        match self {
            PropertyValue::String(v) => v.clone(),
            PropertyValue::Integer(v) => v.to_string(),
            PropertyValue::Boolean(v) => v.to_string(),
            PropertyValue::Float(v) => v.to_string(),
        }
    }

    fn to_amqp_value(&self) -> AMQPValue {
        match self {
            PropertyValue::String(v) => AMQPValue::LongString(LongString::from(v.as_str())),
            PropertyValue::Integer(v) => AMQPValue::LongLongInt(LongLongInt::from(*v)),
            PropertyValue::Boolean(v) => AMQPValue::Boolean(*v),
            PropertyValue::Float(v) => AMQPValue::Double(*v),
        }
    }

    fn from_amqp_value(value: &AMQPValue) -> Option<PropertyValue> {
        let value = match value {
            AMQPValue::Boolean(v) => PropertyValue::Boolean(*v),
            AMQPValue::ShortShortInt(v) => PropertyValue::Integer(i64::from(*v)),
            AMQPValue::ShortShortUInt(v) => PropertyValue::Integer(i64::from(*v)),
            AMQPValue::ShortInt(v) => PropertyValue::Integer(i64::from(*v)),
            AMQPValue::ShortUInt(v) => PropertyValue::Integer(i64::from(*v)),
            AMQPValue::LongInt(v) => PropertyValue::Integer(i64::from(*v)),
            AMQPValue::LongUInt(v) => PropertyValue::Integer(i64::from(*v)),
            AMQPValue::LongLongInt(v) => PropertyValue::Integer(*v),
            AMQPValue::Timestamp(v) => PropertyValue::Integer(*v as i64),
            AMQPValue::Float(v) => PropertyValue::Float(f64::from(*v)),
            AMQPValue::Double(v) => PropertyValue::Float(*v),
            AMQPValue::ShortString(v) => PropertyValue::String(v.as_str().to_owned()),
            AMQPValue::LongString(v) => {
                PropertyValue::String(String::from_utf8_lossy(v.as_bytes()).into_owned())
            }
            _ => return None,
        };

        Some(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Integer(i64::from(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

/// String-keyed message properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties(BTreeMap<String, PropertyValue>);

impl MessageProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a property, builder style.
    pub fn with(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<PropertyValue>) {
        self.0.insert(key.to_owned(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(PropertyValue::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, PropertyValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Converts the map into AMQP basic properties.
    ///
    /// Well-known keys fill the matching property; anything else becomes a
    /// header. Numeric properties holding a non numeric value are dropped.
    pub fn to_amqp(&self) -> BasicProperties {
        let mut props = BasicProperties::default();
        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();

        for (key, value) in &self.0 {
            let short = || ShortString::from(value.to_text());

            props = match key.as_str() {
                PROPERTY_APP_ID => props.with_app_id(short()),
                PROPERTY_CLUSTER_ID => props.with_cluster_id(short()),
                PROPERTY_CONTENT_ENCODING => props.with_content_encoding(short()),
                PROPERTY_CONTENT_TYPE => props.with_content_type(short()),
                PROPERTY_CORRELATION_ID => props.with_correlation_id(short()),
                PROPERTY_EXPIRATION => props.with_expiration(short()),
                PROPERTY_MESSAGE_ID => props.with_message_id(short()),
                PROPERTY_REPLY_TO => props.with_reply_to(short()),
                PROPERTY_TYPE => props.with_type(short()),
                PROPERTY_USER_ID => props.with_user_id(short()),
                PROPERTY_TIMESTAMP => match value.as_i64().and_then(|v| u64::try_from(v).ok()) {
                    Some(ts) => props.with_timestamp(ts),
                    None => {
                        warn!(key = key.as_str(), "ignoring non numeric property");
                        props
                    }
                },
                PROPERTY_DELIVERY_MODE | PROPERTY_PRIORITY => {
                    match value.as_i64().and_then(|v| u8::try_from(v).ok()) {
                        Some(v) if key == PROPERTY_PRIORITY => props.with_priority(v),
                        Some(v) => props.with_delivery_mode(v),
                        None => {
                            warn!(key = key.as_str(), "ignoring non numeric property");
                            props
                        }
                    }
                }
                _ => {
                    headers.insert(ShortString::from(key.as_str()), value.to_amqp_value());
                    props
                }
            };
        }

        if headers.is_empty() {
            props
        } else {
            props.with_headers(FieldTable::from(headers))
        }
    }

    /// Builds the map back from AMQP basic properties, headers included.
    pub fn from_amqp(props: &BasicProperties) -> Self {
        let mut map = MessageProperties::default();

        let strings = [
            (PROPERTY_APP_ID, props.app_id()),
            (PROPERTY_CLUSTER_ID, props.cluster_id()),
            (PROPERTY_CONTENT_ENCODING, props.content_encoding()),
            (PROPERTY_CONTENT_TYPE, props.content_type()),
            (PROPERTY_CORRELATION_ID, props.correlation_id()),
            (PROPERTY_EXPIRATION, props.expiration()),
            (PROPERTY_MESSAGE_ID, props.message_id()),
            (PROPERTY_REPLY_TO, props.reply_to()),
            (PROPERTY_TYPE, props.kind()),
            (PROPERTY_USER_ID, props.user_id()),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                map.insert(key, value.as_str());
            }
        }

        if let Some(ts) = props.timestamp() {
            map.insert(PROPERTY_TIMESTAMP, *ts as i64);
        }
        if let Some(mode) = props.delivery_mode() {
            map.insert(PROPERTY_DELIVERY_MODE, i64::from(*mode));
        }
        if let Some(priority) = props.priority() {
            map.insert(PROPERTY_PRIORITY, i64::from(*priority));
        }

        if let Some(headers) = props.headers() {
            for (key, value) in headers.inner() {
                if let Some(value) = PropertyValue::from_amqp_value(value) {
                    map.0.entry(key.as_str().to_owned()).or_insert(value);
                }
            }
        }

        map
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for MessageProperties {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        MessageProperties(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A message received by a delivery session.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub body: Vec<u8>,
    pub properties: MessageProperties,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
}

impl Message {
    /// Creates a message with no delivery information attached.
    pub fn new(body: impl Into<Vec<u8>>, properties: MessageProperties) -> Self {
        Message {
            body: body.into(),
            properties,
            delivery_tag: 0,
            redelivered: false,
            exchange: String::new(),
            routing_key: String::new(),
        }
    }

    /// The `type` property, empty when absent.
    pub fn msg_type(&self) -> &str {
        self.properties.get_str(PROPERTY_TYPE).unwrap_or_default()
    }

    /// Body as UTF-8 text, lossy.
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl From<Delivery> for Message {
    fn from(delivery: Delivery) -> Self {
        Message {
            properties: MessageProperties::from_amqp(&delivery.properties),
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            exchange: delivery.exchange.as_str().to_owned(),
            routing_key: delivery.routing_key.as_str().to_owned(),
            body: delivery.data,
        }
    }
}
