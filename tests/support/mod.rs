// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker used by the integration tests.
//!
//! It routes like a real broker for the three exchange types (default
//! exchange included), shares a queue between competing consumers and keeps
//! a log of acks and rejects.

#![allow(dead_code)]

use amqp_patterns::{
    exchange::{ExchangeDefinition, ExchangeKind},
    message::{Message, MessageProperties},
    queue::{QueueBinding, QueueDefinition},
    AmqpChannel, AmqpError, ChannelProvider, ConsumeOptions, DeliveryStream,
};
use async_trait::async_trait;
use futures_util::stream;
use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

type SharedReceiver = Arc<AsyncMutex<mpsc::UnboundedReceiver<Message>>>;

struct QueueState {
    sender: Option<mpsc::UnboundedSender<Message>>,
    receiver: SharedReceiver,
    declarations: usize,
    consumers: usize,
}

impl QueueState {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        QueueState {
            sender: Some(sender),
            receiver: Arc::new(AsyncMutex::new(receiver)),
            declarations: 0,
            consumers: 0,
        }
    }
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<QueueBinding>,
    unacked: HashMap<u64, (String, Message)>,
    next_tag: u64,
    anonymous: usize,
    acks: Vec<u64>,
    rejects: Vec<(u64, bool)>,
    closed_channels: usize,
}

impl BrokerState {
    fn enqueue(&mut self, queue: &str, mut msg: Message) -> bool {
        self.next_tag += 1;
        msg.delivery_tag = self.next_tag;

        let Some(sender) = self.queues.get(queue).and_then(|q| q.sender.as_ref()) else {
            return false;
        };
        if sender.send(msg.clone()).is_err() {
            return false;
        }
        self.unacked.insert(msg.delivery_tag, (queue.to_owned(), msg));
        true
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<BTreeSet<String>, AmqpError> {
        if exchange.is_empty() {
            return Ok(self
                .queues
                .contains_key(routing_key)
                .then(|| routing_key.to_owned())
                .into_iter()
                .collect());
        }

        let kind = self
            .exchanges
            .get(exchange)
            .ok_or(AmqpError::PublishingError)?;

        Ok(self
            .bindings
            .iter()
            .filter(|b| b.exchange_name() == exchange)
            .filter(|b| match kind {
                ExchangeKind::Fanout => true,
                ExchangeKind::Direct => b.key() == routing_key,
                ExchangeKind::Topic => topic_matches(b.key(), routing_key),
            })
            .map(|b| b.queue_name().to_owned())
            .collect())
    }
}

/// Matches a routing key against a topic binding pattern.
pub fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => (0..=key.len()).any(|i| matches(rest, &key[i..])),
            Some((&"*", rest)) => !key.is_empty() && matches(rest, &key[1..]),
            Some((word, rest)) => key.first() == Some(word) && matches(rest, &key[1..]),
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

/// Broker shared by every channel it opens.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        MemoryBroker::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BrokerState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn consumers(&self) -> usize {
        self.with_state(|s| s.queues.values().map(|q| q.consumers).sum())
    }

    pub fn queue_declarations(&self, queue: &str) -> usize {
        self.with_state(|s| s.queues.get(queue).map_or(0, |q| q.declarations))
    }

    pub fn exchange_kind(&self, exchange: &str) -> Option<ExchangeKind> {
        self.with_state(|s| s.exchanges.get(exchange).copied())
    }

    pub fn acks(&self) -> Vec<u64> {
        self.with_state(|s| s.acks.clone())
    }

    pub fn rejects(&self) -> Vec<(u64, bool)> {
        self.with_state(|s| s.rejects.clone())
    }

    pub fn closed_channels(&self) -> usize {
        self.with_state(|s| s.closed_channels)
    }

    /// Stops accepting messages; consumers end once their queue is drained.
    pub fn shutdown(&self) {
        self.with_state(|s| {
            for queue in s.queues.values_mut() {
                queue.sender = None;
            }
        })
    }

    /// Waits until `consumers` consumers are registered.
    pub async fn wait_for_consumers(&self, consumers: usize) {
        eventually(|| self.consumers() >= consumers).await
    }
}

#[async_trait]
impl ChannelProvider for MemoryBroker {
    async fn open_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        Ok(Arc::new(MemoryChannel {
            broker: self.clone(),
        }))
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
}

#[async_trait]
impl AmqpChannel for MemoryChannel {
    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.broker.with_state(|s| {
            match s.exchanges.get(def.name()) {
                Some(kind) if *kind != def.exchange_kind() => {
                    return Err(AmqpError::DeclareExchangeError(def.name().to_owned()))
                }
                Some(_) => {}
                None => {
                    s.exchanges
                        .insert(def.name().to_owned(), def.exchange_kind());
                }
            }
            Ok(())
        })
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        self.broker.with_state(|s| {
            let name = match def.name() {
                Some(name) => name.to_owned(),
                None => {
                    s.anonymous += 1;
                    format!("amq.gen-{}", s.anonymous)
                }
            };
            s.queues
                .entry(name.clone())
                .or_insert_with(QueueState::new)
                .declarations += 1;
            Ok(name)
        })
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.broker.with_state(|s| {
            if !s.exchanges.contains_key(binding.exchange_name()) {
                return Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name().to_owned(),
                    binding.queue_name().to_owned(),
                ));
            }
            if !s.bindings.contains(binding) {
                s.bindings.push(binding.clone());
            }
            Ok(())
        })
    }

    async fn basic_qos(&self, _prefetch_count: u16) -> Result<(), AmqpError> {
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), AmqpError> {
        self.broker.with_state(|s| {
            let message = Message {
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
                ..Message::new(body, properties.clone())
            };

            for queue in s.route(exchange, routing_key)? {
                s.enqueue(&queue, message.clone());
            }
            Ok(())
        })
    }

    async fn basic_consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        let receiver = self.broker.with_state(|s| {
            let state = s
                .queues
                .get_mut(queue)
                .ok_or_else(|| AmqpError::BindingConsumerError(queue.to_owned()))?;
            state.consumers += 1;
            Ok::<_, AmqpError>(state.receiver.clone())
        })?;

        let broker = self.broker.clone();
        let no_ack = options.no_ack;

        Ok(Box::pin(stream::unfold(receiver, move |receiver| {
            let broker = broker.clone();
            async move {
                let msg = receiver.lock().await.recv().await?;
                if no_ack {
                    broker.with_state(|s| s.unacked.remove(&msg.delivery_tag));
                }
                Some((Ok::<_, AmqpError>(msg), receiver))
            }
        })))
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.broker.with_state(|s| {
            s.unacked
                .remove(&delivery_tag)
                .ok_or(AmqpError::AckMessageError)?;
            s.acks.push(delivery_tag);
            Ok(())
        })
    }

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.broker.with_state(|s| {
            let (queue, mut msg) = s
                .unacked
                .remove(&delivery_tag)
                .ok_or(AmqpError::RejectMessageError)?;
            s.rejects.push((delivery_tag, requeue));

            if requeue {
                msg.redelivered = true;
                s.enqueue(&queue, msg);
            }
            Ok(())
        })
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.broker.with_state(|s| s.closed_channels += 1);
        Ok(())
    }
}

/// Polls `cond` until it holds, failing the test after a few seconds.
pub async fn eventually(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}
