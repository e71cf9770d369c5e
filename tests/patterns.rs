// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod support;

use amqp_patterns::{
    message::PROPERTY_TYPE, AmqpError, ConsumerHandler, DefaultRouteMap, DeliveryHandle,
    DeliverySession, ExchangeKind, HandlerError, Lifecycle, Message, MessageProperties,
    PatternFactory, Publisher,
};
use async_trait::async_trait;
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
    time::Duration,
};
use support::{eventually, topic_matches, MemoryBroker};
use tokio::task::JoinHandle;

type Received = Arc<Mutex<Vec<String>>>;

fn factory(broker: &MemoryBroker) -> PatternFactory<MemoryBroker> {
    PatternFactory::new(broker.clone(), Lifecycle::default())
}

/// Registers a callback recording message bodies.
fn record_into(session: &mut DeliverySession) -> Received {
    let received = Received::default();
    let sink = received.clone();
    session
        .set_callback(move |msg: &Message, _: &DeliveryHandle| -> Result<(), HandlerError> {
            sink.lock().unwrap().push(msg.body_str().into_owned());
            Ok(())
        })
        .unwrap();
    received
}

fn count(received: &Received) -> usize {
    received.lock().unwrap().len()
}

fn spawn_run(mut session: DeliverySession) -> JoinHandle<(DeliverySession, Result<(), AmqpError>)> {
    tokio::spawn(async move {
        let result = session.run().await;
        (session, result)
    })
}

#[tokio::test]
async fn task_publisher_default_key_reaches_one_worker() {
    let broker = MemoryBroker::new();
    let factory = factory(&broker);

    let mut worker = factory
        .create_task_worker(Some("tasks"), Some("jobs"), &[])
        .await
        .unwrap();
    let received = record_into(&mut worker);
    let running = spawn_run(worker);
    broker.wait_for_consumers(1).await;

    let publisher = factory
        .create_task_publisher(Some("tasks"), Some("jobs"))
        .await
        .unwrap();
    publisher
        .publish(b"hello", MessageProperties::new(), None)
        .await
        .unwrap();

    eventually(|| count(&received) == 1).await;
    broker.shutdown();

    let (worker, result) = running.await.unwrap();
    result.unwrap();

    assert_eq!(*received.lock().unwrap(), vec!["hello"]);
    assert_eq!(broker.acks().len(), 1);
    assert!(broker.rejects().is_empty());
    assert_eq!(broker.exchange_kind("tasks"), Some(ExchangeKind::Direct));

    worker.close().await.unwrap();
    publisher.close().await.unwrap();
    assert_eq!(broker.closed_channels(), 2);
}

#[tokio::test]
async fn default_exchange_task_queue_routes_by_name() {
    let broker = MemoryBroker::new();
    let factory = factory(&broker);

    let mut worker = factory.create_task_worker(None, Some("jobs"), &[]).await.unwrap();
    let received = record_into(&mut worker);
    let running = spawn_run(worker);
    broker.wait_for_consumers(1).await;

    let publisher = factory.create_task_publisher(None, Some("jobs")).await.unwrap();
    publisher
        .publish(b"direct to queue", MessageProperties::new(), None)
        .await
        .unwrap();

    eventually(|| count(&received) == 1).await;
    broker.shutdown();
    running.await.unwrap().1.unwrap();

    assert_eq!(*received.lock().unwrap(), vec!["direct to queue"]);
}

#[tokio::test]
async fn fanout_subscribers_each_receive_every_message() {
    let broker = MemoryBroker::new();
    let factory = factory(&broker);

    let mut first = factory.create_fanout_subscriber("logs").await.unwrap();
    let mut second = factory.create_fanout_subscriber("logs").await.unwrap();
    let first_received = record_into(&mut first);
    let second_received = record_into(&mut second);
    let running = [spawn_run(first), spawn_run(second)];
    broker.wait_for_consumers(2).await;

    let publisher = factory.create_fanout_publisher("logs").await.unwrap();
    for body in ["a", "b", "c"] {
        publisher
            .publish(body.as_bytes(), MessageProperties::new(), None)
            .await
            .unwrap();
    }

    eventually(|| count(&first_received) == 3 && count(&second_received) == 3).await;
    broker.shutdown();
    for run in running {
        run.await.unwrap().1.unwrap();
    }

    assert_eq!(*first_received.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(*second_received.lock().unwrap(), vec!["a", "b", "c"]);
    // no ack cycle for fanout subscribers
    assert!(broker.acks().is_empty());
    assert!(broker.rejects().is_empty());
}

#[tokio::test]
async fn competing_workers_share_the_queue() {
    let broker = MemoryBroker::new();
    let factory = factory(&broker);

    let received = Received::default();
    let mut running = vec![];
    for _ in 0..2 {
        let mut worker = factory
            .create_task_worker(Some("tasks"), Some("jobs"), &[])
            .await
            .unwrap();
        let sink = received.clone();
        worker
            .set_callback(move |msg: &Message, _: &DeliveryHandle| -> Result<(), HandlerError> {
                sink.lock().unwrap().push(msg.body_str().into_owned());
                Ok(())
            })
            .unwrap();
        running.push(spawn_run(worker));
    }
    broker.wait_for_consumers(2).await;

    let publisher = factory
        .create_task_publisher(Some("tasks"), Some("jobs"))
        .await
        .unwrap();
    for i in 0..10 {
        publisher
            .publish(format!("job-{i}").as_bytes(), MessageProperties::new(), None)
            .await
            .unwrap();
    }

    eventually(|| count(&received) == 10).await;
    broker.shutdown();
    for run in running {
        run.await.unwrap().1.unwrap();
    }

    let unique: BTreeSet<String> = received.lock().unwrap().iter().cloned().collect();
    assert_eq!(unique.len(), 10);
    assert_eq!(broker.acks().len(), 10);
    assert_eq!(broker.queue_declarations("jobs"), 2);
}

#[tokio::test]
async fn topic_subscriber_only_gets_matching_keys() {
    let broker = MemoryBroker::new();
    let factory = factory(&broker);

    let mut subscriber = factory
        .create_topic_subscriber("events", Some("orders"), &["orders.*"])
        .await
        .unwrap();
    let received = record_into(&mut subscriber);
    let running = spawn_run(subscriber);
    broker.wait_for_consumers(1).await;

    let publisher = factory.create_topic_publisher("events", None).await.unwrap();
    for key in ["orders.created", "invoices.paid", "orders.shipped", "orders.eu.created"] {
        publisher
            .publish(key.as_bytes(), MessageProperties::new(), Some(key))
            .await
            .unwrap();
    }

    eventually(|| count(&received) == 2).await;
    broker.shutdown();
    running.await.unwrap().1.unwrap();

    assert_eq!(
        *received.lock().unwrap(),
        vec!["orders.created", "orders.shipped"]
    );
}

/// Interrupts the lifecycle while handling the first message.
struct InterruptOnFirst {
    lifecycle: Lifecycle,
    received: Received,
}

#[async_trait]
impl ConsumerHandler for InterruptOnFirst {
    async fn exec(&self, msg: &Message, _delivery: &DeliveryHandle) -> Result<(), HandlerError> {
        let first = self.received.lock().unwrap().is_empty();
        if first {
            self.lifecycle.interrupt();
            // the in-flight delivery still completes
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.received.lock().unwrap().push(msg.body_str().into_owned());
        Ok(())
    }
}

#[tokio::test]
async fn interrupt_drains_then_resume_reenters_the_loop() {
    let broker = MemoryBroker::new();
    let lifecycle = Lifecycle::default();
    let factory = PatternFactory::new(broker.clone(), lifecycle.clone());

    // queue and bindings exist before anything is published
    let publisher = factory
        .create_task_publisher(Some("tasks"), Some("jobs"))
        .await
        .unwrap();
    let mut worker = factory
        .create_task_worker(Some("tasks"), Some("jobs"), &[])
        .await
        .unwrap();
    let received = Received::default();
    worker
        .set_callback(InterruptOnFirst {
            lifecycle: lifecycle.clone(),
            received: received.clone(),
        })
        .unwrap();

    let running = spawn_run(worker);
    broker.wait_for_consumers(1).await;
    for body in ["one", "two", "three"] {
        publisher
            .publish(body.as_bytes(), MessageProperties::new(), None)
            .await
            .unwrap();
    }

    let (mut worker, result) = running.await.unwrap();
    result.unwrap();
    assert_eq!(*received.lock().unwrap(), vec!["one"]);
    assert_eq!(broker.acks().len(), 1);

    lifecycle.resume();
    let running = spawn_run(worker);
    eventually(|| count(&received) == 3).await;
    broker.shutdown();
    let (worker, result) = running.await.unwrap();
    result.unwrap();

    assert_eq!(*received.lock().unwrap(), vec!["one", "two", "three"]);
    assert_eq!(broker.acks().len(), 3);
    // the second run reused the consumer and topology
    assert_eq!(broker.queue_declarations("jobs"), 1);
    assert_eq!(broker.consumers(), 1);

    worker.close().await.unwrap();
    publisher.close().await.unwrap();
}

#[tokio::test]
async fn unhandled_callback_error_rejects_and_stops() {
    let broker = MemoryBroker::new();
    let factory = factory(&broker);

    let publisher = factory
        .create_task_publisher(Some("tasks"), Some("jobs"))
        .await
        .unwrap();
    let mut worker = factory
        .create_task_worker(Some("tasks"), Some("jobs"), &[])
        .await
        .unwrap();
    worker
        .set_callback(|_: &Message, _: &DeliveryHandle| -> Result<(), HandlerError> {
            Err("cannot parse payload".into())
        })
        .unwrap();

    let running = spawn_run(worker);
    broker.wait_for_consumers(1).await;
    publisher
        .publish(b"garbage", MessageProperties::new(), None)
        .await
        .unwrap();

    let (worker, result) = running.await.unwrap();

    assert_eq!(
        result,
        Err(AmqpError::DeliveryError("cannot parse payload".to_owned()))
    );
    assert_eq!(broker.rejects().len(), 1);
    assert!(!broker.rejects()[0].1);
    assert!(broker.acks().is_empty());

    drop(worker);
    // dropping the session still releases its channel
    eventually(|| broker.closed_channels() == 1).await;
    publisher.close().await.unwrap();
}

#[tokio::test]
async fn error_handler_keeps_the_worker_running() {
    let broker = MemoryBroker::new();
    let factory = factory(&broker);

    let mut worker = factory
        .create_task_worker(Some("tasks"), Some("jobs"), &[])
        .await
        .unwrap();
    let failures = Received::default();
    let sink = failures.clone();
    worker
        .set_callback(|msg: &Message, _: &DeliveryHandle| -> Result<(), HandlerError> {
            if msg.body == b"bad" {
                return Err("rejected payload".into());
            }
            Ok(())
        })
        .unwrap()
        .set_error_handler(move |err: &HandlerError, msg: &Message, _: &DeliveryHandle| {
            sink.lock()
                .unwrap()
                .push(format!("{}: {}", msg.body_str(), err));
        })
        .unwrap();

    let running = spawn_run(worker);
    broker.wait_for_consumers(1).await;

    let publisher = factory
        .create_task_publisher(Some("tasks"), Some("jobs"))
        .await
        .unwrap();
    for body in ["good", "bad", "good"] {
        publisher
            .publish(body.as_bytes(), MessageProperties::new(), None)
            .await
            .unwrap();
    }

    eventually(|| broker.acks().len() + broker.rejects().len() == 3).await;
    broker.shutdown();
    running.await.unwrap().1.unwrap();

    assert_eq!(*failures.lock().unwrap(), vec!["bad: rejected payload"]);
    assert_eq!(broker.acks().len(), 2);
    assert_eq!(broker.rejects().len(), 1);
    assert!(!broker.rejects()[0].1);
}

#[tokio::test]
async fn requeued_message_is_redelivered() {
    let broker = MemoryBroker::new();
    let factory = factory(&broker);

    let mut worker = factory
        .create_task_worker(Some("tasks"), Some("jobs"), &[])
        .await
        .unwrap();
    let deliveries = Arc::new(Mutex::new(vec![]));
    let sink = deliveries.clone();
    worker
        .set_callback(move |msg: &Message, d: &DeliveryHandle| -> Result<(), HandlerError> {
            sink.lock().unwrap().push(msg.redelivered);
            if !msg.redelivered {
                d.requeue()?;
            }
            Ok(())
        })
        .unwrap();

    let running = spawn_run(worker);
    broker.wait_for_consumers(1).await;

    let publisher = factory
        .create_task_publisher(Some("tasks"), Some("jobs"))
        .await
        .unwrap();
    publisher
        .publish(b"retry", MessageProperties::new(), None)
        .await
        .unwrap();

    eventually(|| broker.acks().len() == 1).await;
    broker.shutdown();
    running.await.unwrap().1.unwrap();

    assert_eq!(*deliveries.lock().unwrap(), vec![false, true]);
    assert_eq!(broker.rejects().len(), 1);
    assert!(broker.rejects()[0].1);
}

#[tokio::test]
async fn routed_publisher_follows_the_route_table() {
    let broker = MemoryBroker::new();
    let factory = factory(&broker);

    let mut subscriber = factory
        .create_topic_subscriber("users", None, &["users.#"])
        .await
        .unwrap();
    let types = Received::default();
    let sink = types.clone();
    subscriber
        .set_callback(move |msg: &Message, _: &DeliveryHandle| -> Result<(), HandlerError> {
            let msg_type = msg.properties.get_str(PROPERTY_TYPE).unwrap_or_default();
            sink.lock().unwrap().push(format!("{msg_type}@{}", msg.routing_key));
            Ok(())
        })
        .unwrap();
    let running = spawn_run(subscriber);
    broker.wait_for_consumers(1).await;

    let routes = DefaultRouteMap::from_json(
        r#"{
            "user.created": { "exchange": "users", "exchange_type": "topic", "routing_key": "users.created" },
            "user.deleted": { "exchange": "users", "exchange_type": "topic", "routing_key": "users.deleted" }
        }"#,
    )
    .unwrap();
    let routed = factory.create_routed_publisher(routes).await.unwrap();

    routed
        .dispatch_json("user.created", &serde_json::json!({"id": 1}), MessageProperties::new())
        .await
        .unwrap();
    routed
        .dispatch("user.deleted", b"{\"id\":1}", MessageProperties::new())
        .await
        .unwrap();
    // unrouted types go to the default exchange and reach nobody here
    routed
        .dispatch("order.paid", b"{}", MessageProperties::new())
        .await
        .unwrap();

    eventually(|| count(&types) == 2).await;
    broker.shutdown();
    running.await.unwrap().1.unwrap();

    assert_eq!(
        *types.lock().unwrap(),
        vec!["user.created@users.created", "user.deleted@users.deleted"]
    );
}

#[test]
fn topic_patterns_match_like_the_broker() {
    assert!(topic_matches("orders.*", "orders.created"));
    assert!(!topic_matches("orders.*", "orders.eu.created"));
    assert!(topic_matches("orders.#", "orders.eu.created"));
    assert!(topic_matches("#", "anything.at.all"));
    assert!(!topic_matches("orders.*", "invoices.paid"));
}
