mod fixtures;

use evbus_domain::SubscriptionOptions;
use evbus_domain::config::DispatchConfig;
use evbus_event_bus::{BrokerBus, BrokerConnection, EventBus, MemoryBroker, codec};
use fixtures::*;
use std::collections::BTreeSet;

#[tokio::test]
async fn queue_group_splits_work_between_instances() {
    let broker = MemoryBroker::new();
    let (first, second, producer) = (broker_bus(&broker), broker_bus(&broker), broker_bus(&broker));
    let mut rec = Recorder::new();

    let workers = SubscriptionOptions::new().with_group("workers");
    first.subscribe("orders", rec.tagged(1), workers.clone()).await.unwrap();
    second.subscribe("orders", rec.tagged(2), workers).await.unwrap();

    for i in 0..10 {
        producer.publish(&ctx(), event(&format!("o{i}"), "orders")).await.unwrap();
    }

    let got = rec.take(10).await;
    let ids_of = |slot: usize| -> BTreeSet<String> {
        got.iter().filter(|(s, _)| *s == slot).map(|(_, e)| e.id.clone()).collect()
    };
    let (a, b) = (ids_of(1), ids_of(2));
    assert!(a.is_disjoint(&b));
    assert_eq!(a.len() + b.len(), 10);
    assert!(!a.is_empty() && !b.is_empty());
    rec.assert_quiet().await;
}

#[tokio::test]
async fn plain_subscriptions_each_get_every_message() {
    let broker = MemoryBroker::new();
    let (one, two) = (broker_bus(&broker), broker_bus(&broker));
    let mut rec = Recorder::new();
    one.subscribe("news", rec.tagged(1), SubscriptionOptions::new()).await.unwrap();
    two.subscribe("news", rec.tagged(2), SubscriptionOptions::new()).await.unwrap();

    let sent = event("n1", "news");
    one.publish(&ctx(), sent.clone()).await.unwrap();

    let got = rec.take(2).await;
    assert!(got.iter().all(|(_, e)| **e == sent));
    rec.assert_quiet().await;
}

#[tokio::test]
async fn undecodable_messages_are_dropped() {
    let broker = MemoryBroker::new();
    let bus = broker_bus(&broker);
    let mut rec = Recorder::new();
    bus.subscribe("t", rec.handler(), SubscriptionOptions::new()).await.unwrap();

    assert_eq!(broker.publish_raw("t", b"{not json"), 1);
    broker.publish_raw("t", &codec::encode(&event("ok", "t")).unwrap());

    assert_eq!(rec.next().await.id, "ok");
    rec.assert_quiet().await;
}

#[tokio::test]
async fn cancelled_publish_is_a_transport_error() {
    let broker = MemoryBroker::new();
    let bus = broker_bus(&broker);
    let mut rec = Recorder::new();
    bus.subscribe("t", rec.handler(), SubscriptionOptions::new()).await.unwrap();

    let err = bus.publish(&cancelled_ctx(), event("1", "t")).await.unwrap_err();
    assert!(err.is_transport());
    assert!(err.to_string().contains("operation cancelled"));
    rec.assert_quiet().await;
}

#[tokio::test]
async fn closing_one_instance_leaves_others_running() {
    let broker = MemoryBroker::new();
    let (leaving, staying) = (broker_bus(&broker), broker_bus(&broker));
    let mut rec = Recorder::new();
    leaving.subscribe("t", rec.tagged(1), SubscriptionOptions::new()).await.unwrap();
    staying.subscribe("t", rec.tagged(2), SubscriptionOptions::new()).await.unwrap();

    leaving.close().await.unwrap();
    staying.publish(&ctx(), event("1", "t")).await.unwrap();

    let (slot, _) = rec.next_tagged().await;
    assert_eq!(slot, 2);
    rec.assert_quiet().await;
}

#[tokio::test]
async fn close_releases_the_broker_session() {
    let broker = MemoryBroker::new();
    let bus = broker_bus(&broker);
    let rec = Recorder::new();
    bus.subscribe("t", rec.handler(), SubscriptionOptions::new()).await.unwrap();
    bus.subscribe("t", rec.handler(), SubscriptionOptions::new().with_group("g")).await.unwrap();
    assert_eq!(broker.publish_raw("t", b"{}"), 2);

    bus.close().await.unwrap();

    let conn = bus.connection();
    assert!(!conn.is_open());
    assert_eq!(broker.publish_raw("t", b"{}"), 0, "no subscription outlives close");
    assert!(conn.publish("t", b"{}".to_vec()).await.unwrap_err().is_transport());
    assert!(conn.subscribe("t", None).await.is_err());
}

#[tokio::test]
async fn handlers_run_on_bounded_pool() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    let broker = MemoryBroker::new();
    let bus = BrokerBus::new(broker.connect(), &DispatchConfig { max_in_flight: 2 });
    let (running, peak, done) =
        (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));

    let h = {
        let (running, peak, done) = (running.clone(), peak.clone(), done.clone());
        evbus_event_bus::handler(move |_ctx, _event| {
            let (running, peak, done) = (running.clone(), peak.clone(), done.clone());
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            }
        })
    };
    bus.subscribe("burst", h, SubscriptionOptions::new()).await.unwrap();

    for i in 0..8 {
        bus.publish(&ctx(), event(&i.to_string(), "burst")).await.unwrap();
    }
    eventually(|| done.load(Ordering::SeqCst) == 8).await;
    assert!(peak.load(Ordering::SeqCst) <= 2);
}
