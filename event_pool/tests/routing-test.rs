mod common;

use common::*;
use event_pool::core::{CoordBody, CoordMsg, Forward, NodeId, Transport};
use event_pool::pool::{
  BucketHasher, BucketTable, PoolConfig, PoolState, RejectReason, Route, RouteOutcome,
  SuspendPolicy,
};
use event_pool::testkit::{BusEndpoint, MemoryBus};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{sleep, timeout};

async fn wait_processed(nodes: &[&TestNode], total: usize) {
  timeout(TIMEOUT, async {
    while nodes.iter().map(|n| n.engine.count()).sum::<usize>() < total {
      sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .expect("events were not processed in time");
}

fn bucket_of(key: &str, buckets: u32) -> u32 {
  match BucketHasher::new(buckets).bucket(Some(key)) {
    Route::Bucket(b) => b,
    Route::Unroutable => panic!("key without bucket"),
  }
}

/// Publishes a forwarded event on the coordination topic as if another node had routed it.
fn forward_from(
  from: &BusEndpoint,
  coordination: &str,
  target: &NodeId,
  bucket: u32,
  hops: u8,
  payload: Vec<u8>,
) {
  let msg = CoordMsg {
    sender: NodeId::from("stale"),
    body: CoordBody::Forward(Forward {
      target: target.clone(),
      bucket: bucket,
      hops: hops,
      topic: "orders".to_string(),
      payload: payload,
    }),
  };
  from.send(coordination, msg.encode().unwrap()).unwrap();
}

async fn wait_queued(node: &TestNode, n: usize) {
  timeout(TIMEOUT, async {
    while node.pool.queued() < n {
      sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .expect("events were not queued in time");
}

async fn pair(bus: &MemoryBus, config: PoolConfig) -> (TestNode, TestNode) {
  let a = TestNode::start(bus, "a", config.clone());
  a.wait(|s| s.routable()).await;
  let b = TestNode::start(bus, "b", config);
  converge(&[&a, &b]).await;
  (a, b)
}

#[tokio::test(start_paused = true)]
async fn every_event_is_processed_exactly_once_by_its_owner() {
  let bus = MemoryBus::default();
  let (a, b) = pair(&bus, fast_config()).await;
  let snap = a.pool.snapshot();

  let mut expect_a = HashSet::new();
  let mut expect_b = HashSet::new();
  for i in 0..10 {
    let mine = key_owned_by(&snap, &a.id, &format!("a{}", i));
    let theirs = key_owned_by(&snap, &b.id, &format!("b{}", i));
    let (pa, pb) = (order_payload(&i.to_string(), &mine), order_payload(&i.to_string(), &theirs));
    assert_eq!(a.pool.route("orders", pa.clone()), RouteOutcome::Processed);
    assert_eq!(
      a.pool.route("orders", pb.clone()),
      RouteOutcome::Forwarded(b.id.clone())
    );
    expect_a.insert(pa);
    expect_b.insert(pb);
  }
  wait_processed(&[&a, &b], 20).await;
  sleep(Duration::from_millis(1000)).await;

  let got_a = a.engine.processed();
  let got_b = b.engine.processed();
  assert_eq!(got_a.len(), 10);
  assert_eq!(got_b.len(), 10);
  assert_eq!(got_a.into_iter().map(|p| p.payload).collect::<HashSet<_>>(), expect_a);
  assert_eq!(got_b.iter().map(|p| p.payload.clone()).collect::<HashSet<_>>(), expect_b);
  assert!(got_b.iter().all(|p| p.topic == "orders"));
}

#[tokio::test(start_paused = true)]
async fn events_without_key_stay_local() {
  let bus = MemoryBus::default();
  let (a, b) = pair(&bus, fast_config()).await;
  assert_eq!(a.pool.route("orders", b"no key here".to_vec()), RouteOutcome::Unroutable);
  assert_eq!(b.pool.route("orders", b"nor here".to_vec()), RouteOutcome::Unroutable);
  assert_eq!(a.engine.count(), 1);
  assert_eq!(b.engine.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn forwarded_event_follows_the_newer_table_within_hop_limit() {
  let bus = MemoryBus::default();
  let config = fast_config();
  let (a, mut b) = pair(&bus, config.clone()).await;
  let key = key_owned_by(&a.pool.snapshot(), &b.id, "stale");
  let bucket = bucket_of(&key, config.buckets);

  // A node with an outdated table sends B's event to A.
  let stale = bus.endpoint(&NodeId::from("stale"));
  let send = |hops: u8, id: &str| {
    forward_from(&stale, &config.topic, &a.id, bucket, hops, order_payload(id, &key))
  };

  send(0, "exhausted");
  sleep(Duration::from_millis(1000)).await;
  assert_eq!(a.engine.count(), 0);
  assert_eq!(b.engine.count(), 0);

  send(1, "rerouted");
  let got = timeout(TIMEOUT, b.processed.recv()).await.unwrap().unwrap();
  assert_eq!(got.payload, order_payload("rerouted", &key));
  sleep(Duration::from_millis(1000)).await;
  assert_eq!(a.engine.count(), 0);
  assert_eq!(b.engine.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn joining_node_queues_and_drains_once_active() {
  let bus = MemoryBus::default();
  let a = TestNode::start(&bus, "a", fast_config());
  a.wait(|s| s.routable()).await;

  let b_id = NodeId::from("b");
  bus.isolate(&b_id);
  let b = TestNode::start(&bus, "b", fast_config());
  b.wait(|s| s.state == PoolState::Start).await;
  for i in 0..3 {
    let payload = order_payload(&i.to_string(), &format!("customer-{}", i));
    assert_eq!(b.pool.route("orders", payload), RouteOutcome::Queued);
  }
  assert_eq!(b.pool.queued(), 3);

  bus.heal(&b_id);
  converge(&[&a, &b]).await;
  wait_processed(&[&a, &b], 3).await;
  sleep(Duration::from_millis(1000)).await;
  assert_eq!(a.engine.count() + b.engine.count(), 3);
  assert_eq!(b.pool.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn forward_queued_while_joining_keeps_its_hop_limit() {
  let bus = MemoryBus::default();
  let config = fast_config();
  let mut a = TestNode::start(&bus, "a", config.clone());
  let first = a.wait(|s| s.routable()).await.table.unwrap();

  // B and a node with an outdated table can only see each other while B joins.
  let (b_id, stale_id) = (NodeId::from("b"), NodeId::from("stale"));
  bus.partition(&[&[b_id.clone(), stale_id.clone()]]);
  let b = TestNode::start(&bus, "b", config.clone());
  b.wait(|s| s.state == PoolState::Start).await;

  // A owns the bucket before and after B joins.
  let members = [a.id.clone(), b_id.clone()];
  let next = BucketTable::assign(Some(&*first), &members, &a.id, 2, config.buckets);
  let bucket = (0..config.buckets)
    .find(|i| first.owner(*i) == Some(&a.id) && next.owner(*i) == Some(&a.id))
    .unwrap();
  let stale = bus.endpoint(&stale_id);
  forward_from(&stale, &config.topic, &b_id, bucket, 0, order_payload("exhausted", "c"));
  forward_from(&stale, &config.topic, &b_id, bucket, 1, order_payload("allowed", "c"));
  wait_queued(&b, 2).await;
  assert_eq!(a.engine.count() + b.engine.count(), 0);

  bus.heal_all();
  converge(&[&a, &b]).await;
  let got = timeout(TIMEOUT, a.processed.recv()).await.unwrap().unwrap();
  assert_eq!(got.payload, order_payload("allowed", "c"));
  sleep(Duration::from_millis(1000)).await;
  assert_eq!(a.engine.count(), 1);
  assert_eq!(b.engine.count(), 0);
  assert_eq!(b.pool.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn full_queue_drops_the_oldest_event() {
  let bus = MemoryBus::default();
  let b_id = NodeId::from("b");
  bus.isolate(&b_id);
  let config = PoolConfig {
    queue_capacity: 2,
    ..fast_config()
  };
  let b = TestNode::start(&bus, "b", config);
  b.wait(|s| s.state == PoolState::Start).await;
  for i in 0..3 {
    assert_eq!(b.pool.route("orders", order_payload(&i.to_string(), "c")), RouteOutcome::Queued);
  }
  assert_eq!(b.pool.queued(), 2);

  // Alone, b elects itself and processes what is left.
  b.wait(|s| s.routable()).await;
  wait_processed(&[&b], 2).await;
  let ids = b
    .engine
    .processed()
    .into_iter()
    .map(|p| p.payload)
    .collect::<Vec<_>>();
  assert_eq!(ids, vec![order_payload("1", "c"), order_payload("2", "c")]);
}

#[tokio::test(start_paused = true)]
async fn reject_policy_refuses_events_while_joining() {
  let bus = MemoryBus::default();
  let config = PoolConfig {
    suspend_policy: SuspendPolicy::Reject,
    ..fast_config()
  };
  let a = TestNode::start(&bus, "a", config);
  a.wait(|s| s.state == PoolState::Start).await;
  assert_eq!(
    a.pool.route("orders", order_payload("1", "c")),
    RouteOutcome::Rejected(RejectReason::Suspended)
  );
  assert_eq!(a.pool.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn reject_policy_drops_forwards_while_joining() {
  let bus = MemoryBus::default();
  let config = PoolConfig {
    suspend_policy: SuspendPolicy::Reject,
    ..fast_config()
  };
  let a = TestNode::start(&bus, "a", config.clone());
  a.wait(|s| s.routable()).await;

  let (b_id, stale_id) = (NodeId::from("b"), NodeId::from("stale"));
  bus.partition(&[&[b_id.clone(), stale_id.clone()]]);
  let b = TestNode::start(&bus, "b", config.clone());
  b.wait(|s| s.state == PoolState::Start).await;
  let stale = bus.endpoint(&stale_id);
  forward_from(&stale, &config.topic, &b_id, 0, 1, order_payload("1", "c"));
  sleep(Duration::from_millis(100)).await;
  assert_eq!(b.pool.queued(), 0);

  bus.heal_all();
  converge(&[&a, &b]).await;
  sleep(Duration::from_millis(1000)).await;
  assert_eq!(a.engine.count() + b.engine.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn locked_node_rejects_and_forgets_queued_events() {
  let bus = MemoryBus::default();
  let a_id = NodeId::from("a");
  bus.isolate(&a_id);
  let a = TestNode::start(&bus, "a", fast_config());
  a.wait(|s| s.state == PoolState::Start).await;
  assert_eq!(a.pool.route("orders", order_payload("1", "c")), RouteOutcome::Queued);

  a.lock.send(true).unwrap();
  a.wait(|s| s.state == PoolState::Inactive).await;
  assert_eq!(a.pool.queued(), 0);
  assert_eq!(
    a.pool.route("orders", order_payload("2", "c")),
    RouteOutcome::Rejected(RejectReason::Inactive)
  );
  sleep(Duration::from_millis(5000)).await;
  assert_eq!(a.engine.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn disabled_pool_processes_everything_locally() {
  let bus = MemoryBus::default();
  let config = PoolConfig {
    enabled: false,
    ..fast_config()
  };
  let a = TestNode::start(&bus, "a", config.clone());
  let b = TestNode::start(&bus, "b", config);
  for i in 0..5 {
    let payload = order_payload(&i.to_string(), &format!("customer-{}", i));
    assert_eq!(a.pool.route("orders", payload.clone()), RouteOutcome::Processed);
    assert_eq!(b.pool.route("orders", payload), RouteOutcome::Processed);
  }
  sleep(Duration::from_millis(5000)).await;
  assert_eq!(a.engine.count(), 5);
  assert_eq!(b.engine.count(), 5);
  assert_eq!(bus.delivered(), 0);
  let snap = a.pool.snapshot();
  assert!(!snap.enabled);
  assert_eq!(snap.state, PoolState::Inactive);
}
