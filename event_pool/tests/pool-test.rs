mod common;

use common::*;
use event_pool::core::{CoordBody, CoordMsg, LocalRef, NodeId, Transport};
use event_pool::pool::{BucketTable, LeaderPolicyKind, PoolConfig, PoolEvent, PoolState};
use event_pool::testkit::{FailureConfig, FailureConfigMap, MemoryBus};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::{sleep, timeout, Instant};

/// The next table `from` publishes, skipping every other message.
async fn next_table(rx: &mut UnboundedReceiver<Vec<u8>>, from: &NodeId) -> BucketTable {
  timeout(TIMEOUT, async {
    loop {
      let bytes = rx.recv().await.expect("bus subscription closed");
      match CoordMsg::decode(&bytes) {
        Ok(CoordMsg {
          sender,
          body: CoordBody::AssignmentTable(table),
        }) if &sender == from => return table,
        _ => continue,
      }
    }
  })
  .await
  .expect("no table published in time")
}

#[tokio::test(start_paused = true)]
async fn lone_node_elects_itself_after_identification_timeout() {
  let bus = MemoryBus::default();
  let started = Instant::now();
  let mut a = TestNode::start(&bus, "a", fast_config());
  assert_eq!(a.events.recv().await, Some(PoolEvent::Identity(a.id.clone())));

  let snap = a.wait(|s| s.routable()).await;
  assert!(started.elapsed() >= Duration::from_millis(1000));
  assert_eq!(snap.state, PoolState::Active);
  assert_eq!(snap.version(), 1);
  assert!(snap.is_leader());
  let table = snap.table.unwrap();
  assert_eq!(table.buckets(), 64);
  assert!(table.owners().iter().all(|o| o == &a.id));
  a.expect_event(|e| matches!(e, PoolEvent::BecameLeader { version: 1 }))
    .await;
}

#[tokio::test(start_paused = true)]
async fn joining_node_ends_on_leaders_version() {
  let bus = MemoryBus::default();
  let a = TestNode::start(&bus, "a", fast_config());
  a.wait(|s| s.routable()).await;

  let mut b = TestNode::start(&bus, "b", fast_config());
  let version = converge(&[&a, &b]).await;
  assert_eq!(version, 2);

  let (sa, sb) = (a.pool.snapshot(), b.pool.snapshot());
  assert_eq!(sa.leader(), Some(&a.id));
  assert_eq!(sb.leader(), Some(&a.id));
  let load = sb.table.as_ref().unwrap().load().values().copied().collect::<Vec<_>>();
  assert_eq!(load, vec![32, 32]);

  b.expect_event(|e| *e == PoolEvent::StateChanged {
    from: PoolState::Start,
    to: PoolState::Query,
  })
  .await;
  b.expect_event(|e| *e == PoolEvent::StateChanged {
    from: PoolState::Query,
    to: PoolState::Active,
  })
  .await;

  let members = a.pool.members().await.unwrap();
  assert_eq!(members.len(), 1);
  assert_eq!(members[0].id, b.id);
  assert_eq!(members[0].declared_state, PoolState::Active);
}

#[tokio::test(start_paused = true)]
async fn partitioned_leaders_merge_into_one_table() {
  let bus = MemoryBus::default();
  let (a_id, b_id) = (NodeId::from("a"), NodeId::from("b"));
  bus.partition(&[&[a_id], &[b_id]]);
  let a = TestNode::start(&bus, "a", fast_config());
  let b = TestNode::start(&bus, "b", fast_config());
  let (sa, sb) = (a.wait(|s| s.routable()).await, b.wait(|s| s.routable()).await);
  assert!(sa.is_leader() && sb.is_leader());
  assert_eq!((sa.version(), sb.version()), (1, 1));

  bus.heal_all();
  let version = converge(&[&a, &b]).await;
  assert!(version >= 2);
  assert_eq!(a.pool.snapshot().leader(), Some(&a.id));
  assert_eq!(b.pool.snapshot().leader(), Some(&a.id));
  assert!(!b.pool.snapshot().is_leader());
}

#[tokio::test(start_paused = true)]
async fn leader_answers_outdated_and_conflicting_tables() {
  let config = PoolConfig {
    leader: Duration::from_millis(60_000),
    ..fast_config()
  };
  let bus = MemoryBus::default();
  let a = TestNode::start(&bus, "a", config.clone());
  a.wait(|s| s.routable()).await;
  let b = TestNode::start(&bus, "b", config.clone());
  assert_eq!(converge(&[&a, &b]).await, 2);

  let stale_id = NodeId::from("stale");
  let stale = bus.endpoint(&stale_id);
  let (tx, mut rx) = unbounded_channel();
  stale.subscribe(&config.topic, LocalRef::from_sender(tx)).unwrap();
  let publish = |version: u64| {
    let table = BucketTable::assign(None, &[stale_id.clone()], &stale_id, version, config.buckets);
    let msg = CoordMsg {
      sender: stale_id.clone(),
      body: CoordBody::AssignmentTable(table),
    };
    stale.send(&config.topic, msg.encode().unwrap()).unwrap();
  };

  // An outdated table gets the current one back, unchanged.
  publish(1);
  let answer = next_table(&mut rx, &a.id).await;
  assert_eq!(answer.version(), 2);
  assert_eq!(answer.leader(), &a.id);
  assert_eq!(b.pool.snapshot().version(), 2);

  // A rival table with the same version loses to the preferred leader, who publishes a newer one.
  publish(2);
  let answer = next_table(&mut rx, &a.id).await;
  assert_eq!(answer.version(), 3);
  assert_eq!(answer.leader(), &a.id);
  b.wait(|s| s.version() == 3).await;
  assert_eq!(b.pool.snapshot().leader(), Some(&a.id));
}

#[tokio::test(start_paused = true)]
async fn pool_converges_over_a_lossy_bus() {
  let bus = MemoryBus::new(FailureConfigMap {
    pool_wide: FailureConfig {
      drop_prob: 0.3,
      delay: Some((Duration::from_millis(0), Duration::from_millis(40))),
    },
    ..FailureConfigMap::default()
  });
  let a = TestNode::start(&bus, "a", fast_config());
  a.wait(|s| s.routable()).await;
  let b = TestNode::start(&bus, "b", fast_config());
  let c = TestNode::start(&bus, "c", fast_config());
  converge(&[&a, &b, &c]).await;

  let leader = a.pool.snapshot().leader().cloned();
  assert!(leader.is_some());
  for node in [&b, &c] {
    assert_eq!(node.pool.snapshot().leader().cloned(), leader);
    let load = node.pool.snapshot().table.unwrap().load().values().copied().collect::<Vec<_>>();
    assert!(load.iter().all(|n| *n == 21 || *n == 22), "{:?}", load);
  }
  assert!(bus.dropped() > 0);
}

#[tokio::test(start_paused = true)]
async fn silent_member_goes_offline_and_loses_its_buckets() {
  let bus = MemoryBus::default();
  let mut a = TestNode::start(&bus, "a", fast_config());
  a.wait(|s| s.routable()).await;
  let b = TestNode::start(&bus, "b", fast_config());
  let c = TestNode::start(&bus, "c", fast_config());
  let before = converge(&[&a, &b, &c]).await;
  // Let the start heartbeat interval run out.
  sleep(Duration::from_millis(1500)).await;

  let cut = Instant::now();
  bus.isolate(&c.id);
  let offline = a
    .expect_event(|e| matches!(e, PoolEvent::MemberOffline(_)))
    .await;
  let silent = cut.elapsed();
  assert_eq!(offline, PoolEvent::MemberOffline(c.id.clone()));
  assert!(silent >= Duration::from_millis(2700), "{:?}", silent);
  assert!(silent <= Duration::from_millis(3400), "{:?}", silent);

  let after = converge(&[&a, &b]).await;
  assert!(after > before);
  let table = a.pool.snapshot().table.unwrap();
  assert!(!table.contains(&c.id));
  assert_eq!(table.leader(), &a.id);
}

#[tokio::test(start_paused = true)]
async fn lowest_remaining_member_takes_over_from_dead_leader() {
  let bus = MemoryBus::default();
  let a = TestNode::start(&bus, "a", fast_config());
  a.wait(|s| s.routable()).await;
  let mut b = TestNode::start(&bus, "b", fast_config());
  let c = TestNode::start(&bus, "c", fast_config());
  let before = converge(&[&a, &b, &c]).await;

  // A crash: no goodbye.
  bus.detach(&a.id);
  drop(a);

  b.expect_event(|e| matches!(e, PoolEvent::BecameLeader { .. }))
    .await;
  let after = converge(&[&b, &c]).await;
  assert!(after > before);
  assert_eq!(c.pool.snapshot().leader(), Some(&b.id));
}

#[tokio::test(start_paused = true)]
async fn highest_priority_member_takes_over() {
  let bus = MemoryBus::default();
  let config = |priority| PoolConfig {
    leader_policy: LeaderPolicyKind::HighestPriority,
    priority: priority,
    ..fast_config()
  };
  let a = TestNode::start(&bus, "a", config(10));
  a.wait(|s| s.routable()).await;
  let b = TestNode::start(&bus, "b", config(1));
  let c = TestNode::start(&bus, "c", config(5));
  converge(&[&a, &b, &c]).await;

  bus.detach(&a.id);
  drop(a);
  converge(&[&b, &c]).await;
  assert_eq!(b.pool.snapshot().leader(), Some(&c.id));
}

#[tokio::test(start_paused = true)]
async fn leaving_member_is_reassigned_without_waiting_for_offline() {
  let bus = MemoryBus::default();
  let a = TestNode::start(&bus, "a", fast_config());
  a.wait(|s| s.routable()).await;
  let b = TestNode::start(&bus, "b", fast_config());
  let mut c = TestNode::start(&bus, "c", fast_config());
  converge(&[&a, &b, &c]).await;

  let left = Instant::now();
  b.lock.send(true).unwrap();
  c.expect_event(|e| *e == PoolEvent::MemberLeft(NodeId::from("b")))
    .await;
  converge(&[&a, &c]).await;
  assert!(left.elapsed() < Duration::from_millis(1000));
  assert_eq!(b.pool.state(), PoolState::Inactive);
}

#[tokio::test(start_paused = true)]
async fn unlocked_node_reactivates_once_after_delay() {
  let bus = MemoryBus::default();
  let a = TestNode::start(&bus, "a", fast_config());
  a.wait(|s| s.routable()).await;
  let mut b = TestNode::start(&bus, "b", fast_config());
  converge(&[&a, &b]).await;

  b.lock.send(true).unwrap();
  b.wait(|s| s.state == PoolState::Inactive).await;
  // Flapping the lock only counts the last unlock.
  b.lock.send(false).unwrap();
  sleep(Duration::from_millis(500)).await;
  b.lock.send(true).unwrap();
  sleep(Duration::from_millis(10)).await;
  let unlocked = Instant::now();
  b.lock.send(false).unwrap();

  b.wait(|s| s.state == PoolState::Start).await;
  assert!(unlocked.elapsed() >= Duration::from_millis(2000));
  converge(&[&a, &b]).await;

  sleep(Duration::from_millis(5000)).await;
  let mut restarts = 0;
  while let Ok(e) = b.events.try_recv() {
    if e == (PoolEvent::StateChanged {
      from: PoolState::Inactive,
      to: PoolState::Start,
    }) {
      restarts += 1;
    }
  }
  assert_eq!(restarts, 1);
  assert_eq!(b.pool.state(), PoolState::Active);
}

#[tokio::test(start_paused = true)]
async fn locked_node_stays_silent() {
  let bus = MemoryBus::default();
  let a = TestNode::start(&bus, "a", fast_config());
  a.lock.send(true).unwrap();
  sleep(Duration::from_millis(5000)).await;
  assert_eq!(a.pool.state(), PoolState::Inactive);
  assert!(a.pool.snapshot().table.is_none());
}

#[tokio::test(start_paused = true)]
async fn stop_announces_departure() {
  let bus = MemoryBus::default();
  let mut a = TestNode::start(&bus, "a", fast_config());
  a.wait(|s| s.routable()).await;
  let b = TestNode::start(&bus, "b", fast_config());
  converge(&[&a, &b]).await;

  b.pool.stop();
  a.expect_event(|e| *e == PoolEvent::MemberLeft(NodeId::from("b")))
    .await;
  converge(&[&a]).await;
  sleep(Duration::from_millis(10)).await;
  assert!(b.pool.is_stopped());
  assert_eq!(b.pool.state(), PoolState::Inactive);
}
