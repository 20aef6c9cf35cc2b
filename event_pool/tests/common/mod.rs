#![allow(dead_code)]
use event_pool::core::NodeId;
use event_pool::extract::{ExtractorRegistry, Inspect};
use event_pool::pool::{
  BucketHasher, Collaborators, PoolConfig, PoolCoordinator, PoolEvent, PoolSnapshot, Route,
};
use event_pool::testkit::{init_logging, LogLevel, MemoryBus, Processed, RecordingEngine};
use event_pool::Inspect;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

pub const TIMEOUT: Duration = Duration::from_millis(30_000);

#[derive(Inspect, Clone, Debug)]
#[inspect(name = "Order")]
pub struct Order {
  pub id: String,
  pub customer: String,
}

/// Payloads are `<id>:<customer>`.
pub fn order_payload(id: &str, customer: &str) -> Vec<u8> {
  format!("{}:{}", id, customer).into_bytes()
}

pub fn decode_order(_: &str, payload: &[u8]) -> Option<Box<dyn Inspect>> {
  let text = std::str::from_utf8(payload).ok()?;
  let (id, customer) = text.split_once(':')?;
  Some(Box::new(Order {
    id: id.to_string(),
    customer: customer.to_string(),
  }))
}

pub fn fast_config() -> PoolConfig {
  PoolConfig {
    buckets: 64,
    offline_limit: 3,
    offline_age: Duration::from_millis(1000),
    start_heartbeat: Duration::from_millis(200),
    reactivate: Duration::from_millis(2000),
    identification: Duration::from_millis(1000),
    leader: Duration::from_millis(500),
    active_heartbeat: Duration::from_millis(300),
    inter_heartbeat: Duration::from_millis(50),
    ..PoolConfig::default()
  }
}

pub fn order_registry() -> Arc<ExtractorRegistry> {
  let registry = ExtractorRegistry::new();
  registry.register_type::<Order>();
  registry.add_rule("Order", "${customer}").unwrap();
  Arc::new(registry)
}

pub struct TestNode {
  pub id: NodeId,
  pub pool: PoolCoordinator,
  pub engine: Arc<RecordingEngine>,
  pub processed: UnboundedReceiver<Processed>,
  pub events: UnboundedReceiver<PoolEvent>,
  pub lock: watch::Sender<bool>,
}
impl TestNode {
  pub fn start(bus: &MemoryBus, name: &str, config: PoolConfig) -> TestNode {
    init_logging(LogLevel::Warn);
    let id = NodeId::from(name);
    let (engine, processed) = RecordingEngine::new(decode_order);
    let engine = Arc::new(engine);
    let (lock, admin) = watch::channel(false);
    let collab = Collaborators {
      transport: bus.endpoint(&id),
      engine: engine.clone(),
      admin: admin,
    };
    let pool = PoolCoordinator::start(id.clone(), config, order_registry(), collab).unwrap();
    let events = pool.subscribe_channel();
    TestNode {
      id: id,
      pool: pool,
      engine: engine,
      processed: processed,
      events: events,
      lock: lock,
    }
  }

  pub async fn wait<F>(&self, pred: F) -> PoolSnapshot
  where
    F: FnMut(&PoolSnapshot) -> bool,
  {
    timeout(TIMEOUT, self.pool.wait_until(pred))
      .await
      .expect("timed out waiting for pool state")
      .unwrap()
  }

  /// Waits for the next event matching `pred`, skipping the others.
  pub async fn expect_event<F>(&mut self, mut pred: F) -> PoolEvent
  where
    F: FnMut(&PoolEvent) -> bool,
  {
    timeout(TIMEOUT, async {
      loop {
        match self.events.recv().await {
          Some(e) if pred(&e) => return e,
          Some(_) => continue,
          None => panic!("event stream of {} closed", self.id),
        }
      }
    })
    .await
    .expect("timed out waiting for pool event")
  }
}

/// Waits until every node holds the same table, covering exactly `nodes`.
pub async fn converge(nodes: &[&TestNode]) -> u64 {
  let ids = {
    let mut ids = nodes.iter().map(|n| n.id.clone()).collect::<Vec<_>>();
    ids.sort();
    ids
  };
  timeout(TIMEOUT, async {
    loop {
      let snaps = nodes.iter().map(|n| n.pool.snapshot()).collect::<Vec<_>>();
      let first = snaps[0].version();
      let settled = snaps.iter().all(|s| {
        s.routable()
          && s.version() == first
          && s.table.as_ref().map(|t| t.members()) == Some(ids.clone())
      });
      if settled {
        return first;
      }
      sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .expect("pool did not converge")
}

/// A customer key whose bucket `owner` owns in `snapshot`'s table.
pub fn key_owned_by(snapshot: &PoolSnapshot, owner: &NodeId, salt: &str) -> String {
  let table = snapshot.table.as_ref().expect("no table");
  let hasher = BucketHasher::new(table.buckets());
  (0..10_000)
    .map(|i| format!("{}-{}", salt, i))
    .find(|k| match hasher.bucket(Some(k)) {
      Route::Bucket(b) => table.owner(b) == Some(owner),
      Route::Unroutable => false,
    })
    .expect("no key found for owner")
}
