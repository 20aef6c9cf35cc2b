use crate::core::{CoordBody, CoordinationChannel, Forward, NodeId};
use crate::extract::ExtractorRegistry;
use crate::pool::{
  BucketHasher, PoolConfig, PoolSnapshot, PoolState, Route, RuleEngine, SuspendPolicy,
};
use crossbeam::queue::ArrayQueue;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

/// What became of a routed event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
  /// The local node owns the event's bucket (or pooling is off) and processed it.
  Processed,
  /// No key could be extracted. The event was processed locally.
  Unroutable,
  /// Sent on to the owner of its bucket.
  Forwarded(NodeId),
  /// Held until the node is active again.
  Queued,
  /// Not accepted.
  Rejected(RejectReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
  /// The node is locked.
  Inactive,
  /// The node is joining and the pool is configured to reject events meanwhile.
  Suspended,
  /// Forwarding to the owner failed.
  SendFailed,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// An event held back while the node is joining.
enum Held {
  /// Arrived through [`Router::route`]. Gets its bucket and a fresh hop budget once routed.
  Local { topic: String, payload: Vec<u8> },
  /// Forwarded here by another node. Keeps the bucket and remaining hops it arrived with.
  Forwarded { from: NodeId, fwd: Forward },
}

/// Runs jobs one after another on tokio's blocking pool, away from the pool manager's task.
#[derive(Clone)]
pub(crate) struct Dispatcher {
  tx: UnboundedSender<Job>,
}
impl Dispatcher {
  pub fn start(node: NodeId) -> Dispatcher {
    let (tx, mut rx) = unbounded_channel::<Job>();
    tokio::spawn(async move {
      while let Some(job) = rx.recv().await {
        if let Err(e) = tokio::task::spawn_blocking(job).await {
          error!(node = %node, error = %e, "rule engine job failed");
        }
      }
    });
    Dispatcher { tx: tx }
  }

  pub fn submit<F: FnOnce() + Send + 'static>(&self, job: F) -> bool {
    self.tx.send(Box::new(job)).is_ok()
  }
}

/// Decides, for every inbound business event, whether it is processed here or sent to the node
/// that owns its bucket.
pub(crate) struct Router {
  me: NodeId,
  enabled: bool,
  max_hops: u8,
  suspend: SuspendPolicy,
  hasher: BucketHasher,
  extractors: Arc<ExtractorRegistry>,
  engine: Arc<dyn RuleEngine>,
  channel: CoordinationChannel,
  snapshot: watch::Receiver<PoolSnapshot>,
  queue: ArrayQueue<Held>,
  dispatcher: Dispatcher,
}
impl Router {
  pub fn new(
    me: NodeId,
    config: &PoolConfig,
    extractors: Arc<ExtractorRegistry>,
    engine: Arc<dyn RuleEngine>,
    channel: CoordinationChannel,
    snapshot: watch::Receiver<PoolSnapshot>,
  ) -> Router {
    Router {
      dispatcher: Dispatcher::start(me.clone()),
      me: me,
      enabled: config.enabled,
      max_hops: config.max_hops,
      suspend: config.suspend_policy,
      hasher: BucketHasher::new(config.buckets),
      extractors: extractors,
      engine: engine,
      channel: channel,
      snapshot: snapshot,
      queue: ArrayQueue::new(config.queue_capacity.max(1)),
    }
  }

  pub fn route(self: &Arc<Self>, topic: &str, payload: Vec<u8>) -> RouteOutcome {
    if !self.enabled {
      self.engine.process(topic, &payload);
      return RouteOutcome::Processed;
    }
    let snapshot = self.snapshot.borrow().clone();
    let table = match (&snapshot.state, &snapshot.table) {
      (PoolState::Active, Some(table)) => table.clone(),
      (PoolState::Inactive, _) => {
        trace!(node = %self.me, topic, "rejecting event while inactive");
        return RouteOutcome::Rejected(RejectReason::Inactive);
      }
      _ => {
        let held = Held::Local {
          topic: topic.to_string(),
          payload: payload,
        };
        return self.suspend(held);
      }
    };

    let key = self
      .engine
      .decode(topic, &payload)
      .and_then(|event| self.extractors.extract(&*event));
    match self.hasher.bucket(key.as_deref()) {
      Route::Unroutable => {
        debug!(node = %self.me, topic, "no partition key, processing locally");
        self.engine.process(topic, &payload);
        RouteOutcome::Unroutable
      }
      Route::Bucket(bucket) => match table.owner(bucket) {
        Some(owner) if owner != &self.me => {
          let owner = owner.clone();
          self.forward(owner, bucket, self.max_hops, topic.to_string(), payload)
        }
        _ => {
          self.engine.process(topic, &payload);
          RouteOutcome::Processed
        }
      },
    }
  }

  /// Holds an event until the node is active. The node may have turned active between the state
  /// check and the push, after the manager already drained, so the state is read again once the
  /// event is in the queue.
  fn suspend(self: &Arc<Self>, held: Held) -> RouteOutcome {
    match self.suspend {
      SuspendPolicy::Reject => RouteOutcome::Rejected(RejectReason::Suspended),
      SuspendPolicy::Queue => {
        let mut item = held;
        while let Err(back) = self.queue.push(item) {
          item = back;
          if self.queue.pop().is_some() {
            warn!(node = %self.me, "suspended-event queue full, dropped the oldest event");
          }
        }
        if self.snapshot.borrow().routable() {
          self.drain();
        }
        RouteOutcome::Queued
      }
    }
  }

  fn forward(
    &self,
    owner: NodeId,
    bucket: u32,
    hops: u8,
    topic: String,
    payload: Vec<u8>,
  ) -> RouteOutcome {
    trace!(node = %self.me, owner = %owner, bucket, hops, "forwarding event");
    let body = CoordBody::Forward(Forward {
      target: owner.clone(),
      bucket: bucket,
      hops: hops,
      topic: topic,
      payload: payload,
    });
    match self.channel.send(body) {
      Ok(()) => RouteOutcome::Forwarded(owner),
      Err(e) => {
        warn!(node = %self.me, owner = %owner, bucket, error = %e, "could not forward event");
        RouteOutcome::Rejected(RejectReason::SendFailed)
      }
    }
  }

  /// Handles an event another node forwarded here. The bucket it carries is trusted; only the
  /// ownership is checked again against the local table.
  pub fn accept_forward(self: &Arc<Self>, from: &NodeId, fwd: Forward, snapshot: &PoolSnapshot) {
    let owner = match (&snapshot.state, &snapshot.table) {
      (PoolState::Active, Some(table)) => table.owner(fwd.bucket).cloned(),
      (PoolState::Inactive, _) => {
        warn!(
          node = %self.me, from = %from, bucket = fwd.bucket,
          "dropping forwarded event while inactive"
        );
        return;
      }
      _ => {
        let bucket = fwd.bucket;
        let held = Held::Forwarded {
          from: from.clone(),
          fwd: fwd,
        };
        if let RouteOutcome::Rejected(_) = self.suspend(held) {
          warn!(
            node = %self.me, from = %from, bucket,
            "dropping forwarded event while joining"
          );
        }
        return;
      }
    };
    match owner {
      Some(owner) if owner == self.me => {
        trace!(node = %self.me, from = %from, bucket = fwd.bucket, "processing forwarded event");
        let engine = self.engine.clone();
        let Forward { topic, payload, .. } = fwd;
        self.dispatcher.submit(move || engine.process(&topic, &payload));
      }
      Some(owner) if fwd.hops > 0 => {
        debug!(
          node = %self.me, from = %from, owner = %owner, bucket = fwd.bucket,
          "forwarded event is not ours, forwarding again"
        );
        let _ = self.forward(owner, fwd.bucket, fwd.hops - 1, fwd.topic, fwd.payload);
      }
      Some(owner) => {
        error!(
          node = %self.me, from = %from, owner = %owner, bucket = fwd.bucket,
          "hop limit reached, dropping forwarded event"
        );
      }
      None => {
        error!(
          node = %self.me, from = %from, bucket = fwd.bucket,
          "forwarded event names a bucket outside the table, dropping it"
        );
      }
    }
  }

  /// Routes everything queued while the node was joining. Only what is queued right now is
  /// drained, so events that get queued again are not looped over. Forwarded events go through
  /// the same ownership and hop checks as when they first arrived.
  pub fn drain(self: &Arc<Self>) {
    let pending = self.queue.len();
    if pending == 0 {
      return;
    }
    debug!(node = %self.me, pending, "routing queued events");
    for _ in 0..pending {
      let held = match self.queue.pop() {
        Some(held) => held,
        None => break,
      };
      let router = self.clone();
      self.dispatcher.submit(move || match held {
        Held::Local { topic, payload } => {
          router.route(&topic, payload);
        }
        Held::Forwarded { from, fwd } => {
          let snapshot = router.snapshot.borrow().clone();
          router.accept_forward(&from, fwd, &snapshot);
        }
      });
    }
  }

  /// Drops everything queued. Returns how many events were lost.
  pub fn clear(&self) -> usize {
    let mut n = 0;
    while self.queue.pop().is_some() {
      n += 1;
    }
    n
  }

  pub fn queued(&self) -> usize {
    self.queue.len()
  }
}
