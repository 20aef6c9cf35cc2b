use crate::core::{spawn, ActorHandle, CoordinationChannel, LocalRef, NodeId, Transport};
use crate::error::PoolError;
use crate::extract::ExtractorRegistry;
use crate::pool::{
  AdminState, MembershipRecord, PoolCmd, PoolConfig, PoolEvent, PoolManager, PoolMsg,
  PoolSnapshot, PoolState, RouteOutcome, Router, RuleEngine,
};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::{oneshot, watch};
use tracing::info;

/// The external systems a pool works with.
pub struct Collaborators {
  /// The message bus.
  pub transport: Arc<dyn Transport>,
  /// Executes the events this node owns.
  pub engine: Arc<dyn RuleEngine>,
  /// The node's administrative lock.
  pub admin: AdminState,
}

/// One node's membership in one pool. Owned by the hosting controller; a process may run any
/// number of these side by side.
pub struct PoolCoordinator {
  me: NodeId,
  config: PoolConfig,
  router: Arc<Router>,
  snapshot: watch::Receiver<PoolSnapshot>,
  manager: ActorHandle<PoolMsg>,
}
impl PoolCoordinator {
  /// Validates `config`, subscribes to the coordination topic and starts the protocol. Must be
  /// called inside a tokio runtime.
  pub fn start(
    me: NodeId,
    config: PoolConfig,
    extractors: Arc<ExtractorRegistry>,
    collab: Collaborators,
  ) -> Result<PoolCoordinator, PoolError> {
    config.validate()?;
    let (snapshot_tx, snapshot_rx) = watch::channel(PoolSnapshot::new(
      me.clone(),
      config.enabled,
      PoolState::Inactive,
    ));
    let channel = CoordinationChannel::new(me.clone(), config.topic.clone(), collab.transport);
    let router = Arc::new(Router::new(
      me.clone(),
      &config,
      extractors,
      collab.engine,
      channel.clone(),
      snapshot_rx.clone(),
    ));
    let manager = PoolManager::new(
      me.clone(),
      config.clone(),
      config.leader_policy.policy(),
      channel.clone(),
      router.clone(),
      collab.admin,
      snapshot_tx,
    );
    let handle = spawn(manager, format!("pool-manager-{}", me));
    if config.enabled {
      if let Err(e) = channel.subscribe(handle.local_interface()) {
        handle.terminate();
        return Err(e.into());
      }
    }
    info!(node = %me, topic = %config.topic, enabled = config.enabled, "pool coordinator started");
    Ok(PoolCoordinator {
      me: me,
      config: config,
      router: router,
      snapshot: snapshot_rx,
      manager: handle,
    })
  }

  /// Routes one inbound business event: processes it here, forwards it to its owner, or holds
  /// it while the node is joining. Never fails; the outcome says what happened.
  pub fn route(&self, topic: &str, payload: Vec<u8>) -> RouteOutcome {
    self.router.route(topic, payload)
  }

  /// The local node.
  pub fn node(&self) -> &NodeId {
    &self.me
  }

  /// The configuration the pool was started with.
  pub fn config(&self) -> &PoolConfig {
    &self.config
  }

  /// The latest published routing state.
  pub fn snapshot(&self) -> PoolSnapshot {
    self.snapshot.borrow().clone()
  }

  /// The current lifecycle state.
  pub fn state(&self) -> PoolState {
    self.snapshot.borrow().state
  }

  /// Events routed while joining that still wait for the node to become active.
  pub fn queued(&self) -> usize {
    self.router.queued()
  }

  /// Registers a listener. Its first event is always [`PoolEvent::Identity`].
  pub fn subscribe(&self, subr: LocalRef<PoolEvent>) {
    self.manager.local_interface().send(PoolCmd::Subscribe(subr));
  }

  /// Like [`subscribe`](Self::subscribe), with a fresh channel.
  pub fn subscribe_channel(&self) -> UnboundedReceiver<PoolEvent> {
    let (tx, rx) = unbounded_channel();
    self.subscribe(LocalRef::from_sender(tx));
    rx
  }

  /// What this node currently knows about the other members.
  pub async fn members(&self) -> Result<Vec<MembershipRecord>, PoolError> {
    let (tx, rx) = oneshot::channel();
    self.manager.local_interface().send(PoolCmd::Members(tx));
    rx.await.map_err(|_| PoolError::Stopped)
  }

  /// Waits until the published state satisfies `pred` and returns that state.
  pub async fn wait_until<F>(&self, mut pred: F) -> Result<PoolSnapshot, PoolError>
  where
    F: FnMut(&PoolSnapshot) -> bool,
  {
    let mut rx = self.snapshot.clone();
    loop {
      {
        let current = rx.borrow_and_update();
        if pred(&current) {
          return Ok(current.clone());
        }
      }
      rx.changed().await.map_err(|_| PoolError::Stopped)?;
    }
  }

  /// Leaves the pool. An active node announces its departure first.
  pub fn stop(&self) {
    self.manager.terminate();
  }

  /// Whether the coordinator has stopped.
  pub fn is_stopped(&self) -> bool {
    self.manager.is_finished()
  }
}
impl Drop for PoolCoordinator {
  fn drop(&mut self) {
    self.manager.terminate();
  }
}
