use crate::core::{LocalRef, NodeId, Transport};
use crate::error::TransportError;
use crate::testkit::{FailureConfig, FailureConfigMap};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::sleep;
use tracing::trace;

struct Subscriber {
  id: u64,
  node: NodeId,
  recvr: LocalRef<Vec<u8>>,
}

#[derive(Default)]
struct BusState {
  fail_map: FailureConfigMap,
  topics: HashMap<String, Vec<Subscriber>>,
  groups: HashMap<NodeId, u32>,
  detached: HashSet<NodeId>,
  next_id: u64,
  delivered: u64,
  dropped: u64,
}
impl BusState {
  fn reachable(&self, from: &NodeId, to: &NodeId) -> bool {
    from == to || self.groups.get(from).copied().unwrap_or(0) == self.groups.get(to).copied().unwrap_or(0)
  }
}

/// An in-process message bus. Every node gets its own [`BusEndpoint`]; messages can be dropped,
/// delayed, or cut off by partitions.
#[derive(Clone, Default)]
pub struct MemoryBus {
  state: Arc<Mutex<BusState>>,
}
impl MemoryBus {
  /// A bus whose deliveries follow `fail_map`.
  pub fn new(fail_map: FailureConfigMap) -> MemoryBus {
    let bus = MemoryBus::default();
    bus.lock().fail_map = fail_map;
    bus
  }

  fn lock(&self) -> MutexGuard<'_, BusState> {
    self.state.lock().unwrap_or_else(|p| p.into_inner())
  }

  /// The transport `node` publishes and subscribes through.
  pub fn endpoint(&self, node: &NodeId) -> Arc<BusEndpoint> {
    self.lock().detached.remove(node);
    Arc::new(BusEndpoint {
      node: node.clone(),
      bus: self.clone(),
    })
  }

  /// Replaces the failure settings for later messages.
  pub fn set_failures(&self, fail_map: FailureConfigMap) {
    self.lock().fail_map = fail_map;
  }

  /// Cuts `node` off from everybody else until [`heal`](Self::heal).
  pub fn isolate(&self, node: &NodeId) {
    let mut state = self.lock();
    let group = state.groups.values().copied().max().unwrap_or(0) + 1;
    state.groups.insert(node.clone(), group);
  }

  /// Splits the bus: nodes only reach nodes of their own group. Nodes not named stay in the
  /// default group.
  pub fn partition(&self, groups: &[&[NodeId]]) {
    let mut state = self.lock();
    state.groups.clear();
    for (i, group) in groups.iter().enumerate() {
      for node in group.iter() {
        state.groups.insert(node.clone(), i as u32 + 1);
      }
    }
  }

  /// Puts `node` back into the default group.
  pub fn heal(&self, node: &NodeId) {
    self.lock().groups.remove(node);
  }

  /// Lifts every partition.
  pub fn heal_all(&self) {
    self.lock().groups.clear();
  }

  /// Simulates a crash: `node` loses its subscriptions and can no longer send.
  pub fn detach(&self, node: &NodeId) {
    let mut state = self.lock();
    state.detached.insert(node.clone());
    for subs in state.topics.values_mut() {
      subs.retain(|s| &s.node != node);
    }
  }

  /// Messages handed to a subscriber so far.
  pub fn delivered(&self) -> u64 {
    self.lock().delivered
  }

  /// Messages lost to failure injection or partitions so far.
  pub fn dropped(&self) -> u64 {
    self.lock().dropped
  }

  fn publish(&self, from: &NodeId, topic: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
    let (fail_cfg, targets) = {
      let mut state = self.lock();
      if state.detached.contains(from) {
        return Err(TransportError::NotSubscribed {
          node: from.to_string(),
          topic: topic.to_string(),
        });
      }
      let fail_cfg: FailureConfig = *state.fail_map.get(from);
      let all = state
        .topics
        .get(topic)
        .map(|subs| {
          subs
            .iter()
            .map(|s| (s.id, s.node.clone(), s.recvr.clone()))
            .collect::<Vec<_>>()
        })
        .unwrap_or_default();
      let (targets, cut): (Vec<_>, Vec<_>) =
        all.into_iter().partition(|(_, to, _)| state.reachable(from, to));
      state.dropped += cut.len() as u64;
      (fail_cfg, targets)
    };

    let mut rng = FailureConfig::rng();
    let mut dead = Vec::new();
    for (id, to, recvr) in targets {
      if &to != from && fail_cfg.drops(&mut rng) {
        trace!(from = %from, to = %to, topic, "bus dropped message");
        self.lock().dropped += 1;
        continue;
      }
      let bytes = bytes.clone();
      match fail_cfg.sample_delay(&mut rng).filter(|_| &to != from) {
        Some(delay) => {
          let bus = self.clone();
          tokio::spawn(async move {
            sleep(delay).await;
            if recvr.send(bytes) {
              bus.lock().delivered += 1;
            }
          });
        }
        None => {
          if recvr.send(bytes) {
            self.lock().delivered += 1;
          } else {
            dead.push(id);
          }
        }
      }
    }
    if !dead.is_empty() {
      let mut state = self.lock();
      if let Some(subs) = state.topics.get_mut(topic) {
        subs.retain(|s| !dead.contains(&s.id));
      }
    }
    Ok(())
  }
}

/// One node's connection to a [`MemoryBus`].
pub struct BusEndpoint {
  node: NodeId,
  bus: MemoryBus,
}
impl BusEndpoint {
  /// The node this endpoint belongs to.
  pub fn node(&self) -> &NodeId {
    &self.node
  }
}
impl Transport for BusEndpoint {
  fn send(&self, topic: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
    self.bus.publish(&self.node, topic, bytes)
  }

  fn subscribe(&self, topic: &str, recvr: LocalRef<Vec<u8>>) -> Result<(), TransportError> {
    let mut state = self.bus.lock();
    if state.detached.contains(&self.node) {
      return Err(TransportError::Subscribe {
        topic: topic.to_string(),
        reason: format!("endpoint '{}' was detached", self.node),
      });
    }
    state.next_id += 1;
    let id = state.next_id;
    state
      .topics
      .entry(topic.to_string())
      .or_default()
      .push(Subscriber {
        id: id,
        node: self.node.clone(),
        recvr: recvr,
      });
    Ok(())
  }
}
