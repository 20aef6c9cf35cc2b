use crate::core::NodeId;
use crate::pool::PoolState;
use im::OrdMap;
use std::time::Duration;
use tokio::time::Instant;

/// What a node knows about one other member of its pool.
#[derive(Clone, Debug, PartialEq)]
pub struct MembershipRecord {
  /// The member.
  pub id: NodeId,
  /// When anything was last heard from it.
  pub last_heartbeat_at: Instant,
  /// Offline-age periods it has been silent for, as of the last scan.
  pub missed_count: u32,
  /// The state it announced in its last heartbeat.
  pub declared_state: PoolState,
  /// Its leader-election priority.
  pub priority: i32,
  /// Version of the table it announced in its last heartbeat.
  pub table_version: u64,
}

/// The records of every other node the local node has heard from. The local node itself is never
/// part of it.
#[derive(Clone, Debug)]
pub struct Membership {
  me: NodeId,
  records: OrdMap<NodeId, MembershipRecord>,
}
impl Membership {
  /// An empty view. `me` is never recorded.
  pub fn new(me: NodeId) -> Membership {
    Membership {
      me: me,
      records: OrdMap::new(),
    }
  }

  /// Records a heartbeat. Returns `true` if the sender was not known before.
  pub fn observe(
    &mut self,
    id: &NodeId,
    state: PoolState,
    priority: i32,
    table_version: u64,
    now: Instant,
  ) -> bool {
    if id == &self.me {
      return false;
    }
    let added = !self.records.contains_key(id);
    self.records.insert(
      id.clone(),
      MembershipRecord {
        id: id.clone(),
        last_heartbeat_at: now,
        missed_count: 0,
        declared_state: state,
        priority: priority,
        table_version: table_version,
      },
    );
    added
  }

  /// Counts a message from `id` that is not a heartbeat as a sign of life. Nodes first heard of
  /// this way are assumed active. Returns `true` if `id` was not known before.
  pub fn touch(&mut self, id: &NodeId, table_version: u64, now: Instant) -> bool {
    if id == &self.me {
      return false;
    }
    match self.records.get_mut(id) {
      Some(rec) => {
        rec.last_heartbeat_at = now;
        rec.missed_count = 0;
        rec.table_version = rec.table_version.max(table_version);
        false
      }
      None => self.observe(id, PoolState::Active, 0, table_version, now),
    }
  }

  /// Forgets `id` at once, as when it leaves.
  pub fn remove(&mut self, id: &NodeId) -> Option<MembershipRecord> {
    self.records.remove(id)
  }

  /// Updates every record's miss count and removes the ones that reached `limit`.
  ///
  /// A node misses one heartbeat for every full `age` it stays silent beyond the first, so with
  /// `limit = 3` and `age = 1s` a node is dropped once it has been silent for more than 3s.
  pub fn scan(&mut self, now: Instant, age: Duration, limit: u32) -> Vec<MembershipRecord> {
    let age = age.as_nanos().max(1);
    let mut offline = Vec::new();
    let ids = self.records.keys().cloned().collect::<Vec<_>>();
    for id in ids.iter() {
      if let Some(rec) = self.records.get_mut(id) {
        let silence = now.saturating_duration_since(rec.last_heartbeat_at).as_nanos();
        rec.missed_count = if silence > age {
          ((silence - 1) / age).min(u32::MAX as u128) as u32
        } else {
          0
        };
      }
    }
    let expired = self
      .records
      .values()
      .filter(|r| r.missed_count >= limit)
      .map(|r| r.id.clone())
      .collect::<Vec<_>>();
    for id in expired {
      if let Some(rec) = self.records.remove(&id) {
        offline.push(rec);
      }
    }
    offline
  }

  /// The record of `id`, if known.
  pub fn get(&self, id: &NodeId) -> Option<&MembershipRecord> {
    self.records.get(id)
  }

  /// Whether `id` is a known peer.
  pub fn contains(&self, id: &NodeId) -> bool {
    self.records.contains_key(id)
  }

  /// Records of the members that last declared themselves active, ordered by id.
  pub fn active(&self) -> impl Iterator<Item = &MembershipRecord> {
    self
      .records
      .values()
      .filter(|r| r.declared_state == PoolState::Active)
  }

  /// Highest table version any member announced.
  pub fn max_version(&self) -> u64 {
    self.records.values().map(|r| r.table_version).max().unwrap_or(0)
  }

  /// A copy of every record.
  pub fn records(&self) -> Vec<MembershipRecord> {
    self.records.values().cloned().collect()
  }

  /// Number of known peers.
  pub fn len(&self) -> usize {
    self.records.len()
  }

  /// Whether no peer is known.
  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_after_limit_silent_periods() {
    let t0 = Instant::now();
    let age = Duration::from_millis(1000);
    let mut m = Membership::new(NodeId::from("me"));
    assert!(m.observe(&NodeId::from("b"), PoolState::Active, 0, 1, t0));
    assert!(!m.observe(&NodeId::from("me"), PoolState::Active, 0, 1, t0));
    assert!(m.scan(t0 + Duration::from_millis(2500), age, 3).is_empty());
    assert_eq!(m.get(&NodeId::from("b")).map(|r| r.missed_count), Some(2));
    assert!(m.scan(t0 + Duration::from_millis(3000), age, 3).is_empty());
    let gone = m.scan(t0 + Duration::from_millis(3001), age, 3);
    assert_eq!(gone.len(), 1);
    assert_eq!(gone[0].id, NodeId::from("b"));
    assert!(m.is_empty());
  }

  #[test]
  fn test_heartbeat_resets_misses_and_rejoins() {
    let t0 = Instant::now();
    let age = Duration::from_millis(100);
    let b = NodeId::from("b");
    let mut m = Membership::new(NodeId::from("me"));
    m.observe(&b, PoolState::Query, 0, 0, t0);
    m.scan(t0 + Duration::from_millis(250), age, 3);
    assert_eq!(m.get(&b).map(|r| r.missed_count), Some(2));
    assert!(!m.touch(&b, 4, t0 + Duration::from_millis(260)));
    assert_eq!(m.get(&b).map(|r| r.missed_count), Some(0));
    assert_eq!(m.max_version(), 4);
    m.scan(t0 + Duration::from_millis(1000), age, 3);
    assert!(!m.contains(&b));
    assert!(m.observe(&b, PoolState::Active, 2, 4, t0 + Duration::from_millis(1100)));
    assert_eq!(m.active().map(|r| r.priority).collect::<Vec<_>>(), vec![2]);
  }
}
