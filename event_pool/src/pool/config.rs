use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Which node a pool prefers as the author of its assignment table.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaderPolicyKind {
  /// The lexicographically lowest node id wins.
  LowestId,
  /// The highest configured priority wins; ties go to the lowest id.
  HighestPriority,
}
impl FromStr for LeaderPolicyKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "lowestId" => Ok(LeaderPolicyKind::LowestId),
      "highestPriority" => Ok(LeaderPolicyKind::HighestPriority),
      _ => Err("expected 'lowestId' or 'highestPriority'".to_string()),
    }
  }
}

/// What the router does with events while the node is joining the pool.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuspendPolicy {
  /// Hold them in a bounded queue and route them once the node is active.
  Queue,
  /// Refuse them.
  Reject,
}
impl FromStr for SuspendPolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "queue" => Ok(SuspendPolicy::Queue),
      "reject" => Ok(SuspendPolicy::Reject),
      _ => Err("expected 'queue' or 'reject'".to_string()),
    }
  }
}

/// Settings of one pool. Every node of a pool should use the same values, except for `priority`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PoolConfig {
  /// Whether pooling is on at all. When off, every event is processed locally.
  ///
  /// default: true
  pub enabled: bool,

  /// The coordination topic shared by the members of the pool.
  ///
  /// default: "pool-coordination"
  pub topic: String,

  /// Number of buckets the key space is cut into.
  ///
  /// default: 1024
  pub buckets: u32,

  /// How many offline-age periods a node may stay silent before it is declared offline.
  ///
  /// default: 3
  pub offline_limit: u32,

  /// Silence longer than this counts as a missed heartbeat.
  ///
  /// default: 60 seconds
  pub offline_age: Duration,

  /// Heartbeat interval right after joining.
  ///
  /// default: 5 seconds
  pub start_heartbeat: Duration,

  /// How long an unlocked node waits before it rejoins.
  ///
  /// default: 50 seconds
  pub reactivate: Duration,

  /// How long a joining node waits for the pool to answer. Also how long the start heartbeat
  /// interval is used after becoming active.
  ///
  /// default: 15 seconds
  pub identification: Duration,

  /// How often the leader checks whether the table must be recomputed or republished.
  ///
  /// default: 10 seconds
  pub leader: Duration,

  /// Steady-state heartbeat interval.
  ///
  /// default: 20 seconds
  pub active_heartbeat: Duration,

  /// Minimum spacing between any two heartbeats.
  ///
  /// default: 500 milliseconds
  pub inter_heartbeat: Duration,

  /// How often a forwarded event may be forwarded again before it is dropped.
  ///
  /// default: 3
  pub max_hops: u8,

  /// This node's weight under [`LeaderPolicyKind::HighestPriority`].
  ///
  /// default: 0
  pub priority: i32,

  /// default: [`LeaderPolicyKind::LowestId`]
  pub leader_policy: LeaderPolicyKind,

  /// default: [`SuspendPolicy::Queue`]
  pub suspend_policy: SuspendPolicy,

  /// Events held at most while suspended. The oldest are dropped first.
  ///
  /// default: 1000
  pub queue_capacity: usize,
}
impl Default for PoolConfig {
  fn default() -> Self {
    PoolConfig {
      enabled: true,
      topic: "pool-coordination".to_string(),
      buckets: 1024,
      offline_limit: 3,
      offline_age: Duration::from_millis(60_000),
      start_heartbeat: Duration::from_millis(5_000),
      reactivate: Duration::from_millis(50_000),
      identification: Duration::from_millis(15_000),
      leader: Duration::from_millis(10_000),
      active_heartbeat: Duration::from_millis(20_000),
      inter_heartbeat: Duration::from_millis(500),
      max_hops: 3,
      priority: 0,
      leader_policy: LeaderPolicyKind::LowestId,
      suspend_policy: SuspendPolicy::Queue,
      queue_capacity: 1000,
    }
  }
}
impl PoolConfig {
  /// Reads a pool's settings out of a flat property map. For a key `k`, `pool.<pool_name>.k` is
  /// consulted first, then `pool.k`; absent keys keep their defaults.
  pub fn from_properties(
    pool_name: &str,
    props: &HashMap<String, String>,
  ) -> Result<PoolConfig, ConfigError> {
    let props = Properties {
      pool: pool_name,
      props: props,
    };
    let mut cfg = PoolConfig::default();
    props.parse("enabled", &mut cfg.enabled)?;
    if let Some(topic) = props.get("topic") {
      cfg.topic = topic.1.clone();
    }
    props.parse("buckets", &mut cfg.buckets)?;
    props.parse("offlineLimit", &mut cfg.offline_limit)?;
    props.millis("offlineAgeMs", &mut cfg.offline_age)?;
    props.millis("startHeartbeatMs", &mut cfg.start_heartbeat)?;
    props.millis("reactivateMs", &mut cfg.reactivate)?;
    props.millis("identificationMs", &mut cfg.identification)?;
    props.millis("leaderMs", &mut cfg.leader)?;
    props.millis("activeHeartbeatMs", &mut cfg.active_heartbeat)?;
    props.millis("interHeartbeatMs", &mut cfg.inter_heartbeat)?;
    props.parse("maxHops", &mut cfg.max_hops)?;
    props.parse("priority", &mut cfg.priority)?;
    props.parse("leaderPolicy", &mut cfg.leader_policy)?;
    props.parse("suspendPolicy", &mut cfg.suspend_policy)?;
    props.parse("queueCapacity", &mut cfg.queue_capacity)?;
    cfg.validate()?;
    Ok(cfg)
  }

  /// Rejects settings the protocol cannot run with.
  pub fn validate(&self) -> Result<(), ConfigError> {
    let invalid = |key: &str, value: String, reason: &str| ConfigError::InvalidProperty {
      key: format!("pool.{}", key),
      value: value,
      reason: reason.to_string(),
    };
    if self.topic.is_empty() {
      return Err(invalid("topic", String::new(), "must not be empty"));
    }
    if self.buckets == 0 {
      return Err(invalid("buckets", "0".to_string(), "must be positive"));
    }
    if self.offline_limit == 0 {
      return Err(invalid("offlineLimit", "0".to_string(), "must be positive"));
    }
    if self.queue_capacity == 0 {
      return Err(invalid("queueCapacity", "0".to_string(), "must be positive"));
    }
    let timers = [
      ("offlineAgeMs", self.offline_age),
      ("startHeartbeatMs", self.start_heartbeat),
      ("identificationMs", self.identification),
      ("leaderMs", self.leader),
      ("activeHeartbeatMs", self.active_heartbeat),
    ];
    for (key, dur) in timers.iter() {
      if dur.is_zero() {
        return Err(invalid(*key, "0".to_string(), "must be positive"));
      }
    }
    Ok(())
  }

  /// Period of the offline scan. Never longer than the steady-state heartbeat interval.
  pub fn offline_tick(&self) -> Duration {
    self.offline_age.min(self.active_heartbeat)
  }
}

struct Properties<'a> {
  pool: &'a str,
  props: &'a HashMap<String, String>,
}
impl<'a> Properties<'a> {
  fn get(&self, key: &str) -> Option<(String, &'a String)> {
    let scoped = format!("pool.{}.{}", self.pool, key);
    if let Some(v) = self.props.get(&scoped) {
      return Some((scoped, v));
    }
    let global = format!("pool.{}", key);
    self.props.get(&global).map(|v| (global, v))
  }

  fn parse<T>(&self, key: &str, slot: &mut T) -> Result<(), ConfigError>
  where
    T: FromStr,
    T::Err: ToString,
  {
    if let Some((full, raw)) = self.get(key) {
      *slot = raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidProperty {
        key: full,
        value: raw.clone(),
        reason: e.to_string(),
      })?;
    }
    Ok(())
  }

  fn millis(&self, key: &str, slot: &mut Duration) -> Result<(), ConfigError> {
    let mut ms = slot.as_millis() as u64;
    self.parse(key, &mut ms)?;
    *slot = Duration::from_millis(ms);
    Ok(())
  }
}
