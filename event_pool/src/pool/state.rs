use crate::core::NodeId;
use crate::pool::BucketTable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where a node is in its pool membership lifecycle.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolState {
  /// Just activated; asked the pool to identify itself and waits for an answer.
  Start,
  /// Knows the pool is populated; waits for the leader's assignment table.
  Query,
  /// Holds a table, heartbeats and routes events.
  Active,
  /// Administratively locked: silent, routes nothing.
  Inactive,
}
impl fmt::Display for PoolState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      PoolState::Start => "START",
      PoolState::Query => "QUERY",
      PoolState::Active => "ACTIVE",
      PoolState::Inactive => "INACTIVE",
    };
    f.write_str(s)
  }
}

/// Notifications delivered to subscribers of a [`PoolCoordinator`](crate::pool::PoolCoordinator).
///
/// The first event every subscriber receives is [`PoolEvent::Identity`], no matter when it
/// subscribes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolEvent {
  /// The identifier of the local node.
  Identity(NodeId),
  /// The local node moved between lifecycle states.
  StateChanged {
    /// The state left.
    from: PoolState,
    /// The state entered.
    to: PoolState,
  },
  /// The local node installed a new assignment table.
  TableAdopted {
    /// Version of the new table.
    version: u64,
    /// Its author.
    leader: NodeId,
  },
  /// The local node authored the table it now holds.
  BecameLeader {
    /// Version of that table.
    version: u64,
  },
  /// A node was seen for the first time, or again after being dropped.
  MemberAdded(NodeId),
  /// A node stopped heartbeating and was declared offline.
  MemberOffline(NodeId),
  /// A node announced that it is leaving the pool.
  MemberLeft(NodeId),
}

/// An immutable view of a node's routing state, published on every change.
#[derive(Clone, Debug)]
pub struct PoolSnapshot {
  /// The local node.
  pub node: NodeId,
  /// Whether pooling is enabled at all.
  pub enabled: bool,
  /// Current lifecycle state.
  pub state: PoolState,
  /// The assignment table currently trusted, if any.
  pub table: Option<Arc<BucketTable>>,
}
impl PoolSnapshot {
  pub(crate) fn new(node: NodeId, enabled: bool, state: PoolState) -> PoolSnapshot {
    PoolSnapshot {
      node: node,
      enabled: enabled,
      state: state,
      table: None,
    }
  }

  /// Events may only be routed while active and holding a table.
  pub fn routable(&self) -> bool {
    self.state == PoolState::Active && self.table.is_some()
  }

  /// Version of the held table, `0` when there is none.
  pub fn version(&self) -> u64 {
    self.table.as_ref().map(|t| t.version()).unwrap_or(0)
  }

  /// The author of the held table.
  pub fn leader(&self) -> Option<&NodeId> {
    self.table.as_ref().map(|t| t.leader())
  }

  /// Whether the local node authored the held table.
  pub fn is_leader(&self) -> bool {
    self.leader() == Some(&self.node)
  }
}
