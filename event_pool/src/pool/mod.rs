//! The pooling protocol: which node owns which events, and how events get to their owner.
//!
//! ### Buckets and Tables
//! Every event maps to a partition key (see [`extract`](crate::extract)), and every key to one of
//! a fixed number of buckets through a [`BucketHasher`]. A [`BucketTable`] assigns each bucket to
//! exactly one node. Tables are versioned and immutable; nodes only ever replace their table with
//! one of a higher version.
//!
//! ### Membership
//! Each node runs a small state machine. A node that joins starts in [`PoolState::Start`] and asks
//! the pool to identify itself. If an active member answers, the node moves to
//! [`PoolState::Query`] and waits for the leader's table; with the table it becomes
//! [`PoolState::Active`]. If nobody answers within the identification timeout, the node concludes
//! it is alone and builds a table of its own. Active nodes heartbeat; nodes that stay silent for
//! too long are declared offline. A locked node announces that it leaves and goes
//! [`PoolState::Inactive`] until it is unlocked, and then rejoins after a delay.
//!
//! ### Leadership
//! The leader is simply the author of the current table. It recomputes the table when a member
//! joins, leaves or goes offline, keeping bucket movement to a minimum, and republishes it
//! periodically. If the leader itself disappears, the member preferred by the pool's
//! [`LeaderPolicy`] takes over by publishing a table with a higher version.
//!
//! ### Routing
//! [`PoolCoordinator::route`] processes an event locally when this node owns its bucket, and
//! otherwise forwards it, unmodified, to the owner. The owner checks its own table again and
//! forwards once more if the sender's table was stale, up to a hop limit.

mod config;
mod coordinator;
mod engine;
mod hasher;
mod leader;
mod manager;
mod membership;
mod router;
mod state;
mod table;

#[rustfmt::skip]
pub(crate) use {
  manager::PoolCmd,
  manager::PoolManager,
  manager::PoolMsg,
  router::Router,
};

#[rustfmt::skip]
pub use {
  config::LeaderPolicyKind,
  config::PoolConfig,
  config::SuspendPolicy,
  coordinator::Collaborators,
  coordinator::PoolCoordinator,
  engine::AdminState,
  engine::RuleEngine,
  hasher::stable_hash,
  hasher::BucketHasher,
  hasher::Route,
  leader::elect,
  leader::Candidate,
  leader::HighestPriority,
  leader::LeaderPolicy,
  leader::LowestId,
  membership::Membership,
  membership::MembershipRecord,
  router::RejectReason,
  router::RouteOutcome,
  state::PoolEvent,
  state::PoolSnapshot,
  state::PoolState,
  table::BucketTable,
};
