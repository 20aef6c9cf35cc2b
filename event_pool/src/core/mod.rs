//! Base plumbing shared by the pool protocol: node identity, mailboxes, the actor loop and the
//! message-bus collaborator.
//!
//! ### Actors
//! Every stateful component of a pool runs as an [`Actor`]: a task that owns its state and
//! consumes one message at a time from an unbounded mailbox. Nothing else touches that state, so
//! the handlers never need locks. Timers are just messages the actor schedules to itself with
//! [`ActorContext::schedule_local_msg`].
//!
//! ```ignore
//! struct Counter(u64);
//!
//! #[async_trait]
//! impl Actor<u64> for Counter {
//!   async fn recv(&mut self, _: &ActorContext<u64>, msg: u64) {
//!     self.0 += msg;
//!   }
//! }
//!
//! let handle = spawn(Counter(0), "counter".to_string());
//! handle.local_interface().send(5);
//! ```
//!
//! ### Local References
//! A [`LocalRef`] is a cheap, cloneable handle that pushes values into somebody's mailbox. It hides
//! the mailbox's real message type, so a component can hand out a `LocalRef<PoolEvent>` that
//! really feeds an enum with many other variants.
//!
//! ### Transport
//! The message bus is an external collaborator. It only has to publish bytes on a named topic and
//! deliver everything published on a topic to its subscribers; see [`Transport`]. A
//! [`CoordinationChannel`] scopes it to one pool's coordination topic and speaks the pool's wire
//! format, [`CoordMsg`].

mod actor;
mod channel;
mod local_ref;
mod node_id;
mod packets;
mod transport;

#[rustfmt::skip]
pub use {
  actor::spawn,
  actor::Actor,
  actor::ActorContext,
  actor::ActorHandle,
  actor::ActorMsg,
  channel::CoordinationChannel,
  local_ref::LocalRef,
  node_id::NodeId,
  packets::CoordBody,
  packets::CoordMsg,
  packets::Forward,
  packets::Heartbeat,
  transport::Transport,
};
