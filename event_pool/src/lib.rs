#![warn(missing_docs)]

//! This crate lets a fleet of redundant rule-engine nodes share one inbound event stream without
//! processing any event twice. The event space is cut into a fixed number of buckets; a leader
//! hands the buckets out to the live members of the pool and every node forwards events it does
//! not own to the node that does.
//!
//! - [`core`](crate::core) holds the plumbing: node identifiers, mailboxes, the actor loop and the
//!   [`Transport`](crate::core::Transport) collaborator.
//! - [`pool`](crate::pool) implements the coordination protocol and the message router.
//! - [`extract`](crate::extract) maps an arbitrary event to the partition key it is routed by.
//! - [`testkit`](crate::testkit) has an in-memory message bus with failure injection.

extern crate self as event_pool;

pub mod core;
pub mod error;
pub mod extract;
pub mod pool;
pub mod testkit;

pub use event_pool_macros::Inspect;
