//! Error types shared across the crate.

use thiserror::Error;

/// Problems found while reading pool or extractor configuration. These are reported once, at
/// startup or registration time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
  /// A pool property could not be parsed or is out of range.
  #[error("property '{key}' has invalid value '{value}': {reason}")]
  InvalidProperty {
    /// Full property name, prefix included.
    key: String,
    /// The offending value as configured.
    value: String,
    /// What is wrong with it.
    reason: String,
  },

  /// An extractor path is not of the form `${a.b.c}`.
  #[error("malformed extractor path '{path}': {reason}")]
  MalformedPath {
    /// The path as written.
    path: String,
    /// What is wrong with it.
    reason: String,
  },

  /// An extractor path names a member the type does not have, or walks into a scalar.
  #[error("cannot resolve '{segment}' of path '{path}' on type '{type_name}': {reason}")]
  UnresolvedPath {
    /// The type the path was compiled against.
    type_name: String,
    /// The whole path.
    path: String,
    /// The first segment that failed.
    segment: String,
    /// Why it failed.
    reason: String,
  },

  /// A type name got a second configured rule.
  #[error("more than one extractor rule for type '{0}'")]
  DuplicateRule(String),
}

/// Failures of the message-bus collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
  /// The message never reached the bus.
  #[error("could not encode coordination message: {0}")]
  Encode(#[from] serde_cbor::Error),

  /// The bus refused the message.
  #[error("send on topic '{topic}' failed: {reason}")]
  Send {
    /// Destination topic.
    topic: String,
    /// As reported by the bus.
    reason: String,
  },

  /// The endpoint is no longer connected.
  #[error("endpoint '{node}' is not attached to topic '{topic}'")]
  NotSubscribed {
    /// The endpoint's node.
    node: String,
    /// Destination topic.
    topic: String,
  },

  /// The bus refused the subscription.
  #[error("subscription to topic '{topic}' failed: {reason}")]
  Subscribe {
    /// The topic subscribed to.
    topic: String,
    /// As reported by the bus.
    reason: String,
  },
}

/// An inbound coordination message could not be understood.
#[derive(Debug, Error)]
#[error("could not decode coordination message: {0}")]
pub struct DecodeError(#[from] pub serde_cbor::Error);

/// Errors surfaced by [`PoolCoordinator`](crate::pool::PoolCoordinator).
#[derive(Debug, Error)]
pub enum PoolError {
  /// The configuration was rejected at startup.
  #[error(transparent)]
  Config(#[from] ConfigError),

  /// The coordination topic could not be joined.
  #[error(transparent)]
  Transport(#[from] TransportError),

  /// The request was made after the pool stopped.
  #[error("the pool manager has stopped")]
  Stopped,
}
