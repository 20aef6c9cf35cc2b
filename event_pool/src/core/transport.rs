use crate::core::LocalRef;
use crate::error::TransportError;

/// The message-bus client the pool publishes and subscribes through. Implementations must
/// deliver every message published on a topic to every subscriber of that topic, the publisher
/// included; ordering and delivery are best-effort.
pub trait Transport: Send + Sync + 'static {
  /// Publishes `bytes` on `topic`.
  fn send(&self, topic: &str, bytes: Vec<u8>) -> Result<(), TransportError>;

  /// Delivers everything published on `topic` to `recvr`. Implementations may drop the
  /// subscription once `recvr` reports that its receiver is gone.
  fn subscribe(&self, topic: &str, recvr: LocalRef<Vec<u8>>) -> Result<(), TransportError>;
}
