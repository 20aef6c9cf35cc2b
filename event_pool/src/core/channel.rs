use crate::core::{CoordBody, CoordMsg, LocalRef, NodeId, Transport};
use crate::error::TransportError;
use std::sync::Arc;
use tracing::{trace, warn};

/// One node's view of a pool's coordination topic: stamps outgoing messages with the node's id,
/// decodes incoming ones and hides the node's own messages from it.
#[derive(Clone)]
pub struct CoordinationChannel {
  me: NodeId,
  topic: String,
  transport: Arc<dyn Transport>,
}
impl CoordinationChannel {
  /// Messages go out on `topic`, signed as `me`.
  pub fn new(me: NodeId, topic: String, transport: Arc<dyn Transport>) -> CoordinationChannel {
    CoordinationChannel {
      me: me,
      topic: topic,
      transport: transport,
    }
  }

  /// The coordination topic.
  pub fn topic(&self) -> &str {
    &self.topic
  }

  /// Publishes `body` on the coordination topic.
  pub fn send(&self, body: CoordBody) -> Result<(), TransportError> {
    let kind = body.kind();
    let msg = CoordMsg {
      sender: self.me.clone(),
      body: body,
    };
    let bytes = msg.encode()?;
    trace!(node = %self.me, topic = %self.topic, kind, len = bytes.len(), "sending");
    self.transport.send(&self.topic, bytes)
  }

  /// Delivers decoded messages of other nodes to `recvr`. Undecodable messages are logged and
  /// dropped.
  pub fn subscribe(&self, recvr: LocalRef<CoordMsg>) -> Result<(), TransportError> {
    let me = self.me.clone();
    let topic = self.topic.clone();
    let decoder = LocalRef::new(move |bytes: Vec<u8>| match CoordMsg::decode(&bytes) {
      Ok(msg) if msg.sender == me => true,
      Ok(msg) => {
        trace!(node = %me, from = %msg.sender, kind = msg.body.kind(), "received");
        recvr.send(msg)
      }
      Err(e) => {
        warn!(node = %me, topic = %topic, error = %e, "dropping coordination message");
        true
      }
    });
    self.transport.subscribe(&self.topic, decoder)
  }
}
