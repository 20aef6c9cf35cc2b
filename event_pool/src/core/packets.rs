use crate::core::NodeId;
use crate::error::DecodeError;
use crate::pool::{BucketTable, PoolState};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Everything nodes of a pool say to each other travels as one of these, CBOR-encoded, on the
/// pool's coordination topic.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CoordMsg {
  /// The node that published the message.
  pub sender: NodeId,
  /// What it says.
  pub body: CoordBody,
}

/// The kinds of coordination messages.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum CoordBody {
  /// A joining node asks the pool to make itself known.
  IdentificationRequest,
  /// The sender is alive; carries its state and the table version it holds.
  Heartbeat(Heartbeat),
  /// The complete table, as published by its leader.
  AssignmentTable(BucketTable),
  /// An event for the node that owns its bucket.
  Forward(Forward),
  /// The sender was locked and stops serving its buckets now.
  Leaving,
}

/// Periodic proof of life.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Heartbeat {
  /// The sender's lifecycle state.
  pub state: PoolState,
  /// Milliseconds since the Unix epoch on the sender's clock. Informational only; receivers time
  /// heartbeats with their own clock.
  pub sent_at: u64,
  /// Version of the table the sender holds, `0` for none.
  pub table_version: u64,
  /// The sender's leader-election priority.
  pub priority: i32,
}

/// A business event on its way to the node that owns its bucket.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Forward {
  /// The only node that acts on the message.
  pub target: NodeId,
  /// Computed by the first node that routed the event. Receivers trust it instead of
  /// extracting and hashing again.
  pub bucket: u32,
  /// How many more times the event may be forwarded.
  pub hops: u8,
  /// The topic the event originally arrived on.
  pub topic: String,
  /// The event, byte for byte as it arrived.
  pub payload: Vec<u8>,
}

impl CoordBody {
  /// Short name for log output.
  pub fn kind(&self) -> &'static str {
    match self {
      CoordBody::IdentificationRequest => "IDENTIFICATION_REQUEST",
      CoordBody::Heartbeat(_) => "HEARTBEAT",
      CoordBody::AssignmentTable(_) => "ASSIGNMENT_TABLE",
      CoordBody::Forward(_) => "FORWARD",
      CoordBody::Leaving => "LEAVING",
    }
  }
}

impl CoordMsg {
  /// CBOR bytes for the wire.
  pub fn encode(&self) -> Result<Vec<u8>, serde_cbor::Error> {
    serde_cbor::to_vec(self)
  }

  /// Parses what [`encode`](Self::encode) produced.
  pub fn decode(bytes: &[u8]) -> Result<CoordMsg, DecodeError> {
    Ok(serde_cbor::from_slice(bytes)?)
  }
}

impl Heartbeat {
  /// Stamps the heartbeat with the current wall-clock time.
  pub fn new(state: PoolState, table_version: u64, priority: i32) -> Heartbeat {
    let sent_at = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_millis() as u64)
      .unwrap_or(0);
    Heartbeat {
      state: state,
      sent_at: sent_at,
      table_version: table_version,
      priority: priority,
    }
  }
}
