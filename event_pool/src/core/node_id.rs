use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stable identity of a pool member, unique within a pool and fixed for the lifetime of the
/// process. Ordering is plain string ordering, which the default leader policy relies on.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Arc<str>);
impl NodeId {
  /// Wraps an existing identifier.
  pub fn new<S: AsRef<str>>(id: S) -> NodeId {
    NodeId(Arc::from(id.as_ref()))
  }

  /// Derives an identifier from a host name plus a random suffix, so a process restarted on the
  /// same host never collides with records other nodes still hold for its previous incarnation.
  pub fn generate(host: &str) -> NodeId {
    NodeId::new(format!("{}-{:016x}", host, rand::random::<u64>()))
  }

  /// The identifier as a string slice.
  pub fn as_str(&self) -> &str {
    &self.0
  }
}
impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}
impl From<&str> for NodeId {
  fn from(s: &str) -> Self {
    NodeId::new(s)
  }
}
impl From<String> for NodeId {
  fn from(s: String) -> Self {
    NodeId(Arc::from(s))
  }
}

#[test]
fn test_generated_ids_keep_host_prefix() {
  let a = NodeId::generate("rules-host-1");
  let b = NodeId::generate("rules-host-1");
  assert!(a.as_str().starts_with("rules-host-1-"));
  assert_ne!(a, b);
  assert!(NodeId::from("a-node") < NodeId::from("b-node"));
}
