use crate::extract::Inspect;
use tokio::sync::watch;

/// The rule engine that finally executes the events a node owns.
pub trait RuleEngine: Send + Sync + 'static {
  /// Turns a raw event into something keys can be extracted from. `None` means the event cannot
  /// be understood; such events have no key and are processed locally.
  fn decode(&self, topic: &str, payload: &[u8]) -> Option<Box<dyn Inspect>>;

  /// Runs the rules on an event. May block; the pool never calls it from its own task.
  fn process(&self, topic: &str, payload: &[u8]);
}

/// The administrative lock of a node, owned by whoever persists it. `true` means locked.
pub type AdminState = watch::Receiver<bool>;
