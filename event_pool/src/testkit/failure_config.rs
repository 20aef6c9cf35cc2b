use crate::core::NodeId;
use im::HashMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How unreliable message delivery from one node is.
#[derive(Default, Serialize, Deserialize, Clone, Copy, Debug)]
pub struct FailureConfig {
  /// Probability in `[0, 1]` that a message is lost.
  pub drop_prob: f64,
  /// Delivery is delayed by a uniformly random duration in this range.
  pub delay: Option<(Duration, Duration)>,
}
impl FailureConfig {
  pub(crate) fn drops(&self, rng: &mut SmallRng) -> bool {
    self.drop_prob > 0.0 && rng.gen::<f64>() < self.drop_prob
  }

  pub(crate) fn sample_delay(&self, rng: &mut SmallRng) -> Option<Duration> {
    self.delay.map(|(min, max)| {
      let range = min.as_millis() as u64..=max.as_millis().max(min.as_millis()) as u64;
      Duration::from_millis(rng.gen_range(range))
    })
  }

  pub(crate) fn rng() -> SmallRng {
    SmallRng::from_entropy()
  }
}

/// Failure settings for a whole pool, with per-node exceptions keyed by sender.
#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct FailureConfigMap {
  /// Applies to senders without an entry of their own.
  pub pool_wide: FailureConfig,
  /// Per-sender settings.
  pub node_wide: HashMap<NodeId, FailureConfig>,
}
impl FailureConfigMap {
  /// The settings for messages sent by `node`.
  pub fn get(&self, node: &NodeId) -> &FailureConfig {
    self.node_wide.get(node).unwrap_or(&self.pool_wide)
  }
}
