use crate::core::NodeId;
use crate::pool::LeaderPolicyKind;
use std::cmp::Ordering;
use std::sync::Arc;

/// A node competing for table authorship.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate<'a> {
  /// The candidate node.
  pub id: &'a NodeId,
  /// Higher is preferred by [`HighestPriority`].
  pub priority: i32,
}

/// Decides which of two nodes a pool would rather have as its leader. Every node of a pool must
/// use the same policy, or nodes will disagree about who should lead.
pub trait LeaderPolicy: Send + Sync + 'static {
  /// `Ordering::Less` if `a` is preferred over `b`. Must be a total order.
  fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering;

  /// Whether `a` is strictly preferred over `b`.
  fn prefers(&self, a: &Candidate, b: &Candidate) -> bool {
    self.compare(a, b) == Ordering::Less
  }
}

/// Prefers the smallest node id.
pub struct LowestId;
impl LeaderPolicy for LowestId {
  fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
    a.id.cmp(b.id)
  }
}

/// Highest priority first, lowest id among equals.
pub struct HighestPriority;
impl LeaderPolicy for HighestPriority {
  fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
    b.priority.cmp(&a.priority).then_with(|| a.id.cmp(b.id))
  }
}

impl LeaderPolicyKind {
  /// The policy this setting names.
  pub fn policy(&self) -> Arc<dyn LeaderPolicy> {
    match self {
      LeaderPolicyKind::LowestId => Arc::new(LowestId),
      LeaderPolicyKind::HighestPriority => Arc::new(HighestPriority),
    }
  }
}

/// The preferred candidate, if there is any.
pub fn elect<'a, I>(policy: &dyn LeaderPolicy, candidates: I) -> Option<Candidate<'a>>
where
  I: IntoIterator<Item = Candidate<'a>>,
{
  candidates
    .into_iter()
    .min_by(|a, b| policy.compare(a, b))
}
