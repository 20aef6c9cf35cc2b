use crate::core::NodeId;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The versioned bucket-to-owner mapping a leader publishes to the pool.
///
/// Every slot holds exactly one owner. A table is never modified after it is built; the leader
/// publishes a fresh one with a higher version instead, and nodes only ever move to higher
/// versions (see [`BucketTable::supersedes`]).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketTable {
  version: u64,
  leader: NodeId,
  owners: Vec<NodeId>,
}
impl BucketTable {
  /// The table of a pool that consists of `me` alone.
  pub fn bootstrap(me: &NodeId, buckets: u32) -> BucketTable {
    BucketTable {
      version: 1,
      leader: me.clone(),
      owners: vec![me.clone(); buckets as usize],
    }
  }

  /// Computes a table for `members`, authored by `leader`, keeping as much of `previous` as the
  /// new membership allows.
  ///
  /// Each member gets either `buckets / k` or `buckets / k + 1` buckets. The larger quotas go to
  /// the members that already own the most buckets, so rebalancing moves as little as possible.
  /// Buckets keep their owner while that owner is a member and under its quota; the remaining
  /// ones are dealt round-robin to the members still short of their quota, in ascending id order.
  pub fn assign(
    previous: Option<&BucketTable>,
    members: &[NodeId],
    leader: &NodeId,
    version: u64,
    buckets: u32,
  ) -> BucketTable {
    let n = buckets as usize;
    let mut members = members.iter().cloned().sorted().dedup().collect_vec();
    if !members.contains(leader) {
      members.push(leader.clone());
      members.sort();
    }
    let previous = previous.filter(|t| t.owners.len() == n);

    let current: HashMap<&NodeId, usize> = previous
      .map(|t| t.owners.iter().filter(|o| members.contains(o)).counts())
      .unwrap_or_default();
    let k = members.len();
    let (base, extra) = (n / k, n % k);
    let mut quota: HashMap<&NodeId, usize> = members
      .iter()
      .sorted_by(|a, b| {
        let ca = current.get(a).copied().unwrap_or(0);
        let cb = current.get(b).copied().unwrap_or(0);
        cb.cmp(&ca).then_with(|| a.cmp(b))
      })
      .enumerate()
      .map(|(i, m)| (m, base + (i < extra) as usize))
      .collect();

    let mut owners: Vec<Option<NodeId>> = vec![None; n];
    if let Some(prev) = previous {
      for (slot, owner) in owners.iter_mut().zip(prev.owners.iter()) {
        if let Some(left) = quota.get_mut(owner) {
          if *left > 0 {
            *left -= 1;
            *slot = Some(owner.clone());
          }
        }
      }
    }

    let mut cursor = 0;
    for slot in owners.iter_mut().filter(|s| s.is_none()) {
      loop {
        let m = &members[cursor % k];
        cursor += 1;
        if let Some(left) = quota.get_mut(m) {
          if *left > 0 {
            *left -= 1;
            *slot = Some(m.clone());
            break;
          }
        }
      }
    }

    BucketTable {
      version: version,
      leader: leader.clone(),
      owners: owners.into_iter().flatten().collect(),
    }
  }

  /// The table's version. Versions only grow.
  pub fn version(&self) -> u64 {
    self.version
  }

  /// The node that computed and published this table.
  pub fn leader(&self) -> &NodeId {
    &self.leader
  }

  /// The number of buckets.
  pub fn buckets(&self) -> u32 {
    self.owners.len() as u32
  }

  /// The owner of `bucket`, if the bucket exists.
  pub fn owner(&self, bucket: u32) -> Option<&NodeId> {
    self.owners.get(bucket as usize)
  }

  /// Owners in bucket order.
  pub fn owners(&self) -> &[NodeId] {
    &self.owners
  }

  /// Buckets owned per node.
  pub fn load(&self) -> HashMap<&NodeId, usize> {
    self.owners.iter().counts()
  }

  /// Whether `node` owns at least one bucket.
  pub fn contains(&self, node: &NodeId) -> bool {
    self.owners.iter().any(|o| o == node)
  }

  /// The distinct owners, sorted.
  pub fn members(&self) -> Vec<NodeId> {
    self.owners.iter().cloned().sorted().dedup().collect()
  }

  /// Whether a node holding `current` should install this table instead.
  pub fn supersedes(&self, current: Option<&BucketTable>) -> bool {
    current.map_or(true, |c| self.version > c.version)
  }

  /// A table is well formed if it has `buckets` slots.
  pub fn is_valid(&self, buckets: u32) -> bool {
    self.owners.len() == buckets as usize && !self.owners.is_empty()
  }
}
