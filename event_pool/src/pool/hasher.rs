use wyhash::wyhash;

const SEED: u64 = 0;

/// Where an event goes, as far as hashing can tell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Route {
  /// A regular bucket index in `0..buckets`.
  Bucket(u32),
  /// The event had no key. It is never forwarded; every node processes it locally.
  Unroutable,
}

/// Maps partition keys onto a fixed ring of buckets.
///
/// The hash is wyhash over the key's UTF-8 bytes with a fixed seed. It depends on nothing but
/// those bytes, so every node (and every process restart, and any other implementation of the same
/// function) puts a key in the same bucket.
#[derive(Clone, Copy, Debug)]
pub struct BucketHasher {
  buckets: u32,
}
impl BucketHasher {
  /// `buckets` must be positive; [`PoolConfig`](crate::pool::PoolConfig) validation guarantees
  /// that for configured pools.
  pub fn new(buckets: u32) -> BucketHasher {
    BucketHasher {
      buckets: buckets.max(1),
    }
  }

  /// The number of buckets in the ring.
  pub fn buckets(&self) -> u32 {
    self.buckets
  }

  /// The bucket for `key`, or [`Route::Unroutable`] without one.
  pub fn bucket(&self, key: Option<&str>) -> Route {
    match key {
      Some(k) => Route::Bucket((stable_hash(k) % self.buckets as u64) as u32),
      None => Route::Unroutable,
    }
  }
}

/// The platform-independent hash behind [`BucketHasher`].
pub fn stable_hash(key: &str) -> u64 {
  wyhash(key.as_bytes(), SEED)
}

#[test]
fn test_bucket_is_deterministic_and_in_range() {
  let hasher = BucketHasher::new(256);
  let other = BucketHasher::new(256);
  for i in 0..1000 {
    let key = format!("request-{}", i);
    let route = hasher.bucket(Some(&key));
    assert_eq!(route, other.bucket(Some(&key)));
    assert_eq!(route, hasher.bucket(Some(key.clone().as_str())));
    match route {
      Route::Bucket(b) => assert!(b < 256),
      Route::Unroutable => panic!("{} should be routable", key),
    }
  }
  assert_eq!(hasher.bucket(None), Route::Unroutable);
}

#[test]
fn test_bucket_spreads_keys() {
  let hasher = BucketHasher::new(16);
  let mut counts = [0u32; 16];
  for i in 0..16_000 {
    if let Route::Bucket(b) = hasher.bucket(Some(&format!("k{}", i))) {
      counts[b as usize] += 1;
    }
  }
  assert!(counts.iter().all(|c| *c > 700 && *c < 1300), "{:?}", counts);
}

#[test]
fn test_bucket_depends_only_on_key_bytes() {
  let owned = String::from("abc");
  assert_eq!(stable_hash(&owned), stable_hash("abc"));
  assert_ne!(stable_hash("abc"), stable_hash("abd"));
  assert_eq!(BucketHasher::new(0).buckets(), 1);
}
