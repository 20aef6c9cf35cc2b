use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// A handle that delivers values of type `T` to some mailbox. `send` returns `false` once the
/// receiving side is gone, which lets holders prune dead subscribers.
pub struct LocalRef<T: Send + 'static> {
  pub(crate) func: Arc<dyn Fn(T) -> bool + Send + Sync>,
}
impl<T: Send + 'static> Clone for LocalRef<T> {
  fn clone(&self) -> Self {
    LocalRef {
      func: self.func.clone(),
    }
  }
}
impl<T: Send + 'static> LocalRef<T> {
  /// Builds a reference out of an arbitrary delivery function.
  pub fn new<F>(func: F) -> LocalRef<T>
  where
    F: Fn(T) -> bool + Send + Sync + 'static,
  {
    LocalRef {
      func: Arc::new(func),
    }
  }

  /// A reference that feeds a tokio unbounded channel.
  pub fn from_sender(sender: UnboundedSender<T>) -> LocalRef<T> {
    LocalRef::new(move |x: T| sender.send(x).is_ok())
  }

  /// Delivers `item`. Returns whether the receiver still exists.
  pub fn send(&self, item: T) -> bool {
    (&self.func)(item)
  }

  /// Adapts this reference to accept any type the mailbox type can be built from.
  pub fn transform<I: Send + 'static>(&self) -> LocalRef<I>
  where
    T: From<I>,
  {
    let func = self.func.clone();
    LocalRef {
      func: Arc::new(move |x: I| func(T::from(x))),
    }
  }

  /// Adapts this reference with an explicit conversion.
  pub fn map<I: Send + 'static, F>(&self, convert: F) -> LocalRef<I>
  where
    F: Fn(I) -> T + Send + Sync + 'static,
  {
    let func = self.func.clone();
    LocalRef {
      func: Arc::new(move |x: I| func(convert(x))),
    }
  }

  /// A reference that silently discards everything.
  pub fn void() -> LocalRef<T> {
    LocalRef {
      func: Arc::new(|_| false),
    }
  }
}

#[test]
fn test_local_ref_transform_and_prune() {
  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
  let strings = LocalRef::from_sender(tx);
  let numbers: LocalRef<u32> = strings.map(|x: u32| x.to_string());
  assert!(numbers.send(42));
  assert_eq!(rx.try_recv().ok(), Some("42".to_string()));
  drop(rx);
  assert!(!numbers.send(43));
  assert!(!LocalRef::<u8>::void().send(1));
}
