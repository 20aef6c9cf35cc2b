use crate::extract::Inspect;
use crate::pool::RuleEngine;
use std::sync::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

type Decoder = dyn Fn(&str, &[u8]) -> Option<Box<dyn Inspect>> + Send + Sync;

/// An event the engine was asked to process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Processed {
  /// The topic the event arrived on.
  pub topic: String,
  /// The raw event.
  pub payload: Vec<u8>,
}

/// A [`RuleEngine`] that decodes with a given function and remembers everything it processes.
pub struct RecordingEngine {
  decoder: Box<Decoder>,
  processed: Mutex<Vec<Processed>>,
  notify: UnboundedSender<Processed>,
}
impl RecordingEngine {
  /// Returns the engine and a receiver that sees every processed event as it happens.
  pub fn new<F>(decoder: F) -> (RecordingEngine, UnboundedReceiver<Processed>)
  where
    F: Fn(&str, &[u8]) -> Option<Box<dyn Inspect>> + Send + Sync + 'static,
  {
    let (tx, rx) = unbounded_channel();
    let engine = RecordingEngine {
      decoder: Box::new(decoder),
      processed: Mutex::new(Vec::new()),
      notify: tx,
    };
    (engine, rx)
  }

  /// Everything processed so far, in order.
  pub fn processed(&self) -> Vec<Processed> {
    self.processed.lock().unwrap_or_else(|p| p.into_inner()).clone()
  }

  /// How many events were processed.
  pub fn count(&self) -> usize {
    self.processed.lock().unwrap_or_else(|p| p.into_inner()).len()
  }
}
impl RuleEngine for RecordingEngine {
  fn decode(&self, topic: &str, payload: &[u8]) -> Option<Box<dyn Inspect>> {
    (self.decoder)(topic, payload)
  }

  fn process(&self, topic: &str, payload: &[u8]) {
    let item = Processed {
      topic: topic.to_string(),
      payload: payload.to_vec(),
    };
    self
      .processed
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .push(item.clone());
    let _ = self.notify.send(item);
  }
}
