use crate::error::ConfigError;
use crate::extract::{Accessor, FieldPath, Inspect, Shape, TypeInfo, Value};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

const NOOP_LOG_INTERVAL: Duration = Duration::from_secs(10);

enum Step {
  Member(Accessor),
  Key(String),
}

enum Cursor {
  Object(&'static TypeInfo),
  Map(Shape),
  Scalar,
}
impl From<Shape> for Cursor {
  fn from(shape: Shape) -> Self {
    match shape {
      Shape::Object(info) => Cursor::Object(info()),
      Shape::Map(inner) => Cursor::Map(*inner),
      Shape::Scalar => Cursor::Scalar,
    }
  }
}

/// A path compiled against one concrete type.
pub struct PathExtractor {
  path: FieldPath,
  steps: Vec<Step>,
}
impl PathExtractor {
  /// Resolves every segment of `path` against `info`. Each segment must name a getter or field
  /// of the object reached so far, or be a key into a map.
  pub fn compile(info: &'static TypeInfo, path: &FieldPath) -> Result<PathExtractor, ConfigError> {
    let mut steps = Vec::with_capacity(path.segments().len());
    let mut cursor = Cursor::Object(info);
    for seg in path.segments() {
      let unresolved = |reason: String| ConfigError::UnresolvedPath {
        type_name: info.name().to_string(),
        path: path.to_string(),
        segment: seg.clone(),
        reason: reason,
      };
      cursor = match cursor {
        Cursor::Object(current) => {
          let member = current.member(seg).ok_or_else(|| {
            unresolved(format!("'{}' has no getter or field named '{}'", current.name(), seg))
          })?;
          steps.push(Step::Member(member.accessor().clone()));
          Cursor::from(member.shape().clone())
        }
        Cursor::Map(inner) => {
          steps.push(Step::Key(seg.clone()));
          Cursor::from(inner)
        }
        Cursor::Scalar => return Err(unresolved("a scalar value has no members".to_string())),
      };
    }
    Ok(PathExtractor {
      path: path.clone(),
      steps: steps,
    })
  }

  /// The path this extractor was compiled from.
  pub fn path(&self) -> &FieldPath {
    &self.path
  }

  /// Walks the path. A null anywhere along the way makes the whole result null.
  pub fn extract(&self, event: &dyn Inspect) -> Option<String> {
    let mut value = Value::Object(event);
    for step in self.steps.iter() {
      value = match (step, value) {
        (Step::Member(access), Value::Object(obj)) => access(obj),
        (Step::Key(key), Value::Map(map)) => map.lookup(key).unwrap_or(Value::Null),
        _ => return None,
      };
    }
    value.into_key()
  }
}

struct LogWindow {
  last: Option<Instant>,
  suppressed: u64,
}

/// Stands in for a rule that could not be compiled. Always yields no key, and says so in the log
/// at most once every ten seconds.
pub struct NoopExtractor {
  type_name: String,
  error: ConfigError,
  window: Mutex<LogWindow>,
}
impl NoopExtractor {
  /// Remembers why the rule for `type_name` failed.
  pub fn new(type_name: &str, error: ConfigError) -> NoopExtractor {
    NoopExtractor {
      type_name: type_name.to_string(),
      error: error,
      window: Mutex::new(LogWindow {
        last: None,
        suppressed: 0,
      }),
    }
  }

  /// Why the rule could not be compiled.
  pub fn error(&self) -> &ConfigError {
    &self.error
  }

  /// Always `None`. Logs the reason, rate-limited.
  pub fn extract(&self) -> Option<String> {
    let now = Instant::now();
    let mut window = match self.window.lock() {
      Ok(w) => w,
      Err(poisoned) => poisoned.into_inner(),
    };
    let due = window
      .last
      .map_or(true, |last| now.duration_since(last) >= NOOP_LOG_INTERVAL);
    if due {
      debug!(
        type_name = %self.type_name, error = %self.error, suppressed = window.suppressed,
        "no usable extractor, event has no partition key"
      );
      window.last = Some(now);
      window.suppressed = 0;
    } else {
      window.suppressed += 1;
    }
    None
  }

  /// Invocations since the last log line.
  pub fn suppressed(&self) -> u64 {
    self.window.lock().map(|w| w.suppressed).unwrap_or(0)
  }
}

/// What a concrete type is bound to.
pub enum Extractor {
  /// A rule compiled against the concrete type.
  Path(PathExtractor),
  /// A rule that does not fit the concrete type.
  Noop(NoopExtractor),
  /// No rule applies to the type at all.
  Unbound,
}
impl Extractor {
  /// The event's partition key, if it has one.
  pub fn extract(&self, event: &dyn Inspect) -> Option<String> {
    match self {
      Extractor::Path(p) => p.extract(event),
      Extractor::Noop(n) => n.extract(),
      Extractor::Unbound => None,
    }
  }
}
