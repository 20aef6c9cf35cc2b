use crate::error::ConfigError;
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

/// A dotted member path such as `request.id`, written either bare or as `${request.id}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath {
  raw: String,
  segments: SmallVec<[String; 4]>,
}
impl FieldPath {
  /// Parses `${a.b.c}` or bare `a.b.c`. Segments must be non-empty and free of whitespace.
  ///
  /// ```
  /// use event_pool::extract::FieldPath;
  ///
  /// let path = FieldPath::parse("${customer.id}").unwrap();
  /// assert_eq!(path.segments(), ["customer", "id"]);
  /// assert_eq!(path.as_str(), "${customer.id}");
  /// assert!(FieldPath::parse("${customer..id}").is_err());
  /// ```
  pub fn parse(raw: &str) -> Result<FieldPath, ConfigError> {
    let malformed = |reason: &str| ConfigError::MalformedPath {
      path: raw.to_string(),
      reason: reason.to_string(),
    };
    let trimmed = raw.trim();
    let inner = match trimmed.strip_prefix("${") {
      Some(rest) => rest
        .strip_suffix('}')
        .ok_or_else(|| malformed("unclosed '${'"))?,
      None => trimmed,
    };
    if inner.is_empty() {
      return Err(malformed("empty path"));
    }
    if inner.starts_with('.') {
      return Err(malformed("leading separator"));
    }
    if inner.ends_with('.') {
      return Err(malformed("trailing separator"));
    }
    let mut segments = SmallVec::new();
    for seg in inner.split('.') {
      if seg.is_empty() {
        return Err(malformed("empty segment"));
      }
      if seg
        .chars()
        .any(|c| c.is_whitespace() || c == '$' || c == '{' || c == '}')
      {
        return Err(malformed("invalid character in segment"));
      }
      segments.push(seg.to_string());
    }
    Ok(FieldPath {
      raw: trimmed.to_string(),
      segments: segments,
    })
  }

  /// The member names, outermost first.
  pub fn segments(&self) -> &[String] {
    &self.segments
  }

  /// The path as written.
  pub fn as_str(&self) -> &str {
    &self.raw
  }
}
impl FromStr for FieldPath {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    FieldPath::parse(s)
  }
}
impl fmt::Display for FieldPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

#[test]
fn test_path_forms() {
  let p = FieldPath::parse("${request.id}").unwrap();
  assert_eq!(p.segments(), &["request".to_string(), "id".to_string()]);
  let q: FieldPath = " request.id ".parse().unwrap();
  assert_eq!(q.segments(), p.segments());
  assert_eq!(FieldPath::parse("id").unwrap().segments().len(), 1);
}

#[test]
fn test_malformed_paths() {
  for bad in ["", "${}", "${a.b", ".a", "a.", "a..b", "${.a}", "a.b c", "a.${b}", "a}"].iter() {
    match FieldPath::parse(bad) {
      Err(ConfigError::MalformedPath { path, .. }) => assert_eq!(path, *bad),
      other => panic!("{:?} parsed as {:?}", bad, other),
    }
  }
}
