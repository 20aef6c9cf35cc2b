use crate::extract::{Inspect, Reflect, TypeInfo};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::sync::Arc;

/// A value reached while walking an extraction path.
#[derive(Clone)]
pub enum Value<'a> {
  /// Absent, such as a `None`.
  Null,
  /// Text.
  Text(Cow<'a, str>),
  /// A signed integer.
  Int(i64),
  /// An unsigned integer.
  UInt(u64),
  /// A boolean.
  Bool(bool),
  /// Something with members of its own.
  Object(&'a dyn Inspect),
  /// A string-keyed map.
  Map(&'a dyn StringMap),
}
impl<'a> Value<'a> {
  /// Wraps a nested event.
  pub fn object<T: Inspect>(obj: &'a T) -> Value<'a> {
    Value::Object(obj)
  }

  /// `Null` for `None`, the object otherwise.
  pub fn object_opt<T: Inspect>(obj: &'a Option<T>) -> Value<'a> {
    match obj {
      Some(o) => Value::Object(o),
      None => Value::Null,
    }
  }

  /// Whether the value is `Null`.
  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  /// The partition key this value stands for. Only scalars make keys: text is used verbatim,
  /// numbers and booleans in their usual decimal form.
  pub fn into_key(self) -> Option<String> {
    match self {
      Value::Text(s) => Some(s.into_owned()),
      Value::Int(i) => Some(i.to_string()),
      Value::UInt(u) => Some(u.to_string()),
      Value::Bool(b) => Some(b.to_string()),
      Value::Null | Value::Object(_) | Value::Map(_) => None,
    }
  }
}
impl<'a> std::fmt::Debug for Value<'a> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Value::Null => f.write_str("Null"),
      Value::Text(s) => write!(f, "Text({:?})", s),
      Value::Int(i) => write!(f, "Int({})", i),
      Value::UInt(u) => write!(f, "UInt({})", u),
      Value::Bool(b) => write!(f, "Bool({})", b),
      Value::Object(o) => write!(f, "Object({})", o.type_info().name()),
      Value::Map(_) => f.write_str("Map"),
    }
  }
}

/// The static shape of a member, checked against extraction paths when rules are registered.
#[derive(Clone)]
pub enum Shape {
  /// Anything without members: strings, numbers, booleans.
  Scalar,
  /// A type with its own descriptor.
  Object(fn() -> &'static TypeInfo),
  /// A string-keyed map with values of the inner shape.
  Map(Box<Shape>),
}
impl Shape {
  /// The shape of `T`'s values.
  pub fn of<T: AsValue>() -> Shape {
    T::shape()
  }

  /// Shorthand for a nested [`Reflect`] type.
  pub fn object<T: Reflect>() -> Shape {
    Shape::Object(T::static_info)
  }
}
impl std::fmt::Debug for Shape {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Shape::Scalar => f.write_str("Scalar"),
      Shape::Object(info) => write!(f, "Object({})", info().name()),
      Shape::Map(inner) => write!(f, "Map({:?})", inner),
    }
  }
}

/// A map that can be searched by string key.
pub trait StringMap: Send + Sync {
  /// `None` when the key is absent.
  fn lookup(&self, key: &str) -> Option<Value<'_>>;
}
impl<V, S> StringMap for HashMap<String, V, S>
where
  V: AsValue + Send + Sync,
  S: BuildHasher + Send + Sync,
{
  fn lookup(&self, key: &str) -> Option<Value<'_>> {
    self.get(key).map(AsValue::as_value)
  }
}
impl<V: AsValue + Send + Sync> StringMap for BTreeMap<String, V> {
  fn lookup(&self, key: &str) -> Option<Value<'_>> {
    self.get(key).map(AsValue::as_value)
  }
}

/// Plain data that can show up on an extraction path.
pub trait AsValue {
  /// Borrows the data as a [`Value`].
  fn as_value(&self) -> Value<'_>;

  /// What every value of the type looks like. Scalar unless overridden.
  fn shape() -> Shape
  where
    Self: Sized,
  {
    Shape::Scalar
  }
}
impl AsValue for String {
  fn as_value(&self) -> Value<'_> {
    Value::Text(Cow::Borrowed(self))
  }
}
impl AsValue for str {
  fn as_value(&self) -> Value<'_> {
    Value::Text(Cow::Borrowed(self))
  }
}
impl AsValue for char {
  fn as_value(&self) -> Value<'_> {
    Value::Text(Cow::Owned(self.to_string()))
  }
}
impl AsValue for bool {
  fn as_value(&self) -> Value<'_> {
    Value::Bool(*self)
  }
}
macro_rules! as_value_int {
  ($variant:ident, $wide:ty, $($t:ty),*) => {
    $(
      impl AsValue for $t {
        fn as_value(&self) -> Value<'_> {
          Value::$variant(*self as $wide)
        }
      }
    )*
  };
}
as_value_int!(Int, i64, i8, i16, i32, i64, isize);
as_value_int!(UInt, u64, u8, u16, u32, u64, usize);

impl<T: AsValue> AsValue for Option<T> {
  fn as_value(&self) -> Value<'_> {
    match self {
      Some(x) => x.as_value(),
      None => Value::Null,
    }
  }

  fn shape() -> Shape {
    T::shape()
  }
}
impl<T: AsValue> AsValue for Box<T> {
  fn as_value(&self) -> Value<'_> {
    (**self).as_value()
  }

  fn shape() -> Shape {
    T::shape()
  }
}
impl<T: AsValue> AsValue for Arc<T> {
  fn as_value(&self) -> Value<'_> {
    (**self).as_value()
  }

  fn shape() -> Shape {
    T::shape()
  }
}
impl<V, S> AsValue for HashMap<String, V, S>
where
  V: AsValue + Send + Sync,
  S: BuildHasher + Send + Sync,
{
  fn as_value(&self) -> Value<'_> {
    Value::Map(self)
  }

  fn shape() -> Shape {
    Shape::Map(Box::new(V::shape()))
  }
}
impl<V: AsValue + Send + Sync> AsValue for BTreeMap<String, V> {
  fn as_value(&self) -> Value<'_> {
    Value::Map(self)
  }

  fn shape() -> Shape {
    Shape::Map(Box::new(V::shape()))
  }
}

#[test]
fn test_scalar_keys() {
  assert_eq!("abc".as_value().into_key(), Some("abc".to_string()));
  assert_eq!((-7i32).as_value().into_key(), Some("-7".to_string()));
  assert_eq!(42u8.as_value().into_key(), Some("42".to_string()));
  assert_eq!(true.as_value().into_key(), Some("true".to_string()));
  assert_eq!(None::<String>.as_value().into_key(), None);
  let mut m = HashMap::new();
  m.insert("k".to_string(), 5u64);
  assert!(m.as_value().into_key().is_none());
  assert_eq!(m.lookup("k").and_then(Value::into_key), Some("5".to_string()));
  assert!(m.lookup("missing").is_none());
  assert!(matches!(Shape::of::<HashMap<String, Option<i64>>>(), Shape::Map(_)));
}
