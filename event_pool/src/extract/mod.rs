//! Partition keys for arbitrary events.
//!
//! A rule binds a type name to a dotted path, such as `extractor.Order = ${customer.id}`. Each
//! segment of the path names a getter of the value reached so far, or failing that a field, or a
//! key when the value is a string-keyed map. Keys are the text of the scalar at the end of the
//! path; a null on the way means the event has no key.
//!
//! Types describe their members with a [`TypeInfo`], usually derived:
//!
//! ```ignore
//! #[derive(Inspect)]
//! #[inspect(name = "Order")]
//! struct Order {
//!   id: String,
//!   #[inspect(object)]
//!   customer: Option<Customer>,
//!   attributes: HashMap<String, String>,
//! }
//! ```
//!
//! Paths are checked against these descriptors when rules are registered, so a rule that can
//! never work is reported at startup and not when the first event arrives.

mod extractor;
mod path;
mod registry;
mod type_info;
mod value;

#[rustfmt::skip]
pub use {
  extractor::Extractor,
  extractor::NoopExtractor,
  extractor::PathExtractor,
  path::FieldPath,
  registry::Binding,
  registry::ExtractorRegistry,
  type_info::Accessor,
  type_info::Inspect,
  type_info::Member,
  type_info::MemberKind,
  type_info::Reflect,
  type_info::TypeInfo,
  type_info::TypeInfoBuilder,
  value::AsValue,
  value::Shape,
  value::StringMap,
  value::Value,
};

#[doc(hidden)]
pub use once_cell::sync::Lazy;
