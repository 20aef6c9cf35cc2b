use crate::error::ConfigError;
use crate::extract::{
  Extractor, FieldPath, Inspect, NoopExtractor, PathExtractor, Reflect, TypeInfo,
};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, warn};

const PROPERTY_PREFIX: &str = "extractor.";

/// How a concrete type got its extractor.
pub struct Binding {
  type_name: String,
  /// The type the applied rule was registered for: the type itself, a supertype or an interface.
  rule_type: Option<String>,
  extractor: Extractor,
}
impl Binding {
  /// The concrete type this binding applies to.
  pub fn type_name(&self) -> &str {
    &self.type_name
  }

  /// `None` when no rule matched.
  pub fn rule_type(&self) -> Option<&str> {
    self.rule_type.as_deref()
  }

  /// What the type is bound to.
  pub fn extractor(&self) -> &Extractor {
    &self.extractor
  }

  /// Shorthand for `self.extractor().extract(event)`.
  pub fn extract(&self, event: &dyn Inspect) -> Option<String> {
    self.extractor.extract(event)
  }
}

#[derive(Default)]
struct Rules {
  configured: HashMap<String, FieldPath>,
  overrides: HashMap<String, FieldPath>,
  catalog: HashMap<String, &'static TypeInfo>,
}
impl Rules {
  fn get(&self, type_name: &str) -> Option<&FieldPath> {
    self
      .overrides
      .get(type_name)
      .or_else(|| self.configured.get(type_name))
  }
}

/// Maps events to partition keys, using rules bound to type names.
///
/// The first time a concrete type is seen, its rule is looked up: a rule for the type itself,
/// then for its supertypes, nearest first, then for the interfaces of the type and its
/// supertypes, depth first. The rule found is compiled against the concrete type and the result
/// is cached for that type, so later events of the type only cost a cache hit. Overrides take
/// precedence over configured rules for the same type name.
#[derive(Default)]
pub struct ExtractorRegistry {
  rules: RwLock<Rules>,
  cache: RwLock<im::HashMap<TypeId, Arc<Binding>>>,
}
impl ExtractorRegistry {
  /// An empty registry. Every type stays unbound until rules are added.
  pub fn new() -> ExtractorRegistry {
    ExtractorRegistry::default()
  }

  /// Builds a registry from every `extractor.<type-name>` property. `types` are registered first,
  /// so rules whose path does not resolve on one of them, or on anything they extend or
  /// implement, are caught here rather than when the first event arrives. Rules that fail to
  /// register are logged and returned; the affected types get no key.
  pub fn from_properties(
    props: &HashMap<String, String>,
    types: &[&'static TypeInfo],
  ) -> (ExtractorRegistry, Vec<ConfigError>) {
    let registry = ExtractorRegistry::new();
    for info in types {
      registry.register_info(info);
    }
    let errors = registry.load_properties(props);
    (registry, errors)
  }

  /// Registers every `extractor.<type-name>` property, in key order. Only types registered
  /// beforehand have their paths checked now.
  pub fn load_properties(&self, props: &HashMap<String, String>) -> Vec<ConfigError> {
    let mut keys = props
      .keys()
      .filter(|k| k.starts_with(PROPERTY_PREFIX))
      .collect::<Vec<_>>();
    keys.sort();
    keys
      .into_iter()
      .filter_map(|k| {
        let type_name = &k[PROPERTY_PREFIX.len()..];
        self.add_rule(type_name, &props[k]).err()
      })
      .collect()
  }

  /// Makes `T`, and everything it extends or implements, known by name, so that rules naming
  /// these types can be checked when they are registered.
  pub fn register_type<T: Reflect>(&self) -> &Self {
    self.register_info(T::static_info())
  }

  /// Same as [`register_type`](Self::register_type), from a descriptor.
  pub fn register_info(&self, info: &'static TypeInfo) -> &Self {
    let mut pending = vec![info];
    let mut rules = self.write_rules();
    while let Some(t) = pending.pop() {
      if rules.catalog.insert(t.name().to_string(), t).is_none() {
        pending.extend(t.supertype());
        pending.extend(t.interfaces());
      }
    }
    self
  }

  /// Registers a configured rule. Malformed paths are rejected outright. A rule whose path does
  /// not resolve on an already known type is kept, but the type is bound to an extractor that
  /// never yields a key; the error is returned all the same.
  pub fn add_rule(&self, type_name: &str, path: &str) -> Result<(), ConfigError> {
    let path = self.parse(type_name, path)?;
    {
      let mut rules = self.write_rules();
      if rules.configured.contains_key(type_name) {
        let e = ConfigError::DuplicateRule(type_name.to_string());
        error!(error = %e, "rejecting extractor rule");
        return Err(e);
      }
      rules.configured.insert(type_name.to_string(), path.clone());
    }
    self.invalidate();
    self.check(type_name, &path)
  }

  /// Registers a rule that wins over any configured rule for the same type. Replaces an earlier
  /// override.
  pub fn add_override(&self, type_name: &str, path: &str) -> Result<(), ConfigError> {
    let path = self.parse(type_name, path)?;
    self
      .write_rules()
      .overrides
      .insert(type_name.to_string(), path.clone());
    self.invalidate();
    self.check(type_name, &path)
  }

  /// Returns whether there was an override to remove.
  pub fn remove_override(&self, type_name: &str) -> bool {
    let removed = self.write_rules().overrides.remove(type_name).is_some();
    if removed {
      self.invalidate();
    }
    removed
  }

  /// The partition key of `event`, or `None` if it has none.
  pub fn extract(&self, event: &dyn Inspect) -> Option<String> {
    self.binding(event.type_info()).extract(event)
  }

  /// The binding of a concrete type, computed on first use.
  pub fn binding(&self, info: &'static TypeInfo) -> Arc<Binding> {
    let id = info.type_id();
    if let Some(b) = id.and_then(|id| self.read_cache().get(&id).cloned()) {
      return b;
    }
    let binding = Arc::new(self.bind(info));
    if let Some(id) = id {
      let mut cache = self.write_cache();
      if let Some(b) = cache.get(&id) {
        return b.clone();
      }
      cache.insert(id, binding.clone());
    }
    binding
  }

  /// Number of concrete types with a cached binding.
  pub fn cached(&self) -> usize {
    self.read_cache().len()
  }

  fn parse(&self, type_name: &str, path: &str) -> Result<FieldPath, ConfigError> {
    FieldPath::parse(path).map_err(|e| {
      error!(type_name, error = %e, "rejecting extractor rule");
      e
    })
  }

  fn check(&self, type_name: &str, path: &FieldPath) -> Result<(), ConfigError> {
    let info = match self.read_rules().catalog.get(type_name) {
      Some(info) if !info.is_interface() => *info,
      _ => return Ok(()),
    };
    PathExtractor::compile(info, path).map(|_| ()).map_err(|e| {
      error!(type_name, error = %e, "extractor rule does not resolve");
      e
    })
  }

  fn bind(&self, info: &'static TypeInfo) -> Binding {
    let found = {
      let rules = self.read_rules();
      search_order(info)
        .into_iter()
        .find_map(|t| rules.get(t.name()).map(|p| (t.name().to_string(), p.clone())))
    };
    let (rule_type, path) = match found {
      Some(x) => x,
      None => {
        debug!(type_name = info.name(), "no extractor rule for type");
        return Binding {
          type_name: info.name().to_string(),
          rule_type: None,
          extractor: Extractor::Unbound,
        };
      }
    };
    let extractor = match PathExtractor::compile(info, &path) {
      Ok(p) => {
        debug!(type_name = info.name(), rule = %rule_type, path = %path, "bound extractor");
        Extractor::Path(p)
      }
      Err(e) => {
        error!(type_name = info.name(), rule = %rule_type, error = %e, "extractor rule does not resolve");
        Extractor::Noop(NoopExtractor::new(info.name(), e))
      }
    };
    Binding {
      type_name: info.name().to_string(),
      rule_type: Some(rule_type),
      extractor: extractor,
    }
  }

  fn invalidate(&self) {
    self.write_cache().clear();
  }

  fn read_rules(&self) -> RwLockReadGuard<'_, Rules> {
    self.rules.read().unwrap_or_else(|p| {
      warn!("extractor rules lock was poisoned");
      p.into_inner()
    })
  }

  fn write_rules(&self) -> RwLockWriteGuard<'_, Rules> {
    self.rules.write().unwrap_or_else(|p| p.into_inner())
  }

  fn read_cache(&self) -> RwLockReadGuard<'_, im::HashMap<TypeId, Arc<Binding>>> {
    self.cache.read().unwrap_or_else(|p| p.into_inner())
  }

  fn write_cache(&self) -> RwLockWriteGuard<'_, im::HashMap<TypeId, Arc<Binding>>> {
    self.cache.write().unwrap_or_else(|p| p.into_inner())
  }
}

/// The type itself, its supertypes nearest first, then the interfaces of each of those, depth
/// first. Every type appears once.
fn search_order(info: &'static TypeInfo) -> Vec<&'static TypeInfo> {
  let lineage = info.lineage();
  let mut order = lineage.clone();
  for t in lineage {
    let mut stack = t.interfaces().collect::<Vec<_>>();
    stack.reverse();
    while let Some(i) = stack.pop() {
      if order.iter().any(|o| std::ptr::eq(*o, i)) {
        continue;
      }
      order.push(i);
      let mut parents = i.interfaces().collect::<Vec<_>>();
      parents.reverse();
      stack.extend(parents);
    }
  }
  order
}
