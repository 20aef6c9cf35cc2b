use crate::extract::{Shape, Value};
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

/// Reads one member of an inspectable value. Yields [`Value::Null`] when handed a value of a
/// type it was not built for.
pub type Accessor = Arc<dyn for<'a> Fn(&'a dyn Inspect) -> Value<'a> + Send + Sync>;

type Upcast = Arc<dyn for<'a> Fn(&'a dyn Inspect) -> Option<&'a dyn Inspect> + Send + Sync>;

/// Gives a key extractor access to a value's members without knowing its type.
pub trait Inspect: Any + Send + Sync {
  /// Descriptor of the value's concrete type.
  fn type_info(&self) -> &'static TypeInfo;
  /// For downcasting in hand-written accessors.
  fn as_any(&self) -> &dyn Any;
}

/// Types with a statically known descriptor. Usually derived with `#[derive(Inspect)]`.
pub trait Reflect: Any + Send + Sync + Sized {
  /// The descriptor shared by every value of the type.
  fn static_info() -> &'static TypeInfo;
}
impl<T: Reflect> Inspect for T {
  fn type_info(&self) -> &'static TypeInfo {
    T::static_info()
  }

  fn as_any(&self) -> &dyn Any {
    self
  }
}

/// Whether a member is stored or computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberKind {
  /// A computed property.
  Getter,
  /// A stored field.
  Field,
}

/// One named member of a type, with a type-erased accessor.
#[derive(Clone)]
pub struct Member {
  name: String,
  kind: MemberKind,
  shape: Shape,
  access: Accessor,
}
impl Member {
  /// The member's name as paths spell it.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Field or getter.
  pub fn kind(&self) -> MemberKind {
    self.kind
  }

  /// What the member's values look like.
  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  /// Reads the member from a value of the owning type.
  pub fn accessor(&self) -> &Accessor {
    &self.access
  }
}

#[derive(Clone)]
struct Supertype {
  info: fn() -> &'static TypeInfo,
  upcast: Upcast,
}

/// Describes the members of a type, what it extends and what it implements.
///
/// Interfaces are descriptors without members. A rule registered for an interface is applied to
/// the members of the concrete type implementing it.
pub struct TypeInfo {
  name: String,
  type_id: Option<TypeId>,
  getters: Vec<Member>,
  fields: Vec<Member>,
  supertype: Option<Supertype>,
  interfaces: Vec<fn() -> &'static TypeInfo>,
}
impl TypeInfo {
  /// Starts describing `T`.
  pub fn builder<T: Reflect>(name: &str) -> TypeInfoBuilder<T> {
    TypeInfoBuilder {
      info: TypeInfo {
        name: name.to_string(),
        type_id: Some(TypeId::of::<T>()),
        getters: Vec::new(),
        fields: Vec::new(),
        supertype: None,
        interfaces: Vec::new(),
      },
      _type: PhantomData,
    }
  }

  /// An interface, which may itself extend other interfaces.
  pub fn interface(name: &str, extends: &[fn() -> &'static TypeInfo]) -> TypeInfo {
    TypeInfo {
      name: name.to_string(),
      type_id: None,
      getters: Vec::new(),
      fields: Vec::new(),
      supertype: None,
      interfaces: extends.to_vec(),
    }
  }

  /// The name rules refer to the type by.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// `None` for interfaces.
  pub fn type_id(&self) -> Option<TypeId> {
    self.type_id
  }

  /// Interfaces only carry getters and are never the concrete type of a value.
  pub fn is_interface(&self) -> bool {
    self.type_id.is_none()
  }

  /// The type this one extends, if any.
  pub fn supertype(&self) -> Option<&'static TypeInfo> {
    self.supertype.as_ref().map(|s| (s.info)())
  }

  /// The interfaces declared directly on this type.
  pub fn interfaces(&self) -> impl Iterator<Item = &'static TypeInfo> + '_ {
    self.interfaces.iter().map(|f| f())
  }

  /// This type followed by its supertypes, nearest first.
  pub fn lineage(&'static self) -> Vec<&'static TypeInfo> {
    let mut chain = vec![self];
    let mut cur = self;
    while let Some(parent) = cur.supertype() {
      if chain.iter().any(|t| std::ptr::eq(*t, parent)) {
        break;
      }
      chain.push(parent);
      cur = parent;
    }
    chain
  }

  /// Finds `name` the way a property path segment is resolved: first among the getters of this
  /// type and its supertypes, then among their fields. Members inherited from a supertype come
  /// back wrapped so that they accept values of this type.
  pub fn member(&self, name: &str) -> Option<Member> {
    self
      .find(name, MemberKind::Getter)
      .or_else(|| self.find(name, MemberKind::Field))
  }

  fn find(&self, name: &str, kind: MemberKind) -> Option<Member> {
    let own = match kind {
      MemberKind::Getter => &self.getters,
      MemberKind::Field => &self.fields,
    };
    if let Some(m) = own.iter().find(|m| m.name == name) {
      return Some(m.clone());
    }
    let sup = self.supertype.as_ref()?;
    let inherited = (sup.info)().find(name, kind)?;
    Some(Member {
      access: chain(sup.upcast.clone(), inherited.access),
      ..inherited
    })
  }
}
impl std::fmt::Debug for TypeInfo {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TypeInfo")
      .field("name", &self.name)
      .field("getters", &self.getters.iter().map(|m| &m.name).collect::<Vec<_>>())
      .field("fields", &self.fields.iter().map(|m| &m.name).collect::<Vec<_>>())
      .field("supertype", &self.supertype().map(|s| s.name()))
      .field("interfaces", &self.interfaces().map(|i| i.name()).collect::<Vec<_>>())
      .finish()
  }
}

fn accessor<F>(f: F) -> Accessor
where
  F: for<'a> Fn(&'a dyn Inspect) -> Value<'a> + Send + Sync + 'static,
{
  Arc::new(f)
}

fn upcaster<F>(f: F) -> Upcast
where
  F: for<'a> Fn(&'a dyn Inspect) -> Option<&'a dyn Inspect> + Send + Sync + 'static,
{
  Arc::new(f)
}

fn chain(upcast: Upcast, inner: Accessor) -> Accessor {
  accessor(move |obj| match upcast(obj) {
    Some(base) => inner(base),
    None => Value::Null,
  })
}

/// Collects the members of a [`TypeInfo`].
pub struct TypeInfoBuilder<T> {
  info: TypeInfo,
  _type: PhantomData<fn() -> T>,
}
impl<T: Reflect> TypeInfoBuilder<T> {
  fn typed<F>(name: &str, kind: MemberKind, shape: Shape, f: F) -> Member
  where
    F: for<'a> Fn(&'a T) -> Value<'a> + Send + Sync + 'static,
  {
    Member {
      name: name.to_string(),
      kind: kind,
      shape: shape,
      access: accessor(move |obj| match obj.as_any().downcast_ref::<T>() {
        Some(t) => f(t),
        None => Value::Null,
      }),
    }
  }

  /// A computed property. Getters win over fields of the same name.
  pub fn getter<F>(mut self, name: &str, shape: Shape, f: F) -> Self
  where
    F: for<'a> Fn(&'a T) -> Value<'a> + Send + Sync + 'static,
  {
    let m = Self::typed(name, MemberKind::Getter, shape, f);
    self.info.getters.push(m);
    self
  }

  /// A stored field.
  pub fn field<F>(mut self, name: &str, shape: Shape, f: F) -> Self
  where
    F: for<'a> Fn(&'a T) -> Value<'a> + Send + Sync + 'static,
  {
    let m = Self::typed(name, MemberKind::Field, shape, f);
    self.info.fields.push(m);
    self
  }

  /// Declares `B` as the supertype of `T`. `f` finds the `B` part of a `T`.
  pub fn extends<B, F>(mut self, f: F) -> Self
  where
    B: Reflect,
    F: for<'a> Fn(&'a T) -> &'a B + Send + Sync + 'static,
  {
    self.info.supertype = Some(Supertype {
      info: B::static_info,
      upcast: upcaster(move |obj| {
        obj
          .as_any()
          .downcast_ref::<T>()
          .map(|t| f(t) as &dyn Inspect)
      }),
    });
    self
  }

  /// Adds an interface the type implements.
  pub fn implements(mut self, interface: fn() -> &'static TypeInfo) -> Self {
    self.info.interfaces.push(interface);
    self
  }

  /// Finishes the descriptor.
  pub fn build(self) -> TypeInfo {
    self.info
  }
}
