use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{
  Attribute, DeriveInput, Error, Field, GenericArgument, Ident, Lit, Meta, NestedMeta, Path,
  PathArguments, Type,
};

pub struct InspectImpl {
  type_id: Ident,
  type_attr: TypeProperties,
  fields: Vec<InspectField>,
}
impl InspectImpl {
  pub fn derive(ast: DeriveInput) -> syn::Result<Self> {
    derive(ast)
  }
  pub fn expand(&self) -> TokenStream {
    expand(self)
  }
}

fn derive(ast: DeriveInput) -> syn::Result<InspectImpl> {
  let aspan = ast.span();
  if let Some(param) = ast.generics.params.first() {
    return Err(Error::new(
      param.span(),
      "Inspect does not allow generic parameters.",
    ));
  }
  let data = match ast.data {
    syn::Data::Struct(x) => x,
    _ => return Err(Error::new(aspan, "Inspect only supports structs.")),
  };
  let named = match data.fields {
    syn::Fields::Named(n) => n.named.into_iter().collect(),
    syn::Fields::Unit => vec![],
    syn::Fields::Unnamed(u) => {
      return Err(Error::new(u.span(), "Inspect needs named fields."));
    }
  };
  let mut fields = vec![];
  for f in named.into_iter().map(InspectField::get) {
    if let Some(f) = f? {
      fields.push(f);
    }
  }
  if fields.iter().filter(|f| f.role == Role::Extends).count() > 1 {
    return Err(Error::new(aspan, "Inspect allows at most one 'extends' field."));
  }

  Ok(InspectImpl {
    type_attr: TypeProperties::get(&ast.ident, ast.attrs)?,
    type_id: ast.ident,
    fields: fields,
  })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
  Value,
  Object,
  Extends,
}

struct InspectField {
  ident: Ident,
  name: String,
  ty: Type,
  role: Role,
}
impl InspectField {
  fn get(field: Field) -> syn::Result<Option<Self>> {
    let fspan = field.span();
    let ident = match field.ident {
      Some(i) => i,
      None => return Err(Error::new(fspan, "Inspect needs named fields.")),
    };
    let mut role: Option<Role> = None;
    let mut rename: Option<String> = None;
    let mut skip = false;
    for meta in nested_metas(&field.attrs)? {
      match meta {
        NestedMeta::Meta(Meta::Path(p)) => {
          let flag = flag_of(&p)?;
          let r = match flag.to_string().as_str() {
            "skip" => {
              skip = true;
              continue;
            }
            "object" => Role::Object,
            "extends" => Role::Extends,
            "map" => Role::Value,
            _ => return Err(Error::new(flag.span(), format!("Unknown flag `{}`", flag))),
          };
          if role.replace(r).is_some() {
            return Err(Error::new(flag.span(), "Conflicting 'inspect' flags."));
          }
        }
        NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("rename") => {
          match nv.lit {
            Lit::Str(s) if rename.is_none() => rename = Some(s.value()),
            Lit::Str(s) => return Err(Error::new(s.span(), "Duplicate key `rename`")),
            other => return Err(Error::new(other.span(), "`rename` takes a string literal")),
          }
        }
        other => {
          return Err(Error::new(other.span(), "Unrecognized 'inspect' argument"));
        }
      }
    }
    if skip {
      return Ok(None);
    }
    Ok(Some(InspectField {
      name: rename.unwrap_or_else(|| ident.to_string()),
      ident: ident,
      ty: field.ty,
      role: role.unwrap_or(Role::Value),
    }))
  }
}

struct TypeProperties {
  name: String,
  implements: Vec<Path>,
}
impl TypeProperties {
  fn get(ident: &Ident, attrs: Vec<Attribute>) -> syn::Result<Self> {
    let mut name: Option<String> = None;
    let mut implements = vec![];
    for meta in nested_metas(&attrs)? {
      match meta {
        NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("name") => match nv.lit {
          Lit::Str(s) if name.is_none() => name = Some(s.value()),
          Lit::Str(s) => return Err(Error::new(s.span(), "Duplicate key `name`")),
          other => return Err(Error::new(other.span(), "`name` takes a string literal")),
        },
        NestedMeta::Meta(Meta::List(list)) if list.path.is_ident("implements") => {
          for nested in list.nested {
            match nested {
              NestedMeta::Meta(Meta::Path(p)) => implements.push(p),
              other => {
                return Err(Error::new(
                  other.span(),
                  "'implements' takes paths to functions returning &'static TypeInfo",
                ))
              }
            }
          }
        }
        other => {
          return Err(Error::new(other.span(), "Unrecognized 'inspect' argument"));
        }
      }
    }
    Ok(TypeProperties {
      name: name.unwrap_or_else(|| ident.to_string()),
      implements: implements,
    })
  }
}

fn nested_metas(attrs: &[Attribute]) -> syn::Result<Vec<NestedMeta>> {
  let mut metas = vec![];
  for attr in attrs.iter().filter(|attr| attr.path.is_ident("inspect")) {
    match attr.parse_meta()? {
      Meta::List(list) => metas.extend(list.nested),
      other => {
        return Err(Error::new(
          other.span(),
          "You must have parentheses around arguments to 'inspect'",
        ))
      }
    }
  }
  Ok(metas)
}

fn flag_of(p: &Path) -> syn::Result<Ident> {
  p.get_ident()
    .cloned()
    .ok_or_else(|| Error::new(p.span(), "'inspect' flags are singular identifiers."))
}

// `Option<T>` gives `Some(T)`.
fn option_inner(ty: &Type) -> Option<&Type> {
  let path = match ty {
    Type::Path(p) if p.qself.is_none() => &p.path,
    _ => return None,
  };
  let last = path.segments.last()?;
  if last.ident != "Option" {
    return None;
  }
  match &last.arguments {
    PathArguments::AngleBracketed(args) if args.args.len() == 1 => match args.args.first() {
      Some(GenericArgument::Type(t)) => Some(t),
      _ => None,
    },
    _ => None,
  }
}

fn expand(root: &InspectImpl) -> TokenStream {
  let type_id = &root.type_id;
  let type_name = &root.type_attr.name;
  let interfaces = &root.type_attr.implements;

  let members = root.fields.iter().map(|f| -> proc_macro2::TokenStream {
    let ident = &f.ident;
    let name = &f.name;
    let ty = &f.ty;
    match f.role {
      Role::Value => quote! {
        .field(
          #name,
          <#ty as ::event_pool::extract::AsValue>::shape(),
          |x: &#type_id| ::event_pool::extract::AsValue::as_value(&x.#ident),
        )
      },
      Role::Object => match option_inner(ty) {
        Some(inner) => quote! {
          .field(
            #name,
            ::event_pool::extract::Shape::object::<#inner>(),
            |x: &#type_id| ::event_pool::extract::Value::object_opt(&x.#ident),
          )
        },
        None => quote! {
          .field(
            #name,
            ::event_pool::extract::Shape::object::<#ty>(),
            |x: &#type_id| ::event_pool::extract::Value::object(&x.#ident),
          )
        },
      },
      Role::Extends => quote! {
        .extends::<#ty, _>(|x: &#type_id| &x.#ident)
      },
    }
  });

  let code = TokenStream::from(quote! {
    impl ::event_pool::extract::Reflect for #type_id {
      fn static_info() -> &'static ::event_pool::extract::TypeInfo {
        static INFO: ::event_pool::extract::Lazy<::event_pool::extract::TypeInfo> =
          ::event_pool::extract::Lazy::new(|| {
            ::event_pool::extract::TypeInfo::builder::<#type_id>(#type_name)
              #(#members)*
              #(.implements(#interfaces))*
              .build()
          });
        &INFO
      }
    }
  });
  code
}
