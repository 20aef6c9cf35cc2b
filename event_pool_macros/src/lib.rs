extern crate proc_macro;
use proc_macro::TokenStream;

mod inspect;

use inspect::InspectImpl;

/// Derives `event_pool::extract::Reflect` for a struct with named fields, which makes the struct
/// usable with key extraction rules.
///
/// Struct attributes:
/// - `#[inspect(name = "Order")]` sets the type name rules refer to. Defaults to the struct's name.
/// - `#[inspect(implements(path::to::info_fn, ...))]` declares interfaces, each given as a
///   `fn() -> &'static TypeInfo`.
///
/// Field attributes:
/// - none, or `map`: a scalar or string-keyed map, read through `AsValue`.
/// - `object`: a nested struct that itself derives `Inspect`, optionally wrapped in `Option`.
/// - `extends`: the embedded supertype part of this struct.
/// - `rename = "..."`: the member name used in paths.
/// - `skip`: not visible to extraction.
#[proc_macro_derive(Inspect, attributes(inspect))]
pub fn inspect(item: TokenStream) -> TokenStream {
  syn::parse(item)
    .and_then(InspectImpl::derive)
    .map(|x| x.expand())
    .unwrap_or_else(|x| x.to_compile_error().into())
}
