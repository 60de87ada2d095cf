//! Derive macro for the `Trace` trait.
//!
//! ```ignore
//! use tether::{Gc, Trace};
//!
//! #[derive(Trace)]
//! struct Node {
//!     next: Option<Gc<Node>>,
//!     #[tether(skip)]
//!     label: &'static str,
//! }
//! ```
//!
//! Container attribute `#[tether(crate = path)]` overrides the path of the
//! runtime crate (default `::tether`). Field attribute `#[tether(skip)]`
//! leaves a field out of tracing; the field must not hold `Gc` edges.

use proc_macro2::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, Attribute, Data, DeriveInput, Field, Fields,
    GenericParam, Generics, Ident, Index, Path,
};

#[proc_macro_derive(Trace, attributes(tether))]
pub fn derive_trace(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.into_compile_error().into(),
    }
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    let tether = crate_path(&input.attrs)?;
    let name = &input.ident;
    let trace_body = generate_trace_body(&tether, name, &input.data)?;
    let generics = add_trait_bounds(&tether, input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    Ok(quote! {
        unsafe impl #impl_generics #tether::Trace for #name #ty_generics #where_clause {
            #[inline]
            fn trace(&self, visitor: &mut impl #tether::Visitor) {
                #trace_body
            }
        }
    })
}

fn crate_path(attrs: &[Attribute]) -> syn::Result<Path> {
    let mut tether: Path = parse_quote!(::tether);
    for attr in attrs {
        if !attr.path().is_ident("tether") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                tether = meta.value()?.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported container attribute, expected `crate = path`"))
            }
        })?;
    }
    Ok(tether)
}

fn is_skipped(field: &Field) -> syn::Result<bool> {
    let mut skip = false;
    for attr in &field.attrs {
        if !attr.path().is_ident("tether") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported field attribute, expected `skip`"))
            }
        })?;
    }
    Ok(skip)
}

fn add_trait_bounds(tether: &Path, mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            let has_trace = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Trait(t) = b {
                    t.path.segments.last().is_some_and(|s| s.ident == "Trace")
                } else {
                    false
                }
            });
            let has_static = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Lifetime(l) = b {
                    l.ident == "static"
                } else {
                    false
                }
            });

            if !has_trace {
                type_param.bounds.push(parse_quote!(#tether::Trace));
            }
            if !has_static {
                type_param.bounds.push(parse_quote!('static));
            }
        }
    }
    generics
}

fn generate_trace_body(tether: &Path, name: &Ident, data: &Data) -> syn::Result<TokenStream> {
    match data {
        Data::Struct(data) => generate_struct_trace(tether, &data.fields),
        Data::Enum(data) => generate_enum_trace(tether, name, data),
        Data::Union(u) => Err(syn::Error::new(
            u.union_token.span,
            "`Trace` must be manually implemented for unions",
        )),
    }
}

fn generate_struct_trace(tether: &Path, fields: &Fields) -> syn::Result<TokenStream> {
    let mut calls = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if is_skipped(field)? {
            continue;
        }
        let access = field.ident.as_ref().map_or_else(
            || {
                let index = Index::from(i);
                quote!(#index)
            },
            |ident| quote!(#ident),
        );
        calls.push(quote_spanned! {field.span() =>
            #tether::Trace::trace(&self.#access, visitor);
        });
    }
    Ok(quote! { #(#calls)* })
}

fn generate_enum_trace(
    tether: &Path,
    name: &Ident,
    data: &syn::DataEnum,
) -> syn::Result<TokenStream> {
    let mut arms = Vec::new();
    for variant in &data.variants {
        let var_name = &variant.ident;
        let mut patterns = Vec::new();
        let mut calls = Vec::new();
        for (i, field) in variant.fields.iter().enumerate() {
            let binding = format_ident!("field{}", i);
            let traced = !is_skipped(field)?;
            if traced {
                calls.push(quote! { #tether::Trace::trace(#binding, visitor); });
            }
            patterns.push(match (&field.ident, traced) {
                (Some(ident), true) => quote!(#ident: #binding),
                (Some(ident), false) => quote!(#ident: _),
                (None, true) => quote!(#binding),
                (None, false) => quote!(_),
            });
        }

        arms.push(match &variant.fields {
            Fields::Named(_) => quote! {
                #name::#var_name { #(#patterns),* } => { #(#calls)* }
            },
            Fields::Unnamed(_) => quote! {
                #name::#var_name(#(#patterns),*) => { #(#calls)* }
            },
            Fields::Unit => quote! {
                #name::#var_name => {}
            },
        });
    }

    if arms.is_empty() {
        return Ok(quote! { match *self {} });
    }
    Ok(quote! {
        match self {
            #(#arms)*
        }
    })
}
