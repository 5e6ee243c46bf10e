//! Derive macros for the world's marker traits.
//!
//! Component, array-element, and tag types are plain data; registering them
//! by hand (`impl Component for Position { ... }`, spelling out field
//! reflection) is mechanical boilerplate the derive macros remove.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

#[proc_macro_derive(Component)]
pub fn derive_component(item: TokenStream) -> TokenStream {
    derive_data_marker(item, quote!(Component))
}

#[proc_macro_derive(ArrayElement)]
pub fn derive_array_element(item: TokenStream) -> TokenStream {
    derive_data_marker(item, quote!(ArrayElement))
}

#[proc_macro_derive(Tag)]
pub fn derive_tag(item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as DeriveInput);
    let name = &ast.ident;
    let name_str = name.to_string();
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    TokenStream::from(quote! {
        impl #impl_generics ::loom_engine::ecs::component::Tag for #name #ty_generics #where_clause {
            fn type_name() -> &'static str {
                #name_str
            }
        }
    })
}

/// Shared codegen for `Component`/`ArrayElement`: both require `type_name()`
/// and a reflected `fields()` list built from the struct's named fields (if
/// any — tuple structs and unit structs simply report no fields).
fn derive_data_marker(input: TokenStream, trait_name: proc_macro2::TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let name = &ast.ident;
    let name_str = name.to_string();
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    let field_entries = match &ast.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => named
                .named
                .iter()
                .map(|f| {
                    let field_name = f.ident.as_ref().unwrap().to_string();
                    let ty = &f.ty;
                    let type_name = quote!(#ty).to_string();
                    quote! {
                        ::loom_engine::ecs::component::Field::new(#field_name, #type_name)
                    }
                })
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let fields_body = if field_entries.is_empty() {
        quote! { &[] }
    } else {
        quote! {
            {
                static FIELDS: ::std::sync::OnceLock<::std::vec::Vec<::loom_engine::ecs::component::Field>> =
                    ::std::sync::OnceLock::new();
                FIELDS.get_or_init(|| ::std::vec![ #(#field_entries),* ]).as_slice()
            }
        }
    };

    TokenStream::from(quote! {
        impl #impl_generics ::loom_engine::ecs::component::#trait_name for #name #ty_generics #where_clause {
            fn type_name() -> &'static str {
                #name_str
            }

            fn fields() -> &'static [::loom_engine::ecs::component::Field] {
                #fields_body
            }
        }
    })
}
