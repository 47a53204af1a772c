use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, Fields, LitStr, spanned::Spanned};

pub fn derive_from_params(input: DeriveInput) -> TokenStream {
    // retrieve struct field information
    let fields = match &input.data {
        syn::Data::Struct(data_struct) => &data_struct.fields,
        _ => {
            return syn::Error::new(input.span(), "`FromParams` can only be derived for structs")
                .to_compile_error();
        }
    };

    // only named fields carry a parameter key
    let fields = match fields {
        Fields::Named(fields_named) => &fields_named.named,
        _ => {
            return syn::Error::new(
                fields.span(),
                "`FromParams` requires a struct with named fields",
            )
            .to_compile_error();
        }
    };

    // the parameter set lifetime is the struct's first lifetime
    let generics = &input.generics;
    let lifetime = match generics.lifetimes().next() {
        Some(param) => param.lifetime.clone(),
        None => {
            return syn::Error::new(
                generics.span(),
                "`FromParams` requires a lifetime parameter bound to the parameter set",
            )
            .to_compile_error();
        }
    };
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    // each field is extracted under its own name unless `#[param(key = "...")]` overrides it
    let mut idents = Vec::with_capacity(fields.len());
    let mut keys = Vec::with_capacity(fields.len());
    let mut tys = Vec::with_capacity(fields.len());
    for field in fields {
        let Some(ident) = field.ident.clone() else {
            continue;
        };
        let mut key = LitStr::new(&ident.to_string(), ident.span());

        for attr in field.attrs.iter().filter(|a| a.path().is_ident("param")) {
            let result = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("key") {
                    key = meta.value()?.parse()?;
                    Ok(())
                } else {
                    Err(meta.error("unexpected attribute; supported is `key`"))
                }
            });
            if let Err(err) = result {
                return err.to_compile_error();
            }
        }

        idents.push(ident);
        keys.push(key);
        tys.push(&field.ty);
    }

    let name = input.ident;

    quote! {
        impl #impl_generics crate::dispatch::FromParams<#lifetime> for #name #ty_generics #where_clause {
            fn from_params(
                params: &crate::param::ParamSet<#lifetime>,
            ) -> ::core::result::Result<Self, crate::error::HalError> {
                #(
                    let #idents: #tys =
                        crate::param::FromParam::from_param(params.get(#keys)?)?;
                )*
                ::core::result::Result::Ok(Self { #(#idents),* })
            }
        }
    }
}
