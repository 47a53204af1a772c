use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod params;

/// Derives `FromParams` for a request argument struct.
///
/// Every named field is looked up in the parameter set under its own name, or under the key
/// given by `#[param(key = "...")]`, in declaration order.
#[proc_macro_derive(FromParams, attributes(param))]
pub fn derive_from_params(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let expanded = params::derive_from_params(input);
    expanded.into()
}
