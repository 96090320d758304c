//! Derive macros for the `commrat-wire` packing traits.
//!
//! The derive handles byte-aligned structs with named fields: every field is
//! packed little endian, in declaration order, at the offset given by the sum
//! of the packed lengths of the fields before it. Bit-level packing is out of
//! scope; CommRaT frames are byte aligned by design.

use proc_macro::TokenStream;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

mod generate;

use generate::generate_struct;

/// Derive `CommratWireRead`, `CommratWireWrite`, `CommratWireSized` and
/// `CommratWireWriteSized` for a byte-aligned struct with named fields.
///
/// Every field type must itself implement the sized wire traits. The packed
/// length of the struct is the sum of the packed lengths of its fields.
#[proc_macro_derive(CommratWire)]
pub fn commrat_wire(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let res = match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(fields) => generate_struct(&input, fields),
            Fields::Unnamed(_) | Fields::Unit => Err(syn::Error::new_spanned(
                &input.ident,
                "CommratWire can only be derived for structs with named fields",
            )),
        },
        Data::Enum(_) | Data::Union(_) => Err(syn::Error::new_spanned(
            &input.ident,
            "CommratWire can only be derived for structs",
        )),
    };

    match res {
        Ok(tokens) => tokens.into(),
        Err(e) => e.into_compile_error().into(),
    }
}
