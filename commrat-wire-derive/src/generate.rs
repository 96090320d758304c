use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, FieldsNamed};

pub fn generate_struct(
    input: &DeriveInput,
    fields: &FieldsNamed,
) -> Result<TokenStream, syn::Error> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "CommratWire cannot be derived for generic structs",
        ));
    }

    let name = input.ident.clone();

    let field_names = fields
        .named
        .iter()
        .map(|f| f.ident.clone().expect("named fields always have an ident"))
        .collect::<Vec<_>>();

    let field_types = fields.named.iter().map(|f| f.ty.clone()).collect::<Vec<_>>();

    // Sum of the packed lengths of every field. Evaluates in const position
    // because all field types are concrete.
    let packed_len = if field_types.is_empty() {
        quote! { 0usize }
    } else {
        quote! { #(<#field_types as ::commrat_wire::CommratWireSized>::PACKED_LEN)+* }
    };

    let fields_pack = field_names.iter().zip(field_types.iter()).map(|(name, ty)| {
        quote! {
            let end = offset + <#ty as ::commrat_wire::CommratWireSized>::PACKED_LEN;
            <#ty as ::commrat_wire::CommratWireWrite>::pack_to_slice_unchecked(
                &self.#name,
                &mut buf[offset..end],
            );
            offset = end;
        }
    });

    let fields_unpack = field_names.iter().zip(field_types.iter()).map(|(name, ty)| {
        quote! {
            #name: {
                let end = offset + <#ty as ::commrat_wire::CommratWireSized>::PACKED_LEN;
                let value =
                    <#ty as ::commrat_wire::CommratWireRead>::unpack_from_slice(&buf[offset..end])?;
                offset = end;
                value
            }
        }
    });

    let out = quote! {
        impl ::commrat_wire::CommratWireWrite for #name {
            fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
                const LEN: usize = #packed_len;

                let buf = match buf.get_mut(0..LEN) {
                    Some(buf) => buf,
                    None => unreachable!(),
                };

                let mut offset = 0usize;

                #(#fields_pack)*

                let _ = offset;

                buf
            }

            fn packed_len(&self) -> usize {
                #packed_len
            }
        }

        impl ::commrat_wire::CommratWireRead for #name {
            fn unpack_from_slice(buf: &[u8]) -> Result<Self, ::commrat_wire::WireError> {
                const LEN: usize = #packed_len;

                let buf = buf.get(0..LEN).ok_or(::commrat_wire::WireError::ReadBufferTooShort {
                    expected: LEN,
                    got: buf.len(),
                })?;

                let mut offset = 0usize;

                let res = Self {
                    #(#fields_unpack),*
                };

                let _ = offset;

                Ok(res)
            }
        }

        impl ::commrat_wire::CommratWireSized for #name {
            const PACKED_LEN: usize = #packed_len;

            type Buffer = [u8; #packed_len];

            fn buffer() -> Self::Buffer {
                [0u8; #packed_len]
            }
        }

        impl ::commrat_wire::CommratWireWriteSized for #name {
            fn pack(&self) -> Self::Buffer {
                let mut buf = [0u8; #packed_len];

                <Self as ::commrat_wire::CommratWireWrite>::pack_to_slice_unchecked(self, &mut buf);

                buf
            }
        }
    };

    Ok(out)
}
