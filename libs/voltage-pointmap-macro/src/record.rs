//! Code generation for `#[derive(PointRecord)]`

use darling::FromDeriveInput;
use proc_macro2::TokenStream;
use quote::quote;
use syn::DeriveInput;

use crate::attributes::{Binding, FieldArgs, RecordArgs};
use crate::utils::{extract_type_name, is_leaf_type};

/// Generated code per field, one fragment for each trait method.
struct FieldCode {
    describe: TokenStream,
    visit: TokenStream,
    visit_mut: TokenStream,
}

fn field_code(field: &FieldArgs) -> darling::Result<Option<FieldCode>> {
    let ident = field
        .ident
        .as_ref()
        .ok_or_else(|| darling::Error::custom("PointRecord fields must be named"))?;
    let ty = &field.ty;

    let code = match field.binding()? {
        Binding::Skip => return Ok(None),
        Binding::Flatten => {
            if is_leaf_type(ty) {
                return Err(darling::Error::custom(format!(
                    "`flatten` requires a nested record, found `{}`",
                    extract_type_name(ty)
                ))
                .with_span(ty));
            }
            FieldCode {
                describe: quote! {
                    <#ty as ::voltage_pointmap::PointRecord>::describe(specs);
                },
                visit: quote! {
                    ::voltage_pointmap::PointRecord::visit(&self.#ident, visitor)?;
                },
                visit_mut: quote! {
                    ::voltage_pointmap::PointRecord::visit_mut(&mut self.#ident, visitor)?;
                },
            }
        },
        Binding::Point(name) => {
            let path = ident.to_string();
            FieldCode {
                describe: quote! {
                    specs.push(::voltage_pointmap::FieldSpec {
                        point: #name,
                        path: #path,
                        kind: <#ty as ::voltage_pointmap::PointType>::KIND,
                        nullable: <#ty as ::voltage_pointmap::PointType>::NULLABLE,
                    });
                },
                visit: quote! {
                    visitor.visit(#name, &self.#ident)?;
                },
                visit_mut: quote! {
                    visitor.visit_mut(#name, &mut self.#ident)?;
                },
            }
        },
    };
    Ok(Some(code))
}

/// Parse the struct, resolve every field binding, emit the trait impl.
///
/// Binding errors of all fields are reported together.
pub fn derive_point_record_impl(input: DeriveInput) -> darling::Result<TokenStream> {
    let args = RecordArgs::from_derive_input(&input)?;
    let fields = args
        .data
        .as_ref()
        .take_struct()
        .ok_or_else(|| darling::Error::unsupported_shape("enum"))?
        .fields;

    let mut errors = darling::Error::accumulator();
    let codes: Vec<FieldCode> = fields
        .into_iter()
        .filter_map(|field| errors.handle(field_code(field)).flatten())
        .collect();
    errors.finish()?;

    let describe = codes.iter().map(|c| &c.describe);
    let visit = codes.iter().map(|c| &c.visit);
    let visit_mut = codes.iter().map(|c| &c.visit_mut);

    let ident = &args.ident;
    let (impl_generics, ty_generics, where_clause) = args.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::voltage_pointmap::PointRecord for #ident #ty_generics #where_clause {
            fn describe(specs: &mut ::std::vec::Vec<::voltage_pointmap::FieldSpec>) {
                #(#describe)*
            }

            fn visit(
                &self,
                visitor: &mut dyn ::voltage_pointmap::FieldVisitor,
            ) -> ::voltage_pointmap::Result<()> {
                #(#visit)*
                ::std::result::Result::Ok(())
            }

            fn visit_mut(
                &mut self,
                visitor: &mut dyn ::voltage_pointmap::FieldVisitorMut,
            ) -> ::voltage_pointmap::Result<()> {
                #(#visit_mut)*
                ::std::result::Result::Ok(())
            }
        }
    })
}
