//! Attribute parsing for the PointRecord derive

use darling::ast::{self, NestedMeta};
use darling::{FromDeriveInput, FromField, FromMeta};
use syn::{Attribute, Generics, Ident, Lit, Meta};

use crate::utils::{extract_option_inner, is_leaf_type};

#[derive(Debug, FromDeriveInput)]
#[darling(supports(struct_named))]
pub struct RecordArgs {
    pub ident: Ident,
    pub generics: Generics,
    pub data: ast::Data<(), FieldArgs>,
}

/// Raw field; `#[point]` attributes are forwarded and parsed by [`PointAttr`].
#[derive(Debug, Clone, FromField)]
#[darling(forward_attrs(point))]
pub struct FieldArgs {
    pub ident: Option<Ident>,
    pub ty: syn::Type,
    pub attrs: Vec<Attribute>,
}

/// Contents of one `#[point(...)]` attribute.
///
/// ```ignore
/// #[point("voltage")]
/// #[point(name = "voltage")]
/// #[point(flatten)]
/// #[point(skip)]
/// ```
#[derive(Debug, Default)]
pub struct PointAttr {
    pub name: Option<String>,
    pub flatten: bool,
    pub skip: bool,
}

impl FromMeta for PointAttr {
    fn from_list(items: &[NestedMeta]) -> darling::Result<Self> {
        let mut attr = Self::default();
        let mut errors = darling::Error::accumulator();

        for item in items {
            match item {
                NestedMeta::Lit(Lit::Str(s)) => attr.set_name(s.value(), item, &mut errors),
                NestedMeta::Meta(meta @ Meta::NameValue(nv)) if nv.path.is_ident("name") => {
                    if let Some(name) = errors.handle(String::from_meta(meta)) {
                        attr.set_name(name, item, &mut errors);
                    }
                },
                NestedMeta::Meta(Meta::Path(path)) if path.is_ident("flatten") => {
                    attr.flatten = true;
                },
                NestedMeta::Meta(Meta::Path(path)) if path.is_ident("skip") => {
                    attr.skip = true;
                },
                other => errors.push(
                    darling::Error::custom(
                        "expected a point name, `name = \"...\"`, `flatten` or `skip`",
                    )
                    .with_span(other),
                ),
            }
        }

        errors.finish_with(attr)
    }

    fn from_string(value: &str) -> darling::Result<Self> {
        Ok(Self {
            name: Some(value.to_string()),
            ..Self::default()
        })
    }
}

impl PointAttr {
    fn set_name(
        &mut self,
        name: String,
        span: &NestedMeta,
        errors: &mut darling::error::Accumulator,
    ) {
        if self.name.is_some() {
            errors.push(darling::Error::duplicate_field("name").with_span(span));
        } else if name.is_empty() {
            errors.push(darling::Error::custom("point name must not be empty").with_span(span));
        } else {
            self.name = Some(name);
        }
    }
}

/// What the derive does with one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Point(String),
    Flatten,
    Skip,
}

impl FieldArgs {
    pub fn binding(&self) -> darling::Result<Binding> {
        let mut found: Option<PointAttr> = None;
        for attr in &self.attrs {
            let parsed = PointAttr::from_meta(&attr.meta).map_err(|e| e.with_span(attr))?;
            if found.is_some() {
                return Err(darling::Error::custom("duplicate #[point] attribute").with_span(attr));
            }
            found = Some(parsed);
        }

        // Unannotated non-leaf fields are nested records.
        let Some(attr) = found else {
            return Ok(if is_leaf_type(&self.ty) {
                Binding::Skip
            } else {
                Binding::Flatten
            });
        };
        if attr.skip || attr.name.as_deref() == Some("-") {
            return Ok(Binding::Skip);
        }
        match (attr.flatten, attr.name) {
            (true, Some(_)) => Err(darling::Error::custom(
                "`flatten` cannot be combined with a point name",
            )
            .with_span(&self.ty)),
            (true, None) => {
                if extract_option_inner(&self.ty).is_some() {
                    return Err(darling::Error::custom(
                        "`flatten` requires a record type, not an Option",
                    )
                    .with_span(&self.ty));
                }
                Ok(Binding::Flatten)
            },
            (false, Some(name)) => Ok(Binding::Point(name)),
            (false, None) => Err(darling::Error::custom(
                "#[point] needs a point name, `flatten` or `skip`",
            )
            .with_span(&self.ty)),
        }
    }
}
