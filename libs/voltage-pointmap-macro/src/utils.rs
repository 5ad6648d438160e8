//! Type inspection helpers

use syn::{GenericArgument, PathArguments, Type, TypePath};

/// Last path segment of a type, e.g. `Option` for `Option<String>`
pub fn extract_type_name(ty: &Type) -> String {
    match ty {
        Type::Path(TypePath { path, .. }) => path
            .segments
            .last()
            .map(|seg| seg.ident.to_string())
            .unwrap_or_else(|| "Unknown".to_string()),
        _ => "Unknown".to_string(),
    }
}

/// Leaf types that can never be nested records.
const LEAF_TYPES: &[&str] = &[
    "bool", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64", "String",
    "RawBytes", "Vec", "Option",
];

/// Whether a type maps to a single point rather than a nested record
pub fn is_leaf_type(ty: &Type) -> bool {
    LEAF_TYPES.contains(&extract_type_name(ty).as_str())
}

/// Inner type of `Option<T>`
pub fn extract_option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(TypePath { path, .. }) = ty else {
        return None;
    };
    let segment = path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    match &segment.arguments {
        PathArguments::AngleBracketed(args) => match args.args.first() {
            Some(GenericArgument::Type(inner)) => Some(inner),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_extract_type_name() {
        let ty: Type = parse_quote!(f64);
        assert_eq!(extract_type_name(&ty), "f64");

        let ty: Type = parse_quote!(Vec<u16>);
        assert_eq!(extract_type_name(&ty), "Vec");

        let ty: Type = parse_quote!((u16, u16));
        assert_eq!(extract_type_name(&ty), "Unknown");
    }

    #[test]
    fn test_is_leaf_type() {
        assert!(is_leaf_type(&parse_quote!(u32)));
        assert!(is_leaf_type(&parse_quote!(Option<Meter>)));
        assert!(is_leaf_type(&parse_quote!(Vec<i16>)));
        assert!(!is_leaf_type(&parse_quote!(Meter)));
        assert!(!is_leaf_type(&parse_quote!(crate::grid::Meter)));
    }

    #[test]
    fn test_extract_option_inner() {
        let ty: Type = parse_quote!(Option<RawBytes>);
        let inner = extract_option_inner(&ty).unwrap();
        assert_eq!(extract_type_name(inner), "RawBytes");

        let ty: Type = parse_quote!(String);
        assert!(extract_option_inner(&ty).is_none());
    }
}
