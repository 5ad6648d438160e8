//! Derive macro for `voltage_pointmap::PointRecord`
//!
//! Generates the schema and visitor methods that map annotated struct fields
//! to catalog point names.
//!
//! # Example
//!
//! ```rust,ignore
//! use voltage_pointmap::PointRecord;
//!
//! #[derive(Default, PointRecord)]
//! pub struct Inverter {
//!     #[point("dc_voltage")]
//!     pub dc_voltage: f64,
//!
//!     #[point(name = "serial_no")]
//!     pub serial: String,
//!
//!     #[point(flatten)]
//!     pub grid: GridMeter,
//!
//!     // Unannotated nested records are walked as if flattened
//!     pub battery: BatteryPack,
//!
//!     // Unannotated leaf fields are never touched
//!     pub label: String,
//! }
//! ```

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod attributes;
mod record;
mod utils;

/// Derive `PointRecord` for a struct with named fields
///
/// # Field attributes
///
/// - `#[point("name")]` or `#[point(name = "name")]` - Map the field to a point
/// - `#[point("-")]` or `#[point(skip)]` - Exclude the field explicitly
/// - `#[point(flatten)]` - Nested record sharing this record's point namespace
///
/// An unannotated field is walked as a nested record unless its type is a
/// leaf (`String`, `Vec`, `Option`, a scalar or `RawBytes`), in which case it is
/// left alone. Any other type must implement `PointRecord` or the derive fails
/// to compile.
///
/// Annotated fields must implement `PointField` and `PointType`: scalars,
/// `String`, `RawBytes`, `Vec` of scalars, or `Option` of any of these.
#[proc_macro_derive(PointRecord, attributes(point))]
pub fn derive_point_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    record::derive_point_record_impl(input)
        .unwrap_or_else(|err| err.write_errors())
        .into()
}
