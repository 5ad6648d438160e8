//! Annotated records and the walker over their declared schema
//!
//! A record exposes its annotated leaves through [`PointRecord`], normally
//! generated by `#[derive(PointRecord)]`:
//!
//! ```rust,ignore
//! use voltage_pointmap::PointRecord;
//!
//! #[derive(Default, PointRecord)]
//! struct Inverter {
//!     #[point("voltage")]
//!     voltage: Option<f64>,
//!     #[point(name = "serial_no")]
//!     serial: String,
//!     #[point(flatten)]
//!     meter: Meter,
//!     // not annotated, walked as a nested record
//!     battery: BatteryPack,
//!     // not annotated leaf, never touched
//!     label: String,
//! }
//! ```
//!
//! Nested records share the parent's point namespace, whether marked
//! `flatten` or left unannotated.

use std::collections::HashSet;

use crate::error::Result;
use crate::value::{PointField, ValueKind};

/// Static description of one annotated leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub point: &'static str,
    /// Field name in the declaring record.
    pub path: &'static str,
    pub kind: ValueKind,
    pub nullable: bool,
}

/// Read-direction callback: receives a setter for every leaf.
pub trait FieldVisitorMut {
    fn visit_mut(&mut self, point: &str, field: &mut dyn PointField) -> Result<()>;
}

/// Write-direction callback: receives a getter for every leaf.
pub trait FieldVisitor {
    fn visit(&mut self, point: &str, field: &dyn PointField) -> Result<()>;
}

/// A record whose annotated leaves map to catalog points.
pub trait PointRecord: Send + Sync {
    /// Append the flattened leaf schema.
    fn describe(specs: &mut Vec<FieldSpec>)
    where
        Self: Sized;

    fn visit(&self, visitor: &mut dyn FieldVisitor) -> Result<()>;

    fn visit_mut(&mut self, visitor: &mut dyn FieldVisitorMut) -> Result<()>;
}

/// Flattened schema of a record type.
pub fn schema<R: PointRecord>() -> Vec<FieldSpec> {
    let mut specs = Vec::new();
    R::describe(&mut specs);
    specs
}

/// Restricts a walk to a set of point names. Empty passes everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointFilter {
    names: HashSet<String>,
}

impl PointFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn allows(&self, point: &str) -> bool {
        self.names.is_empty() || self.names.contains(point)
    }
}

impl<S: Into<String>> FromIterator<S> for PointFilter {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::only(iter)
    }
}

struct Filtered<'f, F> {
    filter: &'f PointFilter,
    f: F,
}

impl<F> FieldVisitor for Filtered<'_, F>
where
    F: FnMut(&str, &dyn PointField) -> Result<()>,
{
    fn visit(&mut self, point: &str, field: &dyn PointField) -> Result<()> {
        if self.filter.allows(point) {
            (self.f)(point, field)
        } else {
            Ok(())
        }
    }
}

impl<F> FieldVisitorMut for Filtered<'_, F>
where
    F: FnMut(&str, &mut dyn PointField) -> Result<()>,
{
    fn visit_mut(&mut self, point: &str, field: &mut dyn PointField) -> Result<()> {
        if self.filter.allows(point) {
            (self.f)(point, field)
        } else {
            Ok(())
        }
    }
}

/// Yield `(point, getter)` for every allowed leaf in declaration order.
pub fn walk<R, F>(record: &R, filter: &PointFilter, f: F) -> Result<()>
where
    R: PointRecord + ?Sized,
    F: FnMut(&str, &dyn PointField) -> Result<()>,
{
    record.visit(&mut Filtered { filter, f })
}

/// Yield `(point, setter)` for every allowed leaf in declaration order.
pub fn walk_mut<R, F>(record: &mut R, filter: &PointFilter, f: F) -> Result<()>
where
    R: PointRecord + ?Sized,
    F: FnMut(&str, &mut dyn PointField) -> Result<()>,
{
    record.visit_mut(&mut Filtered { filter, f })
}
