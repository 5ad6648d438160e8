#![allow(clippy::disallowed_methods)] // Integration test - unwrap is acceptable

//! `#[derive(PointRecord)]` used from outside the crate.

use voltage_pointmap::{
    schema, walk, walk_mut, PointDescriptor, PointFilter, PointRecord, RawBytes, ValueKind,
};

#[derive(Debug, Default, PartialEq, PointRecord)]
struct Grid {
    #[point("grid_voltage")]
    voltage: f64,

    #[point("grid_freq")]
    frequency: Option<f32>,
}

#[derive(Debug, Default, PointRecord)]
struct Inverter {
    #[point("serial_no")]
    serial: String,

    #[point(flatten)]
    grid: Grid,

    #[point("-")]
    cached: u16,

    #[point(skip)]
    note: String,

    label: String,

    #[point("history")]
    history: Vec<i16>,

    #[point(name = "blob")]
    blob: RawBytes,
}

#[derive(Debug, Default, PointRecord)]
struct Wrapper<M: PointRecord> {
    #[point(flatten)]
    inner: M,

    #[point("extra")]
    extra: bool,
}

#[derive(Debug, Default, PointRecord)]
struct Site {
    grid: Grid,

    #[point("site_id")]
    id: u16,

    #[point(skip)]
    spare: Grid,
}

#[test]
fn test_schema_flattens_nested_records() {
    let specs = schema::<Inverter>();
    let points: Vec<_> = specs.iter().map(|s| s.point).collect();
    assert_eq!(
        points,
        vec!["serial_no", "grid_voltage", "grid_freq", "history", "blob"]
    );

    let kinds: Vec<_> = specs.iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ValueKind::Text,
            ValueKind::Float,
            ValueKind::Float,
            ValueKind::Sequence,
            ValueKind::Opaque,
        ]
    );
    assert!(specs[2].nullable);
    assert_eq!(specs[2].path, "frequency");
}

#[test]
fn test_generic_wrapper() {
    let specs = schema::<Wrapper<Grid>>();
    let points: Vec<_> = specs.iter().map(|s| s.point).collect();
    assert_eq!(points, vec!["grid_voltage", "grid_freq", "extra"]);
}

#[test]
fn test_walk_respects_filter_through_flatten() {
    let record = Inverter::default();
    let mut seen = Vec::new();
    walk(&record, &PointFilter::only(["grid_freq", "blob"]), |point, _| {
        seen.push(point.to_string());
        Ok(())
    })
    .unwrap();
    assert_eq!(seen, vec!["grid_freq", "blob"]);
}

#[test]
fn test_walk_mut_sets_nested_and_optional_fields() {
    let mut record = Inverter {
        cached: 9,
        note: "keep".to_string(),
        label: "inv-1".to_string(),
        ..Inverter::default()
    };
    let desc = PointDescriptor::new(0).with_coefficient(0.5);

    walk_mut(&mut record, &PointFilter::only(["grid_voltage", "grid_freq"]), |_, field| {
        field.decode_from(&[0x00, 0x0A], &desc)
    })
    .unwrap();

    assert_eq!(
        record.grid,
        Grid {
            voltage: 5.0,
            frequency: Some(5.0),
        }
    );
    assert_eq!(record.cached, 9);
    assert_eq!(record.note, "keep");
    assert_eq!(record.label, "inv-1");
    assert!(record.serial.is_empty());
}

#[test]
fn test_null_optional_is_skipped_on_write() {
    let record = Grid {
        voltage: 230.0,
        frequency: None,
    };
    let desc = PointDescriptor::new(0);
    let mut written = Vec::new();
    walk(&record, &PointFilter::all(), |point, field| {
        if field.encode_to(&desc)?.is_some() {
            written.push(point.to_string());
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(written, vec!["grid_voltage"]);
}

#[test]
fn test_unannotated_nested_record_is_walked() {
    let points: Vec<_> = schema::<Site>().iter().map(|s| s.point).collect();
    assert_eq!(points, vec!["grid_voltage", "grid_freq", "site_id"]);

    let mut site = Site::default();
    let desc = PointDescriptor::new(0);
    walk_mut(&mut site, &PointFilter::all(), |_, field| {
        field.decode_from(&[0x00, 0x07], &desc)
    })
    .unwrap();
    assert_eq!(site.grid.voltage, 7.0);
    assert_eq!(site.grid.frequency, Some(7.0));
    assert_eq!(site.id, 7);
    assert_eq!(site.spare, Grid::default());
}
