//! Point catalog: point name -> register descriptor
//!
//! The catalog is built once at configuration time and is read-only
//! afterwards, so it can be shared behind an `Arc` without locking.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::{PointMapError, Result};

/// Register width and signedness of a scalar point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    #[serde(alias = "uint16")]
    U16,
    #[serde(alias = "i16", alias = "int16")]
    S16,
    #[serde(alias = "uint32")]
    U32,
    #[serde(alias = "i32", alias = "int32")]
    S32,
}

impl DataType {
    /// Width of one scalar in bytes.
    pub fn byte_width(self) -> usize {
        match self {
            Self::U16 | Self::S16 => 2,
            Self::U32 | Self::S32 => 4,
        }
    }

    /// Natural register span of one scalar.
    pub fn register_span(self) -> u16 {
        self.byte_width().div_ceil(2) as u16
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::S16 | Self::S32)
    }

    /// Inclusive range of raw values the type can carry.
    pub fn raw_range(self) -> (f64, f64) {
        match self {
            Self::U16 => (0.0, 65535.0),
            Self::S16 => (-32768.0, 32767.0),
            Self::U32 => (0.0, 4294967295.0),
            Self::S32 => (-2147483648.0, 2147483647.0),
        }
    }
}

/// Word order of multi-register values.
///
/// `LittleEndian` swaps the two 16-bit halves of a 32-bit value (low word
/// first on the wire); bytes inside each register stay big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "big" | "big_endian" | "bigendian" | "be" | "abcd" => Some(Self::BigEndian),
            "little" | "little_endian" | "littleendian" | "le" | "cdab" => {
                Some(Self::LittleEndian)
            },
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ByteOrder {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown byte order: {s}")))
    }
}

/// Modbus data table a point lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    Coil,
    DiscreteInput,
    InputRegister,
    #[default]
    #[serde(alias = "holding")]
    HoldingRegister,
}

impl RegisterKind {
    /// Coils and discrete inputs are single-bit tables.
    pub fn is_bit(self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Self::Coil | Self::HoldingRegister)
    }
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Coil => "coil",
            Self::DiscreteInput => "discrete input",
            Self::InputRegister => "input register",
            Self::HoldingRegister => "holding register",
        };
        f.write_str(name)
    }
}

/// Register mapping of one named point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointDescriptor {
    pub address: u16,
    /// Register count; unset means the data type's natural span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u16>,
    /// Multiplicative scale; 0 means unset and behaves as 1.
    #[serde(default)]
    pub coefficient: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub register_kind: RegisterKind,
}

impl PointDescriptor {
    pub fn new(address: u16) -> Self {
        Self {
            address,
            quantity: None,
            coefficient: 0.0,
            offset: 0.0,
            data_type: DataType::default(),
            byte_order: ByteOrder::default(),
            register_kind: RegisterKind::default(),
        }
    }

    pub fn with_quantity(mut self, quantity: u16) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_coefficient(mut self, coefficient: f64) -> Self {
        self.coefficient = coefficient;
        self
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_register_kind(mut self, register_kind: RegisterKind) -> Self {
        self.register_kind = register_kind;
        self
    }

    /// Effective register count.
    pub fn quantity(&self) -> u16 {
        self.quantity
            .unwrap_or_else(|| self.data_type.register_span())
            .max(1)
    }

    /// Effective scale factor.
    pub fn coefficient(&self) -> f64 {
        if self.coefficient == 0.0 {
            1.0
        } else {
            self.coefficient
        }
    }

    /// Last register address covered by the point.
    pub fn end_address(&self) -> u16 {
        self.address.saturating_add(self.quantity() - 1)
    }

    /// Payload size in bytes, two per address.
    pub fn byte_len(&self) -> usize {
        usize::from(self.quantity()) * 2
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.quantity == Some(0) {
            return Err(PointMapError::InvalidPoint {
                point: name.to_string(),
                reason: "quantity must be at least 1".to_string(),
            });
        }
        let last = u32::from(self.address) + u32::from(self.quantity()) - 1;
        if last > u32::from(u16::MAX) {
            return Err(PointMapError::InvalidPoint {
                point: name.to_string(),
                reason: format!("address range ends at {last}, beyond 65535"),
            });
        }
        if !self.coefficient.is_finite() || !self.offset.is_finite() {
            return Err(PointMapError::InvalidPoint {
                point: name.to_string(),
                reason: "coefficient and offset must be finite".to_string(),
            });
        }
        Ok(())
    }
}

/// Immutable point name -> descriptor table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PointCatalog {
    points: HashMap<String, PointDescriptor>,
}

impl PointCatalog {
    pub fn builder() -> PointCatalogBuilder {
        PointCatalogBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&PointDescriptor> {
        self.points.get(name)
    }

    /// Lookup that fails with `PointNotFound`.
    pub fn require(&self, name: &str) -> Result<&PointDescriptor> {
        self.points
            .get(name)
            .ok_or_else(|| PointMapError::PointNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.points.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PointDescriptor)> {
        self.points.iter().map(|(name, desc)| (name.as_str(), desc))
    }

    /// Parse a JSON object keyed by point name.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let points: HashMap<String, PointDescriptor> = serde_json::from_str(json)
            .map_err(|e| PointMapError::Config(format!("Failed to parse point catalog: {e}")))?;
        Self::from_map(points)
    }

    /// Parse a YAML mapping keyed by point name.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let points: HashMap<String, PointDescriptor> = serde_yaml::from_str(yaml)
            .map_err(|e| PointMapError::Config(format!("Failed to parse point catalog: {e}")))?;
        Self::from_map(points)
    }

    /// Load a catalog file, dispatching on its extension (json, yaml/yml, csv).
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or_default();
        if extension == "csv" {
            return Self::from_csv_path(path);
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            PointMapError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        match extension {
            "json" => Self::from_json_str(&content),
            "yaml" | "yml" => Self::from_yaml_str(&content),
            _ => Err(PointMapError::Config(format!(
                "Unsupported catalog file format: {}",
                path.display()
            ))),
        }
    }

    /// Load a CSV file with one row per point.
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let reader = csv::Reader::from_path(path).map_err(|e| {
            PointMapError::Config(format!(
                "Failed to open CSV file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_csv(reader, &path.display().to_string())
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        Self::from_csv(csv::Reader::from_reader(reader), "<reader>")
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>, source: &str) -> Result<Self> {
        let mut builder = Self::builder();
        for (line_num, row) in reader.deserialize::<CsvPointRow>().enumerate() {
            // +2: line 1 is the header
            let row = row.map_err(|e| {
                PointMapError::Config(format!(
                    "Failed to parse CSV record at line {} in {}: {}",
                    line_num + 2,
                    source,
                    e
                ))
            })?;
            let (name, desc) = row.into_point()?;
            builder = builder.point(name, desc);
        }
        let catalog = builder.build()?;
        debug!("Loaded {} points from {}", catalog.len(), source);
        Ok(catalog)
    }

    fn from_map(points: HashMap<String, PointDescriptor>) -> Result<Self> {
        for (name, desc) in &points {
            desc.validate(name)?;
        }
        Ok(Self { points })
    }
}

impl<'de> Deserialize<'de> for PointCatalog {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let points = HashMap::<String, PointDescriptor>::deserialize(deserializer)?;
        Self::from_map(points).map_err(serde::de::Error::custom)
    }
}

/// Collects descriptors; duplicates are reported by [`build`](Self::build).
#[derive(Debug, Default)]
pub struct PointCatalogBuilder {
    points: Vec<(String, PointDescriptor)>,
}

impl PointCatalogBuilder {
    pub fn point(mut self, name: impl Into<String>, descriptor: PointDescriptor) -> Self {
        self.points.push((name.into(), descriptor));
        self
    }

    pub fn build(self) -> Result<PointCatalog> {
        let mut points = HashMap::with_capacity(self.points.len());
        for (name, desc) in self.points {
            desc.validate(&name)?;
            if points.contains_key(&name) {
                return Err(PointMapError::Config(format!("Duplicate point name: {name}")));
            }
            points.insert(name, desc);
        }
        Ok(PointCatalog { points })
    }
}

/// One CSV row; empty cells fall back to descriptor defaults.
#[derive(Debug, Deserialize)]
struct CsvPointRow {
    name: String,
    address: u16,
    #[serde(default)]
    quantity: Option<u16>,
    #[serde(default)]
    coefficient: Option<f64>,
    #[serde(default)]
    offset: Option<f64>,
    #[serde(default)]
    data_type: Option<String>,
    #[serde(default)]
    byte_order: Option<String>,
    #[serde(default)]
    register_kind: Option<String>,
}

impl CsvPointRow {
    fn into_point(self) -> Result<(String, PointDescriptor)> {
        let name = self.name.trim().to_string();
        let invalid = |reason: String| PointMapError::InvalidPoint {
            point: name.clone(),
            reason,
        };

        let data_type = match self.data_type.as_deref().map(str::trim) {
            None | Some("") => DataType::default(),
            Some(s) => parse_enum::<DataType>(s).ok_or_else(|| invalid(format!("unknown data type {s}")))?,
        };
        let byte_order = match self.byte_order.as_deref() {
            None => ByteOrder::default(),
            Some(s) => ByteOrder::from_str(s).ok_or_else(|| invalid(format!("unknown byte order {s}")))?,
        };
        let register_kind = match self.register_kind.as_deref().map(str::trim) {
            None | Some("") => RegisterKind::default(),
            Some(s) => parse_enum::<RegisterKind>(s)
                .ok_or_else(|| invalid(format!("unknown register kind {s}")))?,
        };

        let desc = PointDescriptor {
            address: self.address,
            quantity: self.quantity,
            coefficient: self.coefficient.unwrap_or(0.0),
            offset: self.offset.unwrap_or(0.0),
            data_type,
            byte_order,
            register_kind,
        };
        Ok((name, desc))
    }
}

fn parse_enum<T: for<'de> Deserialize<'de>>(s: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(s.to_lowercase())).ok()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_descriptor_defaults() {
        let desc = PointDescriptor::new(100);
        assert_eq!(desc.quantity(), 1);
        assert_eq!(desc.coefficient(), 1.0);
        assert_eq!(desc.offset, 0.0);
        assert_eq!(desc.byte_order, ByteOrder::BigEndian);
        assert_eq!(desc.register_kind, RegisterKind::HoldingRegister);
    }

    #[test]
    fn test_natural_span_for_32_bit() {
        let desc = PointDescriptor::new(10).with_data_type(DataType::S32);
        assert_eq!(desc.quantity(), 2);
        assert_eq!(desc.end_address(), 11);

        let text = PointDescriptor::new(10)
            .with_data_type(DataType::U32)
            .with_quantity(8);
        assert_eq!(text.quantity(), 8);
        assert_eq!(text.byte_len(), 16);
    }

    #[test]
    fn test_builder_rejects_duplicates_and_overflow() {
        let dup = PointCatalog::builder()
            .point("a", PointDescriptor::new(1))
            .point("a", PointDescriptor::new(2))
            .build();
        assert!(matches!(dup, Err(PointMapError::Config(_))));

        let overflow = PointCatalog::builder()
            .point("tail", PointDescriptor::new(65535).with_quantity(2))
            .build();
        assert!(matches!(overflow, Err(PointMapError::InvalidPoint { .. })));

        let zero = PointCatalog::builder()
            .point("zero", PointDescriptor::new(1).with_quantity(0))
            .build();
        assert!(matches!(zero, Err(PointMapError::InvalidPoint { .. })));
    }

    #[test]
    fn test_require_reports_missing_point() {
        let catalog = PointCatalog::builder()
            .point("voltage", PointDescriptor::new(100))
            .build()
            .unwrap();
        assert!(catalog.require("voltage").is_ok());
        assert!(matches!(
            catalog.require("current"),
            Err(PointMapError::PointNotFound(name)) if name == "current"
        ));
    }

    #[test]
    fn test_from_json() {
        let catalog = PointCatalog::from_json_str(
            r#"{
                "voltage": {"address": 100, "coefficient": 0.1},
                "energy": {"address": 200, "data_type": "uint32", "byte_order": "CDAB"},
                "alarm": {"address": 5, "register_kind": "discrete_input"}
            }"#,
        )
        .unwrap();
        assert_eq!(catalog.len(), 3);
        let energy = catalog.get("energy").unwrap();
        assert_eq!(energy.data_type, DataType::U32);
        assert_eq!(energy.byte_order, ByteOrder::LittleEndian);
        assert_eq!(energy.quantity(), 2);
        assert_eq!(
            catalog.get("alarm").unwrap().register_kind,
            RegisterKind::DiscreteInput
        );
    }

    #[test]
    fn test_from_csv_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("points.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "name,address,quantity,coefficient,offset,data_type,byte_order,register_kind"
        )
        .unwrap();
        writeln!(file, "voltage,100,,0.1,,u16,,").unwrap();
        writeln!(file, "temperature,101,,0.01,-10,s16,,input_register").unwrap();
        writeln!(file, "serial,300,8,,,,little,").unwrap();
        drop(file);

        let catalog = PointCatalog::from_csv_path(&path).unwrap();
        assert_eq!(catalog.len(), 3);
        let temp = catalog.get("temperature").unwrap();
        assert_eq!(temp.offset, -10.0);
        assert_eq!(temp.data_type, DataType::S16);
        assert_eq!(temp.register_kind, RegisterKind::InputRegister);
        assert_eq!(catalog.get("serial").unwrap().quantity(), 8);
        assert_eq!(
            catalog.get("serial").unwrap().byte_order,
            ByteOrder::LittleEndian
        );
    }

    #[test]
    fn test_from_yaml_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("points.yml");
        std::fs::write(
            &path,
            "power:\n  address: 40\n  data_type: s32\n  coefficient: 0.001\nrun:\n  address: 3\n  register_kind: coil\n",
        )
        .unwrap();

        let catalog = PointCatalog::from_path(&path).unwrap();
        assert_eq!(catalog.get("power").unwrap().end_address(), 41);
        assert_eq!(catalog.get("run").unwrap().register_kind, RegisterKind::Coil);

        let err = PointCatalog::from_path(&dir.path().join("points.txt")).unwrap_err();
        assert!(matches!(err, PointMapError::Config(_)));
    }

    #[test]
    fn test_csv_reports_line_number() {
        let data = "name,address\nok,1\nbad,notanumber\n";
        let err = PointCatalog::from_csv_reader(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_register_kind_flags() {
        assert!(RegisterKind::Coil.is_bit());
        assert!(RegisterKind::Coil.is_writable());
        assert!(!RegisterKind::DiscreteInput.is_writable());
        assert!(!RegisterKind::InputRegister.is_bit());
        assert!(RegisterKind::HoldingRegister.is_writable());
    }
}
