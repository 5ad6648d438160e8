//! Batching point-to-register mapping for Modbus clients
//!
//! Applications describe device values as named points in a
//! [`PointCatalog`] and exchange them through annotated records:
//!
//! ```rust,ignore
//! use voltage_pointmap::{ModbusClient, PointFilter, PointRecord};
//!
//! #[derive(Default, PointRecord)]
//! struct Meter {
//!     #[point("voltage")]
//!     voltage: f64,
//!     #[point("energy")]
//!     energy: Option<u32>,
//! }
//!
//! let mut meter = Meter::default();
//! client.get_values(&mut meter, &PointFilter::all()).await?;
//! ```
//!
//! With batching enabled, the addresses of every participating point are
//! coalesced into a few block reads or writes, each split into requests the
//! device accepts. Transports come from a [`BoundedPool`] for TCP links or a
//! [`SharedLinkRegistry`] for serial ports shared by several slaves.

// Lets the derive macro refer to `::voltage_pointmap` from inside this crate.
extern crate self as voltage_pointmap;

pub mod catalog;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod memory;
pub mod planner;
pub mod pool;
pub mod record;
pub mod transport;
pub mod value;

pub use catalog::{ByteOrder, DataType, PointCatalog, PointDescriptor, RegisterKind};
pub use client::ModbusClient;
pub use config::{BatchConfig, LinkConfig, ModbusConfig, Parity, SerialParams};
pub use error::{PointMapError, Result};
pub use executor::DeviceLimits;
pub use memory::{MemoryDevice, MemoryTransport, TransportCall};
pub use planner::{Block, PlannerConfig};
pub use pool::{
    BoundedPool, BoundedPoolConfig, Checkout, SharedLinkPool, SharedLinkRegistry, TransportPool,
};
pub use record::{
    schema, walk, walk_mut, FieldSpec, FieldVisitor, FieldVisitorMut, PointFilter, PointRecord,
};
pub use transport::{factory_fn, Transport, TransportError, TransportFactory, TransportResult};
pub use value::{Numeric, PointField, PointType, RawBytes, ValueKind};

/// `#[derive(PointRecord)]`
pub use voltage_pointmap_macro::PointRecord;
