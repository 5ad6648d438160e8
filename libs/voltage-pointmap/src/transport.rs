//! Transport capability consumed by the engine
//!
//! A transport already speaks the wire protocol (framing, function codes,
//! checksums) for one slave and exposes the primitive per-table calls.
//! Register payloads are big-endian, two bytes per register. Coil payloads
//! are packed bits, least significant bit first, as on the wire.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::time::Instant;

/// Failure reported by a transport primitive.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Modbus exception {code:#04x} for function {function:#04x}")]
    Exception { function: u8, code: u8 },

    #[error("Not connected")]
    NotConnected,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Primitive read/write calls against one field device.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn read_coils(&mut self, address: u16, quantity: u16) -> TransportResult<Vec<u8>>;

    async fn read_discrete_inputs(&mut self, address: u16, quantity: u16)
        -> TransportResult<Vec<u8>>;

    async fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>>;

    async fn read_input_registers(&mut self, address: u16, quantity: u16)
        -> TransportResult<Vec<u8>>;

    /// `value` is the raw coil word: 0xFF00 for on, 0x0000 for off.
    async fn write_single_coil(&mut self, address: u16, value: u16) -> TransportResult<()>;

    async fn write_multiple_coils(
        &mut self,
        address: u16,
        quantity: u16,
        packed: &[u8],
    ) -> TransportResult<()>;

    async fn write_single_register(&mut self, address: u16, value: u16) -> TransportResult<()>;

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        quantity: u16,
        payload: &[u8],
    ) -> TransportResult<()>;

    /// Cheap liveness probe used by the pool on release.
    async fn is_alive(&mut self) -> bool;

    fn created_at(&self) -> Instant;

    async fn connect(&mut self) -> TransportResult<()>;

    async fn close(&mut self) -> TransportResult<()>;
}

/// Opens new transports for a pool.
pub type TransportFactory<T> = Arc<dyn Fn() -> BoxFuture<'static, TransportResult<T>> + Send + Sync>;

/// Wrap an async closure as a [`TransportFactory`].
pub fn factory_fn<T, F, Fut>(f: F) -> TransportFactory<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TransportResult<T>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}
