//! Chunked execution of block reads and writes
//!
//! A range larger than the device's per-request limit is split into
//! consecutive chunks issued one after another on the same transport, with
//! a short pause between calls. Reads are concatenated in address order;
//! writes slice the payload the same way.
//!
//! Bit tables (coils, discrete inputs) are normalized to one big-endian
//! 0/1 word per address so that every block carries two bytes per address.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::catalog::RegisterKind;
use crate::error::{PointMapError, Result};
use crate::planner::Block;
use crate::transport::{Transport, TransportError, TransportResult};

fn default_max_quantity() -> u16 {
    125
}

fn default_inter_request_delay_ms() -> u64 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

/// Per-device request limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLimits {
    /// Registers or coils per primitive call
    #[serde(default = "default_max_quantity")]
    pub max_quantity: u16,
    #[serde(default = "default_inter_request_delay_ms")]
    pub inter_request_delay_ms: u64,
    /// Deadline for one primitive call; 0 waits forever
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_quantity: default_max_quantity(),
            inter_request_delay_ms: default_inter_request_delay_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl DeviceLimits {
    pub fn with_max_quantity(mut self, max_quantity: u16) -> Self {
        self.max_quantity = max_quantity;
        self
    }

    pub fn with_inter_request_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inter_request_delay_ms = delay_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_millis(self.inter_request_delay_ms)
    }

    /// Pause between two consecutive calls on one link.
    pub async fn pause(&self) {
        if self.inter_request_delay_ms > 0 {
            tokio::time::sleep(self.inter_request_delay()).await;
        }
    }

    /// Run one primitive call under the request deadline.
    async fn bounded<F, R>(&self, call: F) -> TransportResult<R>
    where
        F: std::future::Future<Output = TransportResult<R>>,
    {
        match self.request_timeout() {
            Some(deadline) => tokio::time::timeout(deadline, call).await.map_err(|_| {
                TransportError::Timeout(format!("no response within {}ms", self.timeout_ms))
            })?,
            None => call.await,
        }
    }
}

/// Read `quantity` addresses from `address`, two bytes per address.
pub async fn read_range<T>(
    transport: &mut T,
    kind: RegisterKind,
    address: u16,
    quantity: u16,
    limits: &DeviceLimits,
) -> Result<Vec<u8>>
where
    T: Transport + ?Sized,
{
    let max = limits.max_quantity.max(1);
    let mut out = Vec::with_capacity(usize::from(quantity) * 2);
    let mut current = address;
    let mut remaining = quantity;

    while remaining > 0 {
        let chunk = remaining.min(max);
        let words = read_chunk(transport, kind, current, chunk, limits).await?;
        out.extend_from_slice(&words);

        remaining -= chunk;
        current = current.saturating_add(chunk);
        if remaining > 0 {
            limits.pause().await;
        }
    }
    Ok(out)
}

async fn read_chunk<T>(
    transport: &mut T,
    kind: RegisterKind,
    address: u16,
    quantity: u16,
    limits: &DeviceLimits,
) -> Result<Vec<u8>>
where
    T: Transport + ?Sized,
{
    trace!("Reading {} {}+{}", kind, address, quantity);
    let context = || format!("read {kind} {address}+{quantity}");

    let call = async {
        match kind {
            RegisterKind::Coil => transport.read_coils(address, quantity).await,
            RegisterKind::DiscreteInput => {
                transport.read_discrete_inputs(address, quantity).await
            },
            RegisterKind::InputRegister => {
                transport.read_input_registers(address, quantity).await
            },
            RegisterKind::HoldingRegister => {
                transport.read_holding_registers(address, quantity).await
            },
        }
    };
    let response = limits
        .bounded(call)
        .await
        .map_err(|e| PointMapError::transport(context(), e))?;

    let expected = usize::from(quantity) * 2;
    let words = if kind.is_bit() {
        unpack_bits(&response, quantity).ok_or_else(|| PointMapError::ShortData {
            context: context(),
            expected: usize::from(quantity).div_ceil(8),
            actual: response.len(),
        })?
    } else {
        response
    };

    if words.len() < expected {
        return Err(PointMapError::ShortData {
            context: context(),
            expected,
            actual: words.len(),
        });
    }
    if words.len() > expected {
        return Err(PointMapError::LengthMismatch {
            context: context(),
            expected,
            actual: words.len(),
        });
    }
    Ok(words)
}

/// Write `payload` (two bytes per address) starting at `address`.
pub async fn write_range<T>(
    transport: &mut T,
    kind: RegisterKind,
    address: u16,
    payload: &[u8],
    limits: &DeviceLimits,
) -> Result<()>
where
    T: Transport + ?Sized,
{
    if !kind.is_writable() {
        return Err(PointMapError::ReadOnly {
            point: String::new(),
            kind,
        });
    }
    if payload.is_empty() || payload.len() % 2 != 0 {
        return Err(PointMapError::LengthMismatch {
            context: format!("write {kind} {address}"),
            expected: payload.len().next_multiple_of(2).max(2),
            actual: payload.len(),
        });
    }

    let max = usize::from(limits.max_quantity.max(1));
    let mut current = address;
    let mut chunks = payload.chunks(max * 2).peekable();

    while let Some(chunk) = chunks.next() {
        write_chunk(transport, kind, current, chunk, limits).await?;
        current = current.saturating_add((chunk.len() / 2) as u16);
        if chunks.peek().is_some() {
            limits.pause().await;
        }
    }
    Ok(())
}

async fn write_chunk<T>(
    transport: &mut T,
    kind: RegisterKind,
    address: u16,
    words: &[u8],
    limits: &DeviceLimits,
) -> Result<()>
where
    T: Transport + ?Sized,
{
    let quantity = (words.len() / 2) as u16;
    trace!("Writing {} {}+{}", kind, address, quantity);
    let context = || format!("write {kind} {address}+{quantity}");

    let call = async {
        match (kind, quantity) {
            (RegisterKind::Coil, 1) => {
                let on = words.iter().any(|&b| b != 0);
                transport
                    .write_single_coil(address, if on { 0xFF00 } else { 0x0000 })
                    .await
            },
            (RegisterKind::Coil, _) => {
                transport
                    .write_multiple_coils(address, quantity, &pack_bits(words))
                    .await
            },
            (_, 1) => {
                transport
                    .write_single_register(address, u16::from_be_bytes([words[0], words[1]]))
                    .await
            },
            _ => {
                transport
                    .write_multiple_registers(address, quantity, words)
                    .await
            },
        }
    };
    limits
        .bounded(call)
        .await
        .map_err(|e| PointMapError::transport(context(), e))
}

/// Fill a read block's payload.
pub async fn read_block<T>(transport: &mut T, block: &mut Block, limits: &DeviceLimits) -> Result<()>
where
    T: Transport + ?Sized,
{
    block.payload = read_range(transport, block.kind, block.start, block.quantity(), limits).await?;
    Ok(())
}

/// Send a write block's payload.
pub async fn write_block<T>(transport: &mut T, block: &Block, limits: &DeviceLimits) -> Result<()>
where
    T: Transport + ?Sized,
{
    write_range(transport, block.kind, block.start, &block.payload, limits).await
}

/// Expand LSB-first packed bits into one 0/1 word per address.
pub fn unpack_bits(packed: &[u8], quantity: u16) -> Option<Vec<u8>> {
    let count = usize::from(quantity);
    if packed.len() < count.div_ceil(8) {
        return None;
    }
    let mut words = Vec::with_capacity(count * 2);
    for i in 0..count {
        let bit = (packed[i / 8] >> (i % 8)) & 1;
        words.extend_from_slice(&[0, bit]);
    }
    Some(words)
}

/// Pack one word per address into LSB-first bits; any non-zero word is on.
pub fn pack_bits(words: &[u8]) -> Vec<u8> {
    let count = words.len() / 2;
    let mut packed = vec![0u8; count.div_ceil(8)];
    for (i, word) in words.chunks_exact(2).enumerate() {
        if word[0] != 0 || word[1] != 0 {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    packed
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::memory::{MemoryDevice, TransportCall};
    use crate::transport::TransportError;

    const HOLDING: RegisterKind = RegisterKind::HoldingRegister;

    fn limits(max: u16) -> DeviceLimits {
        DeviceLimits::default()
            .with_max_quantity(max)
            .with_inter_request_delay_ms(0)
    }

    #[tokio::test]
    async fn test_read_splits_into_max_quantity_chunks() {
        let device = MemoryDevice::new();
        for addr in 0..300u16 {
            device.set_holding(addr, addr * 3);
        }
        let mut transport = device.connect_transport();

        let bytes = read_range(&mut transport, HOLDING, 0, 300, &limits(125))
            .await
            .unwrap();

        assert_eq!(
            device.calls(),
            vec![
                TransportCall::ReadHolding {
                    address: 0,
                    quantity: 125
                },
                TransportCall::ReadHolding {
                    address: 125,
                    quantity: 125
                },
                TransportCall::ReadHolding {
                    address: 250,
                    quantity: 50
                },
            ]
        );
        let unbounded = read_range(&mut transport, HOLDING, 0, 300, &limits(u16::MAX))
            .await
            .unwrap();
        assert_eq!(bytes, unbounded);
        assert_eq!(&bytes[598..600], &(299u16 * 3).to_be_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_only_between_calls() {
        let device = MemoryDevice::new();
        let mut transport = device.connect_transport();
        let limits = DeviceLimits::default()
            .with_max_quantity(10)
            .with_inter_request_delay_ms(5);

        let started = tokio::time::Instant::now();
        read_range(&mut transport, HOLDING, 0, 30, &limits)
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_coils_are_normalized_to_words() {
        let device = MemoryDevice::new();
        device.set_coil(1, true);
        device.set_coil(9, true);
        let mut transport = device.connect_transport();

        let words = read_range(&mut transport, RegisterKind::Coil, 0, 10, &limits(125))
            .await
            .unwrap();
        let bits: Vec<u8> = words.chunks(2).map(|w| w[1]).collect();
        assert_eq!(bits, vec![0, 1, 0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[tokio::test]
    async fn test_write_slices_payload() {
        let device = MemoryDevice::new();
        let mut transport = device.connect_transport();
        let payload: Vec<u8> = (0..5u16).flat_map(|v| v.to_be_bytes()).collect();

        write_range(&mut transport, HOLDING, 40, &payload, &limits(2))
            .await
            .unwrap();

        assert_eq!(
            device.calls(),
            vec![
                TransportCall::WriteMultipleRegisters {
                    address: 40,
                    quantity: 2
                },
                TransportCall::WriteMultipleRegisters {
                    address: 42,
                    quantity: 2
                },
                TransportCall::WriteSingleRegister { address: 44 },
            ]
        );
        for (i, addr) in (40..45u16).enumerate() {
            assert_eq!(device.holding(addr), i as u16);
        }
    }

    #[tokio::test]
    async fn test_coil_writes() {
        let device = MemoryDevice::new();
        let mut transport = device.connect_transport();

        write_range(&mut transport, RegisterKind::Coil, 3, &[0, 1], &limits(125))
            .await
            .unwrap();
        write_range(
            &mut transport,
            RegisterKind::Coil,
            10,
            &[0, 1, 0, 0, 0, 1],
            &limits(125),
        )
        .await
        .unwrap();

        assert!(device.coil(3));
        assert!(device.coil(10));
        assert!(!device.coil(11));
        assert!(device.coil(12));
        assert_eq!(
            device.calls(),
            vec![
                TransportCall::WriteSingleCoil {
                    address: 3,
                    value: 0xFF00
                },
                TransportCall::WriteMultipleCoils {
                    address: 10,
                    quantity: 3
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_read_only_kinds_rejected() {
        let device = MemoryDevice::new();
        let mut transport = device.connect_transport();
        let err = write_range(
            &mut transport,
            RegisterKind::InputRegister,
            0,
            &[0, 1],
            &limits(125),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PointMapError::ReadOnly { .. }));
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_remaining_chunks() {
        let device = MemoryDevice::new();
        device.fail_after(1, TransportError::Timeout("slave 1".to_string()));
        let mut transport = device.connect_transport();

        let err = read_range(&mut transport, HOLDING, 0, 30, &limits(10))
            .await
            .unwrap_err();
        match err {
            PointMapError::Transport { context, .. } => {
                assert_eq!(context, "read holding register 10+10");
            },
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(device.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_request_times_out() {
        let device = MemoryDevice::new();
        device.set_response_delay(Some(Duration::from_secs(5)));
        let mut transport = device.connect_transport();

        let started = tokio::time::Instant::now();
        let err = read_range(&mut transport, HOLDING, 0, 4, &limits(125).with_timeout_ms(1000))
            .await
            .unwrap_err();
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
        match err {
            PointMapError::Transport { context, source } => {
                assert_eq!(context, "read holding register 0+4");
                assert_eq!(
                    source,
                    TransportError::Timeout("no response within 1000ms".to_string())
                );
            },
            other => panic!("unexpected error {other:?}"),
        }

        // 0 waits for the slow slave
        write_range(&mut transport, HOLDING, 0, &[0, 7], &limits(125).with_timeout_ms(0))
            .await
            .unwrap();
        assert_eq!(device.holding(0), 7);
    }

    #[test]
    fn test_bit_packing() {
        let words = [0, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let packed = pack_bits(&words);
        assert_eq!(packed, vec![0b0000_0101, 0b0000_0001]);
        assert_eq!(unpack_bits(&packed, 9).unwrap(), words.to_vec());
        assert!(unpack_bits(&[0xFF], 9).is_none());
    }
}
