//! In-memory simulated field device
//!
//! [`MemoryDevice`] holds the four Modbus tables and a log of every
//! primitive call; [`MemoryTransport`] is a link to it. Cloned devices share
//! state, so a test can keep a handle while the pool owns the transports.
//! Useful for testing and for running the engine without hardware.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::transport::{Transport, TransportError, TransportResult};

/// One primitive call as seen by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHolding { address: u16, quantity: u16 },
    ReadInput { address: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, quantity: u16 },
    WriteSingleRegister { address: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
}

#[derive(Debug, Default)]
struct DeviceState {
    holding: HashMap<u16, u16>,
    input: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    discrete: HashMap<u16, bool>,
    calls: Vec<TransportCall>,
    offline: bool,
    /// Remaining successful calls before every call fails
    fail_after: Option<(usize, TransportError)>,
    max_quantity: Option<u16>,
    response_delay: Option<Duration>,
    opened: usize,
    closed: usize,
}

impl DeviceState {
    fn record(&mut self, call: TransportCall) -> TransportResult<()> {
        self.calls.push(call);
        if self.offline {
            return Err(TransportError::Io("device offline".to_string()));
        }
        if let Some((remaining, err)) = &mut self.fail_after {
            if *remaining == 0 {
                return Err(err.clone());
            }
            *remaining -= 1;
        }
        Ok(())
    }

    fn check_quantity(&self, function: u8, quantity: u16) -> TransportResult<()> {
        let too_many = self.max_quantity.is_some_and(|max| quantity > max);
        if quantity == 0 || too_many {
            // illegal data value
            return Err(TransportError::Exception { function, code: 0x03 });
        }
        Ok(())
    }
}

/// Shared state of one simulated slave.
#[derive(Debug, Clone, Default)]
pub struct MemoryDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject requests above `max` addresses, like a real slave would.
    pub fn with_max_quantity(self, max: u16) -> Self {
        self.state.lock().max_quantity = Some(max);
        self
    }

    pub fn set_holding(&self, address: u16, value: u16) {
        self.state.lock().holding.insert(address, value);
    }

    pub fn holding(&self, address: u16) -> u16 {
        self.state.lock().holding.get(&address).copied().unwrap_or(0)
    }

    pub fn set_input(&self, address: u16, value: u16) {
        self.state.lock().input.insert(address, value);
    }

    pub fn set_coil(&self, address: u16, on: bool) {
        self.state.lock().coils.insert(address, on);
    }

    pub fn coil(&self, address: u16) -> bool {
        self.state.lock().coils.get(&address).copied().unwrap_or(false)
    }

    pub fn set_discrete(&self, address: u16, on: bool) {
        self.state.lock().discrete.insert(address, on);
    }

    /// Store consecutive registers starting at `address`.
    pub fn load_holding(&self, address: u16, values: &[u16]) {
        let mut state = self.state.lock();
        for (addr, value) in (address..).zip(values) {
            state.holding.insert(addr, *value);
        }
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Offline devices fail every call and report links as dead.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Let `successes` more calls through, then fail every call with `err`.
    pub fn fail_after(&self, successes: usize, err: TransportError) {
        self.state.lock().fail_after = Some((successes, err));
    }

    pub fn recover(&self) {
        self.state.lock().fail_after = None;
    }

    /// Hold every response back by `delay`, simulating a slow slave.
    pub fn set_response_delay(&self, delay: Option<Duration>) {
        self.state.lock().response_delay = delay;
    }

    /// Links opened so far.
    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    /// Links closed so far.
    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }

    /// Open a connected link created now.
    pub fn connect_transport(&self) -> MemoryTransport {
        self.connect_transport_at(Instant::now())
    }

    /// Open a connected link with an explicit creation time.
    pub fn connect_transport_at(&self, created_at: Instant) -> MemoryTransport {
        let id = {
            let mut state = self.state.lock();
            state.opened += 1;
            state.opened
        };
        MemoryTransport {
            device: self.clone(),
            created_at,
            connected: true,
            id,
        }
    }
}

/// A link to a [`MemoryDevice`].
#[derive(Debug)]
pub struct MemoryTransport {
    device: MemoryDevice,
    created_at: Instant,
    connected: bool,
    id: usize,
}

impl MemoryTransport {
    /// Sequence number of this link on its device, starting at 1.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn device(&self) -> &MemoryDevice {
        &self.device
    }

    async fn respond(&self) {
        let delay = self.device.state.lock().response_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn ensure_connected(&self) -> TransportResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn read_words(
        &self,
        call: TransportCall,
        function: u8,
        address: u16,
        quantity: u16,
        input: bool,
    ) -> TransportResult<Vec<u8>> {
        self.ensure_connected()?;
        let mut state = self.device.state.lock();
        state.record(call)?;
        state.check_quantity(function, quantity)?;
        let table = if input { &state.input } else { &state.holding };
        let mut out = Vec::with_capacity(usize::from(quantity) * 2);
        for offset in 0..quantity {
            let value = table
                .get(&address.wrapping_add(offset))
                .copied()
                .unwrap_or(0);
            out.extend_from_slice(&value.to_be_bytes());
        }
        Ok(out)
    }

    fn read_bits(
        &self,
        call: TransportCall,
        function: u8,
        address: u16,
        quantity: u16,
        discrete: bool,
    ) -> TransportResult<Vec<u8>> {
        self.ensure_connected()?;
        let mut state = self.device.state.lock();
        state.record(call)?;
        state.check_quantity(function, quantity)?;
        let table = if discrete { &state.discrete } else { &state.coils };
        let mut packed = vec![0u8; usize::from(quantity).div_ceil(8)];
        for i in 0..usize::from(quantity) {
            let addr = address.wrapping_add(i as u16);
            if table.get(&addr).copied().unwrap_or(false) {
                packed[i / 8] |= 1 << (i % 8);
            }
        }
        Ok(packed)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn read_coils(&mut self, address: u16, quantity: u16) -> TransportResult<Vec<u8>> {
        self.respond().await;
        self.read_bits(
            TransportCall::ReadCoils { address, quantity },
            0x01,
            address,
            quantity,
            false,
        )
    }

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        self.respond().await;
        self.read_bits(
            TransportCall::ReadDiscreteInputs { address, quantity },
            0x02,
            address,
            quantity,
            true,
        )
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        self.respond().await;
        self.read_words(
            TransportCall::ReadHolding { address, quantity },
            0x03,
            address,
            quantity,
            false,
        )
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        self.respond().await;
        self.read_words(
            TransportCall::ReadInput { address, quantity },
            0x04,
            address,
            quantity,
            true,
        )
    }

    async fn write_single_coil(&mut self, address: u16, value: u16) -> TransportResult<()> {
        self.respond().await;
        self.ensure_connected()?;
        let mut state = self.device.state.lock();
        state.record(TransportCall::WriteSingleCoil { address, value })?;
        let on = match value {
            0xFF00 => true,
            0x0000 => false,
            _ => {
                return Err(TransportError::Exception {
                    function: 0x05,
                    code: 0x03,
                })
            },
        };
        state.coils.insert(address, on);
        Ok(())
    }

    async fn write_multiple_coils(
        &mut self,
        address: u16,
        quantity: u16,
        packed: &[u8],
    ) -> TransportResult<()> {
        self.respond().await;
        self.ensure_connected()?;
        let mut state = self.device.state.lock();
        state.record(TransportCall::WriteMultipleCoils { address, quantity })?;
        state.check_quantity(0x0F, quantity)?;
        if packed.len() < usize::from(quantity).div_ceil(8) {
            return Err(TransportError::Protocol(format!(
                "{} coil bytes for {} coils",
                packed.len(),
                quantity
            )));
        }
        for i in 0..usize::from(quantity) {
            let on = (packed[i / 8] >> (i % 8)) & 1 == 1;
            state.coils.insert(address.wrapping_add(i as u16), on);
        }
        Ok(())
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> TransportResult<()> {
        self.respond().await;
        self.ensure_connected()?;
        let mut state = self.device.state.lock();
        state.record(TransportCall::WriteSingleRegister { address })?;
        state.holding.insert(address, value);
        Ok(())
    }

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        quantity: u16,
        payload: &[u8],
    ) -> TransportResult<()> {
        self.respond().await;
        self.ensure_connected()?;
        let mut state = self.device.state.lock();
        state.record(TransportCall::WriteMultipleRegisters { address, quantity })?;
        state.check_quantity(0x10, quantity)?;
        if payload.len() != usize::from(quantity) * 2 {
            return Err(TransportError::Protocol(format!(
                "{} payload bytes for {} registers",
                payload.len(),
                quantity
            )));
        }
        for (i, word) in payload.chunks_exact(2).enumerate() {
            state
                .holding
                .insert(address.wrapping_add(i as u16), u16::from_be_bytes([word[0], word[1]]));
        }
        Ok(())
    }

    async fn is_alive(&mut self) -> bool {
        self.connected && !self.device.state.lock().offline
    }

    fn created_at(&self) -> Instant {
        self.created_at
    }

    async fn connect(&mut self) -> TransportResult<()> {
        if !self.connected {
            self.connected = true;
            self.device.state.lock().opened += 1;
        }
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.connected {
            self.connected = false;
            self.device.state.lock().closed += 1;
        }
        Ok(())
    }
}
