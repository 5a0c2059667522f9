//! Scripted in-memory transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Transport, TransportError, TransportErrorKind, TransportFactory};
use crate::endpoint::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Open,
    Close,
    ReadHolding { unit: u8, address: u16, count: u16 },
    ReadCoils { unit: u8, address: u16, count: u16 },
    WriteRegister { unit: u8, address: u16, value: u16 },
    WriteCoil { unit: u8, address: u16, value: bool },
}

impl Call {
    pub fn is_exchange(&self) -> bool {
        !matches!(self, Call::Open | Call::Close)
    }

    pub fn unit(&self) -> Option<u8> {
        match *self {
            Call::ReadHolding { unit, .. }
            | Call::ReadCoils { unit, .. }
            | Call::WriteRegister { unit, .. }
            | Call::WriteCoil { unit, .. } => Some(unit),
            Call::Open | Call::Close => None,
        }
    }
}

/// A holding-register actuator: writing `command` to `control` sets `status` to the
/// paired value.
#[derive(Debug, Clone)]
pub struct Relay {
    pub unit: u8,
    pub control: u16,
    pub status: u16,
    pub responses: Vec<(u16, u16)>,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub holding: HashMap<(u8, u16), u16>,
    pub coils: HashMap<(u8, u16), bool>,
    pub relays: Vec<Relay>,
    /// Writes are acknowledged but change nothing.
    pub stuck: bool,
    pub calls: Vec<Call>,
    pub creates: usize,
    pub open_failures: VecDeque<TransportErrorKind>,
    pub exchange_failures: VecDeque<TransportErrorKind>,
}

impl MockState {
    pub fn opens(&self) -> usize {
        self.calls.iter().filter(|c| **c == Call::Open).count()
    }

    pub fn closes(&self) -> usize {
        self.calls.iter().filter(|c| **c == Call::Close).count()
    }

    pub fn exchanges(&self) -> Vec<Call> {
        self.calls.iter().copied().filter(Call::is_exchange).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    state: Arc<Mutex<MockState>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_holding(&self, unit: u8, address: u16, words: &[u16]) {
        let mut state = self.state();
        for (offset, word) in words.iter().enumerate() {
            state.holding.insert((unit, address + offset as u16), *word);
        }
    }

    pub fn set_coil(&self, unit: u8, address: u16, value: bool) {
        self.state().coils.insert((unit, address), value);
    }

    pub fn fail_opens(&self, kind: TransportErrorKind, times: usize) {
        self.state().open_failures.extend(std::iter::repeat(kind).take(times));
    }

    pub fn fail_exchanges(&self, kind: TransportErrorKind, times: usize) {
        self.state()
            .exchange_failures
            .extend(std::iter::repeat(kind).take(times));
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

impl TransportFactory for MockFactory {
    type Transport = MockTransport;

    fn create(&self, _endpoint: &Endpoint) -> Result<MockTransport, TransportError> {
        self.state().creates += 1;
        Ok(MockTransport {
            state: Arc::clone(&self.state),
            open: false,
        })
    }
}

pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    open: bool,
}

impl MockTransport {
    /// Logs the call and applies the next scripted failure, if any.
    fn begin(&self, call: Call) -> Result<MutexGuard<'_, MockState>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if !self.open {
            return Err(TransportError::not_connected("mock link closed"));
        }
        match state.exchange_failures.pop_front() {
            Some(kind) => Err(TransportError::new(kind, "scripted exchange failure")),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Open);
        match state.open_failures.pop_front() {
            Some(kind) => {
                self.open = false;
                Err(TransportError::new(kind, "scripted open failure"))
            }
            None => {
                self.open = true;
                Ok(())
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.lock().unwrap().calls.push(Call::Close);
        self.open = false;
        Ok(())
    }

    async fn read_holding_registers(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let state = self.begin(Call::ReadHolding {
            unit,
            address,
            count,
        })?;
        (address..address + count)
            .map(|a| {
                state.holding.get(&(unit, a)).copied().ok_or_else(|| {
                    TransportError::new(TransportErrorKind::Exception, "illegal data address")
                })
            })
            .collect()
    }

    async fn read_coils(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, TransportError> {
        let state = self.begin(Call::ReadCoils {
            unit,
            address,
            count,
        })?;
        Ok((address..address + count)
            .map(|a| state.coils.get(&(unit, a)).copied().unwrap_or(false))
            .collect())
    }

    async fn write_register(
        &mut self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        let mut state = self.begin(Call::WriteRegister {
            unit,
            address,
            value,
        })?;
        if state.stuck {
            return Ok(());
        }
        state.holding.insert((unit, address), value);
        let effects: Vec<(u16, u16)> = state
            .relays
            .iter()
            .filter(|r| r.unit == unit && r.control == address)
            .filter_map(|r| {
                r.responses
                    .iter()
                    .find(|(command, _)| *command == value)
                    .map(|(_, status)| (r.status, *status))
            })
            .collect();
        for (status_address, status) in effects {
            state.holding.insert((unit, status_address), status);
        }
        Ok(())
    }

    async fn write_coil(
        &mut self,
        unit: u8,
        address: u16,
        value: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.begin(Call::WriteCoil {
            unit,
            address,
            value,
        })?;
        if !state.stuck {
            state.coils.insert((unit, address), value);
        }
        Ok(())
    }
}
