use std::time::Duration;

use async_trait::async_trait;
use log::*;
use rodbus::client::{Channel, HostAddr, RequestParam, WriteMultiple};
use rodbus::{
    AddressRange, DataBits, DecodeLevel, FlowControl, Indexed, Parity, RequestError,
    RetryStrategy, SerialSettings, StopBits, UnitId,
};

use super::{Transport, TransportError, TransportErrorKind};
use crate::endpoint::{Endpoint, Target};

/// Requests queued inside the rodbus task. The gateway lock already serializes callers.
const MAX_QUEUED_REQUESTS: usize = 1;

/// Serial RTU and Modbus TCP links backed by a rodbus client channel.
///
/// The channel task is spawned on the first `open` and then only enabled and disabled,
/// so a reconnect re-opens the same channel instead of building a new one.
pub struct RodbusTransport {
    endpoint: Endpoint,
    channel: Option<Channel>,
}

/// rodbus reconnects on its own while enabled; keep its pace at one link timeout.
struct LinkRetry {
    delay: Duration,
}

impl RetryStrategy for LinkRetry {
    fn reset(&mut self) {
        debug!("RetryStrategy - Resetting connection");
    }

    fn after_failed_connect(&mut self) -> Duration {
        debug!("RetryStrategy - Failed to connect");
        self.delay
    }

    fn after_disconnect(&mut self) -> Duration {
        debug!("RetryStrategy - Disconnected");
        self.delay
    }
}

impl RodbusTransport {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            channel: None,
        }
    }

    fn spawn_channel(&self) -> Channel {
        let retry = Box::new(LinkRetry {
            delay: self.endpoint.timeout(),
        });
        match self.endpoint.target() {
            Target::Serial { path } => rodbus::client::spawn_rtu_client_task(
                path,
                SerialSettings {
                    baud_rate: self.endpoint.baud_rate(),
                    data_bits: DataBits::Eight,
                    flow_control: FlowControl::None,
                    stop_bits: StopBits::One,
                    parity: Parity::None,
                },
                MAX_QUEUED_REQUESTS,
                retry,
                DecodeLevel::default(),
                None,
            ),
            Target::Socket { host, port } => rodbus::client::spawn_tcp_client_task(
                HostAddr::dns(host.clone(), *port),
                MAX_QUEUED_REQUESTS,
                retry,
                DecodeLevel::default(),
                None,
            ),
        }
    }

    fn param(&self, unit: u8) -> RequestParam {
        RequestParam {
            id: UnitId { value: unit },
            response_timeout: self.endpoint.timeout(),
        }
    }

    fn channel(&mut self) -> Result<&mut Channel, TransportError> {
        self.channel
            .as_mut()
            .ok_or_else(|| TransportError::not_connected("rodbus channel was never opened"))
    }
}

fn classify(err: RequestError) -> TransportError {
    let kind = match &err {
        RequestError::Io(std::io::ErrorKind::ConnectionRefused) => {
            TransportErrorKind::ConnectionRefused
        }
        RequestError::Io(_) => TransportErrorKind::Io,
        RequestError::ResponseTimeout => TransportErrorKind::Timeout,
        RequestError::NoConnection | RequestError::Shutdown => TransportErrorKind::NotConnected,
        RequestError::Exception(_) => TransportErrorKind::Exception,
        _ => TransportErrorKind::Protocol,
    };
    TransportError::new(kind, err.to_string())
}

fn shut_down<E>(_: E) -> TransportError {
    TransportError::not_connected("rodbus channel task has shut down")
}

#[async_trait]
impl Transport for RodbusTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        if self.channel.is_none() {
            debug!("spawning rodbus channel for {}", self.endpoint);
            self.channel = Some(self.spawn_channel());
        }
        self.channel()?.enable().await.map_err(shut_down)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.channel.as_mut() {
            Some(channel) => channel.disable().await.map_err(shut_down),
            None => Ok(()),
        }
    }

    async fn read_holding_registers(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let param = self.param(unit);
        let values = self
            .channel()?
            .read_holding_registers(param, AddressRange { start: address, count })
            .await
            .map_err(classify)?;
        Ok(values.into_iter().map(|v| v.value).collect())
    }

    async fn read_coils(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, TransportError> {
        let param = self.param(unit);
        let values = self
            .channel()?
            .read_coils(param, AddressRange { start: address, count })
            .await
            .map_err(classify)?;
        Ok(values.into_iter().map(|v| v.value).collect())
    }

    async fn write_register(
        &mut self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        let param = self.param(unit);
        let request = WriteMultiple::from(address, vec![value]).map_err(|e| {
            TransportError::new(TransportErrorKind::Protocol, e.to_string())
        })?;
        self.channel()?
            .write_multiple_registers(param, request)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn write_coil(
        &mut self,
        unit: u8,
        address: u16,
        value: bool,
    ) -> Result<(), TransportError> {
        let param = self.param(unit);
        self.channel()?
            .write_single_coil(param, Indexed::new(address, value))
            .await
            .map_err(classify)?;
        Ok(())
    }
}
