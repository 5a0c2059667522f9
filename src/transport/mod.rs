//! The Modbus link as seen by the gateway.
//!
//! Framing, checksums and serial timing belong to the backends; the gateway only opens,
//! closes and issues single requests through [`Transport`]. Every request names its
//! slave explicitly so a shared link never carries a "current unit" between calls.

use async_trait::async_trait;
use strum_macros::Display;
use thiserror::Error;

use crate::endpoint::{Endpoint, Scheme};

#[cfg(test)]
pub(crate) mod mock;
mod rodbus_link;
mod rtu_over_tcp;

pub use self::rodbus_link::RodbusTransport;
pub use self::rtu_over_tcp::RtuOverTcpTransport;

/// Failure classes reported by a transport. The gateway reacts to these, never to raw
/// OS error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TransportErrorKind {
    #[strum(serialize = "connection refused")]
    ConnectionRefused,
    #[strum(serialize = "timeout")]
    Timeout,
    #[strum(serialize = "not connected")]
    NotConnected,
    #[strum(serialize = "i/o error")]
    Io,
    #[strum(serialize = "modbus exception")]
    Exception,
    #[strum(serialize = "protocol error")]
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotConnected, message)
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_connection_refused(&self) -> bool {
        self.kind == TransportErrorKind::ConnectionRefused
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match err.kind() {
            ErrorKind::ConnectionRefused => TransportErrorKind::ConnectionRefused,
            ErrorKind::TimedOut => TransportErrorKind::Timeout,
            ErrorKind::NotConnected => TransportErrorKind::NotConnected,
            _ => TransportErrorKind::Io,
        };
        TransportError::new(kind, err.to_string())
    }
}

/// One connection handle to a gateway.
///
/// `open` on an already-open handle and `close` on a closed one are allowed; the
/// gateway closes before every re-open and ignores what `close` returns.
#[async_trait]
pub trait Transport: Send {
    async fn open(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    async fn read_holding_registers(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError>;

    async fn read_coils(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, TransportError>;

    /// Writes one holding register using the write-multiple function (0x10), which is
    /// what the supported meters accept for control words.
    async fn write_register(
        &mut self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError>;

    async fn write_coil(&mut self, unit: u8, address: u16, value: bool)
        -> Result<(), TransportError>;
}

/// Builds an unopened handle for an endpoint.
pub trait TransportFactory: Send + Sync {
    type Transport: Transport + 'static;

    fn create(&self, endpoint: &Endpoint) -> Result<Self::Transport, TransportError>;
}

/// Handles for the real backends, selected by endpoint scheme.
pub enum ModbusTransport {
    Rodbus(RodbusTransport),
    RtuOverTcp(RtuOverTcpTransport),
}

macro_rules! dispatch {
    ($self:ident, $link:ident => $call:expr) => {
        match $self {
            ModbusTransport::Rodbus($link) => $call,
            ModbusTransport::RtuOverTcp($link) => $call,
        }
    };
}

#[async_trait]
impl Transport for ModbusTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        dispatch!(self, link => link.open().await)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        dispatch!(self, link => link.close().await)
    }

    async fn read_holding_registers(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        dispatch!(self, link => link.read_holding_registers(unit, address, count).await)
    }

    async fn read_coils(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, TransportError> {
        dispatch!(self, link => link.read_coils(unit, address, count).await)
    }

    async fn write_register(
        &mut self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        dispatch!(self, link => link.write_register(unit, address, value).await)
    }

    async fn write_coil(
        &mut self,
        unit: u8,
        address: u16,
        value: bool,
    ) -> Result<(), TransportError> {
        dispatch!(self, link => link.write_coil(unit, address, value).await)
    }
}

/// Default factory: rodbus for `rtu://` and `tcp://`, tokio-modbus RTU framing for
/// `rtuovertcp://`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusFactory;

impl TransportFactory for ModbusFactory {
    type Transport = ModbusTransport;

    fn create(&self, endpoint: &Endpoint) -> Result<Self::Transport, TransportError> {
        Ok(match endpoint.scheme() {
            Scheme::Rtu | Scheme::Tcp => {
                ModbusTransport::Rodbus(RodbusTransport::new(endpoint.clone()))
            }
            Scheme::RtuOverTcp => {
                ModbusTransport::RtuOverTcp(RtuOverTcpTransport::new(endpoint)?)
            }
        })
    }
}
