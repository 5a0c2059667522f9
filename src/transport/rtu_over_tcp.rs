use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use log::*;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_modbus::client::{rtu, Context};
use tokio_modbus::prelude::*;

use super::{Transport, TransportError, TransportErrorKind};
use crate::endpoint::{Endpoint, Target};

/// RTU frames carried over a plain TCP socket, the way serial device servers bridge
/// RS-485 meters onto the network.
///
/// The baud rate of the endpoint is configured on the bridge itself and only reported
/// here; the socket carries no serial settings.
pub struct RtuOverTcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    context: Option<Context>,
}

impl RtuOverTcpTransport {
    pub fn new(endpoint: &Endpoint) -> Result<Self, TransportError> {
        match endpoint.target() {
            Target::Socket { host, port } => Ok(Self {
                host: host.clone(),
                port: *port,
                timeout: endpoint.timeout(),
                context: None,
            }),
            Target::Serial { path } => Err(TransportError::new(
                TransportErrorKind::Protocol,
                format!("rtu over tcp needs a host and port, got serial device {path}"),
            )),
        }
    }

    fn context(&mut self, unit: u8) -> Result<&mut Context, TransportError> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| TransportError::not_connected("socket is closed"))?;
        context.set_slave(Slave(unit));
        Ok(context)
    }
}

/// Bounds one request by the link timeout and folds the three failure layers
/// (timer, transport, Modbus exception) into one error.
async fn request<T>(
    limit: Duration,
    call: impl Future<Output = tokio_modbus::Result<T>>,
) -> Result<T, TransportError> {
    match timeout(limit, call).await {
        Err(_) => Err(TransportError::new(
            TransportErrorKind::Timeout,
            format!("no response within {} ms", limit.as_millis()),
        )),
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(exception))) => Err(TransportError::new(
            TransportErrorKind::Exception,
            exception.to_string(),
        )),
        Ok(Err(tokio_modbus::Error::Transport(err))) => Err(err.into()),
        Ok(Err(err)) => Err(TransportError::new(
            TransportErrorKind::Protocol,
            err.to_string(),
        )),
    }
}

#[async_trait]
impl Transport for RtuOverTcpTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let stream = timeout(
            self.timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| {
            TransportError::new(
                TransportErrorKind::Timeout,
                format!("connecting to {}:{} timed out", self.host, self.port),
            )
        })??;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY not set on {}:{}: {e}", self.host, self.port);
        }
        // the slave is replaced before every request
        self.context = Some(rtu::attach_slave(stream, Slave::broadcast()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.context.take() {
            Some(mut context) => context.disconnect().await.map_err(TransportError::from),
            None => Ok(()),
        }
    }

    async fn read_holding_registers(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let limit = self.timeout;
        let context = self.context(unit)?;
        request(limit, context.read_holding_registers(address, count)).await
    }

    async fn read_coils(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, TransportError> {
        let limit = self.timeout;
        let context = self.context(unit)?;
        request(limit, context.read_coils(address, count)).await
    }

    async fn write_register(
        &mut self,
        unit: u8,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        let limit = self.timeout;
        let context = self.context(unit)?;
        request(limit, context.write_multiple_registers(address, &[value])).await
    }

    async fn write_coil(
        &mut self,
        unit: u8,
        address: u16,
        value: bool,
    ) -> Result<(), TransportError> {
        let limit = self.timeout;
        let context = self.context(unit)?;
        request(limit, context.write_single_coil(address, value)).await
    }
}
