//! Drivers for Modbus RTU electric and water meters behind a serial-over-TCP bridge.
//!
//! A [`Gateway`] owns the one connection to the bridge; a [`MeterDriver`] per meter
//! reads scaled values and switches breakers or valves with read-back verification.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use meterdrv::{Endpoint, Gateway, MeterDriver, MeterModel, PowerItem};
//!
//! # async fn run() -> meterdrv::Result<()> {
//! let gateway = Arc::new(Gateway::default());
//! gateway
//!     .init(Endpoint::new("rtuovertcp://192.168.1.12:8802", 9600, Duration::from_secs(5))?)
//!     .await?;
//!
//! let meter = MeterDriver::new(Arc::clone(&gateway), MeterModel::Dds4921, 0x02)?;
//! let pf = meter.get_val(PowerItem::PowerFactor).await?;
//! meter.trip(0).await?;
//! # let _ = pf;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod models;
pub mod transport;

pub use codec::RegisterCodec;
pub use driver::MeterDriver;
pub use endpoint::{Endpoint, Scheme};
pub use error::{MeterError, Result};
pub use gateway::{Gateway, RetryPolicy, Session, SessionGuard};
pub use models::{
    ActuatorClass, ActuatorDescriptor, ItemId, MeterModel, MeterProfile, PowerItem,
    RegisterDescriptor, RegisterKind, WaterItem,
};
pub use transport::{
    ModbusFactory, Transport, TransportError, TransportErrorKind, TransportFactory,
};
