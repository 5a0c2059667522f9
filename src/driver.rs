use std::sync::Arc;
use std::time::Duration;

use log::*;
use tokio::time::sleep;

use crate::codec::RegisterCodec;
use crate::error::{MeterError, Result};
use crate::gateway::{Gateway, RetryPolicy, Session};
use crate::models::{
    ActuatorDescriptor, ItemId, MeterModel, MeterProfile, RegisterDescriptor, RegisterKind,
};
use crate::transport::{ModbusFactory, Transport, TransportFactory};

/// Highest slave address the supported meters can be configured to.
pub const MAX_SLAVE_ADDRESS: u8 = 60;
/// Meters reject polls that arrive too close together.
pub const READ_THROTTLE: Duration = Duration::from_millis(5);

/// One meter behind a shared [`Gateway`].
///
/// Every operation holds the gateway lock from its first request to its last, so a
/// switch command and its verification read cannot be split by another driver.
pub struct MeterDriver<F: TransportFactory = ModbusFactory> {
    gateway: Arc<Gateway<F>>,
    slave: u8,
    profile: MeterProfile,
}

impl<F: TransportFactory> MeterDriver<F> {
    pub fn new(gateway: Arc<Gateway<F>>, model: MeterModel, slave: u8) -> Result<Self> {
        Self::with_profile(gateway, model.profile(), slave)
    }

    pub fn with_profile(
        gateway: Arc<Gateway<F>>,
        profile: MeterProfile,
        slave: u8,
    ) -> Result<Self> {
        if !(1..=MAX_SLAVE_ADDRESS).contains(&slave) {
            return Err(MeterError::configuration(format!(
                "invalid slave address {slave}, expected 1..={MAX_SLAVE_ADDRESS}"
            )));
        }
        Ok(Self {
            gateway,
            slave,
            profile,
        })
    }

    pub fn slave(&self) -> u8 {
        self.slave
    }

    pub fn profile(&self) -> &MeterProfile {
        &self.profile
    }

    pub fn gateway(&self) -> &Arc<Gateway<F>> {
        &self.gateway
    }

    fn register(&self, item: ItemId) -> Result<RegisterDescriptor> {
        let descriptor = self
            .profile
            .registers
            .get(item.index())
            .copied()
            .ok_or_else(|| MeterError::configuration(format!("unknown item {item}")))?;
        if !descriptor.is_defined() {
            return Err(MeterError::configuration(format!(
                "item {item} is not provided by this meter"
            )));
        }
        if !descriptor.readable {
            return Err(MeterError::configuration(format!("item {item} is not readable")));
        }
        Ok(descriptor)
    }

    fn actuator(&self, turn: usize) -> Result<ActuatorDescriptor> {
        self.profile.actuators.get(turn).copied().ok_or_else(|| {
            MeterError::configuration(format!(
                "meter has no {} {turn}",
                self.profile.actuator_class
            ))
        })
    }

    /// Reads and scales one data item.
    pub async fn get_val(&self, item: impl Into<ItemId>) -> Result<f64> {
        let item = item.into();
        let descriptor = self.register(item)?;
        let mut session = self.gateway.lock().await;
        self.read_value(&mut session, &descriptor).await
    }

    /// Reads every item the meter provides, in one locked pass.
    pub async fn read_all(&self) -> Vec<(ItemId, Result<f64>)> {
        let mut session = self.gateway.lock().await;
        let mut readings = Vec::new();
        for index in 0..self.profile.registers.len() {
            let Ok(item) = u8::try_from(index).map(ItemId) else {
                break;
            };
            let Ok(descriptor) = self.register(item) else {
                continue;
            };
            let value = self.read_value(&mut session, &descriptor).await;
            readings.push((item, value));
        }
        readings
    }

    /// Whether switch or valve `turn` currently lets the supply through.
    pub async fn get_state(&self, turn: usize) -> Result<bool> {
        let actuator = self.actuator(turn)?;
        let mut session = self.gateway.lock().await;
        self.read_state(&mut session, &actuator).await
    }

    /// Commands switch or valve `turn` and confirms it by reading the status back.
    ///
    /// A status that disagrees with the command is a [`MeterError::Verification`]; it
    /// is not retried and nothing is rolled back.
    pub async fn set_state(&self, turn: usize, on: bool) -> Result<()> {
        let actuator = self.actuator(turn)?;
        let policy = self.profile.actuator_class.write_policy();
        let command = actuator.command(on);
        let (slave, address) = (self.slave, actuator.control_address);

        let mut session = self.gateway.lock().await;
        session.ensure_client().await?;
        debug!(
            "slave {slave}: writing 0x{command:04x} to {} 0x{address:04x}",
            actuator.control_kind
        );
        match actuator.control_kind {
            RegisterKind::Coil => {
                session
                    .exchange(policy, move |c| c.write_coil(slave, address, command != 0))
                    .await?
            }
            RegisterKind::Holding => {
                session
                    .exchange(policy, move |c| c.write_register(slave, address, command))
                    .await?
            }
        }

        let reported = self.read_state(&mut session, &actuator).await?;
        if reported != on {
            warn!(
                "slave {slave}: {} {turn} did not follow command",
                self.profile.actuator_class
            );
            return Err(MeterError::Verification {
                turn,
                commanded: on,
                reported,
            });
        }
        info!(
            "slave {slave}: {} {turn} confirmed {}",
            self.profile.actuator_class,
            if on { "on" } else { "off" }
        );
        Ok(())
    }

    /// Power switch off.
    pub async fn trip(&self, turn: usize) -> Result<()> {
        self.set_state(turn, false).await
    }

    /// Power switch on.
    pub async fn close_switch(&self, turn: usize) -> Result<()> {
        self.set_state(turn, true).await
    }

    async fn read_value(
        &self,
        session: &mut Session<F>,
        descriptor: &RegisterDescriptor,
    ) -> Result<f64> {
        session.ensure_client().await?;
        sleep(READ_THROTTLE).await;
        let (slave, address, length) = (self.slave, descriptor.address, descriptor.length);
        let words = session
            .exchange(RetryPolicy::READ, move |c| {
                c.read_holding_registers(slave, address, length)
            })
            .await?;
        debug!("slave {slave}: read 0x{address:04x} x{length} = {words:04x?}");
        RegisterCodec::decode_register(descriptor, &words)
    }

    async fn read_state(
        &self,
        session: &mut Session<F>,
        actuator: &ActuatorDescriptor,
    ) -> Result<bool> {
        session.ensure_client().await?;
        sleep(READ_THROTTLE).await;
        let (slave, address) = (self.slave, actuator.status_address);
        match actuator.status_kind {
            RegisterKind::Coil => {
                let bits = session
                    .exchange(RetryPolicy::READ, move |c| c.read_coils(slave, address, 1))
                    .await?;
                bits.first().copied().ok_or_else(|| {
                    MeterError::Decode(format!("empty coil response at 0x{address:04x}"))
                })
            }
            RegisterKind::Holding => {
                let words = session
                    .exchange(RetryPolicy::READ, move |c| {
                        c.read_holding_registers(slave, address, 1)
                    })
                    .await?;
                let raw = words.first().copied().ok_or_else(|| {
                    MeterError::Decode(format!("empty register response at 0x{address:04x}"))
                })?;
                RegisterCodec::decode_status(actuator, raw)
            }
        }
    }
}
