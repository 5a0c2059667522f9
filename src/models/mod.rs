//! Register and actuator descriptors, and the tables for the supported meter models.

use std::str::FromStr;
use std::time::Duration;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::gateway::RetryPolicy;

mod dds4921;
mod hyls_y;

pub use dds4921::PowerItem;
pub use hyls_y::WaterItem;

/// Index of a data item in a meter's register table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u8);

impl ItemId {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Register space an actuator is commanded or read through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RegisterKind {
    #[strum(serialize = "coil")]
    Coil,
    #[strum(serialize = "holding register")]
    Holding,
}

/// How one value is laid out in the meter's holding registers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterDescriptor {
    pub address: u16,
    /// Number of consecutive words; 0 marks an item the model does not provide.
    pub length: u16,
    pub readable: bool,
    pub writable: bool,
    pub signed: bool,
    pub scale: f64,
}

impl RegisterDescriptor {
    pub const UNDEFINED: Self = Self {
        address: 0,
        length: 0,
        readable: false,
        writable: false,
        signed: false,
        scale: 1.0,
    };

    pub const fn read_only(address: u16, length: u16, signed: bool, scale: f64) -> Self {
        Self {
            address,
            length,
            readable: true,
            writable: false,
            signed,
            scale,
        }
    }

    pub const fn read_write(address: u16, length: u16, signed: bool, scale: f64) -> Self {
        Self {
            writable: true,
            ..Self::read_only(address, length, signed, scale)
        }
    }

    pub const fn is_defined(&self) -> bool {
        self.length != 0
    }
}

/// Control and status registers of one switch or valve. "On" is the state in which
/// the supply flows: a closed breaker, an open valve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorDescriptor {
    pub control_address: u16,
    pub control_kind: RegisterKind,
    pub on_command: u16,
    pub off_command: u16,
    pub status_address: u16,
    pub status_kind: RegisterKind,
    pub on_status: u16,
    pub off_status: u16,
}

impl ActuatorDescriptor {
    pub const fn command(&self, on: bool) -> u16 {
        if on {
            self.on_command
        } else {
            self.off_command
        }
    }
}

/// Actuator family; decides how hard a control write is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ActuatorClass {
    #[strum(serialize = "power switch")]
    PowerSwitch,
    #[strum(serialize = "valve")]
    Valve,
}

impl ActuatorClass {
    /// Motorised valves answer slowly and drop requests while moving, so they get a
    /// much longer write budget than breakers.
    pub const fn write_policy(self) -> RetryPolicy {
        match self {
            ActuatorClass::PowerSwitch => RetryPolicy {
                retries: 3,
                settle: Duration::from_millis(200),
            },
            ActuatorClass::Valve => RetryPolicy {
                retries: 30,
                settle: Duration::from_millis(50),
            },
        }
    }
}

/// Everything a driver needs to know about one meter type.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterProfile {
    pub registers: Vec<RegisterDescriptor>,
    pub actuators: Vec<ActuatorDescriptor>,
    pub actuator_class: ActuatorClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumString, Display)]
pub enum MeterModel {
    /// DDS4921 single/three-phase electric meter with a built-in breaker.
    #[strum(serialize = "dds4921")]
    Dds4921,
    /// HYLS-Y water meter with a motorised valve.
    #[strum(to_string = "hyls-y", serialize = "hylsy")]
    HylsY,
}

impl MeterModel {
    pub fn profile(self) -> MeterProfile {
        match self {
            MeterModel::Dds4921 => MeterProfile {
                registers: dds4921::REGISTERS.to_vec(),
                actuators: dds4921::SWITCHES.to_vec(),
                actuator_class: ActuatorClass::PowerSwitch,
            },
            MeterModel::HylsY => MeterProfile {
                registers: hyls_y::REGISTERS.to_vec(),
                actuators: hyls_y::VALVES.to_vec(),
                actuator_class: ActuatorClass::Valve,
            },
        }
    }

    pub fn parse_item(self, name: &str) -> Option<ItemId> {
        match self {
            MeterModel::Dds4921 => PowerItem::from_str(name).ok().map(ItemId::from),
            MeterModel::HylsY => WaterItem::from_str(name).ok().map(ItemId::from),
        }
    }

    /// Name and unit of an item, if the model knows the id.
    pub fn describe_item(self, item: ItemId) -> Option<(String, &'static str)> {
        match self {
            MeterModel::Dds4921 => PowerItem::from_repr(item.0).map(|i| (i.to_string(), i.unit())),
            MeterModel::HylsY => WaterItem::from_repr(item.0).map(|i| (i.to_string(), i.unit())),
        }
    }

    pub fn items(self) -> Vec<ItemId> {
        match self {
            MeterModel::Dds4921 => PowerItem::iter().map(ItemId::from).collect(),
            MeterModel::HylsY => WaterItem::iter().map(ItemId::from).collect(),
        }
    }
}
