use strum_macros::{Display, EnumIter, EnumString, FromRepr};

use super::{ActuatorDescriptor, ItemId, RegisterDescriptor, RegisterKind};

/// Data items of an electric meter, in register table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum PowerItem {
    Voltage,
    VoltagePhaseA,
    VoltagePhaseB,
    VoltagePhaseC,

    Current,
    CurrentPhaseA,
    CurrentPhaseB,
    CurrentPhaseC,

    PowerActive,
    PowerActivePhaseA,
    PowerActivePhaseB,
    PowerActivePhaseC,

    PowerReactive,
    PowerReactivePhaseA,
    PowerReactivePhaseB,
    PowerReactivePhaseC,

    PowerApparent,
    PowerApparentPhaseA,
    PowerApparentPhaseB,
    PowerApparentPhaseC,

    PowerFactor,
    PowerFactorPhaseA,
    PowerFactorPhaseB,
    PowerFactorPhaseC,

    Frequency,

    /// Combined active energy, all tariffs.
    EnergyActive,
    EnergyActiveForward,
    EnergyActiveReverse,
    EnergyReactive,
    EnergyReactiveForward,
    EnergyReactiveReverse,

    SlaveAddress,
    DateTime,
}

impl PowerItem {
    pub fn unit(self) -> &'static str {
        use PowerItem::*;
        match self {
            Voltage | VoltagePhaseA | VoltagePhaseB | VoltagePhaseC => "V",
            Current | CurrentPhaseA | CurrentPhaseB | CurrentPhaseC => "A",
            PowerActive | PowerActivePhaseA | PowerActivePhaseB | PowerActivePhaseC => "W",
            PowerReactive | PowerReactivePhaseA | PowerReactivePhaseB | PowerReactivePhaseC => {
                "var"
            }
            PowerApparent | PowerApparentPhaseA | PowerApparentPhaseB | PowerApparentPhaseC => {
                "VA"
            }
            Frequency => "Hz",
            EnergyActive | EnergyActiveForward | EnergyActiveReverse => "kWh",
            EnergyReactive | EnergyReactiveForward | EnergyReactiveReverse => "kvarh",
            PowerFactor | PowerFactorPhaseA | PowerFactorPhaseB | PowerFactorPhaseC
            | SlaveAddress | DateTime => "",
        }
    }
}

impl From<PowerItem> for ItemId {
    fn from(item: PowerItem) -> Self {
        ItemId(item as u8)
    }
}

const UNDEF: RegisterDescriptor = RegisterDescriptor::UNDEFINED;

/// DDS4921 is single-phase: per-phase items are not provided.
pub(super) const REGISTERS: [RegisterDescriptor; 33] = [
    RegisterDescriptor::read_only(0x0000, 1, false, 0.1),
    UNDEF,
    UNDEF,
    UNDEF,
    RegisterDescriptor::read_only(0x0003, 1, true, 0.01),
    UNDEF,
    UNDEF,
    UNDEF,
    RegisterDescriptor::read_only(0x0007, 1, true, 1.0),
    UNDEF,
    UNDEF,
    UNDEF,
    RegisterDescriptor::read_only(0x000B, 1, true, 1.0),
    UNDEF,
    UNDEF,
    UNDEF,
    RegisterDescriptor::read_only(0x000F, 1, true, 1.0),
    UNDEF,
    UNDEF,
    UNDEF,
    RegisterDescriptor::read_only(0x0013, 1, false, 0.001),
    UNDEF,
    UNDEF,
    UNDEF,
    RegisterDescriptor::read_only(0x001A, 1, false, 0.01),
    RegisterDescriptor::read_only(0x001D, 2, true, 0.01),
    RegisterDescriptor::read_only(0x0027, 2, false, 0.01),
    RegisterDescriptor::read_only(0x0031, 2, false, 0.01),
    RegisterDescriptor::read_only(0x003B, 2, false, 0.01),
    RegisterDescriptor::read_only(0x0045, 2, false, 0.01),
    RegisterDescriptor::read_only(0x004F, 2, false, 0.01),
    RegisterDescriptor::read_write(0x0061, 1, false, 0.01),
    UNDEF,
];

pub(super) const SWITCHES: [ActuatorDescriptor; 1] = [ActuatorDescriptor {
    control_address: 0x0010,
    control_kind: RegisterKind::Holding,
    on_command: 0x5555,
    off_command: 0xAAAA,
    status_address: 0x0064,
    status_kind: RegisterKind::Holding,
    on_status: 0x0055,
    off_status: 0x00AA,
}];
