use strum_macros::{Display, EnumIter, EnumString, FromRepr};

use super::{ActuatorDescriptor, ItemId, RegisterDescriptor, RegisterKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum WaterItem {
    /// Accumulated volume.
    Volume,
}

impl WaterItem {
    pub fn unit(self) -> &'static str {
        match self {
            WaterItem::Volume => "m³",
        }
    }
}

impl From<WaterItem> for ItemId {
    fn from(item: WaterItem) -> Self {
        ItemId(item as u8)
    }
}

pub(super) const REGISTERS: [RegisterDescriptor; 1] =
    [RegisterDescriptor::read_only(0x0000, 2, false, 0.01)];

/// The valve coil doubles as its own status bit.
pub(super) const VALVES: [ActuatorDescriptor; 1] = [ActuatorDescriptor {
    control_address: 0x0001,
    control_kind: RegisterKind::Coil,
    on_command: 0x0001,
    off_command: 0x0000,
    status_address: 0x0001,
    status_kind: RegisterKind::Coil,
    on_status: 0x0001,
    off_status: 0x0000,
}];
