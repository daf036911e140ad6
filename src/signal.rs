use serde::{Deserialize, Serialize};

use crate::config::ConfigureParams;
use crate::widget::WidgetSurface;


/// A discovered heart rate sensor. The hub never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub heart_rate_bpm: f64,
}

/// Inbound commands for the dispatch hub.
pub enum Command {
    Connect(DeviceInfo),
    Disconnect,
    Configure(ConfigureParams),
    Measurement(Measurement),
    AttachWidget(Box<dyn WidgetSurface>),
    DetachWidget,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect(_) => "connect",
            Command::Disconnect => "disconnect",
            Command::Configure(_) => "configure",
            Command::Measurement(_) => "measurement",
            Command::AttachWidget(_) => "attach-widget",
            Command::DetachWidget => "detach-widget",
        }
    }
}

/// Sensor session -> GUI
#[derive(Debug, Clone, PartialEq)]
pub enum BthrSignal {
    DiscoveredPeripherals(Vec<DeviceInfo>),
    ScanStarted,
    ActiveDevice(DeviceInfo),
    DeviceDisconnected,
}

/// Requests handled by the sensor session. `ConnectDevice` arrives through the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum GuiSignal {
    ConnectDevice(DeviceInfo),
    DisconnectDevice,
}
