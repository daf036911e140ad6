use thiserror::Error;


/// Errors surfaced by the hub's validation helpers. Commands themselves never fail.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("device list is empty")]
    EmptyDeviceList,
}

#[derive(Debug, Error)]
pub enum OscError {
    #[error("could not resolve OSC endpoint {host}:{port}")]
    Resolve { host: String, port: u16 },
    #[error("OSC socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("OSC encoding failed: {0:?}")]
    Encode(rosc::OscError),
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("peripheral {0} is no longer available")]
    DeviceNotFound(String),
    #[error("peripheral {0} has no heart rate measurement characteristic")]
    CharacteristicNotFound(String),
    #[error("heart rate payload truncated ({len} bytes)")]
    Truncated { len: usize },
    #[error(transparent)]
    Ble(#[from] btleplug::Error),
}
