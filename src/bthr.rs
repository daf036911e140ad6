use std::time::Duration;

use tokio::sync::mpsc::{Receiver as TokioReceiver, Sender as TokioSender};
use tokio_util::sync::CancellationToken;
use futures::StreamExt;
use anyhow::Result;

use uuid::Uuid;
use btleplug::api::{Central, CharPropFlags, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral};

use crate::config::SensorSettings;
use crate::error::SensorError;
use crate::hub::select_device;
use crate::signal::{BthrSignal, Command, DeviceInfo, GuiSignal, Measurement};


const HEART_RATE_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x00002a3700001000800000805f9b34fb);

const FLAG_HR_U16: u8 = 0x01;
const FLAG_CONTACT_DETECTED: u8 = 0x02;
const FLAG_CONTACT_SUPPORTED: u8 = 0x04;


/// One decoded Heart Rate Measurement notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateReading {
    pub bpm: u16,
    /// None when the sensor can't tell.
    pub sensor_contact: Option<bool>,
}

pub fn parse_heart_rate(value: &[u8]) -> Result<HeartRateReading, SensorError> {
    let truncated = || SensorError::Truncated { len: value.len() };
    let flags = *value.first().ok_or_else(truncated)?;

    let bpm = if flags & FLAG_HR_U16 == 0 {
        u16::from(*value.get(1).ok_or_else(truncated)?)
    } else {
        let bytes = value.get(1..3).ok_or_else(truncated)?;
        u16::from_le_bytes([bytes[0], bytes[1]])
    };

    let sensor_contact = if flags & FLAG_CONTACT_SUPPORTED != 0 {
        Some(flags & FLAG_CONTACT_DETECTED != 0)
    } else {
        None
    };

    Ok(HeartRateReading { bpm, sensor_contact })
}

fn peripheral_id(peripheral: &PlatformPeripheral) -> String {
    format!("{:?}", peripheral.id())
}

async fn get_peripheral_name(peripheral: &PlatformPeripheral) -> Option<String> {
    let Ok(Some(properties)) = peripheral.properties().await else { return None; };

    properties.local_name
}

/// A failed listing counts as an empty scan; the next tick tries again.
fn devices_or_empty(listing: Result<Vec<DeviceInfo>, SensorError>) -> Vec<DeviceInfo> {
    listing.unwrap_or_else(|e| {
        tracing::warn!("Can't list BLE peripherals: {e}");
        vec![]
    })
}


/// Drives the BLE heart rate sensor: scanning, connecting and streaming readings into the hub.
pub struct BthrManager {
    tx_to_gui: TokioSender<BthrSignal>,
    tx_to_hub: TokioSender<Command>,
    rx_from_hub: TokioReceiver<GuiSignal>,
    settings: SensorSettings,
    cancel: CancellationToken,
    /// Set once the user disconnects; auto-connect waits for an explicit connect.
    auto_connect_held: bool,
}

impl BthrManager {
    pub fn new(
        tx_to_gui: TokioSender<BthrSignal>,
        tx_to_hub: TokioSender<Command>,
        rx_from_hub: TokioReceiver<GuiSignal>,
        settings: SensorSettings,
        cancel: CancellationToken,
    ) -> Self {
        BthrManager {
            tx_to_gui,
            tx_to_hub,
            rx_from_hub,
            settings,
            cancel,
            auto_connect_held: false,
        }
    }

    fn hold_auto_connect(&mut self) {
        if self.settings.auto_connect && !self.auto_connect_held {
            tracing::info!("Auto-connect paused until a device is picked");
        }
        self.auto_connect_held = true;
    }

    fn release_auto_connect(&mut self) {
        self.auto_connect_held = false;
    }

    async fn get_adapter(&self) -> Result<Adapter, SensorError> {
        let manager = Manager::new().await?;
        let adapter_list = manager.adapters().await?;

        for adapter in adapter_list.iter() {
            tracing::info!("{}", adapter.adapter_info().await.unwrap_or("No name adapter".to_string()));
        }

        // TODO: let the user pick when more than one adapter is present
        adapter_list.into_iter().next().ok_or(SensorError::NoAdapter)
    }

    async fn discover(&self, adapter: &Adapter) -> Result<Vec<DeviceInfo>, SensorError> {
        // May contain peripherals that are no longer available
        let peripherals = adapter.peripherals().await?;

        let mut devices = vec![];
        for per in peripherals.iter() {
            let Some(name) = get_peripheral_name(per).await else { continue; };
            devices.push(DeviceInfo {
                id: peripheral_id(per),
                name,
            });
        }
        Ok(devices)
    }

    fn auto_connect_target(&self, devices: &[DeviceInfo]) -> Option<DeviceInfo> {
        if !self.settings.auto_connect || self.auto_connect_held {
            return None;
        }
        let candidates: Vec<DeviceInfo> = devices
            .iter()
            .filter(|d| match &self.settings.device_name {
                Some(wanted) => d.name.contains(wanted.as_str()),
                None => true,
            })
            .cloned()
            .collect();

        match select_device(&candidates) {
            Ok(device) => Some(device.clone()),
            Err(e) => {
                tracing::debug!("Nothing to auto-connect: {e}");
                None
            }
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let adapter = self.get_adapter().await?;
        let scan_interval = Duration::from_secs(self.settings.scan_interval_secs.max(1));
        let cancel = self.cancel.clone();

        let _ = self.tx_to_gui.send(BthrSignal::ScanStarted).await;

        loop {
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                tracing::warn!("Can't scan BLE adapter for devices: {e}");
            }

            let devices = devices_or_empty(self.discover(&adapter).await);
            if let Some(device) = self.auto_connect_target(&devices) {
                // Goes through the hub so the connect is seen by every sink
                let _ = self.tx_to_hub.send(Command::Connect(device)).await;
            }
            let _ = self.tx_to_gui.send(BthrSignal::DiscoveredPeripherals(devices)).await;

            // Sleep here as we don't want to scan for devices a billion times per second
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = self.rx_from_hub.recv() => match request {
                    Some(GuiSignal::ConnectDevice(device)) => {
                        // Auto-connect sends nothing while held, so this one was picked by hand
                        self.release_auto_connect();
                        self.connect(&adapter, device).await;
                    }
                    Some(GuiSignal::DisconnectDevice) => {
                        tracing::debug!("Disconnect requested while idle");
                        self.hold_auto_connect();
                    }
                    None => break,
                },
                _ = tokio::time::sleep(scan_interval) => {}
            }

            if cancel.is_cancelled() {
                break;
            }
        }

        let _ = adapter.stop_scan().await;
        tracing::info!("Sensor session stopped");
        Ok(())
    }

    async fn connect(&mut self, adapter: &Adapter, device: DeviceInfo) {
        if let Err(e) = self.stream(adapter, &device).await {
            tracing::warn!("Session with {} ended: {e}", device.name);
        }
        let _ = self.tx_to_hub.send(Command::Disconnect).await;
        let _ = self.tx_to_gui.send(BthrSignal::DeviceDisconnected).await;
    }

    async fn stream(&mut self, adapter: &Adapter, device: &DeviceInfo) -> Result<(), SensorError> {
        let mut peripheral = None;
        for per in adapter.peripherals().await? {
            if peripheral_id(&per) == device.id {
                peripheral = Some(per);
                break;
            }
        }
        let peripheral = peripheral.ok_or_else(|| SensorError::DeviceNotFound(device.name.clone()))?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }

        tracing::info!("Discover peripheral {} services...", device.name);
        peripheral.discover_services().await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == HEART_RATE_MEASUREMENT_UUID && c.properties.contains(CharPropFlags::NOTIFY))
            .ok_or_else(|| SensorError::CharacteristicNotFound(device.name.clone()))?;

        tracing::info!("Subscribing to characteristic {:?}", characteristic.uuid);
        peripheral.subscribe(&characteristic).await?;
        let mut notifications = peripheral.notifications().await?;
        let _ = self.tx_to_gui.send(BthrSignal::ActiveDevice(device.clone())).await;

        let cancel = self.cancel.clone();
        // Process while the BLE connection is not broken or stopped.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = self.rx_from_hub.recv() => match request {
                    Some(GuiSignal::DisconnectDevice) => {
                        self.hold_auto_connect();
                        break;
                    }
                    None => break,
                    Some(GuiSignal::ConnectDevice(other)) => {
                        tracing::warn!("Already streaming from {}, ignoring {}", device.name, other.name);
                    }
                },
                data = notifications.next() => {
                    let Some(data) = data else { break; };
                    if data.uuid != HEART_RATE_MEASUREMENT_UUID {
                        continue;
                    }
                    match parse_heart_rate(&data.value) {
                        Ok(reading) if reading.bpm == 0 => tracing::debug!("Sensor still settling, skipping 0 BPM"),
                        Ok(reading) => {
                            if reading.sensor_contact == Some(false) {
                                tracing::debug!("No skin contact reported");
                            }
                            let measurement = Measurement { heart_rate_bpm: f64::from(reading.bpm) };
                            let _ = self.tx_to_hub.send(Command::Measurement(measurement)).await;
                        }
                        Err(e) => tracing::warn!("Bad heart rate payload {:?}: {e}", data.value),
                    }
                }
            }
        }

        tracing::info!("Disconnecting from peripheral {}...", device.name);
        if let Err(e) = peripheral.disconnect().await {
            tracing::warn!("Error disconnecting from {}: {e}", device.name);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::channel;

    fn manager(settings: SensorSettings) -> BthrManager {
        let (tx_to_gui, _) = channel(1);
        let (tx_to_hub, _) = channel(1);
        let (_, rx_from_hub) = channel(1);
        BthrManager::new(tx_to_gui, tx_to_hub, rx_from_hub, settings, CancellationToken::new())
    }

    fn devices() -> Vec<DeviceInfo> {
        vec![
            DeviceInfo { id: "1".to_string(), name: "Galaxy Buds".to_string() },
            DeviceInfo { id: "2".to_string(), name: "Polar H10 8A2B".to_string() },
        ]
    }

    #[test]
    fn test_auto_connect_disabled_by_default() {
        let manager = manager(SensorSettings::default());
        assert_eq!(manager.auto_connect_target(&devices()), None);
    }

    #[test]
    fn test_auto_connect_filters_by_name() {
        let manager = manager(SensorSettings {
            device_name: Some("Polar".to_string()),
            auto_connect: true,
            ..Default::default()
        });
        assert_eq!(manager.auto_connect_target(&devices()), Some(devices()[1].clone()));
        assert_eq!(manager.auto_connect_target(&devices()[..1]), None);
    }

    #[test]
    fn test_user_disconnect_holds_auto_connect() {
        let mut manager = manager(SensorSettings {
            auto_connect: true,
            ..Default::default()
        });
        assert_eq!(manager.auto_connect_target(&devices()), Some(devices()[0].clone()));

        manager.hold_auto_connect();
        assert_eq!(manager.auto_connect_target(&devices()), None);
        assert_eq!(manager.auto_connect_target(&devices()), None);

        manager.release_auto_connect();
        assert_eq!(manager.auto_connect_target(&devices()), Some(devices()[0].clone()));
    }

    #[test]
    fn test_failed_listing_keeps_scanning() {
        assert!(devices_or_empty(Err(SensorError::NoAdapter)).is_empty());
        assert_eq!(devices_or_empty(Ok(devices())), devices());
    }

    #[test]
    fn test_parse_u8_heart_rate() {
        let reading = parse_heart_rate(&[0x00, 72]).unwrap();
        assert_eq!(reading, HeartRateReading { bpm: 72, sensor_contact: None });
    }

    #[test]
    fn test_parse_u16_heart_rate() {
        let reading = parse_heart_rate(&[0x01, 0x2c, 0x01]).unwrap();
        assert_eq!(reading.bpm, 300);
    }

    #[test]
    fn test_parse_sensor_contact() {
        assert_eq!(parse_heart_rate(&[0x06, 60]).unwrap().sensor_contact, Some(true));
        assert_eq!(parse_heart_rate(&[0x04, 60]).unwrap().sensor_contact, Some(false));
        assert_eq!(parse_heart_rate(&[0x02, 60]).unwrap().sensor_contact, None);
    }

    #[test]
    fn test_parse_ignores_trailing_fields() {
        // energy expended + one RR interval
        let reading = parse_heart_rate(&[0x18, 80, 0x10, 0x00, 0x00, 0x03]).unwrap();
        assert_eq!(reading.bpm, 80);
    }

    #[test]
    fn test_parse_truncated() {
        assert!(matches!(parse_heart_rate(&[]), Err(SensorError::Truncated { len: 0 })));
        assert!(matches!(parse_heart_rate(&[0x00]), Err(SensorError::Truncated { len: 1 })));
        assert!(matches!(parse_heart_rate(&[0x01, 0x50]), Err(SensorError::Truncated { len: 2 })));
    }
}
