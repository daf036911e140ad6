use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;

use crate::signal::{BthrSignal, Command, DeviceInfo, GuiSignal, Measurement};


const READING_INTERVAL: Duration = Duration::from_millis(800);

pub fn simulated_device() -> DeviceInfo {
    DeviceInfo {
        id: "simulated".to_string(),
        name: "Simulated HRM".to_string(),
    }
}

/// Stands in for the BLE session: one always-present device streaming random readings.
pub async fn transmit_fake_hr_data(
    tx_to_gui: Sender<BthrSignal>,
    tx_to_hub: Sender<Command>,
    mut rx_from_hub: Receiver<GuiSignal>,
    cancel: CancellationToken,
) {
    let _ = tx_to_gui.send(BthrSignal::DiscoveredPeripherals(vec![simulated_device()])).await;

    loop {
        let device = tokio::select! {
            _ = cancel.cancelled() => return,
            request = rx_from_hub.recv() => match request {
                Some(GuiSignal::ConnectDevice(device)) => device,
                Some(GuiSignal::DisconnectDevice) => continue,
                None => return,
            },
        };

        tracing::info!("Streaming simulated readings as {}", device.name);
        let _ = tx_to_gui.send(BthrSignal::ActiveDevice(device)).await;

        let mut ticker = tokio::time::interval(READING_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                request = rx_from_hub.recv() => match request {
                    Some(GuiSignal::DisconnectDevice) | None => break,
                    Some(GuiSignal::ConnectDevice(_)) => {}
                },
                _ = ticker.tick() => {
                    let random: u8 = rand::thread_rng().gen_range(50..70);
                    let measurement = Measurement { heart_rate_bpm: f64::from(random) };
                    let _ = tx_to_hub.send(Command::Measurement(measurement)).await;
                }
            }
        }

        let _ = tx_to_hub.send(Command::Disconnect).await;
        let _ = tx_to_gui.send(BthrSignal::DeviceDisconnected).await;
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::channel;

    #[tokio::test]
    async fn test_simulated_session_lifecycle() {
        let (gui_tx, mut gui_rx) = channel(8);
        let (hub_tx, mut hub_rx) = channel(8);
        let (session_tx, session_rx) = channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(transmit_fake_hr_data(gui_tx, hub_tx, session_rx, cancel.clone()));

        assert_eq!(
            gui_rx.recv().await,
            Some(BthrSignal::DiscoveredPeripherals(vec![simulated_device()]))
        );

        session_tx.send(GuiSignal::ConnectDevice(simulated_device())).await.unwrap();
        assert_eq!(gui_rx.recv().await, Some(BthrSignal::ActiveDevice(simulated_device())));

        match hub_rx.recv().await {
            Some(Command::Measurement(m)) => assert!((50.0..70.0).contains(&m.heart_rate_bpm)),
            _ => panic!("expected a measurement"),
        }

        session_tx.send(GuiSignal::DisconnectDevice).await.unwrap();
        loop {
            match hub_rx.recv().await {
                Some(Command::Measurement(_)) => continue,
                Some(Command::Disconnect) => break,
                _ => panic!("expected a disconnect"),
            }
        }
        assert_eq!(gui_rx.recv().await, Some(BthrSignal::DeviceDisconnected));

        cancel.cancel();
        handle.await.unwrap();
    }
}
