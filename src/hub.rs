//! Dispatch hub
//!
//! Single owner of connection state, transport config and both sinks. Commands
//! are handled to completion one at a time, in arrival order, and no handler
//! awaits: OSC sends are non-blocking datagrams, widget posts and UI
//! notifications go onto channels.

use tokio::sync::mpsc::{error::TrySendError, Receiver as TokioReceiver, Sender as TokioSender};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigureParams, TransportStore};
use crate::error::HubError;
use crate::osc::{Connector, OscSink, OscValue};
use crate::signal::{Command, DeviceInfo, GuiSignal, Measurement};
use crate::widget::WidgetSink;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connected,
}

/// Picks the device to connect to from a scan result.
pub fn select_device(devices: &[DeviceInfo]) -> Result<&DeviceInfo, HubError> {
    devices.first().ok_or(HubError::EmptyDeviceList)
}

/// `hr / max`, rounded to two decimals. Not clamped: readings above max exceed 1.0.
pub fn heart_rate_percent(heart_rate_bpm: f64, max_heart_rate: f64) -> f64 {
    let ratio = heart_rate_bpm / max_heart_rate;
    let scaled = ratio * 100.0;
    let mut hundredths = scaled.round();
    // A product that lands on .5 may have been rounded there; the exact
    // residual decides which way the stored ratio really lies.
    if (scaled - scaled.trunc()).abs() == 0.5 {
        let residual = ratio.mul_add(100.0, -scaled);
        if residual < 0.0 {
            hundredths = scaled.floor();
        } else if residual > 0.0 {
            hundredths = scaled.ceil();
        }
    }
    hundredths / 100.0
}


pub struct DispatchHub<C: Connector> {
    state: ConnectionState,
    transport: TransportStore,
    osc: OscSink<C>,
    widget: WidgetSink,
    tx_to_session: TokioSender<GuiSignal>,
}

impl<C: Connector> DispatchHub<C> {
    pub fn new(connector: C, tx_to_session: TokioSender<GuiSignal>) -> Self {
        DispatchHub {
            state: ConnectionState::Idle,
            transport: TransportStore::new(),
            osc: OscSink::new(connector),
            widget: WidgetSink::new(),
            tx_to_session,
        }
    }

    pub fn handle(&mut self, command: Command) {
        tracing::trace!("Handling {} command", command.name());
        match command {
            Command::Connect(device) => self.connect(device),
            Command::Disconnect => self.disconnect(),
            Command::Configure(params) => self.configure(params),
            Command::Measurement(measurement) => self.measurement(measurement),
            Command::AttachWidget(surface) => {
                tracing::info!("Widget attached");
                self.widget.attach(surface);
            }
            Command::DetachWidget => {
                if self.widget.is_attached() {
                    tracing::info!("Widget detached");
                }
                self.widget.detach();
            }
        }
    }

    /// Runs until every command sender is dropped or `cancel` fires.
    pub async fn run(mut self, mut commands: TokioReceiver<Command>, cancel: CancellationToken) {
        tracing::info!("Dispatch hub started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        self.osc.invalidate();
        tracing::info!("Dispatch hub stopped ({:?})", self.state);
    }

    fn connect(&mut self, device: DeviceInfo) {
        if self.state == ConnectionState::Connected {
            tracing::debug!("Connect while already connected");
        }
        tracing::info!("Connect requested for {} ({})", device.name, device.id);
        match self.tx_to_session.try_send(GuiSignal::ConnectDevice(device)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::warn!("Sensor session busy, connect request dropped"),
            Err(TrySendError::Closed(_)) => tracing::warn!("Sensor session gone, connect request dropped"),
        }
        self.send_connected(true);
        self.state = ConnectionState::Connected;
    }

    fn disconnect(&mut self) {
        tracing::info!("Device disconnected");
        self.send_connected(false);
        self.state = ConnectionState::Idle;
    }

    fn configure(&mut self, params: ConfigureParams) {
        let change = self.transport.apply(params);
        if change.endpoint_changed {
            self.osc.invalidate();
        }
        let config = change.config;
        tracing::info!(
            "OSC configured: {}:{} connected={} percent={} max_hr={}",
            config.host,
            config.port,
            config.connected_path,
            config.percent_path,
            config.max_heart_rate
        );
    }

    fn measurement(&mut self, measurement: Measurement) {
        let hr = measurement.heart_rate_bpm;
        tracing::trace!("heartbeat: {hr}");
        self.widget.push(hr);

        if !self.transport.is_configured() {
            return;
        }
        // Re-assert on every reading; the peer may have missed the connect.
        self.send_connected(true);
        let config = self.transport.current();
        let percent = heart_rate_percent(hr, config.max_heart_rate);
        self.osc.send(config, &config.percent_path, OscValue::Float(percent));
    }

    fn send_connected(&mut self, connected: bool) {
        if !self.transport.is_configured() {
            return;
        }
        let config = self.transport.current();
        self.osc.send(config, &config.connected_path, OscValue::Bool(connected));
    }
}
