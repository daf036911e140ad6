use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use eframe::egui;
use tokio::{spawn, sync::mpsc::{self, Receiver as TokioReceiver, Sender as TokioSender, UnboundedReceiver}};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod bthr;
mod config;
mod error;
mod fake;
mod hub;
mod osc;
mod signal;
mod widget;

use bthr::BthrManager;
use config::{AppConfig, ConfigureParams};
use hub::DispatchHub;
use osc::UdpConnector;
use signal::{BthrSignal, Command, DeviceInfo, GuiSignal};

const MAX_FPS: f64 = 30.0;


/// Relays live heart rate to an overlay and to OSC.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use a simulated sensor instead of Bluetooth
    #[arg(long)]
    simulate: bool,

    /// OSC host; enables OSC output
    #[arg(long)]
    osc_host: Option<String>,

    /// OSC port; enables OSC output
    #[arg(long)]
    osc_port: Option<u16>,

    /// Heart rate that maps to 100%
    #[arg(long)]
    max_hr: Option<f64>,

    /// Auto-connect to the first device whose name contains this
    #[arg(long)]
    device: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(host) = &self.osc_host {
            config.osc.host = host.clone();
            config.osc.enabled = true;
        }
        if let Some(port) = self.osc_port {
            config.osc.port = port;
            config.osc.enabled = true;
        }
        if let Some(max_hr) = self.max_hr {
            config.osc.max_heart_rate = max_hr;
            config.osc.enabled = true;
        }
        if let Some(name) = &self.device {
            config.sensor.device_name = Some(name.clone());
            config.sensor.auto_connect = true;
        }
    }
}


#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };
    let mut app_config = config::load_or_default(&config_path);
    cli.apply_overrides(&mut app_config);

    let cancel = CancellationToken::new();
    let (tx_to_hub, rx_hub) = mpsc::channel(128);
    let (tx_to_session, rx_session) = mpsc::channel(16);
    let (tx_to_gui, rx_from_bthr) = mpsc::channel(128);

    if app_config.osc.enabled {
        tx_to_hub
            .send(Command::Configure(app_config.osc.to_params()))
            .await
            .map_err(|_| anyhow::anyhow!("Dispatch hub closed before startup"))?;
    }

    let hub = DispatchHub::new(UdpConnector, tx_to_session.clone());
    let hub_task = spawn(hub.run(rx_hub, cancel.clone()));

    if cli.simulate {
        spawn(fake::transmit_fake_hr_data(tx_to_gui, tx_to_hub.clone(), rx_session, cancel.clone()));
    } else {
        let mut bthr_manager = BthrManager::new(
            tx_to_gui,
            tx_to_hub.clone(),
            rx_session,
            app_config.sensor.clone(),
            cancel.clone(),
        );
        spawn(async move {
            if let Err(e) = bthr_manager.run().await {
                tracing::error!("Sensor session failed: {e:#}");
            }
        });
    }

    let native_options = eframe::NativeOptions::default();
    let result = eframe::run_native(
        "hr-relay",
        native_options,
        Box::new(move |cc| Ok(Box::new(MyApp::new(cc, rx_from_bthr, tx_to_hub, tx_to_session, app_config, config_path)))),
    );

    tracing::info!("Shutting down...");
    cancel.cancel();
    let _ = hub_task.await;

    result.map_err(|e| anyhow::anyhow!("GUI failed: {e}"))
}


struct MyApp {
    rx_from_bthr: TokioReceiver<BthrSignal>,
    tx_to_hub: TokioSender<Command>,
    tx_to_session: TokioSender<GuiSignal>,
    rx_widget: Option<UnboundedReceiver<f64>>,
    live_heart_rate: Option<f64>,
    frame_time: Duration,
    peris: Vec<DeviceInfo>,
    active_device: Option<DeviceInfo>,
    app_config: AppConfig,
    config_path: PathBuf,
    show_overlay: bool,
}

impl MyApp {
    fn new(
        _cc: &eframe::CreationContext<'_>,
        rx_from_bthr: TokioReceiver<BthrSignal>,
        tx_to_hub: TokioSender<Command>,
        tx_to_session: TokioSender<GuiSignal>,
        app_config: AppConfig,
        config_path: PathBuf,
    ) -> Self {
        let mut app = MyApp {
            rx_from_bthr,
            tx_to_hub,
            tx_to_session,
            rx_widget: None,
            live_heart_rate: None,
            frame_time: Duration::from_secs_f64(1.0/MAX_FPS),
            peris: vec![],
            active_device: None,
            app_config,
            config_path,
            show_overlay: true,
        };
        app.attach_widget();
        app
    }

    fn send_to_hub(&self, command: Command) {
        let name = command.name();
        if let Err(e) = self.tx_to_hub.try_send(command) {
            tracing::warn!("Dropped {name} command: {e}");
        }
    }

    fn attach_widget(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.rx_widget = Some(rx);
        self.send_to_hub(Command::AttachWidget(Box::new(tx)));
    }

    fn detach_widget(&mut self) {
        self.rx_widget = None;
        self.live_heart_rate = None;
        self.send_to_hub(Command::DetachWidget);
    }

    fn apply_osc_settings(&mut self) {
        self.app_config.osc.enabled = true;
        let osc = &self.app_config.osc;
        self.send_to_hub(Command::Configure(ConfigureParams {
            host: Some(osc.host.clone()),
            port: Some(osc.port),
            max_heart_rate: Some(osc.max_heart_rate),
            ..Default::default()
        }));
        if let Err(e) = config::save_config(&self.app_config, &self.config_path) {
            tracing::warn!("Could not save settings to {:?}: {e:#}", self.config_path);
        }
    }

    fn read_channel(&mut self) {
        while let Ok(info) = self.rx_from_bthr.try_recv() {
            match info {
                BthrSignal::DiscoveredPeripherals(peris) => self.peris = peris,
                BthrSignal::ScanStarted => tracing::info!("Started scan..."),
                BthrSignal::ActiveDevice(device) => self.active_device = Some(device),
                BthrSignal::DeviceDisconnected => {
                    self.active_device = None;
                    self.live_heart_rate = None;
                }
            }
        }

        if let Some(rx_widget) = &mut self.rx_widget {
            while let Ok(heart_rate) = rx_widget.try_recv() {
                self.live_heart_rate = Some(heart_rate);
            }
        }
    }
}

impl eframe::App for MyApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.read_channel();

        let mut connect_to = None;
        let mut disconnect = false;
        let mut apply = false;
        let mut overlay_toggled = false;

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.show_overlay {
                ui.add(widget::get_heart_rate_label(self.live_heart_rate));
            }

            match &self.active_device {
                Some(device) => {
                    ui.horizontal(|ui| {
                        ui.add(widget::get_active_device_frame(&device.name));
                        disconnect = ui.add(widget::get_disconnect_device_button()).clicked();
                    });
                }
                None => {
                    for device in &self.peris {
                        if ui.add(widget::get_device_button(&device.name)).clicked() {
                            connect_to = Some(device.clone());
                        }
                    }
                }
            }

            ui.separator();
            ui.heading("OSC");
            ui.horizontal(|ui| {
                ui.label("Host");
                ui.text_edit_singleline(&mut self.app_config.osc.host);
            });
            ui.horizontal(|ui| {
                ui.label("Port");
                ui.add(egui::DragValue::new(&mut self.app_config.osc.port));
            });
            ui.horizontal(|ui| {
                ui.label("Max HR");
                ui.add(egui::DragValue::new(&mut self.app_config.osc.max_heart_rate));
            });
            apply = ui.button("Apply").clicked();

            ui.separator();
            overlay_toggled = ui.checkbox(&mut self.show_overlay, "Overlay").changed();
        });

        if let Some(device) = connect_to {
            tracing::info!("You clicked: {}", device.name);
            self.send_to_hub(Command::Connect(device));
        }
        if disconnect {
            if let Err(e) = self.tx_to_session.try_send(GuiSignal::DisconnectDevice) {
                tracing::warn!("Dropped disconnect request: {e}");
            }
        }
        if apply {
            self.apply_osc_settings();
        }
        if overlay_toggled {
            if self.show_overlay {
                self.attach_widget();
            } else {
                self.detach_widget();
            }
        }

        ctx.request_repaint_after(self.frame_time);
    }
}
