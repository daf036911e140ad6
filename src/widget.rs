use eframe::egui::{Button, Color32, Label, RichText, Rounding};
use tokio::sync::mpsc::UnboundedSender;


/// Something that can display a live heart rate.
pub trait WidgetSurface: Send {
    /// Returns false once the surface is gone.
    fn post(&self, heart_rate_bpm: f64) -> bool;
}

impl WidgetSurface for UnboundedSender<f64> {
    fn post(&self, heart_rate_bpm: f64) -> bool {
        self.send(heart_rate_bpm).is_ok()
    }
}

/// Holds the overlay surface currently showing the live heart rate, if one is attached.
#[derive(Default)]
pub struct WidgetSink {
    surface: Option<Box<dyn WidgetSurface>>,
}

impl WidgetSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, surface: Box<dyn WidgetSurface>) {
        if self.surface.replace(surface).is_some() {
            tracing::debug!("Replaced attached widget");
        }
    }

    pub fn detach(&mut self) {
        self.surface = None;
    }

    pub fn is_attached(&self) -> bool {
        self.surface.is_some()
    }

    pub fn push(&mut self, heart_rate_bpm: f64) {
        let Some(surface) = &self.surface else { return; };
        if !surface.post(heart_rate_bpm) {
            tracing::debug!("Widget went away, detaching");
            self.surface = None;
        }
    }
}


fn styled(text: impl Into<String>, color: Color32, background: Option<Color32>, size: f32) -> RichText {
    let text = RichText::new(text).color(color).size(size);
    match background {
        Some(background) => text.background_color(background),
        None => text,
    }
}

fn rounded_button(text: RichText) -> Button<'static> {
    Button::new(text)
        .fill(Color32::BLUE)
        .rounding(Rounding::same(8.0))
}

fn heart_rate_text(heart_rate: Option<f64>) -> String {
    match heart_rate {
        Some(bpm) => format!("HR: {bpm:.0}"),
        None => "HR: --".to_string(),
    }
}

pub fn get_heart_rate_label(heart_rate: Option<f64>) -> Label {
    Label::new(styled(heart_rate_text(heart_rate), Color32::RED, Some(Color32::WHITE), 40.0))
}

pub fn get_device_button(device_name: &str) -> Button<'static> {
    rounded_button(styled(device_name, Color32::WHITE, None, 20.0)).selected(false)
}

pub fn get_active_device_frame(device_name: &str) -> Label {
    Label::new(styled(device_name, Color32::WHITE, Some(Color32::RED), 20.0))
}

pub fn get_disconnect_device_button() -> Button<'static> {
    rounded_button(styled("DC", Color32::RED, Some(Color32::WHITE), 20.0))
}
