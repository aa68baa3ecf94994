use eframe::egui;
use widget_canvas::gui::CanvasApp;
use widget_canvas::logging;
use widget_canvas::settings::{self, Settings};

fn main() -> anyhow::Result<()> {
    let settings_path = settings::config_path("settings.json");
    let settings = Settings::load(&settings_path)?;
    logging::init(settings.debug_logging, settings.log_path());
    tracing::info!(path = %settings_path, "starting widget canvas");

    let (width, height) = settings.window_size;
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Widget Canvas")
            .with_inner_size([width as f32, height as f32])
            .with_min_inner_size([640.0, 480.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Widget Canvas",
        native_options,
        Box::new(move |_cc| Box::new(CanvasApp::new(settings))),
    )
    .map_err(|e| anyhow::anyhow!("failed to run the canvas window: {e}"))
}
