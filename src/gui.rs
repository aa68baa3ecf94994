use crate::dashboard::{CanvasSettingsManager, Dashboard, DashboardState, WidgetRegistry};
use crate::settings::Settings;
use eframe::egui;

/// The eframe host: a menu bar over a full-window widget canvas.
pub struct CanvasApp {
    dashboard: Dashboard,
    settings: Settings,
    show_settings: bool,
    layout_name: String,
    window_on_top: Option<bool>,
    // The state file failed to parse at startup and must not be overwritten.
    keep_state_file: bool,
}

impl CanvasApp {
    /// Build the canvas with the default widget set and restore the state
    /// saved by the previous session.
    pub fn new(settings: Settings) -> Self {
        let canvas = CanvasSettingsManager::load(&settings.canvas_settings_file);
        let mut dashboard = Dashboard::new(WidgetRegistry::with_defaults(), settings.grid_size, canvas);
        let keep_state_file = match DashboardState::load(&settings.state_file, dashboard.registry()) {
            Ok(state) => {
                dashboard.restore_state(state);
                false
            }
            Err(e) => {
                tracing::error!(path = %settings.state_file, "failed to load dashboard state: {e:#}");
                true
            }
        };
        Self {
            dashboard,
            settings,
            show_settings: false,
            layout_name: String::new(),
            window_on_top: None,
            keep_state_file,
        }
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    pub fn dashboard_mut(&mut self) -> &mut Dashboard {
        &mut self.dashboard
    }

    /// Write the live canvas to the configured state file. Nothing is written
    /// when the file failed to load at startup.
    pub fn persist(&mut self) -> bool {
        if self.keep_state_file {
            tracing::warn!(path = %self.settings.state_file, "state file was unreadable, not overwriting it");
            return false;
        }
        let state = self.dashboard.capture_state();
        match state.save(&self.settings.state_file) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(path = %self.settings.state_file, "failed to save dashboard state: {e:#}");
                false
            }
        }
    }

    /// One frame of the whole window.
    pub fn draw(&mut self, ctx: &egui::Context) {
        self.apply_window_level(ctx);
        self.menu_bar(ctx);
        self.settings_window(ctx);
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| self.dashboard.ui(ui));
    }

    fn apply_window_level(&mut self, ctx: &egui::Context) {
        let on_top = self.dashboard.canvas_settings().settings().always_on_top;
        if self.window_on_top == Some(on_top) {
            return;
        }
        let level = if on_top {
            egui::WindowLevel::AlwaysOnTop
        } else {
            egui::WindowLevel::Normal
        };
        ctx.send_viewport_cmd(egui::ViewportCommand::WindowLevel(level));
        self.window_on_top = Some(on_top);
    }

    fn menu_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("Widgets", |ui| {
                    for def in self.dashboard.registry().all_widget_definitions() {
                        if ui.button(&def.name).on_hover_text(&def.description).clicked() {
                            self.dashboard.add_widget(&def.id);
                            ui.close_menu();
                        }
                    }
                    ui.separator();
                    if ui.button("Remove All").clicked() {
                        self.dashboard.clear();
                        ui.close_menu();
                    }
                });
                ui.menu_button("Layouts", |ui| self.layouts_menu(ui));
                if ui.button("Settings").clicked() {
                    self.show_settings = !self.show_settings;
                }
            });
        });
    }

    fn layouts_menu(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.text_edit_singleline(&mut self.layout_name);
            let name = self.layout_name.trim().to_string();
            if ui.add_enabled(!name.is_empty(), egui::Button::new("Save")).clicked() {
                self.dashboard.save_layout(&name);
                self.layout_name.clear();
            }
        });
        let names = self.dashboard.saved_layout_names();
        if names.is_empty() {
            ui.label("No saved layouts");
            return;
        }
        ui.separator();
        for name in names {
            ui.horizontal(|ui| {
                if ui.button(&name).clicked() {
                    self.dashboard.load_layout(&name);
                    ui.close_menu();
                }
                if ui.small_button("✕").on_hover_text("Delete layout").clicked() {
                    self.dashboard.delete_layout(&name);
                }
            });
        }
    }

    fn settings_window(&mut self, ctx: &egui::Context) {
        let mut open = self.show_settings;
        egui::Window::new("Canvas Settings")
            .open(&mut open)
            .resizable(false)
            .show(ctx, |ui| {
                crate::dashboard::canvas_settings::settings_ui(
                    ui,
                    self.dashboard.canvas_settings_mut(),
                );
            });
        self.show_settings = open;
    }
}

impl eframe::App for CanvasApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.draw(ctx);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.persist();
        self.dashboard.shutdown();
    }
}
