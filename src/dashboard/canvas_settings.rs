use eframe::egui;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const GRID_SIZE_RANGE: std::ops::RangeInclusive<f32> = 12.0..=48.0;
pub const GRID_OPACITY_RANGE: std::ops::RangeInclusive<f32> = 0.01..=0.1;

fn default_background_color() -> String {
    "#fafafa".into()
}

fn default_grid_enabled() -> bool {
    true
}

fn default_grid_size() -> f32 {
    24.0
}

fn default_grid_opacity() -> f32 {
    0.02
}

/// Appearance and behaviour of the canvas surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSettings {
    #[serde(default = "default_background_color")]
    pub background_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_image: Option<PathBuf>,
    #[serde(default = "default_grid_enabled")]
    pub grid_enabled: bool,
    /// Spacing of the painted dot grid. Independent of the layout snap unit.
    #[serde(default = "default_grid_size")]
    pub grid_size: f32,
    #[serde(default = "default_grid_opacity")]
    pub grid_opacity: f32,
    #[serde(default)]
    pub always_on_top: bool,
    #[serde(default)]
    pub lock_widgets: bool,
    #[serde(default)]
    pub show_widget_outlines: bool,
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            background_color: default_background_color(),
            background_image: None,
            grid_enabled: default_grid_enabled(),
            grid_size: default_grid_size(),
            grid_opacity: default_grid_opacity(),
            always_on_top: false,
            lock_widgets: false,
            show_widget_outlines: false,
        }
    }
}

impl CanvasSettings {
    /// Background colour, falling back to the default on malformed input.
    pub fn background(&self) -> egui::Color32 {
        parse_hex_color(&self.background_color)
            .or_else(|| parse_hex_color(&default_background_color()))
            .unwrap_or(egui::Color32::WHITE)
    }

    pub fn grid_color(&self) -> egui::Color32 {
        let alpha = (self.grid_opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
        egui::Color32::from_black_alpha(alpha)
    }
}

/// Parse `#rrggbb` or `#rgb`.
pub fn parse_hex_color(text: &str) -> Option<egui::Color32> {
    let hex = text.trim().strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        6 => Some(egui::Color32::from_rgb(
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
        )),
        3 => {
            let c: Vec<u8> = hex
                .chars()
                .map(|ch| channel(&ch.to_string()).map(|v| v * 17))
                .collect::<Option<_>>()?;
            Some(egui::Color32::from_rgb(c[0], c[1], c[2]))
        }
        _ => None,
    }
}

pub fn to_hex_color(color: egui::Color32) -> String {
    format!("#{:02x}{:02x}{:02x}", color.r(), color.g(), color.b())
}

pub type SubscriptionId = u64;
type Listener = Box<dyn Fn(&CanvasSettings) + Send + Sync>;

/// Owns the current [`CanvasSettings`], persists every change and notifies
/// subscribers.
pub struct CanvasSettingsManager {
    path: Option<PathBuf>,
    settings: CanvasSettings,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: SubscriptionId,
}

impl Default for CanvasSettingsManager {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl CanvasSettingsManager {
    /// A manager that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            settings: CanvasSettings::default(),
            listeners: Vec::new(),
            next_id: 1,
        }
    }

    /// Load from `path`. Stored keys overlay the defaults; unreadable or
    /// malformed files fall back to the defaults.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let settings = match Self::read(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to load canvas settings: {e:#}");
                CanvasSettings::default()
            }
        };
        Self {
            path: Some(path),
            settings,
            ..Self::in_memory()
        }
    }

    fn read(path: &Path) -> anyhow::Result<CanvasSettings> {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(CanvasSettings::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn settings(&self) -> &CanvasSettings {
        &self.settings
    }

    pub fn update(&mut self, apply: impl FnOnce(&mut CanvasSettings)) {
        apply(&mut self.settings);
        self.settings.grid_size = self
            .settings
            .grid_size
            .clamp(*GRID_SIZE_RANGE.start(), *GRID_SIZE_RANGE.end());
        self.settings.grid_opacity = self.settings.grid_opacity.clamp(0.0, 1.0);
        self.commit();
    }

    pub fn reset(&mut self) {
        self.settings = CanvasSettings::default();
        self.commit();
    }

    fn commit(&mut self) {
        if let Err(e) = self.save() {
            tracing::error!("failed to save canvas settings: {e:#}");
        }
        for (_, listener) in &self.listeners {
            listener(&self.settings);
        }
    }

    pub fn subscribe(
        &mut self,
        listener: impl Fn(&CanvasSettings) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }
}

/// Editor for the canvas settings. Changes are applied through the manager.
pub fn settings_ui(ui: &mut egui::Ui, manager: &mut CanvasSettingsManager) {
    let mut draft = manager.settings().clone();
    let mut changed = false;

    ui.horizontal(|ui| {
        ui.label("Background Color");
        let mut color = draft.background();
        if ui.color_edit_button_srgba(&mut color).changed() {
            draft.background_color = to_hex_color(color);
            changed = true;
        }
    });
    changed |= ui.checkbox(&mut draft.grid_enabled, "Show Grid").changed();
    if draft.grid_enabled {
        changed |= ui
            .add(
                egui::Slider::new(&mut draft.grid_size, GRID_SIZE_RANGE)
                    .step_by(4.0)
                    .text("Grid Size"),
            )
            .changed();
        changed |= ui
            .add(egui::Slider::new(&mut draft.grid_opacity, GRID_OPACITY_RANGE).text("Grid Opacity"))
            .changed();
    }
    changed |= ui.checkbox(&mut draft.always_on_top, "Always on Top").changed();
    changed |= ui.checkbox(&mut draft.lock_widgets, "Lock Widgets").changed();
    changed |= ui
        .checkbox(&mut draft.show_widget_outlines, "Show Widget Outlines")
        .changed();

    if changed {
        manager.update(|s| *s = draft);
    }
    if ui.button("Reset to Defaults").clicked() {
        manager.reset();
    }
}
