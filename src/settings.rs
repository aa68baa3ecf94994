use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const APP_DIR: &str = "widget_canvas";

fn default_window_size() -> (i32, i32) {
    (1280, 800)
}

fn default_grid_size() -> f32 {
    crate::dashboard::layout::DEFAULT_GRID_SIZE
}

fn default_state_file() -> String {
    config_path("dashboard.json")
}

fn default_canvas_settings_file() -> String {
    config_path("canvas.json")
}

/// Platform config directory for this application, or the working directory
/// when none is available.
pub fn config_dir() -> PathBuf {
    dirs_next::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_path(file: &str) -> String {
    config_dir().join(file).to_string_lossy().into_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Enable debug level logging. `RUST_LOG` overrides the level when set.
    #[serde(default)]
    pub debug_logging: bool,
    /// Also write log output to this file.
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default = "default_window_size")]
    pub window_size: (i32, i32),
    /// Layout snap unit in pixels.
    #[serde(default = "default_grid_size")]
    pub grid_size: f32,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_canvas_settings_file")]
    pub canvas_settings_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_logging: false,
            log_file: None,
            window_size: default_window_size(),
            grid_size: default_grid_size(),
            state_file: default_state_file(),
            canvas_settings_file: default_canvas_settings_file(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        if let Some(parent) = std::path::Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
    }
}
