use crate::dashboard::lifecycle::WidgetStateSnapshot;
use crate::dashboard::model::WidgetLayoutItem;
use crate::dashboard::widgets::WidgetRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const STATE_VERSION: u32 = 1;

fn default_version() -> u32 {
    STATE_VERSION
}

/// Everything needed to rebuild the canvas on the next start.
///
/// Instance ids in the file are only keys tying `items`, `saved_layouts`
/// and `widget_states` together; restoring assigns fresh ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub items: Vec<WidgetLayoutItem>,
    #[serde(default)]
    pub saved_layouts: BTreeMap<String, Vec<WidgetLayoutItem>>,
    #[serde(default)]
    pub widget_states: BTreeMap<String, WidgetStateSnapshot>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            items: Vec::new(),
            saved_layouts: BTreeMap::new(),
            widget_states: BTreeMap::new(),
        }
    }
}

impl DashboardState {
    /// Load state from disk. A missing or empty file yields an empty state.
    /// Items whose widget type is not registered are dropped.
    pub fn load(path: impl AsRef<Path>, registry: &WidgetRegistry) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut state: DashboardState = serde_json::from_str(&content)?;
        for w in state.sanitize(registry) {
            tracing::warn!("{w}");
        }
        Ok(state)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Remove unknown widget types and orphaned widget states.
    pub fn sanitize(&mut self, registry: &WidgetRegistry) -> Vec<String> {
        let mut warnings = Vec::new();
        self.items.retain(|item| {
            if registry.has_widget(&item.widget_id) {
                return true;
            }
            tracing::warn!(widget = %item.widget_id, "unknown dashboard widget dropped");
            warnings.push(format!("unknown dashboard widget '{}' dropped", item.widget_id));
            false
        });
        for items in self.saved_layouts.values_mut() {
            items.retain(|item| registry.has_widget(&item.widget_id));
        }
        let live: Vec<&str> = self.items.iter().map(|i| i.instance_id.as_str()).collect();
        let saved: Vec<&str> = self
            .saved_layouts
            .values()
            .flatten()
            .map(|i| i.instance_id.as_str())
            .collect();
        self.widget_states
            .retain(|id, _| live.contains(&id.as_str()) || saved.contains(&id.as_str()));
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::model::{WidgetPosition, WidgetSize};
    use crate::dashboard::widgets::test_support::{definition, registry_with};
    use serde_json::json;

    fn item(id: &str, widget: &str) -> WidgetLayoutItem {
        WidgetLayoutItem::new(
            id,
            widget,
            WidgetPosition::new(0.0, 0.0),
            WidgetSize::new(300.0, 200.0),
        )
    }

    #[test]
    fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_with(&[definition("clock")]);
        let state = DashboardState::load(dir.path().join("none.json"), &registry).unwrap();
        assert_eq!(state, DashboardState::default());
    }

    #[test]
    fn unknown_widgets_and_orphan_states_are_dropped() {
        let registry = registry_with(&[definition("clock")]);
        let mut state = DashboardState {
            items: vec![item("a", "clock"), item("b", "gone")],
            ..DashboardState::default()
        };
        state.widget_states.insert(
            "b".into(),
            WidgetStateSnapshot {
                instance_data: None,
                widget_state: Some(json!({"x": 1})),
            },
        );
        let warnings = state.sanitize(&registry);
        assert_eq!(warnings.len(), 1);
        assert_eq!(state.items.len(), 1);
        assert!(state.widget_states.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("dashboard.json");
        let registry = registry_with(&[definition("clock")]);
        let mut state = DashboardState::default();
        state.items.push(item("a", "clock"));
        state.saved_layouts.insert("L1".into(), vec![item("a", "clock")]);
        state.save(&path).unwrap();

        let loaded = DashboardState::load(&path, &registry).unwrap();
        assert_eq!(loaded, state);
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get("savedLayouts").is_some());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.json");
        std::fs::write(&path, "[1, 2").unwrap();
        let registry = registry_with(&[]);
        assert!(DashboardState::load(&path, &registry).is_err());
    }
}
