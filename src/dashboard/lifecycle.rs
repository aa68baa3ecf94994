//! Ownership of live widget instances.
//!
//! The manager keeps two maps keyed by instance id: the live [`Widget`]
//! object and the [`WidgetInstance`] record describing it. An id is present
//! in both or in neither.

use crate::dashboard::model::{WidgetInstance, WidgetPermission, WidgetPosition, WidgetSize};
use crate::dashboard::widgets::{
    accepts_config, merge_json, notify_permission_change, notify_resize, notify_settings_change,
    restore_state, widget_state, Widget, WidgetRegistry,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

const ID_SUFFIX_LEN: usize = 9;

/// Persistence envelope combining the instance record with the widget's own
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetStateSnapshot {
    #[serde(default)]
    pub instance_data: Option<WidgetInstance>,
    #[serde(default)]
    pub widget_state: Option<Value>,
}

#[derive(Default)]
pub struct WidgetLifecycleManager {
    instances: HashMap<String, Box<dyn Widget>>,
    instance_data: HashMap<String, WidgetInstance>,
    order: Vec<String>,
}

impl WidgetLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate `widget_id` and register it under a fresh instance id.
    ///
    /// Returns `None` if the type is unknown, construction fails, or the
    /// widget's `initialize` fails. Nothing is stored in those cases.
    pub fn create_widget(
        &mut self,
        registry: &WidgetRegistry,
        widget_id: &str,
        position: WidgetPosition,
        size: Option<WidgetSize>,
        config: Option<Value>,
    ) -> Option<String> {
        let Some(definition) = registry.widget_definition(widget_id).cloned() else {
            tracing::error!(widget = %widget_id, "widget definition not found");
            return None;
        };
        let Some(mut widget) = registry.create_widget_instance(widget_id, config.as_ref()) else {
            tracing::error!(widget = %widget_id, "failed to create widget instance");
            return None;
        };

        let instance_id = generate_instance_id(widget_id);
        let requested = size.unwrap_or(definition.default_size);
        if definition.is_below_min(requested) {
            tracing::warn!(widget = %widget_id, "widget size too small, using minimum size");
        }
        let final_size = definition.clamp_size(requested);

        if let Err(e) = widget.initialize(config.as_ref()) {
            tracing::error!(instance = %instance_id, "failed to initialize widget: {e:#}");
            return None;
        }

        let instance = WidgetInstance {
            definition,
            instance_id: instance_id.clone(),
            position,
            size: final_size,
            config: config.unwrap_or_else(|| json!({})),
            is_active: true,
        };
        self.instances.insert(instance_id.clone(), widget);
        self.instance_data.insert(instance_id.clone(), instance);
        self.order.push(instance_id.clone());
        tracing::info!(instance = %instance_id, widget = %widget_id, "widget instance created");
        Some(instance_id)
    }

    /// Destroy an instance. Errors from the widget's `destroy` are logged and
    /// never stop the removal. Unknown ids are ignored.
    pub fn destroy_widget(&mut self, instance_id: &str) {
        if let Some(mut widget) = self.instances.remove(instance_id) {
            if let Err(e) = widget.destroy() {
                tracing::error!(instance = %instance_id, "error destroying widget: {e:#}");
            }
        }
        if self.instance_data.remove(instance_id).is_some() {
            tracing::info!(instance = %instance_id, "widget instance destroyed");
        }
        self.order.retain(|id| id != instance_id);
    }

    pub fn get_widget(&self, instance_id: &str) -> Option<&dyn Widget> {
        self.instances.get(instance_id).map(|w| w.as_ref())
    }

    pub fn get_widget_mut(&mut self, instance_id: &str) -> Option<&mut (dyn Widget + 'static)> {
        self.instances.get_mut(instance_id).map(|w| w.as_mut())
    }

    pub fn get_widget_instance_data(&self, instance_id: &str) -> Option<&WidgetInstance> {
        self.instance_data.get(instance_id)
    }

    /// All instance records in creation order.
    pub fn get_all_instances(&self) -> Vec<WidgetInstance> {
        self.order
            .iter()
            .filter_map(|id| self.instance_data.get(id))
            .cloned()
            .collect()
    }

    pub fn get_active_instances(&self) -> Vec<WidgetInstance> {
        let mut all = self.get_all_instances();
        all.retain(|i| i.is_active);
        all
    }

    pub fn instance_ids(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.instances.contains_key(instance_id)
    }

    /// Mark an instance inactive. The widget itself is not notified.
    pub fn pause_widget(&mut self, instance_id: &str) -> bool {
        self.set_active(instance_id, false)
    }

    pub fn resume_widget(&mut self, instance_id: &str) -> bool {
        self.set_active(instance_id, true)
    }

    fn set_active(&mut self, instance_id: &str, active: bool) -> bool {
        match self.instance_data.get_mut(instance_id) {
            Some(data) => {
                data.is_active = active;
                tracing::info!(
                    instance = %instance_id,
                    "widget {}",
                    if active { "resumed" } else { "paused" }
                );
                true
            }
            None => false,
        }
    }

    pub fn update_widget_position(&mut self, instance_id: &str, position: WidgetPosition) -> bool {
        match self.instance_data.get_mut(instance_id) {
            Some(data) => {
                data.position = position;
                true
            }
            None => false,
        }
    }

    /// Clamp `size` to the type's bounds, store it and forward the clamped
    /// value to the widget's resize hook. Returns the stored size.
    pub fn update_widget_size(
        &mut self,
        registry: &WidgetRegistry,
        instance_id: &str,
        size: WidgetSize,
    ) -> Option<WidgetSize> {
        let data = self.instance_data.get_mut(instance_id)?;
        let widget = self.instances.get_mut(instance_id)?;
        let Some(definition) = registry.widget_definition(data.widget_id()) else {
            tracing::warn!(instance = %instance_id, "size update for unregistered widget type");
            return None;
        };
        let clamped = definition.clamp_size(size);
        data.size = clamped;
        notify_resize(widget.as_mut(), clamped);
        Some(clamped)
    }

    /// Merge `updates` into the instance configuration if the widget accepts
    /// it, then fire the settings hook with the merged result.
    pub fn update_widget_config(&mut self, instance_id: &str, updates: &Value) -> bool {
        let (Some(data), Some(widget)) = (
            self.instance_data.get_mut(instance_id),
            self.instances.get_mut(instance_id),
        ) else {
            return false;
        };
        if !accepts_config(widget.as_mut(), updates) {
            tracing::warn!(instance = %instance_id, "config update rejected by widget");
            return false;
        }
        data.config = merge_json(&data.config, updates);
        notify_settings_change(widget.as_mut(), &data.config);
        true
    }

    pub fn update_widget_permissions(
        &mut self,
        instance_id: &str,
        permissions: Vec<WidgetPermission>,
    ) -> bool {
        let (Some(data), Some(widget)) = (
            self.instance_data.get_mut(instance_id),
            self.instances.get_mut(instance_id),
        ) else {
            return false;
        };
        data.definition.permissions = permissions;
        notify_permission_change(widget.as_mut(), &data.definition.permissions);
        true
    }

    pub fn get_widget_state(&mut self, instance_id: &str) -> Option<WidgetStateSnapshot> {
        let data = self.instance_data.get(instance_id)?;
        let widget = self.instances.get_mut(instance_id)?;
        Some(WidgetStateSnapshot {
            instance_data: Some(data.clone()),
            widget_state: Some(widget_state(widget.as_mut())),
        })
    }

    /// Restore a snapshot onto a live instance.
    ///
    /// Only position, config and the active flag are taken from the snapshot
    /// record. The definition stays the one registered for the live widget's
    /// type and the snapshot size is clamped to it before the resize hook
    /// fires.
    pub fn set_widget_state(
        &mut self,
        registry: &WidgetRegistry,
        instance_id: &str,
        state: WidgetStateSnapshot,
    ) -> bool {
        let (Some(data), Some(widget)) = (
            self.instance_data.get_mut(instance_id),
            self.instances.get_mut(instance_id),
        ) else {
            return false;
        };
        if let Some(widget_state) = &state.widget_state {
            restore_state(widget.as_mut(), widget_state);
        }
        let Some(saved) = state.instance_data else {
            return true;
        };
        if saved.widget_id() != data.widget_id() {
            tracing::warn!(
                instance = %instance_id,
                "snapshot for '{}' applied to '{}', keeping live definition",
                saved.widget_id(),
                data.widget_id()
            );
        }
        if let Some(definition) = registry.widget_definition(data.widget_id()) {
            data.definition = definition.clone();
        }
        data.position = saved.position;
        data.config = saved.config;
        data.is_active = saved.is_active;
        let size = data.definition.clamp_size(saved.size);
        if size != data.size {
            data.size = size;
            notify_resize(widget.as_mut(), size);
        }
        true
    }

    /// Tick every active widget once.
    pub fn update_active(&mut self) {
        for id in &self.order {
            let active = self.instance_data.get(id).map_or(false, |d| d.is_active);
            if let (true, Some(widget)) = (active, self.instances.get_mut(id)) {
                widget.update();
            }
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Destroy every instance.
    pub fn clear(&mut self) {
        let ids: Vec<String> = self.order.clone();
        for id in ids {
            self.destroy_widget(&id);
        }
    }
}

/// `{widget_id}-{millis}-{9 base36 chars}`.
pub fn generate_instance_id(widget_id: &str) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    let millis = chrono::Utc::now().timestamp_millis();
    format!("{widget_id}-{millis}-{suffix}")
}
