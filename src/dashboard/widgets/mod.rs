use crate::dashboard::model::{WidgetCategory, WidgetDefinition, WidgetPermission, WidgetSize};
use eframe::egui;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

mod pomodoro;

pub use pomodoro::{CompletedPomodoro, Phase, PomodoroConfig, PomodoroWidget};

/// Optional widget capabilities. The dashboard only invokes a hook when the
/// widget lists the matching capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Resize,
    SettingsChange,
    PermissionChange,
    State,
    ConfigValidation,
}

/// Widget trait implemented by all dashboard widgets.
pub trait Widget: Send {
    /// Static metadata for the widget type. Must not depend on instance state.
    fn definition(&self) -> WidgetDefinition;

    fn initialize(&mut self, config: Option<&Value>) -> anyhow::Result<()>;

    /// Populate the content area. The `Ui` is owned by the dashboard and is
    /// clipped to the widget's container.
    fn render(&mut self, ui: &mut egui::Ui) -> anyhow::Result<()>;

    fn update(&mut self);

    fn destroy(&mut self) -> anyhow::Result<()>;

    fn hooks(&mut self) -> Option<&mut dyn WidgetHooks> {
        None
    }
}

/// Optional callbacks. Every method defaults to a no-op.
pub trait WidgetHooks {
    fn capabilities(&self) -> &'static [Capability];

    fn on_resize(&mut self, _width: f32, _height: f32) {}

    fn on_settings_change(&mut self, _config: &Value) {}

    fn on_permission_change(&mut self, _permissions: &[WidgetPermission]) {}

    fn get_state(&self) -> Value {
        json!({})
    }

    fn set_state(&mut self, _state: &Value) {}

    fn validate_config(&self, _config: &Value) -> bool {
        true
    }
}

fn hooks_with(widget: &mut dyn Widget, cap: Capability) -> Option<&mut dyn WidgetHooks> {
    widget
        .hooks()
        .filter(|hooks| hooks.capabilities().contains(&cap))
}

pub fn supports(widget: &mut dyn Widget, cap: Capability) -> bool {
    hooks_with(widget, cap).is_some()
}

/// Forward a resize. Returns `false` when the widget has no resize hook.
pub fn notify_resize(widget: &mut dyn Widget, size: WidgetSize) -> bool {
    match hooks_with(widget, Capability::Resize) {
        Some(hooks) => {
            hooks.on_resize(size.width, size.height);
            true
        }
        None => false,
    }
}

pub fn notify_settings_change(widget: &mut dyn Widget, config: &Value) -> bool {
    match hooks_with(widget, Capability::SettingsChange) {
        Some(hooks) => {
            hooks.on_settings_change(config);
            true
        }
        None => false,
    }
}

pub fn notify_permission_change(widget: &mut dyn Widget, permissions: &[WidgetPermission]) -> bool {
    match hooks_with(widget, Capability::PermissionChange) {
        Some(hooks) => {
            hooks.on_permission_change(permissions);
            true
        }
        None => false,
    }
}

pub fn widget_state(widget: &mut dyn Widget) -> Value {
    hooks_with(widget, Capability::State)
        .map(|hooks| hooks.get_state())
        .unwrap_or_else(|| json!({}))
}

pub fn restore_state(widget: &mut dyn Widget, state: &Value) -> bool {
    match hooks_with(widget, Capability::State) {
        Some(hooks) => {
            hooks.set_state(state);
            true
        }
        None => false,
    }
}

pub fn accepts_config(widget: &mut dyn Widget, config: &Value) -> bool {
    hooks_with(widget, Capability::ConfigValidation)
        .map(|hooks| hooks.validate_config(config))
        .unwrap_or(true)
}

/// Validate `config` and hand it to the settings hook. Returns `false` when
/// validation rejects it.
pub fn apply_config(widget: &mut dyn Widget, config: &Value) -> bool {
    if !accepts_config(widget, config) {
        return false;
    }
    notify_settings_change(widget, config);
    true
}

type BuildFn = dyn Fn() -> anyhow::Result<Box<dyn Widget>> + Send + Sync;

/// Constructor for one widget type.
#[derive(Clone)]
pub struct WidgetFactory {
    ctor: Arc<BuildFn>,
}

impl WidgetFactory {
    pub fn new<T: Widget + 'static>(build: fn() -> T) -> Self {
        Self {
            ctor: Arc::new(move || -> anyhow::Result<Box<dyn Widget>> { Ok(Box::new(build())) }),
        }
    }

    pub fn fallible<F>(build: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Widget>> + Send + Sync + 'static,
    {
        Self {
            ctor: Arc::new(build),
        }
    }

    pub fn create(&self) -> anyhow::Result<Box<dyn Widget>> {
        (self.ctor)()
    }
}

struct RegisteredWidget {
    factory: WidgetFactory,
    definition: WidgetDefinition,
}

/// Catalogue of widget types keyed by definition id.
#[derive(Default)]
pub struct WidgetRegistry {
    map: HashMap<String, RegisteredWidget>,
}

impl WidgetRegistry {
    pub fn with_defaults() -> Self {
        let mut reg = Self::default();
        reg.register_widget(WidgetFactory::new(PomodoroWidget::default));
        reg
    }

    /// Build one throwaway instance to read the type's metadata, then store the
    /// factory under the definition id. Re-registering an id overwrites it.
    pub fn register_widget(&mut self, factory: WidgetFactory) -> Option<String> {
        let sample = match factory.create() {
            Ok(widget) => widget,
            Err(e) => {
                tracing::error!("failed to construct widget for registration: {e:#}");
                return None;
            }
        };
        let definition = sample.definition();
        let id = definition.id.clone();
        tracing::info!(widget = %id, "widget registered: {}", definition.name);
        self.map.insert(
            id.clone(),
            RegisteredWidget {
                factory,
                definition,
            },
        );
        Some(id)
    }

    pub fn unregister_widget(&mut self, widget_id: &str) -> bool {
        let removed = self.map.remove(widget_id).is_some();
        if removed {
            tracing::info!(widget = %widget_id, "widget unregistered");
        }
        removed
    }

    pub fn widget_definition(&self, widget_id: &str) -> Option<&WidgetDefinition> {
        self.map.get(widget_id).map(|w| &w.definition)
    }

    /// All definitions, sorted by id.
    pub fn all_widget_definitions(&self) -> Vec<WidgetDefinition> {
        let mut defs: Vec<WidgetDefinition> =
            self.map.values().map(|w| w.definition.clone()).collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    pub fn widgets_by_category(&self, category: WidgetCategory) -> Vec<WidgetDefinition> {
        let mut defs = self.all_widget_definitions();
        defs.retain(|d| d.category == category);
        defs
    }

    pub fn categories(&self) -> Vec<WidgetCategory> {
        let mut cats: Vec<WidgetCategory> = self.map.values().map(|w| w.definition.category).collect();
        cats.sort_by_key(|c| c.as_str());
        cats.dedup();
        cats
    }

    /// Construct a live widget. Unknown ids and failing constructors yield
    /// `None`. A config rejected by the widget's validation hook is ignored.
    pub fn create_widget_instance(
        &self,
        widget_id: &str,
        config: Option<&Value>,
    ) -> Option<Box<dyn Widget>> {
        let Some(entry) = self.map.get(widget_id) else {
            tracing::error!(widget = %widget_id, "widget not found");
            return None;
        };
        let mut widget = match entry.factory.create() {
            Ok(widget) => widget,
            Err(e) => {
                tracing::error!(widget = %widget_id, "failed to create widget instance: {e:#}");
                return None;
            }
        };
        if let Some(config) = config {
            if !apply_config(widget.as_mut(), config) {
                tracing::warn!(widget = %widget_id, "initial config rejected by widget");
            }
        }
        Some(widget)
    }

    pub fn has_widget(&self, widget_id: &str) -> bool {
        self.map.contains_key(widget_id)
    }

    pub fn widget_count(&self) -> usize {
        self.map.len()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// Shallow merge of two JSON objects; `updates` wins.
pub(crate) fn merge_json(base: &Value, updates: &Value) -> Value {
    match (base, updates) {
        (Value::Object(a), Value::Object(b)) => {
            let mut merged = a.clone();
            for (k, v) in b {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => updates.clone(),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::dashboard::model::WidgetCategory;

    #[test]
    fn merge_json_preserves_unknown_fields() {
        let base = json!({"known": 1, "extra": {"keep": true}});
        let updates = json!({"known": 2});
        let merged = merge_json(&base, &updates);
        assert_eq!(merged["known"], json!(2));
        assert_eq!(merged["extra"], json!({"keep": true}));
    }

    #[test]
    fn register_reads_definition_and_overwrites_silently() {
        let mut reg = registry_with(&[definition("clock")]);
        assert!(reg.has_widget("clock"));
        assert_eq!(reg.widget_count(), 1);

        let mut replacement = definition("clock");
        replacement.name = "Replaced".into();
        reg.register_widget(WidgetFactory::fallible(move || {
            Ok(Box::new(TestWidget::new(replacement.clone())) as Box<dyn Widget>)
        }));
        assert_eq!(reg.widget_count(), 1);
        assert_eq!(reg.widget_definition("clock").unwrap().name, "Replaced");
    }

    #[test]
    fn reads_on_missing_ids_are_empty() {
        let reg = WidgetRegistry::default();
        assert!(reg.widget_definition("nope").is_none());
        assert!(reg.all_widget_definitions().is_empty());
        assert!(reg.widgets_by_category(WidgetCategory::System).is_empty());
        assert!(reg.create_widget_instance("nope", None).is_none());
    }

    #[test]
    fn failing_constructor_is_not_fatal() {
        let mut reg = registry_with(&[definition("ok")]);
        assert!(reg
            .register_widget(WidgetFactory::fallible(|| anyhow::bail!("boom")))
            .is_none());
        assert_eq!(reg.widget_count(), 1);
    }

    #[test]
    fn filters_by_category() {
        let mut system = definition("sys");
        system.category = WidgetCategory::System;
        let reg = registry_with(&[definition("a"), system]);
        let found = reg.widgets_by_category(WidgetCategory::System);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "sys");
        assert_eq!(
            reg.categories(),
            vec![WidgetCategory::Display, WidgetCategory::System]
        );
    }

    #[test]
    fn initial_config_goes_through_validation() {
        let reg = registry_with(&[definition("a")]);
        let mut widget = reg
            .create_widget_instance("a", Some(&json!({"invalid": true})))
            .unwrap();
        assert_eq!(widget_state(widget.as_mut()), json!({}));
        assert!(supports(widget.as_mut(), Capability::Resize));
        assert!(!supports(widget.as_mut(), Capability::PermissionChange));
    }

    #[test]
    fn unregister_and_clear() {
        let mut reg = registry_with(&[definition("a"), definition("b")]);
        assert!(reg.unregister_widget("a"));
        assert!(!reg.unregister_widget("a"));
        assert_eq!(reg.widget_count(), 1);
        reg.clear();
        assert_eq!(reg.widget_count(), 0);
    }

    #[test]
    fn defaults_include_pomodoro() {
        let reg = WidgetRegistry::with_defaults();
        assert!(reg.has_widget(PomodoroWidget::ID));
    }
}
