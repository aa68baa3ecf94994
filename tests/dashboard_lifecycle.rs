use eframe::egui;
use serde_json::{json, Value};
use widget_canvas::dashboard::{
    CanvasSettingsManager, Dashboard, WidgetCategory, WidgetDefinition, WidgetFactory,
    WidgetLifecycleManager, WidgetPosition, WidgetRegistry, WidgetSize,
};
use widget_canvas::dashboard::layout::{check_overlap, DashboardLayout};
use widget_canvas::dashboard::widgets::{PomodoroWidget, Widget};

struct Note {
    text: String,
}

impl Widget for Note {
    fn definition(&self) -> WidgetDefinition {
        WidgetDefinition {
            id: "note".into(),
            name: "Note".into(),
            description: "A sticky note".into(),
            version: "1.0.0".into(),
            author: "tests".into(),
            category: WidgetCategory::System,
            min_size: WidgetSize::new(300.0, 200.0),
            max_size: None,
            default_size: WidgetSize::new(400.0, 300.0),
            preferred_aspect_ratio: None,
            permissions: Vec::new(),
            settings: None,
        }
    }

    fn initialize(&mut self, config: Option<&Value>) -> anyhow::Result<()> {
        if let Some(text) = config.and_then(|c| c.get("text")).and_then(Value::as_str) {
            self.text = text.to_string();
        }
        Ok(())
    }

    fn render(&mut self, ui: &mut egui::Ui) -> anyhow::Result<()> {
        ui.label(&self.text);
        Ok(())
    }

    fn update(&mut self) {}

    fn destroy(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn registry() -> WidgetRegistry {
    let mut registry = WidgetRegistry::with_defaults();
    registry.register_widget(WidgetFactory::new(|| Note {
        text: String::new(),
    }));
    registry
}

#[test]
fn too_small_request_is_clamped_to_minimum() {
    let registry = registry();
    let mut lifecycle = WidgetLifecycleManager::new();
    let id = lifecycle
        .create_widget(
            &registry,
            "note",
            WidgetPosition::new(0.0, 0.0),
            Some(WidgetSize::new(100.0, 100.0)),
            None,
        )
        .unwrap();
    let data = lifecycle.get_widget_instance_data(&id).unwrap();
    assert_eq!(data.size, WidgetSize::new(300.0, 200.0));
    assert!(data.is_active);
    assert_eq!(data.config, json!({}));
}

#[test]
fn widgets_added_at_origin_never_overlap() {
    let mut layout = DashboardLayout::new(10.0);
    for i in 0..3 {
        layout.add_widget(widget_canvas::dashboard::WidgetLayoutItem::new(
            format!("w{i}"),
            "note",
            WidgetPosition::new(0.0, 0.0),
            WidgetSize::new(200.0, 150.0),
        ));
    }
    let items = layout.get_layout();
    assert_eq!(items.len(), 3);
    for (i, a) in items.iter().enumerate() {
        for b in &items[i + 1..] {
            assert!(!check_overlap(a, b), "{} overlaps {}", a.instance_id, b.instance_id);
        }
    }
}

#[test]
fn brought_forward_widget_paints_last() {
    let mut d = Dashboard::new(registry(), 10.0, CanvasSettingsManager::in_memory());
    let a = d.add_widget("note").unwrap();
    let b = d.add_widget("note").unwrap();
    assert_eq!(d.layout().get_layout().last().unwrap().instance_id, b);
    d.bring_to_front(&a);
    assert_eq!(d.layout().get_layout().last().unwrap().instance_id, a);
    d.send_to_back(&a);
    assert_eq!(d.layout().get_layout().first().unwrap().instance_id, a);
}

#[test]
fn saved_layout_restores_removed_widget() {
    let mut d = Dashboard::new(registry(), 10.0, CanvasSettingsManager::in_memory());
    let a = d.add_widget("note").unwrap();
    let b = d.add_widget("note").unwrap();
    let before: Vec<_> = d
        .layout()
        .get_layout()
        .into_iter()
        .map(|i| (i.position, i.size))
        .collect();
    d.save_layout("L1");
    d.remove_widget(&b);
    assert_eq!(d.lifecycle().instance_count(), 1);

    assert!(d.load_layout("L1"));
    let after: Vec<_> = d
        .layout()
        .get_layout()
        .into_iter()
        .map(|i| (i.position, i.size))
        .collect();
    assert_eq!(after, before);
    assert_eq!(d.lifecycle().instance_count(), 2);
    assert!(d.lifecycle().contains(&a));
    assert_eq!(d.saved_layout_names(), vec!["L1".to_string()]);
}

#[test]
fn pomodoro_is_registered_with_locked_ratio() {
    let registry = registry();
    let def = registry.widget_definition(PomodoroWidget::ID).unwrap();
    assert_eq!(def.category, WidgetCategory::Interactive);
    assert!(def.locked_ratio().is_some());
    assert_eq!(
        registry.categories(),
        vec![WidgetCategory::Interactive, WidgetCategory::System]
    );

    let mut d = Dashboard::new(registry, 10.0, CanvasSettingsManager::in_memory());
    let id = d.add_widget(PomodoroWidget::ID).unwrap();
    let size = d.layout().get_widget_layout(&id).unwrap().size;
    assert!(size.width >= 400.0 && size.width <= 600.0);
    assert!(size.height >= 400.0 && size.height <= 700.0);
}
