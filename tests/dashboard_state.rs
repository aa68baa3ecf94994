use eframe::egui;
use serde_json::json;
use tempfile::tempdir;
use widget_canvas::dashboard::widgets::PomodoroWidget;
use widget_canvas::dashboard::{DashboardState, WidgetRegistry};
use widget_canvas::gui::CanvasApp;
use widget_canvas::settings::Settings;

fn settings_in(dir: &std::path::Path) -> Settings {
    Settings {
        state_file: dir.join("dashboard.json").to_string_lossy().into_owned(),
        canvas_settings_file: dir.join("canvas.json").to_string_lossy().into_owned(),
        ..Settings::default()
    }
}

fn run_frame(app: &mut CanvasApp, ctx: &egui::Context) {
    let _ = ctx.run(egui::RawInput::default(), |ctx| app.draw(ctx));
}

#[test]
fn pomodoro_state_survives_restart() {
    let dir = tempdir().unwrap();
    let ctx = egui::Context::default();

    let mut app = CanvasApp::new(settings_in(dir.path()));
    assert_eq!(app.dashboard().lifecycle().instance_count(), 0);
    let id = app.dashboard_mut().add_widget(PomodoroWidget::ID).unwrap();
    assert!(app
        .dashboard_mut()
        .lifecycle_mut()
        .update_widget_config(&id, &json!({"dailyGoal": 4})));
    app.dashboard_mut().save_layout("focus");
    run_frame(&mut app, &ctx);
    assert!(app.persist());

    let state =
        DashboardState::load(dir.path().join("dashboard.json"), &WidgetRegistry::with_defaults())
            .unwrap();
    assert_eq!(state.items.len(), 1);
    assert!(state.saved_layouts.contains_key("focus"));

    let mut restored = CanvasApp::new(settings_in(dir.path()));
    run_frame(&mut restored, &ctx);
    let dashboard = restored.dashboard_mut();
    assert_eq!(dashboard.lifecycle().instance_count(), 1);
    let item = dashboard.layout().get_layout().pop().unwrap();
    assert_eq!(item.widget_id, PomodoroWidget::ID);
    let snapshot = dashboard.lifecycle_mut().get_widget_state(&item.instance_id).unwrap();
    assert_eq!(snapshot.widget_state.unwrap()["dailyGoal"], json!(4));
    assert_eq!(dashboard.saved_layout_names(), vec!["focus".to_string()]);
}

#[test]
fn unknown_widget_in_state_file_is_skipped() {
    let dir = tempdir().unwrap();
    let state = json!({
        "version": 1,
        "items": [{
            "instanceId": "gone-1",
            "widgetId": "retired-widget",
            "position": {"x": 0.0, "y": 0.0},
            "size": {"width": 300.0, "height": 200.0},
            "zIndex": 1
        }]
    });
    std::fs::write(dir.path().join("dashboard.json"), state.to_string()).unwrap();

    let app = CanvasApp::new(settings_in(dir.path()));
    assert!(app.dashboard().layout().is_empty());
    assert_eq!(app.dashboard().lifecycle().instance_count(), 0);
}

#[test]
fn unreadable_state_file_is_not_overwritten() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dashboard.json");
    std::fs::write(&path, "{\"version\": 1, \"items\": [").unwrap();

    let mut app = CanvasApp::new(settings_in(dir.path()));
    assert_eq!(app.dashboard().lifecycle().instance_count(), 0);
    app.dashboard_mut().add_widget(PomodoroWidget::ID).unwrap();
    assert!(!app.persist());
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "{\"version\": 1, \"items\": ["
    );
}

#[test]
fn canvas_settings_file_is_used() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("canvas.json"), r#"{"lockWidgets": true}"#).unwrap();
    let app = CanvasApp::new(settings_in(dir.path()));
    assert!(app.dashboard().canvas_settings().settings().lock_widgets);
}
