use super::{Capability, Widget, WidgetHooks};
use crate::dashboard::lifecycle::generate_instance_id;
use crate::dashboard::model::{
    PermissionType, SettingKind, WidgetAspectRatio, WidgetCategory, WidgetDefinition,
    WidgetPermission, WidgetSetting, WidgetSize,
};
use crate::dashboard::widgets::merge_json;
use chrono::{Local, TimeZone};
use eframe::egui;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// Work sessions completed before a long break is due.
const POMODOROS_PER_LONG_BREAK: usize = 4;

fn default_pomodoro_length() -> u32 {
    25
}

fn default_short_break() -> u32 {
    5
}

fn default_long_break() -> u32 {
    15
}

fn default_daily_goal() -> u32 {
    8
}

fn default_icon() -> String {
    "🍎".into()
}

/// User settings, durations in minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroConfig {
    #[serde(default = "default_pomodoro_length")]
    pub pomodoro_length: u32,
    #[serde(default = "default_short_break")]
    pub short_break: u32,
    #[serde(default = "default_long_break")]
    pub long_break: u32,
    #[serde(default = "default_daily_goal")]
    pub daily_goal: u32,
    #[serde(default = "default_icon")]
    pub pomodoro_icon: String,
}

impl Default for PomodoroConfig {
    fn default() -> Self {
        Self {
            pomodoro_length: default_pomodoro_length(),
            short_break: default_short_break(),
            long_break: default_long_break(),
            daily_goal: default_daily_goal(),
            pomodoro_icon: default_icon(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPomodoro {
    pub id: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    /// Seconds.
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub committed: bool,
}

impl CompletedPomodoro {
    fn is_today(&self) -> bool {
        Local
            .timestamp_millis_opt(self.timestamp)
            .single()
            .map(|t| t.date_naive() == Local::now().date_naive())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Work,
    ShortBreak,
    LongBreak,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Work => "Focus",
            Phase::ShortBreak => "Short break",
            Phase::LongBreak => "Long break",
        }
    }
}

pub struct PomodoroWidget {
    cfg: PomodoroConfig,
    phase: Phase,
    seconds_left: u32,
    running: bool,
    last_tick: Option<Instant>,
    carry: Duration,
    completed: Vec<CompletedPomodoro>,
    comment: String,
    compact: bool,
}

impl Default for PomodoroWidget {
    fn default() -> Self {
        let cfg = PomodoroConfig::default();
        let seconds_left = cfg.pomodoro_length * 60;
        Self {
            cfg,
            phase: Phase::Work,
            seconds_left,
            running: false,
            last_tick: None,
            carry: Duration::ZERO,
            completed: Vec::new(),
            comment: String::new(),
            compact: false,
        }
    }
}

impl PomodoroWidget {
    pub const ID: &'static str = "pomodoro-timer";

    pub fn config(&self) -> &PomodoroConfig {
        &self.cfg
    }

    pub fn seconds_left(&self) -> u32 {
        self.seconds_left
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn completed(&self) -> &[CompletedPomodoro] {
        &self.completed
    }

    fn phase_length(&self, phase: Phase) -> u32 {
        let minutes = match phase {
            Phase::Work => self.cfg.pomodoro_length,
            Phase::ShortBreak => self.cfg.short_break,
            Phase::LongBreak => self.cfg.long_break,
        };
        minutes.max(1) * 60
    }

    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.last_tick = Some(Instant::now());
        tracing::debug!(phase = ?self.phase, "pomodoro started");
    }

    pub fn pause(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.last_tick = None;
        self.carry = Duration::ZERO;
    }

    pub fn reset(&mut self) {
        self.pause();
        self.seconds_left = self.phase_length(self.phase);
    }

    /// Count the clock down by `elapsed`, carrying sub-second remainders.
    pub fn advance(&mut self, elapsed: Duration) {
        if !self.running {
            return;
        }
        self.carry += elapsed;
        while self.running && self.carry >= Duration::from_secs(1) {
            self.carry -= Duration::from_secs(1);
            self.seconds_left = self.seconds_left.saturating_sub(1);
            if self.seconds_left == 0 {
                self.finish_phase();
            }
        }
    }

    fn finish_phase(&mut self) {
        self.pause();
        let next = match self.phase {
            Phase::Work => {
                self.completed.push(CompletedPomodoro {
                    id: generate_instance_id("pomodoro"),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                    duration: self.phase_length(Phase::Work),
                    comment: None,
                    committed: false,
                });
                tracing::info!("Pomodoro completed! Take a break.");
                if self.completed.len() % POMODOROS_PER_LONG_BREAK == 0 {
                    Phase::LongBreak
                } else {
                    Phase::ShortBreak
                }
            }
            Phase::ShortBreak | Phase::LongBreak => {
                tracing::info!("break finished");
                Phase::Work
            }
        };
        self.phase = next;
        self.seconds_left = self.phase_length(next);
    }

    /// Today's completed pomodoros as `(committed, uncommitted)`.
    pub fn today_counts(&self) -> (usize, usize) {
        self.completed
            .iter()
            .filter(|p| p.is_today())
            .fold((0, 0), |(c, u), p| {
                if p.committed {
                    (c + 1, u)
                } else {
                    (c, u + 1)
                }
            })
    }

    /// Mark every uncommitted pomodoro as committed, attaching `comment`.
    pub fn commit_pending(&mut self, comment: &str) -> usize {
        let comment = comment.trim();
        let mut count = 0;
        for p in self.completed.iter_mut().filter(|p| !p.committed) {
            p.committed = true;
            if !comment.is_empty() {
                p.comment = Some(comment.to_string());
            }
            count += 1;
        }
        count
    }

    fn format_clock(secs: u32) -> String {
        format!("{}:{:02}", secs / 60, secs % 60)
    }

    fn number_setting(id: &str, label: &str, description: &str, default: u32, min: f64, max: f64) -> WidgetSetting {
        WidgetSetting {
            id: id.into(),
            kind: SettingKind::Number,
            label: label.into(),
            description: Some(description.into()),
            default: json!(default),
            min: Some(min),
            max: Some(max),
            options: Vec::new(),
        }
    }

    fn settings_schema() -> Vec<WidgetSetting> {
        vec![
            Self::number_setting(
                "pomodoroLength",
                "Pomodoro Length (minutes)",
                "Duration of work sessions",
                default_pomodoro_length(),
                1.0,
                60.0,
            ),
            Self::number_setting(
                "shortBreak",
                "Short Break (minutes)",
                "Duration of short breaks",
                default_short_break(),
                1.0,
                30.0,
            ),
            Self::number_setting(
                "longBreak",
                "Long Break (minutes)",
                "Duration of long breaks (after 4 pomodoros)",
                default_long_break(),
                5.0,
                60.0,
            ),
            Self::number_setting(
                "dailyGoal",
                "Daily Goal",
                "Target number of pomodoros per day",
                default_daily_goal(),
                1.0,
                20.0,
            ),
            WidgetSetting {
                id: "pomodoroIcon".into(),
                kind: SettingKind::Text,
                label: "Pomodoro Icon".into(),
                description: Some("Emoji to represent completed pomodoros".into()),
                default: json!(default_icon()),
                min: None,
                max: None,
                options: Vec::new(),
            },
        ]
    }

    fn progress_ui(&self, ui: &mut egui::Ui) {
        let (committed, pending) = self.today_counts();
        let goal = self.cfg.daily_goal.max(1) as usize;
        let fraction = (committed as f32 / goal as f32).min(1.0);
        ui.add(
            egui::ProgressBar::new(fraction)
                .text(format!("Daily Progress: {committed}/{}", self.cfg.daily_goal)),
        );
        ui.horizontal_wrapped(|ui| {
            let icon = &self.cfg.pomodoro_icon;
            let empty = goal.saturating_sub(committed + pending);
            for _ in 0..committed {
                ui.label(egui::RichText::new(icon).strong());
            }
            for _ in 0..pending {
                ui.label(egui::RichText::new(icon).weak());
            }
            for _ in 0..empty {
                ui.label(egui::RichText::new(icon).weak().strikethrough());
            }
        });
    }
}

impl Widget for PomodoroWidget {
    fn definition(&self) -> WidgetDefinition {
        WidgetDefinition {
            id: Self::ID.into(),
            name: "Pomodoro Timer".into(),
            description: "Full-featured Pomodoro timer with settings and history".into(),
            version: "1.0.0".into(),
            author: "An Apple A Day".into(),
            category: WidgetCategory::Interactive,
            min_size: WidgetSize::new(400.0, 400.0),
            max_size: Some(WidgetSize::new(600.0, 700.0)),
            default_size: WidgetSize::new(450.0, 500.0),
            preferred_aspect_ratio: Some(WidgetAspectRatio {
                width: 100.0,
                height: 55.0,
                locked: true,
            }),
            permissions: vec![WidgetPermission {
                kind: PermissionType::Notification,
                scope: "timer-alerts".into(),
                description: "Show notifications when timer completes".into(),
            }],
            settings: Some(Self::settings_schema()),
        }
    }

    fn initialize(&mut self, config: Option<&Value>) -> anyhow::Result<()> {
        if let Some(config) = config {
            let merged = merge_json(&serde_json::to_value(&self.cfg)?, config);
            self.cfg = serde_json::from_value(merged)?;
        }
        self.seconds_left = self.phase_length(self.phase);
        Ok(())
    }

    fn render(&mut self, ui: &mut egui::Ui) -> anyhow::Result<()> {
        let clock_size = if self.compact { 36.0 } else { 56.0 };
        ui.vertical_centered(|ui| {
            ui.label(egui::RichText::new(self.phase.label()).small());
            ui.label(
                egui::RichText::new(Self::format_clock(self.seconds_left))
                    .size(clock_size)
                    .monospace(),
            );
            ui.horizontal(|ui| {
                if ui.add_enabled(!self.running, egui::Button::new("Start")).clicked() {
                    self.start();
                }
                if ui.add_enabled(self.running, egui::Button::new("Pause")).clicked() {
                    self.pause();
                }
                if ui.button("Reset").clicked() {
                    self.reset();
                }
            });
        });
        ui.separator();
        self.progress_ui(ui);

        let (_, pending) = self.today_counts();
        if pending > 0 {
            ui.horizontal(|ui| {
                ui.text_edit_singleline(&mut self.comment);
                if ui.small_button("Commit").clicked() {
                    let comment = std::mem::take(&mut self.comment);
                    self.commit_pending(&comment);
                }
            });
        }

        if self.running {
            ui.ctx().request_repaint_after(Duration::from_millis(250));
        }
        Ok(())
    }

    fn update(&mut self) {
        let Some(last) = self.last_tick else {
            return;
        };
        let now = Instant::now();
        self.last_tick = Some(now);
        self.advance(now.duration_since(last));
    }

    fn destroy(&mut self) -> anyhow::Result<()> {
        self.pause();
        Ok(())
    }

    fn hooks(&mut self) -> Option<&mut dyn WidgetHooks> {
        Some(self)
    }
}

impl WidgetHooks for PomodoroWidget {
    fn capabilities(&self) -> &'static [Capability] {
        &[
            Capability::Resize,
            Capability::SettingsChange,
            Capability::State,
            Capability::ConfigValidation,
        ]
    }

    fn on_resize(&mut self, _width: f32, height: f32) {
        self.compact = height < 450.0;
    }

    fn on_settings_change(&mut self, config: &Value) {
        let merged = match serde_json::to_value(&self.cfg) {
            Ok(current) => merge_json(&current, config),
            Err(_) => config.clone(),
        };
        match serde_json::from_value::<PomodoroConfig>(merged) {
            Ok(cfg) => {
                self.cfg = cfg;
                if !self.running {
                    self.seconds_left = self.phase_length(self.phase);
                }
            }
            Err(e) => tracing::warn!("ignoring pomodoro settings: {e}"),
        }
    }

    fn get_state(&self) -> Value {
        json!({
            "timerLength": self.phase_length(Phase::Work),
            "secondsLeft": self.seconds_left,
            "isRunning": self.running,
            "phase": self.phase,
            "completedPomodoros": self.completed,
            "dailyGoal": self.cfg.daily_goal,
            "pomodoroIcon": self.cfg.pomodoro_icon,
        })
    }

    fn set_state(&mut self, state: &Value) {
        if let Some(len) = state.get("timerLength").and_then(Value::as_u64) {
            self.cfg.pomodoro_length = ((len / 60) as u32).max(1);
        }
        if let Some(goal) = state.get("dailyGoal").and_then(Value::as_u64) {
            self.cfg.daily_goal = goal as u32;
        }
        if let Some(icon) = state.get("pomodoroIcon").and_then(Value::as_str) {
            self.cfg.pomodoro_icon = icon.to_string();
        }
        if let Some(phase) = state
            .get("phase")
            .and_then(|v| serde_json::from_value::<Phase>(v.clone()).ok())
        {
            self.phase = phase;
        }
        if let Some(list) = state
            .get("completedPomodoros")
            .and_then(|v| serde_json::from_value::<Vec<CompletedPomodoro>>(v.clone()).ok())
        {
            self.completed = list;
        }
        if let Some(left) = state.get("secondsLeft").and_then(Value::as_u64) {
            if left > 0 {
                self.seconds_left = left as u32;
            }
        }
        match state.get("isRunning").and_then(Value::as_bool) {
            Some(true) => self.start(),
            Some(false) => self.pause(),
            None => {}
        }
    }

    /// Every recognised key must match its schema entry's type and bounds.
    fn validate_config(&self, config: &Value) -> bool {
        let Some(map) = config.as_object() else {
            return false;
        };
        Self::settings_schema().iter().all(|setting| {
            let Some(value) = map.get(&setting.id) else {
                return true;
            };
            match setting.kind {
                SettingKind::Number => value.as_f64().is_some_and(|n| {
                    setting.min.map_or(true, |min| n >= min)
                        && setting.max.map_or(true, |max| n <= max)
                }),
                SettingKind::Text => value.as_str().is_some_and(|s| !s.is_empty()),
                _ => true,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(minutes: u32) -> PomodoroWidget {
        let mut w = PomodoroWidget::default();
        w.initialize(Some(&json!({ "pomodoroLength": minutes })))
            .unwrap();
        w.start();
        w
    }

    #[test]
    fn definition_matches_registered_shape() {
        let def = PomodoroWidget::default().definition();
        assert_eq!(def.id, PomodoroWidget::ID);
        assert_eq!(def.min_size, WidgetSize::new(400.0, 400.0));
        assert_eq!(def.max_size, Some(WidgetSize::new(600.0, 700.0)));
        assert!((def.locked_ratio().unwrap() - 100.0 / 55.0).abs() < 1e-6);
        assert_eq!(def.settings.unwrap().len(), 5);
    }

    #[test]
    fn countdown_carries_partial_seconds() {
        let mut w = running(1);
        w.advance(Duration::from_millis(600));
        assert_eq!(w.seconds_left(), 60);
        w.advance(Duration::from_millis(600));
        assert_eq!(w.seconds_left(), 59);
    }

    #[test]
    fn finishing_work_records_pomodoro_and_switches_to_break() {
        let mut w = running(1);
        w.advance(Duration::from_secs(60));
        assert!(!w.is_running());
        assert_eq!(w.phase(), Phase::ShortBreak);
        assert_eq!(w.seconds_left(), 5 * 60);
        assert_eq!(w.completed().len(), 1);
        assert_eq!(w.completed()[0].duration, 60);
        assert_eq!(w.today_counts(), (0, 1));
    }

    #[test]
    fn fourth_pomodoro_earns_long_break() {
        let mut w = PomodoroWidget::default();
        for i in 0..4 {
            w.phase = Phase::Work;
            w.seconds_left = 1;
            w.start();
            w.advance(Duration::from_secs(1));
            let expected = if i == 3 { Phase::LongBreak } else { Phase::ShortBreak };
            assert_eq!(w.phase(), expected);
        }
    }

    #[test]
    fn pause_stops_the_clock_and_reset_restores_length() {
        let mut w = running(2);
        w.advance(Duration::from_secs(5));
        w.pause();
        w.advance(Duration::from_secs(5));
        assert_eq!(w.seconds_left(), 115);
        w.reset();
        assert_eq!(w.seconds_left(), 120);
    }

    #[test]
    fn commit_marks_pending_with_comment() {
        let mut w = running(1);
        w.advance(Duration::from_secs(60));
        assert_eq!(w.commit_pending("  writing  "), 1);
        assert_eq!(w.today_counts(), (1, 0));
        assert_eq!(w.completed()[0].comment.as_deref(), Some("writing"));
        assert_eq!(w.commit_pending(""), 0);
    }

    #[test]
    fn validation_uses_schema_bounds() {
        let w = PomodoroWidget::default();
        assert!(w.validate_config(&json!({ "pomodoroLength": 30 })));
        assert!(!w.validate_config(&json!({ "pomodoroLength": 0 })));
        assert!(!w.validate_config(&json!({ "longBreak": "long" })));
        assert!(!w.validate_config(&json!({ "pomodoroIcon": "" })));
        assert!(w.validate_config(&json!({ "unknown": true })));
        assert!(!w.validate_config(&json!(5)));
    }

    #[test]
    fn settings_change_resets_idle_clock_only() {
        let mut w = PomodoroWidget::default();
        w.on_settings_change(&json!({ "pomodoroLength": 10 }));
        assert_eq!(w.seconds_left(), 600);
        w.start();
        w.on_settings_change(&json!({ "pomodoroLength": 20 }));
        assert_eq!(w.seconds_left(), 600);
        assert_eq!(w.config().pomodoro_length, 20);
        assert_eq!(w.config().daily_goal, 8);
    }

    #[test]
    fn state_round_trips() {
        let mut source = running(1);
        source.advance(Duration::from_secs(60));
        source.seconds_left = 42;
        let state = source.get_state();

        let mut restored = PomodoroWidget::default();
        restored.set_state(&state);
        assert_eq!(restored.seconds_left(), 42);
        assert_eq!(restored.phase(), Phase::ShortBreak);
        assert_eq!(restored.completed(), source.completed());
        assert!(!restored.is_running());
        assert_eq!(restored.get_state(), state);
    }

    #[test]
    fn renders_without_error() {
        let mut w = running(1);
        egui::__run_test_ui(|ui| {
            w.render(ui).unwrap();
        });
    }
}
