use crate::dashboard::canvas_settings::CanvasSettingsManager;
use crate::dashboard::config::{DashboardState, STATE_VERSION};
use crate::dashboard::interaction::{Commit, InteractionState, SizeObserver};
use crate::dashboard::layout::DashboardLayout;
use crate::dashboard::lifecycle::{WidgetLifecycleManager, WidgetStateSnapshot};
use crate::dashboard::model::{WidgetInstance, WidgetLayoutItem, WidgetPosition, WidgetSize};
use crate::dashboard::sizing::{correct_to_ratio, fit_to_grid, initial_placement, matches_ratio};
use crate::dashboard::widgets::WidgetRegistry;
use eframe::egui;
use std::collections::{BTreeMap, HashMap, HashSet};

const HEADER_HEIGHT: f32 = 24.0;
const HANDLE_SIZE: f32 = 14.0;
const BODY_MARGIN: f32 = 6.0;
const CORNER_RADIUS: f32 = 6.0;
/// Canvas size assumed until the first frame has been laid out.
const FALLBACK_CANVAS: WidgetSize = WidgetSize::new(1200.0, 800.0);

#[derive(Default)]
struct ContainerEvents {
    close: bool,
    bring_to_front: bool,
    send_to_back: bool,
    toggle_pause: bool,
    drag_from: Option<egui::Pos2>,
    resize_from: Option<egui::Pos2>,
}

/// The widget canvas: composes the registry, the lifecycle manager and the
/// layout, and turns pointer input into drag/resize commits.
///
/// Every instance id present in the lifecycle manager is present in the
/// layout and the other way round.
pub struct Dashboard {
    registry: WidgetRegistry,
    lifecycle: WidgetLifecycleManager,
    layout: DashboardLayout,
    interaction: InteractionState,
    observers: HashMap<String, SizeObserver>,
    canvas: CanvasSettingsManager,
    canvas_size: Option<WidgetSize>,
    context_menu: Option<WidgetPosition>,
    render_errors: HashSet<String>,
}

impl Dashboard {
    pub fn new(registry: WidgetRegistry, grid_size: f32, canvas: CanvasSettingsManager) -> Self {
        Self {
            registry,
            lifecycle: WidgetLifecycleManager::new(),
            layout: DashboardLayout::new(grid_size),
            interaction: InteractionState::default(),
            observers: HashMap::new(),
            canvas,
            canvas_size: None,
            context_menu: None,
            render_errors: HashSet::new(),
        }
    }

    pub fn registry(&self) -> &WidgetRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut WidgetRegistry {
        &mut self.registry
    }

    pub fn lifecycle(&self) -> &WidgetLifecycleManager {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut WidgetLifecycleManager {
        &mut self.lifecycle
    }

    pub fn layout(&self) -> &DashboardLayout {
        &self.layout
    }

    pub fn canvas_settings(&self) -> &CanvasSettingsManager {
        &self.canvas
    }

    pub fn canvas_settings_mut(&mut self) -> &mut CanvasSettingsManager {
        &mut self.canvas
    }

    pub fn interaction(&self) -> &InteractionState {
        &self.interaction
    }

    pub fn canvas_size(&self) -> WidgetSize {
        self.canvas_size.unwrap_or(FALLBACK_CANVAS)
    }

    /// Record the canvas size. A change after the first measurement re-feeds
    /// every container through the external resize path.
    pub fn set_canvas_size(&mut self, size: WidgetSize) {
        match self.canvas_size {
            Some(prev) if prev == size => {}
            Some(_) => self.on_canvas_resized(size),
            None => self.canvas_size = Some(size),
        }
    }

    pub fn on_canvas_resized(&mut self, size: WidgetSize) {
        tracing::debug!("canvas resized to {}x{}", size.width, size.height);
        self.canvas_size = Some(size);
        for item in self.layout.get_layout() {
            if self.interaction.active_instance() == Some(item.instance_id.as_str()) {
                continue;
            }
            self.observe_container(&item);
        }
    }

    /// Add an instance of `widget_id` sized and centered for the current
    /// canvas. Returns the new instance id.
    pub fn add_widget(&mut self, widget_id: &str) -> Option<String> {
        let Some(definition) = self.registry.widget_definition(widget_id).cloned() else {
            tracing::warn!(widget = %widget_id, "cannot add unknown widget");
            return None;
        };
        let placement = initial_placement(&definition, self.canvas_size());
        let instance_id = self.lifecycle.create_widget(
            &self.registry,
            widget_id,
            placement.position,
            Some(placement.size),
            None,
        )?;
        let size = self
            .lifecycle
            .get_widget_instance_data(&instance_id)
            .map_or(placement.size, |d| d.size);
        let position = self.layout.add_widget(WidgetLayoutItem::new(
            &instance_id,
            widget_id,
            placement.position,
            size,
        ));
        self.lifecycle.update_widget_position(&instance_id, position);
        self.mount(&instance_id);
        Some(instance_id)
    }

    /// Tear down an instance. Returns `false` if the id was unknown.
    pub fn remove_widget(&mut self, instance_id: &str) -> bool {
        if self.interaction.active_instance() == Some(instance_id) {
            self.interaction.cancel();
        }
        self.observers.remove(instance_id);
        self.render_errors.remove(instance_id);
        let known = self.lifecycle.contains(instance_id) || self.layout.contains(instance_id);
        self.lifecycle.destroy_widget(instance_id);
        self.layout.remove_widget(instance_id);
        known
    }

    /// Destroy every instance and drop the live layout. Saved layouts stay.
    pub fn clear(&mut self) {
        self.interaction.cancel();
        self.observers.clear();
        self.render_errors.clear();
        self.lifecycle.clear();
        self.layout.clear();
    }

    pub fn bring_to_front(&mut self, instance_id: &str) -> Option<u32> {
        self.layout.bring_to_front(instance_id)
    }

    pub fn send_to_back(&mut self, instance_id: &str) -> Option<u32> {
        self.layout.send_to_back(instance_id)
    }

    /// Header press at canvas-local `pointer`.
    pub fn begin_drag(&mut self, instance_id: &str, pointer: WidgetPosition) -> bool {
        if self.canvas.settings().lock_widgets {
            return false;
        }
        let Some(origin) = self.layout.get_widget_layout(instance_id).map(|i| i.position) else {
            return false;
        };
        if !self.interaction.begin_drag(instance_id, pointer, origin) {
            return false;
        }
        self.layout.bring_to_front(instance_id);
        true
    }

    /// Corner-handle press at canvas-local `pointer`.
    pub fn begin_resize(&mut self, instance_id: &str, pointer: WidgetPosition) -> bool {
        if self.canvas.settings().lock_widgets {
            return false;
        }
        let Some(item) = self.layout.get_widget_layout(instance_id) else {
            return false;
        };
        let locked_ratio = self
            .registry
            .widget_definition(&item.widget_id)
            .and_then(|d| d.locked_ratio());
        if !self
            .interaction
            .begin_resize(instance_id, pointer, item.size, locked_ratio)
        {
            return false;
        }
        if let Some(observer) = self.observers.get_mut(instance_id) {
            observer.set_enforce_ratio(false);
        }
        true
    }

    pub fn pointer_moved(&mut self, pointer: WidgetPosition) {
        self.interaction.handle_move(pointer);
    }

    pub fn on_frame(&mut self) {
        self.interaction.on_frame();
    }

    pub fn pointer_released(&mut self, pointer: WidgetPosition) {
        match self.interaction.handle_left_up(pointer) {
            Some(Commit::Move {
                instance_id,
                position,
            }) => self.commit_position(&instance_id, position),
            Some(Commit::Resize { instance_id, size }) => {
                self.commit_size(&instance_id, size);
                if let Some(observer) = self.observers.get_mut(&instance_id) {
                    observer.set_enforce_ratio(true);
                }
            }
            None => {}
        }
    }

    /// Abort the current drag or resize without committing anything.
    pub fn cancel_interaction(&mut self) {
        if let Some(id) = self.interaction.cancel() {
            if let Some(observer) = self.observers.get_mut(&id) {
                observer.set_enforce_ratio(true);
            }
        }
    }

    /// Escape closes the context menu and cancels any interaction.
    pub fn handle_escape(&mut self) {
        self.cancel_interaction();
        self.close_context_menu();
    }

    fn commit_position(&mut self, instance_id: &str, position: WidgetPosition) {
        let Some(snapped) = self.layout.move_widget(instance_id, position) else {
            tracing::warn!(instance = %instance_id, "move for unknown widget");
            return;
        };
        self.lifecycle.update_widget_position(instance_id, snapped);
        self.rebase_observer(instance_id);
    }

    fn commit_size(&mut self, instance_id: &str, size: WidgetSize) -> Option<WidgetSize> {
        let widget_id = self.layout.get_widget_layout(instance_id)?.widget_id.clone();
        let fitted = match self.registry.widget_definition(&widget_id) {
            Some(definition) => self.layout.resize_widget_within(instance_id, size, definition)?,
            None => self.layout.resize_widget(instance_id, size)?,
        };
        let stored = self
            .lifecycle
            .update_widget_size(&self.registry, instance_id, fitted);
        self.rebase_observer(instance_id);
        stored
    }

    /// Size change reported by a container's observer.
    pub fn on_external_resize(&mut self, instance_id: &str, measured: WidgetSize) {
        let Some(item) = self.layout.get_widget_layout(instance_id) else {
            return;
        };
        let enforce = self
            .observers
            .get(instance_id)
            .map_or(true, SizeObserver::enforces_ratio);
        let ratio = self
            .registry
            .widget_definition(&item.widget_id)
            .and_then(|d| d.locked_ratio());
        let size = match ratio {
            Some(ratio) if enforce && !matches_ratio(measured, ratio) => {
                correct_to_ratio(measured, ratio)
            }
            _ => measured,
        };
        self.commit_size(instance_id, size);
    }

    /// Visible part of a container, clipped to the canvas.
    fn measured_size(&self, item: &WidgetLayoutItem) -> WidgetSize {
        let canvas = self.canvas_size();
        WidgetSize::new(
            (item.right().min(canvas.width) - item.position.x).max(0.0),
            (item.bottom().min(canvas.height) - item.position.y).max(0.0),
        )
    }

    fn mount(&mut self, instance_id: &str) {
        if let Some(item) = self.layout.get_widget_layout(instance_id).cloned() {
            self.observe_container(&item);
        }
    }

    fn observe_container(&mut self, item: &WidgetLayoutItem) {
        let measured = self.measured_size(item);
        let changed = self
            .observers
            .entry(item.instance_id.clone())
            .or_default()
            .observe(measured);
        if let Some(size) = changed {
            self.on_external_resize(&item.instance_id, size);
        }
    }

    fn rebase_observer(&mut self, instance_id: &str) {
        let Some(item) = self.layout.get_widget_layout(instance_id) else {
            return;
        };
        let measured = self.measured_size(item);
        if let Some(observer) = self.observers.get_mut(instance_id) {
            observer.rebase(measured);
        }
    }

    /// Apply a persisted snapshot to a live instance.
    pub fn set_widget_state(&mut self, instance_id: &str, state: WidgetStateSnapshot) -> bool {
        self.lifecycle
            .set_widget_state(&self.registry, instance_id, state)
    }

    pub fn save_layout(&mut self, name: &str) {
        self.layout.save_layout(name);
    }

    /// Replace the live layout with a saved one, creating instances for
    /// entries that have none and destroying instances the layout no longer
    /// mentions.
    pub fn load_layout(&mut self, name: &str) -> bool {
        self.interaction.cancel();
        if !self.layout.load_layout(name) {
            return false;
        }
        let remap = self.reconcile();
        self.remap_saved_layouts(&remap);
        true
    }

    pub fn delete_layout(&mut self, name: &str) -> bool {
        self.layout.delete_saved_layout(name)
    }

    pub fn saved_layout_names(&self) -> Vec<String> {
        self.layout.get_saved_layout_names()
    }

    /// Bring the lifecycle in line with the live layout. Returns the ids
    /// given to recreated instances, keyed by the id the layout held.
    fn reconcile(&mut self) -> HashMap<String, String> {
        let mut rebuilt = Vec::new();
        let mut remap = HashMap::new();
        let mut changed = false;
        let grid = self.layout.grid_size();
        for mut item in self.layout.get_layout() {
            let id = item.instance_id.clone();
            if self.lifecycle.contains(&id) {
                self.lifecycle.update_widget_position(&id, item.position);
                let current = self.lifecycle.get_widget_instance_data(&id).map(|d| d.size);
                if current != Some(item.size) {
                    if let Some(fitted) = self.commit_size(&id, item.size) {
                        item.size = fitted;
                    }
                }
                rebuilt.push(item);
                continue;
            }
            changed = true;
            if let Some(definition) = self.registry.widget_definition(&item.widget_id) {
                item.size = fit_to_grid(definition, item.size, grid);
            }
            match self.lifecycle.create_widget(
                &self.registry,
                &item.widget_id,
                item.position,
                Some(item.size),
                item.config.clone(),
            ) {
                Some(new_id) => {
                    remap.insert(id, new_id.clone());
                    item.instance_id = new_id;
                    rebuilt.push(item);
                }
                None => {
                    tracing::warn!(widget = %item.widget_id, "could not recreate widget from layout");
                }
            }
        }

        let keep: HashSet<&str> = rebuilt.iter().map(|i| i.instance_id.as_str()).collect();
        let stale: Vec<String> = self
            .lifecycle
            .instance_ids()
            .filter(|id| !keep.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            changed = true;
            self.observers.remove(&id);
            self.render_errors.remove(&id);
            self.lifecycle.destroy_widget(&id);
        }

        if changed {
            let ids: Vec<String> = rebuilt.iter().map(|i| i.instance_id.clone()).collect();
            self.layout.set_layout(rebuilt);
            self.observers.retain(|id, _| ids.contains(id));
        }
        for id in self.layout.get_layout().into_iter().map(|i| i.instance_id) {
            self.rebase_or_mount(&id);
        }
        remap
    }

    /// Point saved layout entries at the ids their instances now carry.
    fn remap_saved_layouts(&mut self, remap: &HashMap<String, String>) {
        if remap.is_empty() {
            return;
        }
        let saved = self
            .layout
            .saved_layouts()
            .iter()
            .map(|(name, list)| {
                let list = list
                    .iter()
                    .cloned()
                    .map(|mut i| {
                        if let Some(id) = remap.get(&i.instance_id) {
                            i.instance_id = id.clone();
                        }
                        i
                    })
                    .collect();
                (name.clone(), list)
            })
            .collect();
        self.layout.set_saved_layouts(saved);
    }

    fn rebase_or_mount(&mut self, instance_id: &str) {
        if self.observers.contains_key(instance_id) {
            self.rebase_observer(instance_id);
        } else {
            self.mount(instance_id);
        }
    }

    /// Snapshot of the live canvas for persistence.
    pub fn capture_state(&mut self) -> DashboardState {
        let items = self.layout.get_layout();
        let mut widget_states = BTreeMap::new();
        for item in &items {
            if let Some(snapshot) = self.lifecycle.get_widget_state(&item.instance_id) {
                widget_states.insert(item.instance_id.clone(), snapshot);
            }
        }
        DashboardState {
            version: STATE_VERSION,
            items,
            saved_layouts: self.layout.saved_layouts().clone(),
            widget_states,
        }
    }

    /// Rebuild the canvas from `state`, replacing whatever is live. Returns
    /// the number of instances restored.
    pub fn restore_state(&mut self, state: DashboardState) -> usize {
        self.clear();
        let mut remap: HashMap<String, String> = HashMap::new();
        let mut items = Vec::with_capacity(state.items.len());

        for mut item in state.items {
            let snapshot = state.widget_states.get(&item.instance_id);
            let config = snapshot
                .and_then(|s| s.instance_data.as_ref())
                .map(|d| d.config.clone())
                .or_else(|| item.config.clone());
            let Some(new_id) = self.lifecycle.create_widget(
                &self.registry,
                &item.widget_id,
                item.position,
                Some(item.size),
                config,
            ) else {
                tracing::warn!(widget = %item.widget_id, "could not restore widget");
                continue;
            };
            if let Some(snapshot) = snapshot {
                let fresh = self.lifecycle.get_widget_instance_data(&new_id).cloned();
                let instance_data = fresh.map(|fresh| match &snapshot.instance_data {
                    Some(saved) => WidgetInstance {
                        config: saved.config.clone(),
                        is_active: saved.is_active,
                        ..fresh
                    },
                    None => fresh,
                });
                self.lifecycle.set_widget_state(
                    &self.registry,
                    &new_id,
                    WidgetStateSnapshot {
                        instance_data,
                        widget_state: snapshot.widget_state.clone(),
                    },
                );
            }
            remap.insert(item.instance_id.clone(), new_id.clone());
            item.instance_id = new_id;
            items.push(item);
        }

        let restored = items.len();
        self.layout.set_layout(items);
        self.layout.set_saved_layouts(state.saved_layouts);
        self.remap_saved_layouts(&remap);
        for id in self.layout.get_layout().into_iter().map(|i| i.instance_id) {
            self.mount(&id);
        }
        tracing::info!("restored {restored} widget(s)");
        restored
    }

    pub fn open_context_menu(&mut self, at: WidgetPosition) {
        self.context_menu = Some(at);
    }

    pub fn close_context_menu(&mut self) {
        self.context_menu = None;
    }

    pub fn context_menu_open(&self) -> bool {
        self.context_menu.is_some()
    }

    pub fn has_render_error(&self, instance_id: &str) -> bool {
        self.render_errors.contains(instance_id)
    }

    /// Draw the canvas into the remaining space of `ui` and process input.
    pub fn ui(&mut self, ui: &mut egui::Ui) {
        self.lifecycle.update_active();

        let canvas = ui.available_rect_before_wrap();
        let response = ui.allocate_rect(canvas, egui::Sense::click());
        self.set_canvas_size(WidgetSize::new(canvas.width(), canvas.height()));
        self.paint_background(ui, canvas);
        self.handle_input(ui, canvas);

        let mut canvas_ui = ui.child_ui(canvas, egui::Layout::top_down(egui::Align::LEFT));
        canvas_ui.set_clip_rect(canvas.intersect(ui.clip_rect()));

        let mut pending: Vec<(String, ContainerEvents)> = Vec::new();
        for item in self.layout.get_layout() {
            if !self.observers.contains_key(&item.instance_id) {
                self.observe_container(&item);
            }
            let events = self.render_container(&mut canvas_ui, canvas, &item);
            pending.push((item.instance_id, events));
        }
        self.apply_container_events(pending, canvas);

        if response.secondary_clicked() {
            if let Some(pos) = response.interact_pointer_pos() {
                self.open_context_menu(to_local(pos, canvas));
            }
        }
        self.context_menu_ui(ui, canvas);

        if self.interaction.phase().is_active() {
            ui.ctx().request_repaint();
        }
    }

    fn paint_background(&self, ui: &egui::Ui, canvas: egui::Rect) {
        let settings = self.canvas.settings();
        let painter = ui.painter_at(canvas);
        painter.rect_filled(canvas, 0.0, settings.background());
        if !settings.grid_enabled || settings.grid_size < 1.0 {
            return;
        }
        let color = settings.grid_color();
        let step = settings.grid_size;
        let mut y = canvas.min.y + step / 2.0;
        while y < canvas.max.y {
            let mut x = canvas.min.x + step / 2.0;
            while x < canvas.max.x {
                painter.circle_filled(egui::pos2(x, y), 1.0, color);
                x += step;
            }
            y += step;
        }
    }

    fn handle_input(&mut self, ui: &egui::Ui, canvas: egui::Rect) {
        let (hover, released, escape) = ui.input(|i| {
            (
                i.pointer.hover_pos(),
                i.pointer.any_released(),
                i.key_pressed(egui::Key::Escape),
            )
        });
        if escape {
            self.handle_escape();
        }
        if self.interaction.phase().is_active() {
            match hover {
                None => self.cancel_interaction(),
                Some(pos) if released => self.pointer_released(to_local(pos, canvas)),
                Some(pos) => self.pointer_moved(to_local(pos, canvas)),
            }
        }
        self.on_frame();
    }

    fn render_container(
        &mut self,
        ui: &mut egui::Ui,
        canvas: egui::Rect,
        item: &WidgetLayoutItem,
    ) -> ContainerEvents {
        let id = item.instance_id.as_str();
        let position = self.interaction.visual_position(id).unwrap_or(item.position);
        let size = self.interaction.visual_size(id).unwrap_or(item.size);
        let rect = egui::Rect::from_min_size(
            canvas.min + egui::vec2(position.x, position.y),
            egui::vec2(size.width, size.height),
        );
        let clip = rect.intersect(ui.clip_rect());
        let mut events = ContainerEvents::default();
        if !clip.is_positive() {
            return events;
        }

        let settings = self.canvas.settings();
        let locked = settings.lock_widgets;
        let outlined = settings.show_widget_outlines || self.interaction.active_instance() == Some(id);
        let (title, active) = self
            .lifecycle
            .get_widget_instance_data(id)
            .map(|d| (d.definition.name.clone(), d.is_active))
            .unwrap_or_else(|| (item.widget_id.clone(), true));
        let visuals = ui.visuals().clone();
        let egui_id = egui::Id::new(("widget-container", id));
        let painter = ui.painter_at(clip);

        painter.rect_filled(rect, CORNER_RADIUS, visuals.window_fill);
        let stroke = if outlined {
            visuals.selection.stroke
        } else {
            visuals.window_stroke
        };
        painter.rect_stroke(rect, CORNER_RADIUS, stroke);

        let header_rect =
            egui::Rect::from_min_size(rect.min, egui::vec2(rect.width(), HEADER_HEIGHT.min(rect.height())));
        let sense = if locked {
            egui::Sense::click()
        } else {
            egui::Sense::click_and_drag()
        };
        let header = ui.interact(header_rect.intersect(clip), egui_id.with("header"), sense);
        let label = if active {
            title
        } else {
            format!("{title} (paused)")
        };
        painter.text(
            header_rect.left_center() + egui::vec2(BODY_MARGIN, 0.0),
            egui::Align2::LEFT_CENTER,
            label,
            egui::FontId::proportional(14.0),
            visuals.text_color(),
        );
        if header.drag_started() {
            events.drag_from = header.interact_pointer_pos();
        }
        header.context_menu(|ui| {
            if ui.button("Bring to Front").clicked() {
                events.bring_to_front = true;
                ui.close_menu();
            }
            if ui.button("Send to Back").clicked() {
                events.send_to_back = true;
                ui.close_menu();
            }
            if ui.button(if active { "Pause" } else { "Resume" }).clicked() {
                events.toggle_pause = true;
                ui.close_menu();
            }
            if ui.button("Remove").clicked() {
                events.close = true;
                ui.close_menu();
            }
        });

        let close_rect = egui::Rect::from_min_size(
            egui::pos2(header_rect.max.x - HEADER_HEIGHT, header_rect.min.y),
            egui::vec2(HEADER_HEIGHT, header_rect.height()),
        );
        if ui
            .put(close_rect, egui::Button::new("✕").frame(false))
            .on_hover_text("Remove widget")
            .clicked()
        {
            events.close = true;
        }

        let body_rect = egui::Rect::from_min_max(
            egui::pos2(rect.min.x, header_rect.max.y),
            rect.max,
        )
        .shrink(BODY_MARGIN);
        if body_rect.is_positive() {
            let mut body = ui.child_ui(body_rect, egui::Layout::top_down(egui::Align::LEFT));
            body.set_clip_rect(body_rect.intersect(clip));
            if let Some(widget) = self.lifecycle.get_widget_mut(id) {
                match widget.render(&mut body) {
                    Ok(()) => {
                        self.render_errors.remove(id);
                    }
                    Err(e) => {
                        if self.render_errors.insert(id.to_string()) {
                            tracing::error!(instance = %id, "error rendering widget: {e:#}");
                        }
                        body.colored_label(
                            visuals.error_fg_color,
                            format!("Error rendering widget: {e}"),
                        );
                    }
                }
            }
        }

        if !locked {
            let handle_rect = egui::Rect::from_min_max(
                rect.max - egui::vec2(HANDLE_SIZE, HANDLE_SIZE),
                rect.max,
            );
            let handle = ui.interact(handle_rect, egui_id.with("resize"), egui::Sense::drag());
            if handle.hovered() || handle.dragged() {
                ui.ctx().set_cursor_icon(egui::CursorIcon::ResizeNwSe);
            }
            if handle.drag_started() {
                events.resize_from = handle.interact_pointer_pos();
            }
            let grip = egui::Stroke::new(1.0, visuals.weak_text_color());
            for offset in [4.0, 8.0, 12.0] {
                painter.line_segment(
                    [
                        egui::pos2(rect.max.x - offset, rect.max.y - 2.0),
                        egui::pos2(rect.max.x - 2.0, rect.max.y - offset),
                    ],
                    grip,
                );
            }
        }

        events
    }

    fn apply_container_events(&mut self, pending: Vec<(String, ContainerEvents)>, canvas: egui::Rect) {
        for (id, events) in pending {
            if events.close {
                self.remove_widget(&id);
                continue;
            }
            if events.bring_to_front {
                self.bring_to_front(&id);
            }
            if events.send_to_back {
                self.send_to_back(&id);
            }
            if events.toggle_pause {
                let active = self
                    .lifecycle
                    .get_widget_instance_data(&id)
                    .map_or(false, |d| d.is_active);
                if active {
                    self.lifecycle.pause_widget(&id);
                } else {
                    self.lifecycle.resume_widget(&id);
                }
            }
            if let Some(pos) = events.resize_from {
                self.begin_resize(&id, to_local(pos, canvas));
            } else if let Some(pos) = events.drag_from {
                self.begin_drag(&id, to_local(pos, canvas));
            }
        }
    }

    fn context_menu_ui(&mut self, ui: &egui::Ui, canvas: egui::Rect) {
        let Some(anchor) = self.context_menu else {
            return;
        };
        let definitions = self.registry.all_widget_definitions();
        let mut chosen = None;
        let area = egui::Area::new(egui::Id::new("dashboard-add-widget-menu"))
            .order(egui::Order::Foreground)
            .fixed_pos(canvas.min + egui::vec2(anchor.x, anchor.y))
            .show(ui.ctx(), |ui| {
                egui::Frame::menu(ui.style()).show(ui, |ui| {
                    ui.label(egui::RichText::new("Add Widget").strong());
                    ui.separator();
                    if definitions.is_empty() {
                        ui.label("No widgets registered");
                    }
                    for def in &definitions {
                        if ui
                            .button(&def.name)
                            .on_hover_text(&def.description)
                            .clicked()
                        {
                            chosen = Some(def.id.clone());
                        }
                    }
                });
            });

        if let Some(widget_id) = chosen {
            if self.add_widget(&widget_id).is_none() {
                tracing::warn!(widget = %widget_id, "failed to add widget");
            }
            self.close_context_menu();
            return;
        }
        let menu_rect = area.response.rect;
        let clicked_outside = ui.input(|i| {
            i.pointer.primary_clicked()
                && i
                    .pointer
                    .interact_pos()
                    .map_or(false, |p| !menu_rect.contains(p))
        });
        if clicked_outside {
            self.close_context_menu();
        }
    }

    /// Destroy every instance. Called before the host exits.
    pub fn shutdown(&mut self) {
        self.clear();
    }
}

fn to_local(pos: egui::Pos2, canvas: egui::Rect) -> WidgetPosition {
    WidgetPosition::new(pos.x - canvas.min.x, pos.y - canvas.min.y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::model::{WidgetAspectRatio, WidgetDefinition};
    use crate::dashboard::widgets::test_support::{definition, registry_with, resizes_for, TestWidget};
    use crate::dashboard::widgets::{Widget, WidgetFactory};
    use serde_json::json;

    fn dashboard(defs: &[WidgetDefinition]) -> Dashboard {
        let mut d = Dashboard::new(registry_with(defs), 10.0, CanvasSettingsManager::in_memory());
        d.set_canvas_size(WidgetSize::new(1000.0, 800.0));
        d
    }

    fn assert_parity(d: &Dashboard) {
        let mut lifecycle: Vec<String> = d.lifecycle().instance_ids().cloned().collect();
        let mut layout: Vec<String> = d
            .layout()
            .get_layout()
            .into_iter()
            .map(|i| i.instance_id)
            .collect();
        lifecycle.sort();
        layout.sort();
        assert_eq!(lifecycle, layout);
    }

    fn locked(id: &str) -> WidgetDefinition {
        let mut def = definition(id);
        def.min_size = WidgetSize::new(100.0, 50.0);
        def.default_size = WidgetSize::new(400.0, 200.0);
        def.preferred_aspect_ratio = Some(WidgetAspectRatio {
            width: 2.0,
            height: 1.0,
            locked: true,
        });
        def
    }

    #[test]
    fn add_centers_at_canvas_fraction() {
        let mut d = dashboard(&[definition("clock")]);
        let id = d.add_widget("clock").unwrap();
        let item = d.layout().get_widget_layout(&id).unwrap().clone();
        assert_eq!(item.size, WidgetSize::new(800.0, 600.0));
        assert_eq!(item.position, WidgetPosition::new(100.0, 100.0));
        let data = d.lifecycle().get_widget_instance_data(&id).unwrap();
        assert_eq!(data.position, item.position);
        assert_eq!(data.size, item.size);
    }

    #[test]
    fn add_and_remove_keep_parity() {
        let mut d = dashboard(&[definition("clock")]);
        let a = d.add_widget("clock").unwrap();
        let b = d.add_widget("clock").unwrap();
        assert_parity(&d);
        assert_eq!(d.lifecycle().instance_count(), 2);
        assert!(d.remove_widget(&a));
        assert!(!d.remove_widget(&a));
        assert_parity(&d);
        assert!(d.layout().contains(&b));
        assert!(d.add_widget("missing").is_none());
        assert_parity(&d);
    }

    #[test]
    fn failed_initialize_adds_nothing() {
        let def = definition("broken");
        let mut registry = WidgetRegistry::default();
        registry.register_widget(WidgetFactory::fallible(move || {
            let mut w = TestWidget::new(def.clone());
            w.fail_init = true;
            Ok(Box::new(w) as Box<dyn Widget>)
        }));
        let mut d = Dashboard::new(registry, 10.0, CanvasSettingsManager::in_memory());
        assert!(d.add_widget("broken").is_none());
        assert!(d.layout().is_empty());
        assert_eq!(d.lifecycle().instance_count(), 0);
    }

    #[test]
    fn drag_commits_snapped_position_and_raises() {
        let mut d = dashboard(&[definition("clock")]);
        let a = d.add_widget("clock").unwrap();
        let b = d.add_widget("clock").unwrap();
        let origin = d.layout().get_widget_layout(&a).unwrap().position;

        assert!(d.begin_drag(&a, WidgetPosition::new(origin.x + 5.0, origin.y + 5.0)));
        let z_a = d.layout().get_widget_layout(&a).unwrap().z_index;
        let z_b = d.layout().get_widget_layout(&b).unwrap().z_index;
        assert!(z_a > z_b);

        d.pointer_moved(WidgetPosition::new(48.0, 73.0));
        assert_eq!(
            d.interaction().visual_position(&a),
            Some(WidgetPosition::new(43.0, 68.0))
        );
        assert_eq!(
            d.layout().get_widget_layout(&a).unwrap().position,
            origin
        );
        d.pointer_released(WidgetPosition::new(48.0, 73.0));
        let expected = WidgetPosition::new(40.0, 70.0);
        assert_eq!(d.layout().get_widget_layout(&a).unwrap().position, expected);
        assert_eq!(
            d.lifecycle().get_widget_instance_data(&a).unwrap().position,
            expected
        );
    }

    #[test]
    fn resize_commit_clamps_snaps_and_notifies() {
        let mut d = dashboard(&[definition("resizable")]);
        let id = d.add_widget("resizable").unwrap();
        let start = d.layout().get_widget_layout(&id).unwrap().size;
        assert!(d.begin_resize(&id, WidgetPosition::new(900.0, 700.0)));
        d.pointer_moved(WidgetPosition::new(500.0, 300.0));
        d.on_frame();
        assert_eq!(
            d.interaction().visual_size(&id),
            Some(WidgetSize::new(start.width - 400.0, start.height - 400.0))
        );
        d.pointer_released(WidgetPosition::new(203.0, 157.0));

        let expected = WidgetSize::new(300.0, 200.0);
        assert_eq!(d.layout().get_widget_layout(&id).unwrap().size, expected);
        assert_eq!(d.lifecycle().get_widget_instance_data(&id).unwrap().size, expected);
        assert_eq!(resizes_for("resizable").last(), Some(&(300.0, 200.0)));
    }

    #[test]
    fn locked_ratio_resize_keeps_proportions() {
        let mut d = dashboard(&[locked("ratio-drag")]);
        let id = d.add_widget("ratio-drag").unwrap();
        let start = d.layout().get_widget_layout(&id).unwrap().size;
        d.begin_resize(&id, WidgetPosition::new(0.0, 0.0));
        d.pointer_released(WidgetPosition::new(-200.0, -10.0));
        let size = d.layout().get_widget_layout(&id).unwrap().size;
        assert_eq!(size.width, start.width - 200.0);
        assert!(matches_ratio(size, 2.0));
    }

    #[test]
    fn locked_canvas_blocks_interaction() {
        let mut d = dashboard(&[definition("clock")]);
        let id = d.add_widget("clock").unwrap();
        d.canvas_settings_mut().update(|s| s.lock_widgets = true);
        assert!(!d.begin_drag(&id, WidgetPosition::new(0.0, 0.0)));
        assert!(!d.begin_resize(&id, WidgetPosition::new(0.0, 0.0)));
    }

    #[test]
    fn cancel_discards_visual_change() {
        let mut d = dashboard(&[definition("clock")]);
        let id = d.add_widget("clock").unwrap();
        let before = d.layout().get_widget_layout(&id).unwrap().clone();
        d.begin_drag(&id, WidgetPosition::new(150.0, 150.0));
        d.pointer_moved(WidgetPosition::new(400.0, 400.0));
        d.handle_escape();
        d.pointer_released(WidgetPosition::new(400.0, 400.0));
        assert_eq!(
            d.layout().get_widget_layout(&id).unwrap().position,
            before.position
        );
    }

    #[test]
    fn canvas_shrink_feeds_external_resize() {
        let mut d = dashboard(&[definition("shrinking")]);
        let id = d.add_widget("shrinking").unwrap();
        d.commit_position(&id, WidgetPosition::new(0.0, 0.0));
        d.set_canvas_size(WidgetSize::new(600.0, 800.0));
        let size = d.layout().get_widget_layout(&id).unwrap().size;
        assert_eq!(size, WidgetSize::new(600.0, 600.0));
        assert_eq!(resizes_for("shrinking").last(), Some(&(600.0, 600.0)));
    }

    #[test]
    fn external_resize_restores_locked_ratio() {
        let mut d = dashboard(&[locked("ratio-ext")]);
        let id = d.add_widget("ratio-ext").unwrap();
        d.commit_position(&id, WidgetPosition::new(0.0, 0.0));
        d.commit_size(&id, WidgetSize::new(400.0, 200.0));
        d.set_canvas_size(WidgetSize::new(300.0, 800.0));
        assert_eq!(
            d.layout().get_widget_layout(&id).unwrap().size,
            WidgetSize::new(300.0, 150.0)
        );
    }

    #[test]
    fn first_measurement_after_mount_is_ignored() {
        let mut d = Dashboard::new(
            registry_with(&[definition("mount")]),
            10.0,
            CanvasSettingsManager::in_memory(),
        );
        let id = d.add_widget("mount").unwrap();
        let before = d.layout().get_widget_layout(&id).unwrap().size;
        d.set_canvas_size(WidgetSize::new(5000.0, 5000.0));
        assert_eq!(d.layout().get_widget_layout(&id).unwrap().size, before);
        assert!(resizes_for("mount").is_empty());
    }

    #[test]
    fn load_layout_recreates_and_destroys_for_parity() {
        let mut d = dashboard(&[definition("clock")]);
        let a = d.add_widget("clock").unwrap();
        let b = d.add_widget("clock").unwrap();
        let b_item = d.layout().get_widget_layout(&b).unwrap().clone();
        d.save_layout("L1");
        d.remove_widget(&b);
        let c = d.add_widget("clock").unwrap();

        assert!(d.load_layout("L1"));
        assert_parity(&d);
        assert_eq!(d.lifecycle().instance_count(), 2);
        assert!(d.layout().contains(&a));
        assert!(!d.lifecycle().contains(&c));
        let restored = d
            .layout()
            .get_layout()
            .into_iter()
            .find(|i| i.instance_id != a)
            .unwrap();
        assert_eq!(restored.position, b_item.position);
        assert_eq!(restored.size, b_item.size);
        assert!(!d.load_layout("nope"));
    }

    #[test]
    fn reloading_a_layout_keeps_recreated_widgets() {
        let mut d = dashboard(&[definition("clock")]);
        let a = d.add_widget("clock").unwrap();
        let b = d.add_widget("clock").unwrap();
        d.save_layout("L1");
        d.remove_widget(&b);

        assert!(d.load_layout("L1"));
        let b1 = d
            .layout()
            .get_layout()
            .into_iter()
            .map(|i| i.instance_id)
            .find(|id| *id != a)
            .unwrap();
        let saved: Vec<String> = d.layout().saved_layouts()["L1"]
            .iter()
            .map(|i| i.instance_id.clone())
            .collect();
        assert!(saved.contains(&b1));
        assert!(!saved.contains(&b));
        d.set_widget_state(
            &b1,
            WidgetStateSnapshot {
                instance_data: None,
                widget_state: Some(json!({"ticks": 7})),
            },
        );

        assert!(d.load_layout("L1"));
        assert!(d.lifecycle().contains(&b1));
        assert_eq!(d.lifecycle().instance_count(), 2);
        let state = d.lifecycle_mut().get_widget_state(&b1).unwrap();
        assert_eq!(state.widget_state, Some(json!({"ticks": 7})));
        assert_parity(&d);
    }

    #[test]
    fn resize_on_coarse_grid_stays_above_minimum() {
        let mut def = definition("coarse");
        def.min_size = WidgetSize::new(400.0, 400.0);
        def.default_size = WidgetSize::new(400.0, 400.0);
        let mut d = Dashboard::new(registry_with(&[def]), 30.0, CanvasSettingsManager::in_memory());
        d.set_canvas_size(WidgetSize::new(1000.0, 800.0));
        let id = d.add_widget("coarse").unwrap();
        let start = d.layout().get_widget_layout(&id).unwrap().size;
        assert!(d.begin_resize(&id, WidgetPosition::new(0.0, 0.0)));
        d.pointer_released(WidgetPosition::new(
            395.0 - start.width,
            395.0 - start.height,
        ));

        let expected = WidgetSize::new(420.0, 420.0);
        assert_eq!(d.layout().get_widget_layout(&id).unwrap().size, expected);
        assert_eq!(d.lifecycle().get_widget_instance_data(&id).unwrap().size, expected);
    }

    #[test]
    fn state_capture_and_restore() {
        let mut d = dashboard(&[definition("clock")]);
        let id = d.add_widget("clock").unwrap();
        d.lifecycle_mut().update_widget_config(&id, &json!({"label": "kitchen"}));
        d.set_widget_state(
            &id,
            WidgetStateSnapshot {
                instance_data: None,
                widget_state: Some(json!({"ticks": 3})),
            },
        );
        d.lifecycle_mut().pause_widget(&id);
        d.save_layout("home");
        let state = d.capture_state();
        let item = d.layout().get_widget_layout(&id).unwrap().clone();

        let mut restored = dashboard(&[definition("clock")]);
        assert_eq!(restored.restore_state(state), 1);
        assert_parity(&restored);
        let new_item = restored.layout().get_layout().pop().unwrap();
        assert_ne!(new_item.instance_id, id);
        assert_eq!(new_item.position, item.position);
        let snapshot = restored
            .lifecycle_mut()
            .get_widget_state(&new_item.instance_id)
            .unwrap();
        assert_eq!(snapshot.widget_state, Some(json!({"ticks": 3})));
        let data = snapshot.instance_data.unwrap();
        assert_eq!(data.config["label"], json!("kitchen"));
        assert!(!data.is_active);
        assert_eq!(
            restored.layout().saved_layouts()["home"][0].instance_id,
            new_item.instance_id
        );
    }

    #[test]
    fn render_failure_shows_placeholder() {
        let def = definition("fragile");
        let mut registry = WidgetRegistry::default();
        registry.register_widget(WidgetFactory::fallible(move || {
            let mut w = TestWidget::new(def.clone());
            w.fail_render = true;
            Ok(Box::new(w) as Box<dyn Widget>)
        }));
        let mut d = Dashboard::new(registry, 10.0, CanvasSettingsManager::in_memory());
        let id = d.add_widget("fragile").unwrap();

        egui::__run_test_ui(|ui| {
            let rect = egui::Rect::from_min_size(egui::Pos2::ZERO, egui::vec2(1000.0, 800.0));
            ui.allocate_ui_at_rect(rect, |ui| d.ui(ui));
        });

        assert!(d.has_render_error(&id));
        assert_parity(&d);
    }

    #[test]
    fn ui_renders_with_grid_and_outlines() {
        let mut d = dashboard(&[definition("clock")]);
        d.canvas_settings_mut().update(|s| {
            s.show_widget_outlines = true;
            s.grid_size = 12.0;
        });
        let id = d.add_widget("clock").unwrap();
        egui::__run_test_ui(|ui| {
            let rect = egui::Rect::from_min_size(egui::Pos2::ZERO, egui::vec2(640.0, 480.0));
            ui.allocate_ui_at_rect(rect, |ui| d.ui(ui));
        });
        assert!(!d.has_render_error(&id));
        assert_parity(&d);
    }

    #[test]
    fn context_menu_toggles() {
        let mut d = dashboard(&[definition("clock")]);
        d.open_context_menu(WidgetPosition::new(10.0, 10.0));
        assert!(d.context_menu_open());
        d.handle_escape();
        assert!(!d.context_menu_open());
    }
}
