use crate::dashboard::model::{WidgetDefinition, WidgetLayoutItem, WidgetPosition, WidgetSize};
use crate::dashboard::sizing::fit_to_grid;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_GRID_SIZE: f32 = 10.0;
pub const DEFAULT_MAX_Z_INDEX: u32 = 1000;
/// Smallest horizontal/vertical step used while probing for a free spot.
pub const MIN_SEARCH_STEP: f32 = 50.0;
/// Probing wraps to the next row once x passes this coordinate.
pub const SEARCH_WRAP_X: f32 = 800.0;
pub const MAX_PLACEMENT_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutStats {
    pub widget_count: usize,
    /// Sum of every item's own area. Overlaps are counted twice.
    pub total_area: f32,
    /// Extent from the origin to the farthest right/bottom edge.
    pub bounds: WidgetSize,
}

/// Axis-aligned overlap test. Rectangles that only share an edge do not
/// overlap.
pub fn check_overlap(a: &WidgetLayoutItem, b: &WidgetLayoutItem) -> bool {
    !(a.right() <= b.position.x
        || b.right() <= a.position.x
        || a.bottom() <= b.position.y
        || b.bottom() <= a.position.y)
}

/// Spatial arrangement of instances on the canvas.
#[derive(Debug, Clone)]
pub struct DashboardLayout {
    items: HashMap<String, WidgetLayoutItem>,
    saved_layouts: BTreeMap<String, Vec<WidgetLayoutItem>>,
    grid_size: f32,
    max_z_index: u32,
}

impl Default for DashboardLayout {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_SIZE)
    }
}

impl DashboardLayout {
    pub fn new(grid_size: f32) -> Self {
        Self {
            items: HashMap::new(),
            saved_layouts: BTreeMap::new(),
            grid_size: grid_size.max(1.0),
            max_z_index: DEFAULT_MAX_Z_INDEX,
        }
    }

    /// Ceiling for z-indices. At least 2 so a single item can always sit
    /// strictly above the rest.
    pub fn with_max_z_index(mut self, max: u32) -> Self {
        self.max_z_index = max.max(2);
        self
    }

    /// Insert `item`, moving it to the first free grid cell if its requested
    /// spot overlaps an existing item. A zero z-index is replaced with the
    /// next one on top.
    pub fn add_widget(&mut self, item: WidgetLayoutItem) -> WidgetPosition {
        let position = self.find_non_overlapping_position(&item);
        let z_index = if item.z_index == 0 {
            self.claim_top(&item.instance_id)
        } else {
            item.z_index.min(self.max_z_index)
        };
        tracing::info!(
            instance = %item.instance_id,
            "widget added to layout at ({}, {})",
            position.x,
            position.y
        );
        self.items.insert(
            item.instance_id.clone(),
            WidgetLayoutItem {
                position,
                z_index,
                ..item
            },
        );
        position
    }

    pub fn remove_widget(&mut self, instance_id: &str) -> bool {
        let removed = self.items.remove(instance_id).is_some();
        if removed {
            tracing::info!(instance = %instance_id, "widget removed from layout");
        }
        removed
    }

    pub fn move_widget(&mut self, instance_id: &str, position: WidgetPosition) -> Option<WidgetPosition> {
        let snapped = self.snap_to_grid(position);
        let item = self.items.get_mut(instance_id)?;
        item.position = snapped;
        tracing::debug!(instance = %instance_id, "widget moved to ({}, {})", snapped.x, snapped.y);
        Some(snapped)
    }

    pub fn resize_widget(&mut self, instance_id: &str, size: WidgetSize) -> Option<WidgetSize> {
        let snapped = self.snap_size_to_grid(size);
        let item = self.items.get_mut(instance_id)?;
        item.size = snapped;
        tracing::debug!(
            instance = %instance_id,
            "widget resized to {}x{}",
            snapped.width,
            snapped.height
        );
        Some(snapped)
    }

    /// Resize to `size` snapped to the grid, kept inside `definition`'s
    /// bounds. Returns the stored size.
    pub fn resize_widget_within(
        &mut self,
        instance_id: &str,
        size: WidgetSize,
        definition: &WidgetDefinition,
    ) -> Option<WidgetSize> {
        let fitted = fit_to_grid(definition, size, self.grid_size);
        let item = self.items.get_mut(instance_id)?;
        item.size = fitted;
        tracing::debug!(
            instance = %instance_id,
            "widget resized to {}x{}",
            fitted.width,
            fitted.height
        );
        Some(fitted)
    }

    /// Place the item strictly above every other one. If the ceiling is
    /// already taken the rest of the stack is compacted below it.
    pub fn bring_to_front(&mut self, instance_id: &str) -> Option<u32> {
        if !self.items.contains_key(instance_id) {
            return None;
        }
        let next = self.claim_top(instance_id);
        let item = self.items.get_mut(instance_id)?;
        item.z_index = next;
        Some(next)
    }

    pub fn send_to_back(&mut self, instance_id: &str) -> Option<u32> {
        let item = self.items.get_mut(instance_id)?;
        item.z_index = 0;
        self.normalize_z_indices();
        self.items.get(instance_id).map(|w| w.z_index)
    }

    /// Items in paint order (ascending z-index, ties by instance id).
    pub fn get_layout(&self) -> Vec<WidgetLayoutItem> {
        let mut items: Vec<WidgetLayoutItem> = self.items.values().cloned().collect();
        sort_paint_order(&mut items);
        items
    }

    pub fn set_layout(&mut self, layout: Vec<WidgetLayoutItem>) {
        self.items = layout
            .into_iter()
            .map(|item| (item.instance_id.clone(), item))
            .collect();
    }

    pub fn get_widget_layout(&self, instance_id: &str) -> Option<&WidgetLayoutItem> {
        self.items.get(instance_id)
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.items.contains_key(instance_id)
    }

    pub fn save_layout(&mut self, name: &str) {
        self.saved_layouts.insert(name.to_string(), self.get_layout());
        tracing::info!(layout = %name, "layout saved");
    }

    pub fn load_layout(&mut self, name: &str) -> bool {
        match self.saved_layouts.get(name) {
            Some(saved) => {
                let saved = saved.clone();
                self.set_layout(saved);
                tracing::info!(layout = %name, "layout loaded");
                true
            }
            None => {
                tracing::warn!(layout = %name, "layout not found");
                false
            }
        }
    }

    pub fn get_saved_layout_names(&self) -> Vec<String> {
        self.saved_layouts.keys().cloned().collect()
    }

    pub fn delete_saved_layout(&mut self, name: &str) -> bool {
        let removed = self.saved_layouts.remove(name).is_some();
        if removed {
            tracing::info!(layout = %name, "layout deleted");
        }
        removed
    }

    pub fn saved_layouts(&self) -> &BTreeMap<String, Vec<WidgetLayoutItem>> {
        &self.saved_layouts
    }

    pub fn set_saved_layouts(&mut self, saved: BTreeMap<String, Vec<WidgetLayoutItem>>) {
        self.saved_layouts = saved;
    }

    pub fn get_stats(&self) -> LayoutStats {
        let mut stats = LayoutStats {
            widget_count: self.items.len(),
            ..LayoutStats::default()
        };
        for item in self.items.values() {
            stats.total_area += item.size.area();
            stats.bounds.width = stats.bounds.width.max(item.right());
            stats.bounds.height = stats.bounds.height.max(item.bottom());
        }
        stats
    }

    pub fn set_grid_size(&mut self, size: f32) {
        self.grid_size = size.max(1.0);
    }

    pub fn grid_size(&self) -> f32 {
        self.grid_size
    }

    pub fn max_z_index(&self) -> u32 {
        self.max_z_index
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Serialized form of the live layout, in paint order.
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&self.get_layout())?)
    }

    pub fn load_json(&mut self, json: &str) -> anyhow::Result<()> {
        let items: Vec<WidgetLayoutItem> = serde_json::from_str(json)?;
        self.set_layout(items);
        Ok(())
    }

    pub fn snap_to_grid(&self, position: WidgetPosition) -> WidgetPosition {
        WidgetPosition {
            x: snap(position.x.max(0.0), self.grid_size),
            y: snap(position.y.max(0.0), self.grid_size),
        }
    }

    pub fn snap_size_to_grid(&self, size: WidgetSize) -> WidgetSize {
        WidgetSize {
            width: snap(size.width, self.grid_size).max(self.grid_size),
            height: snap(size.height, self.grid_size).max(self.grid_size),
        }
    }

    fn find_non_overlapping_position(&self, item: &WidgetLayoutItem) -> WidgetPosition {
        let step = self.grid_size.max(MIN_SEARCH_STEP);
        let mut candidate = item.clone();
        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let blocked = self
                .items
                .values()
                .filter(|other| other.instance_id != item.instance_id)
                .any(|other| check_overlap(&candidate, other));
            if !blocked {
                return self.snap_to_grid(candidate.position);
            }
            candidate.position.x += step;
            if candidate.position.x > SEARCH_WRAP_X {
                candidate.position.x = 0.0;
                candidate.position.y += step;
            }
        }
        tracing::warn!(
            instance = %item.instance_id,
            "could not find non-overlapping position for widget"
        );
        self.snap_to_grid(item.position)
    }

    /// The z-index that puts `instance_id` strictly above every other item
    /// while keeping all of them in `1..=max_z_index`.
    fn claim_top(&mut self, instance_id: &str) -> u32 {
        let current_max = self
            .items
            .values()
            .filter(|w| w.instance_id != instance_id)
            .map(|w| w.z_index)
            .max()
            .unwrap_or(0);
        if current_max < self.max_z_index {
            return current_max + 1;
        }
        let highest = self.normalize_z_indices_except(Some(instance_id), self.max_z_index - 1);
        highest + 1
    }

    fn normalize_z_indices(&mut self) {
        self.normalize_z_indices_except(None, self.max_z_index);
    }

    /// Rewrite z-indices to 1, 2, .. in current paint order, skipping `skip`.
    /// Indices past `ceiling` share the ceiling. Returns the highest assigned.
    fn normalize_z_indices_except(&mut self, skip: Option<&str>, ceiling: u32) -> u32 {
        let mut order: Vec<(u32, String)> = self
            .items
            .values()
            .filter(|w| Some(w.instance_id.as_str()) != skip)
            .map(|w| (w.z_index, w.instance_id.clone()))
            .collect();
        order.sort();
        let mut highest = 0;
        for (index, (_, id)) in order.into_iter().enumerate() {
            if let Some(item) = self.items.get_mut(&id) {
                item.z_index = (index as u32 + 1).min(ceiling);
                highest = item.z_index;
            }
        }
        highest
    }
}

fn snap(value: f32, grid: f32) -> f32 {
    (value / grid).round() * grid
}

pub fn sort_paint_order(items: &mut [WidgetLayoutItem]) {
    items.sort_by(|a, b| {
        a.z_index
            .cmp(&b.z_index)
            .then_with(|| a.instance_id.cmp(&b.instance_id))
    });
}
