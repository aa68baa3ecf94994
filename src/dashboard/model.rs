use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WidgetSize {
    pub width: f32,
    pub height: f32,
}

impl WidgetSize {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WidgetPosition {
    pub x: f32,
    pub y: f32,
}

impl WidgetPosition {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetCategory {
    Display,
    Interactive,
    System,
    External,
}

impl WidgetCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            WidgetCategory::Display => "display",
            WidgetCategory::Interactive => "interactive",
            WidgetCategory::System => "system",
            WidgetCategory::External => "external",
        }
    }
}

impl std::fmt::Display for WidgetCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionType {
    #[serde(rename = "filesystem")]
    FileSystem,
    Network,
    SystemCommand,
    Notification,
    Clipboard,
    Sensor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetPermission {
    #[serde(rename = "type")]
    pub kind: PermissionType,
    pub scope: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingKind {
    Text,
    Number,
    Boolean,
    Select,
    Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingOption {
    pub value: Value,
    pub label: String,
}

/// One user-editable entry of a widget's settings schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetSetting {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SettingKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SettingOption>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WidgetAspectRatio {
    pub width: f32,
    pub height: f32,
    /// When set, resize operations must preserve `width / height`.
    pub locked: bool,
}

impl WidgetAspectRatio {
    /// Width divided by height. Degenerate ratios collapse to 1.
    pub fn ratio(&self) -> f32 {
        if self.width > 0.0 && self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }
}

/// Static metadata for a widget type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub category: WidgetCategory,
    pub min_size: WidgetSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<WidgetSize>,
    pub default_size: WidgetSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_aspect_ratio: Option<WidgetAspectRatio>,
    #[serde(default)]
    pub permissions: Vec<WidgetPermission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Vec<WidgetSetting>>,
}

impl WidgetDefinition {
    /// Clamp `size` into `[min_size, max_size]`.
    pub fn clamp_size(&self, size: WidgetSize) -> WidgetSize {
        let mut width = size.width.max(self.min_size.width);
        let mut height = size.height.max(self.min_size.height);
        if let Some(max) = self.max_size {
            width = width.min(max.width);
            height = height.min(max.height);
        }
        WidgetSize { width, height }
    }

    pub fn is_below_min(&self, size: WidgetSize) -> bool {
        size.width < self.min_size.width || size.height < self.min_size.height
    }

    /// The aspect ratio to enforce on resize, if the type locks one.
    pub fn locked_ratio(&self) -> Option<f32> {
        self.preferred_aspect_ratio
            .filter(|r| r.locked)
            .map(|r| r.ratio())
    }
}

/// A placed, live occurrence of a widget type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetInstance {
    #[serde(flatten)]
    pub definition: WidgetDefinition,
    pub instance_id: String,
    pub position: WidgetPosition,
    pub size: WidgetSize,
    #[serde(default)]
    pub config: Value,
    pub is_active: bool,
}

impl WidgetInstance {
    pub fn widget_id(&self) -> &str {
        &self.definition.id
    }
}

/// The spatial record the layout owns for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetLayoutItem {
    pub instance_id: String,
    pub widget_id: String,
    pub position: WidgetPosition,
    pub size: WidgetSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    /// Paint order, higher draws on top. Zero means "not assigned yet".
    #[serde(default)]
    pub z_index: u32,
}

impl WidgetLayoutItem {
    pub fn new(
        instance_id: impl Into<String>,
        widget_id: impl Into<String>,
        position: WidgetPosition,
        size: WidgetSize,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            widget_id: widget_id.into(),
            position,
            size,
            config: None,
            z_index: 0,
        }
    }

    pub fn right(&self) -> f32 {
        self.position.x + self.size.width
    }

    pub fn bottom(&self) -> f32 {
        self.position.y + self.size.height
    }
}
