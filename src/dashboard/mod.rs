pub mod canvas_settings;
pub mod config;
pub mod dashboard;
pub mod interaction;
pub mod layout;
pub mod lifecycle;
pub mod model;
pub mod sizing;
pub mod widgets;

pub use canvas_settings::{CanvasSettings, CanvasSettingsManager};
pub use config::DashboardState;
pub use dashboard::Dashboard;
pub use layout::DashboardLayout;
pub use lifecycle::{WidgetLifecycleManager, WidgetStateSnapshot};
pub use model::{
    WidgetAspectRatio, WidgetCategory, WidgetDefinition, WidgetInstance, WidgetLayoutItem,
    WidgetPosition, WidgetSize,
};
pub use widgets::{Capability, Widget, WidgetFactory, WidgetHooks, WidgetRegistry};
