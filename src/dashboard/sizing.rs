//! Size maths shared by the add flow and the resize interactions.

use crate::dashboard::model::{WidgetDefinition, WidgetPosition, WidgetSize};

/// Share of the canvas width a newly added widget spans.
pub const ADD_WIDTH_FRACTION: f32 = 0.8;
/// Interactive resizes never shrink a container below this many pixels.
pub const MIN_INTERACTIVE_EDGE: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub position: WidgetPosition,
    pub size: WidgetSize,
}

/// Size and position for a widget added to a canvas of `canvas` size.
///
/// The widget spans [`ADD_WIDTH_FRACTION`] of the canvas width, takes its
/// height from the preferred aspect ratio (or the default size's proportions),
/// shrinks proportionally when that would be taller than the canvas, is
/// scaled along that ratio into the type's bounds and is centered. When no
/// size with that ratio fits the bounds, the bounds win and the ratio is
/// given up.
pub fn initial_placement(def: &WidgetDefinition, canvas: WidgetSize) -> Placement {
    let ratio = def
        .preferred_aspect_ratio
        .map(|r| r.ratio())
        .unwrap_or_else(|| ratio_of(def.default_size));

    let mut width = canvas.width * ADD_WIDTH_FRACTION;
    let mut height = width / ratio;
    if height > canvas.height && canvas.height > 0.0 {
        height = canvas.height;
        width = height * ratio;
    }

    let clamped = scale_into_bounds(def, WidgetSize::new(width, height));
    let size = WidgetSize::new(clamped.width.round(), clamped.height.round());
    let position = WidgetPosition::new(
        ((canvas.width - size.width) / 2.0).max(0.0).round(),
        ((canvas.height - size.height) / 2.0).max(0.0).round(),
    );
    Placement { position, size }
}

fn scale_into_bounds(def: &WidgetDefinition, size: WidgetSize) -> WidgetSize {
    if size.width <= 0.0 || size.height <= 0.0 {
        return def.clamp_size(size);
    }
    let scale = |s: WidgetSize, k: f32| WidgetSize::new(s.width * k, s.height * k);
    let grow = (def.min_size.width / size.width).max(def.min_size.height / size.height);
    let mut size = if grow > 1.0 { scale(size, grow) } else { size };
    if let Some(max) = def.max_size {
        let shrink = (max.width / size.width).min(max.height / size.height);
        if shrink < 1.0 {
            size = scale(size, shrink);
        }
    }
    def.clamp_size(size)
}

/// Snap `size` to `grid` without leaving the type's bounds. An axis whose
/// bounds hold no grid multiple keeps the clamped, off-grid value.
pub fn fit_to_grid(def: &WidgetDefinition, size: WidgetSize, grid: f32) -> WidgetSize {
    let max = def.max_size;
    WidgetSize::new(
        fit_axis(size.width, def.min_size.width, max.map(|m| m.width), grid),
        fit_axis(size.height, def.min_size.height, max.map(|m| m.height), grid),
    )
}

fn fit_axis(value: f32, min: f32, max: Option<f32>, grid: f32) -> f32 {
    let grid = grid.max(1.0);
    let snapped = ((value / grid).round() * grid).max(grid);
    let upper = max.unwrap_or(f32::INFINITY);
    let clamped = snapped.max(min).min(upper);
    if clamped == snapped {
        return snapped;
    }
    let inside = if clamped > snapped {
        (clamped / grid).ceil() * grid
    } else {
        (clamped / grid).floor() * grid
    };
    if inside >= min && inside <= upper {
        inside
    } else {
        clamped
    }
}

fn ratio_of(size: WidgetSize) -> f32 {
    if size.width > 0.0 && size.height > 0.0 {
        size.width / size.height
    } else {
        1.0
    }
}

/// New size for a corner-handle drag of `(dx, dy)` starting from `start`.
///
/// With a locked ratio the axis with the larger absolute delta drives the
/// other one; ties go to width.
pub fn resize_from_delta(start: WidgetSize, dx: f32, dy: f32, locked_ratio: Option<f32>) -> WidgetSize {
    let size = match locked_ratio {
        Some(ratio) if dx.abs() >= dy.abs() => {
            let width = start.width + dx;
            WidgetSize::new(width, width / ratio)
        }
        Some(ratio) => {
            let height = start.height + dy;
            WidgetSize::new(height * ratio, height)
        }
        None => WidgetSize::new(start.width + dx, start.height + dy),
    };
    floor_edges(size, locked_ratio)
}

fn floor_edges(size: WidgetSize, locked_ratio: Option<f32>) -> WidgetSize {
    if size.width >= MIN_INTERACTIVE_EDGE && size.height >= MIN_INTERACTIVE_EDGE {
        return size;
    }
    match locked_ratio {
        Some(ratio) if ratio >= 1.0 => {
            WidgetSize::new(MIN_INTERACTIVE_EDGE * ratio, MIN_INTERACTIVE_EDGE)
        }
        Some(ratio) => WidgetSize::new(MIN_INTERACTIVE_EDGE, MIN_INTERACTIVE_EDGE / ratio),
        None => WidgetSize::new(
            size.width.max(MIN_INTERACTIVE_EDGE),
            size.height.max(MIN_INTERACTIVE_EDGE),
        ),
    }
}

/// Bring an externally measured size back to `ratio`, picking whichever of
/// height-from-width or width-from-height gives the smaller footprint.
pub fn correct_to_ratio(size: WidgetSize, ratio: f32) -> WidgetSize {
    let from_width = WidgetSize::new(size.width, size.width / ratio);
    let from_height = WidgetSize::new(size.height * ratio, size.height);
    if from_width.area() <= from_height.area() {
        from_width
    } else {
        from_height
    }
}

pub fn matches_ratio(size: WidgetSize, ratio: f32) -> bool {
    size.height > 0.0 && ((size.width / size.height) - ratio).abs() < 0.01
}
