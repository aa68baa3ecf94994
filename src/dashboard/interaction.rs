//! Pointer-driven drag and resize sessions for widget containers.
//!
//! Coordinates are canvas-local. The session only tracks the *visual*
//! geometry while the pointer is held; nothing reaches the layout or the
//! lifecycle manager until [`InteractionState::handle_left_up`] returns a
//! [`Commit`].

use crate::dashboard::model::{WidgetPosition, WidgetSize};
use crate::dashboard::sizing::resize_from_delta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionPhase {
    Idle,
    Dragging,
    Resizing,
}

impl InteractionPhase {
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

pub fn can_transition(from: InteractionPhase, to: InteractionPhase) -> bool {
    matches!(
        (from, to),
        (InteractionPhase::Idle, InteractionPhase::Dragging)
            | (InteractionPhase::Idle, InteractionPhase::Resizing)
            | (InteractionPhase::Dragging, InteractionPhase::Idle)
            | (InteractionPhase::Resizing, InteractionPhase::Idle)
    )
}

#[derive(Debug, Clone, PartialEq)]
enum Session {
    Idle,
    Dragging {
        instance_id: String,
        grab_offset: (f32, f32),
        visual: WidgetPosition,
    },
    Resizing {
        instance_id: String,
        start_pointer: WidgetPosition,
        start_size: WidgetSize,
        locked_ratio: Option<f32>,
        current: WidgetSize,
        pending: Option<WidgetPosition>,
    },
}

/// Result of releasing the pointer.
#[derive(Debug, Clone, PartialEq)]
pub enum Commit {
    Move {
        instance_id: String,
        position: WidgetPosition,
    },
    Resize {
        instance_id: String,
        size: WidgetSize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InteractionState {
    session: Session,
}

impl Default for InteractionState {
    fn default() -> Self {
        Self {
            session: Session::Idle,
        }
    }
}

impl InteractionState {
    pub fn phase(&self) -> InteractionPhase {
        match self.session {
            Session::Idle => InteractionPhase::Idle,
            Session::Dragging { .. } => InteractionPhase::Dragging,
            Session::Resizing { .. } => InteractionPhase::Resizing,
        }
    }

    pub fn active_instance(&self) -> Option<&str> {
        match &self.session {
            Session::Idle => None,
            Session::Dragging { instance_id, .. } | Session::Resizing { instance_id, .. } => {
                Some(instance_id)
            }
        }
    }

    fn enter(&mut self, session: Session) -> bool {
        let next = match session {
            Session::Idle => InteractionPhase::Idle,
            Session::Dragging { .. } => InteractionPhase::Dragging,
            Session::Resizing { .. } => InteractionPhase::Resizing,
        };
        if !can_transition(self.phase(), next) {
            return false;
        }
        self.session = session;
        true
    }

    /// Header press. Remembers where inside the container the pointer grabbed.
    pub fn begin_drag(
        &mut self,
        instance_id: &str,
        pointer: WidgetPosition,
        container: WidgetPosition,
    ) -> bool {
        let started = self.enter(Session::Dragging {
            instance_id: instance_id.to_string(),
            grab_offset: (pointer.x - container.x, pointer.y - container.y),
            visual: container,
        });
        if started {
            tracing::debug!(widget = %instance_id, "drag started");
        }
        started
    }

    /// Corner-handle press.
    pub fn begin_resize(
        &mut self,
        instance_id: &str,
        pointer: WidgetPosition,
        start_size: WidgetSize,
        locked_ratio: Option<f32>,
    ) -> bool {
        let started = self.enter(Session::Resizing {
            instance_id: instance_id.to_string(),
            start_pointer: pointer,
            start_size,
            locked_ratio,
            current: start_size,
            pending: None,
        });
        if started {
            tracing::debug!(widget = %instance_id, "resize started");
        }
        started
    }

    /// Pointer move. Drags update immediately; resizes only record the
    /// pointer until the next [`on_frame`](Self::on_frame).
    pub fn handle_move(&mut self, pointer: WidgetPosition) {
        match &mut self.session {
            Session::Dragging {
                grab_offset,
                visual,
                ..
            } => {
                *visual = WidgetPosition::new(
                    (pointer.x - grab_offset.0).max(0.0),
                    (pointer.y - grab_offset.1).max(0.0),
                );
            }
            Session::Resizing { pending, .. } => *pending = Some(pointer),
            Session::Idle => {}
        }
    }

    /// Apply at most one resize computation for the moves seen this frame.
    pub fn on_frame(&mut self) {
        if let Session::Resizing {
            start_pointer,
            start_size,
            locked_ratio,
            current,
            pending,
            ..
        } = &mut self.session
        {
            if let Some(pointer) = pending.take() {
                *current = resize_from_delta(
                    *start_size,
                    pointer.x - start_pointer.x,
                    pointer.y - start_pointer.y,
                    *locked_ratio,
                );
            }
        }
    }

    pub fn has_pending_frame(&self) -> bool {
        matches!(
            self.session,
            Session::Resizing {
                pending: Some(_),
                ..
            }
        )
    }

    /// Release ends the session and yields what to commit.
    pub fn handle_left_up(&mut self, pointer: WidgetPosition) -> Option<Commit> {
        self.handle_move(pointer);
        self.on_frame();
        match std::mem::replace(&mut self.session, Session::Idle) {
            Session::Idle => None,
            Session::Dragging {
                instance_id,
                visual,
                ..
            } => Some(Commit::Move {
                instance_id,
                position: visual,
            }),
            Session::Resizing {
                instance_id,
                current,
                ..
            } => Some(Commit::Resize {
                instance_id,
                size: current,
            }),
        }
    }

    /// Abort without committing. Returns the instance whose session ended.
    pub fn cancel(&mut self) -> Option<String> {
        let id = self.active_instance().map(str::to_string);
        if let Some(id) = &id {
            tracing::debug!(widget = %id, "interaction cancelled");
        }
        self.session = Session::Idle;
        id
    }

    pub fn visual_position(&self, instance_id: &str) -> Option<WidgetPosition> {
        match &self.session {
            Session::Dragging {
                instance_id: id,
                visual,
                ..
            } if id == instance_id => Some(*visual),
            _ => None,
        }
    }

    pub fn visual_size(&self, instance_id: &str) -> Option<WidgetSize> {
        match &self.session {
            Session::Resizing {
                instance_id: id,
                current,
                ..
            } if id == instance_id => Some(*current),
            _ => None,
        }
    }
}

/// Tracks the measured size of one container.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeObserver {
    last: Option<WidgetSize>,
    enforce_ratio: bool,
}

impl Default for SizeObserver {
    fn default() -> Self {
        Self {
            last: None,
            enforce_ratio: true,
        }
    }
}

impl SizeObserver {
    /// Record a measurement. The first one after mount is only a baseline;
    /// later ones are returned when they differ from the previous.
    pub fn observe(&mut self, measured: WidgetSize) -> Option<WidgetSize> {
        let previous = self.last.replace(measured);
        match previous {
            None => None,
            Some(prev) if same_size(prev, measured) => None,
            Some(_) => Some(measured),
        }
    }

    /// Accept `size` as current without reporting it.
    pub fn rebase(&mut self, size: WidgetSize) {
        self.last = Some(size);
    }

    pub fn enforces_ratio(&self) -> bool {
        self.enforce_ratio
    }

    pub fn set_enforce_ratio(&mut self, enforce: bool) {
        self.enforce_ratio = enforce;
    }
}

fn same_size(a: WidgetSize, b: WidgetSize) -> bool {
    (a.width - b.width).abs() < 0.5 && (a.height - b.height).abs() < 0.5
}
