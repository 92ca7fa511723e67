//! Remote input translation and injection.
//!
//! Events arrive with coordinates relative to the streamed monitor and
//! are translated to desktop-global coordinates before reaching the
//! injection collaborator. Keyboard events carry platform-neutral key
//! names; mapping them to OS scan codes is the sink's concern.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::RemoraError;

// ── Event model ──────────────────────────────────────────────────

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// One remote input event, coordinates relative to the streamed
/// monitor's top-left corner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputEvent {
    MouseMove {
        x: i32,
        y: i32,
    },
    MouseClick {
        x: i32,
        y: i32,
        button: MouseButton,
        pressed: bool,
    },
    MouseWheel {
        x: i32,
        y: i32,
        delta: i32,
    },
    KeyDown {
        key: String,
    },
    KeyUp {
        key: String,
    },
    /// Composite press-and-release of one key.
    KeyPress {
        key: String,
    },
    /// Literal text insertion, bypassing key mapping.
    TextInput {
        text: String,
    },
}

impl InputEvent {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RemoraError> {
        bincode::serialize(self).map_err(|e| RemoraError::Encoding(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RemoraError> {
        bincode::deserialize(bytes).map_err(|e| RemoraError::Encoding(e.to_string()))
    }
}

// ── InputSink ────────────────────────────────────────────────────

/// Collaborator that injects events into the host OS.
///
/// All coordinates are desktop-global by the time they arrive here.
pub trait InputSink: Send {
    fn move_cursor(&mut self, x: i32, y: i32) -> Result<(), RemoraError>;
    fn click(
        &mut self,
        x: i32,
        y: i32,
        button: MouseButton,
        pressed: bool,
    ) -> Result<(), RemoraError>;
    fn wheel(&mut self, x: i32, y: i32, delta: i32) -> Result<(), RemoraError>;
    fn key_down(&mut self, key: &str) -> Result<(), RemoraError>;
    fn key_up(&mut self, key: &str) -> Result<(), RemoraError>;
    fn insert_text(&mut self, text: &str) -> Result<(), RemoraError>;
}

// ── InputDispatcher ──────────────────────────────────────────────

/// Translates monitor-relative events and forwards them to the sink
/// in arrival order.
pub struct InputDispatcher {
    sink: Box<dyn InputSink>,
}

impl InputDispatcher {
    /// Create a dispatcher over the given injection collaborator.
    pub fn new(sink: Box<dyn InputSink>) -> Self {
        Self { sink }
    }

    /// Translate `event` by the streamed monitor's desktop origin and
    /// inject it synchronously.
    ///
    /// An injection failure surfaces to the caller but poisons nothing;
    /// subsequent events are dispatched normally.
    pub fn dispatch(&mut self, event: &InputEvent, origin: (i32, i32)) -> Result<(), RemoraError> {
        let (ox, oy) = origin;
        trace!(?event, ox, oy, "dispatching input event");
        match event {
            InputEvent::MouseMove { x, y } => self.sink.move_cursor(x + ox, y + oy),
            InputEvent::MouseClick {
                x,
                y,
                button,
                pressed,
            } => self.sink.click(x + ox, y + oy, *button, *pressed),
            InputEvent::MouseWheel { x, y, delta } => self.sink.wheel(x + ox, y + oy, *delta),
            InputEvent::KeyDown { key } => self.sink.key_down(key),
            InputEvent::KeyUp { key } => self.sink.key_up(key),
            InputEvent::KeyPress { key } => {
                self.sink.key_down(key)?;
                self.sink.key_up(key)
            }
            InputEvent::TextInput { text } => self.sink.insert_text(text),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
