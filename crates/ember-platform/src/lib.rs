// SPDX-License-Identifier: CEPL-1.0
//! Window-side helpers: turning winit events into per-frame input.

pub use winit;

use ember_math::{CameraInput, MoveKeys};
use glam::Vec2;
use winit::event::{DeviceEvent, ElementState, KeyEvent, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{CursorGrabMode, Window};

/// What the renderer loop consumes each frame.
pub type InputSnapshot = CameraInput;

/// Accumulates cursor motion and key state between frames.
#[derive(Debug, Default, Clone)]
pub struct InputTracker {
    cursor_delta: Vec2,
    keys: MoveKeys,
}

impl InputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_key(&mut self, key: KeyCode, pressed: bool) {
        let flag = match key {
            KeyCode::KeyW => MoveKeys::FORWARD,
            KeyCode::KeyS => MoveKeys::BACK,
            KeyCode::KeyA => MoveKeys::LEFT,
            KeyCode::KeyD => MoveKeys::RIGHT,
            _ => return,
        };
        self.keys.set(flag, pressed);
    }

    pub fn on_mouse_motion(&mut self, dx: f64, dy: f64) {
        self.cursor_delta += Vec2::new(dx as f32, dy as f32);
    }

    pub fn handle_window_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        ..
                    },
                ..
            } => self.on_key(*code, *state == ElementState::Pressed),
            // Keys held while focus leaves would otherwise stay down.
            WindowEvent::Focused(false) => self.keys = MoveKeys::empty(),
            _ => {}
        }
    }

    pub fn handle_device_event(&mut self, event: &DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            self.on_mouse_motion(*dx, *dy);
        }
    }

    /// Returns this frame's input and starts a new motion accumulation.
    pub fn take_snapshot(&mut self) -> InputSnapshot {
        InputSnapshot {
            cursor_delta: std::mem::take(&mut self.cursor_delta),
            keys: self.keys,
        }
    }
}

/// Hides the cursor and keeps it inside the window for mouse look.
pub fn grab_cursor(window: &Window) {
    let grabbed = window
        .set_cursor_grab(CursorGrabMode::Locked)
        .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined));
    if let Err(e) = grabbed {
        tracing::warn!("cursor grab unavailable: {e}");
    }
    window.set_cursor_visible(false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_accumulates_until_snapshot() {
        let mut input = InputTracker::new();
        input.on_mouse_motion(3.0, -1.0);
        input.on_mouse_motion(2.0, 4.0);
        let snap = input.take_snapshot();
        assert_eq!(snap.cursor_delta, Vec2::new(5.0, 3.0));
        assert_eq!(input.take_snapshot().cursor_delta, Vec2::ZERO);
    }

    #[test]
    fn keys_persist_across_snapshots() {
        let mut input = InputTracker::new();
        input.on_key(KeyCode::KeyW, true);
        input.on_key(KeyCode::KeyD, true);
        input.on_key(KeyCode::Space, true);
        assert_eq!(
            input.take_snapshot().keys,
            MoveKeys::FORWARD | MoveKeys::RIGHT
        );
        input.on_key(KeyCode::KeyW, false);
        assert_eq!(input.take_snapshot().keys, MoveKeys::RIGHT);
    }

    #[test]
    fn mouse_motion_device_event() {
        let mut input = InputTracker::new();
        input.handle_device_event(&DeviceEvent::MouseMotion { delta: (1.5, 2.0) });
        assert_eq!(input.take_snapshot().cursor_delta, Vec2::new(1.5, 2.0));
    }

    #[test]
    fn losing_focus_releases_keys() {
        let mut input = InputTracker::new();
        input.on_key(KeyCode::KeyA, true);
        input.handle_window_event(&WindowEvent::Focused(false));
        assert!(input.take_snapshot().keys.is_empty());
    }
}
