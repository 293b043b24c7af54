// SPDX-License-Identifier: CEPL-1.0
//! First-person fly camera with a reverse-Z infinite projection.

use bitflags::bitflags;
use glam::{Mat4, Vec2, Vec3};

bitflags! {
    /// Movement keys held during a frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MoveKeys: u8 {
        const FORWARD = 1 << 0;
        const BACK    = 1 << 1;
        const LEFT    = 1 << 2;
        const RIGHT   = 1 << 3;
    }
}

/// Per-frame input the camera consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraInput {
    pub cursor_delta: Vec2,
    pub keys: MoveKeys,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraConfig {
    pub fov_rad: f32,
    pub near: f32,
    /// World units per update.
    pub speed: f32,
    /// Radians per unit of cursor motion.
    pub sensitivity: f32,
    /// The camera is pinned to this height after every move.
    pub eye_height: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_rad: 1.57,
            near: 0.01,
            speed: 40.0 / 60.0,
            sensitivity: 0.005,
            eye_height: 1.0,
        }
    }
}

pub const PITCH_LIMIT: f32 = 1.567;

#[derive(Debug, Clone)]
pub struct Camera {
    pub config: CameraConfig,
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    projection: Mat4,
    view_proj: Mat4,
}

impl Camera {
    pub fn new(config: CameraConfig, width: u32, height: u32) -> Self {
        let mut cam = Self {
            config,
            position: Vec3::new(0.0, config.eye_height, -3.0),
            direction: Vec3::Z,
            up: Vec3::Y,
            // Looking down +Z.
            yaw: std::f32::consts::FRAC_PI_2,
            pitch: 0.0,
            projection: Mat4::IDENTITY,
            view_proj: Mat4::IDENTITY,
        };
        cam.set_projection(width, height);
        cam
    }

    /// Reverse-Z, infinite far plane, Y flipped for Vulkan clip space.
    /// Depth is 1 at the near plane and tends to 0 at infinity.
    pub fn set_projection(&mut self, width: u32, height: u32) {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        let mut proj =
            Mat4::perspective_infinite_reverse_rh(self.config.fov_rad, aspect, self.config.near);
        proj.y_axis = -proj.y_axis;
        self.projection = proj;
        self.view_proj = proj * self.view();
    }

    pub fn update(&mut self, input: &CameraInput) {
        let speed = self.config.speed;
        let right = self.direction.cross(self.up).normalize_or_zero();

        if input.keys.contains(MoveKeys::FORWARD) {
            self.position += speed * self.direction;
        }
        if input.keys.contains(MoveKeys::BACK) {
            self.position -= speed * self.direction;
        }
        if input.keys.contains(MoveKeys::LEFT) {
            self.position -= speed * right;
        }
        if input.keys.contains(MoveKeys::RIGHT) {
            self.position += speed * right;
        }
        self.position.y = self.config.eye_height;

        self.yaw += self.config.sensitivity * input.cursor_delta.x;
        self.pitch -= self.config.sensitivity * input.cursor_delta.y;
        self.pitch = self.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);

        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.direction = Vec3::new(cos_yaw * cos_pitch, sin_pitch, sin_yaw * cos_pitch).normalize();

        self.view_proj = self.projection * self.view();
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.direction, self.up)
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view_proj(&self) -> Mat4 {
        self.view_proj
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn projection_layout() {
        let cam = Camera::new(CameraConfig::default(), 800, 600);
        let p = cam.projection();
        let cot = 1.0 / (1.57f32 * 0.5).tan();
        assert!(approx(p.x_axis.x, cot / (800.0 / 600.0)));
        assert!(approx(p.y_axis.y, -cot));
        assert!(approx(p.z_axis.w, -1.0));
        assert!(approx(p.w_axis.z, 0.01));
        assert!(approx(p.z_axis.z, 0.0));
        assert!(approx(p.w_axis.w, 0.0));
    }

    #[test]
    fn depth_is_reversed() {
        let cam = Camera::new(CameraConfig::default(), 800, 600);
        let p = cam.projection();
        let depth = |z: f32| {
            let clip = p * Vec4::new(0.0, 0.0, z, 1.0);
            clip.z / clip.w
        };
        assert!(approx(depth(-0.01), 1.0));
        assert!(depth(-1.0) > depth(-100.0));
        assert!(depth(-1.0e6) > 0.0);
    }

    #[test]
    fn starts_looking_down_z() {
        let mut cam = Camera::new(CameraConfig::default(), 800, 600);
        cam.update(&CameraInput::default());
        assert!(cam.direction.abs_diff_eq(Vec3::Z, 1e-5));
        assert_eq!(cam.position, Vec3::new(0.0, 1.0, -3.0));
    }

    #[test]
    fn pitch_is_clamped() {
        let mut cam = Camera::new(CameraConfig::default(), 800, 600);
        cam.update(&CameraInput {
            cursor_delta: Vec2::new(0.0, -10_000.0),
            keys: MoveKeys::empty(),
        });
        assert!(approx(cam.pitch, PITCH_LIMIT));
        cam.update(&CameraInput {
            cursor_delta: Vec2::new(0.0, 20_000.0),
            keys: MoveKeys::empty(),
        });
        assert!(approx(cam.pitch, -PITCH_LIMIT));
        assert!(cam.direction.is_normalized());
    }

    #[test]
    fn movement_stays_at_eye_height() {
        let mut cam = Camera::new(CameraConfig::default(), 800, 600);
        cam.pitch = 1.0;
        cam.update(&CameraInput::default());
        cam.update(&CameraInput {
            cursor_delta: Vec2::ZERO,
            keys: MoveKeys::FORWARD,
        });
        assert!(approx(cam.position.y, 1.0));
        assert!(cam.position.z > -3.0);
    }

    #[test]
    fn strafing_is_opposite() {
        let mut left = Camera::new(CameraConfig::default(), 800, 600);
        let mut right = left.clone();
        left.update(&CameraInput {
            cursor_delta: Vec2::ZERO,
            keys: MoveKeys::LEFT,
        });
        right.update(&CameraInput {
            cursor_delta: Vec2::ZERO,
            keys: MoveKeys::RIGHT,
        });
        assert!(approx(left.position.x, -right.position.x));
        assert!(!approx(left.position.x, 0.0));
    }

    #[test]
    fn view_proj_tracks_update() {
        let mut cam = Camera::new(CameraConfig::default(), 800, 600);
        let before = cam.view_proj();
        cam.update(&CameraInput {
            cursor_delta: Vec2::new(50.0, 0.0),
            keys: MoveKeys::empty(),
        });
        assert_ne!(before, cam.view_proj());
        assert_eq!(cam.view_proj(), cam.projection() * cam.view());
    }
}
