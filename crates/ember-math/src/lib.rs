// SPDX-License-Identifier: CEPL-1.0
pub mod camera;

pub use camera::{Camera, CameraConfig, CameraInput, MoveKeys};
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
