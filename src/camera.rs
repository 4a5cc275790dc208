use glam::{Mat4, Quat, Vec3, Vec3A};
use std::f32::consts::PI;

use crate::vertex::VertexTransform;

/// Per-frame input of the rasterizer: how vertices reach clip space and where the eye is.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput {
    pub transform: VertexTransform,
    pub eye: Vec3A,
    pub near: f32,
    pub far: f32,
}

impl FrameInput {
    /// Input for callers that bring their own world-to-clip matrix.
    pub fn from_view_projection(view_projection: Mat4, eye: Vec3A, near: f32, far: f32) -> Self {
        Self {
            transform: VertexTransform::from_view_projection(view_projection),
            eye,
            near,
            far,
        }
    }
}

pub struct Camera {
    position: Vec3,
    fov: f32,
    aspect_ratio: f32,
    near: f32,
    far: f32,
    yaw: f32,   // Rotation around Y axis
    pitch: f32, // Rotation around X axis
    // Cached matrices
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
    pub view_project_matrix: Mat4,
}

impl Camera {
    pub fn new(position: Vec3, look_at: Vec3, fov: f32, width: u32, height: u32) -> Self {
        let mut camera = Self {
            position,
            fov,
            aspect_ratio: width.max(1) as f32 / height.max(1) as f32,
            near: 0.1,
            far: 100.0,
            yaw: 0.0,
            pitch: 0.0,
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            view_project_matrix: Mat4::IDENTITY,
        };
        camera.look_at(look_at);
        camera
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn set_clip_range(&mut self, near: f32, far: f32) {
        self.near = near;
        self.far = far;
        self.update_matrices();
    }

    pub fn set_aspect_ratio(&mut self, width: u32, height: u32) {
        self.aspect_ratio = width.max(1) as f32 / height.max(1) as f32;
        self.update_matrices();
    }

    pub fn look_at(&mut self, target: Vec3) {
        // Calculate the forward direction (from position to target)
        let forward = (target - self.position).normalize_or(Vec3::NEG_Z);

        // Calculate yaw and pitch from forward direction
        self.yaw = forward.x.atan2(-forward.z);
        self.pitch = forward.y.clamp(-1.0, 1.0).asin();
        self.update_matrices();
    }

    /// Places the camera on a circle of `radius` around `center`, `angle` radians around Y, at
    /// `height` above the center, looking at the center.
    pub fn orbit(&mut self, center: Vec3, radius: f32, height: f32, angle: f32) {
        self.position = center + Vec3::new(angle.sin() * radius, height, angle.cos() * radius);
        self.look_at(center);
    }

    pub fn move_relative(&mut self, direction: Vec3, magnitude: f32) {
        // Convert direction from camera space to world space
        let world_dir = self.rotation().conjugate() * direction;
        self.position += world_dir * magnitude;
        self.update_matrices();
    }

    pub fn rotate(&mut self, dx: f32, dy: f32) {
        self.yaw += dx * 0.01;
        self.pitch = (self.pitch + dy * 0.01).clamp(-PI / 2.0 + 0.1, PI / 2.0 - 0.1);
        self.update_matrices();
    }

    pub fn rotation(&self) -> Quat {
        // Pitch is applied after yaw, looking down -Z at zero rotation
        Quat::from_rotation_x(-self.pitch) * Quat::from_rotation_y(self.yaw)
    }

    pub fn update_matrices(&mut self) {
        self.view_matrix =
            Mat4::from_quat(self.rotation()) * Mat4::from_translation(-self.position);
        // GL clip space: -w <= z <= w
        self.projection_matrix =
            Mat4::perspective_rh_gl(self.fov, self.aspect_ratio, self.near, self.far);
        self.view_project_matrix = self.projection_matrix * self.view_matrix;
    }

    pub fn frame_input(&self) -> FrameInput {
        FrameInput::from_view_projection(
            self.view_project_matrix,
            self.position.into(),
            self.near,
            self.far,
        )
    }

    /// Frame input for geometry given in model space, placed in the world by `model`.
    pub fn frame_input_with_model(&self, model: Mat4) -> FrameInput {
        FrameInput {
            transform: VertexTransform::with_model(model, self.view_project_matrix),
            ..self.frame_input()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn look_at_centers_target() {
        let mut camera = Camera::new(Vec3::new(3.0, 2.0, 5.0), Vec3::ZERO, 1.0, 100, 100);
        camera.orbit(Vec3::new(1.0, 0.0, 0.0), 6.0, 2.0, 0.7);
        for target in [Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)] {
            camera.look_at(target);
            let clip = camera.view_project_matrix * target.extend(1.0);
            assert!(clip.w > 0.0);
            assert!((clip.x / clip.w).abs() < 1e-4, "{clip:?}");
            assert!((clip.y / clip.w).abs() < 1e-4, "{clip:?}");
        }
    }

    #[test]
    fn projection_uses_gl_depth_range() {
        let camera = Camera::new(Vec3::ZERO, Vec3::NEG_Z, 1.0, 100, 100);
        let near = camera.view_project_matrix * Vec4::new(0.0, 0.0, -camera.near(), 1.0);
        let far = camera.view_project_matrix * Vec4::new(0.0, 0.0, -camera.far(), 1.0);
        assert!((near.z / near.w + 1.0).abs() < 1e-4);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);
        // Clip w is the view distance
        assert!((near.w - camera.near()).abs() < 1e-6);
    }

    #[test]
    fn points_behind_camera_have_negative_w() {
        let camera = Camera::new(Vec3::ZERO, Vec3::NEG_Z, 1.0, 100, 100);
        let behind = camera.frame_input();
        let VertexTransform::WorldToClip(matrix) = behind.transform else {
            panic!("expected a world to clip transform");
        };
        assert!((matrix * Vec4::new(0.0, 0.0, 3.0, 1.0)).w < 0.0);
    }
}
