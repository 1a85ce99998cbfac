// Model-view-projection transform
//
// Draw items carry all three matrices; the frame driver composes them into
// the single matrix pushed to the vertex shader.

use glam::Mat4;

/// Per-draw transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mvp {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl Default for Mvp {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        }
    }
}

impl Mvp {
    pub fn new(model: Mat4, view: Mat4, proj: Mat4) -> Self {
        Self { model, view, proj }
    }

    /// Vulkan-style perspective: depth in [0, 1] and Y pointing down in clip space.
    pub fn perspective(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(fov_y_radians, aspect, near, far);
        proj.y_axis.y *= -1.0;
        proj
    }

    /// `proj * view * model`
    pub fn compose(&self) -> Mat4 {
        self.proj * self.view * self.model
    }

    pub fn with_model(self, model: Mat4) -> Self {
        Self { model, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};

    #[test]
    fn identity_composes_to_identity() {
        assert_eq!(Mvp::default().compose(), Mat4::IDENTITY);
    }

    #[test]
    fn model_applies_before_view_and_projection() {
        let mvp = Mvp::new(
            Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0)),
            Mat4::from_scale(Vec3::splat(2.0)),
            Mat4::IDENTITY,
        );
        // translate then scale: (0 + 1) * 2
        let p = mvp.compose() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(p.abs_diff_eq(Vec4::new(2.0, 0.0, 0.0, 1.0), 1e-6));
    }

    #[test]
    fn perspective_flips_y_and_maps_near_to_zero() {
        let proj = Mvp::perspective(70f32.to_radians(), 4.0 / 3.0, 0.1, 100.0);
        let near = proj * Vec4::new(0.0, 0.0, -0.1, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);

        let up = proj * Vec4::new(0.0, 1.0, -1.0, 1.0);
        assert!(up.y < 0.0);
    }
}
