// Projection and view matrices.
//
// Conventions match the pipeline: +Y points down in clip space, +Z points
// into the screen, and depth lands in `[0, 1]`.

use glam::{EulerRot, Mat3, Mat4, Quat, Vec3, Vec4};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    projection: Mat4,
    view: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Axis-aligned box `[left, right] x [top, bottom] x [near, far]` onto
    /// the canonical view volume.
    pub fn set_orthographic_projection(
        &mut self,
        left: f32,
        right: f32,
        top: f32,
        bottom: f32,
        near: f32,
        far: f32,
    ) {
        // glam names its vertical bounds the other way round
        self.projection = Mat4::orthographic_lh(left, right, top, bottom, near, far);
    }

    /// `fovy` in radians.
    ///
    /// # Panics
    /// If `aspect` is zero or not finite.
    pub fn set_perspective_projection(&mut self, fovy: f32, aspect: f32, near: f32, far: f32) {
        assert!(
            aspect.is_finite() && aspect.abs() > f32::EPSILON,
            "Invalid aspect ratio {}",
            aspect
        );
        self.projection = Mat4::perspective_lh(fovy, aspect, near, far);
    }

    /// Look from `position` along `direction`.
    pub fn set_view_direction(&mut self, position: Vec3, direction: Vec3, up: Vec3) {
        let w = direction.normalize();
        let u = w.cross(up).normalize();
        let v = w.cross(u);
        self.view = view_from_basis(position, u, v, w);
    }

    pub fn set_view_target(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        self.set_view_direction(position, target - position, up);
    }

    /// Camera at `position` rotated by Y, then X, then Z (radians), the same
    /// order game object transforms use.
    pub fn set_view_yxz(&mut self, position: Vec3, rotation: Vec3) {
        let basis = Mat3::from_quat(Quat::from_euler(
            EulerRot::YXZ,
            rotation.y,
            rotation.x,
            rotation.z,
        ));
        self.view = view_from_basis(position, basis.x_axis, basis.y_axis, basis.z_axis);
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection_view(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Inverse of the rigid transform with axes `u, v, w` at `position`.
fn view_from_basis(position: Vec3, u: Vec3, v: Vec3, w: Vec3) -> Mat4 {
    Mat4::from_cols(
        Vec4::new(u.x, v.x, w.x, 0.0),
        Vec4::new(u.y, v.y, w.y, 0.0),
        Vec4::new(u.z, v.z, w.z, 0.0),
        Vec4::new(-u.dot(position), -v.dot(position), -w.dot(position), 1.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    const DOWN_IS_UP: Vec3 = Vec3::new(0.0, -1.0, 0.0);

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    #[test]
    fn perspective_depth_spans_zero_to_one() {
        let mut camera = Camera::new();
        camera.set_perspective_projection(FRAC_PI_2, 1.0, 0.1, 10.0);

        let near = camera.projection().project_point3(Vec3::new(0.0, 0.0, 0.1));
        let far = camera.projection().project_point3(Vec3::new(0.0, 0.0, 10.0));
        assert!(near.z.abs() < 1e-5);
        assert!((far.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn perspective_keeps_aspect() {
        let mut camera = Camera::new();
        camera.set_perspective_projection(FRAC_PI_2, 2.0, 0.1, 10.0);

        // 90 degree fov: y == z is the edge, x is divided by the aspect
        let p = camera.projection().project_point3(Vec3::new(1.0, 1.0, 1.0));
        assert!(approx(p, Vec3::new(0.5, 1.0, p.z)));
    }

    #[test]
    #[should_panic(expected = "Invalid aspect ratio")]
    fn zero_aspect_panics() {
        Camera::new().set_perspective_projection(1.0, 0.0, 0.1, 10.0);
    }

    #[test]
    fn orthographic_maps_box_to_clip_volume() {
        let mut camera = Camera::new();
        camera.set_orthographic_projection(-2.0, 2.0, -1.0, 1.0, 0.0, 4.0);

        let top_left_near = camera.projection().project_point3(Vec3::new(-2.0, -1.0, 0.0));
        let bottom_right_far = camera.projection().project_point3(Vec3::new(2.0, 1.0, 4.0));
        assert!(approx(top_left_near, Vec3::new(-1.0, -1.0, 0.0)));
        assert!(approx(bottom_right_far, Vec3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn view_direction_puts_target_ahead() {
        let mut camera = Camera::new();
        let eye = Vec3::new(0.0, 0.0, -5.0);
        camera.set_view_direction(eye, Vec3::Z, DOWN_IS_UP);

        let p = camera.view().transform_point3(Vec3::ZERO);
        assert!(approx(p, Vec3::new(0.0, 0.0, 5.0)));
    }

    #[test]
    fn view_target_matches_direction() {
        let eye = Vec3::new(1.0, -2.0, -3.0);
        let target = Vec3::new(0.5, 0.0, 2.0);

        let mut by_target = Camera::new();
        by_target.set_view_target(eye, target, DOWN_IS_UP);
        let mut by_direction = Camera::new();
        by_direction.set_view_direction(eye, target - eye, DOWN_IS_UP);

        assert_eq!(by_target.view(), by_direction.view());
    }

    #[test]
    fn view_yxz_without_rotation_is_translation() {
        let mut camera = Camera::new();
        let eye = Vec3::new(1.0, 2.0, 3.0);
        camera.set_view_yxz(eye, Vec3::ZERO);

        assert!(approx(camera.view().transform_point3(eye), Vec3::ZERO));
        assert!(approx(
            camera.view().transform_point3(Vec3::new(1.0, 2.0, 4.0)),
            Vec3::Z
        ));
    }

    #[test]
    fn view_yxz_yaw_turns_toward_x() {
        let mut camera = Camera::new();
        camera.set_view_yxz(Vec3::ZERO, Vec3::new(0.0, FRAC_PI_2, 0.0));

        // Yawed a quarter turn, the camera looks down +X
        let p = camera.view().transform_point3(Vec3::new(3.0, 0.0, 0.0));
        assert!(approx(p, Vec3::new(0.0, 0.0, 3.0)));
    }
}
