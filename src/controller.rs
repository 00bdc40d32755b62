// Keyboard fly-camera movement.

use std::f32::consts::TAU;

use glam::Vec3;
use winit::keyboard::KeyCode;

use crate::game_object::GameObject;
use crate::window::InputState;

/// Pitch limit in radians, just under straight up or down.
const PITCH_LIMIT: f32 = 1.5;

#[derive(Debug, Clone, Copy)]
pub struct KeyMappings {
    pub move_left: KeyCode,
    pub move_right: KeyCode,
    pub move_forward: KeyCode,
    pub move_backward: KeyCode,
    pub move_up: KeyCode,
    pub move_down: KeyCode,
    pub look_left: KeyCode,
    pub look_right: KeyCode,
    pub look_up: KeyCode,
    pub look_down: KeyCode,
}

impl Default for KeyMappings {
    fn default() -> Self {
        Self {
            move_left: KeyCode::KeyA,
            move_right: KeyCode::KeyD,
            move_forward: KeyCode::KeyW,
            move_backward: KeyCode::KeyS,
            move_up: KeyCode::KeyE,
            move_down: KeyCode::KeyQ,
            look_left: KeyCode::ArrowLeft,
            look_right: KeyCode::ArrowRight,
            look_up: KeyCode::ArrowUp,
            look_down: KeyCode::ArrowDown,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeyboardMovementController {
    pub keys: KeyMappings,
    pub move_speed: f32,
    pub look_speed: f32,
}

impl Default for KeyboardMovementController {
    fn default() -> Self {
        Self {
            keys: KeyMappings::default(),
            move_speed: 3.0,
            look_speed: 1.5,
        }
    }
}

impl KeyboardMovementController {
    /// Turn with the look keys, then walk in the XZ plane relative to the
    /// object's yaw. Up is -Y.
    pub fn move_in_plane_xz(&self, input: &InputState, dt: f32, object: &mut GameObject) {
        let axis = |positive: KeyCode, negative: KeyCode| -> f32 {
            input.is_pressed(positive) as i32 as f32 - input.is_pressed(negative) as i32 as f32
        };

        let rotate = Vec3::new(
            axis(self.keys.look_up, self.keys.look_down),
            axis(self.keys.look_right, self.keys.look_left),
            0.0,
        );

        let transform = &mut object.transform;
        if let Some(direction) = rotate.try_normalize() {
            transform.rotation += self.look_speed * dt * direction;
        }

        transform.rotation.x = transform.rotation.x.clamp(-PITCH_LIMIT, PITCH_LIMIT);
        transform.rotation.y = transform.rotation.y.rem_euclid(TAU);

        let yaw = transform.rotation.y;
        let forward = Vec3::new(yaw.sin(), 0.0, yaw.cos());
        let right = Vec3::new(forward.z, 0.0, -forward.x);
        let up = Vec3::NEG_Y;

        let movement = forward * axis(self.keys.move_forward, self.keys.move_backward)
            + right * axis(self.keys.move_right, self.keys.move_left)
            + up * axis(self.keys.move_up, self.keys.move_down);

        if let Some(direction) = movement.try_normalize() {
            transform.translation += self.move_speed * dt * direction;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_object::World;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    fn held(keys: &[KeyCode]) -> InputState {
        let mut input = InputState::default();
        for &key in keys {
            input.set(key, true);
        }
        input
    }

    #[test]
    fn idle_input_leaves_object_alone() {
        let mut world = World::new();
        let object = world.create_game_object();
        object.transform.translation = Vec3::new(1.0, 2.0, 3.0);

        KeyboardMovementController::default().move_in_plane_xz(&held(&[]), 0.5, object);
        assert_eq!(object.transform.translation, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(object.transform.rotation, Vec3::ZERO);
    }

    #[test]
    fn forward_follows_yaw() {
        let mut world = World::new();
        let object = world.create_game_object();
        let controller = KeyboardMovementController::default();

        controller.move_in_plane_xz(&held(&[KeyCode::KeyW]), 1.0, object);
        assert!(approx(object.transform.translation, Vec3::new(0.0, 0.0, 3.0)));

        object.transform.translation = Vec3::ZERO;
        object.transform.rotation.y = std::f32::consts::FRAC_PI_2;
        controller.move_in_plane_xz(&held(&[KeyCode::KeyW]), 1.0, object);
        assert!(approx(object.transform.translation, Vec3::new(3.0, 0.0, 0.0)));
    }

    #[test]
    fn diagonal_speed_is_normalized() {
        let mut world = World::new();
        let object = world.create_game_object();

        KeyboardMovementController::default().move_in_plane_xz(
            &held(&[KeyCode::KeyW, KeyCode::KeyD]),
            1.0,
            object,
        );
        assert!((object.transform.translation.length() - 3.0).abs() < 1e-5);
    }

    #[test]
    fn up_key_moves_toward_negative_y() {
        let mut world = World::new();
        let object = world.create_game_object();

        KeyboardMovementController::default().move_in_plane_xz(&held(&[KeyCode::KeyE]), 1.0, object);
        assert!(approx(object.transform.translation, Vec3::new(0.0, -3.0, 0.0)));
    }

    #[test]
    fn pitch_is_clamped_and_yaw_wraps() {
        let mut world = World::new();
        let object = world.create_game_object();
        object.transform.rotation = Vec3::new(1.4, TAU - 0.05, 0.0);
        let input = held(&[KeyCode::ArrowUp]);

        KeyboardMovementController::default().move_in_plane_xz(&input, 1.0, object);
        assert_eq!(object.transform.rotation.x, PITCH_LIMIT);

        object.transform.rotation.y = -0.25;
        KeyboardMovementController::default().move_in_plane_xz(&held(&[]), 1.0, object);
        assert!((object.transform.rotation.y - (TAU - 0.25)).abs() < 1e-5);
    }
}
