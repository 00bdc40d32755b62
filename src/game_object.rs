// Scene objects and the registry that names them.

use std::collections::HashMap;
use std::rc::Rc;

use glam::{EulerRot, Mat3, Mat4, Quat, Vec3};

use crate::model::Model;

pub type GameObjectId = u32;

/// Translation, scale and Tait-Bryan rotation (applied Y, then X, then Z).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformComponent {
    pub translation: Vec3,
    pub scale: Vec3,
    pub rotation: Vec3,
}

impl Default for TransformComponent {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Vec3::ZERO,
        }
    }
}

impl TransformComponent {
    fn orientation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.rotation.y, self.rotation.x, self.rotation.z)
    }

    /// translate * Ry * Rx * Rz * scale
    pub fn mat4(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.orientation(), self.translation)
    }

    /// Rotation with inverse scale; keeps normals perpendicular under
    /// non-uniform scaling.
    pub fn normal_matrix(&self) -> Mat3 {
        Mat3::from_quat(self.orientation()) * Mat3::from_diagonal(self.scale.recip())
    }
}

/// Move-only: ids must stay unique, so there is no `Clone`.
#[derive(Debug)]
pub struct GameObject {
    id: GameObjectId,
    pub model: Option<Rc<Model>>,
    pub color: Vec3,
    pub transform: TransformComponent,
}

impl GameObject {
    pub fn id(&self) -> GameObjectId {
        self.id
    }
}

/// Owns every game object and hands out ids. Ids increase monotonically and
/// are never reused, even after removal.
#[derive(Debug, Default)]
pub struct World {
    next_id: GameObjectId,
    objects: HashMap<GameObjectId, GameObject>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty object and return it for setup.
    pub fn create_game_object(&mut self) -> &mut GameObject {
        let id = self.next_id;
        self.next_id += 1;

        self.objects.entry(id).or_insert(GameObject {
            id,
            model: None,
            color: Vec3::ZERO,
            transform: TransformComponent::default(),
        })
    }

    pub fn get(&self, id: GameObjectId) -> Option<&GameObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: GameObjectId) -> Option<&mut GameObject> {
        self.objects.get_mut(&id)
    }

    pub fn remove(&mut self, id: GameObjectId) -> Option<GameObject> {
        self.objects.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GameObject> {
        self.objects.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    #[test]
    fn default_transform_is_identity() {
        let transform = TransformComponent::default();
        assert_eq!(transform.mat4(), Mat4::IDENTITY);
        assert_eq!(transform.normal_matrix(), Mat3::IDENTITY);
    }

    #[test]
    fn scale_then_rotate_then_translate() {
        let transform = TransformComponent {
            translation: Vec3::new(1.0, 2.0, 3.0),
            scale: Vec3::splat(2.0),
            rotation: Vec3::new(0.0, FRAC_PI_2, 0.0),
        };

        // +X scaled to 2, yawed 90 degrees about Y onto -Z, then translated
        let p = transform.mat4().transform_point3(Vec3::X);
        assert!(approx(p, Vec3::new(1.0, 2.0, 1.0)), "got {p}");
    }

    #[test]
    fn rotation_order_is_yxz() {
        let transform = TransformComponent {
            rotation: Vec3::new(0.3, 0.5, 0.7),
            ..Default::default()
        };
        let expected = Mat4::from_rotation_y(0.5)
            * Mat4::from_rotation_x(0.3)
            * Mat4::from_rotation_z(0.7);

        let v = Vec3::new(0.2, -1.0, 0.4);
        assert!(approx(
            transform.mat4().transform_vector3(v),
            expected.transform_vector3(v)
        ));
    }

    #[test]
    fn normal_matrix_inverts_scale() {
        let transform = TransformComponent {
            scale: Vec3::new(2.0, 4.0, 0.5),
            ..Default::default()
        };
        let n = transform.normal_matrix();
        assert!(approx(n * Vec3::X, Vec3::new(0.5, 0.0, 0.0)));
        assert!(approx(n * Vec3::Y, Vec3::new(0.0, 0.25, 0.0)));
        assert!(approx(n * Vec3::Z, Vec3::new(0.0, 0.0, 2.0)));
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut world = World::new();
        let a = world.create_game_object().id();
        let b = world.create_game_object().id();
        assert_eq!((a, b), (0, 1));

        world.remove(b);
        let c = world.create_game_object().id();
        assert_eq!(c, 2);
        assert_eq!(world.len(), 2);
        assert!(world.get(b).is_none());
    }

    #[test]
    fn separate_worlds_count_independently() {
        let mut first = World::new();
        let mut second = World::new();
        first.create_game_object();
        first.create_game_object();
        assert_eq!(second.create_game_object().id(), 0);
    }

    #[test]
    fn created_object_is_editable_in_place() {
        let mut world = World::new();
        let object = world.create_game_object();
        object.color = Vec3::new(0.1, 0.2, 0.3);
        object.transform.translation.z = 2.5;
        let id = object.id();

        let stored = world.get(id).unwrap();
        assert_eq!(stored.color, Vec3::new(0.1, 0.2, 0.3));
        assert!(stored.model.is_none());
        assert_eq!(world.iter().count(), 1);
    }
}
