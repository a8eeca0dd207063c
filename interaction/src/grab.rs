//! Grab manipulation
//!
//! A [`GrabManipulator`] turns the pointers holding a node into a rigid
//! transform, plus uniform scale while two pointers hold it.
//!
//! ## States
//!
//! ```text
//!   Idle ──down──▶ OnePointer ──down──▶ TwoPointers
//!    ▲                │  ▲                  │
//!    └──────up────────┘  └───────up─────────┘
//! ```
//!
//! Every pointer-count transition re-bases the grab: the node's current world
//! transform and each pointer's current pose become the new start values, so
//! the node never jumps when a second hand joins or one lets go. While grabbed
//! the node is lifted out of its parent to the scene root and written in world
//! space; on release it goes back under the original parent, keeping its
//! world transform.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use log::{debug, trace};
use nalgebra::{UnitQuaternion, Vector3};
use thiserror::Error;

use spatia_core::config::{ConfigError, GrabConfig};
use spatia_core::math::{shortest_arc, Transform};
use spatia_core::scene::{NodeId, SceneGraph};

use crate::pointer::{EventResponse, PointerEvent, PointerId};

#[derive(Debug, Error)]
pub enum GrabError {
    #[error("invalid grab configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type GrabResult<T> = Result<T, GrabError>;

/// Number of pointers currently holding the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabPhase {
    Idle,
    OnePointer,
    TwoPointers,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PointerState {
    start_position: Vector3<f32>,
    start_rotation: UnitQuaternion<f32>,
    current_position: Vector3<f32>,
    current_rotation: UnitQuaternion<f32>,
}

impl PointerState {
    fn new(position: Vector3<f32>, rotation: UnitQuaternion<f32>) -> Self {
        Self {
            start_position: position,
            start_rotation: rotation,
            current_position: position,
            current_rotation: rotation,
        }
    }

    fn rebase(&mut self) {
        self.start_position = self.current_position;
        self.start_rotation = self.current_rotation;
    }
}

type GrabCallback = Box<dyn FnMut(NodeId)>;

/// Makes one scene node grabbable by up to two pointers
pub struct GrabManipulator {
    node: NodeId,
    /// Parent the node returns to on release
    attach_point: NodeId,
    config: GrabConfig,
    /// Active pointers in press order; the first one leads two-pointer grabs
    pointers: Vec<(PointerId, PointerState)>,
    /// World transform of the node at the last re-base
    object_start: Transform,
    on_grabbed: Option<GrabCallback>,
    on_released: Option<GrabCallback>,
}

impl std::fmt::Debug for GrabManipulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrabManipulator")
            .field("node", &self.node)
            .field("attach_point", &self.attach_point)
            .field("config", &self.config)
            .field("pointers", &self.pointers)
            .field("object_start", &self.object_start)
            .finish()
    }
}

impl GrabManipulator {
    /// Manipulator for `node`, returning it to its current parent on release
    pub fn new<G: SceneGraph + ?Sized>(
        scene: &G,
        node: NodeId,
        config: GrabConfig,
    ) -> GrabResult<Self> {
        config.validate()?;
        Ok(Self {
            node,
            attach_point: scene.parent(node).unwrap_or_else(|| scene.root()),
            config,
            pointers: Vec::with_capacity(2),
            object_start: Transform::identity(),
            on_grabbed: None,
            on_released: None,
        })
    }

    pub fn on_grabbed(mut self, callback: impl FnMut(NodeId) + 'static) -> Self {
        self.on_grabbed = Some(Box::new(callback));
        self
    }

    pub fn on_released(mut self, callback: impl FnMut(NodeId) + 'static) -> Self {
        self.on_released = Some(Box::new(callback));
        self
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn config(&self) -> &GrabConfig {
        &self.config
    }

    pub fn phase(&self) -> GrabPhase {
        match self.pointers.len() {
            0 => GrabPhase::Idle,
            1 => GrabPhase::OnePointer,
            _ => GrabPhase::TwoPointers,
        }
    }

    pub fn is_grabbed(&self) -> bool {
        !self.pointers.is_empty()
    }

    pub fn active_pointers(&self) -> impl Iterator<Item = PointerId> + '_ {
        self.pointers.iter().map(|(id, _)| *id)
    }

    fn pointer_mut(&mut self, id: PointerId) -> Option<&mut PointerState> {
        self.pointers
            .iter_mut()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, state)| state)
    }

    /// Snapshot the node and restart every pointer from where it is now
    fn rebase<G: SceneGraph + ?Sized>(&mut self, scene: &mut G) {
        self.object_start = scene.world_transform(self.node);
        for (_, pointer) in &mut self.pointers {
            pointer.rebase();
        }
    }

    pub fn pointer_down<G: SceneGraph + ?Sized>(
        &mut self,
        scene: &mut G,
        event: &PointerEvent,
    ) -> EventResponse {
        if !event.spatial {
            trace!("grab ignored non-spatial pointer {:?}", event.pointer_id);
            return EventResponse::Ignored;
        }
        if self.pointer_mut(event.pointer_id).is_some() {
            return EventResponse::Captured;
        }
        if self.pointers.len() >= self.config.effective_max_grabbers() {
            trace!("grab rejected pointer {:?}: already held", event.pointer_id);
            return EventResponse::Ignored;
        }

        self.rebase(scene);
        self.pointers
            .push((event.pointer_id, PointerState::new(event.point, event.rotation)));

        if self.pointers.len() == 1 {
            let root = scene.root();
            scene.attach(self.node, root);
            debug!("node {:?} grabbed", self.node);
            if let Some(callback) = self.on_grabbed.as_mut() {
                callback(self.node);
            }
        }
        EventResponse::Captured
    }

    pub fn pointer_move(&mut self, event: &PointerEvent) -> EventResponse {
        if !event.spatial {
            return EventResponse::Ignored;
        }
        match self.pointer_mut(event.pointer_id) {
            Some(pointer) => {
                pointer.current_position = event.point;
                pointer.current_rotation = event.rotation;
                EventResponse::Captured
            }
            None => EventResponse::Ignored,
        }
    }

    /// Pointer lifted or left the node
    pub fn pointer_up<G: SceneGraph + ?Sized>(
        &mut self,
        scene: &mut G,
        pointer_id: PointerId,
    ) -> EventResponse {
        let Some(position) = self
            .pointers
            .iter()
            .position(|(candidate, _)| *candidate == pointer_id)
        else {
            return EventResponse::Ignored;
        };
        self.pointers.remove(position);

        if !self.pointers.is_empty() {
            self.rebase(scene);
            return EventResponse::Captured;
        }

        scene.attach(self.node, self.attach_point);
        debug!("node {:?} released", self.node);
        if let Some(callback) = self.on_released.as_mut() {
            callback(self.node);
        }
        EventResponse::Captured
    }

    /// Same as [`GrabManipulator::pointer_up`]
    pub fn pointer_cancel<G: SceneGraph + ?Sized>(
        &mut self,
        scene: &mut G,
        pointer_id: PointerId,
    ) -> EventResponse {
        self.pointer_up(scene, pointer_id)
    }

    /// World transform for the current pointer poses, `None` while idle
    pub fn solve(&self) -> Option<Transform> {
        let start = &self.object_start;
        match self.pointers.as_slice() {
            [] => None,
            [(_, pointer)] => {
                let offset = start.position - pointer.start_position;
                let delta = pointer.current_rotation * pointer.start_rotation.inverse();
                Some(Transform::from_parts(
                    delta * offset + pointer.current_position,
                    delta * start.rotation,
                    start.scale,
                ))
            }
            [(_, first), (_, second), ..] => {
                let initial = second.start_position - first.start_position;
                let current = second.current_position - first.current_position;
                let initial_length = initial.norm();
                let current_length = current.norm();

                let threshold = self.config.degenerate_distance;
                if initial_length <= threshold || current_length <= threshold {
                    return Some(Transform::from_parts(
                        start.position - first.start_position + first.current_position,
                        start.rotation,
                        start.scale,
                    ));
                }

                let factor = current_length / initial_length;
                let delta = shortest_arc(&(initial / initial_length), &(current / current_length));
                Some(Transform::from_parts(
                    delta * ((start.position - first.start_position) * factor)
                        + first.current_position,
                    delta * start.rotation,
                    start.scale * factor,
                ))
            }
        }
    }

    /// Write this frame's transform onto the node
    pub fn update<G: SceneGraph + ?Sized>(&mut self, scene: &mut G) {
        if let Some(world) = self.solve() {
            scene.set_world_transform(self.node, &world);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::f32::consts::FRAC_PI_2;
    use std::rc::Rc;

    use approx::assert_relative_eq;
    use spatia_core::scene::Scene;

    fn down(id: u64, x: f32, y: f32, z: f32) -> PointerEvent {
        PointerEvent::spatial(PointerId(id), Vector3::new(x, y, z), UnitQuaternion::identity())
    }

    fn setup() -> (Scene, NodeId, NodeId) {
        let mut scene = Scene::new();
        let shelf = scene.add_node("shelf", scene.root());
        scene.set_local_transform(shelf, &Transform::from_position(Vector3::new(0.0, 1.0, 0.0)));
        let cup = scene.add_node("cup", shelf);
        scene.set_local_transform(cup, &Transform::from_position(Vector3::new(1.0, 0.0, 0.0)));
        scene.update_world_matrix(scene.root());
        (scene, shelf, cup)
    }

    #[test]
    fn test_one_pointer_translation() {
        let (mut scene, _, cup) = setup();
        let mut grab = GrabManipulator::new(&scene, cup, GrabConfig::default()).unwrap();

        assert!(grab.pointer_down(&mut scene, &down(1, 1.0, 1.0, 0.5)).is_captured());
        assert_eq!(scene.parent(cup), Some(scene.root()));
        grab.pointer_move(&down(1, 2.0, 1.5, 0.5));
        grab.update(&mut scene);

        let world = scene.world_transform(cup);
        assert_relative_eq!(world.position, Vector3::new(2.0, 1.5, 0.0), epsilon = 1e-5);
        assert_relative_eq!(world.scale, Vector3::repeat(1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_one_pointer_rotation_swings_offset() {
        let (mut scene, _, cup) = setup();
        let mut grab = GrabManipulator::new(&scene, cup, GrabConfig::default()).unwrap();

        grab.pointer_down(&mut scene, &down(1, 0.0, 1.0, 0.0));
        let turned = UnitQuaternion::from_euler_angles(0.0, FRAC_PI_2, 0.0);
        grab.pointer_move(&PointerEvent::spatial(PointerId(1), Vector3::new(0.0, 1.0, 0.0), turned));
        grab.update(&mut scene);

        let world = scene.world_transform(cup);
        assert_relative_eq!(world.position, Vector3::new(0.0, 1.0, -1.0), epsilon = 1e-5);
        assert_relative_eq!(world.rotation, turned, epsilon = 1e-5);
    }

    #[test]
    fn test_two_pointers_scale_uniformly() {
        let (mut scene, _, cup) = setup();
        let mut grab = GrabManipulator::new(&scene, cup, GrabConfig::default()).unwrap();

        grab.pointer_down(&mut scene, &down(1, 0.0, 1.0, 0.0));
        grab.pointer_down(&mut scene, &down(2, 2.0, 1.0, 0.0));
        assert_eq!(grab.phase(), GrabPhase::TwoPointers);
        grab.pointer_move(&down(2, 4.0, 1.0, 0.0));
        grab.update(&mut scene);

        let world = scene.world_transform(cup);
        assert_relative_eq!(world.position, Vector3::new(2.0, 1.0, 0.0), epsilon = 1e-5);
        assert_relative_eq!(world.scale, Vector3::repeat(2.0), epsilon = 1e-5);
        assert_relative_eq!(world.rotation, UnitQuaternion::identity(), epsilon = 1e-5);
    }

    #[test]
    fn test_two_pointers_rotate_about_leader() {
        let (mut scene, _, cup) = setup();
        let mut grab = GrabManipulator::new(&scene, cup, GrabConfig::default()).unwrap();

        grab.pointer_down(&mut scene, &down(1, 0.0, 1.0, 0.0));
        grab.pointer_down(&mut scene, &down(2, 2.0, 1.0, 0.0));
        grab.pointer_move(&down(2, 0.0, 3.0, 0.0));
        grab.update(&mut scene);

        let world = scene.world_transform(cup);
        assert_relative_eq!(world.position, Vector3::new(0.0, 2.0, 0.0), epsilon = 1e-5);
        assert_relative_eq!(world.scale, Vector3::repeat(1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_coincident_pointers_freeze_scale() {
        let (mut scene, _, cup) = setup();
        let mut grab = GrabManipulator::new(&scene, cup, GrabConfig::default()).unwrap();

        grab.pointer_down(&mut scene, &down(1, 0.5, 1.0, 0.0));
        grab.pointer_down(&mut scene, &down(2, 0.5, 1.0, 0.0));
        grab.pointer_move(&down(1, 1.5, 1.0, 0.0));
        grab.pointer_move(&down(2, 3.0, 1.0, 0.0));
        grab.update(&mut scene);

        let world = scene.world_transform(cup);
        assert!(world.position.iter().all(|v| v.is_finite()));
        assert_relative_eq!(world.position, Vector3::new(2.0, 1.0, 0.0), epsilon = 1e-5);
        assert_relative_eq!(world.scale, Vector3::repeat(1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_release_of_one_of_two_is_continuous() {
        let (mut scene, _, cup) = setup();
        let mut grab = GrabManipulator::new(&scene, cup, GrabConfig::default()).unwrap();

        grab.pointer_down(&mut scene, &down(1, 0.0, 1.0, 0.0));
        grab.pointer_down(&mut scene, &down(2, 2.0, 1.0, 0.0));
        grab.pointer_move(&down(1, -1.0, 1.0, 0.0));
        grab.pointer_move(&down(2, 3.0, 1.5, 0.0));
        grab.update(&mut scene);
        let before = scene.world_transform(cup);

        grab.pointer_up(&mut scene, PointerId(1));
        assert_eq!(grab.phase(), GrabPhase::OnePointer);
        grab.update(&mut scene);
        let after = scene.world_transform(cup);

        assert_relative_eq!(after.position, before.position, epsilon = 1e-4);
        assert_relative_eq!(after.scale, before.scale, epsilon = 1e-4);
        assert_relative_eq!(after.rotation, before.rotation, epsilon = 1e-4);
    }

    #[test]
    fn test_release_returns_node_to_parent_in_place() {
        let (mut scene, shelf, cup) = setup();
        let events = Rc::new(RefCell::new(Vec::new()));
        let grabbed = Rc::clone(&events);
        let released = Rc::clone(&events);
        let mut grab = GrabManipulator::new(&scene, cup, GrabConfig::default())
            .unwrap()
            .on_grabbed(move |_| grabbed.borrow_mut().push("grabbed"))
            .on_released(move |_| released.borrow_mut().push("released"));

        grab.pointer_down(&mut scene, &down(1, 1.0, 1.0, 0.0));
        grab.pointer_down(&mut scene, &down(2, 1.0, 2.0, 0.0));
        grab.pointer_move(&down(1, 1.0, 1.0, 3.0));
        grab.update(&mut scene);
        let held = scene.world_transform(cup);

        assert!(grab.pointer_up(&mut scene, PointerId(9)) == EventResponse::Ignored);
        grab.pointer_up(&mut scene, PointerId(2));
        grab.pointer_cancel(&mut scene, PointerId(1));

        assert_eq!(*events.borrow(), vec!["grabbed", "released"]);
        assert_eq!(scene.parent(cup), Some(shelf));
        assert!(!grab.is_grabbed());
        let world = scene.world_transform(cup);
        assert_relative_eq!(world.position, held.position, epsilon = 1e-5);
    }

    #[test]
    fn test_release_under_rotated_scaled_parent_keeps_world_transform() {
        let mut scene = Scene::new();
        let shelf = scene.add_node("shelf", scene.root());
        scene.set_local_transform(
            shelf,
            &Transform::from_parts(
                Vector3::new(0.0, 1.0, 0.0),
                UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_2),
                Vector3::new(2.0, 2.0, 2.0),
            ),
        );
        let cup = scene.add_node("cup", shelf);
        scene.set_local_transform(cup, &Transform::from_position(Vector3::new(1.0, 0.0, 0.0)));
        scene.update_world_matrix(scene.root());
        let mut grab = GrabManipulator::new(&scene, cup, GrabConfig::default()).unwrap();

        grab.pointer_down(&mut scene, &down(1, 0.0, 1.0, 0.0));
        grab.pointer_down(&mut scene, &down(2, 1.0, 1.0, 0.0));
        grab.pointer_move(&down(2, 0.0, 1.0, 3.0));
        grab.update(&mut scene);
        let held = scene.world_transform(cup);
        assert_relative_eq!(held.scale, Vector3::new(6.0, 6.0, 6.0), epsilon = 1e-4);

        grab.pointer_up(&mut scene, PointerId(2));
        grab.pointer_up(&mut scene, PointerId(1));

        assert_eq!(scene.parent(cup), Some(shelf));
        let world = scene.world_transform(cup);
        assert_relative_eq!(world.position, held.position, epsilon = 1e-4);
        assert_relative_eq!(world.rotation, held.rotation, epsilon = 1e-4);
        assert_relative_eq!(world.scale, held.scale, epsilon = 1e-4);
        let local = scene.local_transform(cup);
        assert_relative_eq!(local.scale, Vector3::new(3.0, 3.0, 3.0), epsilon = 1e-4);
    }

    #[test]
    fn test_pointer_limits() {
        let (mut scene, _, cup) = setup();
        let config = GrabConfig {
            max_grabbers: 1,
            ..GrabConfig::default()
        };
        let mut grab = GrabManipulator::new(&scene, cup, config).unwrap();

        let mut flat = down(5, 0.0, 0.0, 0.0);
        flat.spatial = false;
        assert_eq!(grab.pointer_down(&mut scene, &flat), EventResponse::Ignored);
        assert_eq!(grab.phase(), GrabPhase::Idle);

        assert!(grab.pointer_down(&mut scene, &down(1, 0.0, 0.0, 0.0)).is_captured());
        assert_eq!(grab.pointer_down(&mut scene, &down(2, 1.0, 0.0, 0.0)), EventResponse::Ignored);
        assert_eq!(grab.pointer_move(&down(2, 1.0, 0.0, 0.0)), EventResponse::Ignored);
        assert_eq!(grab.active_pointers().collect::<Vec<_>>(), vec![PointerId(1)]);
        assert!(grab.pointer_down(&mut scene, &down(1, 0.0, 0.0, 0.0)).is_captured());
        assert_eq!(grab.active_pointers().count(), 1);
    }

    #[test]
    fn test_hard_cap_overrides_config() {
        let (mut scene, _, cup) = setup();
        let config = GrabConfig {
            max_grabbers: 5,
            ..GrabConfig::default()
        };
        let mut grab = GrabManipulator::new(&scene, cup, config).unwrap();

        for id in 0..3 {
            grab.pointer_down(&mut scene, &down(id, id as f32, 0.0, 0.0));
        }
        assert_eq!(grab.active_pointers().count(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (scene, _, cup) = setup();
        let config = GrabConfig {
            max_grabbers: 0,
            ..GrabConfig::default()
        };
        assert!(matches!(
            GrabManipulator::new(&scene, cup, config),
            Err(GrabError::Config(_))
        ));
    }
}
