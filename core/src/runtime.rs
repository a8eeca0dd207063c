//! Engine runtime
//!
//! [`XrRuntime`] wires the session store, the scene and the phased frame clock
//! into one tick: the store refreshes session state and tracked collections
//! first, then every registered callback runs phase by phase against the new
//! snapshot.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::rc::Rc;

use crate::anchor::{create_anchor, AnchorTarget};
use crate::error::XrResult;
use crate::frame::{CallbackId, FrameClock, FramePhase, FrameTick};
use crate::host::{XrRenderer, XrSession};
use crate::math::Pose;
use crate::pose::{SpaceFollower, SpaceSource};
use crate::scene::{NodeId, Scene};
use crate::session::{FrameOf, SessionOf, SessionStore, XrState};

/// What frame callbacks get to work with
pub struct FrameContext<S: XrSession> {
    pub scene: Scene,
    /// Snapshot installed by the store at the start of this tick
    pub state: Rc<XrState<S>>,
}

impl<S: XrSession> std::fmt::Debug for FrameContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("scene", &self.scene.len())
            .field("state", &self.state)
            .finish()
    }
}

pub struct XrRuntime<R: XrRenderer> {
    store: SessionStore<R>,
    context: FrameContext<SessionOf<R>>,
    clock: FrameClock<FrameContext<SessionOf<R>>, FrameOf<R>>,
}

impl<R: XrRenderer> std::fmt::Debug for XrRuntime<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XrRuntime")
            .field("store", &self.store)
            .field("context", &self.context)
            .field("clock", &self.clock)
            .finish()
    }
}

impl<R: XrRenderer> XrRuntime<R> {
    pub fn new(store: SessionStore<R>, scene: Scene) -> Self {
        let state = store.state();
        Self {
            store,
            context: FrameContext { scene, state },
            clock: FrameClock::new(),
        }
    }

    pub fn store(&self) -> &SessionStore<R> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SessionStore<R> {
        &mut self.store
    }

    pub fn scene(&self) -> &Scene {
        &self.context.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.context.scene
    }

    pub fn state(&self) -> Rc<XrState<SessionOf<R>>> {
        self.store.state()
    }

    pub fn register(
        &mut self,
        phase: FramePhase,
        callback: impl FnMut(&mut FrameContext<SessionOf<R>>, &FrameTick<'_, FrameOf<R>>) + 'static,
    ) -> CallbackId {
        self.clock.register(phase, callback)
    }

    pub fn unregister(&mut self, id: CallbackId) -> bool {
        self.clock.unregister(id)
    }

    /// Keep `node` on `source` every tick, starting from `initial_pose`
    pub fn follow(
        &mut self,
        node: NodeId,
        source: SpaceSource,
        initial_pose: Option<Pose>,
    ) -> CallbackId {
        let follower = SpaceFollower::new(&mut self.context.scene, node, source, initial_pose);
        self.follow_with(follower)
    }

    /// Register an already configured follower in the pose-resolution phase
    pub fn follow_with(&mut self, mut follower: SpaceFollower) -> CallbackId {
        self.clock.register(FramePhase::PoseResolution, move |context, tick| {
            let images = context.state.tracked_images().map(|images| &**images);
            follower.update(&mut context.scene, tick, images);
        })
    }

    /// Create an anchor for the live session at `target`
    pub async fn create_anchor(
        &mut self,
        frame: Option<&FrameOf<R>>,
        target: &AnchorTarget,
    ) -> XrResult<<SessionOf<R> as XrSession>::Anchor> {
        let context = self.store.anchor_context(frame);
        create_anchor(context, &mut self.context.scene, target).await
    }

    /// Advance one frame
    pub fn tick(&mut self, delta: f32, frame: Option<&FrameOf<R>>) {
        self.store.on_frame(delta, frame);
        self.context.state = self.store.state();
        let tick = FrameTick::new(delta, frame, self.store.renderer().reference_space());
        self.clock.tick(&mut self.context, &tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use nalgebra::{UnitQuaternion, Vector3};

    use crate::emulator::{plane, EmulatedDevice, EmulatedRenderer};
    use crate::host::{SessionMode, SpaceId};
    use crate::scene::SceneGraph;

    fn runtime() -> (XrRuntime<EmulatedRenderer>, NodeId) {
        let mut scene = Scene::new();
        let camera = scene.add_node("camera", scene.root());
        let xr_camera = scene.add_node("xr-camera", scene.root());
        let store = SessionStore::new(EmulatedRenderer::new(camera, xr_camera));
        (XrRuntime::new(store, scene), camera)
    }

    #[tokio::test]
    async fn test_pose_resolution_runs_before_application() {
        let (mut runtime, _) = runtime();
        let device = EmulatedDevice::new();
        runtime
            .store_mut()
            .set_session(Rc::new(device.session()), SessionMode::ImmersiveAr, None)
            .await
            .unwrap();

        let root = runtime.scene().root();
        let node = runtime.scene_mut().add_node("table", root);
        let pose = Pose::new(Vector3::new(0.0, 1.0, -1.0), UnitQuaternion::identity());
        runtime.follow(node, SpaceSource::Space(SpaceId(42)), None);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        runtime.register(FramePhase::Application, move |context, _| {
            sink.borrow_mut().push(context.scene.is_visible(node));
        });

        runtime.tick(0.016, Some(&device.frame()));
        runtime.tick(0.016, Some(&device.frame().with_pose(SpaceId(42), pose)));

        assert_eq!(*seen.borrow(), vec![false, true]);
        assert_eq!(runtime.scene().local_matrix(node), pose.to_matrix());
    }

    #[tokio::test]
    async fn test_callbacks_see_fresh_tracked_collections() {
        let (mut runtime, _) = runtime();
        let device = EmulatedDevice::new();
        runtime
            .store_mut()
            .set_session(Rc::new(device.session()), SessionMode::ImmersiveAr, None)
            .await
            .unwrap();

        let counts = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&counts);
        runtime.register(FramePhase::Render, move |context, _| {
            let planes = context.state.tracked_planes().map_or(0, |planes| planes.len());
            sink.borrow_mut().push(planes);
        });

        runtime.tick(0.016, Some(&device.frame().with_planes(vec![plane(10, "floor")])));
        runtime.tick(0.016, Some(&device.frame()));

        assert_eq!(*counts.borrow(), vec![1, 0]);
    }

    #[tokio::test]
    async fn test_runtime_anchor_uses_live_session() {
        let (mut runtime, camera) = runtime();
        let device = EmulatedDevice::new();
        let frame = device.frame();
        let target = AnchorTarget {
            camera,
            world_position: Vector3::new(0.0, 0.0, -1.0),
            world_rotation: UnitQuaternion::identity(),
        };

        assert!(runtime.create_anchor(Some(&frame), &target).await.is_err());

        runtime
            .store_mut()
            .set_session(Rc::new(device.session()), SessionMode::ImmersiveAr, None)
            .await
            .unwrap();
        assert!(runtime.create_anchor(Some(&frame), &target).await.is_ok());
    }
}
