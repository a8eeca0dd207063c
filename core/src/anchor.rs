//! Spatial anchors
//!
//! Anchors are created relative to the camera rig: the requested world pose is
//! first expressed in the camera parent's frame, so an anchor stays valid when
//! the rig is moved or reparented. Persisted anchors additionally store a
//! durable handle under an application key, one handle per key, overwritten
//! rather than appended.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use log::debug;
use nalgebra::{UnitQuaternion, Vector3};

use crate::config::AnchorConfig;
use crate::error::{XrError, XrResult};
use crate::host::{SpaceId, XrAnchor, XrFrame, XrSession};
use crate::math::Pose;
use crate::scene::{NodeId, SceneGraph};
use crate::storage::KeyValueStorage;

/// Session, reference space and frame an anchor is created against
pub struct AnchorContext<'a, S: XrSession> {
    pub session: Option<&'a S>,
    pub reference_space: Option<SpaceId>,
    pub frame: Option<&'a S::Frame>,
}

impl<S: XrSession> Clone for AnchorContext<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: XrSession> Copy for AnchorContext<'_, S> {}

/// World pose requested for a new anchor and the camera it is relative to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorTarget {
    pub camera: NodeId,
    pub world_position: Vector3<f32>,
    pub world_rotation: UnitQuaternion<f32>,
}

/// Express a world pose in the frame of `camera`'s parent.
///
/// Only the parent's translation and rotation are removed; parent scale is
/// ignored, matching how the runtime interprets anchor poses.
pub fn camera_parent_local<G: SceneGraph + ?Sized>(scene: &mut G, target: &AnchorTarget) -> Pose {
    match scene.parent(target.camera) {
        Some(parent) => {
            let parent_world = scene.world_transform(parent);
            Pose::new(
                target.world_position - parent_world.position,
                parent_world.rotation.inverse() * target.world_rotation,
            )
        }
        None => Pose::new(target.world_position, target.world_rotation),
    }
}

/// Ask the runtime for an anchor at `target`
pub async fn create_anchor<S, G>(
    context: AnchorContext<'_, S>,
    scene: &mut G,
    target: &AnchorTarget,
) -> XrResult<S::Anchor>
where
    S: XrSession,
    G: SceneGraph + ?Sized,
{
    context.session.ok_or(XrError::SessionUnavailable)?;
    let frame = context.frame.ok_or(XrError::FrameUnavailable)?;
    let reference = context
        .reference_space
        .ok_or(XrError::ReferenceSpaceUnavailable)?;
    if !frame.supports_anchors() {
        return Err(XrError::capability("createAnchor"));
    }

    let local = camera_parent_local(scene, target);
    frame
        .create_anchor(local, reference)
        .await?
        .ok_or_else(|| XrError::AnchorCreationFailed("runtime returned no anchor".to_owned()))
}

/// Anchor persistence backed by a key-value store
#[derive(Debug)]
pub struct AnchorManager<K: KeyValueStorage> {
    storage: K,
    config: AnchorConfig,
}

impl<K: KeyValueStorage> AnchorManager<K> {
    pub fn new(storage: K) -> Self {
        Self::with_config(storage, AnchorConfig::default())
    }

    pub fn with_config(storage: K, config: AnchorConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &K {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut K {
        &mut self.storage
    }

    /// Stored durable handle for `key`
    pub fn persisted_handle(&self, key: &str) -> XrResult<Option<String>> {
        Ok(self.storage.get(&self.config.storage_key(key))?)
    }

    /// Create an anchor and store its durable handle under `key`
    pub async fn create_persisted_anchor<S, G>(
        &mut self,
        key: &str,
        context: AnchorContext<'_, S>,
        scene: &mut G,
        target: &AnchorTarget,
    ) -> XrResult<S::Anchor>
    where
        S: XrSession,
        G: SceneGraph + ?Sized,
    {
        let anchor = create_anchor(context, scene, target).await?;
        if !anchor.supports_persistent_handle() {
            return Err(XrError::capability("requestPersistentHandle"));
        }
        let handle = anchor.request_persistent_handle().await?;
        self.storage.set(&self.config.storage_key(key), &handle)?;
        debug!("persisted anchor {key:?} as {handle}");
        Ok(anchor)
    }

    /// Restore the anchor stored under `key`; `Ok(None)` when nothing is stored
    pub async fn get_persisted_anchor<S: XrSession>(
        &self,
        session: Option<&S>,
        key: &str,
    ) -> XrResult<Option<S::Anchor>> {
        let Some(handle) = self.persisted_handle(key)? else {
            return Ok(None);
        };
        let session = session.ok_or(XrError::SessionUnavailable)?;
        if !session.features().restore_persistent_anchor {
            return Err(XrError::capability("restorePersistentAnchor"));
        }
        let anchor = session.restore_persistent_anchor(&handle).await?;
        debug!("restored anchor {key:?} from {handle}");
        Ok(Some(anchor))
    }

    /// Delete the anchor stored under `key` and forget its handle.
    ///
    /// Nothing stored means nothing to do, and the runtime is not contacted.
    pub async fn delete_persisted_anchor<S: XrSession>(
        &mut self,
        session: Option<&S>,
        key: &str,
    ) -> XrResult<()> {
        let Some(handle) = self.persisted_handle(key)? else {
            return Ok(());
        };
        let session = session.ok_or(XrError::SessionUnavailable)?;
        if !session.features().delete_persistent_anchor {
            return Err(XrError::capability("deletePersistentAnchor"));
        }
        session.delete_persistent_anchor(&handle).await?;
        self.storage.remove(&self.config.storage_key(key))?;
        debug!("deleted anchor {key:?} ({handle})");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    use crate::emulator::{EmulatedDevice, EmulatedFrame, EmulatedSession};
    use crate::host::SessionFeatures;
    use crate::math::Transform;
    use crate::scene::Scene;
    use crate::storage::MemoryStorage;

    const REFERENCE: SpaceId = SpaceId(1);

    fn persistent_features() -> SessionFeatures {
        SessionFeatures {
            restore_persistent_anchor: true,
            delete_persistent_anchor: true,
            ..SessionFeatures::default()
        }
    }

    fn rig_scene() -> (Scene, NodeId) {
        let mut scene = Scene::new();
        let rig = scene.add_node("rig", scene.root());
        scene.set_local_transform(
            rig,
            &Transform::from_parts(
                Vector3::new(2.0, 0.0, 0.0),
                UnitQuaternion::from_euler_angles(0.0, std::f32::consts::FRAC_PI_2, 0.0),
                Vector3::repeat(1.0),
            ),
        );
        let camera = scene.add_node("camera", rig);
        (scene, camera)
    }

    fn target(camera: NodeId) -> AnchorTarget {
        AnchorTarget {
            camera,
            world_position: Vector3::new(3.0, 1.0, 0.0),
            world_rotation: UnitQuaternion::identity(),
        }
    }

    fn context<'a>(
        session: &'a EmulatedSession,
        frame: &'a EmulatedFrame,
    ) -> AnchorContext<'a, EmulatedSession> {
        AnchorContext {
            session: Some(session),
            reference_space: Some(REFERENCE),
            frame: Some(frame),
        }
    }

    #[tokio::test]
    async fn test_create_anchor_in_camera_parent_frame() {
        let device = EmulatedDevice::new();
        let session = device.session();
        let frame = device.frame();
        let (mut scene, camera) = rig_scene();

        let anchor = create_anchor(context(&session, &frame), &mut scene, &target(camera))
            .await
            .unwrap();

        let (pose, reference) = frame.anchor_requests()[0];
        assert_eq!(reference, REFERENCE);
        assert_relative_eq!(pose.position(), Vector3::new(1.0, 1.0, 0.0), epsilon = 1e-5);
        let expected = UnitQuaternion::from_euler_angles(0.0, -std::f32::consts::FRAC_PI_2, 0.0);
        assert_relative_eq!(pose.orientation(), expected, epsilon = 1e-5);
        assert_eq!(anchor.pose(), &pose);
    }

    #[tokio::test]
    async fn test_camera_without_parent_passes_pose_through() {
        let device = EmulatedDevice::new();
        let session = device.session();
        let frame = device.frame();
        let mut scene = Scene::new();
        let root = scene.root();

        create_anchor(context(&session, &frame), &mut scene, &target(root))
            .await
            .unwrap();

        let (pose, _) = frame.anchor_requests()[0];
        assert_eq!(pose.position(), Vector3::new(3.0, 1.0, 0.0));
    }

    #[tokio::test]
    async fn test_create_anchor_preconditions() {
        let device = EmulatedDevice::new();
        let session = device.session();
        let frame = device.frame();
        let (mut scene, camera) = rig_scene();

        let mut missing = context(&session, &frame);
        missing.session = None;
        let result = create_anchor(missing, &mut scene, &target(camera)).await;
        assert!(matches!(result, Err(XrError::SessionUnavailable)));

        let mut missing = context(&session, &frame);
        missing.frame = None;
        let result = create_anchor(missing, &mut scene, &target(camera)).await;
        assert!(matches!(result, Err(XrError::FrameUnavailable)));

        let mut missing = context(&session, &frame);
        missing.reference_space = None;
        let result = create_anchor(missing, &mut scene, &target(camera)).await;
        assert!(matches!(result, Err(XrError::ReferenceSpaceUnavailable)));

        let blind = EmulatedFrame::new();
        let result = create_anchor(context(&session, &blind), &mut scene, &target(camera)).await;
        assert!(matches!(result, Err(XrError::CapabilityAbsent { .. })));

        let refusing = device.frame().refusing_anchors();
        let result =
            create_anchor(context(&session, &refusing), &mut scene, &target(camera)).await;
        assert!(matches!(result, Err(XrError::AnchorCreationFailed(_))));
    }

    #[tokio::test]
    async fn test_persist_requires_durable_handles() {
        let device = EmulatedDevice::new();
        let session = device.session();
        let frame = device.frame();
        let (mut scene, camera) = rig_scene();
        let mut anchors = AnchorManager::new(MemoryStorage::new());

        let result = anchors
            .create_persisted_anchor("table", context(&session, &frame), &mut scene, &target(camera))
            .await;

        assert!(matches!(result, Err(XrError::CapabilityAbsent { .. })));
        assert!(anchors.storage().is_empty());
    }

    #[tokio::test]
    async fn test_persisted_anchor_round_trip_across_sessions() {
        let device = EmulatedDevice::new().with_persistent_handles();
        let first = device.session().with_features(persistent_features());
        let frame = device.frame();
        let (mut scene, camera) = rig_scene();
        let mut anchors = AnchorManager::with_config(
            MemoryStorage::new(),
            AnchorConfig {
                key_prefix: "app/".to_owned(),
            },
        );

        let created = anchors
            .create_persisted_anchor("table", context(&first, &frame), &mut scene, &target(camera))
            .await
            .unwrap();
        assert!(anchors.storage().get("app/table").unwrap().is_some());

        let second = device.session().with_features(persistent_features());
        let restored = anchors
            .get_persisted_anchor(Some(&second), "table")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.anchor_space(), created.anchor_space());

        anchors
            .delete_persisted_anchor(Some(&second), "table")
            .await
            .unwrap();
        assert!(anchors.persisted_handle("table").unwrap().is_none());
        assert!(device.persisted_handles().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_key_is_absent_without_host_call() {
        let session = EmulatedDevice::new().session();
        let mut anchors = AnchorManager::new(MemoryStorage::new());

        let restored = anchors
            .get_persisted_anchor(None::<&EmulatedSession>, "missing")
            .await
            .unwrap();
        assert!(restored.is_none());

        anchors
            .delete_persisted_anchor(Some(&session), "missing")
            .await
            .unwrap();
        assert!(session.deleted_handles().is_empty());
    }

    #[tokio::test]
    async fn test_stored_handle_without_capability_fails() {
        let session = EmulatedDevice::new().session();
        let mut anchors = AnchorManager::new(MemoryStorage::new());
        anchors.storage_mut().set("table", "anchor-9").unwrap();

        let restored = anchors.get_persisted_anchor(Some(&session), "table").await;
        assert!(matches!(restored, Err(XrError::CapabilityAbsent { .. })));

        let deleted = anchors.delete_persisted_anchor(Some(&session), "table").await;
        assert!(matches!(deleted, Err(XrError::CapabilityAbsent { .. })));
        assert!(anchors.persisted_handle("table").unwrap().is_some());
    }
}
