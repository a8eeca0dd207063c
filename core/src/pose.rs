//! Pose resolution
//!
//! Turns a trackable space into a node transform for the current tick. Losing
//! tracking is a normal, transient condition here: it hides the node and
//! nothing else. The node becomes visible again on the first tick that
//! resolves a pose.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use nalgebra::Matrix4;

use crate::frame::FrameTick;
use crate::host::{SpaceId, XrFrame};
use crate::math::Pose;
use crate::scene::{NodeId, SceneGraph};
use crate::tracker::TrackedImages;

/// Callback receiving a node and its world matrix right after a pose was applied
pub type OnPoseApplied = Box<dyn FnMut(NodeId, &Matrix4<f32>)>;

/// Pose of `space` in the reference space, if both the reference space and the
/// frame are available and the runtime can locate the space this tick
pub fn resolve_pose<F: XrFrame>(
    reference_space: Option<SpaceId>,
    frame: Option<&F>,
    space: SpaceId,
) -> Option<Pose> {
    let reference = reference_space?;
    let frame = frame?;
    frame.pose(space, reference)
}

/// Write `pose` onto `node`, hiding the node when there is no pose.
///
/// The pose matrix replaces the local matrix as a whole. Returns whether the
/// node is visible afterwards.
pub fn apply_pose<G: SceneGraph + ?Sized>(scene: &mut G, node: NodeId, pose: Option<&Pose>) -> bool {
    let Some(pose) = pose else {
        scene.set_visible(node, false);
        return false;
    };
    scene.set_visible(node, true);
    scene.set_local_matrix(node, pose.to_matrix());
    true
}

/// [`apply_pose`], then recompute the world matrix and hand it to `on_frame`
/// so the callback observes this tick's transform
pub fn apply_pose_with<G, C>(scene: &mut G, node: NodeId, pose: Option<&Pose>, on_frame: &mut C)
where
    G: SceneGraph + ?Sized,
    C: FnMut(NodeId, &Matrix4<f32>) + ?Sized,
{
    if !apply_pose(scene, node, pose) {
        return;
    }
    scene.update_world_matrix(node);
    let world = scene.world_matrix(node);
    on_frame(node, &world);
}

/// Where a follower reads its space from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceSource {
    /// A space that stays valid for the follower's lifetime (plane, mesh, anchor)
    Space(SpaceId),
    /// Whatever space the latest result for this requested image carries
    TrackedImage(usize),
}

/// Keeps one node glued to a trackable space.
///
/// Register [`SpaceFollower::update`] in [`crate::FramePhase::PoseResolution`]
/// so content below the node sees the fresh transform in the same tick.
pub struct SpaceFollower {
    node: NodeId,
    source: SpaceSource,
    on_frame: Option<OnPoseApplied>,
}

impl std::fmt::Debug for SpaceFollower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceFollower")
            .field("node", &self.node)
            .field("source", &self.source)
            .field("on_frame", &self.on_frame.is_some())
            .finish()
    }
}

impl SpaceFollower {
    /// Bind `node` to `source`, applying `initial_pose` right away so content
    /// created between ticks starts at the right place
    pub fn new<G: SceneGraph + ?Sized>(
        scene: &mut G,
        node: NodeId,
        source: SpaceSource,
        initial_pose: Option<Pose>,
    ) -> Self {
        if let Some(pose) = initial_pose {
            apply_pose(scene, node, Some(&pose));
        }
        Self {
            node,
            source,
            on_frame: None,
        }
    }

    pub fn with_on_frame(mut self, callback: impl FnMut(NodeId, &Matrix4<f32>) + 'static) -> Self {
        self.on_frame = Some(Box::new(callback));
        self
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn source(&self) -> SpaceSource {
        self.source
    }

    /// Resolve and apply this tick's pose.
    ///
    /// An image follower whose image has no result this tick keeps its last
    /// transform; the runtime reports the image again once it is re-acquired.
    pub fn update<G: SceneGraph + ?Sized, F: XrFrame>(
        &mut self,
        scene: &mut G,
        tick: &FrameTick<'_, F>,
        images: Option<&TrackedImages>,
    ) {
        let space = match self.source {
            SpaceSource::Space(space) => space,
            SpaceSource::TrackedImage(index) => {
                match images.and_then(|images| images.get(&index)) {
                    Some(result) => result.image_space,
                    None => return,
                }
            }
        };

        let pose = resolve_pose(tick.reference_space, tick.frame, space);
        match self.on_frame.as_mut() {
            Some(callback) => apply_pose_with(scene, self.node, pose.as_ref(), callback.as_mut()),
            None => {
                apply_pose(scene, self.node, pose.as_ref());
            }
        }
    }
}
