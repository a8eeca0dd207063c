//! Per-frame tracked-entity diffing
//!
//! Detected planes and meshes are compared to the previous tick by identity.
//! Only a membership change produces a new collection, so subscribers can
//! detect "something appeared or disappeared" with a pointer comparison.
//! Entities that were already tracked keep the pose captured on the tick they
//! first appeared; only newcomers resolve a fresh one.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Deref;
use std::rc::Rc;

use log::debug;

use crate::config::TrackingConfig;
use crate::host::{ImageTrackingResult, SpaceId, Trackable, XrFrame, XrMesh, XrPlane};
use crate::identity::IdRegistry;
use crate::math::Pose;

/// A runtime entity together with the pose captured when it was first detected
#[derive(Debug)]
pub struct Tracked<T> {
    entity: Rc<T>,
    initial_pose: Option<Pose>,
}

impl<T> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            entity: Rc::clone(&self.entity),
            initial_pose: self.initial_pose,
        }
    }
}

impl<T> Tracked<T> {
    pub fn new(entity: Rc<T>, initial_pose: Option<Pose>) -> Self {
        Self {
            entity,
            initial_pose,
        }
    }

    pub fn entity(&self) -> &Rc<T> {
        &self.entity
    }

    pub fn initial_pose(&self) -> Option<&Pose> {
        self.initial_pose.as_ref()
    }

    pub fn is(&self, entity: &Rc<T>) -> bool {
        Rc::ptr_eq(&self.entity, entity)
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entity
    }
}

/// Immutable snapshot of one tracked collection
pub type TrackedCollection<T> = Rc<[Tracked<T>]>;

/// Latest image-tracking results keyed by requested-image index
pub type TrackedImages = BTreeMap<usize, ImageTrackingResult>;

pub fn empty_collection<T>() -> TrackedCollection<T> {
    Rc::from(Vec::new())
}

fn identity_key<T>(entity: &Rc<T>) -> usize {
    Rc::as_ptr(entity) as *const () as usize
}

/// Same size and every tracked entity present in `detected`
pub fn same_membership<T>(detected: &[Rc<T>], tracked: &[Tracked<T>]) -> bool {
    if detected.len() != tracked.len() {
        return false;
    }
    let detected: HashSet<usize> = detected.iter().map(identity_key).collect();
    tracked
        .iter()
        .all(|entry| detected.contains(&identity_key(&entry.entity)))
}

/// New collection for `detected`, or `None` if membership is unchanged.
///
/// A missing detector counts as an empty detection set.
pub fn diff_collection<T: Trackable, F: XrFrame>(
    previous: &TrackedCollection<T>,
    detected: Option<Vec<Rc<T>>>,
    frame: &F,
    reference: SpaceId,
) -> Option<TrackedCollection<T>> {
    let detected = detected.unwrap_or_default();
    if same_membership(&detected, previous) {
        return None;
    }

    let known: HashMap<usize, &Tracked<T>> = previous
        .iter()
        .map(|entry| (identity_key(&entry.entity), entry))
        .collect();

    let next: Vec<Tracked<T>> = detected
        .into_iter()
        .map(|entity| match known.get(&identity_key(&entity)) {
            Some(existing) => (*existing).clone(),
            None => {
                let pose = frame.pose(entity.space(), reference);
                Tracked::new(entity, pose)
            }
        })
        .collect();
    Some(Rc::from(next))
}

/// Fresh image map from this frame's results, each stamped with its pose
pub fn collect_images<F: XrFrame>(frame: &F, reference: SpaceId) -> TrackedImages {
    let mut images = TrackedImages::new();
    for mut result in frame.image_tracking_results().unwrap_or_default() {
        result.initial_pose = frame.pose(result.image_space, reference);
        images.insert(result.index, result);
    }
    images
}

/// Collections replaced during one tick; `None` fields are unchanged
#[derive(Debug, Default)]
pub struct TrackerUpdate {
    pub planes: Option<TrackedCollection<XrPlane>>,
    pub meshes: Option<TrackedCollection<XrMesh>>,
    pub images: Option<Rc<TrackedImages>>,
}

impl TrackerUpdate {
    pub fn is_empty(&self) -> bool {
        self.planes.is_none() && self.meshes.is_none() && self.images.is_none()
    }
}

/// Diffs detector output against the previous tick and hands out stable ids
#[derive(Debug, Default)]
pub struct SpatialTracker {
    config: TrackingConfig,
    plane_ids: IdRegistry<XrPlane>,
    mesh_ids: IdRegistry<XrMesh>,
}

impl SpatialTracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            plane_ids: IdRegistry::new(),
            mesh_ids: IdRegistry::new(),
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn plane_id(&mut self, plane: &Rc<XrPlane>) -> u64 {
        self.plane_ids.id_of(plane)
    }

    pub fn mesh_id(&mut self, mesh: &Rc<XrMesh>) -> u64 {
        self.mesh_ids.id_of(mesh)
    }

    /// Compare this frame's detections with the previous collections.
    ///
    /// Images are rebuilt every tick when `track_images` is set, because the
    /// runtime reports them per frame rather than as persistent entities.
    pub fn update<F: XrFrame>(
        &mut self,
        planes: &TrackedCollection<XrPlane>,
        meshes: &TrackedCollection<XrMesh>,
        track_images: bool,
        frame: &F,
        reference: SpaceId,
    ) -> TrackerUpdate {
        let mut update = TrackerUpdate::default();

        if self.config.track_planes {
            update.planes = diff_collection(planes, frame.detected_planes(), frame, reference);
            if let Some(next) = &update.planes {
                for plane in next.iter() {
                    self.plane_ids.id_of(plane.entity());
                }
                self.plane_ids.prune();
                debug!("tracked planes changed: {} -> {}", planes.len(), next.len());
            }
        }

        if self.config.track_meshes {
            update.meshes = diff_collection(meshes, frame.detected_meshes(), frame, reference);
            if let Some(next) = &update.meshes {
                for mesh in next.iter() {
                    self.mesh_ids.id_of(mesh.entity());
                }
                self.mesh_ids.prune();
                debug!("tracked meshes changed: {} -> {}", meshes.len(), next.len());
            }
        }

        if self.config.track_images && track_images {
            update.images = Some(Rc::new(collect_images(frame, reference)));
        }

        update
    }
}
