//! In-process device emulator
//!
//! Implements the runtime collaborator traits with scripted behavior so the
//! engine can run without headset hardware: frames are built up front with
//! the poses and detections they should report, sessions record what the
//! engine asked of them, and an [`EmulatedDevice`] persists anchor handles
//! across sessions the way a real device would.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use nalgebra::Point3;

use crate::error::HostError;
use crate::host::{
    EventSink, ImageTrackingResult, ImageTrackingScore, ListenerId, PlaneOrientation, SessionEvent,
    SessionEventKind, SessionFeatures, SpaceId, VisibilityState, XrAnchor, XrFrame, XrMesh,
    XrPlane, XrRenderer, XrSession,
};
use crate::math::Pose;
use crate::scene::NodeId;

/// Unit-square horizontal plane with the given space and semantic label
pub fn plane(space: u64, label: &str) -> Rc<XrPlane> {
    Rc::new(XrPlane {
        plane_space: SpaceId(space),
        polygon: vec![
            Point3::new(-0.5, 0.0, -0.5),
            Point3::new(0.5, 0.0, -0.5),
            Point3::new(0.5, 0.0, 0.5),
            Point3::new(-0.5, 0.0, 0.5),
        ],
        orientation: Some(PlaneOrientation::Horizontal),
        last_changed_time: 0.0,
        semantic_label: Some(label.to_owned()),
    })
}

/// Single-triangle mesh with the given space and semantic label
pub fn mesh(space: u64, label: &str) -> Rc<XrMesh> {
    Rc::new(XrMesh {
        mesh_space: SpaceId(space),
        vertices: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        indices: vec![0, 1, 2],
        last_changed_time: 0.0,
        semantic_label: Some(label.to_owned()),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatedInputSource {
    pub handedness: String,
}

impl EmulatedInputSource {
    pub fn new(handedness: &str) -> Rc<Self> {
        Rc::new(Self {
            handedness: handedness.to_owned(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmulatedLayer(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatedImage(pub String);

#[derive(Debug, Default)]
struct DeviceState {
    next_space: u64,
    next_handle: u64,
    persistent_handles: bool,
    anchors: HashMap<String, SpaceId>,
}

impl DeviceState {
    fn allocate_space(&mut self) -> SpaceId {
        self.next_space += 1;
        SpaceId(1000 + self.next_space)
    }
}

/// Device-wide state that outlives individual sessions
#[derive(Debug, Clone, Default)]
pub struct EmulatedDevice {
    state: Rc<RefCell<DeviceState>>,
}

impl EmulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable persistent handles for anchors created from now on
    pub fn with_persistent_handles(self) -> Self {
        self.state.borrow_mut().persistent_handles = true;
        self
    }

    pub fn persisted_handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.state.borrow().anchors.keys().cloned().collect();
        handles.sort();
        handles
    }

    pub fn session(&self) -> EmulatedSession {
        EmulatedSession::new(self.clone())
    }

    pub fn frame(&self) -> EmulatedFrame {
        EmulatedFrame::new().with_device(self.clone())
    }
}

/// Anchor owned by an [`EmulatedDevice`]
#[derive(Debug, Clone)]
pub struct EmulatedAnchor {
    space: SpaceId,
    pose: Pose,
    device: EmulatedDevice,
    persistent: bool,
}

impl EmulatedAnchor {
    /// Pose the anchor was created with, relative to its reference space
    pub fn pose(&self) -> &Pose {
        &self.pose
    }
}

impl XrAnchor for EmulatedAnchor {
    fn anchor_space(&self) -> SpaceId {
        self.space
    }

    fn supports_persistent_handle(&self) -> bool {
        self.persistent
    }

    async fn request_persistent_handle(&self) -> Result<String, HostError> {
        if !self.persistent {
            return Err(HostError::Unsupported("persistent anchors"));
        }
        let mut device = self.device.state.borrow_mut();
        device.next_handle += 1;
        let handle = format!("anchor-{}", device.next_handle);
        device.anchors.insert(handle.clone(), self.space);
        Ok(handle)
    }
}

/// One scripted frame
#[derive(Debug, Default)]
pub struct EmulatedFrame {
    poses: HashMap<SpaceId, Pose>,
    planes: Option<Vec<Rc<XrPlane>>>,
    meshes: Option<Vec<Rc<XrMesh>>>,
    images: Option<Vec<ImageTrackingResult>>,
    device: Option<EmulatedDevice>,
    refuse_anchors: bool,
    anchor_requests: RefCell<Vec<(Pose, SpaceId)>>,
}

impl EmulatedFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pose(mut self, space: SpaceId, pose: Pose) -> Self {
        self.poses.insert(space, pose);
        self
    }

    pub fn with_planes(mut self, planes: Vec<Rc<XrPlane>>) -> Self {
        self.planes = Some(planes);
        self
    }

    pub fn with_meshes(mut self, meshes: Vec<Rc<XrMesh>>) -> Self {
        self.meshes = Some(meshes);
        self
    }

    pub fn with_image_result(mut self, result: ImageTrackingResult) -> Self {
        self.images.get_or_insert_with(Vec::new).push(result);
        self
    }

    /// Frames with a device can create anchors
    pub fn with_device(mut self, device: EmulatedDevice) -> Self {
        self.device = Some(device);
        self
    }

    /// Anchor creation resolves without an anchor
    pub fn refusing_anchors(mut self) -> Self {
        self.refuse_anchors = true;
        self
    }

    /// Poses passed to `create_anchor`, in call order
    pub fn anchor_requests(&self) -> Vec<(Pose, SpaceId)> {
        self.anchor_requests.borrow().clone()
    }
}

impl XrFrame for EmulatedFrame {
    type Anchor = EmulatedAnchor;

    fn pose(&self, space: SpaceId, _reference: SpaceId) -> Option<Pose> {
        self.poses.get(&space).copied()
    }

    fn detected_planes(&self) -> Option<Vec<Rc<XrPlane>>> {
        self.planes.clone()
    }

    fn detected_meshes(&self) -> Option<Vec<Rc<XrMesh>>> {
        self.meshes.clone()
    }

    fn image_tracking_results(&self) -> Option<Vec<ImageTrackingResult>> {
        self.images.clone()
    }

    fn supports_anchors(&self) -> bool {
        self.device.is_some()
    }

    async fn create_anchor(
        &self,
        pose: Pose,
        reference: SpaceId,
    ) -> Result<Option<EmulatedAnchor>, HostError> {
        let device = self
            .device
            .as_ref()
            .ok_or(HostError::Unsupported("anchors"))?;
        self.anchor_requests.borrow_mut().push((pose, reference));
        if self.refuse_anchors {
            return Ok(None);
        }
        let (space, persistent) = {
            let mut state = device.state.borrow_mut();
            (state.allocate_space(), state.persistent_handles)
        };
        Ok(Some(EmulatedAnchor {
            space,
            pose,
            device: device.clone(),
            persistent,
        }))
    }
}

type Listener = (ListenerId, SessionEventKind, EventSink<EmulatedInputSource>);

/// Scripted session that records every request made of it
#[derive(Debug)]
pub struct EmulatedSession {
    device: EmulatedDevice,
    features: SessionFeatures,
    visibility: Cell<VisibilityState>,
    input_sources: RefCell<Vec<Rc<EmulatedInputSource>>>,
    image_scores: Vec<ImageTrackingScore>,
    listeners: RefCell<Vec<Listener>>,
    next_listener: Cell<u64>,
    render_state: RefCell<Vec<EmulatedLayer>>,
    end_calls: Cell<u32>,
    ended: Cell<bool>,
    room_captures: Cell<u32>,
    deleted_handles: RefCell<Vec<String>>,
}

impl EmulatedSession {
    pub fn new(device: EmulatedDevice) -> Self {
        Self {
            device,
            features: SessionFeatures::default(),
            visibility: Cell::new(VisibilityState::Visible),
            input_sources: RefCell::new(Vec::new()),
            image_scores: Vec::new(),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
            render_state: RefCell::new(Vec::new()),
            end_calls: Cell::new(0),
            ended: Cell::new(false),
            room_captures: Cell::new(0),
            deleted_handles: RefCell::new(Vec::new()),
        }
    }

    pub fn with_features(mut self, features: SessionFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn with_input_sources(self, sources: Vec<Rc<EmulatedInputSource>>) -> Self {
        *self.input_sources.borrow_mut() = sources;
        self
    }

    pub fn with_image_scores(mut self, scores: Vec<ImageTrackingScore>) -> Self {
        self.image_scores = scores;
        self
    }

    /// Send `event` to every listener registered for its kind
    pub fn emit(&self, event_for: impl Fn() -> SessionEvent<EmulatedInputSource>) {
        let kind = event_for().kind();
        let sinks: Vec<EventSink<EmulatedInputSource>> = self
            .listeners
            .borrow()
            .iter()
            .filter(|(_, registered, _)| *registered == kind)
            .map(|(_, _, sink)| sink.clone())
            .collect();
        for sink in sinks {
            sink.emit(event_for());
        }
    }

    /// Update the roster and notify listeners
    pub fn change_input_sources(
        &self,
        added: Vec<Rc<EmulatedInputSource>>,
        removed: Vec<Rc<EmulatedInputSource>>,
    ) {
        self.input_sources.borrow_mut().retain(|source| {
            !removed.iter().any(|gone| Rc::ptr_eq(gone, source))
        });
        self.input_sources.borrow_mut().extend(added.iter().cloned());
        self.emit(|| SessionEvent::InputSourcesChanged {
            added: added.clone(),
            removed: removed.clone(),
        });
    }

    pub fn change_visibility(&self, visibility: VisibilityState) {
        self.visibility.set(visibility);
        self.emit(|| SessionEvent::VisibilityChanged(visibility));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn render_state(&self) -> Vec<EmulatedLayer> {
        self.render_state.borrow().clone()
    }

    pub fn end_calls(&self) -> u32 {
        self.end_calls.get()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.get()
    }

    pub fn room_captures(&self) -> u32 {
        self.room_captures.get()
    }

    pub fn deleted_handles(&self) -> Vec<String> {
        self.deleted_handles.borrow().clone()
    }

    fn check_live(&self) -> Result<(), HostError> {
        if self.ended.get() {
            Err(HostError::Ended)
        } else {
            Ok(())
        }
    }
}

impl XrSession for EmulatedSession {
    type Frame = EmulatedFrame;
    type Anchor = EmulatedAnchor;
    type InputSource = EmulatedInputSource;
    type Layer = EmulatedLayer;
    type Image = EmulatedImage;

    fn visibility_state(&self) -> VisibilityState {
        self.visibility.get()
    }

    fn input_sources(&self) -> Vec<Rc<EmulatedInputSource>> {
        self.input_sources.borrow().clone()
    }

    fn features(&self) -> SessionFeatures {
        self.features
    }

    fn add_event_listener(
        &self,
        kind: SessionEventKind,
        sink: EventSink<EmulatedInputSource>,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, kind, sink));
        id
    }

    fn remove_event_listener(&self, listener: ListenerId) {
        self.listeners
            .borrow_mut()
            .retain(|(id, _, _)| *id != listener);
    }

    fn update_render_state(&self, layers: Vec<EmulatedLayer>) {
        *self.render_state.borrow_mut() = layers;
    }

    async fn end(&self) -> Result<(), HostError> {
        self.end_calls.set(self.end_calls.get() + 1);
        self.check_live()?;
        self.ended.set(true);
        self.emit(|| SessionEvent::End);
        Ok(())
    }

    async fn tracked_image_scores(&self) -> Result<Vec<ImageTrackingScore>, HostError> {
        if !self.features.image_tracking_scores {
            return Err(HostError::Unsupported("image tracking scores"));
        }
        Ok(self.image_scores.clone())
    }

    async fn restore_persistent_anchor(&self, handle: &str) -> Result<EmulatedAnchor, HostError> {
        self.check_live()?;
        let state = self.device.state.borrow();
        let space = state
            .anchors
            .get(handle)
            .copied()
            .ok_or_else(|| HostError::Rejected(format!("unknown anchor handle {handle}")))?;
        Ok(EmulatedAnchor {
            space,
            pose: Pose::identity(),
            device: self.device.clone(),
            persistent: state.persistent_handles,
        })
    }

    async fn delete_persistent_anchor(&self, handle: &str) -> Result<(), HostError> {
        self.check_live()?;
        self.deleted_handles.borrow_mut().push(handle.to_owned());
        self.device
            .state
            .borrow_mut()
            .anchors
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| HostError::Rejected(format!("unknown anchor handle {handle}")))
    }

    async fn initiate_room_capture(&self) -> Result<(), HostError> {
        self.check_live()?;
        self.room_captures.set(self.room_captures.get() + 1);
        Ok(())
    }
}

/// Renderer stand-in with two cameras and a switchable reference space
#[derive(Debug)]
pub struct EmulatedRenderer {
    camera: Rc<Cell<NodeId>>,
    xr_camera: NodeId,
    reference_space: Option<SpaceId>,
    base_layer: Option<EmulatedLayer>,
    fail_next_session: bool,
    sessions: Vec<Rc<EmulatedSession>>,
}

impl EmulatedRenderer {
    pub fn new(camera: NodeId, xr_camera: NodeId) -> Self {
        Self {
            camera: Rc::new(Cell::new(camera)),
            xr_camera,
            reference_space: Some(SpaceId(1)),
            base_layer: Some(EmulatedLayer(0)),
            fail_next_session: false,
            sessions: Vec::new(),
        }
    }

    pub fn set_reference_space(&mut self, space: Option<SpaceId>) {
        self.reference_space = space;
    }

    pub fn with_base_layer(mut self, layer: Option<EmulatedLayer>) -> Self {
        self.base_layer = layer;
        self
    }

    /// Reject the next `set_session` call
    pub fn fail_next_session(&mut self) {
        self.fail_next_session = true;
    }

    /// Shared view of the active camera that outlives borrows of the renderer
    pub fn camera_handle(&self) -> Rc<Cell<NodeId>> {
        Rc::clone(&self.camera)
    }

    /// Sessions handed over so far
    pub fn sessions(&self) -> &[Rc<EmulatedSession>] {
        &self.sessions
    }
}

impl XrRenderer for EmulatedRenderer {
    type Session = EmulatedSession;

    fn reference_space(&self) -> Option<SpaceId> {
        self.reference_space
    }

    fn camera(&self) -> NodeId {
        self.camera.get()
    }

    fn set_camera(&mut self, camera: NodeId) {
        self.camera.set(camera);
    }

    fn xr_camera(&self) -> NodeId {
        self.xr_camera
    }

    fn base_layer(&self) -> Option<EmulatedLayer> {
        self.base_layer
    }

    async fn set_session(&mut self, session: Rc<EmulatedSession>) -> Result<(), HostError> {
        if std::mem::take(&mut self.fail_next_session) {
            return Err(HostError::Rejected("renderer refused session".to_owned()));
        }
        self.sessions.push(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{UnitQuaternion, Vector3};

    #[tokio::test]
    async fn test_persistent_handles_survive_sessions() {
        let device = EmulatedDevice::new().with_persistent_handles();
        let frame = device.frame();
        let anchor = frame
            .create_anchor(
                Pose::new(Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity()),
                SpaceId(1),
            )
            .await
            .unwrap()
            .unwrap();
        let handle = anchor.request_persistent_handle().await.unwrap();

        let next = device.session();
        let restored = next.restore_persistent_anchor(&handle).await.unwrap();
        assert_eq!(restored.anchor_space(), anchor.anchor_space());
    }

    #[tokio::test]
    async fn test_ended_session_rejects_requests() {
        let session = EmulatedDevice::new().session();
        session.end().await.unwrap();

        assert_eq!(session.end().await, Err(HostError::Ended));
        assert_eq!(session.initiate_room_capture().await, Err(HostError::Ended));
        assert_eq!(session.end_calls(), 2);
    }

    #[tokio::test]
    async fn test_frame_without_device_cannot_anchor() {
        let frame = EmulatedFrame::new();
        assert!(!frame.supports_anchors());
        assert!(frame.create_anchor(Pose::identity(), SpaceId(1)).await.is_err());
    }
}
