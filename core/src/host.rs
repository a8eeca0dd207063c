//! Device runtime collaborators
//!
//! The engine never talks to a concrete AR/VR runtime. Everything it needs
//! from one (sessions, frames, anchors, the renderer's XR manager) is expressed
//! here as traits whose optional features are queried at runtime rather than
//! assumed.
//!
//! All collaborators are single-threaded; async operations resolve on the same
//! logical thread as the frame loop, so no `Send` bounds are imposed.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

#![allow(async_fn_in_trait)]

use std::rc::Rc;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::HostError;
use crate::math::Pose;
use crate::scene::NodeId;

/// Opaque handle the runtime can resolve to a pose against a reference space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpaceId(pub u64);

/// Kind of immersive run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionMode {
    ImmersiveVr,
    ImmersiveAr,
    Inline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VisibilityState {
    Visible,
    Hidden,
    VisibleBlurred,
}

/// Optional session features, queried before use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFeatures {
    pub image_tracking_scores: bool,
    pub restore_persistent_anchor: bool,
    pub delete_persistent_anchor: bool,
    pub room_capture: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageTrackingScore {
    Untrackable,
    Trackable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageTrackingState {
    Tracked,
    Emulated,
}

/// One image-tracking result reported for the current frame
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTrackingResult {
    pub image_space: SpaceId,
    /// Index into the images requested at session start
    pub index: usize,
    pub tracking_state: ImageTrackingState,
    pub measured_width_in_meters: f32,
    /// Pose captured on the tick the result was reported
    pub initial_pose: Option<Pose>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaneOrientation {
    Horizontal,
    Vertical,
}

/// A detected planar surface; identity is `Rc` pointer identity
#[derive(Debug, Clone, PartialEq)]
pub struct XrPlane {
    pub plane_space: SpaceId,
    /// Boundary polygon in plane space (y is always zero)
    pub polygon: Vec<Point3<f32>>,
    pub orientation: Option<PlaneOrientation>,
    pub last_changed_time: f64,
    pub semantic_label: Option<String>,
}

/// A detected mesh; identity is `Rc` pointer identity
#[derive(Debug, Clone, PartialEq)]
pub struct XrMesh {
    pub mesh_space: SpaceId,
    /// Flat xyz triples
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
    pub last_changed_time: f64,
    pub semantic_label: Option<String>,
}

/// Anything that carries a trackable space
pub trait Trackable {
    fn space(&self) -> SpaceId;
}

impl Trackable for XrPlane {
    fn space(&self) -> SpaceId {
        self.plane_space
    }
}

impl Trackable for XrMesh {
    fn space(&self) -> SpaceId {
        self.mesh_space
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionEventKind {
    InputSourcesChange,
    VisibilityChange,
    End,
}

/// Events the runtime dispatches for a session
#[derive(Debug)]
pub enum SessionEvent<I> {
    InputSourcesChanged {
        added: Vec<Rc<I>>,
        removed: Vec<Rc<I>>,
    },
    VisibilityChanged(VisibilityState),
    End,
}

impl<I> SessionEvent<I> {
    pub fn kind(&self) -> SessionEventKind {
        match self {
            SessionEvent::InputSourcesChanged { .. } => SessionEventKind::InputSourcesChange,
            SessionEvent::VisibilityChanged(_) => SessionEventKind::VisibilityChange,
            SessionEvent::End => SessionEventKind::End,
        }
    }
}

/// Registration token returned by [`XrSession::add_event_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Where a session delivers its events.
///
/// Sinks never touch engine state directly; they enqueue, and the store drains
/// the queue on its own schedule. This keeps event delivery safe while a
/// frame is being processed.
#[derive(Debug)]
pub struct EventSink<I> {
    generation: u64,
    sender: UnboundedSender<(u64, SessionEvent<I>)>,
}

impl<I> Clone for EventSink<I> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            sender: self.sender.clone(),
        }
    }
}

impl<I> EventSink<I> {
    pub(crate) fn new(generation: u64, sender: UnboundedSender<(u64, SessionEvent<I>)>) -> Self {
        Self { generation, sender }
    }

    /// Deliver an event. Events sent after the store dropped are discarded.
    pub fn emit(&self, event: SessionEvent<I>) {
        let _ = self.sender.send((self.generation, event));
    }
}

/// A running immersive session
pub trait XrSession {
    type Frame: XrFrame<Anchor = Self::Anchor>;
    type Anchor: XrAnchor;
    type InputSource;
    type Layer: Clone + PartialEq;
    type Image: PartialEq;

    fn visibility_state(&self) -> VisibilityState;

    fn input_sources(&self) -> Vec<Rc<Self::InputSource>>;

    fn features(&self) -> SessionFeatures;

    fn add_event_listener(
        &self,
        kind: SessionEventKind,
        sink: EventSink<Self::InputSource>,
    ) -> ListenerId;

    fn remove_event_listener(&self, listener: ListenerId);

    /// Replace the compositing layer stack, first entry at the back
    fn update_render_state(&self, layers: Vec<Self::Layer>);

    async fn end(&self) -> Result<(), HostError>;

    async fn tracked_image_scores(&self) -> Result<Vec<ImageTrackingScore>, HostError>;

    async fn restore_persistent_anchor(&self, handle: &str) -> Result<Self::Anchor, HostError>;

    async fn delete_persistent_anchor(&self, handle: &str) -> Result<(), HostError>;

    async fn initiate_room_capture(&self) -> Result<(), HostError>;
}

/// The runtime's view of one rendered frame
pub trait XrFrame {
    type Anchor: XrAnchor;

    fn pose(&self, space: SpaceId, reference: SpaceId) -> Option<Pose>;

    /// `None` when the runtime does not detect planes
    fn detected_planes(&self) -> Option<Vec<Rc<XrPlane>>>;

    /// `None` when the runtime does not detect meshes
    fn detected_meshes(&self) -> Option<Vec<Rc<XrMesh>>>;

    /// `None` when the runtime does not track images
    fn image_tracking_results(&self) -> Option<Vec<ImageTrackingResult>>;

    fn supports_anchors(&self) -> bool;

    async fn create_anchor(
        &self,
        pose: Pose,
        reference: SpaceId,
    ) -> Result<Option<Self::Anchor>, HostError>;
}

/// A spatially fixed reference point created by the runtime
pub trait XrAnchor {
    fn anchor_space(&self) -> SpaceId;

    fn supports_persistent_handle(&self) -> bool;

    async fn request_persistent_handle(&self) -> Result<String, HostError>;
}

/// The renderer's XR manager and active camera
pub trait XrRenderer {
    type Session: XrSession;

    fn reference_space(&self) -> Option<SpaceId>;

    fn camera(&self) -> NodeId;

    fn set_camera(&mut self, camera: NodeId);

    /// Camera driven by the session's head pose
    fn xr_camera(&self) -> NodeId;

    fn base_layer(&self) -> Option<<Self::Session as XrSession>::Layer>;

    async fn set_session(&mut self, session: Rc<Self::Session>) -> Result<(), HostError>;
}
