//! SPATIA Core: Spatial Tracking Engine
//!
//! This crate keeps an immersive AR/VR session, the scene graph camera and the
//! set of sensor-tracked spatial entities in lockstep. It is driven by an
//! external frame clock and talks to the device runtime exclusively through the
//! collaborator traits in [`host`] and [`scene`].
//!
//! ## Components
//!
//! * [`pose`]: resolves trackable spaces against the reference frame and writes
//!   the result onto scene nodes
//! * [`anchor`]: creates, persists, restores and deletes spatial anchors
//! * [`tracker`]: per-frame set diffing of detected planes, meshes and images
//! * [`session`]: the session state machine and its per-frame dispatch
//! * [`runtime`]: ties the store, the scene and the phased frame clock together
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod anchor;
pub mod config;
pub mod emulator;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod host;
pub mod identity;
pub mod logging;
pub mod math;
pub mod pose;
pub mod runtime;
pub mod scene;
pub mod session;
pub mod storage;
pub mod tracker;

pub use anchor::{create_anchor, AnchorContext, AnchorManager, AnchorTarget};
pub use config::{AnchorConfig, ConfigError, EngineConfig, GrabConfig, TrackingConfig};
pub use error::{HostError, StorageError, XrError, XrResult};
pub use frame::{CallbackId, FrameClock, FramePhase, FrameTick};
pub use host::{
    ImageTrackingResult, ImageTrackingScore, ImageTrackingState, SessionEvent, SessionEventKind,
    SessionFeatures, SessionMode, SpaceId, VisibilityState, XrAnchor, XrFrame, XrMesh, XrPlane,
    XrRenderer, XrSession,
};
pub use math::{Pose, Transform};
pub use pose::{apply_pose, apply_pose_with, resolve_pose, SpaceFollower, SpaceSource};
pub use runtime::XrRuntime;
pub use scene::{NodeId, Scene, SceneGraph};
pub use session::{LayerEntry, SessionStore, SubscriptionId, TrackedImageInit, XrState};
pub use storage::{JsonFileStorage, KeyValueStorage, MemoryStorage};
pub use tracker::{SpatialTracker, Tracked};

/// Crate version, exposed for embedders that log their runtime stack
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
