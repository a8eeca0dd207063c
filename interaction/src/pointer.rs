//! Pointer input as routed through the scene graph
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Identifier of one pointer for the duration of its press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PointerId(pub u64);

/// Pointer event hitting a grabbable node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub pointer_id: PointerId,
    /// Set for hands, controllers and other spatially tracked pointers;
    /// screen-space pointers cannot drive a grab
    pub spatial: bool,
    /// World-space intersection point
    pub point: Vector3<f32>,
    /// World-space rotation of the input device
    pub rotation: UnitQuaternion<f32>,
}

impl PointerEvent {
    pub fn spatial(pointer_id: PointerId, point: Vector3<f32>, rotation: UnitQuaternion<f32>) -> Self {
        Self {
            pointer_id,
            spatial: true,
            point,
            rotation,
        }
    }
}

/// What the dispatcher should do with an event after a handler saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventResponse {
    /// Stop propagation; on pointer-down also capture the pointer
    Captured,
    /// Let the event continue to other handlers
    Ignored,
}

impl EventResponse {
    pub fn is_captured(self) -> bool {
        self == EventResponse::Captured
    }
}
