//! Geometry change tracking for planes and meshes
//!
//! The runtime bumps `last_changed_time` whenever it refines a surface.
//! Consumers that build render geometry from a plane polygon or a mesh buffer
//! keep a [`GeometryVersion`] and rebuild only when it reports a change.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use nalgebra::Vector2;

use crate::host::{XrMesh, XrPlane};

/// Anything whose geometry carries a change timestamp
pub trait Versioned {
    fn last_changed_time(&self) -> f64;
}

impl Versioned for XrPlane {
    fn last_changed_time(&self) -> f64 {
        self.last_changed_time
    }
}

impl Versioned for XrMesh {
    fn last_changed_time(&self) -> f64 {
        self.last_changed_time
    }
}

/// Timestamp of the geometry a consumer last built
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeometryVersion {
    built_for: Option<f64>,
}

impl GeometryVersion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn needs_rebuild<T: Versioned + ?Sized>(&self, entity: &T) -> bool {
        match self.built_for {
            None => true,
            Some(built) => built < entity.last_changed_time(),
        }
    }

    /// Record that geometry for `entity` was just built
    pub fn mark_built<T: Versioned + ?Sized>(&mut self, entity: &T) {
        self.built_for = Some(entity.last_changed_time());
    }

    /// `true` and mark as built if a rebuild is due
    pub fn take_rebuild<T: Versioned + ?Sized>(&mut self, entity: &T) -> bool {
        let due = self.needs_rebuild(entity);
        if due {
            self.mark_built(entity);
        }
        due
    }
}

/// Axis-aligned bounds of a plane polygon projected onto (x, -z)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneBounds {
    pub min: Vector2<f32>,
    pub size: Vector2<f32>,
}

impl PlaneBounds {
    /// `None` for an empty polygon
    pub fn from_plane(plane: &XrPlane) -> Option<Self> {
        let mut points = plane.polygon.iter().map(|p| Vector2::new(p.x, -p.z));
        let first = points.next()?;
        let (min, max) = points.fold((first, first), |(min, max), p| (min.inf(&p), max.sup(&p)));
        Some(Self {
            min,
            size: max - min,
        })
    }

    /// Polygon point in [0, 1]² for texture coordinates; degenerate axes map to 0
    pub fn normalize(&self, point: &Vector2<f32>) -> Vector2<f32> {
        let offset = point - self.min;
        Vector2::new(
            if self.size.x > 0.0 { offset.x / self.size.x } else { 0.0 },
            if self.size.y > 0.0 { offset.y / self.size.y } else { 0.0 },
        )
    }
}
