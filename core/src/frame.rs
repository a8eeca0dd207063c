//! Phased frame clock
//!
//! Per-frame consumers register into one of a fixed set of phases. Each tick
//! runs every phase to completion before starting the next, so anything that
//! resolves a tracked pose or drives a manipulation has written its node
//! before application code reads it. Within a phase, callbacks run in registration
//! order; consumers must not rely on that order among themselves.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use serde::{Deserialize, Serialize};

use crate::host::SpaceId;

/// Ordered stages of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FramePhase {
    /// Writes tracked poses onto scene nodes
    PoseResolution,
    /// Direct manipulation that moves nodes before anything else reads them
    Manipulation,
    /// Application logic
    Application,
    /// Last-moment consumers right before the frame is drawn
    Render,
}

impl FramePhase {
    pub const ALL: [FramePhase; 4] = [
        FramePhase::PoseResolution,
        FramePhase::Manipulation,
        FramePhase::Application,
        FramePhase::Render,
    ];

    fn index(self) -> usize {
        match self {
            FramePhase::PoseResolution => 0,
            FramePhase::Manipulation => 1,
            FramePhase::Application => 2,
            FramePhase::Render => 3,
        }
    }
}

/// What every callback sees for the current tick
#[derive(Debug)]
pub struct FrameTick<'a, F> {
    /// Seconds since the previous tick
    pub delta: f32,
    /// Current tracking frame, absent outside a session
    pub frame: Option<&'a F>,
    /// Reference space poses are resolved against, absent while tracking is lost
    pub reference_space: Option<SpaceId>,
}

impl<F> Clone for FrameTick<'_, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for FrameTick<'_, F> {}

impl<'a, F> FrameTick<'a, F> {
    pub fn new(delta: f32, frame: Option<&'a F>, reference_space: Option<SpaceId>) -> Self {
        Self {
            delta,
            frame,
            reference_space,
        }
    }
}

/// Registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

type FrameCallback<C, F> = Box<dyn FnMut(&mut C, &FrameTick<'_, F>)>;

/// Callback registry keyed by phase
pub struct FrameClock<C, F> {
    phases: [Vec<(CallbackId, FrameCallback<C, F>)>; 4],
    next_id: u64,
}

impl<C, F> Default for FrameClock<C, F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, F> std::fmt::Debug for FrameClock<C, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameClock")
            .field("pose_resolution", &self.phases[0].len())
            .field("manipulation", &self.phases[1].len())
            .field("application", &self.phases[2].len())
            .field("render", &self.phases[3].len())
            .finish()
    }
}

impl<C, F> FrameClock<C, F> {
    pub fn new() -> Self {
        Self {
            phases: [Vec::new(), Vec::new(), Vec::new(), Vec::new()],
            next_id: 0,
        }
    }

    pub fn register(
        &mut self,
        phase: FramePhase,
        callback: impl FnMut(&mut C, &FrameTick<'_, F>) + 'static,
    ) -> CallbackId {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.phases[phase.index()].push((id, Box::new(callback)));
        id
    }

    /// Returns whether the callback was registered
    pub fn unregister(&mut self, id: CallbackId) -> bool {
        for phase in &mut self.phases {
            if let Some(position) = phase.iter().position(|(candidate, _)| *candidate == id) {
                phase.remove(position);
                return true;
            }
        }
        false
    }

    pub fn len(&self, phase: FramePhase) -> usize {
        self.phases[phase.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.iter().all(Vec::is_empty)
    }

    /// Run all phases in order
    pub fn tick(&mut self, context: &mut C, tick: &FrameTick<'_, F>) {
        for phase in FramePhase::ALL {
            for (_, callback) in &mut self.phases[phase.index()] {
                callback(context, tick);
            }
        }
    }
}
