//! SPATIA Interaction: Direct Manipulation
//!
//! Pointer-driven grabbing of scene nodes. One pointer moves and rotates the
//! node rigidly; two pointers additionally scale it uniformly by the change in
//! their span. Drive a [`GrabManipulator`] from the scene's pointer events and
//! call [`GrabManipulator::update`] once per frame in
//! [`spatia_core::FramePhase::Manipulation`], so application callbacks see
//! the node where the pointers put it this frame.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

pub mod grab;
pub mod pointer;

pub use grab::{GrabError, GrabManipulator, GrabPhase, GrabResult};
pub use pointer::{EventResponse, PointerEvent, PointerId};
