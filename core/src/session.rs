//! Session state machine
//!
//! [`SessionStore`] is the single source of truth for the immersive session:
//! its identity and mode, the input-source roster, the layer stack, and the
//! tracked-entity collections. State lives in an immutable [`XrState`]
//! snapshot. Every transition builds a new snapshot, installs it, and hands it
//! to subscribers, so a reader holding an older snapshot always sees a
//! consistent view.
//!
//! ## Lifecycle
//!
//! ```text
//!   none ──set_session──▶ live ──end event / end_session──▶ none
//!                          │ ▲
//!                          └─┘ set_session (old session torn down first)
//! ```
//!
//! Session events are queued by [`EventSink`]s registered with the runtime and
//! applied by [`SessionStore::dispatch_events`], which also runs at the start
//! of every frame. Handlers that need a live session log a warning and do
//! nothing when the store is in the "none" state, because events can race
//! session teardown.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::BTreeMap;
use std::rc::Rc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::anchor::AnchorContext;
use crate::config::TrackingConfig;
use crate::error::{HostError, XrError, XrResult};
use crate::host::{
    EventSink, ImageTrackingResult, ImageTrackingScore, ListenerId, SessionEvent,
    SessionEventKind, SessionMode, VisibilityState, XrMesh, XrPlane, XrRenderer, XrSession,
};
use crate::identity::IdRegistry;
use crate::scene::NodeId;
use crate::tracker::{
    empty_collection, SpatialTracker, Tracked, TrackedCollection, TrackedImages,
};

pub type SessionOf<R> = <R as XrRenderer>::Session;
pub type FrameOf<R> = <SessionOf<R> as XrSession>::Frame;
pub type InputSourceOf<R> = <SessionOf<R> as XrSession>::InputSource;

/// Input sources keyed by their stable id
pub type InputSourceMap<I> = BTreeMap<u64, Rc<I>>;

/// Image target requested at session start
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedImageInit<I> {
    pub image: I,
    pub width_in_meters: f32,
}

/// One entry of the compositing layer stack
#[derive(Debug, Clone, PartialEq)]
pub struct LayerEntry<L> {
    pub index: i32,
    pub layer: L,
}

/// Everything that only exists while a session is live
pub struct LiveSession<S: XrSession> {
    pub mode: SessionMode,
    pub session: Rc<S>,
    pub visibility_state: VisibilityState,
    pub input_sources: Rc<InputSourceMap<S::InputSource>>,
    /// Camera to restore when the session ends
    pub initial_camera: NodeId,
    pub layers: Rc<[LayerEntry<S::Layer>]>,
    pub requested_tracked_images: Option<Rc<[TrackedImageInit<S::Image>]>>,
    pub tracked_images: Rc<TrackedImages>,
    pub tracked_planes: TrackedCollection<XrPlane>,
    pub tracked_meshes: TrackedCollection<XrMesh>,
}

impl<S: XrSession> Clone for LiveSession<S> {
    fn clone(&self) -> Self {
        Self {
            mode: self.mode,
            session: Rc::clone(&self.session),
            visibility_state: self.visibility_state,
            input_sources: Rc::clone(&self.input_sources),
            initial_camera: self.initial_camera,
            layers: Rc::clone(&self.layers),
            requested_tracked_images: self.requested_tracked_images.clone(),
            tracked_images: Rc::clone(&self.tracked_images),
            tracked_planes: Rc::clone(&self.tracked_planes),
            tracked_meshes: Rc::clone(&self.tracked_meshes),
        }
    }
}

/// Immutable snapshot of the store
pub struct XrState<S: XrSession> {
    live: Option<LiveSession<S>>,
}

impl<S: XrSession> Clone for XrState<S> {
    fn clone(&self) -> Self {
        Self {
            live: self.live.clone(),
        }
    }
}

impl<S: XrSession> std::fmt::Debug for XrState<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.live {
            None => f.debug_struct("XrState").field("mode", &"none").finish(),
            Some(live) => f
                .debug_struct("XrState")
                .field("mode", &live.mode)
                .field("visibility_state", &live.visibility_state)
                .field("input_sources", &live.input_sources.len())
                .field("layers", &live.layers.len())
                .field("tracked_planes", &live.tracked_planes.len())
                .field("tracked_meshes", &live.tracked_meshes.len())
                .field("tracked_images", &live.tracked_images.len())
                .finish(),
        }
    }
}

impl<S: XrSession> XrState<S> {
    pub fn none() -> Self {
        Self { live: None }
    }

    pub fn is_none(&self) -> bool {
        self.live.is_none()
    }

    pub fn live(&self) -> Option<&LiveSession<S>> {
        self.live.as_ref()
    }

    pub fn mode(&self) -> Option<SessionMode> {
        self.live.as_ref().map(|live| live.mode)
    }

    pub fn session(&self) -> Option<&Rc<S>> {
        self.live.as_ref().map(|live| &live.session)
    }

    pub fn visibility_state(&self) -> Option<VisibilityState> {
        self.live.as_ref().map(|live| live.visibility_state)
    }

    pub fn input_sources(&self) -> Option<&Rc<InputSourceMap<S::InputSource>>> {
        self.live.as_ref().map(|live| &live.input_sources)
    }

    pub fn layers(&self) -> Option<&Rc<[LayerEntry<S::Layer>]>> {
        self.live.as_ref().map(|live| &live.layers)
    }

    pub fn tracked_planes(&self) -> Option<&TrackedCollection<XrPlane>> {
        self.live.as_ref().map(|live| &live.tracked_planes)
    }

    pub fn tracked_meshes(&self) -> Option<&TrackedCollection<XrMesh>> {
        self.live.as_ref().map(|live| &live.tracked_meshes)
    }

    pub fn tracked_images(&self) -> Option<&Rc<TrackedImages>> {
        self.live.as_ref().map(|live| &live.tracked_images)
    }

    pub fn tracked_image(&self, index: usize) -> Option<&ImageTrackingResult> {
        self.tracked_images()?.get(&index)
    }

    pub fn requested_tracked_images(&self) -> Option<&Rc<[TrackedImageInit<S::Image>]>> {
        self.live.as_ref()?.requested_tracked_images.as_ref()
    }

    /// Planes whose semantic label equals `label`
    pub fn tracked_planes_with_label(&self, label: &str) -> Vec<Tracked<XrPlane>> {
        self.tracked_planes()
            .map(|planes| {
                planes
                    .iter()
                    .filter(|plane| plane.semantic_label.as_deref() == Some(label))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Meshes whose semantic label equals `label`
    pub fn tracked_meshes_with_label(&self, label: &str) -> Vec<Tracked<XrMesh>> {
        self.tracked_meshes()
            .map(|meshes| {
                meshes
                    .iter()
                    .filter(|mesh| mesh.semantic_label.as_deref() == Some(label))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Index of `image` among the images requested at session start.
    ///
    /// `Ok(None)` outside a session or when no images were requested.
    pub fn requested_image_index(&self, image: &S::Image) -> XrResult<Option<usize>> {
        let Some(requested) = self.requested_tracked_images() else {
            return Ok(None);
        };
        requested
            .iter()
            .position(|init| &init.image == image)
            .map(Some)
            .ok_or(XrError::UnknownImage)
    }
}

/// Handle returned by [`SessionStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber<S> = Box<dyn FnMut(&Rc<XrState<S>>)>;
type NextFrameCallback<S> = Box<dyn FnOnce(f32, Option<&<S as XrSession>::Frame>)>;
type QueuedEvent<I> = (u64, SessionEvent<I>);

/// Owner of the session state and its per-frame dispatch
pub struct SessionStore<R: XrRenderer> {
    state: Rc<XrState<SessionOf<R>>>,
    renderer: R,
    tracker: SpatialTracker,
    input_source_ids: IdRegistry<InputSourceOf<R>>,
    /// Listener registrations for the live session, captured when made
    listeners: Vec<ListenerId>,
    /// Bumped for every installed session; queued events carry it
    generation: u64,
    event_sender: UnboundedSender<QueuedEvent<InputSourceOf<R>>>,
    event_receiver: UnboundedReceiver<QueuedEvent<InputSourceOf<R>>>,
    next_frame_callbacks: Vec<NextFrameCallback<SessionOf<R>>>,
    subscribers: Vec<(SubscriptionId, Subscriber<SessionOf<R>>)>,
    next_subscription: u64,
}

impl<R: XrRenderer> std::fmt::Debug for SessionStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("listeners", &self.listeners.len())
            .field("subscribers", &self.subscribers.len())
            .field("next_frame_callbacks", &self.next_frame_callbacks.len())
            .finish()
    }
}

impl<R: XrRenderer> SessionStore<R> {
    pub fn new(renderer: R) -> Self {
        Self::with_config(renderer, TrackingConfig::default())
    }

    pub fn with_config(renderer: R, tracking: TrackingConfig) -> Self {
        let (event_sender, event_receiver) = unbounded_channel();
        Self {
            state: Rc::new(XrState::none()),
            renderer,
            tracker: SpatialTracker::new(tracking),
            input_source_ids: IdRegistry::new(),
            listeners: Vec::new(),
            generation: 0,
            event_sender,
            event_receiver,
            next_frame_callbacks: Vec::new(),
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Current snapshot
    pub fn state(&self) -> Rc<XrState<SessionOf<R>>> {
        Rc::clone(&self.state)
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn tracker_mut(&mut self) -> &mut SpatialTracker {
        &mut self.tracker
    }

    /// Live session and reference space for anchor creation against `frame`
    pub fn anchor_context<'a>(
        &'a self,
        frame: Option<&'a FrameOf<R>>,
    ) -> AnchorContext<'a, SessionOf<R>> {
        AnchorContext {
            session: self.state.session().map(Rc::as_ref),
            reference_space: self.renderer.reference_space(),
            frame,
        }
    }

    /// Stable id for an input source handle
    pub fn input_source_id(&mut self, source: &Rc<InputSourceOf<R>>) -> u64 {
        self.input_source_ids.id_of(source)
    }

    pub fn subscribe(
        &mut self,
        subscriber: impl FnMut(&Rc<XrState<SessionOf<R>>>) + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(candidate, _)| *candidate != id);
        self.subscribers.len() != before
    }

    /// Run `callback` once at the start of the next frame
    pub fn run_on_next_frame(
        &mut self,
        callback: impl FnOnce(f32, Option<&FrameOf<R>>) + 'static,
    ) {
        self.next_frame_callbacks.push(Box::new(callback));
    }

    fn install(&mut self, state: XrState<SessionOf<R>>) {
        self.state = Rc::new(state);
        for (_, subscriber) in &mut self.subscribers {
            subscriber(&self.state);
        }
    }

    /// Apply a change to the live session, or warn when there is none
    fn update_live(
        &mut self,
        what: &str,
        change: impl FnOnce(&mut LiveSession<SessionOf<R>>) -> bool,
    ) {
        let Some(live) = self.state.live.as_ref() else {
            warn!("received {what} while in xr mode \"none\"");
            return;
        };
        let mut next = live.clone();
        if change(&mut next) {
            self.install(XrState { live: Some(next) });
        }
    }

    fn remove_listeners(&mut self, session: &SessionOf<R>) {
        for listener in self.listeners.drain(..) {
            session.remove_event_listener(listener);
        }
    }

    /// Install `session` as the live session.
    ///
    /// Requested image targets are scored first when the runtime supports
    /// it; untrackable images are logged and do not abort setup. A session that
    /// is already live is torn down (listeners removed, end awaited) before the
    /// new one is installed.
    pub async fn set_session(
        &mut self,
        session: Rc<SessionOf<R>>,
        mode: SessionMode,
        requested_tracked_images: Option<Vec<TrackedImageInit<<SessionOf<R> as XrSession>::Image>>>,
    ) -> XrResult<()> {
        let requested_tracked_images = requested_tracked_images
            .filter(|images| !images.is_empty())
            .map(Rc::<[_]>::from);

        if let Some(requested) = &requested_tracked_images {
            if session.features().image_tracking_scores {
                match session.tracked_image_scores().await {
                    Ok(scores) => {
                        for (index, score) in scores.iter().enumerate() {
                            if *score == ImageTrackingScore::Untrackable {
                                error!(
                                    "provided image at index {} (width {}m) is untrackable",
                                    index,
                                    requested.get(index).map_or(f32::NAN, |init| init.width_in_meters),
                                );
                            }
                        }
                    }
                    Err(e) => warn!("image tracking scores unavailable: {e}"),
                }
            }
        }

        let previous = self.state.live.clone();
        let initial_camera = match &previous {
            Some(live) => live.initial_camera,
            None => self.renderer.camera(),
        };

        if let Some(old) = previous {
            info!("replacing {:?} session", old.mode);
            self.remove_listeners(&old.session);
            if let Err(e) = old.session.end().await {
                if e != HostError::Ended {
                    error!("failed to end previous session: {e}");
                }
            }
        }

        self.generation += 1;
        for kind in [
            SessionEventKind::InputSourcesChange,
            SessionEventKind::End,
            SessionEventKind::VisibilityChange,
        ] {
            let sink = EventSink::new(self.generation, self.event_sender.clone());
            self.listeners.push(session.add_event_listener(kind, sink));
        }

        let mut input_sources = InputSourceMap::new();
        for source in session.input_sources() {
            input_sources.insert(self.input_source_ids.id_of(&source), source);
        }

        if let Err(e) = self.renderer.set_session(Rc::clone(&session)).await {
            self.remove_listeners(&session);
            if self.state.live.is_some() {
                if self.renderer.camera() == self.renderer.xr_camera() {
                    self.renderer.set_camera(initial_camera);
                }
                self.install(XrState::none());
            }
            error!("renderer rejected {mode:?} session: {e}");
            return Err(e.into());
        }

        let layers: Vec<LayerEntry<_>> = self
            .renderer
            .base_layer()
            .map(|layer| LayerEntry { index: 0, layer })
            .into_iter()
            .collect();

        let live = LiveSession {
            mode,
            visibility_state: session.visibility_state(),
            session,
            input_sources: Rc::new(input_sources),
            initial_camera,
            layers: Rc::from(layers),
            requested_tracked_images,
            tracked_images: Rc::new(TrackedImages::new()),
            tracked_planes: empty_collection(),
            tracked_meshes: empty_collection(),
        };
        info!(
            "{:?} session started with {} input sources",
            live.mode,
            live.input_sources.len()
        );
        let xr_camera = self.renderer.xr_camera();
        self.renderer.set_camera(xr_camera);
        self.install(XrState { live: Some(live) });
        Ok(())
    }

    /// End the live session and reset the store; a no-op without one
    pub async fn end_session(&mut self) -> XrResult<()> {
        let Some(session) = self.state.session().cloned() else {
            return Ok(());
        };
        self.remove_listeners(&session);
        let ended = session.end().await;
        self.on_end();
        match ended {
            Ok(()) | Err(HostError::Ended) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply queued session events; returns how many were applied
    pub fn dispatch_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok((generation, event)) = self.event_receiver.try_recv() {
            if generation != self.generation {
                debug!("dropping {:?} event from a replaced session", event.kind());
                continue;
            }
            match event {
                SessionEvent::InputSourcesChanged { added, removed } => {
                    self.on_input_sources_changed(&added, &removed)
                }
                SessionEvent::VisibilityChanged(visibility) => {
                    self.on_visibility_state_changed(visibility)
                }
                SessionEvent::End => self.on_end(),
            }
            applied += 1;
        }
        applied
    }

    /// Replace the roster; a new map is installed only if membership changed
    pub fn on_input_sources_changed(
        &mut self,
        added: &[Rc<InputSourceOf<R>>],
        removed: &[Rc<InputSourceOf<R>>],
    ) {
        let ids = &mut self.input_source_ids;
        let removed: Vec<u64> = removed.iter().map(|source| ids.id_of(source)).collect();
        let added: Vec<(u64, Rc<InputSourceOf<R>>)> = added
            .iter()
            .map(|source| (ids.id_of(source), Rc::clone(source)))
            .collect();

        self.update_live("input sources change", move |live| {
            let mut roster = (*live.input_sources).clone();
            for id in &removed {
                roster.remove(id);
            }
            for (id, source) in added {
                roster.insert(id, source);
            }
            let unchanged = roster.len() == live.input_sources.len()
                && roster.iter().all(|(id, source)| {
                    live.input_sources
                        .get(id)
                        .is_some_and(|old| Rc::ptr_eq(old, source))
                });
            if unchanged {
                return false;
            }
            live.input_sources = Rc::new(roster);
            true
        });
    }

    pub fn on_visibility_state_changed(&mut self, visibility: VisibilityState) {
        self.update_live("visibility change", |live| {
            if live.visibility_state == visibility {
                return false;
            }
            live.visibility_state = visibility;
            true
        });
    }

    /// Reset to "none" and give the pre-session camera back, unless the
    /// application switched cameras during the session
    pub fn on_end(&mut self) {
        let Some(live) = self.state.live.clone() else {
            debug!("session end received while in xr mode \"none\"");
            return;
        };
        self.remove_listeners(&live.session);
        if self.renderer.camera() == self.renderer.xr_camera() {
            self.renderer.set_camera(live.initial_camera);
        }
        self.install(XrState::none());
        self.input_source_ids.prune();
        info!("{:?} session ended", live.mode);
    }

    /// Insert `layer` into the compositing stack ordered by `index`
    pub fn add_layer(&mut self, index: i32, layer: <SessionOf<R> as XrSession>::Layer) {
        self.update_live("add layer", move |live| {
            let mut layers = live.layers.to_vec();
            layers.push(LayerEntry { index, layer });
            layers.sort_by_key(|entry| entry.index);
            live.session
                .update_render_state(layers.iter().map(|entry| entry.layer.clone()).collect());
            live.layers = Rc::from(layers);
            true
        });
    }

    pub fn remove_layer(&mut self, layer: &<SessionOf<R> as XrSession>::Layer) {
        self.update_live("remove layer", |live| {
            let layers: Vec<_> = live
                .layers
                .iter()
                .filter(|entry| &entry.layer != layer)
                .cloned()
                .collect();
            live.session
                .update_render_state(layers.iter().map(|entry| entry.layer.clone()).collect());
            live.layers = Rc::from(layers);
            true
        });
    }

    /// Ask the runtime to run its room setup so planes and meshes get detected
    pub async fn init_room_capture(&self) -> XrResult<()> {
        let session = self.state.session().ok_or(XrError::SessionUnavailable)?;
        if !session.features().room_capture {
            return Err(XrError::capability("room capture"));
        }
        session.initiate_room_capture().await?;
        Ok(())
    }

    /// Per-frame dispatch.
    ///
    /// Runs queued next-frame callbacks, then refreshes the tracked
    /// collections. Without a reference space or a frame nothing is tracked
    /// this tick and every pose consumer falls back to invisible.
    pub fn on_frame(&mut self, delta: f32, frame: Option<&FrameOf<R>>) {
        self.dispatch_events();

        for callback in std::mem::take(&mut self.next_frame_callbacks) {
            callback(delta, frame);
        }

        let Some(live) = self.state.live.as_ref() else {
            return;
        };
        let Some(reference) = self.renderer.reference_space() else {
            return;
        };
        let Some(frame) = frame else {
            return;
        };

        let track_images = live.requested_tracked_images.is_some();
        let update = self.tracker.update(
            &live.tracked_planes,
            &live.tracked_meshes,
            track_images,
            frame,
            reference,
        );
        if update.is_empty() {
            return;
        }

        let mut next = live.clone();
        if let Some(planes) = update.planes {
            next.tracked_planes = planes;
        }
        if let Some(meshes) = update.meshes {
            next.tracked_meshes = meshes;
        }
        if let Some(images) = update.images {
            next.tracked_images = images;
        }
        self.install(XrState { live: Some(next) });
    }
}
