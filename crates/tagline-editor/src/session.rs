//! Annotation session.
//!
//! `Session` owns the stroke store, the tag binder and the history for one
//! drawing surface, and is the only thing the host application talks to:
//!
//! - drawing-layer events come in through `on_stroke_added`,
//!   `on_stroke_modified`, `on_stroke_removed`, `on_transform` and
//!   `on_load_complete`;
//! - UI actions go through the label, measurement, metadata, tag and
//!   history methods.
//!
//! Store changes are published to a queue the session drains after every
//! call, so the binder follows the store without the store knowing about it.
//! Finished user actions are captured into the history automatically.

use crate::binder::{BindError, TagBinder};
use crate::canvas::Canvas;
use crate::history::{CaptureOutcome, History, HistoryError, RestoreOutcome};
use crate::surface::{LoadTicket, Surface, SurfaceError, TransformKind};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tagline_core::config::TAG_FONT_STEP;
use tagline_core::store::SubscriptionId;
use tagline_core::{
    Color, DisplayUnit, EngineConfig, EntityId, ImageContext, LabelError, LabelMode,
    Measurement, MeasurementError, StoreError, StoreEvent, StrokeKey, StrokeLabel, StrokeStore,
    TagBackground, TagShape,
    format_measurement, next_label, parse_measurement,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Label(#[from] LabelError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("entity {0} is not a stroke")]
    NotAStroke(EntityId),
}

/// Where an asynchronous restore stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// No restore in flight.
    Idle,
    /// Waiting for the drawing layer.
    Pending,
    /// Metadata applied, tags rebuilt, history unlocked.
    Ready,
    /// A load finished that no restore was waiting for; tags were rebuilt.
    Stale,
    /// The drawing layer never reported back. The lock was released and
    /// the metadata applied anyway.
    TimedOut,
}

pub struct Session<S: Surface> {
    surface: S,
    store: StrokeStore,
    binder: TagBinder,
    history: History,
    config: EngineConfig,
    context: ImageContext,
    predicted: Option<String>,
    events: Rc<RefCell<Vec<StoreEvent>>>,
}

impl<S: Surface> Session<S> {
    /// Start a session on `context` and record its initial state.
    ///
    /// # Errors
    /// Fails when the initial snapshot cannot be taken.
    pub fn new(
        surface: S,
        config: EngineConfig,
        context: ImageContext,
    ) -> Result<Self, SessionError> {
        let mut store = StrokeStore::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let queue = Rc::clone(&events);
        store.subscribe(move |event| queue.borrow_mut().push(event.clone()));

        let mut session = Self {
            surface,
            store,
            binder: TagBinder::new(context, &config),
            history: History::new(
                config.history_depth,
                Duration::from_millis(config.restore_timeout_ms),
            ),
            config,
            context,
            predicted: None,
            events,
        };
        session.history.capture(context, &session.surface, &session.store)?;
        log::debug!("session started on {context}");
        Ok(session)
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Direct access for the host's own drawing operations. Report what it
    /// did through the `on_*` methods.
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn store(&self) -> &StrokeStore {
        &self.store
    }

    pub fn binder(&self) -> &TagBinder {
        &self.binder
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> ImageContext {
        self.context
    }

    /// Listen to store changes (e.g. a stroke list panel).
    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&StoreEvent) + 'static,
    ) -> SubscriptionId {
        self.store.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    /// Tag entity currently bound to a stroke.
    pub fn tag_for(&self, key: StrokeKey) -> Option<EntityId> {
        self.binder.tag(key).map(|t| t.entity)
    }

    pub fn key(&self, label: &str) -> StrokeKey {
        StrokeKey::new(self.context, StrokeLabel::intern(label))
    }

    // ─── Labels ──────────────────────────────────────────────────────────

    /// Next free label for `context` in the active label mode.
    pub fn label_for(&self, context: ImageContext) -> Result<StrokeLabel, LabelError> {
        let existing: Vec<StrokeLabel> = self.store.labels(context).collect();
        next_label(
            existing.iter().map(StrokeLabel::as_str),
            self.config.label_mode,
            self.predicted.as_deref(),
        )
    }

    pub fn set_label_mode(&mut self, mode: LabelMode) {
        self.config.label_mode = mode;
    }

    /// Feed the external next-label prediction. Consulted first, used only
    /// when valid for the active mode.
    pub fn set_predicted_label(&mut self, predicted: Option<String>) {
        self.predicted = predicted;
    }

    // ─── Measurements ────────────────────────────────────────────────────

    pub fn parse_measurement(&self, text: &str) -> Result<Option<Measurement>, MeasurementError> {
        parse_measurement(text, self.config.display_unit)
    }

    pub fn format_measurement(&self, measurement: &Measurement) -> Option<String> {
        format_measurement(measurement, self.config.display_unit)
    }

    /// Parse user text for a stroke and store it. On failure the stored
    /// value is untouched and the error is returned for the UI to revert.
    pub fn enter_measurement(
        &mut self,
        key: StrokeKey,
        text: &str,
    ) -> Result<Option<Measurement>, SessionError> {
        let unit = self.config.display_unit;
        let measurement = self.store.apply_measurement_text(key, text, unit)?;
        self.dispatch();
        self.checkpoint();
        Ok(measurement)
    }

    /// Switch the unit and re-render every tag.
    pub fn set_display_unit(&mut self, unit: DisplayUnit) {
        self.config.display_unit = unit;
        self.binder
            .set_display_unit(&mut self.surface, &self.store, unit);
    }

    // ─── Metadata ────────────────────────────────────────────────────────

    /// Register a drawn entity as a stroke under `context::label`.
    pub fn attach_metadata(
        &mut self,
        context: ImageContext,
        label: StrokeLabel,
        entity: EntityId,
    ) -> Result<StrokeKey, SessionError> {
        let kind = self
            .surface
            .geometry(entity)
            .map(|g| g.kind())
            .ok_or(SessionError::NotAStroke(entity))?;
        let key = self.store.attach(context, label, entity, kind);
        self.dispatch();
        Ok(key)
    }

    pub fn set_visibility(&mut self, key: StrokeKey, visible: bool) -> Result<(), SessionError> {
        let entity = self
            .store
            .get(key)
            .map(|r| r.entity)
            .ok_or(StoreError::UnknownStroke(key))?;
        self.surface.set_visible(entity, visible)?;
        self.store.set_visibility(key, visible)?;
        self.dispatch();
        self.checkpoint();
        Ok(())
    }

    pub fn set_label_visibility(
        &mut self,
        key: StrokeKey,
        visible: bool,
    ) -> Result<(), SessionError> {
        self.store.set_label_visibility(key, visible)?;
        self.dispatch();
        self.checkpoint();
        Ok(())
    }

    pub fn set_measurement(
        &mut self,
        key: StrokeKey,
        measurement: Option<Measurement>,
    ) -> Result<(), SessionError> {
        self.store.set_measurement(key, measurement)?;
        self.dispatch();
        self.checkpoint();
        Ok(())
    }

    /// Drop a context's metadata and tags. Stroke entities stay with the
    /// drawing layer.
    pub fn clear_context(&mut self, context: ImageContext) {
        self.store.clear_context(context);
        self.dispatch();
        if context == self.context {
            self.checkpoint();
        }
    }

    /// Make another context active. Tags follow, and the history restarts
    /// from the new context's current state.
    pub fn switch_context(&mut self, context: ImageContext) -> Result<(), SessionError> {
        if context == self.context {
            return Ok(());
        }
        self.binder
            .switch_context(&mut self.surface, &mut self.store, context);
        self.dispatch();
        self.context = context;
        self.history.clear();
        self.history.capture(context, &self.surface, &self.store)?;
        log::debug!("switched to context {context}");
        Ok(())
    }

    // ─── Tags ────────────────────────────────────────────────────────────

    pub fn create_tag(&mut self, key: StrokeKey) -> Result<EntityId, SessionError> {
        let entity = self
            .binder
            .create_tag(&mut self.surface, &mut self.store, key)?;
        self.dispatch();
        Ok(entity)
    }

    pub fn remove_tag(&mut self, key: StrokeKey) -> bool {
        self.binder.remove_tag(&mut self.surface, key)
    }

    pub fn update_connector(&mut self, key: StrokeKey) -> Result<(), SessionError> {
        self.binder.update_connector(&mut self.surface, key)?;
        Ok(())
    }

    pub fn set_show_measurements(&mut self, show: bool) {
        self.config.show_measurements = show;
        self.binder
            .set_show_measurements(&mut self.surface, &self.store, show);
    }

    pub fn set_tag_size(&mut self, size: f64) {
        self.binder.set_font_size(&mut self.surface, &self.store, size);
        self.config.tag_font_size = self.binder.style().font_size;
    }

    /// Grow (positive) or shrink (negative) tags by whole steps.
    pub fn step_tag_size(&mut self, steps: i32) {
        let size = self.binder.style().font_size + f64::from(steps) * TAG_FONT_STEP;
        self.set_tag_size(size);
    }

    pub fn set_tag_shape(&mut self, shape: TagShape) {
        self.config.tag_shape = shape;
        self.binder.set_shape(&mut self.surface, &self.store, shape);
    }

    pub fn set_tag_background(&mut self, background: TagBackground) {
        self.config.tag_background = background;
        self.binder
            .set_background(&mut self.surface, &self.store, background);
    }

    /// Set the stroke color. Tags drawn in the stroke color follow it.
    pub fn set_stroke_color(&mut self, color: Color) {
        self.config.stroke_color = color;
        self.binder
            .set_stroke_color(&mut self.surface, &self.store, color);
    }

    // ─── History ─────────────────────────────────────────────────────────

    pub fn capture(&mut self) -> Result<CaptureOutcome, SessionError> {
        Ok(self
            .history
            .capture(self.context, &self.surface, &self.store)?)
    }

    pub fn undo(&mut self) -> RestoreOutcome {
        self.history.undo(&mut self.surface)
    }

    pub fn redo(&mut self) -> RestoreOutcome {
        self.history.redo(&mut self.surface)
    }

    /// Forget all history; the current state becomes the new floor.
    pub fn clear_history(&mut self) -> Result<(), SessionError> {
        self.history.clear();
        self.history
            .capture(self.context, &self.surface, &self.store)?;
        Ok(())
    }

    // ─── Drawing-layer events ────────────────────────────────────────────

    /// A drawing tool finished a stroke: label it, bind a tag, record it.
    pub fn on_stroke_added(&mut self, entity: EntityId) -> Result<StrokeKey, SessionError> {
        let label = self.label_for(self.context)?;
        let key = self.attach_metadata(self.context, label, entity)?;
        self.predicted = None;
        self.checkpoint();
        Ok(key)
    }

    /// A stroke finished being edited.
    pub fn on_stroke_modified(&mut self, entity: EntityId) -> Result<(), SessionError> {
        self.on_transform(entity, TransformKind::Modified)
    }

    /// A stroke was deleted from the drawing layer. Returns its key if it
    /// was known.
    pub fn on_stroke_removed(&mut self, entity: EntityId) -> Option<StrokeKey> {
        let key = self.store.key_for_entity(entity)?;
        self.store.detach(key);
        self.dispatch();
        self.checkpoint();
        Some(key)
    }

    /// A stroke or tag is being moved, scaled or rotated. `Modified` marks
    /// the end of the interaction and records it.
    pub fn on_transform(&mut self, entity: EntityId, kind: TransformKind) -> Result<(), SessionError> {
        self.binder
            .handle_transform(&mut self.surface, &mut self.store, entity, kind)?;
        self.dispatch();
        if kind == TransformKind::Modified {
            self.checkpoint();
        }
        Ok(())
    }

    /// Queue a transform to be applied at `end_frame`.
    pub fn defer_transform(&mut self, entity: EntityId) {
        self.binder.defer_update(&self.store, entity);
    }

    /// Apply all queued transforms, one rebuild per tag.
    pub fn end_frame(&mut self) -> usize {
        let refreshed = self.binder.flush(&mut self.surface, &mut self.store);
        self.dispatch();
        refreshed
    }

    /// The drawing layer finished the load for `ticket`.
    pub fn on_load_complete(&mut self, ticket: LoadTicket) -> LoadStatus {
        match self.history.finish_restore(ticket) {
            Some(pending) => {
                self.store.restore_context(pending.context, pending.strokes);
                self.dispatch();
                self.history.unlock();
                LoadStatus::Ready
            }
            None => {
                log::debug!("load {ticket:?} finished with no restore waiting");
                let context = self.context;
                self.binder
                    .recreate_tags(&mut self.surface, &mut self.store, context);
                self.dispatch();
                LoadStatus::Stale
            }
        }
    }

    /// Check the restore deadline. Call periodically from the event loop.
    pub fn tick(&mut self, now: Instant) -> LoadStatus {
        if !self.history.is_locked() {
            return LoadStatus::Idle;
        }
        match self.history.expire(now) {
            Some(pending) => {
                self.store.restore_context(pending.context, pending.strokes);
                self.dispatch();
                LoadStatus::TimedOut
            }
            None if self.history.is_locked() => LoadStatus::Pending,
            None => LoadStatus::TimedOut,
        }
    }

    // ─── Internals ───────────────────────────────────────────────────────

    /// Feed queued store events to the binder until none are left.
    fn dispatch(&mut self) {
        loop {
            let batch = std::mem::take(&mut *self.events.borrow_mut());
            if batch.is_empty() {
                break;
            }
            for event in &batch {
                self.binder
                    .handle_store_event(&mut self.surface, &mut self.store, event);
            }
        }
    }

    /// Record the current state after a finished user action.
    fn checkpoint(&mut self) {
        match self.history.capture(self.context, &self.surface, &self.store) {
            Ok(outcome) => log::trace!("checkpoint: {outcome:?}"),
            Err(err) => log::warn!("checkpoint failed: {err}"),
        }
    }
}

impl Session<Canvas> {
    /// Complete every pending canvas load and report each to the session.
    pub fn settle(&mut self) -> Vec<LoadStatus> {
        let tickets = self.surface.pump();
        tickets
            .into_iter()
            .map(|ticket| self.on_load_complete(ticket))
            .collect()
    }
}
