//! Tag-connector binding.
//!
//! Every labelled stroke in the active context gets a draggable tag placed
//! at `stroke center + offset`, and a connector line from the tag's center
//! to the nearest point on the stroke. The offset lives in the stroke's
//! metadata so a tag that is removed and recreated (label toggled, undo,
//! context switch) comes back in the same relative place.
//!
//! Connectors are never edited in place: each redraw removes the old line
//! and adds a new one behind everything else.

use crate::surface::{
    ConnectorStyle, Surface, SurfaceError, TagVisual, TransformKind, absolute_center, stroke_shape,
};
use kurbo::{Line, Point, Size, Vec2};
use std::collections::HashMap;
use tagline_core::config::{EngineConfig, clamp_font_size};
use tagline_core::geometry::{SampleDensity, closest_point};
use tagline_core::{
    Color, DisplayUnit, EntityId, EntityRole, ImageContext, Measurement, StoreEvent, StrokeKey,
    StrokeKind, StrokeStore, TagBackground, TagShape, format_measurement,
};
use thiserror::Error;

/// Offsets closer than this are considered unchanged.
const OFFSET_EPSILON: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum BindError {
    #[error("no stroke {0} in the store")]
    UnknownStroke(StrokeKey),
    #[error("labels are hidden for {0}")]
    LabelHidden(StrokeKey),
    #[error("no tag bound to {0}")]
    NoTag(StrokeKey),
    #[error("drawing entity {0} is missing")]
    MissingEntity(EntityId),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// Live state of one bound tag.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundTag {
    pub entity: EntityId,
    pub stroke: EntityId,
    pub connector: Option<EntityId>,
    pub text: String,
    /// Follows the stroke's visibility flag.
    pub visible: bool,
}

/// Look of newly built or refreshed tags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TagStyle {
    pub font_size: f64,
    pub padding: f64,
    pub char_width_factor: f64,
    pub shape: TagShape,
    pub background: TagBackground,
    pub stroke_color: Color,
}

impl TagStyle {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            font_size: clamp_font_size(config.tag_font_size),
            padding: config.tag_padding,
            char_width_factor: config.char_width_factor,
            shape: config.tag_shape,
            background: config.tag_background,
            stroke_color: config.stroke_color,
        }
    }
}

/// Work queued by `defer_update` for the next `flush`.
#[derive(Debug, Clone, Copy, Default)]
struct PendingUpdate {
    tag_moved: bool,
    stroke_moved: bool,
}

pub struct TagBinder {
    context: ImageContext,
    tags: HashMap<StrokeKey, BoundTag>,
    /// Engine-created entities → what they stand for.
    roles: HashMap<EntityId, EntityRole>,
    style: TagStyle,
    connector_style: ConnectorStyle,
    default_offset: Vec2,
    density: SampleDensity,
    show_measurements: bool,
    display_unit: DisplayUnit,
    pending: HashMap<StrokeKey, PendingUpdate>,
}

impl TagBinder {
    pub fn new(context: ImageContext, config: &EngineConfig) -> Self {
        Self {
            context,
            tags: HashMap::new(),
            roles: HashMap::new(),
            style: TagStyle::from_config(config),
            connector_style: ConnectorStyle::default(),
            default_offset: config.default_tag_offset,
            density: config.density(),
            show_measurements: config.show_measurements,
            display_unit: config.display_unit,
            pending: HashMap::new(),
        }
    }

    pub fn context(&self) -> ImageContext {
        self.context
    }

    pub fn tag(&self, key: StrokeKey) -> Option<&BoundTag> {
        self.tags.get(&key)
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn role(&self, entity: EntityId) -> Option<EntityRole> {
        self.roles.get(&entity).copied()
    }

    pub fn style(&self) -> TagStyle {
        self.style
    }

    pub fn show_measurements(&self) -> bool {
        self.show_measurements
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Build (or rebuild) the tag for a stroke.
    ///
    /// An existing tag for the same key is torn down first. The initial
    /// position is the stroke's absolute center plus its stored offset, or
    /// the default offset, which is then persisted.
    pub fn create_tag<S: Surface>(
        &mut self,
        surface: &mut S,
        store: &mut StrokeStore,
        key: StrokeKey,
    ) -> Result<EntityId, BindError> {
        let record = store.get(key).ok_or(BindError::UnknownStroke(key))?;
        if !record.label_visible {
            return Err(BindError::LabelHidden(key));
        }
        let stroke = record.entity;
        let visible = record.visible;
        let stored_offset = record.tag_offset;
        let text = self.tag_text(key, record.measurement);

        if self.tags.contains_key(&key) {
            log::debug!("replacing existing tag for {key}");
            self.remove_tag(surface, key);
        }

        let stroke_center =
            absolute_center(surface, stroke).ok_or(BindError::MissingEntity(stroke))?;
        let offset = stored_offset.unwrap_or(self.default_offset);
        let visual = self.layout(surface, &text, stroke_center + offset);
        let entity = surface.add_tag(key.context, &visual);
        if !visible {
            surface.set_visible(entity, false)?;
        }

        if stored_offset.is_none() {
            store
                .set_tag_offset(key, offset)
                .map_err(|_| BindError::UnknownStroke(key))?;
        }

        self.roles.insert(entity, EntityRole::Tag { key });
        self.roles.insert(
            stroke,
            EntityRole::Stroke {
                key,
                kind: record_kind(store, key),
            },
        );
        self.tags.insert(
            key,
            BoundTag {
                entity,
                stroke,
                connector: None,
                text,
                visible,
            },
        );
        log::debug!("tag {entity} bound to {key} at {:?}", visual.center);

        self.update_connector(surface, key)?;
        Ok(entity)
    }

    /// Tear down a tag and its connector. The stored offset is kept.
    pub fn remove_tag<S: Surface>(&mut self, surface: &mut S, key: StrokeKey) -> bool {
        let Some(tag) = self.tags.remove(&key) else {
            return false;
        };
        self.pending.remove(&key);
        discard(surface, tag.entity);
        self.roles.remove(&tag.entity);
        if let Some(connector) = tag.connector {
            discard(surface, connector);
            self.roles.remove(&connector);
        }
        if self.roles.get(&tag.stroke).is_some_and(|r| r.key() == key) {
            self.roles.remove(&tag.stroke);
        }
        log::debug!("tag for {key} detached");
        true
    }

    /// Drop every tag of a context.
    pub fn remove_context_tags<S: Surface>(&mut self, surface: &mut S, context: ImageContext) {
        let keys: Vec<StrokeKey> = self
            .tags
            .keys()
            .filter(|k| k.context == context)
            .copied()
            .collect();
        for key in keys {
            self.remove_tag(surface, key);
        }
    }

    /// Rebuild every tag of a context from the store. Tags whose stroke
    /// entity is missing are skipped with a warning.
    pub fn recreate_tags<S: Surface>(
        &mut self,
        surface: &mut S,
        store: &mut StrokeStore,
        context: ImageContext,
    ) -> usize {
        self.remove_context_tags(surface, context);
        if context != self.context {
            return 0;
        }

        let keys: Vec<StrokeKey> = store
            .records(context)
            .filter(|r| r.label_visible)
            .map(|r| StrokeKey::new(context, r.label))
            .collect();
        let mut created = 0;
        for key in keys {
            match self.create_tag(surface, store, key) {
                Ok(_) => created += 1,
                Err(err) => log::warn!("could not recreate tag for {key}: {err}"),
            }
        }
        log::debug!("recreated {created} tags for {context}");
        created
    }

    /// Make `context` the active one: its tags are built, all others torn
    /// down.
    pub fn switch_context<S: Surface>(
        &mut self,
        surface: &mut S,
        store: &mut StrokeStore,
        context: ImageContext,
    ) {
        let previous = self.context;
        self.remove_context_tags(surface, previous);
        self.context = context;
        self.recreate_tags(surface, store, context);
    }

    // ─── Geometry updates ────────────────────────────────────────────────

    /// Replace the connector with a fresh line from the tag center to the
    /// nearest point on the stroke, drawn behind everything.
    pub fn update_connector<S: Surface>(
        &mut self,
        surface: &mut S,
        key: StrokeKey,
    ) -> Result<(), BindError> {
        let tag = self.tags.get_mut(&key).ok_or(BindError::NoTag(key))?;

        if let Some(old) = tag.connector.take() {
            discard(surface, old);
            self.roles.remove(&old);
        }

        let tag_center =
            absolute_center(surface, tag.entity).ok_or(BindError::MissingEntity(tag.entity))?;
        let shape = stroke_shape(surface, tag.stroke).ok_or(BindError::MissingEntity(tag.stroke))?;
        let anchor = closest_point(&shape, tag_center, self.density);

        let connector = surface.add_connector(
            key.context,
            Line::new(tag_center, anchor),
            self.connector_style,
        );
        surface.send_to_back(connector)?;
        if !tag.visible {
            surface.set_visible(connector, false)?;
        }
        tag.connector = Some(connector);
        self.roles.insert(connector, EntityRole::Connector { key });

        log::trace!("connector for {key}: {tag_center:?} -> {anchor:?}");
        Ok(())
    }

    /// The tag was dragged: persist its new offset and redraw the connector.
    pub fn on_tag_moved<S: Surface>(
        &mut self,
        surface: &mut S,
        store: &mut StrokeStore,
        key: StrokeKey,
    ) -> Result<(), BindError> {
        let tag = self.tags.get(&key).ok_or(BindError::NoTag(key))?;
        let tag_center =
            absolute_center(surface, tag.entity).ok_or(BindError::MissingEntity(tag.entity))?;
        let stroke_center =
            absolute_center(surface, tag.stroke).ok_or(BindError::MissingEntity(tag.stroke))?;

        let offset = tag_center - stroke_center;
        store
            .set_tag_offset(key, offset)
            .map_err(|_| BindError::UnknownStroke(key))?;
        log::trace!("tag for {key} moved, offset {offset:?}");
        self.update_connector(surface, key)
    }

    /// The stroke moved, scaled or rotated: follow it, unless the tag is
    /// part of the same interactive selection and is already being moved.
    pub fn on_stroke_transformed<S: Surface>(
        &mut self,
        surface: &mut S,
        store: &StrokeStore,
        key: StrokeKey,
    ) -> Result<(), BindError> {
        let tag = self.tags.get(&key).ok_or(BindError::NoTag(key))?;

        if !surface.in_active_selection(tag.entity) {
            let stroke_center =
                absolute_center(surface, tag.stroke).ok_or(BindError::MissingEntity(tag.stroke))?;
            let offset = store
                .get(key)
                .and_then(|r| r.tag_offset)
                .unwrap_or(self.default_offset);
            surface.set_center(tag.entity, stroke_center + offset)?;
        }
        self.update_connector(surface, key)
    }

    /// Route a drawing-layer transform event to the right handler.
    /// Entities the binder does not know are ignored.
    pub fn handle_transform<S: Surface>(
        &mut self,
        surface: &mut S,
        store: &mut StrokeStore,
        entity: EntityId,
        kind: TransformKind,
    ) -> Result<(), BindError> {
        match self.resolve(store, entity) {
            Some(EntityRole::Tag { key }) => {
                log::trace!("tag {entity} {kind:?}");
                self.on_tag_moved(surface, store, key)
            }
            Some(EntityRole::Stroke { key, .. }) if self.tags.contains_key(&key) => {
                self.on_stroke_transformed(surface, store, key)
            }
            _ => Ok(()),
        }
    }

    /// Queue a transform for the next `flush`. Several events for the same
    /// tag within one frame collapse into a single rebuild.
    pub fn defer_update(&mut self, store: &StrokeStore, entity: EntityId) {
        match self.resolve(store, entity) {
            Some(EntityRole::Tag { key }) => {
                self.pending.entry(key).or_default().tag_moved = true;
            }
            Some(EntityRole::Stroke { key, .. }) if self.tags.contains_key(&key) => {
                self.pending.entry(key).or_default().stroke_moved = true;
            }
            _ => {}
        }
    }

    /// Apply queued updates. Returns how many tags were refreshed.
    pub fn flush<S: Surface>(&mut self, surface: &mut S, store: &mut StrokeStore) -> usize {
        let pending: Vec<(StrokeKey, PendingUpdate)> = self.pending.drain().collect();
        let mut refreshed = 0;
        for (key, update) in pending {
            let result = if update.tag_moved {
                self.on_tag_moved(surface, store, key)
            } else if update.stroke_moved {
                self.on_stroke_transformed(surface, store, key)
            } else {
                continue;
            };
            match result {
                Ok(()) => refreshed += 1,
                Err(err) => log::warn!("deferred update for {key} failed: {err}"),
            }
        }
        refreshed
    }

    fn resolve(&self, store: &StrokeStore, entity: EntityId) -> Option<EntityRole> {
        if let Some(role) = self.roles.get(&entity) {
            return Some(*role);
        }
        let key = store.key_for_entity(entity)?;
        Some(EntityRole::Stroke {
            key,
            kind: record_kind(store, key),
        })
    }

    // ─── Text & appearance ───────────────────────────────────────────────

    /// `label`, or `label = measurement` when measurements are shown and
    /// one exists.
    pub fn tag_text(&self, key: StrokeKey, measurement: Option<Measurement>) -> String {
        let formatted = measurement
            .filter(|_| self.show_measurements)
            .and_then(|m| format_measurement(&m, self.display_unit));
        match formatted {
            Some(value) => format!("{} = {value}", key.label),
            None => key.label.to_string(),
        }
    }

    /// Regenerate a tag's text and background, keeping its center where it
    /// was.
    pub fn refresh_text<S: Surface>(
        &mut self,
        surface: &mut S,
        store: &StrokeStore,
        key: StrokeKey,
    ) -> Result<(), BindError> {
        let measurement = store
            .get(key)
            .ok_or(BindError::UnknownStroke(key))?
            .measurement;
        let text = self.tag_text(key, measurement);
        let tag = self.tags.get(&key).ok_or(BindError::NoTag(key))?;
        let center =
            absolute_center(surface, tag.entity).ok_or(BindError::MissingEntity(tag.entity))?;
        let entity = tag.entity;

        let visual = self.layout(surface, &text, center);
        surface.update_tag(entity, &visual)?;
        if let Some(tag) = self.tags.get_mut(&key) {
            tag.text = text;
        }
        self.update_connector(surface, key)
    }

    fn refresh_all<S: Surface>(&mut self, surface: &mut S, store: &StrokeStore) {
        let keys: Vec<StrokeKey> = self.tags.keys().copied().collect();
        for key in keys {
            if let Err(err) = self.refresh_text(surface, store, key) {
                log::warn!("could not refresh tag for {key}: {err}");
            }
        }
    }

    pub fn set_show_measurements<S: Surface>(
        &mut self,
        surface: &mut S,
        store: &StrokeStore,
        show: bool,
    ) {
        if self.show_measurements == show {
            return;
        }
        self.show_measurements = show;
        self.refresh_all(surface, store);
    }

    pub fn set_display_unit<S: Surface>(
        &mut self,
        surface: &mut S,
        store: &StrokeStore,
        unit: DisplayUnit,
    ) {
        if self.display_unit == unit {
            return;
        }
        self.display_unit = unit;
        self.refresh_all(surface, store);
    }

    /// Change the tag font size (clamped) and rebuild every tag.
    pub fn set_font_size<S: Surface>(&mut self, surface: &mut S, store: &StrokeStore, size: f64) {
        let size = clamp_font_size(size);
        if self.style.font_size == size {
            return;
        }
        self.style.font_size = size;
        self.refresh_all(surface, store);
    }

    pub fn set_shape<S: Surface>(&mut self, surface: &mut S, store: &StrokeStore, shape: TagShape) {
        if self.style.shape == shape {
            return;
        }
        self.style.shape = shape;
        self.refresh_all(surface, store);
    }

    pub fn set_background<S: Surface>(
        &mut self,
        surface: &mut S,
        store: &StrokeStore,
        background: TagBackground,
    ) {
        if self.style.background == background {
            return;
        }
        self.style.background = background;
        self.refresh_all(surface, store);
    }

    /// Tags are rebuilt only when their background follows the stroke color.
    pub fn set_stroke_color<S: Surface>(
        &mut self,
        surface: &mut S,
        store: &StrokeStore,
        color: Color,
    ) {
        if self.style.stroke_color == color {
            return;
        }
        self.style.stroke_color = color;
        if self.style.background.follows_stroke_color() {
            self.refresh_all(surface, store);
        }
    }

    /// Show or hide a tag and its connector along with its stroke.
    pub fn set_tag_visibility<S: Surface>(
        &mut self,
        surface: &mut S,
        key: StrokeKey,
        visible: bool,
    ) -> Result<(), BindError> {
        let tag = self.tags.get_mut(&key).ok_or(BindError::NoTag(key))?;
        tag.visible = visible;
        surface.set_visible(tag.entity, visible)?;
        if let Some(connector) = tag.connector {
            surface.set_visible(connector, visible)?;
        }
        Ok(())
    }

    fn layout<S: Surface>(&self, surface: &S, text: &str, center: Point) -> TagVisual {
        let font_size = self.style.font_size;
        let measured = surface.measure_text(text, font_size);
        let estimated = text.chars().count() as f64 * font_size * self.style.char_width_factor;
        let text_size = Size::new(measured.width.max(estimated), measured.height.max(font_size));
        let size = Size::new(
            text_size.width + 2.0 * self.style.padding,
            text_size.height + 2.0 * self.style.padding,
        );
        TagVisual {
            text: text.to_string(),
            center,
            size,
            font_size,
            corner_radius: self.style.shape.corner_radius(size.height),
            colors: self.style.background.colors(self.style.stroke_color),
        }
    }

    // ─── Store events ────────────────────────────────────────────────────

    /// React to a store change. Events for other contexts are ignored.
    pub fn handle_store_event<S: Surface>(
        &mut self,
        surface: &mut S,
        store: &mut StrokeStore,
        event: &StoreEvent,
    ) {
        let result = match *event {
            StoreEvent::Attached { key, .. } if key.context == self.context => {
                let wants_tag = store.get(key).is_some_and(|r| r.label_visible);
                if wants_tag {
                    self.create_tag(surface, store, key).map(drop)
                } else {
                    Ok(())
                }
            }
            StoreEvent::Detached { key, .. } => {
                self.remove_tag(surface, key);
                Ok(())
            }
            StoreEvent::VisibilityChanged { key, visible } if self.tags.contains_key(&key) => {
                self.set_tag_visibility(surface, key, visible)
            }
            StoreEvent::LabelVisibilityChanged { key, visible } if key.context == self.context => {
                if visible {
                    self.create_tag(surface, store, key).map(drop)
                } else {
                    self.remove_tag(surface, key);
                    Ok(())
                }
            }
            StoreEvent::MeasurementChanged { key, .. } if self.tags.contains_key(&key) => {
                self.refresh_text(surface, store, key)
            }
            StoreEvent::TagOffsetChanged { key, offset } if self.tags.contains_key(&key) => {
                self.follow_offset(surface, key, offset)
            }
            StoreEvent::ContextCleared { context } => {
                self.remove_context_tags(surface, context);
                Ok(())
            }
            StoreEvent::Restored { context } => {
                self.recreate_tags(surface, store, context);
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(err) = result {
            log::warn!("store event {event:?} not applied to tags: {err}");
        }
    }

    /// Move a tag to match an offset written by someone else. Offsets the
    /// binder wrote itself already match and are left alone.
    fn follow_offset<S: Surface>(
        &mut self,
        surface: &mut S,
        key: StrokeKey,
        offset: Vec2,
    ) -> Result<(), BindError> {
        let tag = self.tags.get(&key).ok_or(BindError::NoTag(key))?;
        let (Some(tag_center), Some(stroke_center)) = (
            absolute_center(surface, tag.entity),
            absolute_center(surface, tag.stroke),
        ) else {
            return Ok(());
        };
        if ((tag_center - stroke_center) - offset).hypot() <= OFFSET_EPSILON {
            return Ok(());
        }
        surface.set_center(tag.entity, stroke_center + offset)?;
        self.update_connector(surface, key)
    }
}

fn record_kind(store: &StrokeStore, key: StrokeKey) -> StrokeKind {
    store.get(key).map_or(StrokeKind::Segment, |r| r.kind)
}

/// Remove an engine entity, tolerating one the drawing layer already
/// dropped (e.g. during a scene reload).
fn discard<S: Surface>(surface: &mut S, id: EntityId) {
    if let Err(err) = surface.remove(id) {
        log::trace!("entity {id} already gone: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use pretty_assertions::assert_eq;
    use tagline_core::{StrokeLabel, TagColors};

    fn key() -> StrokeKey {
        StrokeKey::new(ImageContext::intern("binder-test"), StrokeLabel::intern("B3"))
    }

    fn binder(show_measurements: bool) -> TagBinder {
        let config = EngineConfig {
            show_measurements,
            ..EngineConfig::default()
        };
        TagBinder::new(key().context, &config)
    }

    #[test]
    fn text_is_label_alone_unless_measurements_shown() {
        let m = Measurement::from_inches(7.0);
        assert_eq!(binder(false).tag_text(key(), m), "B3");
        assert_eq!(binder(true).tag_text(key(), m), "B3 = 7\"");
        assert_eq!(binder(true).tag_text(key(), None), "B3");
    }

    #[test]
    fn layout_pads_the_wider_width_estimate() {
        let canvas = Canvas::new().with_char_width(0.25);
        let visual = binder(false).layout(&canvas, "B3", Point::new(1.0, 2.0));
        // Estimate (2 * 20 * 0.6) beats the narrow canvas font.
        assert_eq!(visual.size, Size::new(24.0 + 8.0, 20.0 + 8.0));
        assert_eq!(visual.center, Point::new(1.0, 2.0));
        assert_eq!(visual.corner_radius, 2.0);
        assert_eq!(visual.colors, TagColors::default());
    }

    #[test]
    fn unknown_entities_are_ignored() {
        let mut canvas = Canvas::new();
        let mut store = StrokeStore::new();
        let mut binder = binder(false);
        let ghost = EntityId::from_raw(u64::MAX - 1);
        assert!(
            binder
                .handle_transform(&mut canvas, &mut store, ghost, TransformKind::Moving)
                .is_ok()
        );
        binder.defer_update(&store, ghost);
        assert_eq!(binder.flush(&mut canvas, &mut store), 0);
    }

    #[test]
    fn create_tag_for_unknown_stroke_fails() {
        let mut canvas = Canvas::new();
        let mut store = StrokeStore::new();
        let err = binder(false).create_tag(&mut canvas, &mut store, key());
        assert!(matches!(err, Err(BindError::UnknownStroke(k)) if k == key()));
    }
}
