//! Stroke metadata store.
//!
//! One instance per session, passed by reference to whatever needs it. It
//! holds, per image context, the label → record mapping for every measured
//! stroke and publishes a `StoreEvent` for each change so that views and the
//! tag binder can follow along without polling.

use crate::id::{EntityId, ImageContext, StrokeKey, StrokeLabel};
use crate::measurement::{MeasurementError, parse_measurement};
use crate::model::{DisplayUnit, Measurement, StrokeKind};
use kurbo::Vec2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("no stroke {0} in the store")]
    UnknownStroke(StrokeKey),
    #[error(transparent)]
    Measurement(#[from] MeasurementError),
}

/// Everything the engine knows about one stroke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeRecord {
    pub label: StrokeLabel,
    /// The drawing-layer entity carrying the geometry.
    pub entity: EntityId,
    pub kind: StrokeKind,
    pub visible: bool,
    /// When false the stroke has no live tag.
    pub label_visible: bool,
    /// `None` means "no measurement", never zero.
    pub measurement: Option<Measurement>,
    /// Tag position relative to the stroke center. Kept while the tag is
    /// hidden so it comes back in the same place.
    pub tag_offset: Option<Vec2>,
}

impl StrokeRecord {
    fn new(label: StrokeLabel, entity: EntityId, kind: StrokeKind) -> Self {
        Self {
            label,
            entity,
            kind,
            visible: true,
            label_visible: true,
            measurement: None,
            tag_offset: None,
        }
    }
}

/// Serializable copy of one context's records, in attach order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub strokes: Vec<StrokeRecord>,
}

/// Change notification published after every successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Attached { key: StrokeKey, entity: EntityId },
    Detached { key: StrokeKey, entity: EntityId },
    VisibilityChanged { key: StrokeKey, visible: bool },
    LabelVisibilityChanged { key: StrokeKey, visible: bool },
    MeasurementChanged { key: StrokeKey, measurement: Option<Measurement> },
    TagOffsetChanged { key: StrokeKey, offset: Vec2 },
    ContextCleared { context: ImageContext },
    Restored { context: ImageContext },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&StoreEvent)>;

#[derive(Default)]
struct ContextStrokes {
    order: Vec<StrokeLabel>,
    records: HashMap<StrokeLabel, StrokeRecord>,
}

/// The stroke metadata registry.
#[derive(Default)]
pub struct StrokeStore {
    contexts: HashMap<ImageContext, ContextStrokes>,
    by_entity: HashMap<EntityId, StrokeKey>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl StrokeStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Subscriptions ───────────────────────────────────────────────────

    pub fn subscribe(&mut self, listener: impl FnMut(&StoreEvent) + 'static) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sub, _)| *sub != id);
        self.listeners.len() != before
    }

    fn publish(&mut self, event: StoreEvent) {
        log::trace!("store event: {event:?}");
        for (_, listener) in &mut self.listeners {
            listener(&event);
        }
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub fn get(&self, key: StrokeKey) -> Option<&StrokeRecord> {
        self.contexts
            .get(&key.context)
            .and_then(|ctx| ctx.records.get(&key.label))
    }

    pub fn contains(&self, key: StrokeKey) -> bool {
        self.get(key).is_some()
    }

    /// Stroke bound to a drawing-layer entity, if any.
    pub fn key_for_entity(&self, entity: EntityId) -> Option<StrokeKey> {
        self.by_entity.get(&entity).copied()
    }

    /// Labels of a context in attach order.
    pub fn labels(&self, context: ImageContext) -> impl Iterator<Item = StrokeLabel> + '_ {
        self.contexts
            .get(&context)
            .into_iter()
            .flat_map(|ctx| ctx.order.iter().copied())
    }

    /// Records of a context in attach order.
    pub fn records(&self, context: ImageContext) -> impl Iterator<Item = &StrokeRecord> + '_ {
        self.contexts.get(&context).into_iter().flat_map(|ctx| {
            ctx.order
                .iter()
                .filter_map(move |label| ctx.records.get(label))
        })
    }

    pub fn len(&self, context: ImageContext) -> usize {
        self.contexts.get(&context).map_or(0, |ctx| ctx.order.len())
    }

    pub fn is_empty(&self, context: ImageContext) -> bool {
        self.len(context) == 0
    }

    // ─── Mutators ────────────────────────────────────────────────────────

    /// Register a stroke under `context::label`.
    ///
    /// Attaching an existing key again only rebinds the entity and kind;
    /// flags, measurement and tag offset are kept.
    pub fn attach(
        &mut self,
        context: ImageContext,
        label: StrokeLabel,
        entity: EntityId,
        kind: StrokeKind,
    ) -> StrokeKey {
        let key = StrokeKey::new(context, label);
        let ctx = self.contexts.entry(context).or_default();

        let previous = match ctx.records.get_mut(&label) {
            Some(record) => {
                let previous = record.entity;
                record.entity = entity;
                record.kind = kind;
                Some(previous)
            }
            None => {
                ctx.order.push(label);
                ctx.records
                    .insert(label, StrokeRecord::new(label, entity, kind));
                None
            }
        };

        if let Some(old) = previous {
            if old == entity {
                return key;
            }
            self.unmap_entity(old, key);
        }
        self.by_entity.insert(entity, key);

        log::debug!("attached {key} to entity {entity}");
        self.publish(StoreEvent::Attached { key, entity });
        key
    }

    /// Forget a stroke. Returns its last record.
    pub fn detach(&mut self, key: StrokeKey) -> Option<StrokeRecord> {
        let ctx = self.contexts.get_mut(&key.context)?;
        let record = ctx.records.remove(&key.label)?;
        ctx.order.retain(|l| *l != key.label);
        self.unmap_entity(record.entity, key);

        log::debug!("detached {key}");
        self.publish(StoreEvent::Detached {
            key,
            entity: record.entity,
        });
        Some(record)
    }

    pub fn set_visibility(&mut self, key: StrokeKey, visible: bool) -> Result<(), StoreError> {
        let record = self.record_mut(key)?;
        if record.visible == visible {
            return Ok(());
        }
        record.visible = visible;
        self.publish(StoreEvent::VisibilityChanged { key, visible });
        Ok(())
    }

    pub fn set_label_visibility(&mut self, key: StrokeKey, visible: bool) -> Result<(), StoreError> {
        let record = self.record_mut(key)?;
        if record.label_visible == visible {
            return Ok(());
        }
        record.label_visible = visible;
        self.publish(StoreEvent::LabelVisibilityChanged { key, visible });
        Ok(())
    }

    pub fn set_measurement(
        &mut self,
        key: StrokeKey,
        measurement: Option<Measurement>,
    ) -> Result<(), StoreError> {
        let record = self.record_mut(key)?;
        if record.measurement == measurement {
            return Ok(());
        }
        record.measurement = measurement;
        self.publish(StoreEvent::MeasurementChanged { key, measurement });
        Ok(())
    }

    /// Parse user text in `unit` and store the result. Empty text or `0`
    /// clears the measurement. On a parse failure the stored value is left
    /// as it was.
    pub fn apply_measurement_text(
        &mut self,
        key: StrokeKey,
        text: &str,
        unit: DisplayUnit,
    ) -> Result<Option<Measurement>, StoreError> {
        if !self.contains(key) {
            return Err(StoreError::UnknownStroke(key));
        }
        let measurement = parse_measurement(text, unit).inspect_err(|err| {
            log::warn!("rejected measurement for {key}: {err}");
        })?;
        self.set_measurement(key, measurement)?;
        Ok(measurement)
    }

    pub fn set_tag_offset(&mut self, key: StrokeKey, offset: Vec2) -> Result<(), StoreError> {
        let record = self.record_mut(key)?;
        if record.tag_offset == Some(offset) {
            return Ok(());
        }
        record.tag_offset = Some(offset);
        self.publish(StoreEvent::TagOffsetChanged { key, offset });
        Ok(())
    }

    /// Drop every record of a context.
    pub fn clear_context(&mut self, context: ImageContext) {
        let Some(ctx) = self.contexts.remove(&context) else {
            return;
        };
        for record in ctx.records.values() {
            self.unmap_entity(record.entity, StrokeKey::new(context, record.label));
        }
        log::debug!("cleared context {context} ({} strokes)", ctx.order.len());
        self.publish(StoreEvent::ContextCleared { context });
    }

    // ─── Snapshots ───────────────────────────────────────────────────────

    pub fn snapshot_context(&self, context: ImageContext) -> ContextSnapshot {
        ContextSnapshot {
            strokes: self.records(context).cloned().collect(),
        }
    }

    /// Replace a context's records wholesale.
    pub fn restore_context(&mut self, context: ImageContext, snapshot: ContextSnapshot) {
        if let Some(old) = self.contexts.remove(&context) {
            for record in old.records.values() {
                self.unmap_entity(record.entity, StrokeKey::new(context, record.label));
            }
        }

        let mut ctx = ContextStrokes::default();
        for record in snapshot.strokes {
            let label = record.label;
            self.by_entity
                .insert(record.entity, StrokeKey::new(context, label));
            if ctx.records.insert(label, record).is_none() {
                ctx.order.push(label);
            }
        }
        log::debug!("restored context {context} ({} strokes)", ctx.order.len());
        self.contexts.insert(context, ctx);
        self.publish(StoreEvent::Restored { context });
    }

    /// Drop the entity index entry, unless the entity has since been
    /// attached under another key.
    fn unmap_entity(&mut self, entity: EntityId, key: StrokeKey) {
        if self.by_entity.get(&entity) == Some(&key) {
            self.by_entity.remove(&entity);
        }
    }

    fn record_mut(&mut self, key: StrokeKey) -> Result<&mut StrokeRecord, StoreError> {
        self.contexts
            .get_mut(&key.context)
            .and_then(|ctx| ctx.records.get_mut(&key.label))
            .ok_or(StoreError::UnknownStroke(key))
    }
}
