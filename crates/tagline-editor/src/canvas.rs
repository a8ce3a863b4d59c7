//! In-memory drawing surface.
//!
//! `Canvas` keeps every entity in a `petgraph` stable graph. Edges go from
//! parent → child; the root holds ordinary entities and, while one is
//! active, a temporary selection group whose children are expressed in the
//! group's frame. Z-order is the explicit child order of each parent.
//!
//! Scene loads are deferred: `load_scene` queues the work and `pump`
//! applies it, the way a real drawing layer completes asynchronously.

use crate::surface::{ConnectorStyle, LoadTicket, SceneData, Surface, SurfaceError, TagVisual};
use kurbo::{Affine, Line, Point, Rect, Size, Vec2};
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tagline_core::geometry::local_bounds;
use tagline_core::{EntityId, Geometry, ImageContext, TagColors};

const DEFAULT_CHAR_WIDTH: f64 = 0.6;

/// What a canvas entity is.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Root,
    Stroke {
        geometry: Geometry,
    },
    /// Text on a background, centered on the entity origin.
    Tag {
        text: String,
        size: Size,
        font_size: f64,
        corner_radius: f64,
        colors: TagColors,
    },
    /// Line in absolute coordinates.
    Connector {
        line: Line,
        style: ConnectorStyle,
    },
    /// Temporary multi-entity selection.
    Selection,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub context: ImageContext,
    pub kind: EntityKind,
    /// Entity frame → parent frame.
    pub transform: Affine,
    pub visible: bool,
}

impl Entity {
    fn local_rect(&self) -> Rect {
        match &self.kind {
            EntityKind::Stroke { geometry } => local_bounds(geometry),
            EntityKind::Tag { size, .. } => Rect::from_center_size(Point::ZERO, *size),
            EntityKind::Connector { line, .. } => Rect::from_points(line.p0, line.p1),
            EntityKind::Root | EntityKind::Selection => Rect::ZERO,
        }
    }

    fn local_center(&self) -> Point {
        match &self.kind {
            EntityKind::Stroke { geometry } => local_bounds(geometry).center(),
            EntityKind::Connector { line, .. } => line.p0.midpoint(line.p1),
            _ => Point::ZERO,
        }
    }

    fn is_exportable(&self) -> bool {
        matches!(self.kind, EntityKind::Stroke { .. })
    }
}

/// Serialized form of one stroke in a scene blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SceneEntity {
    id: EntityId,
    transform: Affine,
    geometry: Geometry,
    visible: bool,
}

#[derive(Debug)]
struct PendingLoad {
    ticket: LoadTicket,
    context: ImageContext,
    entities: Vec<SceneEntity>,
}

/// Headless `Surface` implementation.
#[derive(Debug)]
pub struct Canvas {
    graph: StableDiGraph<Entity, ()>,
    root: NodeIndex,
    index: HashMap<EntityId, NodeIndex>,
    /// Child order per parent, back to front.
    z_order: HashMap<NodeIndex, Vec<NodeIndex>>,
    selection: Option<NodeIndex>,
    pending: VecDeque<PendingLoad>,
    next_ticket: u64,
    char_width: f64,
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

impl Canvas {
    #[must_use]
    pub fn new() -> Self {
        let mut graph = StableDiGraph::new();
        let root = graph.add_node(Entity {
            id: EntityId::from_raw(0),
            context: ImageContext::intern(""),
            kind: EntityKind::Root,
            transform: Affine::IDENTITY,
            visible: true,
        });
        Self {
            graph,
            root,
            index: HashMap::new(),
            z_order: HashMap::new(),
            selection: None,
            pending: VecDeque::new(),
            next_ticket: 0,
            char_width: DEFAULT_CHAR_WIDTH,
        }
    }

    /// Glyph advance used by `measure_text`, as a fraction of font size.
    #[must_use]
    pub fn with_char_width(mut self, factor: f64) -> Self {
        self.char_width = factor;
        self
    }

    // ─── Graph plumbing ──────────────────────────────────────────────────

    fn insert(&mut self, parent: NodeIndex, entity: Entity) -> NodeIndex {
        let id = entity.id;
        let idx = self.graph.add_node(entity);
        self.graph.add_edge(parent, idx, ());
        self.z_order.entry(parent).or_default().push(idx);
        self.index.insert(id, idx);
        idx
    }

    fn remove_node(&mut self, idx: NodeIndex) -> Option<Entity> {
        if let Some(parent) = self.parent(idx)
            && let Some(order) = self.z_order.get_mut(&parent)
        {
            order.retain(|&c| c != idx);
        }
        self.z_order.remove(&idx);
        let removed = self.graph.remove_node(idx);
        if let Some(entity) = &removed {
            self.index.remove(&entity.id);
        }
        removed
    }

    fn parent(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .next()
    }

    fn reparent(&mut self, child: NodeIndex, new_parent: NodeIndex) {
        if let Some(old_parent) = self.parent(child) {
            if let Some(edge) = self.graph.find_edge(old_parent, child) {
                self.graph.remove_edge(edge);
            }
            if let Some(order) = self.z_order.get_mut(&old_parent) {
                order.retain(|&c| c != child);
            }
        }
        self.graph.add_edge(new_parent, child, ());
        self.z_order.entry(new_parent).or_default().push(child);
    }

    fn children(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.z_order.get(&idx).cloned().unwrap_or_default()
    }

    fn node(&self, id: EntityId) -> Result<NodeIndex, SurfaceError> {
        self.index
            .get(&id)
            .copied()
            .ok_or(SurfaceError::UnknownEntity(id))
    }

    fn group_of(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.parent(idx)
            .filter(|p| matches!(self.graph[*p].kind, EntityKind::Selection))
    }

    fn parent_to_world(&self, idx: NodeIndex) -> Affine {
        self.group_of(idx)
            .map_or(Affine::IDENTITY, |g| self.graph[g].transform)
    }

    fn world_transform_of(&self, idx: NodeIndex) -> Affine {
        self.parent_to_world(idx) * self.graph[idx].transform
    }

    // ─── Host-side operations ────────────────────────────────────────────

    pub fn add_stroke(
        &mut self,
        context: ImageContext,
        geometry: Geometry,
        transform: Affine,
    ) -> EntityId {
        let id = EntityId::fresh();
        self.insert(
            self.root,
            Entity {
                id,
                context,
                kind: EntityKind::Stroke { geometry },
                transform,
                visible: true,
            },
        );
        id
    }

    /// Apply `affine` to an entity in its parent frame.
    pub fn transform_entity(&mut self, id: EntityId, affine: Affine) -> Result<(), SurfaceError> {
        let idx = self.node(id)?;
        let entity = &mut self.graph[idx];
        entity.transform = affine * entity.transform;
        Ok(())
    }

    pub fn translate(&mut self, id: EntityId, delta: Vec2) -> Result<(), SurfaceError> {
        self.transform_entity(id, Affine::translate(delta))
    }

    /// Group entities into a temporary selection centered on their joint
    /// bounds. Any previous selection is dissolved first.
    pub fn select(&mut self, ids: &[EntityId]) -> Result<EntityId, SurfaceError> {
        self.deselect();

        let mut nodes = Vec::with_capacity(ids.len());
        let mut bounds: Option<Rect> = None;
        for &id in ids {
            let idx = self.node(id)?;
            let b = self.world_transform_of(idx).transform_rect_bbox(self.graph[idx].local_rect());
            bounds = Some(bounds.map_or(b, |acc| acc.union(b)));
            nodes.push(idx);
        }

        let context = nodes
            .first()
            .map_or_else(|| ImageContext::intern(""), |&idx| self.graph[idx].context);
        let center = bounds.map_or(Point::ZERO, |b| b.center());
        let group_transform = Affine::translate(center.to_vec2());
        let group_id = EntityId::fresh();
        let group = self.insert(
            self.root,
            Entity {
                id: group_id,
                context,
                kind: EntityKind::Selection,
                transform: group_transform,
                visible: true,
            },
        );

        let inverse = group_transform.inverse();
        for idx in nodes {
            let world = self.graph[idx].transform;
            self.graph[idx].transform = inverse * world;
            self.reparent(idx, group);
        }
        self.selection = Some(group);
        log::trace!("selection {group_id} holds {} entities", ids.len());
        Ok(group_id)
    }

    /// Apply `affine` to the active selection in absolute space.
    pub fn transform_selection(&mut self, affine: Affine) -> bool {
        let Some(group) = self.selection else {
            return false;
        };
        let entity = &mut self.graph[group];
        entity.transform = affine * entity.transform;
        true
    }

    /// Dissolve the active selection, baking the group transform into its
    /// members.
    pub fn deselect(&mut self) {
        let Some(group) = self.selection.take() else {
            return;
        };
        let group_transform = self.graph[group].transform;
        for child in self.children(group) {
            let local = self.graph[child].transform;
            self.graph[child].transform = group_transform * local;
            self.reparent(child, self.root);
        }
        self.remove_node(group);
    }

    /// Entities of a context, back to front.
    pub fn draw_order(&self, context: ImageContext) -> Vec<EntityId> {
        let mut out = Vec::new();
        self.collect_order(self.root, context, &mut out);
        out
    }

    fn collect_order(&self, idx: NodeIndex, context: ImageContext, out: &mut Vec<EntityId>) {
        for child in self.children(idx) {
            let entity = &self.graph[child];
            match entity.kind {
                EntityKind::Selection => self.collect_order(child, context, out),
                _ if entity.context == context => out.push(entity.id),
                _ => {}
            }
        }
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.index.get(&id).map(|idx| &self.graph[*idx])
    }

    pub fn is_visible(&self, id: EntityId) -> Option<bool> {
        self.entity(id).map(|e| e.visible)
    }

    /// Tags of a context, back to front.
    pub fn tags(&self, context: ImageContext) -> Vec<EntityId> {
        self.of_kind(context, |k| matches!(k, EntityKind::Tag { .. }))
    }

    /// Connectors of a context, back to front.
    pub fn connectors(&self, context: ImageContext) -> Vec<EntityId> {
        self.of_kind(context, |k| matches!(k, EntityKind::Connector { .. }))
    }

    pub fn strokes(&self, context: ImageContext) -> Vec<EntityId> {
        self.of_kind(context, |k| matches!(k, EntityKind::Stroke { .. }))
    }

    fn of_kind(&self, context: ImageContext, pred: impl Fn(&EntityKind) -> bool) -> Vec<EntityId> {
        self.draw_order(context)
            .into_iter()
            .filter(|id| self.entity(*id).is_some_and(|e| pred(&e.kind)))
            .collect()
    }

    /// Current look of a tag, with its absolute center.
    pub fn tag_visual(&self, id: EntityId) -> Option<TagVisual> {
        let idx = *self.index.get(&id)?;
        match &self.graph[idx].kind {
            EntityKind::Tag {
                text,
                size,
                font_size,
                corner_radius,
                colors,
            } => Some(TagVisual {
                text: text.clone(),
                center: self.world_transform_of(idx) * Point::ZERO,
                size: *size,
                font_size: *font_size,
                corner_radius: *corner_radius,
                colors: *colors,
            }),
            _ => None,
        }
    }

    pub fn connector_line(&self, id: EntityId) -> Option<Line> {
        match &self.entity(id)?.kind {
            EntityKind::Connector { line, .. } => Some(*line),
            _ => None,
        }
    }

    pub fn has_pending_loads(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Finish every queued scene load. Returns the completed tickets in
    /// order.
    pub fn pump(&mut self) -> Vec<LoadTicket> {
        let mut done = Vec::with_capacity(self.pending.len());
        while let Some(load) = self.pending.pop_front() {
            self.apply_load(load.context, load.entities);
            log::debug!("scene load {:?} complete", load.ticket);
            done.push(load.ticket);
        }
        done
    }

    fn apply_load(&mut self, context: ImageContext, entities: Vec<SceneEntity>) {
        if let Some(group) = self.selection
            && self.graph[group].context == context
        {
            self.deselect();
        }

        let stale: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&idx| idx != self.root && self.graph[idx].context == context)
            .collect();
        for idx in stale {
            self.remove_node(idx);
        }

        for scene in entities {
            self.insert(
                self.root,
                Entity {
                    id: scene.id,
                    context,
                    kind: EntityKind::Stroke {
                        geometry: scene.geometry,
                    },
                    transform: scene.transform,
                    visible: scene.visible,
                },
            );
        }
    }
}

impl Surface for Canvas {
    fn geometry(&self, id: EntityId) -> Option<&Geometry> {
        match &self.entity(id)?.kind {
            EntityKind::Stroke { geometry } => Some(geometry),
            _ => None,
        }
    }

    fn local_transform(&self, id: EntityId) -> Option<Affine> {
        self.entity(id).map(|e| e.transform)
    }

    fn group_transform(&self, id: EntityId) -> Option<Affine> {
        let idx = *self.index.get(&id)?;
        self.group_of(idx).map(|g| self.graph[g].transform)
    }

    fn center(&self, id: EntityId) -> Option<Point> {
        let entity = self.entity(id)?;
        Some(match &entity.kind {
            EntityKind::Stroke { .. } => entity
                .transform
                .transform_rect_bbox(entity.local_rect())
                .center(),
            _ => entity.transform * entity.local_center(),
        })
    }

    fn bounding_box(&self, id: EntityId) -> Option<Rect> {
        let idx = *self.index.get(&id)?;
        let entity = &self.graph[idx];
        Some(
            self.world_transform_of(idx)
                .transform_rect_bbox(entity.local_rect()),
        )
    }

    fn in_active_selection(&self, id: EntityId) -> bool {
        self.index
            .get(&id)
            .is_some_and(|&idx| self.group_of(idx).is_some())
    }

    fn measure_text(&self, text: &str, font_size: f64) -> Size {
        let chars = text.chars().count() as f64;
        Size::new(chars * font_size * self.char_width, font_size)
    }

    fn add_tag(&mut self, context: ImageContext, visual: &TagVisual) -> EntityId {
        let id = EntityId::fresh();
        self.insert(
            self.root,
            Entity {
                id,
                context,
                kind: EntityKind::Tag {
                    text: visual.text.clone(),
                    size: visual.size,
                    font_size: visual.font_size,
                    corner_radius: visual.corner_radius,
                    colors: visual.colors,
                },
                transform: Affine::translate(visual.center.to_vec2()),
                visible: true,
            },
        );
        id
    }

    fn update_tag(&mut self, id: EntityId, visual: &TagVisual) -> Result<(), SurfaceError> {
        let idx = self.node(id)?;
        match &mut self.graph[idx].kind {
            EntityKind::Tag {
                text,
                size,
                font_size,
                corner_radius,
                colors,
            } => {
                text.clone_from(&visual.text);
                *size = visual.size;
                *font_size = visual.font_size;
                *corner_radius = visual.corner_radius;
                *colors = visual.colors;
            }
            _ => return Err(SurfaceError::WrongKind(id, "tag")),
        }
        self.set_center(id, visual.center)
    }

    fn set_center(&mut self, id: EntityId, center: Point) -> Result<(), SurfaceError> {
        let idx = self.node(id)?;
        let current = self.center(id).ok_or(SurfaceError::UnknownEntity(id))?;
        let target = self.parent_to_world(idx).inverse() * center;
        let entity = &mut self.graph[idx];
        entity.transform = Affine::translate(target - current) * entity.transform;
        Ok(())
    }

    fn add_connector(
        &mut self,
        context: ImageContext,
        line: Line,
        style: ConnectorStyle,
    ) -> EntityId {
        let id = EntityId::fresh();
        self.insert(
            self.root,
            Entity {
                id,
                context,
                kind: EntityKind::Connector { line, style },
                transform: Affine::IDENTITY,
                visible: true,
            },
        );
        id
    }

    fn send_to_back(&mut self, id: EntityId) -> Result<(), SurfaceError> {
        let idx = self.node(id)?;
        if let Some(parent) = self.parent(idx)
            && let Some(order) = self.z_order.get_mut(&parent)
            && let Some(pos) = order.iter().position(|&c| c == idx)
        {
            let child = order.remove(pos);
            order.insert(0, child);
        }
        Ok(())
    }

    fn remove(&mut self, id: EntityId) -> Result<(), SurfaceError> {
        let idx = self.node(id)?;
        if self.selection == Some(idx) {
            self.deselect();
            return Ok(());
        }
        self.remove_node(idx);
        Ok(())
    }

    fn set_visible(&mut self, id: EntityId, visible: bool) -> Result<(), SurfaceError> {
        let idx = self.node(id)?;
        self.graph[idx].visible = visible;
        Ok(())
    }

    fn export_scene(&self, context: ImageContext) -> Result<SceneData, SurfaceError> {
        let entities: Vec<SceneEntity> = self
            .draw_order(context)
            .into_iter()
            .filter_map(|id| {
                let idx = *self.index.get(&id)?;
                let entity = &self.graph[idx];
                if !entity.is_exportable() {
                    return None;
                }
                let EntityKind::Stroke { geometry } = &entity.kind else {
                    return None;
                };
                Some(SceneEntity {
                    id,
                    transform: self.world_transform_of(idx),
                    geometry: geometry.clone(),
                    visible: entity.visible,
                })
            })
            .collect();
        Ok(SceneData(rmp_serde::to_vec(&entities)?))
    }

    fn load_scene(
        &mut self,
        context: ImageContext,
        scene: &SceneData,
    ) -> Result<LoadTicket, SurfaceError> {
        let entities: Vec<SceneEntity> = rmp_serde::from_slice(&scene.0)?;
        self.next_ticket += 1;
        let ticket = LoadTicket(self.next_ticket);
        log::debug!(
            "scene load {ticket:?} queued for {context} ({} strokes)",
            entities.len()
        );
        self.pending.push_back(PendingLoad {
            ticket,
            context,
            entities,
        });
        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::absolute_center;
    use pretty_assertions::assert_eq;

    fn ctx() -> ImageContext {
        ImageContext::intern("canvas-test")
    }

    fn segment(canvas: &mut Canvas, x: f64) -> EntityId {
        canvas.add_stroke(
            ctx(),
            Geometry::Segment(Line::new((0.0, 0.0), (10.0, 0.0))),
            Affine::translate(Vec2::new(x, 0.0)),
        )
    }

    fn near(a: Point, b: Point) -> bool {
        a.distance(b) < 1e-9
    }

    #[test]
    fn stroke_center_and_bounds() {
        let mut canvas = Canvas::new();
        let id = segment(&mut canvas, 20.0);
        assert_eq!(canvas.center(id), Some(Point::new(25.0, 0.0)));
        assert_eq!(canvas.bounding_box(id), Some(Rect::new(20.0, 0.0, 30.0, 0.0)));
    }

    #[test]
    fn send_to_back_reorders() {
        let mut canvas = Canvas::new();
        let a = segment(&mut canvas, 0.0);
        let b = segment(&mut canvas, 20.0);
        let line = canvas.add_connector(ctx(), Line::new((0.0, 0.0), (1.0, 1.0)), ConnectorStyle::default());
        canvas.send_to_back(line).unwrap();
        assert_eq!(canvas.draw_order(ctx()), vec![line, a, b]);
    }

    #[test]
    fn selection_round_trip_keeps_world_position() {
        let mut canvas = Canvas::new();
        let a = segment(&mut canvas, 0.0);
        let b = segment(&mut canvas, 40.0);

        canvas.select(&[a, b]).unwrap();
        assert!(canvas.in_active_selection(a));
        assert!(canvas.group_transform(a).is_some());
        // Group is centered on the joint bounds (0..50), so `a` sits left of it.
        assert_eq!(canvas.center(a), Some(Point::new(-20.0, 0.0)));
        assert!(near(absolute_center(&canvas, a).unwrap(), Point::new(5.0, 0.0)));

        canvas.transform_selection(Affine::translate(Vec2::new(0.0, 30.0)));
        assert!(near(absolute_center(&canvas, b).unwrap(), Point::new(45.0, 30.0)));

        canvas.deselect();
        assert!(!canvas.in_active_selection(a));
        assert!(near(canvas.center(a).unwrap(), Point::new(5.0, 30.0)));
    }

    #[test]
    fn set_center_inside_selection_is_absolute() {
        let mut canvas = Canvas::new();
        let a = segment(&mut canvas, 0.0);
        let tag = canvas.add_tag(
            ctx(),
            &TagVisual {
                text: "A1".into(),
                center: Point::new(50.0, 50.0),
                size: Size::new(20.0, 10.0),
                font_size: 10.0,
                corner_radius: 2.0,
                colors: TagColors::default(),
            },
        );
        canvas.select(&[a, tag]).unwrap();
        canvas.set_center(tag, Point::new(0.0, 0.0)).unwrap();
        assert!(near(absolute_center(&canvas, tag).unwrap(), Point::ZERO));
        canvas.deselect();
        assert!(near(canvas.tag_visual(tag).unwrap().center, Point::ZERO));
    }

    #[test]
    fn export_skips_tags_and_load_is_deferred() {
        let mut canvas = Canvas::new();
        let a = segment(&mut canvas, 0.0);
        canvas.add_connector(ctx(), Line::new((0.0, 0.0), (1.0, 1.0)), ConnectorStyle::default());
        let scene = canvas.export_scene(ctx()).unwrap();

        canvas.translate(a, Vec2::new(100.0, 0.0)).unwrap();
        let ticket = canvas.load_scene(ctx(), &scene).unwrap();
        assert!(canvas.has_pending_loads());
        assert_eq!(canvas.center(a), Some(Point::new(105.0, 0.0)));

        assert_eq!(canvas.pump(), vec![ticket]);
        assert_eq!(canvas.draw_order(ctx()), vec![a]);
        assert_eq!(canvas.center(a), Some(Point::new(5.0, 0.0)));
        assert_eq!(canvas.export_scene(ctx()).unwrap(), scene);
    }

    #[test]
    fn corrupt_scene_is_rejected() {
        let mut canvas = Canvas::new();
        let err = canvas.load_scene(ctx(), &SceneData(vec![0xc1, 0x00]));
        assert!(matches!(err, Err(SurfaceError::Decode(_))));
        assert!(!canvas.has_pending_loads());
    }

    #[test]
    fn measure_text_uses_char_width() {
        let canvas = Canvas::new().with_char_width(0.5);
        assert_eq!(canvas.measure_text("A1", 20.0), Size::new(20.0, 20.0));
    }

    #[test]
    fn unknown_entity_errors() {
        let mut canvas = Canvas::new();
        let ghost = EntityId::from_raw(u64::MAX);
        assert!(matches!(
            canvas.remove(ghost),
            Err(SurfaceError::UnknownEntity(id)) if id == ghost
        ));
    }
}
