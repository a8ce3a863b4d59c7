//! Interface to the external drawing layer.
//!
//! The engine never owns drawn geometry. It reads shapes, centers and
//! transforms through `Surface`, creates its own tag and connector entities
//! through it, and asks it to export or reload a context's scene for
//! undo/redo. Reloading is asynchronous: `load_scene` hands back a
//! `LoadTicket` and the host reports completion later.

use kurbo::{Affine, Line, Point, Rect, Size};
use serde::{Deserialize, Serialize};
use tagline_core::geometry::StrokeShape;
use tagline_core::{EntityId, Geometry, ImageContext, TagColors};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("entity {0} does not exist")]
    UnknownEntity(EntityId),
    #[error("entity {0} is not a {1}")]
    WrongKind(EntityId, &'static str),
    #[error("scene encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("scene decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Opaque serialized scene of one context. Only the surface that produced
/// it knows how to read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneData(pub Vec<u8>);

/// Handle for one pending `load_scene`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadTicket(pub u64);

/// Per-entity transform notifications from the drawing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    /// Drag in progress.
    Moving,
    Scaling,
    Rotating,
    /// Interaction finished.
    Modified,
}

/// Everything needed to draw one tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagVisual {
    pub text: String,
    /// Absolute center of the composite (background + text).
    pub center: Point,
    /// Background size, padding included.
    pub size: Size,
    pub font_size: f64,
    pub corner_radius: f64,
    pub colors: TagColors,
}

impl TagVisual {
    pub fn bounds(&self) -> Rect {
        Rect::from_center_size(self.center, self.size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectorStyle {
    pub width: f64,
    pub alpha: f32,
    /// Dash and gap lengths.
    pub dash: Option<[f64; 2]>,
}

impl Default for ConnectorStyle {
    fn default() -> Self {
        Self {
            width: 1.0,
            alpha: 0.35,
            dash: Some([6.0, 4.0]),
        }
    }
}

/// The drawing layer as seen by the engine.
pub trait Surface {
    // ─── Queries ─────────────────────────────────────────────────────────

    /// Native shape of a stroke entity, in its local frame.
    fn geometry(&self, id: EntityId) -> Option<&Geometry>;

    /// Entity frame → parent frame.
    fn local_transform(&self, id: EntityId) -> Option<Affine>;

    /// Parent frame → absolute, when the entity currently sits inside a
    /// temporary multi-entity selection group. `None` otherwise.
    fn group_transform(&self, id: EntityId) -> Option<Affine>;

    /// Entity center in its parent frame (group-local while grouped).
    fn center(&self, id: EntityId) -> Option<Point>;

    /// Absolute axis-aligned bounds.
    fn bounding_box(&self, id: EntityId) -> Option<Rect>;

    /// Whether the entity is part of an interactive multi-selection.
    fn in_active_selection(&self, id: EntityId) -> bool;

    fn measure_text(&self, text: &str, font_size: f64) -> Size;

    // ─── Entities owned by the engine ────────────────────────────────────

    fn add_tag(&mut self, context: ImageContext, visual: &TagVisual) -> EntityId;

    fn update_tag(&mut self, id: EntityId, visual: &TagVisual) -> Result<(), SurfaceError>;

    /// Move an entity so its absolute center lands on `center`.
    fn set_center(&mut self, id: EntityId, center: Point) -> Result<(), SurfaceError>;

    fn add_connector(
        &mut self,
        context: ImageContext,
        line: Line,
        style: ConnectorStyle,
    ) -> EntityId;

    /// Put an entity behind everything else in its context.
    fn send_to_back(&mut self, id: EntityId) -> Result<(), SurfaceError>;

    fn remove(&mut self, id: EntityId) -> Result<(), SurfaceError>;

    fn set_visible(&mut self, id: EntityId, visible: bool) -> Result<(), SurfaceError>;

    // ─── Scene persistence ───────────────────────────────────────────────

    /// Serialize every exportable entity of a context. Tags and connectors
    /// are never part of it.
    fn export_scene(&self, context: ImageContext) -> Result<SceneData, SurfaceError>;

    /// Start replacing a context's content with `scene`. Completion is
    /// reported asynchronously with the returned ticket.
    fn load_scene(
        &mut self,
        context: ImageContext,
        scene: &SceneData,
    ) -> Result<LoadTicket, SurfaceError>;
}

/// Absolute center, translating group-local centers through the group.
pub fn absolute_center<S: Surface + ?Sized>(surface: &S, id: EntityId) -> Option<Point> {
    let center = surface.center(id)?;
    Some(surface.group_transform(id).unwrap_or(Affine::IDENTITY) * center)
}

/// Entity frame → absolute.
pub fn world_transform<S: Surface + ?Sized>(surface: &S, id: EntityId) -> Option<Affine> {
    let local = surface.local_transform(id)?;
    Some(surface.group_transform(id).unwrap_or(Affine::IDENTITY) * local)
}

/// Everything the closest-point resolver needs about a stroke. `None` only
/// when the entity is gone entirely.
pub fn stroke_shape<S: Surface + ?Sized>(surface: &S, id: EntityId) -> Option<StrokeShape<'_>> {
    let bounds = surface.bounding_box(id)?;
    Some(StrokeShape {
        geometry: surface.geometry(id),
        to_world: world_transform(surface, id).unwrap_or(Affine::IDENTITY),
        bounds,
    })
}
